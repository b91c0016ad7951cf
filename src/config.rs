//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which idle object a borrow picks for a key.
///
/// Fixed for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SelectionPolicy {
    /// Most recently returned first (stack order).
    #[default]
    Lifo,

    /// Least recently returned first (queue order).
    Fifo,
}

/// Configuration for keyed pool behavior
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{KeyedPoolConfiguration, SelectionPolicy};
/// use std::time::Duration;
///
/// let config = KeyedPoolConfiguration::new()
///     .with_fifo()
///     .with_test_on_borrow()
///     .with_max_active_per_key(8)
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.selection, SelectionPolicy::Fifo);
/// assert!(config.test_on_borrow);
/// assert_eq!(config.max_active_per_key, Some(8));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyedPoolConfiguration {
    /// Idle object selection discipline
    pub selection: SelectionPolicy,

    /// Whether to validate objects before handing them to a borrower
    pub test_on_borrow: bool,

    /// Whether to validate objects when they are returned to the pool
    pub test_on_return: bool,

    /// Maximum number of objects per key that can be checked out simultaneously
    pub max_active_per_key: Option<usize>,

    /// Maximum number of idle objects kept per key; extras are destroyed on return
    pub max_idle_per_key: Option<usize>,

    /// How many fresh objects a single borrow may create before giving up
    pub create_attempts: usize,

    /// Timeout for async operations
    pub operation_timeout: Option<Duration>,
}

impl Default for KeyedPoolConfiguration {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::Lifo,
            test_on_borrow: false,
            test_on_return: false,
            max_active_per_key: None,
            max_idle_per_key: None,
            create_attempts: 1,
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl KeyedPoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given idle selection policy
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Hand out the most recently returned idle object first
    pub fn with_lifo(self) -> Self {
        self.with_selection(SelectionPolicy::Lifo)
    }

    /// Hand out the least recently returned idle object first
    pub fn with_fifo(self) -> Self {
        self.with_selection(SelectionPolicy::Fifo)
    }

    /// Enable validation on borrow
    pub fn with_test_on_borrow(mut self) -> Self {
        self.test_on_borrow = true;
        self
    }

    /// Enable validation on return
    pub fn with_test_on_return(mut self) -> Self {
        self.test_on_return = true;
        self
    }

    /// Set the maximum active objects per key
    pub fn with_max_active_per_key(mut self, count: usize) -> Self {
        self.max_active_per_key = Some(count);
        self
    }

    /// Set the maximum idle objects per key
    ///
    /// # Examples
    ///
    /// ```
    /// use keyed_objectpool::KeyedPoolConfiguration;
    ///
    /// let config = KeyedPoolConfiguration::new().with_max_idle_per_key(4);
    /// assert_eq!(config.max_idle_per_key, Some(4));
    /// ```
    pub fn with_max_idle_per_key(mut self, count: usize) -> Self {
        self.max_idle_per_key = Some(count);
        self
    }

    /// Set how many objects one borrow may create; values below 1 are treated as 1
    pub fn with_create_attempts(mut self, attempts: usize) -> Self {
        self.create_attempts = attempts.max(1);
        self
    }

    /// Set operation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

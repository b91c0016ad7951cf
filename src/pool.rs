//! Keyed object pool facade

use crate::config::KeyedPoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::{KeyedObjectFactory, PoolKey};
use crate::lifecycle::LifecycleController;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::metrics::PoolMetrics;

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Open/closed state of a pool. Closing is irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Open,
    Closed,
}

/// A borrowed object that goes back to its pool when dropped
///
/// Return failures on drop are logged. Use [`release`](Self::release) to see
/// them, or [`invalidate`](Self::invalidate) to destroy the object instead.
pub struct PooledObject<K: PoolKey, F: KeyedObjectFactory<K>> {
    value: Option<F::Object>,
    key: K,
    pool: Arc<LifecycleController<K, F>>,
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> PooledObject<K, F> {
    fn new(value: F::Object, key: K, pool: Arc<LifecycleController<K, F>>) -> Self {
        Self {
            value: Some(value),
            key,
            pool,
        }
    }

    /// Key this object was borrowed under
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Return the object now, surfacing any destroy error
    pub fn release(mut self) -> PoolResult<(), F::Error> {
        match self.value.take() {
            Some(value) => self.pool.give_back(&self.key, value),
            None => Ok(()),
        }
    }

    /// Destroy the object instead of returning it
    pub fn invalidate(mut self) -> PoolResult<(), F::Error> {
        match self.value.take() {
            Some(value) => self.pool.invalidate(&self.key, value),
            None => Ok(()),
        }
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Deref for PooledObject<K, F> {
    type Target = F::Object;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> DerefMut for PooledObject<K, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Drop for PooledObject<K, F> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take()
            && let Err(err) = self.pool.give_back(&self.key, value)
        {
            warn!(key = ?self.key, error = %err, "failed to return pooled object");
        }
    }
}

/// Thread-safe pool of factory-made objects, partitioned by key
///
/// Each key has its own idle set and active count. Cloning the pool is cheap
/// and yields another handle to the same pool; the pool closes itself when the
/// last handle and the last [`PooledObject`] are gone.
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
/// use std::convert::Infallible;
///
/// let factory = FnFactory::new(|host: &String| Ok::<_, Infallible>(format!("conn to {host}")));
/// let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());
///
/// let host = "db-1".to_string();
/// let conn = pool.borrow_object(&host).unwrap();
/// assert_eq!(pool.num_active_for(&host), 1);
///
/// pool.return_object(&host, conn).unwrap();
/// assert_eq!(pool.num_idle_for(&host), 1);
///
/// pool.close();
/// assert!(pool.borrow_object(&host).unwrap_err().is_closed());
/// ```
pub struct KeyedObjectPool<K: PoolKey, F: KeyedObjectFactory<K>> {
    inner: Arc<LifecycleController<K, F>>,
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Clone for KeyedObjectPool<K, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> KeyedObjectPool<K, F> {
    /// Create an empty pool around `factory`
    pub fn new(factory: F, config: KeyedPoolConfiguration) -> Self {
        Self {
            inner: Arc::new(LifecycleController::new(factory, config)),
        }
    }

    /// Borrow an object for `key`, reusing an idle one or creating a new one
    ///
    /// Fails with [`PoolError::Closed`] after [`close`](Self::close),
    /// [`PoolError::MaxActiveObjectsReached`] when the key is at capacity,
    /// [`PoolError::Factory`] when creation fails and [`PoolError::Exhausted`]
    /// when no candidate survived activation and validation.
    pub fn borrow_object(&self, key: &K) -> PoolResult<F::Object, F::Error> {
        self.inner.borrow(key)
    }

    /// Try to borrow an object without surfacing the error
    pub fn try_borrow_object(&self, key: &K) -> Option<F::Object> {
        self.borrow_object(key).ok()
    }

    /// Borrow an object asynchronously, waiting while the key is at capacity
    ///
    /// Gives up with [`PoolError::Timeout`] after the configured operation timeout.
    ///
    /// A future handed to `tokio::spawn` must be `Send` for any lifetime it
    /// mentions, so a factory implemented only for `&'static str` keys cannot
    /// be borrowed from inside a spawned task. Use an owned key type such as
    /// `String` there.
    pub async fn borrow_object_async(&self, key: &K) -> PoolResult<F::Object, F::Error> {
        let timeout = self.inner.config().operation_timeout.unwrap_or(Duration::from_secs(30));

        tokio::time::timeout(timeout, async {
            loop {
                match self.borrow_object(key) {
                    Err(PoolError::MaxActiveObjectsReached) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    result => return result,
                }
            }
        })
        .await
        .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Borrow an object wrapped in a guard that returns it on drop
    pub fn get_object(&self, key: &K) -> PoolResult<PooledObject<K, F>, F::Error> {
        let value = self.borrow_object(key)?;
        Ok(PooledObject::new(value, key.clone(), Arc::clone(&self.inner)))
    }

    /// Async variant of [`get_object`](Self::get_object)
    pub async fn get_object_async(&self, key: &K) -> PoolResult<PooledObject<K, F>, F::Error> {
        let value = self.borrow_object_async(key).await?;
        Ok(PooledObject::new(value, key.clone(), Arc::clone(&self.inner)))
    }

    /// Return a borrowed object to the idle set
    ///
    /// The object is passivated first. If passivation fails it is destroyed
    /// and only a destroy failure is reported. Returning to a closed pool
    /// destroys the object. Returning under a key with no outstanding borrow
    /// destroys the object and fails with [`PoolError::NotBorrowed`].
    pub fn return_object(&self, key: &K, object: F::Object) -> PoolResult<(), F::Error> {
        self.inner.give_back(key, object)
    }

    /// Destroy a borrowed object instead of returning it
    ///
    /// The object stops counting as active immediately. A destroy failure is
    /// reported while the pool is open and ignored once it is closed.
    pub fn invalidate_object(&self, key: &K, object: F::Object) -> PoolResult<(), F::Error> {
        self.inner.invalidate(key, object)
    }

    /// Create one object and park it in the idle set for `key`
    ///
    /// If the key already holds `max_idle_per_key` idle objects, the new one is
    /// destroyed and `Ok(())` is returned, so the idle count may not grow.
    pub fn add_object(&self, key: &K) -> PoolResult<(), F::Error> {
        self.inner.add(key)
    }

    /// Add `count` idle objects for `key`
    ///
    /// Stops at the first failure. Objects beyond `max_idle_per_key` are
    /// destroyed as in [`add_object`](Self::add_object).
    ///
    /// # Examples
    ///
    /// ```
    /// use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
    /// use std::convert::Infallible;
    ///
    /// let pool = KeyedObjectPool::new(
    ///     FnFactory::new(|key: &u8| Ok::<_, Infallible>(vec![0u8; *key as usize])),
    ///     KeyedPoolConfiguration::default(),
    /// );
    ///
    /// pool.prefill(&16, 4).unwrap();
    /// assert_eq!(pool.num_idle_for(&16), 4);
    /// ```
    pub fn prefill(&self, key: &K, count: usize) -> PoolResult<(), F::Error> {
        for _ in 0..count {
            self.add_object(key)?;
        }
        Ok(())
    }

    /// Destroy every idle object for every key
    pub fn clear(&self) {
        self.inner.clear_all();
    }

    /// Destroy every idle object for `key`
    pub fn clear_key(&self, key: &K) {
        self.inner.clear_key(key);
    }

    /// Close the pool and destroy all idle objects. Calling it again does nothing.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn state(&self) -> PoolState {
        if self.inner.is_closed() {
            PoolState::Closed
        } else {
            PoolState::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Idle objects across all keys
    pub fn num_idle(&self) -> usize {
        self.inner.total_idle()
    }

    /// Idle objects for `key`
    pub fn num_idle_for(&self, key: &K) -> usize {
        self.inner.num_idle(key)
    }

    /// Borrowed objects across all keys
    pub fn num_active(&self) -> usize {
        self.inner.total_active()
    }

    /// Borrowed objects for `key`
    pub fn num_active_for(&self, key: &K) -> usize {
        self.inner.num_active(key)
    }

    pub fn config(&self) -> &KeyedPoolConfiguration {
        self.inner.config()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> fmt::Debug for KeyedObjectPool<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedObjectPool")
            .field("state", &self.state())
            .field("selection", &self.config().selection)
            .field("num_active", &self.num_active())
            .field("num_idle", &self.num_idle())
            .finish()
    }
}

//! Metrics collection and export for keyed pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metrics snapshot for a keyed pool
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
/// use std::convert::Infallible;
///
/// let pool = KeyedObjectPool::new(
///     FnFactory::new(|key: &u32| Ok::<_, Infallible>(*key)),
///     KeyedPoolConfiguration::default(),
/// );
///
/// let obj = pool.borrow_object(&7).unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_borrowed, 1);
/// assert_eq!(metrics.active_objects, 1);
/// pool.return_object(&7, obj).unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Total successful borrows
    pub total_borrowed: usize,

    /// Total objects returned to the idle set
    pub total_returned: usize,

    /// Objects created by the factory
    pub total_created: usize,

    /// Objects handed to the factory's destroy
    pub total_destroyed: usize,

    /// Destroy calls that failed (swallowed or propagated)
    pub destroy_failures: usize,

    /// Candidates discarded because activation failed
    pub activation_failures: usize,

    /// Candidates discarded because validation failed
    pub validation_failures: usize,

    /// Returns whose passivation failed
    pub passivation_failures: usize,

    /// Borrows refused because the key was at capacity
    pub max_active_events: usize,

    /// Current active objects across all keys
    pub active_objects: usize,

    /// Current idle objects across all keys
    pub idle_objects: usize,

    /// Keys the pool has seen
    pub keys: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_borrowed".to_string(), self.total_borrowed.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("activation_failures".to_string(), self.activation_failures.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("passivation_failures".to_string(), self.passivation_failures.to_string());
        metrics.insert("max_active_events".to_string(), self.max_active_events.to_string());
        metrics.insert("active_objects".to_string(), self.active_objects.to_string());
        metrics.insert("idle_objects".to_string(), self.idle_objects.to_string());
        metrics.insert("keys".to_string(), self.keys.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// `pool_name` and `tags` become constant labels on every series.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
    /// use std::collections::HashMap;
    /// use std::convert::Infallible;
    ///
    /// let pool = KeyedObjectPool::new(
    ///     FnFactory::new(|key: &u32| Ok::<_, Infallible>(*key)),
    ///     KeyedPoolConfiguration::default(),
    /// );
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("my_pool", Some(&tags)).unwrap();
    /// assert!(output.contains("keyedpool_objects_active"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let labels = Self::const_labels(pool_name, tags);
        let registry = Registry::new();

        let gauges = [
            ("keyedpool_objects_active", "Current active objects", metrics.active_objects),
            ("keyedpool_objects_idle", "Current idle objects", metrics.idle_objects),
            ("keyedpool_keys", "Keys holding idle or borrowed objects", metrics.keys),
        ];
        for (name, help, value) in gauges {
            let opts = Opts::new(name, help).const_labels(labels.clone());
            let gauge = IntGauge::with_opts(opts)?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let m = metrics;
        let counters = [
            ("keyedpool_objects_borrowed_total", "Objects borrowed", m.total_borrowed),
            ("keyedpool_objects_returned_total", "Objects returned", m.total_returned),
            ("keyedpool_objects_created_total", "Objects created", m.total_created),
            ("keyedpool_objects_destroyed_total", "Objects destroyed", m.total_destroyed),
            ("keyedpool_destroy_failures_total", "Failed destroy calls", m.destroy_failures),
            ("keyedpool_activation_failures_total", "Activation failures", m.activation_failures),
            ("keyedpool_validation_failures_total", "Validation failures", m.validation_failures),
            (
                "keyedpool_passivation_failures_total",
                "Passivation failures",
                m.passivation_failures,
            ),
            (
                "keyedpool_events_max_active_total",
                "Borrows refused at capacity",
                m.max_active_events,
            ),
        ];
        for (name, help, value) in counters {
            let opts = Opts::new(name, help).const_labels(labels.clone());
            let counter = IntCounter::with_opts(opts)?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    fn const_labels(
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }

        labels
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_borrowed: AtomicUsize,
    pub total_returned: AtomicUsize,
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub destroy_failures: AtomicUsize,
    pub activation_failures: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub passivation_failures: AtomicUsize,
    pub max_active_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, active: usize, idle: usize, keys: usize) -> PoolMetrics {
        PoolMetrics {
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            activation_failures: self.activation_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            passivation_failures: self.passivation_failures.load(Ordering::Relaxed),
            max_active_events: self.max_active_events.load(Ordering::Relaxed),
            active_objects: active,
            idle_objects: idle,
            keys,
        }
    }
}

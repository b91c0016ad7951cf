//! Lifecycle state machine driving the factory
//!
//! Every transition between idle, active and destroyed goes through
//! [`LifecycleController`]. It owns the factory and the slot store, decides which
//! factory failures are recovered locally and which reach the caller, and never
//! calls the factory while a store lock is held.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::KeyedPoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::{KeyedObjectFactory, PoolKey};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::store::{KeySlot, KeyedSlotStore, Rejected};

pub(crate) struct LifecycleController<K: PoolKey, F: KeyedObjectFactory<K>> {
    factory: F,
    store: KeyedSlotStore<K, F::Object>,
    config: KeyedPoolConfiguration,
    metrics: MetricsTracker,
}

/// A borrow in progress: one reservation on the key's slot plus the candidate
/// currently being prepared.
///
/// Dropping an uncommitted checkout destroys the candidate and releases the
/// reservation. That covers early returns as well as unwinding out of a
/// factory call.
struct Checkout<'a, K: PoolKey, F: KeyedObjectFactory<K>> {
    controller: &'a LifecycleController<K, F>,
    key: &'a K,
    slot: Arc<KeySlot<F::Object>>,
    candidate: Option<F::Object>,
    committed: bool,
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Checkout<'_, K, F> {
    fn hold(&mut self, object: F::Object) -> &mut F::Object {
        self.candidate.insert(object)
    }

    fn discard(&mut self) {
        if let Some(object) = self.candidate.take() {
            self.controller.destroy_quietly(self.key, object);
        }
    }

    fn commit(mut self) -> Option<F::Object> {
        let object = self.candidate.take()?;
        self.slot.commit_reservation();
        self.committed = true;
        Some(object)
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Drop for Checkout<'_, K, F> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.discard();
        self.slot.cancel_reservation();
        self.controller.store.prune(self.key);
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> LifecycleController<K, F> {
    pub fn new(factory: F, config: KeyedPoolConfiguration) -> Self {
        Self {
            factory,
            store: KeyedSlotStore::new(config.selection, config.max_idle_per_key),
            config,
            metrics: MetricsTracker::new(),
        }
    }

    pub fn config(&self) -> &KeyedPoolConfiguration {
        &self.config
    }

    /// Hand out an object for `key`, reusing idle ones before creating.
    ///
    /// Idle candidates that fail activation or validation are destroyed and the
    /// next one is tried. Once the idle set is exhausted, up to
    /// `create_attempts` fresh objects are created. A create error is returned
    /// as is; a fresh object failing activation or validation on the last
    /// attempt yields [`PoolError::Exhausted`].
    pub fn borrow(&self, key: &K) -> PoolResult<F::Object, F::Error> {
        if self.store.is_sealed() {
            return Err(PoolError::Closed);
        }

        let Some(slot) = self.store.reserve(key, self.config.max_active_per_key) else {
            MetricsTracker::increment(&self.metrics.max_active_events);
            return Err(PoolError::MaxActiveObjectsReached);
        };

        let mut checkout = Checkout {
            controller: self,
            key,
            slot,
            candidate: None,
            committed: false,
        };

        while let Some(object) = self.store.pop_idle(&checkout.slot) {
            if self.prepare(key, checkout.hold(object)) {
                return self.hand_out(checkout);
            }
            checkout.discard();
        }

        for attempt in 1..=self.config.create_attempts.max(1) {
            let object = self.create(key)?;
            if self.prepare(key, checkout.hold(object)) {
                return self.hand_out(checkout);
            }
            debug!(key = ?key, attempt, "fresh object failed preparation");
            checkout.discard();
        }

        Err(PoolError::Exhausted)
    }

    fn hand_out(&self, checkout: Checkout<'_, K, F>) -> PoolResult<F::Object, F::Error> {
        let object = checkout.commit().ok_or(PoolError::Exhausted)?;
        MetricsTracker::increment(&self.metrics.total_borrowed);
        Ok(object)
    }

    /// Activate, then validate when `test_on_borrow` is set.
    fn prepare(&self, key: &K, object: &mut F::Object) -> bool {
        if let Err(err) = self.factory.activate(key, object) {
            MetricsTracker::increment(&self.metrics.activation_failures);
            debug!(key = ?key, error = %err, "activation failed");
            return false;
        }
        !self.config.test_on_borrow || self.validate(key, object)
    }

    fn validate(&self, key: &K, object: &F::Object) -> bool {
        match self.factory.validate(key, object) {
            Ok(true) => true,
            Ok(false) => {
                MetricsTracker::increment(&self.metrics.validation_failures);
                debug!(key = ?key, "validation rejected object");
                false
            }
            Err(err) => {
                MetricsTracker::increment(&self.metrics.validation_failures);
                debug!(key = ?key, error = %err, "validation failed");
                false
            }
        }
    }

    fn create(&self, key: &K) -> PoolResult<F::Object, F::Error> {
        let object = self.factory.create(key).map_err(PoolError::Factory)?;
        MetricsTracker::increment(&self.metrics.total_created);
        debug!(key = ?key, "created object");
        Ok(object)
    }

    fn destroy(&self, key: &K, object: F::Object) -> Result<(), F::Error> {
        MetricsTracker::increment(&self.metrics.total_destroyed);
        let result = self.factory.destroy(key, object);
        if result.is_err() {
            MetricsTracker::increment(&self.metrics.destroy_failures);
        }
        result
    }

    fn destroy_quietly(&self, key: &K, object: F::Object) {
        if let Err(err) = self.destroy(key, object) {
            warn!(key = ?key, error = %err, "ignoring destroy failure");
        }
    }

    /// Take back a borrowed object.
    ///
    /// A failed return-validation or passivation destroys the object; only the
    /// destroy error, if any, reaches the caller. On a closed pool the object
    /// is destroyed best-effort and `Ok` is returned. An object returned under a
    /// key with nothing on loan is destroyed and rejected with
    /// [`PoolError::NotBorrowed`].
    pub fn give_back(&self, key: &K, mut object: F::Object) -> PoolResult<(), F::Error> {
        let Some(slot) = self.store.existing(key).filter(|slot| slot.num_active() > 0) else {
            return self.reject_unborrowed(key, object);
        };

        if self.store.is_sealed() {
            self.release(key, &slot);
            self.destroy_quietly(key, object);
            return Ok(());
        }

        if self.config.test_on_return && !self.validate(key, &object) {
            self.release(key, &slot);
            return self.destroy(key, object).map_err(PoolError::Factory);
        }

        if let Err(err) = self.factory.passivate(key, &mut object) {
            MetricsTracker::increment(&self.metrics.passivation_failures);
            debug!(key = ?key, error = %err, "passivation failed, destroying object");
            self.release(key, &slot);
            return self.destroy(key, object).map_err(PoolError::Factory);
        }

        match self.store.check_in(&slot, object) {
            Ok(()) => {
                MetricsTracker::increment(&self.metrics.total_returned);
                Ok(())
            }
            Err(Rejected::Unborrowed(object)) => self.reject_unborrowed(key, object),
            Err(rejected) => {
                self.store.prune(key);
                self.destroy_quietly(key, rejected.into_inner());
                Ok(())
            }
        }
    }

    fn release(&self, key: &K, slot: &KeySlot<F::Object>) {
        slot.release_active();
        self.store.prune(key);
    }

    fn reject_unborrowed(&self, key: &K, object: F::Object) -> PoolResult<(), F::Error> {
        warn!(key = ?key, "object returned under a key with no outstanding borrow");
        self.destroy_quietly(key, object);
        Err(PoolError::NotBorrowed)
    }

    /// Forget a borrowed object and destroy it.
    ///
    /// The object stops counting as active before destroy runs. Destroy
    /// failures propagate on an open pool and are swallowed once it is closed.
    pub fn invalidate(&self, key: &K, object: F::Object) -> PoolResult<(), F::Error> {
        if let Some(slot) = self.store.existing(key) {
            self.release(key, &slot);
        }

        match self.destroy(key, object) {
            Ok(()) => Ok(()),
            Err(err) if self.store.is_sealed() => {
                warn!(key = ?key, error = %err, "ignoring destroy failure on closed pool");
                Ok(())
            }
            Err(err) => Err(PoolError::Factory(err)),
        }
    }

    /// Create and passivate one object straight into the idle set.
    ///
    /// When the key already holds `max_idle_per_key` idle objects the new one
    /// is destroyed and `Ok` is still returned.
    pub fn add(&self, key: &K) -> PoolResult<(), F::Error> {
        if self.store.is_sealed() {
            return Err(PoolError::Closed);
        }

        let mut object = self.create(key)?;

        if let Err(err) = self.factory.passivate(key, &mut object) {
            MetricsTracker::increment(&self.metrics.passivation_failures);
            self.destroy_quietly(key, object);
            return Err(PoolError::Factory(err));
        }

        match self.store.admit(key, object) {
            Ok(()) => Ok(()),
            Err(Rejected::Sealed(object)) => {
                self.destroy_quietly(key, object);
                Err(PoolError::Closed)
            }
            Err(rejected) => {
                debug!(key = ?key, "idle set full, destroying added object");
                self.destroy_quietly(key, rejected.into_inner());
                Ok(())
            }
        }
    }

    pub fn clear_key(&self, key: &K) {
        let drained = self.store.drain(key);
        if drained.is_empty() {
            return;
        }
        debug!(key = ?key, count = drained.len(), "clearing idle objects");
        for object in drained {
            self.destroy_quietly(key, object);
        }
    }

    pub fn clear_all(&self) {
        let drained = self.store.drain_all();
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "clearing idle objects for all keys");
        for (key, object) in drained {
            self.destroy_quietly(&key, object);
        }
    }

    /// Seal the store and destroy every idle object. Later calls do nothing.
    pub fn close(&self) {
        if self.store.seal() {
            info!(active = self.store.total_active(), "closing keyed pool");
            self.clear_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_sealed()
    }

    pub fn num_idle(&self, key: &K) -> usize {
        self.store.num_idle(key)
    }

    pub fn num_active(&self, key: &K) -> usize {
        self.store.num_active(key)
    }

    pub fn total_idle(&self) -> usize {
        self.store.total_idle()
    }

    pub fn total_active(&self) -> usize {
        self.store.total_active()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.get_metrics(
            self.store.total_active(),
            self.store.total_idle(),
            self.store.key_count(),
        )
    }
}

impl<K: PoolKey, F: KeyedObjectFactory<K>> Drop for LifecycleController<K, F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InjectedFailure, Key, MethodCall, RecordingFactory};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const KEY: Key = "key";

    /// Panics inside activate while the switch is on.
    #[derive(Clone, Default)]
    struct PanickyFactory {
        panic_on_activate: Arc<AtomicBool>,
        created: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    impl KeyedObjectFactory<Key> for PanickyFactory {
        type Object = usize;
        type Error = InjectedFailure;

        fn create(&self, _key: &Key) -> Result<usize, InjectedFailure> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn activate(&self, _key: &Key, _object: &mut usize) -> Result<(), InjectedFailure> {
            if self.panic_on_activate.load(Ordering::SeqCst) {
                panic!("activate blew up");
            }
            Ok(())
        }

        fn destroy(&self, _key: &Key, _object: usize) -> Result<(), InjectedFailure> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_unwinding_borrow_destroys_candidate_and_releases_reservation() {
        let factory = PanickyFactory::default();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_max_active_per_key(1),
        );

        factory.panic_on_activate.store(true, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| controller.borrow(&KEY)));
        assert!(outcome.is_err());
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(controller.num_active(&KEY), 0);
        assert_eq!(controller.num_idle(&KEY), 0);

        factory.panic_on_activate.store(false, Ordering::SeqCst);
        let object = controller.borrow(&KEY).unwrap();
        assert_eq!(object, 1);
        assert_eq!(controller.num_active(&KEY), 1);
    }

    #[test]
    fn test_create_attempts_bound_fresh_creations() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_create_attempts(3),
        );

        factory.set_activate_fail(true);
        assert!(controller.borrow(&KEY).unwrap_err().is_exhausted());

        let creates = factory
            .calls()
            .iter()
            .filter(|call| matches!(call, MethodCall::Create { .. }))
            .count();
        assert_eq!(creates, 3);
        assert_eq!(factory.destroyed(), vec![0, 1, 2]);
        assert_eq!(controller.num_active(&KEY), 0);
    }

    #[test]
    fn test_max_active_counts_in_flight_and_active() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_max_active_per_key(2),
        );

        let a = controller.borrow(&KEY).unwrap();
        let _b = controller.borrow(&KEY).unwrap();
        assert_eq!(
            controller.borrow(&KEY).unwrap_err(),
            PoolError::MaxActiveObjectsReached
        );
        assert_eq!(controller.metrics().max_active_events, 1);

        // other keys are unaffected
        assert!(controller.borrow(&"other").is_ok());

        controller.give_back(&KEY, a).unwrap();
        assert_eq!(controller.borrow(&KEY).unwrap(), 0);
    }

    #[test]
    fn test_failed_create_releases_reservation() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_max_active_per_key(1),
        );

        factory.set_create_fail(true);
        assert_eq!(
            controller.borrow(&KEY).unwrap_err(),
            PoolError::Factory(InjectedFailure("create"))
        );

        factory.set_create_fail(false);
        assert!(controller.borrow(&KEY).is_ok());
    }

    #[test]
    fn test_test_on_return_destroys_invalid_object() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_test_on_return(),
        );

        let object = controller.borrow(&KEY).unwrap();
        factory.set_validate_fail(true);
        controller.give_back(&KEY, object).unwrap();

        assert_eq!(factory.destroyed(), vec![object]);
        assert_eq!(controller.num_idle(&KEY), 0);
        assert_eq!(controller.num_active(&KEY), 0);
        // passivate is skipped for an object that failed validation
        assert!(
            !factory
                .calls()
                .iter()
                .any(|call| matches!(call, MethodCall::Passivate { .. }))
        );
    }

    #[test]
    fn test_rejected_validation_on_borrow_destroys_then_exhausts() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_test_on_borrow(),
        );
        controller.add(&KEY).unwrap();
        factory.clear_calls();

        factory.set_validate_reject(true);
        assert!(controller.borrow(&KEY).unwrap_err().is_exhausted());

        assert_eq!(
            factory.calls_without_destroy(),
            vec![
                MethodCall::Activate { key: KEY, object: 0 },
                MethodCall::Validate { key: KEY, object: 0, returned: Some(false) },
                MethodCall::Create { key: KEY, returned: Some(1) },
                MethodCall::Activate { key: KEY, object: 1 },
                MethodCall::Validate { key: KEY, object: 1, returned: Some(false) },
            ]
        );
        assert_eq!(factory.destroyed(), vec![0, 1]);
        assert_eq!(controller.num_active(&KEY), 0);
        assert_eq!(controller.num_idle(&KEY), 0);
        assert_eq!(controller.metrics().validation_failures, 2);
    }

    #[test]
    fn test_rejected_validation_on_return_destroys() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_test_on_return(),
        );
        let object = controller.borrow(&KEY).unwrap();
        factory.clear_calls();

        factory.set_validate_reject(true);
        controller.give_back(&KEY, object).unwrap();

        assert_eq!(
            factory.calls(),
            vec![
                MethodCall::Validate { key: KEY, object, returned: Some(false) },
                MethodCall::Destroy { key: KEY, object },
            ]
        );
        assert_eq!(controller.num_active(&KEY), 0);
        assert_eq!(controller.num_idle(&KEY), 0);
    }

    #[test]
    fn test_return_without_loan_is_rejected() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_max_active_per_key(1),
        );

        let object = controller.borrow(&"a").unwrap();
        assert_eq!(controller.give_back(&"b", object), Err(PoolError::NotBorrowed));
        assert_eq!(factory.destroyed(), vec![object]);
        assert_eq!((controller.num_active(&"a"), controller.num_idle(&"a")), (1, 0));
        assert_eq!((controller.num_active(&"b"), controller.num_idle(&"b")), (0, 0));

        // "b" never sees the object created for "a"
        let fresh = controller.borrow(&"b").unwrap();
        assert_ne!(fresh, object);
        controller.give_back(&"b", fresh).unwrap();
        assert_eq!(controller.give_back(&"b", fresh), Err(PoolError::NotBorrowed));
        assert_eq!(controller.num_idle(&"b"), 1);
    }

    #[test]
    fn test_vacant_keys_are_forgotten() {
        let factory = RecordingFactory::new();
        let controller =
            LifecycleController::new(factory.clone(), KeyedPoolConfiguration::default());
        let keys: Vec<Key> = vec!["a", "b", "c", "d"];

        for key in &keys {
            let object = controller.borrow(key).unwrap();
            controller.give_back(key, object).unwrap();
        }
        assert_eq!(controller.metrics().keys, 4);

        let held = controller.borrow(&"a").unwrap();
        controller.clear_all();
        assert_eq!(controller.metrics().keys, 1);

        controller.invalidate(&"a", held).unwrap();
        assert_eq!(controller.metrics().keys, 0);

        factory.set_create_fail(true);
        assert!(controller.borrow(&"e").is_err());
        assert_eq!(controller.metrics().keys, 0);
    }

    #[test]
    fn test_max_idle_destroys_surplus_returns() {
        let factory = RecordingFactory::new();
        let controller = LifecycleController::new(
            factory.clone(),
            KeyedPoolConfiguration::new().with_max_idle_per_key(1),
        );

        let a = controller.borrow(&KEY).unwrap();
        let b = controller.borrow(&KEY).unwrap();
        controller.give_back(&KEY, a).unwrap();
        controller.give_back(&KEY, b).unwrap();

        assert_eq!(controller.num_idle(&KEY), 1);
        assert_eq!(controller.num_active(&KEY), 0);
        assert_eq!(factory.destroyed(), vec![b]);
    }

    #[test]
    fn test_drop_closes_and_destroys_idle() {
        let factory = RecordingFactory::new();
        {
            let controller =
                LifecycleController::new(factory.clone(), KeyedPoolConfiguration::default());
            controller.add(&KEY).unwrap();
            controller.add(&KEY).unwrap();
        }
        let mut destroyed = factory.destroyed();
        destroyed.sort_unstable();
        assert_eq!(destroyed, vec![0, 1]);
    }
}

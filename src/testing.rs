//! Test factories that record every lifecycle call

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::factory::KeyedObjectFactory;

pub(crate) type Key = &'static str;

/// Error raised by a factory step that was switched to fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} failed")]
pub(crate) struct InjectedFailure(pub &'static str);

/// One recorded factory call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MethodCall {
    Create { key: Key, returned: Option<usize> },
    Activate { key: Key, object: usize },
    Validate { key: Key, object: usize, returned: Option<bool> },
    Passivate { key: Key, object: usize },
    Destroy { key: Key, object: usize },
}

#[derive(Debug, Default)]
struct Switches {
    create: AtomicBool,
    activate: AtomicBool,
    validate: AtomicBool,
    reject: AtomicBool,
    passivate: AtomicBool,
    destroy: AtomicBool,
}

/// Factory producing sequential integers and recording every call.
///
/// Clones share state, so a test keeps one clone to inspect and hands the other to the pool.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingFactory {
    calls: Arc<Mutex<Vec<MethodCall>>>,
    count: Arc<AtomicUsize>,
    fail: Arc<Switches>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MethodCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls without destroys, whose timing relative to other calls is unspecified.
    pub fn calls_without_destroy(&self) -> Vec<MethodCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| !matches!(call, MethodCall::Destroy { .. }))
            .cloned()
            .collect()
    }

    /// Objects passed to destroy, in call order.
    pub fn destroyed(&self) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MethodCall::Destroy { object, .. } => Some(*object),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Clear the call log, restart numbering and turn every failure off.
    pub fn reset(&self) {
        self.clear_calls();
        self.count.store(0, Ordering::SeqCst);
        self.set_create_fail(false);
        self.set_activate_fail(false);
        self.set_validate_fail(false);
        self.set_validate_reject(false);
        self.set_passivate_fail(false);
        self.set_destroy_fail(false);
    }

    pub fn set_create_fail(&self, fail: bool) {
        self.fail.create.store(fail, Ordering::SeqCst);
    }

    pub fn set_activate_fail(&self, fail: bool) {
        self.fail.activate.store(fail, Ordering::SeqCst);
    }

    pub fn set_validate_fail(&self, fail: bool) {
        self.fail.validate.store(fail, Ordering::SeqCst);
    }

    /// Make validate answer `Ok(false)` instead of raising.
    pub fn set_validate_reject(&self, reject: bool) {
        self.fail.reject.store(reject, Ordering::SeqCst);
    }

    pub fn set_passivate_fail(&self, fail: bool) {
        self.fail.passivate.store(fail, Ordering::SeqCst);
    }

    pub fn set_destroy_fail(&self, fail: bool) {
        self.fail.destroy.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: MethodCall) {
        self.calls.lock().push(call);
    }

    fn check(switch: &AtomicBool, step: &'static str) -> Result<(), InjectedFailure> {
        if switch.load(Ordering::SeqCst) {
            Err(InjectedFailure(step))
        } else {
            Ok(())
        }
    }
}

impl KeyedObjectFactory<Key> for RecordingFactory {
    type Object = usize;
    type Error = InjectedFailure;

    fn create(&self, key: &Key) -> Result<usize, InjectedFailure> {
        let object = self.count.fetch_add(1, Ordering::SeqCst);
        let failed = Self::check(&self.fail.create, "create");
        self.record(MethodCall::Create {
            key: *key,
            returned: failed.is_ok().then_some(object),
        });
        failed.map(|()| object)
    }

    fn activate(&self, key: &Key, object: &mut usize) -> Result<(), InjectedFailure> {
        self.record(MethodCall::Activate { key: *key, object: *object });
        Self::check(&self.fail.activate, "activate")
    }

    fn validate(&self, key: &Key, object: &usize) -> Result<bool, InjectedFailure> {
        let verdict = Self::check(&self.fail.validate, "validate")
            .map(|()| !self.fail.reject.load(Ordering::SeqCst));
        self.record(MethodCall::Validate {
            key: *key,
            object: *object,
            returned: verdict.as_ref().ok().copied(),
        });
        verdict
    }

    fn passivate(&self, key: &Key, object: &mut usize) -> Result<(), InjectedFailure> {
        self.record(MethodCall::Passivate { key: *key, object: *object });
        Self::check(&self.fail.passivate, "passivate")
    }

    fn destroy(&self, key: &Key, object: usize) -> Result<(), InjectedFailure> {
        self.record(MethodCall::Destroy { key: *key, object });
        Self::check(&self.fail.destroy, "destroy")
    }
}

/// Factory numbering objects per key: the nth object for key `k` is `"k:n"`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SequenceFactory {
    counters: Arc<Mutex<HashMap<Key, usize>>>,
}

impl SequenceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nth(key: Key, n: usize) -> String {
        format!("{key}:{n}")
    }
}

impl KeyedObjectFactory<Key> for SequenceFactory {
    type Object = String;
    type Error = std::convert::Infallible;

    fn create(&self, key: &Key) -> Result<String, Self::Error> {
        let mut counters = self.counters.lock();
        let n = counters.entry(*key).or_insert(0);
        let object = Self::nth(*key, *n);
        *n += 1;
        Ok(object)
    }
}

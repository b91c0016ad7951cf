//! Resource factory abstraction

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

/// Identity of a sub-pool.
///
/// Blanket-implemented for every type with the required bounds, so `String`,
/// `&'static str`, integers and tuples of those all work as keys.
pub trait PoolKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<K> PoolKey for K where K: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Creates, prepares and disposes of pooled objects for a key.
///
/// Only `create` is required. The pool calls each method at most once per
/// lifecycle transition and never while holding one of its locks, so
/// implementations are free to block on I/O.
///
/// # Examples
///
/// ```
/// use keyed_objectpool::KeyedObjectFactory;
/// use std::convert::Infallible;
///
/// struct Buffers;
///
/// impl KeyedObjectFactory<usize> for Buffers {
///     type Object = Vec<u8>;
///     type Error = Infallible;
///
///     fn create(&self, size: &usize) -> Result<Vec<u8>, Infallible> {
///         Ok(Vec::with_capacity(*size))
///     }
///
///     fn passivate(&self, _size: &usize, buf: &mut Vec<u8>) -> Result<(), Infallible> {
///         buf.clear();
///         Ok(())
///     }
/// }
/// ```
pub trait KeyedObjectFactory<K>: Send + Sync + 'static {
    /// The pooled object type.
    type Object: Send + 'static;

    /// Error raised by any factory operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new object for `key`.
    fn create(&self, key: &K) -> Result<Self::Object, Self::Error>;

    /// Prepare an object before it is handed to a borrower.
    fn activate(&self, _key: &K, _object: &mut Self::Object) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Check whether an object is still usable. Both `Ok(false)` and `Err`
    /// mark the object as unusable.
    fn validate(&self, _key: &K, _object: &Self::Object) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Reset an object before it goes back to the idle set.
    fn passivate(&self, _key: &K, _object: &mut Self::Object) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Permanently dispose of an object. The pool never touches the object
    /// again, whatever the outcome.
    fn destroy(&self, _key: &K, object: Self::Object) -> Result<(), Self::Error> {
        drop(object);
        Ok(())
    }
}

/// Factory built from a single create closure.
///
/// All other lifecycle steps use the trait defaults.
///
/// # Examples
///
/// ```
/// use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
/// use std::convert::Infallible;
///
/// let factory = FnFactory::new(|key: &&'static str| Ok::<_, Infallible>(format!("conn:{key}")));
/// let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());
///
/// let conn = pool.borrow_object(&"db").unwrap();
/// assert_eq!(conn, "conn:db");
/// ```
pub struct FnFactory<C, T, E> {
    create: C,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<C, T, E> FnFactory<C, T, E> {
    pub fn new(create: C) -> Self {
        Self {
            create,
            _marker: PhantomData,
        }
    }
}

impl<K, C, T, E> KeyedObjectFactory<K> for FnFactory<C, T, E>
where
    C: Fn(&K) -> Result<T, E> + Send + Sync + 'static,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Object = T;
    type Error = E;

    fn create(&self, key: &K) -> Result<T, E> {
        (self.create)(key)
    }
}

//! Basic usage examples for KeyedObjectPool

use keyed_objectpool::{FnFactory, KeyedObjectFactory, KeyedObjectPool, KeyedPoolConfiguration};
use std::convert::Infallible;
use thiserror::Error;

fn main() {
    println!("=== Keyed Object Pool - Basic Examples ===\n");

    // Example 1: Closure factory
    simple_pool();

    // Example 2: Full lifecycle factory
    lifecycle_factory();

    // Example 3: LIFO vs FIFO
    selection_policies();

    // Example 4: Metrics
    metrics();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let factory =
        FnFactory::new(|host: &&'static str| Ok::<_, Infallible>(format!("session@{host}")));
    let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());

    {
        let obj = pool.get_object(&"eu-west").unwrap();
        println!("   Got object: {}", *obj);
        // Object automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.num_idle_for(&"eu-west"));
}

#[derive(Error, Debug)]
#[error("cannot connect to {0:?}")]
struct ConnectError(String);

struct Connection {
    host: String,
    requests: u32,
}

struct ConnectionFactory;

impl KeyedObjectFactory<String> for ConnectionFactory {
    type Object = Connection;
    type Error = ConnectError;

    fn create(&self, host: &String) -> Result<Connection, ConnectError> {
        if host.is_empty() {
            return Err(ConnectError(host.clone()));
        }
        Ok(Connection { host: host.clone(), requests: 0 })
    }

    fn validate(&self, _host: &String, conn: &Connection) -> Result<bool, ConnectError> {
        Ok(conn.requests < 3)
    }

    fn passivate(&self, _host: &String, conn: &mut Connection) -> Result<(), ConnectError> {
        conn.requests += 1;
        Ok(())
    }

    fn destroy(&self, _host: &String, conn: Connection) -> Result<(), ConnectError> {
        println!("   Closing connection to {} after {} requests", conn.host, conn.requests);
        Ok(())
    }
}

fn lifecycle_factory() {
    println!("2. Lifecycle Factory:");
    let config = KeyedPoolConfiguration::new().with_test_on_borrow();
    let pool = KeyedObjectPool::new(ConnectionFactory, config);
    let host = "db-1".to_string();

    for _ in 0..4 {
        let conn = pool.borrow_object(&host).unwrap();
        println!("   Borrowed {} (used {} times)", conn.host, conn.requests);
        pool.return_object(&host, conn).unwrap();
    }

    match pool.borrow_object(&String::new()) {
        Ok(_) => println!("   Unexpected connection"),
        Err(e) => println!("   Error: {}", e),
    }

    pool.close();
    println!();
}

fn selection_policies() {
    println!("3. Selection Policies:");
    for config in [
        KeyedPoolConfiguration::new().with_lifo(),
        KeyedPoolConfiguration::new().with_fifo(),
    ] {
        let selection = config.selection;
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let factory = FnFactory::new(move |_: &u8| {
            Ok::<_, Infallible>(counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
        });
        let pool = KeyedObjectPool::new(factory, config);

        let first = pool.borrow_object(&0).unwrap();
        let second = pool.borrow_object(&0).unwrap();
        pool.return_object(&0, first).unwrap();
        pool.return_object(&0, second).unwrap();

        println!("   {:?} hands out object {} next", selection, pool.borrow_object(&0).unwrap());
    }
    println!();
}

fn metrics() {
    println!("4. Metrics:");
    let factory = FnFactory::new(|key: &u32| Ok::<_, Infallible>(*key));
    let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());

    pool.prefill(&1, 2).unwrap();
    {
        let _a = pool.get_object(&1).unwrap();
        let _b = pool.get_object(&2).unwrap();
        println!("   Active: {}, Idle: {}", pool.num_active(), pool.num_idle());
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}

//! Async usage examples

use keyed_objectpool::{KeyedObjectFactory, KeyedObjectPool, KeyedPoolConfiguration};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::sleep;

struct SessionFactory;

// Owned keys keep the pool usable from spawned tasks.
impl KeyedObjectFactory<String> for SessionFactory {
    type Object = String;
    type Error = Infallible;

    fn create(&self, region: &String) -> Result<String, Infallible> {
        Ok(format!("session@{region}"))
    }
}

fn pool(config: KeyedPoolConfiguration) -> KeyedObjectPool<String, SessionFactory> {
    KeyedObjectPool::new(SessionFactory, config)
}

#[tokio::main]
async fn main() {
    println!("=== Keyed Object Pool - Async Examples ===\n");

    // Example 1: Async get
    async_get().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Concurrent access
    concurrent_access().await;
}

async fn async_get() {
    println!("1. Async Get:");
    let pool = pool(KeyedPoolConfiguration::default());

    {
        let obj = pool.get_object_async(&"eu-west".to_string()).await.unwrap();
        println!("   Got object asynchronously: {}", *obj);
    }

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");

    let config = KeyedPoolConfiguration::new()
        .with_max_active_per_key(1)
        .with_timeout(Duration::from_millis(100));
    let pool = pool(config);
    let region = "eu-west".to_string();

    // Take the only allowed object
    let _obj = pool.get_object(&region).unwrap();

    // Try to get another (should timeout)
    match pool.get_object_async(&region).await {
        Ok(_) => println!("   Got object"),
        Err(e) => println!("   Error: {}", e),
    }

    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");

    let config = KeyedPoolConfiguration::new().with_max_active_per_key(2);
    let pool = pool(config);

    let mut handles = vec![];
    for i in 0..5 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let key = String::from(if i % 2 == 0 { "eu-west" } else { "us-east" });
            let obj = pool.get_object_async(&key).await.unwrap();
            println!("   Task {} got {}", i, *obj);
            sleep(Duration::from_millis(50)).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Idle objects: {}", pool.num_idle());
}

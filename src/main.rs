// Keyed Object Pool
// Thread-safe keyed object pool with a pluggable lifecycle factory

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic

use keyed_objectpool::{FnFactory, KeyedObjectPool, KeyedPoolConfiguration};
use std::convert::Infallible;

fn main() {
    println!("=== Keyed Object Pool v1.0.0 ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let factory = FnFactory::new(|key: &&'static str| Ok::<_, Infallible>(format!("{key}-object")));
    let pool = KeyedObjectPool::new(factory, KeyedPoolConfiguration::default());

    {
        let obj = pool.get_object(&"alpha").unwrap();
        println!("  Got object: {}", *obj);
    }

    println!("  Idle after return: {}", pool.num_idle_for(&"alpha"));
}

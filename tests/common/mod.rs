#![allow(dead_code)]

use memocache::Serialization;
use tracing_subscriber::EnvFilter;

/// Both coordinator flavours; cache tests run against each of them.
pub const STRATEGIES: [Serialization; 2] = [Serialization::Lock, Serialization::Actor];

/// Routes logs of this crate to the test writer, so they are captured per test.
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("memocache=trace"))
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}

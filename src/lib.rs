//! Load generation for object-storage services: an object pool that tracks
//! which objects exist and persists them across runs, and schedulers that
//! pace requests by concurrency or by rate.

pub mod config;
pub mod metrics;
pub mod output;
pub mod pacer;
pub mod pool;
pub mod record;
pub mod tool;
pub mod workload;

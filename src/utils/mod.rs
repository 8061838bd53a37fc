// src/utils/mod.rs
pub mod cache;
pub mod clock;
pub mod crypto;
pub mod locks;
pub mod serialization;
pub mod worker_pool;

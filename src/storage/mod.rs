// src/storage/mod.rs
pub mod did_store;

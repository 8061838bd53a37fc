// src/models/mod.rs
pub mod access;
pub mod credential;
pub mod did;
pub mod proof;

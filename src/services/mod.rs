// src/services/mod.rs
pub mod credential_issuer;
pub mod did_registry;
pub mod gateway;
pub mod verifier;

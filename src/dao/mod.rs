/// Storage contract and its backends.
pub mod encounter_store;
/// Persisted record shapes.
pub mod models;
/// Backend-agnostic storage errors.
pub mod storage;

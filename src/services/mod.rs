/// Single-writer encounter actor and its timers.
pub mod coordinator;
/// OpenAPI documentation generation.
pub mod documentation;
/// Read-only encounter and profile projections.
pub mod encounter_service;
/// Health check service.
pub mod health_service;
/// Debounced and periodic encounter snapshots.
pub mod persistence;
/// Lazy profile loading and dirty-profile flushing.
pub mod player_service;
/// Kill rewards, grant claims and chest opening.
pub mod reward_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;

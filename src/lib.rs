//! # flowgate
//!
//! Connection-lifecycle and fleet-coordination core for a real-time gateway:
//! the authoritative registry of connected clients, the heartbeat sweep that
//! supervises their liveness and token freshness, and the best-effort
//! snapshot exchange that gives every instance an access-controlled view of
//! "who is connected, anywhere".
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | Local connection registry + peer snapshot cache |
//! | `supervisor` | Self-rescheduling heartbeat sweep |
//! | `sync` | Cross-instance snapshot publish/merge over the bus |
//! | `query` | Access-controlled "who is connected" surface |
//! | `ratelimit` | Fixed-window point-budget limiters |
//! | `telemetry` | Prometheus recorder + pull collectors |
//! | `auth` / `storage` | Collaborator seams (tokens, authorization, persistence) |
//!
//! Transports, the authorization policy model, and the bus implementation
//! live outside this crate and plug in through the trait seams.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod query;
pub mod ratelimit;
pub mod registry;
pub mod storage;
pub mod supervisor;
pub mod sync;
pub mod telemetry;

pub use auth::{Authorizer, JwtVerifier, Requester, TokenClaims, TokenVerifier};
pub use config::{GatewayConfig, RateLimitConfig};
pub use connection::{BoundUser, ConnectionEntry, Transport};
pub use error::{GatewayError, Result};
pub use query::{ClientQuery, VisibleClient};
pub use ratelimit::{RateLimiter, RateLimiterPair};
pub use registry::{ConnectionRegistry, RemoteRegistry, RemoteSnapshot};
pub use storage::{LastSeenUpdate, Storage};
pub use supervisor::HeartbeatSupervisor;
pub use sync::{DistributedSync, MessageBus, SyncMessage, SYNC_TOPIC};
pub use telemetry::TelemetryAdapter;

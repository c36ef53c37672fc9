//! HTTP and `WebSocket` gateway for Tickwatch.
//!
//! This crate puts an Axum server in front of the dispatch engine:
//!
//! - **REST endpoints** (`/api/{endpoint}` and bare `/{endpoint}`) that
//!   resolve a name, a group, or the "all" alias through
//!   [`RequestRouter`](tickwatch_dispatch::RequestRouter)
//! - **`WebSocket` endpoint** (`/ws`) where clients subscribe to endpoint
//!   names and receive their payloads every publish cycle
//! - **Static files** from `web_root` for anything that is not an endpoint
//!
//! # Architecture
//!
//! Handlers never touch owner-thread state directly. Inline endpoints run
//! on the serving task; owner-affine endpoints are marshaled through the
//! [`OwnerThreadBridge`](tickwatch_dispatch::OwnerThreadBridge) with a
//! bounded wait, so a stalled tick loop turns into `504`s instead of hung
//! connections.

pub mod config;
pub mod error;
pub mod handlers;
pub mod publisher;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use config::GatewayConfig;
pub use error::{GatewayError, NOT_FOUND_MESSAGE};
pub use router::build_router;
pub use server::ServerError;
pub use startup::{GatewayHandle, StartupError, spawn_gateway};
pub use state::AppState;

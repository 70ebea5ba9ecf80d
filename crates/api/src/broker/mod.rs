//! Room-based realtime message broker
//!
//! Relays chat messages between WebSocket connections grouped by room,
//! across process boundaries via a shared pub/sub layer, with durable
//! ordered persistence.
//!
//! # Architecture
//!
//! - **Connection**: an authenticated WebSocket connection bound to one room
//! - **Registry**: per-process bookkeeping of live connections per room
//! - **PubSub**: the shared pub/sub layer (redis, or in-process for
//!   single-node deployments)
//! - **Multiplexer**: bridges the pub/sub layer and local connections
//! - **Store**: durable persistence with monotonic per-room message ids
//! - **Coordinator**: drives the per-connection lifecycle and the
//!   persist-then-publish send path
//! - **Events**: wire frames exchanged with clients
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod coordinator;
pub mod events;
pub mod handler;
pub mod multiplexer;
pub mod pubsub;
pub mod registry;
pub mod store;

pub use coordinator::DeliveryCoordinator;
pub use handler::ws_handler;

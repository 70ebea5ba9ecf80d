//! Shared application state

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::auth::Authenticator;
use crate::broker::coordinator::DeliveryCoordinator;
use crate::broker::store::MessageStore;
use crate::config::Config;

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub broker: Arc<DeliveryCoordinator>,
    pub store: Arc<dyn MessageStore>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Present when the redis pub/sub backend is configured; used by the
    /// readiness probe
    pub redis: Option<ConnectionManager>,
}

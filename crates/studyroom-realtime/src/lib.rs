//! Push delivery of row inserts, scoped by `(table, room)`.
//!
//! [`Dispatcher`] is the in-process fan-out every subscription is registered
//! with. [`RealtimeClient`] feeds a dispatcher from the hosted backend's
//! websocket channel protocol.

pub mod connection;
pub mod dispatcher;
pub mod protocol;

use thiserror::Error;

use studyroom_types::SubscriptionKey;

pub use connection::RealtimeClient;
pub use dispatcher::{Dispatcher, Subscription, SubscriptionHandle};

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid realtime url: {0}")]
    InvalidUrl(String),

    #[error("realtime connection is closed")]
    Closed,
}

/// Anything that can open a push subscription for a key.
pub trait RealtimeSource: Send + Sync {
    fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription, RealtimeError>;
}

impl RealtimeSource for Dispatcher {
    fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription, RealtimeError> {
        Ok(Dispatcher::subscribe(self, key))
    }
}

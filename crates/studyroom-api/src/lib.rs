//! Outbound HTTP for the study-room client.
//!
//! [`ApiGateway`] talks to the study REST API (chat, summaries, analytics,
//! history). [`AuthClient`], [`TableClient`] and [`StorageClient`] talk to the
//! hosted backend for identity, the `rooms`/`users` tables and avatar blobs.
//! Everything the client crate consumes goes through the traits in [`ports`].

pub mod auth;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ports;
pub mod storage;
pub mod tables;

pub use auth::{AuthClient, BaasAuth};
pub use error::ApiError;
pub use gateway::ApiGateway;
pub use ports::{
    AnalyticsApi, AuthBackend, AvatarStorage, ChatApi, HistoryApi, ProfileStore, RoomStore,
    SummaryApi,
};
pub use storage::StorageClient;
pub use tables::TableClient;

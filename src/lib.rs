//! Subscription and fault-detection engine for streaming Kubernetes cluster
//! events and enriched fault notifications over long-lived push sessions.
//!
//! The engine is headless: [`manager::SubscriptionManager`] owns subscription
//! lifecycle and notification routing, but obtaining Kubernetes clients
//! ([`kube_client::ClientGetter`]) and delivering pushes to a live session
//! ([`session::SessionRegistry`]) are capabilities the embedder injects.
//! [`tool_api`] exposes the three operations an outer RPC layer calls on
//! behalf of remote clients.

pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod faults;
pub mod filter;
pub mod kube_client;
pub mod manager;
pub mod session;
pub mod tool_api;
pub mod watcher;

pub use config::EngineConfig;
pub use error::{EnrichmentError, ManagerError, ManagerResult, WatcherError, WatcherResult};
pub use manager::{ManagerStats, Subscription, SubscriptionManager, SubscriptionSummary};

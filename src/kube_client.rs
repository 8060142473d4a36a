//! Cluster client lookup capability (§9 design notes, Non-goals).
//!
//! Obtaining a `kube::Client` for a given cluster id — kubeconfig selection,
//! in-cluster auth, credential refresh — is explicitly out of scope. The
//! manager is handed a [`ClientGetter`] implementation instead of
//! constructing clients itself.

use async_trait::async_trait;

/// Errors resolving a cluster id to a usable client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unknown cluster {0}")]
    UnknownCluster(String),
    #[error("failed to obtain client for cluster {cluster}: {source}")]
    Unavailable {
        cluster: String,
        #[source]
        source: kube::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

#[async_trait]
pub trait ClientGetter: Send + Sync {
    async fn get(&self, cluster: &str) -> ClientResult<kube::Client>;
}

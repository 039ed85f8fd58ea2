//! TTL cache of the cluster's namespace names
//!
//! Namespace entitlements are enumerated for every cluster role, so the
//! full namespace list is fetched once per TTL instead of per resource.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster_reader::ClusterReader;
use crate::Result;

struct Cached {
    names: Arc<Vec<String>>,
    /// `None` when the TTL reaches past what an `Instant` can hold
    expires_at: Option<Instant>,
}

/// Namespace names, fetched across all pages and cached behind a TTL
pub struct NamespaceCache {
    reader: Arc<dyn ClusterReader>,
    ttl: Duration,
    state: Mutex<Option<Cached>>,
}

impl NamespaceCache {
    /// Create an empty cache over `reader`
    pub fn new(reader: Arc<dyn ClusterReader>, ttl: Duration) -> Self {
        Self {
            reader,
            ttl,
            state: Mutex::new(None),
        }
    }

    /// Current namespace names, refetching if the cached list expired
    ///
    /// A failed fetch leaves the previous list cached but returns the error.
    pub async fn names(&self) -> Result<Arc<Vec<String>>> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if cached.expires_at.map_or(true, |at| Instant::now() < at) {
                return Ok(cached.names.clone());
            }
        }

        let names = Arc::new(self.fetch_all().await?);
        debug!(namespaces = names.len(), "refreshed namespace list");
        *state = Some(Cached {
            names: names.clone(),
            expires_at: Instant::now().checked_add(self.ttl),
        });
        Ok(names)
    }

    async fn fetch_all(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token = None;
        loop {
            let page = self.reader.list_namespaces(token).await?;
            for ns in page.items {
                match ns.metadata.name {
                    Some(name) => names.push(name),
                    None => warn!("skipping namespace without a name"),
                }
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(names),
            }
        }
    }
}

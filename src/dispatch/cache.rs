//! Cached light handles
//!
//! Enumeration is a network round trip, so handles are cached with a
//! TTL and refetched lazily. Only the dispatcher touches this.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::bridge::{LightBridge, LightInfo};
use crate::Result;

/// TTL cache of name → light handle
pub struct LightStateCache {
    handles: HashMap<String, LightInfo>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl LightStateCache {
    /// Create an empty cache with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            handles: HashMap::new(),
            fetched_at: None,
            ttl,
        }
    }

    fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() < self.ttl && !self.handles.is_empty())
    }

    /// Return cached handles, refreshing from the bridge when the
    /// cache is empty or stale. A refresh failure with a warm cache
    /// logs and serves the stale handles instead of failing.
    ///
    /// # Errors
    ///
    /// Returns error if a refresh is required and the bridge call
    /// fails with nothing cached to fall back on
    pub async fn get_or_refresh(
        &mut self,
        bridge: &dyn LightBridge,
    ) -> Result<&HashMap<String, LightInfo>> {
        if self.is_fresh() {
            return Ok(&self.handles);
        }

        match bridge.list_lights().await {
            Ok(handles) => {
                tracing::debug!(count = handles.len(), "refreshed light cache");
                self.handles = handles;
                self.fetched_at = Some(Instant::now());
                Ok(&self.handles)
            }
            Err(e) if !self.handles.is_empty() => {
                tracing::warn!(error = %e, "refresh failed, serving stale light cache");
                Ok(&self.handles)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the cached handles so the next lookup refetches
    pub fn invalidate(&mut self) {
        tracing::debug!("invalidated light cache");
        self.handles.clear();
        self.fetched_at = None;
    }
}

//! Read-through cache in front of the profile service

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::ProfileService;
use crate::models::ProfileSummary;

/// Batched, cached profile resolution.
///
/// Lookups only ask the service for identifiers that are not cached yet, and
/// always in a single request. Failures degrade to "not resolved".
pub struct ProfileCache {
    service: Arc<dyn ProfileService>,
    cache: Mutex<HashMap<String, ProfileSummary>>,
}

impl ProfileCache {
    pub fn new(service: Arc<dyn ProfileService>) -> Self {
        Self {
            service,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier of the signed-in user; `None` when signed out or on error
    pub async fn current_user_id(&self) -> Option<String> {
        match self.service.current_user_id().await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, "Failed to read session user");
                None
            }
        }
    }

    /// Cached profile, without touching the service
    pub fn cached(&self, user_id: &str) -> Option<ProfileSummary> {
        self.cache.lock().get(user_id).cloned()
    }

    pub fn insert(&self, profile: ProfileSummary) {
        self.cache.lock().insert(profile.user_id.clone(), profile);
    }

    /// Resolve one identifier
    pub async fn resolve(&self, user_id: &str) -> Option<ProfileSummary> {
        self.resolve_many([user_id]).await.remove(user_id)
    }

    /// Resolve a set of identifiers with at most one service call
    pub async fn resolve_many<'a, I>(&self, user_ids: I) -> HashMap<String, ProfileSummary>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: BTreeSet<&str> = user_ids.into_iter().collect();
        let mut resolved = HashMap::with_capacity(wanted.len());
        let mut missing = Vec::new();
        {
            let cache = self.cache.lock();
            for id in &wanted {
                match cache.get(*id) {
                    Some(profile) => {
                        resolved.insert(id.to_string(), profile.clone());
                    }
                    None => missing.push(id.to_string()),
                }
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        debug!(count = missing.len(), "Resolving profiles");
        match self.service.fetch_profiles(&missing).await {
            Ok(profiles) => {
                let mut cache = self.cache.lock();
                for profile in profiles {
                    if wanted.contains(profile.user_id.as_str()) {
                        resolved.insert(profile.user_id.clone(), profile.clone());
                    }
                    cache.insert(profile.user_id.clone(), profile);
                }
            }
            Err(e) => {
                warn!(error = %e, count = missing.len(), "Profile lookup failed");
            }
        }

        resolved
    }
}

//! OAuth2 bearer-token cache, scoped per integration instance (spec.md §9
//! Open Questions: the source scopes this module-globally; this resolves
//! it per-instance instead, so two integrations of the same type never
//! share or invalidate each other's cached token).

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// `(integration_id, scope) -> token`. Lock-free reads via `DashMap`; a
/// refresh simply overwrites the entry, so a losing concurrent refresh
/// just does one redundant upstream call rather than corrupting state.
#[derive(Default)]
pub struct OAuthTokenCache {
    entries: DashMap<(String, String), CachedToken>,
}

impl OAuthTokenCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Returns a cached token for `(integration_id, scope)` if present and
    /// not yet expired.
    pub fn get(&self, integration_id: &str, scope: &str) -> Option<String> {
        let key = (integration_id.to_string(), scope.to_string());
        let entry = self.entries.get(&key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, integration_id: &str, scope: &str, value: String, expires_at: DateTime<Utc>) {
        self.entries
            .insert((integration_id.to_string(), scope.to_string()), CachedToken { value, expires_at });
    }

    pub fn invalidate(&self, integration_id: &str, scope: &str) {
        self.entries.remove(&(integration_id.to_string(), scope.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn caches_and_returns_an_unexpired_token() {
        let cache = OAuthTokenCache::new();
        cache.put("int-1", "default", "token-a".into(), Utc::now() + Duration::minutes(5));
        assert_eq!(cache.get("int-1", "default"), Some("token-a".to_string()));
    }

    #[test]
    fn an_expired_token_is_not_returned() {
        let cache = OAuthTokenCache::new();
        cache.put("int-1", "default", "token-a".into(), Utc::now() - Duration::seconds(1));
        assert_eq!(cache.get("int-1", "default"), None);
    }

    #[test]
    fn two_integration_instances_never_share_a_cache_entry() {
        let cache = OAuthTokenCache::new();
        cache.put("int-1", "default", "token-a".into(), Utc::now() + Duration::minutes(5));
        assert_eq!(cache.get("int-2", "default"), None);
    }
}

//! Integration pack registry and probe execution (spec.md §4.E, §4.F
//! partly, §6, §9).

pub mod builtin;
pub mod executor;
pub mod http;
pub mod oauth;
pub mod pack;

pub use executor::{IntegrationExecutor, PackRegistry, ProbeOutcome};
pub use http::{HttpFetch, HttpResponse, ReqwestFetch};
pub use oauth::OAuthTokenCache;
pub use pack::{DecryptedCredentials, IntegrationConfig, IntegrationPack, PackError, PackManifest, ProbeHandler};

/// Builds the registry shipped by default: the generic HTTP-probe pack.
/// Real per-vendor packs register here too, once written.
pub fn default_registry() -> PackRegistry {
    let mut registry = PackRegistry::new();
    registry.register(Box::new(builtin::HttpProbePack::new()));
    registry
}

//! A generic HTTP-probe integration type: the one pack shipped here,
//! serving both as the registry's proof that the trait contract is
//! exercised end to end and as a template for a real third-party pack
//! (spec.md §9: per-vendor packs are out of scope).

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::http::HttpFetch;
use crate::pack::{DecryptedCredentials, IntegrationConfig, IntegrationPack, PackError, PackManifest, ProbeHandler};

const PACK_TYPE: &str = "http-probe";

struct CheckHandler;

impl ProbeHandler for CheckHandler {
    fn call(
        &self,
        params: Value,
        config: &IntegrationConfig,
        credentials: &DecryptedCredentials,
        fetch: &dyn HttpFetch,
    ) -> Result<Value, PackError> {
        let base_url = config.field_str("base_url")?;
        let path = params.get("path").and_then(Value::as_str).unwrap_or("/");
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);

        let mut headers = Vec::new();
        if let Ok(token) = credentials.get("api_key") {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        let response = fetch.request("GET", &url, &headers, None)?;
        Ok(json!({
            "status_code": response.status,
            "ok": response.is_success(),
            "body": response.text(),
        }))
    }
}

/// `http-probe`'s `test_connection` reuses the `check` handler against
/// `/` with no params, treating any 2xx response as reachable.
pub struct HttpProbePack {
    manifest: PackManifest,
    handlers: HashMap<String, Box<dyn ProbeHandler>>,
}

impl HttpProbePack {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Box<dyn ProbeHandler>> = HashMap::new();
        handlers.insert("check".to_string(), Box::new(CheckHandler));
        Self {
            manifest: PackManifest {
                type_: PACK_TYPE.to_string(),
                display_name: "Generic HTTP Probe".to_string(),
                probes: vec!["check".to_string()],
            },
            handlers,
        }
    }
}

impl Default for HttpProbePack {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationPack for HttpProbePack {
    fn manifest(&self) -> &PackManifest {
        &self.manifest
    }

    fn handlers(&self) -> &HashMap<String, Box<dyn ProbeHandler>> {
        &self.handlers
    }

    fn test_connection(&self, config: &IntegrationConfig, fetch: &dyn HttpFetch) -> Result<bool, PackError> {
        let handler = CheckHandler;
        let response = handler.call(json!({"path": "/"}), config, &DecryptedCredentials::default(), fetch)?;
        Ok(response.get("ok").and_then(Value::as_bool).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeFetch;
    use crate::http::HttpResponse;

    fn config(base_url: &str) -> IntegrationConfig {
        IntegrationConfig {
            integration_id: "int-1".into(),
            integration_type: PACK_TYPE.into(),
            config: json!({"base_url": base_url}),
        }
    }

    #[test]
    fn check_handler_calls_the_configured_base_url_with_the_given_path() {
        let pack = HttpProbePack::new();
        let fetch = FakeFetch::new(vec![Ok(HttpResponse { status: 200, body: b"pong".to_vec() })]);
        let handler = pack.handlers().get("check").unwrap();
        let result = handler
            .call(json!({"path": "/health"}), &config("https://svc.example"), &DecryptedCredentials::default(), &fetch)
            .unwrap();
        assert_eq!(result["status_code"], 200);
        assert_eq!(result["ok"], true);
        assert_eq!(fetch.requests.lock().unwrap()[0].1, "https://svc.example/health");
    }

    #[test]
    fn test_connection_reports_false_on_a_non_2xx_status() {
        let pack = HttpProbePack::new();
        let fetch = FakeFetch::new(vec![Ok(HttpResponse { status: 503, body: Vec::new() })]);
        let ok = pack.test_connection(&config("https://svc.example"), &fetch).unwrap();
        assert!(!ok);
    }

    #[test]
    fn missing_base_url_is_an_invalid_config_error() {
        let pack = HttpProbePack::new();
        let fetch = FakeFetch::new(vec![]);
        let handler = pack.handlers().get("check").unwrap();
        let bad_config = IntegrationConfig {
            integration_id: "int-1".into(),
            integration_type: PACK_TYPE.into(),
            config: json!({}),
        };
        let err = handler.call(json!({}), &bad_config, &DecryptedCredentials::default(), &fetch).unwrap_err();
        assert!(matches!(err, PackError::InvalidConfig(_)));
    }
}

//! Outbound HTTP, injected so packs and their tests never touch the
//! network directly (spec.md §9).

use std::time::Duration;

use crate::pack::PackError;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpFetch: Send + Sync {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, PackError>;
}

/// Production `HttpFetch` backed by a blocking `reqwest` client, matching
/// the teacher gateway's choice of `reqwest::blocking` for outbound calls
/// made from synchronous handler code. The executor owns the timeout and
/// redirect policy; packs never configure the transport themselves.
pub struct ReqwestFetch {
    client: reqwest::blocking::Client,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration) -> Result<Self, PackError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| PackError::Upstream(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetch {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, PackError> {
        let method = method
            .parse::<reqwest::Method>()
            .map_err(|e| PackError::InvalidConfig(format!("invalid http method '{method}': {e}")))?;
        let mut request = self.client.request(method, url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request
            .send()
            .map_err(|e| PackError::Upstream(format!("request to '{url}' failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| PackError::Upstream(format!("failed to read response body: {e}")))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// A scripted fetch used by pack tests: returns queued responses in
    /// order and records every request made.
    pub struct FakeFetch {
        responses: Mutex<Vec<Result<HttpResponse, String>>>,
        pub requests: Mutex<Vec<(String, String)>>,
    }

    impl FakeFetch {
        pub fn new(responses: Vec<Result<HttpResponse, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpFetch for FakeFetch {
        fn request(
            &self,
            method: &str,
            url: &str,
            _headers: &[(String, String)],
            _body: Option<Vec<u8>>,
        ) -> Result<HttpResponse, PackError> {
            self.requests.lock().unwrap().push((method.to_string(), url.to_string()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(PackError::Upstream("fake fetch exhausted".into()));
            }
            responses.remove(0).map_err(PackError::Upstream)
        }
    }
}

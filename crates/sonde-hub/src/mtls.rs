//! mTLS listener setup: a `rustls::ServerConfig` requiring a client
//! certificate rooted at the hub's own CA, plus an `axum-server` acceptor
//! wrapper that threads the verified peer certificate through to the
//! WebSocket handler (spec.md §4.D "registered only once the client
//! certificate's CN has been matched").
//!
//! `axum_server::tls_rustls::RustlsConfig::from_pem_file` (the teacher's
//! `load_rustls` helper) only builds a server-auth config, so the hub
//! builds its own `rustls::ServerConfig` here with a client verifier
//! instead, the way `ioi-foundation-ioi-network`'s validator guardian
//! builds its `tokio_rustls::rustls::ServerConfig` directly rather than
//! going through a higher-level TLS helper.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::connect_info::Connected;
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pemfile::Item;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Builds a `rustls::ServerConfig` that terminates TLS with `cert_pem`/`key_pem`
/// and requires every client to present a certificate signed by `client_ca_pem`.
pub fn build_server_config(cert_pem: &str, key_pem: &str, client_ca_pem: &str) -> Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse server certificate PEM")?;

    let key = match rustls_pemfile::read_one(&mut Cursor::new(key_pem.as_bytes()))
        .context("failed to parse server key PEM")?
    {
        Some(Item::Pkcs8Key(key)) => key.into(),
        Some(Item::Pkcs1Key(key)) => key.into(),
        Some(Item::Sec1Key(key)) => key.into(),
        _ => return Err(anyhow!("server key PEM contained no recognised private key")),
    };

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut Cursor::new(client_ca_pem.as_bytes())) {
        roots.add(cert.context("failed to parse client CA certificate")?)?;
    }
    // Unauthenticated connections are allowed through at the TLS layer so
    // plain health checks still work; `/v1/agents/connect` is the one route
    // that rejects a missing or mismatched client certificate itself.
    let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .allow_unauthenticated()
        .build()
        .context("failed to build mTLS client verifier")?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)
        .context("failed to build TLS server config")?;

    Ok(config)
}

pub fn rustls_config_from(server_config: ServerConfig) -> RustlsConfig {
    RustlsConfig::from_config(Arc::new(server_config))
}

/// The verified peer certificate's common name, extracted once at accept
/// time and carried alongside the connection for the WebSocket upgrade
/// handler to read via `ConnectInfo`.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    pub common_name: Option<String>,
}

impl PeerIdentity {
    fn from_der(der: &[u8]) -> Option<String> {
        let (_, cert) = X509Certificate::from_der(der).ok()?;
        cert.subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(|s| s.to_string())
    }
}

impl<I> Connected<&TlsStream<I>> for PeerIdentity {
    fn connect_info(stream: &TlsStream<I>) -> Self {
        let (_, session) = stream.get_ref();
        let common_name = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(|cert| PeerIdentity::from_der(cert.as_ref()));
        PeerIdentity { common_name }
    }
}

/// Wraps `axum-server`'s stock rustls acceptor so every accepted stream's
/// `axum::extract::ConnectInfo<PeerIdentity>` is populated from the peer's
/// mTLS certificate, not just its socket address.
#[derive(Clone)]
pub struct MtlsAcceptor {
    inner: RustlsAcceptor,
}

impl MtlsAcceptor {
    pub fn new(config: RustlsConfig) -> Self {
        Self { inner: RustlsAcceptor::new(config) }
    }
}

impl<I, S> Accept<I, S> for MtlsAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = S;
    type Future = BoxFuture<'static, std::io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let accept = self.inner.accept(stream, service);
        Box::pin(accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_identity_without_certificates_has_no_common_name() {
        let identity = PeerIdentity::default();
        assert!(identity.common_name.is_none());
    }
}

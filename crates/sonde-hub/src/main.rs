//! Sonde Hub binary: wires every crate together behind one mTLS-terminated
//! listener (spec.md §12).

mod cli;
mod http;
mod mtls;
mod shutdown;
mod signer;
mod state;
mod ws;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sonde_audit::AuditLedger;
use sonde_crypto::SecretCipher;
use sonde_dispatcher::Dispatcher;
use sonde_enrollment::{bootstrap_ca, EnrollmentService};
use sonde_integrations::{IntegrationExecutor, ReqwestFetch};
use sonde_observability::{self as observability, LogFormat, TracingConfig};
use sonde_router::ProbeRouter;
use sonde_runbook::{default_definitions, RouterContext, RunbookEngine};
use sonde_store::Store;
use sonde_trending::TrendingStore;
use tracing::info;

use cli::HubCli;
use mtls::PeerIdentity;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HubCli::parse();
    let config = sonde_config::load(cli.overrides()).context("failed to load hub configuration")?;

    let log_format = match cli.log_format.as_deref() {
        Some(fmt) => fmt.parse::<LogFormat>()?,
        None => config.observability.log_format.parse::<LogFormat>()?,
    };
    let tracing_config = TracingConfig {
        service_name: "sonde-hub".into(),
        log_format,
        log_level: cli.log_level.clone().unwrap_or_else(|| config.observability.log_level.clone()),
    };
    let metrics = observability::init(&tracing_config, None)?;

    let master_secret = env::var("SONDE_MASTER_SECRET").context(
        "SONDE_MASTER_SECRET must be set; it is the HKDF master secret sealing the CA key, \
         the message signer, and integration credentials at rest",
    )?;
    let hub_url = env::var("SONDE_HUB_URL").unwrap_or_else(|_| format!("wss://{}:{}", config.server.host, config.server.port));

    let store = Store::open(&config.store.db_path).with_context(|| format!("failed to open store at {}", config.store.db_path))?;

    let ca_cipher = SecretCipher::derive(master_secret.as_bytes(), b"hub-ca-key");
    let ca = bootstrap_ca(&store, &ca_cipher, "Sonde Hub Root CA")?;

    let signer_cipher = SecretCipher::derive(master_secret.as_bytes(), b"message-signer-seed");
    let message_signer = signer::bootstrap_message_signer(&store, &signer_cipher)?;

    let secret_cipher = SecretCipher::derive(master_secret.as_bytes(), b"integration-secret");

    let dispatcher = Dispatcher::new(store.clone(), message_signer);
    dispatcher.spawn_timeout_sweeper();
    dispatcher.spawn_heartbeat_monitor();

    let registry = sonde_integrations::default_registry();
    let fetch = Arc::new(ReqwestFetch::new(Duration::from_secs(30)).context("failed to build HTTP fetch client")?);
    let executor = IntegrationExecutor::new(registry, store.clone(), secret_cipher, fetch);

    let trending = TrendingStore::new(store.clone());
    trending.spawn_sweep();

    let audit = AuditLedger::new(store.clone());
    let router = Arc::new(ProbeRouter::new(dispatcher.clone(), executor, trending, audit));

    let runbook_context = RouterContext::new(router.clone(), dispatcher.clone());
    let runbook = Arc::new(RunbookEngine::new(Box::new(runbook_context), default_definitions()));

    let client_ca_pem = ca.cert_pem();
    let enrollment = Arc::new(EnrollmentService::new(store.clone(), ca, hub_url).with_agent_cert_validity_days(30));

    let app_state = AppState {
        store: store.clone(),
        dispatcher,
        router,
        runbook,
        enrollment,
        metrics,
        started_at: std::time::Instant::now(),
    };

    let app = http::build_router(app_state);
    let addr = config.server.bind_address().context("invalid server bind address")?;

    let tls = config.server.tls.as_ref().context("server.tls (cert_path, key_path) must be configured")?;
    let cert_path = tls.cert_path.as_ref().context("server.tls.cert_path is required")?;
    let key_path = tls.key_path.as_ref().context("server.tls.key_path is required")?;

    let cert_pem = tokio::fs::read_to_string(cert_path).await.context("failed to read server.tls.cert_path")?;
    let key_pem = tokio::fs::read_to_string(key_path).await.context("failed to read server.tls.key_path")?;

    // Agent client certificates are verified against the hub's own CA
    // (bootstrapped above), not an operator-supplied file: every agent
    // certificate this hub will ever see was issued by that same CA.
    let server_config = mtls::build_server_config(&cert_pem, &key_pem, &client_ca_pem)?;
    let acceptor = mtls::MtlsAcceptor::new(mtls::rustls_config_from(server_config));

    info!(?addr, "starting sonde-hub");
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    axum_server::bind(addr)
        .acceptor(acceptor)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<PeerIdentity>())
        .await
        .context("sonde-hub server exited")?;

    Ok(())
}

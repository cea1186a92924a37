//! Stdio JSON-RPC 2.0 MCP adapter (spec.md §1 "MCP callers", §11).
//!
//! Modelled directly on the teacher's `noa-mcp-server` binary: line-delimited
//! JSON over stdin/stdout, `initialize`/`list_tools`/`call_tool` methods,
//! `-32700`/`-32601`/`-32000` error codes. Where the teacher's tools shell
//! out to a workspace tool server, ours call straight into the probe router
//! and runbook engine against the hub's own store.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sonde_audit::AuditLedger;
use sonde_crypto::{MessageSigner, SecretCipher};
use sonde_dispatcher::Dispatcher;
use sonde_integrations::{IntegrationExecutor, ReqwestFetch};
use sonde_router::ProbeRouter;
use sonde_runbook::{default_definitions, RouterContext, RunbookEngine};
use sonde_store::Store;
use sonde_trending::TrendingStore;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};

const SIGNER_SETTING_KEY: &str = "message_signer_seed_enc";

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize)]
struct McpTool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Deserialize)]
struct ExecuteProbeArgs {
    probe: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    agent: Option<String>,
}

#[derive(Deserialize)]
struct RunRunbookArgs {
    category: String,
    #[serde(default)]
    params: Value,
}

/// Everything a tool call needs; built once at startup from the hub's own
/// store so the adapter observes the same agents/integrations/audit trail a
/// `sonde-hub` process would.
struct Context {
    store: Store,
    router: Arc<ProbeRouter>,
    runbook: RunbookEngine,
    dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let db_path = env::var("SONDE_DB_PATH").unwrap_or_else(|_| "sonde-hub.db".to_string());
    let store = Store::open(&db_path).with_context(|| format!("failed to open store at {db_path}"))?;
    let context = bootstrap(store)?;

    let stdin = io::BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                write_response(
                    &mut stdout,
                    &RpcResponse {
                        jsonrpc: "2.0",
                        id: None,
                        result: None,
                        error: Some(RpcError { code: -32700, message: format!("invalid request: {err}") }),
                    },
                )
                .await?;
                continue;
            }
        };

        let response = process_request(request, &context).await;
        write_response(&mut stdout, &response).await?;
    }

    Ok(())
}

fn bootstrap(store: Store) -> Result<Context> {
    let master_secret = env::var("SONDE_MASTER_SECRET").context("SONDE_MASTER_SECRET must be set")?;
    let signer_cipher = SecretCipher::derive(master_secret.as_bytes(), b"message-signer-seed");
    let secret_cipher = SecretCipher::derive(master_secret.as_bytes(), b"integration-secret");

    let signer = load_or_create_message_signer(&store, &signer_cipher)?;
    let dispatcher = Dispatcher::new(store.clone(), signer);

    let registry = sonde_integrations::default_registry();
    let fetch = Arc::new(ReqwestFetch::new(std::time::Duration::from_secs(10)).context("failed to build HTTP fetch client")?);
    let executor = IntegrationExecutor::new(registry, store.clone(), secret_cipher, fetch);

    let trending = TrendingStore::new(store.clone());
    let audit = AuditLedger::new(store.clone());
    let router = Arc::new(ProbeRouter::new(dispatcher.clone(), executor, trending, audit));

    let runbook_context = RouterContext::new(router.clone(), dispatcher.clone());
    let runbook = RunbookEngine::new(Box::new(runbook_context), default_definitions());

    Ok(Context { store, router, runbook, dispatcher })
}

/// Loads the hub's message-signing key, sealed in `hub_settings` under
/// [`SIGNER_SETTING_KEY`] by `sonde-hub` at bootstrap. This adapter never
/// mints a signer of its own: a mismatched key here would make every
/// outbound dispatcher frame unverifiable by already-enrolled agents.
fn load_or_create_message_signer(store: &Store, cipher: &SecretCipher) -> Result<MessageSigner> {
    match store.get_hub_setting(SIGNER_SETTING_KEY)? {
        Some(sealed) => {
            let seed = cipher.open(&sealed).context("failed to decrypt message signer seed")?;
            let seed: [u8; 32] = seed.try_into().map_err(|_| anyhow::anyhow!("message signer seed is not 32 bytes"))?;
            Ok(MessageSigner::from_bytes(&seed))
        }
        None => bail!("no message signer persisted yet; start sonde-hub at least once first"),
    }
}

async fn write_response(stdout: &mut io::Stdout, response: &RpcResponse) -> Result<()> {
    let encoded = serde_json::to_string(response)?;
    stdout.write_all(encoded.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn process_request(request: RpcRequest, context: &Context) -> RpcResponse {
    let id = request.id.clone();
    match handle_request(request, context).await {
        Ok(value) => RpcResponse { jsonrpc: "2.0", id, result: Some(value), error: None },
        Err(err) => RpcResponse { jsonrpc: "2.0", id, result: None, error: Some(RpcError { code: -32000, message: err.to_string() }) },
    }
}

async fn handle_request(request: RpcRequest, context: &Context) -> Result<Value> {
    match request.method.as_str() {
        "initialize" => {
            let instructions = context.store.get_hub_setting("mcp_instructions")?;
            let mut body = json!({
                "protocolVersion": "1.0",
                "serverName": "sonde-mcp",
                "serverVersion": env!("CARGO_PKG_VERSION"),
            });
            if let Some(instructions) = instructions {
                body["instructions"] = Value::String(instructions);
            }
            Ok(body)
        }
        "list_tools" => Ok(json!({ "tools": tool_registry() })),
        "call_tool" => {
            let params: CallToolParams =
                serde_json::from_value(request.params).context("call_tool params must be an object")?;
            execute_tool(params, context).await
        }
        other => bail!("unsupported method '{other}' (-32601)"),
    }
}

async fn execute_tool(params: CallToolParams, context: &Context) -> Result<Value> {
    match params.name.as_str() {
        "sonde.execute_probe" => {
            let args: ExecuteProbeArgs =
                serde_json::from_value(params.arguments).context("execute_probe arguments missing")?;
            let response = context.router.execute(&args.probe, args.params, args.agent.as_deref()).await;
            Ok(serde_json::to_value(response_to_json(response))?)
        }
        "sonde.run_runbook" => {
            let args: RunRunbookArgs =
                serde_json::from_value(params.arguments).context("run_runbook arguments missing")?;
            let result = context.runbook.run(&args.category, args.params).await?;
            Ok(serde_json::to_value(result)?)
        }
        "sonde.list_agents" => {
            let agents = context.store.list_agents()?;
            let online: std::collections::HashSet<_> = context.dispatcher.list_online_agents().into_iter().collect();
            let rows: Vec<Value> = agents
                .into_iter()
                .map(|agent| {
                    json!({
                        "id": agent.id,
                        "name": agent.name,
                        "status": agent.status.as_str(),
                        "online": online.contains(&agent.name),
                        "last_seen": agent.last_seen,
                    })
                })
                .collect();
            Ok(json!({ "agents": rows }))
        }
        "sonde.list_integrations" => {
            let integrations = context.store.list_integrations()?;
            let rows: Vec<Value> = integrations
                .into_iter()
                .map(|i| json!({"id": i.id, "name": i.name, "type": i.type_, "status": i.status.as_str()}))
                .collect();
            Ok(json!({ "integrations": rows }))
        }
        other => bail!("unsupported tool '{other}' (-32601)"),
    }
}

fn response_to_json(response: sonde_router::ProbeResponse) -> Value {
    json!({
        "status": response.status.as_str(),
        "data": response.data,
        "error": response.error,
        "duration_ms": response.duration_ms,
    })
}

fn tool_registry() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "sonde.execute_probe",
            description: "Execute a named probe, optionally against a specific agent.",
            input_schema: json!({
                "type": "object",
                "required": ["probe"],
                "properties": {
                    "probe": {"type": "string"},
                    "params": {"type": "object"},
                    "agent": {"type": "string"}
                }
            }),
        },
        McpTool {
            name: "sonde.run_runbook",
            description: "Run a registered diagnostic runbook by category.",
            input_schema: json!({
                "type": "object",
                "required": ["category"],
                "properties": {
                    "category": {"type": "string"},
                    "params": {"type": "object"}
                }
            }),
        },
        McpTool {
            name: "sonde.list_agents",
            description: "List known agents and their current connectivity.",
            input_schema: json!({"type": "object"}),
        },
        McpTool {
            name: "sonde.list_integrations",
            description: "List configured integrations.",
            input_schema: json!({"type": "object"}),
        },
    ]
}

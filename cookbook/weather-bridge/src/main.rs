//! Answers weather questions with the bundled MCP tool host.
//!
//! `weather-bridge "What's the weather in New York?"` answers once and prints
//! the response envelope. Without arguments it serves `GET /query`.

use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;

use mcp_bridge::server::{envelope, serve};
use mcp_bridge::{init_tracing, AppConfig, QueryRuntime, Result};
use serde_json::json;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(%err, "weather-bridge failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    init_tracing("info", env::var_os("MCP_BRIDGE_LOG_JSON").is_some())?;

    let cfg = match env::var("MCP_BRIDGE_CONFIG") {
        Ok(path) => AppConfig::from_env_or_file(path)?,
        Err(_) => AppConfig::from_env()?,
    };
    let runtime = QueryRuntime::from_config(&cfg).await?;

    let query = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.is_empty() {
        let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
            .parse()
            .map_err(|err| {
                mcp_bridge::BridgeError::Config(format!("invalid listen address: {err}"))
            })?;
        serve(runtime, addr).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let (status, body) = envelope(&query, runtime.answer(&query).await);
    let response = json!({ "statusCode": status.as_u16(), "body": body });
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

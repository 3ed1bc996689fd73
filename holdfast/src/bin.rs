// The holdfast executable: `holdfast serve` runs the store behind
// its HTTP surface; every other subcommand is a small client for one
// route, printing the server's JSON reply.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;

use holdfast_base::{Result, Strategy};
use holdfast_http::{router, AppState};
use holdfast_repl::ReplicationManager;

#[derive(Parser)]
#[command(name = "holdfast", about = "Replicated key-value store with hinted handoff")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct Conn {
    /// Base URL of a running holdfast server.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,
    /// Bearer token; must match the server's API_TOKEN.
    #[arg(long, env = "HOLDFAST_TOKEN", default_value = "your_api_token_here")]
    token: String,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the HTTP server.
    Serve {
        /// Path to the JSON configuration file.
        #[arg(long, default_value = "config/config.json")]
        config: PathBuf,
        /// Directory holding the per-node database files.
        #[arg(long, default_value = "db")]
        data_dir: PathBuf,
    },
    /// Store a key.
    Write {
        key: String,
        value: String,
        #[command(flatten)]
        conn: Conn,
    },
    /// Look up a key.
    Read {
        key: String,
        #[command(flatten)]
        conn: Conn,
    },
    /// Remove a key from every replica.
    Delete {
        key: String,
        #[command(flatten)]
        conn: Conn,
    },
    /// Mark a node dead.
    Fail {
        node_id: i64,
        #[command(flatten)]
        conn: Conn,
    },
    /// Mark a node alive again.
    Recover {
        node_id: i64,
        #[command(flatten)]
        conn: Conn,
    },
    /// Show the status of every node.
    Nodes {
        #[command(flatten)]
        conn: Conn,
    },
    /// Switch the replication strategy (full or consistent).
    SetStrategy {
        strategy: String,
        #[arg(long)]
        replication_factor: Option<usize>,
        #[command(flatten)]
        conn: Conn,
    },
    /// Show which nodes own a key.
    NodesForKey {
        key: String,
        #[command(flatten)]
        conn: Conn,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve { config, data_dir } => serve(config, data_dir).await,
        Cmd::Write { key, value, conn } => {
            if !key_ok(&key) {
                return Ok(());
            }
            request(
                &conn,
                reqwest::Method::POST,
                "/write",
                Some(json!({"key": key, "value": value})),
            )
            .await
        }
        Cmd::Read { key, conn } => {
            if !key_ok(&key) {
                return Ok(());
            }
            request(&conn, reqwest::Method::GET, &format!("/read/{key}"), None).await
        }
        Cmd::Delete { key, conn } => {
            if !key_ok(&key) {
                return Ok(());
            }
            request(&conn, reqwest::Method::DELETE, &format!("/delete/{key}"), None).await
        }
        Cmd::Fail { node_id, conn } => {
            if !node_id_ok(node_id) {
                return Ok(());
            }
            request(&conn, reqwest::Method::POST, &format!("/fail/{node_id}"), None).await
        }
        Cmd::Recover { node_id, conn } => {
            if !node_id_ok(node_id) {
                return Ok(());
            }
            request(
                &conn,
                reqwest::Method::POST,
                &format!("/recover/{node_id}"),
                None,
            )
            .await
        }
        Cmd::Nodes { conn } => request(&conn, reqwest::Method::GET, "/nodes", None).await,
        Cmd::SetStrategy {
            strategy,
            replication_factor,
            conn,
        } => {
            let mut body = json!({"strategy": strategy});
            if let Some(factor) = replication_factor {
                body["replication_factor"] = json!(factor);
            }
            request(
                &conn,
                reqwest::Method::POST,
                "/set_replication_strategy",
                Some(body),
            )
            .await
        }
        Cmd::NodesForKey { key, conn } => {
            if !key_ok(&key) {
                return Ok(());
            }
            request(
                &conn,
                reqwest::Method::GET,
                &format!("/nodes_for_key/{key}"),
                None,
            )
            .await
        }
    }
}

async fn serve(config_path: PathBuf, data_dir: PathBuf) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let config = holdfast_admin::load_or_create(&config_path)?;
    let manager = ReplicationManager::new(
        config.nodes_db,
        config.port,
        Strategy::Full,
        None,
        &data_dir,
    )?;
    let state = Arc::new(AppState {
        manager: RwLock::new(manager),
        api_token: config.api_token.clone(),
    });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "holdfast", "listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn key_ok(key: &str) -> bool {
    if key.trim().is_empty() {
        eprintln!("error: key cannot be empty or whitespace");
        return false;
    }
    true
}

fn node_id_ok(node_id: i64) -> bool {
    if node_id < 0 {
        eprintln!("error: node id must be non-negative");
        return false;
    }
    true
}

async fn request(
    conn: &Conn,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}{}", conn.url.trim_end_matches('/'), path);
    let mut request = client
        .request(method, url)
        .header("Authorization", format!("Bearer {}", conn.token));
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let reply: Value = response.json().await.unwrap_or(Value::Null);
    println!("{status}");
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

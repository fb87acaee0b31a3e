//! Toolgate - bearer-authenticated MCP tool server and client.

use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use toolgate::auth::{TokenAcquirer, TokenStore, TokenVerifier};
use toolgate::client::{ProgressRelay, ToolClient, ToolParams};
use toolgate::config::{default_cache_path, Args, AuthSettings, Command};
use toolgate::error::{Error, Result};
use toolgate::mcp::handler::ToolRegistry;
use toolgate::tools;
use toolgate::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up provider settings from a local .env, when present.
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr; stdout is reserved for command output.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    match args.command {
        Command::Serve { port, no_auth } => serve(args.auth, port, no_auth).await,
        Command::Login => login(args.auth).await,
        Command::Tools { url, no_auth } => list_tools(args.auth, url, no_auth).await,
        Command::Call {
            url,
            tool,
            params,
            no_auth,
        } => call(args.auth, url, tool, params, no_auth).await,
    }
}

/// Run the tool-hosting server.
async fn serve(settings: AuthSettings, port: u16, no_auth: bool) -> Result<()> {
    info!("Toolgate server v{VERSION}");

    let verifier = if no_auth {
        info!("Bearer verification disabled; all callers are anonymous");
        None
    } else {
        Some(Arc::new(TokenVerifier::new(settings.require_server()?)))
    };

    let mut registry = ToolRegistry::new();
    tools::register_all_tools(&mut registry);
    info!("Registered {} tools", registry.tool_count());

    toolgate::http::start_server(port, Arc::new(registry), verifier).await
}

/// Acquire a token (cached, silent, or interactive) and report on it.
async fn login(settings: AuthSettings) -> Result<()> {
    let credential = acquire_token(&settings).await?;

    match &credential.account {
        Some(account) => println!("Signed in as {account}"),
        None => println!("Signed in"),
    }
    println!("Token expires at {}", credential.expires_at.to_rfc3339());
    Ok(())
}

/// List the tools a server offers.
async fn list_tools(settings: AuthSettings, url: String, no_auth: bool) -> Result<()> {
    let client = connect(&settings, &url, no_auth).await?;

    let tools = client.list_tools().await?;
    for tool in &tools {
        println!("{}  {}", tool.name, tool.description);
    }
    info!("Server offers {} tools", tools.len());

    client.close();
    Ok(())
}

/// Invoke one tool and print its result.
async fn call(
    settings: AuthSettings,
    url: String,
    tool: String,
    params: String,
    no_auth: bool,
) -> Result<()> {
    let raw: serde_json::Value = serde_json::from_str(&params)
        .map_err(|e| Error::InvalidToolArguments(format!("params is not a JSON object: {e}")))?;
    // Fails here, before any network traffic, when the call is malformed.
    let params = ToolParams::parse(&tool, &raw)?;

    let client = connect(&settings, &url, no_auth).await?;

    let mut relay = ProgressRelay::default();
    let output = client
        .invoke(params, |event| {
            if let Some(frame) = relay.observe(event) {
                eprintln!("{frame}");
            }
        })
        .await?;

    match output.structured {
        Some(structured) => println!("{}", serde_json::to_string_pretty(&structured)?),
        None => println!("{}", output.text),
    }

    client.close();
    Ok(())
}

/// Build a client and run the handshake, acquiring a bearer token first
/// unless auth is off.
async fn connect(settings: &AuthSettings, url: &str, no_auth: bool) -> Result<ToolClient> {
    let bearer = if no_auth {
        None
    } else {
        Some(acquire_token(settings).await?.access_token)
    };

    let mut client = ToolClient::new(url, bearer);
    let server = client.connect().await?;
    info!("Connected to {} v{}", server.name, server.version);
    Ok(client)
}

async fn acquire_token(settings: &AuthSettings) -> Result<toolgate::auth::Credential> {
    let config = settings.require_client()?;
    let cache_path = default_cache_path()
        .ok_or_else(|| Error::Config("cannot determine a home directory".to_string()))?;
    let acquirer = TokenAcquirer::new(config, TokenStore::new(cache_path));
    acquirer.acquire().await
}

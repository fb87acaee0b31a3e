//! Configuration management for toolgate.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Command-line interface for toolgate.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bearer-authenticated MCP tool server and client")]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, env = "TOOLGATE_DEBUG", global = true)]
    pub debug: bool,

    #[command(flatten)]
    pub auth: AuthSettings,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the tool-hosting server
    Serve {
        /// HTTP port to listen on
        #[arg(short, long, default_value = "8000", env = "TOOLGATE_PORT")]
        port: u16,

        /// Disable bearer-token verification (local testing only)
        #[arg(long)]
        no_auth: bool,
    },

    /// Acquire a token (silent or device-code flow) and cache it
    Login,

    /// List tools available on the server
    Tools {
        /// Server MCP endpoint URL
        #[arg(short, long, default_value = "http://localhost:8000/mcp", env = "TOOLGATE_URL")]
        url: String,

        /// Skip authentication and connect without a bearer token
        #[arg(short = 'n', long)]
        no_auth: bool,
    },

    /// Invoke a tool on the server
    Call {
        /// Server MCP endpoint URL
        #[arg(short, long, default_value = "http://localhost:8000/mcp", env = "TOOLGATE_URL")]
        url: String,

        /// Tool name to invoke
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,

        /// Skip authentication and connect without a bearer token
        #[arg(short = 'n', long)]
        no_auth: bool,
    },
}

/// Identity-provider settings, consumed by both the client (acquisition)
/// and the server (verification). All fields are externally supplied;
/// `require_client` / `require_server` refuse to proceed when any needed
/// field is missing and report exactly which ones.
#[derive(clap::Args, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Identity-provider tenant identifier
    #[arg(long, env = "TENANT_ID", global = true)]
    pub tenant_id: Option<String>,

    /// Client (application) identifier for the device flow
    #[arg(long, env = "CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// Scope requested during acquisition (e.g. api://<app>/execute)
    #[arg(long, env = "API_SCOPE", global = true)]
    pub scope: Option<String>,

    /// Audience expected in verified tokens (e.g. api://<app>)
    #[arg(long, env = "API_AUDIENCE", global = true)]
    pub audience: Option<String>,

    /// Issuer expected in verified tokens
    #[arg(long, env = "TOKEN_ISSUER", global = true)]
    pub issuer: Option<String>,

    /// JWKS discovery URL; derived from the tenant when omitted
    #[arg(long, env = "JWKS_URL", global = true)]
    pub jwks_url: Option<String>,
}

impl AuthSettings {
    /// Authority base URL for OAuth2 endpoints.
    pub fn authority(&self) -> Option<String> {
        self.tenant_id
            .as_deref()
            .map(|t| format!("https://login.microsoftonline.com/{t}"))
    }

    /// Validate the fields the client side needs before any acquisition
    /// attempt is made.
    pub fn require_client(&self) -> Result<ClientAuthConfig> {
        let mut missing = Vec::new();
        if self.tenant_id.is_none() {
            missing.push("TENANT_ID".to_string());
        }
        if self.client_id.is_none() {
            missing.push("CLIENT_ID".to_string());
        }
        if self.scope.is_none() {
            missing.push("API_SCOPE".to_string());
        }
        if !missing.is_empty() {
            return Err(Error::MissingSettings(missing));
        }

        Ok(ClientAuthConfig {
            authority: self
                .authority()
                .expect("tenant presence checked above"),
            client_id: self.client_id.clone().expect("checked above"),
            scope: self.scope.clone().expect("checked above"),
        })
    }

    /// Validate the fields the server side needs before verification can
    /// start. Issuer and JWKS URL fall back to tenant-derived defaults.
    pub fn require_server(&self) -> Result<ServerAuthConfig> {
        let mut missing = Vec::new();
        if self.tenant_id.is_none() && (self.issuer.is_none() || self.jwks_url.is_none()) {
            missing.push("TENANT_ID".to_string());
        }
        if self.audience.is_none() {
            missing.push("API_AUDIENCE".to_string());
        }
        if !missing.is_empty() {
            return Err(Error::MissingSettings(missing));
        }

        let issuer = self.issuer.clone().unwrap_or_else(|| {
            format!(
                "https://sts.windows.net/{}/",
                self.tenant_id.as_deref().expect("checked above")
            )
        });
        let jwks_url = self.jwks_url.clone().unwrap_or_else(|| {
            format!(
                "https://login.microsoftonline.com/{}/discovery/v2.0/keys",
                self.tenant_id.as_deref().expect("checked above")
            )
        });

        Ok(ServerAuthConfig {
            audience: self.audience.clone().expect("checked above"),
            issuer,
            jwks_url,
            required_scopes: vec!["execute".to_string()],
        })
    }
}

/// Validated client-side acquisition settings.
#[derive(Debug, Clone)]
pub struct ClientAuthConfig {
    pub authority: String,
    pub client_id: String,
    pub scope: String,
}

impl ClientAuthConfig {
    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/devicecode", self.authority)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.authority)
    }
}

/// Validated server-side verification settings.
#[derive(Debug, Clone)]
pub struct ServerAuthConfig {
    pub audience: String,
    pub issuer: String,
    pub jwks_url: String,
    /// Scopes every verified caller must hold.
    pub required_scopes: Vec<String>,
}

/// Default location of the persisted credential cache.
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".toolgate").join("token_cache.json"))
}

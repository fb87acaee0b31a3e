//! Bearer-token verification against a remote JWKS.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::ServerAuthConfig;
use crate::error::{Error, Result};

/// One entry of the published key set. Only the RSA components the
/// verifier needs are kept; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksKey {
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwksKey>,
}

#[derive(Debug)]
struct CachedKeySet {
    keys: Vec<JwksKey>,
    fetched_at: DateTime<Utc>,
}

/// Fetches and caches the remote key set.
///
/// The whole set is replaced atomically on refetch; entries are never
/// invalidated individually. A lookup for a key id absent from the cached
/// set triggers exactly one refetch before failing, which is how key
/// rotation is picked up. Redundant refetches under concurrent misses are
/// acceptable; each replaces the set wholesale.
pub struct KeySetResolver {
    url: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedKeySet>>,
}

impl KeySetResolver {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        }
    }

    /// Resolve a key by id, refetching the set once on a miss.
    pub async fn key_for(&self, kid: &str) -> Result<JwksKey> {
        if let Some(key) = self.lookup(kid).await {
            return Ok(key);
        }

        self.refetch().await?;

        self.lookup(kid)
            .await
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }

    async fn lookup(&self, kid: &str) -> Option<JwksKey> {
        let cached = self.cached.read().await;
        cached
            .as_ref()?
            .keys
            .iter()
            .find(|k| k.kid == kid)
            .cloned()
    }

    async fn refetch(&self) -> Result<()> {
        let document: JwksDocument = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(keys = document.keys.len(), "Fetched key set");

        let mut cached = self.cached.write().await;
        *cached = Some(CachedKeySet {
            keys: document.keys,
            fetched_at: Utc::now(),
        });
        Ok(())
    }

    /// When the current set was fetched, if ever.
    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.cached.read().await.as_ref().map(|c| c.fetched_at)
    }
}

/// Caller identity derived from a verified token. Attached to a request
/// for the duration of handling; never persisted.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: String,
    pub audience: String,
    pub issuer: String,
    pub scopes: HashSet<String>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    iss: Option<String>,
    /// Space-separated scope list, as identity providers emit it.
    scp: Option<String>,
}

/// Validates bearer tokens: signature, expiry, audience, issuer, in that
/// order of precedence, against keys resolved from the JWKS.
pub struct TokenVerifier {
    config: ServerAuthConfig,
    resolver: KeySetResolver,
}

impl TokenVerifier {
    pub fn new(config: ServerAuthConfig) -> Self {
        let resolver = KeySetResolver::new(config.jwks_url.clone());
        Self { config, resolver }
    }

    #[cfg(test)]
    fn with_resolver(config: ServerAuthConfig, resolver: KeySetResolver) -> Self {
        Self { config, resolver }
    }

    /// Verify a bearer token and derive the caller's identity.
    ///
    /// Every failure maps to a specific unauthorized-class error; the
    /// reason is preserved for logging but key material never is.
    pub async fn verify(&self, token: &str) -> Result<AuthContext> {
        let header =
            decode_header(token).map_err(|e| Error::TokenInvalid(format!("bad header: {e}")))?;
        let kid = header.kid.ok_or(Error::NoKeyId)?;

        let key = self.resolver.key_for(&kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&key.n, &key.e)
            .map_err(|_| Error::TokenInvalid("unusable key components".to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);

        let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::InvalidSignature => Error::SignatureInvalid,
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                ErrorKind::InvalidAudience => Error::AudienceMismatch,
                ErrorKind::InvalidIssuer => Error::IssuerMismatch,
                _ => Error::TokenInvalid(e.to_string()),
            }
        })?;

        let scopes: HashSet<String> = data
            .claims
            .scp
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();

        let context = AuthContext {
            subject: data.claims.sub.unwrap_or_default(),
            audience: self.config.audience.clone(),
            issuer: data.claims.iss.unwrap_or_else(|| self.config.issuer.clone()),
            scopes,
        };

        for required in &self.config.required_scopes {
            if !context.has_scope(required) {
                warn!(subject = %context.subject, scope = %required, "Token missing required scope");
                return Err(Error::TokenInvalid(format!(
                    "token lacks required scope {required:?}"
                )));
            }
        }

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct StubJwks {
        fetches: Arc<AtomicUsize>,
        kids: Vec<&'static str>,
    }

    async fn stub_keys(State(state): State<StubJwks>) -> Json<serde_json::Value> {
        state.fetches.fetch_add(1, Ordering::SeqCst);
        let keys: Vec<_> = state
            .kids
            .iter()
            .map(|kid| {
                serde_json::json!({
                    "kid": kid,
                    "kty": "RSA",
                    "use": "sig",
                    "n": "sXchn1W9Ne1cyVPoq1iBcMcD9TPnHvTDsMp4m8sQvpBS0",
                    "e": "AQAB"
                })
            })
            .collect();
        Json(serde_json::json!({ "keys": keys }))
    }

    async fn spawn_jwks(state: StubJwks) -> String {
        let app = Router::new()
            .route("/discovery/v2.0/keys", get(stub_keys))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/discovery/v2.0/keys")
    }

    #[tokio::test]
    async fn test_known_kid_fetches_once() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let url = spawn_jwks(StubJwks {
            fetches: fetches.clone(),
            kids: vec!["key-1", "key-2"],
        })
        .await;

        let resolver = KeySetResolver::new(url);
        let key = resolver.key_for("key-2").await.unwrap();
        assert_eq!(key.kid, "key-2");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Second lookup hits the cache, no refetch.
        resolver.key_for("key-1").await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_exactly_once() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let url = spawn_jwks(StubJwks {
            fetches: fetches.clone(),
            kids: vec!["key-1"],
        })
        .await;

        let resolver = KeySetResolver::new(url);
        resolver.key_for("key-1").await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let err = resolver.key_for("rotated-away").await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(kid) if kid == "rotated-away"));
        // Exactly one refetch attempt before failing.
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetched_at_tracks_replacement() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let url = spawn_jwks(StubJwks {
            fetches,
            kids: vec!["key-1"],
        })
        .await;

        let resolver = KeySetResolver::new(url);
        assert!(resolver.fetched_at().await.is_none());
        resolver.key_for("key-1").await.unwrap();
        assert!(resolver.fetched_at().await.is_some());
    }

    fn server_config(jwks_url: &str) -> ServerAuthConfig {
        ServerAuthConfig {
            audience: "api://app".to_string(),
            issuer: "https://sts.windows.net/tenant-1/".to_string(),
            jwks_url: jwks_url.to_string(),
            required_scopes: vec!["execute".to_string()],
        }
    }

    #[tokio::test]
    async fn test_token_without_kid_is_rejected() {
        // HS256 tokens carry no kid; the header check fires before any
        // key-set fetch, so an unreachable JWKS URL is fine here.
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": "u", "exp": 4102444800u64}),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let verifier = TokenVerifier::new(server_config("http://127.0.0.1:1/keys"));
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, Error::NoKeyId));
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected_as_invalid() {
        let verifier = TokenVerifier::new(server_config("http://127.0.0.1:1/keys"));
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, Error::TokenInvalid(_)));
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_unknown_kid_surfaces_key_not_found() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let url = spawn_jwks(StubJwks {
            fetches: fetches.clone(),
            kids: vec!["other-key"],
        })
        .await;

        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some("missing-key".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &serde_json::json!({"sub": "u", "exp": 4102444800u64}),
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let verifier = TokenVerifier::with_resolver(
            server_config(&url),
            KeySetResolver::new(url.clone()),
        );
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        // The miss triggered the initial fetch plus one refetch.
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_auth_context_scope_check() {
        let context = AuthContext {
            subject: "user-1".to_string(),
            audience: "api://app".to_string(),
            issuer: "https://sts.windows.net/tenant-1/".to_string(),
            scopes: ["execute".to_string()].into_iter().collect(),
        };
        assert!(context.has_scope("execute"));
        assert!(!context.has_scope("admin"));
    }
}

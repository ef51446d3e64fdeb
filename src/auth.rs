//! Authentication provider
//!
//! OIDC authorization-code flow against Keycloak with a PKCE-style callback
//! handoff: the callback stores the exchanged token pair under the client's
//! `code_challenge`, and `POST /auth/token` redeems it exactly once with the
//! matching `code_verifier`. JWT validation accepts HS256 (legacy shared
//! secret) and RS256 (realm public key fetched once from the JWKS endpoint).
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use jwt::algorithm::openssl::PKeyWithDigest;
use jwt::{AlgorithmType, Header, Token, VerifyWithKey};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use reqwest::ClientBuilder;

use crate::config::Config;
use crate::errors::ApiError;
use crate::types::AppState;

const CLAIM_SUB: &str = "sub";
const CLAIM_GROUPS: &str = "groups";

/// Access/refresh token pair as returned by the identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Validated JWT claims plus the algorithm family that signed them.
/// HMAC-signed tokens come from trusted machine clients.
#[derive(Clone, Debug)]
pub struct AuthClaims {
    pub claims: BTreeMap<String, Value>,
    pub hmac: bool,
}

impl AuthClaims {
    pub fn subject(&self) -> Option<String> {
        self.claims
            .get(CLAIM_SUB)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// The `groups` claim may be absent, a non-array, or contain
    /// non-strings; each of those degrades to "no groups".
    pub fn groups(&self) -> Vec<String> {
        match self.claims.get(CLAIM_GROUPS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Decoded content of the opaque `state` parameter round-tripped through the
/// identity provider.
#[derive(Debug, Deserialize)]
struct CallbackState {
    code_challenge: String,
    callback_url: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(rename = "use", default)]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

pub struct AuthProvider {
    config: Config,
    client: reqwest::Client,
    handoff: RwLock<HashMap<String, TokenPair>>,
    realm_key: RwLock<Option<PKey<Public>>>,
}

impl AuthProvider {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: ClientBuilder::new()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
            handoff: RwLock::new(HashMap::new()),
            realm_key: RwLock::new(None),
        }
    }

    fn realm_endpoint(&self, leaf: &str) -> Result<String, ApiError> {
        match (&self.config.keycloak_url, &self.config.keycloak_realm) {
            (Some(url), Some(realm)) => Ok(format!(
                "{}/realms/{}/protocol/openid-connect/{}",
                url.trim_end_matches('/'),
                realm,
                leaf
            )),
            _ => Err(ApiError::Internal(anyhow::anyhow!(
                "identity provider is not configured"
            ))),
        }
    }

    fn client_credentials(&self) -> (String, String) {
        (
            self.config.keycloak_client_id.clone().unwrap_or_default(),
            self.config.keycloak_client_secret.clone().unwrap_or_default(),
        )
    }

    fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.config.api_url())
    }

    // ── Handoff cache ──────────────────────────────────────────

    pub fn stash_tokens(&self, code_challenge: &str, tokens: TokenPair) {
        self.handoff
            .write()
            .unwrap()
            .insert(code_challenge.to_string(), tokens);
    }

    /// Single-shot retrieval: the entry is removed on first read.
    pub fn take_tokens(&self, code_challenge: &str) -> Option<TokenPair> {
        self.handoff.write().unwrap().remove(code_challenge)
    }

    // ── Upstream calls ─────────────────────────────────────────

    async fn exchange_code(&self, code: &str) -> Result<TokenPair, ApiError> {
        let endpoint = self.realm_endpoint("token")?;
        let (client_id, client_secret) = self.client_credentials();
        let response = self
            .client
            .post(&endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("redirect_uri", self.redirect_uri().as_str()),
            ])
            .send()
            .await
            .context("token exchange transport failure")?;
        if !response.status().is_success() {
            return Err(ApiError::InvalidInput("code exchange failed".to_string()));
        }
        let tokens: TokenPair = response
            .json()
            .await
            .context("token exchange returned an unreadable body")?;
        Ok(tokens)
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let endpoint = self.realm_endpoint("token")?;
        let (client_id, client_secret) = self.client_credentials();
        let response = self
            .client
            .post(&endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .context("token refresh transport failure")?;
        if !response.status().is_success() {
            return Err(ApiError::InvalidInput(
                upstream_error_message(response).await,
            ));
        }
        let tokens: TokenPair = response
            .json()
            .await
            .context("token refresh returned an unreadable body")?;
        Ok(tokens)
    }

    async fn logout_upstream(&self, refresh_token: &str) -> Result<(), ApiError> {
        let endpoint = self.realm_endpoint("logout")?;
        let (client_id, client_secret) = self.client_credentials();
        let response = self
            .client
            .post(&endpoint)
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .context("logout transport failure")?;
        if response.status().is_client_error() {
            return Err(ApiError::InvalidInput(
                upstream_error_message(response).await,
            ));
        }
        if !response.status().is_success() {
            return Err(ApiError::Internal(anyhow::anyhow!(
                "logout endpoint answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    // ── JWT validation ─────────────────────────────────────────

    /// Parse and verify a bearer token. Key selection follows the `alg`
    /// header: HMAC tokens use the legacy shared secret, RSA tokens the
    /// cached realm public key.
    pub async fn validate_token(&self, token: &str) -> Result<AuthClaims, ApiError> {
        let unverified: Token<Header, BTreeMap<String, Value>, _> =
            Token::parse_unverified(token).map_err(|_| ApiError::Unauthorized)?;
        match unverified.header().algorithm {
            AlgorithmType::Hs256 => {
                if self.config.secret_key.is_empty() {
                    return Err(ApiError::Unauthorized);
                }
                let key: Hmac<Sha256> =
                    Hmac::new_from_slice(self.config.secret_key.as_bytes())
                        .map_err(|_| ApiError::Unauthorized)?;
                let claims: BTreeMap<String, Value> =
                    token.verify_with_key(&key).map_err(|_| ApiError::Unauthorized)?;
                Ok(AuthClaims { claims, hmac: true })
            }
            AlgorithmType::Rs256 => {
                let key = self.realm_public_key().await?;
                let algorithm = PKeyWithDigest {
                    digest: MessageDigest::sha256(),
                    key,
                };
                let claims: BTreeMap<String, Value> = token
                    .verify_with_key(&algorithm)
                    .map_err(|_| ApiError::Unauthorized)?;
                Ok(AuthClaims {
                    claims,
                    hmac: false,
                })
            }
            _ => Err(ApiError::Unauthorized),
        }
    }

    /// Realm public key, fetched from the JWKS endpoint on first use and
    /// cached for the process lifetime.
    async fn realm_public_key(&self) -> Result<PKey<Public>, ApiError> {
        {
            let cached = self.realm_key.read().unwrap();
            if let Some(key) = cached.as_ref() {
                return Ok(key.clone());
            }
        }
        let key = self.fetch_realm_key().await?;
        *self.realm_key.write().unwrap() = Some(key.clone());
        Ok(key)
    }

    async fn fetch_realm_key(&self) -> Result<PKey<Public>, ApiError> {
        let endpoint = self.realm_endpoint("certs")?;
        let jwks: Jwks = self
            .client
            .get(&endpoint)
            .send()
            .await
            .context("JWKS fetch failed")?
            .json()
            .await
            .context("JWKS endpoint returned an unreadable body")?;
        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.kty == "RSA" && k.key_use.as_deref() != Some("enc"))
            .ok_or_else(|| anyhow::anyhow!("no RSA signature key in JWKS response"))?;
        let n = URL_SAFE_NO_PAD
            .decode(jwk.n.as_deref().unwrap_or_default())
            .context("JWKS modulus is not base64url")?;
        let e = URL_SAFE_NO_PAD
            .decode(jwk.e.as_deref().unwrap_or_default())
            .context("JWKS exponent is not base64url")?;
        let rsa = Rsa::from_public_components(
            BigNum::from_slice(&n).map_err(anyhow::Error::new)?,
            BigNum::from_slice(&e).map_err(anyhow::Error::new)?,
        )
        .map_err(anyhow::Error::new)?;
        Ok(PKey::from_rsa(rsa).map_err(anyhow::Error::new)?)
    }
}

async fn upstream_error_message(response: reqwest::Response) -> String {
    match response.json::<Value>().await {
        Ok(body) => body
            .get("error_description")
            .or_else(|| body.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("identity provider rejected the request")
            .to_string(),
        Err(_) => "identity provider rejected the request".to_string(),
    }
}

/// Hex-encoded sha256, the handoff cache key derivation.
pub fn challenge_from_verifier(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn redirect_with_error(url: &str, error: &str) -> Response {
    let mut response = Redirect::to(url).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("error={}", error)) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

// ── Handlers ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub code_verifier: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Construct the /auth routes.
pub fn get_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(handler_login))
        .route("/callback", get(handler_callback))
        .route("/token", post(handler_token))
        .route("/logout", put(handler_logout))
        .route("/refresh", post(handler_refresh))
}

/// Entry point of the login flow: passes the opaque client state through to
/// the identity provider's authorization endpoint.
async fn handler_login(
    Query(query): Query<LoginQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let client_state = query
        .state
        .ok_or_else(|| ApiError::InvalidInput("missing state parameter".to_string()))?;
    let endpoint = state.auth.realm_endpoint("auth")?;
    let (client_id, _) = state.auth.client_credentials();
    let url = reqwest::Url::parse_with_params(
        &endpoint,
        &[
            ("client_id", client_id.as_str()),
            ("response_type", "code"),
            ("scope", "openid"),
            ("redirect_uri", state.auth.redirect_uri().as_str()),
            ("state", client_state.as_str()),
        ],
    )
    .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("authorize URL")))?;
    Ok(Redirect::to(url.as_str()).into_response())
}

/// Provider callback: exchanges the code and stores the token pair under the
/// state's code challenge for the single-shot retrieval.
async fn handler_callback(
    Query(query): Query<CallbackQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let raw_state = query
        .state
        .ok_or_else(|| ApiError::InvalidInput("missing state parameter".to_string()))?;
    let decoded = match URL_SAFE_NO_PAD.decode(raw_state.as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(redirect_with_error(&state.config.web_url, "invalid_state")),
    };
    let callback_state: CallbackState = match serde_json::from_slice(&decoded) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(redirect_with_error(&state.config.web_url, "invalid_state")),
    };
    let code = match query.code {
        Some(code) => code,
        None => {
            return Ok(redirect_with_error(
                &callback_state.callback_url,
                "missing_code",
            ))
        }
    };
    match state.auth.exchange_code(&code).await {
        Ok(tokens) => {
            state
                .auth
                .stash_tokens(&callback_state.code_challenge, tokens);
            Ok(Redirect::to(&callback_state.callback_url).into_response())
        }
        Err(ApiError::Internal(err)) => Err(ApiError::Internal(err)),
        Err(_) => Ok(redirect_with_error(
            &callback_state.callback_url,
            "code_exchange_failed",
        )),
    }
}

/// Redeem the token pair stashed by the callback; entries are consumed on
/// first read, a second call with the same verifier fails.
async fn handler_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let key = challenge_from_verifier(&request.code_verifier);
    state
        .auth
        .take_tokens(&key)
        .map(Json)
        .ok_or_else(|| ApiError::InvalidInput("no tokens for this verifier".to_string()))
}

async fn handler_logout(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<StatusCode, ApiError> {
    state.auth.logout_upstream(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handler_refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = state.auth.refresh_tokens(&request.refresh_token).await?;
    Ok(Json(tokens))
}

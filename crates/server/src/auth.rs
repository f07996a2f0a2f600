use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use orchestrator_core::config::{AppConfig, AuthMode};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;

use crate::bootstrap::AppState;
use crate::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Requester,
    Reviewer,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Reviewer => "reviewer",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "requester" => Some(Role::Requester),
            "reviewer" => Some(Role::Reviewer),
            "approver" => Some(Role::Approver),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ActorContext {
    pub actor_id: String,
    pub actor_role: Role,
}

impl ActorContext {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.actor_role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "role {} is not permitted to perform this action",
                self.actor_role.as_str()
            )))
        }
    }

    /// Mirrors `_authorize_task_access`: requesters may only act on tasks
    /// they own; every other allowed role passes regardless of ownership.
    pub fn require_task_owner_if_requester(&self, requested_by: &str) -> Result<(), ApiError> {
        if self.actor_role == Role::Requester && self.actor_id != requested_by {
            return Err(ApiError::forbidden("requester does not own this task"));
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for ActorContext
where
    AppState: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let config = app_state.config.as_ref();
        resolve_actor_context(parts, &config.auth)
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

fn unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::unauthorized(message)
}

/// Full priority chain per SPEC_FULL.md §6A: bearer JWT, then the IdP-only
/// actor-token header, then (gated) trusted and compat headers.
fn resolve_actor_context(parts: &Parts, auth: &orchestrator_core::config::AuthConfig) -> Result<ActorContext, ApiError> {
    if let Some(header) = header_value(parts, "authorization") {
        if let Some(token) = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer ")) {
            return resolve_bearer_actor(token.trim(), auth);
        }
    }

    if let Some(token) = header_value(parts, "x-actor-token") {
        let jwks_path = auth
            .idp_jwks_path
            .as_ref()
            .ok_or_else(|| unauthorized("actor token provided but no idp_jwks_path is configured"))?;
        let claims = decode_idp_jwt(token.trim(), jwks_path, auth.idp_issuer.as_deref(), auth.idp_audience.as_deref())?;
        return claims_to_actor(&claims, &auth.idp_role_claim);
    }

    if matches!(auth.mode, AuthMode::Idp) {
        return Err(unauthorized("idp mode requires token-based authentication"));
    }

    if auth.allow_trusted_headers {
        let trusted_id = header_value(parts, "x-trusted-actor-id");
        let trusted_role = header_value(parts, "x-trusted-actor-role");
        if let (Some(actor_id), Some(actor_role)) = (trusted_id, trusted_role) {
            let role = Role::parse(actor_role).ok_or_else(|| unauthorized("invalid trusted actor role"))?;
            return Ok(ActorContext { actor_id: actor_id.trim().to_string(), actor_role: role });
        }
    }

    if auth.allow_compat_headers {
        let compat_id = header_value(parts, "x-actor-id");
        let compat_role = header_value(parts, "x-actor-role");
        if let (Some(actor_id), Some(actor_role)) = (compat_id, compat_role) {
            let role = Role::parse(actor_role).ok_or_else(|| unauthorized("invalid actor role header"))?;
            return Ok(ActorContext { actor_id: actor_id.trim().to_string(), actor_role: role });
        }
    }

    Err(unauthorized("missing authentication context"))
}

fn resolve_bearer_actor(token: &str, auth: &orchestrator_core::config::AuthConfig) -> Result<ActorContext, ApiError> {
    match auth.mode {
        AuthMode::Local => {
            let claims = decode_local_jwt_hs256(token, auth.jwt_secret.expose_secret())?;
            claims_to_actor(&claims, "role")
        }
        AuthMode::Idp => {
            let jwks_path = auth
                .idp_jwks_path
                .as_ref()
                .ok_or_else(|| unauthorized("idp mode requires idp_jwks_path to be configured"))?;
            let claims = decode_idp_jwt(token, jwks_path, auth.idp_issuer.as_deref(), auth.idp_audience.as_deref())?;
            claims_to_actor(&claims, &auth.idp_role_claim)
        }
        AuthMode::Mixed => {
            let (header_b64, payload_b64, _) = split_jwt(token)?;
            let header = decode_json_part(header_b64)?;
            let payload = decode_json_part(payload_b64)?;

            let should_try_idp = match &auth.idp_jwks_path {
                None => false,
                Some(_) => match auth.idp_issuer.as_deref() {
                    Some(expected) => payload.get("iss").and_then(|v| v.as_str()) == Some(expected),
                    None => header.get("kid").is_some(),
                },
            };

            if should_try_idp {
                let jwks_path = auth.idp_jwks_path.as_ref().expect("checked above");
                let claims = decode_idp_jwt(token, jwks_path, auth.idp_issuer.as_deref(), auth.idp_audience.as_deref())?;
                claims_to_actor(&claims, &auth.idp_role_claim)
            } else {
                let claims = decode_local_jwt_hs256(token, auth.jwt_secret.expose_secret())?;
                claims_to_actor(&claims, "role")
            }
        }
    }
}

fn split_jwt(token: &str) -> Result<(&str, &str, &str), ApiError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(unauthorized("invalid bearer token format")),
    }
}

fn b64url_decode(value: &str) -> Result<Vec<u8>, ApiError> {
    URL_SAFE_NO_PAD.decode(value).map_err(|_| unauthorized("invalid base64url in bearer token"))
}

fn b64url_encode(value: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(value)
}

fn decode_json_part(value: &str) -> Result<serde_json::Value, ApiError> {
    let bytes = b64url_decode(value)?;
    serde_json::from_slice(&bytes).map_err(|_| unauthorized("invalid jwt part"))
}

fn validate_common_claims(
    payload: &serde_json::Value,
    expected_issuer: Option<&str>,
    expected_audience: Option<&str>,
) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp();

    if let Some(exp) = payload.get("exp").and_then(|v| v.as_i64()) {
        if exp < now {
            return Err(unauthorized("expired bearer token"));
        }
    }
    if let Some(nbf) = payload.get("nbf").and_then(|v| v.as_i64()) {
        if nbf > now {
            return Err(unauthorized("token not active yet"));
        }
    }
    if let Some(expected) = expected_issuer {
        if payload.get("iss").and_then(|v| v.as_str()) != Some(expected) {
            return Err(unauthorized("issuer mismatch"));
        }
    }
    if let Some(expected) = expected_audience {
        let matches = match payload.get("aud") {
            Some(serde_json::Value::Array(values)) => {
                values.iter().any(|v| v.as_str() == Some(expected))
            }
            Some(serde_json::Value::String(value)) => value == expected,
            _ => false,
        };
        if !matches {
            return Err(unauthorized("audience mismatch"));
        }
    }

    Ok(())
}

fn decode_local_jwt_hs256(token: &str, secret: &str) -> Result<serde_json::Value, ApiError> {
    let (header_b64, payload_b64, signature_b64) = split_jwt(token)?;
    let header = decode_json_part(header_b64)?;
    let payload = decode_json_part(payload_b64)?;

    if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
        return Err(unauthorized("unsupported token alg for local auth"));
    }

    let signing_input = format!("{header_b64}.{payload_b64}");
    let expected = hmac_sha256(secret.as_bytes(), signing_input.as_bytes());
    let expected_b64 = b64url_encode(&expected);

    if !constant_time_eq(signature_b64.as_bytes(), expected_b64.as_bytes()) {
        return Err(unauthorized("invalid bearer token signature"));
    }

    validate_common_claims(&payload, None, None)?;
    Ok(payload)
}

#[derive(Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    k: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

fn load_jwks_from_file(path: &std::path::Path) -> Result<Jwks, ApiError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| unauthorized(format!("jwks file not found: {}", path.display())))?;
    serde_json::from_str(&raw).map_err(|_| unauthorized("failed to parse jwks file"))
}

fn lookup_jwk<'a>(jwks: &'a Jwks, kid: Option<&str>) -> Result<&'a Jwk, ApiError> {
    if jwks.keys.is_empty() {
        return Err(unauthorized("jwks has no keys"));
    }
    if let Some(kid) = kid {
        return jwks
            .keys
            .iter()
            .find(|key| key.kid.as_deref() == Some(kid))
            .ok_or_else(|| unauthorized("jwks key not found for kid"));
    }
    Ok(&jwks.keys[0])
}

fn verify_jwk_hs256(header_b64: &str, payload_b64: &str, signature_b64: &str, jwk: &Jwk) -> Result<(), ApiError> {
    if jwk.kty != "oct" {
        return Err(unauthorized("invalid jwk type for hs256"));
    }
    let encoded_key = jwk.k.as_deref().ok_or_else(|| unauthorized("jwks key missing 'k'"))?;
    let secret = b64url_decode(encoded_key)?;

    let signing_input = format!("{header_b64}.{payload_b64}");
    let expected = hmac_sha256(&secret, signing_input.as_bytes());
    if !constant_time_eq(signature_b64.as_bytes(), b64url_encode(&expected).as_bytes()) {
        return Err(unauthorized("invalid idp token signature"));
    }
    Ok(())
}

fn verify_jwk_rs256(header_b64: &str, payload_b64: &str, signature_b64: &str, jwk: &Jwk) -> Result<(), ApiError> {
    if jwk.kty != "RSA" {
        return Err(unauthorized("invalid jwk type for rs256"));
    }
    let n_b64 = jwk.n.as_deref().ok_or_else(|| unauthorized("jwks rsa key missing n/e"))?;
    let e_b64 = jwk.e.as_deref().ok_or_else(|| unauthorized("jwks rsa key missing n/e"))?;

    let n = BigUint::from_bytes_be(&b64url_decode(n_b64)?);
    let e = BigUint::from_bytes_be(&b64url_decode(e_b64)?);
    let public_key = RsaPublicKey::new(n, e).map_err(|_| unauthorized("invalid idp rsa public key"))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let signature_bytes = b64url_decode(signature_b64)?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| unauthorized("invalid idp token signature"))?;

    let signing_input = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| unauthorized("invalid idp token signature"))
}

fn decode_idp_jwt(
    token: &str,
    jwks_path: &std::path::Path,
    issuer: Option<&str>,
    audience: Option<&str>,
) -> Result<serde_json::Value, ApiError> {
    let (header_b64, payload_b64, signature_b64) = split_jwt(token)?;
    let header = decode_json_part(header_b64)?;
    let payload = decode_json_part(payload_b64)?;
    let alg = header.get("alg").and_then(|v| v.as_str()).unwrap_or_default();
    let kid = header.get("kid").and_then(|v| v.as_str());

    let jwks = load_jwks_from_file(jwks_path)?;
    let jwk = lookup_jwk(&jwks, kid)?;

    match alg {
        "HS256" => verify_jwk_hs256(header_b64, payload_b64, signature_b64, jwk)?,
        "RS256" => verify_jwk_rs256(header_b64, payload_b64, signature_b64, jwk)?,
        other => return Err(unauthorized(format!("unsupported idp token alg: {other}"))),
    }

    validate_common_claims(&payload, issuer, audience)?;
    Ok(payload)
}

fn claims_to_actor(payload: &serde_json::Value, role_claim: &str) -> Result<ActorContext, ApiError> {
    let sub = payload.get("sub").and_then(|v| v.as_str()).unwrap_or_default().trim();
    let role_raw = payload.get(role_claim).and_then(|v| v.as_str()).unwrap_or_default();
    let role = Role::parse(role_raw);

    match (sub.is_empty(), role) {
        (false, Some(role)) => Ok(ActorContext { actor_id: sub.to_string(), actor_role: role }),
        _ => Err(unauthorized("token missing valid sub/role")),
    }
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Dev token issuance, shared with the `orchestrator-devtoken` binary.
pub fn issue_dev_jwt(sub: &str, role: Role, secret: &str, expires_in_seconds: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let payload = serde_json::json!({
        "sub": sub,
        "role": role.as_str(),
        "iat": now,
        "exp": now + expires_in_seconds,
    });

    let header_b64 = b64url_encode(header.to_string().as_bytes());
    let payload_b64 = b64url_encode(payload.to_string().as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = hmac_sha256(secret.as_bytes(), signing_input.as_bytes());
    format!("{header_b64}.{payload_b64}.{}", b64url_encode(&signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_dev_token_round_trips_through_local_decode() {
        let token = issue_dev_jwt("kim", Role::Requester, "test-secret", 3600);
        let payload = decode_local_jwt_hs256(&token, "test-secret").expect("token should verify");
        assert_eq!(payload.get("sub").and_then(|v| v.as_str()), Some("kim"));
        assert_eq!(payload.get("role").and_then(|v| v.as_str()), Some("requester"));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = issue_dev_jwt("kim", Role::Admin, "test-secret", 3600);
        let mut parts: Vec<&str> = token.split('.').collect();
        let bogus = b64url_encode(b"not-a-real-signature-000000");
        parts[2] = &bogus;
        let tampered = parts.join(".");
        assert!(decode_local_jwt_hs256(&tampered, "test-secret").is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_dev_jwt("kim", Role::Reviewer, "right-secret", 3600);
        assert!(decode_local_jwt_hs256(&token, "wrong-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_dev_jwt("kim", Role::Approver, "test-secret", -10);
        assert!(decode_local_jwt_hs256(&token, "test-secret").is_err());
    }

    #[test]
    fn role_parse_is_case_insensitive_and_rejects_unknown_roles() {
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("unknown"), None);
    }

    #[test]
    fn requester_cannot_approve() {
        let actor = ActorContext { actor_id: "carol".to_string(), actor_role: Role::Requester };
        assert!(actor.require_role(&[Role::Approver, Role::Admin]).is_err());
    }

    #[test]
    fn approver_can_approve() {
        let actor = ActorContext { actor_id: "manager".to_string(), actor_role: Role::Approver };
        assert!(actor.require_role(&[Role::Approver, Role::Admin]).is_ok());
    }

    #[test]
    fn requester_may_only_view_their_own_task() {
        let owner = ActorContext { actor_id: "carol".to_string(), actor_role: Role::Requester };
        assert!(owner.require_task_owner_if_requester("carol").is_ok());

        let other = ActorContext { actor_id: "dave".to_string(), actor_role: Role::Requester };
        assert!(other.require_task_owner_if_requester("carol").is_err());
    }

    #[test]
    fn reviewer_may_view_any_task_regardless_of_ownership() {
        let reviewer = ActorContext { actor_id: "reviewer-1".to_string(), actor_role: Role::Reviewer };
        assert!(reviewer.require_task_owner_if_requester("carol").is_ok());
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Webhook Request Authorizer
//!
//! Logic run by the ingress authorization function. The webhook sender signs
//! the raw request body with the shared secret:
//!
//! ```text
//! x-works-signature: base64(HMAC-SHA256(secret, body))
//! ```
//!
//! The authorizer answers with an execute-api policy: `Allow` on the
//! invoked method when the signature verifies, `Deny` otherwise. A missing
//! header, body, or secret is always `Deny`.
//!
//! The secret itself is read by reference from the credential bundle and
//! selected by field name, the same way containers receive it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::domain::SecretField;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "x-works-signature";

/// Principal reported for every decision
pub const PRINCIPAL_ID: &str = "user";

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizerError {
    #[error("Credential bundle is not a JSON object: {0}")]
    InvalidBundle(String),

    #[error("Credential bundle has no string field '{0}'")]
    MissingField(String),
}

/// Request event delivered to the authorization function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    pub method_arn: String,
}

impl AuthorizerRequest {
    /// Header value with case-insensitive name matching
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub action: String,
    pub effect: Effect,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

/// Authorization decision returned to the API front door
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerResponse {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
}

impl AuthorizerResponse {
    pub fn new(effect: Effect, method_arn: &str) -> Self {
        Self {
            principal_id: PRINCIPAL_ID.to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![PolicyStatement {
                    action: "execute-api:Invoke".to_string(),
                    effect,
                    resource: method_arn.to_string(),
                }],
            },
        }
    }

    pub fn effect(&self) -> Effect {
        self.policy_document
            .statement
            .first()
            .map(|s| s.effect)
            .unwrap_or(Effect::Deny)
    }
}

/// Select the shared secret from a credential bundle document
pub fn secret_from_bundle(bundle: &str, field: &SecretField) -> Result<String, AuthorizerError> {
    let document: serde_json::Value =
        serde_json::from_str(bundle).map_err(|e| AuthorizerError::InvalidBundle(e.to_string()))?;
    let object = document
        .as_object()
        .ok_or_else(|| AuthorizerError::InvalidBundle("expected an object".to_string()))?;
    object
        .get(field.as_str())
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AuthorizerError::MissingField(field.as_str().to_string()))
}

/// HMAC-SHA256 signature checks against one shared secret
pub struct SignatureVerifier {
    key: hmac::Key,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Signature a sender would attach to `body`
    pub fn sign(&self, body: &str) -> String {
        STANDARD.encode(hmac::sign(&self.key, body.as_bytes()).as_ref())
    }

    /// Constant-time check of a base64 signature
    pub fn verify(&self, body: &str, signature: &str) -> bool {
        match STANDARD.decode(signature.trim()) {
            Ok(tag) => hmac::verify(&self.key, body.as_bytes(), &tag).is_ok(),
            Err(_) => false,
        }
    }
}

/// Decide one request
pub fn authorize(request: &AuthorizerRequest, secret: Option<&str>) -> AuthorizerResponse {
    let deny = || AuthorizerResponse::new(Effect::Deny, &request.method_arn);

    let Some(signature) = request.header(SIGNATURE_HEADER).filter(|s| !s.is_empty()) else {
        debug!("Missing signature header");
        return deny();
    };
    let Some(body) = request.body.as_deref().filter(|b| !b.is_empty()) else {
        debug!("Missing request body");
        return deny();
    };
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        warn!("Authorizer has no shared secret");
        return deny();
    };

    if SignatureVerifier::new(secret).verify(body, signature) {
        AuthorizerResponse::new(Effect::Allow, &request.method_arn)
    } else {
        debug!(method_arn = %request.method_arn, "Signature mismatch");
        deny()
    }
}

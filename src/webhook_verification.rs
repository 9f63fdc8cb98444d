//! # Webhook Signature Verification
//!
//! HMAC-SHA256 verification for Stripe, Square and backend webhooks. Every
//! comparison is constant-time; signatures are checked against the raw body
//! before the payload is parsed.

use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::AppConfig;
use crate::events::Provider;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing signature")]
    MissingSignature { header: &'static str },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Timestamp outside tolerance: {seconds}s skew, max allowed: {max_seconds}s")]
    TimestampOutsideTolerance { seconds: u64, max_seconds: u64 },

    #[error("Webhook verification not configured for provider: {provider}")]
    NotConfigured { provider: Provider },
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    ///
    /// A provider without a configured secret is a server fault (500).
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::NotConfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> VerificationResult<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| VerificationError::VerificationFailed)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_matches(expected: &[u8], provided: &[u8]) -> bool {
    expected.ct_eq(provided).into()
}

/// Verifies a Stripe `t=<ts>,v1=<hex>[,v1=<hex>...]` signature.
///
/// The signed payload is `"{t}.{body}"`; any `v1` entry may match, which
/// covers secret rotation.
pub fn verify_stripe_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_seconds: u64,
    now_unix: i64,
) -> VerificationResult<()> {
    debug!(
        body_size = body.len(),
        tolerance_seconds, "Starting Stripe signature verification"
    );

    if signature_header.trim().is_empty() {
        return Err(VerificationError::MissingSignature {
            header: Provider::Stripe.signature_header(),
        });
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for pair in signature_header.split(',') {
        match pair.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| VerificationError::InvalidSignatureFormat {
        reason: "Stripe-Signature has no timestamp".to_string(),
    })?;
    let timestamp_secs =
        timestamp
            .parse::<i64>()
            .map_err(|_| VerificationError::InvalidSignatureFormat {
                reason: "Stripe-Signature timestamp is not a Unix timestamp".to_string(),
            })?;
    if candidates.is_empty() {
        return Err(VerificationError::InvalidSignatureFormat {
            reason: "Stripe-Signature has no v1 signature".to_string(),
        });
    }

    let skew = now_unix.abs_diff(timestamp_secs);
    if skew > tolerance_seconds {
        return Err(VerificationError::TimestampOutsideTolerance {
            seconds: skew,
            max_seconds: tolerance_seconds,
        });
    }

    let expected = hmac_sha256(secret.as_bytes(), &[timestamp.as_bytes(), b".", body])?;
    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|provided| constant_time_matches(&expected, &provided))
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies a Square signature: base64 HMAC over the notification URL followed by the body.
pub fn verify_square_signature(
    body: &[u8],
    signature_header: &str,
    signature_key: &str,
    notification_url: &str,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Starting Square signature verification");

    let signature_header = signature_header.trim();
    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: Provider::Square.signature_header(),
        });
    }

    let provided =
        BASE64
            .decode(signature_header)
            .map_err(|_| VerificationError::InvalidSignatureFormat {
                reason: "x-square-hmacsha256-signature is not valid base64".to_string(),
            })?;
    let expected = hmac_sha256(signature_key.as_bytes(), &[notification_url.as_bytes(), body])?;

    if constant_time_matches(&expected, &provided) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies a backend `sha256=<hex>` signature over the body.
pub fn verify_backend_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Starting backend signature verification");

    let signature_header = signature_header.trim();
    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: Provider::Backend.signature_header(),
        });
    }

    let expected_hex = signature_header.strip_prefix("sha256=").ok_or_else(|| {
        VerificationError::InvalidSignatureFormat {
            reason: "x-webhook-signature must start with 'sha256='".to_string(),
        }
    })?;
    let provided =
        hex::decode(expected_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
            reason: "x-webhook-signature contains invalid hex".to_string(),
        })?;
    let expected = hmac_sha256(secret.as_bytes(), &[body])?;

    if constant_time_matches(&expected, &provided) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies the webhook signature for the given provider using the configured secret.
pub fn verify_webhook_signature(
    provider: Provider,
    body: &[u8],
    headers: &HeaderMap,
    config: &AppConfig,
    now_unix: i64,
) -> VerificationResult<()> {
    let signature_header = headers
        .get(provider.signature_header())
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    // Report a missing header before a missing secret so callers see the same error either way
    if signature_header.trim().is_empty() {
        return Err(VerificationError::MissingSignature {
            header: provider.signature_header(),
        });
    }

    let not_configured = || VerificationError::NotConfigured { provider };

    match provider {
        Provider::Stripe => {
            let secret = config
                .webhook_stripe_secret
                .as_deref()
                .ok_or_else(not_configured)?;
            verify_stripe_signature(
                body,
                signature_header,
                secret,
                config.webhook_stripe_tolerance_seconds,
                now_unix,
            )
        }
        Provider::Square => {
            let key = config
                .webhook_square_signature_key
                .as_deref()
                .ok_or_else(not_configured)?;
            let url = config
                .webhook_square_notification_url
                .as_deref()
                .ok_or_else(not_configured)?;
            verify_square_signature(body, signature_header, key, url)
        }
        Provider::Backend => {
            let secret = config
                .webhook_backend_secret
                .as_deref()
                .ok_or_else(not_configured)?;
            verify_backend_signature(body, signature_header, secret)
        }
    }
}

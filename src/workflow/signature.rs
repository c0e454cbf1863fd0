//! GitHub webhook signature verification (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify `sha256=<hex>` against an HMAC of the raw request body.
/// A blank secret counts as unconfigured. The digest comparison is constant-time.
pub fn verify_signature(
    secret: Option<&str>,
    header: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookError> {
    let secret = secret
        .filter(|s| !s.trim().is_empty())
        .ok_or(WebhookError::SecretNotConfigured)?;
    let header = header.ok_or(WebhookError::MissingSignature)?;

    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(WebhookError::InvalidSignature)?;
    let expected = hex::decode(hex_digest).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SecretNotConfigured)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Compute the header value GitHub would send for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SecretNotConfigured)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"action":"created"}"#;

    #[test]
    fn test_valid_signature() {
        let header = sign("s3cret", BODY).unwrap();
        assert!(verify_signature(Some("s3cret"), Some(&header), BODY).is_ok());
    }

    #[test]
    fn test_known_vector() {
        // From GitHub's webhook validation docs.
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_signature(Some("It's a Secret to Everybody"), Some(header), b"Hello, World!").is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let header = sign("other", BODY).unwrap();
        assert!(matches!(
            verify_signature(Some("s3cret"), Some(&header), BODY),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_body() {
        let header = sign("s3cret", BODY).unwrap();
        assert!(matches!(
            verify_signature(Some("s3cret"), Some(&header), b"{}"),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_missing_secret_checked_first() {
        assert!(matches!(
            verify_signature(None, None, BODY),
            Err(WebhookError::SecretNotConfigured)
        ));
    }

    #[test]
    fn test_blank_secret_is_not_configured() {
        let header = sign("", BODY).unwrap();
        for secret in ["", "   "] {
            assert!(matches!(
                verify_signature(Some(secret), Some(&header), BODY),
                Err(WebhookError::SecretNotConfigured)
            ));
        }
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            verify_signature(Some("s3cret"), None, BODY),
            Err(WebhookError::MissingSignature)
        ));
    }

    #[test]
    fn test_malformed_header() {
        for header in ["sha1=abcd", "sha256=not-hex", "sha256="] {
            assert!(matches!(
                verify_signature(Some("s3cret"), Some(header), BODY),
                Err(WebhookError::InvalidSignature)
            ));
        }
    }
}

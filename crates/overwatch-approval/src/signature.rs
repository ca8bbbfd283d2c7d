//! Webhook body signing and constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// The header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Overwatch-Signature";

/// Hex HMAC-SHA256 of `body` under `secret`.
#[must_use]
pub fn sign_body(body: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// The full header value: `sha256=<lowercase-hex>`.
#[must_use]
pub fn signature_header(body: &str, secret: &str) -> String {
    format!("sha256={}", sign_body(body, secret))
}

/// Why verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    /// No signature header was provided.
    MissingSignature,
    /// No secret is configured on the verifying side.
    MissingSecret,
    /// The header is not `sha256=<hex>`.
    InvalidFormat,
    /// The digest does not match the body.
    Mismatch,
}

impl std::fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSignature => f.write_str("missing signature header"),
            Self::MissingSecret => f.write_str("missing secret"),
            Self::InvalidFormat => f.write_str("invalid signature format"),
            Self::Mismatch => f.write_str("signature mismatch"),
        }
    }
}

/// Detailed verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureCheck {
    /// Whether the signature is valid.
    pub valid: bool,
    /// Failure reason when invalid.
    pub reason: Option<SignatureFailure>,
}

/// Verify a signature header against a body and secret.
///
/// The digest comparison is constant time with respect to the signature
/// content: equal-length mismatches compare every byte. A length
/// mismatch is rejected outright.
#[must_use]
pub fn verify_signature(body: &str, header: Option<&str>, secret: Option<&str>) -> bool {
    verify_signature_detailed(body, header, secret).valid
}

/// Like [`verify_signature`], with the failure reason.
#[must_use]
pub fn verify_signature_detailed(
    body: &str,
    header: Option<&str>,
    secret: Option<&str>,
) -> SignatureCheck {
    let Some(header) = header else {
        return SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::MissingSignature),
        };
    };
    let Some(secret) = secret else {
        return SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::MissingSecret),
        };
    };
    let Some(provided) = header.strip_prefix("sha256=") else {
        return SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::InvalidFormat),
        };
    };
    if provided.is_empty() || !provided.chars().all(|c| c.is_ascii_hexdigit()) {
        return SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::InvalidFormat),
        };
    }

    let expected = sign_body(body, secret);
    let expected_bytes = expected.as_bytes();
    let provided_lower = provided.to_ascii_lowercase();
    let provided_bytes = provided_lower.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::Mismatch),
        };
    }

    if bool::from(expected_bytes.ct_eq(provided_bytes)) {
        SignatureCheck {
            valid: true,
            reason: None,
        }
    } else {
        SignatureCheck {
            valid: false,
            reason: Some(SignatureFailure::Mismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"approved":true}"#;
    const SECRET: &str = "test-secret";

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let header = signature_header(BODY, SECRET);
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(BODY, Some(&header), Some(SECRET)));
    }

    #[test]
    fn test_corrupt_byte_fails() {
        let header = signature_header(BODY, SECRET);
        // Flip one hex digit.
        let mut corrupted: Vec<char> = header.chars().collect();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == '0' { '1' } else { '0' };
        let corrupted: String = corrupted.into_iter().collect();

        assert!(!verify_signature(BODY, Some(&corrupted), Some(SECRET)));
    }

    #[test]
    fn test_different_body_fails() {
        let header = signature_header(BODY, SECRET);
        assert!(!verify_signature(r#"{"approved":false}"#, Some(&header), Some(SECRET)));
    }

    #[test]
    fn test_detailed_reasons() {
        assert_eq!(
            verify_signature_detailed(BODY, None, Some(SECRET)).reason,
            Some(SignatureFailure::MissingSignature)
        );
        assert_eq!(
            verify_signature_detailed(BODY, Some("sha256=abcd"), None).reason,
            Some(SignatureFailure::MissingSecret)
        );
        assert_eq!(
            verify_signature_detailed(BODY, Some("md5=abcd"), Some(SECRET)).reason,
            Some(SignatureFailure::InvalidFormat)
        );
        assert_eq!(
            verify_signature_detailed(BODY, Some("sha256=zzzz"), Some(SECRET)).reason,
            Some(SignatureFailure::InvalidFormat)
        );
        let wrong = format!("sha256={}", "ab".repeat(32));
        assert_eq!(
            verify_signature_detailed(BODY, Some(&wrong), Some(SECRET)).reason,
            Some(SignatureFailure::Mismatch)
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(!verify_signature(BODY, Some("sha256=abcd"), Some(SECRET)));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let header = signature_header(BODY, SECRET).to_ascii_uppercase();
        let header = header.replace("SHA256=", "sha256=");
        assert!(verify_signature(BODY, Some(&header), Some(SECRET)));
    }

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(sign_body(BODY, SECRET), sign_body(BODY, SECRET));
        assert_ne!(sign_body(BODY, SECRET), sign_body(BODY, "other-secret"));
    }
}

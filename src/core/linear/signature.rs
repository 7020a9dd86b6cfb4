use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase-hex HMAC-SHA256 of `body`, as Linear sends it in the
/// `linear-signature` header.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // Hmac accepts keys of any length; this arm is unreachable.
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification. Anything malformed is simply invalid.
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let provided = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if provided.len() != expected.len() {
        return false;
    }
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"type":"Issue","action":"create"}"#;
        let sig = sign("topsecret", body);
        assert!(verify("topsecret", body, &sig));
        // Leading/trailing whitespace in the header value is tolerated.
        assert!(verify("topsecret", body, &format!(" {sig} ")));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let body = b"payload";
        let sig = sign("topsecret", body);
        assert!(!verify("other", body, &sig));
        assert!(!verify("topsecret", b"tampered", &sig));
    }

    #[test]
    fn malformed_signatures_fail_closed() {
        let body = b"payload";
        assert!(!verify("topsecret", body, "not-hex"));
        assert!(!verify("topsecret", body, "abcd"));
        assert!(!verify("topsecret", body, ""));
    }
}

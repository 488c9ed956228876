//! Signature verification for inbound webhooks: HMAC-SHA1, HMAC-SHA256, and a
//! minimal OAuth1 request-signing helper for handlers whose provider signs
//! outbound calls rather than (or in addition to) inbound ones.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA1 of `body` under `secret`.
pub fn hmac_sha1_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the base64-encoded HMAC-SHA256 of `body` under `secret`, the form
/// used by e.g. the CRC-token challenge-response handshake.
pub fn hmac_sha256_base64(secret: &[u8], body: &[u8]) -> String {
    use base64::Engine;
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex-encoded HMAC-SHA1 signature.
pub fn verify_hmac_sha1_hex(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time verification of a hex-encoded HMAC-SHA256 signature,
/// tolerating a leading scheme prefix such as `sha256=`.
pub fn verify_hmac_sha256_hex(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let sig = signature_hex.strip_prefix("sha256=").unwrap_or(signature_hex);
    let Ok(expected) = hex::decode(sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Percent-encode per RFC 3986 (OAuth1 uses a stricter reserved set than the
/// plain `url` crate's default query encoding).
fn oauth1_percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Build the `Authorization: OAuth ...` header value for a signed request,
/// using HMAC-SHA1 per OAuth Core 1.0a.
#[allow(clippy::too_many_arguments)]
pub fn oauth1_authorization_header(
    method: &str,
    url: &str,
    consumer_key: &str,
    consumer_secret: &str,
    token: &str,
    token_secret: &str,
    nonce: &str,
    timestamp: &str,
) -> String {
    let mut params = vec![
        ("oauth_consumer_key", consumer_key.to_string()),
        ("oauth_nonce", nonce.to_string()),
        ("oauth_signature_method", "HMAC-SHA1".to_string()),
        ("oauth_timestamp", timestamp.to_string()),
        ("oauth_token", token.to_string()),
        ("oauth_version", "1.0".to_string()),
    ];
    params.sort_by(|a, b| a.0.cmp(b.0));

    let param_string = params
        .iter()
        .map(|(k, v)| format!("{k}={}", oauth1_percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        oauth1_percent_encode(url),
        oauth1_percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        oauth1_percent_encode(consumer_secret),
        oauth1_percent_encode(token_secret)
    );

    let signature = {
        use base64::Engine;
        let mut mac =
            Hmac::<Sha1>::new_from_slice(signing_key.as_bytes()).expect("any key length");
        mac.update(base_string.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    };

    let mut header_params = params;
    header_params.push(("oauth_signature", signature));
    header_params.sort_by(|a, b| a.0.cmp(b.0));

    let header_body = header_params
        .iter()
        .map(|(k, v)| format!(r#"{k}="{}""#, oauth1_percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {header_body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_hex_matches_verify() {
        let secret = b"super-secret-key";
        let body = b"the request body";
        let sig = hmac_sha256_hex(secret, body);
        assert!(verify_hmac_sha256_hex(secret, body, &sig));
        assert!(verify_hmac_sha256_hex(
            secret,
            body,
            &format!("sha256={sig}")
        ));
    }

    #[test]
    fn hmac_sha256_rejects_tampered_body() {
        let secret = b"super-secret-key";
        let sig = hmac_sha256_hex(secret, b"original");
        assert!(!verify_hmac_sha256_hex(secret, b"tampered", &sig));
    }

    #[test]
    fn hmac_sha1_roundtrip() {
        let secret = b"key";
        let body = b"body";
        let sig = hmac_sha1_hex(secret, body);
        assert!(verify_hmac_sha1_hex(secret, body, &sig));
    }

    #[test]
    fn crc_token_challenge_matches_known_vector() {
        // Matches S4: channel api_secret "apiSecret", crc_token "test token".
        let sig = hmac_sha256_base64(b"apiSecret", b"test token");
        assert_eq!(sig, "O5hJl2njQRIa4vsumZ+3oom9ECR5m3aQLRZkPoYelp0=");
    }

    #[test]
    fn oauth1_header_has_expected_shape() {
        let header = oauth1_authorization_header(
            "POST",
            "https://api.example.com/1.1/statuses/update.json",
            "consumer-key",
            "consumer-secret",
            "token",
            "token-secret",
            "nonce123",
            "1700000000",
        );
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature="));
        assert!(header.contains("oauth_consumer_key=\"consumer-key\""));
    }
}

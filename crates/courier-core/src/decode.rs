//! Generic, payload-shape-agnostic decoders the router hands to handlers.
//! Each decoder is capped so a malicious or buggy upstream cannot exhaust
//! memory decoding a single webhook body.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("request body exceeds {0} byte cap")]
    TooLarge(usize),
    #[error("failed to decode body: {0}")]
    Invalid(String),
}

/// Decode a `application/x-www-form-urlencoded` body into `T`.
pub fn decode_form<T: DeserializeOwned>(body: &[u8], cap_bytes: usize) -> Result<T, DecodeError> {
    if body.len() > cap_bytes {
        return Err(DecodeError::TooLarge(cap_bytes));
    }
    serde_urlencoded::from_bytes(body).map_err(|e| DecodeError::Invalid(e.to_string()))
}

/// Decode a JSON body into `T`.
pub fn decode_json<T: DeserializeOwned>(body: &[u8], cap_bytes: usize) -> Result<T, DecodeError> {
    if body.len() > cap_bytes {
        return Err(DecodeError::TooLarge(cap_bytes));
    }
    serde_json::from_slice(body).map_err(|e| DecodeError::Invalid(e.to_string()))
}

/// Decode an XML body into `T`.
pub fn decode_xml<T: DeserializeOwned>(body: &[u8], cap_bytes: usize) -> Result<T, DecodeError> {
    if body.len() > cap_bytes {
        return Err(DecodeError::TooLarge(cap_bytes));
    }
    quick_xml::de::from_reader(body).map_err(|e| DecodeError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Form {
        mobile: String,
        response: String,
    }

    #[test]
    fn decode_form_ok() {
        let body = b"mobile=254791541111&response=Hello";
        let form: Form = decode_form(body, 1024).unwrap();
        assert_eq!(form.mobile, "254791541111");
        assert_eq!(form.response, "Hello");
    }

    #[test]
    fn decode_form_rejects_oversize_body() {
        let body = vec![b'a'; 100];
        let result: Result<Form, _> = decode_form(&body, 10);
        assert!(matches!(result, Err(DecodeError::TooLarge(10))));
    }

    #[derive(Deserialize)]
    struct Status {
        message_id: String,
        status: String,
    }

    #[test]
    fn decode_json_ok() {
        let body = br#"{"message_id":"12345","status":"pending"}"#;
        let status: Status = decode_json(body, 1024).unwrap();
        assert_eq!(status.message_id, "12345");
        assert_eq!(status.status, "pending");
    }
}

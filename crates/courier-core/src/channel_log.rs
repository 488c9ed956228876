//! Accumulates HTTP traces and errors across one handler invocation, then
//! redacts secrets at serialize time so persisted logs never carry them.

use chrono::Utc;
use uuid::Uuid;

use crate::types::{ChannelLog, ChannelLogType, HttpTrace};

/// Minimum length a redaction value must have before it's applied — avoids
/// masking short, coincidentally-matching substrings (spec's "non-trivial
/// length guard of ~6 chars").
const MIN_REDACTION_LEN: usize = 6;

pub const REDACTION_MASK: &str = "****************************************";

pub struct ChannelLogRecorder {
    log: ChannelLog,
    redaction_values: Vec<String>,
    started_at: std::time::Instant,
}

impl ChannelLogRecorder {
    pub fn open(channel_uuid: Uuid, log_type: ChannelLogType, redaction_values: Vec<String>) -> Self {
        Self {
            log: ChannelLog {
                uuid: Uuid::new_v4(),
                channel_uuid,
                log_type,
                http_traces: Vec::new(),
                errors: Vec::new(),
                elapsed_ms: 0,
                created_on: Utc::now(),
            },
            redaction_values: redaction_values
                .into_iter()
                .filter(|v| v.len() >= MIN_REDACTION_LEN)
                .collect(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn record_http(&mut self, trace: HttpTrace) {
        self.log.http_traces.push(trace);
    }

    pub fn add_error(&mut self, err: impl Into<String>) {
        self.log.errors.push(err.into());
    }

    pub fn add_redaction_value(&mut self, value: impl Into<String>) {
        let value = value.into();
        if value.len() >= MIN_REDACTION_LEN {
            self.redaction_values.push(value);
        }
    }

    /// Finalize elapsed time and return the underlying log, redacted.
    pub fn close(mut self) -> ChannelLog {
        self.log.elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        redact_log(&mut self.log, &self.redaction_values);
        self.log
    }

    pub fn log_type(&self) -> ChannelLogType {
        self.log.log_type
    }
}

/// Replace every occurrence of every redaction value with a fixed mask
/// token, across every stringified field of the log. Operating on the
/// serialized form (rather than annotating individual struct fields) means
/// secrets embedded in JSON payloads or query strings are masked too.
fn redact_log(log: &mut ChannelLog, values: &[String]) {
    if values.is_empty() {
        return;
    }
    let mut serialized = serde_json::to_string(log).expect("ChannelLog always serializes");
    for value in values {
        if value.is_empty() {
            continue;
        }
        serialized = serialized.replace(value.as_str(), REDACTION_MASK);
        // Also cover the value as it would appear inside a JSON string
        // (escaped) and pre-encoded basic-auth form.
        if let Ok(escaped) = serde_json::to_string(value) {
            let escaped = escaped.trim_matches('"');
            if escaped != value {
                serialized = serialized.replace(escaped, REDACTION_MASK);
            }
        }
    }
    *log = serde_json::from_str(&serialized).expect("redaction preserves JSON shape");
}

/// Compute the base64 form of `user:pass`, the shape Basic-auth secrets take
/// once encoded into an `Authorization` header — handlers pass this through
/// `add_redaction_value` alongside the raw username/password.
pub fn basic_auth_token(user: &str, pass: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_secret_in_header_and_body() {
        let mut recorder = ChannelLogRecorder::open(
            Uuid::new_v4(),
            ChannelLogType::MsgSend,
            vec!["supersecrettoken".to_string()],
        );
        recorder.record_http(HttpTrace {
            method: "POST".into(),
            url: "https://example.com/send".into(),
            request_headers: vec![(
                "Authorization".into(),
                "Bearer supersecrettoken".into(),
            )],
            request_body: Some(r#"{"token":"supersecrettoken"}"#.into()),
            status_code: Some(200),
            response_headers: vec![],
            response_body: None,
            elapsed_ms: 10,
            error: None,
        });

        let log = recorder.close();
        let serialized = serde_json::to_string(&log).unwrap();
        assert!(!serialized.contains("supersecrettoken"));
        assert!(serialized.contains(REDACTION_MASK));
    }

    #[test]
    fn ignores_short_redaction_values() {
        let mut recorder =
            ChannelLogRecorder::open(Uuid::new_v4(), ChannelLogType::MsgSend, vec!["ab".into()]);
        recorder.record_http(HttpTrace {
            method: "GET".into(),
            url: "https://example.com/ab".into(),
            request_headers: vec![],
            request_body: None,
            status_code: Some(200),
            response_headers: vec![],
            response_body: None,
            elapsed_ms: 1,
            error: None,
        });
        let log = recorder.close();
        // "ab" is too short to redact, so the URL survives untouched.
        assert!(log.http_traces[0].url.contains("ab"));
    }

    #[test]
    fn basic_auth_token_matches_known_vector() {
        assert_eq!(basic_auth_token("user1", "pass1"), "dXNlcjE6cGFzczE=");
    }
}

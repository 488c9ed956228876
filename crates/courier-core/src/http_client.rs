//! Wraps `reqwest` to add a default timeout, a capped response body reader,
//! and automatic recording into the current `ChannelLogRecorder`. Handlers
//! that need a non-default transport (OAuth1 signing, mTLS) build their own
//! `reqwest::Client` and use [`request_http_with_client`] so the wrapper
//! still records the call.

use std::time::{Duration, Instant};

use reqwest::{Client, Method, Request};
use thiserror::Error;

use crate::channel_log::ChannelLogRecorder;
use crate::types::HttpTrace;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RESPONSE_CAP_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("response exceeded {0} byte cap")]
    ResponseTooLarge(usize),
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    response_cap_bytes: usize,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("default TLS backend is always available"),
            response_cap_bytes: DEFAULT_RESPONSE_CAP_BYTES,
        }
    }

    pub fn with_response_cap(mut self, cap_bytes: usize) -> Self {
        self.response_cap_bytes = cap_bytes;
        self
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute `req` using the wrapper's own client, recording the call into
    /// `log`.
    pub async fn request_http(
        &self,
        req: Request,
        log: &mut ChannelLogRecorder,
    ) -> Result<HttpResponse, HttpClientError> {
        request_http_with_client(&self.client, req, self.response_cap_bytes, log).await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Execute `req` using an explicitly provided client (e.g. one configured
/// with a per-request OAuth1 signer), recording into `log` regardless.
pub async fn request_http_with_client(
    client: &Client,
    req: Request,
    response_cap_bytes: usize,
    log: &mut ChannelLogRecorder,
) -> Result<HttpResponse, HttpClientError> {
    let method = req.method().clone();
    let url = req.url().to_string();
    let request_headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("<binary>").to_string()))
        .collect();
    let request_body = req
        .body()
        .and_then(|b| b.as_bytes())
        .map(|b| String::from_utf8_lossy(b).into_owned());

    let started = Instant::now();
    let result = client.execute(req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let response_headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("<binary>").to_string()))
                .collect();

            let body = match read_capped(resp, response_cap_bytes).await {
                Ok(b) => b,
                Err(e) => {
                    log.record_http(HttpTrace {
                        method: method.to_string(),
                        url: url.clone(),
                        request_headers,
                        request_body,
                        status_code: Some(status),
                        response_headers,
                        response_body: None,
                        elapsed_ms,
                        error: Some(e.to_string()),
                    });
                    return Err(e);
                }
            };

            log.record_http(HttpTrace {
                method: method.to_string(),
                url,
                request_headers,
                request_body,
                status_code: Some(status),
                response_headers: response_headers.clone(),
                response_body: Some(String::from_utf8_lossy(&body).into_owned()),
                elapsed_ms,
                error: None,
            });

            Ok(HttpResponse {
                status,
                headers: response_headers,
                body,
            })
        }
        Err(e) => {
            log.record_http(HttpTrace {
                method: method.to_string(),
                url,
                request_headers,
                request_body,
                status_code: None,
                response_headers: vec![],
                response_body: None,
                elapsed_ms,
                error: Some(e.to_string()),
            });
            Err(HttpClientError::Transport(e.to_string()))
        }
    }
}

async fn read_capped(
    resp: reqwest::Response,
    cap_bytes: usize,
) -> Result<Vec<u8>, HttpClientError> {
    use futures::StreamExt;

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HttpClientError::Transport(e.to_string()))?;
        if buf.len() + chunk.len() > cap_bytes {
            return Err(HttpClientError::ResponseTooLarge(cap_bytes));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Build a request targeting `method`/`url`, used as the common
/// starting point before a handler attaches headers/body.
pub fn build_request(client: &Client, method: Method, url: &str) -> reqwest::RequestBuilder {
    client.request(method, url)
}

//! Process-wide server state shared by the inbound router and the outbound
//! dispatcher: the registered handlers, the backend collaborator, and the
//! HTTP client every handler send goes through.

use std::sync::Arc;

use courier_channels::HandlerRegistry;
use courier_core::backend::Backend;
use courier_core::config::Config;
use courier_core::http_client::HttpClient;

pub struct ServerState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn Backend>,
    pub handlers: Arc<HandlerRegistry>,
    pub http: HttpClient,
}

impl ServerState {
    pub fn new(config: Arc<Config>, backend: Arc<dyn Backend>, handlers: HandlerRegistry) -> Self {
        let http = HttpClient::with_timeout(std::time::Duration::from_secs(
            config.server.http_timeout_secs,
        ));
        Self {
            config,
            backend,
            handlers: Arc::new(handlers),
            http,
        }
    }

    pub fn handler_ctx(&self) -> courier_channels::HandlerCtx {
        courier_channels::HandlerCtx {
            http: self.http.clone(),
            backend: self.backend.clone(),
            callback_domain: self.config.server.domain.clone(),
            secrets: self.config.secrets.clone(),
        }
    }
}

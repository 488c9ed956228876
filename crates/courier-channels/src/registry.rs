//! Process-wide mapping from channel-type tag to handler, populated once
//! during initialization and read-only thereafter (spec §4.2).

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::Handler;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.channel_type().to_string(), handler);
    }

    pub fn get(&self, channel_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(channel_type).cloned()
    }

    /// `(type, human-readable name)` pairs, for diagnostics and the channel
    /// catalog.
    pub fn list(&self) -> Vec<(String, &'static str)> {
        self.handlers
            .values()
            .map(|h| (h.channel_type().to_string(), h.name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluesms::BlueSmsHandler;

    #[test]
    fn register_and_lookup_round_trip() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(BlueSmsHandler::new()));

        let found = registry.get("bs").unwrap();
        assert_eq!(found.channel_type(), "bs");
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.list().len(), 1);
    }
}

//! Handlers for `# @key: value` metadata directives

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

/// Work to do once a request has been dispatched
#[derive(Debug, Clone, PartialEq)]
pub enum PostSendAction {
    Sleep(Duration),
}

type DirectiveHandler = fn(&str) -> Result<Option<PostSendAction>, String>;

/// Maps directive names to their handlers
pub struct DirectiveRegistry {
    handlers: HashMap<&'static str, DirectiveHandler>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register("delay", delay_directive);
        registry
    }

    pub fn register(&mut self, name: &'static str, handler: DirectiveHandler) {
        self.handlers.insert(name, handler);
    }

    /// Turn request metadata into post-send actions.
    ///
    /// Invalid values are logged and skipped; unknown directives are ignored.
    pub fn actions(&self, meta: &HashMap<String, String>) -> Vec<PostSendAction> {
        let mut keys: Vec<&String> = meta.keys().collect();
        keys.sort();

        let mut actions = Vec::new();
        for key in keys {
            let value = &meta[key];
            let Some(handler) = self.handlers.get(key.as_str()) else {
                debug!("Ignoring unknown directive @{}", key);
                continue;
            };
            match handler(value) {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => {}
                Err(e) => warn!("Invalid {} value in meta: {} ({})", key, value, e),
            }
        }
        actions
    }
}

impl Default for DirectiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn delay_directive(value: &str) -> Result<Option<PostSendAction>, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| "expected a number of seconds".to_string())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err("expected a non-negative number of seconds".to_string());
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    let delay = Duration::try_from_secs_f64(seconds).map_err(|e| e.to_string())?;
    Ok(Some(PostSendAction::Sleep(delay)))
}

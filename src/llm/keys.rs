//! API key pool shared by the agents.
//!
//! Each agent is bound to one key, handed out round-robin the first time the
//! agent calls. A key that is rate limited or rejected moves only that agent on
//! to the next key in the pool.

use std::collections::HashMap;

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Slot used by requests that carry no agent name.
const SHARED_SLOT: &str = "shared";

pub struct KeyPool {
    keys: Vec<SecretString>,
    state: Mutex<Assignments>,
}

#[derive(Default)]
struct Assignments {
    by_agent: HashMap<String, usize>,
    next: usize,
}

impl KeyPool {
    /// `None` when `keys` is empty.
    pub fn new(keys: Vec<SecretString>) -> Option<Self> {
        if keys.is_empty() {
            return None;
        }
        info!(keys = keys.len(), "Loaded API keys");
        Some(Self {
            keys,
            state: Mutex::new(Assignments::default()),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key index bound to `agent`, and the key itself.
    pub async fn key_for(&self, agent: Option<&str>) -> (usize, SecretString) {
        let agent = agent.unwrap_or(SHARED_SLOT);
        let mut state = self.state.lock().await;
        let index = match state.by_agent.get(agent) {
            Some(index) => *index,
            None => {
                let index = state.next % self.keys.len();
                state.next += 1;
                state.by_agent.insert(agent.to_string(), index);
                index
            }
        };
        (index, self.keys[index].clone())
    }

    /// Move `agent` off key `failed` onto the next one. Returns the new index.
    ///
    /// A no-op when a concurrent call already moved the agent on.
    pub async fn rotate(&self, agent: Option<&str>, failed: usize) -> usize {
        let agent = agent.unwrap_or(SHARED_SLOT);
        let mut state = self.state.lock().await;
        let len = self.keys.len();
        let current = state.by_agent.entry(agent.to_string()).or_insert(failed);
        if *current == failed && len > 1 {
            *current = (failed + 1) % len;
            warn!(agent, from_key = failed + 1, to_key = *current + 1, "Rotating API key");
        }
        *current
    }
}

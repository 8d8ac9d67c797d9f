//! Live subscriber counts per channel.

use std::collections::HashMap;

/// Counts open connections per channel.
///
/// Only the broadcast hub drives this, with exactly one connect and one
/// disconnect per connection lifetime. The floor at zero covers a double
/// disconnect anyway.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    counts: HashMap<String, u64>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection on `channel`; returns the new count.
    pub fn on_connect(&mut self, channel: &str) -> u64 {
        let count = self.counts.entry(channel.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Remove a connection from `channel`; returns the new count, never below zero.
    pub fn on_disconnect(&mut self, channel: &str) -> u64 {
        match self.counts.get_mut(channel) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let now = *count;
                if now == 0 {
                    self.counts.remove(channel);
                }
                now
            }
            None => 0,
        }
    }

    pub fn count(&self, channel: &str) -> u64 {
        self.counts.get(channel).copied().unwrap_or(0)
    }
}

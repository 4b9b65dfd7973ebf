//! Liveness sweeper
//!
//! Evicts remote participants that stopped reporting, covering `player_left`
//! events that never arrived. Pending ids are not considered.

use std::time::{Duration, Instant};

use tracing::info;

use crate::client::collaborators::{PresenceSink, Visuals};
use crate::client::shadow::ShadowStore;
use crate::protocol::types::ParticipantId;

#[derive(Debug, Clone, Copy)]
pub struct LivenessSweeper {
    period: Duration,
    timeout: Duration,
}

impl LivenessSweeper {
    pub fn new(period: Duration, timeout: Duration) -> Self {
        Self { period, timeout }
    }

    /// How often the sweep should run
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Remove every shadow idle for longer than the timeout
    pub fn sweep<V, S>(&self, store: &mut ShadowStore<V>, now: Instant, sink: &mut S) -> Vec<ParticipantId>
    where
        V: Visuals,
        S: PresenceSink<V::Handle>,
    {
        let expired = store.expired(now, self.timeout);
        for id in &expired {
            info!(participant = %id, "Removed for idleness");
            store.remove(id, sink);
        }
        expired
    }
}

impl Default for LivenessSweeper {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }
}

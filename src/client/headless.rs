//! Headless collaborators
//!
//! Stand-ins for the rendering, input and UI layers so a client can run as a
//! bot: participants are "instantiated" after a short delay, the local
//! participant wanders around the origin, and presence changes are logged.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace};

use crate::client::collaborators::{MovementSource, PresenceSink, Visuals};
use crate::client::shadow::ShadowParticipant;
use crate::protocol::types::{ParticipantId, Pose};

/// Name of the host participant, whose representation starts hidden
const HOST_NAME: &str = "Server";

/// Label standing in for a scene object
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessHandle {
    pub label: String,
    pub visible: bool,
}

/// Visuals that simulate slow asset loading
#[derive(Debug, Clone)]
pub struct HeadlessVisuals {
    load_delay: Duration,
}

impl HeadlessVisuals {
    pub fn new(load_delay: Duration) -> Self {
        Self { load_delay }
    }
}

impl Default for HeadlessVisuals {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl Visuals for HeadlessVisuals {
    type Handle = HeadlessHandle;

    async fn instantiate(&self, name: &str) -> anyhow::Result<HeadlessHandle> {
        tokio::time::sleep(self.load_delay).await;
        Ok(HeadlessHandle {
            label: name.to_string(),
            visible: name != HOST_NAME,
        })
    }

    fn release(&self, handle: HeadlessHandle) {
        debug!(label = %handle.label, "Released representation");
    }
}

/// Sink that logs every presence change
#[derive(Debug, Default)]
pub struct LoggingSink {
    visible: usize,
}

impl LoggingSink {
    /// Number of participants currently shown
    pub fn visible(&self) -> usize {
        self.visible
    }
}

impl PresenceSink<HeadlessHandle> for LoggingSink {
    fn player_appeared(&mut self, participant: &ShadowParticipant<HeadlessHandle>) {
        self.visible += 1;
        info!(
            participant = %participant.id,
            name = %participant.name,
            contact = %participant.contact,
            visible = participant.handle().visible,
            "Player appeared"
        );
    }

    fn player_moved(&mut self, id: &ParticipantId, pose: Pose) {
        trace!(participant = %id, x = pose.x, y = pose.y, angle = pose.angle, "Player moved");
    }

    fn player_left(&mut self, id: &ParticipantId) {
        self.visible = self.visible.saturating_sub(1);
        info!(participant = %id, "Player left");
    }
}

/// Random walk that alternates between walking and standing still
pub struct WanderingMovement {
    rng: StdRng,
    pose: Pose,
    speed: f64,
    radius: f64,
    walking: bool,
    phase_left: Duration,
}

impl WanderingMovement {
    pub fn new(speed: f64, radius: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), speed, radius)
    }

    /// Deterministic walk for a given seed
    pub fn seeded(seed: u64, speed: f64, radius: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), speed, radius)
    }

    fn with_rng(rng: StdRng, speed: f64, radius: f64) -> Self {
        Self {
            rng,
            pose: Pose::origin(),
            speed,
            radius,
            walking: true,
            phase_left: Duration::from_secs(2),
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    fn next_phase(&mut self) {
        self.walking = !self.walking;
        self.phase_left = Duration::from_millis(self.rng.gen_range(500..3000));
    }
}

impl Default for WanderingMovement {
    fn default() -> Self {
        Self::new(2.0, 20.0)
    }
}

impl MovementSource for WanderingMovement {
    fn sample(&mut self, elapsed: Duration) -> Option<Pose> {
        match self.phase_left.checked_sub(elapsed) {
            Some(left) if !left.is_zero() => self.phase_left = left,
            _ => self.next_phase(),
        }

        if !self.walking {
            return None;
        }

        let dt = elapsed.as_secs_f64();
        self.pose.angle += self.rng.gen_range(-1.0..1.0) * dt;

        let x = self.pose.x + self.pose.angle.cos() * self.speed * dt;
        let y = self.pose.y - self.pose.angle.sin() * self.speed * dt;
        if (x * x + y * y).sqrt() > self.radius {
            // Turn around at the edge instead of stepping out
            self.pose.angle += std::f64::consts::PI;
        } else {
            self.pose.x = x;
            self.pose.y = y;
        }

        Some(self.pose)
    }
}

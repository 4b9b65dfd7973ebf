//! Client shadow store
//!
//! Client-local copies of remote participants and their visual handles.
//! Each remote id moves through an explicit lifecycle:
//!
//! ```text
//! Absent --first update--> Pending --instantiated--> Present --remove--> Absent
//! ```
//!
//! While an id is `Pending` its representation is being instantiated
//! asynchronously; further updates for it are dropped, and the shadow is
//! created from the first update once instantiation completes. A failed
//! instantiation leaves the id `Pending` for good.
//!
//! A `remove` for a pending id cancels it: the id stays `Pending` until the
//! instantiation finishes, and the finished handle is then released without
//! the participant ever appearing. An update arriving before that revives it.
//!
//! The store is single-owner and synchronous. Instantiation is started by
//! the caller from the returned [`ApplyOutcome::Instantiate`] request and
//! finished with [`ShadowStore::complete_instantiation`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::client::collaborators::{PresenceSink, Visuals};
use crate::protocol::types::{ParticipantId, ParticipantUpdate, Pose};

/// A remote participant with its visual handle
#[derive(Debug)]
pub struct ShadowParticipant<H> {
    pub id: ParticipantId,
    pub name: String,
    pub contact: String,
    pub pose: Pose,
    /// Time of the most recently applied update
    pub last_seen: Instant,
    handle: H,
}

impl<H> ShadowParticipant<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Time since the last applied update
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Identity captured from the update that triggered instantiation
#[derive(Debug, Clone)]
struct PendingShadow {
    name: String,
    contact: String,
    pose: Pose,
    requested_at: Instant,
    /// Left before instantiation finished
    cancelled: bool,
}

enum Slot<H> {
    Pending(PendingShadow),
    Present(ShadowParticipant<H>),
}

/// Where an id is in its client-side lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Absent,
    Pending,
    Present,
}

/// Request to instantiate a participant's representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiateRequest {
    pub id: ParticipantId,
    pub name: String,
}

/// What applying an update did
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update was about the local participant
    SelfEcho,
    /// First sighting: the caller must instantiate and then complete
    Instantiate(InstantiateRequest),
    /// A present shadow was moved
    Moved,
    /// Instantiation already in flight; update dropped
    DroppedWhilePending,
}

/// Mapping from remote participant id to shadow state
pub struct ShadowStore<V: Visuals> {
    local_id: ParticipantId,
    entries: HashMap<ParticipantId, Slot<V::Handle>>,
    visuals: Arc<V>,
}

impl<V: Visuals> ShadowStore<V> {
    pub fn new(local_id: ParticipantId, visuals: Arc<V>) -> Self {
        Self {
            local_id,
            entries: HashMap::new(),
            visuals,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Rendering collaborator used to release handles
    pub fn visuals(&self) -> Arc<V> {
        self.visuals.clone()
    }

    /// Reconcile one remote update
    pub fn apply_update<S>(&mut self, update: ParticipantUpdate, now: Instant, sink: &mut S) -> ApplyOutcome
    where
        S: PresenceSink<V::Handle>,
    {
        if update.id == self.local_id {
            trace!(participant = %update.id, "Skipping update about self");
            return ApplyOutcome::SelfEcho;
        }

        match self.entries.get_mut(&update.id) {
            Some(Slot::Present(shadow)) => {
                shadow.pose = update.pose;
                shadow.last_seen = now;
                sink.player_moved(&shadow.id, shadow.pose);
                ApplyOutcome::Moved
            }
            Some(Slot::Pending(pending)) => {
                if pending.cancelled {
                    debug!(participant = %update.id, "Participant returned while loading");
                    pending.cancelled = false;
                    pending.pose = update.pose;
                } else {
                    trace!(participant = %update.id, "Update dropped while instantiation in flight");
                }
                ApplyOutcome::DroppedWhilePending
            }
            None => {
                debug!(participant = %update.id, name = %update.name, "Loading participant");
                let request = InstantiateRequest {
                    id: update.id.clone(),
                    name: update.name.clone(),
                };
                self.entries.insert(
                    update.id,
                    Slot::Pending(PendingShadow {
                        name: update.name,
                        contact: update.contact,
                        pose: update.pose,
                        requested_at: now,
                        cancelled: false,
                    }),
                );
                ApplyOutcome::Instantiate(request)
            }
        }
    }

    /// Finish an instantiation started from [`ApplyOutcome::Instantiate`]
    ///
    /// Returns `true` if a shadow was created. On failure the error is
    /// reported to the sink and the id stays pending, unless it was
    /// cancelled, in which case it becomes absent.
    pub fn complete_instantiation<S>(
        &mut self,
        id: ParticipantId,
        result: anyhow::Result<V::Handle>,
        now: Instant,
        sink: &mut S,
    ) -> bool
    where
        S: PresenceSink<V::Handle>,
    {
        let handle = match result {
            Ok(handle) => handle,
            Err(error) => {
                sink.instantiation_failed(&id, &error);
                if matches!(self.entries.get(&id), Some(Slot::Pending(pending)) if pending.cancelled) {
                    self.entries.remove(&id);
                }
                return false;
            }
        };

        let pending = match self.entries.remove(&id) {
            Some(Slot::Pending(pending)) if pending.cancelled => {
                debug!(participant = %id, "Discarding instantiation for participant that left");
                self.visuals.release(handle);
                return false;
            }
            Some(Slot::Pending(pending)) => pending,
            Some(present @ Slot::Present(_)) => {
                self.entries.insert(id.clone(), present);
                debug!(participant = %id, "Duplicate instantiation released");
                self.visuals.release(handle);
                return false;
            }
            None => {
                debug!(participant = %id, "Instantiation finished for unknown participant");
                self.visuals.release(handle);
                return false;
            }
        };

        let shadow = ShadowParticipant {
            id: id.clone(),
            name: pending.name,
            contact: pending.contact,
            pose: pending.pose,
            last_seen: now,
            handle,
        };
        info!(
            participant = %id,
            name = %shadow.name,
            load_time = ?now.saturating_duration_since(pending.requested_at),
            "Participant appeared"
        );
        sink.player_appeared(&shadow);
        self.entries.insert(id, Slot::Present(shadow));
        true
    }

    /// Remove a present shadow, releasing its handle
    ///
    /// Returns `true` only if a present shadow was removed. A pending id is
    /// cancelled instead; the local id and absent ids are ignored.
    pub fn remove<S>(&mut self, id: &ParticipantId, sink: &mut S) -> bool
    where
        S: PresenceSink<V::Handle>,
    {
        if *id == self.local_id {
            return false;
        }

        match self.entries.get_mut(id) {
            Some(Slot::Present(_)) => {}
            Some(Slot::Pending(pending)) => {
                debug!(participant = %id, "Player left while loading, cancelling");
                pending.cancelled = true;
                return false;
            }
            None => {
                debug!(participant = %id, "Player left that was never seen");
                return false;
            }
        }

        let Some(Slot::Present(shadow)) = self.entries.remove(id) else {
            return false;
        };
        self.visuals.release(shadow.handle);
        sink.player_left(id);
        info!(participant = %id, "Participant removed");
        true
    }

    /// Present shadows silent for longer than `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<ParticipantId> {
        self.present()
            .filter(|shadow| shadow.id != self.local_id && shadow.idle(now) > timeout)
            .map(|shadow| shadow.id.clone())
            .collect()
    }

    pub fn lifecycle(&self, id: &ParticipantId) -> Lifecycle {
        match self.entries.get(id) {
            None => Lifecycle::Absent,
            Some(Slot::Pending(_)) => Lifecycle::Pending,
            Some(Slot::Present(_)) => Lifecycle::Present,
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&ShadowParticipant<V::Handle>> {
        match self.entries.get(id) {
            Some(Slot::Present(shadow)) => Some(shadow),
            _ => None,
        }
    }

    /// All present shadows
    pub fn present(&self) -> impl Iterator<Item = &ShadowParticipant<V::Handle>> {
        self.entries.values().filter_map(|slot| match slot {
            Slot::Present(shadow) => Some(shadow),
            Slot::Pending(_) => None,
        })
    }

    pub fn present_count(&self) -> usize {
        self.present().count()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }
}

impl<V: Visuals> Drop for ShadowStore<V> {
    fn drop(&mut self) {
        for (_, slot) in self.entries.drain() {
            if let Slot::Present(shadow) = slot {
                self.visuals.release(shadow.handle);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Visuals that hand out numbered handles and record releases
    #[derive(Default)]
    pub(crate) struct CountingVisuals {
        pub released: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Visuals for CountingVisuals {
        type Handle = u32;

        async fn instantiate(&self, name: &str) -> anyhow::Result<u32> {
            Ok(name.len() as u32)
        }

        fn release(&self, handle: u32) {
            self.released.lock().push(handle);
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Appeared(String),
        Moved(String, Pose),
        Left(String),
        Failed(String),
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Vec<Event>,
    }

    impl PresenceSink<u32> for RecordingSink {
        fn player_appeared(&mut self, participant: &ShadowParticipant<u32>) {
            self.events.push(Event::Appeared(participant.id.to_string()));
        }

        fn player_moved(&mut self, id: &ParticipantId, pose: Pose) {
            self.events.push(Event::Moved(id.to_string(), pose));
        }

        fn player_left(&mut self, id: &ParticipantId) {
            self.events.push(Event::Left(id.to_string()));
        }

        fn instantiation_failed(&mut self, id: &ParticipantId, _error: &anyhow::Error) {
            self.events.push(Event::Failed(id.to_string()));
        }
    }

    pub(crate) fn update(id: &str, name: &str, x: f64) -> ParticipantUpdate {
        ParticipantUpdate {
            id: ParticipantId::new(id),
            pose: Pose::new(x, 0.0, 0.0),
            name: name.to_string(),
            contact: format!("https://example.org/{}", id),
        }
    }

    pub(crate) fn store() -> ShadowStore<CountingVisuals> {
        ShadowStore::new(ParticipantId::new("me"), Arc::new(CountingVisuals::default()))
    }

    /// Bring `id` to Present through the normal lifecycle
    pub(crate) fn make_present(
        store: &mut ShadowStore<CountingVisuals>,
        sink: &mut RecordingSink,
        id: &str,
        now: Instant,
    ) {
        let outcome = store.apply_update(update(id, id, 0.0), now, sink);
        assert!(matches!(outcome, ApplyOutcome::Instantiate(_)));
        assert!(store.complete_instantiation(ParticipantId::new(id), Ok(7), now, sink));
    }

    #[test]
    fn test_self_update_is_discarded() {
        let mut store = store();
        let mut sink = RecordingSink::default();

        let outcome = store.apply_update(update("me", "Me", 1.0), Instant::now(), &mut sink);
        assert_eq!(outcome, ApplyOutcome::SelfEcho);
        assert_eq!(store.lifecycle(&ParticipantId::new("me")), Lifecycle::Absent);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_first_update_marks_pending() {
        let mut store = store();
        let mut sink = RecordingSink::default();

        let outcome = store.apply_update(update("b", "Bob", 1.0), Instant::now(), &mut sink);
        assert_eq!(
            outcome,
            ApplyOutcome::Instantiate(InstantiateRequest {
                id: ParticipantId::new("b"),
                name: "Bob".to_string(),
            })
        );
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Pending);
        assert_eq!(store.pending_count(), 1);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_update_while_pending_is_dropped() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        let second = store.apply_update(update("b", "Robert", 5.0), now, &mut sink);
        assert_eq!(second, ApplyOutcome::DroppedWhilePending);

        assert!(store.complete_instantiation(ParticipantId::new("b"), Ok(3), now, &mut sink));
        let shadow = store.get(&ParticipantId::new("b")).unwrap();
        // Identity and pose come from the first update only
        assert_eq!(shadow.name, "Bob");
        assert_eq!(shadow.pose.x, 1.0);
        assert_eq!(*shadow.handle(), 3);
        assert_eq!(sink.events, vec![Event::Appeared("b".to_string())]);
    }

    #[test]
    fn test_known_update_moves_and_touches() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let start = Instant::now();
        make_present(&mut store, &mut sink, "b", start);

        let later = start + Duration::from_secs(2);
        let outcome = store.apply_update(update("b", "b", 4.0), later, &mut sink);
        assert_eq!(outcome, ApplyOutcome::Moved);

        let shadow = store.get(&ParticipantId::new("b")).unwrap();
        assert_eq!(shadow.pose, Pose::new(4.0, 0.0, 0.0));
        assert_eq!(shadow.last_seen, later);
        assert_eq!(
            sink.events.last(),
            Some(&Event::Moved("b".to_string(), Pose::new(4.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn test_instantiation_failure_stays_pending() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        let created = store.complete_instantiation(
            ParticipantId::new("b"),
            Err(anyhow::anyhow!("asset missing")),
            now,
            &mut sink,
        );

        assert!(!created);
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Pending);
        assert_eq!(sink.events, vec![Event::Failed("b".to_string())]);

        // Never retried
        let again = store.apply_update(update("b", "Bob", 2.0), now, &mut sink);
        assert_eq!(again, ApplyOutcome::DroppedWhilePending);
    }

    #[test]
    fn test_remove_releases_handle() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        make_present(&mut store, &mut sink, "b", Instant::now());

        assert!(store.remove(&ParticipantId::new("b"), &mut sink));
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Absent);
        assert_eq!(*store.visuals().released.lock(), vec![7]);
        assert_eq!(sink.events.last(), Some(&Event::Left("b".to_string())));
    }

    #[test]
    fn test_remove_twice_is_safe() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        make_present(&mut store, &mut sink, "b", Instant::now());

        assert!(store.remove(&ParticipantId::new("b"), &mut sink));
        assert!(!store.remove(&ParticipantId::new("b"), &mut sink));

        let lefts = sink.events.iter().filter(|e| matches!(e, Event::Left(_))).count();
        assert_eq!(lefts, 1);
        assert_eq!(store.visuals().released.lock().len(), 1);
    }

    #[test]
    fn test_remove_self_is_noop_and_pending_waits() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let _ = store.apply_update(update("b", "Bob", 1.0), Instant::now(), &mut sink);

        assert!(!store.remove(&ParticipantId::new("me"), &mut sink));
        assert!(!store.remove(&ParticipantId::new("b"), &mut sink));
        // Still in flight until the instantiation reports back
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Pending);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_leave_while_pending_discards_instantiation() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();
        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        assert!(!store.remove(&ParticipantId::new("b"), &mut sink));

        assert!(!store.complete_instantiation(ParticipantId::new("b"), Ok(5), now, &mut sink));
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Absent);
        assert_eq!(*store.visuals().released.lock(), vec![5]);
        assert!(sink.events.is_empty());

        // A later sighting starts over
        let again = store.apply_update(update("b", "Bob", 2.0), now, &mut sink);
        assert!(matches!(again, ApplyOutcome::Instantiate(_)));
    }

    #[test]
    fn test_update_after_leave_while_pending_revives() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();
        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        assert!(!store.remove(&ParticipantId::new("b"), &mut sink));

        let back = store.apply_update(update("b", "Bob", 3.0), now, &mut sink);
        assert_eq!(back, ApplyOutcome::DroppedWhilePending);

        assert!(store.complete_instantiation(ParticipantId::new("b"), Ok(5), now, &mut sink));
        let shadow = store.get(&ParticipantId::new("b")).unwrap();
        assert_eq!(shadow.pose, Pose::new(3.0, 0.0, 0.0));
        assert_eq!(sink.events, vec![Event::Appeared("b".to_string())]);
    }

    #[test]
    fn test_failed_instantiation_after_leave_becomes_absent() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();
        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        assert!(!store.remove(&ParticipantId::new("b"), &mut sink));

        let created = store.complete_instantiation(
            ParticipantId::new("b"),
            Err(anyhow::anyhow!("asset missing")),
            now,
            &mut sink,
        );
        assert!(!created);
        assert_eq!(store.lifecycle(&ParticipantId::new("b")), Lifecycle::Absent);
        assert_eq!(sink.events, vec![Event::Failed("b".to_string())]);
    }

    #[test]
    fn test_late_instantiation_after_present_is_released() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();
        make_present(&mut store, &mut sink, "b", now);

        assert!(!store.complete_instantiation(ParticipantId::new("b"), Ok(99), now, &mut sink));
        assert_eq!(*store.visuals().released.lock(), vec![99]);
        assert_eq!(*store.get(&ParticipantId::new("b")).unwrap().handle(), 7);
    }

    #[test]
    fn test_concurrent_distinct_instantiations() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let now = Instant::now();

        let _ = store.apply_update(update("b", "Bob", 1.0), now, &mut sink);
        let _ = store.apply_update(update("c", "Carol", 1.0), now, &mut sink);
        assert_eq!(store.pending_count(), 2);

        // Completions may arrive in any order
        assert!(store.complete_instantiation(ParticipantId::new("c"), Ok(1), now, &mut sink));
        assert!(store.complete_instantiation(ParticipantId::new("b"), Ok(2), now, &mut sink));
        assert_eq!(store.present_count(), 2);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_expired_lists_only_silent_present() {
        let mut store = store();
        let mut sink = RecordingSink::default();
        let start = Instant::now();
        make_present(&mut store, &mut sink, "b", start);
        make_present(&mut store, &mut sink, "c", start);
        let _ = store.apply_update(update("d", "Dave", 0.0), start, &mut sink);

        let later = start + Duration::from_secs(6);
        let _ = store.apply_update(update("c", "c", 1.0), later, &mut sink);

        assert_eq!(store.expired(later, Duration::from_secs(5)), vec![ParticipantId::new("b")]);
    }

    #[test]
    fn test_drop_releases_present_handles() {
        let visuals = Arc::new(CountingVisuals::default());
        {
            let mut store = ShadowStore::new(ParticipantId::new("me"), visuals.clone());
            let mut sink = RecordingSink::default();
            let _ = store.apply_update(update("b", "Bob", 0.0), Instant::now(), &mut sink);
            store.complete_instantiation(ParticipantId::new("b"), Ok(5), Instant::now(), &mut sink);
        }
        assert_eq!(*visuals.released.lock(), vec![5]);
    }
}

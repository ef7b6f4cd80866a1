/// Per-track rate limiting of recognition calls and merging of their
/// results back into tracker state.
///
/// The throttler never calls a recognizer itself. The session asks
/// [`RecognitionThrottler::is_due`], stamps the track with
/// [`RecognitionThrottler::begin`], dispatches the crop, and later hands
/// the reply to [`RecognitionThrottler::complete`]. Replies are keyed by
/// track id and issue time, so a reply for a track that has since been
/// swept, re-issued, or timed out is dropped without touching state.
use std::collections::HashMap;
use std::time::Duration;

use crate::recognition::domain::face_recognizer::{RecognitionError, RecognitionOutcome};
use crate::tracking::domain::identity_tracker::IdentityTracker;
use crate::tracking::domain::tracked_face::{FaceIdentity, TrackId, TrackedFace};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3000);
pub const DEFAULT_LOG_COOLDOWN: Duration = Duration::from_millis(5000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

#[derive(Debug)]
pub enum MergeOutcome {
    /// Late or superseded reply, or the track no longer exists.
    Discarded,
    /// The call failed; the track keeps its previous identity.
    Failed(RecognitionError),
    Merged {
        identity: FaceIdentity,
        confidence: f64,
        /// Whether the logging gate let this result through.
        log: bool,
    },
}

pub struct RecognitionThrottler {
    cooldown: Duration,
    log_cooldown: Duration,
    timeout: Duration,
    /// Issue time of the outstanding call per track.
    in_flight: HashMap<TrackId, Duration>,
}

impl RecognitionThrottler {
    pub fn new(cooldown: Duration, log_cooldown: Duration, timeout: Duration) -> Self {
        Self {
            cooldown,
            log_cooldown,
            timeout,
            in_flight: HashMap::new(),
        }
    }

    /// True when the track has never been sent, or its last call was
    /// issued more than one cooldown ago.
    pub fn is_due(&self, track: &TrackedFace, now: Duration) -> bool {
        track
            .last_recognized_at
            .map_or(true, |at| now.saturating_sub(at) > self.cooldown)
    }

    /// Marks a call as issued for `track` at `now`, starting its cooldown
    /// before the result is known. Returns the issue time to tag the
    /// request with.
    pub fn begin(&mut self, track: &mut TrackedFace, now: Duration) -> Duration {
        track.last_recognized_at = Some(now);
        self.in_flight.insert(track.id, now);
        now
    }

    /// Forgets an issued call that never reached a recognizer. The
    /// cooldown stays in force.
    pub fn abandon(&mut self, id: TrackId) {
        self.in_flight.remove(&id);
    }

    pub fn complete(
        &mut self,
        tracker: &mut IdentityTracker,
        id: TrackId,
        issued_at: Duration,
        result: Result<Option<RecognitionOutcome>, RecognitionError>,
        now: Duration,
    ) -> MergeOutcome {
        if self.in_flight.get(&id) != Some(&issued_at) {
            return MergeOutcome::Discarded;
        }
        self.in_flight.remove(&id);

        let Some(track) = tracker.get_mut(id) else {
            return MergeOutcome::Discarded;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return MergeOutcome::Failed(e),
        };

        let previous_name = track.identity.as_ref().map(|i| i.name.clone());
        match outcome.filter(RecognitionOutcome::is_match) {
            Some(matched) => {
                let person_id = matched
                    .person_id
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                let name = matched.name.unwrap_or_else(|| person_id.clone());
                track.identity = Some(FaceIdentity::known(person_id, name));
                track.recognized = true;
                track.confidence = matched.confidence;
            }
            None => {
                track.identity = Some(FaceIdentity::unknown());
                track.recognized = false;
            }
        }

        let identity = track.identity.clone().unwrap_or_else(FaceIdentity::unknown);
        let name_changed = previous_name.as_deref() != Some(identity.name.as_str());
        let log = name_changed
            || track
                .last_logged_at
                .map_or(true, |at| now.saturating_sub(at) > self.log_cooldown);
        if log {
            track.last_logged_at = Some(now);
        }

        MergeOutcome::Merged {
            identity,
            confidence: track.confidence,
            log,
        }
    }

    /// Drops calls outstanding for longer than the timeout and returns
    /// their tracks. Their replies will be discarded if they arrive.
    pub fn expire_overdue(&mut self, now: Duration) -> Vec<TrackId> {
        let timeout = self.timeout;
        let mut overdue: Vec<TrackId> = self
            .in_flight
            .iter()
            .filter(|(_, issued)| now.saturating_sub(**issued) > timeout)
            .map(|(id, _)| *id)
            .collect();
        overdue.sort();
        for id in &overdue {
            self.in_flight.remove(id);
        }
        overdue
    }

    /// Forgets outstanding calls for tracks that no longer exist.
    pub fn forget(&mut self, ids: &[TrackId]) {
        for id in ids {
            self.in_flight.remove(id);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

impl Default for RecognitionThrottler {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, DEFAULT_LOG_COOLDOWN, DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_detector::RawDetection;
    use crate::shared::bounding_box::BoundingBox;
    use approx::assert_relative_eq;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn tracker_with_one_track() -> (IdentityTracker, TrackId) {
        let mut tracker = IdentityTracker::default();
        let update = tracker.update(
            &[RawDetection::new(BoundingBox::new(10.0, 10.0, 50.0, 50.0), 0.9)],
            ms(0),
        );
        (tracker, update.created[0])
    }

    fn matched(person_id: &str, name: &str, confidence: f64) -> Option<RecognitionOutcome> {
        Some(RecognitionOutcome {
            person_id: Some(person_id.into()),
            name: Some(name.into()),
            confidence,
        })
    }

    /// Issues and immediately completes one call for `id` at `now`.
    fn recognize(
        throttler: &mut RecognitionThrottler,
        tracker: &mut IdentityTracker,
        id: TrackId,
        result: Result<Option<RecognitionOutcome>, RecognitionError>,
        now: Duration,
    ) -> MergeOutcome {
        let issued = throttler.begin(tracker.get_mut(id).unwrap(), now);
        throttler.complete(tracker, id, issued, result, now)
    }

    #[test]
    fn test_never_recognized_track_is_due() {
        let (tracker, id) = tracker_with_one_track();
        let throttler = RecognitionThrottler::default();
        assert!(throttler.is_due(tracker.get(id).unwrap(), ms(0)));
    }

    #[test]
    fn test_cooldown_allows_one_call_per_window() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        let mut calls = 0;

        for now in [ms(0), ms(10)] {
            let track = tracker.get_mut(id).unwrap();
            if throttler.is_due(track, now) {
                throttler.begin(track, now);
                calls += 1;
            }
        }
        assert_eq!(calls, 1);
        assert_eq!(throttler.in_flight(), 1);
    }

    #[test]
    fn test_scenario_due_at_zero_and_3100_but_not_1500() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        let track = tracker.get_mut(id).unwrap();
        assert!(throttler.is_due(track, ms(0)));
        throttler.begin(track, ms(0));

        assert!(!throttler.is_due(tracker.get(id).unwrap(), ms(1500)));
        assert!(!throttler.is_due(tracker.get(id).unwrap(), ms(3000)));
        assert!(throttler.is_due(tracker.get(id).unwrap(), ms(3100)));
    }

    #[test]
    fn test_positive_match_merges_identity_and_confidence() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        let outcome = recognize(
            &mut throttler,
            &mut tracker,
            id,
            Ok(matched("p-7", "Ada", 0.97)),
            ms(0),
        );

        assert!(matches!(outcome, MergeOutcome::Merged { log: true, .. }));
        let track = tracker.get(id).unwrap();
        assert!(track.recognized);
        assert_eq!(track.identity, Some(FaceIdentity::known("p-7", "Ada")));
        assert_relative_eq!(track.confidence, 0.97);
        assert_eq!(throttler.in_flight(), 0);
    }

    #[test]
    fn test_no_match_marks_unknown() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        recognize(&mut throttler, &mut tracker, id, Ok(None), ms(0));

        let track = tracker.get(id).unwrap();
        assert!(!track.recognized);
        assert_eq!(track.identity, Some(FaceIdentity::unknown()));
        assert_relative_eq!(track.confidence, 0.9);
    }

    #[test]
    fn test_empty_person_id_is_not_a_match() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        recognize(&mut throttler, &mut tracker, id, Ok(matched("", "Ghost", 0.4)), ms(0));
        assert_eq!(tracker.get(id).unwrap().identity, Some(FaceIdentity::unknown()));
    }

    #[test]
    fn test_numeric_person_id_becomes_identity() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        let numeric = |person_id: i64| {
            Some(RecognitionOutcome {
                person_id: Some(person_id.into()),
                name: Some("Ada".into()),
                confidence: 0.9,
            })
        };

        recognize(&mut throttler, &mut tracker, id, Ok(numeric(0)), ms(0));
        assert_eq!(tracker.get(id).unwrap().identity, Some(FaceIdentity::unknown()));

        recognize(&mut throttler, &mut tracker, id, Ok(numeric(42)), ms(3100));
        assert_eq!(
            tracker.get(id).unwrap().identity,
            Some(FaceIdentity::known("42", "Ada"))
        );
    }

    #[test]
    fn test_failure_keeps_previous_identity() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        recognize(&mut throttler, &mut tracker, id, Ok(matched("p-1", "Ada", 0.9)), ms(0));

        let outcome = recognize(
            &mut throttler,
            &mut tracker,
            id,
            Err(RecognitionError::Http("503".into())),
            ms(3500),
        );

        assert!(matches!(outcome, MergeOutcome::Failed(_)));
        let track = tracker.get(id).unwrap();
        assert!(track.recognized);
        assert_eq!(track.identity.as_ref().unwrap().name, "Ada");
    }

    #[test]
    fn test_reply_for_swept_track_is_noop() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        let issued = throttler.begin(tracker.get_mut(id).unwrap(), ms(0));

        tracker.sweep(ms(2000));
        let outcome = throttler.complete(
            &mut tracker,
            id,
            issued,
            Ok(matched("p-1", "Ada", 0.9)),
            ms(2100),
        );
        assert!(matches!(outcome, MergeOutcome::Discarded));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_timed_out_reply_is_discarded() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        let issued = throttler.begin(tracker.get_mut(id).unwrap(), ms(0));

        assert!(throttler.expire_overdue(ms(2500)).is_empty());
        assert_eq!(throttler.expire_overdue(ms(2501)), vec![id]);

        let outcome = throttler.complete(
            &mut tracker,
            id,
            issued,
            Ok(matched("p-1", "Ada", 0.9)),
            ms(2600),
        );
        assert!(matches!(outcome, MergeOutcome::Discarded));
        assert!(tracker.get(id).unwrap().identity.is_none());
    }

    #[test]
    fn test_superseded_reply_is_discarded() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        let first = throttler.begin(tracker.get_mut(id).unwrap(), ms(0));
        let second = throttler.begin(tracker.get_mut(id).unwrap(), ms(3100));

        let stale = throttler.complete(&mut tracker, id, first, Ok(None), ms(3200));
        assert!(matches!(stale, MergeOutcome::Discarded));
        let fresh = throttler.complete(&mut tracker, id, second, Ok(None), ms(3200));
        assert!(matches!(fresh, MergeOutcome::Merged { .. }));
    }

    #[test]
    fn test_log_gate_suppresses_unchanged_name_within_cooldown() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        let logs: Vec<bool> = [ms(0), ms(3100), ms(5001)]
            .into_iter()
            .map(|now| {
                match recognize(&mut throttler, &mut tracker, id, Ok(matched("p-1", "Ada", 0.9)), now)
                {
                    MergeOutcome::Merged { log, .. } => log,
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();

        // First sighting logs; same name 3.1s later does not; after 5s it does.
        assert_eq!(logs, vec![true, false, true]);
    }

    #[test]
    fn test_log_gate_passes_name_change_regardless_of_cooldown() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();

        recognize(&mut throttler, &mut tracker, id, Ok(matched("p-1", "Ada", 0.9)), ms(0));
        let outcome = recognize(
            &mut throttler,
            &mut tracker,
            id,
            Ok(matched("p-2", "Grace", 0.9)),
            ms(100),
        );
        assert!(matches!(outcome, MergeOutcome::Merged { log: true, .. }));
        assert_eq!(tracker.get(id).unwrap().last_logged_at, Some(ms(100)));
    }

    #[test]
    fn test_abandon_keeps_cooldown() {
        let (mut tracker, id) = tracker_with_one_track();
        let mut throttler = RecognitionThrottler::default();
        throttler.begin(tracker.get_mut(id).unwrap(), ms(0));
        throttler.abandon(id);

        assert_eq!(throttler.in_flight(), 0);
        assert!(!throttler.is_due(tracker.get(id).unwrap(), ms(100)));
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::shared::frame::Frame;
use crate::tracking::domain::tracked_face::{FaceIdentity, TrackId};

/// One logged recognition transition.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub track_id: TrackId,
    pub stream_id: String,
    pub timestamp: Duration,
    /// The face crop that was recognised.
    #[serde(skip)]
    pub snapshot: Arc<Frame>,
    pub identity: Option<FaceIdentity>,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_detections: u64,
    pub recognized_count: u64,
    pub error_count: u64,
}

struct Inner {
    stats: SessionStats,
    events: VecDeque<DetectionEvent>,
}

/// Counters and bounded event history shared by every stream session.
///
/// Both live behind one lock so a clear resets them together.
pub struct ActivityLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                stats: SessionStats::default(),
                events: VecDeque::with_capacity(capacity.max(1)),
            }),
        }
    }

    /// Appends an event, evicting the oldest past capacity.
    pub fn record_event(&self, event: DetectionEvent) {
        let mut inner = self.lock();
        inner.stats.total_detections += 1;
        if event.identity.as_ref().is_some_and(FaceIdentity::is_known) {
            inner.stats.recognized_count += 1;
        }
        inner.events.push_back(event);
        while inner.events.len() > self.capacity {
            inner.events.pop_front();
        }
    }

    pub fn record_error(&self) {
        self.lock().stats.error_count += 1;
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    /// Up to `limit` events, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<DetectionEvent> {
        self.lock().events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the log and zeroes every counter.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.events.clear();
        inner.stats = SessionStats::default();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn event(track: u64, identity: Option<FaceIdentity>) -> DetectionEvent {
        DetectionEvent {
            track_id: TrackId(track),
            stream_id: "cam-1".into(),
            timestamp: Duration::from_millis(track),
            snapshot: Arc::new(Frame::new(vec![0u8; 3], 1, 1, 3, 0)),
            identity,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_recent_is_most_recent_first() {
        let log = ActivityLog::new(10);
        for i in 1..=3 {
            log.record_event(event(i, None));
        }
        let ids: Vec<u64> = log.recent(2).iter().map(|e| e.track_id.0).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = ActivityLog::new(2);
        for i in 1..=3 {
            log.record_event(event(i, None));
        }
        let ids: Vec<u64> = log.recent(10).iter().map(|e| e.track_id.0).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(log.stats().total_detections, 3);
    }

    #[test]
    fn test_recognized_count_only_counts_known_identities() {
        let log = ActivityLog::new(10);
        log.record_event(event(1, Some(FaceIdentity::known("p1", "Ada"))));
        log.record_event(event(2, Some(FaceIdentity::unknown())));
        log.record_event(event(3, None));

        let stats = log.stats();
        assert_eq!(stats.total_detections, 3);
        assert_eq!(stats.recognized_count, 1);
    }

    #[test]
    fn test_clear_resets_events_and_counters() {
        let log = ActivityLog::new(10);
        log.record_event(event(1, Some(FaceIdentity::known("p1", "Ada"))));
        log.record_error();
        log.clear();

        assert!(log.is_empty());
        assert_eq!(log.stats(), SessionStats::default());
    }

    #[test]
    fn test_concurrent_errors_are_all_counted() {
        let log = Arc::new(ActivityLog::new(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let log = log.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        log.record_error();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.stats().error_count, 1000);
    }

    #[test]
    fn test_event_serializes_without_snapshot() {
        let json = serde_json::to_value(event(4, Some(FaceIdentity::known("p1", "Ada")))).unwrap();
        assert_eq!(json["streamId"], "cam-1");
        assert_eq!(json["identity"]["name"], "Ada");
        assert!(json.get("snapshot").is_none());
    }
}

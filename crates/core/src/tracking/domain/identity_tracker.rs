/// Greedy IoU association of per-frame detections into stable tracks.
///
/// Each detection, in the order the detector returned them, is assigned
/// to the not-yet-matched track it overlaps most, provided the overlap
/// reaches the threshold. Ties go to the oldest track. Unmatched
/// detections open new tracks; unmatched tracks simply age until the
/// expiry sweep removes them.
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::detection::domain::face_detector::RawDetection;
use crate::tracking::domain::tracked_face::{TrackId, TrackedFace};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.4;
pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(1000);

/// Which tracks one detection batch touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackUpdate {
    pub matched: Vec<TrackId>,
    pub created: Vec<TrackId>,
}

impl TrackUpdate {
    /// Tracks observed this cycle, matched first.
    pub fn observed(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.matched.iter().chain(self.created.iter()).copied()
    }
}

pub struct IdentityTracker {
    iou_threshold: f64,
    expiry: Duration,
    next_id: u64,
    /// Ordered by id, which is also creation order.
    tracks: BTreeMap<TrackId, TrackedFace>,
}

impl IdentityTracker {
    pub fn new(iou_threshold: f64, expiry: Duration) -> Self {
        Self {
            iou_threshold,
            expiry,
            next_id: 1,
            tracks: BTreeMap::new(),
        }
    }

    pub fn update(&mut self, detections: &[RawDetection], now: Duration) -> TrackUpdate {
        let mut update = TrackUpdate::default();
        let mut matched_this_cycle: HashSet<TrackId> = HashSet::new();

        for detection in detections {
            match self.best_match(detection, &matched_this_cycle) {
                Some(id) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.observe(detection, now);
                    }
                    matched_this_cycle.insert(id);
                    update.matched.push(id);
                }
                None => {
                    let id = self.allocate_id();
                    self.tracks.insert(id, TrackedFace::new(id, detection, now));
                    // A track born this cycle is off-limits to later detections.
                    matched_this_cycle.insert(id);
                    update.created.push(id);
                }
            }
        }
        update
    }

    /// Removes tracks unseen for longer than the expiry window.
    pub fn sweep(&mut self, now: Duration) -> Vec<TrackId> {
        let expiry = self.expiry;
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| now.saturating_sub(t.last_seen_at) > expiry)
            .map(|t| t.id)
            .collect();
        for id in &stale {
            self.tracks.remove(id);
        }
        stale
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedFace> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut TrackedFace> {
        self.tracks.get_mut(&id)
    }

    /// Live tracks in creation order.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackedFace> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drops every track. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    fn allocate_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    fn best_match(&self, detection: &RawDetection, taken: &HashSet<TrackId>) -> Option<TrackId> {
        let mut best: Option<(TrackId, f64)> = None;
        // Ascending id order plus strict `>` keeps the oldest track on ties.
        for track in self.tracks.values().filter(|t| !taken.contains(&t.id)) {
            let overlap = track.bounding_box.iou(&detection.bounding_box);
            if overlap < self.iou_threshold {
                continue;
            }
            if best.map_or(true, |(_, score)| overlap > score) {
                best = Some((track.id, overlap));
            }
        }
        best.map(|(id, _)| id)
    }
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IOU_THRESHOLD, DEFAULT_EXPIRY)
    }
}

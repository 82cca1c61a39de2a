// THEORY:
// The `trail` module gives the overlay layer a short memory of where each
// tracked vehicle has been. Identity comes from the external tracker; this
// module only keeps, per track id, a bounded ring of recent centroids.
//
// Key architectural principles:
// 1.  **Bounded History**: Every trail is a `VecDeque` capped at the configured
//     capacity. Appending beyond the cap evicts the oldest point, so a trail
//     always holds the most recent positions in insertion order.
// 2.  **Disabled Means Inert**: A capacity of zero (or a negative configured
//     length) turns `record` into a no-op. No map entries are created.
// 3.  **Explicit Ownership**: The manager is a plain value owned by the pipeline.
//     Each track id's buffer is independent, so callers may shard by id if they
//     ever need concurrent mutation.
// 4.  **Optional Forgetting**: By default trails live for the whole run. With
//     `with_eviction`, ids that have not been recorded for more than a given
//     number of frames are dropped at `end_frame`.

use crate::core_modules::candidate::Point;
use std::collections::{HashMap, VecDeque};

/// One track's recent centroids plus the frame it was last recorded on.
#[derive(Debug, Clone)]
struct Trail {
    points: VecDeque<Point>,
    last_seen: u64,
}

/// Keeps a bounded centroid history for every track id.
#[derive(Debug, Clone)]
pub struct TrailManager {
    capacity: usize,
    max_idle_frames: Option<u64>,
    frame: u64,
    trails: HashMap<i64, Trail>,
}

impl TrailManager {
    /// `capacity <= 0` disables recording entirely.
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity: capacity.max(0) as usize,
            max_idle_frames: None,
            frame: 0,
            trails: HashMap::new(),
        }
    }

    /// Like `new`, but drops ids that were not recorded for more than
    /// `max_idle_frames` frames.
    pub fn with_eviction(capacity: i64, max_idle_frames: u64) -> Self {
        Self {
            max_idle_frames: Some(max_idle_frames),
            ..Self::new(capacity)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `centroid` to the trail of `track_id`, evicting the oldest point
    /// once the trail is full.
    pub fn record(&mut self, track_id: i64, centroid: Point) {
        if !self.is_enabled() {
            return;
        }

        let frame = self.frame;
        let capacity = self.capacity;
        let trail = self.trails.entry(track_id).or_insert_with(|| Trail {
            points: VecDeque::with_capacity(capacity),
            last_seen: frame,
        });

        trail.points.push_back(centroid);
        if trail.points.len() > capacity {
            trail.points.pop_front();
        }
        trail.last_seen = frame;
    }

    /// The recorded points of `track_id`, oldest first. Empty for unseen ids.
    pub fn trail_for(&self, track_id: i64) -> Vec<Point> {
        self.trails
            .get(&track_id)
            .map(|trail| trail.points.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every stored trail, in no particular order.
    pub fn trails(&self) -> impl Iterator<Item = (i64, &VecDeque<Point>)> + '_ {
        self.trails.iter().map(|(id, trail)| (*id, &trail.points))
    }

    pub fn track_count(&self) -> usize {
        self.trails.len()
    }

    /// Closes the current frame. Applies the idle eviction policy, if any.
    pub fn end_frame(&mut self) {
        if let Some(max_idle) = self.max_idle_frames {
            let now = self.frame;
            self.trails
                .retain(|_, trail| now.saturating_sub(trail.last_seen) <= max_idle);
        }
        self.frame += 1;
    }
}

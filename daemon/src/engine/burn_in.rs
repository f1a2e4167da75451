//! Burn-in mitigation: a small random pixel offset, moved once per minute

use chrono::{DateTime, Local};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub struct BurnIn {
    max_offset: f32,
    offset: (f32, f32),
    /// Unix minute the current offset was picked in
    minute: Option<i64>,
    rng: SmallRng,
}

impl BurnIn {
    pub fn new(max_offset: f32) -> Self {
        Self::with_rng(max_offset, SmallRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(max_offset: f32, rng: SmallRng) -> Self {
        Self {
            max_offset: max_offset.max(0.0),
            offset: (0.0, 0.0),
            minute: None,
            rng,
        }
    }

    pub fn offset(&self) -> (f32, f32) {
        self.offset
    }

    pub fn set_max_offset(&mut self, max_offset: f32) {
        self.max_offset = max_offset.max(0.0);
    }

    /// Pick a new offset if `now` is in a different minute than the last
    /// pick. Returns whether the offset moved.
    pub fn on_draw(&mut self, now: &DateTime<Local>) -> bool {
        let minute = now.timestamp().div_euclid(60);
        if self.minute == Some(minute) {
            return false;
        }
        self.minute = Some(minute);

        let max = self.max_offset;
        let next = (
            self.rng.random_range(-max..=max),
            self.rng.random_range(-max..=max),
        );
        let moved = next != self.offset;
        self.offset = next;
        moved
    }

    /// Back to the origin, e.g. when leaving ambient mode
    pub fn reset(&mut self) {
        self.offset = (0.0, 0.0);
        self.minute = None;
    }
}

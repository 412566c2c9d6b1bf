//! Maps the encoder's free-running pts onto a wall-clock anchored timeline.
//!
//! The first unit seen fixes `(wall_clock_origin, first_pts)`; every later
//! unit is emitted at `wall_clock_origin + (pts - first_pts)`, which keeps
//! the original frame spacing. Both clocks are in microseconds.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub trait WallClock: Send {
    fn now_micros(&self) -> i64;
}

pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default()
    }
}

/// What to do when the pts goes backwards (encoder restart, wrap...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionPolicy {
    /// Re-anchor so sink timestamps never go backwards.
    #[default]
    Resync,
    /// Pass the negative offset through to the sink.
    Propagate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Baseline {
    pub wall_clock_origin: i64,
    pub first_pts: i64,
}

pub struct TimestampRebaser {
    policy: RegressionPolicy,
    baseline: Option<Baseline>,
    last_pts: i64,
    last_timestamp: i64,
    resyncs: u64,
}

impl TimestampRebaser {
    pub fn new(policy: RegressionPolicy) -> Self {
        Self {
            policy,
            baseline: None,
            last_pts: 0,
            last_timestamp: 0,
            resyncs: 0,
        }
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn rebase(&mut self, pts: i64, clock: &dyn WallClock) -> i64 {
        let baseline = match self.baseline {
            None => {
                let b = Baseline {
                    wall_clock_origin: clock.now_micros(),
                    first_pts: pts,
                };
                self.baseline = Some(b);
                b
            }
            Some(_) if pts < self.last_pts && self.policy == RegressionPolicy::Resync => {
                let origin = clock
                    .now_micros()
                    .max(self.last_timestamp.saturating_add(1));
                log::warn!(
                    "pts regressed {} -> {}, resync timeline at {}",
                    self.last_pts,
                    pts,
                    origin
                );
                let b = Baseline {
                    wall_clock_origin: origin,
                    first_pts: pts,
                };
                self.baseline = Some(b);
                self.resyncs += 1;
                b
            }
            Some(b) => b,
        };

        // saturate on wrapped or garbage pts instead of overflowing
        let timestamp = baseline
            .wall_clock_origin
            .saturating_add(pts.saturating_sub(baseline.first_pts));
        self.last_pts = pts;
        self.last_timestamp = timestamp;
        timestamp
    }
}

//! Start offsets that make a batch's four phases finish `gap` apart.
//!
//! Stabilize is the slowest operation, so the post-extract Stabilize starts
//! immediately and everything else is placed relative to it:
//!
//! ```text
//! extract                 |----E----|
//! post-extract stabilize  |---------S---------|
//! replenish                      |------R------|
//! post-replenish stabilize   |---------S---------|
//!                                   ^    ^    ^    ^
//!                                   E    S1   R    S2  (gap apart)
//! ```

use std::time::Duration;

use serde::Serialize;

use siphon_core::Phase;

use crate::error::{SchedulerError, SchedulerResult};

/// Whole milliseconds, rounded up.
pub fn ceil_millis(d: Duration) -> i64 {
    d.as_nanos().div_ceil(1_000_000) as i64
}

/// Per-phase durations and offsets for one launch, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    durations: [i64; 4],
    offsets: [i64; 4],
    gap: i64,
}

impl PhaseTimings {
    /// Lay out the four phases from fresh operation durations.
    ///
    /// Fails if any phase would have to start before launch time or the
    /// finishes do not land exactly `gap` apart.
    pub fn compute(
        extract: Duration,
        replenish: Duration,
        stabilize: Duration,
        gap: Duration,
    ) -> SchedulerResult<Self> {
        let e = ceil_millis(extract);
        let r = ceil_millis(replenish);
        let s = ceil_millis(stabilize);
        let g = ceil_millis(gap);

        let timings = Self {
            durations: [e, s, r, s],
            offsets: [s - e - g, 0, s + g - r, 2 * g],
            gap: g,
        };
        timings.verify()?;
        Ok(timings)
    }

    fn verify(&self) -> SchedulerResult<()> {
        for phase in Phase::ORDER {
            let offset_ms = self.offsets[phase.index()];
            if offset_ms < 0 {
                return Err(SchedulerError::NegativeOffset { phase, offset_ms });
            }
        }

        for pair in Phase::ORDER.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            if self.finish_ms(second) - self.finish_ms(first) != self.gap {
                return Err(SchedulerError::Timing {
                    first,
                    second,
                    first_finish: self.finish(first),
                    second_finish: self.finish(second),
                    gap: Duration::from_millis(self.gap as u64),
                });
            }
        }
        Ok(())
    }

    fn finish_ms(&self, phase: Phase) -> i64 {
        self.offsets[phase.index()] + self.durations[phase.index()]
    }

    /// Delay before `phase` starts, relative to launch.
    pub fn offset(&self, phase: Phase) -> Duration {
        Duration::from_millis(self.offsets[phase.index()].max(0) as u64)
    }

    /// When `phase` finishes, relative to launch.
    pub fn finish(&self, phase: Phase) -> Duration {
        Duration::from_millis(self.finish_ms(phase).max(0) as u64)
    }

    /// When the whole batch has finished, relative to launch.
    pub fn span(&self) -> Duration {
        self.finish(Phase::PostReplenishStabilize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn finishes_land_one_gap_apart() {
        let t = PhaseTimings::compute(ms(1000), ms(3200), ms(4000), ms(500)).unwrap();

        assert_eq!(t.offset(Phase::Extract), ms(2500));
        assert_eq!(t.offset(Phase::PostExtractStabilize), ms(0));
        assert_eq!(t.offset(Phase::Replenish), ms(1300));
        assert_eq!(t.offset(Phase::PostReplenishStabilize), ms(1000));

        assert_eq!(t.finish(Phase::Extract) + ms(500), t.finish(Phase::PostExtractStabilize));
        assert_eq!(t.finish(Phase::PostExtractStabilize) + ms(500), t.finish(Phase::Replenish));
        assert_eq!(t.finish(Phase::Replenish) + ms(500), t.finish(Phase::PostReplenishStabilize));
        assert_eq!(t.span(), ms(5000));
    }

    #[test]
    fn fractional_durations_round_up() {
        let t = PhaseTimings::compute(
            Duration::from_micros(1_000_200),
            Duration::from_micros(3_200_001),
            Duration::from_micros(4_000_999),
            ms(500),
        )
        .unwrap();
        // 1001, 3201, 4001
        assert_eq!(t.offset(Phase::Extract), ms(2500));
        assert_eq!(t.offset(Phase::Replenish), ms(1300));
        assert_eq!(t.finish(Phase::PostExtractStabilize), ms(4001));
    }

    #[test]
    fn extract_longer_than_stabilize_is_rejected() {
        let err = PhaseTimings::compute(ms(4000), ms(3200), ms(4000), ms(500)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::NegativeOffset {
                phase: Phase::Extract,
                offset_ms: -500
            }
        ));
    }

    #[test]
    fn replenish_past_stabilize_plus_gap_is_rejected() {
        let err = PhaseTimings::compute(ms(1000), ms(5000), ms(4000), ms(500)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::NegativeOffset {
                phase: Phase::Replenish,
                ..
            }
        ));
    }

    #[test]
    fn timings_serialize_in_phase_order() {
        let t = PhaseTimings::compute(ms(1000), ms(3200), ms(4000), ms(500)).unwrap();
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["durations"], serde_json::json!([1000, 4000, 3200, 4000]));
        assert_eq!(json["offsets"], serde_json::json!([2500, 0, 1300, 1000]));
        assert_eq!(json["gap"], 500);
    }

    #[test]
    fn ceil_millis_rounds_up_sub_millisecond_remainders() {
        assert_eq!(ceil_millis(Duration::from_nanos(1)), 1);
        assert_eq!(ceil_millis(ms(7)), 7);
        assert_eq!(ceil_millis(Duration::ZERO), 0);
    }
}

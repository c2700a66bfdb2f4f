//! Picking a Target when none is configured.

use tracing::{debug, info};

use siphon_core::Environment;

use crate::error::{SchedulerError, SchedulerResult};

/// The candidate with the best `max_value / min_level` ratio.
///
/// Candidates without admin access, without value, or with a non-positive
/// minimum level are skipped. Ties keep the earlier candidate.
pub fn select_target(env: &dyn Environment, candidates: &[String]) -> SchedulerResult<String> {
    let mut best: Option<(&str, f64)> = None;

    for host in candidates {
        if !env.has_admin(host) {
            continue;
        }
        let Ok(state) = env.target_state(host) else {
            debug!(%host, "no target state, skipping");
            continue;
        };
        if state.max_value <= 0.0 || state.min_level <= 0.0 {
            continue;
        }
        let score = state.max_value / state.min_level;
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((host, score));
        }
    }

    let (host, score) = best.ok_or(SchedulerError::NoTarget)?;
    info!(%host, score, "target selected");
    Ok(host.to_string())
}

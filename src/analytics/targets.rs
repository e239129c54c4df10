use serde::Serialize;

use crate::analytics::breakout::{BreakoutSide, TrapAssessment};
use crate::config::Thresholds;
use crate::types::{Snapshot, StrikeRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetProjection {
    pub side: BreakoutSide,
    pub broken_level: f64,
    /// Next OI wall beyond the broken level.
    pub target1: f64,
    pub target2: f64,
    /// The two strikes past target 1 are thin: target 2 is extended.
    pub acceleration: bool,
}

/// Project targets for this refresh's confirmed breakout. None when there is no
/// breakout, when it looks like a trap, or when no strike lies beyond the broken level.
pub fn project(snapshot: &Snapshot, trap: &TrapAssessment, t: &Thresholds) -> Option<TargetProjection> {
    if trap.trap_likely {
        return None;
    }
    let side = trap.side()?;
    let broken = trap.broken_level?;
    let level_idx = snapshot.index_of(broken)?;

    // Strikes beyond the broken level, nearest first.
    let beyond: Vec<&StrikeRow> = match side {
        BreakoutSide::Up => snapshot.strikes[level_idx + 1..].iter().collect(),
        BreakoutSide::Down => snapshot.strikes[..level_idx].iter().rev().collect(),
    };
    let wall_oi = |r: &StrikeRow| match side {
        BreakoutSide::Up => r.ce.open_interest,
        BreakoutSide::Down => r.pe.open_interest,
    };

    // Highest wall within the look-ahead; strict comparison keeps the nearest on a tie.
    let (t1_pos, t1_row) = beyond
        .iter()
        .take(t.target_lookahead_strikes.max(1))
        .enumerate()
        .fold(None::<(usize, &StrikeRow)>, |best, (pos, row)| match best {
            Some((_, b)) if wall_oi(b) >= wall_oi(*row) => best,
            _ => Some((pos, *row)),
        })?;
    let target1 = t1_row.strike;

    let mut target2 = target1 + (target1 - broken);
    let avg_oi = snapshot.avg_combined_oi();
    let next_two: Vec<&&StrikeRow> = beyond.iter().skip(t1_pos + 1).take(2).collect();
    let acceleration = next_two.len() == 2
        && next_two
            .iter()
            .all(|r| r.combined_oi() < t.air_pocket_oi_ratio * avg_oi);
    if acceleration {
        target2 += t.acceleration_extension * (target2 - target1);
    }

    Some(TargetProjection {
        side,
        broken_level: broken,
        target1,
        target2,
        acceleration,
    })
}

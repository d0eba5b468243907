//! Turning raw per-position scores into ranked id lists.

use serde::{Deserialize, Serialize};

use crate::types::Sims;
use crate::vector::Position;
use crate::DocumentId;

/// How raw cosine scores are ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Rank by `|score|`, so strongly anti-correlated documents count as similar.
    #[default]
    Absolute,
    /// Rank by the signed score.
    Signed,
}

impl ScoreMode {
    #[inline]
    pub fn apply(self, score: f32) -> f32 {
        match self {
            ScoreMode::Absolute => score.abs(),
            ScoreMode::Signed => score,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreMode::Absolute => "absolute",
            ScoreMode::Signed => "signed",
        }
    }
}

impl std::fmt::Display for ScoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "absolute" | "abs" => Ok(ScoreMode::Absolute),
            "signed" => Ok(ScoreMode::Signed),
            other => Err(format!(
                "unknown score mode '{other}', expected 'absolute' or 'signed'"
            )),
        }
    }
}

/// Ranks `raw[i]` (the score of position `i`) into at most `cap` live peers.
///
/// Positions that `resolve` cannot name (ghosts) and `exclude` are skipped.
/// Scores go through `mode` first. Equal scores rank the lower position first.
pub fn rank_scores<'a, F>(
    raw: &[f32],
    resolve: F,
    mode: ScoreMode,
    cap: usize,
    exclude: Option<Position>,
) -> Sims
where
    F: Fn(Position) -> Option<&'a DocumentId>,
{
    let mut candidates: Vec<(Position, &'a DocumentId, f32)> = raw
        .iter()
        .enumerate()
        .filter_map(|(i, &score)| {
            let position = Position::new(i as u64);
            if exclude == Some(position) {
                return None;
            }
            resolve(position).map(|id| (position, id, mode.apply(score)))
        })
        .collect();

    let order = |a: &(Position, &'a DocumentId, f32), b: &(Position, &'a DocumentId, f32)| {
        b.2.total_cmp(&a.2).then(a.0.cmp(&b.0))
    };
    if cap < candidates.len() {
        if cap == 0 {
            return Vec::new();
        }
        candidates.select_nth_unstable_by(cap - 1, order);
        candidates.truncate(cap);
    }
    candidates.sort_unstable_by(order);

    candidates
        .into_iter()
        .map(|(_, id, score)| (id.clone(), score))
        .collect()
}

/// Keeps results while `score >= min_score`, at most `max_results` of them.
///
/// `max_results == 0` means no limit. Input must be sorted by descending score.
pub fn apply_find_filter(sims: Sims, min_score: f32, max_results: usize) -> Sims {
    let limit = if max_results == 0 {
        usize::MAX
    } else {
        max_results
    };
    sims.into_iter()
        .take_while(|(_, score)| *score >= min_score)
        .take(limit)
        .collect()
}

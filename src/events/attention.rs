//! Needs-attention heuristics over run and node roll-ups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A run needs attention when retries exceed this count.
pub const RETRY_THRESHOLD: u64 = 3;
/// A run needs attention when escalations exceed this count.
pub const ESCALATE_THRESHOLD: u64 = 2;
/// A run needs attention past this wall-clock duration.
pub const LATENCY_THRESHOLD_MS: u64 = 60_000;
/// A run needs attention past this token spend.
pub const TOKEN_THRESHOLD: u64 = 100_000;
/// A run needs attention past this many steps.
pub const STEP_THRESHOLD: u64 = 20;

/// Why a run or node was flagged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionCategory {
    HighRetries,
    HighEscalations,
    HighLatency,
    HighTokens,
    ManySteps,
}

impl fmt::Display for AttentionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttentionCategory::HighRetries => "high_retries",
            AttentionCategory::HighEscalations => "high_escalations",
            AttentionCategory::HighLatency => "high_latency",
            AttentionCategory::HighTokens => "high_tokens",
            AttentionCategory::ManySteps => "many_steps",
        };
        f.write_str(s)
    }
}

/// Raw counters a summary is computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttentionCounters {
    pub retry_count: u64,
    pub escalate_count: u64,
    pub duration_ms: u64,
    pub tokens: u64,
    pub total_steps: u64,
}

impl AttentionCounters {
    /// Which thresholds the counters cross.
    #[must_use]
    pub fn categories(&self) -> Vec<AttentionCategory> {
        let mut out = Vec::new();
        if self.retry_count > RETRY_THRESHOLD {
            out.push(AttentionCategory::HighRetries);
        }
        if self.escalate_count > ESCALATE_THRESHOLD {
            out.push(AttentionCategory::HighEscalations);
        }
        if self.duration_ms > LATENCY_THRESHOLD_MS {
            out.push(AttentionCategory::HighLatency);
        }
        if self.tokens > TOKEN_THRESHOLD {
            out.push(AttentionCategory::HighTokens);
        }
        if self.total_steps > STEP_THRESHOLD {
            out.push(AttentionCategory::ManySteps);
        }
        out
    }

    #[must_use]
    pub fn needs_attention(&self) -> bool {
        !self.categories().is_empty()
    }
}

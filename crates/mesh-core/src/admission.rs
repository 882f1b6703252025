//! The admission predicate: accept or reject a candidate scan against the
//! locally merged view.
//!
//! Pure function of the replica snapshot plus the clock; never mutates.
//! Logical rejections are structured results, not errors.

use crate::clock::day_key;
use crate::replica::ReplicaState;
use serde::Serialize;

/// Why a scan was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    Unknown,
    OneUseAlreadyUsed,
    Cooldown,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Unknown => "unknown",
            DenyReason::OneUseAlreadyUsed => "one-use already used today",
            DenyReason::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the predicate, carrying today's scan count either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Allow { day: String, today_count: usize },
    Deny { reason: DenyReason, today_count: usize },
}

/// What `submit_scan` reports back to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub today_count: Option<usize>,
}

impl From<&Evaluation> for ScanOutcome {
    fn from(eval: &Evaluation) -> Self {
        match eval {
            Evaluation::Allow { today_count, .. } => ScanOutcome {
                allowed: true,
                reason: None,
                today_count: Some(*today_count),
            },
            Evaluation::Deny { reason, .. } => ScanOutcome {
                allowed: false,
                reason: Some(*reason),
                today_count: None,
            },
        }
    }
}

/// Evaluate a candidate code at `now_ms`.
///
/// 1. no projection entry → deny `unknown`
/// 2. one-use with any accepted scan today → deny
/// 3. any scan today within the cooldown window → deny
/// 4. else allow, reporting the pre-append count for today
pub fn evaluate(
    replica: &ReplicaState,
    code: &str,
    now_ms: i64,
    cooldown_ms: i64,
) -> Evaluation {
    let Some(pass) = replica.pass_entry(code) else {
        return Evaluation::Deny {
            reason: DenyReason::Unknown,
            today_count: 0,
        };
    };

    let day = day_key(now_ms);
    let today = replica.scans_for_day(code, &day);

    if pass.kind == gm_protocol::PassKind::OneUse && !today.is_empty() {
        return Evaluation::Deny {
            reason: DenyReason::OneUseAlreadyUsed,
            today_count: today.len(),
        };
    }

    if today.iter().any(|s| s.ts_ms > now_ms - cooldown_ms) {
        return Evaluation::Deny {
            reason: DenyReason::Cooldown,
            today_count: today.len(),
        };
    }

    Evaluation::Allow {
        day,
        today_count: today.len(),
    }
}

//! Case statuses and expected-result predicates.
//!
//! A case moves `Pending → Running → <terminal>`; terminal states are final.
//! Dependency edges carry a [`ResultPredicate`] that is evaluated against
//! the dependency's terminal status. A violated predicate gates the
//! dependent to `NotRun` without running it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Case execution status.
///
/// `Pending` and `Running` are transient; everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not yet dispatched
    Pending,
    /// Handed to a worker, subprocess may be alive
    Running,
    /// Exit code 0
    Pass,
    /// Exit code 64: output differed from the baseline
    Diff,
    /// Any other non-zero exit
    Fail,
    /// Exit code 63: the test opted out at runtime
    Skip,
    /// Killed after exceeding its wall-clock budget
    Timeout,
    /// Passed but was expected to fail
    XPass,
    /// Failed as expected
    XFail,
    /// Never ran: cancelled, or a dependency violated its predicate
    NotRun,
}

impl Status {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Whether this terminal status counts as success for the session exit
    /// code. `XFail` is a success (the failure was expected); `XPass` is
    /// not (the expected failure did not happen).
    pub fn is_success(self) -> bool {
        matches!(self, Self::Pass | Self::XFail)
    }

    /// Severity used for worst-wins aggregation of a batch's cases.
    /// Higher is worse.
    pub fn severity(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::XFail => 1,
            Self::Skip => 2,
            Self::NotRun => 3,
            Self::Diff => 4,
            Self::XPass => 5,
            Self::Timeout => 6,
            Self::Fail => 7,
            Self::Pending | Self::Running => 8,
        }
    }

    /// Worst-wins aggregate over a set of statuses. An empty set is `Pass`.
    pub fn aggregate<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .max_by_key(|s| s.severity())
            .unwrap_or(Status::Pass)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Pass => "pass",
            Self::Diff => "diff",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Timeout => "timeout",
            Self::XPass => "xpass",
            Self::XFail => "xfail",
            Self::NotRun => "notrun",
        };
        f.write_str(s)
    }
}

/// Error parsing a `result=` predicate string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// Unknown base status word
    #[error("unknown result kind: '{0}'")]
    UnknownKind(String),

    /// Empty predicate
    #[error("empty result predicate")]
    Empty,
}

/// Expected-result constraint on a dependency edge.
///
/// Parsed from `result=` strings such as `"pass"`, `"not skip"`,
/// `"pass or diff"`, or `"*"`. Evaluated against the dependency's terminal
/// status once it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultPredicate {
    /// Matches exactly one terminal kind
    Is(Status),
    /// Matches any terminal status except the inner predicate
    Not(Box<ResultPredicate>),
    /// Matches when any branch matches
    Or(Vec<ResultPredicate>),
    /// Matches any terminal status
    Any,
}

impl ResultPredicate {
    /// The default edge predicate: the dependency must pass.
    pub fn pass() -> Self {
        Self::Is(Status::Pass)
    }

    /// Whether `status` satisfies this predicate. `status` must be
    /// terminal; transient statuses never satisfy anything.
    pub fn satisfied_by(&self, status: Status) -> bool {
        if !status.is_terminal() {
            return false;
        }
        match self {
            Self::Is(kind) => status == *kind,
            Self::Not(inner) => !inner.satisfied_by(status),
            Self::Or(branches) => branches.iter().any(|p| p.satisfied_by(status)),
            Self::Any => true,
        }
    }
}

impl FromStr for ResultPredicate {
    type Err = PredicateError;

    /// Parse `"pass"`, `"not skip"`, `"pass or diff"`, `"*"` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PredicateError::Empty);
        }
        if s == "*" {
            return Ok(Self::Any);
        }
        let branches: Vec<&str> = s.split(" or ").collect();
        if branches.len() > 1 {
            let parsed = branches
                .iter()
                .map(|b| b.parse())
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Or(parsed));
        }
        if let Some(rest) = s.strip_prefix("not ") {
            return Ok(Self::Not(Box::new(rest.parse()?)));
        }
        let kind = match s {
            "pass" => Status::Pass,
            "diff" => Status::Diff,
            "fail" => Status::Fail,
            "skip" => Status::Skip,
            "timeout" => Status::Timeout,
            "xpass" => Status::XPass,
            "xfail" => Status::XFail,
            "notrun" | "not_run" => Status::NotRun,
            other => return Err(PredicateError::UnknownKind(other.to_string())),
        };
        Ok(Self::Is(kind))
    }
}

impl fmt::Display for ResultPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Is(kind) => write!(f, "{kind}"),
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::Or(branches) => {
                let parts: Vec<String> = branches.iter().map(|b| b.to_string()).collect();
                f.write_str(&parts.join(" or "))
            }
            Self::Any => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_kinds_match_only_themselves() {
        let p: ResultPredicate = "pass".parse().unwrap();
        assert!(p.satisfied_by(Status::Pass));
        assert!(!p.satisfied_by(Status::Diff));
        assert!(!p.satisfied_by(Status::Running));
    }

    #[test]
    fn not_skip_accepts_any_other_terminal() {
        let p: ResultPredicate = "not skip".parse().unwrap();
        assert!(p.satisfied_by(Status::Pass));
        assert!(p.satisfied_by(Status::Fail));
        assert!(!p.satisfied_by(Status::Skip));
        // transient statuses satisfy nothing, even under negation
        assert!(!p.satisfied_by(Status::Pending));
    }

    #[test]
    fn or_combinator() {
        let p: ResultPredicate = "pass or diff".parse().unwrap();
        assert!(p.satisfied_by(Status::Pass));
        assert!(p.satisfied_by(Status::Diff));
        assert!(!p.satisfied_by(Status::Fail));
    }

    #[test]
    fn star_matches_every_terminal() {
        let p: ResultPredicate = "*".parse().unwrap();
        for s in [
            Status::Pass,
            Status::Diff,
            Status::Fail,
            Status::Skip,
            Status::Timeout,
            Status::NotRun,
        ] {
            assert!(p.satisfied_by(s));
        }
        assert!(!p.satisfied_by(Status::Running));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("sorta-pass".parse::<ResultPredicate>().is_err());
        assert!("".parse::<ResultPredicate>().is_err());
    }

    #[test]
    fn aggregate_is_worst_wins() {
        let agg = Status::aggregate([Status::Pass, Status::Skip, Status::Fail]);
        assert_eq!(agg, Status::Fail);
        let agg = Status::aggregate([Status::Pass, Status::Diff]);
        assert_eq!(agg, Status::Diff);
        assert_eq!(Status::aggregate([]), Status::Pass);
    }

    #[test]
    fn round_trip_display_parse() {
        for s in ["pass", "not skip", "pass or diff", "*"] {
            let p: ResultPredicate = s.parse().unwrap();
            assert_eq!(p.to_string(), s);
        }
    }

    #[test]
    fn serde_round_trip() {
        let status: Status = serde_json::from_str("\"xfail\"").unwrap();
        assert_eq!(status, Status::XFail);
        assert_eq!(serde_json::to_string(&Status::NotRun).unwrap(), "\"notrun\"");

        let p: ResultPredicate = "pass or diff".parse().unwrap();
        let text = serde_json::to_string(&p).unwrap();
        let back: ResultPredicate = serde_json::from_str(&text).unwrap();
        assert_eq!(back, p);
    }
}

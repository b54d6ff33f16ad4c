//! The case model: one concrete test execution unit.
//!
//! A case is the frozen pairing of (family, parameter tuple) plus its
//! mutable runtime state. Cases live in an arena owned by the session and
//! refer to each other by [`CaseId`] index; dependency edges are id pairs
//! with an expected-result predicate, so the graph has no cyclic ownership.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canary_core::{
    escape_component, ParamMap, ResourceSpec, ResultPredicate, Status,
};

use crate::generator::{StagingDecl, XFailDecl};

/// Arena index of a case within one frozen session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CaseId(pub usize);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordinary expansion or synthetic multi-instance base case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseKind {
    /// One expanded parameter tuple
    Single,
    /// Synthetic base case depending on every sibling expansion; its
    /// parameter map holds per-name value tuples
    Multi,
}

/// A resolved dependency edge: `dep` must finish with a status satisfying
/// `result` before the owning case may run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepEdge {
    /// The dependency's arena id
    pub dep: CaseId,
    /// Expected-result predicate
    pub result: ResultPredicate,
}

/// Mutable runtime state of a case. Only the scheduler coordinator writes
/// to it.
#[derive(Debug, Clone, Default)]
pub struct CaseState {
    /// Current status
    pub status: Option<Status>,
    /// Reason attached to Skip/NotRun/Fail statuses
    pub reason: Option<String>,
    /// Raw exit code of the subprocess, when it ran
    pub exit_code: Option<i32>,
    /// Launch timestamp
    pub started: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub finished: Option<DateTime<Utc>>,
    /// Transient-condition retries consumed so far
    pub retries: u32,
    /// Batch this case was tiled into, if batching is active
    pub batch: Option<usize>,
}

/// One concrete test case.
#[derive(Debug, Clone)]
pub struct Case {
    /// Arena id
    pub id: CaseId,
    /// Canonical name: `family[.k=v…][.stage=s]`, values escaped
    pub name: String,
    /// Family this case expanded from
    pub family: String,
    /// Single or multi-instance base
    pub kind: CaseKind,
    /// Test file this case came from
    pub source: PathBuf,
    /// Directory of the test file relative to its discovery root
    pub rel_dir: PathBuf,
    /// Command template; `{name}` placeholders substituted at launch
    pub command: Vec<String>,
    /// Parameter values (scalars for `Single`, tuples for `Multi`)
    pub params: ParamMap,
    /// Stage name when this case is a post-run stage
    pub stage: Option<String>,
    /// Effective keywords after `when` guards
    pub keywords: Vec<String>,
    /// Resource requirement
    pub resources: ResourceSpec,
    /// Wall-clock budget
    pub timeout: Duration,
    /// Resolved dependency edges
    pub dependencies: Vec<DepEdge>,
    /// Staging requests, materialized at populate time
    pub staging: Vec<StagingDecl>,
    /// Expected-failure inversion
    pub xfail: Option<XFailDecl>,
    /// Expected-diff inversion
    pub xdiff: bool,
    /// Runtime state
    pub state: CaseState,
}

impl Case {
    /// Build the canonical name for a (family, params, stage) triple.
    /// Scalar parameters appear in declaration order; multi-instance base
    /// cases carry no parameter components.
    pub fn canonical_name(family: &str, params: &ParamMap, stage: Option<&str>) -> String {
        let mut name = family.to_string();
        for (key, value) in params.iter_scalars() {
            name.push('.');
            name.push_str(key);
            name.push('=');
            name.push_str(&escape_component(&value.to_string()));
        }
        if let Some(stage) = stage {
            name.push_str(".stage=");
            name.push_str(&escape_component(stage));
        }
        name
    }

    /// Execution directory of this case beneath the session root.
    pub fn workdir(&self, session_root: &Path) -> PathBuf {
        session_root.join(&self.rel_dir).join(&self.name)
    }

    /// Path of the captured subprocess output within the working
    /// directory.
    pub fn log_path(&self, session_root: &Path) -> PathBuf {
        self.workdir(session_root).join("canary-out.txt")
    }

    /// True iff every dependency is finished with a status satisfying its
    /// edge predicate.
    pub fn ready(&self, finished: &HashMap<CaseId, Status>) -> bool {
        self.dependencies.iter().all(|edge| {
            finished
                .get(&edge.dep)
                .is_some_and(|status| edge.result.satisfied_by(*status))
        })
    }

    /// The first finished dependency whose terminal status violates its
    /// edge predicate, if any. Such a case will never become ready.
    pub fn violated_dependency(
        &self,
        finished: &HashMap<CaseId, Status>,
    ) -> Option<(CaseId, Status)> {
        self.dependencies.iter().find_map(|edge| {
            finished.get(&edge.dep).and_then(|status| {
                if status.is_terminal() && !edge.result.satisfied_by(*status) {
                    Some((edge.dep, *status))
                } else {
                    None
                }
            })
        })
    }

    /// The case's terminal status, if it has one.
    pub fn terminal_status(&self) -> Option<Status> {
        self.state.status.filter(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_core::ParamValue;

    fn params(pairs: &[(&str, ParamValue)]) -> ParamMap {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn canonical_name_orders_and_escapes() {
        let p = params(&[
            ("np", ParamValue::Int(4)),
            ("mesh", ParamValue::from("a/b")),
        ]);
        assert_eq!(
            Case::canonical_name("grid", &p, None),
            "grid.np=4.mesh=a%2Fb"
        );
        assert_eq!(
            Case::canonical_name("grid", &p, Some("post")),
            "grid.np=4.mesh=a%2Fb.stage=post"
        );
    }

    #[test]
    fn multi_case_name_is_bare_family() {
        let mut p = ParamMap::new();
        p.insert_tuple("np", vec![ParamValue::Int(1), ParamValue::Int(4)]);
        assert_eq!(Case::canonical_name("grid", &p, None), "grid");
    }

    #[test]
    fn readiness_respects_predicates() {
        let mut case = Case {
            id: CaseId(1),
            name: "b".into(),
            family: "b".into(),
            kind: CaseKind::Single,
            source: PathBuf::new(),
            rel_dir: PathBuf::new(),
            command: vec![],
            params: ParamMap::new(),
            stage: None,
            keywords: vec![],
            resources: ResourceSpec::default(),
            timeout: Duration::from_secs(60),
            dependencies: vec![DepEdge {
                dep: CaseId(0),
                result: ResultPredicate::pass(),
            }],
            staging: vec![],
            xfail: None,
            xdiff: false,
            state: CaseState::default(),
        };

        let mut finished = HashMap::new();
        assert!(!case.ready(&finished));
        assert!(case.violated_dependency(&finished).is_none());

        finished.insert(CaseId(0), Status::Fail);
        assert!(!case.ready(&finished));
        assert_eq!(
            case.violated_dependency(&finished),
            Some((CaseId(0), Status::Fail))
        );

        finished.insert(CaseId(0), Status::Pass);
        assert!(case.ready(&finished));

        // A "not skip" edge tolerates failure.
        case.dependencies[0].result = "not skip".parse().unwrap();
        finished.insert(CaseId(0), Status::Fail);
        assert!(case.ready(&finished));
    }
}

//! Session configuration.
//!
//! Everything the pipeline needs beyond the test files themselves,
//! assembled from the command line and frozen as JSON into
//! `TestResults/.canary/config` so batch allocations and re-entrant runs
//! rebuild the exact same session.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canary_core::{parse_timeout, ResourceSpec};

use crate::batch::{BatchLayout, BatchPolicy, BatchSpec, NodeGrouping};
use crate::error::ConfigError;

/// Pipeline phases, in order. `--until PHASE` stops after the named one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Parse test files into generators
    Discover,
    /// Expand, resolve, validate; assign case ids
    Freeze,
    /// Create working directories and stage inputs
    Populate,
    /// Execute (locally or batched)
    Run,
    /// Persist statuses and report
    Finish,
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discover" => Ok(Self::Discover),
            "freeze" => Ok(Self::Freeze),
            "populate" => Ok(Self::Populate),
            "run" => Ok(Self::Run),
            "finish" => Ok(Self::Finish),
            other => Err(format!(
                "unknown phase '{other}' (expected discover, freeze, populate, run, or finish)"
            )),
        }
    }
}

/// Batching configuration assembled from `-b key=value` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Tiling spec
    pub spec: BatchSpec,
    /// Driver name (`shell`, `slurm`, `pbs`, `flux`)
    pub scheduler: String,
    /// Maximum concurrently submitted batches
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            spec: BatchSpec::default(),
            scheduler: "shell".to_string(),
            workers: 4,
        }
    }
}

/// The frozen per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Discovery roots (absolute)
    pub roots: Vec<PathBuf>,
    /// Maximum concurrently running cases on the local path
    pub workers: Option<usize>,
    /// Raw `-k` expression; parsed at freeze
    pub keyword_expr: Option<String>,
    /// User `-o` options for `when` guards
    pub options: Vec<String>,
    /// Platform names for `when` guards
    pub platforms: Vec<String>,
    /// Pool capacity
    pub capacity: ResourceSpec,
    /// Batch the run instead of executing cases directly
    pub batch: Option<BatchConfig>,
    /// Transient-condition retry limit
    pub retry_limit: u32,
    /// Optional whole-session wall-clock budget, seconds
    pub session_timeout_secs: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            roots: Vec::new(),
            workers: None,
            keyword_expr: None,
            options: Vec::new(),
            platforms: vec![std::env::consts::OS.to_string()],
            capacity: ResourceSpec {
                cpus,
                gpus: 0,
                nodes: 1,
            },
            batch: None,
            retry_limit: 3,
            session_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// The session timeout as a [`Duration`], if configured.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs_f64)
    }
}

/// Fold `-b key=value` pairs into a [`BatchConfig`]. Any `-b` option at
/// all switches the session onto the batched path.
pub fn parse_batch_options(pairs: &[String]) -> Result<BatchConfig, ConfigError> {
    let mut config = BatchConfig::default();
    for pair in pairs {
        let bad = |message: &str| {
            ConfigError::BadBatchOption(pair.clone(), message.to_string())
        };
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| bad("expected key=value"))?;
        match key {
            "spec" => config.spec.policy = parse_policy(value, &bad)?,
            "layout" => {
                config.spec.layout = match value {
                    "flat" => BatchLayout::Flat,
                    "atomic" => BatchLayout::Atomic,
                    _ => return Err(bad("layout must be flat or atomic")),
                }
            }
            "nodes" => {
                config.spec.nodes = match value {
                    "any" => NodeGrouping::Any,
                    "same" => NodeGrouping::Same,
                    _ => return Err(bad("nodes must be any or same")),
                }
            }
            "scheduler" => config.scheduler = value.to_string(),
            "workers" => {
                config.workers = value
                    .parse()
                    .map_err(|_| bad("workers must be a positive integer"))?;
                if config.workers == 0 {
                    return Err(bad("workers must be a positive integer"));
                }
            }
            _ => return Err(bad("unknown batch option")),
        }
    }
    Ok(config)
}

/// `duration:T`, `count:N`, `count:auto`, or `count:max`.
fn parse_policy(
    value: &str,
    bad: &dyn Fn(&str) -> ConfigError,
) -> Result<BatchPolicy, ConfigError> {
    let (kind, arg) = value
        .split_once(':')
        .ok_or_else(|| bad("expected duration:T or count:N"))?;
    match kind {
        "duration" => {
            let t = parse_timeout(arg).map_err(|_| bad("invalid duration target"))?;
            Ok(BatchPolicy::Duration(t))
        }
        "count" => match arg {
            "auto" => Ok(BatchPolicy::CountAuto),
            "max" => Ok(BatchPolicy::CountMax),
            n => n
                .parse::<usize>()
                .map(BatchPolicy::Count)
                .map_err(|_| bad("count must be an integer, auto, or max")),
        },
        _ => Err(bad("expected duration:T or count:N")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parsing_is_case_insensitive() {
        assert_eq!("Freeze".parse::<Phase>().unwrap(), Phase::Freeze);
        assert!("compile".parse::<Phase>().is_err());
        assert!(Phase::Discover < Phase::Run);
    }

    #[test]
    fn batch_options_fold_left_to_right() {
        let config = parse_batch_options(&[
            "spec=count:4".to_string(),
            "layout=flat".to_string(),
            "nodes=same".to_string(),
            "scheduler=slurm".to_string(),
            "workers=2".to_string(),
        ])
        .unwrap();
        assert_eq!(config.spec.policy, BatchPolicy::Count(4));
        assert_eq!(config.spec.layout, BatchLayout::Flat);
        assert_eq!(config.spec.nodes, NodeGrouping::Same);
        assert_eq!(config.scheduler, "slurm");
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn duration_spec_accepts_timeout_forms() {
        let config = parse_batch_options(&["spec=duration:30m".to_string()]).unwrap();
        assert_eq!(
            config.spec.policy,
            BatchPolicy::Duration(Duration::from_secs(1800))
        );
    }

    #[test]
    fn malformed_options_are_config_errors() {
        for bad in ["spec", "spec=weekly:2", "layout=round", "workers=0", "foo=1"] {
            let err = parse_batch_options(&[bad.to_string()]).unwrap_err();
            assert!(matches!(err, ConfigError::BadBatchOption(..)), "{bad}");
        }
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = SessionConfig::default();
        config.roots = vec![PathBuf::from("/suite")];
        config.keyword_expr = Some("smoke and not slow".to_string());
        config.batch = Some(BatchConfig::default());
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.roots, config.roots);
        assert_eq!(back.keyword_expr, config.keyword_expr);
        assert!(back.batch.is_some());
    }
}

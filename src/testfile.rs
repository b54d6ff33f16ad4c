//! The directive-parser collaborator.
//!
//! The engine consumes test files through the [`TestParser`] trait: give
//! it a path, get back generators. The bundled implementation reads
//! `*.canary` TOML files whose keys mirror the directive surface
//! (`parameterize`, `depends_on`, `copy`/`link`, `timeout`, `stages`,
//! `skipif`/`enable`, `xfail`/`xdiff`, `analyze`); sites with their own
//! test-source formats plug in their own parser.
//!
//! # Example test file
//!
//! ```toml
//! command = ["./heat.sh", "{np}"]
//! keywords = ["regression", "mpi"]
//! timeout = "20m"
//!
//! [resources]
//! cpus = 4
//!
//! [[parameterize]]
//! names = "np"
//! values = [1, 4]
//!
//! [[depends_on]]
//! value = "prep.np=*"
//! result = "pass"
//! ```

use std::path::Path;

use serde::Deserialize;

use canary_core::{parse_timeout, ParamValue, ResourceSpec, ResultPredicate, WhenExpr};

use crate::error::ConfigError;
use crate::generator::{
    Axis, CenterSpec, DepDecl, DepTarget, Expect, Generator, Guard, GuardKind, KeywordDecl,
    StageDecl, StagingDecl, StagingKind, XFailDecl,
};

/// File extension the discovery walk looks for.
pub const TEST_FILE_EXT: &str = "canary";

/// Turns one test file into generators.
pub trait TestParser: Send + Sync {
    /// Parse `path`. `rel_dir` is the file's directory relative to its
    /// discovery root and seeds every produced generator's working-tree
    /// location.
    fn parse(&self, path: &Path, rel_dir: &Path) -> Result<Vec<Generator>, ConfigError>;
}

/// The bundled TOML directive parser.
#[derive(Debug, Default)]
pub struct TomlParser;

impl TestParser for TomlParser {
    fn parse(&self, path: &Path, rel_dir: &Path) -> Result<Vec<Generator>, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::BadDirective {
            path: path.to_path_buf(),
            message: format!("cannot read test file: {e}"),
        })?;
        let raw: RawTestFile = toml::from_str(&text).map_err(|e| ConfigError::BadDirective {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let generator = raw.into_generator(path, rel_dir)?;
        Ok(vec![generator])
    }
}

// ============================================================================
// Raw serde layer
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestFile {
    name: Option<String>,
    command: Vec<String>,
    #[serde(default)]
    keywords: Vec<RawKeyword>,
    timeout: Option<RawTimeout>,
    #[serde(default)]
    resources: ResourceSpec,
    #[serde(default)]
    parameterize: Vec<RawAxis>,
    #[serde(default)]
    depends_on: Vec<RawDep>,
    #[serde(default)]
    copy: Vec<RawStaging>,
    #[serde(default)]
    link: Vec<RawStaging>,
    #[serde(default)]
    stages: Vec<RawStage>,
    #[serde(default)]
    skipif: Vec<RawGuard>,
    #[serde(default)]
    enable: Vec<RawGuard>,
    xfail: Option<RawXFail>,
    #[serde(default)]
    xdiff: bool,
    #[serde(default)]
    analyze: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeyword {
    Word(String),
    Guarded { words: Vec<String>, when: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Seconds(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNames {
    One(String),
    Many(Vec<String>),
}

impl RawNames {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(n) => vec![n],
            Self::Many(ns) => ns,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAxis {
    names: RawNames,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    values: Vec<toml::Value>,
    /// Per-name `[center, delta, steps]` rows for centered axes
    #[serde(default)]
    centers: Vec<(f64, f64, u32)>,
    /// Per-name `[lo, hi]` rows for random axes
    #[serde(default)]
    ranges: Vec<(f64, f64)>,
    #[serde(default)]
    samples: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    autotype: bool,
}

#[derive(Debug, Deserialize)]
struct RawDep {
    value: Option<String>,
    testname: Option<String>,
    expect: Option<RawExpect>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpect {
    Count(usize),
    Symbol(String),
}

#[derive(Debug, Deserialize)]
struct RawStaging {
    src: String,
    dst: Option<String>,
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStage {
    Name(String),
    Guarded { name: String, when: String },
}

#[derive(Debug, Deserialize)]
struct RawGuard {
    when: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawXFail {
    Flag(bool),
    Code(i64),
}

// ============================================================================
// Conversion into the generator model
// ============================================================================

impl RawTestFile {
    fn into_generator(self, path: &Path, rel_dir: &Path) -> Result<Generator, ConfigError> {
        let bad = |message: String| ConfigError::BadDirective {
            path: path.to_path_buf(),
            message,
        };

        let family = match self.name {
            Some(name) => name,
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| bad("test file has no basename".to_string()))?,
        };
        if self.command.is_empty() {
            return Err(bad("'command' must not be empty".to_string()));
        }

        let timeout = match self.timeout {
            None => crate::generator::DEFAULT_TIMEOUT,
            Some(RawTimeout::Seconds(secs)) => parse_timeout(&secs.to_string())
                .map_err(|e| bad(format!("invalid timeout: {e}")))?,
            Some(RawTimeout::Text(text)) => {
                parse_timeout(&text).map_err(|e| bad(format!("invalid timeout: {e}")))?
            }
        };

        let parse_when = |when: Option<&str>| -> Result<WhenExpr, ConfigError> {
            match when {
                None => Ok(WhenExpr::True),
                Some(s) => WhenExpr::parse(s)
                    .map_err(|e| bad(format!("invalid when guard '{s}': {e}"))),
            }
        };

        let mut keywords = Vec::new();
        for kw in self.keywords {
            keywords.push(match kw {
                RawKeyword::Word(word) => KeywordDecl {
                    words: vec![word],
                    when: WhenExpr::True,
                },
                RawKeyword::Guarded { words, when } => KeywordDecl {
                    words,
                    when: parse_when(Some(&when))?,
                },
            });
        }

        let mut axes = Vec::new();
        for raw in self.parameterize {
            axes.push(convert_axis(raw, &bad)?);
        }

        let mut dependencies = Vec::new();
        for dep in self.depends_on {
            let target = match (dep.testname, dep.value) {
                (Some(name), None) => DepTarget::Name(name),
                (None, Some(pattern)) => DepTarget::Pattern(pattern),
                (Some(_), Some(_)) => {
                    return Err(bad(
                        "depends_on takes 'value' or 'testname', not both".to_string(),
                    ))
                }
                (None, None) => {
                    return Err(bad("depends_on needs 'value' or 'testname'".to_string()))
                }
            };
            let expect = match dep.expect {
                None => Expect::AtLeastOne,
                Some(RawExpect::Count(n)) => Expect::Exactly(n),
                Some(RawExpect::Symbol(s)) => match s.as_str() {
                    "*" => Expect::Any,
                    "?" => Expect::ZeroOrOne,
                    "+" => Expect::AtLeastOne,
                    other => match other.parse::<usize>() {
                        Ok(n) => Expect::Exactly(n),
                        Err(_) => {
                            return Err(bad(format!("invalid expect '{other}'")));
                        }
                    },
                },
            };
            let result = match dep.result {
                None => ResultPredicate::pass(),
                Some(s) => s
                    .parse()
                    .map_err(|e| bad(format!("invalid result predicate '{s}': {e}")))?,
            };
            dependencies.push(DepDecl {
                target,
                expect,
                result,
            });
        }

        let mut staging = Vec::new();
        for (kind, raws) in [
            (StagingKind::Copy, self.copy),
            (StagingKind::Link, self.link),
        ] {
            for raw in raws {
                staging.push(StagingDecl {
                    kind,
                    src: raw.src,
                    dst: raw.dst,
                    when: parse_when(raw.when.as_deref())?,
                });
            }
        }

        let mut stages = Vec::new();
        for stage in self.stages {
            stages.push(match stage {
                RawStage::Name(name) => StageDecl {
                    name,
                    when: WhenExpr::True,
                },
                RawStage::Guarded { name, when } => StageDecl {
                    name,
                    when: parse_when(Some(&when))?,
                },
            });
        }

        let mut guards = Vec::new();
        for (kind, raws, default_reason) in [
            (GuardKind::SkipIf, self.skipif, "skipped by directive"),
            (GuardKind::Enable, self.enable, "not enabled"),
        ] {
            for raw in raws {
                guards.push(Guard {
                    kind,
                    condition: parse_when(Some(&raw.when))?,
                    reason: raw.reason.unwrap_or_else(|| default_reason.to_string()),
                });
            }
        }

        let xfail = match self.xfail {
            None | Some(RawXFail::Flag(false)) => None,
            Some(RawXFail::Flag(true)) => Some(XFailDecl { code: None }),
            Some(RawXFail::Code(code)) => Some(XFailDecl {
                code: Some(code as i32),
            }),
        };

        Ok(Generator {
            source: path.to_path_buf(),
            rel_dir: rel_dir.to_path_buf(),
            family,
            command: self.command,
            axes,
            dependencies,
            keywords,
            guards,
            resources: self.resources,
            timeout,
            staging,
            stages,
            xfail,
            xdiff: self.xdiff,
            analyze: self.analyze,
        })
    }
}

fn convert_axis(
    raw: RawAxis,
    bad: &dyn Fn(String) -> ConfigError,
) -> Result<Axis, ConfigError> {
    let names = raw.names.into_vec();
    if names.is_empty() {
        return Err(bad("parameterize needs at least one name".to_string()));
    }
    let kind = raw.kind.as_deref().unwrap_or(if names.len() == 1 {
        "product"
    } else {
        "zip"
    });

    match kind {
        "product" => {
            if names.len() != 1 {
                return Err(bad("a product axis takes exactly one name".to_string()));
            }
            let values = raw
                .values
                .iter()
                .map(|v| convert_value(v, bad))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Axis::Product {
                name: names.into_iter().next().unwrap_or_default(),
                values,
                autotype: raw.autotype,
            })
        }
        "zip" => {
            let mut tuples = Vec::new();
            for row in &raw.values {
                let items = match row {
                    toml::Value::Array(items) => items,
                    _ => {
                        return Err(bad(
                            "zipped values must be arrays of tuples".to_string()
                        ))
                    }
                };
                if items.len() != names.len() {
                    return Err(bad(format!(
                        "zipped tuple has {} values for {} names",
                        items.len(),
                        names.len()
                    )));
                }
                tuples.push(
                    items
                        .iter()
                        .map(|v| convert_value(v, bad))
                        .collect::<Result<Vec<_>, _>>()?,
                );
            }
            Ok(Axis::Zipped {
                names,
                tuples,
                autotype: raw.autotype,
            })
        }
        "centered" => {
            if raw.centers.len() != names.len() {
                return Err(bad(format!(
                    "centered axis has {} center rows for {} names",
                    raw.centers.len(),
                    names.len()
                )));
            }
            let specs = raw
                .centers
                .iter()
                .map(|&(center, delta, steps)| CenterSpec {
                    center,
                    delta,
                    steps,
                })
                .collect();
            Ok(Axis::Centered { names, specs })
        }
        "random" => {
            if raw.ranges.len() != names.len() {
                return Err(bad(format!(
                    "random axis has {} ranges for {} names",
                    raw.ranges.len(),
                    names.len()
                )));
            }
            let samples = raw
                .samples
                .ok_or_else(|| bad("random axis needs 'samples'".to_string()))?;
            let seed = raw
                .seed
                .ok_or_else(|| bad("random axis needs 'seed'".to_string()))?;
            Ok(Axis::Random {
                names,
                ranges: raw.ranges,
                samples,
                seed,
            })
        }
        other => Err(bad(format!("unknown parameterize type '{other}'"))),
    }
}

fn convert_value(
    value: &toml::Value,
    bad: &dyn Fn(String) -> ConfigError,
) -> Result<ParamValue, ConfigError> {
    match value {
        toml::Value::Integer(i) => Ok(ParamValue::Int(*i)),
        toml::Value::Float(f) => Ok(ParamValue::Float(*f)),
        toml::Value::Boolean(b) => Ok(ParamValue::Bool(*b)),
        toml::Value::String(s) => Ok(ParamValue::Str(s.clone())),
        other => Err(bad(format!("unsupported parameter value: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<Generator, ConfigError> {
        let raw: RawTestFile = toml::from_str(text).expect("valid toml");
        raw.into_generator(Path::new("/suite/heat.canary"), Path::new("suite"))
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let g = parse_str(r#"command = ["./run.sh"]"#).unwrap();
        assert_eq!(g.family, "heat");
        assert_eq!(g.timeout, crate::generator::DEFAULT_TIMEOUT);
        assert!(g.axes.is_empty());
        assert!(!g.analyze);
    }

    #[test]
    fn full_directive_surface() {
        let g = parse_str(
            r#"
            name = "conduction"
            command = ["./heat.sh", "{np}"]
            keywords = ["regression", { words = ["long"], when = "np=8" }]
            timeout = "1h 20m"
            analyze = true
            xdiff = true

            [resources]
            cpus = 4
            gpus = 1

            [[parameterize]]
            names = "np"
            values = [1, 8]

            [[parameterize]]
            names = ["x", "y"]
            type = "centered"
            centers = [[0.0, 5.0, 1], [0.0, 1.0, 1]]

            [[depends_on]]
            value = "prep.np=*"
            expect = "+"
            result = "pass or diff"

            [[copy]]
            src = "input.yaml"
            dst = "in.yaml"
            when = "np=8"

            [[link]]
            src = "mesh.exo"

            [[stages]]
            name = "post"
            when = "option=postproc"

            [[skipif]]
            when = "platform=darwin"
            reason = "linux only"
            "#,
        )
        .unwrap();

        assert_eq!(g.family, "conduction");
        assert_eq!(g.timeout.as_secs(), 4800);
        assert_eq!(g.axes.len(), 2);
        assert_eq!(g.dependencies.len(), 1);
        assert_eq!(g.staging.len(), 2);
        assert_eq!(g.stages.len(), 1);
        assert_eq!(g.guards.len(), 1);
        assert_eq!(g.resources.cpus, 4);
        assert!(g.analyze);
        assert!(g.xdiff);
    }

    #[test]
    fn depends_on_testname_is_an_exact_target() {
        let g = parse_str(
            r#"
            command = ["./run.sh"]

            [[depends_on]]
            testname = "prep.np=4"
            "#,
        )
        .unwrap();
        assert_eq!(
            g.dependencies[0].target,
            DepTarget::Name("prep.np=4".to_string())
        );
    }

    #[test]
    fn depends_on_rejects_value_and_testname_together() {
        let err = parse_str(
            r#"
            command = ["./run.sh"]

            [[depends_on]]
            value = "prep"
            testname = "prep"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadDirective { .. }));
    }

    #[test]
    fn xfail_code_form() {
        let g = parse_str(
            r#"
            command = ["./run.sh"]
            xfail = 7
            "#,
        )
        .unwrap();
        assert_eq!(g.xfail, Some(XFailDecl { code: Some(7) }));

        let g = parse_str(
            r#"
            command = ["./run.sh"]
            xfail = true
            "#,
        )
        .unwrap();
        assert_eq!(g.xfail, Some(XFailDecl { code: None }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse_str(
            r#"
            command = ["./run.sh"]
            timeout = "0s"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadDirective { .. }));
    }

    #[test]
    fn clock_timeout_equals_seconds() {
        let g = parse_str(
            r#"
            command = ["./run.sh"]
            timeout = "1:00:00"
            "#,
        )
        .unwrap();
        assert_eq!(g.timeout.as_secs(), 3600);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = parse_str(r#"command = []"#).unwrap_err();
        assert!(matches!(err, ConfigError::BadDirective { .. }));
    }

    #[test]
    fn random_axis_requires_seed_and_samples() {
        let err = parse_str(
            r#"
            command = ["./run.sh"]
            [[parameterize]]
            names = ["x"]
            type = "random"
            ranges = [[0.0, 1.0]]
            samples = 3
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadDirective { .. }));
    }
}

//! The generator model: one parsed test file.
//!
//! A [`Generator`] is the directive-level description of a test before
//! parameter expansion. Generators are produced by the directive-parser
//! collaborator (see [`crate::testfile`] for the contract and the bundled
//! TOML implementation), consumed by [`crate::params`] and
//! [`crate::graph`] during freeze, and dropped once the case graph exists.

use std::path::PathBuf;
use std::time::Duration;

use canary_core::{ParamValue, ResourceSpec, ResultPredicate, WhenExpr};

/// Default per-case wall-clock budget when no `timeout` directive is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// One parameter axis, as declared by a `parameterize` directive.
#[derive(Debug, Clone)]
pub enum Axis {
    /// Single name over a tuple of values; cartesian-producted with the
    /// other product axes.
    Product {
        /// Parameter name
        name: String,
        /// Declared values
        values: Vec<ParamValue>,
        /// Convert numeric-looking strings on expansion
        autotype: bool,
    },

    /// Several names consumed together: the k-tuples are one axis, with no
    /// cross-product among the zipped names.
    Zipped {
        /// Parameter names
        names: Vec<String>,
        /// One k-tuple per row
        tuples: Vec<Vec<ParamValue>>,
        /// Convert numeric-looking strings on expansion
        autotype: bool,
    },

    /// Center/delta/steps sweep: the origin plus, for each name
    /// independently, `steps` points on each side.
    Centered {
        /// Parameter names
        names: Vec<String>,
        /// Per-name `(center, delta, steps)`
        specs: Vec<CenterSpec>,
    },

    /// Uniform random draws from per-name ranges, deterministic given the
    /// seed.
    Random {
        /// Parameter names
        names: Vec<String>,
        /// Per-name inclusive-exclusive `(lo, hi)` range
        ranges: Vec<(f64, f64)>,
        /// Number of tuples to draw
        samples: u32,
        /// PRNG seed; part of the test spec so expansion is reproducible
        seed: u64,
    },
}

/// Per-name spec of a centered axis.
#[derive(Debug, Clone, Copy)]
pub struct CenterSpec {
    /// Origin value
    pub center: f64,
    /// Step width
    pub delta: f64,
    /// Points on each side of the center
    pub steps: u32,
}

/// Cardinality hint on a `depends_on` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// `*`: any number of matches, zero included
    Any,
    /// `?`: zero or one
    ZeroOrOne,
    /// `+`: at least one (the default)
    AtLeastOne,
    /// exactly n
    Exactly(usize),
}

impl Expect {
    /// Whether `n` matches satisfies this hint.
    pub fn admits(&self, n: usize) -> bool {
        match self {
            Self::Any => true,
            Self::ZeroOrOne => n <= 1,
            Self::AtLeastOne => n >= 1,
            Self::Exactly(k) => n == *k,
        }
    }
}

impl std::fmt::Display for Expect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::ZeroOrOne => f.write_str("?"),
            Self::AtLeastOne => f.write_str("+"),
            Self::Exactly(k) => write!(f, "{k}"),
        }
    }
}

/// What a `depends_on` directive points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepTarget {
    /// `family[.name=value…]` pattern (`value=`); family and values may
    /// be globs, and a `stage=name` segment selects a stage case
    Pattern(String),
    /// Exact canonical case name (`testname=`); no glob expansion
    Name(String),
}

impl std::fmt::Display for DepTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(p) => f.write_str(p),
            Self::Name(n) => write!(f, "testname={n}"),
        }
    }
}

/// One `depends_on` directive, before resolution against concrete cases.
#[derive(Debug, Clone)]
pub struct DepDecl {
    /// Pattern or exact name to match
    pub target: DepTarget,
    /// Cardinality hint
    pub expect: Expect,
    /// Expected-result predicate attached to every resolved edge
    pub result: ResultPredicate,
}

impl DepDecl {
    /// A default-predicate dependency on a symbolic pattern.
    pub fn on_pattern(pattern: impl Into<String>) -> Self {
        Self {
            target: DepTarget::Pattern(pattern.into()),
            expect: Expect::AtLeastOne,
            result: ResultPredicate::pass(),
        }
    }
}

/// A `keywords(…)` directive: words plus an optional guard.
#[derive(Debug, Clone)]
pub struct KeywordDecl {
    /// The keywords to add
    pub words: Vec<String>,
    /// Only applies when the guard holds
    pub when: WhenExpr,
}

/// Case-inclusion gate: `skipif(cond, reason)` or `enable(cond)`.
#[derive(Debug, Clone)]
pub struct Guard {
    /// `skipif` masks when the condition holds; `enable` masks when it
    /// does not
    pub kind: GuardKind,
    /// Guard condition over parameters/platforms/options
    pub condition: WhenExpr,
    /// Reason recorded on the masked case
    pub reason: String,
}

/// Which way a [`Guard`] cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Mask the case when the condition holds
    SkipIf,
    /// Mask the case when the condition does not hold
    Enable,
}

/// A `copy(...)` or `link(...)` staging request.
#[derive(Debug, Clone)]
pub struct StagingDecl {
    /// Copy the file or link it
    pub kind: StagingKind,
    /// Source path, relative to the test file's directory
    pub src: String,
    /// Destination name inside the working directory (rename); defaults to
    /// the source basename
    pub dst: Option<String>,
    /// Only stage when the guard holds for the case
    pub when: WhenExpr,
}

/// Copy vs link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingKind {
    /// Physical copy
    Copy,
    /// Symlink back to the source tree
    Link,
}

/// One entry of a `stages(...)` directive.
#[derive(Debug, Clone)]
pub struct StageDecl {
    /// Stage name, exported to the subprocess as `CANARY_STAGE`
    pub name: String,
    /// Only emit the stage when the guard holds
    pub when: WhenExpr,
}

/// Expected-failure flag: `xfail(code?)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XFailDecl {
    /// When set, only this exact exit code converts to `XFail`; other
    /// failing codes stay `Fail`
    pub code: Option<i32>,
}

/// One parsed test file, prior to expansion.
#[derive(Debug, Clone)]
pub struct Generator {
    /// Absolute path of the test file
    pub source: PathBuf,
    /// Directory of the test file relative to its discovery root; the
    /// case's working directory lives under the same relative path in the
    /// session tree
    pub rel_dir: PathBuf,
    /// Family name (default: file basename)
    pub family: String,
    /// Command to execute; `{name}` placeholders are substituted with
    /// parameter values at launch
    pub command: Vec<String>,
    /// Declared parameter axes, in declaration order
    pub axes: Vec<Axis>,
    /// Symbolic dependencies
    pub dependencies: Vec<DepDecl>,
    /// Keyword declarations
    pub keywords: Vec<KeywordDecl>,
    /// skipif/enable gates
    pub guards: Vec<Guard>,
    /// Resource requirement of each expanded case
    pub resources: ResourceSpec,
    /// Wall-clock budget of each expanded case
    pub timeout: Duration,
    /// copy/link staging requests
    pub staging: Vec<StagingDecl>,
    /// Post-run stages; each becomes a dependent case
    pub stages: Vec<StageDecl>,
    /// Expected-failure inversion
    pub xfail: Option<XFailDecl>,
    /// Expected-diff inversion
    pub xdiff: bool,
    /// Request a synthetic base case aggregating every expansion
    pub analyze: bool,
}

impl Generator {
    /// A generator with nothing but a family name and a command; used by
    /// tests and as the base the parser fills in.
    pub fn new(family: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            source: PathBuf::new(),
            rel_dir: PathBuf::new(),
            family: family.into(),
            command,
            axes: Vec::new(),
            dependencies: Vec::new(),
            keywords: Vec::new(),
            guards: Vec::new(),
            resources: ResourceSpec::default(),
            timeout: DEFAULT_TIMEOUT,
            staging: Vec::new(),
            stages: Vec::new(),
            xfail: None,
            xdiff: false,
            analyze: false,
        }
    }
}

//! Freezing the case graph.
//!
//! Freeze turns the discovered generators into the concrete, immutable
//! case arena: parameter expansion, keyword/guard evaluation, stage
//! chaining, multi-instance synthesis, symbolic dependency resolution,
//! resource feasibility, cycle rejection, and a deterministic topological
//! order used for dispatch tie-breaking.
//!
//! Everything here is a pure function of the generator list and the freeze
//! options; two freezes of the same input yield the same arena, which is
//! what makes sessions re-entrant and batch allocations able to rebuild
//! the graph from the frozen config alone.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use canary_core::{
    expr::glob_match, EvalContext, ParamMap, ResourceSpec, ResultPredicate, Status, WhenExpr,
};

use crate::case::{Case, CaseId, CaseKind, CaseState, DepEdge};
use crate::error::ConfigError;
use crate::generator::{DepDecl, DepTarget, Generator, GuardKind};
use crate::params;

/// Inputs to freeze beyond the generators themselves.
#[derive(Debug, Clone)]
pub struct FreezeOptions {
    /// Active platform names for `when` guards
    pub platforms: Vec<String>,
    /// User `-o` options for `when` guards
    pub options: Vec<String>,
    /// `-k` keyword filter; cases not matching are dropped before
    /// dependency resolution
    pub keyword_filter: Option<WhenExpr>,
    /// Pool capacity, for feasibility rejection
    pub capacity: ResourceSpec,
}

impl Default for FreezeOptions {
    fn default() -> Self {
        Self {
            platforms: vec![std::env::consts::OS.to_string()],
            options: Vec::new(),
            keyword_filter: None,
            capacity: ResourceSpec {
                cpus: u32::MAX,
                gpus: u32::MAX,
                nodes: u32::MAX,
            },
        }
    }
}

/// The frozen case arena plus derived orderings.
#[derive(Debug, Clone, Default)]
pub struct CaseGraph {
    /// Arena; `cases[i].id == CaseId(i)`
    pub cases: Vec<Case>,
    /// Topological rank per case (dependencies rank before dependents)
    pub topo_rank: Vec<usize>,
    /// Reverse adjacency: for each case, the cases that depend on it
    pub dependents: Vec<Vec<CaseId>>,
}

impl CaseGraph {
    /// Look up a case by arena id.
    pub fn case(&self, id: CaseId) -> &Case {
        &self.cases[id.0]
    }

    /// Mutable case lookup. The coordinator is the only caller.
    pub fn case_mut(&mut self, id: CaseId) -> &mut Case {
        &mut self.cases[id.0]
    }

    /// Ids of all cases, in arena order.
    pub fn ids(&self) -> impl Iterator<Item = CaseId> + '_ {
        (0..self.cases.len()).map(CaseId)
    }

    /// Find a case by canonical name.
    pub fn by_name(&self, name: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.name == name)
    }
}

/// Freeze the generators into a case graph.
pub fn freeze(
    generators: &[Generator],
    opts: &FreezeOptions,
) -> Result<CaseGraph, ConfigError> {
    let mut cases: Vec<Case> = Vec::new();
    // Dependency declarations attached to the base case of each chain.
    let mut pending_deps: Vec<(CaseId, Vec<DepDecl>)> = Vec::new();

    for generator in generators {
        build_generator_cases(generator, opts, &mut cases, &mut pending_deps)?;
    }

    if let Some(filter) = &opts.keyword_filter {
        apply_keyword_filter(&mut cases, &mut pending_deps, filter);
    }

    resolve_dependencies(&mut cases, &pending_deps)?;

    for case in &cases {
        if !case.resources.fits_within(&opts.capacity) {
            return Err(ConfigError::InfeasibleResources {
                case: case.name.clone(),
                required: case.resources,
                capacity: opts.capacity,
            });
        }
    }

    reject_cycles(&cases)?;
    let topo_rank = topological_rank(&cases);
    let dependents = reverse_edges(&cases);

    Ok(CaseGraph {
        cases,
        topo_rank,
        dependents,
    })
}

/// Expand one generator into its chain(s) of cases and push them onto the
/// arena in deterministic order: expansions in tuple order, each followed
/// by its stage chain, then the multi-instance base case if requested.
fn build_generator_cases(
    generator: &Generator,
    opts: &FreezeOptions,
    cases: &mut Vec<Case>,
    pending_deps: &mut Vec<(CaseId, Vec<DepDecl>)>,
) -> Result<(), ConfigError> {
    let maps = params::expand(generator);
    // Last emitted case of each expansion chain, for the multi case.
    let mut chain_tails: Vec<CaseId> = Vec::new();

    for map in &maps {
        let ctx = EvalContext {
            params: map,
            platforms: &opts.platforms,
            options: &opts.options,
        };

        let keywords = effective_keywords(generator, &ctx);
        let masked = mask_reason(generator, &ctx);

        // Base case of the chain.
        let base_id = CaseId(cases.len());
        let mut base = new_case(generator, base_id, map.clone(), None, keywords.clone());
        if let Some(reason) = &masked {
            base.state.status = Some(Status::Skip);
            base.state.reason = Some(reason.clone());
        }
        cases.push(base);
        if !generator.dependencies.is_empty() {
            pending_deps.push((base_id, generator.dependencies.clone()));
        }

        // Stage chain: each emitted stage depends on the nearest preceding
        // emitted case with result=pass.
        let mut tail = base_id;
        for stage in &generator.stages {
            if !stage.when.eval(&ctx) {
                continue;
            }
            let id = CaseId(cases.len());
            let mut case = new_case(
                generator,
                id,
                map.clone(),
                Some(stage.name.clone()),
                keywords.clone(),
            );
            case.dependencies.push(DepEdge {
                dep: tail,
                result: ResultPredicate::pass(),
            });
            if let Some(reason) = &masked {
                case.state.status = Some(Status::Skip);
                case.state.reason = Some(reason.clone());
            }
            cases.push(case);
            tail = id;
        }
        chain_tails.push(tail);
    }

    if generator.analyze && !maps.is_empty() {
        let agg = params::aggregate(&maps);
        let id = CaseId(cases.len());
        let mut multi = new_case(generator, id, agg, None, Vec::new());
        multi.kind = CaseKind::Multi;
        multi.keywords = generator
            .keywords
            .iter()
            .filter(|decl| matches!(decl.when, WhenExpr::True))
            .flat_map(|decl| decl.words.iter().cloned())
            .collect();
        multi.dependencies = chain_tails
            .iter()
            .map(|&dep| DepEdge {
                dep,
                result: ResultPredicate::pass(),
            })
            .collect();
        cases.push(multi);
    }

    Ok(())
}

fn new_case(
    generator: &Generator,
    id: CaseId,
    map: ParamMap,
    stage: Option<String>,
    keywords: Vec<String>,
) -> Case {
    let name = Case::canonical_name(&generator.family, &map, stage.as_deref());
    Case {
        id,
        name,
        family: generator.family.clone(),
        kind: CaseKind::Single,
        source: generator.source.clone(),
        rel_dir: generator.rel_dir.clone(),
        command: generator.command.clone(),
        params: map,
        stage,
        keywords,
        resources: generator.resources,
        timeout: generator.timeout,
        dependencies: Vec::new(),
        staging: generator.staging.clone(),
        xfail: generator.xfail,
        xdiff: generator.xdiff,
        state: CaseState::default(),
    }
}

fn effective_keywords(generator: &Generator, ctx: &EvalContext<'_>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for decl in &generator.keywords {
        if decl.when.eval(ctx) {
            for word in &decl.words {
                if !keywords.contains(word) {
                    keywords.push(word.clone());
                }
            }
        }
    }
    keywords
}

/// The reason a case is masked to `Skip` at freeze, if any guard fires.
fn mask_reason(generator: &Generator, ctx: &EvalContext<'_>) -> Option<String> {
    for guard in &generator.guards {
        let holds = guard.condition.eval(ctx);
        let masked = match guard.kind {
            GuardKind::SkipIf => holds,
            GuardKind::Enable => !holds,
        };
        if masked {
            return Some(guard.reason.clone());
        }
    }
    None
}

/// Drop cases whose keywords do not satisfy the `-k` filter, renumbering
/// the survivors. Dependency declarations follow their base cases.
fn apply_keyword_filter(
    cases: &mut Vec<Case>,
    pending_deps: &mut Vec<(CaseId, Vec<DepDecl>)>,
    filter: &WhenExpr,
) {
    let keep: Vec<bool> = cases
        .iter()
        .map(|c| filter.eval_keywords(&c.keywords))
        .collect();

    // Old id -> new id for survivors.
    let mut remap: HashMap<CaseId, CaseId> = HashMap::new();
    let mut next = 0usize;
    for (i, &k) in keep.iter().enumerate() {
        if k {
            remap.insert(CaseId(i), CaseId(next));
            next += 1;
        }
    }

    *pending_deps = pending_deps
        .drain(..)
        .filter_map(|(id, decls)| remap.get(&id).map(|&new| (new, decls)))
        .collect();

    let old = std::mem::take(cases);
    for (i, mut case) in old.into_iter().enumerate() {
        if !keep[i] {
            continue;
        }
        case.id = remap[&CaseId(i)];
        // Intra-chain edges to filtered cases disappear with their target;
        // a stage whose predecessor was filtered loses that edge.
        case.dependencies = case
            .dependencies
            .into_iter()
            .filter_map(|edge| {
                remap.get(&edge.dep).map(|&dep| DepEdge {
                    dep,
                    result: edge.result,
                })
            })
            .collect();
        cases.push(case);
    }
}

/// Matching view of one case, snapshotted so edges can be appended while
/// patterns are evaluated.
struct MatchEntry {
    id: CaseId,
    name: String,
    family: String,
    stage: Option<String>,
    params: ParamMap,
}

/// Resolve each symbolic dependency declaration against the arena and
/// validate its `expect` cardinality.
fn resolve_dependencies(
    cases: &mut [Case],
    pending_deps: &[(CaseId, Vec<DepDecl>)],
) -> Result<(), ConfigError> {
    let index: Vec<MatchEntry> = cases
        .iter()
        .map(|c| MatchEntry {
            id: c.id,
            name: c.name.clone(),
            family: c.family.clone(),
            stage: c.stage.clone(),
            params: c.params.clone(),
        })
        .collect();

    for (owner, decls) in pending_deps {
        for decl in decls {
            let matched: Vec<CaseId> = match &decl.target {
                // `testname=` is an exact canonical-name lookup, no globs.
                DepTarget::Name(name) => index
                    .iter()
                    .filter(|e| e.id != *owner && e.name == *name)
                    .map(|e| e.id)
                    .collect(),
                DepTarget::Pattern(pattern) => {
                    let pattern = DepPattern::parse(pattern);
                    index
                        .iter()
                        .filter(|e| {
                            e.id != *owner
                                && pattern.matches(&e.family, e.stage.as_deref(), &e.params)
                        })
                        .map(|e| e.id)
                        .collect()
                }
            };

            if !decl.expect.admits(matched.len()) {
                return Err(ConfigError::DependencyCardinality {
                    case: cases[owner.0].name.clone(),
                    pattern: decl.target.to_string(),
                    matched: matched.len(),
                    expected: decl.expect.to_string(),
                });
            }

            for dep in matched {
                cases[owner.0].dependencies.push(DepEdge {
                    dep,
                    result: decl.result.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Parsed form of `family[.name=value…]`; values may be globs, and the
/// family itself may be a glob. A `stage=name` segment constrains the
/// stage component of the canonical name instead of a parameter.
#[derive(Debug, Clone)]
pub struct DepPattern {
    family: String,
    constraints: Vec<(String, String)>,
}

impl DepPattern {
    /// Split a symbolic pattern into family glob and parameter
    /// constraints. Leading dot-segments without `=` belong to the family.
    pub fn parse(pattern: &str) -> Self {
        let mut family_parts: Vec<&str> = Vec::new();
        let mut constraints: Vec<(String, String)> = Vec::new();
        for segment in pattern.split('.') {
            match segment.split_once('=') {
                Some((k, v)) => constraints.push((k.to_string(), v.to_string())),
                None if constraints.is_empty() => family_parts.push(segment),
                // A bare segment after constraints never matches anything.
                None => constraints.push((segment.to_string(), "\u{0}".to_string())),
            }
        }
        Self {
            family: family_parts.join("."),
            constraints,
        }
    }

    /// Whether a (family, stage, params) triple matches this pattern. A
    /// pattern without a `stage=` segment matches cases of any stage.
    pub fn matches(&self, family: &str, stage: Option<&str>, params: &ParamMap) -> bool {
        if !glob_match(&self.family, family) {
            return false;
        }
        self.constraints.iter().all(|(key, value)| {
            if key == "stage" {
                return stage.is_some_and(|s| glob_match(value, s));
            }
            params
                .get(key)
                .is_some_and(|v| glob_match(value, &v.to_string()))
        })
    }
}

/// Reject any non-trivial strongly connected component with a diagnostic
/// naming the cycle members. Iterative Tarjan, so deep chains cannot blow
/// the stack.
fn reject_cycles(cases: &[Case]) -> Result<(), ConfigError> {
    let n = cases.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;

    // Explicit DFS frame: (node, next-edge cursor).
    let mut call_stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        call_stack.push((root, 0));
        while let Some(&(v, cursor)) = call_stack.last() {
            if cursor == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(edge) = cases[v].dependencies.get(cursor) {
                if let Some(frame) = call_stack.last_mut() {
                    frame.1 += 1;
                }
                let w = edge.dep.0;
                if index[w] == usize::MAX {
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    loop {
                        match stack.pop() {
                            Some(w) => {
                                on_stack[w] = false;
                                component.push(w);
                                if w == v {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    if component.len() > 1 {
                        let mut names: Vec<String> = component
                            .into_iter()
                            .map(|i| cases[i].name.clone())
                            .collect();
                        names.sort();
                        return Err(ConfigError::DependencyCycle(names));
                    }
                    // A self-loop is also a cycle.
                    if cases[v].dependencies.iter().any(|e| e.dep.0 == v) {
                        return Err(ConfigError::DependencyCycle(vec![
                            cases[v].name.clone(),
                        ]));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm over dep→dependent edges; ties broken by arena id so
/// the order is stable across reruns.
fn topological_rank(cases: &[Case]) -> Vec<usize> {
    let n = cases.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for case in cases {
        indegree[case.id.0] = case.dependencies.len();
        for edge in &case.dependencies {
            dependents[edge.dep.0].push(case.id.0);
        }
    }

    // Smallest arena id first keeps the order deterministic across reruns.
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|&i| indegree[i] == 0).map(Reverse).collect();
    let mut rank = vec![0usize; n];
    let mut next_rank = 0usize;
    while let Some(Reverse(v)) = ready.pop() {
        rank[v] = next_rank;
        next_rank += 1;
        for &w in &dependents[v] {
            indegree[w] -= 1;
            if indegree[w] == 0 {
                ready.push(Reverse(w));
            }
        }
    }
    rank
}

fn reverse_edges(cases: &[Case]) -> Vec<Vec<CaseId>> {
    let mut dependents: Vec<Vec<CaseId>> = vec![Vec::new(); cases.len()];
    for case in cases {
        for edge in &case.dependencies {
            dependents[edge.dep.0].push(case.id);
        }
    }
    dependents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Axis, DepDecl, Expect, Generator, KeywordDecl};
    use canary_core::ParamValue;

    fn simple(family: &str) -> Generator {
        Generator::new(family, vec!["./run".to_string()])
    }

    fn freeze_all(generators: &[Generator]) -> CaseGraph {
        freeze(generators, &FreezeOptions::default()).unwrap()
    }

    #[test]
    fn expansion_names_are_deterministic() {
        let mut g = simple("grid");
        g.axes = vec![Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        }];
        let graph = freeze_all(&[g]);
        let names: Vec<&str> = graph.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["grid.np=1", "grid.np=4"]);
    }

    #[test]
    fn dependency_resolution_by_family_and_param() {
        let mut prep = simple("prep");
        prep.axes = vec![Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        }];
        let mut solve = simple("solve");
        solve.dependencies = vec![DepDecl {
            target: DepTarget::Pattern("prep.np=4".into()),
            expect: Expect::Exactly(1),
            result: ResultPredicate::pass(),
        }];
        let graph = freeze_all(&[prep, solve]);
        let solve_case = graph.by_name("solve").unwrap();
        assert_eq!(solve_case.dependencies.len(), 1);
        let dep = graph.case(solve_case.dependencies[0].dep);
        assert_eq!(dep.name, "prep.np=4");
    }

    #[test]
    fn glob_pattern_matches_all_expansions() {
        let mut prep = simple("prep");
        prep.axes = vec![Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        }];
        let mut solve = simple("solve");
        solve.dependencies = vec![DepDecl::on_pattern("prep.np=*")];
        let graph = freeze_all(&[prep, solve]);
        assert_eq!(graph.by_name("solve").unwrap().dependencies.len(), 2);
    }

    #[test]
    fn stage_targeted_pattern_matches_the_stage_case() {
        let mut sim = simple("sim");
        sim.stages = vec![crate::generator::StageDecl {
            name: "post".into(),
            when: WhenExpr::True,
        }];
        let mut report = simple("report");
        report.dependencies = vec![DepDecl {
            target: DepTarget::Pattern("sim.stage=post".into()),
            expect: Expect::Exactly(1),
            result: ResultPredicate::pass(),
        }];
        let graph = freeze_all(&[sim, report]);
        let report_case = graph.by_name("report").unwrap();
        assert_eq!(report_case.dependencies.len(), 1);
        assert_eq!(
            graph.case(report_case.dependencies[0].dep).name,
            "sim.stage=post"
        );
    }

    #[test]
    fn testname_is_an_exact_name_lookup() {
        let np_axis = || Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        };
        let mut prep = simple("prep");
        prep.axes = vec![np_axis()];
        let mut solve = simple("solve");
        solve.dependencies = vec![DepDecl {
            target: DepTarget::Name("prep.np=4".into()),
            expect: Expect::Exactly(1),
            result: ResultPredicate::pass(),
        }];
        let graph = freeze_all(&[prep, solve]);
        let solve_case = graph.by_name("solve").unwrap();
        assert_eq!(solve_case.dependencies.len(), 1);
        assert_eq!(graph.case(solve_case.dependencies[0].dep).name, "prep.np=4");

        // Unlike value= patterns, testname never globs: a star is just a
        // name that matches nothing.
        let mut prep = simple("prep");
        prep.axes = vec![np_axis()];
        let mut solve = simple("solve");
        solve.dependencies = vec![DepDecl {
            target: DepTarget::Name("prep.np=*".into()),
            expect: Expect::Any,
            result: ResultPredicate::pass(),
        }];
        let graph = freeze_all(&[prep, solve]);
        assert!(graph.by_name("solve").unwrap().dependencies.is_empty());
    }

    #[test]
    fn expect_cardinality_violation_is_fatal() {
        let mut prep = simple("prep");
        prep.axes = vec![Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        }];
        let mut solve = simple("solve");
        solve.dependencies = vec![DepDecl {
            target: DepTarget::Pattern("prep.np=*".into()),
            expect: Expect::ZeroOrOne,
            result: ResultPredicate::pass(),
        }];
        let err = freeze(&[prep, solve], &FreezeOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCardinality { .. }));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut a = simple("a");
        a.dependencies = vec![DepDecl::on_pattern("b")];
        let mut b = simple("b");
        b.dependencies = vec![DepDecl::on_pattern("a")];
        let err = freeze(&[a, b], &FreezeOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle(_)));
    }

    #[test]
    fn infeasible_resources_are_rejected() {
        let mut g = simple("big");
        g.resources = ResourceSpec::cpus(64);
        let opts = FreezeOptions {
            capacity: ResourceSpec::cpus(8),
            ..FreezeOptions::default()
        };
        let err = freeze(&[g], &opts).unwrap_err();
        assert!(matches!(err, ConfigError::InfeasibleResources { .. }));
    }

    #[test]
    fn multi_case_depends_on_every_expansion() {
        let mut g = simple("grid");
        g.analyze = true;
        g.axes = vec![Axis::Product {
            name: "np".into(),
            values: vec![ParamValue::Int(1), ParamValue::Int(4)],
            autotype: false,
        }];
        let graph = freeze_all(&[g]);
        assert_eq!(graph.cases.len(), 3);
        let multi = graph.by_name("grid").unwrap();
        assert_eq!(multi.kind, CaseKind::Multi);
        assert_eq!(multi.dependencies.len(), 2);
        assert_eq!(
            multi.params.get_tuple("np"),
            Some(&[ParamValue::Int(1), ParamValue::Int(4)][..])
        );
    }

    #[test]
    fn stages_chain_on_their_predecessor() {
        let mut g = simple("sim");
        g.stages = vec![
            crate::generator::StageDecl {
                name: "post".into(),
                when: WhenExpr::True,
            },
            crate::generator::StageDecl {
                name: "viz".into(),
                when: WhenExpr::True,
            },
        ];
        let graph = freeze_all(&[g]);
        let names: Vec<&str> = graph.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sim", "sim.stage=post", "sim.stage=viz"]);
        let viz = graph.by_name("sim.stage=viz").unwrap();
        assert_eq!(viz.dependencies.len(), 1);
        assert_eq!(graph.case(viz.dependencies[0].dep).name, "sim.stage=post");
    }

    #[test]
    fn masked_stage_relinks_to_nearest_emitted() {
        let mut g = simple("sim");
        g.stages = vec![
            crate::generator::StageDecl {
                name: "post".into(),
                when: WhenExpr::parse("option=postproc").unwrap(),
            },
            crate::generator::StageDecl {
                name: "viz".into(),
                when: WhenExpr::True,
            },
        ];
        // Option not set: "post" is not emitted, "viz" chains to the base.
        let graph = freeze_all(&[g]);
        let names: Vec<&str> = graph.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sim", "sim.stage=viz"]);
        let viz = graph.by_name("sim.stage=viz").unwrap();
        assert_eq!(graph.case(viz.dependencies[0].dep).name, "sim");
    }

    #[test]
    fn keyword_filter_drops_and_renumbers() {
        let mut fast = simple("fast");
        fast.keywords = vec![KeywordDecl {
            words: vec!["smoke".into()],
            when: WhenExpr::True,
        }];
        let mut slow = simple("slow");
        slow.keywords = vec![KeywordDecl {
            words: vec!["nightly".into()],
            when: WhenExpr::True,
        }];
        let opts = FreezeOptions {
            keyword_filter: Some(WhenExpr::parse("smoke").unwrap()),
            ..FreezeOptions::default()
        };
        let graph = freeze(&[fast, slow], &opts).unwrap();
        assert_eq!(graph.cases.len(), 1);
        assert_eq!(graph.cases[0].name, "fast");
        assert_eq!(graph.cases[0].id, CaseId(0));
    }

    #[test]
    fn guards_mask_to_skip() {
        let mut g = simple("gpu_only");
        g.guards = vec![crate::generator::Guard {
            kind: GuardKind::Enable,
            condition: WhenExpr::parse("option=gpu").unwrap(),
            reason: "requires -o gpu".into(),
        }];
        let graph = freeze_all(&[g]);
        let case = &graph.cases[0];
        assert_eq!(case.state.status, Some(Status::Skip));
        assert_eq!(case.state.reason.as_deref(), Some("requires -o gpu"));
    }

    #[test]
    fn topo_ranks_dependencies_first() {
        let mut a = simple("a");
        a.dependencies = vec![DepDecl::on_pattern("b")];
        let b = simple("b");
        let graph = freeze_all(&[a, b]);
        let a_case = graph.by_name("a").unwrap();
        let b_case = graph.by_name("b").unwrap();
        assert!(graph.topo_rank[b_case.id.0] < graph.topo_rank[a_case.id.0]);
        assert_eq!(graph.dependents[b_case.id.0], vec![a_case.id]);
    }
}

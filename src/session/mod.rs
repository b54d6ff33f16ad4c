//! The session driver.
//!
//! Runs the pipeline Discover → Freeze → Populate → Run → Finish, each
//! phase checkpointed to the session directory so `--until=PHASE` and
//! re-entrant runs on an existing session are well-defined. The batched
//! path swaps the Run phase's local dispatcher for the partitioner and
//! the outer batch queue.

pub mod batchrun;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use canary_core::WhenExpr;

use crate::batch::{partition, Batch};
use crate::case::CaseId;
use crate::config::{Phase, SessionConfig};
use crate::discover;
use crate::dispatch::{run_cases, DispatchOptions};
use crate::exec::{CaseRunner, ExecContext, ProcessRunner};
use crate::generator::Generator;
use crate::graph::{self, CaseGraph, FreezeOptions};
use crate::hooks::HookRegistry;
use crate::pool::ResourcePool;
use crate::report;
use crate::retry::RetryPolicy;
use crate::schedulers::{driver_for, CaseRecord};
use crate::stage::{stage_case, FsStager, Stager};
use crate::testfile::{TestParser, TomlParser};

use state::SessionPaths;

/// One test session: configuration, the frozen graph, and its on-disk
/// home. All mutable state lives here and is driven by exactly one task.
pub struct Session {
    /// Frozen configuration
    pub config: SessionConfig,
    /// On-disk layout
    pub paths: SessionPaths,
    /// Discovery output; drained by freeze
    pub generators: Vec<Generator>,
    /// The frozen case arena
    pub graph: CaseGraph,
    /// Registered plugins
    pub hooks: HookRegistry,
    /// Session-wide cancel flag
    pub cancel: CancellationToken,
}

impl Session {
    /// A new session rooted at `root` (typically `TestResults/`).
    pub fn create(root: impl Into<PathBuf>, config: SessionConfig) -> Self {
        Self {
            config,
            paths: SessionPaths::new(root),
            generators: Vec::new(),
            graph: CaseGraph::default(),
            hooks: HookRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Reload an existing session's frozen configuration.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let paths = SessionPaths::new(root);
        let config = state::load_config(&paths)?;
        Ok(Self {
            config,
            paths,
            generators: Vec::new(),
            graph: CaseGraph::default(),
            hooks: HookRegistry::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Phase 1: parse test files into generators.
    pub fn discover(&mut self, parser: &dyn TestParser) -> anyhow::Result<()> {
        self.hooks.session_initialize(&self.config);
        self.generators = discover::discover(&self.config.roots, parser)?;
        self.hooks.session_discovery(&self.generators);
        Ok(())
    }

    /// Phase 2: expand, resolve, validate; then persist the frozen
    /// configuration and restore any terminal statuses a previous run
    /// recorded.
    pub fn freeze(&mut self) -> anyhow::Result<()> {
        let keyword_filter = match &self.config.keyword_expr {
            None => None,
            Some(expr) => Some(
                WhenExpr::parse(expr)
                    .map_err(|e| anyhow::anyhow!("invalid -k expression '{expr}': {e}"))?,
            ),
        };
        let opts = FreezeOptions {
            platforms: self.config.platforms.clone(),
            options: self.config.options.clone(),
            keyword_filter,
            capacity: self.config.capacity,
        };
        self.graph = graph::freeze(&self.generators, &opts)?;
        // Generators live only between discover and freeze.
        self.generators.clear();

        state::save_config(&self.paths, &self.config)?;
        let restored = state::restore_statuses(&self.paths, &mut self.graph);
        if restored > 0 {
            tracing::info!(restored, "restored finished cases from a previous run");
        }
        tracing::info!(cases = self.graph.cases.len(), "froze case graph");
        Ok(())
    }

    /// Phase 3: create working directories, stage inputs, write locks.
    pub fn populate(&mut self, stager: &dyn Stager) -> anyhow::Result<()> {
        let platforms = self.config.platforms.clone();
        let options = self.config.options.clone();
        for i in 0..self.graph.cases.len() {
            let workdir = self.graph.cases[i].workdir(self.paths.root());
            std::fs::create_dir_all(&workdir)
                .with_context(|| format!("cannot create {}", workdir.display()))?;
            if self.graph.cases[i].terminal_status().is_none() {
                stage_case(
                    stager,
                    &mut self.graph.cases[i],
                    &workdir,
                    &platforms,
                    &options,
                );
            }
            state::write_lock(&self.paths, &self.graph, CaseId(i))?;
            self.hooks.test_setup(&self.graph.cases[i]);
        }
        Ok(())
    }

    /// Phase 4: execute, locally or batched.
    pub async fn run(&mut self, runner: Arc<dyn CaseRunner>) -> anyhow::Result<()> {
        let watchdog = self.config.session_timeout().map(|budget| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                tracing::warn!("session timeout reached, cancelling");
                cancel.cancel();
            })
        });

        let result = match self.config.batch.clone() {
            None => self.run_local(runner).await,
            Some(batch_config) => self.run_batched_path(&batch_config).await,
        };
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        result
    }

    async fn run_local(&mut self, runner: Arc<dyn CaseRunner>) -> anyhow::Result<()> {
        let mut pool = ResourcePool::new(self.config.capacity);
        let ctx = ExecContext {
            session_root: self.paths.root().to_path_buf(),
            cancel: self.cancel.clone(),
        };
        let opts = DispatchOptions {
            max_workers: self.config.workers.map(|w| w.max(1)),
        };
        run_cases(
            &mut self.graph,
            &mut pool,
            runner,
            &ctx,
            None,
            &opts,
            &self.hooks,
        )
        .await?;
        Ok(())
    }

    async fn run_batched_path(
        &mut self,
        batch_config: &crate::config::BatchConfig,
    ) -> anyhow::Result<()> {
        let candidates: Vec<CaseId> = self
            .graph
            .cases
            .iter()
            .filter(|c| c.terminal_status().is_none())
            .map(|c| c.id)
            .collect();
        let estimates = state::prior_durations(&self.paths, &self.graph);
        let batches: Vec<Batch> = partition(
            &self.graph,
            &candidates,
            &estimates,
            &batch_config.spec,
            batch_config.workers,
        );
        for batch in &batches {
            for &id in &batch.cases {
                self.graph.case_mut(id).state.batch = Some(batch.id);
            }
        }
        tracing::info!(
            batches = batches.len(),
            cases = candidates.len(),
            scheduler = %batch_config.scheduler,
            "tiled cases into batches"
        );

        let driver = driver_for(&batch_config.scheduler)?;
        let retry = RetryPolicy::with_limit(self.config.retry_limit);
        batchrun::run_batched(
            &mut self.graph,
            &batches,
            batch_config,
            driver.as_ref(),
            &self.paths,
            retry,
            &self.cancel,
        )
        .await
    }

    /// Phase 5: persist final statuses, dispatch finish hooks, and return
    /// the session exit code.
    pub fn finish(&mut self) -> anyhow::Result<i32> {
        for id in 0..self.graph.cases.len() {
            state::write_lock(&self.paths, &self.graph, CaseId(id))?;
            self.hooks.test_finish(&self.graph.cases[id]);
        }
        self.hooks.session_finish(&self.graph);
        Ok(report::exit_code(&self.graph))
    }

    /// The whole pipeline, stopping after `until` when given. Returns the
    /// session exit code (0 for early stops).
    pub async fn execute(
        &mut self,
        until: Option<Phase>,
        runner: Arc<dyn CaseRunner>,
    ) -> anyhow::Result<i32> {
        let stop_after = |phase: Phase| until == Some(phase);

        self.discover(&TomlParser)?;
        if stop_after(Phase::Discover) {
            return Ok(report::EXIT_OK);
        }
        self.freeze()?;
        if stop_after(Phase::Freeze) {
            return Ok(report::EXIT_OK);
        }
        self.populate(&FsStager)?;
        if stop_after(Phase::Populate) {
            return Ok(report::EXIT_OK);
        }
        self.run(runner).await?;
        if stop_after(Phase::Run) {
            return Ok(report::exit_code(&self.graph));
        }
        self.finish()
    }
}

/// Inner entry point of a scheduler allocation: run one batch's cases
/// against the frozen session and write the artifacts the outer queue
/// harvests.
pub async fn run_batch(root: &Path, batch_id: usize) -> anyhow::Result<i32> {
    let mut session = Session::load(root)?;
    session.discover(&TomlParser)?;
    session.freeze()?;

    let record = state::read_batch_record(&session.paths, batch_id)?;
    let subset: Vec<CaseId> = record
        .cases
        .iter()
        .map(|&i| CaseId(i))
        .filter(|&id| id.0 < session.graph.cases.len())
        .collect();
    if subset.len() != record.cases.len() {
        anyhow::bail!(
            "batch {batch_id} references cases outside the frozen graph; \
             the session changed since tiling"
        );
    }
    for &id in &subset {
        session.graph.case_mut(id).state.batch = Some(batch_id);
    }

    // The allocation is the pool: the batch's summed requirement is what
    // the scheduler granted us.
    let mut pool = ResourcePool::new(record.resources);
    state::write_pool_snapshot(&session.paths, batch_id, &pool.snapshot())?;

    let ctx = ExecContext {
        session_root: session.paths.root().to_path_buf(),
        cancel: session.cancel.clone(),
    };
    run_cases(
        &mut session.graph,
        &mut pool,
        Arc::new(ProcessRunner),
        &ctx,
        Some(&subset),
        &DispatchOptions::default(),
        &session.hooks,
    )
    .await?;

    let records: Vec<CaseRecord> = subset
        .iter()
        .map(|&id| {
            let case = session.graph.case(id);
            let lock = state::CaseLock::from_case(case, &session.graph);
            state::write_lock(&session.paths, &session.graph, id)?;
            Ok(CaseRecord {
                name: case.name.clone(),
                status: case.terminal_status().unwrap_or(canary_core::Status::Fail),
                reason: case.state.reason.clone(),
                exit_code: case.state.exit_code,
                duration_secs: lock.duration_secs(),
            })
        })
        .collect::<anyhow::Result<_>>()?;
    state::write_results(&session.paths, batch_id, &records)?;
    Ok(report::EXIT_OK)
}

//! Flux driver: `flux batch` / `flux jobs` / `flux cancel`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::batch::Batch;

use super::{walltime, PollState, SchedulerDriver, SubmitHandle};

/// Submits batches through Flux.
#[derive(Debug, Default)]
pub struct FluxDriver;

#[async_trait]
impl SchedulerDriver for FluxDriver {
    fn name(&self) -> &'static str {
        "flux"
    }

    async fn submit(&self, script: &Path) -> anyhow::Result<SubmitHandle> {
        let output = Command::new("flux")
            .args(["batch", "--output=none"])
            .arg(script)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run flux batch: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "flux batch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            anyhow::bail!("flux batch printed no job id");
        }
        Ok(SubmitHandle { id })
    }

    async fn poll(&self, handle: &SubmitHandle) -> anyhow::Result<PollState> {
        let output = Command::new("flux")
            .args(["jobs", "-n", "-o", "{state}", &handle.id])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run flux jobs: {e}"))?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || state.is_empty() {
            return Ok(PollState::Done(0));
        }
        Ok(match state.as_str() {
            "DEPEND" | "PRIORITY" | "SCHED" => PollState::Queued,
            "INACTIVE" => PollState::Done(0),
            _ => PollState::Running,
        })
    }

    async fn cancel(&self, handle: &SubmitHandle) -> anyhow::Result<()> {
        let output = Command::new("flux")
            .args(["cancel", &handle.id])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run flux cancel: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "flux cancel failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn script_header(&self, batch: &Batch) -> Vec<String> {
        let nodes = batch.resources.nodes.max(1);
        vec![
            format!("# flux: --job-name=canary.{}", batch.id),
            format!("# flux: -N {nodes}"),
            format!("# flux: -t {}", walltime(batch)),
        ]
    }
}

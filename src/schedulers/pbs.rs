//! PBS driver: `qsub` / `qstat` / `qdel`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::batch::Batch;

use super::{walltime, PollState, SchedulerDriver, SubmitHandle};

/// Submits batches through PBS / Torque.
#[derive(Debug, Default)]
pub struct PbsDriver;

#[async_trait]
impl SchedulerDriver for PbsDriver {
    fn name(&self) -> &'static str {
        "pbs"
    }

    async fn submit(&self, script: &Path) -> anyhow::Result<SubmitHandle> {
        let output = Command::new("qsub")
            .arg(script)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run qsub: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "qsub failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            anyhow::bail!("qsub printed no job id");
        }
        Ok(SubmitHandle { id })
    }

    async fn poll(&self, handle: &SubmitHandle) -> anyhow::Result<PollState> {
        let output = Command::new("qstat")
            .args(["-f", &handle.id])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run qstat: {e}"))?;
        if !output.status.success() {
            // Unknown job: it has finished and been purged from the queue.
            return Ok(PollState::Done(0));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("job_state = "))
            .unwrap_or("")
            .to_string();
        Ok(match state.as_str() {
            "Q" | "H" | "W" | "T" => PollState::Queued,
            "F" | "E" => PollState::Done(0),
            _ => PollState::Running,
        })
    }

    async fn cancel(&self, handle: &SubmitHandle) -> anyhow::Result<()> {
        let output = Command::new("qdel")
            .arg(&handle.id)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run qdel: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "qdel failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn script_header(&self, batch: &Batch) -> Vec<String> {
        let nodes = batch.resources.nodes.max(1);
        vec![
            format!("#PBS -N canary.{}", batch.id),
            format!("#PBS -l select={nodes}"),
            format!("#PBS -l walltime={}", walltime(batch)),
            "#PBS -j oe".to_string(),
        ]
    }
}

//! Slurm driver: `sbatch` / `squeue` / `scancel`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::batch::Batch;

use super::{walltime, PollState, SchedulerDriver, SubmitHandle};

/// Submits batches through Slurm.
#[derive(Debug, Default)]
pub struct SlurmDriver;

#[async_trait]
impl SchedulerDriver for SlurmDriver {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, script: &Path) -> anyhow::Result<SubmitHandle> {
        let output = Command::new("sbatch")
            .arg("--parsable")
            .arg(script)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run sbatch: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "sbatch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // --parsable prints `jobid[;cluster]`.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .trim()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            anyhow::bail!("sbatch printed no job id");
        }
        Ok(SubmitHandle { id })
    }

    async fn poll(&self, handle: &SubmitHandle) -> anyhow::Result<PollState> {
        let output = Command::new("squeue")
            .args(["-h", "-o", "%T", "-j", &handle.id])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run squeue: {e}"))?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // An empty listing (or an "invalid job id" error) means the job has
        // left the queue; the batch's own artifacts carry case statuses.
        if state.is_empty() {
            return Ok(PollState::Done(0));
        }
        Ok(match state.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => PollState::Queued,
            "COMPLETED" | "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL"
            | "PREEMPTED" | "OUT_OF_MEMORY" => PollState::Done(0),
            _ => PollState::Running,
        })
    }

    async fn cancel(&self, handle: &SubmitHandle) -> anyhow::Result<()> {
        let output = Command::new("scancel")
            .arg(&handle.id)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("cannot run scancel: {e}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "scancel failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn script_header(&self, batch: &Batch) -> Vec<String> {
        let nodes = batch.resources.nodes.max(1);
        let mut lines = vec![
            format!("#SBATCH --job-name=canary.{}", batch.id),
            format!("#SBATCH --nodes={nodes}"),
            format!("#SBATCH --time={}", walltime(batch)),
            "#SBATCH --output=batch-%j.out".to_string(),
        ];
        if batch.resources.gpus > 0 {
            lines.push(format!("#SBATCH --gpus={}", batch.resources.gpus));
        }
        lines
    }
}

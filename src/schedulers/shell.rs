//! Local-subprocess "scheduler".
//!
//! Runs each submission script as a child of this process. Useful on
//! workstations and in tests: the batch path behaves exactly as it would
//! under a real workload manager, minus the queueing.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::batch::Batch;

use super::{PollState, SchedulerDriver, SubmitHandle};

/// Spawns submission scripts as local children.
#[derive(Debug, Default)]
pub struct ShellDriver {
    children: Mutex<HashMap<String, Child>>,
}

#[async_trait]
impl SchedulerDriver for ShellDriver {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn submit(&self, script: &Path) -> anyhow::Result<SubmitHandle> {
        let child = Command::new("bash")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("cannot spawn '{}': {e}", script.display()))?;
        let id = Uuid::new_v4().to_string();
        self.children.lock().await.insert(id.clone(), child);
        Ok(SubmitHandle { id })
    }

    async fn poll(&self, handle: &SubmitHandle) -> anyhow::Result<PollState> {
        let mut children = self.children.lock().await;
        let child = children
            .get_mut(&handle.id)
            .ok_or_else(|| anyhow::anyhow!("unknown batch handle '{}'", handle.id))?;
        match child.try_wait()? {
            Some(exit) => {
                children.remove(&handle.id);
                Ok(PollState::Done(exit.code().unwrap_or(-1)))
            }
            None => Ok(PollState::Running),
        }
    }

    async fn cancel(&self, handle: &SubmitHandle) -> anyhow::Result<()> {
        if let Some(mut child) = self.children.lock().await.remove(&handle.id) {
            let _ = child.kill().await;
        }
        Ok(())
    }

    fn script_header(&self, _batch: &Batch) -> Vec<String> {
        Vec::new()
    }
}

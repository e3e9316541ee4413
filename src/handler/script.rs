//! Handlers that run glue source through an external interpreter.
//!
//! The source is written once to `<glue_dir>/<jobId>_<version><suffix>` and
//! run as `<interpreter> <script> <params> <shardIndex> <shardTotal>`, with
//! stdout and stderr appended to the trigger's log file.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{HandlerError, HandlerKind, JobContext, JobHandler, Result};
use crate::types::{GlueType, JobId};

pub struct ScriptJobHandler {
    job_id: JobId,
    glue_type: GlueType,
    version: i64,
    source: String,
    script_path: PathBuf,
}

impl ScriptJobHandler {
    /// Creates a handler for a script-type glue and removes script files
    /// left behind by earlier versions of the same job.
    ///
    /// Returns `None` when `glue_type` is not a script type.
    pub fn new(
        job_id: JobId,
        glue_type: GlueType,
        version: i64,
        source: impl Into<String>,
        glue_dir: &Path,
    ) -> Option<Self> {
        let suffix = glue_type.suffix()?;
        remove_stale_scripts(glue_dir, job_id);
        Some(ScriptJobHandler {
            job_id,
            glue_type,
            version,
            source: source.into(),
            script_path: glue_dir.join(format!("{job_id}_{version}{suffix}")),
        })
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    fn ensure_script(&self) -> Result<()> {
        if self.script_path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.script_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.script_path, &self.source)?;
        Ok(())
    }
}

fn remove_stale_scripts(glue_dir: &Path, job_id: JobId) {
    let Ok(entries) = fs::read_dir(glue_dir) else {
        return;
    };
    let prefix = format!("{job_id}_");
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "failed to remove stale script");
            } else {
                debug!(path = %entry.path().display(), "removed stale script");
            }
        }
    }
}

#[async_trait]
impl JobHandler for ScriptJobHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let interpreter = self
            .glue_type
            .interpreter()
            .ok_or_else(|| HandlerError::msg(format!("glueType[{}] is not a script type", self.glue_type)))?;

        self.ensure_script()?;
        ctx.log(format!("----------- script file:{} -----------", self.script_path.display()));

        let log_file = OpenOptions::new().create(true).append(true).open(ctx.log_path())?;
        let stderr_file = log_file.try_clone()?;

        let mut child = Command::new(interpreter)
            .arg(&self.script_path)
            .arg(ctx.params().unwrap_or_default())
            .arg(ctx.shard_index().to_string())
            .arg(ctx.shard_total().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()?;

        let status = child.wait().await?;
        debug!(job_id = %self.job_id, status = ?status.code(), "script finished");

        match status.code() {
            Some(0) => ctx.handle_success(None),
            Some(code) => ctx.handle_fail(format!("script exit value({code}) is failed")),
            None => ctx.handle_fail("script terminated by signal"),
        }
        Ok(())
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Script {
            glue_type: self.glue_type,
            version: self.version,
        }
    }
}

// src/exec/command.rs

//! Worker that runs a shell command per task.

use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::context::WorkerContext;
use super::worker::{BoxFuture, Worker};
use crate::state::Task;
use crate::types::Payload;

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `cmd` through the platform shell for every task.
///
/// The task is described to the process through environment variables:
/// `AGENTCOORD_TENANT`, `AGENTCOORD_WORKFLOW_ID`, `AGENTCOORD_TASK_ID`,
/// `AGENTCOORD_TASK_TYPE` and `AGENTCOORD_TASK_DATA` (the payload as JSON).
///
/// Exit code 0 completes the task with `{"exit_code": 0, "stdout": [...]}`.
/// Any other exit fails it with the tail of stderr.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    cmd: String,
    env: BTreeMap<String, String>,
}

impl CommandWorker {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, task: &Task, ctx: &WorkerContext) -> Result<Payload> {
        info!(
            task_id = %task.id,
            worker = ctx.worker_id(),
            cmd = %self.cmd,
            "starting worker process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.envs(&self.env)
            .env("AGENTCOORD_TENANT", ctx.tenant())
            .env("AGENTCOORD_WORKFLOW_ID", task.workflow_id.to_string())
            .env("AGENTCOORD_TASK_ID", task.id.to_string())
            .env("AGENTCOORD_TASK_TYPE", &task.task_type)
            .env("AGENTCOORD_TASK_DATA", serde_json::to_string(&task.payload)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for worker '{}'", ctx.worker_id()))?;

        let stdout = child.stdout.take().context("stdout pipe missing")?;
        let stderr = child.stderr.take().context("stderr pipe missing")?;

        let task_id = task.id;
        let read_stdout = async move {
            let mut out = Vec::new();
            for_each_line(stdout, |line| {
                debug!(%task_id, "stdout: {}", line);
                out.push(line);
            })
            .await;
            out
        };
        let read_stderr = async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for_each_line(stderr, |line| {
                debug!(%task_id, "stderr: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            })
            .await;
            Vec::from(tail)
        };

        let (stdout_lines, stderr_tail, status) = tokio::join!(read_stdout, read_stderr, child.wait());
        let status = status.with_context(|| format!("waiting for process of task {task_id}"))?;
        let code = status.code().unwrap_or(-1);

        info!(
            %task_id,
            worker = ctx.worker_id(),
            exit_code = code,
            success = status.success(),
            "worker process exited"
        );

        if !status.success() {
            bail!("command exited with status {code}: {}", stderr_tail.join("\n"));
        }

        Ok(json!({ "exit_code": code, "stdout": stdout_lines }))
    }
}

impl Worker for CommandWorker {
    fn perform<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<Payload>> {
        Box::pin(self.run(task, ctx))
    }
}

/// Feed every line of `pipe` to `on_line` until EOF, decoding invalid
/// UTF-8 lossily. The pipe is drained to the end so the child never blocks
/// on a full pipe.
async fn for_each_line<R: AsyncRead + Unpin>(pipe: R, mut on_line: impl FnMut(String)) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                on_line(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                warn!(error = %e, "failed to read worker process output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::AuditRecorder;
    use crate::store::InMemoryStore;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx() -> WorkerContext {
        WorkerContext::new("shell", Arc::new(InMemoryStore::new()), AuditRecorder::new("acme"))
    }

    fn task(data: Payload) -> Task {
        Task::pending("acme", Uuid::new_v4(), "shell", "run", data, vec![])
    }

    #[tokio::test]
    async fn captures_stdout_and_exposes_task_env() {
        let worker = CommandWorker::new("echo \"$AGENTCOORD_TASK_TYPE\"; echo \"$AGENTCOORD_TASK_DATA\"");
        let result = worker.perform(&task(json!({"n": 1})), &ctx()).await.unwrap();
        assert_eq!(result["exit_code"], 0);
        assert_eq!(result["stdout"], json!(["run", "{\"n\":1}"]));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr_tail() {
        let worker = CommandWorker::new("echo broken >&2; exit 3");
        let err = worker.perform(&task(json!({})), &ctx()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("broken"), "{msg}");
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_cut_stdout_short() {
        let worker = CommandWorker::new("printf 'a\\377b\\n'; for i in 1 2 3; do echo line$i; done");
        let result = worker.perform(&task(json!({})), &ctx()).await.unwrap();
        let lines = result["stdout"].as_array().unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!("a\u{FFFD}b"));
        assert_eq!(lines[3], json!("line3"));
    }

    #[tokio::test]
    async fn stderr_tail_keeps_only_the_last_lines() {
        let worker = CommandWorker::new("for i in $(seq 1 30); do echo err$i >&2; done; exit 1");
        let msg = worker.perform(&task(json!({})), &ctx()).await.unwrap_err().to_string();
        assert!(msg.contains("err30"), "{msg}");
        assert!(msg.contains("err11"), "{msg}");
        assert!(!msg.contains("err10"), "{msg}");
    }

    #[tokio::test]
    async fn configured_env_is_passed_through() {
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hi".to_string());
        let worker = CommandWorker::new("echo $GREETING").with_env(env);
        let result = worker.perform(&task(json!({})), &ctx()).await.unwrap();
        assert_eq!(result["stdout"], json!(["hi"]));
    }
}

//! Container-backed sandbox driven through the runtime CLI.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::archive::pack_script;
use super::provider::{ExecutionOutput, SandboxProvider, SandboxSession, SandboxSpec, SessionState};

/// Provider that creates one throwaway container per session.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    /// Container runtime CLI binary.
    cli: String,
    spec: SandboxSpec,
}

impl DockerSandbox {
    pub fn new(spec: SandboxSpec) -> Self {
        Self::with_cli("docker", spec)
    }

    /// Creates a provider using a custom runtime CLI (e.g. `podman`).
    pub fn with_cli(cli: impl Into<String>, spec: SandboxSpec) -> Self {
        Self {
            cli: cli.into(),
            spec,
        }
    }

    /// Pulls the base image unless it is already cached locally.
    async fn ensure_image(&self) -> Result<()> {
        let inspect = Command::new(&self.cli)
            .args(["image", "inspect", &self.spec.base_image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                Error::SandboxUnavailable(format!("cannot invoke {}: {}", self.cli, e))
            })?;

        if inspect.success() {
            return Ok(());
        }

        tracing::info!(image = %self.spec.base_image, "pulling sandbox image");

        let output = Command::new(&self.cli)
            .args(["pull", &self.spec.base_image])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::SandboxUnavailable(format!("cannot invoke {}: {}", self.cli, e))
            })?;

        if !output.status.success() {
            return Err(Error::SandboxUnavailable(format!(
                "failed to pull {}: {}",
                self.spec.base_image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    /// Arguments for provisioning a detached, resource-capped container.
    ///
    /// The root filesystem is read-only; `work_dir` is an anonymous volume so
    /// `cp` can still inject the script, and `/tmp` is a small tmpfs.
    fn run_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--detach".to_string(),
            "--memory".to_string(),
            self.spec.memory_limit.clone(),
            "--memory-swap".to_string(),
            self.spec.memory_limit.clone(),
            "--network".to_string(),
            "none".to_string(),
            "--read-only".to_string(),
            "--volume".to_string(),
            self.spec.work_dir.clone(),
            "--tmpfs".to_string(),
            "/tmp:rw,noexec,nosuid,size=64m".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--workdir".to_string(),
            self.spec.work_dir.clone(),
            self.spec.base_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            self.spec.keep_alive.clone(),
        ]
    }
}

#[async_trait]
impl SandboxProvider for DockerSandbox {
    type Session = DockerSession;

    async fn start(&self) -> Result<DockerSession> {
        self.ensure_image().await?;

        let output = Command::new(&self.cli)
            .args(self.run_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::SandboxUnavailable(format!("cannot invoke {}: {}", self.cli, e))
            })?;

        if !output.status.success() {
            return Err(Error::SandboxUnavailable(format!(
                "container launch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(Error::SandboxUnavailable(
                "container runtime returned no container id".to_string(),
            ));
        }

        tracing::info!(
            container = %id,
            image = %self.spec.base_image,
            memory = %self.spec.memory_limit,
            "started sandbox session"
        );

        Ok(DockerSession {
            id,
            cli: self.cli.clone(),
            spec: self.spec.clone(),
            state: SessionState::Ready,
        })
    }

    fn spec(&self) -> &SandboxSpec {
        &self.spec
    }
}

/// A running container. Removed on [`SandboxSession::stop`], or on drop as a fallback.
pub struct DockerSession {
    id: String,
    cli: String,
    spec: SandboxSpec,
    state: SessionState,
}

impl DockerSession {
    /// Copies the packaged script into the working directory via `cp -`.
    async fn inject(&self, code: &str) -> Result<()> {
        let archive = pack_script(&self.spec.script_name, code)?;
        let target = format!("{}:{}", self.id, self.spec.work_dir);

        let mut child = Command::new(&self.cli)
            .args(["cp", "-", &target])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SandboxExecution(format!("failed to spawn copy: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&archive)
                .await
                .map_err(|e| Error::SandboxExecution(format!("failed to stream archive: {}", e)))?;
            // Dropping stdin closes the pipe so the copy can finish.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::SandboxExecution(format!("copy did not finish: {}", e)))?;

        if !output.status.success() {
            return Err(Error::SandboxExecution(format!(
                "failed to copy code into session: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    fn exec_args(&self) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--workdir".to_string(),
            self.spec.work_dir.clone(),
            self.id.clone(),
            self.spec.interpreter.clone(),
            self.spec.script_name.clone(),
        ]
    }
}

#[async_trait]
impl SandboxSession for DockerSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn run(&mut self, code: &str) -> Result<ExecutionOutput> {
        if self.state != SessionState::Ready {
            return Err(Error::SandboxExecution(format!(
                "session {} is {:?}, not ready",
                self.id, self.state
            )));
        }

        self.state = SessionState::Running;
        let result = self.execute(code).await;
        self.state = SessionState::Ready;
        result
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }

        let output = Command::new(&self.cli)
            .args(["rm", "--force", &self.id])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::SandboxTeardown {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::SandboxTeardown {
                id: self.id.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.state = SessionState::Stopped;
        tracing::info!(container = %self.id, "stopped sandbox session");
        Ok(())
    }
}

impl DockerSession {
    async fn execute(&self, code: &str) -> Result<ExecutionOutput> {
        self.inject(code).await?;

        let output = Command::new(&self.cli)
            .args(self.exec_args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::SandboxExecution(format!("failed to exec: {}", e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
        tracing::debug!(container = %self.id, exit_code, "executed generated code");

        Ok(ExecutionOutput {
            exit_code,
            output: combined,
        })
    }
}

impl Drop for DockerSession {
    fn drop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }

        tracing::warn!(container = %self.id, "session dropped without stop, forcing removal");
        let cli = self.cli.clone();
        let id = self.id.clone();
        self.state = SessionState::Stopped;

        // Off the async workers when a runtime is around, inline otherwise.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || force_remove(&cli, &id));
            }
            Err(_) => force_remove(&cli, &id),
        }
    }
}

fn force_remove(cli: &str, id: &str) {
    match std::process::Command::new(cli)
        .args(["rm", "--force", id])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            tracing::info!(container = %id, "removed dropped sandbox session")
        }
        Ok(status) => {
            tracing::error!(container = %id, %status, "failed to remove container on drop")
        }
        Err(e) => {
            tracing::error!(container = %id, error = %e, "failed to remove container on drop")
        }
    }
}

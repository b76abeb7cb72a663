//! Docker CLI build engine

use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::deploy::engine::{BuildEngine, EngineEvent, EngineStream};
use crate::errors::EngineError;

/// Docker engine options
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Path or name of the docker binary
    pub binary: String,

    /// Overlay network services are attached to
    pub network: Option<String>,

    /// Labels added to every created service
    pub service_labels: Vec<(String, String)>,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            network: None,
            service_labels: Vec::new(),
        }
    }
}

/// Build engine backed by the docker CLI
pub struct DockerEngine {
    options: DockerOptions,
}

impl DockerEngine {
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.options.binary.clone(),
            source,
        }
    }

    /// Version of the docker daemon, used by diagnostics
    pub async fn server_version(&self) -> Result<String, EngineError> {
        let mut cmd = self.command();
        cmd.args(["version", "--format", "{{.Server.Version}}"]);
        let output = self.run(cmd, "docker version").await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl BuildEngine for DockerEngine {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<EngineStream, EngineError> {
        info!("Building image {} from {}", tag, context.display());

        let mut child = self
            .command()
            .args(["build", "--progress=plain", "--tag", tag])
            .arg(context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // BuildKit writes progress to stderr, the classic builder to stdout
        let (tx, rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        let state = BuildOutput {
            lines: rx,
            child: Some(child),
            image: tag.to_string(),
            last_error: None,
        };
        Ok(futures::stream::unfold(state, BuildOutput::next_event).boxed())
    }

    async fn create_service(&self, image: &str, name: &str) -> Result<String, EngineError> {
        if let Some(service_id) = self.existing_service(name).await? {
            return self.update_service(&service_id, image, name).await;
        }

        info!("Creating service {} from image {}", name, image);

        let mut cmd = self.command();
        cmd.args(["service", "create", "--detach", "--quiet", "--name", name]);
        if let Some(network) = &self.options.network {
            cmd.args(["--network", network]);
        }
        for (key, value) in &self.options.service_labels {
            cmd.arg("--label").arg(format!("{}={}", key, value));
        }
        cmd.arg(image);

        let output = self.run(cmd, "docker service create").await?;
        let service_id = last_line(&output.stdout)
            .ok_or_else(|| EngineError::UnexpectedOutput("empty service id".to_string()))?;

        debug!("Service {} created with id {}", name, service_id);
        Ok(service_id)
    }
}

impl DockerEngine {
    async fn run(&self, mut cmd: Command, label: &str) -> Result<Output, EngineError> {
        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: label.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Id of the service called `name`, if one exists
    async fn existing_service(&self, name: &str) -> Result<Option<String>, EngineError> {
        let mut cmd = self.command();
        cmd.args(["service", "inspect", "--format", "{{.ID}}", name]);

        match self.run(cmd, "docker service inspect").await {
            Ok(output) => Ok(last_line(&output.stdout)),
            Err(EngineError::CommandFailed { stderr, .. })
                if stderr.to_ascii_lowercase().contains("no such service") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Roll an existing service over to a freshly built image
    async fn update_service(
        &self,
        service_id: &str,
        image: &str,
        name: &str,
    ) -> Result<String, EngineError> {
        info!("Updating service {} to image {}", name, image);

        // the tag is reused on redeploy, so force the rollout
        let mut cmd = self.command();
        cmd.args(["service", "update", "--detach", "--quiet", "--force", "--image", image, name]);
        self.run(cmd, "docker service update").await?;

        debug!("Service {} ({}) updated", name, service_id);
        Ok(service_id.to_string())
    }
}

fn last_line(output: &[u8]) -> Option<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

/// Forward every line of `reader`, decoding invalid UTF-8 lossily
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read docker build output: {}", e);
                let _ = tx
                    .send(format!("ERROR: failed to read build output: {}", e))
                    .await;
                break;
            }
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// State of a running `docker build`; owns the child so that dropping the
/// stream kills the build
struct BuildOutput {
    lines: mpsc::Receiver<String>,
    child: Option<Child>,
    image: String,
    last_error: Option<String>,
}

impl BuildOutput {
    async fn next_event(mut self) -> Option<(EngineEvent, Self)> {
        if let Some(line) = self.lines.recv().await {
            let event = classify_line(line);
            if let EngineEvent::Error(text) = &event {
                self.last_error = Some(text.clone());
            }
            return Some((event, self));
        }

        // both pipes closed, collect the exit status once
        let mut child = self.child.take()?;
        let event = match child.wait().await {
            Ok(status) if status.success() => EngineEvent::Succeeded {
                image: self.image.clone(),
            },
            Ok(status) => EngineEvent::Failed {
                detail: self.failure_detail(Some(status)),
            },
            Err(e) => EngineEvent::Failed {
                detail: format!("failed to wait for docker build: {}", e),
            },
        };
        Some((event, self))
    }

    fn failure_detail(&self, status: Option<ExitStatus>) -> String {
        match (&self.last_error, status) {
            (Some(error), _) => error.clone(),
            (None, Some(status)) => format!("docker build exited with {}", status),
            (None, None) => "docker build failed".to_string(),
        }
    }
}

/// Sort a line of build output into progress or error output
pub fn classify_line(line: String) -> EngineEvent {
    let body = strip_step_prefix(&line);
    let is_error = body.starts_with("ERROR")
        || body.to_ascii_lowercase().starts_with("error:")
        || body.contains("returned a non-zero code");

    if is_error {
        EngineEvent::Error(line)
    } else {
        EngineEvent::Log(line)
    }
}

/// BuildKit prefixes plain progress with `#<step> `
fn strip_step_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('#') {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            return rest[digits..].trim_start();
        }
    }
    trimmed
}

//! Container execution with guaranteed teardown.
//!
//! Every run follows the same discipline: create, start, collect combined
//! output, then stop and remove the container no matter how the run ended.
//! A failed run must never leave a container behind.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Error;

/// What to run and how to mount it.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    pub command: Vec<String>,
    /// Docker bind specs, `host:container:mode`.
    pub binds: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
}

/// Combined result of a finished container run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i64,
    /// Interleaved stdout and stderr, in arrival order.
    pub output: String,
}

/// Seam over the container engine so measurement logic can be exercised
/// without a Docker daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput, Error>;
}

/// Docker-backed runtime.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new() -> Result<Self, Error> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Docker(format!("failed to connect to Docker daemon: {e}")))?;
        Ok(Self { docker })
    }

    async fn run_to_completion(&self, name: &str) -> Result<RunOutput, Error> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Docker(format!("failed to start container {name}: {e}")))?;

        let mut logs = self.docker.logs(
            name,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(log) => output.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) => {
                    return Err(Error::Docker(format!(
                        "failed to read output of container {name}: {e}"
                    )))
                }
            }
        }

        let mut wait = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);
        let exit_code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(Error::Docker(format!(
                    "failed to wait for container {name}: {e}"
                )))
            }
            None => {
                return Err(Error::Docker(format!(
                    "wait stream for container {name} ended without a status"
                )))
            }
        };

        debug!("container {name} exited with status {exit_code}");
        Ok(RunOutput { exit_code, output })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput, Error> {
        let name = format!("enclave-measure-{}", Uuid::new_v4());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            entrypoint: spec.entrypoint.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::Docker(format!("failed to create container: {e}")))?;

        let result = self.run_to_completion(&name).await;

        // Teardown happens on every exit path, success or failure.
        let _ = self
            .docker
            .stop_container(&name, Some(StopContainerOptions { t: 1 }))
            .await;
        if let Err(e) = self
            .docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!("failed to remove container {name}: {e}");
        }

        result
    }
}

//! Deployment status alphabet and the polling state machine.
//!
//! The deploy phase depends on observing specific intermediate states: the
//! pipeline only hands secrets to an instance it has seen waiting in
//! `Initializing`. Observing a state *beyond* the expected one therefore is
//! not a tolerated race but a protocol violation — an instance that went
//! straight to `Running` may be serving without the secrets it was supposed
//! to receive first.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::config::AppConf;
use crate::context::{DeploymentContext, InstanceInfo};
use crate::crypto::EncryptedArtifact;
use crate::error::Error;

/// Remote instance status, also the alphabet of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Spawning,
    Initializing,
    Running,
    OnError,
    Stopped,
}

impl DeploymentStatus {
    /// Position along the normal progression, `None` for absorbing
    /// failure states.
    fn progress_rank(self) -> Option<u8> {
        match self {
            DeploymentStatus::Spawning => Some(0),
            DeploymentStatus::Initializing => Some(1),
            DeploymentStatus::Running => Some(2),
            DeploymentStatus::OnError | DeploymentStatus::Stopped => None,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, DeploymentStatus::OnError | DeploymentStatus::Stopped)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Spawning => "spawning",
            DeploymentStatus::Initializing => "initializing",
            DeploymentStatus::Running => "running",
            DeploymentStatus::OnError => "on_error",
            DeploymentStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Submits deployments and polls them toward expected states.
pub struct DeploymentStateMachine {
    backend: BackendClient,
    poll_period: Duration,
    cancel: CancellationToken,
}

impl DeploymentStateMachine {
    pub fn new(backend: BackendClient, poll_period: Duration) -> Self {
        Self {
            backend,
            poll_period,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop polling loops cleanly when `cancel` fires, instead of leaving
    /// an interrupted run mid-poll.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit the artifact and bind the accepted instance to the context.
    pub async fn submit(
        &self,
        context: &mut DeploymentContext,
        conf: &AppConf,
        artifact: &EncryptedArtifact,
    ) -> Result<InstanceInfo, Error> {
        let response = self.backend.deploy_app(conf, &artifact.path).await?;
        let info = response.instance_info();
        context.attach(info.clone())?;
        Ok(info)
    }

    /// Poll until the instance reports `expected`, for at most `timeout`.
    ///
    /// Exactly `timeout / period` polls are made. Failure states abort
    /// immediately; so does observing a later progress state than the one
    /// awaited.
    pub async fn await_state(
        &self,
        id: Uuid,
        expected: DeploymentStatus,
        timeout: Duration,
    ) -> Result<InstanceInfo, Error> {
        let attempts = (timeout.as_millis() / self.poll_period.as_millis()).max(1) as u64;

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let response = self.backend.app_status(id).await?;
            let observed = response.status;
            debug!("instance {id} reports '{observed}' while awaiting '{expected}'");

            if observed.is_failure() {
                return Err(Error::DeploymentFailed { status: observed });
            }
            if observed == expected {
                return Ok(response.instance_info());
            }
            if let (Some(observed_rank), Some(expected_rank)) =
                (observed.progress_rank(), expected.progress_rank())
            {
                if observed_rank > expected_rank {
                    return Err(Error::ProtocolViolation { expected, observed });
                }
            }

            if attempt + 1 < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_period) => {}
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        Err(Error::Timeout {
            waited: timeout,
            hint: format!(
                "instance {id} never reached '{expected}'; the hosting \
                 infrastructure may be out of enclave resources"
            ),
        })
    }
}

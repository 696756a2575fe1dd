//! REST client for the deployment backend.
//!
//! Response shapes follow the backend's collaborator contract: `POST /apps`
//! accepts a multipart of encrypted tar plus JSON config, `GET /apps/{id}`
//! reports current status, `POST /apps/{id}/stop` halts an instance.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConf;
use crate::context::{CertificateOrigin, InstanceInfo};
use crate::error::Error;
use crate::state::DeploymentStatus;

/// Config part of the submission, sent alongside the encrypted tar.
#[derive(Debug, Serialize)]
struct SubmitManifest<'a> {
    name: &'a str,
    entrypoint: &'a str,
    docker: &'a str,
    healthcheck_endpoint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssl_domain: Option<&'a str>,
}

/// Instance representation returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct AppResponse {
    pub id: Uuid,
    pub status: DeploymentStatus,
    pub config_domain_name: String,
    pub size: u32,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub certificate_origin: CertificateOrigin,
}

impl AppResponse {
    pub fn instance_info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            config_domain: self.config_domain_name.clone(),
            size: self.size,
            expires_at: self.expires_at,
            cert_origin: self.certificate_origin,
        }
    }
}

/// Client for the deployment backend.
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Submit the encrypted artifact and declared configuration.
    ///
    /// A 409 means an application of the same name already exists and the
    /// caller has not stopped it; that is surfaced as [`Error::Conflict`]
    /// rather than a generic backend error.
    pub async fn deploy_app(
        &self,
        conf: &AppConf,
        artifact_path: &Path,
    ) -> Result<AppResponse, Error> {
        let artifact = tokio::fs::read(artifact_path).await?;

        let manifest = SubmitManifest {
            name: &conf.name,
            entrypoint: &conf.entrypoint,
            docker: &conf.docker,
            healthcheck_endpoint: &conf.healthcheck_endpoint,
            ssl_domain: conf.ssl.as_ref().map(|s| s.domain.as_str()),
        };

        let form = Form::new()
            .part(
                "code",
                Part::bytes(artifact)
                    .file_name("code.tar")
                    .mime_str("application/x-tar")
                    .map_err(Error::HttpClient)?,
            )
            .part(
                "conf",
                Part::text(serde_json::to_string(&manifest)?)
                    .mime_str("application/json")
                    .map_err(Error::HttpClient)?,
            );

        let response = self
            .client
            .post(format!("{}/apps", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(Error::Conflict {
                name: conf.name.clone(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        if !response.status().is_success() {
            return Err(Error::UnexpectedResponse {
                status_code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response.json::<AppResponse>().await.map_err(Error::HttpClient)
    }

    /// Current status and metadata of an instance.
    pub async fn app_status(&self, id: Uuid) -> Result<AppResponse, Error> {
        let response = self
            .client
            .get(format!("{}/apps/{id}", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedResponse {
                status_code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        response.json::<AppResponse>().await.map_err(Error::HttpClient)
    }

    /// Stop a running instance.
    pub async fn stop_app(&self, id: Uuid) -> Result<(), Error> {
        let response = self
            .client
            .post(format!("{}/apps/{id}/stop", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedResponse {
                status_code: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

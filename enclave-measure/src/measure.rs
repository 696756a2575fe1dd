//! Enclave code-measurement computation.
//!
//! The packaging image reports, in dry-run mode, the measurement the
//! enclave will have once the artifact is loaded. We run it locally,
//! archive its full output for postmortems, and scan for the measurement
//! line.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::error::Error;
use crate::runner::{ContainerRuntime, DockerRuntime, RunSpec};

/// Container path the artifact directory is mounted at.
const WORKSPACE_MOUNT: &str = "/workspace";

static MEASUREMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Measurement:\s*\n\s*([0-9a-f]{64})").expect("static pattern"));

/// Computes the expected enclave code measurement by dry-running the
/// packaging container against an encrypted artifact.
pub struct MeasurementComputer<R> {
    runtime: R,
}

impl MeasurementComputer<DockerRuntime> {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            runtime: DockerRuntime::new()?,
        })
    }
}

impl<R: ContainerRuntime> MeasurementComputer<R> {
    pub fn with_runtime(runtime: R) -> Self {
        Self { runtime }
    }

    /// Run `image` in dry-run mode over `artifact_path` and extract the
    /// reported measurement.
    ///
    /// The container's combined output is written verbatim to `log_path`
    /// before any scanning, so the log survives a parse failure.
    pub async fn compute(
        &self,
        image: &str,
        artifact_path: &Path,
        dry_run_args: &[String],
        log_path: &Path,
    ) -> Result<[u8; 32], Error> {
        let artifact_dir = artifact_path
            .parent()
            .ok_or_else(|| Error::Docker("artifact path has no parent directory".into()))?;
        let artifact_name = artifact_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Docker("artifact path has no file name".into()))?;

        let mut command = vec![
            "--code".to_string(),
            format!("{WORKSPACE_MOUNT}/{artifact_name}"),
            "--dry-run".to_string(),
        ];
        command.extend_from_slice(dry_run_args);

        let spec = RunSpec {
            image: image.to_string(),
            command,
            binds: vec![format!("{}:{WORKSPACE_MOUNT}:rw", artifact_dir.display())],
            entrypoint: None,
        };

        let run = self.runtime.run(&spec).await?;
        tokio::fs::write(log_path, &run.output).await?;

        let measurement = MEASUREMENT_RE
            .captures(&run.output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| {
                let mut out = [0u8; 32];
                hex::decode_to_slice(m.as_str(), &mut out).ok()?;
                Some(out)
            })
            .ok_or_else(|| Error::MeasurementNotFound {
                log_path: log_path.display().to_string(),
            })?;

        info!("computed enclave code measurement {}", hex::encode(measurement));
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedRuntime {
        output: String,
        exit_code: i64,
        specs: Mutex<Vec<RunSpec>>,
    }

    impl CannedRuntime {
        fn new(output: &str) -> Self {
            Self {
                output: output.to_string(),
                exit_code: 0,
                specs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for CannedRuntime {
        async fn run(&self, spec: &RunSpec) -> Result<RunOutput, Error> {
            self.specs.lock().unwrap().push(spec.clone());
            Ok(RunOutput {
                exit_code: self.exit_code,
                output: self.output.clone(),
            })
        }
    }

    const MEASUREMENT_HEX: &str =
        "96700ef1d5455a8c2f86a79ea46b702ebcb4e981d6aa0be169cf0d4bb35d1b9e";

    fn builder_output() -> String {
        format!("Pulling layers...\nPackaging code.tar\nMeasurement:\n{MEASUREMENT_HEX}\nDone.\n")
    }

    #[tokio::test]
    async fn extracts_measurement_from_output() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("code.tar");
        std::fs::write(&artifact, b"tar bytes").unwrap();
        let log_path = tmp.path().join("measure.log");

        let runtime = CannedRuntime::new(&builder_output());
        let computer = MeasurementComputer::with_runtime(runtime);

        let measurement = computer
            .compute("builder:latest", &artifact, &[], &log_path)
            .await
            .unwrap();

        assert_eq!(hex::encode(measurement), MEASUREMENT_HEX);
    }

    #[tokio::test]
    async fn writes_output_to_log_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("code.tar");
        std::fs::write(&artifact, b"tar bytes").unwrap();
        let log_path = tmp.path().join("measure.log");

        let runtime = CannedRuntime::new(&builder_output());
        let computer = MeasurementComputer::with_runtime(runtime);
        computer
            .compute("builder:latest", &artifact, &[], &log_path)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), builder_output());
    }

    #[tokio::test]
    async fn missing_measurement_references_the_log() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("code.tar");
        std::fs::write(&artifact, b"tar bytes").unwrap();
        let log_path = tmp.path().join("measure.log");

        let runtime = CannedRuntime::new("error: manifest invalid\n");
        let computer = MeasurementComputer::with_runtime(runtime);

        let result = computer
            .compute("builder:latest", &artifact, &[], &log_path)
            .await;

        match result {
            Err(Error::MeasurementNotFound { log_path: referenced }) => {
                assert_eq!(referenced, log_path.display().to_string());
            }
            other => panic!("expected MeasurementNotFound, got {other:?}"),
        }
        // The log must still exist for postmortem.
        assert_eq!(
            std::fs::read_to_string(&log_path).unwrap(),
            "error: manifest invalid\n"
        );
    }

    #[tokio::test]
    async fn mounts_artifact_directory_and_passes_dry_run() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("code.tar");
        std::fs::write(&artifact, b"tar bytes").unwrap();
        let log_path = tmp.path().join("measure.log");

        let runtime = CannedRuntime::new(&builder_output());
        let computer = MeasurementComputer::with_runtime(runtime);
        computer
            .compute(
                "builder:latest",
                &artifact,
                &["--plan".to_string(), "small".to_string()],
                &log_path,
            )
            .await
            .unwrap();

        let specs = computer.runtime.specs.lock().unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.image, "builder:latest");
        assert!(spec.command.contains(&"--dry-run".to_string()));
        assert!(spec.command.contains(&"--plan".to_string()));
        assert_eq!(
            spec.binds,
            vec![format!("{}:/workspace:rw", tmp.path().display())]
        );
    }
}

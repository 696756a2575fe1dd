//! Deterministic code encryption.
//!
//! Source files are encrypted one by one under the context's code key with
//! XChaCha20-Poly1305 and packed into a tar archive whose bytes are fully
//! reproducible: nonces are reused per relative path, entries are sorted,
//! and archive metadata is zeroed. Re-running the pipeline over an
//! unchanged tree therefore yields a byte-identical artifact, which is what
//! makes rebuilds auditable.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use glob::Pattern;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::context::{DeploymentContext, ARTIFACT_FILE};
use crate::error::Error;

/// A produced artifact together with the nonce map that generated it.
#[derive(Debug)]
pub struct EncryptedArtifact {
    pub path: PathBuf,
    pub nonces: BTreeMap<String, [u8; 24]>,
}

/// Parse ignore-file content: one glob per line, `#` comments and blank
/// lines skipped.
pub fn parse_ignore_patterns(content: &str) -> Result<Vec<Pattern>, Error> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            Pattern::new(line).map_err(|e| Error::Config(format!("bad ignore pattern '{line}': {e}")))
        })
        .collect()
}

/// List eligible files under `source_dir` as sorted relative paths.
///
/// Hidden files and directories are skipped, as are paths matching any
/// ignore pattern or named in `exceptions` (files that must stay in
/// cleartext and are shipped out of band).
fn collect_files(
    source_dir: &Path,
    ignore_patterns: &[Pattern],
    exceptions: &[String],
) -> Result<Vec<String>, Error> {
    fn walk(
        root: &Path,
        dir: &Path,
        ignore_patterns: &[Pattern],
        exceptions: &[String],
        out: &mut Vec<String>,
    ) -> Result<(), Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Config(format!("path outside source tree: {e}")))?;
            let relative_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if ignore_patterns.iter().any(|p| p.matches(&relative_str)) {
                continue;
            }

            if path.is_dir() {
                walk(root, &path, ignore_patterns, exceptions, out)?;
            } else {
                if exceptions.iter().any(|e| e == &relative_str) {
                    continue;
                }
                out.push(relative_str);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(source_dir, source_dir, ignore_patterns, exceptions, &mut files)?;
    files.sort();
    Ok(files)
}

/// Encrypt `source_dir` into the context's workspace.
///
/// Existing nonces are reused per relative path; new paths get fresh random
/// nonces. The updated nonce map is merged into the context only once the
/// whole artifact has been written, so a failed run leaves the context
/// unchanged and referencing no partial artifact.
pub fn encrypt(
    source_dir: &Path,
    context: &mut DeploymentContext,
    ignore_patterns: &[Pattern],
    exceptions: &[String],
) -> Result<EncryptedArtifact, Error> {
    let files = collect_files(source_dir, ignore_patterns, exceptions)?;
    debug!("encrypting {} files from {}", files.len(), source_dir.display());

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&context.code_key));
    let mut nonces = context.nonces.clone();

    let output_root = context.workspace.join("encrypted");
    if output_root.exists() {
        std::fs::remove_dir_all(&output_root)?;
    }
    std::fs::create_dir_all(&output_root)?;

    let artifact_path = context.workspace.join(ARTIFACT_FILE);
    let tar_file = std::fs::File::create(&artifact_path)?;
    let mut archive = tar::Builder::new(tar_file);

    for relative in &files {
        let plaintext = std::fs::read(source_dir.join(relative))?;

        let nonce = *nonces.entry(relative.clone()).or_insert_with(|| {
            let mut nonce = [0u8; 24];
            OsRng.fill_bytes(&mut nonce);
            nonce
        });

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| Error::Encryption(format!("failed to encrypt {relative}: {e}")))?;

        let output_path = output_root.join(relative);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output_path, &ciphertext)?;

        // Zeroed metadata so archive bytes depend only on paths and
        // ciphertexts.
        let mut header = tar::Header::new_gnu();
        header.set_size(ciphertext.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        archive.append_data(&mut header, relative, Cursor::new(ciphertext))?;
    }

    archive.finish()?;
    context.nonces = nonces;

    Ok(EncryptedArtifact {
        path: artifact_path,
        nonces: context.nonces.clone(),
    })
}

//! Per-call debug artifacts: the payload, the rendered prompt and the raw
//! response of every model call, one file each.

use anyhow::Result;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Payload,
    Prompt,
    Response,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Payload => "payload",
            ArtifactKind::Prompt => "prompt",
            ArtifactKind::Response => "response",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    dir: Option<PathBuf>,
}

impl DebugArtifacts {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir: Some(dir) }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Write one artifact; failures are logged, never returned
    pub fn write(&self, model: &str, stage: &str, kind: ArtifactKind, content: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        match write_artifact(dir, model, stage, kind, content) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to write {} artifact for {}: {}", kind.as_str(), model, e);
                None
            }
        }
    }
}

fn write_artifact(
    dir: &PathBuf,
    model: &str,
    stage: &str,
    kind: ArtifactKind,
    content: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f").to_string();
    let filename = format!(
        "{}_{}_{}_{}.txt",
        timestamp,
        sanitize(model),
        sanitize(stage),
        kind.as_str()
    );
    let path = dir.join(filename);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;

    Ok(path)
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_naming() {
        let dir = TempDir::new().unwrap();
        let artifacts = DebugArtifacts::new(dir.path().to_path_buf());

        let path = artifacts
            .write("openai.gpt/4", "CODEGEN", ArtifactKind::Response, "page.click('#a');")
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_openai.gpt_4_CODEGEN_response.txt"), "{name}");
        assert_eq!(fs::read_to_string(&path).unwrap(), "page.click('#a');");
    }

    #[test]
    fn test_disabled_writes_nothing() {
        assert!(DebugArtifacts::disabled()
            .write("m", "PLAN_ONLY", ArtifactKind::Payload, "x")
            .is_none());
    }
}

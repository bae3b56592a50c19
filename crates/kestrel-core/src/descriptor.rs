use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-run artifact locations (logs, descriptor, diagnostic stream).
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub descriptor: PathBuf,
    pub log_stream: PathBuf,
}

impl ArtifactPaths {
    /// Lay out artifact paths inside `dir`, creating the directory.
    pub fn in_dir(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            stdout_log: dir.join("stdout.log"),
            stderr_log: dir.join("stderr.log"),
            descriptor: dir.join("launch.json"),
            log_stream: dir.join("log-stream.jsonl"),
            dir,
        })
    }

    /// Timestamped run directory under `base` (e.g. `runs/20260825-143012`).
    pub fn timestamped(base: &Path) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Self::in_dir(base.join(stamp.to_string()))
    }
}

/// Written once per successful launch; consumed by out-of-band `quit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDescriptor {
    pub ws_url: String,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf_pid: Option<u32>,
    pub cdp_port: u16,
    pub artifact_dir: PathBuf,
}

impl LaunchDescriptor {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!("cannot read descriptor {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");

        let descriptor = LaunchDescriptor {
            ws_url: "ws://127.0.0.1:9222/devtools/browser/abc".to_string(),
            pid: 4242,
            leaf_pid: Some(4250),
            cdp_port: 9222,
            artifact_dir: dir.path().to_path_buf(),
        };
        descriptor.write(&path).unwrap();

        let loaded = LaunchDescriptor::read(&path).unwrap();
        assert_eq!(loaded.pid, 4242);
        assert_eq!(loaded.leaf_pid, Some(4250));
        assert_eq!(loaded.cdp_port, 9222);
        assert_eq!(loaded.ws_url, descriptor.ws_url);
    }

    #[test]
    fn test_descriptor_uses_camel_case_keys() {
        let descriptor = LaunchDescriptor {
            ws_url: "ws://x".to_string(),
            pid: 1,
            leaf_pid: None,
            cdp_port: 2,
            artifact_dir: PathBuf::from("/tmp"),
        };
        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(json.contains("\"wsUrl\""));
        assert!(json.contains("\"cdpPort\""));
        assert!(!json.contains("\"leafPid\""));
    }

    #[test]
    fn test_read_missing_descriptor_fails() {
        let result = LaunchDescriptor::read(Path::new("/nonexistent/launch.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_artifact_paths_create_dir() {
        let base = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(base.path().join("run-1")).unwrap();
        assert!(paths.dir.exists());
        assert_eq!(paths.stdout_log.file_name().unwrap(), "stdout.log");
    }
}

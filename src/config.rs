use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::core::OrchestratorConfig;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite job store (default: `linecount.db`).
    pub database: PathBuf,
    /// Concurrent jobs before submissions are rejected (default: `2`).
    pub max_concurrent_jobs: usize,
    /// Frames between progress writes (default: `1`).
    pub progress_stride: u64,
    /// Annotated output directory (default: `processed`).
    pub output_dir: PathBuf,
    /// Root of the mounted remote store. Unset disables remote transfers.
    pub remote_root: Option<PathBuf>,
    /// TTF/OTF font for labels. Unset draws shapes only.
    pub font: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default        |
    /// |-----------------------------|----------------|
    /// | `LINECOUNT_DATABASE`        | `linecount.db` |
    /// | `LINECOUNT_MAX_JOBS`        | `2`            |
    /// | `LINECOUNT_PROGRESS_STRIDE` | `1`            |
    /// | `LINECOUNT_OUTPUT_DIR`      | `processed`    |
    /// | `LINECOUNT_REMOTE_ROOT`     | unset          |
    /// | `LINECOUNT_FONT`            | unset          |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let path = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        let max_concurrent_jobs: usize = parse_or(&lookup, "LINECOUNT_MAX_JOBS", 2)?;
        if max_concurrent_jobs == 0 {
            anyhow::bail!("LINECOUNT_MAX_JOBS must be at least 1");
        }
        let progress_stride: u64 = parse_or(&lookup, "LINECOUNT_PROGRESS_STRIDE", 1)?;
        if progress_stride == 0 {
            anyhow::bail!("LINECOUNT_PROGRESS_STRIDE must be at least 1");
        }

        Ok(Self {
            database: path("LINECOUNT_DATABASE").unwrap_or_else(|| "linecount.db".into()),
            max_concurrent_jobs,
            progress_stride,
            output_dir: path("LINECOUNT_OUTPUT_DIR").unwrap_or_else(|| "processed".into()),
            remote_root: path("LINECOUNT_REMOTE_ROOT"),
            font: path("LINECOUNT_FONT"),
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            progress_stride: self.progress_stride,
            output_dir: self.output_dir.clone(),
            font: self.font.clone(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database, PathBuf::from("linecount.db"));
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.progress_stride, 1);
        assert_eq!(config.output_dir, PathBuf::from("processed"));
        assert!(config.remote_root.is_none());
        assert!(config.font.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("LINECOUNT_MAX_JOBS", "4"),
            ("LINECOUNT_PROGRESS_STRIDE", " 10 "),
            ("LINECOUNT_REMOTE_ROOT", "/mnt/share"),
        ])
        .unwrap();
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.progress_stride, 10);
        assert_eq!(config.remote_root, Some(PathBuf::from("/mnt/share")));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        assert!(load(&[("LINECOUNT_MAX_JOBS", "many")]).is_err());
        assert!(load(&[("LINECOUNT_MAX_JOBS", "0")]).is_err());
        assert!(load(&[("LINECOUNT_PROGRESS_STRIDE", "0")]).is_err());
    }
}

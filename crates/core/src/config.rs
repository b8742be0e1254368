//! Workspace-level configuration (`.codescope.toml`), ambient per §10.2.
//!
//! Parsed with `toml`, same as the teacher's `init.rs`. CLI flags in the `cli`
//! crate override values loaded here, the same way the teacher's `Cli` struct
//! overrides config-file values today.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub scan_dirs: Vec<String>,
    pub skip_dirs: Vec<String>,
    pub extensions: Vec<String>,
    pub default_token_budget: usize,
    pub semantic_model: Option<String>,
    #[serde(default)]
    pub scorer: ScorerOverrides,
    #[serde(default)]
    pub cache_ttl_seconds: CacheTtlOverrides,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            scan_dirs: Vec::new(),
            skip_dirs: default_skip_dirs(),
            extensions: Vec::new(),
            default_token_budget: 50_000,
            semantic_model: None,
            scorer: ScorerOverrides::default(),
            cache_ttl_seconds: CacheTtlOverrides::default(),
        }
    }
}

fn default_skip_dirs() -> Vec<String> {
    [
        ".git",
        ".svn",
        ".hg",
        ".vs",
        ".vscode",
        ".idea",
        "bin",
        "obj",
        "node_modules",
        "packages",
        "dist",
        "build",
        "out",
        "target",
        ".next",
        ".nuxt",
        "__pycache__",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerOverrides {
    pub path_deboost: Option<f64>,
    pub filename_boost: Option<f64>,
    pub recency_boost: Option<f64>,
    pub exact_match_boost: Option<f64>,
    pub mock_deboost: Option<f64>,
}

impl Default for ScorerOverrides {
    fn default() -> Self {
        Self {
            path_deboost: None,
            filename_boost: None,
            recency_boost: None,
            exact_match_boost: None,
            mock_deboost: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtlOverrides {
    pub text_search_secs: Option<u64>,
    pub recent_files_secs: Option<u64>,
    pub goto_definition_secs: Option<u64>,
    pub directory_search_secs: Option<u64>,
}

impl Default for CacheTtlOverrides {
    fn default() -> Self {
        Self {
            text_search_secs: None,
            recent_files_secs: None,
            goto_definition_secs: None,
            directory_search_secs: None,
        }
    }
}

impl WorkspaceConfig {
    /// Load `<workspace>/.codescope.toml`, falling back to defaults when absent.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join(".codescope.toml");
        match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("failed to parse {}: {e}, using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn skip_dirs_set(&self) -> HashSet<String> {
        self.skip_dirs.iter().cloned().collect()
    }

    pub fn extensions_set(&self) -> HashSet<String> {
        self.extensions.iter().cloned().collect()
    }

    /// Persisted-state base directory for this workspace's three artifacts
    /// (`index/`, `symbols.db`, `embeddings.db`), per §6.
    pub fn store_dir(workspace: &Path) -> PathBuf {
        workspace.join(".codescope")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.default_token_budget, 50_000);
        assert!(cfg.skip_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn parses_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".codescope.toml"),
            "default_token_budget = 1000\nextensions = [\"rs\", \"ts\"]\n",
        )
        .unwrap();
        let cfg = WorkspaceConfig::load(dir.path());
        assert_eq!(cfg.default_token_budget, 1000);
        assert_eq!(cfg.extensions, vec!["rs", "ts"]);
    }
}

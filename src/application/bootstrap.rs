use crate::infrastructure::config::{
    AppConfig, ConfigWarning, ensure_default_config, env_lookup, load_config_or_default,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::DataPaths;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub logs_dir: PathBuf,
    pub paths: DataPaths,
    pub config: AppConfig,
    pub warnings: Vec<ConfigWarning>,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    bootstrap_workspace_with_lookup(workspace_root, env_lookup)
}

/// Creates the workspace layout, writes a default `config.json` on first run
/// and resolves the effective configuration. Configuration problems come back
/// as warnings; only filesystem failures are errors.
pub fn bootstrap_workspace_with_lookup<F>(
    workspace_root: &Path,
    lookup: F,
) -> Result<BootstrapResult, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let logs_dir = workspace_root.join("logs");
    fs::create_dir_all(workspace_root)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_config(workspace_root)?;
    let config = load_config_or_default(workspace_root, lookup);
    let warnings = config.warnings();
    for warning in &warnings {
        tracing::warn!(%warning, "configuration");
    }

    let paths = DataPaths::new(workspace_root, config.dataset_name());
    paths.ensure_dirs()?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        logs_dir,
        paths,
        config,
        warnings,
    })
}

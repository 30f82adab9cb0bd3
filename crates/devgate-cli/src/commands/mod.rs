pub mod config;
pub mod dev;
pub mod resolve;
pub mod version;

use devgate_core::paths::project_root;
use devgate_core::{load_config, ServerConfig};
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::Path;

/// Load the project's server config.
///
/// With an explicit `--config`, paths are taken from `cwd`. Otherwise the
/// project root is found by walking up from `cwd`.
pub fn load(cwd: &Path, config_file: Option<&Path>) -> Result<ServerConfig> {
    let cwd = dunce::canonicalize(cwd)
        .into_diagnostic()
        .wrap_err_with(|| format!("Invalid working directory: {}", cwd.display()))?;

    let root = match config_file {
        Some(_) => cwd,
        None => project_root(&cwd).unwrap_or(cwd),
    };

    load_config(&root, config_file).into_diagnostic()
}

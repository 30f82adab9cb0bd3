//! `devgate resolve` command implementation.

use miette::{miette, Result};
use std::path::Path;

/// Resolve `specifier` through the configured aliases and print the path.
pub fn run(cwd: &Path, specifier: &str, config_file: Option<&Path>, json: bool) -> Result<()> {
    let config = super::load(cwd, config_file)?;

    let Some(resolved) = config.resolve_aliases.resolve(specifier) else {
        return Err(miette!(
            help = "Aliases are declared under `resolve.alias` in the config file",
            "No alias matches '{specifier}'"
        ));
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "specifier": specifier,
                "resolved": resolved,
                "exists": resolved.exists(),
            })
        );
    } else {
        println!("{}", resolved.display());
    }
    Ok(())
}

//! `devgate config` command implementation.

use devgate_core::ServerConfig;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

/// Print the resolved configuration.
pub fn run(cwd: &Path, config_file: Option<&Path>, json: bool) -> Result<()> {
    let config = super::load(cwd, config_file)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).into_diagnostic()?
        );
    } else {
        print_summary(&config);
    }
    Ok(())
}

fn print_summary(config: &ServerConfig) {
    match &config.config_file {
        Some(path) => {
            let rel = path.strip_prefix(&config.root).unwrap_or(path);
            println!("  Config:  {}", rel.display());
        }
        None => println!("  Config:  (none, using defaults)"),
    }
    println!("  Root:    {}", config.root.display());
    println!("  Server:  http://{}:{}/", config.host, config.port);
    if config.open {
        println!("  Open:    yes");
    }

    if !config.plugins.is_empty() {
        println!();
        println!("  Plugins:");
        for plugin in &config.plugins {
            match &plugin.package {
                Some(package) => println!("    {} ({package})", plugin.name),
                None => println!("    {}", plugin.name),
            }
        }
    }

    if !config.resolve_aliases.is_empty() {
        println!();
        println!("  Aliases:");
        for alias in config.resolve_aliases.iter() {
            println!("    {} -> {}", alias.find, alias.replacement.display());
        }
    }

    if !config.proxy_rules.is_empty() {
        println!();
        println!("  Proxy:");
        for rule in config.proxy_rules.iter() {
            let mut notes = Vec::new();
            if rule.change_origin {
                notes.push("changeOrigin");
            }
            if rule.rewrite.is_some() {
                notes.push("rewrite");
            }
            if notes.is_empty() {
                println!("    {} -> {}", rule.path_prefix, rule.target);
            } else {
                println!(
                    "    {} -> {} ({})",
                    rule.path_prefix,
                    rule.target,
                    notes.join(", ")
                );
            }
        }
    }
}

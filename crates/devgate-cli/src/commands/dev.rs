//! `devgate dev` command implementation.
//!
//! Loads the project config, serves it, and restarts the server whenever the
//! config file changes. A config that fails to load on reload is reported
//! and the running server is kept.

use devgate_core::{DevServer, ServerConfig};
use miette::{IntoDiagnostic, Result};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings for the dev server. `None` leaves the config file's value.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub cwd: PathBuf,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
    pub config: Option<PathBuf>,
    pub json: bool,
}

impl DevAction {
    /// Load the config and apply CLI overrides (CLI wins).
    fn load(&self) -> Result<ServerConfig> {
        let mut config = super::load(&self.cwd, self.config.as_deref())?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if self.open {
            config.open = true;
        }
        Ok(config)
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<devgate_core::Result<()>>,
}

impl Running {
    fn start(server: DevServer) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async {
            let _ = stopped.await;
        }));
        Self { stop, task }
    }

    async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        self.task.await.into_diagnostic()?.into_diagnostic()
    }
}

/// Run the dev server.
pub async fn run(action: DevAction) -> Result<()> {
    let mut config = action.load()?;

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    let watching = match config.config_file.clone() {
        Some(path) => {
            std::thread::spawn(move || {
                if let Err(e) = watch_config(&path, &reload_tx) {
                    warn!(error = %e, "Config watcher stopped");
                }
            });
            true
        }
        None => false,
    };

    let server = DevServer::bind(config.clone()).await.into_diagnostic()?;
    announce(&server, action.json)?;
    if config.open {
        let url = server.url().into_diagnostic()?;
        if let Err(e) = open_browser(&url) {
            warn!(error = %e, "Failed to open browser");
        }
    }
    let mut running = Running::start(server);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return running.shutdown().await;
            }
            result = &mut running.task => {
                // The server stopped on its own.
                return result.into_diagnostic()?.into_diagnostic();
            }
            Some(()) = reload_rx.recv(), if watching => {
                let next = match action.load() {
                    Ok(next) => next,
                    Err(e) => {
                        eprintln!("{e:?}");
                        warn!("Config reload failed; keeping the running server");
                        continue;
                    }
                };
                info!("Config changed, restarting server");
                running = restart(running, &mut config, next, action.json).await?;
            }
        }
    }
}

/// Replace the running server with one built from `next`.
///
/// When the port changes, the new server is bound before the old one stops
/// and a failed bind keeps the old one running. On the same port the old one
/// must release it first, even when the host differs; if the new config then
/// fails to bind, the previous config is served again.
async fn restart(
    running: Running,
    current: &mut ServerConfig,
    next: ServerConfig,
    json: bool,
) -> Result<Running> {
    let same_port = next.port != 0 && next.port == current.port;

    if !same_port {
        return match DevServer::bind(next.clone()).await {
            Ok(server) => {
                running.shutdown().await?;
                announce(&server, json)?;
                *current = next;
                Ok(Running::start(server))
            }
            Err(e) => {
                warn!(error = %e, "Could not bind new address; keeping the running server");
                Ok(running)
            }
        };
    }

    running.shutdown().await?;
    let server = match DevServer::bind(next.clone()).await {
        Ok(server) => {
            *current = next;
            server
        }
        Err(e) => {
            warn!(error = %e, "Restart failed; serving the previous config");
            DevServer::bind(current.clone()).await.into_diagnostic()?
        }
    };
    announce(&server, json)?;
    Ok(Running::start(server))
}

/// Print the startup banner, or one JSON line with `--json`.
fn announce(server: &DevServer, json: bool) -> Result<()> {
    let config = server.config();
    let url = server.url().into_diagnostic()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "event": "listening",
                "url": url,
                "config_file": config.config_file,
                "proxy": config.proxy_rules.iter().map(|r| &r.path_prefix).collect::<Vec<_>>(),
            })
        );
        return Ok(());
    }

    info!(url = %url, rules = config.proxy_rules.len(), "Dev server listening");
    println!();
    println!("  devgate {} dev server", devgate_core::VERSION);
    if let Some(path) = &config.config_file {
        let rel = path.strip_prefix(&config.root).unwrap_or(path);
        println!("  Loaded config from {}", rel.display());
    }
    println!();
    println!("  Local:   {url}");
    for rule in config.proxy_rules.iter() {
        println!("  Proxy:   {} -> {}", rule.path_prefix, rule.target);
    }
    for plugin in &config.plugins {
        debug!(plugin = %plugin.name, package = ?plugin.package, "Plugin declared (not executed)");
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();
    Ok(())
}

/// Watch the config file and signal `reload_tx` when it changes.
///
/// Watches the parent directory so editors that replace the file on save
/// are still seen.
fn watch_config(config_path: &Path, reload_tx: &mpsc::Sender<()>) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    let dir = config_path.parent().unwrap_or(Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    let file_name = config_path.file_name();
    let is_relevant = |event: &notify::Event| {
        !matches!(event.kind, EventKind::Access(_))
            && event.paths.iter().any(|p| p.file_name() == file_name)
    };

    loop {
        match rx.recv() {
            Ok(Ok(event)) if is_relevant(&event) => {
                // Debounce: editors often emit several events per save.
                loop {
                    match rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(_) => {}
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => return Ok(()),
                    }
                }
                debug!(path = %config_path.display(), "Config file changed");
                if reload_tx.blocking_send(()).is_err() {
                    break;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Watch error"),
            Err(_) => break,
        }
    }

    Ok(())
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

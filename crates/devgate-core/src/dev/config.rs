//! Configuration file discovery and evaluation for `devgate dev`.
//!
//! Loads `devgate.config.ts`, `devgate.config.js`, `vite.config.ts`,
//! `vite.config.js`, or `vite.config.mjs` and statically evaluates the
//! default export into a [`ServerConfig`]. The file is never executed.
//!
//! ## Supported config format
//!
//! ```js
//! import { defineConfig } from 'vite'
//! import vue from '@vitejs/plugin-vue'
//! import { resolve } from 'path'
//!
//! export default defineConfig({
//!   plugins: [vue()],
//!   resolve: { alias: { '@': resolve(__dirname, 'src') } },
//!   server: {
//!     port: 3001,
//!     proxy: {
//!       '/api': { target: 'http://localhost:8081', changeOrigin: true },
//!       '/grafana': {
//!         target: 'http://localhost:3000',
//!         changeOrigin: true,
//!         rewrite: (path) => path.replace(/^\/grafana/, ''),
//!       },
//!     },
//!   },
//! })
//! ```

use super::alias::AliasMap;
use super::js::{parse_expression, strip_comments, JsValue};
use super::proxy::{PathRewrite, ProxyRule, ProxyTable, ReplaceStep};
use crate::error::{Error, Result};
use crate::paths::normalize;
use regex_lite::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &[
    "devgate.config.ts",
    "devgate.config.js",
    "vite.config.ts",
    "vite.config.js",
    "vite.config.mjs",
];

/// Port used when the config does not set one.
pub const DEFAULT_PORT: u16 = 5173;

/// Host used when the config does not set one.
pub const DEFAULT_HOST: &str = "localhost";

/// Proxy options understood by http-proxy but not by devgate.
const IGNORED_PROXY_OPTIONS: &[&str] = &[
    "ws",
    "secure",
    "configure",
    "bypass",
    "timeout",
    "proxyTimeout",
    "xfwd",
    "followRedirects",
    "agent",
    "auth",
    "cookieDomainRewrite",
];

/// The dev server descriptor: everything the server needs to start.
///
/// Built once per (re)start and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Project root: served directory, and base for relative paths.
    pub root: PathBuf,
    /// File the values came from, if any.
    pub config_file: Option<PathBuf>,
    /// Framework plugins, in declaration order. Recorded, not executed.
    pub plugins: Vec<PluginSpec>,
    /// Import aliases (`@` → `<root>/src`).
    pub resolve_aliases: AliasMap,
    /// Port to listen on. 0 lets the OS pick one.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Open a browser once listening.
    pub open: bool,
    /// Answer cross-origin requests permissively.
    pub cors: bool,
    /// Path-prefix forwarding rules, in match order.
    pub proxy_rules: ProxyTable,
}

impl ServerConfig {
    /// Defaults for a project without a config file.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config_file: None,
            plugins: Vec::new(),
            resolve_aliases: AliasMap::new(),
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            open: false,
            cors: true,
            proxy_rules: ProxyTable::new(),
        }
    }

    /// The address actually bound: `localhost` is pinned to IPv4 loopback.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        if self.host == "localhost" {
            "127.0.0.1"
        } else {
            &self.host
        }
    }
}

/// A plugin factory call from the `plugins` array, e.g. `vue()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSpec {
    /// Factory name as called in the config (`vue`).
    pub name: String,
    /// Module the factory was imported from (`@vitejs/plugin-vue`).
    pub package: Option<String>,
    /// Number of arguments passed to the factory.
    pub args: usize,
}

/// Find a config file in the given root directory.
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    for name in CONFIG_FILES {
        let path = root.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load the server configuration for a project.
///
/// If `config_path` is `Some`, use that specific file (relative paths are
/// taken from `root`). Otherwise auto-discover; with no config file the
/// defaults rooted at `root` are returned.
pub fn load_config(root: &Path, config_path: Option<&Path>) -> Result<ServerConfig> {
    let path = match config_path {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            if !abs.exists() {
                return Err(Error::ConfigNotFound { path: abs });
            }
            abs
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => {
                debug!(root = %root.display(), "No config file found, using defaults");
                return Ok(ServerConfig::new(root));
            }
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;

    parse_config(&source, &path)
}

/// Evaluate config file source. Relative paths resolve against the file's directory.
pub fn parse_config(source: &str, path: &Path) -> Result<ServerConfig> {
    let stripped = strip_comments(source);
    let export = extract_default_export(&stripped).ok_or_else(|| Error::ConfigSyntax {
        path: path.to_path_buf(),
        message: "No `export default` (or `module.exports =`) found in config file".to_string(),
    })?;

    let (value, _) = parse_expression(export).map_err(|message| Error::ConfigSyntax {
        path: path.to_path_buf(),
        message,
    })?;

    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let evaluator = Evaluator {
        path,
        dir: &dir,
        imports: scan_plugin_imports(&stripped),
    };
    let mut config = evaluator.evaluate(unwrap_define_config(value))?;
    config.config_file = Some(path.to_path_buf());
    Ok(config)
}

/// Source text following `export default` / `module.exports =`.
fn extract_default_export(source: &str) -> Option<&str> {
    for marker in ["export default", "module.exports ="] {
        if let Some(idx) = source.find(marker) {
            return Some(source[idx + marker.len()..].trim_start());
        }
    }
    None
}

/// `defineConfig({...})` → `{...}`.
fn unwrap_define_config(value: JsValue) -> JsValue {
    match value {
        JsValue::Call { callee, mut args, .. }
            if callee.path_name().as_deref() == Some("defineConfig") && args.len() == 1 =>
        {
            args.remove(0)
        }
        other => other,
    }
}

/// Default-import bindings: local name → module specifier.
///
/// `import vue from '@vitejs/plugin-vue'` yields `vue → @vitejs/plugin-vue`.
#[must_use]
pub fn scan_plugin_imports(source: &str) -> HashMap<String, String> {
    let Ok(re) = Regex::new(r#"import\s+([A-Za-z_$][\w$]*)\s*(?:,\s*\{[^}]*\}\s*)?from\s*['"]([^'"]+)['"]"#)
    else {
        return HashMap::new();
    };
    re.captures_iter(source)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

struct Evaluator<'a> {
    path: &'a Path,
    dir: &'a Path,
    imports: HashMap<String, String>,
}

impl Evaluator<'_> {
    fn invalid(&self, message: impl Into<String>) -> Error {
        Error::InvalidConfig {
            path: self.path.to_path_buf(),
            message: message.into(),
        }
    }

    fn evaluate(&self, value: JsValue) -> Result<ServerConfig> {
        let mut config = ServerConfig::new(self.dir);

        match &value {
            JsValue::Object(_) => {}
            JsValue::Arrow { .. } => {
                return Err(self.invalid(
                    "Config functions are not supported; export a plain object",
                ))
            }
            other => {
                return Err(self.invalid(format!(
                    "Default export must be an object, found {}",
                    other.kind()
                )))
            }
        }

        if let Some(plugins) = value.get("plugins") {
            self.eval_plugins(plugins, &mut config.plugins)?;
        }

        if let Some(alias) = value.get("resolve").and_then(|r| r.get("alias")) {
            self.eval_aliases(alias, &mut config.resolve_aliases)?;
        }

        if let Some(server) = value.get("server") {
            self.eval_server(server, &mut config)?;
        }

        Ok(config)
    }

    fn eval_plugins(&self, value: &JsValue, out: &mut Vec<PluginSpec>) -> Result<()> {
        match value {
            JsValue::Array(items) => {
                for item in items {
                    self.eval_plugins(item, out)?;
                }
            }
            v if v.is_falsy() => {}
            JsValue::Call { callee, args, .. } => {
                let name = callee
                    .path_name()
                    .ok_or_else(|| self.invalid("Plugin entries must call a named factory"))?;
                let binding = name.split('.').next().unwrap_or(&name);
                out.push(PluginSpec {
                    package: self.imports.get(binding).cloned(),
                    name,
                    args: args.len(),
                });
            }
            JsValue::Ident(name) => out.push(PluginSpec {
                package: self.imports.get(name).cloned(),
                name: name.clone(),
                args: 0,
            }),
            other => {
                return Err(self.invalid(format!(
                    "Unsupported plugin entry: {}",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    fn eval_aliases(&self, value: &JsValue, out: &mut AliasMap) -> Result<()> {
        match value {
            JsValue::Object(entries) => {
                for (find, replacement) in entries {
                    out.insert(find.clone(), self.eval_path(replacement)?);
                }
            }
            JsValue::Array(items) => {
                for item in items {
                    let find = match item.get("find") {
                        Some(JsValue::String(s)) => s.clone(),
                        Some(JsValue::Regex { .. }) => {
                            return Err(
                                self.invalid("Regular-expression alias keys are not supported")
                            )
                        }
                        _ => return Err(self.invalid("Alias entries need a string `find`")),
                    };
                    let replacement = item
                        .get("replacement")
                        .ok_or_else(|| self.invalid(format!("Alias '{find}' has no `replacement`")))?;
                    out.insert(find, self.eval_path(replacement)?);
                }
            }
            other => {
                return Err(self.invalid(format!(
                    "`resolve.alias` must be an object or array, found {}",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    /// Statically evaluate a path expression to an absolute, normalized path.
    fn eval_path(&self, value: &JsValue) -> Result<PathBuf> {
        let path = self.eval_path_segment(value)?;
        let abs = if path.is_absolute() {
            path
        } else {
            self.dir.join(path)
        };
        Ok(normalize(&abs))
    }

    /// Evaluate without anchoring: string literals stay relative.
    fn eval_path_segment(&self, value: &JsValue) -> Result<PathBuf> {
        match value {
            JsValue::String(s) => Ok(PathBuf::from(s)),
            v if matches!(
                v.path_name().as_deref(),
                Some("__dirname" | "import.meta.dirname")
            ) =>
            {
                Ok(self.dir.to_path_buf())
            }
            JsValue::Call { callee, args, new } => {
                let name = callee.path_name().unwrap_or_default();
                match (name.as_str(), *new) {
                    ("process.cwd", false) => Ok(self.dir.to_path_buf()),
                    ("resolve" | "path.resolve", false) => {
                        let mut out = self.dir.to_path_buf();
                        for arg in args {
                            out.push(self.eval_path_segment(arg)?);
                        }
                        Ok(out)
                    }
                    ("join" | "path.join", false) => {
                        let mut out = PathBuf::new();
                        for arg in args {
                            out.push(self.eval_path_segment(arg)?);
                        }
                        Ok(out)
                    }
                    ("fileURLToPath" | "url.fileURLToPath", false) => match args.first() {
                        Some(arg) => self.eval_path_segment(arg),
                        None => Err(self.invalid("fileURLToPath() needs an argument")),
                    },
                    ("URL", true) => self.eval_file_url(args),
                    _ => Err(self.invalid(format!(
                        "Unsupported path expression: {name}(...)"
                    ))),
                }
            }
            other => Err(self.invalid(format!(
                "Unsupported path expression: {}",
                other.kind()
            ))),
        }
    }

    /// `new URL('./src', import.meta.url)`.
    fn eval_file_url(&self, args: &[JsValue]) -> Result<PathBuf> {
        match args {
            [JsValue::String(rel), base] if base.path_name().as_deref() == Some("import.meta.url") => {
                Ok(self.dir.join(rel))
            }
            [JsValue::String(url)] => Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| self.invalid(format!("Not a file URL: {url}"))),
            _ => Err(self.invalid(
                "Only `new URL('<relative path>', import.meta.url)` is supported",
            )),
        }
    }

    fn eval_server(&self, server: &JsValue, config: &mut ServerConfig) -> Result<()> {
        if !matches!(server, JsValue::Object(_)) {
            return Err(self.invalid(format!(
                "`server` must be an object, found {}",
                server.kind()
            )));
        }

        if let Some(port) = server.get("port") {
            config.port = match port.as_f64() {
                Some(n) if n.fract() == 0.0 && (0.0..=65535.0).contains(&n) => n as u16,
                _ => {
                    return Err(self.invalid(
                        "`server.port` must be an integer between 0 and 65535",
                    ))
                }
            };
        }

        match server.get("host") {
            Some(JsValue::String(host)) => config.host.clone_from(host),
            Some(JsValue::Bool(true)) => config.host = "0.0.0.0".to_string(),
            Some(v) if v.is_falsy() => {}
            Some(other) => {
                return Err(self.invalid(format!(
                    "`server.host` must be a string or boolean, found {}",
                    other.kind()
                )))
            }
            None => {}
        }

        match server.get("open") {
            Some(JsValue::Bool(open)) => config.open = *open,
            Some(JsValue::String(s)) => config.open = !s.is_empty(),
            _ => {}
        }

        match server.get("cors") {
            Some(JsValue::Bool(cors)) => config.cors = *cors,
            Some(JsValue::Object(_)) => config.cors = true,
            _ => {}
        }

        if let Some(proxy) = server.get("proxy") {
            let JsValue::Object(entries) = proxy else {
                return Err(self.invalid(format!(
                    "`server.proxy` must be an object, found {}",
                    proxy.kind()
                )));
            };
            let mut seen = HashSet::new();
            for (key, options) in entries {
                if !seen.insert(key.as_str()) {
                    return Err(self.invalid(format!("Duplicate proxy rule '{key}'")));
                }
                let rule = self.eval_proxy_rule(key, options)?;
                config.proxy_rules.insert(rule);
            }
        }

        Ok(())
    }

    fn eval_proxy_rule(&self, key: &str, options: &JsValue) -> Result<ProxyRule> {
        let (target, options) = match options {
            JsValue::String(target) => (target.as_str(), None),
            JsValue::Object(_) => match options.get("target") {
                Some(JsValue::String(target)) => (target.as_str(), Some(options)),
                _ => {
                    return Err(self.invalid(format!(
                        "Proxy rule '{key}' needs a string `target`"
                    )))
                }
            },
            other => {
                return Err(self.invalid(format!(
                    "Proxy rule '{key}' must be a URL string or an options object, found {}",
                    other.kind()
                )))
            }
        };

        let target = self.parse_target(key, target)?;
        let mut rule = ProxyRule::new(key, target)
            .map_err(|e| self.invalid(format!("Proxy key '{key}' is not a valid regex: {e}")))?;

        let Some(JsValue::Object(entries)) = options else {
            return Ok(rule);
        };

        for (name, value) in entries {
            match name.as_str() {
                "target" => {}
                "changeOrigin" => {
                    let change_origin = value.as_bool().ok_or_else(|| {
                        self.invalid(format!("Proxy rule '{key}': `changeOrigin` must be a boolean"))
                    })?;
                    rule = rule.with_change_origin(change_origin);
                }
                "rewrite" => {
                    if let Some(rewrite) = self.eval_rewrite(key, value)? {
                        rule = rule.with_rewrite(rewrite);
                    }
                }
                "headers" => {
                    let JsValue::Object(headers) = value else {
                        return Err(self.invalid(format!(
                            "Proxy rule '{key}': `headers` must be an object"
                        )));
                    };
                    for (header, header_value) in headers {
                        let header_value = header_value.as_str().ok_or_else(|| {
                            self.invalid(format!(
                                "Proxy rule '{key}': header '{header}' must be a string"
                            ))
                        })?;
                        rule = rule.with_header(header.clone(), header_value);
                    }
                }
                other if IGNORED_PROXY_OPTIONS.contains(&other) => {
                    warn!(rule = %key, option = %other, "Ignoring unsupported proxy option");
                }
                other => {
                    warn!(rule = %key, option = %other, "Ignoring unknown proxy option");
                }
            }
        }

        Ok(rule)
    }

    fn parse_target(&self, key: &str, target: &str) -> Result<Url> {
        let url = Url::parse(target).map_err(|e| {
            self.invalid(format!("Proxy rule '{key}': invalid target '{target}': {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(self.invalid(format!(
                "Proxy rule '{key}': target must be an http(s) URL, got '{target}'"
            )));
        }
        Ok(url)
    }

    /// `(path) => path.replace(a, b).replace(c, d)` → a [`PathRewrite`].
    ///
    /// `None` for the identity function.
    fn eval_rewrite(&self, key: &str, value: &JsValue) -> Result<Option<PathRewrite>> {
        let unsupported = || {
            self.invalid(format!(
                "Proxy rule '{key}': `rewrite` must be `(path) => path.replace(pattern, replacement)`"
            ))
        };

        let JsValue::Arrow { params, body } = value else {
            return Err(unsupported());
        };
        let [param] = params.as_slice() else {
            return Err(unsupported());
        };

        // Walk the call chain outside-in, then reverse.
        let mut steps = Vec::new();
        let mut current = body.as_ref();
        loop {
            match current {
                JsValue::Ident(name) if name == param => break,
                JsValue::Call { callee, args, new: false } => {
                    let JsValue::Member { object, property } = callee.as_ref() else {
                        return Err(unsupported());
                    };
                    if property != "replace" && property != "replaceAll" {
                        return Err(unsupported());
                    }
                    let [pattern, JsValue::String(replacement)] = args.as_slice() else {
                        return Err(unsupported());
                    };
                    let step = match pattern {
                        JsValue::Regex { source, flags } => {
                            let flags = if property == "replaceAll" && !flags.contains('g') {
                                format!("{flags}g")
                            } else {
                                flags.clone()
                            };
                            ReplaceStep::regex(source, &flags, replacement).map_err(|e| {
                                self.invalid(format!(
                                    "Proxy rule '{key}': invalid rewrite pattern /{source}/: {e}"
                                ))
                            })?
                        }
                        JsValue::String(literal) if property == "replaceAll" => {
                            ReplaceStep::regex(&escape_regex(literal), "g", replacement)
                                .map_err(|e| self.invalid(format!("Proxy rule '{key}': {e}")))?
                        }
                        JsValue::String(literal) => ReplaceStep::literal(literal.clone(), replacement.clone()),
                        _ => return Err(unsupported()),
                    };
                    steps.push(step);
                    current = object.as_ref();
                }
                _ => return Err(unsupported()),
            }
        }

        if steps.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            steps
                .into_iter()
                .rev()
                .fold(PathRewrite::new(), PathRewrite::step),
        ))
    }
}

/// Escape regex metacharacters so `literal` matches itself.
fn escape_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if "\\.+*?()|[]{}^$".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

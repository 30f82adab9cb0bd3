//! Dev server: config loading, import aliases, proxy rules, HTTP serving.
//!
//! A Vite-style config file is evaluated statically into a [`ServerConfig`],
//! which [`DevServer`] binds and serves.

pub mod alias;
pub mod config;
pub mod js;
pub mod proxy;
pub mod server;

pub use alias::{Alias, AliasMap};
pub use config::{
    find_config_file, load_config, parse_config, PluginSpec, ServerConfig, CONFIG_FILES,
    DEFAULT_HOST, DEFAULT_PORT,
};
pub use proxy::{PathRewrite, ProxyRule, ProxyTable, ReplaceStep};
pub use server::DevServer;

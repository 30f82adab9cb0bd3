#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod dev;
pub mod error;
pub mod paths;
pub mod version;

pub use config::Config;
pub use dev::{
    find_config_file, load_config, AliasMap, DevServer, PathRewrite, PluginSpec, ProxyRule,
    ProxyTable, ServerConfig,
};
pub use error::{Error, Result};
pub use version::VERSION;

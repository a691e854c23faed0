// ABOUTME: Version constants and sandbox configuration

use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const WELCOME_MESSAGE: &str = "Lea interpreter";
pub const WELCOME_SUBTITLE: &str = "A pipe-oriented, mostly-functional scripting language";
pub const WELCOME_FOOTER: &str = "Type :builtins for the library, :quit to exit.";

/// Filesystem sandbox configuration for the fs built-ins.
#[derive(Debug, Clone)]
pub struct FsConfig {
    pub allowed_paths: Vec<PathBuf>,
    pub max_file_size: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            allowed_paths: vec![PathBuf::from("./data"), PathBuf::from("./scripts")],
            // 10 MB
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

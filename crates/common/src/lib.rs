//! MeshCDB Common Library
//!
//! Shared types, key material, and settings backends for the mesh
//! configuration database.

pub mod crypto;
pub mod db;
pub mod error;
pub mod settings;
pub mod types;

// Re-export commonly used types
pub use crypto::{KeyImport, MeshKey};
pub use db::Database;
pub use error::{Error, Result};
pub use settings::{MemorySettings, SettingsBackend, SettingsOp};
pub use types::*;

/// MeshCDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".meshcdb")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}

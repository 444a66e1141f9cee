//! Shared helpers for integration tests

#![allow(dead_code)]

use meshcdb::{Cdb, CdbConfig, MemorySettings};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn memory_cdb(node_count: usize) -> Cdb<MemorySettings> {
    init_tracing();
    let config = CdbConfig {
        node_count,
        subnet_count: 2,
        app_key_count: 4,
        ..Default::default()
    };
    Cdb::new(config, MemorySettings::new()).unwrap()
}

pub fn disk_config(dir: &Path) -> CdbConfig {
    CdbConfig {
        store_path: dir.to_path_buf(),
        node_count: 16,
        subnet_count: 2,
        app_key_count: 4,
        ..Default::default()
    }
}

//! MeshCDB - configuration database for mesh provisioners
//!
//! Tracks every provisioned node, subnet and application key of a network,
//! allocates unicast address ranges, drives key refresh, and persists changes
//! through a [`SettingsBackend`] with coalesced, deferred writes.

pub mod alloc;
pub mod app_key;
pub mod cdb;
pub mod config;
pub mod node;
pub mod record;
pub mod restore;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod subnet;
pub mod tracker;

pub use alloc::AddrCheck;
pub use app_key::AppKey;
pub use cdb::Cdb;
pub use config::CdbConfig;
pub use node::Node;
pub use restore::RestoreSummary;
pub use service::{CdbHandle, CdbService};
pub use snapshot::{AppKeyView, CdbSnapshot, NodeView, SubnetView};
pub use subnet::Subnet;
pub use tracker::{KeyId, KeyKind, Outcome};

pub use meshcdb_common::{
    Database, Error, IterAction, KeyImport, KeySlot, KrPhase, MemorySettings, MeshKey, Result,
    SettingsBackend,
};

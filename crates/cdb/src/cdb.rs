//! Configuration database state and lifecycle

use crate::app_key::AppKey;
use crate::config::CdbConfig;
use crate::node::Node;
use crate::store::{PendingFlag, StoreSchedule};
use crate::subnet::Subnet;
use crate::tracker::{KeyId, UpdateTable};
use meshcdb_common::{Database, Error, KeySlot, MeshKey, Result, SettingsBackend, KEY_PRIMARY};
use tracing::{debug, info};

/// Database-level flags
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CdbFlags {
    pub valid: bool,
    pub ivu_in_progress: bool,
    pub net_pending: bool,
    pub nodes_pending: bool,
    pub keys_pending: bool,
}

/// The configuration database.
///
/// Holds the node, subnet and application key tables of one provisioned
/// network together with the IV index and the address floor. All mutation
/// goes through `&mut self`; the value is meant to be owned by a single task
/// (see [`crate::CdbService`]).
pub struct Cdb<B: SettingsBackend> {
    pub(crate) config: CdbConfig,
    pub(crate) backend: B,
    pub(crate) iv_index: u32,
    pub(crate) lowest_avail_addr: u16,
    pub(crate) flags: CdbFlags,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) subnets: Vec<Option<Subnet>>,
    pub(crate) app_keys: Vec<Option<AppKey>>,
    pub(crate) node_updates: UpdateTable<u16>,
    pub(crate) key_updates: UpdateTable<KeyId>,
    pub(crate) schedule: StoreSchedule,
}

impl Cdb<Database> {
    /// Open the SQLite store named by `config` and restore its contents
    pub fn open(config: CdbConfig) -> Result<Self> {
        info!("Opening configuration database v{}", meshcdb_common::VERSION);
        let db = Database::open(config.db_path())?;
        let mut cdb = Self::new(config, db)?;
        let summary = cdb.load()?;
        info!(
            "Restored configuration database: {} applied, {} deleted, {} skipped",
            summary.applied, summary.deleted, summary.skipped
        );
        Ok(cdb)
    }
}

impl<B: SettingsBackend> Cdb<B> {
    /// Create an empty, not yet valid database on top of `backend`
    pub fn new(config: CdbConfig, backend: B) -> Result<Self> {
        config.validate()?;

        let cdb = Self {
            nodes: (0..config.node_count).map(|_| None).collect(),
            subnets: (0..config.subnet_count).map(|_| None).collect(),
            app_keys: (0..config.app_key_count).map(|_| None).collect(),
            node_updates: UpdateTable::with_capacity(config.node_count + 1),
            key_updates: UpdateTable::with_capacity(config.subnet_count + config.app_key_count),
            schedule: StoreSchedule::default(),
            iv_index: 0,
            lowest_avail_addr: 1,
            flags: CdbFlags::default(),
            backend,
            config,
        };

        debug!(
            "Initialized tables: {} nodes, {} subnets, {} app keys",
            cdb.nodes.len(),
            cdb.subnets.len(),
            cdb.app_keys.len()
        );

        Ok(cdb)
    }

    /// Flush everything still pending and hand back the backend
    pub fn teardown(mut self) -> B {
        self.store_pending();
        info!("Configuration database torn down");
        self.backend
    }

    /// Get configuration
    pub fn config(&self) -> &CdbConfig {
        &self.config
    }

    /// Get the settings backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the database has been created or restored
    pub fn is_valid(&self) -> bool {
        self.flags.valid
    }

    pub fn iv_index(&self) -> u32 {
        self.iv_index
    }

    pub fn iv_update_in_progress(&self) -> bool {
        self.flags.ivu_in_progress
    }

    /// Lowest address the allocator will hand out
    pub fn lowest_avail_addr(&self) -> u16 {
        self.lowest_avail_addr
    }

    /// Create a new database whose primary subnet uses `net_key`
    pub fn create(&mut self, net_key: &MeshKey) -> Result<()> {
        if self.flags.valid {
            return Err(Error::already_exists("cdb", &self.config.settings_root));
        }

        let sub = self.subnet_alloc(KEY_PRIMARY)?;
        sub.keys[KeySlot::Current.index()].import(net_key);

        self.iv_index = 0;
        self.lowest_avail_addr = 1;
        self.flags.ivu_in_progress = false;
        self.flags.valid = true;

        self.schedule_store(PendingFlag::Net);
        self.subnet_store(KEY_PRIMARY)?;

        info!("Created configuration database");
        Ok(())
    }

    /// Delete every entry and invalidate the database.
    ///
    /// All deletions are persisted and flushed before returning. The first
    /// persistence failure, if any, is returned after the in-memory state has
    /// been fully cleared.
    pub fn clear(&mut self) -> Result<()> {
        self.flags.valid = false;

        let mut result = Ok(());

        let addrs: Vec<u16> = self.nodes().map(Node::addr).collect();
        for addr in addrs {
            keep_first_error(&mut result, self.node_del(addr, true));
        }

        let net_idxs: Vec<u16> = self.subnets().map(Subnet::net_idx).collect();
        for net_idx in net_idxs {
            keep_first_error(&mut result, self.subnet_del(net_idx, true));
        }

        let app_idxs: Vec<u16> = self.app_keys().map(AppKey::app_idx).collect();
        for app_idx in app_idxs {
            keep_first_error(&mut result, self.app_key_del(app_idx, true));
        }

        self.iv_index = 0;
        self.lowest_avail_addr = 1;
        self.flags.ivu_in_progress = false;

        self.schedule_store(PendingFlag::Net);
        self.store_pending();

        info!("Cleared configuration database");
        result
    }

    /// Record a new IV index and IV Update state.
    ///
    /// Leaving IV Update, or jumping more than one index ahead (IV
    /// recovery), resets the address floor to 1.
    pub fn iv_update(&mut self, iv_index: u32, iv_update: bool) {
        debug!("Updating IV index to {} (update {})", iv_index, iv_update);

        if !iv_update || u64::from(iv_index) > u64::from(self.iv_index) + 1 {
            self.lowest_avail_addr = 1;
        }

        self.iv_index = iv_index;
        self.flags.ivu_in_progress = iv_update;

        self.schedule_store(PendingFlag::Net);
    }
}

fn keep_first_error(result: &mut Result<()>, next: Result<()>) {
    if result.is_ok() {
        if let Err(e) = next {
            *result = Err(e);
        }
    }
}

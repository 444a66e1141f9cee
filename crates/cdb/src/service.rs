//! Async driver for the configuration database
//!
//! [`CdbService`] owns a [`Cdb`] on a single tokio task. Callers submit
//! closures through a [`CdbHandle`]; the same task sleeps until the store
//! deadline and runs the flush, so mutations and flushes never interleave.

use crate::cdb::Cdb;
use meshcdb_common::{Error, Result, SettingsBackend};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

type Job<B> = Box<dyn FnOnce(&mut Cdb<B>) + Send>;

/// Cloneable handle to a running [`CdbService`]
pub struct CdbHandle<B: SettingsBackend> {
    tx: mpsc::UnboundedSender<Job<B>>,
}

impl<B: SettingsBackend> Clone for CdbHandle<B> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<B: SettingsBackend + Send + 'static> CdbHandle<B> {
    /// Run `f` against the database on the service task and return its result
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Cdb<B>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<B> = Box::new(move |cdb| {
            // The caller may have given up waiting
            let _ = reply_tx.send(f(cdb));
        });

        self.tx.send(job).map_err(|_| Error::ServiceStopped)?;
        reply_rx.await.map_err(|_| Error::ServiceStopped)
    }
}

/// Task that owns the database and runs its deferred flushes
pub struct CdbService<B: SettingsBackend> {
    cdb: Cdb<B>,
    rx: mpsc::UnboundedReceiver<Job<B>>,
}

impl<B: SettingsBackend + Send + 'static> CdbService<B> {
    pub fn new(cdb: Cdb<B>) -> (Self, CdbHandle<B>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { cdb, rx }, CdbHandle { tx })
    }

    /// Start the service on the current runtime.
    ///
    /// The task ends once every handle is dropped and yields the database
    /// after a final flush.
    pub fn spawn(cdb: Cdb<B>) -> (CdbHandle<B>, JoinHandle<Cdb<B>>) {
        let (service, handle) = Self::new(cdb);
        (handle, tokio::spawn(service.run()))
    }

    /// Serve calls until all handles are gone
    pub async fn run(mut self) -> Cdb<B> {
        info!("Configuration database service started");

        loop {
            let deadline = self.cdb.store_deadline();

            tokio::select! {
                biased;

                _ = wait_for(deadline) => {
                    debug!("Store deadline reached");
                    self.cdb.store_pending();
                }
                job = self.rx.recv() => match job {
                    Some(job) => job(&mut self.cdb),
                    None => break,
                },
            }
        }

        self.cdb.store_pending();
        info!("Configuration database service stopped");
        self.cdb
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

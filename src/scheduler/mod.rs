//! Snapshot scheduler.
//!
//! A timer-driven worker bound to one database: every interval it asks the
//! manager for a timestamped snapshot and prunes history to the configured
//! depth. The timer only runs when the configuration enables automatic
//! snapshots; manual backups and restores work either way. Backup failures
//! are logged, never propagated; a tick that arrives while the previous
//! backup is still writing is skipped.

use crate::db::{DatabaseManager, PersistenceConfig};
use crate::Result;
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub struct SnapshotScheduler {
    shared: Arc<Shared>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    manager: Arc<DatabaseManager>,
    config: PersistenceConfig,
    busy: AtomicBool,
}

impl Shared {
    /// One backup attempt. Returns false when skipped because a prior
    /// backup is still in flight.
    fn backup_once(&self) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                database = self.config.database_name.as_str(),
                "backup still in flight, skipping tick"
            );
            return false;
        }
        match self.manager.dump_database_with(&self.config) {
            Ok(path) => {
                info!(
                    database = self.config.database_name.as_str(),
                    path = %path.display(),
                    "snapshot written"
                );
            }
            Err(e) => {
                warn!(
                    database = self.config.database_name.as_str(),
                    error = %e,
                    "snapshot failed"
                );
            }
        }
        self.busy.store(false, Ordering::Release);
        true
    }
}

impl SnapshotScheduler {
    /// Validate the configuration and start the scheduler. The periodic
    /// worker is spawned only when `enable_automatic_snapshots` is set;
    /// `trigger_backup` and `restore_latest` are available either way. With
    /// `auto_restore_latest_dump` set, the newest snapshot is loaded first;
    /// a failed restore is logged and startup proceeds without data.
    pub fn start(manager: Arc<DatabaseManager>, config: PersistenceConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            manager,
            config,
            busy: AtomicBool::new(false),
        });

        if shared.config.auto_restore_latest_dump {
            let scheduler_view = Self {
                shared: shared.clone(),
                stop: None,
                worker: None,
            };
            match scheduler_view.restore_latest() {
                Ok(true) => info!(
                    database = shared.config.database_name.as_str(),
                    "restored latest snapshot on startup"
                ),
                Ok(false) => debug!(
                    database = shared.config.database_name.as_str(),
                    "no snapshot to restore on startup"
                ),
                Err(e) => warn!(
                    database = shared.config.database_name.as_str(),
                    error = %e,
                    "startup restore failed, continuing without data"
                ),
            }
        }

        let (stop, worker) = if shared.config.enable_automatic_snapshots {
            let (stop, ticks) = bounded::<()>(1);
            let worker_shared = shared.clone();
            let worker = std::thread::spawn(move || loop {
                match ticks.recv_timeout(worker_shared.config.snapshot_interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        worker_shared.backup_once();
                    }
                    // Stop signal or scheduler dropped
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            });
            (Some(stop), Some(worker))
        } else {
            debug!(
                database = shared.config.database_name.as_str(),
                "automatic snapshots disabled, timer not started"
            );
            (None, None)
        };

        Ok(Self {
            shared,
            stop,
            worker,
        })
    }

    /// Write a snapshot now, outside the timer. Returns false when skipped
    /// because a backup is already running.
    pub fn trigger_backup(&self) -> bool {
        self.shared.backup_once()
    }

    /// Load the newest snapshot for this scheduler's prefix into the
    /// manager. Returns whether a restore happened.
    pub fn restore_latest(&self) -> Result<bool> {
        let Some(path) = self.shared.manager.latest_snapshot(&self.shared.config)? else {
            return Ok(false);
        };
        self.shared
            .manager
            .load_database(&self.shared.config.database_name, &path)?;
        Ok(true)
    }

    /// Stop the timer. An in-flight backup completes.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

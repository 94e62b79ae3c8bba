//! Queued execution front door.
//!
//! Statements are submitted to a single worker thread and answered through a
//! per-request channel. A request carries an optional cancellation token:
//! cancelling before the worker dequeues it completes the request as
//! `Cancelled`; a statement already executing is not interruptible.

use super::executor::{SqlExecutor, SqlResult};
use crate::db::DatabaseManager;
use crate::{Result, RowbaseError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Cooperative cancellation flag for a pending request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A submitted statement's eventual result.
pub struct Pending {
    receiver: Receiver<Result<SqlResult>>,
}

impl Pending {
    /// Block until the worker answers. A queue torn down before answering
    /// reads as cancelled.
    pub fn wait(self) -> Result<SqlResult> {
        self.receiver
            .recv()
            .unwrap_or(Err(RowbaseError::Cancelled))
    }
}

struct Job {
    sql: String,
    database: Option<String>,
    token: Option<CancelToken>,
    reply: Sender<Result<SqlResult>>,
}

/// Single-worker SQL queue over a database manager.
pub struct SqlQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SqlQueue {
    pub fn start(manager: Arc<DatabaseManager>) -> Self {
        Self::start_with(SqlExecutor::new(manager))
    }

    pub fn start_with(executor: SqlExecutor) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::spawn(move || {
            for job in receiver.iter() {
                if job.token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false) {
                    debug!("dropping cancelled request before execution");
                    let _ = job.reply.send(Err(RowbaseError::Cancelled));
                    continue;
                }
                let result = executor.execute_on(job.database.as_deref(), &job.sql);
                let _ = job.reply.send(result);
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    pub fn submit(&self, database: Option<&str>, sql: &str) -> Pending {
        self.submit_with_token(database, sql, None)
    }

    pub fn submit_with_token(
        &self,
        database: Option<&str>,
        sql: &str,
        token: Option<CancelToken>,
    ) -> Pending {
        let (reply, receiver) = crossbeam_channel::bounded(1);
        let job = Job {
            sql: sql.to_string(),
            database: database.map(|s| s.to_string()),
            token,
            reply,
        };
        if let Some(sender) = &self.sender {
            // A torn-down worker leaves the reply channel disconnected and
            // the request reads as cancelled.
            let _ = sender.send(job);
        }
        Pending { receiver }
    }
}

impl Drop for SqlQueue {
    fn drop(&mut self) {
        // Disconnect the channel so the worker drains and exits.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

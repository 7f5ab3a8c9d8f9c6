use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

use crate::sync::{BatchReport, BatchUpdate, ExternalRecord, SyncError, SyncResult, UserOutcome};
use crate::updates::UpdateMap;

enum Job {
    User {
        email: String,
        updates: UpdateMap,
        reply: Sender<SyncResult<UserOutcome>>,
    },
    Batch {
        batch: BatchUpdate,
        reply: Sender<SyncResult<BatchReport>>,
    },
}

/// The pending result of a dispatched update.
///
/// Dropping the ticket does not cancel the update.
pub struct SyncTicket<T> {
    receiver: Receiver<SyncResult<T>>,
}

impl<T> SyncTicket<T> {
    /// Blocks until the update has run.
    pub fn wait(self) -> SyncResult<T> {
        match self.receiver.recv() {
            Ok(res) => res,
            Err(_) => Err(SyncError::WorkerGone),
        }
    }

    /// The result if the update already ran.
    pub fn try_result(&self) -> Option<SyncResult<T>> {
        match self.receiver.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SyncError::WorkerGone)),
        }
    }
}

/// Runs the updates of the external record on a single background thread.
///
/// Updates run one at a time in dispatch order, so two updates for the same
/// respondent never interleave.
pub struct SyncQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

fn run(mut target: Box<dyn ExternalRecord + Send>, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        match job {
            Job::User {
                email,
                updates,
                reply,
            } => {
                debug!("sync: updating {} ({} keys)", email, updates.len());
                let res = target.update_user(&email, &updates);
                if let Err(e) = &res {
                    error!("sync: update of {} failed: {}", email, e);
                }
                // The caller may have dropped its ticket.
                let _ = reply.send(res);
            }
            Job::Batch { batch, reply } => {
                debug!("sync: batch of {} users", batch.len());
                let res = target.update_batch(&batch);
                if let Err(e) = &res {
                    error!("sync: batch update failed: {}", e);
                }
                let _ = reply.send(res);
            }
        }
    }
    debug!("sync: worker stopped");
}

impl SyncQueue {
    pub fn start(target: Box<dyn ExternalRecord + Send>) -> SyncQueue {
        let (sender, jobs) = channel::<Job>();
        let worker = thread::Builder::new()
            .name("survey-sync".to_string())
            .spawn(move || run(target, jobs));
        match worker {
            Ok(handle) => SyncQueue {
                sender: Some(sender),
                worker: Some(handle),
            },
            Err(e) => {
                // Every ticket will report the worker as gone.
                error!("sync: cannot start the worker thread: {}", e);
                SyncQueue {
                    sender: None,
                    worker: None,
                }
            }
        }
    }

    fn submit(&self, job: Job) {
        match &self.sender {
            Some(s) => {
                if s.send(job).is_err() {
                    warn!("sync: worker is gone, update dropped");
                }
            }
            None => warn!("sync: no worker, update dropped"),
        }
    }

    pub fn dispatch_user(&self, email: &str, updates: UpdateMap) -> SyncTicket<UserOutcome> {
        let (reply, receiver) = channel();
        self.submit(Job::User {
            email: email.to_string(),
            updates,
            reply,
        });
        SyncTicket { receiver }
    }

    pub fn dispatch_batch(&self, batch: BatchUpdate) -> SyncTicket<BatchReport> {
        let (reply, receiver) = channel();
        self.submit(Job::Batch { batch, reply });
        SyncTicket { receiver }
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and stop.
        self.sender.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("sync: worker thread panicked");
            }
        }
    }
}

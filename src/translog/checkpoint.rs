//! Background checkpointing
//!
//! Periodically forces dirty pages to disk and sweeps expired cache entries.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use crossbeam::select;

use crate::error::Result;
use crate::mmap::MappedPageFactory;

/// Handle to the checkpoint thread; stops it on drop
pub(crate) struct Checkpointer {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    pub fn spawn(interval: Duration, factories: Vec<Arc<MappedPageFactory>>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("mmqueue-checkpoint".to_string())
            .spawn(move || {
                tracing::debug!(?interval, "Checkpoint thread started");
                loop {
                    select! {
                        recv(ticker) -> _ => checkpoint(&factories),
                        // Fires on an explicit signal or when the sender is dropped
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                tracing::debug!("Checkpoint thread stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Checkpoint thread panicked");
            }
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn checkpoint(factories: &[Arc<MappedPageFactory>]) {
    for factory in factories {
        if let Err(e) = factory.flush() {
            tracing::error!(
                dir = %factory.page_dir().display(),
                error = %e,
                "Checkpoint flush failed"
            );
        }
        let evicted = factory.evict_expired();
        if evicted > 0 {
            tracing::trace!(dir = %factory.page_dir().display(), evicted, "Evicted expired pages");
        }
    }
}

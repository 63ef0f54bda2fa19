//! Cooperative cancellation shared by player loops and their helpers.
//!
//! The handle owns the only sender of a channel nobody ever writes to.
//! Stopping drops it, which wakes every waiter at once.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

pub fn stop_pair() -> (StopHandle, StopToken) {
    let (tx, rx) = bounded(0);
    let flag = Arc::new(AtomicBool::new(false));
    (
        StopHandle {
            tx: Some(tx),
            flag: Arc::clone(&flag),
        },
        StopToken { rx, flag },
    )
}

#[derive(Debug)]
pub struct StopHandle {
    tx: Option<Sender<()>>,
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
        self.tx.take();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct StopToken {
    rx: Receiver<()>,
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Blocks for up to `timeout`. Returns `true` as soon as a stop is
    /// requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_stopped(),
            _ => true,
        }
    }

    /// The underlying receiver, for use in `select!` next to other channels.
    /// It never yields a message; it disconnects on stop.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

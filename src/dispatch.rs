use crate::notify::{self, Notification};
use crate::queue::MessageQueue;
use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause after a failed receive before trying again.
pub const RECEIVE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// The bounded hand-off between the dispatcher and the workers. A full queue
/// blocks the dispatcher.
pub fn work_queue(capacity: usize) -> (Sender<Notification>, Receiver<Notification>) {
    bounded(capacity.max(1))
}

/// What one receive cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Empty,
    Enqueued,
    Ignored,
    ReceiveFailed,
}

pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    poll_timeout: Duration,
    retry_pause: Duration,
    work: Sender<Notification>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn MessageQueue>, poll_timeout: Duration, work: Sender<Notification>) -> Self {
        Self {
            queue,
            poll_timeout,
            retry_pause: RECEIVE_RETRY_PAUSE,
            work,
        }
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Receives and routes at most one message. Errors only when the workers
    /// are gone.
    pub fn poll_once(&self) -> Result<Poll> {
        let messages = match self.queue.receive(1, self.poll_timeout) {
            Ok(m) => m,
            Err(e) => {
                error!("[main] during message get ({e:#}), sleeping and retrying");
                std::thread::sleep(self.retry_pause);
                return Ok(Poll::ReceiveFailed);
            }
        };

        let [message] = messages.as_slice() else {
            if messages.is_empty() {
                info!("[main] no new notifications...");
                return Ok(Poll::Empty);
            }
            warn!("[main] received {} messages when asking for one, ignoring them", messages.len());
            return Ok(Poll::Ignored);
        };

        info!("[main] received a new notification");
        let notification = match notify::from_message(message) {
            Ok(Some(n)) => n,
            Ok(None) => {
                warn!("[main] not an interesting notification, ignoring it");
                return Ok(Poll::Ignored);
            }
            Err(e) => {
                warn!("[main] undecodable notification, leaving it for redelivery ({e:#})");
                return Ok(Poll::Ignored);
            }
        };

        self.work
            .send(notification)
            .map_err(|_| anyhow!("work queue closed; no workers are running"))?;
        Ok(Poll::Enqueued)
    }

    /// Polls forever; only returns when the work queue has no receivers left.
    pub fn run(&self) -> Result<()> {
        loop {
            self.poll_once()?;
        }
    }
}

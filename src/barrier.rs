//! Fan-out/fan-in countdown used by cluster updates.
//!
//! An [`UpdateBarrier`] is created for N participants and hands out one
//! [`UpdateAck`] per participant. The barrier releases its waiter once all N
//! acknowledgments have been observed, no matter from which task or thread they
//! arrive. An ack that is dropped without calling [`UpdateAck::done`] still
//! counts down (so shutdown never blocks), but the cycle is then reported as
//! abandoned.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug)]
struct Countdown {
    remaining: AtomicUsize,
    abandoned: AtomicUsize,
    released: Notify,
}

#[derive(Debug)]
pub struct UpdateBarrier {
    countdown: Arc<Countdown>,
    issued: AtomicUsize,
    participants: usize,
}

/// Outcome of a closed barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    Completed,
    Abandoned(usize),
}

impl UpdateBarrier {
    pub fn new(participants: usize) -> Self {
        Self {
            countdown: Arc::new(Countdown {
                remaining: AtomicUsize::new(participants),
                abandoned: AtomicUsize::new(0),
                released: Notify::new(),
            }),
            issued: AtomicUsize::new(0),
            participants,
        }
    }
    /// Hands out the next acknowledgment token, or None once every
    /// participant already received one.
    pub fn ack(&self) -> Option<UpdateAck> {
        let issued = self.issued.fetch_add(1, Ordering::AcqRel);
        if issued >= self.participants {
            self.issued.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(UpdateAck { countdown: Some(Arc::clone(&self.countdown)) })
    }
    pub fn participants(&self) -> usize {
        self.participants
    }
    pub fn remaining(&self) -> usize {
        self.countdown.remaining.load(Ordering::Acquire)
    }
    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }
    /// Waits until the Nth of N acknowledgments has arrived.
    pub async fn wait(&self) -> BarrierOutcome {
        loop {
            // register before checking so a release in between is not lost
            let released = self.countdown.released.notified();
            if self.is_released() {
                break;
            }
            released.await;
        }
        match self.countdown.abandoned.load(Ordering::Acquire) {
            0 => BarrierOutcome::Completed,
            n => BarrierOutcome::Abandoned(n),
        }
    }
}

/// Single-use acknowledgment of one participant.
#[derive(Debug)]
#[must_use = "an update must be acknowledged exactly once"]
pub struct UpdateAck {
    countdown: Option<Arc<Countdown>>,
}

impl UpdateAck {
    pub fn done(mut self) {
        self.finish(false);
    }
    fn finish(&mut self, abandoned: bool) {
        if let Some(countdown) = self.countdown.take() {
            if abandoned {
                countdown.abandoned.fetch_add(1, Ordering::AcqRel);
            }
            if countdown.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                countdown.released.notify_waiters();
            }
        }
    }
}

impl Drop for UpdateAck {
    fn drop(&mut self) {
        self.finish(true);
    }
}

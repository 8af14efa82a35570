//! Counting admission limiter with FIFO waiters and an abort-recovery reset.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::GateError;

#[derive(Debug)]
struct GateState {
    admitted: usize,
    /// Bumped by `reset`; permits from an older generation release nothing.
    generation: u64,
    waiters: VecDeque<oneshot::Sender<u64>>,
}

#[derive(Debug)]
struct GateInner {
    name: &'static str,
    limit: usize,
    state: Mutex<GateState>,
}

/// Bounds how many holders may be admitted at once.
///
/// The internal mutex is never held across an await point.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                name,
                limit: limit.max(1),
                state: Mutex::new(GateState {
                    admitted: 0,
                    generation: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn admitted(&self) -> usize {
        self.lock().admitted
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until fewer than `limit` holders are admitted.
    ///
    /// Fails with [`GateError::Reset`] if the gate is reset while queued.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let rx = {
            let mut state = self.lock();
            if state.admitted < self.inner.limit && state.waiters.is_empty() {
                state.admitted += 1;
                return Ok(GatePermit {
                    gate: self.clone(),
                    generation: state.generation,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut pending = PendingAdmission {
            gate: self,
            rx: Some(rx),
        };
        let result = match pending.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(GateError::Reset),
        };
        pending.rx = None;
        match result {
            Ok(generation) => Ok(GatePermit {
                gate: self.clone(),
                generation,
            }),
            Err(_) => Err(GateError::Reset),
        }
    }

    /// Runs `op` while holding a permit; the permit is returned on every exit path.
    pub async fn with_permit<F, T>(&self, op: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(op.await)
    }

    /// Drops every queued waiter and zeroes the admitted count.
    ///
    /// Permits still held from before the reset become inert.
    pub fn reset(&self) {
        let mut state = self.lock();
        let dropped = state.waiters.len();
        state.waiters.clear();
        state.admitted = 0;
        state.generation = state.generation.wrapping_add(1);
        debug!(gate = self.inner.name, dropped, "gate reset");
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if generation != state.generation {
            return;
        }
        // Hand the slot straight to the next live waiter; admitted stays unchanged.
        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(state.generation).is_ok() {
                return;
            }
        }
        state.admitted = state.admitted.saturating_sub(1);
    }
}

/// An admitted slot in a [`ConcurrencyGate`], released on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    gate: ConcurrencyGate,
    generation: u64,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release(self.generation);
    }
}

/// Returns a slot granted to an `acquire` that was cancelled before it observed the grant.
struct PendingAdmission<'a> {
    gate: &'a ConcurrencyGate,
    rx: Option<oneshot::Receiver<u64>>,
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(generation) = rx.try_recv() {
                self.gate.release(generation);
            }
        }
    }
}

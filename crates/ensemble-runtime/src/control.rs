//! Cooperative pause/stop signalling.
//!
//! Every in-flight agent runtime holds a `ControlHandle`: a watch receiver
//! for the pause flag plus a cancellation token for stop. Runtimes observe
//! the handle at their suspension points; the orchestrator owns the
//! sending side and replaces it per run.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Run-level control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// Why an awaited operation was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Paused,
    Stopped,
}

/// Sending side, owned by the orchestrator.
pub struct Controls {
    tx: watch::Sender<ControlSignal>,
    cancel: CancellationToken,
}

impl Controls {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlSignal::Run);
        Self {
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a handle for one runtime.
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            rx: self.tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn pause(&self) {
        let _ = self.tx.send(ControlSignal::Pause);
    }

    pub fn run(&self) {
        let _ = self.tx.send(ControlSignal::Run);
    }

    /// Signal stop and cancel every in-flight await.
    pub fn stop(&self) {
        let _ = self.tx.send(ControlSignal::Stop);
        self.cancel.cancel();
    }
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side carried by agent runtimes.
#[derive(Clone)]
pub struct ControlHandle {
    rx: watch::Receiver<ControlSignal>,
    cancel: CancellationToken,
}

impl ControlHandle {
    /// Current signal; the cancellation token dominates.
    pub fn current(&self) -> ControlSignal {
        if self.cancel.is_cancelled() {
            return ControlSignal::Stop;
        }
        *self.rx.borrow()
    }

    /// Resolve once the signal leaves `Run`. Never resolves while running,
    /// so it composes with `tokio::select!` around blocking awaits.
    pub async fn interrupted(&mut self) -> Interrupt {
        loop {
            match self.current() {
                ControlSignal::Run => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Interrupt::Stopped,
                        changed = self.rx.changed() => {
                            if changed.is_err() {
                                return Interrupt::Stopped;
                            }
                        }
                    }
                }
                ControlSignal::Pause => return Interrupt::Paused,
                ControlSignal::Stop => return Interrupt::Stopped,
            }
        }
    }

    /// Park until the signal returns to `Run`. Errors if stop arrives
    /// while parked.
    pub async fn wait_resumed(&mut self) -> Result<(), Interrupt> {
        loop {
            match self.current() {
                ControlSignal::Run => return Ok(()),
                ControlSignal::Stop => return Err(Interrupt::Stopped),
                ControlSignal::Pause => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Interrupt::Stopped),
                        changed = self.rx.changed() => {
                            if changed.is_err() {
                                return Err(Interrupt::Stopped);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Resolve only on stop. Used where pause must not abort the awaited
    /// future (sub-workflow runs park at step boundaries instead).
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

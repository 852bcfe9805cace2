//! Pause/cancel signalling for in-flight runs.
//!
//! A [`RunHandle`] is the requester side (held in the executor's registry,
//! driven by `pause`/`cancel` calls); a [`RunControl`] is the observer side
//! threaded into node runtimes. Flags are checked at every suspension
//! point; a run never suspends mid-step.

use tokio::sync::watch;

/// Requester side: flips the pause/cancel flags.
#[derive(Debug)]
pub struct RunHandle {
    pause: watch::Sender<bool>,
    cancel: watch::Sender<bool>,
}

impl RunHandle {
    pub fn request_pause(&self) {
        let _ = self.pause.send(true);
    }

    pub fn request_cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Observer side: cheap to clone into branches and node runtimes.
#[derive(Clone, Debug)]
pub struct RunControl {
    pause: watch::Receiver<bool>,
    cancel: watch::Receiver<bool>,
}

impl RunControl {
    #[must_use]
    pub fn pause_requested(&self) -> bool {
        *self.pause.borrow()
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// A control that can never be interrupted (tests, detached work).
    #[must_use]
    pub fn unstoppable() -> Self {
        let (handle, control) = control_pair();
        // Leak the senders so the receivers stay live.
        std::mem::forget(handle);
        control
    }

    /// A copy that still observes cancel but never sees pause. Parallel
    /// branches use this: pause is honored at the batch boundary, not
    /// inside a branch.
    #[must_use]
    pub fn without_pause(&self) -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        std::mem::forget(pause_tx);
        Self {
            pause: pause_rx,
            cancel: self.cancel.clone(),
        }
    }

    /// Resolves when an interrupt is requested; `true` means cancel,
    /// `false` means pause. Never resolves if neither flag is raised.
    pub async fn interrupted(&self) -> bool {
        let mut cancel = self.cancel.clone();
        let mut pause = self.pause.clone();
        if *cancel.borrow() {
            return true;
        }
        if *pause.borrow() {
            return false;
        }
        let outcome: Option<bool> = tokio::select! {
            res = cancel.wait_for(|v| *v) => res.is_ok().then_some(true),
            res = pause.wait_for(|v| *v) => res.is_ok().then_some(false),
        };
        match outcome {
            Some(v) => v,
            None => std::future::pending().await,
        }
    }
}

/// Create a linked handle/control pair for one run.
#[must_use]
pub fn control_pair() -> (RunHandle, RunControl) {
    let (pause_tx, pause_rx) = watch::channel(false);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        RunHandle {
            pause: pause_tx,
            cancel: cancel_tx,
        },
        RunControl {
            pause: pause_rx,
            cancel: cancel_rx,
        },
    )
}

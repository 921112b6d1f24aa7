//! Send/stream status machine.
//!
//! ```text
//! Idle ──send──▶ AwaitingSession ──ok──▶ Sending ──body──▶ Streaming ──complete──▶ Idle
//!   └───send (session cached)──────────────▲                  │
//!                      │ fail                                  │ error / stall
//!                      ▼                                       ▼
//!                    Error ────────────────────────────────▶ Idle
//! ```
//!
//! Only one send may be in flight per widget. [`SendGuard::claim`] moves the
//! status out of `Idle` atomically and rejects the call otherwise; dropping
//! the guard always returns the status to `Idle`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{Result, WidgetError};

/// Where the current send is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    AwaitingSession,
    Sending,
    Streaming,
    Error,
}

impl PipelineStatus {
    /// Whether `self -> next` is an edge of the status machine.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use PipelineStatus::{AwaitingSession, Error, Idle, Sending, Streaming};
        matches!(
            (self, next),
            (Idle, AwaitingSession | Sending)
                | (AwaitingSession, Sending | Error)
                | (Sending, Streaming | Error | Idle)
                | (Streaming, Idle | Error)
                | (Error, Idle)
        )
    }

    #[must_use]
    pub fn is_busy(self) -> bool {
        self != Self::Idle
    }
}

/// Shared status cell.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    status: Arc<Mutex<PipelineStatus>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on the pipeline for one send.
#[derive(Debug)]
pub struct SendGuard {
    pipeline: Pipeline,
}

impl SendGuard {
    /// Leave `Idle` for `first`, or fail with [`WidgetError::Busy`].
    pub fn claim(pipeline: &Pipeline, first: PipelineStatus) -> Result<Self> {
        let mut status = pipeline.lock();
        if status.is_busy() || !PipelineStatus::Idle.can_transition(first) {
            return Err(WidgetError::Busy);
        }
        *status = first;
        Ok(Self {
            pipeline: pipeline.clone(),
        })
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    /// Follow an edge of the status machine. Illegal edges are logged and
    /// ignored.
    pub fn advance(&self, next: PipelineStatus) {
        let mut status = self.pipeline.lock();
        if status.can_transition(next) {
            tracing::trace!(from = ?*status, to = ?next, "Pipeline transition");
            *status = next;
        } else {
            tracing::warn!(from = ?*status, to = ?next, "Ignoring illegal pipeline transition");
        }
    }
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        let mut status = self.pipeline.lock();
        if *status != PipelineStatus::Idle {
            tracing::trace!(from = ?*status, "Pipeline back to idle");
        }
        *status = PipelineStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineStatus::*;

    #[test]
    fn test_success_path_edges() {
        assert!(Idle.can_transition(AwaitingSession));
        assert!(AwaitingSession.can_transition(Sending));
        assert!(Sending.can_transition(Streaming));
        assert!(Streaming.can_transition(Idle));
        assert!(Idle.can_transition(Sending));
    }

    #[test]
    fn test_error_edges() {
        assert!(AwaitingSession.can_transition(Error));
        assert!(Streaming.can_transition(Error));
        assert!(Error.can_transition(Idle));
        assert!(!Idle.can_transition(Streaming));
        assert!(!Error.can_transition(Sending));
    }

    #[test]
    fn test_second_claim_is_busy() {
        let pipeline = Pipeline::new();
        let guard = SendGuard::claim(&pipeline, Sending).unwrap();
        assert!(matches!(
            SendGuard::claim(&pipeline, Sending),
            Err(WidgetError::Busy)
        ));

        guard.advance(Streaming);
        assert_eq!(pipeline.status(), Streaming);
        drop(guard);
        assert_eq!(pipeline.status(), Idle);
        assert!(SendGuard::claim(&pipeline, AwaitingSession).is_ok());
    }

    #[test]
    fn test_illegal_advance_is_ignored() {
        let pipeline = Pipeline::new();
        let guard = SendGuard::claim(&pipeline, AwaitingSession).unwrap();
        guard.advance(Streaming);
        assert_eq!(guard.status(), AwaitingSession);
    }

    #[test]
    fn test_claim_requires_a_first_edge() {
        let pipeline = Pipeline::new();
        assert!(SendGuard::claim(&pipeline, Streaming).is_err());
        assert_eq!(pipeline.status(), Idle);
    }
}

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use thiserror::Error;

/// Bootstrap stages, in the order the launcher walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Start,
    ManifestLoad,
    UpdateWrapperCreation,
    FileSync,
    EnvironmentPrepare,
    ApplicationInit,
    ApplicationStart,
    Running,
}

impl Phase {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::ManifestLoad => "Manifest Load",
            Self::UpdateWrapperCreation => "Update Wrapper Creation",
            Self::FileSync => "File Sync",
            Self::EnvironmentPrepare => "Application Environment Prepare",
            Self::ApplicationInit => "Application Init",
            Self::ApplicationStart => "Application Start",
            Self::Running => "Running",
        }
    }

    /// Whether the bootstrap may move from `self` directly to `next`.
    ///
    /// `UpdateWrapperCreation` is optional, and a failed manifest load with a
    /// usable cache may jump straight to `EnvironmentPrepare`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::ManifestLoad)
                | (
                    Self::ManifestLoad,
                    Self::UpdateWrapperCreation | Self::FileSync | Self::EnvironmentPrepare
                )
                | (Self::UpdateWrapperCreation, Self::FileSync)
                | (Self::FileSync, Self::EnvironmentPrepare)
                | (Self::EnvironmentPrepare, Self::ApplicationInit)
                | (Self::ApplicationInit, Self::ApplicationStart)
                | (Self::ApplicationStart, Self::Running)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal phase transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

/// Owner of the current bootstrap phase.
#[derive(Debug)]
pub struct PhaseTracker {
    current: Arc<Mutex<Phase>>,
}

/// Read-only view of a [`PhaseTracker`], for diagnostics from other threads.
#[derive(Debug, Clone)]
pub struct PhaseHandle {
    current: Arc<Mutex<Phase>>,
}

impl PhaseHandle {
    #[must_use]
    pub fn current(&self) -> Phase {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Phase::Start)),
        }
    }

    #[must_use]
    pub fn current(&self) -> Phase {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn handle(&self) -> PhaseHandle {
        PhaseHandle {
            current: Arc::clone(&self.current),
        }
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns [`IllegalTransition`] if `next` does not directly follow the
    /// current phase; the current phase is left unchanged.
    pub fn enter(&self, next: Phase) -> Result<(), IllegalTransition> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if !current.can_advance_to(next) {
            return Err(IllegalTransition {
                from: *current,
                to: next,
            });
        }
        debug!("Entering {next} phase");
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{IllegalTransition, Phase, PhaseTracker};

    const ALL: [Phase; 8] = [
        Phase::Start,
        Phase::ManifestLoad,
        Phase::UpdateWrapperCreation,
        Phase::FileSync,
        Phase::EnvironmentPrepare,
        Phase::ApplicationInit,
        Phase::ApplicationStart,
        Phase::Running,
    ];

    #[test]
    fn full_update_path_is_accepted() {
        let tracker = PhaseTracker::new();
        for phase in &ALL[1..] {
            tracker.enter(*phase).expect("ordered transition should be legal");
        }
        assert_eq!(tracker.current(), Phase::Running);
    }

    #[test]
    fn cached_fallback_may_skip_sync() {
        let tracker = PhaseTracker::new();
        tracker
            .enter(Phase::ManifestLoad)
            .expect("start to manifest load should be legal");
        tracker
            .enter(Phase::EnvironmentPrepare)
            .expect("skip to environment prepare should be legal");
    }

    #[test]
    fn transitions_never_go_backwards_or_repeat() {
        for from in ALL {
            for to in ALL {
                if to <= from {
                    assert!(!from.can_advance_to(to), "{from} -> {to} should be illegal");
                }
            }
        }
    }

    #[test]
    fn illegal_transition_keeps_current_phase() {
        let tracker = PhaseTracker::new();
        let handle = tracker.handle();

        let error = tracker
            .enter(Phase::FileSync)
            .expect_err("start cannot jump to file sync");

        assert_eq!(
            error,
            IllegalTransition {
                from: Phase::Start,
                to: Phase::FileSync
            }
        );
        assert_eq!(handle.current(), Phase::Start);
    }

    #[test]
    fn handle_observes_tracker_updates() {
        let tracker = PhaseTracker::new();
        let handle = tracker.handle();

        tracker
            .enter(Phase::ManifestLoad)
            .expect("start to manifest load should be legal");

        assert_eq!(handle.current(), Phase::ManifestLoad);
        assert_eq!(Phase::EnvironmentPrepare.to_string(), "Application Environment Prepare");
    }
}

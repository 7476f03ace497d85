use crate::error::BootstrapError;
use crate::phase::Phase;

/// Error-handling flags in effect for one bootstrap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    pub ignore_update_errors: bool,
}

/// How the bootstrap continues after a phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Report the failure and stop.
    Abort,
    /// Report the failure and launch from the files already on disk.
    ReportAndContinue,
    /// Log the failure and launch the cached release without syncing.
    ContinueWithCache,
}

impl Decision {
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Abort)
    }

    /// Whether the user is told about the failure.
    #[must_use]
    pub const fn reports(self) -> bool {
        !matches!(self, Self::ContinueWithCache)
    }
}

pub struct PolicyGate;

impl PolicyGate {
    #[must_use]
    pub fn decide(
        phase: Phase,
        error: &BootstrapError,
        policy: Policy,
        has_cached_manifest: bool,
    ) -> Decision {
        if matches!(
            error,
            BootstrapError::IllegalTransition(_) | BootstrapError::Lock(_)
        ) {
            return Decision::Abort;
        }

        match phase {
            Phase::ManifestLoad if has_cached_manifest => Decision::ContinueWithCache,
            Phase::FileSync if policy.ignore_update_errors => Decision::ReportAndContinue,
            _ => Decision::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, Policy, PolicyGate};
    use crate::error::{BootstrapError, LaunchError};
    use crate::phase::{IllegalTransition, Phase};

    fn network_error() -> BootstrapError {
        BootstrapError::io("manifest unreachable", std::io::Error::other("offline"))
    }

    const LENIENT: Policy = Policy {
        ignore_update_errors: true,
    };

    #[test]
    fn manifest_load_failure_falls_back_to_cache_only_when_present() {
        let error = network_error();

        assert_eq!(
            PolicyGate::decide(Phase::ManifestLoad, &error, Policy::default(), true),
            Decision::ContinueWithCache
        );
        assert_eq!(
            PolicyGate::decide(Phase::ManifestLoad, &error, LENIENT, false),
            Decision::Abort
        );
    }

    #[test]
    fn file_sync_failure_follows_ignore_update_errors() {
        let error = network_error();

        assert_eq!(
            PolicyGate::decide(Phase::FileSync, &error, Policy::default(), true),
            Decision::Abort
        );
        let lenient = PolicyGate::decide(Phase::FileSync, &error, LENIENT, true);
        assert_eq!(lenient, Decision::ReportAndContinue);
        assert!(lenient.reports());
        assert!(!lenient.is_fatal());
    }

    #[test]
    fn launch_phases_are_always_fatal() {
        let error = BootstrapError::from(LaunchError::lifecycle("start", "crashed"));

        for phase in [
            Phase::UpdateWrapperCreation,
            Phase::EnvironmentPrepare,
            Phase::ApplicationInit,
            Phase::ApplicationStart,
        ] {
            assert_eq!(PolicyGate::decide(phase, &error, LENIENT, true), Decision::Abort);
        }
    }

    #[test]
    fn illegal_transitions_are_never_absorbed() {
        let error = BootstrapError::from(IllegalTransition {
            from: Phase::Start,
            to: Phase::FileSync,
        });

        assert_eq!(
            PolicyGate::decide(Phase::ManifestLoad, &error, LENIENT, true),
            Decision::Abort
        );
    }
}

//! The Liftoff launcher.
//!
//! Staged bootstrap on top of `liftoff-core`: phase tracking, the error
//! policy, UI and application collaborators, settings, logging and the
//! single-instance lock used by the `liftoff` binary.

pub mod error;
pub mod instance_lock;
pub mod launch;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod policy;
pub mod settings;
pub mod ui;

pub use error::{BootstrapError, ErrorReport, LaunchError, PhaseFailure};
pub use launch::{
    Application, ApplicationFactory, ApplicationRegistry, LaunchEnvironment, ProcessFactory,
};
pub use orchestrator::{Bootstrap, BootstrapConfig, BootstrapOutcome, LaunchedApplication};
pub use phase::{Phase, PhaseHandle, PhaseTracker};
pub use policy::{Decision, Policy, PolicyGate};
pub use settings::{ErrorMessages, LauncherSettings};
pub use ui::{ConsoleUi, LauncherUi, UiEvent, UiOutcome, UiSender, run_ui};

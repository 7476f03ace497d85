use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use liftoff_core::{
    Manifest, ProgressSink, ReleaseClient, SyncExecutor, SyncOptions, SyncReport, Transport,
    TransportOptions, cached_manifest_path, has_update, is_newer_version, load_cached,
    load_remote, persist, plan, remove_stale_temp_files,
};
use liftoff_platform::{AppPaths, TargetOs};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::error::{BootstrapError, ErrorReport, LaunchError, PhaseFailure};
use crate::instance_lock::InstanceLock;
use crate::launch::{Application, ApplicationFactory, LaunchEnvironment};
use crate::phase::{Phase, PhaseHandle, PhaseTracker};
use crate::policy::{Decision, Policy, PolicyGate};
use crate::settings::{ErrorMessages, LauncherSettings};
use crate::ui::{UiEvent, UiSender};

const PROGRESS_QUEUE_CAPACITY: usize = 32;

/// Everything a bootstrap run needs to know up front.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub manifest_uri: Option<String>,
    pub cache_dir: PathBuf,
    pub target: TargetOs,
    pub ignore_update_errors: bool,
    pub accept_downgrade: bool,
    pub lingering_update_screen: bool,
    pub transport: TransportOptions,
    pub sync: SyncOptions,
    pub error_messages: ErrorMessages,
}

impl BootstrapConfig {
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            manifest_uri: None,
            cache_dir,
            target: TargetOs::current(),
            ignore_update_errors: false,
            accept_downgrade: false,
            lingering_update_screen: false,
            transport: TransportOptions::default(),
            sync: SyncOptions::default(),
            error_messages: ErrorMessages::default(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &LauncherSettings, paths: &AppPaths) -> Self {
        Self {
            manifest_uri: settings
                .manifest_uri
                .as_deref()
                .map(str::trim)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string),
            ignore_update_errors: settings.ignore_update_errors,
            accept_downgrade: settings.accept_downgrade,
            lingering_update_screen: settings.lingering_update_screen,
            transport: settings.transport_options(),
            sync: settings.sync_options(),
            error_messages: settings.error_messages.clone(),
            ..Self::new(settings.cache_dir(paths))
        }
    }
}

/// An application that reached the `Running` phase.
///
/// Holds the cache directory lock until dropped.
pub struct LaunchedApplication {
    manifest: Manifest,
    application: Box<dyn Application>,
    _lock: InstanceLock,
}

impl LaunchedApplication {
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// # Errors
    /// Returns an error if the application ends abnormally.
    pub async fn wait(&mut self) -> Result<(), LaunchError> {
        self.application.wait().await
    }

    /// # Errors
    /// Returns an error if the application cannot be stopped.
    pub async fn stop(&mut self) -> Result<(), LaunchError> {
        self.application.stop().await
    }
}

impl fmt::Debug for LaunchedApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedApplication")
            .field("launch_class", &self.manifest.launch_class())
            .field("version", &self.manifest.version())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum BootstrapOutcome {
    Running(LaunchedApplication),
    Failed(PhaseFailure),
}

enum LoadedManifest {
    Fresh {
        remote: Manifest,
        cached: Option<Manifest>,
    },
    CachedOnly(Manifest),
}

struct SyncedRelease {
    manifest: Manifest,
    files_updated: bool,
    updater_shown: bool,
}

/// Drives one launcher run from manifest retrieval to a running application.
pub struct Bootstrap {
    config: BootstrapConfig,
    factory: Arc<dyn ApplicationFactory>,
    ui: UiSender,
    tracker: PhaseTracker,
    transport: Option<Arc<dyn Transport>>,
}

impl Bootstrap {
    #[must_use]
    pub fn new(config: BootstrapConfig, factory: Arc<dyn ApplicationFactory>, ui: UiSender) -> Self {
        Self {
            config,
            factory,
            ui,
            tracker: PhaseTracker::new(),
            transport: None,
        }
    }

    /// Use `transport` instead of building an HTTP client from the config.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn phase_handle(&self) -> PhaseHandle {
        self.tracker.handle()
    }

    /// Run every phase in order. Exactly one of `UiEvent::Launched` or
    /// `UiEvent::Failed` is sent, as the last event of the run.
    pub async fn run(self) -> BootstrapOutcome {
        match self.run_phases().await {
            Ok(launched) => {
                info!(
                    "Launched '{}' version '{}'",
                    launched.manifest.launch_class(),
                    launched.manifest.version()
                );
                self.ui.send(UiEvent::Launched);
                BootstrapOutcome::Running(launched)
            }
            Err(failure) => {
                error!("{failure}");
                let report = ErrorReport::from_failure(&self.config.error_messages, &failure);
                self.ui.send(UiEvent::Failed(report));
                BootstrapOutcome::Failed(failure)
            }
        }
    }

    async fn run_phases(&self) -> Result<LaunchedApplication, PhaseFailure> {
        let lock = InstanceLock::acquire(&self.config.cache_dir)
            .map_err(|error| PhaseFailure::new(Phase::Start, error))?;
        self.ui.send(UiEvent::ShowLoader);

        self.enter(Phase::ManifestLoad)?;
        let release = match self.load_manifest().await? {
            LoadedManifest::Fresh { remote, cached } => self.synchronize(remote, cached).await?,
            LoadedManifest::CachedOnly(manifest) => SyncedRelease {
                manifest,
                files_updated: false,
                updater_shown: false,
            },
        };
        let manifest = release.manifest;
        let lingering = self.config.lingering_update_screen || manifest.lingering_update_screen();

        self.enter(Phase::EnvironmentPrepare)?;
        let environment = LaunchEnvironment {
            cache_dir: self.config.cache_dir.clone(),
            arguments: manifest.arguments().to_vec(),
            files_updated: release.files_updated,
        };
        let mut application = self
            .factory
            .create(manifest.launch_class(), &environment)
            .map_err(|error| PhaseFailure::new(Phase::EnvironmentPrepare, error))?;

        self.enter(Phase::ApplicationInit)?;
        application
            .init()
            .await
            .map_err(|error| PhaseFailure::new(Phase::ApplicationInit, error))?;

        if release.updater_shown && !lingering {
            self.ui.send(UiEvent::CloseUpdater);
        }

        self.enter(Phase::ApplicationStart)?;
        if release.files_updated
            && let Some(page) = manifest.whats_new_page()
        {
            self.ui.send(UiEvent::WhatsNew(page.to_string()));
        }
        if let Err(error) = application.start().await {
            if let Err(stop_error) = application.stop().await {
                warn!("Failed to stop application after start failure: {stop_error}");
            }
            return Err(PhaseFailure::new(Phase::ApplicationStart, error));
        }

        self.enter(Phase::Running)?;
        if release.updater_shown && lingering {
            self.ui.send(UiEvent::CloseUpdater);
        }

        Ok(LaunchedApplication {
            manifest,
            application,
            _lock: lock,
        })
    }

    fn enter(&self, phase: Phase) -> Result<(), PhaseFailure> {
        self.tracker
            .enter(phase)
            .map_err(|error| PhaseFailure::new(self.tracker.current(), error))?;
        self.ui.send(UiEvent::PhaseChanged(phase));
        Ok(())
    }

    fn policy(&self, manifest: Option<&Manifest>) -> Policy {
        Policy {
            ignore_update_errors: self.config.ignore_update_errors
                || manifest.is_some_and(Manifest::ignore_update_errors),
        }
    }

    fn transport(&self, ignore_ssl_errors: bool) -> Result<Arc<dyn Transport>, BootstrapError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }

        let mut options = self.config.transport.clone();
        options.ignore_ssl_validation |= ignore_ssl_errors;
        Ok(Arc::new(ReleaseClient::new(&options)?))
    }

    async fn load_manifest(&self) -> Result<LoadedManifest, PhaseFailure> {
        let cached = load_cached(&cached_manifest_path(&self.config.cache_dir)).map(|cached| {
            debug!(
                "Cached release '{}' synchronized at {}",
                cached.manifest.version(),
                cached.synced_at
            );
            cached.manifest
        });

        let error = match self.fetch_remote(cached.as_ref()).await {
            Ok(remote) => return Ok(self.guard_downgrade(remote, cached)),
            Err(error) => error,
        };

        let decision = PolicyGate::decide(
            Phase::ManifestLoad,
            &error,
            self.policy(cached.as_ref()),
            cached.is_some(),
        );
        match (decision, cached) {
            (Decision::ContinueWithCache, Some(cached)) => {
                warn!(
                    "Manifest unavailable, launching cached release '{}': {error}",
                    cached.version()
                );
                Ok(LoadedManifest::CachedOnly(cached))
            }
            _ => Err(PhaseFailure::new(Phase::ManifestLoad, error)),
        }
    }

    async fn fetch_remote(&self, cached: Option<&Manifest>) -> Result<Manifest, BootstrapError> {
        let uri = match (&self.config.manifest_uri, cached) {
            (Some(uri), _) => uri.clone(),
            (None, Some(cached)) => cached.document_uri(),
            (None, None) => return Err(BootstrapError::NoManifestSource),
        };

        let transport = self.transport(cached.is_some_and(Manifest::ignore_ssl_errors))?;
        let remote = load_remote(transport.as_ref(), &uri).await?;
        info!("Loaded manifest version '{}' from {uri}", remote.version());
        Ok(remote)
    }

    fn guard_downgrade(&self, remote: Manifest, cached: Option<Manifest>) -> LoadedManifest {
        match cached {
            Some(cached)
                if remote.is_downgrade_from(&cached)
                    && !(self.config.accept_downgrade || remote.accept_downgrade()) =>
            {
                info!(
                    "Ignoring manifest version '{}' older than installed '{}'",
                    remote.version(),
                    cached.version()
                );
                LoadedManifest::Fresh {
                    remote: cached.clone(),
                    cached: Some(cached),
                }
            }
            cached => LoadedManifest::Fresh { remote, cached },
        }
    }

    async fn synchronize(
        &self,
        remote: Manifest,
        cached: Option<Manifest>,
    ) -> Result<SyncedRelease, PhaseFailure> {
        let update = has_update(cached.as_ref(), &remote);
        self.ui.send(UiEvent::UpdateAvailability(update));

        if update {
            self.enter(Phase::UpdateWrapperCreation)?;
            match &cached {
                Some(installed) if is_newer_version(remote.version(), installed.version()) => info!(
                    "Updating from version '{}' to '{}'",
                    installed.version(),
                    remote.version()
                ),
                Some(_) => info!("Release changed, version '{}'", remote.version()),
                None => info!("Installing version '{}'", remote.version()),
            }
            self.ui.send(UiEvent::ShowUpdater {
                update_text: remote.update_text().map(str::to_string),
            });
        }

        self.enter(Phase::FileSync)?;
        match self.sync_files(&remote, cached.as_ref()).await {
            Ok(report) => Ok(SyncedRelease {
                files_updated: report.downloaded > 0 || report.deleted > 0,
                manifest: remote,
                updater_shown: update,
            }),
            Err(error) => {
                let decision = PolicyGate::decide(
                    Phase::FileSync,
                    &error,
                    self.policy(Some(&remote)),
                    cached.is_some(),
                );
                if decision.is_fatal() {
                    return Err(PhaseFailure::new(Phase::FileSync, error));
                }

                warn!("Launching with files on disk after sync failure: {error}");
                if decision.reports() {
                    self.ui.send(UiEvent::ErrorReported(ErrorReport::new(
                        &self.config.error_messages,
                        Phase::FileSync,
                        &error,
                    )));
                }
                Ok(SyncedRelease {
                    manifest: cached.unwrap_or(remote),
                    files_updated: false,
                    updater_shown: update,
                })
            }
        }
    }

    async fn sync_files(
        &self,
        remote: &Manifest,
        cached: Option<&Manifest>,
    ) -> Result<SyncReport, BootstrapError> {
        let cache_dir = self.config.cache_dir.clone();
        let mut sync_plan = plan(cached, remote, self.config.target);
        let (sync_plan, stale, repaired) = tokio::task::spawn_blocking(move || {
            let stale = remove_stale_temp_files(&cache_dir);
            let repaired = sync_plan.verify_unchanged(&cache_dir);
            (sync_plan, stale, repaired)
        })
        .await
        .map_err(|error| {
            BootstrapError::io("file verification task failed", std::io::Error::other(error))
        })?;
        if stale > 0 {
            debug!("Removed {stale} stale temp files");
        }
        if repaired > 0 {
            info!("Repairing {repaired} missing or corrupt files");
        }
        if sync_plan.is_empty() {
            debug!("Release files are up to date");
        } else {
            info!(
                "Syncing {} files ({} bytes), removing {}",
                sync_plan.to_download.len(),
                sync_plan.download_size(),
                sync_plan.to_delete.len()
            );
        }

        let executor = SyncExecutor::new(
            self.transport(remote.ignore_ssl_errors())?,
            self.config.sync.clone(),
        );
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_QUEUE_CAPACITY);
        let ui = self.ui.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(fraction) = progress_rx.recv().await {
                ui.send(UiEvent::Progress(fraction));
            }
        });

        let progress = ProgressSink::new(progress_tx);
        let result = executor
            .execute(&sync_plan, &self.config.cache_dir, &progress)
            .await;
        drop(progress);
        if let Err(error) = forwarder.await {
            warn!("Progress forwarding stopped: {error}");
        }
        let report = result?;

        if cached != Some(remote) {
            persist(remote, &cached_manifest_path(&self.config.cache_dir))
                .map_err(|error| BootstrapError::io("failed to persist cached manifest", error))?;
        }
        Ok(report)
    }
}

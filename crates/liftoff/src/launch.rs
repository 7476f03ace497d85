use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use liftoff_core::relative_path;
use log::{debug, info, warn};

use crate::error::LaunchError;

/// What an application is handed when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnvironment {
    /// Directory holding the synchronized release.
    pub cache_dir: PathBuf,
    pub arguments: Vec<String>,
    /// Whether this run installed new or changed files.
    pub files_updated: bool,
}

/// Lifecycle of the launched application, driven in order: `init`, `start`,
/// then `wait` or `stop`.
#[async_trait]
pub trait Application: Send {
    async fn init(&mut self) -> Result<(), LaunchError>;

    async fn start(&mut self) -> Result<(), LaunchError>;

    /// Block until the application exits on its own.
    async fn wait(&mut self) -> Result<(), LaunchError>;

    async fn stop(&mut self) -> Result<(), LaunchError>;
}

/// Turns a manifest's launch class into a runnable [`Application`].
pub trait ApplicationFactory: Send + Sync {
    /// # Errors
    /// Returns an error if `launch_class` is unknown or cannot be built.
    fn create(
        &self,
        launch_class: &str,
        environment: &LaunchEnvironment,
    ) -> Result<Box<dyn Application>, LaunchError>;
}

type Constructor =
    Box<dyn Fn(&LaunchEnvironment) -> Result<Box<dyn Application>, LaunchError> + Send + Sync>;

/// Factory for applications linked into the launcher, keyed by launch class.
#[derive(Default)]
pub struct ApplicationRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ApplicationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<F>(mut self, launch_class: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&LaunchEnvironment) -> Result<Box<dyn Application>, LaunchError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(launch_class.into(), Box::new(constructor));
        self
    }
}

impl ApplicationFactory for ApplicationRegistry {
    fn create(
        &self,
        launch_class: &str,
        environment: &LaunchEnvironment,
    ) -> Result<Box<dyn Application>, LaunchError> {
        let constructor = self
            .constructors
            .get(launch_class)
            .ok_or_else(|| LaunchError::UnknownLaunchClass(launch_class.to_string()))?;
        constructor(environment)
    }
}

/// Factory treating the launch class as an executable inside the release.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessFactory;

impl ApplicationFactory for ProcessFactory {
    fn create(
        &self,
        launch_class: &str,
        environment: &LaunchEnvironment,
    ) -> Result<Box<dyn Application>, LaunchError> {
        let relative = Path::new(launch_class);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if launch_class.trim().is_empty() || escapes {
            return Err(LaunchError::Construction {
                launch_class: launch_class.to_string(),
                message: "must be a relative path inside the release".to_string(),
            });
        }

        Ok(Box::new(ProcessApplication {
            program: relative_path(&environment.cache_dir, launch_class),
            arguments: environment.arguments.clone(),
            working_dir: environment.cache_dir.clone(),
            child: None,
        }))
    }
}

struct ProcessApplication {
    program: PathBuf,
    arguments: Vec<String>,
    working_dir: PathBuf,
    child: Option<tokio::process::Child>,
}

impl ProcessApplication {
    fn child(&mut self, stage: &'static str) -> Result<&mut tokio::process::Child, LaunchError> {
        self.child
            .as_mut()
            .ok_or_else(|| LaunchError::lifecycle(stage, "process was never started"))
    }
}

#[async_trait]
impl Application for ProcessApplication {
    async fn init(&mut self) -> Result<(), LaunchError> {
        match tokio::fs::metadata(&self.program).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            Ok(_) => Err(LaunchError::lifecycle(
                "init",
                format!("{} is not a file", self.program.display()),
            )),
            Err(error) => Err(LaunchError::lifecycle(
                "init",
                format!("{}: {error}", self.program.display()),
            )),
        }
    }

    async fn start(&mut self) -> Result<(), LaunchError> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.arguments)
            .current_dir(&self.working_dir)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        info!(
            "Started {} (pid {})",
            self.program.display(),
            child.id().map_or_else(|| "unknown".to_string(), |id| id.to_string())
        );
        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), LaunchError> {
        let status = self
            .child("wait")?
            .wait()
            .await
            .map_err(|error| LaunchError::lifecycle("wait", error.to_string()))?;
        if status.success() {
            debug!("Application exited cleanly");
            Ok(())
        } else {
            Err(LaunchError::lifecycle("wait", format!("exited with {status}")))
        }
    }

    async fn stop(&mut self) -> Result<(), LaunchError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        if let Err(error) = child.kill().await {
            warn!("Failed to stop {}: {error}", self.program.display());
            return Err(LaunchError::lifecycle("stop", error.to_string()));
        }
        Ok(())
    }
}

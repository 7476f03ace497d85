use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use liftoff::logging::init_logging;
use liftoff::ui::channel;
use liftoff::{
    Bootstrap, BootstrapConfig, BootstrapOutcome, ConsoleUi, LauncherSettings, ProcessFactory,
    UiOutcome, run_ui,
};
use liftoff_platform::AppPaths;
use log::{error, info};

const BOOTSTRAP_THREAD_NAME: &str = "liftoff-bootstrap";

fn main() -> ExitCode {
    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);

    let paths = match AppPaths::new() {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("liftoff: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = paths.ensure_dirs() {
        eprintln!("liftoff: failed to create launcher directories: {error}");
    }

    let settings = settings_path.as_deref().map_or_else(
        LauncherSettings::load,
        LauncherSettings::load_from_path,
    );
    init_logging(
        &paths.log_file(),
        settings.debug_logging,
        settings.max_log_size_bytes,
    );

    let (events, receiver) = channel();
    let bootstrap = Bootstrap::new(
        BootstrapConfig::from_settings(&settings, &paths),
        Arc::new(ProcessFactory),
        events,
    );

    let worker = match thread::Builder::new()
        .name(BOOTSTRAP_THREAD_NAME.to_string())
        .spawn(move || run_bootstrap(bootstrap))
    {
        Ok(worker) => worker,
        Err(error) => {
            error!("Failed to start bootstrap thread: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut ui = ConsoleUi::new();
    let outcome = run_ui(&mut ui, &receiver);
    drop(receiver);

    let succeeded = match worker.join() {
        Ok(succeeded) => succeeded,
        Err(_) => {
            error!("Bootstrap thread panicked");
            false
        }
    };

    if succeeded && outcome == UiOutcome::Launched {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the bootstrap and then wait for the launched application to exit.
fn run_bootstrap(bootstrap: Bootstrap) -> bool {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!("Failed to start async runtime: {error}");
            return false;
        }
    };

    runtime.block_on(async move {
        match bootstrap.run().await {
            BootstrapOutcome::Running(mut application) => match application.wait().await {
                Ok(()) => {
                    info!("Application exited");
                    true
                }
                Err(error) => {
                    error!("{error}");
                    false
                }
            },
            BootstrapOutcome::Failed(_) => false,
        }
    })
}

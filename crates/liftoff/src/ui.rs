//! Presentation side of the launcher.
//!
//! The bootstrap thread never renders anything itself. It emits [`UiEvent`]s
//! over a channel, and the foreground thread feeds them to a [`LauncherUi`]
//! with [`run_ui`].

use std::io::Write;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};

use crate::error::ErrorReport;
use crate::phase::Phase;

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ShowLoader,
    UpdateAvailability(bool),
    ShowUpdater { update_text: Option<String> },
    PhaseChanged(Phase),
    Progress(f64),
    CloseUpdater,
    WhatsNew(String),
    /// A failure the bootstrap recovered from.
    ErrorReported(ErrorReport),
    Launched,
    Failed(ErrorReport),
}

impl UiEvent {
    /// `Launched` and `Failed` end the event stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Launched | Self::Failed(_))
    }
}

/// Rendering strategy for the launcher's lifecycle.
pub trait LauncherUi {
    fn show_loader(&mut self) {}

    fn update_available(&mut self, _available: bool) {}

    fn show_updater(&mut self, _update_text: Option<&str>) {}

    fn phase_changed(&mut self, _phase: Phase) {}

    fn progress(&mut self, _fraction: f64) {}

    fn close_updater(&mut self) {}

    fn whats_new(&mut self, _page: &str) {}

    fn report_error(&mut self, report: &ErrorReport);

    fn fatal_error(&mut self, report: &ErrorReport);

    fn launched(&mut self) {}
}

/// Sending half of the UI event channel, owned by the bootstrap.
#[derive(Debug, Clone)]
pub struct UiSender {
    sender: Sender<UiEvent>,
}

impl UiSender {
    pub fn send(&self, event: UiEvent) {
        if let Err(error) = self.sender.send(event) {
            debug!("UI is gone, dropping {:?}", error.into_inner());
        }
    }
}

#[must_use]
pub fn channel() -> (UiSender, Receiver<UiEvent>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (UiSender { sender }, receiver)
}

/// How the event stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UiOutcome {
    Launched,
    Failed(ErrorReport),
    /// The bootstrap went away without a terminal event.
    Disconnected,
}

/// Deliver events to `ui` in arrival order until a terminal event arrives or
/// every sender is dropped.
pub fn run_ui(ui: &mut dyn LauncherUi, events: &Receiver<UiEvent>) -> UiOutcome {
    for event in events {
        match event {
            UiEvent::ShowLoader => ui.show_loader(),
            UiEvent::UpdateAvailability(available) => ui.update_available(available),
            UiEvent::ShowUpdater { update_text } => ui.show_updater(update_text.as_deref()),
            UiEvent::PhaseChanged(phase) => ui.phase_changed(phase),
            UiEvent::Progress(fraction) => ui.progress(fraction),
            UiEvent::CloseUpdater => ui.close_updater(),
            UiEvent::WhatsNew(page) => ui.whats_new(&page),
            UiEvent::ErrorReported(report) => ui.report_error(&report),
            UiEvent::Launched => {
                ui.launched();
                return UiOutcome::Launched;
            }
            UiEvent::Failed(report) => {
                ui.fatal_error(&report);
                return UiOutcome::Failed(report);
            }
        }
    }
    UiOutcome::Disconnected
}

/// Terminal rendering used when no other UI is installed.
pub struct ConsoleUi<W: Write = std::io::Stderr> {
    out: W,
    last_percent: Option<u32>,
    open_pages: bool,
}

impl ConsoleUi {
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(std::io::stderr(), true)
    }
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> ConsoleUi<W> {
    /// `open_pages` controls whether what's-new pages are opened in the
    /// system browser.
    pub fn with_writer(out: W, open_pages: bool) -> Self {
        Self {
            out,
            last_percent: None,
            open_pages,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(error) = writeln!(self.out, "{text}") {
            debug!("Console output failed: {error}");
        }
    }

    fn report(&mut self, label: &str, report: &ErrorReport) {
        let text = format!(
            "{label}: {}\n  {}\n  {}\n  {}",
            report.title, report.header, report.body, report.detail
        );
        self.line(&text);
    }
}

impl<W: Write> LauncherUi for ConsoleUi<W> {
    fn show_loader(&mut self) {
        self.line("Checking for updates...");
    }

    fn show_updater(&mut self, update_text: Option<&str>) {
        self.line(update_text.unwrap_or("Updating application..."));
    }

    fn phase_changed(&mut self, phase: Phase) {
        self.line(&format!("[{phase}]"));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn progress(&mut self, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
        let step = percent / 10 * 10;
        if self.last_percent.is_some_and(|last| last >= step) {
            return;
        }
        self.last_percent = Some(step);
        self.line(&format!("  {step:>3}%"));
    }

    fn whats_new(&mut self, page: &str) {
        self.line(&format!("What's new: {page}"));
        if self.open_pages
            && let Err(error) = open::that(page)
        {
            warn!("Failed to open {page}: {error}");
        }
    }

    fn report_error(&mut self, report: &ErrorReport) {
        self.report("Warning", report);
    }

    fn fatal_error(&mut self, report: &ErrorReport) {
        self.report("Fatal", report);
    }

    fn launched(&mut self) {
        self.line("Application started.");
    }
}

#[cfg(test)]
mod tests {
    use super::{ConsoleUi, LauncherUi, UiEvent, UiOutcome, channel, run_ui};
    use crate::error::ErrorReport;
    use crate::phase::Phase;

    #[derive(Default)]
    struct RecordingUi {
        calls: Vec<String>,
    }

    impl LauncherUi for RecordingUi {
        fn phase_changed(&mut self, phase: Phase) {
            self.calls.push(format!("phase:{phase}"));
        }

        fn progress(&mut self, fraction: f64) {
            self.calls.push(format!("progress:{fraction}"));
        }

        fn report_error(&mut self, report: &ErrorReport) {
            self.calls.push(format!("error:{}", report.detail));
        }

        fn fatal_error(&mut self, report: &ErrorReport) {
            self.calls.push(format!("fatal:{}", report.detail));
        }

        fn launched(&mut self) {
            self.calls.push("launched".to_string());
        }
    }

    fn report(detail: &str) -> ErrorReport {
        ErrorReport {
            title: "Error".to_string(),
            header: "header".to_string(),
            body: "body".to_string(),
            detail: detail.to_string(),
        }
    }

    #[test]
    fn events_are_delivered_in_order_until_terminal() {
        let (sender, receiver) = channel();
        sender.send(UiEvent::PhaseChanged(Phase::FileSync));
        sender.send(UiEvent::Progress(0.5));
        sender.send(UiEvent::Progress(1.0));
        sender.send(UiEvent::Launched);
        sender.send(UiEvent::Progress(0.25));

        let mut ui = RecordingUi::default();
        let outcome = run_ui(&mut ui, &receiver);

        assert_eq!(outcome, UiOutcome::Launched);
        assert_eq!(
            ui.calls,
            vec!["phase:File Sync", "progress:0.5", "progress:1", "launched"]
        );
    }

    #[test]
    fn failure_is_terminal_and_returned() {
        let (sender, receiver) = channel();
        sender.send(UiEvent::ErrorReported(report("recovered")));
        sender.send(UiEvent::Failed(report("fatal")));

        let mut ui = RecordingUi::default();
        let outcome = run_ui(&mut ui, &receiver);

        assert_eq!(outcome, UiOutcome::Failed(report("fatal")));
        assert_eq!(ui.calls, vec!["error:recovered", "fatal:fatal"]);
    }

    #[test]
    fn dropped_sender_ends_stream() {
        let (sender, receiver) = channel();
        sender.send(UiEvent::ShowLoader);
        drop(sender);

        let outcome = run_ui(&mut RecordingUi::default(), &receiver);

        assert_eq!(outcome, UiOutcome::Disconnected);
    }

    #[test]
    fn console_progress_prints_each_ten_percent_step_once() {
        let mut ui = ConsoleUi::with_writer(Vec::new(), false);
        for fraction in [0.01, 0.05, 0.12, 0.19, 0.5, 1.0] {
            ui.progress(fraction);
        }

        let output = String::from_utf8(ui.into_inner()).expect("console output should be UTF-8");
        let lines: Vec<&str> = output.lines().map(str::trim).collect();
        assert_eq!(lines, vec!["0%", "10%", "50%", "100%"]);
    }

    #[test]
    fn console_reports_include_detail() {
        let mut ui = ConsoleUi::with_writer(Vec::new(), false);
        ui.fatal_error(&report("Error during File Sync phase: disk full"));
        ui.whats_new("https://example.com/changes");

        let output = String::from_utf8(ui.into_inner()).expect("console output should be UTF-8");
        assert!(output.contains("Fatal: Error"));
        assert!(output.contains("disk full"));
        assert!(output.contains("What's new: https://example.com/changes"));
    }

    struct BrokenPipe;

    impl std::io::Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn console_keeps_running_when_output_is_closed() {
        let (sender, receiver) = channel();
        sender.send(UiEvent::ShowLoader);
        sender.send(UiEvent::Progress(0.5));
        sender.send(UiEvent::ErrorReported(report("disk full")));
        sender.send(UiEvent::Launched);

        let mut ui = ConsoleUi::with_writer(BrokenPipe, false);

        assert_eq!(run_ui(&mut ui, &receiver), UiOutcome::Launched);
    }
}

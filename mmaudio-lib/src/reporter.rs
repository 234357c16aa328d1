//! Periodic playback state reporter for progress displays.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use serde::Serialize;

use crate::manager::{ControlOp, MediaManager, PlayerHandle};
use crate::player::PlayerState;

/// Snapshot of one player's playback state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub time_ms: i64,
    pub duration_ms: i64,
    pub volume: i64,
    pub state: PlayerState,
}

impl Report {
    /// Take a snapshot. `None` once the player is gone.
    pub fn capture(manager: &MediaManager, handle: PlayerHandle) -> Option<Self> {
        let state = manager.state(handle).ok()?;
        let int = |op| {
            manager
                .control(handle, op)
                .ok()
                .and_then(|value| value.as_int())
                .unwrap_or(-1)
        };
        Some(Self {
            time_ms: int(ControlOp::GetTime),
            duration_ms: int(ControlOp::GetDuration),
            volume: int(ControlOp::GetVolume),
            state,
        })
    }

    pub fn playing(&self) -> bool {
        self.state == PlayerState::Started
    }
}

/// Background reporter that polls a player at fixed intervals and calls
/// back whenever the snapshot changes.
#[derive(Clone)]
pub struct Reporter {
    manager: Arc<MediaManager>,
    handle: PlayerHandle,
    report: Arc<Mutex<dyn FnMut(Report) + Send>>,
    interval: Duration,
    finish: Arc<AtomicBool>,
    thread_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Reporter {
    pub fn new(
        manager: Arc<MediaManager>,
        handle: PlayerHandle,
        report: Arc<Mutex<dyn FnMut(Report) + Send>>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            handle,
            report,
            interval,
            finish: Arc::new(AtomicBool::new(false)),
            thread_handle: Arc::new(Mutex::new(None)),
        }
    }

    fn run(&self) {
        let mut last_report: Option<Report> = None;

        loop {
            let Some(report) = Report::capture(&self.manager, self.handle) else {
                break;
            };
            if last_report.as_ref() != Some(&report) {
                (*self.report.lock().unwrap())(report.clone());
                last_report = Some(report);
            }

            if self.finish.load(Ordering::Relaxed) {
                break;
            }

            std::thread::sleep(self.interval);
        }
    }

    /// Start the background reporting thread.
    pub fn start(&self) {
        self.stop();
        self.finish.store(false, Ordering::Relaxed);
        let this = self.clone();
        let handle = std::thread::spawn(move || this.run());
        *self.thread_handle.lock().unwrap() = Some(handle);
    }

    /// Stop the background reporting thread.
    pub fn stop(&self) {
        self.finish.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.lock().unwrap().take() {
            if handle.thread().id() == std::thread::current().id() {
                log::warn!("reporter stop called from reporter thread; skipping join");
            } else if handle.join().is_err() {
                log::warn!("reporter thread panicked during join");
            }
        }
    }
}

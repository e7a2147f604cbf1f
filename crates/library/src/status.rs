use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanPhase {
    #[default]
    Idle,
    Enumerating,
    Diffing,
    Inserting,
    Cleaning,
    Done,
    Cancelled,
    Failed(String),
}

impl ScanPhase {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ScanPhase::Enumerating | ScanPhase::Diffing | ScanPhase::Inserting | ScanPhase::Cleaning
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ScanPhase::Done | ScanPhase::Cancelled | ScanPhase::Failed(_)
        )
    }
}

/// Progress of one scan as seen by observers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanStatus {
    pub phase: ScanPhase,
    pub root: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub new_files: usize,
    pub skipped_files: usize,
    pub deleted_files: usize,
    pub failed_files: usize,
    pub stale_files: usize,
    pub current_file: String,
    pub current_category: String,
    pub current_detail: String,
    pub total_duration_minutes: f64,
    pub probe_errors: usize,
    pub duration_errors: usize,
    pub enumeration_errors: usize,
    pub path_metadata_used: usize,
    pub categories_detected: usize,
    pub main_dirs_total: usize,
    pub main_dirs_completed: usize,
    pub batches_committed: usize,
    pub cleanup_phase: bool,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl ScanStatus {
    /// Fraction of discovered files handled so far, 0.0..=1.0.
    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            return if self.phase.is_finished() { 1.0 } else { 0.0 };
        }
        (self.processed_files as f64 / self.total_files as f64).min(1.0)
    }
}

/// Shared, read-mostly view of the latest published status.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<ScanStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ScanStatus {
        self.inner.read().clone()
    }

    fn publish(&self, status: &ScanStatus) {
        *self.inner.write() = status.clone();
    }
}

/// Cooperative stop flag checked between files and batches.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Worker-owned scan state. Every mutation goes through [`ScanSession::update`],
/// which republishes a copy to the handle.
pub struct ScanSession {
    status: ScanStatus,
    handle: StatusHandle,
}

impl ScanSession {
    pub fn new(handle: StatusHandle, root: &str) -> Self {
        let status = ScanStatus {
            root: root.to_string(),
            started_at: Some(SystemTime::now()),
            ..ScanStatus::default()
        };
        handle.publish(&status);
        Self { status, handle }
    }

    pub fn status(&self) -> &ScanStatus {
        &self.status
    }

    pub fn update(&mut self, apply: impl FnOnce(&mut ScanStatus)) {
        apply(&mut self.status);
        self.handle.publish(&self.status);
    }

    pub fn enter(&mut self, phase: ScanPhase) {
        let finished = phase.is_finished();
        self.update(|status| {
            status.cleanup_phase = phase == ScanPhase::Cleaning;
            if finished {
                status.finished_at = Some(SystemTime::now());
                status.current_file.clear();
            }
            status.phase = phase;
        });
    }
}

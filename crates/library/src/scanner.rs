use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use common::{path_key, resolve_root};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::classify::PathClassifier;
use crate::config::ScanConfig;
use crate::error::LibraryError;
use crate::status::{CancelToken, ScanPhase, ScanSession, ScanStatus, StatusHandle};
use crate::sync::{CatalogSync, Prober, SyncReport, SystemProber};

struct ActiveScan {
    cancel: CancelToken,
    worker: JoinHandle<Result<SyncReport, LibraryError>>,
}

/// Runs at most one catalog scan at a time on a background thread.
pub struct ScanManager {
    config: ScanConfig,
    catalog_path: PathBuf,
    prober: Arc<dyn Prober>,
    probe_tool: Result<String, String>,
    classifier: Arc<PathClassifier>,
    status: StatusHandle,
    active: Option<ActiveScan>,
}

impl ScanManager {
    /// Checks the probe tool once; scans are refused while it is missing.
    pub fn new(config: ScanConfig, catalog_path: PathBuf) -> Self {
        let settings = config.probe_settings();
        let probe_tool = match settings.tool.check_available() {
            Ok(version) => {
                info!("Using {}", version);
                Ok(version)
            }
            Err(err) => {
                warn!("Probe tool check failed: {}", err);
                Err(err.to_string())
            }
        };
        let prober: Arc<dyn Prober> = Arc::new(SystemProber::new(settings));
        Self::build(config, catalog_path, prober, probe_tool)
    }

    pub fn with_prober(config: ScanConfig, catalog_path: PathBuf, prober: Arc<dyn Prober>) -> Self {
        Self::build(config, catalog_path, prober, Ok("custom prober".to_string()))
    }

    fn build(
        config: ScanConfig,
        catalog_path: PathBuf,
        prober: Arc<dyn Prober>,
        probe_tool: Result<String, String>,
    ) -> Self {
        let classifier = Arc::new(PathClassifier::new(
            PathBuf::new(),
            config.classifier_cache_capacity,
        ));
        Self {
            config,
            catalog_path,
            prober,
            probe_tool,
            classifier,
            status: StatusHandle::new(),
            active: None,
        }
    }

    pub fn probe_tool(&self) -> Result<&str, &str> {
        match &self.probe_tool {
            Ok(version) => Ok(version.as_str()),
            Err(reason) => Err(reason.as_str()),
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.worker.is_finished())
            .unwrap_or(false)
    }

    pub fn start(&mut self, root: PathBuf) -> Result<(), LibraryError> {
        if self.is_running() {
            return Err(LibraryError::ScanInProgress);
        }
        if let Some(Err(err)) = self.finish_previous() {
            warn!("Previous scan ended with error: {}", err);
        }
        if self.config.require_probe_tool {
            if let Err(reason) = &self.probe_tool {
                return Err(LibraryError::ProbeToolMissing(reason.clone()));
            }
        }
        let root = match resolve_root(&root) {
            Ok(resolved) if resolved.is_dir() => resolved,
            _ => return Err(LibraryError::InvalidRoot(root.display().to_string())),
        };

        let cancel = CancelToken::new();
        let mut session = ScanSession::new(self.status.clone(), &path_key(&root));
        let config = self.config.clone();
        let catalog_path = self.catalog_path.clone();
        let prober = Arc::clone(&self.prober);
        let classifier = Arc::clone(&self.classifier);
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name("catalog-scan".to_string())
            .spawn(move || {
                let catalog = match Catalog::open(&catalog_path) {
                    Ok(catalog) => catalog,
                    Err(err) => {
                        warn!("Failed to open catalog {:?}: {}", catalog_path, err);
                        session.enter(ScanPhase::Failed(err.to_string()));
                        return Err(err);
                    }
                };
                CatalogSync::new(&catalog, prober.as_ref(), &classifier, &config, token)
                    .run(&root, &mut session)
            })?;

        self.active = Some(ActiveScan { cancel, worker });
        Ok(())
    }

    /// Token of the current scan, for signalling from other threads.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.active.as_ref().map(|active| active.cancel.clone())
    }

    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }

    /// Collects the result of a finished scan without blocking.
    pub fn try_finish(&mut self) -> Option<Result<SyncReport, LibraryError>> {
        if self.is_running() {
            return None;
        }
        self.finish_previous()
    }

    /// Blocks until the current scan ends.
    pub fn wait(&mut self) -> Option<Result<SyncReport, LibraryError>> {
        self.finish_previous()
    }

    /// Cancels any running scan, waits for it, then scans `root`.
    pub fn restart(&mut self, root: PathBuf) -> Result<(), LibraryError> {
        self.cancel();
        if let Some(Err(err)) = self.wait() {
            warn!("Interrupted scan ended with error: {}", err);
        }
        self.start(root)
    }

    fn finish_previous(&mut self) -> Option<Result<SyncReport, LibraryError>> {
        let active = self.active.take()?;
        match active.worker.join() {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("Scan worker panicked");
                Some(Err(LibraryError::WorkerPanicked))
            }
        }
    }
}

impl Drop for ScanManager {
    fn drop(&mut self) {
        self.cancel();
        let _ = self.finish_previous();
    }
}

#[cfg(test)]
mod tests {
    use super::ScanManager;
    use crate::catalog::Catalog;
    use crate::config::ScanConfig;
    use crate::error::LibraryError;
    use crate::status::ScanPhase;
    use crate::sync::Prober;
    use common::{path_key, MediaKind};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use metadata::MediaProbe;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    struct GatedProber {
        gate: Receiver<()>,
    }

    impl Prober for GatedProber {
        fn probe(&self, _path: &Path, _kind: MediaKind) -> MediaProbe {
            let _ = self.gate.recv();
            MediaProbe::default()
        }
    }

    fn gated() -> (Sender<()>, Arc<dyn Prober>) {
        let (tx, rx) = bounded(0);
        let prober: Arc<dyn Prober> = Arc::new(GatedProber { gate: rx });
        (tx, prober)
    }

    fn media_tree(dir: &Path, files: usize) -> PathBuf {
        let root = dir.join("media");
        let folder = root.join("Filme").join("Action");
        fs::create_dir_all(&folder).unwrap();
        for i in 0..files {
            fs::write(folder.join(format!("movie{}.mp4", i)), b"video").unwrap();
        }
        root
    }

    #[test]
    fn missing_probe_tool_refuses_scans() {
        let dir = tempfile::tempdir().unwrap();
        let root = media_tree(dir.path(), 1);
        let config = ScanConfig {
            probe_program: "definitely-not-a-real-probe-binary".to_string(),
            ..ScanConfig::default()
        };
        let mut manager = ScanManager::new(config, dir.path().join("catalog.redb"));
        assert!(manager.probe_tool().is_err());
        let result = manager.start(root);
        assert!(matches!(result, Err(LibraryError::ProbeToolMissing(_))));
        assert!(!manager.is_running());
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let root = media_tree(dir.path(), 2);
        let catalog_path = dir.path().join("catalog.redb");
        let (release, prober) = gated();
        let mut manager = ScanManager::with_prober(ScanConfig::default(), catalog_path.clone(), prober);

        manager.start(root.clone()).unwrap();
        assert!(matches!(
            manager.start(root.clone()),
            Err(LibraryError::ScanInProgress)
        ));

        release.send(()).unwrap();
        release.send(()).unwrap();
        let report = manager.wait().unwrap().unwrap();
        assert_eq!(report.new_files, 2);
        assert_eq!(manager.status().phase, ScanPhase::Done);
        assert!(manager.try_finish().is_none());

        drop(manager);
        let catalog = Catalog::open(&catalog_path).unwrap();
        assert_eq!(catalog.len().unwrap(), 2);
    }

    #[test]
    fn cancel_stops_worker_and_restart_runs_again() {
        let dir = tempfile::tempdir().unwrap();
        let root = media_tree(dir.path(), 3);
        let (release, prober) = gated();
        let mut manager =
            ScanManager::with_prober(ScanConfig::default(), dir.path().join("catalog.redb"), prober);

        manager.start(root.clone()).unwrap();
        manager.cancel();
        drop(release);
        let report = manager.wait().unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(manager.status().phase, ScanPhase::Cancelled);

        manager.restart(root).unwrap();
        let report = manager.wait().unwrap().unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.new_files, 3);
    }

    #[test]
    fn status_reports_the_resolved_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = media_tree(dir.path(), 1);
        let (release, prober) = gated();
        let mut manager =
            ScanManager::with_prober(ScanConfig::default(), dir.path().join("catalog.redb"), prober);

        manager.start(root.join("Filme").join("..")).unwrap();
        release.send(()).unwrap();
        manager.wait().unwrap().unwrap();
        let expected = path_key(&fs::canonicalize(&root).unwrap());
        assert_eq!(manager.status().root, expected);
    }

    #[test]
    fn invalid_root_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let (_release, prober) = gated();
        let mut manager =
            ScanManager::with_prober(ScanConfig::default(), dir.path().join("catalog.redb"), prober);
        let result = manager.start(dir.path().join("missing"));
        assert!(matches!(result, Err(LibraryError::InvalidRoot(_))));
    }
}

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use common::{path_key, resolve_root, scope_prefix, unix_secs, MediaKind, MediaRecord};
use metadata::{probe_media, MediaProbe, ProbeSettings};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::classify::PathClassifier;
use crate::config::ScanConfig;
use crate::error::LibraryError;
use crate::reconcile::{reconcile, FileFacts, Reconciled};
use crate::status::{CancelToken, ScanPhase, ScanSession};

/// Group label for media files sitting directly in the scan root.
pub const ROOT_GROUP: &str = "[root]";

/// Source of per-file technical and tag metadata.
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path, kind: MediaKind) -> MediaProbe;
}

/// Prober backed by the tag reader and the external probe tool.
pub struct SystemProber {
    settings: ProbeSettings,
}

impl SystemProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

impl Prober for SystemProber {
    fn probe(&self, path: &Path, kind: MediaKind) -> MediaProbe {
        probe_media(path, kind, &self.settings)
    }
}

/// Catalog operations the sync engine needs.
pub trait RecordStore {
    fn paths_under(&self, prefix: &str) -> Result<HashSet<String>, LibraryError>;
    fn insert_batch(&self, records: &[MediaRecord]) -> Result<usize, LibraryError>;
    fn delete_batch(&self, paths: &[String]) -> Result<usize, LibraryError>;
}

impl RecordStore for Catalog {
    fn paths_under(&self, prefix: &str) -> Result<HashSet<String>, LibraryError> {
        Catalog::paths_under(self, prefix)
    }

    fn insert_batch(&self, records: &[MediaRecord]) -> Result<usize, LibraryError> {
        Catalog::insert_batch(self, records)
    }

    fn delete_batch(&self, paths: &[String]) -> Result<usize, LibraryError> {
        Catalog::delete_batch(self, paths)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    pub discovered: usize,
    pub new_files: usize,
    pub skipped_files: usize,
    pub deleted_files: usize,
    pub failed_files: usize,
    pub duration_minutes: f64,
    pub batches_committed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Discovered {
    key: String,
    path: PathBuf,
    kind: MediaKind,
}

#[derive(Debug, Default)]
struct Listing {
    groups: BTreeMap<String, Vec<Discovered>>,
    total: usize,
    errors: usize,
}

/// Brings the catalog rows under one root in line with the filesystem.
pub struct CatalogSync<'a> {
    catalog: &'a dyn RecordStore,
    prober: &'a dyn Prober,
    classifier: &'a PathClassifier,
    config: &'a ScanConfig,
    cancel: CancelToken,
}

impl<'a> CatalogSync<'a> {
    pub fn new(
        catalog: &'a dyn RecordStore,
        prober: &'a dyn Prober,
        classifier: &'a PathClassifier,
        config: &'a ScanConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            catalog,
            prober,
            classifier,
            config,
            cancel,
        }
    }

    pub fn run(&self, root: &Path, session: &mut ScanSession) -> Result<SyncReport, LibraryError> {
        let started = Instant::now();
        match self.run_phases(root, session) {
            Ok(()) => Ok(report(session, started.elapsed())),
            Err(err) => {
                warn!("Scan of {:?} failed: {}", root, err);
                session.enter(ScanPhase::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    fn run_phases(&self, root: &Path, session: &mut ScanSession) -> Result<(), LibraryError> {
        let resolved = match resolve_root(root) {
            Ok(resolved) if resolved.is_dir() => resolved,
            _ => return Err(LibraryError::InvalidRoot(root.display().to_string())),
        };
        let root = resolved.as_path();
        self.classifier.set_root(root);
        let scope = scope_prefix(root);
        info!("Scanning {:?}", root);

        session.enter(ScanPhase::Enumerating);
        let listing = self.enumerate(root);
        session.update(|status| {
            status.total_files = listing.total;
            status.enumeration_errors = listing.errors;
            status.main_dirs_total = listing.groups.len();
        });
        if self.cancel.is_cancelled() {
            self.stop(session);
            return Ok(());
        }

        session.enter(ScanPhase::Diffing);
        let persisted = self.catalog.paths_under(&scope)?;
        let current: HashSet<&str> = listing
            .groups
            .values()
            .flatten()
            .map(|file| file.key.as_str())
            .collect();
        let mut stale: Vec<String> = persisted
            .iter()
            .filter(|key| !current.contains(key.as_str()))
            .cloned()
            .collect();
        stale.sort();
        let new_count = current.iter().filter(|key| !persisted.contains(**key)).count();
        info!(
            "{} files found: {} new, {} unchanged, {} gone",
            listing.total,
            new_count,
            listing.total - new_count,
            stale.len()
        );
        session.update(|status| status.stale_files = stale.len());

        session.enter(ScanPhase::Inserting);
        let scanned_at = unix_secs(SystemTime::now());
        let batch_size = self.config.insert_batch_size.max(1);
        let mut batch: Vec<MediaRecord> = Vec::with_capacity(batch_size);
        let mut categories: HashSet<String> = HashSet::new();

        'groups: for (group, files) in &listing.groups {
            session.update(|status| {
                status.current_category = group.clone();
                status.current_detail = format!("Scanning {}", group);
            });
            for file in files {
                if self.cancel.is_cancelled() {
                    break 'groups;
                }
                if persisted.contains(&file.key) {
                    session.update(|status| {
                        status.processed_files += 1;
                        status.skipped_files += 1;
                    });
                    continue;
                }

                let name = file
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                session.update(|status| {
                    status.current_file = name;
                    status.current_detail = "Reading metadata".to_string();
                });

                match self.catalog_entry(file, scanned_at) {
                    Ok((reconciled, probe)) => {
                        let first_of_category = categories.insert(reconciled.record.category.clone());
                        let minutes = reconciled.record.duration_minutes;
                        session.update(|status| {
                            status.processed_files += 1;
                            status.new_files += 1;
                            status.total_duration_minutes += minutes;
                            status.probe_errors += probe.errors as usize;
                            if probe.duration_missing {
                                status.duration_errors += 1;
                            }
                            if reconciled.used_path_metadata {
                                status.path_metadata_used += 1;
                            }
                            if first_of_category {
                                status.categories_detected += 1;
                            }
                            status.current_detail = format!("{:.2} min", minutes);
                        });
                        batch.push(reconciled.record);
                    }
                    Err(err) => {
                        warn!("Skipping {:?}: {}", file.path, err);
                        session.update(|status| {
                            status.processed_files += 1;
                            status.failed_files += 1;
                        });
                    }
                }

                if batch.len() >= batch_size {
                    self.commit_batch(&mut batch, session)?;
                }
            }
            session.update(|status| status.main_dirs_completed += 1);
        }

        if self.cancel.is_cancelled() {
            if !batch.is_empty() {
                debug!("Discarding {} uncommitted records", batch.len());
            }
            self.stop(session);
            return Ok(());
        }
        self.commit_batch(&mut batch, session)?;

        session.enter(ScanPhase::Cleaning);
        let delete_size = self.config.delete_batch_size.max(1);
        for chunk in stale.chunks(delete_size) {
            if self.cancel.is_cancelled() {
                self.stop(session);
                return Ok(());
            }
            session.update(|status| {
                status.current_detail = format!("Removing {} vanished entries", chunk.len());
            });
            let removed = self.catalog.delete_batch(chunk)?;
            session.update(|status| {
                status.deleted_files += removed;
                status.batches_committed += 1;
            });
        }

        session.enter(ScanPhase::Done);
        let status = session.status();
        info!(
            "Scan finished: {} new, {} skipped, {} removed, {} failed",
            status.new_files, status.skipped_files, status.deleted_files, status.failed_files
        );
        Ok(())
    }

    fn stop(&self, session: &mut ScanSession) {
        info!("Scan cancelled");
        session.enter(ScanPhase::Cancelled);
    }

    fn commit_batch(
        &self,
        batch: &mut Vec<MediaRecord>,
        session: &mut ScanSession,
    ) -> Result<(), LibraryError> {
        if batch.is_empty() {
            return Ok(());
        }
        let written = self.catalog.insert_batch(batch)?;
        debug!("Committed {} records", written);
        batch.clear();
        session.update(|status| status.batches_committed += 1);
        Ok(())
    }

    fn catalog_entry(
        &self,
        file: &Discovered,
        scanned_at: u64,
    ) -> Result<(Reconciled, MediaProbe), LibraryError> {
        let meta = fs::metadata(&file.path)?;
        if !meta.is_file() {
            return Err(LibraryError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let classification = self.classifier.classify(&file.path);
        let probe = self.prober.probe(&file.path, file.kind);
        let facts = FileFacts {
            path: &file.path,
            key: &file.key,
            kind: file.kind,
            size: meta.len(),
            modified,
            scanned_at,
        };
        let reconciled = reconcile(&facts, &probe, &classification);
        Ok((reconciled, probe))
    }

    fn enumerate(&self, root: &Path) -> Listing {
        let mut listing = Listing::default();
        let mut seen: HashSet<String> = HashSet::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
        {
            if self.cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, err);
                    listing.errors += 1;
                    continue;
                }
            };
            let file_type = entry.file_type();
            if !(file_type.is_file() || file_type.is_symlink()) {
                continue;
            }
            let kind = match self.config.media_kind(entry.path()) {
                Some(kind) => kind,
                None => continue,
            };
            let key = path_key(entry.path());
            if !seen.insert(key.clone()) {
                warn!("Skipping {:?}: catalog key {:?} is already taken", entry.path(), key);
                listing.errors += 1;
                continue;
            }
            let group = top_level_group(root, entry.path());
            listing.groups.entry(group).or_default().push(Discovered {
                key,
                path: entry.into_path(),
                kind,
            });
            listing.total += 1;
        }
        listing
    }
}

fn top_level_group(root: &Path, path: &Path) -> String {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return ROOT_GROUP.to_string(),
    };
    let mut components = rel.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(dir)), Some(_)) => dir.to_string_lossy().to_string(),
        _ => ROOT_GROUP.to_string(),
    }
}

fn report(session: &ScanSession, elapsed: Duration) -> SyncReport {
    let status = session.status();
    SyncReport {
        discovered: status.total_files,
        new_files: status.new_files,
        skipped_files: status.skipped_files,
        deleted_files: status.deleted_files,
        failed_files: status.failed_files,
        duration_minutes: status.total_duration_minutes,
        batches_committed: status.batches_committed,
        cancelled: status.phase == ScanPhase::Cancelled,
        elapsed,
    }
}

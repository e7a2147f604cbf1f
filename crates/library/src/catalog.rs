use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use common::MediaRecord;
use redb::{Database, ReadableTable, Table, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LibraryError;
use crate::genre::normalize_genre;

const CATALOG_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const MEDIA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("media");
const MEDIA_BY_CATEGORY_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("media_by_category");
const MEDIA_BY_GENRE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("media_by_genre");

const META_VERSION_KEY: &str = "version";
const EMPTY_VALUE: &[u8] = &[];

/// Per-category totals for reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub files: usize,
    pub total_minutes: f64,
    pub total_bytes: u64,
    /// Mean over files with a known bitrate, bits per second.
    pub average_bitrate: u64,
    /// Share of files flagged as having sufficient metadata, 0..=100.
    pub metadata_completeness: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenreChange {
    pub path: String,
    pub from: String,
    pub to: String,
}

/// Outcome of re-running the genre normalizer over persisted rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenreRenormalization {
    pub changes: Vec<GenreChange>,
    pub unchanged: usize,
}

impl GenreRenormalization {
    pub fn changed(&self) -> usize {
        self.changes.iter().filter(|c| !c.to.is_empty()).count()
    }

    pub fn removed(&self) -> usize {
        self.changes.iter().filter(|c| c.to.is_empty()).count()
    }
}

/// Durable store of media records, one row per absolute path.
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let catalog = Self { db };
        match read_version(&catalog.db)? {
            Some(version) if version == CATALOG_VERSION => {
                debug!("Opened catalog {:?}", path);
            }
            Some(version) => return Err(LibraryError::VersionMismatch(version)),
            None => {
                info!("Initializing catalog {:?}", path);
                catalog.initialize()?;
            }
        }
        Ok(catalog)
    }

    fn initialize(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let version = encode_value(&CATALOG_VERSION)?;
            meta.insert(META_VERSION_KEY, version.as_slice())?;
            write_txn.open_table(MEDIA_TABLE)?;
            write_txn.open_table(MEDIA_BY_CATEGORY_TABLE)?;
            write_txn.open_table(MEDIA_BY_GENRE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Keys of every row whose path starts with `prefix`.
    pub fn paths_under(&self, prefix: &str) -> Result<HashSet<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEDIA_TABLE)?;
        let mut end = prefix.to_string();
        end.push('\u{10ffff}');
        let mut out = HashSet::new();
        for entry in table.range(prefix..end.as_str())? {
            let (key, _) = entry?;
            out.insert(key.value().to_string());
        }
        Ok(out)
    }

    /// Writes all records in one transaction. Existing rows with the same
    /// path are replaced.
    pub fn insert_batch(&self, records: &[MediaRecord]) -> Result<usize, LibraryError> {
        if records.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut media = write_txn.open_table(MEDIA_TABLE)?;
            let mut by_category = write_txn.open_table(MEDIA_BY_CATEGORY_TABLE)?;
            let mut by_genre = write_txn.open_table(MEDIA_BY_GENRE_TABLE)?;
            for record in records {
                let bytes = encode_value(record)?;
                let previous = match media.insert(record.path.as_str(), bytes.as_slice())? {
                    Some(old) => Some(decode_value::<MediaRecord>(old.value())?),
                    None => None,
                };
                if let Some(old) = previous {
                    unindex(&mut by_category, &mut by_genre, &old)?;
                }
                index(&mut by_category, &mut by_genre, record)?;
            }
        }
        write_txn.commit()?;
        Ok(records.len())
    }

    /// Removes the given paths in one transaction; returns rows removed.
    pub fn delete_batch(&self, paths: &[String]) -> Result<usize, LibraryError> {
        if paths.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut media = write_txn.open_table(MEDIA_TABLE)?;
            let mut by_category = write_txn.open_table(MEDIA_BY_CATEGORY_TABLE)?;
            let mut by_genre = write_txn.open_table(MEDIA_BY_GENRE_TABLE)?;
            for path in paths {
                let previous = match media.remove(path.as_str())? {
                    Some(old) => Some(decode_value::<MediaRecord>(old.value())?),
                    None => None,
                };
                if let Some(old) = previous {
                    unindex(&mut by_category, &mut by_genre, &old)?;
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn get(&self, path: &str) -> Result<Option<MediaRecord>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEDIA_TABLE)?;
        let record = match table.get(path)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn len(&self) -> Result<u64, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEDIA_TABLE)?;
        let count = table.len()?;
        Ok(count)
    }

    pub fn records_in_category(&self, category: &str) -> Result<Vec<MediaRecord>, LibraryError> {
        self.records_by_index(MEDIA_BY_CATEGORY_TABLE, category)
    }

    pub fn records_with_genre(&self, genre: &str) -> Result<Vec<MediaRecord>, LibraryError> {
        self.records_by_index(MEDIA_BY_GENRE_TABLE, genre)
    }

    fn records_by_index(
        &self,
        index_table: TableDefinition<&str, &[u8]>,
        label: &str,
    ) -> Result<Vec<MediaRecord>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index_table)?;
        let media = read_txn.open_table(MEDIA_TABLE)?;
        let prefix = prefix_key(&label_key(label));
        let mut end = prefix.clone();
        end.push('\u{10ffff}');
        let mut out = Vec::new();
        for entry in index.range(prefix.as_str()..end.as_str())? {
            let (key, _) = entry?;
            let (_, path) = split_index_key(key.value())?;
            if let Some(value) = media.get(path)? {
                out.push(decode_value(value.value())?);
            }
        }
        Ok(out)
    }

    pub fn category_summaries(&self) -> Result<Vec<CategorySummary>, LibraryError> {
        #[derive(Default)]
        struct Totals {
            files: usize,
            minutes: f64,
            bytes: u64,
            bitrate_sum: u64,
            bitrate_files: u64,
            with_metadata: usize,
        }

        let read_txn = self.db.begin_read()?;
        let media = read_txn.open_table(MEDIA_TABLE)?;
        let mut totals: BTreeMap<String, Totals> = BTreeMap::new();
        for entry in media.iter()? {
            let (_, value) = entry?;
            let record: MediaRecord = decode_value(value.value())?;
            let slot = totals.entry(record.category.clone()).or_default();
            slot.files += 1;
            slot.minutes += record.duration_minutes;
            slot.bytes += record.file_size;
            if record.bitrate > 0 {
                slot.bitrate_sum += record.bitrate;
                slot.bitrate_files += 1;
            }
            if record.has_metadata {
                slot.with_metadata += 1;
            }
        }

        Ok(totals
            .into_iter()
            .map(|(category, t)| CategorySummary {
                category,
                files: t.files,
                total_minutes: (t.minutes * 100.0).round() / 100.0,
                total_bytes: t.bytes,
                average_bitrate: if t.bitrate_files > 0 {
                    t.bitrate_sum / t.bitrate_files
                } else {
                    0
                },
                metadata_completeness: if t.files > 0 {
                    ((t.with_metadata as f64 / t.files as f64) * 1000.0).round() / 10.0
                } else {
                    0.0
                },
            })
            .collect())
    }

    /// Genre label counts, optionally limited to one category, most common
    /// first.
    pub fn genre_counts(&self, category: Option<&str>) -> Result<Vec<(String, usize)>, LibraryError> {
        let records = match category {
            Some(category) => self.records_in_category(category)?,
            None => self.all_records()?,
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in records {
            if record.genre.is_empty() {
                continue;
            }
            *counts.entry(record.genre).or_default() += 1;
        }
        let mut out: Vec<(String, usize)> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out)
    }

    fn all_records(&self) -> Result<Vec<MediaRecord>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let media = read_txn.open_table(MEDIA_TABLE)?;
        let mut out = Vec::new();
        for entry in media.iter()? {
            let (_, value) = entry?;
            out.push(decode_value(value.value())?);
        }
        Ok(out)
    }

    /// Previews what re-running the genre normalizer would change.
    pub fn plan_genre_renormalization(&self) -> Result<GenreRenormalization, LibraryError> {
        let mut plan = GenreRenormalization::default();
        for record in self.all_records()? {
            if record.genre.is_empty() {
                continue;
            }
            let normalized = normalize_genre(&record.genre).unwrap_or_default();
            if normalized == record.genre {
                plan.unchanged += 1;
            } else {
                plan.changes.push(GenreChange {
                    path: record.path,
                    from: record.genre,
                    to: normalized,
                });
            }
        }
        Ok(plan)
    }

    /// Applies a fresh renormalization in one transaction.
    pub fn apply_genre_renormalization(&self) -> Result<GenreRenormalization, LibraryError> {
        let plan = self.plan_genre_renormalization()?;
        if plan.changes.is_empty() {
            return Ok(plan);
        }
        let write_txn = self.db.begin_write()?;
        {
            let mut media = write_txn.open_table(MEDIA_TABLE)?;
            let mut by_genre = write_txn.open_table(MEDIA_BY_GENRE_TABLE)?;
            for change in &plan.changes {
                let current = match media.get(change.path.as_str())? {
                    Some(value) => Some(decode_value::<MediaRecord>(value.value())?),
                    None => None,
                };
                let mut record = match current {
                    Some(record) => record,
                    None => continue,
                };
                if !record.genre.is_empty() {
                    by_genre.remove(index_key(&record.genre, &record.path).as_str())?;
                }
                record.genre = change.to.clone();
                if !record.genre.is_empty() {
                    by_genre.insert(index_key(&record.genre, &record.path).as_str(), EMPTY_VALUE)?;
                }
                let bytes = encode_value(&record)?;
                media.insert(record.path.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        info!(
            "Renormalized genres: {} changed, {} removed",
            plan.changed(),
            plan.removed()
        );
        Ok(plan)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn index(
    by_category: &mut Table<'_, '_, &'static str, &'static [u8]>,
    by_genre: &mut Table<'_, '_, &'static str, &'static [u8]>,
    record: &MediaRecord,
) -> Result<(), LibraryError> {
    if !record.category.is_empty() {
        by_category.insert(index_key(&record.category, &record.path).as_str(), EMPTY_VALUE)?;
    }
    if !record.genre.is_empty() {
        by_genre.insert(index_key(&record.genre, &record.path).as_str(), EMPTY_VALUE)?;
    }
    Ok(())
}

fn unindex(
    by_category: &mut Table<'_, '_, &'static str, &'static [u8]>,
    by_genre: &mut Table<'_, '_, &'static str, &'static [u8]>,
    record: &MediaRecord,
) -> Result<(), LibraryError> {
    if !record.category.is_empty() {
        by_category.remove(index_key(&record.category, &record.path).as_str())?;
    }
    if !record.genre.is_empty() {
        by_genre.remove(index_key(&record.genre, &record.path).as_str())?;
    }
    Ok(())
}

fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

fn index_key(label: &str, path: &str) -> String {
    let mut out = prefix_key(&label_key(label));
    out.push_str(path);
    out
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn split_index_key(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .find(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use common::{MediaKind, MediaRecord};

    fn record(path: &str, category: &str, genre: &str) -> MediaRecord {
        MediaRecord {
            filename: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            kind: Some(MediaKind::Video),
            category: category.to_string(),
            genre: genre.to_string(),
            duration_minutes: 90.0,
            file_size: 1000,
            bitrate: 2_000_000,
            has_metadata: !genre.is_empty(),
            ..MediaRecord::default()
        }
    }

    fn open_temp() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn scoped_paths_exclude_sibling_prefixes() {
        let (_dir, catalog) = open_temp();
        catalog
            .insert_batch(&[
                record("/media/films/a.mp4", "films", "Action"),
                record("/media/films/sub/b.mp4", "films", "Drama"),
                record("/media/films2/c.mp4", "films2", "Action"),
            ])
            .unwrap();
        let scoped = catalog.paths_under("/media/films/").unwrap();
        assert_eq!(scoped.len(), 2);
        assert!(scoped.contains("/media/films/sub/b.mp4"));
        assert!(!scoped.contains("/media/films2/c.mp4"));
    }

    #[test]
    fn replacing_a_row_moves_its_index_entries() {
        let (_dir, catalog) = open_temp();
        catalog
            .insert_batch(&[record("/m/a.mp4", "Filme", "Action")])
            .unwrap();
        catalog
            .insert_batch(&[record("/m/a.mp4", "Serien", "Drama")])
            .unwrap();
        assert_eq!(catalog.len().unwrap(), 1);
        assert!(catalog.records_in_category("Filme").unwrap().is_empty());
        assert_eq!(catalog.records_in_category("serien").unwrap().len(), 1);
        assert!(catalog.records_with_genre("Action").unwrap().is_empty());
        assert_eq!(catalog.records_with_genre("Drama").unwrap().len(), 1);
    }

    #[test]
    fn delete_batch_counts_only_existing_rows() {
        let (_dir, catalog) = open_temp();
        catalog
            .insert_batch(&[
                record("/m/a.mp4", "Filme", "Action"),
                record("/m/b.mp4", "Filme", "Action"),
            ])
            .unwrap();
        let removed = catalog
            .delete_batch(&["/m/a.mp4".to_string(), "/m/missing.mp4".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(catalog.get("/m/a.mp4").unwrap().is_none());
        assert_eq!(catalog.records_with_genre("Action").unwrap().len(), 1);
    }

    #[test]
    fn summaries_aggregate_per_category() {
        let (_dir, catalog) = open_temp();
        catalog
            .insert_batch(&[
                record("/m/a.mp4", "Filme", "Action"),
                record("/m/b.mp4", "Filme", ""),
                record("/m/c.mp3", "Musik", "Rock"),
            ])
            .unwrap();
        let summaries = catalog.category_summaries().unwrap();
        assert_eq!(summaries.len(), 2);
        let filme = &summaries[0];
        assert_eq!(filme.category, "Filme");
        assert_eq!(filme.files, 2);
        assert_eq!(filme.total_minutes, 180.0);
        assert_eq!(filme.total_bytes, 2000);
        assert_eq!(filme.average_bitrate, 2_000_000);
        assert_eq!(filme.metadata_completeness, 50.0);

        let genres = catalog.genre_counts(Some("Filme")).unwrap();
        assert_eq!(genres, vec![("Action".to_string(), 1)]);
    }

    #[test]
    fn genre_renormalization_rewrites_rows_and_index() {
        let (_dir, catalog) = open_temp();
        catalog
            .insert_batch(&[
                record("/m/a.mp3", "Musik", "TECHNO"),
                record("/m/b.mp3", "Musik", "misc"),
                record("/m/c.mp3", "Musik", "Jazz"),
            ])
            .unwrap();

        let plan = catalog.plan_genre_renormalization().unwrap();
        assert_eq!(plan.changed(), 1);
        assert_eq!(plan.removed(), 1);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(catalog.get("/m/a.mp3").unwrap().unwrap().genre, "TECHNO");

        catalog.apply_genre_renormalization().unwrap();
        assert_eq!(catalog.get("/m/a.mp3").unwrap().unwrap().genre, "Techno");
        assert_eq!(catalog.get("/m/b.mp3").unwrap().unwrap().genre, "");
        assert!(catalog.records_with_genre("misc").unwrap().is_empty());
        assert_eq!(catalog.records_with_genre("techno").unwrap().len(), 1);
        assert!(catalog.plan_genre_renormalization().unwrap().changes.is_empty());
    }

    #[test]
    fn reopening_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.redb");
        {
            let catalog = Catalog::open(&path).unwrap();
            catalog
                .insert_batch(&[record("/m/a.mp4", "Filme", "Action")])
                .unwrap();
        }
        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.len().unwrap(), 1);
    }

    #[test]
    fn get_returns_the_stored_row() {
        let (_dir, catalog) = open_temp();
        let stored = record("/m/a.mp4", "Filme", "Action");
        catalog.insert_batch(std::slice::from_ref(&stored)).unwrap();
        assert_eq!(catalog.get("/m/a.mp4").unwrap(), Some(stored));
        assert_eq!(catalog.get("/m/b.mp4").unwrap(), None);
    }
}

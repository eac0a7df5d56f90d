//! File areas.
//!
//! Download/upload areas and their file entries. Same sled layout as the
//! message bases: entries keyed `[area_id BE][entry_id BE]` with a bare-id
//! index tree for direct lookups.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation;

const TREE_AREAS: &str = "file_areas";
const TREE_ENTRIES: &str = "file_entries";
const TREE_ENTRY_INDEX: &str = "file_entry_index";

const SEARCH_LIMIT: usize = 50;

/// A file download/upload area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub disk_path: String,
    pub download_level: i64,
    pub upload_level: i64,
    pub sort_order: i64,
}

/// Area plus its computed file count.
#[derive(Debug, Clone)]
pub struct AreaSummary {
    pub area: Area,
    pub file_count: u64,
}

/// A file in an area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: u64,
    pub area_id: u64,
    pub filename: String,
    pub description: String,
    pub size_bytes: u64,
    pub uploader: String,
    pub download_count: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct FileRepo {
    db: sled::Db,
    areas: sled::Tree,
    entries: sled::Tree,
    index: sled::Tree,
}

fn entry_key(area_id: u64, entry_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&area_id.to_be_bytes());
    key[8..].copy_from_slice(&entry_id.to_be_bytes());
    key
}

impl FileRepo {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(FileRepo {
            db: db.clone(),
            areas: db.open_tree(TREE_AREAS)?,
            entries: db.open_tree(TREE_ENTRIES)?,
            index: db.open_tree(TREE_ENTRY_INDEX)?,
        })
    }

    /// Seed the default areas on a fresh database.
    pub fn seed_defaults(&self) -> Result<()> {
        if !self.areas.is_empty() {
            return Ok(());
        }
        self.add_area("Uploads", "New uploads awaiting review", "uploads", 10, 10, 1)?;
        self.add_area("Utilities", "DOS and terminal utilities", "utils", 10, 20, 2)?;
        Ok(())
    }

    pub fn add_area(
        &self,
        name: &str,
        description: &str,
        disk_path: &str,
        download_level: i64,
        upload_level: i64,
        sort_order: i64,
    ) -> Result<Area> {
        let area = Area {
            id: self.db.generate_id()?,
            name: name.to_string(),
            description: description.to_string(),
            disk_path: disk_path.to_string(),
            download_level,
            upload_level,
            sort_order,
        };
        self.areas
            .insert(area.id.to_be_bytes(), bincode::serialize(&area)?)?;
        Ok(area)
    }

    pub fn get_area(&self, id: u64) -> Result<Area> {
        match self.areas.get(id.to_be_bytes())? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Err(anyhow!("file area {} not found", id)),
        }
    }

    /// Areas the user may download from, with file counts.
    pub fn list_areas(&self, user_level: i64) -> Result<Vec<AreaSummary>> {
        let mut out = Vec::new();
        for entry in self.areas.iter() {
            let (_, raw) = entry?;
            let area: Area = bincode::deserialize(&raw)?;
            if area.download_level <= user_level {
                let file_count = self.entries.scan_prefix(area.id.to_be_bytes()).count() as u64;
                out.push(AreaSummary { area, file_count });
            }
        }
        out.sort_by(|a, b| {
            (a.area.sort_order, &a.area.name).cmp(&(b.area.sort_order, &b.area.name))
        });
        Ok(out)
    }

    /// Files in an area ordered by filename, paginated.
    pub fn list_files(&self, area_id: u64, offset: usize, limit: usize) -> Result<Vec<Entry>> {
        let mut all = Vec::new();
        for entry in self.entries.scan_prefix(area_id.to_be_bytes()) {
            let (_, raw) = entry?;
            all.push(bincode::deserialize::<Entry>(&raw)?);
        }
        all.sort_by(|a, b| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    pub fn get_file(&self, entry_id: u64) -> Result<Entry> {
        let area_raw = self
            .index
            .get(entry_id.to_be_bytes())?
            .ok_or_else(|| anyhow!("file {} not found", entry_id))?;
        let area_id = u64::from_be_bytes(area_raw.as_ref().try_into()?);
        match self.entries.get(entry_key(area_id, entry_id))? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Err(anyhow!("file {} not found", entry_id)),
        }
    }

    /// Case-insensitive substring search over filename and description in
    /// areas the user can download from. Capped at 50 hits.
    pub fn search(&self, pattern: &str, user_level: i64) -> Result<Vec<Entry>> {
        let needle = pattern.to_lowercase();
        let allowed: std::collections::HashSet<u64> = self
            .list_areas(user_level)?
            .into_iter()
            .map(|s| s.area.id)
            .collect();

        let mut hits = Vec::new();
        for entry in self.entries.iter() {
            let (_, raw) = entry?;
            let e: Entry = bincode::deserialize(&raw)?;
            if !allowed.contains(&e.area_id) {
                continue;
            }
            if e.filename.to_lowercase().contains(&needle)
                || e.description.to_lowercase().contains(&needle)
            {
                hits.push(e);
                if hits.len() >= SEARCH_LIMIT {
                    break;
                }
            }
        }
        hits.sort_by(|a, b| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()));
        Ok(hits)
    }

    /// Record a new file entry; returns its id.
    pub fn add_entry(
        &self,
        area_id: u64,
        filename: &str,
        description: &str,
        size_bytes: u64,
        uploader: &str,
    ) -> Result<u64> {
        validation::validate_filename(filename)?;
        self.get_area(area_id)?;

        let entry = Entry {
            id: self.db.generate_id()?,
            area_id,
            filename: filename.to_string(),
            description: description.to_string(),
            size_bytes,
            uploader: uploader.to_string(),
            download_count: 0,
            uploaded_at: Utc::now(),
        };
        self.entries
            .insert(entry_key(area_id, entry.id), bincode::serialize(&entry)?)?;
        self.index
            .insert(entry.id.to_be_bytes(), &area_id.to_be_bytes())?;
        Ok(entry.id)
    }

    pub fn increment_download(&self, entry_id: u64) -> Result<()> {
        let mut entry = self.get_file(entry_id)?;
        entry.download_count += 1;
        self.entries.insert(
            entry_key(entry.area_id, entry.id),
            bincode::serialize(&entry)?,
        )?;
        Ok(())
    }
}

/// Human-readable file size for listings.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, FileRepo) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let repo = FileRepo::open(&db).unwrap();
        (dir, repo)
    }

    #[test]
    fn add_list_and_count_downloads() {
        let (_dir, repo) = repo();
        let area = repo.add_area("Utils", "", "utils", 10, 20, 1).unwrap();

        let id = repo
            .add_entry(area.id, "PKZIP.EXE", "compressor", 42_000, "alice")
            .unwrap();
        repo.add_entry(area.id, "ARJ.EXE", "archiver", 30_000, "bob")
            .unwrap();

        let files = repo.list_files(area.id, 0, 10).unwrap();
        assert_eq!(files.len(), 2);
        // Sorted by filename.
        assert_eq!(files[0].filename, "ARJ.EXE");

        repo.increment_download(id).unwrap();
        repo.increment_download(id).unwrap();
        assert_eq!(repo.get_file(id).unwrap().download_count, 2);
    }

    #[test]
    fn search_respects_levels() {
        let (_dir, repo) = repo();
        let open = repo.add_area("Open", "", "open", 10, 10, 1).unwrap();
        let locked = repo.add_area("Locked", "", "locked", 90, 90, 2).unwrap();
        repo.add_entry(open.id, "GAME.ZIP", "a game", 1, "a").unwrap();
        repo.add_entry(locked.id, "GAME2.ZIP", "sequel", 1, "a").unwrap();

        let hits = repo.search("game", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "GAME.ZIP");

        let hits = repo.search("game", 100).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn filenames_are_validated() {
        let (_dir, repo) = repo();
        let area = repo.add_area("Open", "", "open", 10, 10, 1).unwrap();
        assert!(repo.add_entry(area.id, "../evil", "", 0, "a").is_err());
    }

    #[test]
    fn sizes_format_classically() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}

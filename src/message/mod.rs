//! Message bases.
//!
//! Areas, messages and per-user read pointers live in three sled trees.
//! Message keys are `[area_id BE][message_id BE]` so per-area listings are
//! range scans; a small index tree maps bare message ids back to their area.
//! Message ids are globally monotonic, which is what makes "new since last
//! read" a simple id comparison.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation;

const TREE_AREAS: &str = "message_areas";
const TREE_MESSAGES: &str = "messages";
const TREE_MESSAGE_INDEX: &str = "message_index";
const TREE_READ_PTRS: &str = "message_read";

/// A message conference/area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub read_level: i64,
    pub write_level: i64,
    pub sort_order: i64,
}

/// Area plus the computed per-user counters used by area listings.
#[derive(Debug, Clone)]
pub struct AreaSummary {
    pub area: Area,
    pub total: u64,
    pub unread: u64,
}

/// A single message in an area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub area_id: u64,
    pub from_user: String,
    /// None = public message.
    pub to_user: Option<String>,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: sled::Db,
    areas: sled::Tree,
    messages: sled::Tree,
    index: sled::Tree,
    read_ptrs: sled::Tree,
}

fn message_key(area_id: u64, msg_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&area_id.to_be_bytes());
    key[8..].copy_from_slice(&msg_id.to_be_bytes());
    key
}

fn read_ptr_key(user_id: u64, area_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(&area_id.to_be_bytes());
    key
}

impl MessageRepo {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(MessageRepo {
            db: db.clone(),
            areas: db.open_tree(TREE_AREAS)?,
            messages: db.open_tree(TREE_MESSAGES)?,
            index: db.open_tree(TREE_MESSAGE_INDEX)?,
            read_ptrs: db.open_tree(TREE_READ_PTRS)?,
        })
    }

    /// Seed the default areas on a fresh database.
    pub fn seed_defaults(&self) -> Result<()> {
        if !self.areas.is_empty() {
            return Ok(());
        }
        self.add_area("General", "General discussion", 10, 10, 1)?;
        self.add_area("BBS News", "Announcements from the sysop", 10, 100, 2)?;
        self.add_area("Trading Post", "Buy, sell, swap", 20, 20, 3)?;
        Ok(())
    }

    pub fn add_area(
        &self,
        name: &str,
        description: &str,
        read_level: i64,
        write_level: i64,
        sort_order: i64,
    ) -> Result<Area> {
        let area = Area {
            id: self.db.generate_id()?,
            name: name.to_string(),
            description: description.to_string(),
            read_level,
            write_level,
            sort_order,
        };
        self.areas
            .insert(area.id.to_be_bytes(), bincode::serialize(&area)?)?;
        Ok(area)
    }

    pub fn get_area(&self, id: u64) -> Result<Area> {
        match self.areas.get(id.to_be_bytes())? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Err(anyhow!("area {} not found", id)),
        }
    }

    /// Areas the user may read, ordered by sort order then name.
    pub fn list_areas(&self, user_level: i64) -> Result<Vec<Area>> {
        let mut areas = Vec::new();
        for entry in self.areas.iter() {
            let (_, raw) = entry?;
            let area: Area = bincode::deserialize(&raw)?;
            if area.read_level <= user_level {
                areas.push(area);
            }
        }
        areas.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
        Ok(areas)
    }

    /// Areas with total and per-user unread counts.
    pub fn list_areas_with_new(&self, user_id: u64, user_level: i64) -> Result<Vec<AreaSummary>> {
        let areas = self.list_areas(user_level)?;
        let mut out = Vec::with_capacity(areas.len());
        for area in areas {
            let last_read = self.last_read(user_id, area.id)?;
            let mut total = 0u64;
            let mut unread = 0u64;
            for entry in self.messages.scan_prefix(area.id.to_be_bytes()) {
                let (key, _) = entry?;
                total += 1;
                let msg_id = u64::from_be_bytes(key[8..16].try_into().unwrap());
                if msg_id > last_read {
                    unread += 1;
                }
            }
            out.push(AreaSummary { area, total, unread });
        }
        Ok(out)
    }

    /// Post a new message; returns its id.
    pub fn post(
        &self,
        area_id: u64,
        from_user: &str,
        to_user: Option<&str>,
        subject: &str,
        body: &str,
        reply_to: Option<u64>,
    ) -> Result<u64> {
        if subject.chars().count() > validation::MAX_SUBJECT_LEN {
            return Err(anyhow!(
                "subject too long (max {} characters)",
                validation::MAX_SUBJECT_LEN
            ));
        }
        validation::validate_message_body(body)?;
        // Fails when the area does not exist.
        self.get_area(area_id)?;

        let msg = Message {
            id: self.db.generate_id()?,
            area_id,
            from_user: from_user.to_string(),
            to_user: to_user.map(|s| s.to_string()),
            subject: subject.to_string(),
            body: body.to_string(),
            reply_to,
            created_at: Utc::now(),
        };
        self.messages
            .insert(message_key(area_id, msg.id), bincode::serialize(&msg)?)?;
        self.index
            .insert(msg.id.to_be_bytes(), &area_id.to_be_bytes())?;
        Ok(msg.id)
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, msg_id: u64) -> Result<Message> {
        let area_raw = self
            .index
            .get(msg_id.to_be_bytes())?
            .ok_or_else(|| anyhow!("message {} not found", msg_id))?;
        let area_id = u64::from_be_bytes(area_raw.as_ref().try_into()?);
        match self.messages.get(message_key(area_id, msg_id))? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Err(anyhow!("message {} not found", msg_id)),
        }
    }

    /// Messages in an area in id order, paginated.
    pub fn list_messages(&self, area_id: u64, offset: usize, limit: usize) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        for entry in self
            .messages
            .scan_prefix(area_id.to_be_bytes())
            .skip(offset)
            .take(limit)
        {
            let (_, raw) = entry?;
            out.push(bincode::deserialize(&raw)?);
        }
        Ok(out)
    }

    pub fn count_messages(&self, area_id: u64) -> u64 {
        self.messages
            .scan_prefix(area_id.to_be_bytes())
            .count() as u64
    }

    /// Advance the user's read pointer; it never moves backwards.
    pub fn mark_read(&self, user_id: u64, area_id: u64, msg_id: u64) -> Result<()> {
        let key = read_ptr_key(user_id, area_id);
        let current = self.last_read(user_id, area_id)?;
        if msg_id > current {
            self.read_ptrs.insert(key, &msg_id.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn last_read(&self, user_id: u64, area_id: u64) -> Result<u64> {
        Ok(self
            .read_ptrs
            .get(read_ptr_key(user_id, area_id))?
            .map(|raw| u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0))
    }

    /// Unread messages in an area for a user.
    pub fn new_messages(&self, user_id: u64, area_id: u64) -> Result<Vec<Message>> {
        let last_read = self.last_read(user_id, area_id)?;
        let mut out = Vec::new();
        for entry in self.messages.scan_prefix(area_id.to_be_bytes()) {
            let (_, raw) = entry?;
            let msg: Message = bincode::deserialize(&raw)?;
            if msg.id > last_read {
                out.push(msg);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, MessageRepo) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let repo = MessageRepo::open(&db).unwrap();
        (dir, repo)
    }

    #[test]
    fn post_list_and_read() {
        let (_dir, repo) = repo();
        let area = repo.add_area("General", "chat", 10, 10, 1).unwrap();

        let id1 = repo
            .post(area.id, "alice", None, "first", "hello there", None)
            .unwrap();
        let id2 = repo
            .post(area.id, "bob", Some("alice"), "re: first", "hi back", Some(id1))
            .unwrap();
        assert!(id2 > id1);

        let listed = repo.list_messages(area.id, 0, 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].subject, "first");

        let fetched = repo.get_message(id2).unwrap();
        assert_eq!(fetched.reply_to, Some(id1));
        assert_eq!(fetched.to_user.as_deref(), Some("alice"));
    }

    #[test]
    fn unread_counts_follow_read_pointer() {
        let (_dir, repo) = repo();
        let area = repo.add_area("General", "", 10, 10, 1).unwrap();
        let id1 = repo.post(area.id, "a", None, "s1", "b1", None).unwrap();
        let _id2 = repo.post(area.id, "a", None, "s2", "b2", None).unwrap();

        let summaries = repo.list_areas_with_new(7, 10).unwrap();
        assert_eq!(summaries[0].total, 2);
        assert_eq!(summaries[0].unread, 2);

        repo.mark_read(7, area.id, id1).unwrap();
        let summaries = repo.list_areas_with_new(7, 10).unwrap();
        assert_eq!(summaries[0].unread, 1);

        // Pointer never regresses.
        repo.mark_read(7, area.id, 0).unwrap();
        assert_eq!(repo.last_read(7, area.id).unwrap(), id1);

        let fresh = repo.new_messages(7, area.id).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].subject, "s2");
    }

    #[test]
    fn area_level_gating() {
        let (_dir, repo) = repo();
        repo.add_area("Public", "", 10, 10, 1).unwrap();
        repo.add_area("Lounge", "", 50, 50, 2).unwrap();

        assert_eq!(repo.list_areas(10).unwrap().len(), 1);
        assert_eq!(repo.list_areas(50).unwrap().len(), 2);
    }

    #[test]
    fn post_rejects_empty_body_and_missing_area() {
        let (_dir, repo) = repo();
        let area = repo.add_area("General", "", 10, 10, 1).unwrap();
        assert!(repo.post(area.id, "a", None, "s", "   ", None).is_err());
        assert!(repo.post(area.id + 999, "a", None, "s", "body", None).is_err());
    }
}

//! User accounts.
//!
//! Sled-backed repository keyed by lowercase username. Passwords are hashed
//! with Argon2id and stored as PHC strings; the plaintext never touches disk.

use anyhow::{anyhow, Result};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

use crate::validation;

const TREE_USERS: &str = "users";

// Security levels following classic BBS conventions.
pub const LEVEL_NEW: i64 = 10;
pub const LEVEL_VALIDATED: i64 = 20;
pub const LEVEL_REGULAR: i64 = 30;
pub const LEVEL_TRUSTED: i64 = 50;
pub const LEVEL_COSYSOP: i64 = 90;
pub const LEVEL_SYSOP: i64 = 100;

/// A BBS user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub real_name: String,
    pub location: String,
    pub email: String,
    pub security_level: i64,
    pub total_calls: u64,
    pub last_call_at: Option<DateTime<Utc>>,
    pub ansi_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for user accounts.
#[derive(Clone)]
pub struct UserRepo {
    db: sled::Db,
    tree: sled::Tree,
    argon2: Argon2<'static>,
}

fn user_key(username: &str) -> Vec<u8> {
    username.trim().to_lowercase().into_bytes()
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash password: {}", e))?;
    Ok(hash.to_string())
}

pub fn check_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

impl UserRepo {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(UserRepo {
            db: db.clone(),
            tree: db.open_tree(TREE_USERS)?,
            argon2: Argon2::default(),
        })
    }

    fn put(&self, user: &User) -> Result<()> {
        let bytes = bincode::serialize(user)?;
        self.tree.insert(user_key(&user.username), bytes)?;
        Ok(())
    }

    fn fetch(&self, username: &str) -> Result<Option<User>> {
        match self.tree.get(user_key(username))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Create a new account with a hashed password. New users start at
    /// [`LEVEL_NEW`].
    pub fn create(
        &self,
        username: &str,
        password: &str,
        real_name: &str,
        location: &str,
        email: &str,
    ) -> Result<User> {
        validation::validate_username(username)?;
        validation::validate_password(password)?;
        validation::validate_email(email)?;

        if self.exists(username) {
            return Err(anyhow!("username already exists"));
        }

        let now = Utc::now();
        let user = User {
            id: self.db.generate_id()?,
            username: username.trim().to_string(),
            password_hash: self.hash(password)?,
            real_name: real_name.to_string(),
            location: location.to_string(),
            email: email.to_string(),
            security_level: LEVEL_NEW,
            total_calls: 0,
            last_call_at: None,
            ansi_enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.put(&user)?;
        Ok(user)
    }

    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("hash password: {}", e))?;
        Ok(hash.to_string())
    }

    /// Check username/password and return the user on success, bumping the
    /// call counter and last-call timestamp.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let mut user = self.fetch(username)?.ok_or_else(|| anyhow!("user not found"))?;

        if !check_password(password, &user.password_hash) {
            return Err(anyhow!("invalid password"));
        }

        let now = Utc::now();
        user.total_calls += 1;
        user.last_call_at = Some(now);
        user.updated_at = now;
        self.put(&user)?;

        Ok(user)
    }

    /// Validate credentials for SSH pre-auth without side effects (the BBS
    /// login screen performs the real login later).
    pub fn authenticate_for_ssh(&self, username: &str, password: &str) -> bool {
        match self.fetch(username) {
            Ok(Some(user)) => check_password(password, &user.password_hash),
            _ => false,
        }
    }

    pub fn get(&self, username: &str) -> Result<Option<User>> {
        self.fetch(username)
    }

    pub fn exists(&self, username: &str) -> bool {
        self.tree.contains_key(user_key(username)).unwrap_or(false)
    }

    pub fn update_profile(
        &self,
        username: &str,
        real_name: &str,
        location: &str,
        email: &str,
    ) -> Result<()> {
        validation::validate_email(email)?;
        let mut user = self.fetch(username)?.ok_or_else(|| anyhow!("user not found"))?;
        user.real_name = real_name.to_string();
        user.location = location.to_string();
        user.email = email.to_string();
        user.updated_at = Utc::now();
        self.put(&user)
    }

    pub fn update_password(&self, username: &str, new_password: &str) -> Result<()> {
        validation::validate_password(new_password)?;
        let mut user = self.fetch(username)?.ok_or_else(|| anyhow!("user not found"))?;
        user.password_hash = self.hash(new_password)?;
        user.updated_at = Utc::now();
        self.put(&user)
    }

    pub fn update_security_level(&self, username: &str, level: i64) -> Result<()> {
        let mut user = self.fetch(username)?.ok_or_else(|| anyhow!("user not found"))?;
        user.security_level = level;
        user.updated_at = Utc::now();
        self.put(&user)
    }

    pub fn update_ansi(&self, username: &str, enabled: bool) -> Result<()> {
        let mut user = self.fetch(username)?.ok_or_else(|| anyhow!("user not found"))?;
        user.ansi_enabled = enabled;
        user.updated_at = Utc::now();
        self.put(&user)
    }

    /// All users ordered by username.
    pub fn list(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for entry in self.tree.iter() {
            let (_, raw) = entry?;
            users.push(bincode::deserialize::<User>(&raw)?);
        }
        users.sort_by(|a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()));
        Ok(users)
    }
}

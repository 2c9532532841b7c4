//! Registration, credential checks, and administrator flags.

use crate::error::{Result, VersoError};
use crate::model::{validate_password, validate_username, Caller, ProfileUpdate, ReaderProfile, User};
use crate::storage::SqliteStorage;

/// bcrypt only reads the first 72 bytes of its input.
const BCRYPT_MAX_BYTES: usize = 72;

#[derive(Debug, Clone)]
pub struct AccountService {
    storage: SqliteStorage,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(storage: SqliteStorage) -> Self {
        Self::with_cost(storage, bcrypt::DEFAULT_COST)
    }

    /// Use a custom bcrypt cost (tests use the minimum to stay fast).
    pub fn with_cost(storage: SqliteStorage, bcrypt_cost: u32) -> Self {
        Self {
            storage,
            bcrypt_cost,
        }
    }

    /// Create an account. The very first account becomes administrator.
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let username = validate_username(username)?;
        validate_password(password)?;

        let hash = self.hash_password(password).await?;
        let user = self.storage.insert_user(&username, &hash).await?;
        tracing::info!(user_id = user.id, username = %user.username, is_admin = user.is_admin, "registered user");
        Ok(user)
    }

    /// Check a username/password pair. Unknown users and wrong passwords
    /// produce the same error.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let rejected = || VersoError::Unauthorized("invalid username or password".into());

        let Some(user) = self.storage.find_user_by_name(username).await? else {
            return Err(rejected());
        };
        if !self.verify_password(password, &user.password_hash).await? {
            return Err(rejected());
        }
        Ok(user)
    }

    pub async fn change_password(&self, caller: &Caller, new_password: &str) -> Result<()> {
        let user = caller.require_user()?;
        validate_password(new_password)?;
        let hash = self.hash_password(new_password).await?;
        self.storage.update_password_hash(user.id, &hash).await?;
        tracing::info!(user_id = user.id, "password changed");
        Ok(())
    }

    /// The caller's own profile, read fresh from storage.
    pub async fn profile(&self, caller: &Caller) -> Result<ReaderProfile> {
        let user = caller.require_user()?;
        self.reader_profile(self.storage.get_user(user.id).await?).await
    }

    pub async fn update_profile(&self, caller: &Caller, update: ProfileUpdate) -> Result<ReaderProfile> {
        let user = caller.require_user()?;
        let update = update.validated()?;
        let updated = self.storage.update_profile(user.id, &update).await?;
        tracing::info!(user_id = user.id, "profile updated");
        self.reader_profile(updated).await
    }

    async fn reader_profile(&self, user: User) -> Result<ReaderProfile> {
        let read_poem_ids = self.storage.read_poem_ids(user.id).await?;
        Ok(ReaderProfile { user, read_poem_ids })
    }

    /// Grant or revoke administrator rights by username.
    pub async fn set_admin(&self, username: &str, is_admin: bool) -> Result<User> {
        let user = self
            .storage
            .find_user_by_name(username)
            .await?
            .ok_or_else(|| VersoError::NotFound(format!("user '{}'", username.trim())))?;
        self.storage.set_admin(user.id, is_admin).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.storage.list_users().await
    }

    /// Resolve a user id to a caller. Ids that match no account are anonymous.
    pub async fn caller_for(&self, user_id: i64) -> Result<Caller> {
        match self.storage.get_user(user_id).await {
            Ok(user) => Ok(Caller::user(user)),
            Err(VersoError::NotFound(_)) => Ok(Caller::Anonymous),
            Err(e) => Err(e),
        }
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let password = truncate(password).to_vec();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(&password, cost))
            .await
            .map_err(|e| VersoError::Storage(format!("task join error: {e}")))?
            .map_err(|e| VersoError::Storage(format!("failed to hash password: {e}")))
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let password = truncate(password).to_vec();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash).unwrap_or(false))
            .await
            .map_err(|e| VersoError::Storage(format!("task join error: {e}")))
    }
}

fn truncate(password: &str) -> &[u8] {
    let bytes = password.as_bytes();
    &bytes[..bytes.len().min(BCRYPT_MAX_BYTES)]
}

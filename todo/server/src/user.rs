use crate::entities::user;
use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use sea_orm::*;
use std::sync::{Arc, LazyLock};

/// An account allowed to call the API. Only used for authentication.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct User {
    id: i32,
    name: String,
    password_hash: String,
}

impl User {
    pub fn new(id: i32, name: String, password_hash: String) -> Self {
        Self {
            id,
            name,
            password_hash,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks `password` against the stored argon2 hash.
    pub fn verify_password(&self, password: &str) -> bool {
        let parsed_hash = match PasswordHash::new(&self.password_hash) {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!("Stored password hash for user {} is invalid: {}", self.id, err);
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User::new(model.id, model.name, model.password)
    }
}

/// Error type for UserService operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    /// Hashing a new password failed.
    #[error("Failed to hash password: {0}")]
    PasswordHash(String),
    /// The blocking task running argon2 panicked or was cancelled.
    #[error("Password task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

/// Hashes `password` with argon2id and a random salt, returning the PHC string.
pub fn hash_password(password: &str) -> Result<String, UserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| UserServiceError::PasswordHash(err.to_string()))
}

/// Verified in place of a missing user, so unknown names take as long to reject
/// as wrong passwords.
static DUMMY_USER: LazyLock<Option<User>> = LazyLock::new(|| {
    hash_password("not-a-real-password")
        .ok()
        .map(|hash| User::new(0, String::new(), hash))
});

/// Checks `password` for the looked-up `user` on the blocking thread pool.
///
/// Returns the user when the password matches. `None` for `user` still runs a
/// full argon2 verification before answering `Ok(None)`.
pub async fn authenticate(
    user: Option<User>,
    password: String,
) -> Result<Option<User>, UserServiceError> {
    let verified = tokio::task::spawn_blocking(move || match user {
        Some(user) => user.verify_password(&password).then_some(user),
        None => {
            if let Some(dummy) = DUMMY_USER.as_ref() {
                dummy.verify_password(&password);
            }
            None
        }
    })
    .await?;
    Ok(verified)
}

/// Lookup of users by name, as needed by the authentication middleware.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Finds a user by name. Returns `Ok(None)` when no such user exists.
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, UserServiceError>;
}

pub struct UserService {
    db: Arc<DatabaseConnection>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a new user, storing a salted hash of `password`.
    ///
    /// # Arguments
    ///
    /// * `name` - The unique login name.
    /// * `password` - The plaintext password.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `User` if successful, or an error otherwise.
    #[tracing::instrument(skip(self, password))]
    pub async fn create_user(&self, name: &str, password: &str) -> Result<User, UserServiceError> {
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        let now = chrono::Utc::now();
        let active_model = user::ActiveModel {
            name: ActiveValue::Set(name.to_string()),
            password: ActiveValue::Set(password_hash),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db.as_ref()).await?;
        Ok(User::from(created_model))
    }

    /// Returns the user called `name`, creating it with `password` if it does not exist yet.
    /// An existing user keeps its current password.
    #[tracing::instrument(skip(self, password))]
    pub async fn ensure_user(&self, name: &str, password: &str) -> Result<User, UserServiceError> {
        if let Some(existing) = self.find_user_by_name(name).await? {
            tracing::info!("User {} already exists", name);
            return Ok(existing);
        }
        let created = self.create_user(name, password).await?;
        tracing::info!("Created user {}", name);
        Ok(created)
    }
}

#[async_trait]
impl UserRepository for UserService {
    #[tracing::instrument(skip(self))]
    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, UserServiceError> {
        let found = user::Entity::find()
            .filter(user::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?;
        Ok(found.map(User::from))
    }
}

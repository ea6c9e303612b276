//! User database operations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;

/// Role of a user, globally or within a project
///
/// Variants are ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    /// Whether this role is at least `required`
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// User record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// User repository
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user by ID
    pub async fn get(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, role, is_active, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Get a user by username
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, role, is_active, created_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Create a user
    pub async fn create(&self, username: &str, email: Option<&str>, role: Role) -> Result<User> {
        let id = sqlx::query(
            r#"
            INSERT INTO users (username, email, role)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(role)
        .execute(self.pool)
        .await?
        .last_insert_rowid();

        tracing::info!(user_id = id, username = %username, role = %role, "Created user");

        self.get(id)
            .await?
            .ok_or_else(|| crate::error::AppError::Internal(format!("user {} vanished", id)))
    }

    /// Stored password hash of a user
    pub async fn password_hash(&self, id: i64) -> Result<Option<String>> {
        let hash = sqlx::query_scalar::<_, Option<String>>(
            "SELECT password_hash FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(hash.flatten())
    }

    /// Replace the password hash of a user
    pub async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::AppError::NotFound(format!("user {}", id)));
        }

        tracing::info!(user_id = id, "Updated password");
        Ok(())
    }

    /// Make sure an active admin with `username` exists
    pub async fn ensure_admin(&self, username: &str) -> Result<User> {
        if let Some(user) = self.get_by_username(username).await? {
            if user.is_admin() && user.is_active {
                return Ok(user);
            }

            sqlx::query("UPDATE users SET role = ?, is_active = 1 WHERE id = ?")
                .bind(Role::Admin)
                .bind(user.id)
                .execute(self.pool)
                .await?;

            tracing::info!(user_id = user.id, username = %username, "Promoted user to admin");

            return self.get(user.id).await?.ok_or_else(|| {
                crate::error::AppError::Internal(format!("user {} vanished", user.id))
            });
        }

        self.create(username, None, Role::Admin).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;
    use tempfile::TempDir;

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Admin.satisfies(Role::Editor));
        assert!(Role::Editor.satisfies(Role::Viewer));
        assert!(Role::Editor.satisfies(Role::Editor));
        assert!(!Role::Viewer.satisfies(Role::Editor));
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("owner".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let repo = UserRepository::new(&pool);

        let user = repo.create("alice", Some("alice@example.com"), Role::Editor).await.unwrap();
        assert_eq!(user.role, Role::Editor);
        assert!(user.is_active);

        let found = repo.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.get(user.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_admin_promotes() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let repo = UserRepository::new(&pool);

        let created = repo.ensure_admin("root").await.unwrap();
        assert!(created.is_admin());

        let again = repo.ensure_admin("root").await.unwrap();
        assert_eq!(again.id, created.id);

        repo.create("bob", None, Role::Viewer).await.unwrap();
        let promoted = repo.ensure_admin("bob").await.unwrap();
        assert!(promoted.is_admin());
    }

    #[tokio::test]
    async fn test_password_hash_storage() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let repo = UserRepository::new(&pool);

        let user = repo.create("erin", None, Role::Viewer).await.unwrap();
        assert!(repo.password_hash(user.id).await.unwrap().is_none());

        repo.set_password_hash(user.id, "$2b$04$hash").await.unwrap();
        assert_eq!(
            repo.password_hash(user.id).await.unwrap().as_deref(),
            Some("$2b$04$hash")
        );

        assert!(repo.password_hash(user.id + 100).await.unwrap().is_none());
        assert!(matches!(
            repo.set_password_hash(user.id + 100, "x").await,
            Err(crate::error::AppError::NotFound(_))
        ));
    }
}

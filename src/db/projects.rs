//! Project and permission database operations

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::users::Role;
use crate::error::{AppError, Result};

/// Project record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Directory relative to the upload root
    pub storage_path: String,
    pub created_at: String,
}

/// Create project request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub description: Option<String>,
}

/// Project repository
pub struct ProjectRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProjectRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a specific project
    pub async fn get(&self, id: i64) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, name, description, storage_path, created_at
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(project)
    }

    /// List every project
    pub async fn list_all(&self) -> Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, name, description, storage_path, created_at
            FROM projects
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(projects)
    }

    /// List projects a user holds any permission on
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            r#"
            SELECT p.id, p.name, p.description, p.storage_path, p.created_at
            FROM projects p
            JOIN project_permissions pp ON pp.project_id = p.id
            WHERE pp.user_id = ?
            ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(projects)
    }

    /// Create a project
    pub async fn create(&self, request: &CreateProject, storage_path: &str) -> Result<Project> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (name, description, storage_path)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(storage_path)
        .execute(self.pool)
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::Conflict(format!(
                    "project {} already exists",
                    request.name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(project_id = id, name = %request.name, "Created project");

        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("project {} vanished", id)))
    }

    /// Grant or replace a user's role on a project
    pub async fn grant(&self, user_id: i64, project_id: i64, role: Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_permissions (user_id, project_id, role)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, project_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(role)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// A user's role on a project, if any
    pub async fn permission(&self, user_id: i64, project_id: i64) -> Result<Option<Role>> {
        let role = sqlx::query_scalar::<_, Role>(
            r#"
            SELECT role
            FROM project_permissions
            WHERE user_id = ? AND project_id = ?
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;
    use crate::db::UserRepository;
    use tempfile::TempDir;

    fn request(name: &str) -> CreateProject {
        CreateProject {
            name: name.to_string(),
            description: Some("test project".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let projects = ProjectRepository::new(&pool);

        let site = projects.create(&request("site"), "projects/site").await.unwrap();
        projects.create(&request("assets"), "projects/assets").await.unwrap();

        let all = projects.list_all().await.unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["assets", "site"]);

        let found = projects.get(site.id).await.unwrap().unwrap();
        assert_eq!(found.storage_path, "projects/site");
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let projects = ProjectRepository::new(&pool);

        projects.create(&request("site"), "projects/a").await.unwrap();
        let result = projects.create(&request("site"), "projects/b").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_permissions() {
        let dir = TempDir::new().unwrap();
        let pool = temp_pool(&dir).await;
        let projects = ProjectRepository::new(&pool);
        let users = UserRepository::new(&pool);

        let user = users.create("carol", None, Role::Viewer).await.unwrap();
        let site = projects.create(&request("site"), "projects/site").await.unwrap();
        projects.create(&request("other"), "projects/other").await.unwrap();

        assert_eq!(projects.permission(user.id, site.id).await.unwrap(), None);

        projects.grant(user.id, site.id, Role::Viewer).await.unwrap();
        projects.grant(user.id, site.id, Role::Editor).await.unwrap();
        assert_eq!(projects.permission(user.id, site.id).await.unwrap(), Some(Role::Editor));

        let visible = projects.list_for_user(user.id).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, site.id);
    }
}

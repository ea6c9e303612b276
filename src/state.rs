//! Application state management

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::ProjectRepository;
use crate::error::Result;
use crate::storage::ProjectStorage;
use crate::upload::{Destinations, Sweeper, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub db: SqlitePool,
    pub storage: ProjectStorage,
    pub uploads: UploadService,
    pub auth: AuthService,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, db: SqlitePool, storage: ProjectStorage) -> Self {
        let uploads = UploadService::new(config.upload_settings());
        let auth = AuthService::new(&config.auth);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                storage,
                uploads,
                auth,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the project storage
    pub fn storage(&self) -> &ProjectStorage {
        &self.inner.storage
    }

    /// Get the upload engine
    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }

    /// Get the token and password service
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    /// Sweeper over the directories of every registered project
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.inner.uploads.clone(),
            ProjectDestinations {
                db: self.inner.db.clone(),
                storage: self.inner.storage.clone(),
            },
        )
    }
}

/// Project directories, read from the database on each sweep
struct ProjectDestinations {
    db: SqlitePool,
    storage: ProjectStorage,
}

#[async_trait]
impl Destinations for ProjectDestinations {
    async fn destinations(&self) -> Result<Vec<PathBuf>> {
        let projects = ProjectRepository::new(&self.db).list_all().await?;
        Ok(projects
            .iter()
            .filter_map(|project| self.storage.project_dir(&project.storage_path))
            .collect())
    }
}

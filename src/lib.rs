use crate::catalog::Catalog;
use crate::openai::{real::maybe_create_openai_client, OpenAIClientTrait};
use crate::refine::{
    ChatRefinementGateway, RefinementGateway, DEFAULT_REFINE_TIMEOUT,
};
use crate::speech::{LogSpeech, SpeechOutput};
use crate::store::{EntryStore, SqliteEntryStore};
use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod app;
pub mod catalog;
pub mod cli;
pub mod compose;
pub mod flow;
pub mod model;
pub mod openai;
pub mod prompts;
pub mod refine;
pub mod sessions;
pub mod speech;
pub mod store;
pub mod time_util;
pub mod wizard;

pub mod test_utils;

pub use store::init_diary_db;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

// Define the AppState struct for both main app and testing
pub struct AppState {
    pub diary_db: Pool<SqliteConnectionManager>,
    pub catalog: Arc<Catalog>,
    // None when no API key is configured; sentences are then composed
    // locally without any network attempt.
    pub refiner: Option<Arc<dyn RefinementGateway>>,
    pub refine_timeout: Duration,
    pub entries: Arc<dyn EntryStore>,
    pub sessions: Arc<sessions::Store>,
    pub speech: Arc<dyn SpeechOutput>,
    pub timezone: chrono_tz::Tz,
    pub shutdown_token: CancellationToken,
    #[allow(dead_code)]
    temp_diary_path: Option<tempfile::NamedTempFile>,
}

impl AppState {
    pub fn new_for_testing() -> Self {
        Self::new_for_testing_with_openai_client(None)
    }

    // Create a new AppState for testing with minimal configuration
    pub fn new_for_testing_with_openai_client(
        openai_client: Option<Arc<dyn OpenAIClientTrait>>,
    ) -> Self {
        let refiner = openai_client.map(|client| {
            Arc::new(ChatRefinementGateway::new(
                client,
                "test-model".to_string(),
            )) as Arc<dyn RefinementGateway>
        });
        Self::new_for_testing_with_refiner(refiner)
    }

    pub fn new_for_testing_with_refiner(
        refiner: Option<Arc<dyn RefinementGateway>>,
    ) -> Self {
        // Create a temporary file for the SQLite database
        let temp_diary_file = tempfile::NamedTempFile::new()
            .expect("Failed to create temporary diary database file");

        let diary_manager = SqliteConnectionManager::file(temp_diary_file.path());
        let diary_pool =
            Pool::new(diary_manager).expect("Failed to create diary pool");

        let mut conn = diary_pool.get().expect("Failed to get connection");
        init_diary_db(&mut conn).expect("Failed to initialize diary db");

        Self {
            entries: Arc::new(SqliteEntryStore::new(diary_pool.clone())),
            diary_db: diary_pool,
            catalog: Arc::new(
                Catalog::builtin().expect("Failed to load builtin catalog"),
            ),
            refiner,
            refine_timeout: DEFAULT_REFINE_TIMEOUT,
            sessions: Arc::new(sessions::Store::new(DEFAULT_SESSION_TTL)),
            speech: Arc::new(LogSpeech),
            timezone: chrono_tz::Asia::Tokyo,
            shutdown_token: CancellationToken::new(),
            // Store temp file so it's cleaned up when AppState is dropped
            temp_diary_path: Some(temp_diary_file),
        }
    }
}

// Create a config struct to hold AppState configuration
pub struct AppConfig {
    pub diary_pool: Pool<SqliteConnectionManager>,
    pub catalog: Catalog,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub refine_model: String,
    pub refine_timeout: Duration,
    pub timezone_str: Option<String>,
    pub session_ttl: Duration,
}

// Function to create AppState from parameters
pub fn create_app_state(config: AppConfig) -> Arc<AppState> {
    // Determine the timezone to use
    let timezone =
        time_util::get_local_timezone(config.timezone_str.as_deref());

    let refiner = match maybe_create_openai_client(
        config.openai_api_key,
        config.openai_api_base,
    ) {
        Ok(client) => {
            info!("Refining sentences with {}", config.refine_model);
            Some(Arc::new(ChatRefinementGateway::new(
                client,
                config.refine_model,
            )) as Arc<dyn RefinementGateway>)
        }
        Err(e) => {
            warn!("Sentence refinement disabled: {}", e);
            None
        }
    };

    Arc::new(AppState {
        entries: Arc::new(SqliteEntryStore::new(config.diary_pool.clone())),
        diary_db: config.diary_pool,
        catalog: Arc::new(config.catalog),
        refiner,
        refine_timeout: config.refine_timeout,
        sessions: Arc::new(sessions::Store::new(config.session_ttl)),
        speech: Arc::new(LogSpeech),
        timezone,
        shutdown_token: CancellationToken::new(),
        temp_diary_path: None,
    })
}

/// Opens the diary database and creates the schema.
pub fn open_diary_db(
    path: &std::path::Path,
) -> Result<Pool<SqliteConnectionManager>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create directory '{}': {}",
                parent.display(),
                e
            )
        })?;
    }
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::new(manager)?;
    {
        let mut conn = pool.get()?;
        init_diary_db(&mut conn)?;
    }
    Ok(pool)
}

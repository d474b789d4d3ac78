use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::refine::DEFAULT_REFINE_MODEL;

/// Command-line arguments for the diary server
#[derive(Parser, Debug, Clone)]
#[command(version, about = "School diary wizard server")]
pub struct Args {
    /// Path to the diary database
    #[arg(long, env = "DIARY_DB", default_value = "data/diary.db")]
    pub diary_db: PathBuf,

    /// Server host address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = 3010)]
    pub port: u16,

    /// OpenAI-compatible API key used for sentence refinement
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "OPENAI_API_BASE",
        default_value = "https://generativelanguage.googleapis.com/v1beta/openai/"
    )]
    pub openai_api_base: Option<String>,

    /// Model used for sentence refinement
    #[arg(long, env = "REFINE_MODEL", default_value = DEFAULT_REFINE_MODEL)]
    pub refine_model: String,

    /// Timezone
    #[arg(long, env = "TIMEZONE")]
    pub timezone: Option<String>,

    /// Path to a catalog JSON file; the builtin catalog is used if unset
    #[arg(long, env = "DIARY_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Minutes an idle wizard session is kept
    #[arg(long, default_value_t = 120)]
    pub session_ttl_minutes: u64,

    /// Seconds to wait for a refined sentence before using the local one
    #[arg(long, env = "REFINE_TIMEOUT_SECS", default_value_t = 20)]
    pub refine_timeout_secs: u64,
}

impl Args {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes.saturating_mul(60))
    }

    pub fn refine_timeout(&self) -> Duration {
        Duration::from_secs(self.refine_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["school_diary_server"]);
        assert_eq!(args.port, 3010);
        assert_eq!(args.refine_model, DEFAULT_REFINE_MODEL);
        assert_eq!(args.session_ttl_minutes, 120);
        assert_eq!(args.session_ttl(), Duration::from_secs(2 * 60 * 60));
        assert_eq!(args.refine_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_huge_session_ttl_saturates() {
        let args = Args::parse_from([
            "school_diary_server",
            "--session-ttl-minutes",
            &u64::MAX.to_string(),
        ]);
        assert_eq!(args.session_ttl(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "school_diary_server",
            "--diary-db",
            "/tmp/d.db",
            "--port",
            "8080",
            "--timezone",
            "Asia/Tokyo",
        ]);
        assert_eq!(args.diary_db, PathBuf::from("/tmp/d.db"));
        assert_eq!(args.port, 8080);
        assert_eq!(args.timezone.as_deref(), Some("Asia/Tokyo"));
    }
}

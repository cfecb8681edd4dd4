use anyhow::Context;

use crate::feedback::{DEFAULT_BASE_URL, DEFAULT_MODEL};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
/// `watch` holds one listener connection per live query (students,
/// evaluations, profile) and still needs one more for refetches.
const MIN_CONNECTIONS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = non_empty("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match non_empty("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        anyhow::ensure!(
            max_connections >= MIN_CONNECTIONS,
            "DATABASE_MAX_CONNECTIONS must be at least {MIN_CONNECTIONS}, got {max_connections}"
        );

        let gemini = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("API_KEY"))
            .map(|api_key| GeminiConfig {
                api_key,
                model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                base_url: non_empty("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            });

        Ok(Self {
            database_url,
            max_connections,
            gemini,
        })
    }
}

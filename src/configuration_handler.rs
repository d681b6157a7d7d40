use crate::configuration::{Configuration, StrategyPreference};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Therapy booking service")]
pub struct ConfigurationHandler {
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Without a database URL bookings are kept in memory only
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 10)]
    database_pool_size: u32,

    #[arg(long, env = "RESERVATION_STRATEGY", value_enum, default_value_t = StrategyPreference::Auto)]
    reservation_strategy: StrategyPreference,

    /// Required in the x-admin-password header for provider schedule changes
    #[arg(long, env = "ADMIN_PASSWORD")]
    admin_password: Option<String>,

    /// OpenAI compatible endpoint, e.g. https://api.openai.com/v1
    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value_t = 12)]
    llm_timeout_secs: u64,

    /// At most one year.
    #[arg(
        long,
        env = "SUPPRESS_OFFERS_MINUTES",
        default_value_t = 120,
        value_parser = clap::value_parser!(i64).range(0..=525_600)
    )]
    suppress_offers_minutes: i64,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> u16 {
        self.port
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone().filter(|url| !url.is_empty())
    }

    fn database_pool_size(&self) -> u32 {
        self.database_pool_size.max(1)
    }

    fn reservation_strategy(&self) -> StrategyPreference {
        self.reservation_strategy
    }

    fn admin_password(&self) -> Option<String> {
        self.admin_password.clone().filter(|password| !password.is_empty())
    }

    fn llm_base_url(&self) -> Option<String> {
        self.llm_base_url
            .as_ref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
    }

    fn llm_model(&self) -> String {
        self.llm_model.clone()
    }

    fn llm_api_key(&self) -> Option<String> {
        self.llm_api_key.clone()
    }

    fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    fn offer_suppression_window(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.suppress_offers_minutes).unwrap_or_else(chrono::Duration::zero)
    }
}

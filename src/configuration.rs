use clap::ValueEnum;
use std::time::Duration;

/// Which reservation strategy to use. `Auto` asks the store at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StrategyPreference {
    #[default]
    Auto,
    Atomic,
    Conditional,
}

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> u16;
    fn database_url(&self) -> Option<String>;
    fn database_pool_size(&self) -> u32;
    fn reservation_strategy(&self) -> StrategyPreference;
    fn admin_password(&self) -> Option<String>;
    fn llm_base_url(&self) -> Option<String>;
    fn llm_model(&self) -> String;
    fn llm_api_key(&self) -> Option<String>;
    fn llm_timeout(&self) -> Duration;
    /// How long after a booking the assistant stops offering new slots.
    fn offer_suppression_window(&self) -> chrono::Duration;
}

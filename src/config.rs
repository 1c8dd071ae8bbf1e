use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend_host: String,
    pub poll_ms: u64,

    pub max_open_bets: usize,
    pub bets_refresh_sec: u64,

    pub results_chunk_size: usize,
    pub results_concurrency: usize,

    /// Open bets with unresolved matches settle Void after this many
    /// seconds from placement.
    pub void_grace_sec: i64,

    /// STK-push confirmation window; overdue deposits are marked TimedOut.
    pub stk_timeout_sec: i64,

    // Stats
    pub stats_log_sec: u64,
    pub stats_jsonl_path: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let c = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        Ok(c.try_deserialize()?)
    }
}

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub dashboard: DashboardConfig,
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the metrics service, without the /api suffix.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Trailing window length for the chart series.
    #[serde(default = "default_window_points")]
    pub window_points: usize,
    /// Minimum spacing between accepted non-manual triggers.
    #[serde(default = "default_min_spacing_ms")]
    pub min_trigger_spacing_ms: u64,
}

fn default_window_points() -> usize {
    crate::engine::DEFAULT_WINDOW_POINTS
}

fn default_min_spacing_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    /// Directory for per-user refresh preferences.
    pub dir: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.remote.base_url.starts_with("http://") || self.remote.base_url.starts_with("https://"),
            "remote.base_url must be an http(s) URL, got {:?}",
            self.remote.base_url
        );
        anyhow::ensure!(
            self.remote.timeout_secs > 0,
            "remote.timeout_secs must be > 0, got {}",
            self.remote.timeout_secs
        );
        anyhow::ensure!(
            self.dashboard.window_points > 0,
            "dashboard.window_points must be > 0, got {}",
            self.dashboard.window_points
        );
        anyhow::ensure!(
            self.dashboard.min_trigger_spacing_ms > 0,
            "dashboard.min_trigger_spacing_ms must be > 0, got {}",
            self.dashboard.min_trigger_spacing_ms
        );
        anyhow::ensure!(
            !self.settings.dir.is_empty(),
            "settings.dir must be non-empty"
        );
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashcore::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Token from the environment; a headless runner has no session to end, so
/// forced logout just flags the token as dead.
struct EnvAuth {
    token: Option<String>,
}

impl coordinator::AuthContext for EnvAuth {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn force_logout(&self) {
        tracing::error!("metrics service rejected the token; refresh will keep failing until AUTH_TOKEN is replaced");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let user_id = std::env::var("DASHBOARD_USER").unwrap_or_else(|_| "default".into());
    let token = std::env::var("AUTH_TOKEN").ok();

    let fetcher = Arc::new(fetcher::HttpSampleFetcher::new(
        app_config.remote.base_url.clone(),
        Duration::from_secs(app_config.remote.timeout_secs),
    )?);
    let auth = Arc::new(EnvAuth { token });
    let backend = Arc::new(settings::FileBackend::new(app_config.settings.dir.clone())?);
    let store = settings::SettingsStore::new(backend);

    let coord = coordinator::RefreshCoordinator::new(
        fetcher,
        auth,
        store,
        &user_id,
        coordinator::CoordinatorConfig {
            window_points: app_config.dashboard.window_points,
            min_spacing: Duration::from_millis(app_config.dashboard.min_trigger_spacing_ms),
        },
    );
    tracing::info!(
        user_id = %user_id,
        settings = ?coord.settings(),
        "dashboard refresh core started"
    );

    let mut state_rx = coord.subscribe();
    let log_task = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let s = state_rx.borrow_and_update().clone();
            match (&s.last_error, s.in_flight()) {
                (_, true) => tracing::debug!(phase = ?s.phase, progress = s.progress, "cycle running"),
                (Some(e), false) => tracing::warn!(error = %e, "cycle finished with error"),
                (None, false) => {
                    if let Some(data) = &s.data {
                        tracing::info!(
                            points = data.time_series.len(),
                            endpoints = data.endpoint_stats.len(),
                            unique_ips = data.summary.unique_ips,
                            "dashboard data refreshed"
                        );
                    }
                }
            }
        }
    });

    // First paint: a manual cycle right away, then the timer takes over.
    coord.trigger(true);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => { sigterm.recv().await; }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await
            }
        } => {}
    }

    tracing::info!("Received shutdown signal");
    coord.dispose();
    log_task.abort();
    Ok(())
}

// Refresh coordinator: decides when a fetch+aggregate cycle may run and owns
// the state the view layer subscribes to. At most one cycle is in flight per
// coordinator; dropped triggers are discarded, never queued.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{EngineHandle, EngineMessage};
use crate::engine::DEFAULT_WINDOW_POINTS;
use crate::error::DashboardError;
use crate::fetcher::MetricsSource;
use crate::models::{ProcessedDashboardData, RawMetricSample, RefreshSettings};
use crate::settings::SettingsStore;

/// Minimum spacing between accepted non-manual triggers.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_secs(2);

/// Collaborator supplying the current bearer token and the forced-logout
/// callback invoked on an auth rejection.
pub trait AuthContext: Send + Sync {
    fn token(&self) -> Option<String>;
    fn force_logout(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Aggregating,
}

/// Published through a watch channel; the view layer merely subscribes.
/// `data` survives failed cycles so the last good dashboard stays visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub phase: Phase,
    pub progress: u8,
    pub data: Option<Arc<ProcessedDashboardData>>,
    pub last_success_at: Option<i64>,
    pub last_error: Option<DashboardError>,
}

impl DashboardState {
    pub fn in_flight(&self) -> bool {
        self.phase != Phase::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// User-initiated; bypasses the spacing guard, not the in-flight guard.
    Manual,
    /// Interval timer or other programmatic repeat; fully guarded.
    Scheduled,
    /// Hidden-to-visible catch-up; bypasses the spacing guard.
    CatchUp,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub window_points: usize,
    pub min_spacing: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            window_points: DEFAULT_WINDOW_POINTS,
            min_spacing: DEFAULT_MIN_SPACING,
        }
    }
}

struct Control {
    in_flight: bool,
    last_accepted: Option<Instant>,
    visible: bool,
    disposed: bool,
    settings: RefreshSettings,
    engine: Option<EngineHandle>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

struct Inner {
    fetcher: Arc<dyn MetricsSource>,
    auth: Arc<dyn AuthContext>,
    store: SettingsStore,
    user_id: String,
    config: CoordinatorConfig,
    state_tx: watch::Sender<DashboardState>,
    ctl: Mutex<Control>,
}

impl Inner {
    fn ctl(&self) -> MutexGuard<'_, Control> {
        self.ctl.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All state writes go through here; nothing is published once the
    /// coordinator is disposed. The control lock is held across the publish
    /// so disposal cannot race a late completion.
    fn publish(&self, f: impl FnOnce(&mut DashboardState)) {
        let ctl = self.ctl();
        if ctl.disposed {
            return;
        }
        self.state_tx.send_modify(f);
        drop(ctl);
    }

    /// Ends the current cycle with an error; prior data stays visible.
    fn finish_with_error(&self, e: DashboardError) {
        warn!(error = %e, "refresh cycle failed");
        let mut ctl = self.ctl();
        ctl.in_flight = false;
        if ctl.disposed {
            return;
        }
        self.state_tx.send_modify(|s| {
            s.phase = Phase::Idle;
            s.last_error = Some(e);
        });
    }
}

pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Loads the user's refresh settings and arms the auto-refresh timer if
    /// they enable it. Must be called on a tokio runtime.
    pub fn new(
        fetcher: Arc<dyn MetricsSource>,
        auth: Arc<dyn AuthContext>,
        store: SettingsStore,
        user_id: impl Into<String>,
        config: CoordinatorConfig,
    ) -> Self {
        let user_id = user_id.into();
        let settings = store.load(&user_id);
        let (state_tx, _) = watch::channel(DashboardState::default());
        let inner = Arc::new(Inner {
            fetcher,
            auth,
            store,
            user_id,
            config,
            state_tx,
            ctl: Mutex::new(Control {
                in_flight: false,
                last_accepted: None,
                visible: true,
                disposed: false,
                settings,
                engine: None,
                timer: None,
            }),
        });
        {
            let mut ctl = inner.ctl();
            rearm_timer(&inner, &mut ctl);
        }
        Self { inner }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.ctl().settings.clone()
    }

    /// Requests one fetch+aggregate cycle. Never fails synchronously; a
    /// dropped trigger is observable only as the absence of a state change.
    pub fn trigger(&self, manual: bool) {
        let origin = if manual {
            Origin::Manual
        } else {
            Origin::Scheduled
        };
        trigger_from(&self.inner, origin);
    }

    /// Persists new settings and re-arms the timer with the new interval.
    /// Disabling cancels the pending timer immediately; enabling arms a
    /// fresh one without triggering an immediate cycle.
    pub fn update_settings(&self, settings: RefreshSettings) -> anyhow::Result<()> {
        self.inner.store.save(&self.inner.user_id, &settings)?;
        self.apply_settings(settings);
        Ok(())
    }

    /// Clears the persisted preference and reverts to the default.
    pub fn reset_settings(&self) -> anyhow::Result<()> {
        self.inner.store.clear(&self.inner.user_id)?;
        self.apply_settings(RefreshSettings::default());
        Ok(())
    }

    /// Surface visibility. A scheduled fire while hidden is suppressed; the
    /// hidden-to-visible transition issues an immediate catch-up trigger.
    pub fn set_visible(&self, visible: bool) {
        let was_visible = {
            let mut ctl = self.inner.ctl();
            if ctl.disposed {
                return;
            }
            std::mem::replace(&mut ctl.visible, visible)
        };
        if visible && !was_visible {
            trigger_from(&self.inner, Origin::CatchUp);
        }
    }

    /// Stops the timer, tears down the engine task, and prevents any further
    /// state writes. A cycle still in flight becomes a no-op when it settles.
    pub fn dispose(&self) {
        let mut ctl = self.inner.ctl();
        if ctl.disposed {
            return;
        }
        ctl.disposed = true;
        if let Some(timer) = ctl.timer.take() {
            timer.abort();
        }
        // Shut the task down even if an in-flight cycle still holds a clone
        // of the handle.
        if let Some(engine) = ctl.engine.take() {
            engine.shutdown();
        }
        debug!("coordinator disposed");
    }

    fn apply_settings(&self, settings: RefreshSettings) {
        let mut ctl = self.inner.ctl();
        if ctl.disposed {
            return;
        }
        ctl.settings = settings;
        rearm_timer(&self.inner, &mut ctl);
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Aborts any pending timer and arms a fresh one from the current settings.
fn rearm_timer(inner: &Arc<Inner>, ctl: &mut Control) {
    if let Some(timer) = ctl.timer.take() {
        timer.abort();
    }
    if !ctl.settings.enabled {
        return;
    }
    let period = Duration::from_secs(u64::from(ctl.settings.interval_minutes) * 60);
    let inner = inner.clone();
    ctl.timer = Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let visible = {
                let ctl = inner.ctl();
                if ctl.disposed {
                    return;
                }
                ctl.visible
            };
            if !visible {
                debug!("scheduled refresh suppressed while hidden");
                continue;
            }
            trigger_from(&inner, Origin::Scheduled);
        }
    }));
}

fn trigger_from(inner: &Arc<Inner>, origin: Origin) {
    {
        let mut ctl = inner.ctl();
        if ctl.disposed {
            return;
        }
        if ctl.in_flight {
            debug!(?origin, "trigger dropped: cycle already in flight");
            return;
        }
        if origin == Origin::Scheduled
            && let Some(last) = ctl.last_accepted
            && last.elapsed() < inner.config.min_spacing
        {
            debug!("trigger dropped: inside minimum spacing");
            return;
        }
        ctl.in_flight = true;
        ctl.last_accepted = Some(Instant::now());
    }
    let inner = inner.clone();
    tokio::spawn(async move {
        run_cycle(inner).await;
    });
}

async fn run_cycle(inner: Arc<Inner>) {
    inner.publish(|s| {
        s.phase = Phase::Fetching;
        s.progress = 0;
    });

    let token = inner.auth.token().unwrap_or_default();
    let samples = match inner.fetcher.fetch(&token).await {
        Ok(samples) => samples,
        Err(e) => {
            if e.is_auth() {
                inner.auth.force_logout();
            }
            inner.finish_with_error(e);
            return;
        }
    };

    inner.publish(|s| s.phase = Phase::Aggregating);

    match aggregate(&inner, samples).await {
        Ok(data) => {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let mut ctl = inner.ctl();
            ctl.in_flight = false;
            if ctl.disposed {
                return;
            }
            inner.state_tx.send_modify(move |s| {
                s.phase = Phase::Idle;
                s.progress = 100;
                s.data = Some(Arc::new(data));
                s.last_success_at = Some(now_ms);
                s.last_error = None;
            });
        }
        Err(e) => inner.finish_with_error(e),
    }
}

/// Hands the batch to the engine and follows the reply stream. A dead engine
/// is recreated once; a second failure surfaces as a fatal error.
async fn aggregate(
    inner: &Arc<Inner>,
    samples: Vec<RawMetricSample>,
) -> Result<ProcessedDashboardData, DashboardError> {
    let window = inner.config.window_points;
    let mut reply = match request(inner, samples.clone(), window).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "engine unavailable; recreating once");
            {
                let mut ctl = inner.ctl();
                if ctl.disposed {
                    return Err(DashboardError::EngineFatal(
                        "coordinator disposed".to_string(),
                    ));
                }
                ctl.engine = Some(EngineHandle::spawn());
            }
            request(inner, samples, window).await?
        }
    };

    loop {
        match reply.recv().await {
            Some(EngineMessage::ProgressUpdate { progress }) => {
                inner.publish(|s| s.progress = progress);
            }
            Some(EngineMessage::ProcessedData { data }) => return Ok(data),
            Some(EngineMessage::ProcessError { error }) => {
                return Err(DashboardError::Processing(error));
            }
            Some(_) => debug!("unexpected envelope on reply stream; ignored"),
            // Stream ended without a terminal: engine torn down mid-cycle.
            None => {
                return Err(DashboardError::EngineFatal(
                    "engine shut down mid-cycle".to_string(),
                ));
            }
        }
    }
}

/// Creates the engine task on first use and posts one request. A dead engine
/// is NOT replaced here; `aggregate` owns the single recreation retry.
async fn request(
    inner: &Arc<Inner>,
    samples: Vec<RawMetricSample>,
    window: usize,
) -> Result<tokio::sync::mpsc::Receiver<EngineMessage>, DashboardError> {
    let engine = {
        let mut ctl = inner.ctl();
        if ctl.disposed {
            return Err(DashboardError::EngineFatal(
                "coordinator disposed".to_string(),
            ));
        }
        ctl.engine.get_or_insert_with(EngineHandle::spawn).clone()
    };
    engine.request(samples, window).await
}

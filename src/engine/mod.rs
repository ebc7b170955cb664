//! Engine: lifecycle coordination over the capture backend and signal chain
//!
//! Exactly one engine instance is active per context; the handle is
//! explicitly owned and passed around, never a shared global. All state
//! transitions, device switches, and graph rebuilds are serialized through
//! one operation lock, so no two start/stop/rebuild sequences ever
//! interleave. A `stop()` issued while `start()` is in flight waits for the
//! operation lock and then tears the fresh context down.

pub mod background;
pub mod lifecycle;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audio::backend::{
    AudioContext, CaptureBackend, CaptureConstraints, ContextState,
};
use crate::audio::device::{is_headset_label, DeviceRegistry};
use crate::config::ProcessingConfig;
use crate::constants::{DEVICE_SETTLE_MS, MONITOR_TICK_MS, TIMER_TICK_MS};
use crate::error::Result;
use crate::graph::{shared_chain, ChainTopology, SharedChain};
use crate::status::{
    AnalyticsHook, NullAnalytics, Severity, SharedAnalyticsHook, SharedStatusSink,
};

use background::{BackgroundCoordinator, BackgroundMessage, BackgroundReaction};
use lifecycle::{
    resume_with_backoff, Clock, ResumeAttempts, ResumeOutcome, TokioClock, Visibility,
};

pub use lifecycle::EngineState;

struct TimerHandle {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// State behind the engine's single operation lock
struct EngineInner {
    state: EngineState,
    config: ProcessingConfig,
    chain: SharedChain,
    context: Option<Box<dyn AudioContext>>,
    registry: DeviceRegistry,
    attempts: ResumeAttempts,
    /// The context went quiet because the page left the foreground, not
    /// because of an error. Informational; cleared on stop and resume.
    suspended_by_background: bool,
    /// A capture stream has been opened successfully at least once this
    /// session (labels and device switching are meaningless before that)
    has_captured: bool,
    timer: Option<TimerHandle>,
}

/// Delayed-auditory-feedback engine.
///
/// Public operations resolve without throwing on expected failure paths;
/// failures are classified and reported through the [`StatusSink`]
/// (permission denied, unsupported platform, needs-user-gesture, device
/// unavailable) rather than surfaced as errors to arbitrary callers.
///
/// [`StatusSink`]: crate::status::StatusSink
pub struct Engine {
    backend: Arc<dyn CaptureBackend>,
    status: SharedStatusSink,
    analytics: SharedAnalyticsHook,
    clock: Arc<dyn Clock>,
    background: BackgroundCoordinator,
    constraints: CaptureConstraints,
    inner: Mutex<EngineInner>,
    rebuild_count: AtomicU64,
    visible: AtomicBool,
}

impl Engine {
    pub fn new(backend: Arc<dyn CaptureBackend>, status: SharedStatusSink) -> Self {
        let constraints = CaptureConstraints::default();
        let chain = shared_chain(constraints.sample_rate);
        Self {
            backend,
            status,
            analytics: Arc::new(NullAnalytics),
            clock: Arc::new(TokioClock),
            background: BackgroundCoordinator::disabled(),
            constraints,
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                config: ProcessingConfig::default(),
                chain,
                context: None,
                registry: DeviceRegistry::new(),
                attempts: ResumeAttempts::default(),
                suspended_by_background: false,
                has_captured: false,
                timer: None,
            }),
            rebuild_count: AtomicU64::new(0),
            visible: AtomicBool::new(true),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsHook>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_background(mut self, coordinator: BackgroundCoordinator) -> Self {
        self.background = coordinator;
        self
    }

    pub fn with_config(mut self, config: ProcessingConfig) -> Self {
        self.inner.get_mut().config = config;
        self
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.inner.get_mut().chain = shared_chain(constraints.sample_rate);
        self.constraints = constraints;
        self
    }

    /// Current lifecycle state
    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.state
    }

    /// Current processing configuration
    pub async fn config(&self) -> ProcessingConfig {
        self.inner.lock().await.config
    }

    /// Structural snapshot of the live chain, if built
    pub async fn chain_topology(&self) -> Option<ChainTopology> {
        self.inner.lock().await.chain.lock().topology()
    }

    /// Number of full graph rebuilds performed since construction
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count.load(Ordering::SeqCst)
    }

    /// Known capture devices, in registry order
    pub async fn devices(&self) -> Vec<crate::audio::device::DeviceDescriptor> {
        self.inner.lock().await.registry.devices().to_vec()
    }

    // -- lifecycle ----------------------------------------------------------

    /// Acquires the microphone, builds the signal graph, and starts
    /// feedback playback
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner, None).await
    }

    /// Stops capture, tears down the graph, and releases the context.
    /// Idempotent; a no-op on a never-started engine.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    async fn start_locked(
        &self,
        inner: &mut EngineInner,
        device_override: Option<String>,
    ) -> Result<()> {
        match inner.state {
            EngineState::Idle | EngineState::Failed => {}
            EngineState::Running | EngineState::Suspended | EngineState::Acquiring => {
                self.status
                    .report_status("Audio is already running", Severity::Info);
                return Ok(());
            }
            EngineState::Stopping => return Ok(()),
        }

        inner.state = EngineState::Acquiring;

        // Best-effort registry refresh; enumeration failure is not fatal
        // to a start on the default device
        match self.backend.enumerate() {
            Ok(devices) => inner.registry.refresh(devices),
            Err(e) => tracing::debug!("device enumeration failed: {}", e),
        }

        let mut device_id = device_override
            .or_else(|| inner.registry.active_id().map(str::to_string))
            .or_else(|| inner.registry.preferred().map(|d| d.id.clone()));

        inner.chain.lock().build(&inner.config);

        let mut opened = self.backend.open(
            device_id.as_deref(),
            &self.constraints,
            inner.chain.clone(),
        );

        // A vanished or busy selected device falls back to the platform
        // default instead of failing the whole start
        if opened.is_err() && device_id.is_some() {
            self.status.report_status(
                "Selected microphone unavailable, using default",
                Severity::Warning,
            );
            // The requested device is no longer what is open; the active
            // selection must not point at it
            inner.registry.clear_active();
            device_id = None;
            opened = self
                .backend
                .open(None, &self.constraints, inner.chain.clone());
        }

        match opened {
            Ok(context) => {
                let label = context.device_label().to_string();
                let headset = is_headset_label(&label);
                if let Some(id) = &device_id {
                    if inner.registry.contains(id) {
                        inner.registry.set_active(id);
                    }
                }
                inner.context = Some(context);
                inner.attempts.reset();
                inner.suspended_by_background = false;
                inner.has_captured = true;
                inner.state = EngineState::Running;
                self.start_timer(inner);

                self.status
                    .report_status("Feedback running", Severity::Success);
                self.status.report_device_info(&label, headset);
                self.emit(
                    "engine_start",
                    serde_json::json!({
                        "delay_ms": inner.config.delay_ms(),
                        "gain": inner.config.gain(),
                        "headset": headset,
                    }),
                );
                self.background.publish_audio_state(true);
                Ok(())
            }
            Err(e) => {
                inner.chain.lock().teardown();
                inner.state = EngineState::Failed;
                self.report_start_failure(&e);
                self.emit(
                    "engine_start_failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
                Ok(())
            }
        }
    }

    async fn stop_locked(&self, inner: &mut EngineInner) -> Result<()> {
        if inner.state == EngineState::Idle {
            return Ok(());
        }
        inner.state = EngineState::Stopping;
        self.stop_timer(inner);

        // Best-effort teardown: shutdown errors are logged and swallowed so
        // cleanup always runs to completion
        if let Some(mut context) = inner.context.take() {
            if let Err(e) = context.close() {
                tracing::warn!("shutdown error during stop: {}", e);
            }
        }
        inner.chain.lock().teardown();
        inner.suspended_by_background = false;
        inner.attempts.reset();
        inner.state = EngineState::Idle;

        self.status.report_status("Stopped", Severity::Info);
        self.emit("engine_stop", serde_json::json!({}));
        self.background.publish_audio_state(false);
        Ok(())
    }

    fn report_start_failure(&self, error: &crate::error::AudioError) {
        use crate::error::AudioError;
        let (message, severity) = match error {
            AudioError::PermissionDenied(_) => (
                "Microphone access is required - please allow it and try again",
                Severity::Error,
            ),
            AudioError::UnsupportedPlatform(_) => (
                "Audio is not supported here - try updating your browser or system",
                Severity::Error,
            ),
            _ => ("Could not start audio", Severity::Error),
        };
        self.status.report_status(message, severity);
    }

    // -- parameter updates --------------------------------------------------

    /// Sets the feedback delay in milliseconds (clamped to 0..=500)
    pub async fn update_delay(&self, delay_ms: f32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let new = inner.config.with_delay_ms(delay_ms);
        self.apply_config_locked(&mut inner, new);
        Ok(())
    }

    /// Sets the linear gain multiplier (clamped to 0..=20)
    pub async fn update_gain(&self, gain: f32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let new = inner.config.with_gain(gain);
        self.apply_config_locked(&mut inner, new);
        Ok(())
    }

    /// Sets noise-reduction strength in percent; `None` or 0 disables it
    pub async fn update_noise_reduction(&self, percent: Option<f32>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let new = inner.config.with_noise_reduction(percent);
        self.apply_config_locked(&mut inner, new);
        Ok(())
    }

    /// Pitch shifting is reserved and unimplemented; reports a hint instead
    pub async fn update_pitch(&self, _semitones: f32) -> Result<()> {
        self.status
            .report_status("Pitch shifting is not available yet", Severity::Warning);
        Ok(())
    }

    /// Applies a replacement config. Rebuilds the graph only when the change
    /// crosses a mode boundary; otherwise adjusts stage parameters in place.
    fn apply_config_locked(&self, inner: &mut EngineInner, new: ProcessingConfig) {
        let mut chain = inner.chain.lock();
        if chain.is_built() {
            if chain.needs_rebuild(&new) {
                chain.rebuild(&new);
                self.rebuild_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(mode = ?chain.mode(), "graph rebuilt");
            } else {
                chain.apply_parameters(&new);
            }
        }
        drop(chain);
        inner.config = new;
    }

    // -- device management --------------------------------------------------

    /// Switches capture to the given device, preserving the current config.
    /// While running this performs a full stop, settle delay, start cycle so
    /// the previous device is fully released before the new one opens.
    pub async fn select_device(&self, device_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.registry.contains(device_id) {
            if let Ok(devices) = self.backend.enumerate() {
                inner.registry.refresh(devices);
            }
        }
        if !inner.registry.contains(device_id) {
            self.status
                .report_status("That microphone is no longer available", Severity::Warning);
            return Ok(());
        }

        inner.registry.set_active(device_id);
        let id = device_id.to_string();
        self.switch_locked(&mut inner, id).await
    }

    /// Rotates to the next known capture device
    pub async fn cycle_device(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if !inner.has_captured {
            self.status.report_status(
                "Start audio once before switching microphones",
                Severity::Info,
            );
            return Ok(());
        }
        let Some(next) = inner.registry.cycle_next() else {
            self.status.report_status(
                "Connect another microphone to switch",
                Severity::Info,
            );
            return Ok(());
        };
        let id = next.id.clone();
        self.switch_locked(&mut inner, id).await
    }

    async fn switch_locked(&self, inner: &mut EngineInner, device_id: String) -> Result<()> {
        let was_running = matches!(
            inner.state,
            EngineState::Running | EngineState::Suspended
        );
        if !was_running {
            self.status
                .report_status("Microphone selected", Severity::Info);
            return Ok(());
        }

        let config = inner.config;
        self.stop_locked(inner).await?;
        // Let the platform release the old device before opening the new
        // one; holding two microphones fails on many systems
        self.clock
            .sleep(Duration::from_millis(DEVICE_SETTLE_MS))
            .await;
        inner.config = config;
        self.start_locked(inner, Some(device_id)).await?;
        self.emit("device_switch", serde_json::json!({}));
        Ok(())
    }

    /// Platform device-change notification. Re-enumerates only while the
    /// engine is actively running; spurious changes while idle are ignored
    /// so no permission prompt is triggered.
    pub async fn on_devices_changed(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != EngineState::Running {
            return Ok(());
        }

        let had_active = inner.registry.active_id().map(str::to_string);
        match self.backend.enumerate() {
            Ok(devices) => inner.registry.refresh(devices),
            Err(e) => {
                tracing::debug!("re-enumeration failed: {}", e);
                return Ok(());
            }
        }

        // Active device vanished: fall back to the default rather than fail
        if let Some(id) = had_active {
            if !inner.registry.contains(&id) {
                self.status.report_status(
                    "Microphone disconnected, switching to another microphone",
                    Severity::Warning,
                );
                let config = inner.config;
                self.stop_locked(&mut inner).await?;
                self.clock
                    .sleep(Duration::from_millis(DEVICE_SETTLE_MS))
                    .await;
                inner.config = config;
                self.start_locked(&mut inner, None).await?;
            }
        }
        Ok(())
    }

    // -- visibility, suspension, background ---------------------------------

    /// Host notification that the page/tab visibility changed
    pub async fn handle_visibility(&self, visibility: Visibility) -> Result<()> {
        self.background.publish_visibility(visibility);
        match visibility {
            Visibility::Hidden => {
                self.visible.store(false, Ordering::SeqCst);
                let mut inner = self.inner.lock().await;
                if inner.state == EngineState::Running {
                    inner.suspended_by_background = true;
                }
                Ok(())
            }
            Visibility::Visible => {
                self.visible.store(true, Ordering::SeqCst);
                self.check_suspended().await
            }
        }
    }

    /// Host notification that the page was frozen by the OS
    pub async fn handle_freeze(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == EngineState::Running {
            inner.suspended_by_background = true;
        }
        Ok(())
    }

    /// Host notification that the page thawed after a freeze
    pub async fn handle_thaw(&self) -> Result<()> {
        self.check_suspended().await
    }

    /// Routes a message from the background channel
    pub async fn handle_background_message(&self, message: BackgroundMessage) -> Result<()> {
        match self.background.handle_incoming(&message) {
            BackgroundReaction::ApplyVisibility(v) => self.handle_visibility(v).await,
            BackgroundReaction::Reply(_) | BackgroundReaction::None => Ok(()),
        }
    }

    /// Suspend-detection check: if the context auto-suspended while the
    /// engine should be running and the page is visible, runs the bounded
    /// resume protocol
    pub async fn check_suspended(&self) -> Result<()> {
        if !self.visible.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state,
            EngineState::Running | EngineState::Suspended
        ) {
            return Ok(());
        }

        let suspended = inner
            .context
            .as_ref()
            .map(|c| c.state() == ContextState::Suspended)
            .unwrap_or(false);
        if !suspended {
            return Ok(());
        }

        if inner.attempts.is_exhausted() {
            // Already reported; recovery now needs a user gesture
            return Ok(());
        }

        inner.state = EngineState::Suspended;
        self.status
            .report_status("Audio paused by the system, recovering", Severity::Warning);

        let EngineInner {
            context, attempts, ..
        } = &mut *inner;
        let Some(context) = context else {
            return Ok(());
        };
        let outcome = resume_with_backoff(
            context.as_mut(),
            attempts,
            self.clock.as_ref(),
            |attempt| {
                self.emit(
                    "resume_attempt",
                    serde_json::json!({ "attempt": attempt }),
                );
            },
        )
        .await;

        match outcome {
            ResumeOutcome::Resumed => {
                inner.state = EngineState::Running;
                inner.suspended_by_background = false;
                self.status.report_status("Audio resumed", Severity::Success);
            }
            ResumeOutcome::NeedsUserGesture => {
                self.status
                    .report_status("Tap to resume audio", Severity::Warning);
            }
        }
        Ok(())
    }

    /// A user gesture arrived; gives a gesture-gated context one more
    /// resume attempt and restarts automatic recovery on success
    pub async fn user_gesture(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != EngineState::Suspended {
            return Ok(());
        }
        let Some(context) = inner.context.as_mut() else {
            return Ok(());
        };
        match context.resume() {
            Ok(()) => {
                inner.attempts.reset();
                inner.state = EngineState::Running;
                self.status.report_status("Audio resumed", Severity::Success);
            }
            Err(e) => {
                tracing::debug!("gesture resume failed: {}", e);
                self.status
                    .report_status("Still unable to resume audio", Severity::Error);
            }
        }
        Ok(())
    }

    /// Spawns the periodic suspend-detection observer
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(MONITOR_TICK_MS));
            loop {
                interval.tick().await;
                let _ = engine.check_suspended().await;
            }
        })
    }

    // -- helpers ------------------------------------------------------------

    fn start_timer(&self, inner: &mut EngineInner) {
        self.stop_timer(inner);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let status = self.status.clone();
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut interval = tokio::time::interval(Duration::from_millis(TIMER_TICK_MS));
            interval.tick().await;
            while flag.load(Ordering::SeqCst) {
                interval.tick().await;
                status.report_timer(started.elapsed().as_secs());
            }
        });
        inner.timer = Some(TimerHandle { running, handle });
    }

    fn stop_timer(&self, inner: &mut EngineInner) {
        if let Some(timer) = inner.timer.take() {
            timer.running.store(false, Ordering::SeqCst);
            timer.handle.abort();
        }
    }

    /// Best-effort analytics; hook panics must never affect audio
    fn emit(&self, event: &str, params: serde_json::Value) {
        let analytics = self.analytics.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            analytics.emit(event, params);
        }));
        if result.is_err() {
            tracing::debug!("analytics hook panicked for event {}", event);
        }
    }
}

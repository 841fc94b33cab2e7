//! # Location Ingestion
//!
//! Turns raw platform fixes into [`LocationSample`]s.
//!
//! The platform location source is abstracted behind [`LocationProvider`].
//! [`LocationWatcher`] owns at most one live subscription at a time, wraps
//! every platform call, and reports failures through callbacks and boolean
//! results instead of propagating them.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::config::BACKGROUND_TASK_NAME;
use crate::{Clock, LocationSample, Result, TrackingError, TrackerConfig};

// ============================================================================
// Platform contract
// ============================================================================

/// Result of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// What the app may do after asking for permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PermissionLevel {
    /// No location access; tracking is disabled
    Denied,
    /// Foreground capture only
    ForegroundOnly,
    /// Foreground and background capture
    Background,
}

/// Parameters of a location subscription.
///
/// Every subscription asks the platform for its highest accuracy tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchRequest {
    pub interval_ms: u32,
    /// 0 delivers every time-based tick regardless of movement
    pub distance_filter_m: f64,
}

impl WatchRequest {
    /// High-accuracy continuous stream with distance filtering disabled.
    pub fn foreground(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            distance_filter_m: 0.0,
        }
    }

    pub fn background(config: &TrackerConfig) -> Self {
        Self {
            interval_ms: config.background_interval_ms,
            distance_filter_m: config.background_distance_filter_m,
        }
    }
}

/// A fix as reported by the platform. Optional fields may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: Option<i64>,
}

impl RawFix {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Self::default()
        }
    }
}

pub type FixCallback = Box<dyn FnMut(RawFix) + Send>;
pub type ProviderErrorCallback = Box<dyn FnMut(TrackingError) + Send>;

/// Handle to a live platform subscription.
pub trait Subscription: Send {
    /// Stop delivery. Must be safe to call more than once.
    fn cancel(&mut self);
}

/// Platform location source.
pub trait LocationProvider: Send {
    fn request_foreground_permission(&mut self) -> Result<PermissionStatus>;

    /// Optional capability; platforms without background delivery deny.
    fn request_background_permission(&mut self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Denied)
    }

    fn background_permission(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Denied)
    }

    /// Start a continuous stream of fixes.
    fn watch(
        &mut self,
        request: WatchRequest,
        on_fix: FixCallback,
        on_error: ProviderErrorCallback,
    ) -> Result<Box<dyn Subscription>>;

    /// One-shot high-accuracy fix.
    fn current_fix(&mut self) -> Result<Option<RawFix>>;

    /// Cached fix, if the platform has one.
    fn last_known_fix(&mut self) -> Result<Option<RawFix>> {
        Ok(None)
    }

    fn start_background_updates(&mut self, _task: &str, _request: WatchRequest) -> Result<()> {
        Err(TrackingError::provider("background updates not supported"))
    }

    fn stop_background_updates(&mut self, _task: &str) -> Result<()> {
        Ok(())
    }

    fn is_background_task_registered(&self, _task: &str) -> Result<bool> {
        Ok(false)
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Convert a raw fix into a canonical sample.
///
/// Missing or degenerate motion fields become 0, a missing timestamp
/// becomes `now_ms`. Fixes without a usable position are rejected.
pub fn normalize(raw: &RawFix, now_ms: i64) -> Result<LocationSample> {
    let sample = LocationSample::new(raw.latitude, raw.longitude, raw.timestamp.unwrap_or(now_ms));
    if !sample.is_valid() {
        return Err(TrackingError::provider(format!(
            "Rejected fix with invalid coordinates ({}, {})",
            raw.latitude, raw.longitude
        )));
    }

    Ok(sample
        .with_altitude(finite_or_zero(raw.altitude))
        .with_speed(non_negative_or_zero(raw.speed))
        .with_accuracy(non_negative_or_zero(raw.accuracy))
        .with_heading(normalize_heading(raw.heading)))
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn non_negative_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0)
}

fn normalize_heading(value: Option<f64>) -> f64 {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.rem_euclid(360.0))
        .unwrap_or(0.0)
}

// ============================================================================
// Watcher
// ============================================================================

type SharedErrorSink = Arc<Mutex<Box<dyn FnMut(String) + Send>>>;

fn report(sink: &SharedErrorSink, message: String) {
    if let Ok(mut cb) = sink.lock() {
        cb(message);
    }
}

/// Owns the live location subscription.
pub struct LocationWatcher<P: LocationProvider> {
    provider: P,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    subscription: Option<Box<dyn Subscription>>,
    background_active: bool,
}

impl<P: LocationProvider> LocationWatcher<P> {
    pub fn new(provider: P, clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        Self {
            provider,
            clock,
            config,
            subscription: None,
            background_active: false,
        }
    }

    /// Request foreground then background permission.
    ///
    /// A refused background request degrades to foreground-only capture.
    pub fn request_permissions(&mut self) -> PermissionLevel {
        match self.provider.request_foreground_permission() {
            Ok(PermissionStatus::Granted) => {}
            Ok(PermissionStatus::Denied) => {
                warn!("[LocationWatcher] Foreground location permission denied");
                return PermissionLevel::Denied;
            }
            Err(e) => {
                warn!("[LocationWatcher] Permission error: {}", e);
                return PermissionLevel::Denied;
            }
        }

        match self.provider.request_background_permission() {
            Ok(PermissionStatus::Granted) => PermissionLevel::Background,
            Ok(PermissionStatus::Denied) => {
                warn!("[LocationWatcher] Background location permission not granted");
                PermissionLevel::ForegroundOnly
            }
            Err(e) => {
                warn!("[LocationWatcher] Background permission error: {}", e);
                PermissionLevel::ForegroundOnly
            }
        }
    }

    /// Subscribe to the location stream, replacing any prior subscription.
    ///
    /// Every fix is normalized before reaching `on_sample`. Rejected fixes and
    /// stream failures go to `on_error`. Returns whether the subscription
    /// was established.
    pub fn start_watching<F, E>(&mut self, on_sample: F, on_error: E, interval_ms: u32) -> bool
    where
        F: FnMut(LocationSample) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        self.stop_watching();

        let errors: SharedErrorSink = Arc::new(Mutex::new(Box::new(on_error)));
        let mut on_sample = on_sample;
        let clock = Arc::clone(&self.clock);
        let threshold = self.config.accuracy_threshold_m;
        let fix_errors = Arc::clone(&errors);

        let on_fix: FixCallback = Box::new(move |raw: RawFix| {
            match normalize(&raw, clock.now_ms()) {
                Ok(sample) => {
                    if sample.accuracy > threshold {
                        debug!(
                            "[LocationWatcher] Low accuracy fix: ±{:.1}m",
                            sample.accuracy
                        );
                    }
                    on_sample(sample);
                }
                Err(e) => report(&fix_errors, e.to_string()),
            }
        });

        let stream_errors = Arc::clone(&errors);
        let on_stream_error: ProviderErrorCallback = Box::new(move |e: TrackingError| {
            warn!("[LocationWatcher] Stream error: {}", e);
            report(&stream_errors, format!("Location stream error: {}", e));
        });

        match self
            .provider
            .watch(WatchRequest::foreground(interval_ms), on_fix, on_stream_error)
        {
            Ok(subscription) => {
                info!("[LocationWatcher] Watching location every {}ms", interval_ms);
                self.subscription = Some(subscription);
                true
            }
            Err(e) => {
                warn!("[LocationWatcher] Start watching error: {}", e);
                report(&errors, format!("Failed to start location tracking: {}", e));
                false
            }
        }
    }

    /// Cancel the live subscription. No-op when none exists.
    pub fn stop_watching(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            debug!("[LocationWatcher] Stopped watching");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// One-shot fix, or `None` if the platform fails or has nothing.
    pub fn get_current_location(&mut self) -> Option<LocationSample> {
        let now = self.clock.now_ms();
        match self.provider.current_fix() {
            Ok(Some(raw)) => normalize(&raw, now)
                .map_err(|e| warn!("[LocationWatcher] Current location rejected: {}", e))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("[LocationWatcher] Get current location error: {}", e);
                None
            }
        }
    }

    /// The platform's cached fix, if any.
    pub fn get_last_known_location(&mut self) -> Option<LocationSample> {
        let now = self.clock.now_ms();
        match self.provider.last_known_fix() {
            Ok(Some(raw)) => normalize(&raw, now).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("[LocationWatcher] Get last known location error: {}", e);
                None
            }
        }
    }

    /// Ask the platform to keep delivering fixes to the background task.
    pub fn start_background_tracking(&mut self) -> bool {
        match self.provider.background_permission() {
            Ok(PermissionStatus::Granted) => {}
            _ => {
                warn!("[LocationWatcher] Background location permission not granted");
                return false;
            }
        }

        match self.provider.is_background_task_registered(BACKGROUND_TASK_NAME) {
            Ok(true) => {
                info!("[LocationWatcher] Background location task already registered");
                self.background_active = true;
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("[LocationWatcher] Background task query failed: {}", e);
                return false;
            }
        }

        let request = WatchRequest::background(&self.config);
        match self
            .provider
            .start_background_updates(BACKGROUND_TASK_NAME, request)
        {
            Ok(()) => {
                info!("[LocationWatcher] Background location tracking started");
                self.background_active = true;
                true
            }
            Err(e) => {
                warn!("[LocationWatcher] Start background tracking error: {}", e);
                false
            }
        }
    }

    pub fn stop_background_tracking(&mut self) {
        match self.provider.is_background_task_registered(BACKGROUND_TASK_NAME) {
            Ok(true) => {
                if let Err(e) = self.provider.stop_background_updates(BACKGROUND_TASK_NAME) {
                    warn!("[LocationWatcher] Stop background tracking error: {}", e);
                } else {
                    info!("[LocationWatcher] Background location tracking stopped");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("[LocationWatcher] Background task query failed: {}", e),
        }
        self.background_active = false;
    }

    pub fn is_background_tracking_active(&self) -> bool {
        self.background_active
    }

    /// Stop both delivery paths.
    pub fn cleanup(&mut self) {
        self.stop_watching();
        self.stop_background_tracking();
    }
}

impl<P: LocationProvider> Drop for LocationWatcher<P> {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

// ============================================================================
// Scripted provider (tests and synthetic runs)
// ============================================================================

#[cfg(any(test, feature = "synthetic"))]
pub mod scripted {
    //! In-process [`LocationProvider`] driven by test code.

    use super::*;

    #[derive(Default)]
    struct Inner {
        foreground: Option<PermissionStatus>,
        background: Option<PermissionStatus>,
        watch_failure: Option<String>,
        current: Option<RawFix>,
        last_known: Option<RawFix>,
        background_registered: bool,
        next_id: u64,
        active_id: Option<u64>,
        on_fix: Option<FixCallback>,
        on_error: Option<ProviderErrorCallback>,
        requests: Vec<WatchRequest>,
    }

    /// A provider whose fixes are pushed by the caller.
    #[derive(Clone, Default)]
    pub struct ScriptedProvider {
        inner: Arc<Mutex<Inner>>,
    }

    struct ScriptedSubscription {
        id: u64,
        inner: Arc<Mutex<Inner>>,
    }

    impl Subscription for ScriptedSubscription {
        fn cancel(&mut self) {
            if let Ok(mut inner) = self.inner.lock() {
                if inner.active_id == Some(self.id) {
                    inner.active_id = None;
                    inner.on_fix = None;
                    inner.on_error = None;
                }
            }
        }
    }

    impl ScriptedProvider {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn grant(self, foreground: bool, background: bool) -> Self {
            {
                let mut inner = self.lock();
                inner.foreground = Some(if foreground {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                });
                inner.background = Some(if background {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                });
            }
            self
        }

        pub fn fail_watch(&self, message: Option<&str>) {
            self.lock().watch_failure = message.map(str::to_string);
        }

        pub fn set_current(&self, fix: Option<RawFix>) {
            self.lock().current = fix;
        }

        pub fn set_last_known(&self, fix: Option<RawFix>) {
            self.lock().last_known = fix;
        }

        pub fn is_subscribed(&self) -> bool {
            self.lock().active_id.is_some()
        }

        pub fn background_registered(&self) -> bool {
            self.lock().background_registered
        }

        /// Requests passed to `watch`, oldest first.
        pub fn requests(&self) -> Vec<WatchRequest> {
            self.lock().requests.clone()
        }

        /// Deliver a fix to the live subscription. Returns false if none.
        pub fn emit(&self, fix: RawFix) -> bool {
            let (id, callback) = {
                let mut inner = self.lock();
                (inner.active_id, inner.on_fix.take())
            };
            let Some(mut callback) = callback else {
                return false;
            };
            callback(fix);
            let mut inner = self.lock();
            if inner.active_id == id && inner.on_fix.is_none() {
                inner.on_fix = Some(callback);
            }
            true
        }

        /// Deliver a stream error to the live subscription.
        pub fn emit_error(&self, error: TrackingError) -> bool {
            let callback = self.lock().on_error.take();
            let Some(mut callback) = callback else {
                return false;
            };
            callback(error);
            let mut inner = self.lock();
            if inner.active_id.is_some() && inner.on_error.is_none() {
                inner.on_error = Some(callback);
            }
            true
        }
    }

    impl LocationProvider for ScriptedProvider {
        fn request_foreground_permission(&mut self) -> Result<PermissionStatus> {
            let inner = self.lock();
            inner
                .foreground
                .ok_or_else(|| TrackingError::permission("foreground request failed"))
        }

        fn request_background_permission(&mut self) -> Result<PermissionStatus> {
            Ok(self.background_permission_status())
        }

        fn background_permission(&self) -> Result<PermissionStatus> {
            Ok(self.background_permission_status())
        }

        fn watch(
            &mut self,
            request: WatchRequest,
            on_fix: FixCallback,
            on_error: ProviderErrorCallback,
        ) -> Result<Box<dyn Subscription>> {
            let mut inner = self.lock();
            inner.requests.push(request);
            if let Some(message) = &inner.watch_failure {
                return Err(TrackingError::provider(message.clone()));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.active_id = Some(id);
            inner.on_fix = Some(on_fix);
            inner.on_error = Some(on_error);
            Ok(Box::new(ScriptedSubscription {
                id,
                inner: Arc::clone(&self.inner),
            }))
        }

        fn current_fix(&mut self) -> Result<Option<RawFix>> {
            Ok(self.lock().current)
        }

        fn last_known_fix(&mut self) -> Result<Option<RawFix>> {
            Ok(self.lock().last_known)
        }

        fn start_background_updates(&mut self, _task: &str, _request: WatchRequest) -> Result<()> {
            self.lock().background_registered = true;
            Ok(())
        }

        fn stop_background_updates(&mut self, _task: &str) -> Result<()> {
            self.lock().background_registered = false;
            Ok(())
        }

        fn is_background_task_registered(&self, _task: &str) -> Result<bool> {
            Ok(self.lock().background_registered)
        }
    }

    impl ScriptedProvider {
        fn background_permission_status(&self) -> PermissionStatus {
            self.lock()
                .background
                .unwrap_or(PermissionStatus::Denied)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

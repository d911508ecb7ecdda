//! Bus alerts: a time alert that polls live times in the background and a
//! proximity alert consumed by an external geofence trigger.
//!
//! At most one alert of each kind exists at a time; arming again replaces
//! the previous one. Every arming carries a fresh token, and the only way
//! to fire a notification is to claim the persisted row while that token
//! still matches. Poll tasks, cancellation and re-arming race freely; the
//! loser of any race finds the row gone and stops without side effects.

pub mod notify;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{LiveTimes, ProximityAlert, StopPoint, TimeAlert};
use crate::providers::bustracker::LiveTimesSource;

use notify::{Notification, NotificationPreferences, NotificationSink};
use store::AlertStore;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("A time alert needs at least one service to watch")]
    NoServices,
    #[error("Proximity radius must be at least 1 m")]
    InvalidRadius,
    #[error("Database error: {0}")]
    Database(String),
}

/// Source of stop display names for notifications.
pub trait StopCatalog: Send + Sync {
    fn display_name(&self, stop_code: &str) -> Option<String>;
}

/// Catalog that knows no names; notifications fall back to stop codes.
pub struct EmptyCatalog;

impl StopCatalog for EmptyCatalog {
    fn display_name(&self, _stop_code: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub poll_interval: Duration,
    pub max_age: Duration,
    pub preferences: NotificationPreferences,
}

struct TimerState {
    time_poll: Option<JoinHandle<()>>,
}

/// Owns both alert kinds. Constructed once at startup and shared behind an
/// `Arc` by whoever needs to arm, cancel or trigger alerts.
pub struct AlertManager<S> {
    store: AlertStore,
    source: Arc<S>,
    sink: Arc<dyn NotificationSink>,
    catalog: Arc<dyn StopCatalog>,
    settings: AlertSettings,
    state: Mutex<TimerState>,
}

impl<S> AlertManager<S>
where
    S: LiveTimesSource + Send + Sync + 'static,
{
    pub fn new(
        store: AlertStore,
        source: S,
        sink: Arc<dyn NotificationSink>,
        catalog: Arc<dyn StopCatalog>,
        settings: AlertSettings,
    ) -> Self {
        Self {
            store,
            source: Arc::new(source),
            sink,
            catalog,
            settings,
            state: Mutex::new(TimerState { time_poll: None }),
        }
    }

    /// Arm a time alert, replacing any armed one.
    ///
    /// The first poll runs immediately; afterwards the owning task polls at
    /// the configured interval until the alert fires, expires or is
    /// cancelled. Returns the token of this arming.
    pub async fn arm_time_alert(
        &self,
        stop_code: &str,
        services: Vec<String>,
        trigger_minutes: u32,
    ) -> Result<Uuid, AlertError> {
        if services.is_empty() {
            return Err(AlertError::NoServices);
        }

        let alert = TimeAlert {
            stop_code: stop_code.to_string(),
            services,
            trigger_minutes,
            token: Uuid::new_v4(),
        };
        let token = alert.token;

        // The mutex serialises arm/cancel; a previous poll task may still be
        // mid-fetch, but its stale token can no longer claim anything.
        let mut state = self.state.lock().await;
        self.store.put_time_alert(&alert).await?;
        if let Some(previous) = state.time_poll.take() {
            previous.abort();
        }
        info!(
            stop = %alert.stop_code,
            services = ?alert.services,
            trigger_minutes = alert.trigger_minutes,
            "Armed time alert"
        );
        state.time_poll = Some(tokio::spawn(run_time_alert_poll(
            self.source.clone(),
            self.store.clone(),
            self.sink.clone(),
            self.settings.clone(),
            alert,
        )));
        Ok(token)
    }

    /// Cancel the armed time alert. Idempotent; returns whether one was
    /// active.
    pub async fn cancel_time_alert(&self) -> Result<bool, AlertError> {
        let mut state = self.state.lock().await;
        let removed = self.store.clear_time_alert().await?;
        if let Some(task) = state.time_poll.take() {
            task.abort();
        }
        if removed {
            info!("Cancelled time alert");
        }
        Ok(removed)
    }

    pub async fn active_time_alert(&self) -> Result<Option<TimeAlert>, AlertError> {
        self.store.active_time_alert().await
    }

    /// Arm a proximity alert, replacing any armed one. Watching the device's
    /// position is the external geofence mechanism's job; it reports entry
    /// through [`Self::proximity_triggered`].
    pub async fn arm_proximity_alert(
        &self,
        stop_code: &str,
        radius_meters: u32,
        position: StopPoint,
    ) -> Result<Uuid, AlertError> {
        if radius_meters == 0 {
            return Err(AlertError::InvalidRadius);
        }

        let alert = ProximityAlert {
            stop_code: stop_code.to_string(),
            radius_meters,
            position,
            token: Uuid::new_v4(),
        };
        self.store.put_proximity_alert(&alert).await?;
        info!(stop = %alert.stop_code, radius_meters, "Armed proximity alert");
        Ok(alert.token)
    }

    /// Report that the device entered `stop_code`'s radius. Delivers the
    /// proximity notification when that stop is being watched; a trigger for
    /// any other stop, or after a cancel, is a no-op.
    pub async fn proximity_triggered(&self, stop_code: &str) -> Result<bool, AlertError> {
        let Some(alert) = self.store.claim_proximity_alert(stop_code).await? else {
            return Ok(false);
        };

        let stop_name = self
            .catalog
            .display_name(&alert.stop_code)
            .unwrap_or_else(|| alert.stop_code.clone());
        info!(stop = %alert.stop_code, "Proximity alert fired");
        self.sink.deliver(
            Notification::Proximity {
                stop_code: alert.stop_code.clone(),
                stop_name,
                radius_meters: alert.radius_meters,
            },
            &self.settings.preferences,
        );
        Ok(true)
    }

    /// Cancel the armed proximity alert. Idempotent; returns whether one was
    /// active.
    pub async fn cancel_proximity_alert(&self) -> Result<bool, AlertError> {
        let removed = self.store.clear_proximity_alert().await?;
        if removed {
            info!("Cancelled proximity alert");
        }
        Ok(removed)
    }

    pub async fn active_proximity_alert(&self) -> Result<Option<ProximityAlert>, AlertError> {
        self.store.active_proximity_alert().await
    }
}

/// The poll task owning one arming of the time alert.
///
/// Lifetime is measured from a monotonic instant taken here, so wall-clock
/// changes cannot stretch or shrink an alert. The task never holds a lock
/// across the fetch.
async fn run_time_alert_poll<S>(
    source: Arc<S>,
    store: AlertStore,
    sink: Arc<dyn NotificationSink>,
    settings: AlertSettings,
    alert: TimeAlert,
) where
    S: LiveTimesSource + Send + Sync + 'static,
{
    let armed_at = Instant::now();
    let stops = [alert.stop_code.clone()];

    loop {
        match source.live_times(&stops, 1).await {
            Ok(times) => {
                if let Some(due) = first_due_service(&times, &alert) {
                    match store.claim_time_alert(alert.token).await {
                        Ok(Some(_)) => {
                            info!(
                                stop = %alert.stop_code,
                                service = %due.service_name,
                                minutes = due.minutes,
                                "Time alert fired"
                            );
                            sink.deliver(
                                Notification::Time {
                                    stop_code: alert.stop_code.clone(),
                                    stop_name: due.stop_name,
                                    service_name: due.service_name,
                                    minutes: due.minutes,
                                },
                                &settings.preferences,
                            );
                            return;
                        }
                        Ok(None) => {
                            // Cancelled or re-armed since this poll began.
                            debug!(stop = %alert.stop_code, "Time alert claimed elsewhere, stopping");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "Claiming time alert failed, keeping the poll alive");
                        }
                    }
                }
            }
            Err(e) if e.is_server_fault() => {
                // A fault during polling usually means a bad key or an API
                // outage; worth more than a debug line.
                warn!(stop = %alert.stop_code, error = %e, "Tracker fault during poll, will retry");
            }
            Err(e) => {
                debug!(stop = %alert.stop_code, error = %e, "Live times poll failed, will retry");
            }
        }

        if armed_at.elapsed() >= settings.max_age {
            info!(stop = %alert.stop_code, "Time alert expired without firing");
            if let Err(e) = store.claim_time_alert(alert.token).await {
                warn!(error = %e, "Removing expired time alert failed");
            }
            return;
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}

struct DueService {
    stop_name: String,
    service_name: String,
    minutes: u32,
}

/// First watched service whose next bus is within the trigger window.
///
/// Only the first listed bus of each service counts, and services are
/// examined in result order.
fn first_due_service(times: &LiveTimes, alert: &TimeAlert) -> Option<DueService> {
    let stop = times.stop(&alert.stop_code)?;

    for service in &stop.services {
        if !alert.watches(&service.service_name) {
            continue;
        }
        let Some(bus) = service.next_bus() else {
            continue;
        };
        if bus.departure_minutes <= alert.trigger_minutes {
            let stop_name = if stop.stop_name.is_empty() {
                stop.stop_code.clone()
            } else {
                stop.stop_name.clone()
            };
            return Some(DueService {
                stop_name,
                service_name: service.service_name.clone(),
                minutes: bus.departure_minutes,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::Notify;

    use crate::models::{BusArrival, ServiceTimes, StopTimes};
    use crate::providers::bustracker::BusTrackerError;

    // --- Test doubles ---

    enum Feed {
        Times(LiveTimes),
        Fail,
    }

    /// Scripted source: steps are consumed in order and the last one
    /// repeats forever.
    struct ScriptedSource {
        steps: StdMutex<VecDeque<Feed>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Feed>) -> Arc<Self> {
            Arc::new(Self {
                steps: StdMutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn next_step(&self) -> Result<LiveTimes, BusTrackerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = self.steps.lock().unwrap();
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                None
            };
            let step = step.as_ref().or_else(|| steps.front());
            match step {
                Some(Feed::Times(times)) => Ok(times.clone()),
                Some(Feed::Fail) | None => {
                    Err(BusTrackerError::Network("scripted failure".to_string()))
                }
            }
        }
    }

    impl LiveTimesSource for Arc<ScriptedSource> {
        async fn live_times(
            &self,
            _stop_codes: &[String],
            _num_departures: u32,
        ) -> Result<LiveTimes, BusTrackerError> {
            self.next_step()
        }
    }

    /// Source that blocks inside the fetch until released.
    struct GatedSource {
        gate: Notify,
        calls: AtomicUsize,
    }

    impl LiveTimesSource for Arc<GatedSource> {
        async fn live_times(
            &self,
            stop_codes: &[String],
            _num_departures: u32,
        ) -> Result<LiveTimes, BusTrackerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(times_with(&stop_codes[0], "22", 0))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: StdMutex<Vec<Notification>>,
    }

    impl RecordingSink {
        fn snapshot(&self) -> Vec<Notification> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, notification: Notification, _preferences: &NotificationPreferences) {
            self.delivered.lock().unwrap().push(notification);
        }
    }

    struct MapCatalog(HashMap<String, String>);

    impl StopCatalog for MapCatalog {
        fn display_name(&self, stop_code: &str) -> Option<String> {
            self.0.get(stop_code).cloned()
        }
    }

    // --- Builders ---

    fn arrival(minutes: u32) -> BusArrival {
        BusArrival {
            destination: "Ocean Terminal".to_string(),
            departure_minutes: minutes,
            departure_time: None,
            day_offset: 0,
            is_estimated: false,
            reliability: 'T',
            bus_type: 'B',
            terminus: None,
            journey_id: None,
        }
    }

    fn service(name: &str, minutes: &[u32]) -> ServiceTimes {
        ServiceTimes {
            service_name: name.to_string(),
            operator: None,
            route_description: None,
            is_disrupted: false,
            is_diverted: false,
            buses: minutes.iter().map(|m| arrival(*m)).collect(),
        }
    }

    fn times_for(stop_code: &str, services: Vec<ServiceTimes>) -> LiveTimes {
        let mut stops = HashMap::new();
        stops.insert(
            stop_code.to_string(),
            StopTimes {
                stop_code: stop_code.to_string(),
                stop_name: "Princes Street".to_string(),
                has_disruption: false,
                services,
            },
        );
        LiveTimes {
            stops,
            has_global_disruption: false,
        }
    }

    fn times_with(stop_code: &str, service_name: &str, minutes: u32) -> LiveTimes {
        times_for(stop_code, vec![service(service_name, &[minutes])])
    }

    fn empty_times() -> LiveTimes {
        LiveTimes {
            stops: HashMap::new(),
            has_global_disruption: false,
        }
    }

    fn fast_settings() -> AlertSettings {
        AlertSettings {
            poll_interval: Duration::from_millis(15),
            max_age: Duration::from_secs(5),
            preferences: NotificationPreferences::default(),
        }
    }

    async fn memory_store() -> AlertStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        AlertStore::new(pool)
    }

    async fn manager_with<S>(
        source: S,
        settings: AlertSettings,
    ) -> (Arc<AlertManager<S>>, Arc<RecordingSink>, AlertStore)
    where
        S: LiveTimesSource + Send + Sync + 'static,
    {
        let store = memory_store().await;
        let sink = Arc::new(RecordingSink::default());
        let manager = Arc::new(AlertManager::new(
            store.clone(),
            source,
            sink.clone(),
            Arc::new(EmptyCatalog),
            settings,
        ));
        (manager, sink, store)
    }

    /// Poll `condition` until it holds or two seconds pass.
    async fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            if Instant::now() >= deadline {
                panic!("condition not reached in time");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // --- Evaluation ---

    #[test]
    fn evaluation_matches_watched_service_within_window() {
        let alert = TimeAlert {
            stop_code: "100".to_string(),
            services: vec!["22".to_string()],
            trigger_minutes: 5,
            token: Uuid::new_v4(),
        };
        let times = times_with("100", "22", 3);

        let due = first_due_service(&times, &alert).unwrap();
        assert_eq!(due.service_name, "22");
        assert_eq!(due.minutes, 3);
        assert_eq!(due.stop_name, "Princes Street");
    }

    #[test]
    fn evaluation_ignores_missing_stop_and_unwatched_services() {
        let alert = TimeAlert {
            stop_code: "100".to_string(),
            services: vec!["22".to_string()],
            trigger_minutes: 5,
            token: Uuid::new_v4(),
        };

        assert!(first_due_service(&empty_times(), &alert).is_none());
        assert!(first_due_service(&times_with("100", "30", 0), &alert).is_none());
    }

    #[test]
    fn evaluation_considers_only_the_first_bus_of_a_service() {
        let alert = TimeAlert {
            stop_code: "100".to_string(),
            services: vec!["22".to_string()],
            trigger_minutes: 5,
            token: Uuid::new_v4(),
        };
        // The 2-minute bus is behind a 7-minute one and must not count.
        let times = times_for("100", vec![service("22", &[7, 2])]);

        assert!(first_due_service(&times, &alert).is_none());
    }

    #[test]
    fn evaluation_takes_first_matching_service_in_result_order() {
        let alert = TimeAlert {
            stop_code: "100".to_string(),
            services: vec!["22".to_string(), "30".to_string()],
            trigger_minutes: 5,
            token: Uuid::new_v4(),
        };
        let times = times_for("100", vec![service("30", &[2]), service("22", &[1])]);

        let due = first_due_service(&times, &alert).unwrap();
        assert_eq!(due.service_name, "30");
    }

    // --- Time alert lifecycle ---

    #[tokio::test]
    async fn fires_exactly_once_when_watched_service_is_due() {
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 3))]);
        let (manager, sink, store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        wait_for(|| !sink.snapshot().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let delivered = sink.snapshot();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0],
            Notification::Time {
                stop_code: "100".to_string(),
                stop_name: "Princes Street".to_string(),
                service_name: "22".to_string(),
                minutes: 3,
            }
        );
        assert!(store.active_time_alert().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn polls_until_a_bus_enters_the_window() {
        let source = ScriptedSource::new(vec![
            Feed::Times(times_with("100", "22", 8)),
            Feed::Times(times_with("100", "22", 6)),
            Feed::Times(times_with("100", "22", 4)),
        ]);
        let calls = source.clone();
        let (manager, sink, _store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        wait_for(|| !sink.snapshot().is_empty()).await;

        assert!(calls.calls.load(Ordering::SeqCst) >= 3);
        let delivered = sink.snapshot();
        assert_eq!(delivered.len(), 1);
        assert!(matches!(
            &delivered[0],
            Notification::Time { minutes: 4, .. }
        ));
    }

    #[tokio::test]
    async fn fetch_failures_and_missing_stops_keep_the_poll_alive() {
        let source = ScriptedSource::new(vec![
            Feed::Fail,
            Feed::Times(empty_times()),
            Feed::Times(times_with("100", "22", 0)),
        ]);
        let (manager, sink, _store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        wait_for(|| !sink.snapshot().is_empty()).await;
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn out_of_window_buses_never_fire() {
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 6))]);
        let calls = source.clone();
        let (manager, sink, store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        wait_for(|| calls.calls.load(Ordering::SeqCst) >= 4).await;
        assert!(sink.snapshot().is_empty());
        assert!(store.active_time_alert().await.unwrap().is_some());

        assert!(manager.cancel_time_alert().await.unwrap());
    }

    #[tokio::test]
    async fn expires_silently_after_max_age() {
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 30))]);
        let settings = AlertSettings {
            poll_interval: Duration::from_millis(10),
            max_age: Duration::from_millis(50),
            preferences: NotificationPreferences::default(),
        };
        let (manager, sink, store) = manager_with(source, settings).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.active_time_alert().await.unwrap().is_some() {
            if Instant::now() >= deadline {
                panic!("alert did not expire in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_alert() {
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 30))]);
        let (manager, _sink, store) = manager_with(source, fast_settings()).await;

        let first = manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();
        let second = manager
            .arm_time_alert("200", vec!["30".to_string()], 2)
            .await
            .unwrap();
        assert_ne!(first, second);

        let active = store.active_time_alert().await.unwrap().unwrap();
        assert_eq!(active.stop_code, "200");
        assert_eq!(active.token, second);

        // The first arming's token can no longer claim anything.
        assert!(store.claim_time_alert(first).await.unwrap().is_none());
        assert!(store.active_time_alert().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_reports_activity() {
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 30))]);
        let (manager, sink, store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        assert!(manager.cancel_time_alert().await.unwrap());
        assert!(!manager.cancel_time_alert().await.unwrap());
        assert!(store.active_time_alert().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_an_inflight_poll_suppresses_the_notification() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let gate = source.clone();
        let (manager, sink, _store) = manager_with(source, fast_settings()).await;

        manager
            .arm_time_alert("100", vec!["22".to_string()], 5)
            .await
            .unwrap();

        wait_for(|| gate.calls.load(Ordering::SeqCst) >= 1).await;
        assert!(manager.cancel_time_alert().await.unwrap());
        gate.gate.notify_one();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn poll_with_a_stale_token_never_notifies() {
        let store = memory_store().await;
        let sink = Arc::new(RecordingSink::default());
        let current = TimeAlert {
            stop_code: "100".to_string(),
            services: vec!["22".to_string()],
            trigger_minutes: 5,
            token: Uuid::new_v4(),
        };
        store.put_time_alert(&current).await.unwrap();

        // A poll task from an arming that has since been replaced.
        let stale = TimeAlert {
            token: Uuid::new_v4(),
            ..current.clone()
        };
        let source = ScriptedSource::new(vec![Feed::Times(times_with("100", "22", 0))]);
        let task = tokio::spawn(run_time_alert_poll(
            Arc::new(source),
            store.clone(),
            sink.clone(),
            fast_settings(),
            stale,
        ));

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(sink.snapshot().is_empty());
        let remaining = store.active_time_alert().await.unwrap().unwrap();
        assert_eq!(remaining.token, current.token);
    }

    #[tokio::test]
    async fn arming_rejects_an_empty_service_list() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let (manager, _sink, _store) = manager_with(source, fast_settings()).await;

        let err = manager.arm_time_alert("100", Vec::new(), 5).await.unwrap_err();
        assert!(matches!(err, AlertError::NoServices));
    }

    // --- Proximity alerts ---

    #[tokio::test]
    async fn proximity_trigger_delivers_once_with_catalog_name() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let store = memory_store().await;
        let sink = Arc::new(RecordingSink::default());
        let catalog = MapCatalog(HashMap::from([(
            "100".to_string(),
            "Princes Street".to_string(),
        )]));
        let manager = AlertManager::new(
            store.clone(),
            source,
            sink.clone(),
            Arc::new(catalog),
            fast_settings(),
        );

        manager
            .arm_proximity_alert(
                "100",
                250,
                StopPoint {
                    latitude: 55.95,
                    longitude: -3.19,
                },
            )
            .await
            .unwrap();

        assert!(manager.proximity_triggered("100").await.unwrap());
        assert!(!manager.proximity_triggered("100").await.unwrap());

        let delivered = sink.snapshot();
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0],
            Notification::Proximity {
                stop_code: "100".to_string(),
                stop_name: "Princes Street".to_string(),
                radius_meters: 250,
            }
        );
        assert!(store.active_proximity_alert().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn proximity_trigger_for_another_stop_is_a_noop() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let (manager, sink, store) = manager_with(source, fast_settings()).await;

        manager
            .arm_proximity_alert(
                "100",
                120,
                StopPoint {
                    latitude: 55.95,
                    longitude: -3.19,
                },
            )
            .await
            .unwrap();

        assert!(!manager.proximity_triggered("999").await.unwrap());
        assert!(sink.snapshot().is_empty());
        assert!(store.active_proximity_alert().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn proximity_name_falls_back_to_the_stop_code() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let (manager, sink, _store) = manager_with(source, fast_settings()).await;

        manager
            .arm_proximity_alert(
                "36237983",
                200,
                StopPoint {
                    latitude: 55.98,
                    longitude: -3.17,
                },
            )
            .await
            .unwrap();
        assert!(manager.proximity_triggered("36237983").await.unwrap());

        let delivered = sink.snapshot();
        assert!(matches!(
            &delivered[0],
            Notification::Proximity { stop_name, .. } if stop_name == "36237983"
        ));
    }

    #[tokio::test]
    async fn proximity_arm_validates_radius_and_replaces() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let (manager, _sink, store) = manager_with(source, fast_settings()).await;
        let position = StopPoint {
            latitude: 55.95,
            longitude: -3.19,
        };

        let err = manager
            .arm_proximity_alert("100", 0, position)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::InvalidRadius));

        manager.arm_proximity_alert("100", 100, position).await.unwrap();
        manager.arm_proximity_alert("200", 300, position).await.unwrap();

        let active = store.active_proximity_alert().await.unwrap().unwrap();
        assert_eq!(active.stop_code, "200");
        assert_eq!(active.radius_meters, 300);

        assert!(!manager.proximity_triggered("100").await.unwrap());
        assert!(manager.proximity_triggered("200").await.unwrap());
    }

    #[tokio::test]
    async fn proximity_cancel_is_idempotent() {
        let source = ScriptedSource::new(vec![Feed::Fail]);
        let (manager, _sink, _store) = manager_with(source, fast_settings()).await;

        manager
            .arm_proximity_alert(
                "100",
                150,
                StopPoint {
                    latitude: 55.95,
                    longitude: -3.19,
                },
            )
            .await
            .unwrap();

        assert!(manager.cancel_proximity_alert().await.unwrap());
        assert!(!manager.cancel_proximity_alert().await.unwrap());
    }
}

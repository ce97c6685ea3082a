// Application state driven by a single event thread, plus the live resources feeding it
use crate::ntm_config::InvalidRecordPolicy;
use crate::ntm_feed::{ConnectionManager, ConnectionState, FeedEvent, FeedHandle, FeedSession, FeedSink};
use crate::ntm_health::{ClockState, FeedHealth, StalenessMonitor, Ticker};
use crate::ntm_models::{RecordError, Result, RouteOption, RouteSelection, VehicleDataset, VehicleRecord};
use crate::ntm_routes::{RouteGeometry, RouteGeometryIndex};
use crate::ntm_storage::RouteFilterStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

// ============================================================================
// View State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Map,
    Settings,
    About,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Map, Tab::Settings, Tab::About];

    /// Unknown keys fall back to the map.
    pub fn from_key(key: &str) -> Tab {
        match key {
            "settings" => Tab::Settings,
            "about" => Tab::About,
            _ => Tab::Map,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Tab::Map => "map",
            Tab::Settings => "settings",
            Tab::About => "about",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Tab::Map => "Map",
            Tab::Settings => "Routes",
            Tab::About => "About",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewState {
    active: Tab,
}

impl ViewState {
    pub fn active(&self) -> Tab {
        self.active
    }

    pub fn select(&mut self, tab: Tab) {
        self.active = tab;
    }
}

/// What the rendering layer should draw for the active tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Map,
    NotConnected,
    NoVehicles,
    Settings,
    About,
}

// ============================================================================
// Events and State
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Feed(FeedEvent),
    Tick(DateTime<Utc>),
    SelectRoutes(RouteSelection),
    SelectTab(Tab),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub snapshots: u64,
    pub decode_failures: u64,
    pub dropped_records: u64,
    pub last_decode_error: Option<String>,
}

pub struct AppState {
    dataset: VehicleDataset,
    routes: Arc<RouteGeometryIndex>,
    selection: RouteSelection,
    filter_store: RouteFilterStore,
    session: FeedSession,
    clock: ClockState,
    monitor: StalenessMonitor,
    view: ViewState,
    invalid_records: InvalidRecordPolicy,
    stats: FeedStats,
}

impl AppState {
    pub fn new(
        filter_store: RouteFilterStore,
        monitor: StalenessMonitor,
        invalid_records: InvalidRecordPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let selection = filter_store.load();
        AppState {
            dataset: VehicleDataset::new(),
            routes: Arc::new(RouteGeometryIndex::empty()),
            selection,
            filter_store,
            session: FeedSession::default(),
            clock: ClockState::starting_at(now),
            monitor,
            view: ViewState::default(),
            invalid_records,
            stats: FeedStats::default(),
        }
    }

    /// Installs the reference route geometry once it has been loaded.
    pub fn install_routes(&mut self, routes: Arc<RouteGeometryIndex>) {
        info!("Route overlay ready ({} routes)", routes.len());
        self.routes = routes;
    }

    pub fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::Feed(FeedEvent::Message { payload, received_at }) => self.on_payload(&payload, received_at),
            AppEvent::Feed(event) => self.session.apply(&event),
            AppEvent::Tick(now) => self.clock.now = now,
            AppEvent::SelectRoutes(selection) => self.on_select_routes(selection),
            AppEvent::SelectTab(tab) => self.view.select(tab),
        }
    }

    fn on_payload(&mut self, payload: &[u8], received_at: DateTime<Utc>) {
        match self.session.ingest(payload, received_at, &mut self.dataset, &mut self.clock) {
            Ok(report) => {
                self.stats.snapshots += 1;
                debug!("Snapshot with {} vehicles", report.accepted);
                self.record_rejections(&report.rejected);
            }
            Err(e) => {
                warn!("Ignoring feed message: {}", e);
                self.stats.decode_failures += 1;
                self.stats.last_decode_error = Some(e.to_string());
            }
        }
    }

    fn record_rejections(&mut self, rejected: &[RecordError]) {
        match self.invalid_records {
            InvalidRecordPolicy::Silent => {}
            InvalidRecordPolicy::Count => self.stats.dropped_records += rejected.len() as u64,
            InvalidRecordPolicy::Log => {
                self.stats.dropped_records += rejected.len() as u64;
                for error in rejected {
                    warn!("Dropped vehicle {}", error);
                }
            }
        }
    }

    fn on_select_routes(&mut self, selection: RouteSelection) {
        self.selection = selection;
        if let Err(e) = self.filter_store.save(&self.selection) {
            warn!("Could not save route selection: {}", e);
        }
    }

    pub fn visible_vehicles(&self) -> Vec<&VehicleRecord> {
        self.dataset.filter(&self.selection)
    }

    pub fn visible_routes(&self) -> Vec<&RouteGeometry> {
        self.routes.filter(&self.selection)
    }

    pub fn is_lagging(&self) -> bool {
        self.monitor.is_lagging(self.clock.now, self.clock.last_update)
    }

    pub fn health(&self) -> FeedHealth {
        FeedHealth::classify(self.session.state(), self.is_lagging())
    }

    pub fn screen(&self) -> Screen {
        let connected = self.session.is_connected();
        match self.view.active() {
            Tab::About => Screen::About,
            _ if !connected => Screen::NotConnected,
            Tab::Map => Screen::Map,
            Tab::Settings if self.dataset.is_empty() => Screen::NoVehicles,
            Tab::Settings => Screen::Settings,
        }
    }

    /// Observed routes first, then selected routes not currently on the road.
    pub fn route_options(&self) -> Vec<RouteOption> {
        let mut options = self.dataset.route_options();
        for selected in self.selection.options() {
            if !options.iter().any(|o| o.value == selected.value) {
                options.push(selected.clone());
            }
        }
        options
    }

    pub fn selection(&self) -> &RouteSelection {
        &self.selection
    }

    pub fn routes(&self) -> &RouteGeometryIndex {
        &self.routes
    }

    pub fn active_tab(&self) -> Tab {
        self.view.active()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session(&self) -> &FeedSession {
        &self.session
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    pub fn vehicle_count(&self) -> usize {
        self.dataset.len()
    }
}

// ============================================================================
// Live Session
// ============================================================================

/// Called after an event is queued so a front end can wake up.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// The feed connection and the clock, acquired and released together.
pub struct LiveSession {
    manager: ConnectionManager,
    url: String,
    events: UnboundedSender<AppEvent>,
    waker: Waker,
    feed: Option<FeedHandle>,
    ticker: Option<Ticker>,
}

impl LiveSession {
    pub fn start(
        manager: ConnectionManager,
        url: &str,
        events: UnboundedSender<AppEvent>,
        waker: Waker,
    ) -> Result<Self> {
        let mut session = LiveSession {
            manager,
            url: url.to_string(),
            events,
            waker,
            feed: None,
            ticker: None,
        };

        let tick_events = session.events.clone();
        let tick_waker = Arc::clone(&session.waker);
        session.ticker = Some(Ticker::start(Ticker::PERIOD, move |now| {
            let sent = tick_events.send(AppEvent::Tick(now)).is_ok();
            tick_waker();
            sent
        })?);

        // on failure the ticker is released by Drop
        session.feed = Some(session.manager.open(&session.url, session.feed_sink())?);
        Ok(session)
    }

    fn feed_sink(&self) -> FeedSink {
        let events = self.events.clone();
        let waker = Arc::clone(&self.waker);
        Box::new(move |event: FeedEvent| {
            let sent = events.send(AppEvent::Feed(event)).is_ok();
            waker();
            sent
        })
    }

    /// Replaces the feed worker with a fresh one, e.g. after retries ran out.
    pub fn restart_feed(&mut self) -> Result<()> {
        if let Some(mut old) = self.feed.take() {
            if let Err(e) = old.close() {
                warn!("Previous feed worker did not stop cleanly: {}", e);
            }
        }
        info!("Restarting feed");
        self.feed = Some(self.manager.open(&self.url, self.feed_sink())?);
        Ok(())
    }

    /// Stops both resources; each is attempted even if the other fails.
    pub fn shutdown(&mut self) -> Result<()> {
        let feed = self.feed.take().map_or(Ok(()), |mut feed| feed.close());
        let ticker = self.ticker.take().map_or(Ok(()), |mut ticker| ticker.stop());
        feed.and(ticker)
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Live session teardown: {}", e);
        }
    }
}

// Controllers: start-up wiring and the terminal watch loop
use crate::ntm_config::AppConfig;
use crate::ntm_feed::{ConnectionManager, FeedEvent};
use crate::ntm_health::StalenessMonitor;
use crate::ntm_models::RouteSelection;
use crate::ntm_routes::RouteGeometryIndex;
use crate::ntm_state::{AppEvent, AppState, LiveSession};
use crate::ntm_storage::{FileStore, RouteFilterStore};
use crate::ntm_views::NTMViews;
use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Select(RouteSelection),
    Restart,
    Quit,
    Empty,
    Invalid(String),
}

pub struct NTMControllers;

impl NTMControllers {
    /// State for either front end: saved selection restored, no data yet.
    pub fn build_state(config: &AppConfig) -> AppState {
        let store = FileStore::new(&config.storage_path);
        info!("Route selection stored in {:?}", store.path());
        AppState::new(
            RouteFilterStore::new(Box::new(store)),
            StalenessMonitor::new(config.lag_threshold_secs),
            config.invalid_records,
            Utc::now(),
        )
    }

    /// Route geometry is optional: without it the map just has no overlay.
    pub fn load_routes(source: &str) -> Option<RouteGeometryIndex> {
        match RouteGeometryIndex::load(source) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("Route overlay unavailable: {}", e);
                None
            }
        }
    }

    pub fn run_watch(config: AppConfig) -> anyhow::Result<()> {
        NTMViews::show_welcome_screen(&config.feed_url);

        let mut state = Self::build_state(&config);
        if let Some(routes) = Self::load_routes(&config.routes_source) {
            state.install_routes(Arc::new(routes));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start the event loop")?;

        runtime.block_on(Self::watch(config, state))?;
        NTMViews::goodbye_message();
        Ok(())
    }

    async fn watch(config: AppConfig, mut state: AppState) -> anyhow::Result<()> {
        let (event_tx, mut events) = unbounded_channel();
        let mut live = LiveSession::start(
            ConnectionManager::websocket(config.backoff),
            &config.feed_url,
            event_tx,
            Arc::new(|| {}),
        )
        .context("Failed to start the live feed")?;

        let (input_tx, mut inputs) = unbounded_channel();
        Self::spawn_input_reader(input_tx).context("Failed to read commands")?;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut last_health = state.health();
        let mut last_snapshots = 0;
        NTMViews::show_health(last_health, &state);
        NTMViews::prompt();

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    let gave_up = matches!(event, AppEvent::Feed(FeedEvent::GaveUp { .. }));
                    state.handle(event);
                    if gave_up {
                        NTMViews::show_gave_up();
                    }
                }
                Some(input) = inputs.recv() => match input {
                    Input::Select(selection) => {
                        state.handle(AppEvent::SelectRoutes(selection));
                        NTMViews::show_selection_saved(state.selection());
                        NTMViews::show_vehicles(&state.visible_vehicles(), state.selection(), state.routes());
                        NTMViews::prompt();
                    }
                    Input::Restart => {
                        let (restarted, outcome) = Self::off_loop(live, LiveSession::restart_feed).await?;
                        live = restarted;
                        if let Err(e) = outcome {
                            warn!("Could not restart the feed: {}", e);
                        }
                    }
                    Input::Quit => break,
                    Input::Empty => NTMViews::prompt(),
                    Input::Invalid(text) => {
                        NTMViews::invalid_command(&text);
                        NTMViews::prompt();
                    }
                },
                _ = &mut ctrl_c => break,
                else => break,
            }

            let health = state.health();
            if health != last_health {
                NTMViews::show_health(health, &state);
                last_health = health;
            }

            if state.stats().snapshots != last_snapshots {
                last_snapshots = state.stats().snapshots;
                NTMViews::show_vehicles(&state.visible_vehicles(), state.selection(), state.routes());
                NTMViews::show_stats(state.stats());
                NTMViews::prompt();
            }
        }

        let (_, outcome) = Self::off_loop(live, LiveSession::shutdown).await?;
        outcome.context("Feed teardown failed")?;
        Ok(())
    }

    /// Runs `op` on the blocking pool; joining feed threads must not hold the event loop.
    async fn off_loop<F, T>(mut live: LiveSession, op: F) -> anyhow::Result<(LiveSession, T)>
    where
        F: FnOnce(&mut LiveSession) -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let outcome = op(&mut live);
            (live, outcome)
        })
        .await
        .context("Feed task failed")
    }

    /// Reads commands from stdin on its own thread; stops at EOF.
    fn spawn_input_reader(inputs: UnboundedSender<Input>) -> io::Result<()> {
        thread::Builder::new()
            .name("ntm-stdin".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if inputs.send(Self::parse_command(&line)).is_err() {
                        break;
                    }
                }
            })
            .map(|_| ())
    }

    fn parse_command(line: &str) -> Input {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => Input::Empty,
            "q" | "quit" => Input::Quit,
            "r" | "reconnect" => Input::Restart,
            "s" | "routes" => Input::Select(RouteSelection::from_route_ids(
                rest.split(',').map(str::trim).filter(|id| !id.is_empty()),
            )),
            _ => Input::Invalid(line.to_string()),
        }
    }
}

// GUI for the NOLA transit map using egui/eframe
use crate::ntm_config::AppConfig;
use crate::ntm_controllers::NTMControllers;
use crate::ntm_feed::ConnectionManager;
use crate::ntm_health::{FeedHealth, Ticker};
use crate::ntm_models::{RouteSelection, VehicleRecord};
use crate::ntm_routes::{RouteGeometry, RouteGeometryIndex};
use crate::ntm_state::{AppEvent, AppState, LiveSession, Screen, Tab};
use eframe::egui;
use egui::{Color32, Pos2, Rect, RichText, Sense, Shape, Stroke, Ui, Vec2};
use geo_types::coord;
use log::warn;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const NOLA_CENTER: (f64, f64) = (29.95569, -90.0786107);
const DEFAULT_SPAN_DEG: f64 = 0.08;
const MARKER_HOVER_RADIUS: f32 = 10.0;

// ============================================================================
// Application State
// ============================================================================

pub struct NTMApp {
    config: AppConfig,
    state: AppState,
    events: UnboundedReceiver<AppEvent>,
    event_tx: UnboundedSender<AppEvent>,
    live: Option<LiveSession>,
    ctx: egui::Context,
    error_message: Option<String>,
    routes_promise: Option<poll_promise::Promise<Result<RouteGeometryIndex, String>>>,
}

impl NTMApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let (event_tx, events) = unbounded_channel();
        let mut app = Self {
            state: NTMControllers::build_state(&config),
            config,
            events,
            event_tx,
            live: None,
            ctx: cc.egui_ctx.clone(),
            error_message: None,
            routes_promise: None,
        };

        app.start_route_loading();
        app.start_live_session();
        app
    }

    fn start_route_loading(&mut self) {
        let source = self.config.routes_source.clone();
        self.routes_promise = Some(poll_promise::Promise::spawn_thread("routes", move || {
            RouteGeometryIndex::load(&source).map_err(|e| e.to_string())
        }));
    }

    fn check_route_loading(&mut self) {
        let ready = self
            .routes_promise
            .as_ref()
            .map_or(false, |promise| promise.ready().is_some());
        if !ready {
            return;
        }

        if let Some(promise) = self.routes_promise.take() {
            match promise.block_and_take() {
                Ok(index) => self.state.install_routes(Arc::new(index)),
                Err(e) => warn!("Route overlay unavailable: {}", e),
            }
        }
    }

    fn start_live_session(&mut self) {
        // release the old pair before acquiring a new one
        self.live = None;

        let ctx = self.ctx.clone();
        match LiveSession::start(
            ConnectionManager::websocket(self.config.backoff),
            &self.config.feed_url,
            self.event_tx.clone(),
            Arc::new(move || ctx.request_repaint()),
        ) {
            Ok(live) => {
                self.live = Some(live);
                self.error_message = None;
            }
            Err(e) => {
                self.error_message = Some(format!("Failed to start the live feed: {}", e));
            }
        }
    }

    fn restart_feed(&mut self) {
        match self.live.as_mut() {
            Some(live) => {
                if let Err(e) = live.restart_feed() {
                    self.error_message = Some(format!("Failed to reconnect: {}", e));
                }
            }
            None => self.start_live_session(),
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.state.handle(event);
        }
    }
}

impl eframe::App for NTMApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.check_route_loading();
        self.drain_events();
        ctx.request_repaint_after(Ticker::PERIOD);

        // Top panel with tabs and feed indicator
        let mut selected_tab = None;
        let mut reconnect = false;
        egui::TopBottomPanel::top("tabs").show(ctx, |ui| {
            ui.horizontal(|ui| {
                for tab in Tab::ALL {
                    if ui.selectable_label(self.state.active_tab() == tab, tab.title()).clicked() {
                        selected_tab = Some(tab);
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let health = self.state.health();
                    ui.label(RichText::new(health.indicator()).size(18.0))
                        .on_hover_text(health_hint(health, &self.state));
                    if self.state.session().retries_exhausted() && ui.button("Reconnect").clicked() {
                        reconnect = true;
                    }
                });
            });
        });

        if let Some(tab) = selected_tab {
            self.state.handle(AppEvent::SelectTab(tab));
        }
        if reconnect {
            self.restart_feed();
        }

        if let Some(error) = self.error_message.clone() {
            let mut should_retry = false;
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.vertical_centered(|ui| {
                        ui.colored_label(Color32::RED, "❌ Error");
                        ui.label(&error);
                        if ui.button("Retry").clicked() {
                            should_retry = true;
                        }
                    });
                });
            });
            if should_retry {
                self.start_live_session();
            }
            return;
        }

        let mut new_selection = None;
        egui::CentralPanel::default().show(ctx, |ui| match self.state.screen() {
            Screen::Map => self.show_map(ui),
            Screen::NotConnected => show_not_connected(ui),
            Screen::NoVehicles => {
                ui.vertical_centered(|ui| {
                    ui.label("No Vehicles found yet. Are you connected?");
                });
            }
            Screen::Settings => new_selection = self.show_settings(ui),
            Screen::About => show_about(ui),
        });

        if let Some(selection) = new_selection {
            self.state.handle(AppEvent::SelectRoutes(selection));
        }
    }
}

// ============================================================================
// View Implementations
// ============================================================================

impl NTMApp {
    fn show_map(&self, ui: &mut Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::hover());
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, Color32::from_rgb(242, 239, 233));

        let routes = self.state.visible_routes();
        let vehicles = self.state.visible_vehicles();
        let projection = Projection::fit(map_bounds(self.state.routes(), &vehicles), rect);

        for route in &routes {
            draw_route(&painter, &projection, route);
        }

        let mut hovered: Option<(f32, &VehicleRecord)> = None;
        for vehicle in &vehicles {
            let center = projection.project(vehicle.lon, vehicle.lat);
            painter.add(vehicle_arrow(center, vehicle.hdg));

            if let Some(pointer) = response.hover_pos() {
                let distance = pointer.distance(center);
                if distance <= MARKER_HOVER_RADIUS && hovered.map_or(true, |(best, _)| distance < best) {
                    hovered = Some((distance, vehicle));
                }
            }
        }

        painter.text(
            rect.left_bottom() + Vec2::new(8.0, -8.0),
            egui::Align2::LEFT_BOTTOM,
            format!("{} vehicles · {} routes", vehicles.len(), routes.len()),
            egui::FontId::proportional(13.0),
            Color32::DARK_GRAY,
        );

        if let Some((_, vehicle)) = hovered {
            response.on_hover_text(vehicle.summary());
        }
    }

    fn show_settings(&self, ui: &mut Ui) -> Option<RouteSelection> {
        let current = self.state.selection().clone();
        let mut next = None;

        ui.vertical_centered(|ui| {
            ui.heading("Select routes to show on map");
            ui.label("You can select multiple routes");
        });
        ui.separator();

        ui.horizontal(|ui| {
            if current.shows_all() {
                ui.label("Showing all routes");
            } else {
                let ids: Vec<&str> = current.values().collect();
                ui.label(format!("Showing: {}", ids.join(", ")));
                if ui.button("Show all").clicked() {
                    next = Some(RouteSelection::empty());
                }
            }
        });
        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            for option in self.state.route_options() {
                let mut checked = current.contains(&option.value);
                ui.horizontal(|ui| {
                    let color = self
                        .state
                        .routes()
                        .get(&option.value)
                        .map(|r| to_color32(r.rgb()))
                        .unwrap_or(Color32::GRAY);
                    ui.colored_label(color, "■");
                    if ui.checkbox(&mut checked, &option.label).changed() {
                        let base = next.as_ref().unwrap_or(&current);
                        next = Some(base.toggled(&option, checked));
                    }
                });
            }
        });

        next
    }
}

fn show_not_connected(ui: &mut Ui) {
    ui.vertical_centered(|ui| {
        ui.add_space(20.0);
        ui.label("Looks like you aren't connected. The map reconnects on its own; if it keeps failing please");
        ui.hyperlink_to("get in touch with us", "https://github.com/codefornola/nola-transit-map/issues");
    });
}

fn show_about(ui: &mut Ui) {
    ui.vertical_centered(|ui| {
        ui.heading("NOLA transit map");
        ui.horizontal(|ui| {
            ui.label("Created by");
            ui.hyperlink_to("Code For New Orleans", "https://codeforneworleans.org/");
        });
        ui.add_space(12.0);
        ui.heading("About");
        ui.label(
            "Live positions of RTA vehicles in New Orleans, filtered by the routes you pick. \
             The indicator in the corner shows whether the feed is live (✅), \
             lagging by more than a few seconds (⚠) or down (❌).",
        );
        ui.hyperlink_to(
            "Report a problem or request a feature",
            "https://github.com/codefornola/nola-transit-map/issues",
        );
    });
}

fn health_hint(health: FeedHealth, state: &AppState) -> String {
    match health {
        FeedHealth::Healthy => "Live".to_string(),
        FeedHealth::Degraded => format!("No update for {}s", state.clock().seconds_since_update()),
        FeedHealth::Down => match state.session().last_close_reason() {
            Some(reason) => format!("Not connected: {}", reason),
            None => "Not connected".to_string(),
        },
    }
}

// ============================================================================
// Map Drawing
// ============================================================================

/// Equirectangular projection fitted to a lon/lat box.
struct Projection {
    center: Pos2,
    origin_lon: f64,
    origin_lat: f64,
    lon_scale: f64,
    scale: f64,
}

impl Projection {
    fn fit(bounds: geo_types::Rect<f64>, rect: Rect) -> Self {
        let (min, max) = (bounds.min(), bounds.max());
        let origin_lat = (min.y + max.y) / 2.0;
        let lon_scale = origin_lat.to_radians().cos();
        let width = ((max.x - min.x) * lon_scale).max(1e-6);
        let height = (max.y - min.y).max(1e-6);
        let scale = (rect.width() as f64 / width).min(rect.height() as f64 / height) * 0.95;

        Projection {
            center: rect.center(),
            origin_lon: (min.x + max.x) / 2.0,
            origin_lat,
            lon_scale,
            scale,
        }
    }

    fn project(&self, lon: f64, lat: f64) -> Pos2 {
        Pos2::new(
            self.center.x + ((lon - self.origin_lon) * self.lon_scale * self.scale) as f32,
            self.center.y - ((lat - self.origin_lat) * self.scale) as f32,
        )
    }
}

fn map_bounds(routes: &RouteGeometryIndex, vehicles: &[&VehicleRecord]) -> geo_types::Rect<f64> {
    if let Some(bounds) = routes.bounds() {
        return bounds;
    }

    let mut positions = vehicles.iter().map(|v| (v.lon, v.lat));
    if let Some((lon, lat)) = positions.next() {
        let (min_lon, min_lat, max_lon, max_lat) = positions.fold((lon, lat, lon, lat), |(a, b, c, d), (x, y)| {
            (a.min(x), b.min(y), c.max(x), d.max(y))
        });
        return geo_types::Rect::new(
            coord! { x: min_lon - 0.005, y: min_lat - 0.005 },
            coord! { x: max_lon + 0.005, y: max_lat + 0.005 },
        );
    }

    let (lat, lon) = NOLA_CENTER;
    geo_types::Rect::new(
        coord! { x: lon - DEFAULT_SPAN_DEG, y: lat - DEFAULT_SPAN_DEG },
        coord! { x: lon + DEFAULT_SPAN_DEG, y: lat + DEFAULT_SPAN_DEG },
    )
}

fn draw_route(painter: &egui::Painter, projection: &Projection, route: &RouteGeometry) {
    let stroke = Stroke::new(2.5, to_color32(route.rgb()));
    for line in &route.lines.0 {
        let points: Vec<Pos2> = line.0.iter().map(|c| projection.project(c.x, c.y)).collect();
        if points.len() >= 2 {
            painter.add(Shape::line(points, stroke));
        }
    }
}

/// Arrow pointing along `hdg` (degrees clockwise from north).
fn vehicle_arrow(center: Pos2, hdg: u16) -> Shape {
    let (sin, cos) = (hdg as f32).to_radians().sin_cos();
    let rotate = |x: f32, y: f32| center + Vec2::new(x * cos - y * sin, x * sin + y * cos);

    Shape::convex_polygon(
        vec![rotate(0.0, -9.0), rotate(6.0, 7.0), rotate(0.0, 3.0), rotate(-6.0, 7.0)],
        Color32::from_rgb(30, 90, 200),
        Stroke::new(1.0, Color32::WHITE),
    )
}

fn to_color32((r, g, b): (u8, u8, u8)) -> Color32 {
    Color32::from_rgb(r, g, b)
}

// ============================================================================
// Public entry point
// ============================================================================

pub fn run_gui(config: AppConfig) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 800.0])
            .with_min_inner_size([480.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "NOLA Transit Map",
        options,
        Box::new(move |cc| Ok(Box::new(NTMApp::new(cc, config)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_maps_bounds_inside_rect() {
        let bounds = geo_types::Rect::new(coord! { x: -90.2, y: 29.9 }, coord! { x: -90.0, y: 30.0 });
        let rect = Rect::from_min_size(Pos2::ZERO, Vec2::new(400.0, 300.0));
        let projection = Projection::fit(bounds, rect);

        let center = projection.project(-90.1, 29.95);
        assert!((center.x - 200.0).abs() < 0.5 && (center.y - 150.0).abs() < 0.5);

        let north_east = projection.project(-90.0, 30.0);
        assert!(north_east.x > center.x && north_east.y < center.y);
        assert!(rect.expand(1.0).contains(north_east));
        assert!(rect.expand(1.0).contains(projection.project(-90.2, 29.9)));
    }

    #[test]
    fn arrow_points_along_heading() {
        let center = Pos2::new(50.0, 50.0);
        let tip = |hdg| match vehicle_arrow(center, hdg) {
            Shape::Path(path) => path.points[0],
            _ => panic!("arrow should be a path"),
        };
        assert!(tip(0).y < center.y);
        assert!(tip(90).x > center.x);
        assert!(tip(180).y > center.y);
        assert!(tip(270).x < center.x);
    }

    #[test]
    fn falls_back_to_vehicle_then_city_bounds() {
        let vehicle = VehicleRecord {
            vid: "1".to_string(),
            rt: "57".to_string(),
            des: String::new(),
            lat: 29.95,
            lon: -90.07,
            hdg: 0,
            tmstmp: String::new(),
        };
        let around_vehicle = map_bounds(&RouteGeometryIndex::empty(), &[&vehicle]);
        assert!(around_vehicle.min().x < -90.07 && around_vehicle.max().x > -90.07);

        let city = map_bounds(&RouteGeometryIndex::empty(), &[]);
        assert!((city.center().y - NOLA_CENTER.0).abs() < 1e-9);
    }
}

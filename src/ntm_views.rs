// Terminal views for the watch mode
use crate::ntm_health::FeedHealth;
use crate::ntm_models::{RouteSelection, VehicleRecord};
use crate::ntm_routes::{parse_hex_color, RouteGeometryIndex};
use crate::ntm_state::{AppState, FeedStats};
use std::io::{self, Write};

pub struct NTMViews;

impl NTMViews {
    pub fn show_welcome_screen(feed_url: &str) {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║              🚌 NOLA TRANSIT MAP - LIVE FEED              ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  📡 Feed: {}", feed_url);
        println!("\n  ⌨️  Commands:");
        println!("     • s 57,39   show only these routes");
        println!("     • s         show all routes");
        println!("     • r         reconnect to the feed");
        println!("     • q         quit");
        println!("\n{}", "═".repeat(70));
    }

    pub fn show_health(health: FeedHealth, state: &AppState) {
        let detail = match health {
            FeedHealth::Healthy => "receiving live positions".to_string(),
            FeedHealth::Degraded => format!(
                "no update for {}s",
                state.clock().seconds_since_update()
            ),
            FeedHealth::Down => match state.session().last_close_reason() {
                Some(reason) => format!("not connected ({})", reason),
                None => "not connected".to_string(),
            },
        };
        println!("\n{} Feed {}: {}", health.indicator(), health.label(), detail);
    }

    /// Vehicle list for the current selection, one line per vehicle.
    pub fn show_vehicles(vehicles: &[&VehicleRecord], selection: &RouteSelection, routes: &RouteGeometryIndex) {
        println!("\n{}", "─".repeat(70));
        if selection.shows_all() {
            println!("🚌 {} vehicles on all routes", vehicles.len());
        } else {
            let ids: Vec<&str> = selection.values().collect();
            println!("🚌 {} vehicles on routes {}", vehicles.len(), ids.join(", "));
        }
        println!("{}", "─".repeat(70));

        if vehicles.is_empty() {
            println!("  (no vehicles reporting)");
            return;
        }

        for vehicle in vehicles {
            let color = routes
                .get(&vehicle.rt)
                .map(|r| r.color.as_str())
                .unwrap_or("#646464");
            println!(
                "  {} {:<24} {:>9.5}, {:>10.5}  {:>3}° {} · {}",
                Self::colorize_route(&vehicle.rt, color),
                Self::truncate(&vehicle.des, 24),
                vehicle.lat,
                vehicle.lon,
                vehicle.hdg,
                Self::heading_arrow(vehicle.hdg),
                vehicle.tmstmp
            );
        }
    }

    pub fn show_stats(stats: &FeedStats) {
        if stats.dropped_records > 0 || stats.decode_failures > 0 {
            println!(
                "  ℹ️  {} snapshots, {} unreadable messages, {} invalid vehicle records dropped",
                stats.snapshots, stats.decode_failures, stats.dropped_records
            );
        }
    }

    pub fn show_selection_saved(selection: &RouteSelection) {
        if selection.shows_all() {
            println!("\n✓ Showing all routes");
        } else {
            let ids: Vec<&str> = selection.values().collect();
            println!("\n✓ Showing routes {}", ids.join(", "));
        }
    }

    pub fn show_gave_up() {
        println!("\n{}", "═".repeat(60));
        println!("❌ FEED UNAVAILABLE");
        println!("{}", "═".repeat(60));
        println!("\nLooks like you aren't connected.");
        println!("\n💡 Troubleshooting:");
        println!("  • Type 'r' and press Enter to try again");
        println!("  • Check that the feed server is running");
        println!("  • Check --host / --port / --secure");
        println!("\n{}", "═".repeat(60));
    }

    pub fn invalid_command(input: &str) {
        println!("\n✗ Unknown command '{}'. Use s, r or q.", input);
    }

    pub fn prompt() {
        print!("➜ ");
        let _ = io::stdout().flush();
    }

    pub fn goodbye_message() {
        println!("\n{}", "═".repeat(60));
        println!("       👋 Thank you for using the NOLA transit map!");
        println!("{}", "═".repeat(60));
        println!();
    }

    fn heading_arrow(hdg: u16) -> &'static str {
        const ARROWS: [&str; 8] = ["↑", "↗", "→", "↘", "↓", "↙", "←", "↖"];
        ARROWS[(((hdg as usize) * 2 + 45) / 90) % 8]
    }

    fn truncate(text: &str, max: usize) -> String {
        if text.chars().count() <= max {
            text.to_string()
        } else {
            let mut out: String = text.chars().take(max - 1).collect();
            out.push('…');
            out
        }
    }

    /// Route id on its route color, with black or white text for contrast.
    fn colorize_route(route_id: &str, hex_color: &str) -> String {
        let (r, g, b) = parse_hex_color(hex_color);
        let luminance = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0;
        let text_color = if luminance > 0.5 { "30" } else { "97" };

        format!(
            "\x1b[48;2;{};{};{}m\x1b[{}m {:>4} \x1b[0m",
            r, g, b, text_color, route_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_arrows_cover_the_compass() {
        assert_eq!(NTMViews::heading_arrow(0), "↑");
        assert_eq!(NTMViews::heading_arrow(22), "↑");
        assert_eq!(NTMViews::heading_arrow(23), "↗");
        assert_eq!(NTMViews::heading_arrow(90), "→");
        assert_eq!(NTMViews::heading_arrow(180), "↓");
        assert_eq!(NTMViews::heading_arrow(270), "←");
        assert_eq!(NTMViews::heading_arrow(359), "↑");
    }

    #[test]
    fn truncates_long_destinations() {
        assert_eq!(NTMViews::truncate("Canal", 24), "Canal");
        assert_eq!(NTMViews::truncate("Cemeteries via Canal Street", 10), "Cemeterie…");
    }

    #[test]
    fn route_badge_contrasts_with_color() {
        assert!(NTMViews::colorize_route("57", "#FFFF00").contains("\x1b[30m"));
        assert!(NTMViews::colorize_route("57", "#000080").contains("\x1b[97m"));
    }
}

mod ntm_config;
mod ntm_controllers;
mod ntm_feed;
mod ntm_gui;
mod ntm_health;
mod ntm_models;
mod ntm_routes;
mod ntm_state;
mod ntm_storage;
mod ntm_views;

use clap::Parser;
use ntm_config::{Cli, Command};
use ntm_controllers::NTMControllers;

fn main() {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nThe map encountered an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Restart the map");
        eprintln!("  • Run with RUST_LOG=debug for details");
        eprintln!("\n{}", "═".repeat(70));
    }));

    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let command = cli.command();
    let config = cli.into_config();

    let outcome = match command {
        Command::Gui => ntm_gui::run_gui(config).map_err(|e| anyhow::anyhow!("GUI error: {}", e)),
        Command::Watch => NTMControllers::run_watch(config),
    };

    if let Err(e) = outcome {
        eprintln!("\n❌ {:#}", e);
        std::process::exit(1);
    }
}

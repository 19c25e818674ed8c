mod asyncop;
mod config;
mod console;
mod engine;
mod manifest;
mod net;
mod sim;
mod svc;
mod title;
mod ui;

use std::time::Duration;

use anyhow::Result;

use crate::config::AppConfig;
use crate::engine::Updater;
use crate::net::ConnectivityMonitor;
use crate::svc::SystemServices;

fn main() -> Result<()> {
    let mut console_mode = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--console" | "-c" => console_mode = true,
            "--help" | "-h" => {
                println!("patchdeck");
                println!("  --console   Run one text-mode update pass instead of the TUI");
                return Ok(());
            }
            "--version" | "-V" => {
                println!("patchdeck {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => eprintln!("ignoring unknown argument {other}"),
        }
    }

    env_logger::init();

    let app_config = AppConfig::load_or_create()?;
    // The IPC-backed service client plugs in here; the simulator keeps the
    // same contract for desktop runs.
    let services = sim::SimServices::sample();
    let probe = {
        let services = services.clone();
        move || services.internet_available()
    };
    let mut updater = Updater::new(services)
        .with_wait_budget(Duration::from_secs(app_config.wait_timeout_secs));

    if console_mode {
        let online = probe();
        return console::run(updater, online);
    }

    let mut monitor = ConnectivityMonitor::start(probe);
    let result = ui::run(&mut updater, &monitor, &app_config);
    monitor.stop();
    result
}

//! Splash-cursor fluid effect in a desktop window.
//!
//! Run with: cargo run --release -p splash -- [config.json]
//!
//! Controls:
//! - Move/drag mouse or touch: stir the fluid
//! - Space: random splats
//! - S: toggle shading
//! - Escape: quit

use std::path::Path;

use fluid::SimulationConfig;

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match SimulationConfig::load_json(Path::new(&path)) {
            Ok(config) => {
                log::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                log::error!("{}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SimulationConfig::default(),
    };

    if let Err(e) = splash::app::run(config) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

//! `nowcast_flood` daemon entry point.
//!
//! Loads configuration, opens the microcontroller link (or runs without it),
//! starts the console quit listener, and hands off to the control loop.

use std::process::ExitCode;

use nowcast_flood_service::config::{self, Mode};
use nowcast_flood_service::control::Controller;
use nowcast_flood_service::ingest::kma::KmaClient;
use nowcast_flood_service::logging::{self, Component};
use nowcast_flood_service::obslog::ObservationLog;
use nowcast_flood_service::sensor::{self, Disconnected, SensorLink};
use nowcast_flood_service::shutdown::{self, ShutdownFlag};

fn main() -> ExitCode {
    let config_path = config::config_path_from_env();
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logger(&config.logging.level, config.logging.file.as_deref()) {
        eprintln!("failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let service_key = match config::service_key_from_env() {
        Ok(key) => key,
        Err(e) => {
            logging::error(Component::System, None, &e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let client = match KmaClient::new(config.kma.clone(), service_key) {
        Ok(client) => client,
        Err(e) => {
            logging::error(Component::Kma, None, &format!("HTTP client setup failed: {}", e));
            return ExitCode::FAILURE;
        }
    };

    logging::info(
        Component::System,
        None,
        &format!(
            "starting in {:?} mode, grid ({}, {}), log {}",
            config.control.mode,
            config.kma.nx,
            config.kma.ny,
            config.obslog.path.display()
        ),
    );

    let link: Box<dyn SensorLink> = match config.control.mode {
        Mode::Collector => Box::new(Disconnected),
        Mode::Monitor => match sensor::connect(&config.serial) {
            Ok(link) => {
                logging::info(Component::Serial, Some(link.port_name()), "microcontroller connected");
                Box::new(link)
            }
            Err(e) => {
                logging::warn(
                    Component::Serial,
                    None,
                    &format!("{}; running without sensor integration", e),
                );
                Box::new(Disconnected)
            }
        },
    };

    let shutdown_flag = ShutdownFlag::new();
    // Detached: it may still be blocked on stdin when the loop exits.
    let _listener = shutdown::spawn_console_listener(shutdown_flag.clone());
    logging::info(Component::System, None, "type q and press enter to stop");

    let log = ObservationLog::new(&config.obslog.path, config.kma.nx, config.kma.ny);
    let mut controller = Controller::new(client, link, log, &config.control);
    controller.run(&shutdown_flag, config.control.tick());

    // Dropping the controller closes the serial port.
    drop(controller);
    logging::info(Component::System, None, "stopped");
    ExitCode::SUCCESS
}

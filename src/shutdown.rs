//! Cooperative shutdown.
//!
//! A console thread waits for the operator to type `q` and flips a one-way
//! latch. The control loop checks the latch once per tick, so an in-flight
//! fetch or sleep finishes before the loop exits.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::logging::{self, Component};

/// One-way false → true latch shared between the console thread and the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// `q`, case-insensitive, surrounding whitespace ignored.
pub fn is_quit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}

/// Reads lines from `input` until a quit command (which sets `flag`) or EOF
/// (which does not).
pub fn listen_for_quit<R: BufRead>(input: R, flag: &ShutdownFlag) {
    for line in input.lines() {
        match line {
            Ok(line) if is_quit_command(&line) => {
                logging::info(Component::System, None, "shutdown requested");
                flag.request();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                logging::warn(Component::System, None, &format!("console read failed: {}", e));
                return;
            }
        }
    }
    logging::debug(Component::System, None, "console closed; type-to-quit disabled");
}

/// Spawns the console listener on stdin.
pub fn spawn_console_listener(flag: ShutdownFlag) -> JoinHandle<()> {
    thread::spawn(move || listen_for_quit(io::stdin().lock(), &flag))
}

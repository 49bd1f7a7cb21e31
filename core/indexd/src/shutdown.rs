//! SIGINT/SIGTERM handling on a dedicated thread.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::path::PathBuf;
use std::thread;
use tracing::info;

use crate::server::remove_socket;

const TERMINATION_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        _ => "unknown",
    }
}

/// Registers the handlers, then removes the socket and exits with status 0
/// on the first signal.
pub fn spawn_signal_handler(socket_path: PathBuf) -> io::Result<()> {
    let mut signals = Signals::new(TERMINATION_SIGNALS)?;
    thread::Builder::new()
        .name("indexd-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal = signal_name(signal), "Shutting down");
                remove_socket(&socket_path);
                std::process::exit(0);
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_known_signals() {
        assert_eq!(signal_name(SIGINT), "SIGINT");
        assert_eq!(signal_name(SIGTERM), "SIGTERM");
        assert_eq!(signal_name(signal_hook::consts::SIGHUP), "unknown");
    }

    #[test]
    fn registered_signal_is_delivered_to_the_iterator() {
        let mut signals = Signals::new([signal_hook::consts::SIGUSR1]).expect("register");
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).expect("raise");
        let delivered = signals.forever().next();
        assert_eq!(delivered, Some(signal_hook::consts::SIGUSR1));
    }
}

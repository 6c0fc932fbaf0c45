//! Interactive session console

use anyhow::Result;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use sosync_core::{
    CoordinatorHandle, Location, ManualLocationSource, SessionEvent, SessionSnapshot,
};

/// A line typed at the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Initiate,
    Now,
    Cancel,
    Recover,
    Complete,
    Retry,
    Status,
    Location { latitude: f64, longitude: f64 },
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "initiate" | "sos" => ConsoleCommand::Initiate,
            "now" => ConsoleCommand::Now,
            "cancel" => ConsoleCommand::Cancel,
            "recover" => ConsoleCommand::Recover,
            "complete" | "safe" => ConsoleCommand::Complete,
            "retry" => ConsoleCommand::Retry,
            "status" => ConsoleCommand::Status,
            "location" | "loc" => {
                let latitude = parse_coordinate(words.next(), "latitude")?;
                let longitude = parse_coordinate(words.next(), "longitude")?;
                ConsoleCommand::Location {
                    latitude,
                    longitude,
                }
            }
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        if words.next().is_some() {
            return Err(format!("too many arguments for '{}'", verb));
        }
        Ok(command)
    }
}

fn parse_coordinate(word: Option<&str>, name: &str) -> Result<f64, String> {
    let word = word.ok_or_else(|| format!("missing {}", name))?;
    word.parse()
        .map_err(|_| format!("invalid {} '{}'", name, word))
}

const HELP: &str = "\
commands:
  initiate            start the countdown
  now                 activate immediately
  cancel              cancel during the countdown
  recover             begin recovery
  complete            mark safe and close the session
  retry               re-issue a failed create or activation
  location LAT LON    report a location fix
  status              show the current session
  quit                leave the console";

pub fn describe(snapshot: &SessionSnapshot) -> String {
    let mut line = format!("state: {}", snapshot.state);
    if let Some(session) = &snapshot.session {
        match session.id {
            Some(id) => line.push_str(&format!("  session: {}", id)),
            None => line.push_str("  session: (not yet created)"),
        }
        if let (Some(lat), Some(lon)) = (session.latitude, session.longitude) {
            line.push_str(&format!("  location: {:.5},{:.5}", lat, lon));
        }
        if session.recovery_attempts > 0 {
            line.push_str(&format!("  recovery attempts: {}", session.recovery_attempts));
        }
    }
    if snapshot.countdown_remaining > 0 {
        line.push_str(&format!("  countdown: {}", snapshot.countdown_remaining));
    }
    if snapshot.is_processing_request {
        line.push_str("  (request in flight)");
    }
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!("  last error: {}", error));
    }
    line
}

/// Read commands from stdin until `quit`, end of input or Ctrl+C
pub async fn run(handle: CoordinatorHandle, location: ManualLocationSource) -> Result<()> {
    let printer = tokio::spawn(print_events(handle.clone()));

    println!("{}", describe(&handle.snapshot()));
    println!("type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Initiate) => handle.initiate(),
            Ok(ConsoleCommand::Now) => handle.activate_immediately(),
            Ok(ConsoleCommand::Cancel) => handle.cancel(),
            Ok(ConsoleCommand::Recover) => handle.begin_recovery(),
            Ok(ConsoleCommand::Complete) => handle.complete_recovery(),
            Ok(ConsoleCommand::Retry) => handle.retry(),
            Ok(ConsoleCommand::Status) => println!("{}", describe(&handle.snapshot())),
            Ok(ConsoleCommand::Location {
                latitude,
                longitude,
            }) => location.push(Location::new(latitude, longitude)),
            Ok(ConsoleCommand::Help) => println!("{}", HELP),
            Ok(ConsoleCommand::Quit) => break,
            Err(e) => println!("{}", e),
        }
    }

    printer.abort();
    Ok(())
}

async fn print_events(handle: CoordinatorHandle) {
    let mut events = handle.subscribe_events();
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged {
                previous,
                current,
                source,
                ..
            }) => println!("{} -> {} ({:?})", previous, current, source),
            Ok(SessionEvent::CountdownTick { remaining }) if remaining > 0 => {
                println!("activating in {}...", remaining)
            }
            Ok(SessionEvent::RequestFailed { operation, error }) => {
                println!("{} failed: {}", operation, error)
            }
            Ok(SessionEvent::Reset { session_id }) => match session_id {
                Some(id) => println!("session {} closed", id),
                None => println!("session closed"),
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Console fell behind on events"),
            Err(RecvError::Closed) => break,
        }
    }
}

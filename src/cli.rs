use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::tracker::{TrackerEvent, Visibility};

#[derive(Parser, Debug)]
#[command(
    name = "learnclock",
    version = env!("CARGO_PKG_VERSION"),
    about = "Active learning time tracker"
)]
pub struct Args {
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, action, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Track active time for this process until stdin closes or Ctrl-C")]
    Run,

    #[command(about = "Retry every queued duration log once")]
    Flush,

    #[command(about = "Write the default settings file")]
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

/// What a line on stdin asks the running tracker to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Event(TrackerEvent),
    /// Report the final span and exit.
    Unload,
}

pub fn parse_host_command(line: &str) -> Option<HostCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "show" | "visible" => Some(HostCommand::Event(TrackerEvent::VisibilityChanged(Visibility::Visible))),
        "hide" | "hidden" => Some(HostCommand::Event(TrackerEvent::VisibilityChanged(Visibility::Hidden))),
        "online" => Some(HostCommand::Event(TrackerEvent::Online)),
        "load" => Some(HostCommand::Event(TrackerEvent::Load)),
        "unload" | "quit" | "exit" => Some(HostCommand::Unload),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        assert_eq!(
            parse_host_command(" Hide \n"),
            Some(HostCommand::Event(TrackerEvent::VisibilityChanged(Visibility::Hidden)))
        );
        assert_eq!(parse_host_command("online"), Some(HostCommand::Event(TrackerEvent::Online)));
        assert_eq!(parse_host_command("unload"), Some(HostCommand::Unload));
        assert_eq!(parse_host_command("dance"), None);
    }

    #[test]
    fn config_flag_is_global() {
        let args = Args::try_parse_from(["learnclock", "flush", "--config", "/tmp/s.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(args.command, Command::Flush));
    }
}

//! companionctl - command-line client for the stats companion

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::RpcClient;
use companion_common::{AlarmSlot, Method, ResponseData};

#[derive(Parser, Debug)]
#[command(name = "companionctl", version, about = "Talk to the stats companion")]
struct Cli {
    /// Companion socket (defaults to $COMPANION_SOCKET, then the system socket)
    #[arg(long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Pull one metric and print its records as JSON
    Pull { tag: i32 },

    /// Arm an alarm slot (anomaly, periodic, pulling) at an elapsed-realtime ms
    SetAlarm { slot: AlarmSlot, wake_time_ms: i64 },

    /// Disarm an alarm slot
    CancelAlarm { slot: AlarmSlot },

    /// Ask the companion to handshake with the stats daemon
    Ready,

    /// Push a full package registry snapshot to the stats daemon
    Snapshot,

    /// Print the companion's state report
    Dump,
}

impl Command {
    fn into_method(self) -> Method {
        match self {
            Command::Pull { tag } => Method::Pull { tag },
            Command::SetAlarm { slot, wake_time_ms } => Method::SetAlarm { slot, wake_time_ms },
            Command::CancelAlarm { slot } => Method::CancelAlarm { slot },
            Command::Ready => Method::NotifyReady,
            Command::Snapshot => Method::TriggerRegistrySnapshot,
            Command::Dump => Method::Dump,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut client = RpcClient::connect(cli.socket.as_deref()).await?;
    match client.call(cli.command.into_method()).await? {
        ResponseData::Ok => println!("ok"),
        ResponseData::Records(records) => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        ResponseData::Dump(text) => print!("{}", text),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_alarm() {
        let cli = Cli::try_parse_from(["companionctl", "set-alarm", "pulling", "5000"]).unwrap();
        assert_eq!(
            cli.command,
            Command::SetAlarm {
                slot: AlarmSlot::Pulling,
                wake_time_ms: 5000
            }
        );
    }

    #[test]
    fn test_global_socket_flag() {
        let cli = Cli::try_parse_from(["companionctl", "dump", "--socket", "/tmp/c.sock"]).unwrap();
        assert_eq!(cli.socket.as_deref(), Some("/tmp/c.sock"));
        assert!(matches!(cli.command.into_method(), Method::Dump));
    }

    #[test]
    fn test_unknown_slot_rejected() {
        assert!(Cli::try_parse_from(["companionctl", "cancel-alarm", "hourly"]).is_err());
    }

    #[test]
    fn test_explicit_socket_wins() {
        assert_eq!(RpcClient::discover_socket_path(Some("/x.sock")), "/x.sock");
    }
}

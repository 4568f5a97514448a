//! Loopback demo: one server and one client on this machine.
//!
//! The client connects over UDP, the server switches to Game mode and fans out
//! a payload every 100ms until CTRL+C or ten rounds.
//!
//! Configuration comes from `GAMELINK_*` environment variables, or from the TOML
//! file passed as the first argument.

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, info};

use gamelink_protocol::config::NetworkConfig;
use gamelink_protocol::protocol::{Client, ClientEvent, Server, ServerEvent};
use gamelink_protocol::service::{run_client, run_server, shutdown_on_ctrl_c, ClientCommand, ServerCommand};
use gamelink_protocol::utils::logging::init_logging;

const ROUNDS: usize = 10;

fn load_config() -> gamelink_protocol::Result<NetworkConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    if config.client.server_address.is_broadcast() {
        config.client.server_address = Ipv4Addr::LOCALHOST;
    }
    config.validate_strict()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Demo failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: NetworkConfig) -> gamelink_protocol::Result<()> {
    let server: Server<_> = Server::open(config.server)?;
    let client = Client::open(config.client)?;

    let (server_cmd_tx, server_cmd_rx) = mpsc::channel(16);
    let (server_evt_tx, mut server_evt_rx) = mpsc::channel(16);
    let (server_stop_tx, server_stop_rx) = mpsc::channel(1);
    let (client_cmd_tx, client_cmd_rx) = mpsc::channel(16);
    let (client_evt_tx, mut client_evt_rx) = mpsc::channel(16);
    let (client_stop_tx, client_stop_rx) = mpsc::channel(1);

    let (ctrl_c_tx, mut ctrl_c_rx) = mpsc::channel(1);
    shutdown_on_ctrl_c(ctrl_c_tx);

    let server_task = tokio::spawn(run_server(server, server_cmd_rx, server_evt_tx, server_stop_rx));
    let client_task = tokio::spawn(run_client(client, client_cmd_rx, client_evt_tx, client_stop_rx));

    let _ = client_cmd_tx.send(ClientCommand::Connect).await;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut rounds = 0;
    loop {
        tokio::select! {
            _ = ctrl_c_rx.recv() => break,

            Some(event) = server_evt_rx.recv() => {
                info!(?event, "Server event");
                if matches!(event, ServerEvent::Connected { .. }) {
                    let _ = server_cmd_tx.send(ServerCommand::SwitchToGame).await;
                }
            }

            Some(event) = client_evt_rx.recv() => match event {
                ClientEvent::GameData { sequence, payload } => {
                    info!(sequence, payload = %String::from_utf8_lossy(&payload), "Client received game data");
                }
                other => info!(event = ?other, "Client event"),
            },

            _ = ticker.tick() => {
                let _ = server_cmd_tx
                    .send(ServerCommand::BroadcastGameData(Bytes::from_static(b"toto\0")))
                    .await;
                rounds += 1;
                if rounds >= ROUNDS {
                    break;
                }
            }
        }
    }

    let _ = client_stop_tx.send(()).await;
    if let Err(e) = client_task.await {
        error!(error = %e, "Client driver task failed");
    }
    let _ = server_stop_tx.send(()).await;
    if let Err(e) = server_task.await {
        error!(error = %e, "Server driver task failed");
    }
    Ok(())
}

use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::protocol::client::{Client, ClientEvent};
use crate::protocol::server::{Server, ServerEvent};
use crate::transport::Transport;

/// Time between polling rounds
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound on `poll` calls per round
pub const POLL_BUDGET: usize = 16;

/// Requests accepted by [`run_server`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    BroadcastGameData(Bytes),
    SwitchToLobby,
    SwitchToGame,
    Kick(usize),
}

/// Requests accepted by [`run_client`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Connect,
    SendGameData(Bytes),
    Disconnect,
}

/// Spawn a task that signals `shutdown_tx` on CTRL+C
pub fn shutdown_on_ctrl_c(shutdown_tx: mpsc::Sender<()>) {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });
}

/// Run a `poll` call that may join a key-derivation thread.
///
/// On a multi-thread runtime the worker's other tasks move elsewhere for the
/// duration. A current-thread runtime has no other worker, so the call runs
/// inline there.
fn poll_blocking<R>(poll: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => task::block_in_place(poll),
        _ => poll(),
    }
}

/// Drive a server until shutdown.
///
/// Stops when `shutdown_rx` fires, when every shutdown sender is dropped, or
/// when the event receiver is dropped. On the way out every peer is kicked and
/// the counters are logged. The server is handed back to the caller.
#[instrument(skip_all, name = "server_driver")]
pub async fn run_server<T, const N: usize>(
    mut server: Server<T, N>,
    mut commands: mpsc::Receiver<ServerCommand>,
    events: mpsc::Sender<ServerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Server<T, N>
where
    T: Transport,
{
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(mode = ?server.mode(), "Server driver started");

    'driver: loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server driver");
                break 'driver;
            }

            Some(command) = commands.recv() => apply_server_command(&mut server, command),

            _ = ticker.tick() => {
                for _ in 0..POLL_BUDGET {
                    let batch = match poll_blocking(|| server.poll()) {
                        Ok(batch) => batch,
                        Err(e) => {
                            error!(error = %e, "Server poll failed");
                            break;
                        }
                    };
                    for event in batch {
                        if events.send(event).await.is_err() {
                            warn!("Server event receiver dropped");
                            break 'driver;
                        }
                    }
                }
            }
        }
    }

    server.kick_all();
    server.metrics().log_metrics("server");
    server
}

fn apply_server_command<T: Transport, const N: usize>(server: &mut Server<T, N>, command: ServerCommand) {
    debug!(?command, "Server command");
    match command {
        ServerCommand::BroadcastGameData(payload) => {
            if let Err(e) = server.broadcast_game_data(&payload) {
                warn!(error = %e, "Broadcast rejected");
            }
        }
        ServerCommand::SwitchToLobby => server.switch_to_lobby(),
        ServerCommand::SwitchToGame => server.switch_to_game(),
        ServerCommand::Kick(client_id) => {
            if !server.kick_client(client_id) {
                debug!(client_id, "Kick ignored, slot not connected");
            }
        }
    }
}

/// Drive a client until shutdown.
///
/// Same stop conditions as [`run_server`]. The client disconnects on the way
/// out, notifying the server if a session key exists.
#[instrument(skip_all, name = "client_driver")]
pub async fn run_client<T>(
    mut client: Client<T>,
    mut commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ClientEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Client<T>
where
    T: Transport,
{
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Client driver started");

    'driver: loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down client driver");
                break 'driver;
            }

            Some(command) = commands.recv() => apply_client_command(&mut client, command),

            _ = ticker.tick() => {
                for _ in 0..POLL_BUDGET {
                    let batch = match poll_blocking(|| client.poll()) {
                        Ok(batch) => batch,
                        Err(e) => {
                            error!(error = %e, "Client poll failed");
                            break;
                        }
                    };
                    for event in batch {
                        if events.send(event).await.is_err() {
                            warn!("Client event receiver dropped");
                            break 'driver;
                        }
                    }
                }
            }
        }
    }

    client.disconnect();
    client.metrics().log_metrics("client");
    client
}

fn apply_client_command<T: Transport>(client: &mut Client<T>, command: ClientCommand) {
    debug!(?command, "Client command");
    match command {
        ClientCommand::Connect => match client.connect() {
            Ok(true) => {}
            Ok(false) => debug!(state = ?client.state(), "Connect ignored"),
            Err(e) => error!(error = %e, "Connect failed"),
        },
        ClientCommand::SendGameData(payload) => match client.send_game_data(&payload) {
            Ok(true) => {}
            Ok(false) => debug!("Not connected, game data discarded"),
            Err(e) => warn!(error = %e, "Failed to send game data"),
        },
        ClientCommand::Disconnect => {
            client.disconnect();
        }
    }
}

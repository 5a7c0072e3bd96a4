use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::unix_time_ms;
use crate::error::{AppError, AppResult, DistributedError};
use crate::workload::WorkloadRegistry;

use super::WorkerSettings;
use super::command::ControllerCommand;
use super::run_exec::PreparedRun;
use crate::distributed::protocol::{
    ErrorMessage, HeartbeatMessage, HelloMessage, RunMessage, WireMessage, read_message,
    send_message,
};

pub(super) fn send_wire(
    tx: &mpsc::UnboundedSender<WireMessage>,
    message: WireMessage,
) -> AppResult<()> {
    tx.send(message)
        .map_err(|_err| AppError::distributed(DistributedError::ControllerConnectionClosed))
}

/// One connection to the controller, from hello until the socket closes.
///
/// Returns `Ok` when the controller closed the connection cleanly.
pub(super) async fn run_worker_session(
    settings: &WorkerSettings,
    registry: &WorkloadRegistry,
) -> AppResult<()> {
    info!("Connecting to controller {}", settings.join);
    let stream = TcpStream::connect(&settings.join).await.map_err(|err| {
        AppError::distributed(DistributedError::Connection {
            addr: settings.join.clone(),
            source: err,
        })
    })?;
    info!("Connected to controller {}", settings.join);
    let (read_half, mut write_half) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(err) = send_message(&mut write_half, &message).await {
                debug!("Failed to send {}: {}", message.kind(), err);
                break;
            }
        }
    });

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ControllerCommand>();
    let mut reader = BufReader::new(read_half);
    let reader_handle = tokio::spawn(async move {
        loop {
            let message = match read_message(&mut reader).await {
                Ok(message) => message,
                Err(err) => {
                    drop(cmd_tx.send(ControllerCommand::Disconnected(err)));
                    break;
                }
            };
            let command = match message {
                WireMessage::CreateWorkload(message) => ControllerCommand::CreateWorkload(message),
                WireMessage::Execute(message) => ControllerCommand::Execute(message),
                WireMessage::Stop(message) => ControllerCommand::Stop(message.run_id),
                WireMessage::Teardown(message) => ControllerCommand::Teardown(message.run_id),
                WireMessage::Error(message) => {
                    ControllerCommand::Error(AppError::distributed(DistributedError::Remote {
                        message: message.message,
                    }))
                }
                WireMessage::Heartbeat(_) => continue,
                WireMessage::Hello(_)
                | WireMessage::Metadata(_)
                | WireMessage::SetupComplete(_)
                | WireMessage::Progress(_)
                | WireMessage::ProgressBatch(_)
                | WireMessage::ExecuteComplete(_)
                | WireMessage::TeardownComplete(_) => ControllerCommand::Error(
                    AppError::distributed(DistributedError::UnexpectedMessageFromController),
                ),
            };
            if cmd_tx.send(command).is_err() {
                break;
            }
        }
    });

    send_wire(&out_tx, WireMessage::Hello(build_hello(settings, registry)))?;
    debug!("Sent hello as {}", settings.worker_id);

    let heartbeat_tx = out_tx.clone();
    let heartbeat_interval = settings.heartbeat_interval;
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let message = WireMessage::Heartbeat(HeartbeatMessage {
                sent_at_ms: unix_time_ms(),
            });
            if send_wire(&heartbeat_tx, message).is_err() {
                break;
            }
        }
    });

    let session_result = command_loop(settings, registry, &out_tx, &mut cmd_rx).await;

    heartbeat_handle.abort();
    drop(out_tx);
    if writer_handle.await.is_err() {
        debug!("Writer task ended abnormally");
    }
    reader_handle.abort();
    session_result
}

async fn command_loop(
    settings: &WorkerSettings,
    registry: &WorkloadRegistry,
    out_tx: &mpsc::UnboundedSender<WireMessage>,
    cmd_rx: &mut mpsc::UnboundedReceiver<ControllerCommand>,
) -> AppResult<()> {
    let mut current: Option<PreparedRun> = None;
    let outcome = loop {
        let Some(command) = cmd_rx.recv().await else {
            break Err(AppError::distributed(
                DistributedError::ControllerConnectionClosed,
            ));
        };
        match command {
            ControllerCommand::CreateWorkload(message) => {
                if let Some(previous) = current.take() {
                    warn!("Run {} replaced before teardown", previous.run_id());
                    previous.abandon();
                }
                match PreparedRun::create(registry, settings.worker_id, &message).await {
                    Ok(prepared) => {
                        current = Some(prepared);
                        send_wire(
                            out_tx,
                            WireMessage::SetupComplete(RunMessage {
                                run_id: message.run_id,
                            }),
                        )?;
                    }
                    Err(err) => {
                        warn!("Run {}: setup failed: {}", message.run_id, err);
                        send_wire(
                            out_tx,
                            WireMessage::Error(ErrorMessage {
                                message: format!("Run {} setup failed: {}", message.run_id, err),
                            }),
                        )?;
                        break Err(err);
                    }
                }
            }
            ControllerCommand::Execute(message) => match current.as_mut() {
                Some(run) if run.run_id() == message.run_id => {
                    run.start_execute(&message.execute_counts, out_tx, settings.batch_size);
                }
                Some(_) | None => debug!("Execute for unknown run {} ignored", message.run_id),
            },
            ControllerCommand::Stop(run_id) => match current.as_ref() {
                Some(run) if run.run_id() == run_id => run.stop(),
                Some(_) | None => debug!("Stop for unknown run {} ignored", run_id),
            },
            ControllerCommand::Teardown(run_id) => {
                match current.take_if(|run| run.run_id() == run_id) {
                    Some(run) => {
                        run.teardown().await;
                        send_wire(out_tx, WireMessage::TeardownComplete(RunMessage { run_id }))?;
                    }
                    None => debug!("Teardown for unknown run {} ignored", run_id),
                }
            }
            ControllerCommand::Error(err) => break Err(err),
            ControllerCommand::Disconnected(AppError::Distributed(
                DistributedError::ConnectionClosed,
            )) => {
                info!("Controller closed the connection");
                break Ok(());
            }
            ControllerCommand::Disconnected(err) => break Err(err),
        }
    };
    if let Some(run) = current.take() {
        run.abandon();
    }
    outcome
}

fn build_hello(settings: &WorkerSettings, registry: &WorkloadRegistry) -> HelloMessage {
    HelloMessage {
        worker_id: settings.worker_id,
        hostname: settings.hostname.clone(),
        workloads: registry.catalog(),
        metadata: settings.metadata.clone(),
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::engine::{ExecutionEngine, WorkerCommand, WorkerId};
use crate::error::{AppError, AppResult, DistributedError};

use crate::distributed::protocol::{
    ErrorMessage, HelloMessage, WireMessage, read_message, send_message,
};

#[derive(Debug, Clone, Copy)]
pub(super) struct ConnectionSettings {
    pub(super) hello_timeout: Duration,
    pub(super) heartbeat_timeout: Duration,
}

struct AcceptedWorker {
    hello: HelloMessage,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub(super) async fn accept_workers(
    listener: TcpListener,
    engine: Arc<ExecutionEngine>,
    settings: ConnectionSettings,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept worker: {}", err);
                continue;
            }
        };
        debug!("Worker connection from {}", peer);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(err) = serve_worker(stream, &engine, settings).await {
                warn!("Worker session from {} ended: {}", peer, err);
            }
        });
    }
}

async fn accept_worker(stream: TcpStream, hello_timeout: Duration) -> AppResult<AcceptedWorker> {
    let (read_half, writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let hello = match timeout(hello_timeout, read_message(&mut reader)).await {
        Ok(result) => match result? {
            WireMessage::Hello(message) => message,
            WireMessage::Error(message) => {
                return Err(AppError::distributed(DistributedError::Remote {
                    message: message.message,
                }));
            }
            WireMessage::Metadata(_)
            | WireMessage::SetupComplete(_)
            | WireMessage::Progress(_)
            | WireMessage::ProgressBatch(_)
            | WireMessage::ExecuteComplete(_)
            | WireMessage::TeardownComplete(_)
            | WireMessage::Heartbeat(_)
            | WireMessage::CreateWorkload(_)
            | WireMessage::Execute(_)
            | WireMessage::Stop(_)
            | WireMessage::Teardown(_) => {
                return Err(AppError::distributed(
                    DistributedError::ExpectedHelloFromWorker,
                ));
            }
        },
        Err(_elapsed) => {
            return Err(AppError::distributed(DistributedError::WorkerHelloTimeout));
        }
    };
    Ok(AcceptedWorker {
        hello,
        reader,
        writer,
    })
}

/// Runs one worker session: hello, registration, then the read loop until
/// the socket closes or the worker goes silent.
async fn serve_worker(
    stream: TcpStream,
    engine: &ExecutionEngine,
    settings: ConnectionSettings,
) -> AppResult<()> {
    let AcceptedWorker {
        hello,
        mut reader,
        mut writer,
    } = accept_worker(stream, settings.hello_timeout).await?;
    let worker_id = hello.worker_id;

    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let registered = engine.register_worker(
        worker_id,
        Arc::new(command_tx),
        hello.workloads,
        hello.metadata,
    );
    if !registered {
        let rejection = WireMessage::Error(ErrorMessage {
            message: format!("Worker {} is already connected.", worker_id),
        });
        send_message(&mut writer, &rejection).await?;
        return Err(AppError::distributed(DistributedError::DuplicateWorker {
            worker_id: worker_id.to_string(),
        }));
    }
    info!("Worker {} joined from host '{}'", worker_id, hello.hostname);

    let writer_task = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let message = WireMessage::from(command);
            if let Err(err) = send_message(&mut writer, &message).await {
                debug!("Failed to send {} to worker: {}", message.kind(), err);
                break;
            }
        }
    });

    let outcome = read_worker_messages(&mut reader, engine, worker_id, settings).await;
    writer_task.abort();
    if engine.remove_connection(&worker_id).is_some() {
        debug!("Worker {} unregistered", worker_id);
    }
    outcome
}

async fn read_worker_messages(
    reader: &mut BufReader<OwnedReadHalf>,
    engine: &ExecutionEngine,
    worker_id: WorkerId,
    settings: ConnectionSettings,
) -> AppResult<()> {
    loop {
        let message = match timeout(settings.heartbeat_timeout, read_message(reader)).await {
            Ok(Ok(message)) => message,
            Ok(Err(AppError::Distributed(DistributedError::ConnectionClosed))) => {
                info!("Worker {} closed its connection", worker_id);
                return Ok(());
            }
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => {
                return Err(AppError::distributed(DistributedError::HeartbeatTimeout));
            }
        };
        match dispatch_worker_message(engine, worker_id, message) {
            SessionFlow::Continue => {}
            SessionFlow::Close(reason) => {
                return Err(AppError::distributed(DistributedError::Remote {
                    message: reason,
                }));
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum SessionFlow {
    Continue,
    Close(String),
}

/// Feeds one worker message into the engine.
///
/// A worker-reported error ends its session; the engine then treats the
/// worker like any other disconnect.
pub(super) fn dispatch_worker_message(
    engine: &ExecutionEngine,
    worker_id: WorkerId,
    message: WireMessage,
) -> SessionFlow {
    match message {
        WireMessage::Heartbeat(_) => {}
        WireMessage::Metadata(message) => {
            engine.set_metadata(&worker_id, message.workloads, message.metadata);
        }
        WireMessage::SetupComplete(message) => {
            engine.report_setup_complete(&worker_id, message.run_id);
        }
        WireMessage::ExecuteComplete(message) => {
            engine.report_execute_complete(&worker_id, message.run_id);
        }
        WireMessage::TeardownComplete(message) => {
            engine.report_teardown_complete(&worker_id, message.run_id);
        }
        WireMessage::Progress(message) => {
            engine.report_progress(&worker_id, message.run_id, &message.sample.into());
        }
        WireMessage::ProgressBatch(message) => {
            engine.report_progress_batch(&worker_id, message.run_id, &message.batch.into());
        }
        WireMessage::Error(message) => {
            warn!("Worker {} reported an error: {}", worker_id, message.message);
            return SessionFlow::Close(message.message);
        }
        WireMessage::Hello(_)
        | WireMessage::CreateWorkload(_)
        | WireMessage::Execute(_)
        | WireMessage::Stop(_)
        | WireMessage::Teardown(_) => {
            warn!(
                "Unexpected {} message from worker {}; ignoring",
                message.kind(),
                worker_id
            );
        }
    }
    SessionFlow::Continue
}

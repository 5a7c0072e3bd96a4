use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("Missing required option: {option}")]
    MissingOption { option: &'static str },
    #[error("Missing role: set --controller-listen or --worker-join.")]
    MissingRole,
    #[error("Missing --control-listen for manual controller.")]
    MissingControlListen,
    #[error("Missing --workload for auto controller.")]
    MissingWorkload,
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Unexpected message from controller.")]
    UnexpectedMessageFromController,
    #[error("Controller connection closed.")]
    ControllerConnectionClosed,
    #[error("Timed out waiting for worker hello.")]
    WorkerHelloTimeout,
    #[error("Expected hello from worker.")]
    ExpectedHelloFromWorker,
    #[error("Worker {worker_id} is already connected.")]
    DuplicateWorker { worker_id: String },
    #[error("Worker heartbeat timed out.")]
    HeartbeatTimeout,
    #[error("Run {run_id} finished as {completion}.")]
    RunNotCompleted { run_id: String, completion: String },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Remote error: {message}")]
    Remote { message: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}

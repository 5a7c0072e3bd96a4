use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    EngineEvent, ExecutionBudget, ExecutionEngine, RunCompletion, RunId, StartRequest,
};
use crate::error::EngineError;
use crate::workload::WorkloadParameters;

use super::http::{HttpRequest, read_http_request, write_error_response, write_json_response};

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub(super) struct ControlError {
    pub(super) status: u16,
    pub(super) message: String,
}

impl ControlError {
    pub(super) fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(super) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }
}

impl From<EngineError> for ControlError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::InvalidConcurrency | EngineError::InvalidParameters { .. } => 400,
            EngineError::WorkloadNotFound { .. } => 404,
            EngineError::AlreadyRunning | EngineError::NotRunning => 409,
            EngineError::NoWorkersAvailable | EngineError::LinkClosed { .. } => 503,
            EngineError::Timeout { .. } => 504,
            #[cfg(test)]
            EngineError::TestExpectation { .. } | EngineError::TestExpectationValue { .. } => 500,
        };
        Self::new(status, error.to_string())
    }
}

/// Body accepted by every run-starting endpoint. Fields a route does not
/// use are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct RunBody {
    pub(super) workload: Option<String>,
    pub(super) parameters: BTreeMap<String, Value>,
    pub(super) concurrency: Option<u32>,
    pub(super) worker_limit: Option<usize>,
    pub(super) total_request: Option<u64>,
    pub(super) execute_time_seconds: Option<u64>,
    pub(super) repeat_count: Option<u32>,
    pub(super) increase_total_request: u64,
    pub(super) increase_worker_limit: usize,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    run_id: RunId,
    workload: String,
    budget: ExecutionBudget,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    run_id: RunId,
}

/// Growth applied between repeated runs.
#[derive(Debug, Clone, Copy)]
struct RepeatStep {
    remaining: u32,
    increase_total: u64,
    increase_workers: usize,
}

/// HTTP surface over one engine. Owns the timer or repeat task that
/// belongs to the latest started run.
pub(super) struct ControlPlane {
    engine: Arc<ExecutionEngine>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl ControlPlane {
    pub(super) const fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            background: Mutex::new(None),
        }
    }

    /// Aborts any pending duration timer or repeat driver.
    pub(super) fn stop_background(&self) {
        let previous = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    fn replace_background(&self, handle: Option<JoinHandle<()>>) {
        let previous = {
            let mut background = self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *background, handle)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(super) fn route(&self, request: &HttpRequest) -> Result<Value, ControlError> {
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/api/request") => self.start_request(&parse_body(request)?),
            ("POST", "/api/duration") => self.start_duration(&parse_body(request)?),
            ("POST", "/api/infinite") => self.start_infinite(&parse_body(request)?),
            ("POST", "/api/repeat") => self.start_repeat(&parse_body(request)?),
            ("POST", "/api/cancel") => self.cancel(),
            ("GET", "/api/isrunning") => to_json(&self.engine.is_running()),
            ("GET", "/api/connections") => to_json(&self.engine.connected_count()),
            ("GET", "/api/workers") => to_json(&self.engine.workers()),
            ("GET", "/api/workloads") => to_json(&self.engine.workload_catalog()),
            ("GET", "/api/latestresult") => match self.engine.latest_result() {
                Some(entry) => to_json(entry.as_ref()),
                None => Err(ControlError::not_found("No results yet")),
            },
            ("GET", "/api/resultscount") => to_json(&self.engine.history_count()),
            ("GET", "/api/resultslist") => to_json(&self.engine.history_list()),
            ("GET", "/api/getresult") => self.get_result(request),
            (
                _,
                "/api/request" | "/api/duration" | "/api/infinite" | "/api/repeat" | "/api/cancel"
                | "/api/isrunning" | "/api/connections" | "/api/workers" | "/api/workloads"
                | "/api/latestresult" | "/api/resultscount" | "/api/resultslist"
                | "/api/getresult",
            ) => Err(ControlError::new(405, "Method not allowed")),
            _ => Err(ControlError::not_found("Not found")),
        }
    }

    fn start_request(&self, body: &RunBody) -> Result<Value, ControlError> {
        let total = positive(body.total_request, "total_request")?;
        let request = build_request(body, ExecutionBudget::Total(total))?;
        let run_id = self.engine.start_run(request.clone())?;
        self.replace_background(None);
        started(run_id, request)
    }

    fn start_infinite(&self, body: &RunBody) -> Result<Value, ControlError> {
        let request = build_request(body, ExecutionBudget::Unbounded)?;
        let run_id = self.engine.start_run(request.clone())?;
        self.replace_background(None);
        started(run_id, request)
    }

    fn start_duration(&self, body: &RunBody) -> Result<Value, ControlError> {
        let seconds = positive(body.execute_time_seconds, "execute_time_seconds")?;
        let request = build_request(body, ExecutionBudget::Unbounded)?;
        let run_id = self.engine.start_run(request.clone())?;
        let engine = Arc::clone(&self.engine);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            if engine.cancel_run(run_id) {
                info!("Run {} reached its {}s duration", run_id, seconds);
            }
        });
        self.replace_background(Some(timer));
        started(run_id, request)
    }

    fn start_repeat(&self, body: &RunBody) -> Result<Value, ControlError> {
        let total = positive(body.total_request, "total_request")?;
        let repeat_count = body
            .repeat_count
            .filter(|count| *count > 0)
            .ok_or_else(|| ControlError::bad_request("'repeat_count' must be >= 1"))?;
        let mut request = build_request(body, ExecutionBudget::Total(total))?;
        if body.increase_worker_limit > 0 && request.worker_limit.is_none() {
            request.worker_limit = Some(self.engine.connected_count());
        }

        let events = self.engine.subscribe();
        let run_id = self.engine.start_run(request.clone())?;
        let step = RepeatStep {
            remaining: repeat_count.saturating_sub(1),
            increase_total: body.increase_total_request,
            increase_workers: body.increase_worker_limit,
        };
        let driver = tokio::spawn(drive_repeats(
            Arc::clone(&self.engine),
            events,
            run_id,
            request.clone(),
            step,
        ));
        self.replace_background(Some(driver));
        started(run_id, request)
    }

    fn cancel(&self) -> Result<Value, ControlError> {
        self.stop_background();
        let run_id = self.engine.cancel()?;
        info!("Run {} cancelled from the control plane", run_id);
        to_json(&CancelResponse { run_id })
    }

    fn get_result(&self, request: &HttpRequest) -> Result<Value, ControlError> {
        let raw = request
            .query
            .get("run_id")
            .ok_or_else(|| ControlError::bad_request("Missing 'run_id' query parameter"))?;
        let run_id = raw
            .parse::<RunId>()
            .map_err(|err| ControlError::bad_request(format!("Invalid run id '{}': {}", raw, err)))?;
        match self.engine.history_result(&run_id) {
            Some(entry) => to_json(entry.as_ref()),
            None => Err(ControlError::not_found(format!("No result for run {}", run_id))),
        }
    }
}

/// Starts the next run each time the previous one completes, growing the
/// total and worker limit by the configured step.
async fn drive_repeats(
    engine: Arc<ExecutionEngine>,
    mut events: broadcast::Receiver<EngineEvent>,
    first_run: RunId,
    mut request: StartRequest,
    mut step: RepeatStep,
) {
    let mut current = first_run;
    while step.remaining > 0 {
        let completion = loop {
            match events.recv().await {
                Ok(EngineEvent::RunFinished { run_id, completion }) if run_id == current => {
                    break completion;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Repeat driver skipped {} engine events", skipped);
                    if engine.current_run_id() != Some(current) {
                        let finished = engine
                            .history_result(&current)
                            .and_then(|entry| entry.summary.totals.as_ref().map(|t| t.completion));
                        break finished.unwrap_or(RunCompletion::Aborted);
                    }
                }
                Err(RecvError::Closed) => return,
            }
        };
        if completion != RunCompletion::Completed {
            info!("Repeat series stopped: run {} {}", current, completion);
            return;
        }

        if let ExecutionBudget::Total(total) = request.budget {
            request.budget = ExecutionBudget::Total(total.saturating_add(step.increase_total));
        }
        request.worker_limit = request
            .worker_limit
            .map(|limit| limit.saturating_add(step.increase_workers));
        match engine.start_run(request.clone()) {
            Ok(run_id) => {
                info!(
                    "Repeat run {} started ({} left after this one)",
                    run_id,
                    step.remaining.saturating_sub(1)
                );
                current = run_id;
            }
            Err(err) => {
                warn!("Repeat series stopped: {}", err);
                return;
            }
        }
        step.remaining = step.remaining.saturating_sub(1);
    }
}

fn parse_body(request: &HttpRequest) -> Result<RunBody, ControlError> {
    if request.body.is_empty() {
        return Ok(RunBody::default());
    }
    serde_json::from_slice::<RunBody>(&request.body)
        .map_err(|err| ControlError::bad_request(format!("Invalid JSON: {}", err)))
}

fn build_request(body: &RunBody, budget: ExecutionBudget) -> Result<StartRequest, ControlError> {
    let workload = body
        .workload
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ControlError::bad_request("'workload' is required"))?;
    Ok(StartRequest {
        workload: workload.to_owned(),
        concurrency: body.concurrency.unwrap_or(1),
        budget,
        worker_limit: body.worker_limit,
        parameters: parameters_from_json(&body.parameters)?,
    })
}

/// Scalars become strings; `null` means "not provided".
pub(super) fn parameters_from_json(
    raw: &BTreeMap<String, Value>,
) -> Result<WorkloadParameters, ControlError> {
    let mut parameters = WorkloadParameters::new();
    for (name, value) in raw {
        let text = match value {
            Value::Null => continue,
            Value::String(text) => text.clone(),
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(ControlError::bad_request(format!(
                    "Parameter '{}' must be a scalar",
                    name
                )));
            }
        };
        parameters.insert(name.clone(), text);
    }
    Ok(parameters)
}

fn positive(value: Option<u64>, field: &str) -> Result<u64, ControlError> {
    value
        .filter(|value| *value > 0)
        .ok_or_else(|| ControlError::bad_request(format!("'{}' must be >= 1", field)))
}

fn started(run_id: RunId, request: StartRequest) -> Result<Value, ControlError> {
    to_json(&StartResponse {
        run_id,
        workload: request.workload,
        budget: request.budget,
    })
}

fn to_json<T>(value: &T) -> Result<Value, ControlError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_value(value)
        .map_err(|err| ControlError::new(500, format!("Failed to encode response: {}", err)))
}

pub(super) async fn serve_control(listener: TcpListener, plane: Arc<ControlPlane>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept control connection: {}", err);
                continue;
            }
        };
        debug!("Control connection from {}", peer);
        let plane = Arc::clone(&plane);
        tokio::spawn(async move {
            handle_control_connection(socket, &plane).await;
        });
    }
}

pub(super) async fn handle_control_connection<S>(mut socket: S, plane: &ControlPlane)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_http_request(&mut socket)).await;
    let outcome = match read {
        Ok(Ok(request)) => plane.route(&request),
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => Err(ControlError::bad_request("Timed out reading request")),
    };
    let written = match outcome {
        Ok(value) => write_json_response(&mut socket, 200, &value).await,
        Err(err) => {
            debug!("Control request failed ({}): {}", err.status, err.message);
            write_error_response(&mut socket, &err).await
        }
    };
    if let Err(err) = written {
        debug!("Control client went away: {}", err);
    }
}

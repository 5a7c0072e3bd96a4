use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use url::Url;

use crate::error::WorkloadError;

use super::catalog::{
    ParameterKind, ParameterSpec, WorkloadDescriptor, WorkloadParameters, parameter_u64,
};
use super::registry::{Workload, WorkloadContext, WorkloadRegistry};

pub const ECHO_WORKLOAD: &str = "echo";
pub const HTTP_WORKLOAD: &str = "http";

const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Registers the `echo` and `http` workloads.
///
/// # Errors
///
/// Returns an error when either name is already registered.
pub fn register_builtins(registry: &mut WorkloadRegistry) -> Result<(), WorkloadError> {
    registry.register(echo_descriptor(), |parameters| {
        EchoWorkload::from_parameters(parameters)
            .map(|workload| Box::new(workload) as Box<dyn Workload>)
    })?;
    registry.register(http_descriptor(), |parameters| {
        HttpWorkload::from_parameters(parameters)
            .map(|workload| Box::new(workload) as Box<dyn Workload>)
    })
}

fn echo_descriptor() -> WorkloadDescriptor {
    WorkloadDescriptor::new(ECHO_WORKLOAD)
        .with_parameter(ParameterSpec::new("delay_ms", ParameterKind::UInt).with_default("0"))
        .with_parameter(ParameterSpec::new("jitter_ms", ParameterKind::UInt).with_default("0"))
        .with_parameter(ParameterSpec::new("fail_every", ParameterKind::UInt).with_default("0"))
}

fn http_descriptor() -> WorkloadDescriptor {
    WorkloadDescriptor::new(HTTP_WORKLOAD)
        .with_parameter(ParameterSpec::new("url", ParameterKind::String))
        .with_parameter(
            ParameterSpec::new("method", ParameterKind::Enum)
                .with_choices(&["GET", "POST", "PUT", "DELETE", "HEAD"])
                .with_default("GET"),
        )
        .with_parameter(
            ParameterSpec::new("expected_status", ParameterKind::UInt).with_default("200"),
        )
        .with_parameter(
            ParameterSpec::new("timeout_ms", ParameterKind::UInt)
                .with_default(DEFAULT_HTTP_TIMEOUT_MS.to_string()),
        )
        .with_parameter(ParameterSpec::new("body", ParameterKind::String).nullable())
}

/// Sleeps for `delay_ms` (+ up to `jitter_ms`) and fails every
/// `fail_every`-th execution when that is non-zero.
#[derive(Debug)]
struct EchoWorkload {
    delay: Duration,
    jitter_ms: u64,
    fail_every: u64,
    executed: u64,
}

impl EchoWorkload {
    fn from_parameters(parameters: &WorkloadParameters) -> Result<Self, WorkloadError> {
        Ok(Self {
            delay: Duration::from_millis(parameter_u64(parameters, "delay_ms")?.unwrap_or(0)),
            jitter_ms: parameter_u64(parameters, "jitter_ms")?.unwrap_or(0),
            fail_every: parameter_u64(parameters, "fail_every")?.unwrap_or(0),
            executed: 0,
        })
    }
}

#[async_trait]
impl Workload for EchoWorkload {
    async fn execute(&mut self, _context: &WorkloadContext) -> Result<(), WorkloadError> {
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        let pause = self.delay.saturating_add(jitter);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pause).await;
        }

        self.executed = self.executed.saturating_add(1);
        let failing = self
            .executed
            .checked_rem(self.fail_every)
            .is_some_and(|rest| rest == 0);
        if failing {
            return Err(WorkloadError::Failed {
                message: format!("echo failure on execution {}", self.executed),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HttpWorkload {
    client: reqwest::Client,
    url: Url,
    method: reqwest::Method,
    expected_status: u16,
    body: Option<String>,
}

impl HttpWorkload {
    fn from_parameters(parameters: &WorkloadParameters) -> Result<Self, WorkloadError> {
        let raw_url = parameters
            .get("url")
            .ok_or_else(|| WorkloadError::MissingParameter {
                name: "url".to_owned(),
            })?;
        let url = Url::parse(raw_url).map_err(|err| WorkloadError::InvalidUrl {
            url: raw_url.clone(),
            source: err,
        })?;
        let method_name = parameters.get("method").map_or("GET", String::as_str);
        let method = reqwest::Method::from_bytes(method_name.as_bytes()).map_err(|_err| {
            WorkloadError::InvalidParameterValue {
                name: "method".to_owned(),
                expected: "an HTTP method",
                value: method_name.to_owned(),
            }
        })?;
        let expected_status = parameter_u64(parameters, "expected_status")?.unwrap_or(200);
        let expected_status = u16::try_from(expected_status).map_err(|_err| {
            WorkloadError::InvalidParameterValue {
                name: "expected_status".to_owned(),
                expected: "an HTTP status code",
                value: expected_status.to_string(),
            }
        })?;
        let timeout_ms =
            parameter_u64(parameters, "timeout_ms")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| WorkloadError::Request { source: err })?;

        Ok(Self {
            client,
            url,
            method,
            expected_status,
            body: parameters.get("body").cloned(),
        })
    }
}

#[async_trait]
impl Workload for HttpWorkload {
    async fn execute(&mut self, _context: &WorkloadContext) -> Result<(), WorkloadError> {
        let mut request = self.client.request(self.method.clone(), self.url.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }
        let response = request
            .send()
            .await
            .map_err(|err| WorkloadError::Request { source: err })?;
        let status = response.status().as_u16();
        if status != self.expected_status {
            return Err(WorkloadError::UnexpectedStatus {
                expected: self.expected_status,
                actual: status,
            });
        }
        Ok(())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("Unknown workload '{name}'.")]
    UnknownWorkload { name: String },
    #[error("Workload '{name}' is already registered.")]
    DuplicateWorkload { name: String },
    #[error("Unknown parameter '{name}'.")]
    UnknownParameter { name: String },
    #[error("Missing required parameter '{name}'.")]
    MissingParameter { name: String },
    #[error("Parameter '{name}' expects {expected}, got '{value}'.")]
    InvalidParameterValue {
        name: String,
        expected: &'static str,
        value: String,
    },
    #[error("Parameter '{name}' must be one of [{choices}], got '{value}'.")]
    InvalidChoice {
        name: String,
        choices: String,
        value: String,
    },
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected status {actual} (expected {expected}).")]
    UnexpectedStatus { expected: u16, actual: u16 },
    #[error("{message}")]
    Failed { message: String },
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

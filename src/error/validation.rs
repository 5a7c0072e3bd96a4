use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid key/value pair '{value}'. Expected 'key=value'.")]
    InvalidKeyValue { value: String },
    #[error("Key must not be empty in '{value}'.")]
    EmptyKey { value: String },
    #[error("Invalid boolean '{value}'. Expected true/false, yes/no, on/off, or 1/0.")]
    InvalidBoolean { value: String },
    #[error("Invalid controller mode '{value}'. Use auto or manual.")]
    InvalidControllerMode { value: String },
    #[error("Invalid worker id '{value}': {source}")]
    InvalidWorkerId {
        value: String,
        #[source]
        source: uuid::Error,
    },
    #[error("Value must be >= {min}.")]
    ValueTooSmall { min: u64 },
    #[error("Invalid value: {source}")]
    InvalidNumber {
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'. Expected a number followed by ms, s, m, or h.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration number in '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration is too large.")]
    DurationOverflow,
    #[error("Invalid duration unit '{unit}'. Use ms, s, m, or h.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration must be > 0.")]
    DurationZero,
    #[error("Cannot run as controller and worker at the same time.")]
    ControllerWorkerConflict,
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

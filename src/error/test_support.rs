use super::{ConfigError, DistributedError, EngineError, ValidationError, WorkloadError};

impl From<&'static str> for ValidationError {
    fn from(message: &'static str) -> Self {
        ValidationError::TestExpectation { message }
    }
}

impl From<String> for ValidationError {
    fn from(value: String) -> Self {
        ValidationError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ConfigError {
    fn from(message: &'static str) -> Self {
        ConfigError::TestExpectation { message }
    }
}

impl From<String> for ConfigError {
    fn from(value: String) -> Self {
        ConfigError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for EngineError {
    fn from(message: &'static str) -> Self {
        EngineError::TestExpectation { message }
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        EngineError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for DistributedError {
    fn from(message: &'static str) -> Self {
        DistributedError::TestExpectation { message }
    }
}

impl From<String> for DistributedError {
    fn from(value: String) -> Self {
        DistributedError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for WorkloadError {
    fn from(message: &'static str) -> Self {
        WorkloadError::TestExpectation { message }
    }
}

impl From<String> for WorkloadError {
    fn from(value: String) -> Self {
        WorkloadError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

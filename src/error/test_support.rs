use super::{ConfigError, DefinitionError, DistributedError, PersistenceError, ValidationError};

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

impl From<&'static str> for DefinitionError {
    fn from(message: &'static str) -> Self {
        DefinitionError::TestExpectation { message }
    }
}

impl From<String> for DefinitionError {
    fn from(value: String) -> Self {
        DefinitionError::TestExpectationValue {
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

impl From<&'static str> for PersistenceError {
    fn from(message: &'static str) -> Self {
        PersistenceError::TestExpectation { message }
    }
}

impl From<String> for PersistenceError {
    fn from(value: String) -> Self {
        PersistenceError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

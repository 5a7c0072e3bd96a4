use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WorkloadError;

/// Resolved `name -> value` parameters handed to a workload factory.
pub type WorkloadParameters = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Bool,
    Int,
    UInt,
    String,
    Enum,
}

impl ParameterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ParameterKind::Bool => "Bool",
            ParameterKind::Int => "Int",
            ParameterKind::UInt => "UInt",
            ParameterKind::String => "String",
            ParameterKind::Enum => "Enum",
        }
    }
}

/// Declared shape of one workload parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            choices: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.kind = ParameterKind::Enum;
        self.choices = choices.iter().map(|choice| (*choice).to_owned()).collect();
        self
    }

    /// Display label such as `UInt` or `String?`.
    #[must_use]
    pub fn type_label(&self) -> String {
        if self.nullable {
            format!("{}?", self.kind.as_str())
        } else {
            self.kind.as_str().to_owned()
        }
    }

    fn check(&self, value: &str) -> Result<(), WorkloadError> {
        let invalid = |expected: &'static str| WorkloadError::InvalidParameterValue {
            name: self.name.clone(),
            expected,
            value: value.to_owned(),
        };
        match self.kind {
            ParameterKind::Bool => parse_bool(value).map(drop).ok_or_else(|| invalid("a boolean")),
            ParameterKind::Int => value
                .trim()
                .parse::<i64>()
                .map(drop)
                .map_err(|_err| invalid("an integer")),
            ParameterKind::UInt => value
                .trim()
                .parse::<u64>()
                .map(drop)
                .map_err(|_err| invalid("a non-negative integer")),
            ParameterKind::String => Ok(()),
            ParameterKind::Enum => {
                if self.choices.iter().any(|choice| choice == value) {
                    Ok(())
                } else {
                    Err(WorkloadError::InvalidChoice {
                        name: self.name.clone(),
                        choices: self.choices.join(", "),
                        value: value.to_owned(),
                    })
                }
            }
        }
    }
}

/// A workload name together with its parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl WorkloadDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Validates `provided` against the schema and fills in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown parameter names, values that do not
    /// match the declared kind or choices, and missing required parameters.
    pub fn resolve(
        &self,
        provided: &WorkloadParameters,
    ) -> Result<WorkloadParameters, WorkloadError> {
        for name in provided.keys() {
            if !self.parameters.iter().any(|spec| &spec.name == name) {
                return Err(WorkloadError::UnknownParameter { name: name.clone() });
            }
        }

        let mut resolved = BTreeMap::new();
        for spec in &self.parameters {
            match provided.get(&spec.name).or(spec.default.as_ref()) {
                Some(value) => {
                    spec.check(value)?;
                    resolved.insert(spec.name.clone(), value.clone());
                }
                None if spec.nullable => {}
                None => {
                    return Err(WorkloadError::MissingParameter {
                        name: spec.name.clone(),
                    });
                }
            }
        }
        Ok(resolved)
    }
}

/// Reads an optional unsigned parameter.
///
/// # Errors
///
/// Returns an error when the value is present but not a `u64`.
pub fn parameter_u64(
    parameters: &WorkloadParameters,
    name: &str,
) -> Result<Option<u64>, WorkloadError> {
    parameters
        .get(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_err| WorkloadError::InvalidParameterValue {
                    name: name.to_owned(),
                    expected: "a non-negative integer",
                    value: value.clone(),
                })
        })
        .transpose()
}

/// Reads an optional boolean parameter.
///
/// # Errors
///
/// Returns an error when the value is present but not a boolean.
pub fn parameter_bool(
    parameters: &WorkloadParameters,
    name: &str,
) -> Result<Option<bool>, WorkloadError> {
    parameters
        .get(name)
        .map(|value| {
            parse_bool(value).ok_or_else(|| WorkloadError::InvalidParameterValue {
                name: name.to_owned(),
                expected: "a boolean",
                value: value.clone(),
            })
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

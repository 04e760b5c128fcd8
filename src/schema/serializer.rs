//! Response serialization against declared output schemas.
//!
//! # Responsibilities
//! - Validate a handler's reply against the schema declared for its status
//! - Strict mode: refuse to emit a violating body
//! - Lenient mode: log the violation once and emit the body as produced

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::observability::dedupe::DedupeCache;
use crate::observability::metrics;
use crate::schema::descriptor::Schema;
use crate::schema::validator::{render_issues, validate, Issue, IssueCode, ValidationResult};

/// How output contract violations are handled. There is no default; every
/// deployment states one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractMode {
    Strict,
    Lenient,
}

impl ContractMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractMode::Strict => "strict",
            ContractMode::Lenient => "lenient",
        }
    }
}

impl FromStr for ContractMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ContractMode::Strict),
            "lenient" => Ok(ContractMode::Lenient),
            other => Err(format!("unknown output contract mode '{}'", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("response with status {status} violates its declared schema:\n{}", render_issues(.issues))]
    ContractViolation { status: u16, issues: Vec<Issue> },

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OutputSerializer {
    mode: ContractMode,
    dedupe: Arc<DedupeCache>,
}

impl OutputSerializer {
    pub fn new(mode: ContractMode, dedupe: Arc<DedupeCache>) -> Self {
        Self { mode, dedupe }
    }

    pub fn mode(&self) -> ContractMode {
        self.mode
    }

    /// Produce the wire bytes for `value`, sent with `status` on `route`.
    ///
    /// `schema` is the schema declared for that status, if any. A missing
    /// schema is itself a violation.
    pub fn serialize(
        &self,
        route: &str,
        status: u16,
        schema: Option<&Schema>,
        value: &Value,
    ) -> Result<Vec<u8>, SerializationError> {
        let outcome = match schema {
            Some(schema) => validate(schema, value),
            None => ValidationResult::Invalid(vec![Issue::new(
                "",
                IssueCode::UndeclaredStatus,
                format!("No response schema declared for status {}", status),
            )]),
        };

        match outcome {
            ValidationResult::Valid(normalized) => Ok(serde_json::to_vec(&normalized)?),
            ValidationResult::Invalid(issues) => {
                metrics::record_validation_failure("output");
                match self.mode {
                    ContractMode::Strict => Err(SerializationError::ContractViolation { status, issues }),
                    ContractMode::Lenient => {
                        self.report_once(route, status, &issues);
                        Ok(serde_json::to_vec(value)?)
                    }
                }
            }
        }
    }

    fn report_once(&self, route: &str, status: u16, issues: &[Issue]) {
        let key = format!("{}|{}|{:?}", route, status, issues);
        if self.dedupe.first_occurrence(&key) {
            tracing::error!(
                route = %route,
                status,
                issues = %render_issues(issues),
                "Response does not match its declared schema"
            );
        }
    }
}

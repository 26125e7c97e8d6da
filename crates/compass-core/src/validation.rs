//! Aggregated field validation
//!
//! Entity validation never stops at the first problem: every violated rule is
//! collected so a caller can report all of them at once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single violated rule on a named field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Field path, e.g. `name` or `metrics[1].nickname`
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Zero or more field violations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Record a violation when `failed` holds
    pub fn check(&mut self, failed: bool, field: &str, message: &str) {
        if failed {
            self.push(field, message);
        }
    }

    /// Merge violations of a nested entity under `prefix`
    pub fn nest(&mut self, prefix: &str, nested: ValidationErrors) {
        for violation in nested.violations {
            self.violations.push(FieldViolation {
                field: format!("{}.{}", prefix, violation.field),
                message: violation.message,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// `Ok(())` when nothing was violated
    pub fn into_result(self) -> crate::Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

//! Gate evaluation for pass/fail criteria.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FailureCategory;
use crate::report::PipelineReport;
use crate::stage::StageKind;

/// One project that kept the gate closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateViolation {
    pub project: String,
    pub stage: StageKind,
    pub category: FailureCategory,
    pub reason: String,
}

impl fmt::Display for GateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}): {}",
            self.project,
            self.stage,
            self.category.label(),
            self.reason
        )
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<GateViolation>,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Violations caused by the machine rather than the code.
    pub fn environment_problems(&self) -> impl Iterator<Item = &GateViolation> {
        self.violations
            .iter()
            .filter(|v| v.category == FailureCategory::Environment)
    }
}

/// Gate evaluation rules.
pub struct Gate;

impl Gate {
    /// Evaluate whether every project passed.
    ///
    /// Gate rule:
    /// - Every project must reach `Passed`
    /// - Each project that did not yields one violation naming its failed stage
    /// - A project that ended without a failed stage record still fails the gate
    pub fn evaluate(report: &PipelineReport) -> GateVerdict {
        let mut violations = Vec::new();

        for project in &report.projects {
            if project.passed() {
                continue;
            }
            match project.failure() {
                Some(record) => violations.push(GateViolation {
                    project: project.name.clone(),
                    stage: record.stage,
                    category: record
                        .outcome
                        .category()
                        .unwrap_or(FailureCategory::CodeDefect),
                    reason: record.outcome.describe(),
                }),
                None => violations.push(GateViolation {
                    project: project.name.clone(),
                    stage: project.state.failed_stage().unwrap_or(StageKind::Format),
                    category: FailureCategory::Environment,
                    reason: format!("project ended in state '{}'", project.state),
                }),
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} project(s) passed", report.projects.len())
        } else {
            let labels: Vec<String> = violations
                .iter()
                .map(|v| format!("{}/{}", v.project, v.stage))
                .collect();
            format!(
                "Gate failed with {} violation(s): {}",
                violations.len(),
                labels.join(", ")
            )
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

//! Final pass/fail verdict for a pipeline run.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineReport;
use crate::stage::{Stage, StageStatus};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Decides whether a run may be reported green.
pub struct CiGate;

impl CiGate {
    /// Gate rule:
    /// - every stage planned for the event has a report, in plan order
    /// - every report is `Passed`
    ///
    /// A skipped stage is a violation in its own right: the run did not do
    /// everything the event called for.
    pub fn evaluate(report: &PipelineReport) -> GateVerdict {
        let mut violations = Vec::new();
        let plan = Stage::plan(report.event);

        for (i, stage) in plan.iter().enumerate() {
            match report.stages.get(i) {
                None => violations.push(format!("Stage '{stage}' did not run")),
                Some(r) if r.stage != *stage => violations.push(format!(
                    "Stage '{}' ran where '{stage}' was expected",
                    r.stage
                )),
                Some(r) => match r.status {
                    StageStatus::Passed => {}
                    StageStatus::Failed => {
                        violations.push(format!("Stage '{stage}' failed: {}", r.detail))
                    }
                    StageStatus::Skipped => violations.push(format!("Stage '{stage}' was skipped")),
                },
            }
        }
        for extra in report.stages.iter().skip(plan.len()) {
            violations.push(format!("Stage '{}' is not part of the plan", extra.stage));
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} stages passed", plan.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::stage::StageReport;

    fn report(event: EventKind, stages: Vec<StageReport>) -> PipelineReport {
        let mut report = PipelineReport::new(event);
        report.stages = stages;
        report
    }

    #[test]
    fn test_all_planned_stages_passed() {
        let report = report(
            EventKind::PullRequest,
            vec![
                StageReport::passed(Stage::ResolveIdentity, "alice", 1),
                StageReport::passed(Stage::Validate, "valid", 1),
            ],
        );
        let verdict = CiGate::evaluate(&report);
        assert!(verdict.passed);
        assert_eq!(verdict.message, "All 2 stages passed");
    }

    #[test]
    fn test_failed_and_skipped_stages_are_violations() {
        let report = report(
            EventKind::WorkflowDispatch,
            vec![
                StageReport::passed(Stage::ResolveIdentity, "alice", 1),
                StageReport::passed(Stage::AcquireDataset, "ready", 1),
                StageReport::failed(Stage::Evaluate, "exit code 1", 1),
                StageReport::skipped(Stage::Publish),
            ],
        );
        let verdict = CiGate::evaluate(&report);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.violations[0].contains("exit code 1"));
        assert!(verdict.violations[1].contains("skipped"));
    }

    #[test]
    fn test_missing_stage_is_a_violation() {
        let report = report(
            EventKind::Push,
            vec![StageReport::passed(Stage::ResolveIdentity, "alice", 1)],
        );
        let verdict = CiGate::evaluate(&report);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 4);
        assert!(verdict.violations.iter().any(|v| v == "Stage 'cleanup' did not run"));
    }

    #[test]
    fn test_out_of_order_stage_is_a_violation() {
        let report = report(
            EventKind::PullRequest,
            vec![
                StageReport::passed(Stage::Validate, "valid", 1),
                StageReport::passed(Stage::ResolveIdentity, "alice", 1),
            ],
        );
        let verdict = CiGate::evaluate(&report);
        assert_eq!(verdict.violations.len(), 2);
        assert!(verdict.message.contains("2 violation"));
    }
}

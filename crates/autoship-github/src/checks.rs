//! Check-run aggregation.
//!
//! Folds the full set of GitHub check runs for a revision into the single
//! aggregate [`VerificationState`] the pipeline acts on. Conservative by
//! construction: a revision only counts as passed when every check run
//! has completed and none of them concluded badly.

use serde::{Deserialize, Serialize};

use autoship_core::VerificationState;

/// Lifecycle status of one check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    /// Statuses GitHub may add later; treated as not-yet-complete.
    #[serde(other)]
    Unknown,
}

/// Conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
    Skipped,
    Stale,
    #[serde(other)]
    Unknown,
}

/// One check run as reported by the GitHub checks API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
}

/// Aggregate a revision's check runs into one verification state.
///
/// Rules, in order:
/// - no check runs reported yet: `Pending`
/// - any run not completed: `Running`
/// - any run concluded `failure`: `Failed`
/// - any run cancelled, timed out, stale, requiring action, or with an
///   unrecognized conclusion: `Errored`
/// - otherwise (success, neutral, skipped): `Passed`
pub fn aggregate_check_state(runs: &[CheckRun]) -> VerificationState {
    if runs.is_empty() {
        return VerificationState::Pending;
    }
    if runs.iter().any(|r| r.status != CheckStatus::Completed) {
        return VerificationState::Running;
    }

    let mut errored = false;
    for run in runs {
        match run.conclusion {
            Some(CheckConclusion::Failure) => return VerificationState::Failed,
            Some(CheckConclusion::Success)
            | Some(CheckConclusion::Neutral)
            | Some(CheckConclusion::Skipped) => {}
            _ => errored = true,
        }
    }

    if errored {
        VerificationState::Errored
    } else {
        VerificationState::Passed
    }
}

/// Names of the check runs that caused a `Failed` or `Errored`
/// aggregate, for rejection reasons.
pub fn failing_check_names(runs: &[CheckRun]) -> Vec<&str> {
    runs.iter()
        .filter(|r| {
            !matches!(
                r.conclusion,
                Some(CheckConclusion::Success)
                    | Some(CheckConclusion::Neutral)
                    | Some(CheckConclusion::Skipped)
            )
        })
        .map(|r| r.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(name: &str, conclusion: CheckConclusion) -> CheckRun {
        CheckRun {
            name: name.to_string(),
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
        }
    }

    #[test]
    fn test_no_checks_is_pending() {
        assert_eq!(aggregate_check_state(&[]), VerificationState::Pending);
    }

    #[test]
    fn test_incomplete_check_is_running() {
        let runs = vec![
            completed("fmt", CheckConclusion::Success),
            CheckRun {
                name: "test".to_string(),
                status: CheckStatus::InProgress,
                conclusion: None,
            },
        ];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Running);
    }

    #[test]
    fn test_queued_check_is_running() {
        let runs = vec![CheckRun {
            name: "test".to_string(),
            status: CheckStatus::Queued,
            conclusion: None,
        }];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Running);
    }

    #[test]
    fn test_all_success_is_passed() {
        let runs = vec![
            completed("fmt", CheckConclusion::Success),
            completed("clippy", CheckConclusion::Success),
            completed("test", CheckConclusion::Success),
        ];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Passed);
    }

    #[test]
    fn test_neutral_and_skipped_do_not_block() {
        let runs = vec![
            completed("test", CheckConclusion::Success),
            completed("docs", CheckConclusion::Neutral),
            completed("nightly", CheckConclusion::Skipped),
        ];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Passed);
    }

    #[test]
    fn test_any_failure_is_failed() {
        let runs = vec![
            completed("fmt", CheckConclusion::Success),
            completed("test", CheckConclusion::Failure),
        ];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Failed);
    }

    #[test]
    fn test_failure_beats_errored_conclusions() {
        let runs = vec![
            completed("test", CheckConclusion::Failure),
            completed("deploy-dry-run", CheckConclusion::TimedOut),
        ];
        assert_eq!(aggregate_check_state(&runs), VerificationState::Failed);
    }

    #[test]
    fn test_cancelled_and_timed_out_are_errored() {
        for conclusion in [
            CheckConclusion::Cancelled,
            CheckConclusion::TimedOut,
            CheckConclusion::ActionRequired,
            CheckConclusion::Stale,
        ] {
            let runs = vec![
                completed("fmt", CheckConclusion::Success),
                completed("test", conclusion),
            ];
            assert_eq!(
                aggregate_check_state(&runs),
                VerificationState::Errored,
                "conclusion {conclusion:?}"
            );
        }
    }

    #[test]
    fn test_failing_check_names() {
        let runs = vec![
            completed("fmt", CheckConclusion::Success),
            completed("test", CheckConclusion::Failure),
            completed("audit", CheckConclusion::TimedOut),
        ];
        assert_eq!(failing_check_names(&runs), vec!["test", "audit"]);
    }

    #[test]
    fn test_check_run_deserializes_github_payload() {
        let json = r#"{"name": "test", "status": "in_progress", "conclusion": null}"#;
        let run: CheckRun = serde_json::from_str(json).expect("deserialize");
        assert_eq!(run.status, CheckStatus::InProgress);
        assert!(run.conclusion.is_none());
    }

    #[test]
    fn test_unknown_conclusion_is_errored() {
        let json = r#"{"name": "x", "status": "completed", "conclusion": "something_new"}"#;
        let run: CheckRun = serde_json::from_str(json).expect("deserialize");
        assert_eq!(aggregate_check_state(&[run]), VerificationState::Errored);
    }
}

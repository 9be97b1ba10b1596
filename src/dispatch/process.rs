//! The closed set of process kinds a status record can name.

use std::fmt;
use std::str::FromStr;

use crate::status::Gate;

/// Every workflow step the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    ClientOnboardingSurvey,
    PaymentErrorEmail,
    RunningFlow,
    KickoffQuestionnaireCompleted,
    KickoffCallScheduled,
    KickoffCallCancelled,
    TransitionPlanSubmitted,
    BkTrainingCallScheduled,
    BkTrainingCallCancelled,
    AnnualReportUploaded,
    CalculateNpsRunning,
    CalculateNpsOnboarding,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 12] = [
        ProcessKind::ClientOnboardingSurvey,
        ProcessKind::PaymentErrorEmail,
        ProcessKind::RunningFlow,
        ProcessKind::KickoffQuestionnaireCompleted,
        ProcessKind::KickoffCallScheduled,
        ProcessKind::KickoffCallCancelled,
        ProcessKind::TransitionPlanSubmitted,
        ProcessKind::BkTrainingCallScheduled,
        ProcessKind::BkTrainingCallCancelled,
        ProcessKind::AnnualReportUploaded,
        ProcessKind::CalculateNpsRunning,
        ProcessKind::CalculateNpsOnboarding,
    ];

    /// The process name as stored in status records.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessKind::ClientOnboardingSurvey => "Client Onboarding Survey",
            ProcessKind::PaymentErrorEmail => "Payment error email",
            ProcessKind::RunningFlow => "Running flow",
            ProcessKind::KickoffQuestionnaireCompleted => "Kickoff Questionnaire Completed",
            ProcessKind::KickoffCallScheduled => "Kickoff Call Scheduled",
            ProcessKind::KickoffCallCancelled => "Kickoff Call Cancelled",
            ProcessKind::TransitionPlanSubmitted => "Transition Plan Submitted",
            ProcessKind::BkTrainingCallScheduled => "BK Training Call Scheduled",
            ProcessKind::BkTrainingCallCancelled => "BK Training Call Cancelled",
            ProcessKind::AnnualReportUploaded => "Annual Report Uploaded",
            ProcessKind::CalculateNpsRunning => "Calculate NPS Running",
            ProcessKind::CalculateNpsOnboarding => "Calculate NPS Onboarding",
        }
    }

    /// The batch this kind is dispatched in.
    pub fn gate(&self) -> Gate {
        match self {
            ProcessKind::AnnualReportUploaded
            | ProcessKind::CalculateNpsRunning
            | ProcessKind::CalculateNpsOnboarding => Gate::Secondary,
            _ => Gate::Primary,
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown process: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_unique_and_parse_back() {
        let names: HashSet<&str> = ProcessKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ProcessKind::ALL.len());
        for kind in ProcessKind::ALL {
            assert_eq!(kind.name().parse::<ProcessKind>().unwrap(), kind);
        }
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!("running flow".parse::<ProcessKind>().is_err());
        assert!("Nonexistent Process".parse::<ProcessKind>().is_err());
    }

    #[test]
    fn secondary_kinds() {
        let secondary: Vec<ProcessKind> = ProcessKind::ALL
            .into_iter()
            .filter(|k| k.gate() == Gate::Secondary)
            .collect();
        assert_eq!(
            secondary,
            vec![
                ProcessKind::AnnualReportUploaded,
                ProcessKind::CalculateNpsRunning,
                ProcessKind::CalculateNpsOnboarding,
            ]
        );
    }
}

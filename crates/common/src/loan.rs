//! Loan and approval records.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ApprovalId, BorrowerId, EmployeeId, LoanId, LoanPk};

/// The state of a loan in its lifecycle.
///
/// ```text
/// Proposed ──┬──► Approved ──► Invested ──► Disbursed
///            └──► Rejected
/// ```
///
/// Only the `Proposed → Approved` transition is driven by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoanState {
    #[default]
    Proposed,
    Approved,
    Rejected,
    Invested,
    Disbursed,
}

impl LoanState {
    /// Returns true if a loan in this state may be approved.
    pub fn can_approve(&self) -> bool {
        matches!(self, LoanState::Proposed)
    }

    /// Returns the storage name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanState::Proposed => "proposed",
            LoanState::Approved => "approved",
            LoanState::Rejected => "rejected",
            LoanState::Invested => "invested",
            LoanState::Disbursed => "disbursed",
        }
    }
}

impl std::fmt::Display for LoanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored state name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown loan state: {0}")]
pub struct UnknownLoanState(pub String);

impl std::str::FromStr for LoanState {
    type Err = UnknownLoanState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(LoanState::Proposed),
            "approved" => Ok(LoanState::Approved),
            "rejected" => Ok(LoanState::Rejected),
            "invested" => Ok(LoanState::Invested),
            "disbursed" => Ok(LoanState::Disbursed),
            other => Err(UnknownLoanState(other.to_string())),
        }
    }
}

/// A borrowing proposal as persisted by the relational store.
#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    pub id: LoanPk,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub principal: Decimal,
    pub rate: Decimal,
    pub roi: Decimal,
    pub state: LoanState,
    pub state_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    /// Moves the loan into `state` and stamps the transition time.
    pub fn transition_to(&mut self, state: LoanState, at: DateTime<Utc>) {
        self.state = state;
        self.state_updated_at = at;
    }
}

/// Fields required to insert a new loan. New loans always start `Proposed`.
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub principal: Decimal,
    pub rate: Decimal,
    pub roi: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Evidence that a loan was approved.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub id: i64,
    pub approval_id: ApprovalId,
    pub loan_pk: LoanPk,
    pub photo_url: String,
    pub validator_employee_id: EmployeeId,
    pub approval_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    /// The approval date as an instant at UTC midnight.
    pub fn approved_at(&self) -> DateTime<Utc> {
        self.approval_date.and_time(NaiveTime::MIN).and_utc()
    }
}

/// Fields required to insert a new approval.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub approval_id: ApprovalId,
    pub loan_pk: LoanPk,
    pub photo_url: String,
    pub validator_employee_id: EmployeeId,
    pub approval_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_proposed() {
        assert_eq!(LoanState::default(), LoanState::Proposed);
    }

    #[test]
    fn only_proposed_can_be_approved() {
        assert!(LoanState::Proposed.can_approve());
        for state in [
            LoanState::Approved,
            LoanState::Rejected,
            LoanState::Invested,
            LoanState::Disbursed,
        ] {
            assert!(!state.can_approve(), "{state} must not be approvable");
        }
    }

    #[test]
    fn state_names_parse_back() {
        for state in [
            LoanState::Proposed,
            LoanState::Approved,
            LoanState::Rejected,
            LoanState::Invested,
            LoanState::Disbursed,
        ] {
            assert_eq!(state.as_str().parse::<LoanState>().unwrap(), state);
        }
        assert!("pending".parse::<LoanState>().is_err());
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&LoanState::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
    }

    #[test]
    fn approved_at_is_utc_midnight() {
        let approval = Approval {
            id: 1,
            approval_id: ApprovalId::new(),
            loan_pk: LoanPk::new(7),
            photo_url: "https://cdn.example/x.jpg".to_string(),
            validator_employee_id: EmployeeId::new(),
            approval_date: NaiveDate::from_ymd_opt(2025, 9, 6).unwrap(),
            created_at: Utc::now(),
        };
        assert_eq!(
            approval.approved_at().to_rfc3339(),
            "2025-09-06T00:00:00+00:00"
        );
    }
}

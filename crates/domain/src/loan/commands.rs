//! Loan commands.

use chrono::NaiveDate;
use common::{BorrowerId, EmployeeId, LoanId};
use rust_decimal::Decimal;

use crate::error::{LoanError, Result};

/// Command to open a new loan proposal.
#[derive(Debug, Clone)]
pub struct CreateLoan {
    /// The borrower asking for the loan.
    pub borrower_id: BorrowerId,

    /// Amount to lend. Must be positive.
    pub principal: Decimal,

    /// Interest rate charged to the borrower.
    pub rate: Decimal,

    /// Return on investment offered to investors.
    pub roi: Decimal,
}

impl CreateLoan {
    /// Creates a new CreateLoan command.
    pub fn new(borrower_id: BorrowerId, principal: Decimal, rate: Decimal, roi: Decimal) -> Self {
        Self {
            borrower_id,
            principal,
            rate,
            roi,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.principal <= Decimal::ZERO {
            return Err(LoanError::InvalidInput(
                "principal must be greater than 0".to_string(),
            ));
        }
        if self.rate.is_sign_negative() || self.roi.is_sign_negative() {
            return Err(LoanError::InvalidInput(
                "rate and roi must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Command to approve a proposed loan.
#[derive(Debug, Clone)]
pub struct ApproveLoan {
    /// Public identifier of the loan to approve.
    pub loan_id: LoanId,

    /// URL of the field validator's photo evidence.
    pub photo_url: String,

    /// Employee who validated the borrower.
    pub validator_employee_id: EmployeeId,

    /// Calendar date of the approval.
    pub approval_date: NaiveDate,
}

impl ApproveLoan {
    /// Creates a new ApproveLoan command.
    pub fn new(
        loan_id: LoanId,
        photo_url: impl Into<String>,
        validator_employee_id: EmployeeId,
        approval_date: NaiveDate,
    ) -> Self {
        Self {
            loan_id,
            photo_url: photo_url.into(),
            validator_employee_id,
            approval_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_principal_is_rejected() {
        let cmd = CreateLoan::new(BorrowerId::new(), Decimal::ZERO, Decimal::ONE, Decimal::ONE);
        assert!(matches!(cmd.validate(), Err(LoanError::InvalidInput(_))));
    }

    #[test]
    fn negative_rate_is_rejected() {
        let cmd = CreateLoan::new(
            BorrowerId::new(),
            Decimal::new(1000, 0),
            Decimal::new(-1, 2),
            Decimal::ONE,
        );
        assert!(matches!(cmd.validate(), Err(LoanError::InvalidInput(_))));
    }

    #[test]
    fn positive_principal_is_accepted() {
        let cmd = CreateLoan::new(
            BorrowerId::new(),
            Decimal::new(1000, 0),
            Decimal::new(105, 3),
            Decimal::new(8, 2),
        );
        assert!(cmd.validate().is_ok());
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returns true if `value` is exactly 32 lowercase hex characters.
pub fn is_hex32(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Generates a fresh 32-character lowercase hex identifier.
pub fn new_id32() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Error returned when a string is not a valid 32-hex identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} must be 32-char lowercase hex, got {value:?}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! hex32_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Generates a new random identifier.
            pub fn new() -> Self {
                Self(new_id32())
            }

            /// Validates and wraps an existing identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, InvalidId> {
                let value = value.into();
                if is_hex32(&value) {
                    Ok(Self(value))
                } else {
                    Err(InvalidId {
                        kind: $kind,
                        value,
                    })
                }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

hex32_id!(
    /// Public identifier of a loan.
    LoanId,
    "loan_id"
);

hex32_id!(
    /// Identifier of the borrower who owns a loan.
    BorrowerId,
    "borrower_id"
);

hex32_id!(
    /// Public identifier of an approval.
    ApprovalId,
    "approval_id"
);

hex32_id!(
    /// Identifier of the employee who validated an approval.
    EmployeeId,
    "validator_employee_id"
);

/// Internal numeric key of a loan row.
///
/// Assigned by the relational store and never exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanPk(i64);

impl LoanPk {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LoanPk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LoanPk {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use thiserror::Error as ThisError;

use crate::sql::ast::Span;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Service fault code raised when an aggregate query matches more than the
/// 50,000-row aggregate cap.
pub const AGGREGATE_QUERY_RECORD_LIMIT_CODE: i64 = -2147164125;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("PlanError# {0}")]
    Plan(#[from] PlanError),
    #[error("ExecError# {0}")]
    Exec(#[from] ExecError),
    #[error("BackendError# {0}")]
    Backend(#[from] BackendError),
    #[error("AuthError# {0}")]
    Auth(String),
    #[error("query execution was cancelled")]
    Cancelled,
    #[error("Error# {0}")]
    Message(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Aggregate-cap failures are the one back-end error with a dedicated
    /// recovery path (the adaptive split).
    pub fn is_aggregate_limit(&self) -> bool {
        matches!(self, Error::Backend(e) if e.is_aggregate_limit())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backend(e) if e.retryable)
    }

    pub fn get_code(&self) -> u16 {
        match self {
            Error::Plan(e) => e.get_code(),
            Error::Exec(e) => e.get_code(),
            Error::Backend(_) => 40001,
            Error::Auth(_) => 40101,
            Error::Cancelled => 49999,
            Error::Message(_) => 10001,
        }
    }
}

#[derive(ThisError, Debug)]
pub enum PlanError {
    #[error("unsupported statement: {feature}{span}")]
    UnsupportedStatement { feature: String, span: Span },
    #[error("unsupported expression: {feature}{span}")]
    UnsupportedExpression { feature: String, span: Span },
    #[error("all branches of a set operation must have the same number of columns: {left} vs {right}{span}")]
    BranchArityMismatch { left: usize, right: usize, span: Span },
    #[error("invalid literal: {message}{span}")]
    InvalidLiteral { message: String, span: Span },
    #[error("{operation} requires a session")]
    MissingSession { operation: String },
    #[error("must declare the scalar variable {name}{span}")]
    MustDeclareVariable { name: String, span: Span },
    #[error("ambiguous name {name}, candidates: {}", candidates.join(", "))]
    AmbiguousMatch { name: String, candidates: Vec<String> },
    #[error("recursive common table expression {name} is not supported{span}")]
    RecursiveCte { name: String, span: Span },
    #[error("FULL OUTER JOIN cannot be evaluated by the data service{span}")]
    FullOuterJoin { span: Span },
}

impl PlanError {
    pub fn get_code(&self) -> u16 {
        match self {
            PlanError::UnsupportedStatement { .. } => 20001,
            PlanError::UnsupportedExpression { .. } => 20002,
            PlanError::BranchArityMismatch { .. } => 20003,
            PlanError::InvalidLiteral { .. } => 20004,
            PlanError::MissingSession { .. } => 20005,
            PlanError::MustDeclareVariable { .. } => 20006,
            PlanError::AmbiguousMatch { .. } => 20007,
            PlanError::RecursiveCte { .. } => 20008,
            PlanError::FullOuterJoin { .. } => 20009,
        }
    }
}

#[derive(ThisError, Debug)]
pub enum ExecError {
    #[error(
        "{operator} materialized more than {limit} rows; reduce the result with WHERE or TOP"
    )]
    MaterializationLimit { operator: &'static str, limit: usize },
    #[error("the statement affects more than {cap} {entity} rows; no writes were performed")]
    RowCapExceeded { cap: usize, entity: String },
    #[error("set operation branches have different column counts: expected {expected}, got {actual}")]
    BranchArityMismatch { expected: usize, actual: usize },
    #[error("cursor {name} has not been declared")]
    CursorNotDeclared { name: String },
    #[error("cursor {name} is not open")]
    CursorNotOpen { name: String },
    #[error("a cursor named {name} already exists")]
    CursorAlreadyDeclared { name: String },
    #[error("variable {name} has not been declared")]
    VariableNotDeclared { name: String },
    #[error("variable {name} has already been declared")]
    VariableAlreadyDeclared { name: String },
    #[error("temporary table {name} already exists")]
    TempTableExists { name: String },
    #[error("temporary table {name} does not exist")]
    TempTableNotFound { name: String },
    #[error("REVERT without a matching EXECUTE AS")]
    ImpersonationStackEmpty,
}

impl ExecError {
    pub fn get_code(&self) -> u16 {
        match self {
            ExecError::MaterializationLimit { .. } => 30001,
            ExecError::RowCapExceeded { .. } => 30002,
            ExecError::BranchArityMismatch { .. } => 30003,
            ExecError::CursorNotDeclared { .. } => 30004,
            ExecError::CursorNotOpen { .. } => 30005,
            ExecError::CursorAlreadyDeclared { .. } => 30006,
            ExecError::VariableNotDeclared { .. } => 30007,
            ExecError::TempTableNotFound { .. } => 30008,
            ExecError::ImpersonationStackEmpty => 30009,
            ExecError::VariableAlreadyDeclared { .. } => 30010,
            ExecError::TempTableExists { .. } => 30011,
        }
    }
}

/// A failure reported by the remote data service or its transport.
#[derive(ThisError, Debug)]
#[error("{message} (code: {code:?})")]
pub struct BackendError {
    pub code: Option<i64>,
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn service(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn aggregate_limit() -> Self {
        Self::service(
            AGGREGATE_QUERY_RECORD_LIMIT_CODE,
            "AggregateQueryRecordLimit exceeded. Cannot perform this operation.",
        )
    }

    pub fn is_aggregate_limit(&self) -> bool {
        self.code == Some(AGGREGATE_QUERY_RECORD_LIMIT_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_limit_recognition() {
        let err = Error::Backend(BackendError::aggregate_limit());
        assert!(err.is_aggregate_limit());
        assert!(!err.is_retryable());

        let err = Error::Backend(BackendError::transient("connection reset"));
        assert!(!err.is_aggregate_limit());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_codes_are_stable() {
        let err = Error::Plan(PlanError::FullOuterJoin { span: Span::default() });
        assert_eq!(err.get_code(), 20009);
        let err = Error::Exec(ExecError::MaterializationLimit {
            operator: "Window",
            limit: 500_000,
        });
        assert_eq!(err.get_code(), 30001);
        assert!(err.to_string().contains("WHERE or TOP"));
    }
}

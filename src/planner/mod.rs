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

//! The execution plan builder: walks a statement tree and produces a tree
//! of plan nodes. SELECT shaping lives in [`select`], DML child synthesis
//! in [`dml`]; control-flow statements wrap into a script node that plans
//! its members lazily against the live session.

use std::{fmt, sync::Arc};

use config::get_config;

use crate::{
    backend::{ExpressionCompiler, FetchXmlGenerator, ScalarFn},
    errors::{PlanError, Result},
    exec::{
        PlanRef,
        operators::{
            CloseCursorNode, DeallocateCursorNode, DeclareCursorNode, ExecuteAsNode,
            ExecuteMessageNode, FetchCursorNode, OpenCursorNode, RevertNode, ScriptNode,
            spool::{CreateTempTableNode, DropTempTableNode},
        },
    },
    meta::{row::Row, value::Value},
    session::SessionHandle,
    sql::{ast::{Expr, Statement}, hints::QueryHints},
};

pub mod dml;
pub mod select;
mod substitute;

pub(crate) use substitute::{substitute_expr, substitute_select};

/// Profile-level knobs the caller resolves before building.
#[derive(Clone, Debug)]
pub struct BuilderOptions {
    /// When true the caller drives paging itself and no prefetch wrapper is
    /// planned.
    pub caller_paged: bool,
    /// Whether a TDS endpoint is configured; gates the passthrough path.
    pub tds_enabled: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            caller_paged: get_config().limit.caller_paged,
            tds_enabled: false,
        }
    }
}

/// The outcome of planning one statement: the plan root, the originating
/// entity and the back-end query text, both for diagnostics when present.
#[derive(Debug)]
pub struct PlanResult {
    pub root: PlanRef,
    pub entity: Option<String>,
    pub query_text: Option<String>,
}

#[derive(Clone)]
pub struct PlanBuilder {
    pub(crate) fetch_gen: Arc<dyn FetchXmlGenerator>,
    pub(crate) compiler: Arc<dyn ExpressionCompiler>,
    pub(crate) options: BuilderOptions,
}

impl fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("options", &self.options)
            .finish()
    }
}

impl PlanBuilder {
    pub fn new(
        fetch_gen: Arc<dyn FetchXmlGenerator>,
        compiler: Arc<dyn ExpressionCompiler>,
    ) -> Self {
        Self {
            fetch_gen,
            compiler,
            options: BuilderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    /// Plan a whole batch as one script node; statements are planned lazily
    /// during consumption so each sees the session state its predecessors
    /// left behind.
    pub fn build_script(&self, statements: Vec<Statement>, sql: &str) -> PlanResult {
        PlanResult {
            root: Arc::new(ScriptNode::new(
                statements,
                Arc::from(sql),
                Arc::new(self.clone()),
            )),
            entity: None,
            query_text: None,
        }
    }

    /// Plan a single statement. The session is required for statements that
    /// touch session state (variables, cursors, impersonation).
    pub fn build(
        &self,
        statement: &Statement,
        sql: &str,
        session: Option<&SessionHandle>,
    ) -> Result<PlanResult> {
        let hints = QueryHints::parse(sql, statement_options(statement));
        match statement {
            Statement::Select(stmt) => select::build_select(self, stmt, sql, &hints, session),
            Statement::Insert(stmt) => dml::build_insert(self, stmt, sql, &hints, session),
            Statement::Update(stmt) => dml::build_update(self, stmt, sql, &hints, session),
            Statement::Delete(stmt) => dml::build_delete(self, stmt, sql, &hints, session),
            Statement::Merge(stmt) => dml::build_merge(self, stmt, sql, &hints, session),
            // interpreted by the script block
            statement if statement.is_control_flow() => {
                Ok(self.build_script(vec![statement.clone()], sql))
            }
            Statement::DeclareCursor(stmt) => {
                self.require_session(session, "DECLARE CURSOR", statement)?;
                let source = select::build_select(self, &stmt.query, sql, &hints, session)?;
                Ok(no_query(Arc::new(DeclareCursorNode::new(&stmt.name, source.root))))
            }
            Statement::OpenCursor(cursor) => {
                self.require_session(session, "OPEN", statement)?;
                Ok(no_query(Arc::new(OpenCursorNode::new(&cursor.name))))
            }
            Statement::FetchCursor(stmt) => {
                self.require_session(session, "FETCH", statement)?;
                Ok(no_query(Arc::new(FetchCursorNode::new(
                    &stmt.name,
                    stmt.into.clone(),
                ))))
            }
            Statement::CloseCursor(cursor) => {
                self.require_session(session, "CLOSE", statement)?;
                Ok(no_query(Arc::new(CloseCursorNode::new(&cursor.name))))
            }
            Statement::DeallocateCursor(cursor) => {
                self.require_session(session, "DEALLOCATE", statement)?;
                Ok(no_query(Arc::new(DeallocateCursorNode::new(&cursor.name))))
            }
            Statement::ExecuteAs(stmt) => {
                self.require_session(session, "EXECUTE AS", statement)?;
                let principal = self.compile_scalar(&stmt.principal, session, stmt.span)?;
                Ok(no_query(Arc::new(ExecuteAsNode::new(principal))))
            }
            Statement::Revert(_) => {
                self.require_session(session, "REVERT", statement)?;
                Ok(no_query(Arc::new(RevertNode)))
            }
            Statement::Execute(stmt) => {
                let mut params = Vec::with_capacity(stmt.params.len());
                for (name, expr) in &stmt.params {
                    params.push((name.clone(), self.compile_scalar(expr, session, stmt.span)?));
                }
                Ok(no_query(Arc::new(ExecuteMessageNode::new(&stmt.message, params))))
            }
            Statement::CreateTempTable(stmt) => {
                self.require_session(session, "CREATE TABLE", statement)?;
                Ok(no_query(Arc::new(CreateTempTableNode::new(
                    &stmt.name,
                    stmt.columns.clone(),
                ))))
            }
            Statement::DropTempTable(stmt) => {
                self.require_session(session, "DROP TABLE", statement)?;
                Ok(no_query(Arc::new(DropTempTableNode::new(&stmt.name))))
            }
            // the guard above covers these; spelled out for exhaustiveness
            Statement::Declare(_)
            | Statement::SetVariable(_)
            | Statement::If(_)
            | Statement::While(_)
            | Statement::Block(_)
            | Statement::TryCatch(_) => Ok(self.build_script(vec![statement.clone()], sql)),
        }
    }

    fn require_session(
        &self,
        session: Option<&SessionHandle>,
        operation: &str,
        _statement: &Statement,
    ) -> Result<()> {
        if session.is_none() {
            return Err(PlanError::MissingSession { operation: operation.to_string() }.into());
        }
        Ok(())
    }

    /// Substitute variables, then hand the expression to the compiler.
    pub(crate) fn compile_scalar(
        &self,
        expr: &Expr,
        session: Option<&SessionHandle>,
        span: crate::sql::ast::Span,
    ) -> Result<ScalarFn> {
        let expr = substitute_expr(expr, session, span)?;
        self.compiler.compile_scalar(&expr)
    }

    /// Evaluate a constant expression against the current session; used by
    /// the script block for DECLARE/SET and flow conditions.
    pub fn eval_scalar(&self, expr: &Expr, session: &SessionHandle) -> Result<Value> {
        let expr = substitute_expr(expr, Some(session), crate::sql::ast::Span::default())?;
        let scalar = self.compiler.compile_scalar(&expr)?;
        scalar(&Row::empty())
    }

    pub fn eval_predicate(&self, expr: &Expr, session: &SessionHandle) -> Result<bool> {
        let expr = substitute_expr(expr, Some(session), crate::sql::ast::Span::default())?;
        let predicate = self.compiler.compile_predicate(&expr)?;
        predicate(&Row::empty())
    }
}

fn no_query(root: PlanRef) -> PlanResult {
    PlanResult {
        root,
        entity: None,
        query_text: None,
    }
}

/// The OPTION clause, when the statement has one.
fn statement_options(statement: &Statement) -> &[crate::sql::ast::OptionClause] {
    match statement {
        Statement::Select(stmt) => match stmt.spec() {
            Some(spec) => &spec.options,
            None => &[],
        },
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::operators::test_utils::{MockGenerator, TestCompiler},
        session::new_session,
        sql::ast::{CursorRef, Span},
    };

    fn builder() -> PlanBuilder {
        PlanBuilder::new(
            MockGenerator::returning("<fetch><entity name=\"account\"></entity></fetch>"),
            Arc::new(TestCompiler),
        )
    }

    #[test]
    fn test_cursor_statement_without_session_fails_at_plan_time() {
        let stmt = Statement::OpenCursor(CursorRef {
            name: "c".to_string(),
            span: Span::default(),
        });
        let err = builder().build(&stmt, "OPEN c", None).unwrap_err();
        assert_eq!(err.get_code(), 20005);
    }

    #[test]
    fn test_cursor_statement_with_session_plans() {
        let session = new_session();
        let stmt = Statement::OpenCursor(CursorRef {
            name: "c".to_string(),
            span: Span::default(),
        });
        let plan = builder().build(&stmt, "OPEN c", Some(&session)).unwrap();
        assert_eq!(plan.root.name(), "OpenCursor");
    }

    #[test]
    fn test_control_flow_wraps_into_script() {
        let stmt = Statement::Declare(crate::sql::ast::DeclareVariableStatement {
            name: "x".to_string(),
            data_type: "int".to_string(),
            initial: None,
            span: Span::default(),
        });
        let plan = builder().build(&stmt, "DECLARE @x int", None).unwrap();
        assert_eq!(plan.root.name(), "Script");
    }
}

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

//! DML planning. UPDATE and DELETE synthesize a child SELECT of the target
//! entity (primary key plus whatever the SET expressions read, under the
//! original WHERE and joins) and run it through the normal SELECT pipeline;
//! the write operators consume that child.

use std::sync::Arc;

use config::get_config;

use crate::{
    backend::primary_key_attribute,
    errors::{PlanError, Result},
    exec::operators::{
        DeleteNode, DmlOptions, InsertNode, MergeNode, UpdateNode,
        dml::{InsertSourceNode, MergeMatchedOp},
    },
    planner::{PlanBuilder, PlanResult, select, substitute_expr},
    session::SessionHandle,
    sql::{
        ast::{
            BinaryOp, DeleteStatement, Expr, InsertSource, InsertStatement, MergeMatchedAction,
            MergeStatement, SelectColumn, SelectSpec, SelectStatement, SetClause, Span,
            TableSource, UpdateStatement,
        },
        hints::QueryHints,
    },
};

fn dml_options(hints: &QueryHints) -> DmlOptions {
    let cfg = get_config();
    DmlOptions {
        batch_size: hints.batch_size.unwrap_or(cfg.dml.batch_size),
        max_rows: hints.max_rows.unwrap_or(cfg.dml.max_rows),
        bypass_custom_plugins: hints.bypass_custom_plugins || cfg.dml.bypass_custom_plugins,
        bypass_flows: hints.bypass_flows || cfg.dml.bypass_flows,
    }
}

fn compile_set_clauses(
    builder: &PlanBuilder,
    set: &[SetClause],
    session: Option<&SessionHandle>,
    span: Span,
) -> Result<Vec<(String, crate::backend::ScalarFn)>> {
    set.iter()
        .map(|clause| {
            Ok((
                clause.column.to_lowercase(),
                builder.compile_scalar(&clause.value, session, span)?,
            ))
        })
        .collect()
}

pub fn build_insert(
    builder: &PlanBuilder,
    statement: &InsertStatement,
    sql: &str,
    hints: &QueryHints,
    session: Option<&SessionHandle>,
) -> Result<PlanResult> {
    if statement.columns.is_empty() {
        return Err(PlanError::UnsupportedStatement {
            feature: "INSERT without a column list".to_string(),
            span: statement.span,
        }
        .into());
    }
    let source = match &statement.source {
        InsertSource::Values(rows) => {
            let mut compiled = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != statement.columns.len() {
                    return Err(PlanError::BranchArityMismatch {
                        left: statement.columns.len(),
                        right: row.len(),
                        span: statement.span,
                    }
                    .into());
                }
                compiled.push(
                    row.iter()
                        .map(|expr| builder.compile_scalar(expr, session, statement.span))
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            InsertSourceNode::Values(compiled)
        }
        InsertSource::Select(select_stmt) => {
            let child = select::build_select(builder, select_stmt, sql, hints, session)?;
            InsertSourceNode::Select(child.root)
        }
    };
    Ok(PlanResult {
        root: Arc::new(InsertNode::new(
            &statement.target,
            statement.columns.clone(),
            source,
            dml_options(hints),
        )),
        entity: Some(statement.target.to_lowercase()),
        query_text: None,
    })
}

/// The synthetic SELECT feeding an update/delete: primary key plus the
/// named extra columns, under the statement's own FROM and WHERE.
fn synthesize_target_select(
    target: &str,
    alias: Option<&String>,
    extra_columns: &[String],
    from: Option<&TableSource>,
    where_clause: Option<&Expr>,
    span: Span,
) -> SelectStatement {
    let mut columns = vec![SelectColumn::Expr {
        expr: Expr::column(&primary_key_attribute(target)),
        alias: None,
    }];
    for column in extra_columns {
        columns.push(SelectColumn::Expr {
            expr: Expr::column(column),
            alias: None,
        });
    }
    let from = from.cloned().unwrap_or_else(|| TableSource::Entity {
        schema: None,
        name: target.to_string(),
        alias: alias.cloned(),
    });
    SelectStatement::from_spec(SelectSpec {
        distinct: false,
        top: None,
        columns,
        from: Some(from),
        where_clause: where_clause.cloned(),
        group_by: Vec::new(),
        having: None,
        options: Vec::new(),
        span,
    })
}

/// Columns the SET right-hand sides read from the target row.
fn set_clause_inputs(set: &[SetClause], pk_column: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for clause in set {
        for column in clause.value.referenced_columns() {
            if column != pk_column && !columns.contains(&column) {
                columns.push(column);
            }
        }
    }
    columns
}

pub fn build_update(
    builder: &PlanBuilder,
    statement: &UpdateStatement,
    sql: &str,
    hints: &QueryHints,
    session: Option<&SessionHandle>,
) -> Result<PlanResult> {
    if statement.target.starts_with('#') {
        return Err(PlanError::UnsupportedStatement {
            feature: "UPDATE of a temporary table".to_string(),
            span: statement.span,
        }
        .into());
    }
    let pk_column = primary_key_attribute(&statement.target);
    let child_select = synthesize_target_select(
        &statement.target,
        statement.alias.as_ref(),
        &set_clause_inputs(&statement.set, &pk_column),
        statement.from.as_ref(),
        statement.where_clause.as_ref(),
        statement.span,
    );
    let child = select::build_select(builder, &child_select, sql, hints, session)?;
    let set = compile_set_clauses(builder, &statement.set, session, statement.span)?;
    Ok(PlanResult {
        root: Arc::new(UpdateNode::new(
            &statement.target,
            set,
            child.root,
            dml_options(hints),
        )),
        entity: Some(statement.target.to_lowercase()),
        query_text: child.query_text,
    })
}

pub fn build_delete(
    builder: &PlanBuilder,
    statement: &DeleteStatement,
    sql: &str,
    hints: &QueryHints,
    session: Option<&SessionHandle>,
) -> Result<PlanResult> {
    if statement.target.starts_with('#') {
        return Err(PlanError::UnsupportedStatement {
            feature: "DELETE from a temporary table".to_string(),
            span: statement.span,
        }
        .into());
    }
    let child_select = synthesize_target_select(
        &statement.target,
        statement.alias.as_ref(),
        &[],
        statement.from.as_ref(),
        statement.where_clause.as_ref(),
        statement.span,
    );
    let child = select::build_select(builder, &child_select, sql, hints, session)?;
    Ok(PlanResult {
        root: Arc::new(DeleteNode::new(
            &statement.target,
            child.root,
            dml_options(hints),
        )),
        entity: Some(statement.target.to_lowercase()),
        query_text: child.query_text,
    })
}

/// Split the ON condition into its source and target columns. Only one
/// plain equality between one column of each side is supported.
fn merge_on_columns(statement: &MergeStatement) -> Result<(String, String)> {
    let Expr::Binary { left, op: BinaryOp::Eq, right } = &statement.on else {
        return Err(PlanError::UnsupportedStatement {
            feature: "MERGE ON must be a single column equality".to_string(),
            span: statement.span,
        }
        .into());
    };
    let (Some(a), Some(b)) = (left.as_column(), right.as_column()) else {
        return Err(PlanError::UnsupportedStatement {
            feature: "MERGE ON must compare two plain columns".to_string(),
            span: statement.span,
        }
        .into());
    };
    let target_alias = statement
        .target_alias
        .clone()
        .unwrap_or_else(|| statement.target.clone())
        .to_lowercase();
    let is_target =
        |column: &crate::sql::ast::ColumnRef| {
            column
                .table
                .as_ref()
                .is_some_and(|t| t.to_lowercase() == target_alias)
        };
    match (is_target(a), is_target(b)) {
        (true, false) => Ok((b.name.to_lowercase(), a.name.to_lowercase())),
        (false, true) => Ok((a.name.to_lowercase(), b.name.to_lowercase())),
        _ => Err(PlanError::AmbiguousMatch {
            name: format!("{a} = {b}"),
            candidates: vec![
                format!("{target_alias}.{}", a.name),
                format!("{target_alias}.{}", b.name),
            ],
        }
        .into()),
    }
}

pub fn build_merge(
    builder: &PlanBuilder,
    statement: &MergeStatement,
    sql: &str,
    hints: &QueryHints,
    session: Option<&SessionHandle>,
) -> Result<PlanResult> {
    let (on_source, on_target) = merge_on_columns(statement)?;
    let source = select::build_select(builder, &statement.source, sql, hints, session)?;
    let matched = match &statement.when_matched {
        Some(MergeMatchedAction::Update(set)) => Some(MergeMatchedOp::Update(
            compile_set_clauses(builder, set, session, statement.span)?,
        )),
        Some(MergeMatchedAction::Delete) => Some(MergeMatchedOp::Delete),
        None => None,
    };
    let not_matched = match &statement.when_not_matched {
        Some(insert) => {
            if insert.columns.len() != insert.values.len() {
                return Err(PlanError::BranchArityMismatch {
                    left: insert.columns.len(),
                    right: insert.values.len(),
                    span: statement.span,
                }
                .into());
            }
            let mut compiled = Vec::with_capacity(insert.columns.len());
            for (column, value) in insert.columns.iter().zip(&insert.values) {
                let expr = substitute_expr(value, session, statement.span)?;
                compiled.push((
                    column.to_lowercase(),
                    builder.compiler.compile_scalar(&expr)?,
                ));
            }
            Some(compiled)
        }
        None => None,
    };
    Ok(PlanResult {
        root: Arc::new(MergeNode::new(
            &statement.target,
            source.root,
            &on_source,
            &on_target,
            matched,
            not_matched,
            dml_options(hints),
        )),
        entity: Some(statement.target.to_lowercase()),
        query_text: None,
    })
}

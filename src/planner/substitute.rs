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

//! Variable substitution. Before anything is pushed down or compiled, every
//! `@variable` reference is replaced with the session's current value as a
//! literal, so the FetchXML generator and the expression compiler only ever
//! see constants. One expression representation, no interpreter bridge.

use crate::{
    errors::{PlanError, Result},
    meta::value::Value,
    session::SessionHandle,
    sql::ast::{
        Expr, FunctionCall, OffsetFetchClause, OrderByItem, SelectColumn, SelectSpec,
        SelectStatement, Span, TableSource, WindowExpr,
    },
};

/// Resolve a variable to its session value; referencing a variable without
/// a declaring session is a plan-time error.
fn resolve(name: &str, session: Option<&SessionHandle>, span: Span) -> Result<Value> {
    session
        .and_then(|session| session.lock().get_variable(name))
        .ok_or_else(|| {
            PlanError::MustDeclareVariable { name: format!("@{name}"), span }.into()
        })
}

pub fn substitute_expr(
    expr: &Expr,
    session: Option<&SessionHandle>,
    span: Span,
) -> Result<Expr> {
    Ok(match expr {
        Expr::Variable(name) => Expr::Literal(resolve(name, session, span)?),
        Expr::Literal(_) | Expr::Column(_) | Expr::Wildcard => expr.clone(),
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: Box::new(substitute_expr(expr, session, span)?),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(substitute_expr(left, session, span)?),
            op: *op,
            right: Box::new(substitute_expr(right, session, span)?),
        },
        Expr::Function(call) => Expr::Function(FunctionCall {
            name: call.name.clone(),
            args: call
                .args
                .iter()
                .map(|arg| substitute_expr(arg, session, span))
                .collect::<Result<_>>()?,
            distinct: call.distinct,
        }),
        Expr::Window(window) => Expr::Window(WindowExpr {
            function: window.function,
            operand: match &window.operand {
                Some(operand) => Some(Box::new(substitute_expr(operand, session, span)?)),
                None => None,
            },
            partition_by: window
                .partition_by
                .iter()
                .map(|e| substitute_expr(e, session, span))
                .collect::<Result<_>>()?,
            order_by: substitute_order_by(&window.order_by, session, span)?,
        }),
        Expr::Case { operand, branches, else_expr } => Expr::Case {
            operand: match operand {
                Some(operand) => Some(Box::new(substitute_expr(operand, session, span)?)),
                None => None,
            },
            branches: branches
                .iter()
                .map(|(when, then)| {
                    Ok((
                        substitute_expr(when, session, span)?,
                        substitute_expr(then, session, span)?,
                    ))
                })
                .collect::<Result<_>>()?,
            else_expr: match else_expr {
                Some(else_expr) => Some(Box::new(substitute_expr(else_expr, session, span)?)),
                None => None,
            },
        },
        Expr::Cast { expr, data_type } => Expr::Cast {
            expr: Box::new(substitute_expr(expr, session, span)?),
            data_type: data_type.clone(),
        },
        Expr::In { expr, list, negated } => Expr::In {
            expr: Box::new(substitute_expr(expr, session, span)?),
            list: list
                .iter()
                .map(|item| substitute_expr(item, session, span))
                .collect::<Result<_>>()?,
            negated: *negated,
        },
        Expr::Like { expr, pattern, negated } => Expr::Like {
            expr: Box::new(substitute_expr(expr, session, span)?),
            pattern: Box::new(substitute_expr(pattern, session, span)?),
            negated: *negated,
        },
    })
}

fn substitute_order_by(
    items: &[OrderByItem],
    session: Option<&SessionHandle>,
    span: Span,
) -> Result<Vec<OrderByItem>> {
    items
        .iter()
        .map(|item| {
            Ok(OrderByItem {
                expr: substitute_expr(&item.expr, session, span)?,
                ascending: item.ascending,
            })
        })
        .collect()
}

fn substitute_opt(
    expr: &Option<Expr>,
    session: Option<&SessionHandle>,
    span: Span,
) -> Result<Option<Expr>> {
    Ok(match expr {
        Some(expr) => Some(substitute_expr(expr, session, span)?),
        None => None,
    })
}

fn substitute_table_source(
    source: &TableSource,
    session: Option<&SessionHandle>,
    span: Span,
) -> Result<TableSource> {
    Ok(match source {
        TableSource::Entity { .. } => source.clone(),
        TableSource::Join { left, right, kind, condition } => TableSource::Join {
            left: Box::new(substitute_table_source(left, session, span)?),
            right: Box::new(substitute_table_source(right, session, span)?),
            kind: *kind,
            condition: substitute_expr(condition, session, span)?,
        },
        TableSource::StringSplit { input, separator, with_ordinal, alias } => {
            TableSource::StringSplit {
                input: substitute_expr(input, session, span)?,
                separator: substitute_expr(separator, session, span)?,
                with_ordinal: *with_ordinal,
                alias: alias.clone(),
            }
        }
    })
}

fn substitute_spec(
    spec: &SelectSpec,
    session: Option<&SessionHandle>,
) -> Result<SelectSpec> {
    let span = spec.span;
    Ok(SelectSpec {
        distinct: spec.distinct,
        top: substitute_opt(&spec.top, session, span)?,
        columns: spec
            .columns
            .iter()
            .map(|column| {
                Ok(match column {
                    SelectColumn::Wildcard { .. } => column.clone(),
                    SelectColumn::Expr { expr, alias } => SelectColumn::Expr {
                        expr: substitute_expr(expr, session, span)?,
                        alias: alias.clone(),
                    },
                })
            })
            .collect::<Result<_>>()?,
        from: match &spec.from {
            Some(from) => Some(substitute_table_source(from, session, span)?),
            None => None,
        },
        where_clause: substitute_opt(&spec.where_clause, session, span)?,
        group_by: spec
            .group_by
            .iter()
            .map(|e| substitute_expr(e, session, span))
            .collect::<Result<_>>()?,
        having: substitute_opt(&spec.having, session, span)?,
        options: spec.options.clone(),
        span,
    })
}

fn substitute_query(
    query: &crate::sql::ast::QueryExpression,
    session: Option<&SessionHandle>,
) -> Result<crate::sql::ast::QueryExpression> {
    use crate::sql::ast::QueryExpression;
    Ok(match query {
        QueryExpression::Spec(spec) => {
            QueryExpression::Spec(Box::new(substitute_spec(spec, session)?))
        }
        QueryExpression::Binary { op, all, left, right } => QueryExpression::Binary {
            op: *op,
            all: *all,
            left: Box::new(substitute_query(left, session)?),
            right: Box::new(substitute_query(right, session)?),
        },
    })
}

/// Substitute variables everywhere a SELECT can reference them. CTE bodies
/// are substituted too; their definitions see the same session.
pub fn substitute_select(
    stmt: &SelectStatement,
    session: Option<&SessionHandle>,
) -> Result<SelectStatement> {
    let span = stmt.span;
    Ok(SelectStatement {
        ctes: stmt
            .ctes
            .iter()
            .map(|cte| {
                Ok(crate::sql::ast::CommonTableExpression {
                    name: cte.name.clone(),
                    columns: cte.columns.clone(),
                    query: Box::new(substitute_select(&cte.query, session)?),
                    span: cte.span,
                })
            })
            .collect::<Result<_>>()?,
        query: substitute_query(&stmt.query, session)?,
        order_by: substitute_order_by(&stmt.order_by, session, span)?,
        offset: match &stmt.offset {
            Some(clause) => Some(OffsetFetchClause {
                offset: substitute_expr(&clause.offset, session, clause.span)?,
                fetch: substitute_opt(&clause.fetch, session, clause.span)?,
                span: clause.span,
            }),
            None => None,
        },
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::new_session;

    #[test]
    fn test_variable_replaced_with_literal() {
        let session = new_session();
        session
            .lock()
            .declare_variable("threshold", Value::Int(100))
            .unwrap();
        let expr = Expr::Binary {
            left: Box::new(Expr::column("revenue")),
            op: crate::sql::ast::BinaryOp::Gt,
            right: Box::new(Expr::Variable("threshold".to_string())),
        };
        let substituted = substitute_expr(&expr, Some(&session), Span::default()).unwrap();
        assert!(!substituted.contains_variable());
        match substituted {
            Expr::Binary { right, .. } => assert_eq!(*right, Expr::Literal(Value::Int(100))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_undeclared_variable_is_plan_error() {
        let session = new_session();
        let expr = Expr::Variable("missing".to_string());
        let err = substitute_expr(&expr, Some(&session), Span::new(3, 7)).unwrap_err();
        assert_eq!(err.get_code(), 20006);
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_variable_without_session_is_plan_error() {
        let expr = Expr::Variable("x".to_string());
        let err = substitute_expr(&expr, None, Span::default()).unwrap_err();
        assert_eq!(err.get_code(), 20006);
    }
}

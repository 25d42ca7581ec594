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

//! The statement tree the engine consumes. The T-SQL lexer/parser lives
//! outside this crate and produces these nodes; the plan builder dispatches
//! on them. Node coverage follows the statement kinds the builder routes:
//! select (with CTEs, set operators, order/offset), the DML family, control
//! flow, cursors, impersonation and message execution.

use std::fmt;

use crate::meta::value::Value;

/// Best-known location of a fragment within the original SQL text.
/// `(0, 0)` means unknown and renders as nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, " (line {}, column {})", self.line, self.column)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Merge(MergeStatement),
    Declare(DeclareVariableStatement),
    SetVariable(SetVariableStatement),
    If(IfStatement),
    While(WhileStatement),
    Block(BlockStatement),
    TryCatch(TryCatchStatement),
    DeclareCursor(DeclareCursorStatement),
    OpenCursor(CursorRef),
    FetchCursor(FetchCursorStatement),
    CloseCursor(CursorRef),
    DeallocateCursor(CursorRef),
    ExecuteAs(ExecuteAsStatement),
    Revert(Span),
    Execute(ExecuteMessageStatement),
    CreateTempTable(CreateTempTableStatement),
    DropTempTable(DropTempTableStatement),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Select(s) => s.span,
            Statement::Insert(s) => s.span,
            Statement::Update(s) => s.span,
            Statement::Delete(s) => s.span,
            Statement::Merge(s) => s.span,
            Statement::Declare(s) => s.span,
            Statement::SetVariable(s) => s.span,
            Statement::If(s) => s.span,
            Statement::While(s) => s.span,
            Statement::Block(s) => s.span,
            Statement::TryCatch(s) => s.span,
            Statement::DeclareCursor(s) => s.span,
            Statement::OpenCursor(c)
            | Statement::CloseCursor(c)
            | Statement::DeallocateCursor(c) => c.span,
            Statement::FetchCursor(s) => s.span,
            Statement::ExecuteAs(s) => s.span,
            Statement::Revert(span) => *span,
            Statement::Execute(s) => s.span,
            Statement::CreateTempTable(s) => s.span,
            Statement::DropTempTable(s) => s.span,
        }
    }

    /// Statement kinds the script block interprets itself rather than
    /// planning into a standalone tree.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Statement::Declare(_)
                | Statement::SetVariable(_)
                | Statement::If(_)
                | Statement::While(_)
                | Statement::Block(_)
                | Statement::TryCatch(_)
        )
    }
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    pub ctes: Vec<CommonTableExpression>,
    pub query: QueryExpression,
    pub order_by: Vec<OrderByItem>,
    pub offset: Option<OffsetFetchClause>,
    pub span: Span,
}

impl SelectStatement {
    /// Convenience constructor for a bare single-spec select.
    pub fn from_spec(spec: SelectSpec) -> Self {
        let span = spec.span;
        Self {
            ctes: Vec::new(),
            query: QueryExpression::Spec(Box::new(spec)),
            order_by: Vec::new(),
            offset: None,
            span,
        }
    }

    pub fn spec(&self) -> Option<&SelectSpec> {
        match &self.query {
            QueryExpression::Spec(spec) => Some(spec),
            QueryExpression::Binary { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommonTableExpression {
    pub name: String,
    pub columns: Vec<String>,
    pub query: Box<SelectStatement>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryExpression {
    Spec(Box<SelectSpec>),
    Binary {
        op: SetOperator,
        all: bool,
        left: Box<QueryExpression>,
        right: Box<QueryExpression>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOperator::Union => write!(f, "UNION"),
            SetOperator::Intersect => write!(f, "INTERSECT"),
            SetOperator::Except => write!(f, "EXCEPT"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectSpec {
    pub distinct: bool,
    pub top: Option<Expr>,
    pub columns: Vec<SelectColumn>,
    pub from: Option<TableSource>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub options: Vec<OptionClause>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectColumn {
    Wildcard { table: Option<String> },
    Expr { expr: Expr, alias: Option<String> },
}

impl SelectColumn {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, SelectColumn::Wildcard { .. })
    }

    /// The output name of this column: alias, else a bare column's own name.
    pub fn output_name(&self) -> Option<String> {
        match self {
            SelectColumn::Wildcard { .. } => None,
            SelectColumn::Expr { alias: Some(a), .. } => Some(a.to_lowercase()),
            SelectColumn::Expr { expr: Expr::Column(c), .. } => Some(c.name.to_lowercase()),
            SelectColumn::Expr { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableSource {
    Entity {
        schema: Option<String>,
        name: String,
        alias: Option<String>,
    },
    Join {
        left: Box<TableSource>,
        right: Box<TableSource>,
        kind: JoinKind,
        condition: Expr,
    },
    /// `STRING_SPLIT(input, separator [, enable_ordinal])` in FROM.
    StringSplit {
        input: Expr,
        separator: Expr,
        with_ordinal: bool,
        alias: Option<String>,
    },
}

impl TableSource {
    /// The base entity of this source: the leftmost entity leaf.
    pub fn base_entity(&self) -> Option<(&Option<String>, &str)> {
        match self {
            TableSource::Entity { schema, name, .. } => Some((schema, name)),
            TableSource::Join { left, .. } => left.base_entity(),
            TableSource::StringSplit { .. } => None,
        }
    }

    pub fn contains_full_outer_join(&self) -> bool {
        match self {
            TableSource::Join { left, right, kind, .. } => {
                *kind == JoinKind::FullOuter
                    || left.contains_full_outer_join()
                    || right.contains_full_outer_join()
            }
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    FullOuter,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionClause {
    MaxDop(i64),
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchClause {
    pub offset: Expr,
    pub fetch: Option<Expr>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// DML
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStatement {
    pub target: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectStatement>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetClause {
    pub column: String,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStatement {
    pub target: String,
    pub alias: Option<String>,
    pub set: Vec<SetClause>,
    pub from: Option<TableSource>,
    pub where_clause: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteStatement {
    pub target: String,
    pub alias: Option<String>,
    pub from: Option<TableSource>,
    pub where_clause: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeStatement {
    pub target: String,
    pub target_alias: Option<String>,
    pub source: Box<SelectStatement>,
    pub source_alias: Option<String>,
    /// The raw ON condition; the planner accepts only a single equality
    /// between one source and one target column.
    pub on: Expr,
    pub when_matched: Option<MergeMatchedAction>,
    pub when_not_matched: Option<MergeInsertAction>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MergeMatchedAction {
    Update(Vec<SetClause>),
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeInsertAction {
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

// ---------------------------------------------------------------------------
// Control flow / session
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct DeclareVariableStatement {
    pub name: String,
    pub data_type: String,
    pub initial: Option<Expr>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetVariableStatement {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStatement {
    pub condition: Expr,
    pub then_block: Vec<Statement>,
    pub else_block: Option<Vec<Statement>>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStatement {
    pub condition: Expr,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockStatement {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryCatchStatement {
    pub try_block: Vec<Statement>,
    pub catch_block: Vec<Statement>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CursorRef {
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeclareCursorStatement {
    pub name: String,
    pub query: Box<SelectStatement>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchCursorStatement {
    pub name: String,
    /// Target variable names for FETCH ... INTO; empty means the fetched
    /// row is yielded as a result row instead.
    pub into: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteAsStatement {
    pub principal: Expr,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteMessageStatement {
    pub message: String,
    pub params: Vec<(String, Expr)>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTempTableStatement {
    pub name: String,
    pub columns: Vec<String>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DropTempTableStatement {
    pub name: String,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn named(name: &str) -> Self {
        Self {
            table: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{t}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

impl FunctionCall {
    /// True for the aggregate functions the back end understands.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self.name.to_lowercase().as_str(),
            "count" | "sum" | "avg" | "min" | "max"
        )
    }

    pub fn is_count_star(&self) -> bool {
        self.name.eq_ignore_ascii_case("count")
            && matches!(self.args.as_slice(), [Expr::Wildcard])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    Sum,
    Count,
    CountStar,
    Avg,
    Min,
    Max,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WindowExpr {
    pub function: WindowFunction,
    pub operand: Option<Box<Expr>>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(ColumnRef),
    /// `@name`, stored without the sigil.
    Variable(String),
    Wildcard,
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Function(FunctionCall),
    Window(WindowExpr),
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn column(name: &str) -> Self {
        Expr::Column(ColumnRef::named(name))
    }

    pub fn as_integer_literal(&self) -> Option<i64> {
        match self {
            Expr::Literal(Value::Int(i)) => Some(*i),
            Expr::Unary { op: UnaryOp::Neg, expr } => expr.as_integer_literal().map(|i| -i),
            _ => None,
        }
    }

    /// True when this expression is a bare column reference.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Depth-first walk over this expression and all operands.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Column(_) | Expr::Variable(_) | Expr::Wildcard => {}
            Expr::Unary { expr, .. } => expr.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Function(call) => {
                for arg in &call.args {
                    arg.walk(visit);
                }
            }
            Expr::Window(w) => {
                if let Some(operand) = &w.operand {
                    operand.walk(visit);
                }
                for p in &w.partition_by {
                    p.walk(visit);
                }
                for o in &w.order_by {
                    o.expr.walk(visit);
                }
            }
            Expr::Case { operand, branches, else_expr } => {
                if let Some(operand) = operand {
                    operand.walk(visit);
                }
                for (when, then) in branches {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(else_expr) = else_expr {
                    else_expr.walk(visit);
                }
            }
            Expr::Cast { expr, .. } => expr.walk(visit),
            Expr::In { expr, list, .. } => {
                expr.walk(visit);
                for item in list {
                    item.walk(visit);
                }
            }
            Expr::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
        }
    }

    pub fn contains_variable(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Variable(_)) {
                found = true;
            }
        });
        found
    }

    pub fn contains_window(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Window(_)) {
                found = true;
            }
        });
        found
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Function(f) if f.is_aggregate()) {
                found = true;
            }
        });
        found
    }

    /// Column names referenced anywhere in this expression.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Column(c) = e {
                let name = c.name.to_lowercase();
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        });
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_integer_literal() {
        assert_eq!(Expr::literal(5).as_integer_literal(), Some(5));
        let neg = Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(Expr::literal(5)),
        };
        assert_eq!(neg.as_integer_literal(), Some(-5));
        assert_eq!(Expr::column("a").as_integer_literal(), None);
    }

    #[test]
    fn test_contains_variable() {
        let expr = Expr::Binary {
            left: Box::new(Expr::column("revenue")),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Variable("threshold".to_string())),
        };
        assert!(expr.contains_variable());
        assert!(!Expr::column("revenue").contains_variable());
    }

    #[test]
    fn test_referenced_columns_dedup() {
        let expr = Expr::Binary {
            left: Box::new(Expr::column("A")),
            op: BinaryOp::Add,
            right: Box::new(Expr::Binary {
                left: Box::new(Expr::column("a")),
                op: BinaryOp::Add,
                right: Box::new(Expr::column("b")),
            }),
        };
        assert_eq!(expr.referenced_columns(), vec!["a", "b"]);
    }

    #[test]
    fn test_count_star_detection() {
        let call = FunctionCall {
            name: "COUNT".to_string(),
            args: vec![Expr::Wildcard],
            distinct: false,
        };
        assert!(call.is_count_star());
        assert!(call.is_aggregate());
    }

    #[test]
    fn test_full_outer_detection_nested() {
        let src = TableSource::Join {
            left: Box::new(TableSource::Entity {
                schema: None,
                name: "account".to_string(),
                alias: None,
            }),
            right: Box::new(TableSource::Join {
                left: Box::new(TableSource::Entity {
                    schema: None,
                    name: "contact".to_string(),
                    alias: None,
                }),
                right: Box::new(TableSource::Entity {
                    schema: None,
                    name: "task".to_string(),
                    alias: None,
                }),
                kind: JoinKind::FullOuter,
                condition: Expr::literal(true),
            }),
            kind: JoinKind::Inner,
            condition: Expr::literal(true),
        };
        assert!(src.contains_full_outer_join());
        assert_eq!(src.base_entity().unwrap().1, "account");
    }
}

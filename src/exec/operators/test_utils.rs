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

//! In-memory executors, a literal row source and a small interpreting
//! expression compiler, shared by the operator and planner unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{
        ExpressionCompiler, FetchXmlGenerator, GeneratedQuery, MessageRequest, MetadataExecutor,
        MetadataTarget, PredicateFn, QueryExecutor, QueryRequest, QueryResponse, ScalarFn,
        TdsExecutor, WriteRequest,
    },
    errors::{BackendError, Error, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream},
    meta::{row::Row, value::Value},
    sql::ast::{BinaryOp, Expr, SelectStatement, UnaryOp},
};

// ---------------------------------------------------------------------------
// Row sources
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ValuesNode {
    rows: Vec<Row>,
}

#[async_trait]
impl PlanNode for ValuesNode {
    fn name(&self) -> &'static str {
        "Values"
    }

    fn estimated_rows(&self) -> i64 {
        self.rows.len() as i64
    }

    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let rows = self.rows.clone();
        Ok(Box::pin(try_stream! {
            for row in rows {
                yield row;
            }
        }))
    }
}

pub(crate) fn rows_node(rows: Vec<Row>) -> PlanRef {
    Arc::new(ValuesNode { rows })
}

pub(crate) fn values_node(entity: &str, rows: Vec<Vec<(&str, Value)>>) -> PlanRef {
    rows_node(
        rows.into_iter()
            .map(|columns| {
                let mut row = Row::new(entity);
                for (name, value) in columns {
                    row.insert(name, value);
                }
                row
            })
            .collect(),
    )
}

pub(crate) fn int_rows_node(
    column: &str,
    range: std::ops::RangeInclusive<i64>,
) -> PlanRef {
    rows_node(
        range
            .map(|n| Row::new("t").with(column, n))
            .collect::<Vec<_>>(),
    )
}

/// Yields `n` empty-ish rows, bumping the shared counter as each row is
/// produced; used to observe prefetch backpressure.
#[derive(Debug)]
pub(crate) struct CountingNode {
    n: i64,
    produced: Arc<AtomicI64>,
}

impl CountingNode {
    pub(crate) fn new(n: i64, produced: Arc<AtomicI64>) -> Self {
        Self { n, produced }
    }
}

#[async_trait]
impl PlanNode for CountingNode {
    fn name(&self) -> &'static str {
        "Counting"
    }

    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let n = self.n;
        let produced = self.produced.clone();
        Ok(Box::pin(try_stream! {
            for i in 0..n {
                produced.fetch_add(1, Ordering::SeqCst);
                yield Row::new("t").with("i", i);
            }
        }))
    }
}

#[derive(Debug)]
struct FailingNode {
    message: String,
}

#[async_trait]
impl PlanNode for FailingNode {
    fn name(&self) -> &'static str {
        "Failing"
    }

    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let message = self.message.clone();
        Ok(Box::pin(try_stream! {
            yield Row::new("t").with("i", 1);
            Err(Error::Message(message))?;
        }))
    }
}

pub(crate) fn failing_node(message: &str) -> PlanRef {
    Arc::new(FailingNode {
        message: message.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

type QueryHandler = Box<dyn Fn(&QueryRequest) -> Result<QueryResponse> + Send + Sync>;
type MessageHandler = Box<dyn Fn(&MessageRequest) -> Result<Row> + Send + Sync>;

#[derive(Default)]
pub(crate) struct MockQueryExecutor {
    pages: Mutex<VecDeque<QueryResponse>>,
    handler: Option<QueryHandler>,
    message_handler: Option<MessageHandler>,
    fail_first: Mutex<Option<BackendError>>,
    query_log: Mutex<Vec<QueryRequest>>,
    write_log: Mutex<Vec<WriteRequest>>,
    batch_log: Mutex<Vec<usize>>,
}

impl MockQueryExecutor {
    pub(crate) fn with_handler(
        handler: impl Fn(&QueryRequest) -> Result<QueryResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Some(Box::new(handler)),
            ..Default::default()
        })
    }

    pub(crate) fn with_message_handler(
        self: Arc<Self>,
        handler: impl Fn(&MessageRequest) -> Result<Row> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let mut this = Arc::into_inner(self).expect("unshared mock");
        this.message_handler = Some(Box::new(handler));
        Arc::new(this)
    }

    pub(crate) fn fail_first_with(self: Arc<Self>, err: BackendError) -> Arc<Self> {
        *self.fail_first.lock() = Some(err);
        self
    }

    pub(crate) fn query_log(&self) -> Vec<QueryRequest> {
        self.query_log.lock().clone()
    }

    pub(crate) fn write_log(&self) -> Vec<WriteRequest> {
        self.write_log.lock().clone()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batch_log.lock().clone()
    }
}

pub(crate) fn paged_executor(pages: Vec<QueryResponse>) -> Arc<MockQueryExecutor> {
    Arc::new(MockQueryExecutor {
        pages: Mutex::new(pages.into()),
        ..Default::default()
    })
}

#[async_trait]
impl QueryExecutor for MockQueryExecutor {
    async fn execute_query(
        &self,
        request: QueryRequest,
        _cancel: CancellationToken,
    ) -> Result<QueryResponse> {
        self.query_log.lock().push(request.clone());
        if let Some(err) = self.fail_first.lock().take() {
            return Err(err.into());
        }
        if let Some(handler) = &self.handler {
            return handler(&request);
        }
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }

    async fn execute_write(
        &self,
        request: WriteRequest,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.write_log.lock().push(request);
        Ok(())
    }

    async fn execute_batch(
        &self,
        requests: Vec<WriteRequest>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.batch_log.lock().push(requests.len());
        self.write_log.lock().extend(requests);
        Ok(())
    }

    async fn execute_message(
        &self,
        request: MessageRequest,
        _cancel: CancellationToken,
    ) -> Result<Row> {
        match &self.message_handler {
            Some(handler) => handler(&request),
            None => Err(Error::Message(format!("no handler for message {}", request.name))),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockMetadataExecutor {
    pub rows: Vec<Row>,
}

#[async_trait]
impl MetadataExecutor for MockMetadataExecutor {
    async fn query_metadata(
        &self,
        _target: MetadataTarget,
        requested_columns: Option<&[String]>,
        _cancel: CancellationToken,
    ) -> Result<Vec<Row>> {
        match requested_columns {
            None => Ok(self.rows.clone()),
            Some(columns) => Ok(self
                .rows
                .iter()
                .map(|row| {
                    let mut out = Row::new(row.entity());
                    for column in columns {
                        out.insert(column, row.value_or_null(column));
                    }
                    out
                })
                .collect()),
        }
    }
}

pub(crate) struct MockTdsExecutor {
    pub rows: Vec<Row>,
    pub sql_log: Mutex<Vec<String>>,
}

#[async_trait]
impl TdsExecutor for MockTdsExecutor {
    async fn execute_sql(&self, sql: &str, _cancel: CancellationToken) -> Result<Vec<Row>> {
        self.sql_log.lock().push(sql.to_string());
        Ok(self.rows.clone())
    }
}

// ---------------------------------------------------------------------------
// Generator / compiler
// ---------------------------------------------------------------------------

pub(crate) struct MockGenerator {
    pub generated: GeneratedQuery,
}

impl MockGenerator {
    pub(crate) fn returning(fetch_xml: &str) -> Arc<Self> {
        Arc::new(Self {
            generated: GeneratedQuery {
                fetch_xml: fetch_xml.to_string(),
                ..Default::default()
            },
        })
    }
}

impl FetchXmlGenerator for MockGenerator {
    fn generate(&self, _statement: &SelectStatement) -> Result<GeneratedQuery> {
        Ok(self.generated.clone())
    }
}

/// A small interpreting compiler: enough expression coverage for tests
/// while the production compiler stays external.
pub(crate) struct TestCompiler;

impl TestCompiler {
    pub(crate) fn eval(expr: &Expr, row: &Row) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Column(c) => row.value_or_null(&c.name),
            Expr::Variable(name) => {
                return Err(Error::Message(format!("unsubstituted variable @{name}")));
            }
            Expr::Wildcard => Value::Null,
            Expr::Unary { op, expr } => {
                let value = Self::eval(expr, row)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.as_bool().unwrap_or(false)),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Value::Int(-i),
                        Value::Decimal(d) => Value::Decimal(-d),
                        _ => Value::Null,
                    },
                    UnaryOp::IsNull => Value::Bool(value.is_null()),
                    UnaryOp::IsNotNull => Value::Bool(!value.is_null()),
                }
            }
            Expr::Binary { left, op, right } => {
                let l = Self::eval(left, row)?;
                let r = Self::eval(right, row)?;
                match op {
                    BinaryOp::And => {
                        Value::Bool(l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false))
                    }
                    BinaryOp::Or => {
                        Value::Bool(l.as_bool().unwrap_or(false) || r.as_bool().unwrap_or(false))
                    }
                    BinaryOp::Add => l.add_numeric(&r).unwrap_or(Value::Null),
                    BinaryOp::Sub => match (l.to_decimal(), r.to_decimal()) {
                        (Some(a), Some(b)) => Value::Decimal(a - b),
                        _ => Value::Null,
                    },
                    BinaryOp::Mul => match (l.to_decimal(), r.to_decimal()) {
                        (Some(a), Some(b)) => Value::Decimal(a * b),
                        _ => Value::Null,
                    },
                    BinaryOp::Div => match (l.to_decimal(), r.to_decimal()) {
                        (Some(a), Some(b)) if !b.is_zero() => Value::Decimal(a / b),
                        _ => Value::Null,
                    },
                    BinaryOp::Mod => match (l.as_i64(), r.as_i64()) {
                        (Some(a), Some(b)) if b != 0 => Value::Int(a % b),
                        _ => Value::Null,
                    },
                    BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt
                    | BinaryOp::Le => {
                        if l.is_null() || r.is_null() {
                            Value::Bool(false)
                        } else {
                            match l.compare(&r) {
                                None => Value::Bool(false),
                                Some(ordering) => Value::Bool(match op {
                                    BinaryOp::Eq => ordering.is_eq(),
                                    BinaryOp::Ne => ordering.is_ne(),
                                    BinaryOp::Gt => ordering.is_gt(),
                                    BinaryOp::Ge => ordering.is_ge(),
                                    BinaryOp::Lt => ordering.is_lt(),
                                    BinaryOp::Le => ordering.is_le(),
                                    _ => unreachable!(),
                                }),
                            }
                        }
                    }
                }
            }
            other => {
                return Err(Error::Message(format!(
                    "test compiler does not evaluate {other:?}"
                )));
            }
        })
    }
}

impl ExpressionCompiler for TestCompiler {
    fn compile_scalar(&self, expr: &Expr) -> Result<ScalarFn> {
        let expr = expr.clone();
        Ok(Arc::new(move |row| Self::eval(&expr, row)))
    }

    fn compile_predicate(&self, expr: &Expr) -> Result<PredicateFn> {
        let expr = expr.clone();
        Ok(Arc::new(move |row| {
            Ok(Self::eval(&expr, row)?.as_bool().unwrap_or(false))
        }))
    }
}

// ---------------------------------------------------------------------------
// Context / draining
// ---------------------------------------------------------------------------

pub(crate) fn ctx_with_query(query: Arc<MockQueryExecutor>) -> Arc<ExecutionContext> {
    Arc::new(ExecutionContext::new(
        query,
        Arc::new(MockMetadataExecutor::default()),
        None,
    ))
}

pub(crate) fn test_ctx() -> Arc<ExecutionContext> {
    ctx_with_query(paged_executor(Vec::new()))
}

pub(crate) async fn drain(
    node: &dyn PlanNode,
    ctx: Arc<ExecutionContext>,
) -> Result<Vec<Row>> {
    let mut stream = node.execute(ctx, CancellationToken::new()).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        rows.push(row?);
    }
    Ok(rows)
}

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

//! The script block: an ordered statement list threaded through the
//! session. Plain statements are planned lazily at consumption time (so
//! variable substitution sees current session state) and their rows drain
//! into the block's output; IF/WHILE/BEGIN-END/TRY-CATCH/DECLARE/SET are
//! interpreted here. Cursor buffers are released when an error escapes.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, Result},
    exec::{ExecutionContext, PlanNode, SendableRowStream, check_cancelled},
    planner::PlanBuilder,
    sql::ast::Statement,
};

#[derive(Debug)]
pub struct ScriptNode {
    statements: Vec<Statement>,
    sql: Arc<str>,
    builder: Arc<PlanBuilder>,
}

impl ScriptNode {
    pub fn new(statements: Vec<Statement>, sql: Arc<str>, builder: Arc<PlanBuilder>) -> Self {
        Self { statements, sql, builder }
    }

    fn sub_block(&self, statements: Vec<Statement>) -> ScriptNode {
        ScriptNode::new(statements, self.sql.clone(), self.builder.clone())
    }
}

#[async_trait]
impl PlanNode for ScriptNode {
    fn name(&self) -> &'static str {
        "Script"
    }

    fn description(&self) -> String {
        format!("Script: {} statements", self.statements.len())
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let statements = self.statements.clone();
        let sql = self.sql.clone();
        let builder = self.builder.clone();
        let this = self.sub_block(Vec::new());
        Ok(Box::pin(try_stream! {
            // an escaping error must not leave materialized cursor rows
            // behind in the session
            let fail = |e: Error| {
                ctx.session.lock().release_cursors();
                e
            };
            for statement in statements {
                check_cancelled(&cancel)?;
                match statement {
                    Statement::Declare(declare) => {
                        let value = match &declare.initial {
                            Some(expr) => builder
                                .eval_scalar(expr, &ctx.session)
                                .map_err(&fail)?,
                            None => crate::meta::value::Value::Null,
                        };
                        let res = { ctx.session.lock().declare_variable(&declare.name, value) };
                        res.map_err(&fail)?;
                    }
                    Statement::SetVariable(set) => {
                        let value =
                            builder.eval_scalar(&set.value, &ctx.session).map_err(&fail)?;
                        let res = { ctx.session.lock().set_variable(&set.name, value) };
                        res.map_err(&fail)?;
                    }
                    Statement::If(if_stmt) => {
                        let branch = if builder
                            .eval_predicate(&if_stmt.condition, &ctx.session)
                            .map_err(&fail)?
                        {
                            Some(if_stmt.then_block)
                        } else {
                            if_stmt.else_block
                        };
                        if let Some(block) = branch {
                            let sub = this.sub_block(block);
                            let mut stream =
                                sub.execute(ctx.clone(), cancel.clone()).await.map_err(&fail)?;
                            while let Some(row) = stream.next().await {
                                yield row.map_err(&fail)?;
                            }
                        }
                    }
                    Statement::While(while_stmt) => {
                        loop {
                            check_cancelled(&cancel)?;
                            if !builder
                                .eval_predicate(&while_stmt.condition, &ctx.session)
                                .map_err(&fail)?
                            {
                                break;
                            }
                            let sub = this.sub_block(while_stmt.body.clone());
                            let mut stream =
                                sub.execute(ctx.clone(), cancel.clone()).await.map_err(&fail)?;
                            while let Some(row) = stream.next().await {
                                yield row.map_err(&fail)?;
                            }
                        }
                    }
                    Statement::Block(block) => {
                        ctx.session.lock().push_scope();
                        let sub = this.sub_block(block.statements);
                        let outcome = sub.execute(ctx.clone(), cancel.clone()).await;
                        match outcome {
                            Ok(mut stream) => {
                                loop {
                                    match stream.next().await {
                                        Some(Ok(row)) => yield row,
                                        Some(Err(e)) => {
                                            ctx.session.lock().pop_scope();
                                            Err(fail(e))?;
                                        }
                                        None => break,
                                    }
                                }
                                ctx.session.lock().pop_scope();
                            }
                            Err(e) => {
                                ctx.session.lock().pop_scope();
                                Err(fail(e))?;
                            }
                        }
                    }
                    Statement::TryCatch(try_catch) => {
                        let sub = this.sub_block(try_catch.try_block);
                        let caught = match sub.execute(ctx.clone(), cancel.clone()).await {
                            Ok(mut stream) => {
                                let mut caught = None;
                                while let Some(item) = stream.next().await {
                                    match item {
                                        Ok(row) => yield row,
                                        Err(e) if e.is_cancelled() => Err(e)?,
                                        Err(e) => {
                                            caught = Some(e);
                                            break;
                                        }
                                    }
                                }
                                caught
                            }
                            Err(e) if e.is_cancelled() => Err(e)?,
                            Err(e) => Some(e),
                        };
                        if let Some(error) = caught {
                            log::debug!("[SCRIPT] TRY block failed, entering CATCH: {error}");
                            let sub = this.sub_block(try_catch.catch_block);
                            let mut stream =
                                sub.execute(ctx.clone(), cancel.clone()).await.map_err(&fail)?;
                            while let Some(row) = stream.next().await {
                                yield row.map_err(&fail)?;
                            }
                        }
                    }
                    other => {
                        let plan = builder
                            .build(&other, &sql, Some(&ctx.session))
                            .map_err(&fail)?;
                        let mut stream = plan
                            .root
                            .execute(ctx.clone(), cancel.clone())
                            .await
                            .map_err(&fail)?;
                        while let Some(row) = stream.next().await {
                            yield row.map_err(&fail)?;
                        }
                    }
                }
            }
        }))
    }
}

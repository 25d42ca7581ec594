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

//! The cursor lifecycle. DECLARE binds a name to a source plan, OPEN
//! materializes it, FETCH steps through the buffer binding values into
//! variables, CLOSE drops the buffer, DEALLOCATE removes the binding.
//! Re-OPEN re-executes the source from scratch.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use config::get_config;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, ExecError, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, empty_stream, materialize},
};

#[derive(Debug)]
pub struct DeclareCursorNode {
    name: String,
    plan: PlanRef,
}

impl DeclareCursorNode {
    pub fn new(name: &str, plan: PlanRef) -> Self {
        Self {
            name: name.to_lowercase(),
            plan,
        }
    }
}

#[async_trait]
impl PlanNode for DeclareCursorNode {
    fn name(&self) -> &'static str {
        "DeclareCursor"
    }

    fn description(&self) -> String {
        format!("DeclareCursor: {}", self.name)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.plan.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        ctx.session
            .lock()
            .declare_cursor(&self.name, self.plan.clone())?;
        Ok(empty_stream())
    }
}

#[derive(Debug)]
pub struct OpenCursorNode {
    name: String,
}

impl OpenCursorNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
        }
    }
}

#[async_trait]
impl PlanNode for OpenCursorNode {
    fn name(&self) -> &'static str {
        "OpenCursor"
    }

    fn description(&self) -> String {
        format!("OpenCursor: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        // never hold the session lock across the source execution
        let plan = ctx.session.lock().cursor(&self.name)?.plan.clone();
        let input = plan.execute(ctx.clone(), cancel.clone()).await?;
        let limit = get_config().limit.max_materialized_rows;
        let rows = materialize(input, "OpenCursor", limit, &cancel).await?;
        log::debug!("[CURSOR] {} opened with {} rows", self.name, rows.len());
        let mut session = ctx.session.lock();
        let cursor = session.cursor_mut(&self.name)?;
        cursor.open = true;
        cursor.rows = rows;
        cursor.position = 0;
        Ok(empty_stream())
    }
}

#[derive(Debug)]
pub struct FetchCursorNode {
    name: String,
    into: Vec<String>,
}

impl FetchCursorNode {
    pub fn new(name: &str, into: Vec<String>) -> Self {
        Self {
            name: name.to_lowercase(),
            into,
        }
    }
}

#[async_trait]
impl PlanNode for FetchCursorNode {
    fn name(&self) -> &'static str {
        "FetchCursor"
    }

    fn description(&self) -> String {
        format!("FetchCursor: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let mut session = ctx.session.lock();
        let cursor = session.cursor_mut(&self.name)?;
        if !cursor.open {
            return Err(ExecError::CursorNotOpen { name: self.name.clone() }.into());
        }
        let row = match cursor.rows.get(cursor.position) {
            Some(row) => {
                cursor.position += 1;
                row.clone()
            }
            // past the end: no row, the caller sees an empty fetch
            None => return Ok(empty_stream()),
        };
        if self.into.is_empty() {
            drop(session);
            return Ok(Box::pin(try_stream! {
                yield row;
            }));
        }
        if self.into.len() != row.column_count() {
            return Err(Error::Message(format!(
                "FETCH INTO declares {} variables but the cursor row has {} columns",
                self.into.len(),
                row.column_count()
            )));
        }
        for (variable, (_, value)) in self.into.iter().zip(row.columns()) {
            session.set_variable(variable, value.clone())?;
        }
        Ok(empty_stream())
    }
}

#[derive(Debug)]
pub struct CloseCursorNode {
    name: String,
}

impl CloseCursorNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
        }
    }
}

#[async_trait]
impl PlanNode for CloseCursorNode {
    fn name(&self) -> &'static str {
        "CloseCursor"
    }

    fn description(&self) -> String {
        format!("CloseCursor: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let mut session = ctx.session.lock();
        let cursor = session.cursor_mut(&self.name)?;
        if !cursor.open {
            return Err(ExecError::CursorNotOpen { name: self.name.clone() }.into());
        }
        cursor.open = false;
        cursor.rows = Vec::new();
        cursor.position = 0;
        Ok(empty_stream())
    }
}

#[derive(Debug)]
pub struct DeallocateCursorNode {
    name: String,
}

impl DeallocateCursorNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
        }
    }
}

#[async_trait]
impl PlanNode for DeallocateCursorNode {
    fn name(&self) -> &'static str {
        "DeallocateCursor"
    }

    fn description(&self) -> String {
        format!("DeallocateCursor: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        ctx.session.lock().deallocate_cursor(&self.name)?;
        Ok(empty_stream())
    }
}

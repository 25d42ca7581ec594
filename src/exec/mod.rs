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

//! The streaming operator runtime. A plan is a tree of [`PlanNode`]s; the
//! root is pulled and recursively pulls its children, producing a lazy
//! stream of rows. Every yielded row and every back-end call is a
//! suspension point and a cancellation check.

use std::{fmt, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, ExecError, Result},
    meta::row::Row,
};

pub mod context;
pub mod operators;

pub use context::ExecutionContext;

pub type PlanRef = Arc<dyn PlanNode>;
pub type SendableRowStream = Pin<Box<dyn Stream<Item = Result<Row>> + Send>>;

#[async_trait]
pub trait PlanNode: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Human-readable one-liner for plan rendering.
    fn description(&self) -> String {
        self.name().to_string()
    }

    fn children(&self) -> Vec<PlanRef> {
        Vec::new()
    }

    /// Estimated output cardinality, -1 when unknown.
    fn estimated_rows(&self) -> i64 {
        -1
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream>;
}

/// Render a plan tree, one node per line, children indented.
pub fn explain(plan: &PlanRef) -> String {
    fn render(node: &PlanRef, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&node.description());
        let estimated = node.estimated_rows();
        if estimated >= 0 {
            out.push_str(&format!(" (est. {estimated} rows)"));
        }
        out.push('\n');
        for child in node.children() {
            render(&child, depth + 1, out);
        }
    }
    let mut out = String::new();
    render(plan, 0, &mut out);
    out
}

/// Stream of a side-effect-only operator: completes without yielding.
pub(crate) fn empty_stream() -> SendableRowStream {
    Box::pin(futures::stream::empty())
}

#[inline]
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Drain a stream into memory for a blocking operator, enforcing the
/// materialization cap.
pub(crate) async fn materialize(
    mut stream: SendableRowStream,
    operator: &'static str,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        check_cancelled(cancel)?;
        rows.push(row?);
        if rows.len() > limit {
            return Err(ExecError::MaterializationLimit { operator, limit }.into());
        }
    }
    Ok(rows)
}

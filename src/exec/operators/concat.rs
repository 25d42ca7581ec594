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

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, ExecError, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::row::Row,
};

/// Sequentially drains each input in list order, preserving duplicates.
/// Output column names come from the first input (or the plan-time column
/// list when the first branch was explicit); later branches map
/// positionally. Wildcard branches defer their arity check to execution.
#[derive(Debug)]
pub struct ConcatenateNode {
    children: Vec<PlanRef>,
    columns: Option<Vec<String>>,
}

impl ConcatenateNode {
    pub fn try_new(children: Vec<PlanRef>, columns: Option<Vec<String>>) -> Result<Self> {
        if children.len() < 2 {
            return Err(Error::Message(
                "concatenate requires at least two inputs".to_string(),
            ));
        }
        Ok(Self {
            children,
            columns: columns
                .map(|cols| cols.into_iter().map(|c| c.to_lowercase()).collect()),
        })
    }
}

#[async_trait]
impl PlanNode for ConcatenateNode {
    fn name(&self) -> &'static str {
        "Concatenate"
    }

    fn description(&self) -> String {
        format!("Concatenate: {} inputs", self.children.len())
    }

    fn children(&self) -> Vec<PlanRef> {
        self.children.clone()
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let children = self.children.clone();
        let mut names = self.columns.clone();
        Ok(Box::pin(try_stream! {
            for child in children {
                let mut input = child.execute(ctx.clone(), cancel.clone()).await?;
                while let Some(row) = input.next().await {
                    check_cancelled(&cancel)?;
                    let row = row?;
                    let names = names.get_or_insert_with(|| {
                        row.columns().map(|(n, _)| n.to_string()).collect()
                    });
                    if row.column_count() != names.len() {
                        Err(ExecError::BranchArityMismatch {
                            expected: names.len(),
                            actual: row.column_count(),
                        })?;
                    }
                    let mut out = Row::new(row.entity());
                    for (name, (_, value)) in names.iter().zip(row.columns()) {
                        out.insert(name, value.clone());
                    }
                    yield out;
                }
            }
        }))
    }
}

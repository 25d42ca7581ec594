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

use std::{fmt, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::ScalarFn,
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::row::Row,
};

#[derive(Clone)]
pub enum ColumnSource {
    /// Copy (or rename) an input attribute; absent attributes yield null.
    PassThrough(String),
    /// Evaluate a compiled scalar against the input row.
    Computed(ScalarFn),
}

impl fmt::Debug for ColumnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSource::PassThrough(name) => write!(f, "PassThrough({name})"),
            ColumnSource::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectColumn {
    pub output: String,
    pub source: ColumnSource,
}

impl ProjectColumn {
    pub fn pass_through(output: &str, source: &str) -> Self {
        Self {
            output: output.to_lowercase(),
            source: ColumnSource::PassThrough(source.to_string()),
        }
    }

    pub fn computed(output: &str, scalar: ScalarFn) -> Self {
        Self {
            output: output.to_lowercase(),
            source: ColumnSource::Computed(scalar),
        }
    }
}

/// Restricts rows to the declared output columns, in declared order.
#[derive(Debug)]
pub struct ProjectNode {
    child: PlanRef,
    columns: Vec<ProjectColumn>,
}

impl ProjectNode {
    pub fn new(child: PlanRef, columns: Vec<ProjectColumn>) -> Self {
        Self { child, columns }
    }
}

#[async_trait]
impl PlanNode for ProjectNode {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn description(&self) -> String {
        format!(
            "Project: {}",
            self.columns.iter().map(|c| c.output.as_str()).join(", ")
        )
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    fn estimated_rows(&self) -> i64 {
        self.child.estimated_rows()
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let mut input = self.child.execute(ctx, cancel.clone()).await?;
        let columns = self.columns.clone();
        Ok(Box::pin(try_stream! {
            while let Some(row) = input.next().await {
                check_cancelled(&cancel)?;
                let row = row?;
                let mut out = Row::new(row.entity());
                for column in &columns {
                    let value = match &column.source {
                        ColumnSource::PassThrough(name) => row.value_or_null(name),
                        ColumnSource::Computed(scalar) => scalar(&row)?,
                    };
                    out.insert(&column.output, value);
                }
                yield out;
            }
        }))
    }
}

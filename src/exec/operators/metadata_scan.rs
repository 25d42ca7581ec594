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
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{MetadataTarget, PredicateFn},
    errors::Result,
    exec::{ExecutionContext, PlanNode, SendableRowStream, check_cancelled},
};

/// Scan of the metadata pseudo-schema (`metadata.entity` and friends). The
/// external catalog only receives the requested column list; predicates
/// apply client-side, and the row statistics count only rows surviving the
/// filter.
pub struct MetadataScanNode {
    target: MetadataTarget,
    columns: Option<Vec<String>>,
    predicate: Option<PredicateFn>,
}

impl MetadataScanNode {
    pub fn new(
        target: MetadataTarget,
        columns: Option<Vec<String>>,
        predicate: Option<PredicateFn>,
    ) -> Self {
        Self {
            target,
            columns: columns
                .map(|cols| cols.into_iter().map(|c| c.to_lowercase()).collect()),
            predicate,
        }
    }
}

impl fmt::Debug for MetadataScanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataScanNode")
            .field("target", &self.target)
            .field("columns", &self.columns)
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

#[async_trait]
impl PlanNode for MetadataScanNode {
    fn name(&self) -> &'static str {
        "MetadataScan"
    }

    fn description(&self) -> String {
        format!("MetadataScan: {}", self.target.table_name())
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        ctx.stats.add_backend_call();
        let rows = ctx
            .metadata
            .query_metadata(self.target, self.columns.as_deref(), cancel.clone())
            .await?;
        let predicate = self.predicate.clone();
        Ok(Box::pin(try_stream! {
            for row in rows {
                check_cancelled(&cancel)?;
                if let Some(predicate) = &predicate {
                    if !predicate(&row)? {
                        continue;
                    }
                }
                ctx.stats.add_rows_read(1);
                yield row;
            }
        }))
    }
}

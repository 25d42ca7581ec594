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

use std::{cmp::Ordering, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use config::get_config;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled, materialize},
    meta::row::Row,
};

#[derive(Clone, Debug)]
pub struct SortKey {
    pub column: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_lowercase(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_lowercase(),
            ascending: false,
        }
    }
}

pub(crate) fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = a
            .value_or_null(&key.column)
            .compare(&b.value_or_null(&key.column))
            .unwrap_or(Ordering::Equal);
        let ordering = if key.ascending { ordering } else { ordering.reverse() };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Client-side ORDER BY for keys the back end cannot sort: computed
/// columns, window outputs, set-operation results. Fully materializes its
/// input, subject to the blocking-operator cap.
#[derive(Debug)]
pub struct SortNode {
    child: PlanRef,
    keys: Vec<SortKey>,
}

impl SortNode {
    pub fn new(child: PlanRef, keys: Vec<SortKey>) -> Self {
        Self { child, keys }
    }
}

#[async_trait]
impl PlanNode for SortNode {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn description(&self) -> String {
        format!(
            "Sort: {}",
            self.keys
                .iter()
                .map(|k| format!("{} {}", k.column, if k.ascending { "asc" } else { "desc" }))
                .join(", ")
        )
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let input = self.child.execute(ctx, cancel.clone()).await?;
        let limit = get_config().limit.max_materialized_rows;
        let mut rows = materialize(input, "Sort", limit, &cancel).await?;
        let keys = self.keys.clone();
        rows.sort_by(|a, b| compare_rows(a, b, &keys));
        Ok(Box::pin(try_stream! {
            for row in rows {
                check_cancelled(&cancel)?;
                yield row;
            }
        }))
    }
}

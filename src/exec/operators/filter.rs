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
use tokio_util::sync::CancellationToken;

use crate::{
    backend::PredicateFn,
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
};

/// Applies a compiled boolean predicate to every child row. Used for
/// predicates the back end cannot evaluate and for HAVING clauses; the
/// predicate itself is opaque.
pub struct FilterNode {
    child: PlanRef,
    predicate: PredicateFn,
    description: String,
}

impl FilterNode {
    pub fn new(child: PlanRef, predicate: PredicateFn, description: impl Into<String>) -> Self {
        Self {
            child,
            predicate,
            description: description.into(),
        }
    }
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterNode")
            .field("description", &self.description)
            .field("child", &self.child)
            .finish()
    }
}

#[async_trait]
impl PlanNode for FilterNode {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn description(&self) -> String {
        format!("Filter: {}", self.description)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let mut input = self.child.execute(ctx, cancel.clone()).await?;
        let predicate = self.predicate.clone();
        Ok(Box::pin(try_stream! {
            while let Some(row) = input.next().await {
                check_cancelled(&cancel)?;
                let row = row?;
                if predicate(&row)? {
                    yield row;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::test_utils::{drain, test_ctx, values_node};

    #[tokio::test]
    async fn test_filter_keeps_matching_rows() {
        let child = values_node(
            "account",
            vec![vec![("n", 1.into())], vec![("n", 2.into())], vec![("n", 3.into())]],
        );
        let predicate: PredicateFn =
            Arc::new(|row| Ok(row.value_or_null("n").as_i64().unwrap_or(0) >= 2));
        let node = FilterNode::new(child, predicate, "n >= 2");
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value_or_null("n").as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_filter_propagates_predicate_error() {
        let child = values_node("account", vec![vec![("n", 1.into())]]);
        let predicate: PredicateFn =
            Arc::new(|_| Err(crate::errors::Error::Message("boom".to_string())));
        let node = FilterNode::new(child, predicate, "boom");
        assert!(drain(&node, test_ctx()).await.is_err());
    }
}

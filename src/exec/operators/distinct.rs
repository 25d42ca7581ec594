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
use hashbrown::HashSet;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
};

/// Streams the first occurrence of each distinct row-value vector. Identity
/// is the type-tagged value key, so nulls compare equal to each other and
/// `1` never collides with `"1"`.
#[derive(Debug)]
pub struct DistinctNode {
    child: PlanRef,
}

impl DistinctNode {
    pub fn new(child: PlanRef) -> Self {
        Self { child }
    }
}

#[async_trait]
impl PlanNode for DistinctNode {
    fn name(&self) -> &'static str {
        "Distinct"
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
        Ok(Box::pin(try_stream! {
            let mut seen = HashSet::new();
            while let Some(row) = input.next().await {
                check_cancelled(&cancel)?;
                let row = row?;
                if seen.insert(row.identity_key()) {
                    yield row;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::operators::test_utils::{drain, test_ctx, values_node},
        meta::value::Value,
    };

    #[tokio::test]
    async fn test_distinct_keeps_first_occurrence() {
        let child = values_node(
            "e",
            vec![
                vec![("a", 1.into()), ("b", "x".into())],
                vec![("a", 1.into()), ("b", "X".into())], // case folds equal
                vec![("a", 2.into()), ("b", "x".into())],
                vec![("a", 1.into()), ("b", "x".into())],
            ],
        );
        let node = DistinctNode::new(child);
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value_or_null("b"), Value::from("x"));
    }

    #[tokio::test]
    async fn test_distinct_nulls_compare_equal() {
        let child = values_node(
            "e",
            vec![vec![("a", Value::Null)], vec![("a", Value::Null)]],
        );
        let rows = drain(&DistinctNode::new(child), test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_is_idempotent() {
        let child = values_node(
            "e",
            vec![vec![("a", 1.into())], vec![("a", 1.into())], vec![("a", 2.into())]],
        );
        let once = Arc::new(DistinctNode::new(child));
        let twice = DistinctNode::new(once.clone());
        let rows = drain(&twice, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}

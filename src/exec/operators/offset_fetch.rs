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
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
};

/// Discards the first `offset` rows, then yields up to `fetch` more.
/// `fetch == -1` means unbounded.
#[derive(Debug)]
pub struct OffsetFetchNode {
    child: PlanRef,
    offset: u64,
    fetch: i64,
}

impl OffsetFetchNode {
    pub fn new(child: PlanRef, offset: u64, fetch: i64) -> Self {
        Self { child, offset, fetch }
    }
}

#[async_trait]
impl PlanNode for OffsetFetchNode {
    fn name(&self) -> &'static str {
        "OffsetFetch"
    }

    fn description(&self) -> String {
        if self.fetch < 0 {
            format!("Offset: skip {}", self.offset)
        } else {
            format!("Offset: skip {}, fetch {}", self.offset, self.fetch)
        }
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    fn estimated_rows(&self) -> i64 {
        self.fetch
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let mut input = self.child.execute(ctx, cancel.clone()).await?;
        let offset = self.offset;
        let fetch = self.fetch;
        Ok(Box::pin(try_stream! {
            if fetch == 0 {
                return;
            }
            let mut skipped = 0u64;
            let mut yielded = 0i64;
            while let Some(row) = input.next().await {
                check_cancelled(&cancel)?;
                let row = row?;
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                yield row;
                yielded += 1;
                if fetch > 0 && yielded >= fetch {
                    break;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::test_utils::{drain, int_rows_node, test_ctx};

    #[tokio::test]
    async fn test_offset_and_fetch() {
        let node = OffsetFetchNode::new(int_rows_node("n", 1..=10), 3, 4);
        let rows = drain(&node, test_ctx()).await.unwrap();
        let ns: Vec<i64> = rows.iter().filter_map(|r| r.value_or_null("n").as_i64()).collect();
        assert_eq!(ns, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_offset_zero_fetch_zero_yields_nothing() {
        let node = OffsetFetchNode::new(int_rows_node("n", 1..=3), 0, 0);
        assert!(drain(&node, test_ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offset_past_end_yields_nothing() {
        let node = OffsetFetchNode::new(int_rows_node("n", 1..=3), 10, -1);
        assert!(drain(&node, test_ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_fetch_is_unbounded() {
        let node = OffsetFetchNode::new(int_rows_node("n", 1..=5), 1, -1);
        assert_eq!(drain(&node, test_ctx()).await.unwrap().len(), 4);
    }
}

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
use config::get_config;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{PlanError, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::row::Row,
    sql::ast::Span,
};

/// Runs its source on a separate task and hands rows to the consumer
/// through a bounded channel, overlapping back-end I/O with downstream
/// work. With capacity `b`, the producer is never more than `b + 1` rows
/// ahead of the consumer. Source failures surface as the consumer's next
/// pull; cancellation stops both sides without hanging.
#[derive(Debug)]
pub struct PrefetchNode {
    child: PlanRef,
    buffer: usize,
}

impl PrefetchNode {
    pub fn try_new(child: PlanRef, buffer: Option<usize>) -> Result<Self> {
        let buffer = buffer.unwrap_or_else(|| get_config().limit.prefetch_buffer_size);
        if buffer == 0 {
            return Err(PlanError::InvalidLiteral {
                message: "prefetch buffer size must be at least 1".to_string(),
                span: Span::default(),
            }
            .into());
        }
        Ok(Self { child, buffer })
    }
}

#[async_trait]
impl PlanNode for PrefetchNode {
    fn name(&self) -> &'static str {
        "Prefetch"
    }

    fn description(&self) -> String {
        format!("Prefetch: buffer {}", self.buffer)
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
        let (tx, rx) = mpsc::channel::<Result<Row>>(self.buffer);
        let child = self.child.clone();
        let producer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut input = match child.execute(ctx, producer_cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = producer_cancel.cancelled() => break,
                    item = input.next() => {
                        let Some(item) = item else { break };
                        let failed = item.is_err();
                        // a closed channel means the consumer went away
                        if tx.send(item).await.is_err() || failed {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(try_stream! {
            let mut rx = ReceiverStream::new(rx);
            while let Some(item) = rx.next().await {
                check_cancelled(&cancel)?;
                yield item?;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicI64, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        errors::Error,
        exec::operators::test_utils::{CountingNode, drain, int_rows_node, test_ctx},
    };

    #[test]
    fn test_zero_buffer_rejected_at_construction() {
        let child = int_rows_node("n", 1..=1);
        assert!(PrefetchNode::try_new(child, Some(0)).is_err());
    }

    #[tokio::test]
    async fn test_rows_delivered_in_order() {
        let node = PrefetchNode::try_new(int_rows_node("n", 1..=200), Some(5)).unwrap();
        let rows = drain(&node, test_ctx()).await.unwrap();
        let ns: Vec<i64> = rows.iter().filter_map(|r| r.value_or_null("n").as_i64()).collect();
        assert_eq!(ns, (1..=200).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_backpressure_bound_holds() {
        let produced = Arc::new(AtomicI64::new(0));
        let child = Arc::new(CountingNode::new(200, produced.clone()));
        let node = PrefetchNode::try_new(child, Some(5)).unwrap();
        let mut stream = node
            .execute(test_ctx(), CancellationToken::new())
            .await
            .unwrap();
        let mut consumed = 0i64;
        while let Some(row) = stream.next().await {
            row.unwrap();
            consumed += 1;
            if consumed % 10 == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                // buffer (5) + one in flight on each side of the channel
                let ahead = produced.load(Ordering::SeqCst) - consumed;
                assert!(ahead <= 10, "producer ran {ahead} rows ahead");
            }
        }
        assert_eq!(consumed, 200);
    }

    #[tokio::test]
    async fn test_source_failure_surfaces_to_consumer() {
        let child = crate::exec::operators::test_utils::failing_node("source exploded");
        let node = PrefetchNode::try_new(child, Some(5)).unwrap();
        let err = drain(&node, test_ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Message(m) if m.contains("source exploded")));
    }

    #[tokio::test]
    async fn test_cancellation_does_not_hang() {
        let child = int_rows_node("n", 1..=100_000);
        let node = PrefetchNode::try_new(child, Some(5)).unwrap();
        let cancel = CancellationToken::new();
        let mut stream = node.execute(test_ctx(), cancel.clone()).await.unwrap();
        let _ = stream.next().await;
        cancel.cancel();
        // must terminate promptly, by error or by exhaustion
        let finish = async {
            while let Some(item) = stream.next().await {
                if item.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), finish)
            .await
            .expect("prefetch hung after cancellation");
    }
}

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

//! Date-range partitioning around the back end's aggregate record cap: the
//! partitioner carves `[min, max)` into bounded intervals, the adaptive
//! scan bisects any interval the service still rejects, and the parallel
//! partition operator fans the interval scans out under a semaphore and
//! multiplexes their rows for the merge-aggregate step.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use config::{get_config, utils::time::interval_midpoint};
use futures::StreamExt;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{MessageRequest, MessageValue, QueryRequest},
    errors::Result,
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::row::Row,
    sql::fetch,
};

/// Rows buffered between partition tasks and the consumer.
const FAN_IN_BUFFER: usize = 1000;

/// A half-open `[start, end)` slice of the partitioned date range. Depth 0
/// is the original range; every adaptive split increments it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub depth: u32,
}

/// Carve `[min, max)` into `⌈estimated / per_partition⌉` equal half-open
/// intervals. Adjacent intervals share their boundary timestamp, so `ge` on
/// the start and `lt` on the end counts no row twice.
pub fn partition_date_range(
    estimated: u64,
    min: DateTime<Utc>,
    max: DateTime<Utc>,
    per_partition: u64,
) -> Vec<PartitionDescriptor> {
    let k = estimated.div_ceil(per_partition.max(1)).max(1);
    let span = (max - min).num_microseconds().unwrap_or(i64::MAX).max(1);
    let mut partitions = Vec::with_capacity(k as usize);
    let mut start = min;
    for i in 1..=k {
        let end = if i == k {
            max
        } else {
            min + Duration::microseconds((span as i128 * i as i128 / k as i128) as i64)
        };
        if end <= start {
            continue;
        }
        partitions.push(PartitionDescriptor { start, end, depth: 0 });
        start = end;
    }
    partitions
}

/// Leaf scan of one partition of an aggregate query. Injects a `[ge, lt)`
/// filter on the partition attribute; when the service still reports the
/// aggregate cap, the interval is bisected and both halves are processed
/// (depth-first, so rows stay in chronological interval order). Depth is
/// capped so pathological data cannot split forever.
#[derive(Debug)]
pub struct AdaptiveAggregateScanNode {
    entity: String,
    template_xml: String,
    date_attribute: String,
    partition: PartitionDescriptor,
}

impl AdaptiveAggregateScanNode {
    pub fn new(
        entity: &str,
        template_xml: String,
        date_attribute: &str,
        partition: PartitionDescriptor,
    ) -> Self {
        Self {
            entity: entity.to_lowercase(),
            template_xml,
            date_attribute: date_attribute.to_string(),
            partition,
        }
    }
}

#[async_trait]
impl PlanNode for AdaptiveAggregateScanNode {
    fn name(&self) -> &'static str {
        "AdaptiveAggregateScan"
    }

    fn description(&self) -> String {
        format!(
            "AdaptiveAggregateScan: {} [{} .. {})",
            self.entity, self.partition.start, self.partition.end
        )
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let max_depth = get_config().partition.max_depth;
        let entity = self.entity.clone();
        let template = self.template_xml.clone();
        let attribute = self.date_attribute.clone();
        let root = self.partition;
        Ok(Box::pin(try_stream! {
            let mut stack = vec![root];
            while let Some(part) = stack.pop() {
                check_cancelled(&cancel)?;
                let xml = fetch::inject_date_range_filter(&template, &attribute, &part.start, &part.end);
                let request = QueryRequest {
                    fetch_xml: xml,
                    caller_id: ctx.caller_id(),
                    ..Default::default()
                };
                ctx.stats.add_backend_call();
                match ctx.query.execute_query(request, cancel.clone()).await {
                    Ok(response) => {
                        ctx.stats.add_page();
                        for row in response.records {
                            check_cancelled(&cancel)?;
                            ctx.stats.add_rows_read(1);
                            yield row;
                        }
                    }
                    Err(e) if e.is_aggregate_limit() && part.depth < max_depth => {
                        let mid = interval_midpoint(&part.start, &part.end);
                        if mid <= part.start || mid >= part.end {
                            // interval cannot shrink further
                            Err(e)?;
                        }
                        ctx.stats.add_partition_split();
                        log::debug!(
                            "[PARTITION] {entity}: splitting [{} .. {}) at {mid} (depth {})",
                            part.start,
                            part.end,
                            part.depth + 1
                        );
                        stack.push(PartitionDescriptor {
                            start: mid,
                            end: part.end,
                            depth: part.depth + 1,
                        });
                        stack.push(PartitionDescriptor {
                            start: part.start,
                            end: mid,
                            depth: part.depth + 1,
                        });
                    }
                    Err(e) => Err(e)?,
                }
            }
        }))
    }
}

/// Runs its children concurrently, at most `max_parallel` at a time, and
/// multiplexes their rows. Order across children is unspecified; order
/// within one child is preserved. The first failure cancels the remaining
/// children and surfaces to the consumer.
#[derive(Debug)]
pub struct ParallelPartitionNode {
    children: Vec<PlanRef>,
    max_parallel: usize,
}

impl ParallelPartitionNode {
    pub fn new(children: Vec<PlanRef>, max_parallel: usize) -> Self {
        Self {
            children,
            max_parallel: max_parallel.max(1),
        }
    }
}

#[async_trait]
impl PlanNode for ParallelPartitionNode {
    fn name(&self) -> &'static str {
        "ParallelPartition"
    }

    fn description(&self) -> String {
        format!(
            "ParallelPartition: {} partitions, {} at a time",
            self.children.len(),
            self.max_parallel
        )
    }

    fn children(&self) -> Vec<PlanRef> {
        self.children.clone()
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let child_cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<Result<Row>>(FAN_IN_BUFFER);
        for child in self.children.clone() {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let child_cancel = child_cancel.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if child_cancel.is_cancelled() {
                    return;
                }
                let mut stream = match child.execute(ctx, child_cancel.clone()).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        child_cancel.cancel();
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = child_cancel.cancelled() => break,
                        item = stream.next() => {
                            let Some(item) = item else { break };
                            let failed = item.is_err();
                            if failed {
                                child_cancel.cancel();
                            }
                            if tx.send(item).await.is_err() || failed {
                                break;
                            }
                        }
                    }
                }
            });
        }
        drop(tx);
        let consumer_cancel = child_cancel.clone();
        Ok(Box::pin(try_stream! {
            while let Some(item) = rx.recv().await {
                if cancel.is_cancelled() {
                    consumer_cancel.cancel();
                }
                check_cancelled(&cancel)?;
                match item {
                    Ok(row) => yield row,
                    Err(e) => {
                        consumer_cancel.cancel();
                        Err(e)?;
                    }
                }
            }
        }))
    }
}

/// Orchestrates a groupable aggregate around the record cap: attempt the
/// plain aggregate first (skipped under FORCE_CLIENT_AGGREGATION), and on
/// the cap error probe the entity's date range and total count, partition,
/// and fan the adaptive interval scans out. Downstream, merge-aggregate
/// combines the partials; a successful plain attempt flows through it
/// unchanged.
#[derive(Debug)]
pub struct PartitionedAggregateNode {
    entity: String,
    template_xml: String,
    date_attribute: String,
    max_parallel: usize,
    force_client: bool,
}

impl PartitionedAggregateNode {
    pub fn new(
        entity: &str,
        template_xml: String,
        max_parallel: usize,
        force_client: bool,
    ) -> Self {
        Self {
            entity: entity.to_lowercase(),
            template_xml,
            date_attribute: "createdon".to_string(),
            max_parallel,
            force_client,
        }
    }

    /// min/max of the partition attribute, via a two-aggregate probe query.
    async fn probe_range(
        &self,
        ctx: &Arc<ExecutionContext>,
        cancel: &CancellationToken,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let probe = format!(
            "<fetch aggregate=\"true\"><entity name=\"{0}\"><attribute name=\"{1}\" \
             alias=\"range_min\" aggregate=\"min\" /><attribute name=\"{1}\" \
             alias=\"range_max\" aggregate=\"max\" /></entity></fetch>",
            self.entity, self.date_attribute
        );
        ctx.stats.add_backend_call();
        let response = ctx
            .query
            .execute_query(QueryRequest::new(probe), cancel.clone())
            .await?;
        let Some(row) = response.records.first() else {
            return Ok(None);
        };
        match (row.value_or_null("range_min"), row.value_or_null("range_max")) {
            (
                crate::meta::value::Value::Timestamp(min),
                crate::meta::value::Value::Timestamp(max),
            ) => Ok(Some((min, max))),
            _ => Ok(None),
        }
    }

    /// Total record count via the dedicated message; falls back to a
    /// cap-per-partition estimate when the message is unavailable.
    async fn probe_count(&self, ctx: &Arc<ExecutionContext>, cancel: &CancellationToken) -> u64 {
        let fallback =
            get_config().partition.record_limit * self.max_parallel.max(1) as u64;
        let request = MessageRequest {
            name: "RetrieveTotalRecordCount".to_string(),
            params: vec![(
                "EntityNames".to_string(),
                MessageValue::String(self.entity.clone()),
            )],
            caller_id: ctx.caller_id(),
        };
        match ctx.query.execute_message(request, cancel.clone()).await {
            Ok(row) => row
                .columns()
                .find_map(|(_, v)| v.as_i64())
                .map(|n| n.max(0) as u64)
                .unwrap_or(fallback),
            Err(e) => {
                log::debug!(
                    "[PARTITION] {}: total record count unavailable ({e}), using estimate",
                    self.entity
                );
                fallback
            }
        }
    }
}

#[async_trait]
impl PlanNode for PartitionedAggregateNode {
    fn name(&self) -> &'static str {
        "PartitionedAggregate"
    }

    fn description(&self) -> String {
        format!("PartitionedAggregate: {}", self.entity)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        if !self.force_client {
            ctx.stats.add_backend_call();
            let request = QueryRequest {
                fetch_xml: self.template_xml.clone(),
                caller_id: ctx.caller_id(),
                ..Default::default()
            };
            match ctx.query.execute_query(request, cancel.clone()).await {
                Ok(response) => {
                    ctx.stats.add_page();
                    let records = response.records;
                    return Ok(Box::pin(try_stream! {
                        for row in records {
                            check_cancelled(&cancel)?;
                            ctx.stats.add_rows_read(1);
                            yield row;
                        }
                    }));
                }
                Err(e) if e.is_aggregate_limit() => {
                    log::info!(
                        "[PARTITION] {}: aggregate record cap hit, partitioning by {}",
                        self.entity,
                        self.date_attribute
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let Some((min, max)) = self.probe_range(&ctx, &cancel).await? else {
            return Ok(crate::exec::empty_stream());
        };
        let estimated = self.probe_count(&ctx, &cancel).await;
        let per_partition = get_config().partition.record_limit;
        // end bound is exclusive, so nudge past the newest record
        let partitions =
            partition_date_range(estimated, min, max + Duration::seconds(1), per_partition);
        log::debug!(
            "[PARTITION] {}: {} partitions over [{min} .. {max}], estimated {estimated} rows",
            self.entity,
            partitions.len()
        );
        let children: Vec<PlanRef> = partitions
            .into_iter()
            .map(|part| {
                Arc::new(AdaptiveAggregateScanNode::new(
                    &self.entity,
                    self.template_xml.clone(),
                    &self.date_attribute,
                    part,
                )) as PlanRef
            })
            .collect();
        ParallelPartitionNode::new(children, self.max_parallel)
            .execute(ctx.clone(), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        backend::QueryResponse,
        errors::{BackendError, Error},
        exec::operators::test_utils::{
            MockQueryExecutor, ctx_with_query, drain, failing_node, int_rows_node,
        },
        meta::row::Row,
    };

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_partitioner_counts_and_boundaries() {
        let parts = partition_date_range(100_000, ts(2023, 1, 1), ts(2023, 12, 31), 50_000);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].start, ts(2023, 1, 1));
        assert_eq!(parts[1].end, ts(2023, 12, 31));
        // adjacent intervals share their boundary
        assert_eq!(parts[0].end, parts[1].start);
        assert!(parts.iter().all(|p| p.depth == 0));
    }

    #[test]
    fn test_partitioner_single_partition_when_under_cap() {
        let parts = partition_date_range(10, ts(2023, 1, 1), ts(2023, 1, 2), 50_000);
        assert_eq!(parts.len(), 1);
    }

    fn interval_days(request: &crate::backend::QueryRequest) -> i64 {
        let ge = regex::Regex::new(r#"operator="ge" value="([^"]+)""#).unwrap();
        let lt = regex::Regex::new(r#"operator="lt" value="([^"]+)""#).unwrap();
        let start = config::utils::time::parse_fetch_datetime(
            &ge.captures(&request.fetch_xml).unwrap()[1],
        )
        .unwrap();
        let end = config::utils::time::parse_fetch_datetime(
            &lt.captures(&request.fetch_xml).unwrap()[1],
        )
        .unwrap();
        (end - start).num_days()
    }

    #[tokio::test]
    async fn test_adaptive_scan_splits_until_interval_fits() {
        // the service rejects any aggregate interval spanning > 90 days
        let executor = MockQueryExecutor::with_handler(|request| {
            if interval_days(request) > 90 {
                Err(BackendError::aggregate_limit().into())
            } else {
                Ok(QueryResponse {
                    records: vec![Row::new("account").with("cnt", 100)],
                    ..Default::default()
                })
            }
        });
        let ctx = ctx_with_query(executor.clone());
        let template = r#"<fetch aggregate="true"><entity name="account"><attribute name="accountid" alias="cnt" aggregate="count" /></entity></fetch>"#;
        // 182-day initial interval
        let node = AdaptiveAggregateScanNode::new(
            "account",
            template.to_string(),
            "createdon",
            PartitionDescriptor {
                start: ts(2023, 1, 1),
                end: ts(2023, 7, 2),
                depth: 0,
            },
        );
        let rows = drain(&node, ctx.clone()).await.unwrap();
        assert!(rows.len() >= 3, "expected at least 3 sub-range rows");
        let calls = executor.query_log();
        assert!(calls.len() >= 3);
        // every oversized request was answered by a split, never by a row
        assert!(ctx.stats.snapshot().partitions_split >= 2);
        for call in &calls {
            if interval_days(call) > 90 {
                // this call must have failed; splits mean narrower retries follow
                continue;
            }
            assert!(interval_days(call) <= 90);
        }
    }

    #[tokio::test]
    async fn test_adaptive_scan_depth_cap_propagates_error() {
        let executor =
            MockQueryExecutor::with_handler(|_| Err(BackendError::aggregate_limit().into()));
        let ctx = ctx_with_query(executor);
        let node = AdaptiveAggregateScanNode::new(
            "account",
            "<fetch aggregate=\"true\"><entity name=\"account\"></entity></fetch>".to_string(),
            "createdon",
            PartitionDescriptor {
                start: ts(2023, 1, 1),
                end: ts(2023, 1, 2),
                depth: 0,
            },
        );
        let err = drain(&node, ctx).await.unwrap_err();
        assert!(err.is_aggregate_limit());
    }

    #[tokio::test]
    async fn test_parallel_partition_multiplexes_all_children() {
        let children: Vec<PlanRef> = vec![
            int_rows_node("n", 1..=3),
            int_rows_node("n", 4..=6),
            int_rows_node("n", 7..=9),
        ];
        let node = ParallelPartitionNode::new(children, 2);
        let ctx = crate::exec::operators::test_utils::test_ctx();
        let mut ns: Vec<i64> = drain(&node, ctx)
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.value_or_null("n").as_i64())
            .collect();
        ns.sort_unstable();
        assert_eq!(ns, (1..=9).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_parallel_partition_with_one_worker_matches_sequential() {
        let children: Vec<PlanRef> = vec![int_rows_node("n", 1..=2), int_rows_node("n", 3..=4)];
        let node = ParallelPartitionNode::new(children, 1);
        let ctx = crate::exec::operators::test_utils::test_ctx();
        let mut ns: Vec<i64> = drain(&node, ctx)
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.value_or_null("n").as_i64())
            .collect();
        ns.sort_unstable();
        assert_eq!(ns, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_parallel_partition_first_failure_wins() {
        let children: Vec<PlanRef> = vec![failing_node("partition died"), int_rows_node("n", 1..=1000)];
        let node = ParallelPartitionNode::new(children, 2);
        let ctx = crate::exec::operators::test_utils::test_ctx();
        let err = drain(&node, ctx).await.unwrap_err();
        assert!(matches!(err, Error::Message(m) if m.contains("partition died")));
    }
}

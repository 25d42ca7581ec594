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
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Result,
    exec::{
        ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled, empty_stream,
        materialize,
    },
};

/// Scan of a non-recursive CTE. The defining plan is materialized once per
/// execution into the context's buffer cache (the builder assigns each CTE
/// one buffer id, shared by all of its references); later scans replay the
/// buffer.
#[derive(Debug)]
pub struct CteSpoolScanNode {
    buffer_id: String,
    name: String,
    plan: PlanRef,
}

impl CteSpoolScanNode {
    pub fn new(buffer_id: String, name: &str, plan: PlanRef) -> Self {
        Self {
            buffer_id,
            name: name.to_lowercase(),
            plan,
        }
    }
}

#[async_trait]
impl PlanNode for CteSpoolScanNode {
    fn name(&self) -> &'static str {
        "CteSpoolScan"
    }

    fn description(&self) -> String {
        format!("CteSpoolScan: {}", self.name)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.plan.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let buffer = match ctx.cte_buffer(&self.buffer_id) {
            Some(buffer) => buffer,
            None => {
                log::debug!("[CTE] materializing {}", self.name);
                let input = self.plan.execute(ctx.clone(), cancel.clone()).await?;
                let limit = get_config().limit.max_materialized_rows;
                let rows = Arc::new(materialize(input, "CteSpoolScan", limit, &cancel).await?);
                ctx.store_cte_buffer(&self.buffer_id, rows.clone());
                rows
            }
        };
        Ok(Box::pin(try_stream! {
            for row in buffer.iter() {
                check_cancelled(&cancel)?;
                yield row.clone();
            }
        }))
    }
}

/// Scan of a session temp table.
#[derive(Debug)]
pub struct TempTableScanNode {
    name: String,
}

impl TempTableScanNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
        }
    }
}

#[async_trait]
impl PlanNode for TempTableScanNode {
    fn name(&self) -> &'static str {
        "TempTableScan"
    }

    fn description(&self) -> String {
        format!("TempTableScan: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let rows = ctx.session.lock().temp_table(&self.name)?.rows.clone();
        Ok(Box::pin(try_stream! {
            for row in rows {
                check_cancelled(&cancel)?;
                yield row;
            }
        }))
    }
}

/// `CREATE TABLE #name (...)` against the session store.
#[derive(Debug)]
pub struct CreateTempTableNode {
    name: String,
    columns: Vec<String>,
}

impl CreateTempTableNode {
    pub fn new(name: &str, columns: Vec<String>) -> Self {
        Self {
            name: name.to_lowercase(),
            columns,
        }
    }
}

#[async_trait]
impl PlanNode for CreateTempTableNode {
    fn name(&self) -> &'static str {
        "CreateTempTable"
    }

    fn description(&self) -> String {
        format!("CreateTempTable: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        ctx.session
            .lock()
            .create_temp_table(&self.name, self.columns.clone())?;
        Ok(empty_stream())
    }
}

/// `DROP TABLE #name`.
#[derive(Debug)]
pub struct DropTempTableNode {
    name: String,
}

impl DropTempTableNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
        }
    }
}

#[async_trait]
impl PlanNode for DropTempTableNode {
    fn name(&self) -> &'static str {
        "DropTempTable"
    }

    fn description(&self) -> String {
        format!("DropTempTable: {}", self.name)
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        ctx.session.lock().drop_temp_table(&self.name)?;
        Ok(empty_stream())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::{
        exec::operators::test_utils::{CountingNode, drain, test_ctx},
        meta::row::Row,
    };

    #[tokio::test]
    async fn test_cte_materializes_once_per_execution() {
        let executions = Arc::new(AtomicI64::new(0));
        let defining = Arc::new(CountingNode::new(3, executions.clone()));
        let first = CteSpoolScanNode::new("cte_0".to_string(), "recent", defining.clone());
        let second = CteSpoolScanNode::new("cte_0".to_string(), "recent", defining);
        let ctx = test_ctx();
        assert_eq!(drain(&first, ctx.clone()).await.unwrap().len(), 3);
        assert_eq!(drain(&second, ctx.clone()).await.unwrap().len(), 3);
        // the defining plan produced rows only once
        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_temp_table_scan_reads_session_store() {
        let ctx = test_ctx();
        {
            let mut session = ctx.session.lock();
            session.create_temp_table("#t", vec!["n".to_string()]).unwrap();
            session
                .append_temp_rows("#t", vec![Row::new("#t").with("n", 1)])
                .unwrap();
        }
        let rows = drain(&TempTableScanNode::new("#T"), ctx).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_temp_table_scan_missing_table_fails() {
        let err = drain(&TempTableScanNode::new("#missing"), test_ctx())
            .await
            .unwrap_err();
        assert_eq!(err.get_code(), 30008);
    }
}

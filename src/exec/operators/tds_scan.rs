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
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{Error, Result},
    exec::{ExecutionContext, PlanNode, SendableRowStream, check_cancelled},
};

/// Fast path that forwards the original SQL to the SQL-speaking service
/// endpoint, bypassing FetchXML entirely. Planned only when the endpoint is
/// configured and the statement passes the compatibility predicate.
#[derive(Debug)]
pub struct TdsScanNode {
    sql: String,
}

impl TdsScanNode {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
        }
    }
}

#[async_trait]
impl PlanNode for TdsScanNode {
    fn name(&self) -> &'static str {
        "TdsScan"
    }

    fn description(&self) -> String {
        "TdsScan: passthrough".to_string()
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let Some(tds) = ctx.tds.clone() else {
            return Err(Error::Message(
                "TDS endpoint is not configured for this connection".to_string(),
            ));
        };
        ctx.stats.add_backend_call();
        let rows = tds.execute_sql(&self.sql, cancel.clone()).await?;
        Ok(Box::pin(try_stream! {
            for row in rows {
                check_cancelled(&cancel)?;
                ctx.stats.add_rows_read(1);
                yield row;
            }
        }))
    }
}

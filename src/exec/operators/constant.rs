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
    errors::Result,
    exec::{ExecutionContext, PlanNode, SendableRowStream},
    meta::row::Row,
};

/// Source for a FROM-less SELECT: one empty row for the projection above it
/// to compute against.
#[derive(Debug, Default)]
pub struct ConstantScanNode;

#[async_trait]
impl PlanNode for ConstantScanNode {
    fn name(&self) -> &'static str {
        "ConstantScan"
    }

    fn estimated_rows(&self) -> i64 {
        1
    }

    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        Ok(Box::pin(try_stream! {
            yield Row::empty();
        }))
    }
}

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
    backend::{MessageRequest, MessageValue, ScalarFn},
    errors::{Error, Result},
    exec::{ExecutionContext, PlanNode, SendableRowStream},
    meta::{row::Row, value::Value},
};

/// `EXEC <message> @param = value, ...` — invokes a named back-end message
/// with typed parameters and surfaces the response as a single row keyed by
/// the response field names.
pub struct ExecuteMessageNode {
    message: String,
    params: Vec<(String, ScalarFn)>,
}

impl ExecuteMessageNode {
    pub fn new(message: &str, params: Vec<(String, ScalarFn)>) -> Self {
        Self {
            message: message.to_string(),
            params,
        }
    }
}

impl fmt::Debug for ExecuteMessageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteMessageNode")
            .field("message", &self.message)
            .field("params", &self.params.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl PlanNode for ExecuteMessageNode {
    fn name(&self) -> &'static str {
        "ExecuteMessage"
    }

    fn description(&self) -> String {
        format!("ExecuteMessage: {}", self.message)
    }

    fn estimated_rows(&self) -> i64 {
        1
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let constant = Row::empty();
        let mut params = Vec::with_capacity(self.params.len());
        for (name, scalar) in &self.params {
            let value = match scalar(&constant)? {
                Value::Null => MessageValue::Null,
                Value::String(s) => MessageValue::String(s),
                Value::Int(i) => MessageValue::Int(i),
                other => {
                    return Err(Error::Message(format!(
                        "unsupported parameter type {} for message {}",
                        other.type_name(),
                        self.message
                    )));
                }
            };
            params.push((name.clone(), value));
        }
        let request = MessageRequest {
            name: self.message.clone(),
            params,
            caller_id: ctx.caller_id(),
        };
        ctx.stats.add_backend_call();
        let row = ctx.query.execute_message(request, cancel).await?;
        ctx.stats.add_rows_read(1);
        Ok(Box::pin(try_stream! {
            yield row;
        }))
    }
}

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

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    backend::ScalarFn,
    errors::{Error, Result},
    exec::{ExecutionContext, PlanNode, SendableRowStream, empty_stream},
    meta::{row::Row, value::Value},
};

/// EXECUTE AS: push the evaluated principal onto the session impersonation
/// stack. Later back-end requests are tagged with the stack's top. The
/// stack deliberately survives errors; the caller REVERTs.
pub struct ExecuteAsNode {
    principal: ScalarFn,
}

impl ExecuteAsNode {
    pub fn new(principal: ScalarFn) -> Self {
        Self { principal }
    }
}

impl fmt::Debug for ExecuteAsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteAsNode").finish()
    }
}

#[async_trait]
impl PlanNode for ExecuteAsNode {
    fn name(&self) -> &'static str {
        "ExecuteAs"
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let principal = match (self.principal)(&Row::empty())? {
            Value::Guid(id) => id,
            Value::String(s) => Uuid::from_str(&s)
                .map_err(|_| Error::Message(format!("invalid principal id: {s}")))?,
            other => {
                return Err(Error::Message(format!(
                    "EXECUTE AS requires a user id, got {}",
                    other.type_name()
                )));
            }
        };
        ctx.session.lock().push_principal(principal);
        log::debug!("[SESSION] impersonating {principal}");
        // no result rows; the side effect is the point
        Ok(empty_stream())
    }
}

/// REVERT: pop the impersonation stack.
#[derive(Debug)]
pub struct RevertNode;

#[async_trait]
impl PlanNode for RevertNode {
    fn name(&self) -> &'static str {
        "Revert"
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        _cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let principal = ctx.session.lock().pop_principal()?;
        log::debug!("[SESSION] reverted impersonation of {principal}");
        Ok(empty_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::test_utils::{drain, test_ctx};

    #[tokio::test]
    async fn test_execute_as_then_revert() {
        let ctx = test_ctx();
        let id = Uuid::new_v4();
        let principal: ScalarFn = Arc::new(move |_| Ok(Value::Guid(id)));
        drain(&ExecuteAsNode::new(principal), ctx.clone()).await.unwrap();
        assert_eq!(ctx.caller_id(), Some(id));
        drain(&RevertNode, ctx.clone()).await.unwrap();
        assert_eq!(ctx.caller_id(), None);
    }

    #[tokio::test]
    async fn test_revert_on_empty_stack_fails() {
        let err = drain(&RevertNode, test_ctx()).await.unwrap_err();
        assert_eq!(err.get_code(), 30009);
    }

    #[tokio::test]
    async fn test_execute_as_accepts_guid_string() {
        let ctx = test_ctx();
        let id = Uuid::new_v4();
        let text = id.to_string();
        let principal: ScalarFn = Arc::new(move |_| Ok(Value::from(text.as_str())));
        drain(&ExecuteAsNode::new(principal), ctx.clone()).await.unwrap();
        assert_eq!(ctx.caller_id(), Some(id));
    }
}

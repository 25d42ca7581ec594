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

use hashbrown::HashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    backend::{MetadataExecutor, QueryExecutor, TdsExecutor},
    meta::{row::Row, stats::ExecutionStats},
    session::{SessionHandle, new_session},
};

/// State shared by every operator of one plan execution: the back-end
/// handles, the caller's session and the statistics record. Built once per
/// execution and threaded through the tree as an `Arc`.
pub struct ExecutionContext {
    pub query: Arc<dyn QueryExecutor>,
    pub metadata: Arc<dyn MetadataExecutor>,
    pub tds: Option<Arc<dyn TdsExecutor>>,
    pub session: SessionHandle,
    pub stats: ExecutionStats,
    /// Materialized CTE buffers, keyed by the builder-assigned buffer id.
    /// Filled on first reference, reused by every later scan of the same
    /// CTE within this execution.
    cte_cache: Mutex<HashMap<String, Arc<Vec<Row>>>>,
}

impl ExecutionContext {
    pub fn new(
        query: Arc<dyn QueryExecutor>,
        metadata: Arc<dyn MetadataExecutor>,
        session: Option<SessionHandle>,
    ) -> Self {
        Self {
            query,
            metadata,
            tds: None,
            session: session.unwrap_or_else(new_session),
            stats: ExecutionStats::default(),
            cte_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tds(mut self, tds: Arc<dyn TdsExecutor>) -> Self {
        self.tds = Some(tds);
        self
    }

    /// The impersonated principal back-end requests are tagged with.
    pub fn caller_id(&self) -> Option<Uuid> {
        self.session.lock().current_principal()
    }

    pub(crate) fn cte_buffer(&self, id: &str) -> Option<Arc<Vec<Row>>> {
        self.cte_cache.lock().get(id).cloned()
    }

    pub(crate) fn store_cte_buffer(&self, id: &str, rows: Arc<Vec<Row>>) {
        self.cte_cache.lock().insert(id.to_string(), rows);
    }
}

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

//! Seams to everything the engine does not own: the data service (reads,
//! writes, named messages), the metadata catalog, the optional TDS endpoint,
//! the FetchXML generator and the expression compiler. The engine only ever
//! sees these trait objects; transports and auth live behind them.

use std::sync::Arc;

use async_trait::async_trait;
use config::FxIndexMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    errors::Result,
    meta::{row::Row, value::Value},
    sql::ast::{Expr, SelectStatement},
};

/// Conventional primary-key attribute of an entity.
pub fn primary_key_attribute(entity: &str) -> String {
    format!("{}id", entity.to_lowercase())
}

// ---------------------------------------------------------------------------
// Query executor
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    pub fetch_xml: String,
    pub page_size: Option<u32>,
    pub paging_cookie: Option<String>,
    pub include_count: bool,
    /// Principal from the session impersonation stack, when any.
    pub caller_id: Option<Uuid>,
}

impl QueryRequest {
    pub fn new(fetch_xml: impl Into<String>) -> Self {
        Self {
            fetch_xml: fetch_xml.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryResponse {
    pub records: Vec<Row>,
    pub more_records: bool,
    pub paging_cookie: Option<String>,
    pub page_number: u32,
    pub total_count: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Create {
        entity: String,
        values: Vec<(String, Value)>,
    },
    Update {
        entity: String,
        id: Uuid,
        values: Vec<(String, Value)>,
    },
    Delete {
        entity: String,
        id: Uuid,
    },
}

impl WriteOperation {
    pub fn entity(&self) -> &str {
        match self {
            WriteOperation::Create { entity, .. }
            | WriteOperation::Update { entity, .. }
            | WriteOperation::Delete { entity, .. } => entity,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteOptions {
    pub bypass_custom_plugins: bool,
    pub bypass_flows: bool,
    pub caller_id: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriteRequest {
    pub operation: WriteOperation,
    pub options: WriteOptions,
}

/// Typed parameter of a named back-end message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageValue {
    String(String),
    Int(i64),
    Null,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageRequest {
    pub name: String,
    pub params: Vec<(String, MessageValue)>,
    pub caller_id: Option<Uuid>,
}

/// The data service itself. `execute_query` speaks FetchXML with the paging
/// protocol of §`exec::operators::fetch_scan`; the write and message
/// surfaces carry the DML and EXEC statements.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute_query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse>;

    async fn execute_write(
        &self,
        request: WriteRequest,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Submit a batch of writes. The default forwards one at a time;
    /// implementations with a batch endpoint override this.
    async fn execute_batch(
        &self,
        requests: Vec<WriteRequest>,
        cancel: CancellationToken,
    ) -> Result<()> {
        for request in requests {
            self.execute_write(request, cancel.clone()).await?;
        }
        Ok(())
    }

    async fn execute_message(
        &self,
        request: MessageRequest,
        cancel: CancellationToken,
    ) -> Result<Row>;
}

// ---------------------------------------------------------------------------
// Metadata executor
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataTarget {
    Entity,
    Attribute,
    Relationship,
}

impl MetadataTarget {
    pub fn from_table_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "entity" => Some(MetadataTarget::Entity),
            "attribute" => Some(MetadataTarget::Attribute),
            "relationship" => Some(MetadataTarget::Relationship),
            _ => None,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            MetadataTarget::Entity => "entity",
            MetadataTarget::Attribute => "attribute",
            MetadataTarget::Relationship => "relationship",
        }
    }
}

#[async_trait]
pub trait MetadataExecutor: Send + Sync {
    async fn query_metadata(
        &self,
        target: MetadataTarget,
        requested_columns: Option<&[String]>,
        cancel: CancellationToken,
    ) -> Result<Vec<Row>>;
}

// ---------------------------------------------------------------------------
// TDS executor
// ---------------------------------------------------------------------------

/// Optional SQL-speaking endpoint; absence disables the TDS passthrough.
#[async_trait]
pub trait TdsExecutor: Send + Sync {
    async fn execute_sql(&self, sql: &str, cancel: CancellationToken) -> Result<Vec<Row>>;
}

// ---------------------------------------------------------------------------
// FetchXML generator
// ---------------------------------------------------------------------------

/// A SQL-visible column the generator backs with an alias that does not
/// exist as a raw attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualColumn {
    pub alias: String,
    pub source_attribute: String,
}

#[derive(Clone, Debug, Default)]
pub struct GeneratedQuery {
    pub fetch_xml: String,
    pub virtual_columns: FxIndexMap<String, VirtualColumn>,
    /// The part of the WHERE clause the back end cannot evaluate
    /// (cross-column comparisons, computed expressions); the builder turns
    /// it into a client-side filter.
    pub residual_filter: Option<Expr>,
}

pub trait FetchXmlGenerator: Send + Sync {
    fn generate(&self, statement: &SelectStatement) -> Result<GeneratedQuery>;
}

// ---------------------------------------------------------------------------
// Expression compiler
// ---------------------------------------------------------------------------

pub type ScalarFn = Arc<dyn Fn(&Row) -> Result<Value> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&Row) -> Result<bool> + Send + Sync>;

/// Compiles AST expressions into opaque callables at plan time. Every
/// predicate and scalar the runtime evaluates goes through this one
/// representation.
pub trait ExpressionCompiler: Send + Sync {
    fn compile_scalar(&self, expr: &Expr) -> Result<ScalarFn>;
    fn compile_predicate(&self, expr: &Expr) -> Result<PredicateFn>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_attribute() {
        assert_eq!(primary_key_attribute("Account"), "accountid");
    }

    #[test]
    fn test_metadata_target_from_table_name() {
        assert_eq!(
            MetadataTarget::from_table_name("Entity"),
            Some(MetadataTarget::Entity)
        );
        assert_eq!(MetadataTarget::from_table_name("account"), None);
    }
}

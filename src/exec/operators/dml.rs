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

//! The write operators. Each is the root of a plan whose child (when
//! present) streams the target rows; the child is drained up to the row cap
//! before the first write is submitted, so a failure can never leave a
//! partial batch behind the cap. Every statement's result is a single
//! summary row `{operation, entity, rows_affected}`.

use std::{fmt, sync::Arc};

use async_stream::try_stream;
use async_trait::async_trait;
use config::get_config;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    backend::{
        QueryRequest, ScalarFn, WriteOperation, WriteOptions, WriteRequest, primary_key_attribute,
    },
    errors::{Error, ExecError, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::{row::Row, value::Value},
    sql::fetch,
};

/// Batch strategy and caps, resolved at plan time from hints and profile
/// defaults.
#[derive(Clone, Debug)]
pub struct DmlOptions {
    pub batch_size: usize,
    pub max_rows: usize,
    pub bypass_custom_plugins: bool,
    pub bypass_flows: bool,
}

impl Default for DmlOptions {
    fn default() -> Self {
        let cfg = get_config();
        Self {
            batch_size: cfg.dml.batch_size,
            max_rows: cfg.dml.max_rows,
            bypass_custom_plugins: cfg.dml.bypass_custom_plugins,
            bypass_flows: cfg.dml.bypass_flows,
        }
    }
}

impl DmlOptions {
    fn write_options(&self, ctx: &ExecutionContext) -> WriteOptions {
        WriteOptions {
            bypass_custom_plugins: self.bypass_custom_plugins,
            bypass_flows: self.bypass_flows,
            caller_id: ctx.caller_id(),
        }
    }
}

fn summary_row(operation: &str, entity: &str, rows_affected: u64) -> Row {
    Row::new(entity)
        .with("operation", operation)
        .with("entity", entity)
        .with("rows_affected", rows_affected as i64)
}

/// Drain the target-row child, failing before any write when the cap is
/// exceeded.
async fn collect_target_rows(
    child: &PlanRef,
    ctx: Arc<ExecutionContext>,
    cancel: &CancellationToken,
    cap: usize,
    entity: &str,
) -> Result<Vec<Row>> {
    let mut input = child.execute(ctx, cancel.clone()).await?;
    let mut rows = Vec::new();
    while let Some(row) = input.next().await {
        check_cancelled(cancel)?;
        rows.push(row?);
        if rows.len() > cap {
            return Err(ExecError::RowCapExceeded { cap, entity: entity.to_string() }.into());
        }
    }
    Ok(rows)
}

/// Submit writes in `batch_size` chunks.
async fn submit_writes(
    ctx: &ExecutionContext,
    requests: Vec<WriteRequest>,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<u64> {
    let total = requests.len() as u64;
    let batch_size = batch_size.max(1);
    let mut pending = requests;
    while !pending.is_empty() {
        check_cancelled(cancel)?;
        let rest = pending.split_off(pending.len().min(batch_size));
        let chunk = std::mem::replace(&mut pending, rest);
        let count = chunk.len();
        ctx.stats.add_backend_call();
        if count == 1 {
            let request = chunk.into_iter().next().unwrap();
            ctx.query.execute_write(request, cancel.clone()).await?;
        } else {
            ctx.query.execute_batch(chunk, cancel.clone()).await?;
        }
        ctx.stats.add_rows_written(count as u64);
    }
    Ok(total)
}

fn row_primary_key(row: &Row, pk_column: &str, entity: &str) -> Result<Uuid> {
    match row.value_or_null(pk_column) {
        Value::Guid(id) => Ok(id),
        Value::Reference(reference) => Ok(reference.id),
        other => Err(Error::Message(format!(
            "{entity} row is missing its primary key {pk_column} (got {})",
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum InsertSourceNode {
    /// Compiled per-row, per-column literal expressions.
    Values(Vec<Vec<ScalarFn>>),
    /// A SELECT plan whose output maps positionally onto the target columns.
    Select(PlanRef),
}

pub struct InsertNode {
    entity: String,
    columns: Vec<String>,
    source: InsertSourceNode,
    options: DmlOptions,
}

impl InsertNode {
    pub fn new(
        entity: &str,
        columns: Vec<String>,
        source: InsertSourceNode,
        options: DmlOptions,
    ) -> Self {
        Self {
            entity: entity.to_lowercase(),
            columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
            source,
            options,
        }
    }

    fn is_temp_target(&self) -> bool {
        self.entity.starts_with('#')
    }
}

impl fmt::Debug for InsertNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertNode")
            .field("entity", &self.entity)
            .field("columns", &self.columns)
            .finish()
    }
}

#[async_trait]
impl PlanNode for InsertNode {
    fn name(&self) -> &'static str {
        "Insert"
    }

    fn description(&self) -> String {
        format!("Insert: {}", self.entity)
    }

    fn children(&self) -> Vec<PlanRef> {
        match &self.source {
            InsertSourceNode::Values(_) => Vec::new(),
            InsertSourceNode::Select(child) => vec![child.clone()],
        }
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let cap = self.options.max_rows;
        // each target row as (column, value) pairs, in declared column order
        let mut payloads: Vec<Vec<(String, Value)>> = Vec::new();
        match &self.source {
            InsertSourceNode::Values(rows) => {
                let input = Row::empty();
                for row in rows {
                    check_cancelled(&cancel)?;
                    let mut payload = Vec::with_capacity(self.columns.len());
                    for (column, scalar) in self.columns.iter().zip(row) {
                        payload.push((column.clone(), scalar(&input)?));
                    }
                    payloads.push(payload);
                    if payloads.len() > cap {
                        return Err(ExecError::RowCapExceeded {
                            cap,
                            entity: self.entity.clone(),
                        }
                        .into());
                    }
                }
            }
            InsertSourceNode::Select(child) => {
                let rows =
                    collect_target_rows(child, ctx.clone(), &cancel, cap, &self.entity).await?;
                for row in rows {
                    let payload = self
                        .columns
                        .iter()
                        .zip(row.columns())
                        .map(|(column, (_, value))| (column.clone(), value.clone()))
                        .collect();
                    payloads.push(payload);
                }
            }
        }

        let affected;
        if self.is_temp_target() {
            let rows: Vec<Row> = payloads
                .into_iter()
                .map(|payload| {
                    let mut row = Row::new(&self.entity);
                    for (column, value) in payload {
                        row.insert(&column, value);
                    }
                    row
                })
                .collect();
            affected = rows.len() as u64;
            ctx.session.lock().append_temp_rows(&self.entity, rows)?;
        } else {
            let options = self.options.write_options(&ctx);
            let requests = payloads
                .into_iter()
                .map(|values| WriteRequest {
                    operation: WriteOperation::Create { entity: self.entity.clone(), values },
                    options: options.clone(),
                })
                .collect();
            affected = submit_writes(&ctx, requests, self.options.batch_size, &cancel).await?;
        }
        log::debug!("[DML] inserted {affected} rows into {}", self.entity);
        let summary = summary_row("INSERT", &self.entity, affected);
        Ok(Box::pin(try_stream! {
            yield summary;
        }))
    }
}

// ---------------------------------------------------------------------------
// UPDATE
// ---------------------------------------------------------------------------

pub struct UpdateNode {
    entity: String,
    pk_column: String,
    set: Vec<(String, ScalarFn)>,
    child: PlanRef,
    options: DmlOptions,
}

impl UpdateNode {
    pub fn new(
        entity: &str,
        set: Vec<(String, ScalarFn)>,
        child: PlanRef,
        options: DmlOptions,
    ) -> Self {
        Self {
            entity: entity.to_lowercase(),
            pk_column: primary_key_attribute(entity),
            set,
            child,
            options,
        }
    }
}

impl fmt::Debug for UpdateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateNode")
            .field("entity", &self.entity)
            .field("set", &self.set.iter().map(|(c, _)| c).collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl PlanNode for UpdateNode {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn description(&self) -> String {
        format!("Update: {}", self.entity)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let rows = collect_target_rows(
            &self.child,
            ctx.clone(),
            &cancel,
            self.options.max_rows,
            &self.entity,
        )
        .await?;
        let options = self.options.write_options(&ctx);
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = row_primary_key(row, &self.pk_column, &self.entity)?;
            let mut values = Vec::with_capacity(self.set.len());
            for (column, scalar) in &self.set {
                values.push((column.clone(), scalar(row)?));
            }
            requests.push(WriteRequest {
                operation: WriteOperation::Update { entity: self.entity.clone(), id, values },
                options: options.clone(),
            });
        }
        let affected = submit_writes(&ctx, requests, self.options.batch_size, &cancel).await?;
        log::debug!("[DML] updated {affected} rows in {}", self.entity);
        let summary = summary_row("UPDATE", &self.entity, affected);
        Ok(Box::pin(try_stream! {
            yield summary;
        }))
    }
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeleteNode {
    entity: String,
    pk_column: String,
    child: PlanRef,
    options: DmlOptions,
}

impl DeleteNode {
    pub fn new(entity: &str, child: PlanRef, options: DmlOptions) -> Self {
        Self {
            entity: entity.to_lowercase(),
            pk_column: primary_key_attribute(entity),
            child,
            options,
        }
    }
}

#[async_trait]
impl PlanNode for DeleteNode {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn description(&self) -> String {
        format!("Delete: {}", self.entity)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let rows = collect_target_rows(
            &self.child,
            ctx.clone(),
            &cancel,
            self.options.max_rows,
            &self.entity,
        )
        .await?;
        let options = self.options.write_options(&ctx);
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = row_primary_key(row, &self.pk_column, &self.entity)?;
            requests.push(WriteRequest {
                operation: WriteOperation::Delete { entity: self.entity.clone(), id },
                options: options.clone(),
            });
        }
        let affected = submit_writes(&ctx, requests, self.options.batch_size, &cancel).await?;
        log::debug!("[DML] deleted {affected} rows from {}", self.entity);
        let summary = summary_row("DELETE", &self.entity, affected);
        Ok(Box::pin(try_stream! {
            yield summary;
        }))
    }
}

// ---------------------------------------------------------------------------
// MERGE
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum MergeMatchedOp {
    Update(Vec<(String, ScalarFn)>),
    Delete,
}

pub struct MergeNode {
    entity: String,
    pk_column: String,
    source: PlanRef,
    /// Column of the source stream and of the target entity joined by the
    /// single supported ON equality.
    on_source: String,
    on_target: String,
    matched: Option<MergeMatchedOp>,
    not_matched: Option<Vec<(String, ScalarFn)>>,
    options: DmlOptions,
}

impl MergeNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity: &str,
        source: PlanRef,
        on_source: &str,
        on_target: &str,
        matched: Option<MergeMatchedOp>,
        not_matched: Option<Vec<(String, ScalarFn)>>,
        options: DmlOptions,
    ) -> Self {
        Self {
            entity: entity.to_lowercase(),
            pk_column: primary_key_attribute(entity),
            source,
            on_source: on_source.to_lowercase(),
            on_target: on_target.to_lowercase(),
            matched,
            not_matched,
            options,
        }
    }

    /// Look the target up by the ON column; at most one match is honored.
    async fn find_match(
        &self,
        ctx: &Arc<ExecutionContext>,
        key: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Uuid>> {
        let xml = format!(
            "<fetch top=\"1\"><entity name=\"{0}\"><attribute name=\"{1}\" /><filter>\
             <condition attribute=\"{2}\" operator=\"eq\" value=\"{3}\" /></filter>\
             </entity></fetch>",
            self.entity,
            self.pk_column,
            self.on_target,
            fetch::xml_escape(&key.to_string()),
        );
        ctx.stats.add_backend_call();
        let response = ctx
            .query
            .execute_query(
                QueryRequest {
                    fetch_xml: xml,
                    caller_id: ctx.caller_id(),
                    ..Default::default()
                },
                cancel.clone(),
            )
            .await?;
        match response.records.first() {
            Some(row) => Ok(Some(row_primary_key(row, &self.pk_column, &self.entity)?)),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for MergeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeNode")
            .field("entity", &self.entity)
            .field("on", &format!("{} = {}", self.on_source, self.on_target))
            .finish()
    }
}

#[async_trait]
impl PlanNode for MergeNode {
    fn name(&self) -> &'static str {
        "Merge"
    }

    fn description(&self) -> String {
        format!("Merge: {}", self.entity)
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.source.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let rows = collect_target_rows(
            &self.source,
            ctx.clone(),
            &cancel,
            self.options.max_rows,
            &self.entity,
        )
        .await?;
        let options = self.options.write_options(&ctx);
        let mut requests = Vec::new();
        for row in &rows {
            check_cancelled(&cancel)?;
            let key = row.value_or_null(&self.on_source);
            // null never matches; it can only take the not-matched branch
            let matched = if key.is_null() {
                None
            } else {
                self.find_match(&ctx, &key, &cancel).await?
            };
            match (matched, &self.matched, &self.not_matched) {
                (Some(id), Some(MergeMatchedOp::Update(set)), _) => {
                    let mut values = Vec::with_capacity(set.len());
                    for (column, scalar) in set {
                        values.push((column.clone(), scalar(row)?));
                    }
                    requests.push(WriteRequest {
                        operation: WriteOperation::Update {
                            entity: self.entity.clone(),
                            id,
                            values,
                        },
                        options: options.clone(),
                    });
                }
                (Some(id), Some(MergeMatchedOp::Delete), _) => {
                    requests.push(WriteRequest {
                        operation: WriteOperation::Delete { entity: self.entity.clone(), id },
                        options: options.clone(),
                    });
                }
                (Some(_), None, _) => {}
                (None, _, Some(insert)) => {
                    let mut values = Vec::with_capacity(insert.len());
                    for (column, scalar) in insert {
                        values.push((column.clone(), scalar(row)?));
                    }
                    requests.push(WriteRequest {
                        operation: WriteOperation::Create { entity: self.entity.clone(), values },
                        options: options.clone(),
                    });
                }
                (None, _, None) => {}
            }
        }
        let affected = submit_writes(&ctx, requests, self.options.batch_size, &cancel).await?;
        log::debug!("[DML] merge affected {affected} rows in {}", self.entity);
        let summary = summary_row("MERGE", &self.entity, affected);
        Ok(Box::pin(try_stream! {
            yield summary;
        }))
    }
}

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
    backend::{QueryRequest, QueryResponse, primary_key_attribute},
    errors::Result,
    exec::{ExecutionContext, PlanNode, SendableRowStream, check_cancelled},
    sql::fetch,
};

#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    pub auto_page: bool,
    pub include_count: bool,
    pub no_lock: bool,
    /// Caller-supplied paging position for caller-paged mode.
    pub start_page: Option<u32>,
    pub start_cookie: Option<String>,
    pub max_rows: Option<usize>,
}

impl ScanOptions {
    pub fn auto_paged() -> Self {
        Self {
            auto_page: true,
            ..Default::default()
        }
    }
}

/// Converts a FetchXML query into a stream of rows by iterating the
/// service's cookie-based pages.
///
/// A declared `top` limit is rewritten into a first-page-of-size-N request
/// because top and paging are mutually exclusive server-side; N is capped
/// at the service page limit and the original text is preserved for
/// display. When the query contains a server-side join, children of one
/// parent can straddle a page boundary; the scan tracks the parent key and
/// flags the leading rows of a continuation page so grouping consumers do
/// not close the parent's group early.
#[derive(Debug)]
pub struct FetchScanNode {
    entity: String,
    /// Query actually sent, top stripped.
    fetch_xml: String,
    /// Query as generated, for display.
    display_xml: String,
    options: ScanOptions,
    top: Option<u32>,
    has_link_entity: bool,
    aggregate: bool,
}

impl FetchScanNode {
    pub fn new(entity: &str, fetch_xml: String, options: ScanOptions) -> Self {
        let display_xml = fetch_xml.clone();
        let fetch_xml = if options.no_lock {
            fetch::set_no_lock(&fetch_xml)
        } else {
            fetch_xml
        };
        let (fetch_xml, top) = fetch::take_top(&fetch_xml);
        let aggregate = fetch::is_aggregate(&fetch_xml);
        let has_link_entity = fetch::has_link_entity(&fetch_xml);
        Self {
            entity: entity.to_lowercase(),
            fetch_xml,
            display_xml,
            options,
            top,
            has_link_entity,
            aggregate,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn query_text(&self) -> &str {
        &self.display_xml
    }

    /// One page fetch with transient-failure retries on the same cookie.
    async fn fetch_page(
        ctx: &ExecutionContext,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let retries = get_config().limit.scan_retries;
        let mut attempt = 0;
        loop {
            check_cancelled(cancel)?;
            ctx.stats.add_backend_call();
            match ctx.query.execute_query(request.clone(), cancel.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    ctx.stats.add_retry();
                    log::warn!(
                        "[SCAN] transient failure on page {:?}, retry {attempt}/{retries}: {e}",
                        request.page_size
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl PlanNode for FetchScanNode {
    fn name(&self) -> &'static str {
        "FetchScan"
    }

    fn description(&self) -> String {
        format!("FetchScan: {}", self.entity)
    }

    fn estimated_rows(&self) -> i64 {
        match self.top {
            Some(top) => top as i64,
            None => -1,
        }
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let cfg = get_config();
        let page_limit = cfg.limit.page_size;
        let entity = self.entity.clone();
        let template = self.fetch_xml.clone();
        let options = self.options.clone();
        let aggregate = self.aggregate;
        let track_parents = self.has_link_entity && !aggregate;
        let parent_attr = primary_key_attribute(&entity);
        // top N becomes a single page of (at most) N rows
        let (page_size, auto_page) = match self.top {
            Some(top) => (top.min(page_limit), false),
            None => (page_limit, options.auto_page),
        };
        let row_cap = match (options.max_rows, self.top) {
            (Some(cap), Some(top)) => Some(cap.min(top as usize)),
            (Some(cap), None) => Some(cap),
            (None, Some(top)) => Some(top as usize),
            (None, None) => None,
        };

        Ok(Box::pin(try_stream! {
            let mut page = options.start_page.unwrap_or(1);
            let mut cookie = options.start_cookie.clone();
            let mut yielded = 0usize;
            let mut last_parent: Option<String> = None;
            let mut first_page = true;
            loop {
                let page_xml = {
                    let xml = fetch::prepare_page(&template, page, page_size, cookie.as_deref());
                    if options.include_count && first_page {
                        fetch::set_return_total_count(&xml)
                    } else {
                        xml
                    }
                };
                let request = QueryRequest {
                    fetch_xml: page_xml,
                    page_size: Some(page_size),
                    paging_cookie: cookie.clone(),
                    include_count: options.include_count && first_page,
                    caller_id: ctx.caller_id(),
                };
                let response = Self::fetch_page(&ctx, request, &cancel).await?;
                ctx.stats.add_page();
                if let Some(total) = response.total_count {
                    ctx.stats.set_total_record_count(total);
                }
                log::debug!(
                    "[SCAN] {entity} page {page}: {} rows, more={}",
                    response.records.len(),
                    response.more_records
                );
                let mut leading = !first_page;
                for mut row in response.records {
                    check_cancelled(&cancel)?;
                    let parent = track_parents
                        .then(|| row.value_or_null(&parent_attr).group_key());
                    if track_parents {
                        if leading && parent == last_parent {
                            row.set_page_continuation(true);
                        } else {
                            leading = false;
                        }
                    }
                    ctx.stats.add_rows_read(1);
                    yielded += 1;
                    yield row;
                    if track_parents {
                        last_parent = parent;
                    }
                    if row_cap.is_some_and(|cap| yielded >= cap) {
                        return;
                    }
                }
                if !response.more_records || !auto_page {
                    break;
                }
                cookie = response.paging_cookie.clone();
                page = response.page_number.max(page) + 1;
                first_page = false;
            }
        }))
    }
}

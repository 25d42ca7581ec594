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

use arc_swap::ArcSwap;
use dotenv_config::EnvConfig;
use dotenvy::dotenv_override;
use once_cell::sync::Lazy;

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
pub type FxIndexSet<K> = indexmap::IndexSet<K, ahash::RandomState>;

/// Hard page-size ceiling of the back-end query service. Requests above this
/// are truncated server-side, so the engine never asks for more.
pub const SERVICE_MAX_PAGE_SIZE: u32 = 5000;
/// Record count above which the back end fails any aggregate query.
pub const SERVICE_AGGREGATE_LIMIT: u64 = 50_000;

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from(Arc::new(init())));

#[derive(EnvConfig)]
pub struct Config {
    pub limit: Limit,
    pub partition: Partition,
    pub dml: Dml,
}

#[derive(EnvConfig)]
pub struct Limit {
    // rows per page requested from the back end, capped at the service limit
    #[env_config(name = "PPDS_PAGE_SIZE", default = 5000)]
    pub page_size: u32,
    #[env_config(name = "PPDS_PREFETCH_BUFFER_SIZE", default = 5000)]
    pub prefetch_buffer_size: usize,
    // rows a blocking operator (sort, window) may materialize before failing
    #[env_config(name = "PPDS_MAX_MATERIALIZED_ROWS", default = 500000)]
    pub max_materialized_rows: usize,
    #[env_config(name = "PPDS_SCAN_RETRIES", default = 3)]
    pub scan_retries: usize,
    // when true, the caller drives paging and the prefetch wrapper is skipped
    #[env_config(name = "PPDS_CALLER_PAGED", default = false)]
    pub caller_paged: bool,
}

#[derive(EnvConfig)]
pub struct Partition {
    #[env_config(name = "PPDS_PARTITION_RECORD_LIMIT", default = 50000)]
    pub record_limit: u64,
    #[env_config(name = "PPDS_MAX_PARALLEL_PARTITIONS", default = 8)]
    pub max_parallel: usize,
    // adaptive-split recursion guard
    #[env_config(name = "PPDS_MAX_PARTITION_DEPTH", default = 10)]
    pub max_depth: u32,
}

#[derive(EnvConfig)]
pub struct Dml {
    #[env_config(name = "PPDS_DML_BATCH_SIZE", default = 100)]
    pub batch_size: usize,
    #[env_config(name = "PPDS_DML_MAX_ROWS", default = 100000)]
    pub max_rows: usize,
    #[env_config(name = "PPDS_BYPASS_CUSTOM_PLUGINS", default = false)]
    pub bypass_custom_plugins: bool,
    #[env_config(name = "PPDS_BYPASS_FLOWS", default = false)]
    pub bypass_flows: bool,
}

pub fn init() -> Config {
    dotenv_override().ok();
    let mut cfg = Config::init().unwrap();
    if cfg.limit.page_size == 0 || cfg.limit.page_size > SERVICE_MAX_PAGE_SIZE {
        cfg.limit.page_size = SERVICE_MAX_PAGE_SIZE;
    }
    if cfg.limit.prefetch_buffer_size == 0 {
        cfg.limit.prefetch_buffer_size = 5000;
    }
    if cfg.partition.record_limit == 0 || cfg.partition.record_limit > SERVICE_AGGREGATE_LIMIT {
        cfg.partition.record_limit = SERVICE_AGGREGATE_LIMIT;
    }
    if cfg.partition.max_parallel == 0 {
        cfg.partition.max_parallel = 8;
    }
    if cfg.partition.max_depth == 0 {
        cfg.partition.max_depth = 10;
    }
    if cfg.dml.batch_size == 0 {
        cfg.dml.batch_size = 100;
    }
    cfg
}

pub fn get_config() -> Arc<Config> {
    CONFIG.load().clone()
}

pub fn refresh_config() -> Result<(), anyhow::Error> {
    CONFIG.store(Arc::new(init()));
    Ok(())
}

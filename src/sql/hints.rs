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

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sql::ast::OptionClause;

/// `-- ppds:NAME [value]` anywhere in the statement text.
static HINT_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--\s*ppds:([A-Za-z_]+)(?:[ \t]+(\S+))?").unwrap());

/// Optimizer hints extracted from the OPTION clause and from single-line
/// comment tokens. Hints override profile defaults but never explicit
/// per-query API parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryHints {
    pub use_tds: bool,
    pub bypass_custom_plugins: bool,
    pub bypass_flows: bool,
    pub no_lock: bool,
    pub batch_size: Option<usize>,
    pub max_rows: Option<usize>,
    pub max_dop: Option<usize>,
    pub force_client_aggregation: bool,
}

impl QueryHints {
    /// Extract hints from the original SQL text and the statement's OPTION
    /// clause. Unrecognized names and malformed values are dropped.
    pub fn parse(sql: &str, options: &[OptionClause]) -> Self {
        let mut hints = QueryHints::default();
        for capture in HINT_COMMENT.captures_iter(sql) {
            let name = capture.get(1).unwrap().as_str().to_uppercase();
            let value = capture.get(2).map(|m| m.as_str());
            match name.as_str() {
                "USE_TDS" => hints.use_tds = true,
                "BYPASS_PLUGINS" => hints.bypass_custom_plugins = true,
                "BYPASS_FLOWS" => hints.bypass_flows = true,
                "NOLOCK" => hints.no_lock = true,
                "FORCE_CLIENT_AGGREGATION" => hints.force_client_aggregation = true,
                "BATCH_SIZE" => hints.batch_size = parse_int(&name, value),
                "MAX_ROWS" => hints.max_rows = parse_int(&name, value),
                "MAXDOP" => hints.max_dop = parse_int(&name, value),
                _ => {
                    log::debug!("[HINTS] dropping unrecognized hint {name}");
                }
            }
        }
        for option in options {
            match option {
                OptionClause::MaxDop(n) if *n > 0 => hints.max_dop = Some(*n as usize),
                OptionClause::MaxDop(_) => {}
                OptionClause::Other(name) => {
                    log::debug!("[HINTS] dropping unrecognized option {name}");
                }
            }
        }
        hints
    }
}

fn parse_int(name: &str, value: Option<&str>) -> Option<usize> {
    match value.and_then(|v| v.parse::<usize>().ok()) {
        Some(v) if v > 0 => Some(v),
        _ => {
            log::debug!("[HINTS] dropping {name} with missing or invalid value");
            None
        }
    }
}

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
    backend::ScalarFn,
    errors::{Error, Result},
    exec::{ExecutionContext, PlanNode, SendableRowStream, check_cancelled},
    meta::{row::Row, value::Value},
};

/// `STRING_SPLIT(input, separator [, enable_ordinal])` in FROM: one row per
/// separator-delimited token, with an optional 1-based `ordinal` column.
pub struct StringSplitNode {
    input: ScalarFn,
    separator: ScalarFn,
    with_ordinal: bool,
    alias: String,
}

impl StringSplitNode {
    pub fn new(input: ScalarFn, separator: ScalarFn, with_ordinal: bool, alias: &str) -> Self {
        Self {
            input,
            separator,
            with_ordinal,
            alias: alias.to_lowercase(),
        }
    }
}

impl fmt::Debug for StringSplitNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringSplitNode")
            .field("alias", &self.alias)
            .field("with_ordinal", &self.with_ordinal)
            .finish()
    }
}

#[async_trait]
impl PlanNode for StringSplitNode {
    fn name(&self) -> &'static str {
        "StringSplit"
    }

    fn description(&self) -> String {
        format!("StringSplit: {}", self.alias)
    }

    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let constant = Row::empty();
        let input = (self.input)(&constant)?;
        let separator = (self.separator)(&constant)?;
        let alias = self.alias.clone();
        let with_ordinal = self.with_ordinal;
        // a null input produces an empty set
        let text = match input {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => {
                return Err(Error::Message(format!(
                    "STRING_SPLIT input must be a string, got {}",
                    other.type_name()
                )));
            }
        };
        let separator = match separator {
            Value::String(s) if s.chars().count() == 1 => s,
            other => {
                return Err(Error::Message(format!(
                    "STRING_SPLIT separator must be a single character, got {other}"
                )));
            }
        };
        Ok(Box::pin(try_stream! {
            if let Some(text) = text {
                for (i, token) in text.split(separator.as_str()).enumerate() {
                    check_cancelled(&cancel)?;
                    let mut row = Row::new(&alias).with("value", token);
                    if with_ordinal {
                        row.insert("ordinal", Value::Int(i as i64 + 1));
                    }
                    yield row;
                }
            }
        }))
    }
}

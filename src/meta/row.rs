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

use config::FxIndexMap;

use crate::meta::value::Value;

const GROUP_KEY_SEPARATOR: char = '\u{1f}';

/// An ordered attribute → value mapping tagged with the logical name of the
/// entity it came from. Attribute lookup is case-insensitive; names are
/// normalized to lowercase on insert and probe. Rows are treated as
/// immutable once yielded by an operator; augmentation clones.
#[derive(Debug, Clone)]
pub struct Row {
    entity: Arc<str>,
    values: FxIndexMap<String, Value>,
    page_continuation: bool,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            entity: Arc::from(""),
            values: FxIndexMap::default(),
            page_continuation: false,
        }
    }
}

impl Row {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: Arc::from(entity.to_lowercase().as_str()),
            values: FxIndexMap::default(),
            page_continuation: false,
        }
    }

    /// A row with no entity and no attributes, the evaluation input for
    /// constant expressions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_lowercase(), value);
    }

    /// Builder-style insert, used heavily by tests.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_lowercase())
    }

    /// Attribute value, or `Value::Null` when the attribute is absent.
    pub fn value_or_null(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_lowercase())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// New row sharing this row's values plus one more attribute.
    pub fn with_value(&self, name: &str, value: Value) -> Row {
        let mut row = self.clone();
        row.insert(name, value);
        row
    }

    /// Identity of the whole value vector, attribute order significant,
    /// attribute names ignored. Drives DISTINCT and the set operators.
    pub fn identity_key(&self) -> String {
        let mut key = String::new();
        for value in self.values.values() {
            key.push_str(&value.group_key());
            key.push(GROUP_KEY_SEPARATOR);
        }
        key
    }

    /// Identity of the named subset of columns, missing columns grouping as
    /// null. Drives aggregate regrouping.
    pub fn group_key_of(&self, columns: &[String]) -> String {
        let mut key = String::new();
        for name in columns {
            key.push_str(&self.value_or_null(name).group_key());
            key.push(GROUP_KEY_SEPARATOR);
        }
        key
    }

    pub fn is_page_continuation(&self) -> bool {
        self.page_continuation
    }

    pub(crate) fn set_page_continuation(&mut self, value: bool) {
        self.page_continuation = value;
    }
}

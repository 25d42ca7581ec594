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

//! Caller-owned state that outlives a single statement: variable scopes,
//! cursors, the impersonation stack and the temp-table store. A session is
//! exclusive to one plan execution at a time; the single-consumer pull model
//! keeps mutations serialized, so a plain mutex with short critical sections
//! is enough.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    errors::{ExecError, Result},
    exec::PlanRef,
    meta::{row::Row, value::Value},
};

pub type SessionHandle = Arc<Mutex<Session>>;

pub fn new_session() -> SessionHandle {
    Arc::new(Mutex::new(Session::new()))
}

#[derive(Clone, Debug)]
pub struct TempTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Clone)]
pub struct CursorState {
    pub plan: PlanRef,
    pub open: bool,
    pub rows: Vec<Row>,
    pub position: usize,
}

#[derive(Default)]
pub struct Session {
    scopes: Vec<HashMap<String, Value>>,
    cursors: HashMap<String, CursorState>,
    impersonation: Vec<Uuid>,
    temp_tables: HashMap<String, TempTable>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            ..Default::default()
        }
    }

    // -- variables ----------------------------------------------------------

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// DECLARE creates the variable in the top frame.
    pub fn declare_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let name = normalize_variable(name);
        let top = self.scopes.last_mut().expect("session always has a scope");
        if top.contains_key(&name) {
            return Err(ExecError::VariableAlreadyDeclared { name }.into());
        }
        top.insert(name, value);
        Ok(())
    }

    /// SET updates the nearest declaring frame.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let name = normalize_variable(name);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(&name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(ExecError::VariableNotDeclared { name }.into())
    }

    /// Lookup walks the stack from the innermost frame out.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let name = normalize_variable(name);
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).cloned())
    }

    // -- cursors ------------------------------------------------------------

    pub fn declare_cursor(&mut self, name: &str, plan: PlanRef) -> Result<()> {
        let name = name.to_lowercase();
        if self.cursors.contains_key(&name) {
            return Err(ExecError::CursorAlreadyDeclared { name }.into());
        }
        self.cursors.insert(
            name,
            CursorState {
                plan,
                open: false,
                rows: Vec::new(),
                position: 0,
            },
        );
        Ok(())
    }

    pub fn cursor(&self, name: &str) -> Result<&CursorState> {
        self.cursors
            .get(&name.to_lowercase())
            .ok_or_else(|| ExecError::CursorNotDeclared { name: name.to_lowercase() }.into())
    }

    pub fn cursor_mut(&mut self, name: &str) -> Result<&mut CursorState> {
        self.cursors
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| ExecError::CursorNotDeclared { name: name.to_lowercase() }.into())
    }

    pub fn deallocate_cursor(&mut self, name: &str) -> Result<()> {
        match self.cursors.remove(&name.to_lowercase()) {
            Some(_) => Ok(()),
            None => Err(ExecError::CursorNotDeclared { name: name.to_lowercase() }.into()),
        }
    }

    /// Drop materialized rows of every open cursor. Called when an execution
    /// fails so buffers are not kept alive by the session.
    pub fn release_cursors(&mut self) {
        for cursor in self.cursors.values_mut() {
            cursor.open = false;
            cursor.rows = Vec::new();
            cursor.position = 0;
        }
    }

    // -- impersonation ------------------------------------------------------

    pub fn push_principal(&mut self, id: Uuid) {
        self.impersonation.push(id);
    }

    pub fn pop_principal(&mut self) -> Result<Uuid> {
        self.impersonation
            .pop()
            .ok_or_else(|| ExecError::ImpersonationStackEmpty.into())
    }

    pub fn current_principal(&self) -> Option<Uuid> {
        self.impersonation.last().copied()
    }

    // -- temp tables --------------------------------------------------------

    pub fn create_temp_table(&mut self, name: &str, columns: Vec<String>) -> Result<()> {
        let name = name.to_lowercase();
        if self.temp_tables.contains_key(&name) {
            return Err(ExecError::TempTableExists { name }.into());
        }
        self.temp_tables.insert(
            name,
            TempTable {
                columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn drop_temp_table(&mut self, name: &str) -> Result<()> {
        match self.temp_tables.remove(&name.to_lowercase()) {
            Some(_) => Ok(()),
            None => Err(ExecError::TempTableNotFound { name: name.to_lowercase() }.into()),
        }
    }

    pub fn temp_table(&self, name: &str) -> Result<&TempTable> {
        self.temp_tables
            .get(&name.to_lowercase())
            .ok_or_else(|| ExecError::TempTableNotFound { name: name.to_lowercase() }.into())
    }

    pub fn append_temp_rows(&mut self, name: &str, rows: Vec<Row>) -> Result<()> {
        let table = self
            .temp_tables
            .get_mut(&name.to_lowercase())
            .ok_or(ExecError::TempTableNotFound { name: name.to_lowercase() })?;
        table.rows.extend(rows);
        Ok(())
    }
}

/// Variable names are case-insensitive and stored without the sigil.
fn normalize_variable(name: &str) -> String {
    name.trim_start_matches('@').to_lowercase()
}

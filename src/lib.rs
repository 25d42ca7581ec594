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

//! A SQL planning and execution engine over data services that natively
//! speak FetchXML. The plan builder walks a parsed T-SQL statement tree and
//! wires a tree of streaming operators; executing the root pulls rows
//! lazily through paged scans, client-side operators, the partitioned
//! aggregation pipeline and the DML, cursor and script operators. Parsing,
//! FetchXML generation, expression compilation and transport stay behind
//! the interfaces in [`backend`].

pub mod backend;
pub mod errors;
pub mod exec;
pub mod meta;
pub mod planner;
pub mod session;
pub mod sql;

pub use errors::{Error, Result};
pub use exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, explain};
pub use meta::{row::Row, stats::StatsSnapshot, value::Value};
pub use planner::{BuilderOptions, PlanBuilder, PlanResult};
pub use session::{Session, SessionHandle, new_session};

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
use config::{FxIndexMap, get_config};
use itertools::Itertools;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Result,
    exec::{
        ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled, materialize,
        operators::sort::{SortKey, compare_rows},
    },
    meta::{row::Row, value::Value},
    sql::ast::WindowFunction,
};

/// One `expr OVER (...)` computation. The operand is always a plain column;
/// the builder pre-projects computed operands into hidden columns.
#[derive(Clone, Debug)]
pub struct WindowDef {
    pub output: String,
    pub function: WindowFunction,
    pub operand: Option<String>,
    pub partition_by: Vec<String>,
    pub order_by: Vec<SortKey>,
}

/// Materializes the whole input, partitions it per window definition, sorts
/// each partition by the order keys and assigns per-row values. Aggregate
/// window functions run over the entire partition (no frames in this
/// release). Input size is bounded by the materialization cap.
#[derive(Debug)]
pub struct WindowNode {
    child: PlanRef,
    windows: Vec<WindowDef>,
}

impl WindowNode {
    pub fn new(child: PlanRef, windows: Vec<WindowDef>) -> Self {
        Self { child, windows }
    }

    fn compute(rows: &[Row], def: &WindowDef) -> Vec<Value> {
        let mut out = vec![Value::Null; rows.len()];
        let mut partitions: FxIndexMap<String, Vec<usize>> = FxIndexMap::default();
        for (idx, row) in rows.iter().enumerate() {
            partitions
                .entry(row.group_key_of(&def.partition_by))
                .or_default()
                .push(idx);
        }
        for indices in partitions.values() {
            let mut sorted = indices.clone();
            sorted.sort_by(|&a, &b| compare_rows(&rows[a], &rows[b], &def.order_by));
            match def.function {
                WindowFunction::RowNumber => {
                    for (seq, &idx) in sorted.iter().enumerate() {
                        out[idx] = Value::Int(seq as i64 + 1);
                    }
                }
                WindowFunction::Rank | WindowFunction::DenseRank => {
                    let dense = def.function == WindowFunction::DenseRank;
                    let mut rank = 0i64;
                    let mut dense_rank = 0i64;
                    let mut prev: Option<usize> = None;
                    for (seq, &idx) in sorted.iter().enumerate() {
                        let tied = prev.is_some_and(|p| {
                            compare_rows(&rows[p], &rows[idx], &def.order_by)
                                == std::cmp::Ordering::Equal
                        });
                        if !tied {
                            rank = seq as i64 + 1;
                            dense_rank += 1;
                        }
                        out[idx] = Value::Int(if dense { dense_rank } else { rank });
                        prev = Some(idx);
                    }
                }
                _ => {
                    let value = Self::partition_aggregate(rows, &sorted, def);
                    for &idx in &sorted {
                        out[idx] = value.clone();
                    }
                }
            }
        }
        out
    }

    fn partition_aggregate(rows: &[Row], indices: &[usize], def: &WindowDef) -> Value {
        if def.function == WindowFunction::CountStar {
            return Value::Int(indices.len() as i64);
        }
        let operand = def.operand.as_deref().unwrap_or_default();
        let values = indices
            .iter()
            .map(|&idx| rows[idx].value_or_null(operand))
            .filter(|v| !v.is_null())
            .collect::<Vec<_>>();
        match def.function {
            WindowFunction::Count => Value::Int(values.len() as i64),
            WindowFunction::Sum => values
                .iter()
                .try_fold(Value::Null, |acc, v| acc.add_numeric(v))
                .unwrap_or(Value::Null),
            WindowFunction::Min | WindowFunction::Max => {
                let want_max = def.function == WindowFunction::Max;
                values
                    .into_iter()
                    .reduce(|best, v| {
                        match best.compare(&v) {
                            Some(std::cmp::Ordering::Less) if want_max => v,
                            Some(std::cmp::Ordering::Greater) if !want_max => v,
                            _ => best,
                        }
                    })
                    .unwrap_or(Value::Null)
            }
            WindowFunction::Avg => {
                let numerics = values.iter().filter_map(|v| v.to_decimal()).collect::<Vec<_>>();
                if numerics.is_empty() {
                    Value::Null
                } else {
                    let sum: Decimal = numerics.iter().sum();
                    Value::Decimal(sum / Decimal::from(numerics.len() as i64))
                }
            }
            // handled above
            WindowFunction::RowNumber
            | WindowFunction::Rank
            | WindowFunction::DenseRank
            | WindowFunction::CountStar => Value::Null,
        }
    }
}

#[async_trait]
impl PlanNode for WindowNode {
    fn name(&self) -> &'static str {
        "Window"
    }

    fn description(&self) -> String {
        format!(
            "Window: {}",
            self.windows.iter().map(|w| w.output.as_str()).join(", ")
        )
    }

    fn children(&self) -> Vec<PlanRef> {
        vec![self.child.clone()]
    }

    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<SendableRowStream> {
        let input = self.child.execute(ctx, cancel.clone()).await?;
        let limit = get_config().limit.max_materialized_rows;
        let rows = materialize(input, "Window", limit, &cancel).await?;
        let computed: Vec<(String, Vec<Value>)> = self
            .windows
            .iter()
            .map(|def| (def.output.clone(), Self::compute(&rows, def)))
            .collect();
        Ok(Box::pin(try_stream! {
            for (idx, row) in rows.into_iter().enumerate() {
                check_cancelled(&cancel)?;
                let mut out = row;
                for (name, values) in &computed {
                    out = out.with_value(name, values[idx].clone());
                }
                yield out;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::test_utils::{drain, test_ctx, values_node};

    fn owners() -> PlanRef {
        values_node(
            "opportunity",
            vec![
                vec![("owner", "A".into()), ("name", "A1".into()), ("revenue", 300.into())],
                vec![("owner", "A".into()), ("name", "A2".into()), ("revenue", 100.into())],
                vec![("owner", "B".into()), ("name", "B1".into()), ("revenue", 200.into())],
                vec![("owner", "B".into()), ("name", "B2".into()), ("revenue", 400.into())],
            ],
        )
    }

    fn def(function: WindowFunction, operand: Option<&str>) -> WindowDef {
        WindowDef {
            output: "w".to_string(),
            function,
            operand: operand.map(|s| s.to_string()),
            partition_by: vec!["owner".to_string()],
            order_by: vec![SortKey::asc("revenue")],
        }
    }

    #[tokio::test]
    async fn test_row_number_partitioned() {
        let node = WindowNode::new(owners(), vec![def(WindowFunction::RowNumber, None)]);
        let rows = drain(&node, test_ctx()).await.unwrap();
        let by_name: Vec<(String, i64)> = rows
            .iter()
            .map(|r| {
                (
                    r.value_or_null("name").to_string(),
                    r.value_or_null("w").as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            by_name,
            vec![
                ("A1".to_string(), 2),
                ("A2".to_string(), 1),
                ("B1".to_string(), 1),
                ("B2".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn test_rank_and_dense_rank_with_ties() {
        let child = values_node(
            "e",
            vec![
                vec![("v", 10.into())],
                vec![("v", 10.into())],
                vec![("v", 20.into())],
            ],
        );
        let defs = vec![
            WindowDef {
                output: "rnk".to_string(),
                function: WindowFunction::Rank,
                operand: None,
                partition_by: vec![],
                order_by: vec![SortKey::asc("v")],
            },
            WindowDef {
                output: "dense".to_string(),
                function: WindowFunction::DenseRank,
                operand: None,
                partition_by: vec![],
                order_by: vec![SortKey::asc("v")],
            },
        ];
        let rows = drain(&WindowNode::new(child, defs), test_ctx()).await.unwrap();
        let ranks: Vec<i64> = rows.iter().map(|r| r.value_or_null("rnk").as_i64().unwrap()).collect();
        let dense: Vec<i64> = rows.iter().map(|r| r.value_or_null("dense").as_i64().unwrap()).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        assert_eq!(dense, vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn test_aggregates_over_whole_partition() {
        let node = WindowNode::new(owners(), vec![def(WindowFunction::Sum, Some("revenue"))]);
        let rows = drain(&node, test_ctx()).await.unwrap();
        for row in &rows {
            let expected = match row.value_or_null("owner").to_string().as_str() {
                "A" => 400,
                _ => 600,
            };
            assert_eq!(row.value_or_null("w").as_i64(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_window_on_empty_input() {
        let node = WindowNode::new(
            values_node("e", vec![]),
            vec![def(WindowFunction::RowNumber, None)],
        );
        assert!(drain(&node, test_ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_star_and_avg() {
        let child = values_node(
            "e",
            vec![
                vec![("v", 10.into())],
                vec![("v", Value::Null)],
                vec![("v", 20.into())],
            ],
        );
        let defs = vec![
            WindowDef {
                output: "c".to_string(),
                function: WindowFunction::CountStar,
                operand: None,
                partition_by: vec![],
                order_by: vec![],
            },
            WindowDef {
                output: "cnt".to_string(),
                function: WindowFunction::Count,
                operand: Some("v".to_string()),
                partition_by: vec![],
                order_by: vec![],
            },
            WindowDef {
                output: "a".to_string(),
                function: WindowFunction::Avg,
                operand: Some("v".to_string()),
                partition_by: vec![],
                order_by: vec![],
            },
        ];
        let rows = drain(&WindowNode::new(child, defs), test_ctx()).await.unwrap();
        assert_eq!(rows[0].value_or_null("c").as_i64(), Some(3));
        assert_eq!(rows[0].value_or_null("cnt").as_i64(), Some(2));
        assert_eq!(
            rows[0].value_or_null("a"),
            Value::Decimal(Decimal::from(15))
        );
    }
}

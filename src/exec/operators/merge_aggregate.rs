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
use futures::StreamExt;
use itertools::Itertools;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{ExecError, Result},
    exec::{ExecutionContext, PlanNode, PlanRef, SendableRowStream, check_cancelled},
    meta::{row::Row, value::Value},
};

/// Merge rules for partitioned aggregates. Deliberately no distinct
/// variant: partial distinct counts cannot be summed without
/// double-counting, so COUNT(DISTINCT) is never partitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountColumn,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Clone, Debug)]
pub struct AggregateDef {
    /// Alias of the partial value in the input rows, and of the merged
    /// value in the output.
    pub alias: String,
    pub function: AggregateFunction,
    /// Companion count alias backing a weighted AVG merge.
    pub weight_alias: Option<String>,
}

impl AggregateDef {
    pub fn new(alias: &str, function: AggregateFunction) -> Self {
        Self {
            alias: alias.to_lowercase(),
            function,
            weight_alias: None,
        }
    }

    pub fn weighted(alias: &str, weight_alias: &str) -> Self {
        Self {
            alias: alias.to_lowercase(),
            function: AggregateFunction::Avg,
            weight_alias: Some(weight_alias.to_lowercase()),
        }
    }
}

enum Accumulator {
    Sum(Value),
    Extreme { best: Value, want_max: bool },
    Avg { pairs: Vec<(Decimal, Option<Decimal>)> },
}

impl Accumulator {
    fn new(def: &AggregateDef) -> Self {
        match def.function {
            AggregateFunction::Count | AggregateFunction::CountColumn | AggregateFunction::Sum => {
                Accumulator::Sum(Value::Null)
            }
            AggregateFunction::Min => Accumulator::Extreme { best: Value::Null, want_max: false },
            AggregateFunction::Max => Accumulator::Extreme { best: Value::Null, want_max: true },
            AggregateFunction::Avg => Accumulator::Avg { pairs: Vec::new() },
        }
    }

    fn push(&mut self, def: &AggregateDef, row: &Row) {
        let partial = row.value_or_null(&def.alias);
        match self {
            Accumulator::Sum(total) => {
                if !partial.is_null() {
                    *total = total.add_numeric(&partial).unwrap_or(Value::Null);
                }
            }
            Accumulator::Extreme { best, want_max } => {
                if partial.is_null() {
                    return;
                }
                let replace = match best.compare(&partial) {
                    None => best.is_null(),
                    Some(std::cmp::Ordering::Less) => *want_max,
                    Some(std::cmp::Ordering::Greater) => !*want_max,
                    Some(std::cmp::Ordering::Equal) => false,
                };
                if replace {
                    *best = partial;
                }
            }
            Accumulator::Avg { pairs } => {
                if let Some(avg) = partial.to_decimal() {
                    let weight = def
                        .weight_alias
                        .as_deref()
                        .and_then(|alias| row.value_or_null(alias).to_decimal());
                    pairs.push((avg, weight));
                }
            }
        }
    }

    fn finish(self, def: &AggregateDef) -> Value {
        match self {
            Accumulator::Sum(total) => match def.function {
                // a COUNT over nothing is zero, a SUM over nothing is null
                AggregateFunction::Count | AggregateFunction::CountColumn => {
                    if total.is_null() { Value::Int(0) } else { total }
                }
                _ => total,
            },
            Accumulator::Extreme { best, .. } => best,
            Accumulator::Avg { pairs } => {
                if pairs.is_empty() {
                    return Value::Null;
                }
                if pairs.iter().all(|(_, w)| w.is_some()) {
                    let total: Decimal = pairs.iter().map(|(_, w)| w.unwrap()).sum();
                    if total.is_zero() {
                        return Value::Null;
                    }
                    let weighted: Decimal =
                        pairs.iter().map(|(avg, w)| avg * w.unwrap()).sum();
                    Value::Decimal(weighted / total)
                } else {
                    // companion counts missing; fall back to an unweighted mean
                    let sum: Decimal = pairs.iter().map(|(avg, _)| avg).sum();
                    Value::Decimal(sum / Decimal::from(pairs.len() as i64))
                }
            }
        }
    }
}

/// Regroups a multiplexed stream of partial aggregate rows by the GROUP BY
/// columns and combines the partials per function: COUNT/SUM sum, MIN/MAX
/// take extremes, AVG merges as `Σ(avg·count) / Σcount` through its
/// companion count alias. Group identity is the type-tagged value key, so
/// nulls group together.
#[derive(Debug)]
pub struct MergeAggregateNode {
    child: PlanRef,
    entity: String,
    group_by: Vec<String>,
    aggregates: Vec<AggregateDef>,
}

impl MergeAggregateNode {
    pub fn new(
        child: PlanRef,
        entity: &str,
        group_by: Vec<String>,
        aggregates: Vec<AggregateDef>,
    ) -> Self {
        Self {
            child,
            entity: entity.to_lowercase(),
            group_by: group_by.into_iter().map(|c| c.to_lowercase()).collect(),
            aggregates,
        }
    }
}

#[async_trait]
impl PlanNode for MergeAggregateNode {
    fn name(&self) -> &'static str {
        "MergeAggregate"
    }

    fn description(&self) -> String {
        format!(
            "MergeAggregate: {} by [{}]",
            self.aggregates.iter().map(|a| a.alias.as_str()).join(", "),
            self.group_by.join(", ")
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
        let limit = get_config().limit.max_materialized_rows;
        let mut input = self.child.execute(ctx, cancel.clone()).await?;
        let mut groups: FxIndexMap<String, (Vec<(String, Value)>, Vec<Accumulator>)> =
            FxIndexMap::default();
        while let Some(row) = input.next().await {
            check_cancelled(&cancel)?;
            let row = row?;
            let key = row.group_key_of(&self.group_by);
            let (_, accumulators) = groups.entry(key).or_insert_with(|| {
                let key_values = self
                    .group_by
                    .iter()
                    .map(|column| (column.clone(), row.value_or_null(column)))
                    .collect();
                let accumulators = self.aggregates.iter().map(Accumulator::new).collect();
                (key_values, accumulators)
            });
            for (def, accumulator) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                accumulator.push(def, &row);
            }
            if groups.len() > limit {
                return Err(
                    ExecError::MaterializationLimit { operator: "MergeAggregate", limit }.into(),
                );
            }
        }
        // a grand-total aggregate over an empty input still yields one row
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(
                String::new(),
                (
                    Vec::new(),
                    self.aggregates.iter().map(Accumulator::new).collect(),
                ),
            );
        }
        let entity = self.entity.clone();
        let aggregates = self.aggregates.clone();
        Ok(Box::pin(try_stream! {
            for (_, (key_values, accumulators)) in groups {
                check_cancelled(&cancel)?;
                let mut out = Row::new(&entity);
                for (column, value) in key_values {
                    out.insert(&column, value);
                }
                for (def, accumulator) in aggregates.iter().zip(accumulators) {
                    out.insert(&def.alias, accumulator.finish(def));
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

    #[tokio::test]
    async fn test_partitioned_count_sums_partials() {
        let child = values_node(
            "account",
            vec![
                vec![("cnt", 15_000.into())],
                vec![("cnt", 20_000.into())],
                vec![("cnt", 10_000.into())],
            ],
        );
        let node = MergeAggregateNode::new(
            child,
            "account",
            vec![],
            vec![AggregateDef::new("cnt", AggregateFunction::Count)],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_or_null("cnt").as_i64(), Some(45_000));
    }

    #[tokio::test]
    async fn test_weighted_avg_grouped_by_region() {
        let child = values_node(
            "account",
            vec![
                vec![("region", "US".into()), ("avg", 10.into()), ("cnt", 100.into())],
                vec![("region", "US".into()), ("avg", 20.into()), ("cnt", 300.into())],
                vec![("region", "UK".into()), ("avg", 5.into()), ("cnt", 200.into())],
            ],
        );
        let node = MergeAggregateNode::new(
            child,
            "account",
            vec!["region".to_string()],
            vec![AggregateDef::weighted("avg", "cnt")],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let expected = match row.value_or_null("region").to_string().as_str() {
                "US" => Decimal::new(175, 1), // 17.5
                _ => Decimal::from(5),
            };
            assert_eq!(row.value_or_null("avg"), Value::Decimal(expected));
        }
    }

    #[tokio::test]
    async fn test_avg_without_weights_falls_back_to_mean() {
        let child = values_node(
            "e",
            vec![vec![("avg", 10.into())], vec![("avg", 30.into())]],
        );
        let node = MergeAggregateNode::new(
            child,
            "e",
            vec![],
            vec![AggregateDef::weighted("avg", "missing_cnt")],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows[0].value_or_null("avg"), Value::Decimal(Decimal::from(20)));
    }

    #[tokio::test]
    async fn test_min_max_all_null_is_null() {
        let child = values_node(
            "e",
            vec![vec![("lo", Value::Null), ("hi", Value::Null)]],
        );
        let node = MergeAggregateNode::new(
            child,
            "e",
            vec![],
            vec![
                AggregateDef::new("lo", AggregateFunction::Min),
                AggregateDef::new("hi", AggregateFunction::Max),
            ],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows[0].value_or_null("lo"), Value::Null);
        assert_eq!(rows[0].value_or_null("hi"), Value::Null);
    }

    #[tokio::test]
    async fn test_min_max_merge() {
        let child = values_node(
            "e",
            vec![
                vec![("lo", 5.into()), ("hi", 5.into())],
                vec![("lo", 2.into()), ("hi", 9.into())],
            ],
        );
        let node = MergeAggregateNode::new(
            child,
            "e",
            vec![],
            vec![
                AggregateDef::new("lo", AggregateFunction::Min),
                AggregateDef::new("hi", AggregateFunction::Max),
            ],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows[0].value_or_null("lo").as_i64(), Some(2));
        assert_eq!(rows[0].value_or_null("hi").as_i64(), Some(9));
    }

    #[tokio::test]
    async fn test_empty_input_grand_total_yields_zero_count() {
        let node = MergeAggregateNode::new(
            values_node("e", vec![]),
            "e",
            vec![],
            vec![
                AggregateDef::new("cnt", AggregateFunction::Count),
                AggregateDef::new("total", AggregateFunction::Sum),
            ],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_or_null("cnt").as_i64(), Some(0));
        assert_eq!(rows[0].value_or_null("total"), Value::Null);
    }

    #[tokio::test]
    async fn test_null_groups_merge_together() {
        let child = values_node(
            "e",
            vec![
                vec![("g", Value::Null), ("cnt", 1.into())],
                vec![("g", Value::Null), ("cnt", 2.into())],
            ],
        );
        let node = MergeAggregateNode::new(
            child,
            "e",
            vec!["g".to_string()],
            vec![AggregateDef::new("cnt", AggregateFunction::Count)],
        );
        let rows = drain(&node, test_ctx()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_or_null("cnt").as_i64(), Some(3));
    }
}

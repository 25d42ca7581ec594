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

//! SELECT shaping. Route order per statement: table-valued function,
//! metadata pseudo-schema, TDS passthrough, then FetchXML — with groupable
//! aggregates detoured through the partitioned-aggregation pipeline — and
//! finally the client-side wrappers (prefetch, residual filter, HAVING,
//! window, projection, distinct, sort, offset/fetch), each conditional on
//! the statement.

use std::sync::Arc;

use config::get_config;
use hashbrown::HashMap;

use crate::{
    backend::MetadataTarget,
    errors::{PlanError, Result},
    exec::{
        PlanRef,
        operators::{
            AggregateDef, AggregateFunction, ConcatenateNode, ConstantScanNode, CteSpoolScanNode,
            DistinctNode, ExceptNode, FetchScanNode, FilterNode, IntersectNode, MergeAggregateNode,
            MetadataScanNode, OffsetFetchNode, PartitionedAggregateNode, PrefetchNode,
            ProjectColumn, ProjectNode, ScanOptions, SortKey, SortNode, StringSplitNode,
            TdsScanNode, TempTableScanNode, WindowDef, WindowNode, project::ColumnSource,
        },
    },
    planner::{PlanBuilder, PlanResult, substitute_select},
    sql::{
        ast::{
            Expr, FunctionCall, OrderByItem, QueryExpression, SelectColumn, SelectSpec,
            SelectStatement, SetOperator, Span, TableSource, WindowExpr,
        },
        fetch,
        hints::QueryHints,
    },
};

/// A planned query expression plus what the caller still has to wrap.
struct BuiltQuery {
    root: PlanRef,
    entity: Option<String>,
    query_text: Option<String>,
    /// True when ordering was already handled (pushed to the back end or
    /// applied client-side together with TOP).
    order_pushed: bool,
    /// Output column names when the select list is explicit.
    outputs: Option<Vec<String>>,
}

/// CTE definitions in scope, name → (buffer id, defining plan).
type CteMap = HashMap<String, (String, PlanRef)>;

pub fn build_select(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    sql: &str,
    hints: &QueryHints,
    session: Option<&crate::session::SessionHandle>,
) -> Result<PlanResult> {
    let statement = substitute_select(statement, session)?;
    let mut ctes = CteMap::new();
    for (index, cte) in statement.ctes.iter().enumerate() {
        let name = cte.name.to_lowercase();
        if select_references_table(&cte.query, &name) {
            return Err(PlanError::RecursiveCte { name, span: cte.span }.into());
        }
        let inner = build_query(builder, &cte.query, sql, hints, &ctes)?;
        let plan = apply_cte_column_list(inner, cte)?;
        ctes.insert(name.clone(), (format!("cte_{index}_{name}"), plan));
    }

    let body = SelectStatement {
        ctes: Vec::new(),
        query: statement.query.clone(),
        order_by: statement.order_by.clone(),
        offset: None,
        span: statement.span,
    };
    let built = build_query(builder, &body, sql, hints, &ctes)?;

    let mut root = built.root;
    if !statement.order_by.is_empty() && !built.order_pushed {
        let keys = sort_keys(&statement.order_by, built.outputs.as_deref(), statement.span)?;
        root = Arc::new(SortNode::new(root, keys));
    }
    if let Some(clause) = &statement.offset {
        let offset = integer_literal(&clause.offset, "OFFSET", clause.span)?;
        let fetch = match &clause.fetch {
            Some(expr) => integer_literal(expr, "FETCH", clause.span)?,
            None => -1,
        };
        root = Arc::new(OffsetFetchNode::new(root, offset as u64, fetch));
    }
    Ok(PlanResult {
        root,
        entity: built.entity,
        query_text: built.query_text,
    })
}

fn integer_literal(expr: &Expr, clause: &str, span: Span) -> Result<i64> {
    match expr.as_integer_literal() {
        Some(value) if value >= 0 => Ok(value),
        Some(value) => Err(PlanError::InvalidLiteral {
            message: format!("{clause} must not be negative, got {value}"),
            span,
        }
        .into()),
        None => Err(PlanError::InvalidLiteral {
            message: format!("{clause} requires an integer literal"),
            span,
        }
        .into()),
    }
}

fn build_query(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    sql: &str,
    hints: &QueryHints,
    ctes: &CteMap,
) -> Result<BuiltQuery> {
    match &statement.query {
        QueryExpression::Spec(spec) => build_spec(builder, statement, spec, sql, hints, ctes),
        QueryExpression::Binary { op, all, left, right } => {
            build_set_operation(builder, statement, *op, *all, left, right, sql, hints, ctes)
        }
    }
}

// ---------------------------------------------------------------------------
// Set operators
// ---------------------------------------------------------------------------

/// Flatten a right-deep UNION tree into its branch list; any boundary that
/// omits ALL makes the whole flattened union distinct.
fn collect_union_branches<'a>(
    query: &'a QueryExpression,
    branches: &mut Vec<&'a QueryExpression>,
    any_distinct: &mut bool,
) {
    match query {
        QueryExpression::Binary { op: SetOperator::Union, all, left, right } => {
            if !all {
                *any_distinct = true;
            }
            collect_union_branches(left, branches, any_distinct);
            collect_union_branches(right, branches, any_distinct);
        }
        other => branches.push(other),
    }
}

fn branch_statement(query: &QueryExpression, span: Span) -> SelectStatement {
    SelectStatement {
        ctes: Vec::new(),
        query: query.clone(),
        order_by: Vec::new(),
        offset: None,
        span,
    }
}

/// Explicit output column count of a branch; wildcard branches defer their
/// validation to execution.
fn explicit_arity(query: &QueryExpression) -> Option<usize> {
    match query {
        QueryExpression::Spec(spec) => {
            if spec.columns.iter().any(SelectColumn::is_wildcard) {
                None
            } else {
                Some(spec.columns.len())
            }
        }
        QueryExpression::Binary { left, .. } => explicit_arity(left),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_set_operation(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    op: SetOperator,
    _all: bool,
    left: &QueryExpression,
    right: &QueryExpression,
    sql: &str,
    hints: &QueryHints,
    ctes: &CteMap,
) -> Result<BuiltQuery> {
    let span = statement.span;
    match op {
        SetOperator::Union => {
            let mut branches = Vec::new();
            let mut any_distinct = false;
            collect_union_branches(&statement.query, &mut branches, &mut any_distinct);
            let mut arity: Option<(usize, usize)> = None;
            let mut first_arity = None;
            for branch in &branches {
                if let Some(count) = explicit_arity(branch) {
                    match first_arity {
                        None => first_arity = Some(count),
                        Some(expected) if expected != count => {
                            arity = Some((expected, count));
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Some((left_count, right_count)) = arity {
                return Err(PlanError::BranchArityMismatch {
                    left: left_count,
                    right: right_count,
                    span,
                }
                .into());
            }
            let mut children = Vec::with_capacity(branches.len());
            let mut outputs = None;
            for (index, branch) in branches.iter().enumerate() {
                let built =
                    build_query(builder, &branch_statement(branch, span), sql, hints, ctes)?;
                if index == 0 {
                    outputs = built.outputs.clone();
                }
                children.push(built.root);
            }
            let mut root: PlanRef =
                Arc::new(ConcatenateNode::try_new(children, outputs.clone())?);
            if any_distinct {
                root = Arc::new(DistinctNode::new(root));
            }
            Ok(BuiltQuery {
                root,
                entity: None,
                query_text: None,
                order_pushed: false,
                outputs,
            })
        }
        SetOperator::Intersect | SetOperator::Except => {
            if let (Some(l), Some(r)) = (explicit_arity(left), explicit_arity(right))
                && l != r
            {
                return Err(PlanError::BranchArityMismatch { left: l, right: r, span }.into());
            }
            let left_built =
                build_query(builder, &branch_statement(left, span), sql, hints, ctes)?;
            let right_built =
                build_query(builder, &branch_statement(right, span), sql, hints, ctes)?;
            let outputs = left_built.outputs.clone();
            let root: PlanRef = match op {
                SetOperator::Intersect => {
                    Arc::new(IntersectNode::new(left_built.root, right_built.root))
                }
                _ => Arc::new(ExceptNode::new(left_built.root, right_built.root)),
            };
            Ok(BuiltQuery {
                root,
                entity: None,
                query_text: None,
                order_pushed: false,
                outputs,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Single select spec
// ---------------------------------------------------------------------------

fn build_spec(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    spec: &SelectSpec,
    sql: &str,
    hints: &QueryHints,
    ctes: &CteMap,
) -> Result<BuiltQuery> {
    match &spec.from {
        None => {
            let source: PlanRef = Arc::new(ConstantScanNode);
            client_pipeline(builder, statement, spec, source, None, true)
        }
        Some(TableSource::StringSplit { input, separator, with_ordinal, alias }) => {
            let input = builder.compiler.compile_scalar(input)?;
            let separator = builder.compiler.compile_scalar(separator)?;
            let source: PlanRef = Arc::new(StringSplitNode::new(
                input,
                separator,
                *with_ordinal,
                alias.as_deref().unwrap_or("string_split"),
            ));
            client_pipeline(builder, statement, spec, source, None, true)
        }
        Some(from) => {
            if from.contains_full_outer_join() {
                return Err(PlanError::FullOuterJoin { span: spec.span }.into());
            }
            let Some((schema, name)) = from.base_entity() else {
                return Err(PlanError::UnsupportedStatement {
                    feature: "FROM clause without a base entity".to_string(),
                    span: spec.span,
                }
                .into());
            };
            let lower = name.to_lowercase();
            if schema.is_none()
                && let Some((buffer_id, plan)) = ctes.get(&lower)
            {
                let source: PlanRef = Arc::new(CteSpoolScanNode::new(
                    buffer_id.clone(),
                    &lower,
                    plan.clone(),
                ));
                return client_pipeline(builder, statement, spec, source, None, true);
            }
            if lower.starts_with('#') {
                let source: PlanRef = Arc::new(TempTableScanNode::new(&lower));
                return client_pipeline(builder, statement, spec, source, None, true);
            }
            if schema.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("metadata")) {
                return build_metadata_scan(builder, statement, spec, &lower);
            }
            build_fetch_query(builder, statement, spec, &lower, sql, hints)
        }
    }
}

/// Pipeline over a client-side source (constant scan, TVF, CTE buffer,
/// temp table): filter, window, projection, distinct, then sort + TOP when
/// the spec carries both.
fn client_pipeline(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    spec: &SelectSpec,
    source: PlanRef,
    entity: Option<String>,
    allow_where: bool,
) -> Result<BuiltQuery> {
    if !spec.group_by.is_empty() || spec.having.is_some() || has_aggregates(spec) {
        return Err(PlanError::UnsupportedStatement {
            feature: "aggregation over a client-side row source".to_string(),
            span: spec.span,
        }
        .into());
    }
    let mut root = source;
    if allow_where && let Some(where_clause) = &spec.where_clause {
        let predicate = builder.compiler.compile_predicate(where_clause)?;
        root = Arc::new(FilterNode::new(root, predicate, "where"));
    }
    let windows = window_definitions(spec)?;
    let has_window = !windows.is_empty();
    if has_window {
        root = Arc::new(WindowNode::new(root, windows));
    }
    let projection = projection_columns(builder, spec, &HashMap::new())?;
    let outputs = projection
        .as_ref()
        .map(|columns| columns.iter().map(|c| c.output.clone()).collect::<Vec<_>>());
    if let Some(columns) = projection {
        root = Arc::new(ProjectNode::new(root, columns));
    }
    if spec.distinct {
        root = Arc::new(DistinctNode::new(root));
    }
    let mut order_pushed = false;
    if let Some(top) = &spec.top {
        let top = integer_literal(top, "TOP", spec.span)?;
        if !statement.order_by.is_empty() {
            let keys = sort_keys(&statement.order_by, outputs.as_deref(), spec.span)?;
            root = Arc::new(SortNode::new(root, keys));
            order_pushed = true;
        }
        root = Arc::new(OffsetFetchNode::new(root, 0, top));
    }
    Ok(BuiltQuery {
        root,
        entity,
        query_text: None,
        order_pushed,
        outputs,
    })
}

fn build_metadata_scan(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    spec: &SelectSpec,
    table: &str,
) -> Result<BuiltQuery> {
    let Some(target) = MetadataTarget::from_table_name(table) else {
        return Err(PlanError::UnsupportedStatement {
            feature: format!("unknown metadata table {table}"),
            span: spec.span,
        }
        .into());
    };
    let requested: Option<Vec<String>> = if spec.columns.iter().any(SelectColumn::is_wildcard) {
        None
    } else {
        // the catalog only receives plain column names; computed columns
        // pull their inputs in as well
        let mut columns = Vec::new();
        for column in &spec.columns {
            if let SelectColumn::Expr { expr, .. } = column {
                for name in expr.referenced_columns() {
                    if !columns.contains(&name) {
                        columns.push(name);
                    }
                }
            }
        }
        Some(columns)
    };
    let predicate = match &spec.where_clause {
        Some(where_clause) => Some(builder.compiler.compile_predicate(where_clause)?),
        None => None,
    };
    let source: PlanRef = Arc::new(MetadataScanNode::new(target, requested, predicate));
    // filtering already happened inside the scan
    let mut built = client_pipeline(builder, statement, spec, source, None, false)?;
    built.entity = Some(format!("metadata.{table}"));
    Ok(built)
}

/// The FetchXML path: TDS passthrough when allowed, otherwise generate the
/// query and wrap per the statement shape.
fn build_fetch_query(
    builder: &PlanBuilder,
    statement: &SelectStatement,
    spec: &SelectSpec,
    entity: &str,
    sql: &str,
    hints: &QueryHints,
) -> Result<BuiltQuery> {
    if hints.use_tds && builder.options.tds_enabled && tds_compatible(statement, spec) {
        log::debug!("[PLAN] routing through the TDS endpoint");
        return Ok(BuiltQuery {
            root: Arc::new(TdsScanNode::new(sql)),
            entity: Some(entity.to_string()),
            query_text: None,
            order_pushed: true,
            outputs: None,
        });
    }

    let generated = builder.fetch_gen.generate(statement)?;
    let aggregate = fetch::is_aggregate(&generated.fetch_xml);
    let has_distinct_aggregate = spec.columns.iter().any(|column| {
        matches!(
            column,
            SelectColumn::Expr { expr: Expr::Function(f), .. } if f.is_aggregate() && f.distinct
        )
    });
    let display_xml = generated.fetch_xml.clone();

    let mut root: PlanRef;
    if aggregate && !has_distinct_aggregate && spec.top.is_none() {
        // groupable aggregate: merge partials around the record cap
        let (template, avg_companions) = fetch::inject_avg_companions(&generated.fetch_xml);
        let defs = aggregate_definitions(spec, &avg_companions)?;
        let group_columns = group_column_names(spec);
        let max_parallel = hints
            .max_dop
            .unwrap_or_else(|| get_config().partition.max_parallel);
        let partitioned: PlanRef = Arc::new(PartitionedAggregateNode::new(
            entity,
            template,
            max_parallel,
            hints.force_client_aggregation,
        ));
        root = Arc::new(MergeAggregateNode::new(
            partitioned,
            entity,
            group_columns,
            defs,
        ));
    } else {
        let scan = FetchScanNode::new(
            entity,
            generated.fetch_xml.clone(),
            ScanOptions {
                auto_page: true,
                include_count: false,
                no_lock: hints.no_lock,
                start_page: None,
                start_cookie: None,
                max_rows: hints.max_rows,
            },
        );
        root = Arc::new(scan);
        if !aggregate && !builder.options.caller_paged {
            root = Arc::new(PrefetchNode::try_new(root, None)?);
        }
    }

    if let Some(residual) = &generated.residual_filter {
        let predicate = builder.compiler.compile_predicate(residual)?;
        root = Arc::new(FilterNode::new(root, predicate, "residual"));
    }
    if let Some(having) = &spec.having {
        let rewritten = rewrite_aggregates_as_columns(having);
        let predicate = builder.compiler.compile_predicate(&rewritten)?;
        root = Arc::new(FilterNode::new(root, predicate, "having"));
    }
    let windows = window_definitions(spec)?;
    let has_window = !windows.is_empty();
    if has_window {
        root = Arc::new(WindowNode::new(root, windows));
    }
    let projection = projection_columns(builder, spec, &virtual_column_sources(&generated))?;
    let has_computed = projection
        .as_ref()
        .is_some_and(|columns| {
            columns.iter().any(|c| matches!(c.source, ColumnSource::Computed(_)))
        });
    let outputs = projection
        .as_ref()
        .map(|columns| columns.iter().map(|c| c.output.clone()).collect::<Vec<_>>());
    if let Some(columns) = projection {
        root = Arc::new(ProjectNode::new(root, columns));
    }
    if spec.distinct && (has_window || has_computed) {
        root = Arc::new(DistinctNode::new(root));
    }
    // plain scans get their ordering from the generated query; anything the
    // back end never saw (window outputs, computed columns, merged
    // aggregates) sorts client-side
    let order_pushed = !aggregate && !has_window && !has_computed;
    Ok(BuiltQuery {
        root,
        entity: Some(entity.to_string()),
        query_text: Some(display_xml),
        order_pushed,
        outputs,
    })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn has_aggregates(spec: &SelectSpec) -> bool {
    spec.columns.iter().any(|column| {
        matches!(column, SelectColumn::Expr { expr, .. } if expr.contains_aggregate())
    })
}

/// Deterministic alias of an aggregate output: the SQL alias when present,
/// else `count` for COUNT(*) and `<function>_<column>` otherwise. The
/// FetchXML generator derives aliases the same way.
fn aggregate_alias(call: &FunctionCall, explicit: Option<String>) -> String {
    if let Some(alias) = explicit {
        return alias;
    }
    if call.is_count_star() {
        return "count".to_string();
    }
    let column = call
        .args
        .first()
        .and_then(|arg| arg.as_column())
        .map(|c| c.name.to_lowercase())
        .unwrap_or_else(|| "value".to_string());
    format!("{}_{}", call.name.to_lowercase(), column)
}

fn aggregate_definitions(
    spec: &SelectSpec,
    avg_companions: &[(String, String)],
) -> Result<Vec<AggregateDef>> {
    let mut defs = Vec::new();
    for column in &spec.columns {
        let SelectColumn::Expr { expr: Expr::Function(call), alias } = column else {
            continue;
        };
        if !call.is_aggregate() {
            continue;
        }
        let alias = aggregate_alias(call, alias.as_ref().map(|a| a.to_lowercase()));
        let function = match call.name.to_lowercase().as_str() {
            "count" if call.is_count_star() => AggregateFunction::Count,
            "count" => AggregateFunction::CountColumn,
            "sum" => AggregateFunction::Sum,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            "avg" => AggregateFunction::Avg,
            _ => continue,
        };
        let mut def = AggregateDef::new(&alias, function);
        if function == AggregateFunction::Avg {
            def.weight_alias = avg_companions
                .iter()
                .find(|(avg, _)| avg.eq_ignore_ascii_case(&alias))
                .map(|(_, count)| count.clone());
        }
        defs.push(def);
    }
    Ok(defs)
}

/// Output names of the GROUP BY columns: the select alias when the same
/// column is projected, else the raw column name.
fn group_column_names(spec: &SelectSpec) -> Vec<String> {
    spec.group_by
        .iter()
        .filter_map(|expr| {
            let column = expr.as_column()?;
            let aliased = spec.columns.iter().find_map(|select_column| {
                match select_column {
                    SelectColumn::Expr { expr: e, alias: Some(alias) } if e == expr => {
                        Some(alias.to_lowercase())
                    }
                    _ => None,
                }
            });
            Some(aliased.unwrap_or_else(|| column.name.to_lowercase()))
        })
        .collect()
}

/// Replace aggregate calls in a HAVING clause with references to their
/// output aliases, so the compiled predicate reads the merged rows.
fn rewrite_aggregates_as_columns(expr: &Expr) -> Expr {
    match expr {
        Expr::Function(call) if call.is_aggregate() => {
            Expr::column(&aggregate_alias(call, None))
        }
        Expr::Unary { op, expr } => Expr::Unary {
            op: *op,
            expr: Box::new(rewrite_aggregates_as_columns(expr)),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(rewrite_aggregates_as_columns(left)),
            op: *op,
            right: Box::new(rewrite_aggregates_as_columns(right)),
        },
        other => other.clone(),
    }
}

/// Column name a window operand or key must resolve to; anything richer
/// than a bare column would need its own projection step first.
fn bare_column(expr: &Expr, context: &str, span: Span) -> Result<String> {
    expr.as_column()
        .map(|c| c.name.to_lowercase())
        .ok_or_else(|| {
            PlanError::UnsupportedExpression {
                feature: format!("{context} must be a plain column reference"),
                span,
            }
            .into()
        })
}

fn window_definitions(spec: &SelectSpec) -> Result<Vec<WindowDef>> {
    let mut defs = Vec::new();
    for (index, column) in spec.columns.iter().enumerate() {
        let SelectColumn::Expr { expr, alias } = column else {
            continue;
        };
        match expr {
            Expr::Window(window) => {
                let output = alias
                    .as_ref()
                    .map(|a| a.to_lowercase())
                    .unwrap_or_else(|| format!("expr{}", index + 1));
                defs.push(window_definition(window, output, spec.span)?);
            }
            other if other.contains_window() => {
                return Err(PlanError::UnsupportedExpression {
                    feature: "window function nested inside an expression".to_string(),
                    span: spec.span,
                }
                .into());
            }
            _ => {}
        }
    }
    Ok(defs)
}

fn window_definition(window: &WindowExpr, output: String, span: Span) -> Result<WindowDef> {
    let operand = match &window.operand {
        Some(operand) => Some(bare_column(operand, "window operand", span)?),
        None => None,
    };
    let partition_by = window
        .partition_by
        .iter()
        .map(|expr| bare_column(expr, "PARTITION BY key", span))
        .collect::<Result<Vec<_>>>()?;
    let order_by = window
        .order_by
        .iter()
        .map(|item| {
            Ok(SortKey {
                column: bare_column(&item.expr, "window ORDER BY key", span)?,
                ascending: item.ascending,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(WindowDef {
        output,
        function: window.function,
        operand,
        partition_by,
        order_by,
    })
}

fn virtual_column_sources(generated: &crate::backend::GeneratedQuery) -> HashMap<String, String> {
    generated
        .virtual_columns
        .iter()
        .map(|(name, vc)| (name.to_lowercase(), vc.alias.to_lowercase()))
        .collect()
}

/// The projection for an explicit select list; `None` when a wildcard
/// passes everything through.
fn projection_columns(
    builder: &PlanBuilder,
    spec: &SelectSpec,
    virtual_columns: &HashMap<String, String>,
) -> Result<Option<Vec<ProjectColumn>>> {
    if spec.columns.iter().any(SelectColumn::is_wildcard) {
        return Ok(None);
    }
    let mut columns = Vec::with_capacity(spec.columns.len());
    for (index, column) in spec.columns.iter().enumerate() {
        let SelectColumn::Expr { expr, alias } = column else {
            unreachable!("wildcards handled above");
        };
        let output = column
            .output_name()
            .unwrap_or_else(|| format!("expr{}", index + 1));
        let project = match expr {
            _ if virtual_columns.contains_key(&output) => {
                ProjectColumn::pass_through(&output, &virtual_columns[&output])
            }
            Expr::Column(c) => ProjectColumn::pass_through(&output, &c.name.to_lowercase()),
            Expr::Window(_) => ProjectColumn::pass_through(&output, &output),
            Expr::Function(call) if call.is_aggregate() => {
                let source = aggregate_alias(call, alias.as_ref().map(|a| a.to_lowercase()));
                ProjectColumn::pass_through(&output, &source)
            }
            other => ProjectColumn::computed(&output, builder.compiler.compile_scalar(other)?),
        };
        columns.push(project);
    }
    Ok(Some(columns))
}

/// Resolve ORDER BY items to sort keys: bare columns, select aliases, or
/// 1-based positional references.
fn sort_keys(
    order_by: &[OrderByItem],
    outputs: Option<&[String]>,
    span: Span,
) -> Result<Vec<SortKey>> {
    order_by
        .iter()
        .map(|item| {
            let column = match &item.expr {
                Expr::Column(c) => c.name.to_lowercase(),
                Expr::Literal(crate::meta::value::Value::Int(position)) => {
                    let outputs = outputs.ok_or_else(|| PlanError::UnsupportedExpression {
                        feature: "positional ORDER BY over a wildcard select".to_string(),
                        span,
                    })?;
                    let index = *position as usize;
                    if index == 0 || index > outputs.len() {
                        return Err(PlanError::InvalidLiteral {
                            message: format!("ORDER BY position {position} is out of range"),
                            span,
                        }
                        .into());
                    }
                    outputs[index - 1].clone()
                }
                _ => {
                    return Err(PlanError::UnsupportedExpression {
                        feature: "ORDER BY expression must be a column or position".to_string(),
                        span,
                    }
                    .into());
                }
            };
            Ok(if item.ascending {
                SortKey::asc(&column)
            } else {
                SortKey::desc(&column)
            })
        })
        .collect()
}

/// The TDS compatibility predicate: a plain single-spec select over real
/// entities only.
fn tds_compatible(statement: &SelectStatement, spec: &SelectSpec) -> bool {
    fn entities_only(source: &TableSource) -> bool {
        match source {
            TableSource::Entity { schema, name, .. } => {
                schema.is_none() && !name.starts_with('#')
            }
            TableSource::Join { left, right, .. } => entities_only(left) && entities_only(right),
            TableSource::StringSplit { .. } => false,
        }
    }
    statement.ctes.is_empty()
        && spec.from.as_ref().is_some_and(entities_only)
}

/// Does any FROM clause inside the statement reference the given table
/// name? Used for recursive-CTE detection.
fn select_references_table(statement: &SelectStatement, name: &str) -> bool {
    fn source_references(source: &TableSource, name: &str) -> bool {
        match source {
            TableSource::Entity { name: entity, schema, .. } => {
                schema.is_none() && entity.eq_ignore_ascii_case(name)
            }
            TableSource::Join { left, right, .. } => {
                source_references(left, name) || source_references(right, name)
            }
            TableSource::StringSplit { .. } => false,
        }
    }
    fn query_references(query: &QueryExpression, name: &str) -> bool {
        match query {
            QueryExpression::Spec(spec) => spec
                .from
                .as_ref()
                .is_some_and(|from| source_references(from, name)),
            QueryExpression::Binary { left, right, .. } => {
                query_references(left, name) || query_references(right, name)
            }
        }
    }
    query_references(&statement.query, name)
        || statement
            .ctes
            .iter()
            .any(|cte| select_references_table(&cte.query, name))
}

/// Apply a CTE's declared column list as a positional rename over its
/// defining query.
fn apply_cte_column_list(
    built: BuiltQuery,
    cte: &crate::sql::ast::CommonTableExpression,
) -> Result<PlanRef> {
    if cte.columns.is_empty() {
        return Ok(built.root);
    }
    let Some(outputs) = &built.outputs else {
        return Err(PlanError::UnsupportedStatement {
            feature: format!("CTE {} declares columns over a wildcard select", cte.name),
            span: cte.span,
        }
        .into());
    };
    if outputs.len() != cte.columns.len() {
        return Err(PlanError::BranchArityMismatch {
            left: cte.columns.len(),
            right: outputs.len(),
            span: cte.span,
        }
        .into());
    }
    let columns = cte
        .columns
        .iter()
        .zip(outputs)
        .map(|(declared, source)| ProjectColumn::pass_through(declared, source))
        .collect();
    Ok(Arc::new(ProjectNode::new(built.root, columns)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::operators::test_utils::{MockGenerator, TestCompiler},
        sql::ast::{
            CommonTableExpression, JoinKind, OffsetFetchClause, UnaryOp, WindowFunction,
        },
    };

    const FETCH: &str =
        r#"<fetch version="1.0"><entity name="account"><attribute name="name" /></entity></fetch>"#;
    const AGG_FETCH: &str = r#"<fetch version="1.0" aggregate="true"><entity name="account"><attribute name="revenue" alias="avg_rev" aggregate="avg" /><attribute name="accountid" alias="cnt" aggregate="count" /><attribute name="region" alias="region" groupby="true" /></entity></fetch>"#;

    fn builder_for(xml: &str) -> PlanBuilder {
        PlanBuilder::new(MockGenerator::returning(xml), Arc::new(TestCompiler))
    }

    fn entity(name: &str) -> TableSource {
        TableSource::Entity {
            schema: None,
            name: name.to_string(),
            alias: None,
        }
    }

    fn column(name: &str) -> SelectColumn {
        SelectColumn::Expr {
            expr: Expr::column(name),
            alias: None,
        }
    }

    fn aliased(expr: Expr, alias: &str) -> SelectColumn {
        SelectColumn::Expr {
            expr,
            alias: Some(alias.to_string()),
        }
    }

    fn spec_over(from: TableSource, columns: Vec<SelectColumn>) -> SelectSpec {
        SelectSpec {
            columns,
            from: Some(from),
            ..Default::default()
        }
    }

    fn select(spec: SelectSpec) -> SelectStatement {
        SelectStatement::from_spec(spec)
    }

    fn plan(builder: &PlanBuilder, stmt: &SelectStatement, sql: &str) -> Result<PlanResult> {
        let hints = QueryHints::parse(sql, &[]);
        build_select(builder, stmt, sql, &hints, None)
    }

    fn tree_contains(plan: &PlanRef, name: &str) -> bool {
        plan.name() == name || plan.children().iter().any(|child| tree_contains(child, name))
    }

    #[test]
    fn test_plain_select_is_prefetched_scan() {
        let builder = builder_for(FETCH);
        let stmt = select(spec_over(entity("account"), vec![column("name")]));
        let result = plan(&builder, &stmt, "SELECT name FROM account").unwrap();
        assert_eq!(result.entity.as_deref(), Some("account"));
        assert_eq!(result.query_text.as_deref(), Some(FETCH));
        // prefetch above, scan below, projection on top
        assert!(tree_contains(&result.root, "Prefetch"));
        assert!(tree_contains(&result.root, "FetchScan"));
    }

    #[test]
    fn test_caller_paged_mode_skips_prefetch() {
        let builder = builder_for(FETCH).with_options(crate::planner::BuilderOptions {
            caller_paged: true,
            tds_enabled: false,
        });
        let stmt = select(spec_over(entity("account"), vec![column("name")]));
        let result = plan(&builder, &stmt, "SELECT name FROM account").unwrap();
        assert!(!tree_contains(&result.root, "Prefetch"));
        assert!(tree_contains(&result.root, "FetchScan"));
    }

    #[test]
    fn test_groupable_aggregate_routes_to_partitioned_merge() {
        let builder = builder_for(AGG_FETCH);
        let agg = |name: &str, arg: &str| {
            Expr::Function(FunctionCall {
                name: name.to_string(),
                args: vec![Expr::column(arg)],
                distinct: false,
            })
        };
        let mut spec = spec_over(
            entity("account"),
            vec![
                column("region"),
                aliased(agg("avg", "revenue"), "avg_rev"),
                aliased(agg("count", "accountid"), "cnt"),
            ],
        );
        spec.group_by = vec![Expr::column("region")];
        let result = plan(&builder, &select(spec), "SELECT ...").unwrap();
        assert_eq!(result.root.name(), "Project");
        assert!(tree_contains(&result.root, "MergeAggregate"));
        assert!(tree_contains(&result.root, "PartitionedAggregate"));
        assert!(!tree_contains(&result.root, "Prefetch"));
    }

    #[test]
    fn test_count_distinct_is_never_partitioned() {
        let builder = builder_for(AGG_FETCH);
        let spec = spec_over(
            entity("account"),
            vec![aliased(
                Expr::Function(FunctionCall {
                    name: "count".to_string(),
                    args: vec![Expr::column("region")],
                    distinct: true,
                }),
                "regions",
            )],
        );
        let result = plan(&builder, &select(spec), "SELECT ...").unwrap();
        assert!(!tree_contains(&result.root, "PartitionedAggregate"));
        assert!(tree_contains(&result.root, "FetchScan"));
    }

    #[test]
    fn test_union_explicit_arity_mismatch_fails_at_plan_time() {
        let builder = builder_for(FETCH);
        let left = spec_over(entity("account"), vec![column("a"), column("b")]);
        let right = spec_over(entity("contact"), vec![column("a")]);
        let stmt = SelectStatement {
            ctes: Vec::new(),
            query: QueryExpression::Binary {
                op: SetOperator::Union,
                all: true,
                left: Box::new(QueryExpression::Spec(Box::new(left))),
                right: Box::new(QueryExpression::Spec(Box::new(right))),
            },
            order_by: Vec::new(),
            offset: None,
            span: Span::default(),
        };
        let err = plan(&builder, &stmt, "...").unwrap_err();
        assert_eq!(err.get_code(), 20003);
    }

    #[test]
    fn test_union_without_all_applies_distinct() {
        let builder = builder_for(FETCH);
        let left = spec_over(entity("account"), vec![column("name")]);
        let right = spec_over(entity("contact"), vec![column("name")]);
        let stmt = SelectStatement {
            ctes: Vec::new(),
            query: QueryExpression::Binary {
                op: SetOperator::Union,
                all: false,
                left: Box::new(QueryExpression::Spec(Box::new(left))),
                right: Box::new(QueryExpression::Spec(Box::new(right))),
            },
            order_by: Vec::new(),
            offset: None,
            span: Span::default(),
        };
        let result = plan(&builder, &stmt, "...").unwrap();
        assert_eq!(result.root.name(), "Distinct");
        assert!(tree_contains(&result.root, "Concatenate"));
    }

    #[test]
    fn test_negative_offset_fails_at_plan_time() {
        let builder = builder_for(FETCH);
        let mut stmt = select(spec_over(entity("account"), vec![column("name")]));
        stmt.offset = Some(OffsetFetchClause {
            offset: Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(Expr::literal(1)),
            },
            fetch: None,
            span: Span::new(1, 40),
        });
        let err = plan(&builder, &stmt, "...").unwrap_err();
        assert_eq!(err.get_code(), 20004);
    }

    #[test]
    fn test_offset_requires_integer_literal() {
        let builder = builder_for(FETCH);
        let mut stmt = select(spec_over(entity("account"), vec![column("name")]));
        stmt.offset = Some(OffsetFetchClause {
            offset: Expr::column("n"),
            fetch: None,
            span: Span::default(),
        });
        assert_eq!(plan(&builder, &stmt, "...").unwrap_err().get_code(), 20004);
    }

    #[test]
    fn test_full_outer_join_rejected() {
        let builder = builder_for(FETCH);
        let from = TableSource::Join {
            left: Box::new(entity("account")),
            right: Box::new(entity("contact")),
            kind: JoinKind::FullOuter,
            condition: Expr::literal(true),
        };
        let stmt = select(spec_over(from, vec![column("name")]));
        assert_eq!(plan(&builder, &stmt, "...").unwrap_err().get_code(), 20009);
    }

    #[test]
    fn test_recursive_cte_rejected() {
        let builder = builder_for(FETCH);
        let cte_body = select(spec_over(entity("recent"), vec![column("name")]));
        let stmt = SelectStatement {
            ctes: vec![CommonTableExpression {
                name: "recent".to_string(),
                columns: Vec::new(),
                query: Box::new(cte_body),
                span: Span::default(),
            }],
            ..select(spec_over(entity("recent"), vec![column("name")]))
        };
        assert_eq!(plan(&builder, &stmt, "...").unwrap_err().get_code(), 20008);
    }

    #[test]
    fn test_cte_reference_scans_the_buffer() {
        let builder = builder_for(FETCH);
        let cte_body = select(spec_over(entity("account"), vec![column("name")]));
        let stmt = SelectStatement {
            ctes: vec![CommonTableExpression {
                name: "recent".to_string(),
                columns: Vec::new(),
                query: Box::new(cte_body),
                span: Span::default(),
            }],
            ..select(spec_over(entity("recent"), vec![column("name")]))
        };
        let result = plan(&builder, &stmt, "...").unwrap();
        assert!(tree_contains(&result.root, "CteSpoolScan"));
    }

    #[test]
    fn test_metadata_schema_bypasses_fetchxml() {
        let builder = builder_for(FETCH);
        let from = TableSource::Entity {
            schema: Some("metadata".to_string()),
            name: "entity".to_string(),
            alias: None,
        };
        let stmt = select(spec_over(from, vec![column("logicalname")]));
        let result = plan(&builder, &stmt, "...").unwrap();
        assert!(tree_contains(&result.root, "MetadataScan"));
        assert!(!tree_contains(&result.root, "FetchScan"));
        assert_eq!(result.entity.as_deref(), Some("metadata.entity"));
    }

    #[test]
    fn test_string_split_routes_to_tvf() {
        let builder = builder_for(FETCH);
        let from = TableSource::StringSplit {
            input: Expr::literal("a,b"),
            separator: Expr::literal(","),
            with_ordinal: false,
            alias: Some("t".to_string()),
        };
        let stmt = select(spec_over(from, vec![column("value")]));
        let result = plan(&builder, &stmt, "...").unwrap();
        assert!(tree_contains(&result.root, "StringSplit"));
    }

    #[test]
    fn test_temp_table_scans_session_store() {
        let builder = builder_for(FETCH);
        let stmt = select(spec_over(entity("#matches"), vec![column("n")]));
        let result = plan(&builder, &stmt, "...").unwrap();
        assert!(tree_contains(&result.root, "TempTableScan"));
        assert!(!tree_contains(&result.root, "FetchScan"));
    }

    #[test]
    fn test_tds_hint_routes_passthrough() {
        let builder = builder_for(FETCH).with_options(crate::planner::BuilderOptions {
            caller_paged: false,
            tds_enabled: true,
        });
        let stmt = select(spec_over(entity("account"), vec![column("name")]));
        let sql = "SELECT name FROM account -- ppds:USE_TDS";
        let result = plan(&builder, &stmt, sql).unwrap();
        assert_eq!(result.root.name(), "TdsScan");
    }

    #[test]
    fn test_tds_hint_without_endpoint_stays_on_fetchxml() {
        let builder = builder_for(FETCH);
        let stmt = select(spec_over(entity("account"), vec![column("name")]));
        let sql = "SELECT name FROM account -- ppds:USE_TDS";
        let result = plan(&builder, &stmt, sql).unwrap();
        assert!(tree_contains(&result.root, "FetchScan"));
    }

    #[test]
    fn test_window_column_plans_window_and_client_sort() {
        let builder = builder_for(FETCH);
        let mut stmt = select(spec_over(
            entity("opportunity"),
            vec![
                column("name"),
                aliased(
                    Expr::Window(WindowExpr {
                        function: WindowFunction::RowNumber,
                        operand: None,
                        partition_by: vec![Expr::column("owner")],
                        order_by: vec![OrderByItem {
                            expr: Expr::column("revenue"),
                            ascending: true,
                        }],
                    }),
                    "rn",
                ),
            ],
        ));
        stmt.order_by = vec![OrderByItem {
            expr: Expr::column("rn"),
            ascending: true,
        }];
        let result = plan(&builder, &stmt, "...").unwrap();
        assert!(tree_contains(&result.root, "Window"));
        // ordering by a window output cannot be pushed to the back end
        assert_eq!(result.root.name(), "Sort");
    }
}

use crate::ast::{
    BinaryOperator, CreateTableStatement, Expr, InsertStatement, Literal, SelectStatement,
    SortOrder, Statement,
};
use crate::parser::{self, ParserError};
use crate::storage::{
    encode_row, page_used, Storage, StorageError, TableDefinition, Value, PAGE_SIZE,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Printed where an expression has no defined result, e.g. an unknown
/// aggregate or an arithmetic operator.
const UNKNOWN_RESULT: &str = "?";

/// Errors produced while executing a statement.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParserError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("insert names {columns} columns but provides {values} values")]
    ArityMismatch { columns: usize, values: usize },
    #[error("cannot compare {0} with {1}")]
    TypeMismatch(&'static str, &'static str),
}

/// Result of one executed statement. CREATE TABLE and INSERT complete
/// without rows; SELECT yields formatted rows.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    Rows(Vec<Vec<String>>),
    Complete,
}

/// A database over one backing file. Parses and executes statements.
pub struct Database {
    storage: Storage,
}

impl Database {
    /// Open a database, creating the backing file on first use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self {
            storage: Storage::open(path)?,
        })
    }

    /// Parse and run a single statement.
    pub fn run_statement(&mut self, input: &str) -> Result<StatementOutput, EngineError> {
        let statement = parser::parse_statement(input)?;
        match statement {
            Statement::CreateTable(create) => self.run_create_table(&create),
            Statement::Insert(insert) => self.run_insert(&insert),
            Statement::Select(select) => self.run_select(&select),
        }
    }

    fn run_create_table(
        &mut self,
        statement: &CreateTableStatement,
    ) -> Result<StatementOutput, EngineError> {
        self.storage.create_table(&statement.name, &statement.columns)?;
        Ok(StatementOutput::Complete)
    }

    fn run_insert(&mut self, statement: &InsertStatement) -> Result<StatementOutput, EngineError> {
        let table = self.storage.table_definition(&statement.table)?;
        if statement.columns.len() != statement.values.len() {
            return Err(EngineError::ArityMismatch {
                columns: statement.columns.len(),
                values: statement.values.len(),
            });
        }
        let mut values_by_name = HashMap::new();
        for (column, literal) in statement.columns.iter().zip(&statement.values) {
            if table.column_index(column).is_none() {
                return Err(EngineError::UnknownColumn(column.clone()));
            }
            values_by_name.insert(column.clone(), literal_value(literal));
        }
        let encoded = encode_row(&table, &values_by_name)?;

        // Append to the table's newest page, spilling to a fresh one when
        // the row no longer fits.
        let page_index = match self.storage.pages_for(&statement.table)?.last().copied() {
            None => self.storage.create_page(&statement.table, true)?,
            Some(index) => {
                let mut page = self.storage.read_page(index)?;
                let used = page_used(&mut page)?;
                if PAGE_SIZE - used < encoded.len() {
                    self.storage.create_page(&statement.table, true)?
                } else {
                    index
                }
            }
        };
        self.storage.append_to_page(&encoded, page_index)?;
        debug!(table = %statement.table, page_index, "inserted row");
        Ok(StatementOutput::Complete)
    }

    /// One streaming pass over the table: filter, group, project, and
    /// collect order keys per row; then flush groups, sort, and paginate.
    fn run_select(&self, statement: &SelectStatement) -> Result<StatementOutput, EngineError> {
        let table = self.storage.table_definition(&statement.table)?;
        let items = expand_select_items(&statement.items, &table);
        let aggregates = aggregate_names(&items);
        let grouping = statement.group_by.is_some() || !aggregates.is_empty();

        let mut ctx = SelectContext {
            table: &table,
            function_data: HashMap::new(),
        };
        let mut grouped: HashMap<String, SelectRow> = HashMap::new();
        let mut result_set: Vec<SelectRow> = Vec::new();

        // With a bare LIMIT the scan can stop without reading the rest of
        // the table; grouping and ordering both need every row.
        let early_limit = match statement.limit {
            Some(limit) if !grouping && statement.order_by.is_none() => Some(limit.max(0) as usize),
            _ => None,
        };

        let mut scan = self.storage.scan(&statement.table)?;
        let mut rows_read = 0usize;
        loop {
            if early_limit.is_some_and(|limit| rows_read >= limit) {
                break;
            }
            let Some(entry) = scan.next() else {
                break;
            };
            let (_, row) = entry?;
            rows_read += 1;

            if let Some(selection) = &statement.selection {
                if eval_expr(selection, &ctx, &row, "")? != Evaluated::Bool(true) {
                    continue;
                }
            }

            let mut group_key = String::new();
            if grouping {
                if let Some(group_by) = &statement.group_by {
                    group_key = eval_expr(group_by, &ctx, &row, "")?.display();
                }
                for name in &aggregates {
                    if name == "count" {
                        let functions = ctx.function_data.entry(group_key.clone()).or_default();
                        *functions.entry(name.clone()).or_insert(0) += 1;
                    }
                }
            }

            let mut select_row = SelectRow {
                items: Vec::with_capacity(items.len()),
                order_key: None,
            };
            for item in &items {
                select_row
                    .items
                    .push(eval_expr(item, &ctx, &row, &group_key)?.display());
            }
            if let Some(order_by) = &statement.order_by {
                select_row.order_key = Some(eval_expr(&order_by.by, &ctx, &row, &group_key)?);
            }

            if grouping {
                // later rows of a group replace earlier ones, so projected
                // plain columns reflect the group's last row
                grouped.insert(group_key, select_row);
            } else {
                result_set.push(select_row);
            }
        }
        drop(scan);

        if grouping {
            result_set.extend(grouped.into_values());
        }
        if let Some(order_by) = &statement.order_by {
            sort_result_set(&mut result_set, order_by.order)?;
        }

        let rows: Vec<Vec<String>> = result_set.into_iter().map(|row| row.items).collect();
        // LIMIT is an end index into the result, not a count
        let end = match statement.limit {
            None => rows.len(),
            Some(limit) => rows.len().min(limit.max(0) as usize),
        };
        let start = match statement.offset {
            None => 0,
            Some(offset) => (offset.max(0) as usize).min(end),
        };
        Ok(StatementOutput::Rows(rows[start..end].to_vec()))
    }
}

struct SelectRow {
    items: Vec<String>,
    order_key: Option<Evaluated>,
}

struct SelectContext<'a> {
    table: &'a TableDefinition,
    /// Aggregate accumulators keyed by group key, then function name.
    function_data: HashMap<String, HashMap<String, i64>>,
}

/// Result of evaluating an expression against one row.
#[derive(Debug, Clone, PartialEq)]
enum Evaluated {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl Evaluated {
    fn display(&self) -> String {
        match self {
            Evaluated::Int(value) => value.to_string(),
            Evaluated::Text(value) => value.clone(),
            Evaluated::Bool(_) => UNKNOWN_RESULT.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Evaluated::Int(_) => "integer",
            Evaluated::Text(_) => "text",
            Evaluated::Bool(_) => "boolean",
        }
    }
}

fn eval_expr(
    expr: &Expr,
    ctx: &SelectContext,
    row: &[Value],
    group_key: &str,
) -> Result<Evaluated, EngineError> {
    match expr {
        Expr::Literal(Literal::Integer(value)) => Ok(Evaluated::Int(*value)),
        Expr::Literal(Literal::String(value)) => Ok(Evaluated::Text(value.clone())),
        Expr::Identifier(name) => {
            let index = ctx
                .table
                .column_index(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
            Ok(match &row[index] {
                Value::Int(value) => Evaluated::Int(*value),
                Value::Text(value) => Evaluated::Text(value.clone()),
            })
        }
        Expr::Function { name, .. } => Ok(ctx
            .function_data
            .get(group_key)
            .and_then(|functions| functions.get(name))
            .map(|acc| Evaluated::Int(*acc))
            .unwrap_or_else(|| Evaluated::Text(UNKNOWN_RESULT.to_string()))),
        Expr::Binary { left, op, right } => {
            let a = eval_expr(left, ctx, row, group_key)?;
            let b = eval_expr(right, ctx, row, group_key)?;
            apply_operator(*op, a, b)
        }
    }
}

fn apply_operator(op: BinaryOperator, a: Evaluated, b: Evaluated) -> Result<Evaluated, EngineError> {
    match op {
        BinaryOperator::Eq => Ok(Evaluated::Bool(a == b)),
        BinaryOperator::NotEq => Ok(Evaluated::Bool(a != b)),
        BinaryOperator::Lt => Ok(Evaluated::Bool(compare(&a, &b)? == Ordering::Less)),
        BinaryOperator::LtEq => Ok(Evaluated::Bool(compare(&a, &b)? != Ordering::Greater)),
        BinaryOperator::Gt => Ok(Evaluated::Bool(compare(&a, &b)? == Ordering::Greater)),
        BinaryOperator::GtEq => Ok(Evaluated::Bool(compare(&a, &b)? != Ordering::Less)),
        // no arithmetic is defined over row values
        BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Modulo => {
            Ok(Evaluated::Text(UNKNOWN_RESULT.to_string()))
        }
    }
}

/// Order two evaluated values: numeric on integer pairs, lexicographic on
/// text pairs, anything else is incomparable.
fn compare(a: &Evaluated, b: &Evaluated) -> Result<Ordering, EngineError> {
    match (a, b) {
        (Evaluated::Int(a), Evaluated::Int(b)) => Ok(a.cmp(b)),
        (Evaluated::Text(a), Evaluated::Text(b)) => Ok(a.cmp(b)),
        _ => Err(EngineError::TypeMismatch(a.type_name(), b.type_name())),
    }
}

fn sort_result_set(rows: &mut [SelectRow], order: SortOrder) -> Result<(), EngineError> {
    // surface incomparable keys up front so the comparator stays
    // infallible; adjacent agreement implies a single key type
    for window in rows.windows(2) {
        if let (Some(a), Some(b)) = (&window[0].order_key, &window[1].order_key) {
            compare(a, b)?;
        }
    }
    rows.sort_by(|a, b| {
        let ordering = match (&a.order_key, &b.order_key) {
            (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    Ok(())
}

/// Replace each `*` item with one identifier per schema column, in order.
fn expand_select_items(items: &[Expr], table: &TableDefinition) -> Vec<Expr> {
    let mut expanded = Vec::new();
    for item in items {
        match item {
            Expr::Identifier(name) if name == "*" => {
                for column in &table.columns {
                    expanded.push(Expr::Identifier(column.name.clone()));
                }
            }
            _ => expanded.push(item.clone()),
        }
    }
    expanded
}

/// Names of aggregate functions appearing as top-level select items.
fn aggregate_names(items: &[Expr]) -> Vec<String> {
    let mut names = Vec::new();
    for item in items {
        if let Expr::Function { name, .. } = item {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Integer(value) => Value::Int(*value),
        Literal::String(value) => Value::Text(value.clone()),
    }
}

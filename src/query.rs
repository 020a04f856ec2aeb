//! Statement construction.
//!
//! Values are always bound as named parameters. Table and column names cannot
//! be bound, so they are checked against an identifier allow-list before they
//! are spliced into statement text.

use crate::error::{Error, Result};
use crate::value::{Conditions, Fields, Row, Value};

/// Parameter bindings for SQL queries, in binding order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<(String, Value)>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.push(name, value.into());
        self
    }

    fn push(&mut self, name: &str, value: Value) {
        self.values.push((name.to_string(), value));
    }

    /// Borrow the bindings in the shape rusqlite expects for named parameters.
    pub fn as_named(&self) -> Vec<(&str, &dyn rusqlite::ToSql)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect()
    }
}

/// SQL Query with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// Reject anything that is not `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::argument(format!("{kind} name must not be empty")));
    };
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::argument(format!("invalid {kind} name: {name:?}")))
    }
}

pub(crate) fn validate_table(table: &str) -> Result<()> {
    validate_identifier("table", table)
}

fn validate_columns(fields: &Fields) -> Result<()> {
    fields
        .keys()
        .try_for_each(|column| validate_identifier("column", column))
}

fn require_non_empty(fields: &Fields, what: &str) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::argument(format!("{what} must not be empty")));
    }
    validate_columns(fields)
}

/// `col1 = :c0 AND col2 = :c1 ...`, appending the bindings to `params`.
fn where_clause(conditions: &Conditions, params: &mut Params) -> String {
    conditions
        .iter()
        .enumerate()
        .map(|(i, (column, value))| {
            let name = format!(":c{i}");
            params.push(&name, value.clone());
            format!("{column} = {name}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `col1 = :v0, col2 = :v1 ...`, appending the bindings to `params`.
fn set_clause(values: &Fields, params: &mut Params) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, (column, value))| {
            let name = format!(":v{i}");
            params.push(&name, value.clone());
            format!("{column} = {name}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prepared INSERT template for a batch whose rows share one column set.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertTemplate {
    pub statement: String,
    columns: Vec<String>,
}

impl InsertTemplate {
    /// Derive the column list from the first row. Every other row must name
    /// exactly the same columns.
    pub fn for_rows(table: &str, rows: &[Row]) -> Result<Option<Self>> {
        validate_table(table)?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        require_non_empty(first, "row")?;
        if let Some(pos) = rows.iter().position(|row| !row.same_columns(first)) {
            return Err(Error::argument(format!(
                "row {pos} does not match the column set of the first row"
            )));
        }

        let columns: Vec<String> = first.keys().map(str::to_string).collect();
        let placeholders = (0..columns.len())
            .map(|i| format!(":p{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        Ok(Some(Self { statement, columns }))
    }

    /// Bindings for one row, looked up by column name.
    pub fn bind(&self, row: &Row) -> Params {
        let mut params = Params::new();
        for (i, column) in self.columns.iter().enumerate() {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            params.push(&format!(":p{i}"), value);
        }
        params
    }
}

pub fn count_rows(table: &str) -> Result<SqlQuery> {
    validate_table(table)?;
    Ok(SqlQuery::new(&format!("SELECT COUNT(*) FROM {table}")))
}

pub fn select_all(table: &str, order_column: &str) -> Result<SqlQuery> {
    validate_table(table)?;
    validate_identifier("column", order_column)?;
    Ok(SqlQuery::new(&format!(
        "SELECT * FROM {table} ORDER BY {order_column}"
    )))
}

pub fn select_where(table: &str, conditions: &Conditions) -> Result<SqlQuery> {
    validate_table(table)?;
    require_non_empty(conditions, "conditions")?;
    let mut params = Params::new();
    let clause = where_clause(conditions, &mut params);
    Ok(SqlQuery::new(&format!("SELECT * FROM {table} WHERE 1=1 AND {clause}")).with_params(params))
}

pub fn update_where(table: &str, values: &Fields, conditions: &Conditions) -> Result<SqlQuery> {
    validate_table(table)?;
    require_non_empty(values, "updated values")?;
    require_non_empty(conditions, "conditions")?;
    let mut params = Params::new();
    let set = set_clause(values, &mut params);
    let filter = where_clause(conditions, &mut params);
    Ok(SqlQuery::new(&format!("UPDATE {table} SET {set} WHERE {filter}")).with_params(params))
}

pub fn update_all(table: &str, values: &Fields) -> Result<SqlQuery> {
    validate_table(table)?;
    require_non_empty(values, "updated values")?;
    let mut params = Params::new();
    let set = set_clause(values, &mut params);
    Ok(SqlQuery::new(&format!("UPDATE {table} SET {set}")).with_params(params))
}

pub fn delete_where(table: &str, conditions: &Conditions) -> Result<SqlQuery> {
    validate_table(table)?;
    require_non_empty(conditions, "conditions")?;
    let mut params = Params::new();
    let filter = where_clause(conditions, &mut params);
    Ok(SqlQuery::new(&format!("DELETE FROM {table} WHERE {filter}")).with_params(params))
}

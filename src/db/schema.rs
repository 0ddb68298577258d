use crate::config::{STOP_INDEX_NAME, TABLE_NAME};

/// SQL data type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    Integer,
    Text,
    Date,
    Timestamp,
}

impl SqlType {
    /// Returns the Postgres type name
    pub fn to_postgres(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }
}

/// A column of the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
}

const fn column(name: &'static str, sql_type: SqlType) -> Column {
    Column {
        name,
        sql_type,
        nullable: true,
    }
}

/// Columns of `SbbData` in declared order
///
/// The order matches both the source file layout and the order in which
/// values are rendered and bound for INSERT statements.
pub const COLUMNS: [Column; 21] = [
    column("day", SqlType::Date),
    column("ride_desc", SqlType::Text),
    column("comp_id", SqlType::Text),
    column("c_sname", SqlType::Text),
    column("c_name", SqlType::Text),
    column("prod_id", SqlType::Text),
    column("line_id", SqlType::Integer),
    column("line_txt", SqlType::Text),
    column("c_id", SqlType::Text),
    column("v_txt", SqlType::Text),
    column("add_ride", SqlType::Boolean),
    column("trip_canc", SqlType::Boolean),
    column("stop_id", SqlType::Integer),
    column("stop_name", SqlType::Text),
    column("arr_time", SqlType::Timestamp),
    column("arr_est", SqlType::Timestamp),
    column("est_stat", SqlType::Text),
    column("dep_time", SqlType::Timestamp),
    column("dep_est", SqlType::Timestamp),
    column("dep_estat", SqlType::Text),
    column("train_skip", SqlType::Boolean),
];

pub const COLUMN_COUNT: usize = COLUMNS.len();

/// Quoted table name, so the mixed case survives Postgres identifier folding
pub fn quoted_table_name() -> String {
    format!("\"{}\"", TABLE_NAME)
}

/// Comma separated column list in declared order
pub fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generate the idempotent DDL statement for the destination table
pub fn generate_table_ddl() -> String {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", quoted_table_name());

    let column_defs: Vec<String> = COLUMNS
        .iter()
        .map(|col| {
            let nullable_clause = if col.nullable { "" } else { " NOT NULL" };
            format!(
                "  {} {}{}",
                col.name,
                col.sql_type.to_postgres(),
                nullable_clause
            )
        })
        .collect();

    ddl.push_str(&column_defs.join(",\n"));
    ddl.push_str("\n)");

    ddl
}

/// Generate the idempotent DDL statement for the non-unique `stop_id` index
pub fn generate_index_ddl() -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS \"{}\" ON {} (stop_id)",
        STOP_INDEX_NAME,
        quoted_table_name()
    )
}

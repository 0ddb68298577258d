//! INSERT statements for `SbbData` rows
//!
//! Two renderings of a [`ScheduleRecord`]: a self-contained literal statement
//! for SQL export, and a parameterized multi-row statement with typed bound
//! values used by the loader.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

use super::schema::{COLUMN_COUNT, column_list, quoted_table_name};
use crate::formats::ScheduleRecord;

/// Timestamp layout of rendered literals; the source has minute precision
const TIMESTAMP_LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:00";

/// Render a record as one complete `;`-terminated INSERT statement
///
/// NULL values are the bare keyword `NULL`, booleans are `TRUE`/`FALSE` and
/// integers are unquoted. Text, dates and timestamps are single-quoted with
/// embedded quotes doubled.
pub fn to_insert_statement(record: &ScheduleRecord) -> String {
    let values = [
        date_literal(record.day),
        text_literal(&record.ride_desc),
        text_literal(&record.comp_id),
        text_literal(&record.c_sname),
        text_literal(&record.c_name),
        text_literal(&record.prod_id),
        int_literal(record.line_id),
        text_literal(&record.line_txt),
        text_literal(&record.c_id),
        text_literal(&record.v_txt),
        bool_literal(record.add_ride),
        bool_literal(record.trip_canc),
        int_literal(record.stop_id),
        text_literal(&record.stop_name),
        timestamp_literal(record.arr_time),
        timestamp_literal(record.arr_est),
        optional_text_literal(record.est_stat.as_deref()),
        timestamp_literal(record.dep_time),
        timestamp_literal(record.dep_est),
        optional_text_literal(record.dep_estat.as_deref()),
        bool_literal(record.train_skip),
    ];

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quoted_table_name(),
        column_list(),
        values.join(", ")
    )
}

fn text_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn optional_text_literal(value: Option<&str>) -> String {
    value.map(text_literal).unwrap_or_else(null_literal)
}

fn int_literal(value: Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(null_literal)
}

fn bool_literal(value: bool) -> String {
    let literal = if value { "TRUE" } else { "FALSE" };
    literal.to_string()
}

fn date_literal(value: Option<NaiveDate>) -> String {
    timestamp_literal(value.and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn timestamp_literal(value: Option<NaiveDateTime>) -> String {
    value
        .map(|ts| format!("'{}'", ts.format(TIMESTAMP_LITERAL_FORMAT)))
        .unwrap_or_else(null_literal)
}

fn null_literal() -> String {
    "NULL".to_string()
}

/// Build a parameterized INSERT for `rows` records
///
/// Placeholders are numbered `$1..$N` row by row in column order; both
/// Postgres and SQLite accept this style.
pub fn insert_sql(rows: usize) -> String {
    let mut value_groups = Vec::with_capacity(rows);
    let mut param_idx = 1;

    for _ in 0..rows {
        let placeholders: Vec<String> = (0..COLUMN_COUNT)
            .map(|_| {
                let placeholder = format!("${}", param_idx);
                param_idx += 1;
                placeholder
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quoted_table_name(),
        column_list(),
        value_groups.join(", ")
    )
}

/// Bind one record's values in column order
///
/// Absent values are bound as typed NULLs so the server sees the column's
/// own type for every parameter.
pub fn bind_record<'q, DB>(
    query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    record: &ScheduleRecord,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<NaiveDate>: Encode<'q, DB> + Type<DB>,
    Option<NaiveDateTime>: Encode<'q, DB> + Type<DB>,
    Option<i32>: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
{
    query
        .bind(record.day)
        .bind(record.ride_desc.clone())
        .bind(record.comp_id.clone())
        .bind(record.c_sname.clone())
        .bind(record.c_name.clone())
        .bind(record.prod_id.clone())
        .bind(record.line_id)
        .bind(record.line_txt.clone())
        .bind(record.c_id.clone())
        .bind(record.v_txt.clone())
        .bind(record.add_ride)
        .bind(record.trip_canc)
        .bind(record.stop_id)
        .bind(record.stop_name.clone())
        .bind(record.arr_time)
        .bind(record.arr_est)
        .bind(record.est_stat.clone())
        .bind(record.dep_time)
        .bind(record.dep_est)
        .bind(record.dep_estat.clone())
        .bind(record.train_skip)
}

use chrono::{NaiveDate, NaiveDateTime};
use std::str::FromStr;
use thiserror::Error;

/// Number of `;`-separated fields on every data line
pub const FIELD_COUNT: usize = 21;

/// Field separator of the SBB export
pub const DELIMITER: u8 = b';';

const DATE_FORMAT: &str = "%d.%m.%Y";
const DATETIME_FORMAT: &str = "%d.%m.%Y %H:%M";

/// Why a single data line could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("column '{column}': '{value}' is not a valid integer")]
    InvalidInteger { column: &'static str, value: String },

    #[error("column '{column}': '{value}' is not a date (expected DD.MM.YYYY)")]
    InvalidDate { column: &'static str, value: String },

    #[error("column '{column}': '{value}' is not a timestamp (expected DD.MM.YYYY HH:MM)")]
    InvalidDateTime { column: &'static str, value: String },
}

/// One row of the SBB actual-vs-planned stop data ("Ist-Daten")
///
/// Empty source fields decode to `None` for dates, timestamps, integers and
/// the two estimate-status columns. Every other text column keeps the empty
/// string as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub day: Option<NaiveDate>,
    pub ride_desc: String,
    pub comp_id: String,
    pub c_sname: String,
    pub c_name: String,
    pub prod_id: String,
    pub line_id: Option<i32>,
    pub line_txt: String,
    pub c_id: String,
    pub v_txt: String,
    pub add_ride: bool,
    pub trip_canc: bool,
    pub stop_id: Option<i32>,
    pub stop_name: String,
    pub arr_time: Option<NaiveDateTime>,
    pub arr_est: Option<NaiveDateTime>,
    pub est_stat: Option<String>,
    pub dep_time: Option<NaiveDateTime>,
    pub dep_est: Option<NaiveDateTime>,
    pub dep_estat: Option<String>,
    pub train_skip: bool,
}

impl ScheduleRecord {
    /// Parse one raw line, with or without its line terminator
    pub fn parse_line(line: &str) -> Result<Self, MalformedRecord> {
        let line = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);
        let fields: Vec<&str> = line.split(DELIMITER as char).collect();
        Self::from_fields(&fields)
    }

    /// Decode an already split line
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, MalformedRecord> {
        if fields.len() != FIELD_COUNT {
            return Err(MalformedRecord::FieldCount {
                expected: FIELD_COUNT,
                found: fields.len(),
            });
        }

        let f = |idx: usize| fields[idx].as_ref();

        Ok(Self {
            day: parse_date("day", f(0))?,
            ride_desc: f(1).to_string(),
            comp_id: f(2).to_string(),
            c_sname: f(3).to_string(),
            c_name: f(4).to_string(),
            prod_id: f(5).to_string(),
            line_id: parse_int("line_id", f(6))?,
            line_txt: f(7).to_string(),
            c_id: f(8).to_string(),
            v_txt: f(9).to_string(),
            add_ride: parse_bool(f(10)),
            trip_canc: parse_bool(f(11)),
            stop_id: parse_int("stop_id", f(12))?,
            stop_name: f(13).to_string(),
            arr_time: parse_datetime("arr_time", f(14))?,
            arr_est: parse_datetime("arr_est", f(15))?,
            est_stat: parse_optional_text(f(16)),
            dep_time: parse_datetime("dep_time", f(17))?,
            dep_est: parse_datetime("dep_est", f(18))?,
            dep_estat: parse_optional_text(f(19)),
            train_skip: parse_bool(f(20)),
        })
    }
}

impl FromStr for ScheduleRecord {
    type Err = MalformedRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

/// Only the exact literal `true` is true; the export never writes other spellings
fn parse_bool(value: &str) -> bool {
    value == "true"
}

fn parse_int(column: &'static str, value: &str) -> Result<Option<i32>, MalformedRecord> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| MalformedRecord::InvalidInteger {
            column,
            value: value.to_string(),
        })
}

fn parse_date(column: &'static str, value: &str) -> Result<Option<NaiveDate>, MalformedRecord> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map(Some)
        .map_err(|_| MalformedRecord::InvalidDate {
            column,
            value: value.to_string(),
        })
}

fn parse_datetime(
    column: &'static str,
    value: &str,
) -> Result<Option<NaiveDateTime>, MalformedRecord> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .map(Some)
        .map_err(|_| MalformedRecord::InvalidDateTime {
            column,
            value: value.to_string(),
        })
}

fn parse_optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

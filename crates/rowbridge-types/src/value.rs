//! Dynamic cell values and the explicit source→target type conversion table.
//!
//! Every value moved by the transfer engine passes through [`convert`], a
//! lookup from (runtime value, declared target type) to a typed conversion.
//! Unmapped pairs fail with a named `UNMAPPED_TYPE` error; there are no
//! implicit casts.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MigrationError;

/// A single cell value in transit between the source and target databases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(ts) => write!(f, "{ts}"),
        }
    }
}

/// Declared target column type, parsed from `information_schema` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Numeric,
    Varchar,
    Text,
    Date,
    Timestamp,
}

impl TargetType {
    /// Parse a PostgreSQL `information_schema.columns.data_type` name.
    ///
    /// Returns `None` for types the pipeline does not move.
    #[must_use]
    pub fn parse(data_type: &str) -> Option<Self> {
        match data_type.to_ascii_lowercase().as_str() {
            "boolean" => Some(Self::Boolean),
            "smallint" => Some(Self::SmallInt),
            "integer" | "int" => Some(Self::Integer),
            "bigint" => Some(Self::BigInt),
            "real" | "double precision" => Some(Self::Real),
            "numeric" | "decimal" => Some(Self::Numeric),
            "character varying" | "varchar" | "character" => Some(Self::Varchar),
            "text" => Some(Self::Text),
            "date" => Some(Self::Date),
            "timestamp without time zone" | "timestamp with time zone" | "timestamp" => {
                Some(Self::Timestamp)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Boolean => "boolean",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Numeric => "numeric",
            Self::Varchar => "varchar",
            Self::Text => "text",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

fn unmapped(value: &Value, target: TargetType) -> MigrationError {
    MigrationError::conversion(
        "UNMAPPED_TYPE",
        format!("no conversion from {value:?} to {target}"),
    )
}

/// Convert a source value to the declared target type.
///
/// NULL passes through unchanged for every target type. Lossy or ambiguous
/// pairs (e.g. float → integer) are deliberately unmapped.
///
/// # Errors
///
/// Returns a `Conversion`-category [`MigrationError`] with code
/// `UNMAPPED_TYPE` when no conversion exists, or `BAD_VALUE` when the pair
/// is mapped but the concrete value does not parse.
pub fn convert(value: Value, target: TargetType) -> Result<Value, MigrationError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match (value, target) {
        // Source tinyint(1) columns arrive as Int 0/1.
        (Value::Int(i), TargetType::Boolean) => Ok(Value::Bool(i != 0)),
        (Value::Bool(b), TargetType::Boolean) => Ok(Value::Bool(b)),

        (Value::Int(i), TargetType::SmallInt | TargetType::Integer | TargetType::BigInt) => {
            Ok(Value::Int(i))
        }
        (Value::Bool(b), TargetType::SmallInt | TargetType::Integer | TargetType::BigInt) => {
            Ok(Value::Int(i64::from(b)))
        }
        (Value::Text(s), TargetType::SmallInt | TargetType::Integer | TargetType::BigInt) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| {
                MigrationError::conversion("BAD_VALUE", format!("{s:?} is not an integer: {e}"))
            }),

        (Value::Float(x), TargetType::Real | TargetType::Numeric) => Ok(Value::Float(x)),
        (Value::Int(i), TargetType::Real | TargetType::Numeric) => {
            #[allow(clippy::cast_precision_loss)]
            Ok(Value::Float(i as f64))
        }
        (Value::Text(s), TargetType::Real | TargetType::Numeric) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| {
                MigrationError::conversion("BAD_VALUE", format!("{s:?} is not numeric: {e}"))
            }),

        (Value::Text(s), TargetType::Varchar | TargetType::Text) => Ok(Value::Text(s)),
        (Value::Int(i), TargetType::Varchar | TargetType::Text) => Ok(Value::Text(i.to_string())),

        (Value::Date(d), TargetType::Date) => Ok(Value::Date(d)),
        (Value::DateTime(ts), TargetType::Date) => Ok(Value::Date(ts.date())),
        (Value::DateTime(ts), TargetType::Timestamp) => Ok(Value::DateTime(ts)),
        (Value::Date(d), TargetType::Timestamp) => Ok(Value::DateTime(
            d.and_hms_opt(0, 0, 0).unwrap_or_default(),
        )),
        (Value::Text(s), TargetType::Timestamp) => {
            NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                .map(Value::DateTime)
                .map_err(|e| {
                    MigrationError::conversion(
                        "BAD_VALUE",
                        format!("{s:?} is not a timestamp: {e}"),
                    )
                })
        }
        (Value::Text(s), TargetType::Date) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| {
                MigrationError::conversion("BAD_VALUE", format!("{s:?} is not a date: {e}"))
            }),

        (value, target) => Err(unmapped(&value, target)),
    }
}

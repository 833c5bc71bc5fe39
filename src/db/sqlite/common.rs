use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

pub fn parse_decimal(s: &str) -> DbResult<Decimal> {
    Decimal::from_str(s)
        .map_err(|e| DbError::Internal(format!("Invalid decimal in database: {}", e)))
}

/// Parse a TEXT enum column through the type's `FromStr`.
pub fn parse_enum<T: FromStr<Err = String>>(s: &str) -> DbResult<T> {
    T::from_str(s).map_err(DbError::Internal)
}

/// Counters are u64 in the domain and INTEGER (i64) in SQLite.
pub fn to_db_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub fn from_db_count(n: i64) -> u64 {
    n.max(0) as u64
}

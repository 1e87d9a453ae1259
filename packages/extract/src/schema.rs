//! Partition schema inspection and value conversion.

use canvass_geometry::GeometryEncoding;
use duckdb::Connection;
use duckdb::types::Value;

use crate::ExtractError;
use crate::sql::{self, ExtentColumns};

/// One column reported by `DESCRIBE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// `DuckDB` type name, e.g. `VARCHAR`, `BLOB`, `STRUCT(...)`.
    pub data_type: String,
}

impl ColumnInfo {
    /// Whether the type reads back as a plain scalar value.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.data_type.as_str(),
            "VARCHAR"
                | "BOOLEAN"
                | "TINYINT"
                | "SMALLINT"
                | "INTEGER"
                | "BIGINT"
                | "UTINYINT"
                | "USMALLINT"
                | "UINTEGER"
                | "UBIGINT"
                | "FLOAT"
                | "DOUBLE"
        )
    }
}

/// Lists the union schema of a set of partition files.
///
/// # Errors
///
/// Returns [`ExtractError::DuckDb`] if any file cannot be opened.
pub fn describe(conn: &Connection, paths: &[String]) -> Result<Vec<ColumnInfo>, ExtractError> {
    let sql = format!("DESCRIBE SELECT * FROM {}", sql::read_parquet(paths));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            data_type: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Finds the first column whose name (case-insensitive) is in `names`.
#[must_use]
pub fn find_column<'a>(columns: &'a [ColumnInfo], names: &[&str]) -> Option<&'a ColumnInfo> {
    names.iter().find_map(|wanted| {
        columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(wanted))
    })
}

/// How a geometry column is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryColumn {
    /// WKB bytes.
    Blob(String),
    /// Hex, base64, or JSON text.
    Text(String),
    /// Native `GEOMETRY` type (spatial extension loaded).
    Native(String),
}

impl GeometryColumn {
    /// Detects the geometry column and its storage.
    #[must_use]
    pub fn detect(columns: &[ColumnInfo]) -> Option<Self> {
        let column = find_column(columns, &["geometry", "geom", "wkb", "the_geom"])?;
        let name = column.name.clone();
        match column.data_type.as_str() {
            "BLOB" => Some(Self::Blob(name)),
            "VARCHAR" | "JSON" => Some(Self::Text(name)),
            "GEOMETRY" => Some(Self::Native(name)),
            _ => None,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Blob(n) | Self::Text(n) | Self::Native(n) => n,
        }
    }

    /// Native geometry expression for spatial predicates, when the column
    /// is binary or already a geometry.
    #[must_use]
    pub fn spatial_expr(&self) -> Option<String> {
        match self {
            Self::Blob(n) => Some(format!("ST_GeomFromWKB({})", sql::ident(n))),
            Self::Native(n) => Some(sql::ident(n)),
            Self::Text(_) => None,
        }
    }

    /// Select expression yielding WKB bytes or text.
    #[must_use]
    pub fn select_expr(&self) -> String {
        match self {
            Self::Blob(n) | Self::Text(n) => sql::ident(n),
            Self::Native(n) => format!("ST_AsWKB({})", sql::ident(n)),
        }
    }
}

/// Detects per-row extent columns.
///
/// Flat `xmin`/`xmax`/`ymin`/`ymax` columns are preferred; a `bbox` struct
/// with the same fields is accepted.
#[must_use]
pub fn detect_extent(columns: &[ColumnInfo]) -> Option<ExtentColumns> {
    let flat: Option<Vec<&ColumnInfo>> = ["xmin", "xmax", "ymin", "ymax"]
        .iter()
        .map(|n| find_column(columns, &[n]))
        .collect();
    if let Some(flat) = flat {
        return Some(ExtentColumns {
            xmin: sql::ident(&flat[0].name),
            xmax: sql::ident(&flat[1].name),
            ymin: sql::ident(&flat[2].name),
            ymax: sql::ident(&flat[3].name),
        });
    }

    let bbox = find_column(columns, &["bbox"])?;
    let ty = bbox.data_type.to_ascii_lowercase();
    if !ty.starts_with("struct") || !["xmin", "xmax", "ymin", "ymax"].iter().all(|f| ty.contains(f)) {
        return None;
    }
    let base = sql::ident(&bbox.name);
    Some(ExtentColumns {
        xmin: format!("{base}.xmin"),
        xmax: format!("{base}.xmax"),
        ymin: format!("{base}.ymin"),
        ymax: format!("{base}.ymax"),
    })
}

/// Geometry encoding of a fetched geometry value.
#[must_use]
pub fn geometry_encoding(value: Value) -> Option<GeometryEncoding> {
    match value {
        Value::Blob(bytes) => Some(GeometryEncoding::Wkb(bytes)),
        Value::Text(text) if !text.trim().is_empty() => Some(GeometryEncoding::from_text(&text)),
        _ => None,
    }
}

/// Converts a fetched value to a JSON property.
///
/// Returns `None` for nulls and types that have no natural JSON form.
#[must_use]
pub fn value_to_json(value: Value) -> Option<serde_json::Value> {
    use serde_json::Value as J;

    Some(match value {
        Value::Boolean(b) => J::Bool(b),
        Value::TinyInt(n) => J::from(n),
        Value::SmallInt(n) => J::from(n),
        Value::Int(n) => J::from(n),
        Value::BigInt(n) => J::from(n),
        Value::UTinyInt(n) => J::from(n),
        Value::USmallInt(n) => J::from(n),
        Value::UInt(n) => J::from(n),
        Value::UBigInt(n) => J::from(n),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f)).map(J::Number)?,
        Value::Double(f) => serde_json::Number::from_f64(f).map(J::Number)?,
        Value::Text(s) => J::String(s),
        _ => return None,
    })
}

/// Reads a value as an optional trimmed, non-empty string.
#[must_use]
pub fn value_to_string(value: Value) -> Option<String> {
    let text = match value {
        Value::Text(s) => s,
        Value::TinyInt(n) => n.to_string(),
        Value::SmallInt(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::UTinyInt(n) => n.to_string(),
        Value::USmallInt(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::UBigInt(n) => n.to_string(),
        Value::HugeInt(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reads a value as a finite `f64`.
#[must_use]
pub fn value_to_f64(value: &Value) -> Option<f64> {
    #[allow(clippy::cast_precision_loss)]
    let n = match *value {
        Value::Float(f) => f64::from(f),
        Value::Double(f) => f,
        Value::TinyInt(n) => f64::from(n),
        Value::SmallInt(n) => f64::from(n),
        Value::Int(n) => f64::from(n),
        Value::BigInt(n) => n as f64,
        Value::Text(ref s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

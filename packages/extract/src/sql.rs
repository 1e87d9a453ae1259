//! SQL text helpers.

use std::fmt::Write as _;

use canvass_territory_models::{BoundingBox, TerritoryPolygon};

/// Single-quoted SQL string literal.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Double-quoted identifier.
pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `read_parquet` over an explicit file list.
///
/// Hive partition columns are not synthesised; the tile and region are
/// already known from the path.
pub fn read_parquet(paths: &[String]) -> String {
    let list = paths.iter().map(|p| quote(p)).collect::<Vec<_>>().join(", ");
    format!("read_parquet([{list}], union_by_name = true, hive_partitioning = false)")
}

/// Condition keeping rows whose extent overlaps `bbox`.
pub fn overlap_filter(extent: &ExtentColumns, bbox: &BoundingBox) -> String {
    format!(
        "{xmax} >= {west} AND {xmin} <= {east} AND {ymax} >= {south} AND {ymin} <= {north}",
        xmin = extent.xmin,
        xmax = extent.xmax,
        ymin = extent.ymin,
        ymax = extent.ymax,
        west = bbox.west,
        east = bbox.east,
        south = bbox.south,
        north = bbox.north,
    )
}

/// Condition keeping points inside `bbox`.
pub fn point_filter(lon: &str, lat: &str, bbox: &BoundingBox) -> String {
    format!(
        "{lon} BETWEEN {} AND {} AND {lat} BETWEEN {} AND {}",
        bbox.west, bbox.east, bbox.south, bbox.north
    )
}

/// Joins conditions into a `WHERE` clause (empty when there are none).
pub fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

/// WKT text of a territory, for `ST_GeomFromText`.
pub fn polygon_wkt(polygon: &TerritoryPolygon) -> String {
    let mut wkt = String::from("POLYGON (");
    for (i, ring) in std::iter::once(polygon.exterior())
        .chain(polygon.holes().iter().map(Vec::as_slice))
        .enumerate()
    {
        if i > 0 {
            wkt.push_str(", ");
        }
        wkt.push('(');
        for (j, (lon, lat)) in ring.iter().enumerate() {
            if j > 0 {
                wkt.push_str(", ");
            }
            let _ = write!(wkt, "{lon} {lat}");
        }
        wkt.push(')');
    }
    wkt.push(')');
    wkt
}

/// SQL expressions for a row's extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentColumns {
    pub xmin: String,
    pub xmax: String,
    pub ymin: String,
    pub ymax: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_embedded_apostrophes() {
        assert_eq!(quote("/data/o'brien/data.parquet"), "'/data/o''brien/data.parquet'");
        assert_eq!(ident("na\"me"), "\"na\"\"me\"");
    }

    #[test]
    fn builds_where_clause_and_wkt() {
        assert_eq!(where_clause(&[]), "");
        assert_eq!(where_clause(&["a".into(), "b".into()]), "WHERE a AND b");

        let polygon = TerritoryPolygon::new(vec![
            (-79.4, 43.6),
            (-79.3, 43.6),
            (-79.3, 43.7),
            (-79.4, 43.6),
        ])
        .unwrap();
        assert_eq!(
            polygon_wkt(&polygon),
            "POLYGON ((-79.4 43.6, -79.3 43.6, -79.3 43.7, -79.4 43.6))"
        );
    }

    #[test]
    fn read_parquet_lists_every_file() {
        let sql = read_parquet(&["a.parquet".into(), "b.parquet".into()]);
        assert_eq!(
            sql,
            "read_parquet(['a.parquet', 'b.parquet'], union_by_name = true, hive_partitioning = false)"
        );
    }
}

//! Parquet fixtures written through `DuckDB`.

use std::path::Path;

use canvass_geometry::wkb::write_wkb;
use duckdb::Connection;

use crate::sql;

/// A feature row for a gridded partition.
pub struct Row<'a> {
    pub id: &'a str,
    pub geometry: Option<Vec<u8>>,
    pub name: Option<&'a str>,
}

impl<'a> Row<'a> {
    pub fn new(id: &'a str, geometry: &geo::Geometry<f64>) -> Self {
        Self {
            id,
            geometry: Some(write_wkb(geometry)),
            name: None,
        }
    }

    pub fn raw(id: &'a str, bytes: Vec<u8>) -> Self {
        Self {
            id,
            geometry: Some(bytes),
            name: None,
        }
    }

    pub fn named(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Writes rows as an Overture-style partition with flat extent columns.
pub fn write_features(path: &Path, rows: &[Row<'_>]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE fx (gers_id VARCHAR, geometry BLOB, xmin DOUBLE, xmax DOUBLE, \
         ymin DOUBLE, ymax DOUBLE, name VARCHAR)",
    )
    .unwrap();
    for row in rows {
        let (xmin, xmax, ymin, ymax) = row
            .geometry
            .as_deref()
            .and_then(|b| canvass_geometry::wkb::read_wkb(b).ok())
            .and_then(|g| geo::BoundingRect::bounding_rect(&g))
            .map_or((-180.0, 180.0, -90.0, 90.0), |r| {
                (r.min().x, r.max().x, r.min().y, r.max().y)
            });
        conn.execute(
            "INSERT INTO fx VALUES (?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![row.id, row.geometry, xmin, xmax, ymin, ymax, row.name],
        )
        .unwrap();
    }
    copy_out(&conn, "fx", path);
}

/// Runs `create_sql` (which must create table `fx`) and writes it out.
pub fn write_table(path: &Path, create_sql: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(create_sql).unwrap();
    copy_out(&conn, "fx", path);
}

fn copy_out(conn: &Connection, table: &str, path: &Path) {
    conn.execute_batch(&format!(
        "COPY {table} TO {} (FORMAT PARQUET)",
        sql::quote(&path.to_string_lossy())
    ))
    .unwrap();
}

/// Hex string for embedding WKB in SQL via `from_hex`.
pub fn wkb_hex(geometry: &geo::Geometry<f64>) -> String {
    use std::fmt::Write as _;

    write_wkb(geometry).iter().fold(String::new(), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

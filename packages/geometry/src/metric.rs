//! Metric distances and areas for small-extent geometry.
//!
//! Linking works at building scale (metres to tens of metres), so
//! distances are computed in a local equirectangular projection centred on
//! the query point. Error stays well under a centimetre at these ranges.

use geo::{Contains, Coord, GeodesicArea, LineString, MultiPolygon, Point};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two `(lon, lat)` points in metres.
#[must_use]
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.1.to_radians();
    let lat2 = b.1.to_radians();
    let delta_lat = (b.1 - a.1).to_radians();
    let delta_lon = (b.0 - a.0).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Equirectangular projection anchored at an origin.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin: (f64, f64),
    metres_per_deg_lon: f64,
    metres_per_deg_lat: f64,
}

impl LocalProjection {
    /// Projection centred on `(lon, lat)`.
    #[must_use]
    pub fn new(lon: f64, lat: f64) -> Self {
        let metres_per_deg_lat = EARTH_RADIUS_M.to_radians();
        Self {
            origin: (lon, lat),
            metres_per_deg_lon: metres_per_deg_lat * lat.to_radians().cos(),
            metres_per_deg_lat,
        }
    }

    /// Projects `(lon, lat)` to metres east/north of the origin.
    #[must_use]
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.origin.0) * self.metres_per_deg_lon,
            (lat - self.origin.1) * self.metres_per_deg_lat,
        )
    }

    /// Converts a metre distance to degrees of latitude.
    #[must_use]
    pub fn metres_to_lat_deg(&self, metres: f64) -> f64 {
        metres / self.metres_per_deg_lat
    }

    /// Converts a metre distance to degrees of longitude at the origin.
    #[must_use]
    pub fn metres_to_lon_deg(&self, metres: f64) -> f64 {
        if self.metres_per_deg_lon <= f64::EPSILON {
            return 360.0;
        }
        metres / self.metres_per_deg_lon
    }
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx.mul_add(dx, dy * dy);
    if len_sq == 0.0 {
        return (p.0 - a.0).hypot(p.1 - a.1);
    }
    let t = ((p.0 - a.0).mul_add(dx, (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0);
    (p.0 - t.mul_add(dx, a.0)).hypot(p.1 - t.mul_add(dy, a.1))
}

fn ring_distance(projection: &LocalProjection, ring: &LineString<f64>) -> f64 {
    let projected: Vec<(f64, f64)> = ring
        .0
        .iter()
        .map(|c: &Coord<f64>| projection.project(c.x, c.y))
        .collect();
    projected
        .windows(2)
        .map(|w| segment_distance((0.0, 0.0), w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

/// Distance in metres from a point to the nearest ring edge of a footprint,
/// interior rings included. Ignores containment.
#[must_use]
pub fn boundary_distance_m(lon: f64, lat: f64, footprint: &MultiPolygon<f64>) -> f64 {
    let projection = LocalProjection::new(lon, lat);
    footprint
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| ring_distance(&projection, ring))
        .fold(f64::INFINITY, f64::min)
}

/// Distance in metres from a point to a footprint: zero when the point is
/// strictly inside, otherwise the boundary distance.
#[must_use]
pub fn footprint_distance_m(lon: f64, lat: f64, footprint: &MultiPolygon<f64>) -> f64 {
    if footprint.contains(&Point::new(lon, lat)) {
        return 0.0;
    }
    boundary_distance_m(lon, lat, footprint)
}

/// Approximate footprint area in square metres.
#[must_use]
pub fn area_sqm(footprint: &MultiPolygon<f64>) -> f64 {
    footprint.geodesic_area_unsigned()
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    /// Roughly 20 m x 20 m square in downtown Toronto.
    fn square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: -79.38000, y: 43.65000),
            (x: -79.37975, y: 43.65000),
            (x: -79.37975, y: 43.65018),
            (x: -79.38000, y: 43.65018),
            (x: -79.38000, y: 43.65000),
        ]])
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Toronto to Montreal, ~504 km.
        let d = haversine_m((-79.3832, 43.6532), (-73.5673, 45.5017));
        assert!((d - 504_000.0).abs() < 5_000.0, "{d}");
    }

    #[test]
    fn projection_agrees_with_haversine_at_short_range() {
        let origin = (-79.38, 43.65);
        let other = (-79.3795, 43.6503);
        let projection = LocalProjection::new(origin.0, origin.1);
        let (x, y) = projection.project(other.0, other.1);
        let planar = x.hypot(y);
        assert!((planar - haversine_m(origin, other)).abs() < 0.05);
    }

    #[test]
    fn inside_point_has_zero_footprint_distance() {
        let d = footprint_distance_m(-79.37990, 43.65010, &square());
        assert!(d.abs() < f64::EPSILON);
        assert!(boundary_distance_m(-79.37990, 43.65010, &square()) > 0.0);
    }

    #[test]
    fn outside_point_distance_to_nearest_edge() {
        // ~0.00009 deg of latitude north of the top edge is ~10 m.
        let d = footprint_distance_m(-79.37990, 43.65027, &square());
        assert!((d - 10.0).abs() < 0.2, "{d}");
    }

    #[test]
    fn area_is_plausible() {
        let area = area_sqm(&square());
        // ~20.1 m x ~20.0 m
        assert!((350.0..450.0).contains(&area), "{area}");
    }
}

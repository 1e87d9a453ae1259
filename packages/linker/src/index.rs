//! R-tree over campaign building footprints.

use canvass_geometry::metric::{LocalProjection, footprint_distance_m};
use canvass_territory_models::BuildingFootprint;
use geo::{BoundingRect, Contains, Point};
use rstar::{AABB, RTree, RTreeObject};

struct FootprintEntry {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for FootprintEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// A building and its distance to a query point.
#[derive(Debug, Clone, Copy)]
pub struct Nearby<'a> {
    /// The building.
    pub building: &'a BuildingFootprint,
    /// Metres from the point to the footprint (0 inside).
    pub distance_m: f64,
}

/// Spatial index of the buildings of one campaign.
pub struct BuildingIndex {
    buildings: Vec<BuildingFootprint>,
    tree: RTree<FootprintEntry>,
}

impl std::fmt::Debug for BuildingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildingIndex")
            .field("buildings", &self.buildings.len())
            .finish_non_exhaustive()
    }
}

impl BuildingIndex {
    /// Bulk-loads the index. Footprints without a bounding rectangle
    /// (empty geometry) are dropped.
    #[must_use]
    pub fn new(buildings: Vec<BuildingFootprint>) -> Self {
        let buildings: Vec<BuildingFootprint> = buildings
            .into_iter()
            .filter(|b| b.footprint.bounding_rect().is_some())
            .collect();
        let entries = buildings
            .iter()
            .enumerate()
            .filter_map(|(slot, b)| {
                let rect = b.footprint.bounding_rect()?;
                Some(FootprintEntry {
                    slot,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        Self {
            buildings,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed buildings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    /// Indexed buildings.
    #[must_use]
    pub fn buildings(&self) -> &[BuildingFootprint] {
        &self.buildings
    }

    /// Buildings whose footprint strictly contains the point.
    #[must_use]
    pub fn containing(&self, lon: f64, lat: f64) -> Vec<&BuildingFootprint> {
        let point = Point::new(lon, lat);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
            .map(|entry| &self.buildings[entry.slot])
            .filter(|b| b.footprint.contains(&point))
            .collect()
    }

    /// Buildings within `radius_m` of the point, nearest first, ties by id.
    #[must_use]
    pub fn within(&self, lon: f64, lat: f64, radius_m: f64) -> Vec<Nearby<'_>> {
        let projection = LocalProjection::new(lon, lat);
        let dx = projection.metres_to_lon_deg(radius_m);
        let dy = projection.metres_to_lat_deg(radius_m);
        let search = AABB::from_corners([lon - dx, lat - dy], [lon + dx, lat + dy]);

        let mut found: Vec<Nearby<'_>> = self
            .tree
            .locate_in_envelope_intersecting(&search)
            .map(|entry| {
                let building = &self.buildings[entry.slot];
                Nearby {
                    building,
                    distance_m: footprint_distance_m(lon, lat, &building.footprint),
                }
            })
            .filter(|n| n.distance_m <= radius_m)
            .collect();
        sort_nearest(&mut found);
        found
    }

    /// The `n` nearest buildings over the whole campaign.
    #[must_use]
    pub fn nearest(&self, lon: f64, lat: f64, n: usize) -> Vec<Nearby<'_>> {
        let mut all: Vec<Nearby<'_>> = self
            .buildings
            .iter()
            .map(|building| Nearby {
                building,
                distance_m: footprint_distance_m(lon, lat, &building.footprint),
            })
            .collect();
        sort_nearest(&mut all);
        all.truncate(n);
        all
    }
}

fn sort_nearest(items: &mut [Nearby<'_>]) {
    items.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.building.id.cmp(&b.building.id))
    });
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, polygon};

    use super::*;

    fn square(id: &str, west: f64, south: f64, size: f64) -> BuildingFootprint {
        BuildingFootprint {
            id: id.into(),
            footprint: MultiPolygon(vec![polygon![
                (x: west, y: south),
                (x: west + size, y: south),
                (x: west + size, y: south + size),
                (x: west, y: south + size),
                (x: west, y: south),
            ]]),
            area_sqm: 0.0,
            house_number: None,
            street_name: None,
        }
    }

    #[test]
    fn finds_containing_footprints() {
        let index = BuildingIndex::new(vec![
            square("a", -79.4000, 43.6500, 0.0002),
            square("b", -79.3990, 43.6500, 0.0002),
        ]);
        let hits = index.containing(-79.3999, 43.6501);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(index.containing(-79.3995, 43.6501).is_empty());
    }

    #[test]
    fn within_filters_by_true_distance_and_sorts() {
        let index = BuildingIndex::new(vec![
            square("far", -79.3980, 43.6500, 0.0001),
            square("near", -79.4000, 43.6500, 0.0001),
        ]);
        // ~8 m east of "near"
        let hits = index.within(-79.3998, 43.65005, 25.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].building.id, "near");
        assert!((hits[0].distance_m - 8.06).abs() < 0.2, "{}", hits[0].distance_m);
    }

    #[test]
    fn nearest_covers_whole_campaign() {
        let index = BuildingIndex::new(vec![
            square("x", -79.4100, 43.6500, 0.0001),
            square("y", -79.4000, 43.6500, 0.0001),
        ]);
        let nearest = index.nearest(-79.3900, 43.65005, 5);
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].building.id, "y");
        assert!(nearest[0].distance_m > 700.0);
    }
}

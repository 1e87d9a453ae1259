//! Street suffix and directional abbreviations.
//!
//! Covers the USPS Publication 28 suffixes that show up in residential
//! address data plus the Canada Post forms (English and French). Expansion
//! is applied to both sides of every comparison.

use std::collections::BTreeMap;
use std::sync::LazyLock;

static SUFFIXES: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("ALY", "ALLEY"),
        ("AV", "AVENUE"),
        ("AVE", "AVENUE"),
        ("AVEN", "AVENUE"),
        ("BLV", "BOULEVARD"),
        ("BLVD", "BOULEVARD"),
        ("BOUL", "BOULEVARD"),
        ("BYP", "BYPASS"),
        ("CH", "CHEMIN"),
        ("CIR", "CIRCLE"),
        ("CIRCT", "CIRCUIT"),
        ("CL", "CLOSE"),
        ("CMN", "COMMON"),
        ("CONC", "CONCESSION"),
        ("CRCL", "CIRCLE"),
        ("CRES", "CRESCENT"),
        ("CRT", "COURT"),
        ("CT", "COURT"),
        ("CTR", "CENTRE"),
        ("CV", "COVE"),
        ("DR", "DRIVE"),
        ("DRV", "DRIVE"),
        ("EXPY", "EXPRESSWAY"),
        ("EXT", "EXTENSION"),
        ("FWY", "FREEWAY"),
        ("GDNS", "GARDENS"),
        ("GRV", "GROVE"),
        ("GT", "GATE"),
        ("HTS", "HEIGHTS"),
        ("HWY", "HIGHWAY"),
        ("LN", "LANE"),
        ("LOOP", "LOOP"),
        ("MNR", "MANOR"),
        ("MT", "MOUNT"),
        ("MTÉE", "MONTÉE"),
        ("PARK", "PARK"),
        ("PK", "PARK"),
        ("PKWY", "PARKWAY"),
        ("PKY", "PARKWAY"),
        ("PL", "PLACE"),
        ("PLZ", "PLAZA"),
        ("PROM", "PROMENADE"),
        ("PT", "POINT"),
        ("PVT", "PRIVATE"),
        ("RD", "ROAD"),
        ("RG", "RANG"),
        ("RTE", "ROUTE"),
        ("SQ", "SQUARE"),
        ("ST", "STREET"),
        ("STR", "STREET"),
        ("TER", "TERRACE"),
        ("TERR", "TERRACE"),
        ("TRL", "TRAIL"),
        ("TPKE", "TURNPIKE"),
        ("WAY", "WAY"),
        ("WY", "WAY"),
        ("XING", "CROSSING"),
    ])
});

static DIRECTIONALS: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("N", "NORTH"),
        ("S", "SOUTH"),
        ("E", "EAST"),
        ("W", "WEST"),
        ("NE", "NORTHEAST"),
        ("NW", "NORTHWEST"),
        ("SE", "SOUTHEAST"),
        ("SW", "SOUTHWEST"),
        ("O", "OUEST"),
    ])
});

/// Expands one uppercase token, directionals first.
#[must_use]
pub fn expand_token(token: &str) -> &str {
    DIRECTIONALS
        .get(token)
        .or_else(|| SUFFIXES.get(token))
        .copied()
        .unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_usps_and_canada_post_forms() {
        assert_eq!(expand_token("ST"), "STREET");
        assert_eq!(expand_token("CRES"), "CRESCENT");
        assert_eq!(expand_token("BOUL"), "BOULEVARD");
        assert_eq!(expand_token("CH"), "CHEMIN");
        assert_eq!(expand_token("SW"), "SOUTHWEST");
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(expand_token("QUEEN"), "QUEEN");
        assert_eq!(expand_token("STREET"), "STREET");
    }
}

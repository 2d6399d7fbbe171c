// Geo index (spec §4.6): indexes a `{lat, long}` field as a geohash
// prefix, so that nearby points share tree-adjacent keys. A radius query
// covers the search circle with a geohash prefix (center cell plus its
// 8 neighbors) and post-filters the candidates by true Haversine
// distance — the geohash prefix alone only guarantees a superset.
//
// `_lat_`/`_long_` are auto-appended to this index's metadata (see
// `IndexSpec::metadata_keys`) precisely so that post-filter can run
// without a round trip to the primary store.

use super::{DiffOp, IndexProjection, IndexSpec, QueryValue};
use crate::error::{IndexError, Result};
use crate::tree::ops::Operator;
use crate::tree::{BPlusTree, Match};
use crate::types::{Metadata, TypedValue};
use std::collections::HashSet;

pub struct Geo;

const OPERATORS: &[&str] = &["geo:nearby"];
const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const DEFAULT_PRECISION: usize = 10;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn as_lat_long(value: &TypedValue) -> Option<(f64, f64)> {
    match value {
        TypedValue::Array(items) if items.len() == 2 => {
            let lat = match &items[0] {
                TypedValue::Float(f) => *f,
                TypedValue::Int(i) => *i as f64,
                _ => return None,
            };
            let long = match &items[1] {
                TypedValue::Float(f) => *f,
                TypedValue::Int(i) => *i as f64,
                _ => return None,
            };
            Some((lat, long))
        }
        _ => None,
    }
}

fn encode(lat: f64, long: f64, precision: usize) -> String {
    let mut lat_range = (-90.0, 90.0);
    let mut long_range = (-180.0, 180.0);
    let mut hash = String::with_capacity(precision);
    let mut bit = 0u8;
    let mut ch = 0u8;
    let mut even = true;

    while hash.len() < precision {
        if even {
            let mid = (long_range.0 + long_range.1) / 2.0;
            if long > mid {
                ch |= 1 << (4 - bit);
                long_range.0 = mid;
            } else {
                long_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat > mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        even = !even;
        if bit < 4 {
            bit += 1;
        } else {
            hash.push(BASE32[ch as usize] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}

/// Approximate cell width in meters at each geohash length, used to pick
/// a precision whose cell is comparable to the query radius.
fn cell_width_m(precision: usize) -> f64 {
    match precision {
        0 => 20_000_000.0,
        1 => 5_000_000.0,
        2 => 1_250_000.0,
        3 => 156_000.0,
        4 => 39_100.0,
        5 => 4_890.0,
        6 => 1_225.0,
        7 => 153.0,
        8 => 38.2,
        9 => 4.77,
        10 => 1.19,
        _ => 0.15,
    }
}

fn precision_for_radius(radius_m: f64) -> usize {
    for precision in 1..=DEFAULT_PRECISION {
        if cell_width_m(precision) <= radius_m {
            return precision.saturating_sub(1).max(1);
        }
    }
    DEFAULT_PRECISION
}

/// The center cell's prefix plus its 8 neighbors', covering a search
/// circle that may straddle a cell boundary. Neighbors are approximated
/// by nudging the center point by one cell width in each direction
/// rather than via bitwise neighbor arithmetic.
fn covering_prefixes(lat: f64, long: f64, precision: usize) -> Vec<String> {
    let step = cell_width_m(precision) / EARTH_RADIUS_M * (180.0 / std::f64::consts::PI);
    let mut prefixes = HashSet::new();
    for d_lat in [-1.0, 0.0, 1.0] {
        for d_long in [-1.0, 0.0, 1.0] {
            let plat = (lat + d_lat * step).clamp(-90.0, 90.0);
            let plong = long + d_long * step;
            let plong = if plong > 180.0 {
                plong - 360.0
            } else if plong < -180.0 {
                plong + 360.0
            } else {
                plong
            };
            prefixes.insert(encode(plat, plong, precision));
        }
    }
    prefixes.into_iter().collect()
}

fn haversine_m(lat1: f64, long1: f64, lat2: f64, long2: f64) -> f64 {
    let (lat1, long1, lat2, long2) =
        (lat1.to_radians(), long1.to_radians(), lat2.to_radians(), long2.to_radians());
    let d_lat = lat2 - lat1;
    let d_long = long2 - long1;
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_long / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

impl IndexProjection for Geo {
    fn valid_operators(&self) -> &'static [&'static str] {
        OPERATORS
    }

    fn project_for_build(&self, _spec: &IndexSpec, value: &TypedValue, include: &Metadata) -> Vec<(TypedValue, Metadata)> {
        let Some((lat, long)) = as_lat_long(value) else {
            return Vec::new();
        };
        let hash = encode(lat, long, DEFAULT_PRECISION);
        let mut metadata = include.clone();
        metadata.push(TypedValue::Float(lat));
        metadata.push(TypedValue::Float(long));
        vec![(TypedValue::String(hash), metadata)]
    }

    fn diff_update(
        &self,
        spec: &IndexSpec,
        old: Option<&TypedValue>,
        new: Option<&TypedValue>,
        include_old: &Metadata,
        include_new: &Metadata,
    ) -> Vec<DiffOp> {
        let old_proj = old.map(|v| self.project_for_build(spec, v, include_old));
        let new_proj = new.map(|v| self.project_for_build(spec, v, include_new));

        let mut ops = Vec::new();
        if let Some(mut old_entries) = old_proj {
            ops.extend(old_entries.drain(..).map(|(k, m)| (k, m, false)));
        }
        if let Some(mut new_entries) = new_proj {
            ops.extend(new_entries.drain(..).map(|(k, m)| (k, m, true)));
        }
        ops
    }

    fn execute_query(&self, tree: &BPlusTree, _spec: &IndexSpec, op: &str, value: &QueryValue) -> Result<Vec<Match>> {
        let (lat, long, radius_m) = match value {
            QueryValue::Geo { lat, long, radius_m } => (*lat, *long, *radius_m),
            _ => return Err(IndexError::InvalidArgument { op: op.into(), index: "geo index expects geo:nearby {lat, long, radius_m}".into() }),
        };
        if op != "geo:nearby" {
            return Err(IndexError::InvalidArgument { op: op.into(), index: "geo index".into() });
        }

        let precision = precision_for_radius(radius_m);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for prefix in covering_prefixes(lat, long, precision) {
            for m in tree.search(&Operator::Like(format!("{prefix}*")))? {
                if seen.insert(m.record_pointer.clone()) {
                    candidates.push(m);
                }
            }
        }

        let out = candidates
            .into_iter()
            .filter(|m| match (m.metadata.get(m.metadata.len().wrapping_sub(2)), m.metadata.last()) {
                (Some(TypedValue::Float(plat)), Some(TypedValue::Float(plong))) => {
                    haversine_m(lat, long, *plat, *plong) <= radius_m
                }
                _ => false,
            })
            .collect();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexEngineConfig;
    use crate::index::IndexType;
    use crate::tree::TreeOp;
    use crate::types::RecordPointer;

    fn spec() -> IndexSpec {
        IndexSpec {
            path: "places".into(),
            key: "location".into(),
            include_keys: vec![],
            case_sensitive: true,
            locale: "en".into(),
            index_type: IndexType::Geo,
        }
    }

    fn point(lat: f64, long: f64) -> TypedValue {
        TypedValue::Array(vec![TypedValue::Float(lat), TypedValue::Float(long)])
    }

    #[test]
    fn encode_is_deterministic_and_prefix_stable_nearby() {
        let a = encode(37.7749, -122.4194, 10);
        let b = encode(37.7750, -122.4195, 10);
        assert_eq!(a.len(), 10);
        assert_eq!(&a[..6], &b[..6]);
    }

    #[test]
    fn scenario_five_nearby_search() {
        let g = Geo;
        let s = spec();
        let near_pointer = RecordPointer::new(vec![], "near");
        let far_pointer = RecordPointer::new(vec![], "far");

        let mut ops = Vec::new();
        for (pointer, p) in [(near_pointer.clone(), point(37.7749, -122.4194)), (far_pointer.clone(), point(40.7128, -74.0060))] {
            for (key, metadata) in g.project_for_build(&s, &p, &[]) {
                ops.push(TreeOp::Add { key, record_pointer: pointer.clone(), metadata });
            }
        }
        let mut tree = BPlusTree::new_empty(IndexEngineConfig::default(), 2, true);
        tree.transaction(ops).unwrap();

        let found = g
            .execute_query(&tree, &s, "geo:nearby", &QueryValue::Geo { lat: 37.7750, long: -122.4195, radius_m: 5_000.0 })
            .unwrap();
        let keys: Vec<&str> = found.iter().map(|m| m.record_pointer.key.as_str()).collect();
        assert!(keys.contains(&"near"));
        assert!(!keys.contains(&"far"));
    }
}

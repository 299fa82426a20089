use std::collections::HashMap;

use geo::{coord, Rect};
use serde::Deserialize;

pub type OsmId = i64;
pub type Tags = HashMap<String, String>;

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Node {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Way {
    pub id: OsmId,
    pub nodes: Vec<OsmId>,
    pub tags: Tags,
}

/// Parsed for completeness, never turned into geometry.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Relation {
    pub id: OsmId,
    pub members: Vec<OsmId>,
    pub tags: Tags,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Longitude runs along x, latitude along y.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lon, y: self.min_lat },
            coord! { x: self.max_lon, y: self.max_lat },
        )
    }
}

pub fn has_any_key(tags: &Tags, keys: &[String]) -> bool {
    keys.iter().any(|key| tags.contains_key(key))
}

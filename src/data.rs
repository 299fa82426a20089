use self::osm::{Bounds, Node, Relation, Way};

pub mod osm;
pub mod raw;
pub mod shape;

/// Map data as extracted from the .osm file. Only allow-listed attributes survive, tags are
/// flattened and reference lists are plain ids. Elements keep their document order.

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct OsmElements {
    pub bounds: Option<Bounds>,
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
}

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use geo::{Coord, Geometry, LineString, Polygon, Rect};
use log::{info, warn};

use crate::clip::clip_geometry;
use crate::config::UserConfig;
use crate::data::OsmElements;
use crate::data::osm::{has_any_key, Node, OsmId, Relation, Way};
use crate::data::shape::{PathRecord, PointRecord, ShapeRecord};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::parse_osm::ParseOsmEtl;
use crate::etl::Etl;
use crate::table::write_shapes;

pub const ETL_NAME: &str = "shapes";
pub const OUTPUT_FILE_NAME: &str = "geometry.csv";

pub struct ShapesEtl<'a> {
    config: &'a UserConfig,
}

impl ShapesEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    pub fn new(config: &UserConfig) -> ShapesEtl<'_> {
        ShapesEtl {
            config
        }
    }
}

impl Etl for ShapesEtl<'_> {
    type Input = OsmElements;
    type Output = Vec<ShapeRecord>;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::output_path(dir).exists())
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            fs::remove_file(Self::output_path(dir))?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        ParseOsmEtl::read_cache(dir)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let bounds = self.config.bounds.or(input.bounds).ok_or_else(|| {
            Error::new(ErrorKind::MissingBounds, "The document declares no <bounds> and none are configured.")
        })?;
        assemble_shapes(&input, &self.config.zoning_keys, &self.config.classification_key, &bounds.to_rect())
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let output_file = File::create(Self::output_path(dir))?;
        write_shapes(BufWriter::new(output_file), &output)
    }
}

pub fn select_points(nodes: &[Node]) -> Result<HashMap<OsmId, PointRecord>> {
    let mut points = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let point = PointRecord {
            id: node.id,
            lat: node.lat,
            lon: node.lon,
            name: node.tags.get("name").cloned(),
        };
        if points.insert(node.id, point).is_some() {
            return Err(Error::new(ErrorKind::DuplicateId, format!("Node {} appears more than once.", node.id)));
        }
    }
    Ok(points)
}

/// Drops zoning ways and keeps the name and classification of the rest.
pub fn select_paths(ways: &[Way], zoning_keys: &[String], classification_key: &str) -> Result<Vec<PathRecord>> {
    ways.iter()
        .filter(|way| !has_any_key(&way.tags, zoning_keys))
        .map(|way| {
            if way.nodes.len() < 2 {
                return Err(Error::new(
                    ErrorKind::DegenerateWay,
                    format!("Way {} references {} node(s), at least 2 are needed.", way.id, way.nodes.len()),
                ));
            }
            Ok(PathRecord {
                id: way.id,
                nodes: way.nodes.clone(),
                name: way.tags.get("name").cloned(),
                classification: way.tags.get(classification_key).cloned(),
            })
        })
        .collect()
}

/// Relations never become shapes; only the zoning rule applies to them.
pub fn select_relations<'a>(relations: &'a [Relation], zoning_keys: &[String]) -> Vec<&'a Relation> {
    relations
        .iter()
        .filter(|relation| !has_any_key(&relation.tags, zoning_keys))
        .collect()
}

/// Coordinates as (lon, lat), in reference order.
pub fn resolve_path(path: &PathRecord, points: &HashMap<OsmId, PointRecord>) -> Result<Vec<Coord<f64>>> {
    path.nodes
        .iter()
        .map(|node_id| {
            points
                .get(node_id)
                .map(|point| Coord { x: point.lon, y: point.lat })
                .ok_or_else(|| {
                    Error::new(ErrorKind::UnknownNode, format!("Way {} references unknown node {}.", path.id, node_id))
                })
        })
        .collect()
}

pub fn build_geometry(path: &PathRecord, coords: Vec<Coord<f64>>) -> Geometry<f64> {
    if path.is_closed() {
        Geometry::Polygon(Polygon::new(LineString::new(coords), vec![]))
    } else {
        Geometry::LineString(LineString::new(coords))
    }
}

pub fn assemble_shapes(
    elements: &OsmElements,
    zoning_keys: &[String],
    classification_key: &str,
    rect: &Rect<f64>,
) -> Result<Vec<ShapeRecord>> {
    let points = select_points(&elements.nodes)?;
    let paths = select_paths(&elements.ways, zoning_keys, classification_key)?;
    let relations = select_relations(&elements.relations, zoning_keys);
    info!(
        etl_name = ETL_NAME, points = points.len(),
        named_points = points.values().filter(|point| point.name.is_some()).count(),
        paths = paths.len(), zoning_ways = elements.ways.len() - paths.len(),
        ignored_relations = relations.len(),
        ignored_members = relations.iter().map(|relation| relation.members.len()).sum::<usize>();
        "Selected records"
    );

    let mut shapes = Vec::with_capacity(paths.len());
    let mut empty = 0;
    for path in paths {
        let coords = resolve_path(&path, &points)?;
        let geometry = clip_geometry(&build_geometry(&path, coords), rect);
        let shape = ShapeRecord {
            id: path.id,
            is_closed: path.is_closed(),
            classification: path.classification,
            name: path.name,
            geometry,
        };
        if shape.is_empty() {
            empty += 1;
        }
        shapes.push(shape);
    }
    if empty > 0 {
        warn!(etl_name = ETL_NAME, shapes = empty; "Some shapes lie entirely outside the bounds");
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use geo::{coord, CoordsIter};

    use super::*;
    use crate::data::osm::{Bounds, Tags};

    fn node(id: OsmId, lat: f64, lon: f64, name: Option<&str>) -> Node {
        let mut tags = Tags::new();
        if let Some(name) = name {
            tags.insert("name".to_string(), name.to_string());
        }
        Node { id, lat, lon, tags }
    }

    fn way(id: OsmId, nodes: Vec<OsmId>, tags: &[(&str, &str)]) -> Way {
        Way {
            id,
            nodes,
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn zoning() -> Vec<String> {
        vec!["landuse".to_string()]
    }

    fn wide_rect() -> Rect<f64> {
        Rect::new(coord! { x: -10.0, y: -10.0 }, coord! { x: 10.0, y: 10.0 })
    }

    fn elements(ways: Vec<Way>) -> OsmElements {
        OsmElements {
            bounds: Some(Bounds { min_lon: -10.0, min_lat: -10.0, max_lon: 10.0, max_lat: 10.0 }),
            nodes: vec![
                node(1, 0.0, 0.0, Some("A")),
                node(2, 0.0, 1.0, None),
                node(3, 1.0, 1.0, None),
                node(4, 1.0, 0.0, None),
                node(5, 50.0, 50.0, None),
                node(6, 51.0, 50.0, None),
            ],
            ways,
            relations: vec![],
        }
    }

    #[test]
    fn two_node_way_becomes_one_open_shape() {
        let input = elements(vec![way(10, vec![1, 2], &[("highway", "path")])]);
        let shapes = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap();

        assert_eq!(shapes.len(), 1);
        let shape = &shapes[0];
        assert_eq!(shape.id, 10);
        assert!(!shape.is_closed);
        assert_eq!(shape.classification.as_deref(), Some("path"));
        assert_eq!(shape.name, None);
        assert_eq!(
            shape.geometry,
            Geometry::LineString(LineString::new(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.0 }]))
        );
    }

    #[test]
    fn ring_becomes_closed_shape() {
        let input = elements(vec![way(11, vec![1, 2, 3, 4, 1], &[("building", "yes"), ("name", "Hall")])]);
        let shapes = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap();

        assert!(shapes[0].is_closed);
        assert_eq!(shapes[0].name.as_deref(), Some("Hall"));
        assert_eq!(shapes[0].classification, None);
        match &shapes[0].geometry {
            Geometry::Polygon(polygon) => assert_eq!(polygon.exterior().0.len(), 5),
            other => panic!("expected a polygon, got {:?}", other),
        }
    }

    #[test]
    fn zoning_ways_are_dropped() {
        let input = elements(vec![
            way(12, vec![1, 2, 3, 1], &[("landuse", "residential"), ("highway", "path"), ("name", "Zone")]),
            way(13, vec![3, 4], &[("highway", "footway")]),
        ]);
        let shapes = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap();
        assert_eq!(shapes.iter().map(|s| s.id).collect::<Vec<_>>(), vec![13]);
    }

    #[test]
    fn shape_outside_bounds_is_kept_but_empty() {
        let input = elements(vec![way(14, vec![5, 6], &[("highway", "service")])]);
        let shapes = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap();
        assert_eq!(shapes.len(), 1);
        assert!(shapes[0].is_empty());
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let input = elements(vec![way(15, vec![1, 99], &[])]);
        let err = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownNode);
        assert!(err.message.contains("99"));
    }

    #[test]
    fn single_reference_way_is_an_error() {
        let input = elements(vec![way(16, vec![1], &[])]);
        let err = assemble_shapes(&input, &zoning(), "highway", &wide_rect()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DegenerateWay);
    }

    #[test]
    fn resolved_coordinates_match_reference_count() {
        let input = elements(vec![]);
        let points = select_points(&input.nodes).unwrap();
        for nodes in [vec![1, 2], vec![1, 2, 3], vec![1, 2, 3, 4, 1], vec![4, 3, 3, 2]] {
            let path = PathRecord { id: 1, nodes: nodes.clone(), name: None, classification: None };
            let coords = resolve_path(&path, &points).unwrap();
            assert_eq!(coords.len(), nodes.len());
            assert_eq!(build_geometry(&path, coords).coords_count(), nodes.len());
        }
    }

    #[test]
    fn transform_prefers_configured_bounds() {
        let mut input = elements(vec![way(10, vec![1, 2], &[("highway", "path")])]);
        input.bounds = None;
        let mut config = UserConfig::default();

        let err = ShapesEtl::new(&config).transform(input.clone()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingBounds);

        config.bounds = Some(Bounds { min_lon: 0.0, min_lat: -1.0, max_lon: 0.5, max_lat: 1.0 });
        let shapes = ShapesEtl::new(&config).transform(input).unwrap();
        assert_eq!(
            shapes[0].geometry,
            Geometry::LineString(LineString::new(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 0.5, y: 0.0 }]))
        );
    }
}

use geo::{BoundingRect, Coord, Geometry, Rect};

use super::osm::OsmId;

#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord {
    pub id: OsmId,
    pub nodes: Vec<OsmId>,
    pub name: Option<String>,
    pub classification: Option<String>,
}

impl PathRecord {
    /// Structural check on the references, not an area computation.
    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => first == last,
            _ => false,
        }
    }
}

/// One row of the shape table. Geometry is in (lon, lat) and may be empty after clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub id: OsmId,
    pub classification: Option<String>,
    pub name: Option<String>,
    pub is_closed: bool,
    pub geometry: Geometry<f64>,
}

impl ShapeRecord {
    pub fn is_empty(&self) -> bool {
        match &self.geometry {
            Geometry::LineString(line) => line.0.is_empty(),
            Geometry::Polygon(polygon) => polygon.exterior().0.is_empty(),
            Geometry::MultiPoint(points) => points.0.is_empty(),
            Geometry::MultiLineString(lines) => lines.0.iter().all(|line| line.0.is_empty()),
            Geometry::MultiPolygon(polygons) => polygons.0.iter().all(|p| p.exterior().0.is_empty()),
            Geometry::GeometryCollection(collection) => collection.0.is_empty(),
            _ => false,
        }
    }
}

/// Bounding box of every non-empty shape.
pub fn overall_bounds(shapes: &[ShapeRecord]) -> Option<Rect<f64>> {
    shapes
        .iter()
        .filter(|shape| !shape.is_empty())
        .filter_map(|shape| shape.geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(nodes: Vec<OsmId>) -> PathRecord {
        PathRecord {
            id: 1,
            nodes,
            name: None,
            classification: None,
        }
    }

    #[test]
    fn closed_iff_first_equals_last() {
        let cases: Vec<Vec<OsmId>> = vec![
            vec![1, 2],
            vec![1, 2, 1],
            vec![5, 6, 7, 8, 5],
            vec![5, 6, 7, 8, 6],
            vec![3, 3],
        ];
        for nodes in cases {
            let expected = nodes.first() == nodes.last();
            assert_eq!(path(nodes.clone()).is_closed(), expected, "{:?}", nodes);
        }
    }

    #[test]
    fn empty_path_is_not_closed() {
        assert!(!path(vec![]).is_closed());
    }
}

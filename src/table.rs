//! The shape table shared by the assembler and both renderers: one CSV row per shape with its
//! geometry as WKT.

use std::io::{Read, Write};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use wkt::{ToWkt, TryFromWkt};

use crate::data::osm::OsmId;
use crate::data::shape::ShapeRecord;
use crate::errors::{Error, ErrorKind, Result};

#[derive(Serialize, Deserialize, Debug)]
struct ShapeRow {
    #[serde(rename = "ID")]
    id: OsmId,
    highway: Option<String>,
    name: Option<String>,
    polygon: bool,
    geometry: String,
}

pub fn write_shapes<W: Write>(writer: W, shapes: &[ShapeRecord]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for shape in shapes {
        csv_writer.serialize(ShapeRow {
            id: shape.id,
            highway: shape.classification.clone(),
            name: shape.name.clone(),
            polygon: shape.is_closed,
            geometry: shape.geometry.wkt_string(),
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn read_shapes<R: Read>(reader: R) -> Result<Vec<ShapeRecord>> {
    let mut shapes = Vec::new();
    for row in csv::Reader::from_reader(reader).deserialize() {
        let row: ShapeRow = row?;
        let geometry: Geometry<f64> = Geometry::try_from_wkt_str(&row.geometry).map_err(|err| {
            Error::new(ErrorKind::Table, format!("Shape {} has unreadable geometry: {}", row.id, err))
        })?;
        shapes.push(ShapeRecord {
            id: row.id,
            classification: row.highway.filter(|value| !value.is_empty()),
            name: row.name.filter(|value| !value.is_empty()),
            is_closed: row.polygon,
            geometry,
        });
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use geo::{line_string, polygon, Coord, CoordsIter, MultiLineString, MultiPolygon};

    use super::*;

    fn coords(geometry: &Geometry<f64>) -> Vec<Coord<f64>> {
        geometry.coords_iter().collect()
    }

    #[test]
    fn table_round_trip_keeps_every_column() {
        let shapes = vec![
            ShapeRecord {
                id: 10,
                classification: Some("path".to_string()),
                name: Some("Long Walk, North".to_string()),
                is_closed: false,
                geometry: Geometry::LineString(line_string![(x: -0.1276, y: 51.5072), (x: -0.1281, y: 51.5079)]),
            },
            ShapeRecord {
                id: 11,
                classification: None,
                name: None,
                is_closed: true,
                geometry: Geometry::Polygon(polygon![
                    (x: 0.1, y: 0.2),
                    (x: 0.3, y: 0.2),
                    (x: 0.3, y: 0.4),
                    (x: 0.1, y: 0.2),
                ]),
            },
            ShapeRecord {
                id: 12,
                classification: Some("service".to_string()),
                name: None,
                is_closed: false,
                geometry: Geometry::MultiLineString(MultiLineString(vec![])),
            },
            ShapeRecord {
                id: 13,
                classification: None,
                name: Some("Gone".to_string()),
                is_closed: true,
                geometry: Geometry::MultiPolygon(MultiPolygon(vec![])),
            },
        ];

        let mut buffer = Vec::new();
        write_shapes(&mut buffer, &shapes).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("ID,highway,name,polygon,geometry"));

        let read_back = read_shapes(buffer.as_slice()).unwrap();
        assert_eq!(read_back.len(), shapes.len());
        for (original, copy) in shapes.iter().zip(&read_back) {
            assert_eq!(original.id, copy.id);
            assert_eq!(original.classification, copy.classification);
            assert_eq!(original.name, copy.name);
            assert_eq!(original.is_closed, copy.is_closed);
            assert_eq!(original.is_empty(), copy.is_empty());
            let (a, b) = (coords(&original.geometry), coords(&copy.geometry));
            assert_eq!(a.len(), b.len());
            for (p, q) in a.iter().zip(&b) {
                assert!((p.x - q.x).abs() < 1e-12 && (p.y - q.y).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn broken_geometry_is_a_table_error() {
        let text = "ID,highway,name,polygon,geometry\n1,,,false,LINESTRING(oops)\n";
        let err = read_shapes(text.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Table);
    }
}

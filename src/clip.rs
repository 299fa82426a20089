//! Rectangle clipping for the shapes we assemble from ways.
//!
//! Lines are clipped segment by segment and polygons are intersected with the rectangle; both may
//! split into several pieces. Every point created on an edge is put exactly on that edge, so
//! clipping an already clipped geometry returns it unchanged.

use geo::{
    Area, BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Polygon, Rect,
};

/// Relative to the larger side of the rectangle.
const SNAP_TOLERANCE: f64 = 1e-9;

pub fn clip_geometry(geometry: &Geometry<f64>, rect: &Rect<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Point(point) => {
            if contains(rect, point.0) {
                Geometry::Point(*point)
            } else {
                Geometry::MultiPoint(MultiPoint(vec![]))
            }
        },
        Geometry::MultiPoint(points) => Geometry::MultiPoint(MultiPoint(
            points.0.iter().filter(|point| contains(rect, point.0)).copied().collect(),
        )),
        Geometry::Line(line) => lines_to_geometry(clip_line_string(&LineString::new(vec![line.start, line.end]), rect)),
        Geometry::LineString(line) => lines_to_geometry(clip_line_string(line, rect)),
        Geometry::MultiLineString(lines) => lines_to_geometry(
            lines.0.iter().flat_map(|line| clip_line_string(line, rect)).collect(),
        ),
        Geometry::Polygon(polygon) => polygons_to_geometry(clip_polygon(polygon, rect)),
        Geometry::MultiPolygon(polygons) => polygons_to_geometry(
            polygons.0.iter().flat_map(|polygon| clip_polygon(polygon, rect)).collect(),
        ),
        Geometry::Rect(other) => polygons_to_geometry(clip_polygon(&other.to_polygon(), rect)),
        Geometry::Triangle(triangle) => polygons_to_geometry(clip_polygon(&triangle.to_polygon(), rect)),
        Geometry::GeometryCollection(collection) => Geometry::GeometryCollection(GeometryCollection(
            collection.0.iter().map(|member| clip_geometry(member, rect)).collect(),
        )),
    }
}

/// Pieces of `line` inside `rect`, in the original order. Pieces with fewer than two distinct
/// points are dropped.
pub fn clip_line_string(line: &LineString<f64>, rect: &Rect<f64>) -> Vec<LineString<f64>> {
    let mut pieces = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();

    for segment in line.0.windows(2) {
        let (start, end) = (segment[0], segment[1]);
        match clip_segment(start, end, rect) {
            None => finish_piece(&mut current, &mut pieces),
            Some((entry, exit, leaves)) => {
                if current.last() != Some(&entry) {
                    finish_piece(&mut current, &mut pieces);
                    current.push(entry);
                }
                current.push(exit);
                if leaves {
                    finish_piece(&mut current, &mut pieces);
                }
            },
        }
    }
    finish_piece(&mut current, &mut pieces);
    pieces
}

/// Disjoint pieces of `polygon` inside `rect`. Rings without area clip to nothing.
pub fn clip_polygon(polygon: &Polygon<f64>, rect: &Rect<f64>) -> Vec<Polygon<f64>> {
    if polygon.unsigned_area() == 0.0 {
        return vec![];
    }
    if polygon.bounding_rect().is_some_and(|bounds| within(&bounds, rect)) {
        return vec![polygon.clone()];
    }
    polygon
        .intersection(&rect.to_polygon())
        .into_iter()
        .filter_map(|piece| {
            let exterior = snap_ring(piece.exterior(), rect)?;
            let interiors = piece.interiors().iter().filter_map(|ring| snap_ring(ring, rect)).collect();
            Some(Polygon::new(exterior, interiors))
        })
        .collect()
}

fn lines_to_geometry(mut pieces: Vec<LineString<f64>>) -> Geometry<f64> {
    if pieces.len() == 1 {
        Geometry::LineString(pieces.remove(0))
    } else {
        Geometry::MultiLineString(MultiLineString(pieces))
    }
}

fn polygons_to_geometry(mut polygons: Vec<Polygon<f64>>) -> Geometry<f64> {
    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(MultiPolygon(polygons))
    }
}

fn contains(rect: &Rect<f64>, point: Coord<f64>) -> bool {
    let (min, max) = (rect.min(), rect.max());
    min.x <= point.x && point.x <= max.x && min.y <= point.y && point.y <= max.y
}

fn within(inner: &Rect<f64>, outer: &Rect<f64>) -> bool {
    contains(outer, inner.min()) && contains(outer, inner.max())
}

fn clamp_to_rect(point: Coord<f64>, rect: &Rect<f64>) -> Coord<f64> {
    let (min, max) = (rect.min(), rect.max());
    Coord {
        x: point.x.clamp(min.x, max.x),
        y: point.y.clamp(min.y, max.y),
    }
}

/// Liang-Barsky. Returns the visible part of the segment and whether it stops short of `end`.
fn clip_segment(start: Coord<f64>, end: Coord<f64>, rect: &Rect<f64>) -> Option<(Coord<f64>, Coord<f64>, bool)> {
    let (min, max) = (rect.min(), rect.max());
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let mut entry_edge = None;
    let mut exit_edge = None;

    for (edge, p, q) in [
        (Edge::Left(min.x), -dx, start.x - min.x),
        (Edge::Right(max.x), dx, max.x - start.x),
        (Edge::Bottom(min.y), -dy, start.y - min.y),
        (Edge::Top(max.y), dy, max.y - start.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            if r > t0 {
                t0 = r;
                entry_edge = Some(edge);
            }
        } else {
            if r < t0 {
                return None;
            }
            if r < t1 {
                t1 = r;
                exit_edge = Some(edge);
            }
        }
    }

    let at = |t: f64, edge: Edge| {
        let point = clamp_to_rect(Coord { x: start.x + t * dx, y: start.y + t * dy }, rect);
        edge.snap(point)
    };
    let entry = match entry_edge {
        Some(edge) => at(t0, edge),
        None => start,
    };
    let exit = match exit_edge {
        Some(edge) => at(t1, edge),
        None => end,
    };
    Some((entry, exit, exit_edge.is_some()))
}

fn finish_piece(current: &mut Vec<Coord<f64>>, pieces: &mut Vec<LineString<f64>>) {
    let mut points = std::mem::take(current);
    points.dedup();
    if points.len() >= 2 {
        pieces.push(LineString::new(points));
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Bottom(f64),
    Top(f64),
}

impl Edge {
    fn snap(&self, point: Coord<f64>) -> Coord<f64> {
        match *self {
            Edge::Left(x) | Edge::Right(x) => Coord { x, y: point.y },
            Edge::Bottom(y) | Edge::Top(y) => Coord { x: point.x, y },
        }
    }
}

/// Puts points that overshoot or barely miss an edge exactly on it. `None` when fewer than three
/// distinct vertices remain.
fn snap_ring(ring: &LineString<f64>, rect: &Rect<f64>) -> Option<LineString<f64>> {
    let (min, max) = (rect.min(), rect.max());
    let tolerance = SNAP_TOLERANCE * rect.width().max(rect.height()).max(1.0);
    let snap = |value: f64, low: f64, high: f64| {
        if (value - low).abs() <= tolerance {
            low
        } else if (value - high).abs() <= tolerance {
            high
        } else {
            value.clamp(low, high)
        }
    };
    let mut points: Vec<Coord<f64>> = ring
        .0
        .iter()
        .map(|c| Coord { x: snap(c.x, min.x, max.x), y: snap(c.y, min.y, max.y) })
        .collect();

    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return None;
    }
    // Polygon::new closes the ring.
    Some(LineString::new(points))
}

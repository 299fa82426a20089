use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use geo::{Coord, Geometry, LineString, MapCoords, Rect};
use log::{debug, info};

use crate::config::{TikzConfig, UserConfig};
use crate::data::shape::{overall_bounds, ShapeRecord};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::shapes;
use crate::etl::Etl;
use crate::table::read_shapes;

pub const ETL_NAME: &str = "tikz";
pub const OUTPUT_FILE_NAME: &str = "map.tikz";

pub struct TikzEtl<'a> {
    style: &'a TikzConfig,
}

impl TikzEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    pub fn new(config: &UserConfig) -> TikzEtl<'_> {
        TikzEtl {
            style: &config.tikz,
        }
    }

    fn polygon_command(&self, ring: &LineString<f64>) -> String {
        let mut coords = ring.0.as_slice();
        if coords.len() > 1 && coords.first() == coords.last() {
            coords = &coords[..coords.len() - 1];
        }
        format!("\\draw[{}] {};", self.style.polygon_style, join_coords(coords))
    }

    fn line_command(&self, line: &LineString<f64>) -> String {
        format!("\\draw[{}] {};", self.style.line_style, join_coords(&line.0))
    }

    /// One command per polygon or line piece. Anything else stops the run.
    fn shape_commands(&self, shape: &ShapeRecord, geometry: &Geometry<f64>, commands: &mut Vec<String>) -> Result<()> {
        match geometry {
            Geometry::Polygon(polygon) => {
                if !polygon.exterior().0.is_empty() {
                    commands.push(self.polygon_command(polygon.exterior()));
                }
            },
            Geometry::MultiPolygon(polygons) => {
                for polygon in polygons {
                    self.shape_commands(shape, &Geometry::Polygon(polygon.clone()), commands)?;
                }
            },
            Geometry::LineString(line) => {
                if !line.0.is_empty() {
                    commands.push(self.line_command(line));
                }
            },
            Geometry::MultiLineString(lines) => {
                for line in lines {
                    self.shape_commands(shape, &Geometry::LineString(line.clone()), commands)?;
                }
            },
            other => {
                return Err(Error::new(
                    ErrorKind::Render,
                    format!(
                        "Unknown geometry type {} for shape {} (name: {:?}, highway: {:?}, polygon: {}).",
                        geometry_kind(other), shape.id, shape.name, shape.classification, shape.is_closed,
                    ),
                ));
            },
        }
        Ok(())
    }
}

impl Etl for TikzEtl<'_> {
    type Input = Vec<ShapeRecord>;
    type Output = String;

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
        read_shapes(File::open(dir.join(shapes::OUTPUT_FILE_NAME))?)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let Some(bounds) = overall_bounds(&input) else {
            info!(etl_name = ETL_NAME; "No geometry to draw");
            return Ok(String::new());
        };
        let min = bounds.min();
        let scale = unit_scale(&bounds);

        let mut commands = Vec::with_capacity(input.len());
        for shape in &input {
            if shape.is_empty() {
                debug!(etl_name = ETL_NAME, id = shape.id; "Skipping empty shape");
                continue;
            }
            let normalized = shape.geometry.map_coords(|c| Coord {
                x: (c.x - min.x) * scale,
                y: (c.y - min.y) * scale,
            });
            self.shape_commands(shape, &normalized, &mut commands)?;
        }
        info!(etl_name = ETL_NAME, commands = commands.len(); "Generated drawing commands");
        Ok(commands.join("\n"))
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let mut output_file = File::create(Self::output_path(dir))?;
        output_file.write_all(output.as_bytes())?;
        Ok(())
    }
}

fn join_coords(coords: &[Coord<f64>]) -> String {
    coords
        .iter()
        .map(|c| format!("({}, {})", c.x, c.y))
        .collect::<Vec<_>>()
        .join(" -- ")
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Maps the width onto 1, falling back to the height for a vertical strip.
fn unit_scale(bounds: &Rect<f64>) -> f64 {
    if bounds.width() > 0.0 {
        1.0 / bounds.width()
    } else if bounds.height() > 0.0 {
        1.0 / bounds.height()
    } else {
        1.0
    }
}

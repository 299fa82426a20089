use std::fs::{self, File};
use std::path::{Path, PathBuf};

use geo::{Coord, Geometry, InteriorPoint, LineString, Rect};
use log::{info, warn};
use raqote::{DrawOptions, DrawTarget, LineCap, LineJoin, PathBuilder, Point, SolidSource, Source, StrokeStyle};

use crate::config::{RasterConfig, UserConfig};
use crate::data::shape::{overall_bounds, ShapeRecord};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::shapes;
use crate::etl::Etl;
use crate::table::read_shapes;

mod fk {
    pub use font_kit::font::Font;
    pub use pathfinder_geometry::vector::vec2f;
}

pub const ETL_NAME: &str = "draw_map";
pub const OUTPUT_FILE_NAME: &str = "map.png";

/// Maps (lon, lat) onto pixels with one scale for both axes, centred, y pointing down.
struct Projection {
    min: Coord<f64>,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
    height: f64,
}

impl Projection {
    fn fit(bounds: &Rect<f64>, config: &RasterConfig) -> Projection {
        let margin = f64::from(config.margin_px);
        let width = f64::from(config.width_px);
        let height = f64::from(config.height_px);
        let usable_w = (width - 2.0 * margin).max(1.0);
        let usable_h = (height - 2.0 * margin).max(1.0);

        let scale = match (bounds.width() > 0.0, bounds.height() > 0.0) {
            (true, true) => (usable_w / bounds.width()).min(usable_h / bounds.height()),
            (true, false) => usable_w / bounds.width(),
            (false, true) => usable_h / bounds.height(),
            (false, false) => 1.0,
        };
        Projection {
            min: bounds.min(),
            scale,
            offset_x: (width - bounds.width() * scale) / 2.0,
            offset_y: (height - bounds.height() * scale) / 2.0,
            height,
        }
    }

    fn project(&self, coords: &Coord<f64>) -> (f32, f32) {
        let x = self.offset_x + (coords.x - self.min.x) * self.scale;
        let y = self.height - (self.offset_y + (coords.y - self.min.y) * self.scale);
        (x as f32, y as f32)
    }
}

/// Evenly spaced hues, like sampling a rainbow colour map once per row.
pub fn row_color(row: usize, rows: usize) -> SolidSource {
    let hue = if rows > 1 { row as f64 / (rows - 1) as f64 } else { 0.0 };
    let (r, g, b) = hsv_to_rgb(hue, 1.0, 1.0);
    SolidSource::from_unpremultiplied_argb(0xff, r, g, b)
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let h = (hue.rem_euclid(1.0)) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * f);
    let t = value * (1.0 - saturation * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    let channel = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r), channel(g), channel(b))
}

pub struct DrawMapEtl<'a> {
    config: &'a RasterConfig,
    font: Option<fk::Font>,
}

impl DrawMapEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    pub fn new(user_config: &UserConfig) -> Result<DrawMapEtl<'_>> {
        let config = &user_config.raster;
        let font = match &config.font_path {
            Some(path) => Some(fk::Font::from_path(path, 0).map_err(|err| {
                Error::new(ErrorKind::Config, format!("Could not load font {}: {}", path.display(), err))
            })?),
            None => None,
        };
        Ok(DrawMapEtl {
            config,
            font,
        })
    }

    fn stroke(width: f32) -> StrokeStyle {
        StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width,
            miter_limit: 2.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }

    fn build_path(projection: &Projection, line: &LineString<f64>, close: bool) -> Option<raqote::Path> {
        if line.0.len() < 2 {
            return None;
        }
        let mut pb = PathBuilder::new();
        let (x0, y0) = projection.project(&line.0[0]);
        pb.move_to(x0, y0);

        for coords in &line.0[1..] {
            let (x, y) = projection.project(coords);
            pb.line_to(x, y);
        }
        if close {
            pb.close();
        }
        Some(pb.finish())
    }

    fn draw_line(&self, dt: &mut DrawTarget, projection: &Projection, line: &LineString<f64>, color: SolidSource) {
        if let Some(path) = Self::build_path(projection, line, false) {
            dt.stroke(
                &path,
                &Source::Solid(color),
                &Self::stroke(self.config.line_width),
                &DrawOptions::new(),
            );
        }
    }

    fn draw_area(&self, dt: &mut DrawTarget, projection: &Projection, ring: &LineString<f64>, color: SolidSource) {
        if let Some(path) = Self::build_path(projection, ring, true) {
            let draw_options = DrawOptions {
                alpha: self.config.fill_alpha,
                ..DrawOptions::new()
            };
            dt.fill(&path, &Source::Solid(color), &draw_options);
            dt.stroke(
                &path,
                &Source::Solid(self.config.edge_color),
                &Self::stroke(1.0),
                &draw_options,
            );
        }
    }

    fn draw_text(&self, dt: &mut DrawTarget, font: &fk::Font, x: f32, y: f32, text: &str) {
        let point_size = self.config.font_size;
        let units_per_em = font.metrics().units_per_em as f32;
        let mut start = fk::vec2f(0.0, 0.0);
        let mut ids = Vec::new();
        let mut positions = Vec::new();
        for c in text.chars() {
            let Some(id) = font.glyph_for_char(c) else {
                continue;
            };
            ids.push(id);
            positions.push(Point::new(start.x(), start.y()));
            if let Ok(advance) = font.advance(id) {
                start += advance * (point_size / units_per_em);
            }
        }
        if ids.is_empty() {
            return;
        }
        // Centre horizontally on the anchor and roughly vertically around the x-height.
        let shift_x = x - start.x() / 2.0;
        let shift_y = y + point_size / 3.0;
        for position in &mut positions {
            position.x += shift_x;
            position.y += shift_y;
        }
        let source = Source::Solid(self.config.text_color);
        dt.draw_glyphs(font, point_size, &ids, &positions, &source, &DrawOptions::new());
    }

    fn draw_shape(&self, dt: &mut DrawTarget, projection: &Projection, shape: &ShapeRecord, color: SolidSource) -> Result<()> {
        match &shape.geometry {
            Geometry::LineString(line) => self.draw_line(dt, projection, line, color),
            Geometry::MultiLineString(lines) => {
                for line in lines {
                    self.draw_line(dt, projection, line, color);
                }
            },
            Geometry::Polygon(polygon) => self.draw_area(dt, projection, polygon.exterior(), color),
            Geometry::MultiPolygon(polygons) => {
                for polygon in polygons {
                    self.draw_area(dt, projection, polygon.exterior(), color);
                }
            },
            _ => return Err(Error::new(
                ErrorKind::Render,
                format!("Cannot draw the geometry of shape {} (name: {:?}).", shape.id, shape.name),
            )),
        }
        Ok(())
    }

    fn draw_label(&self, dt: &mut DrawTarget, projection: &Projection, shape: &ShapeRecord) {
        let (Some(font), Some(name)) = (&self.font, &shape.name) else {
            return;
        };
        if let Some(anchor) = shape.geometry.interior_point() {
            let (x, y) = projection.project(&anchor.0);
            self.draw_text(dt, font, x, y, name);
        }
    }
}

impl Etl for DrawMapEtl<'_> {
    type Input = Vec<ShapeRecord>;

    type Output = DrawTarget;

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
        let mut dt = DrawTarget::new(
            self.config.width_px.try_into()?,
            self.config.height_px.try_into()?
        );
        dt.clear(self.config.background);

        let Some(bounds) = overall_bounds(&input) else {
            info!(etl_name = ETL_NAME; "No geometry to draw");
            return Ok(dt);
        };
        let projection = Projection::fit(&bounds, self.config);

        let has_labels = input.iter().any(|shape| shape.is_closed && shape.name.is_some());
        if has_labels && self.font.is_none() {
            warn!(etl_name = ETL_NAME; "No font_path configured, names will not be drawn");
        }

        let rows = input.len();
        for (row, shape) in tqdm::tqdm(input.iter().enumerate()) {
            if shape.is_empty() {
                continue;
            }
            self.draw_shape(&mut dt, &projection, shape, row_color(row, rows))?;
        }
        // Labels go on top of every filled area.
        for shape in input.iter().filter(|shape| shape.is_closed && !shape.is_empty()) {
            self.draw_label(&mut dt, &projection, shape);
        }
        Ok(dt)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        output.write_png(Self::output_path(dir))?;
        Ok(())
    }
}

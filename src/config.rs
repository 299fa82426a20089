use std::fs::File;
use std::path::{Path, PathBuf};

use raqote::SolidSource;
use serde::Deserialize;

use crate::data::osm::Bounds;
use crate::errors::{Error, ErrorKind, Result};

/// Everything the pipeline stages need to know. Paths are relative to the working directory.
#[derive(Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub data_path: PathBuf,
    pub output_root: PathBuf,
    /// Ignore cached stage outputs and run every stage again.
    pub rebuild: bool,
    /// Clip to these bounds instead of the ones declared in the document.
    pub bounds: Option<Bounds>,
    /// Ways and relations carrying any of these keys describe zoning, not physical things.
    pub zoning_keys: Vec<String>,
    pub classification_key: String,
    pub raster: RasterConfig,
    pub tikz: TikzConfig,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            data_path: Path::new("Data").join("map.osm"),
            output_root: PathBuf::from("output"),
            rebuild: false,
            bounds: None,
            zoning_keys: vec!["landuse".to_string()],
            classification_key: "highway".to_string(),
            raster: RasterConfig::default(),
            tikz: TikzConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub width_px: u32,
    pub height_px: u32,
    pub margin_px: f32,
    pub line_width: f32,
    pub fill_alpha: f32,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub background: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub edge_color: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub text_color: SolidSource,
}

impl Default for RasterConfig {
    fn default() -> Self {
        RasterConfig {
            width_px: 500,
            height_px: 500,
            margin_px: 10.0,
            line_width: 1.5,
            fill_alpha: 0.4,
            font_path: None,
            font_size: 12.0,
            background: SolidSource::from_unpremultiplied_argb(0xff, 0x1c, 0x1e, 0x1f),
            edge_color: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
            text_color: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TikzConfig {
    pub polygon_style: String,
    pub line_style: String,
}

impl Default for TikzConfig {
    fn default() -> Self {
        TikzConfig {
            polygon_style: "fill=black, fill opacity=0.25".to_string(),
            line_style: "color=black".to_string(),
        }
    }
}

pub fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Config, format!("Could not open config file {}: {}", path.display(), err))
    })?;
    Ok(serde_json::from_reader(file)?)
}

mod serialize_color {
    use raqote::SolidSource;
    use serde::{de, Deserializer};
    use serde::de::Visitor;


    struct ColorVisitor;

    impl<'de> Visitor<'de> for ColorVisitor {
        type Value = SolidSource;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "a colour string like '#rrggbb' or '#rrggbbaa'")
        }

        fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
            if !string.is_ascii() || !string.starts_with('#') || (string.len() != 7 && string.len() != 9) {
                return Err(de::Error::invalid_value(de::Unexpected::Str(string), &self))
            }
            let r = parse_hex_byte(&self, &string[1..3])?;
            let g = parse_hex_byte(&self, &string[3..5])?;
            let b = parse_hex_byte(&self, &string[5..7])?;
            let a = if string.len() == 9 {
                parse_hex_byte(&self, &string[7..9])?
            } else {
                0xff
            };
            Ok(SolidSource::from_unpremultiplied_argb(a, r, g, b))
        }
    }

    fn parse_hex_byte<E>(visitor: &ColorVisitor, string: &str) -> Result<u8, E> where E: de::Error {
        u8::from_str_radix(string, 16).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(string), visitor)
        })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SolidSource, D::Error>
        where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

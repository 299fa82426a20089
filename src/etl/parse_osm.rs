use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str;

use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rkyv::AlignedVec;
use xz::bufread::XzDecoder;

use crate::config::UserConfig;
use crate::data::OsmElements;
use crate::data::osm::{Bounds, Node, OsmId, Relation, Tags, Way};
use crate::data::raw::{OneOrMany, RawEntity};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::Etl;

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "osm_elements.rkyv";

const ATTRIBUTES_TO_KEEP: [&str; 3] = ["id", "lat", "lon"];
const CHILDREN_TO_KEEP: [&str; 3] = ["nd", "tag", "member"];

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
}

impl ParseOsmEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn create_osm_reader(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let file = File::open(&self.config.data_path).map_err(|err| {
            Error::new(ErrorKind::Io, format!("Could not open {}: {}", self.config.data_path.display(), err))
        })?;
        let file_reader = BufReader::new(file);
        let is_xz = self.config.data_path.extension().is_some_and(|ext| ext == "xz");
        let input: Box<dyn BufRead> = if is_xz {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);

        Ok(reader)
    }

    /// Loads the cache written by this stage.
    pub fn read_cache(dir: &Path) -> Result<OsmElements> {
        let mut input_file = File::open(Self::output_path(dir))?;
        let mut buf_vec: Vec<u8> = Vec::new();
        input_file.read_to_end(&mut buf_vec)?;
        // Archived data must be read from a 16-byte aligned buffer.
        let mut aligned = AlignedVec::with_capacity(buf_vec.len());
        aligned.extend_from_slice(&buf_vec);

        rkyv::from_bytes::<OsmElements>(&aligned)
            .map_err(|_| Error::new(ErrorKind::Cache, "Could not deserialize OSM element cache."))
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl<'_> {
        ParseOsmEtl {
            config
        }
    }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = RawEntity;
    type Output = OsmElements;

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

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        read_document(self.create_osm_reader()?)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let elements = extract_elements(input)?;
        info!(
            etl_name = ETL_NAME, nodes = elements.nodes.len(), ways = elements.ways.len(),
            relations = elements.relations.len();
            "Extracted OSM elements"
        );
        Ok(elements)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let bytes = rkyv::to_bytes::<_, 256>(&output)
            .map_err(|_| Error::new(ErrorKind::Cache, "Could not serialize OSM element cache."))?;
        let mut output_file = File::create(Self::output_path(dir))?;
        output_file.write_all(&bytes)?;
        Ok(())
    }
}

fn parse_element(el: &BytesStart) -> Result<RawEntity> {
    let mut entity = RawEntity::new(str::from_utf8(el.name().as_ref())?);
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        let key = str::from_utf8(attribute.key.as_ref())?.to_string();
        let value = attribute.unescape_value()?.into_owned();
        entity.attributes.insert(key, value);
    }
    Ok(entity)
}

/// Reads the whole document into a tree of elements and returns its `osm` root.
pub fn read_document<R: BufRead>(mut reader: Reader<R>) -> Result<RawEntity> {
    let mut buf = Vec::new();
    let mut stack: Vec<RawEntity> = Vec::new();
    let mut root: Option<RawEntity> = None;

    loop {
        let finished = match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                stack.push(parse_element(&e)?);
                None
            },
            Event::Empty(e) => Some(parse_element(&e)?),
            Event::End(_e) => {
                let closed = stack.pop().ok_or_else(|| {
                    Error::new(ErrorKind::Xml, "Closing tag without a matching opening tag.")
                })?;
                Some(closed)
            },
            Event::Text(e) => {
                if !e.unescape()?.trim().is_empty() {
                    return Err(Error::new(ErrorKind::Xml, "Didn't expect to see text in OSM file."));
                }
                None
            },
            // Declarations, comments, CDATA, doctypes and processing instructions carry no map data.
            _ => None,
        };
        if let Some(element) = finished {
            match stack.last_mut() {
                Some(parent) => parent.add_child(element),
                None if root.is_none() => root = Some(element),
                None => return Err(Error::new(ErrorKind::Xml, "Document has more than one root element.")),
            }
        }
        // if we don't keep a borrow elsewhere, we can clear the buffer to keep memory usage low
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::new(ErrorKind::Xml, "Document ended inside an open element."));
    }
    let root = root.ok_or_else(|| Error::new(ErrorKind::Xml, "Document has no root element."))?;
    if root.name != "osm" {
        return Err(Error::new(ErrorKind::Xml, format!("Expected an <osm> root element, found <{}>.", root.name)));
    }
    Ok(root)
}

/// Normalizes the document tree into flat nodes, ways and relations.
pub fn extract_elements(mut root: RawEntity) -> Result<OsmElements> {
    let bounds = match root.children.get("bounds").and_then(OneOrMany::first) {
        Some(bounds) => Some(parse_bounds(bounds)?),
        None => None,
    };

    let mut seen_nodes = HashSet::new();
    let mut nodes = Vec::new();
    for raw in root.take_children("node") {
        let node = process_node(raw)?;
        if !seen_nodes.insert(node.id) {
            return Err(Error::new(ErrorKind::DuplicateId, format!("Node {} appears more than once.", node.id)));
        }
        nodes.push(node);
    }

    let mut seen_ways = HashSet::new();
    let mut ways = Vec::new();
    for raw in root.take_children("way") {
        let way = process_way(raw)?;
        if !seen_ways.insert(way.id) {
            return Err(Error::new(ErrorKind::DuplicateId, format!("Way {} appears more than once.", way.id)));
        }
        ways.push(way);
    }

    let relations = root
        .take_children("relation")
        .into_iter()
        .map(process_relation)
        .collect::<Result<Vec<_>>>()?;

    Ok(OsmElements {
        bounds,
        nodes,
        ways,
        relations,
    })
}

fn process_node(mut raw: RawEntity) -> Result<Node> {
    raw.retain_keys(&ATTRIBUTES_TO_KEEP, &CHILDREN_TO_KEEP);
    let id = parse_id(&raw)?;
    Ok(Node {
        id,
        lat: parse_required(&raw, "lat", id)?,
        lon: parse_required(&raw, "lon", id)?,
        tags: flatten_tags(raw.children.remove("tag"), id)?,
    })
}

fn process_way(mut raw: RawEntity) -> Result<Way> {
    raw.retain_keys(&ATTRIBUTES_TO_KEEP, &CHILDREN_TO_KEEP);
    let id = parse_id(&raw)?;
    let refs = raw.children.remove("nd").ok_or_else(|| {
        Error::new(ErrorKind::MissingAttribute, format!("Way {} has no <nd> references.", id))
    })?;
    Ok(Way {
        id,
        nodes: flatten_refs(refs, id)?,
        tags: flatten_tags(raw.children.remove("tag"), id)?,
    })
}

fn process_relation(mut raw: RawEntity) -> Result<Relation> {
    raw.retain_keys(&ATTRIBUTES_TO_KEEP, &CHILDREN_TO_KEEP);
    let id = parse_id(&raw)?;
    let members = match raw.children.remove("member") {
        Some(members) => flatten_refs(members, id)?,
        None => Vec::new(),
    };
    Ok(Relation {
        id,
        members,
        tags: flatten_tags(raw.children.remove("tag"), id)?,
    })
}

fn parse_id(raw: &RawEntity) -> Result<OsmId> {
    let value = raw.attribute("id").ok_or_else(|| {
        Error::new(ErrorKind::MissingAttribute, format!("<{}> element without an id.", raw.name))
    })?;
    value.trim().parse().map_err(|err| {
        Error::new(ErrorKind::Parse, format!("<{}> has an invalid id {:?}: {}", raw.name, value, err))
    })
}

fn parse_required(raw: &RawEntity, key: &str, id: OsmId) -> Result<f64> {
    let value = raw.attribute(key).ok_or_else(|| {
        Error::new(ErrorKind::MissingAttribute, format!("<{}> {} has no {}.", raw.name, id, key))
    })?;
    value.trim().parse().map_err(|err| {
        Error::new(ErrorKind::Parse, format!("<{}> {} has an invalid {} {:?}: {}", raw.name, id, key, value, err))
    })
}

fn parse_bounds(raw: &RawEntity) -> Result<Bounds> {
    let coordinate = |key: &str| -> Result<f64> {
        let value = raw.attribute(key).ok_or_else(|| {
            Error::new(ErrorKind::MissingAttribute, format!("<bounds> has no {}.", key))
        })?;
        Ok(value.trim().parse()?)
    };
    Ok(Bounds {
        min_lon: coordinate("minlon")?,
        min_lat: coordinate("minlat")?,
        max_lon: coordinate("maxlon")?,
        max_lat: coordinate("maxlat")?,
    })
}

/// A lone `<tag>` and a list of them flatten to the same map.
fn flatten_tags(group: Option<OneOrMany<RawEntity>>, id: OsmId) -> Result<Tags> {
    let mut tags = Tags::new();
    let entries = match group {
        None => return Ok(tags),
        Some(OneOrMany::One(tag)) => vec![tag],
        Some(OneOrMany::Many(tags)) => tags,
    };
    for tag in entries {
        match (tag.attribute("k"), tag.attribute("v")) {
            (Some(key), Some(value)) => {
                tags.insert(key.to_string(), value.to_string());
            },
            _ => return Err(Error::new(
                ErrorKind::MissingAttribute,
                format!("Element {} has a <tag> without k or v.", id),
            )),
        }
    }
    Ok(tags)
}

fn flatten_refs(group: OneOrMany<RawEntity>, id: OsmId) -> Result<Vec<OsmId>> {
    group
        .into_vec()
        .iter()
        .map(|reference| {
            let value = reference.attribute("ref").ok_or_else(|| {
                Error::new(ErrorKind::MissingAttribute, format!("Element {} has a <{}> without ref.", id, reference.name))
            })?;
            value.trim().parse::<OsmId>().map_err(|err| {
                Error::new(ErrorKind::Parse, format!("Element {} has an invalid ref {:?}: {}", id, value, err))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Result<OsmElements> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        extract_elements(read_document(reader)?)
    }

    const SMALL_MAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="-1.0" minlon="-1.0" maxlat="1.0" maxlon="2.0"/>
  <node id="1" visible="true" version="2" lat="0.0" lon="0.0">
    <tag k="name" v="A"/>
  </node>
  <node id="2" lat="0.0" lon="1.0"/>
  <way id="10" user="someone" uid="7">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="path"/>
  </way>
  <relation id="100">
    <member type="way" ref="10" role="outer"/>
    <tag k="type" v="multipolygon"/>
    <tag k="name" v="Block &amp; Yard"/>
  </relation>
</osm>"#;

    #[test]
    fn extracts_allow_listed_fields_only() {
        let elements = parse(SMALL_MAP).unwrap();

        assert_eq!(
            elements.bounds,
            Some(Bounds { min_lon: -1.0, min_lat: -1.0, max_lon: 2.0, max_lat: 1.0 })
        );
        assert_eq!(elements.nodes.len(), 2);
        assert_eq!(elements.nodes[0].id, 1);
        assert_eq!(elements.nodes[0].tags.get("name").map(String::as_str), Some("A"));
        assert!(elements.nodes[1].tags.is_empty());
        assert_eq!(elements.nodes[1].lon, 1.0);

        assert_eq!(elements.ways.len(), 1);
        assert_eq!(elements.ways[0].nodes, vec![1, 2]);
        assert_eq!(elements.ways[0].tags.len(), 1);
        assert!(!elements.ways[0].tags.contains_key("user"));

        assert_eq!(elements.relations[0].members, vec![10]);
        assert_eq!(elements.relations[0].tags.get("name").map(String::as_str), Some("Block & Yard"));
    }

    #[test]
    fn one_tag_and_many_tags_flatten_the_same_way() {
        let mut single = RawEntity::new("way");
        let mut tag = RawEntity::new("tag");
        tag.attributes.insert("k".to_string(), "highway".to_string());
        tag.attributes.insert("v".to_string(), "path".to_string());
        single.add_child(tag.clone());

        let mut repeated = RawEntity::new("way");
        repeated.add_child(tag.clone());
        repeated.add_child(tag);

        assert!(matches!(single.children.get("tag"), Some(OneOrMany::One(_))));
        assert!(matches!(repeated.children.get("tag"), Some(OneOrMany::Many(_))));
        assert_eq!(
            flatten_tags(single.children.remove("tag"), 1).unwrap(),
            flatten_tags(repeated.children.remove("tag"), 1).unwrap()
        );
    }

    #[test]
    fn missing_id_is_an_error() {
        let err = parse(r#"<osm><node lat="1" lon="2"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingAttribute);
    }

    #[test]
    fn missing_coordinates_are_an_error() {
        let err = parse(r#"<osm><node id="4" lat="1"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingAttribute);
        assert!(err.message.contains("lon"));
    }

    #[test]
    fn unparseable_values_are_errors() {
        let err = parse(r#"<osm><node id="x" lat="1" lon="2"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        let err = parse(r#"<osm><way id="3"><nd ref="abc"/></way></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn way_without_references_is_an_error() {
        let err = parse(r#"<osm><way id="3"><tag k="highway" v="path"/></way></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingAttribute);
    }

    #[test]
    fn duplicate_nodes_are_rejected() {
        let err = parse(r#"<osm><node id="1" lat="0" lon="0"/><node id="1" lat="1" lon="1"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateId);
    }

    #[test]
    fn duplicate_ways_are_rejected() {
        let err = parse(
            r#"<osm><way id="7"><nd ref="1"/><nd ref="2"/></way><way id="7"><nd ref="2"/><nd ref="3"/></way></osm>"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateId);
        assert!(err.message.contains("Way 7"));
    }

    #[test]
    fn xz_compressed_input_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("map.osm.xz");
        let mut encoder = xz::write::XzEncoder::new(File::create(&data_path).unwrap(), 6);
        encoder.write_all(SMALL_MAP.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let config = UserConfig { data_path, ..Default::default() };
        let reader = ParseOsmEtl::new(&config).create_osm_reader().unwrap();
        let elements = extract_elements(read_document(reader).unwrap()).unwrap();
        assert_eq!(elements.nodes.len(), 2);
        assert_eq!(elements.ways[0].nodes, vec![1, 2]);
    }

    #[test]
    fn cache_reads_back_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = UserConfig::default();
        let elements = parse(SMALL_MAP).unwrap();
        ParseOsmEtl::new(&config).load(dir.path(), elements.clone()).unwrap();
        assert_eq!(ParseOsmEtl::read_cache(dir.path()).unwrap(), elements);
    }

    #[test]
    fn document_without_bounds_has_none() {
        let elements = parse(r#"<osm><node id="1" lat="0" lon="0"/></osm>"#).unwrap();
        assert!(elements.bounds.is_none());
        assert!(elements.ways.is_empty());
        assert!(elements.relations.is_empty());
    }

    #[test]
    fn wrong_root_and_stray_text_are_rejected() {
        assert_eq!(parse("<gpx></gpx>").unwrap_err().kind, ErrorKind::Xml);
        assert_eq!(parse("<osm>hello</osm>").unwrap_err().kind, ErrorKind::Xml);
        assert_eq!(parse("<osm><node id=\"1\" lat=\"0\" lon=\"0\">").unwrap_err().kind, ErrorKind::Xml);
    }
}

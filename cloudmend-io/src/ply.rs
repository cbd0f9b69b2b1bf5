//! PLY format support
//!
//! Vertex elements with `x y z`, optional `red green blue` and optional
//! `nx ny nz` properties. Other elements such as faces are ignored on read.

use crate::{PointCloudReader, PointCloudWriter};
use cloudmend_core::{CloudPoint, Error, Point3f, PointCloud, Result, Vector3f};
use ply_rs::{
    parser::Parser,
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// PLY encodings the writer can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

impl From<PlyFormat> for Encoding {
    fn from(format: PlyFormat) -> Self {
        match format {
            PlyFormat::Ascii => Encoding::Ascii,
            PlyFormat::BinaryLittleEndian => Encoding::BinaryLittleEndian,
        }
    }
}

/// ply-rs reports malformed content as I/O errors of kind `InvalidInput`
/// or `InvalidData`
fn parse_error(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::InvalidInput
        | std::io::ErrorKind::InvalidData
        | std::io::ErrorKind::UnexpectedEof => {
            Error::InvalidInput(format!("malformed PLY data: {}", err))
        }
        _ => Error::Io(err),
    }
}

/// Read a point cloud from PLY data
pub fn read_ply<R: BufRead>(reader: &mut R) -> Result<PointCloud<CloudPoint>> {
    let parser = Parser::<DefaultElement>::new();
    let ply = parser.read_ply(reader).map_err(parse_error)?;

    let vertices = match ply.payload.get("vertex") {
        Some(vertices) => vertices,
        None => return Ok(PointCloud::new()),
    };

    let mut points = Vec::with_capacity(vertices.len());
    for vertex in vertices {
        let position = Point3f::new(
            extract_property_value(vertex, "x")?,
            extract_property_value(vertex, "y")?,
            extract_property_value(vertex, "z")?,
        );

        let mut point = CloudPoint::new(position);
        if vertex.contains_key("red") {
            point.color = Some([
                extract_color_channel(vertex, "red")?,
                extract_color_channel(vertex, "green")?,
                extract_color_channel(vertex, "blue")?,
            ]);
        }
        if vertex.contains_key("nx") {
            point.normal = Some(Vector3f::new(
                extract_property_value(vertex, "nx")?,
                extract_property_value(vertex, "ny")?,
                extract_property_value(vertex, "nz")?,
            ));
        }
        points.push(point);
    }

    debug!(points = points.len(), "read PLY vertices");
    PointCloud::try_from_points(points)
}

/// Write a point cloud as a PLY vertex element
pub fn write_ply<W: Write>(
    cloud: &PointCloud<CloudPoint>,
    writer: &mut W,
    format: PlyFormat,
) -> Result<()> {
    cloud.validate_schema()?;
    let schema = cloud.schema();

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = format.into();

    let mut vertex_element = ElementDef::new("vertex".to_string());
    vertex_element.count = cloud.len();
    let mut add_property = |name: &str, scalar: ScalarType| {
        vertex_element
            .properties
            .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar)));
    };
    for name in ["x", "y", "z"] {
        add_property(name, ScalarType::Float);
    }
    if schema.has_color {
        for name in ["red", "green", "blue"] {
            add_property(name, ScalarType::UChar);
        }
    }
    if schema.has_normal {
        for name in ["nx", "ny", "nz"] {
            add_property(name, ScalarType::Float);
        }
    }
    ply.header.elements.add(vertex_element);

    let vertices = cloud
        .iter()
        .map(|point| {
            let mut vertex = DefaultElement::new();
            vertex.insert("x".to_string(), Property::Float(point.position.x));
            vertex.insert("y".to_string(), Property::Float(point.position.y));
            vertex.insert("z".to_string(), Property::Float(point.position.z));
            if let Some([r, g, b]) = point.color {
                vertex.insert("red".to_string(), Property::UChar(r));
                vertex.insert("green".to_string(), Property::UChar(g));
                vertex.insert("blue".to_string(), Property::UChar(b));
            }
            if let Some(normal) = point.normal {
                vertex.insert("nx".to_string(), Property::Float(normal.x));
                vertex.insert("ny".to_string(), Property::Float(normal.y));
                vertex.insert("nz".to_string(), Property::Float(normal.z));
            }
            vertex
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    Writer::new().write_ply(writer, &mut ply)?;
    Ok(())
}

/// Extract a property value as f32 from a PLY element
fn extract_property_value(element: &DefaultElement, name: &str) -> Result<f32> {
    match element.get(name) {
        Some(Property::Float(val)) => Ok(*val),
        Some(Property::Double(val)) => Ok(*val as f32),
        Some(Property::Int(val)) => Ok(*val as f32),
        Some(Property::UInt(val)) => Ok(*val as f32),
        Some(Property::Short(val)) => Ok(*val as f32),
        Some(Property::UShort(val)) => Ok(*val as f32),
        _ => Err(Error::InvalidInput(format!(
            "PLY vertex property '{}' not found or invalid type",
            name
        ))),
    }
}

/// Extract a color channel, rescaling floating point colors from [0, 1]
fn extract_color_channel(element: &DefaultElement, name: &str) -> Result<u8> {
    match element.get(name) {
        Some(Property::UChar(val)) => Ok(*val),
        Some(Property::UShort(val)) => Ok((*val >> 8) as u8),
        Some(Property::Float(val)) => Ok((val.clamp(0.0, 1.0) * 255.0).round() as u8),
        Some(Property::Double(val)) => Ok((val.clamp(0.0, 1.0) * 255.0).round() as u8),
        _ => Err(Error::InvalidInput(format!(
            "PLY color property '{}' not found or invalid type",
            name
        ))),
    }
}

pub struct PlyReader;

impl PointCloudReader for PlyReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud<CloudPoint>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        read_ply(&mut reader)
    }
}

pub struct PlyWriter;

impl PointCloudWriter for PlyWriter {
    fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud<CloudPoint>, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_ply(cloud, &mut writer, PlyFormat::BinaryLittleEndian)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_cloud() -> PointCloud<CloudPoint> {
        PointCloud::try_from_points(vec![
            CloudPoint::with_color(Point3f::new(0.0, 0.5, -1.25), [255, 0, 10])
                .with_normal(Vector3f::new(0.0, 0.0, 1.0)),
            CloudPoint::with_color(Point3f::new(1.0e-3, 2.0, 3.5), [0, 0, 0])
                .with_normal(Vector3f::new(0.6, 0.8, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_ascii_parsing_with_faces() {
        let content = b"ply
format ascii 1.0
comment This is a test file
element vertex 4
property float x
property float y
property float z
property float nx
property float ny
property float nz
property uchar red
property uchar green
property uchar blue
element face 2
property list uchar int vertex_indices
end_header
0.0 0.0 0.0 0.0 0.0 1.0 255 0 0
1.0 0.0 0.0 0.0 0.0 1.0 0 255 0
1.0 1.0 0.0 0.0 0.0 1.0 0 0 255
0.0 1.0 0.0 0.0 0.0 1.0 255 255 255
3 0 1 2
3 0 2 3
";
        let cloud = read_ply(&mut Cursor::new(&content[..])).unwrap();
        assert_eq!(cloud.len(), 4);
        assert_eq!(cloud[2].position, Point3f::new(1.0, 1.0, 0.0));
        assert_eq!(cloud[1].color, Some([0, 255, 0]));
        assert_eq!(cloud[3].normal, Some(Vector3f::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_positions_only() {
        let content = b"ply
format ascii 1.0
element vertex 2
property double x
property double y
property double z
end_header
1 2 3
4 5 6
";
        let cloud = read_ply(&mut Cursor::new(&content[..])).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud[1].position, Point3f::new(4.0, 5.0, 6.0));
        assert!(!cloud.schema().has_color);
        assert!(!cloud.schema().has_normal);
    }

    #[test]
    fn test_round_trip_both_encodings() {
        let cloud = sample_cloud();
        for format in [PlyFormat::Ascii, PlyFormat::BinaryLittleEndian] {
            let mut buffer = Vec::new();
            write_ply(&cloud, &mut buffer, format).unwrap();
            let loaded = read_ply(&mut Cursor::new(buffer)).unwrap();
            assert_eq!(loaded, cloud, "{:?}", format);
        }
    }

    #[test]
    fn test_malformed_header_rejected() {
        let not_ply = b"format ascii 1.0\nelement vertex 1\nend_header\n0 0 0\n";
        assert!(matches!(
            read_ply(&mut Cursor::new(&not_ply[..])),
            Err(Error::InvalidInput(_))
        ));

        let missing_z = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n0 0\n";
        assert!(matches!(
            read_ply(&mut Cursor::new(&missing_z[..])),
            Err(Error::InvalidInput(_))
        ));
    }
}

//! PCD (Point Cloud Data) format support
//!
//! Reads and writes ASCII and binary PCD files. Recognized fields are
//! `x y z`, color as a packed `rgb`/`rgba` value or as separate `r g b`
//! channels, and `normal_x normal_y normal_z`. Other fields are parsed and
//! ignored.

use crate::{PointCloudReader, PointCloudWriter};
use cloudmend_core::{CloudPoint, Error, Point3f, PointCloud, Result, Rgb, Vector3f};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// PCD data format variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdDataFormat {
    Ascii,
    Binary,
    BinaryCompressed,
}

/// PCD field data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcdFieldType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PcdFieldType {
    fn from_header(type_str: &str, size: usize) -> Result<Self> {
        match (type_str, size) {
            ("I", 1) => Ok(PcdFieldType::I8),
            ("I", 2) => Ok(PcdFieldType::I16),
            ("I", 4) => Ok(PcdFieldType::I32),
            ("U", 1) => Ok(PcdFieldType::U8),
            ("U", 2) => Ok(PcdFieldType::U16),
            ("U", 4) => Ok(PcdFieldType::U32),
            ("F", 4) => Ok(PcdFieldType::F32),
            ("F", 8) => Ok(PcdFieldType::F64),
            _ => Err(Error::InvalidInput(format!(
                "unknown PCD field type/size combination: {}/{}",
                type_str, size
            ))),
        }
    }

    fn size(self) -> usize {
        match self {
            PcdFieldType::I8 | PcdFieldType::U8 => 1,
            PcdFieldType::I16 | PcdFieldType::U16 => 2,
            PcdFieldType::I32 | PcdFieldType::U32 | PcdFieldType::F32 => 4,
            PcdFieldType::F64 => 8,
        }
    }

    fn type_char(self) -> &'static str {
        match self {
            PcdFieldType::I8 | PcdFieldType::I16 | PcdFieldType::I32 => "I",
            PcdFieldType::U8 | PcdFieldType::U16 | PcdFieldType::U32 => "U",
            PcdFieldType::F32 | PcdFieldType::F64 => "F",
        }
    }
}

/// PCD field definition
#[derive(Debug, Clone, PartialEq)]
pub struct PcdField {
    pub name: String,
    pub field_type: PcdFieldType,
    pub count: usize,
}

impl PcdField {
    fn scalar(name: &str, field_type: PcdFieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            count: 1,
        }
    }
}

/// PCD header information
#[derive(Debug, Clone, PartialEq)]
pub struct PcdHeader {
    pub version: String,
    pub fields: Vec<PcdField>,
    pub width: usize,
    pub height: usize,
    /// tx, ty, tz, qw, qx, qy, qz
    pub viewpoint: [f64; 7],
    pub data_format: PcdDataFormat,
}

impl PcdHeader {
    pub fn num_points(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    /// Offset of the first value of `name` within a record
    fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some(offset);
            }
            offset += field.count;
        }
        None
    }

    fn field(&self, name: &str) -> Option<&PcdField> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn values_per_record(&self) -> usize {
        self.fields.iter().map(|f| f.count).sum()
    }

    fn record_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.field_type.size() * f.count)
            .sum()
    }
}

/// PCD field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PcdValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl PcdValue {
    pub fn to_f64(self) -> f64 {
        match self {
            PcdValue::I8(v) => v as f64,
            PcdValue::U8(v) => v as f64,
            PcdValue::I16(v) => v as f64,
            PcdValue::U16(v) => v as f64,
            PcdValue::I32(v) => v as f64,
            PcdValue::U32(v) => v as f64,
            PcdValue::F32(v) => v as f64,
            PcdValue::F64(v) => v,
        }
    }

    /// Raw 32 bits of a packed color value
    fn packed_bits(self) -> Option<u32> {
        match self {
            PcdValue::F32(v) => Some(v.to_bits()),
            PcdValue::U32(v) => Some(v),
            PcdValue::I32(v) => Some(v as u32),
            _ => None,
        }
    }
}

/// All values of one point, flattened in field order
pub type PcdRecord = Vec<PcdValue>;

/// PCD write options
#[derive(Debug, Clone)]
pub struct PcdWriteOptions {
    pub data_format: PcdDataFormat,
    pub version: String,
    pub viewpoint: Option<[f64; 7]>,
}

impl Default for PcdWriteOptions {
    fn default() -> Self {
        Self {
            data_format: PcdDataFormat::Binary,
            version: "0.7".to_string(),
            viewpoint: None,
        }
    }
}

impl PcdWriteOptions {
    pub fn ascii() -> Self {
        Self {
            data_format: PcdDataFormat::Ascii,
            ..Default::default()
        }
    }
}

/// Upper bound on records preallocated from the header's declared size
const MAX_PREALLOCATED_RECORDS: usize = 1 << 16;

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidInput("PCD data ends before all points were read".to_string())
    } else {
        Error::Io(err)
    }
}

/// PCD reader
pub struct RobustPcdReader;

impl RobustPcdReader {
    /// Read PCD file and return header and point records
    pub fn read_pcd_file<P: AsRef<Path>>(path: P) -> Result<(PcdHeader, Vec<PcdRecord>)> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_pcd_data(&mut reader)
    }

    /// Read PCD data from a reader
    pub fn read_pcd_data<R: BufRead>(reader: &mut R) -> Result<(PcdHeader, Vec<PcdRecord>)> {
        let header = Self::read_header(reader)?;
        let records = match header.data_format {
            PcdDataFormat::Ascii => Self::read_ascii_records(reader, &header)?,
            PcdDataFormat::Binary => Self::read_binary_records(reader, &header)?,
            PcdDataFormat::BinaryCompressed => {
                return Err(Error::UnsupportedFormat(
                    "binary_compressed PCD data is not supported".to_string(),
                ))
            }
        };
        Ok((header, records))
    }

    /// Read PCD header
    pub fn read_header<R: BufRead>(reader: &mut R) -> Result<PcdHeader> {
        let mut version = None;
        let mut names: Vec<String> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        let mut types: Vec<String> = Vec::new();
        let mut counts: Option<Vec<usize>> = None;
        let mut width = None;
        let mut height = None;
        let mut viewpoint = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut points = None;

        let mut line = String::new();
        let data_format = loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(Error::InvalidInput(
                    "unexpected end of file in PCD header".to_string(),
                ));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            let values = &parts[1..];
            match parts[0] {
                "VERSION" => version = values.first().map(|v| v.to_string()),
                "FIELDS" => names = values.iter().map(|v| v.to_string()).collect(),
                "SIZE" => sizes = parse_list(values, "SIZE")?,
                "TYPE" => types = values.iter().map(|v| v.to_string()).collect(),
                "COUNT" => counts = Some(parse_list(values, "COUNT")?),
                "WIDTH" => width = Some(parse_single(values, "WIDTH")?),
                "HEIGHT" => height = Some(parse_single(values, "HEIGHT")?),
                "POINTS" => points = Some(parse_single(values, "POINTS")?),
                "VIEWPOINT" => {
                    let parsed: Vec<f64> = parse_list(values, "VIEWPOINT")?;
                    if parsed.len() != 7 {
                        return Err(Error::InvalidInput(format!(
                            "VIEWPOINT needs 7 values, got {}",
                            parsed.len()
                        )));
                    }
                    viewpoint.copy_from_slice(&parsed);
                }
                "DATA" => match values.first().copied() {
                    Some("ascii") => break PcdDataFormat::Ascii,
                    Some("binary") => break PcdDataFormat::Binary,
                    Some("binary_compressed") => break PcdDataFormat::BinaryCompressed,
                    other => {
                        return Err(Error::InvalidInput(format!(
                            "unknown PCD DATA format: {:?}",
                            other
                        )))
                    }
                },
                other => debug!(keyword = other, "ignoring unknown PCD header line"),
            }
        };

        let version =
            version.ok_or_else(|| Error::InvalidInput("missing VERSION in PCD header".to_string()))?;
        let height = height.unwrap_or(1);
        let width = match (width, points) {
            (Some(width), _) => width,
            (None, Some(points)) => points / height.max(1),
            (None, None) => {
                return Err(Error::InvalidInput(
                    "missing WIDTH in PCD header".to_string(),
                ))
            }
        };

        if names.is_empty() {
            return Err(Error::InvalidInput("missing FIELDS in PCD header".to_string()));
        }
        let counts = counts.unwrap_or_else(|| vec![1; names.len()]);
        if sizes.len() != names.len() || types.len() != names.len() || counts.len() != names.len()
        {
            return Err(Error::InvalidInput(
                "mismatch between FIELDS, SIZE, TYPE and COUNT declarations".to_string(),
            ));
        }

        let fields = names
            .into_iter()
            .zip(types.iter().zip(sizes.iter().zip(counts)))
            .map(|(name, (type_str, (&size, count)))| {
                Ok(PcdField {
                    name,
                    field_type: PcdFieldType::from_header(type_str, size)?,
                    count,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let num_points = width.checked_mul(height).ok_or_else(|| {
            Error::InvalidInput(format!(
                "WIDTH * HEIGHT overflows: {} * {}",
                width, height
            ))
        })?;
        if let Some(points) = points {
            if points != num_points {
                return Err(Error::InvalidInput(format!(
                    "POINTS ({}) doesn't match WIDTH * HEIGHT ({})",
                    points, num_points
                )));
            }
        }

        let record_size = fields.iter().try_fold(0usize, |total, field| {
            field
                .field_type
                .size()
                .checked_mul(field.count)
                .and_then(|bytes| total.checked_add(bytes))
        });
        match record_size {
            None => {
                return Err(Error::InvalidInput(
                    "PCD field COUNT values overflow the record size".to_string(),
                ))
            }
            Some(0) => {
                return Err(Error::InvalidInput(
                    "PCD fields declare no values per point".to_string(),
                ))
            }
            Some(_) => {}
        }

        Ok(PcdHeader {
            version,
            fields,
            width,
            height,
            viewpoint,
            data_format,
        })
    }

    fn read_ascii_records<R: BufRead>(reader: &mut R, header: &PcdHeader) -> Result<Vec<PcdRecord>> {
        let expected = header.num_points();
        let per_record = header.values_per_record();
        let mut records = Vec::with_capacity(expected.min(MAX_PREALLOCATED_RECORDS));

        let mut line = String::new();
        while records.len() < expected {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(Error::InvalidInput(format!(
                    "PCD file declares {} points but contains {}",
                    expected,
                    records.len()
                )));
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() < per_record {
                return Err(Error::InvalidInput(format!(
                    "PCD line {} has {} values, expected {}",
                    records.len(),
                    tokens.len(),
                    per_record
                )));
            }

            let mut tokens = tokens.into_iter();
            let mut record = Vec::with_capacity(per_record);
            for field in &header.fields {
                for token in tokens.by_ref().take(field.count) {
                    record.push(parse_ascii_value(token, field.field_type)?);
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    fn read_binary_records<R: Read>(reader: &mut R, header: &PcdHeader) -> Result<Vec<PcdRecord>> {
        let record_size = header.record_size();
        let mut buf = Vec::new();
        let mut records = Vec::with_capacity(header.num_points().min(MAX_PREALLOCATED_RECORDS));

        for _ in 0..header.num_points() {
            // Grow with the data actually present instead of the declared size
            buf.clear();
            reader
                .by_ref()
                .take(record_size as u64)
                .read_to_end(&mut buf)
                .map_err(truncated)?;
            if buf.len() < record_size {
                return Err(truncated(std::io::ErrorKind::UnexpectedEof.into()));
            }

            let mut offset = 0;
            let mut record = Vec::with_capacity(header.values_per_record());
            for field in &header.fields {
                let size = field.field_type.size();
                for _ in 0..field.count {
                    record.push(decode_le(&buf[offset..offset + size], field.field_type));
                    offset += size;
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    /// Convert PCD records to an attributed point cloud.
    ///
    /// Points with non-finite coordinates (the padding of organized clouds)
    /// are dropped.
    pub fn pcd_to_point_cloud(
        header: &PcdHeader,
        records: &[PcdRecord],
    ) -> Result<PointCloud<CloudPoint>> {
        let coordinate = |axis: &str| {
            header.offset_of(axis).ok_or_else(|| {
                Error::InvalidInput(format!("PCD file has no '{}' coordinate field", axis))
            })
        };
        let (x, y, z) = (coordinate("x")?, coordinate("y")?, coordinate("z")?);

        let packed_color = ["rgb", "rgba"]
            .iter()
            .find_map(|name| header.offset_of(name));
        let channel_color = match (
            header.offset_of("r"),
            header.offset_of("g"),
            header.offset_of("b"),
        ) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };
        let normal = match (
            header.offset_of("normal_x"),
            header.offset_of("normal_y"),
            header.offset_of("normal_z"),
        ) {
            (Some(nx), Some(ny), Some(nz)) => Some([nx, ny, nz]),
            _ => None,
        };
        if let Some(field) = ["rgb", "rgba"].iter().find_map(|name| header.field(name)) {
            if field.field_type.size() != 4 {
                return Err(Error::InvalidInput(format!(
                    "packed color field '{}' must be 4 bytes",
                    field.name
                )));
            }
        }

        let mut points = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for record in records {
            let position = Point3f::new(
                record[x].to_f64() as f32,
                record[y].to_f64() as f32,
                record[z].to_f64() as f32,
            );
            if !position.coords.iter().all(|c| c.is_finite()) {
                skipped += 1;
                continue;
            }

            let mut point = CloudPoint::new(position);
            if let Some(offset) = packed_color {
                point.color = record[offset].packed_bits().map(unpack_rgb);
            } else if let Some([r, g, b]) = channel_color {
                point.color = Some([
                    channel(record[r]),
                    channel(record[g]),
                    channel(record[b]),
                ]);
            }
            if let Some([nx, ny, nz]) = normal {
                point.normal = Some(Vector3f::new(
                    record[nx].to_f64() as f32,
                    record[ny].to_f64() as f32,
                    record[nz].to_f64() as f32,
                ));
            }
            points.push(point);
        }

        if skipped > 0 {
            warn!(skipped, "dropped PCD points with non-finite coordinates");
        }
        PointCloud::try_from_points(points)
    }
}

fn parse_list<T: std::str::FromStr>(values: &[&str], keyword: &str) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::InvalidInput(format!("invalid {} value: {}", keyword, v)))
        })
        .collect()
}

fn parse_single(values: &[&str], keyword: &str) -> Result<usize> {
    let value = values
        .first()
        .ok_or_else(|| Error::InvalidInput(format!("missing {} value", keyword)))?;
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid {} value: {}", keyword, value)))
}

fn parse_ascii_value(token: &str, field_type: PcdFieldType) -> Result<PcdValue> {
    let invalid = || Error::InvalidInput(format!("invalid {:?} value: {}", field_type, token));
    Ok(match field_type {
        PcdFieldType::I8 => PcdValue::I8(token.parse().map_err(|_| invalid())?),
        PcdFieldType::U8 => PcdValue::U8(token.parse().map_err(|_| invalid())?),
        PcdFieldType::I16 => PcdValue::I16(token.parse().map_err(|_| invalid())?),
        PcdFieldType::U16 => PcdValue::U16(token.parse().map_err(|_| invalid())?),
        PcdFieldType::I32 => PcdValue::I32(token.parse().map_err(|_| invalid())?),
        PcdFieldType::U32 => PcdValue::U32(token.parse().map_err(|_| invalid())?),
        PcdFieldType::F32 => PcdValue::F32(token.parse().map_err(|_| invalid())?),
        PcdFieldType::F64 => PcdValue::F64(token.parse().map_err(|_| invalid())?),
    })
}

fn decode_le(bytes: &[u8], field_type: PcdFieldType) -> PcdValue {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    match field_type {
        PcdFieldType::I8 => PcdValue::I8(buf[0] as i8),
        PcdFieldType::U8 => PcdValue::U8(buf[0]),
        PcdFieldType::I16 => PcdValue::I16(i16::from_le_bytes([buf[0], buf[1]])),
        PcdFieldType::U16 => PcdValue::U16(u16::from_le_bytes([buf[0], buf[1]])),
        PcdFieldType::I32 => PcdValue::I32(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        PcdFieldType::U32 => PcdValue::U32(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        PcdFieldType::F32 => PcdValue::F32(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
        PcdFieldType::F64 => PcdValue::F64(f64::from_le_bytes(buf)),
    }
}

fn channel(value: PcdValue) -> u8 {
    value.to_f64().round().clamp(0.0, 255.0) as u8
}

/// Color channels of a `0x00RRGGBB` (or `0xAARRGGBB`) packed value
pub fn unpack_rgb(bits: u32) -> Rgb {
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

pub fn pack_rgb(color: Rgb) -> u32 {
    (color[0] as u32) << 16 | (color[1] as u32) << 8 | color[2] as u32
}

/// PCD writer
pub struct RobustPcdWriter;

impl RobustPcdWriter {
    /// Write point cloud to PCD file with options
    pub fn write_point_cloud<P: AsRef<Path>>(
        cloud: &PointCloud<CloudPoint>,
        path: P,
        options: &PcdWriteOptions,
    ) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_point_cloud_to_writer(cloud, &mut writer, options)?;
        writer.flush()?;
        Ok(())
    }

    /// Write point cloud to writer with options
    pub fn write_point_cloud_to_writer<W: Write>(
        cloud: &PointCloud<CloudPoint>,
        writer: &mut W,
        options: &PcdWriteOptions,
    ) -> Result<()> {
        cloud.validate_schema()?;
        let schema = cloud.schema();

        let mut fields = vec![
            PcdField::scalar("x", PcdFieldType::F32),
            PcdField::scalar("y", PcdFieldType::F32),
            PcdField::scalar("z", PcdFieldType::F32),
        ];
        if schema.has_color {
            fields.push(PcdField::scalar("rgb", PcdFieldType::F32));
        }
        if schema.has_normal {
            fields.push(PcdField::scalar("normal_x", PcdFieldType::F32));
            fields.push(PcdField::scalar("normal_y", PcdFieldType::F32));
            fields.push(PcdField::scalar("normal_z", PcdFieldType::F32));
        }

        let header = PcdHeader {
            version: options.version.clone(),
            fields,
            width: cloud.len(),
            height: 1,
            viewpoint: options
                .viewpoint
                .unwrap_or([0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            data_format: options.data_format,
        };
        Self::write_header(writer, &header)?;

        match options.data_format {
            PcdDataFormat::Ascii => {
                for point in cloud.iter() {
                    let values = record_values(point);
                    let line: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    writeln!(writer, "{}", line.join(" "))?;
                }
            }
            PcdDataFormat::Binary => {
                for point in cloud.iter() {
                    for value in record_values(point) {
                        writer.write_all(&value.to_le_bytes())?;
                    }
                }
            }
            PcdDataFormat::BinaryCompressed => {
                return Err(Error::UnsupportedFormat(
                    "binary_compressed PCD data is not supported".to_string(),
                ))
            }
        }

        debug!(points = cloud.len(), "wrote PCD data");
        Ok(())
    }

    fn write_header<W: Write>(writer: &mut W, header: &PcdHeader) -> Result<()> {
        writeln!(writer, "# .PCD v{} - Point Cloud Data file format", header.version)?;
        writeln!(writer, "VERSION {}", header.version)?;
        let fields = &header.fields;
        writeln!(writer, "FIELDS {}", header_column(fields, |f| f.name.clone()))?;
        writeln!(writer, "SIZE {}", header_column(fields, |f| f.field_type.size().to_string()))?;
        writeln!(writer, "TYPE {}", header_column(fields, |f| f.field_type.type_char().to_string()))?;
        writeln!(writer, "COUNT {}", header_column(fields, |f| f.count.to_string()))?;
        writeln!(writer, "WIDTH {}", header.width)?;
        writeln!(writer, "HEIGHT {}", header.height)?;
        let viewpoint: Vec<String> = header.viewpoint.iter().map(|v| v.to_string()).collect();
        writeln!(writer, "VIEWPOINT {}", viewpoint.join(" "))?;
        writeln!(writer, "POINTS {}", header.num_points())?;

        let data_str = match header.data_format {
            PcdDataFormat::Ascii => "ascii",
            PcdDataFormat::Binary => "binary",
            PcdDataFormat::BinaryCompressed => "binary_compressed",
        };
        writeln!(writer, "DATA {}", data_str)?;
        Ok(())
    }
}

fn header_column(fields: &[PcdField], f: impl Fn(&PcdField) -> String) -> String {
    fields.iter().map(f).collect::<Vec<_>>().join(" ")
}

/// Values of a point in the field order the writer declares
fn record_values(point: &CloudPoint) -> Vec<f32> {
    let mut values = vec![point.position.x, point.position.y, point.position.z];
    if let Some(color) = point.color {
        values.push(f32::from_bits(pack_rgb(color)));
    }
    if let Some(normal) = point.normal {
        values.extend([normal.x, normal.y, normal.z]);
    }
    values
}

pub struct PcdReader;

impl PointCloudReader for PcdReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud<CloudPoint>> {
        let (header, records) = RobustPcdReader::read_pcd_file(path)?;
        RobustPcdReader::pcd_to_point_cloud(&header, &records)
    }
}

pub struct PcdWriter;

impl PointCloudWriter for PcdWriter {
    fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud<CloudPoint>, path: P) -> Result<()> {
        RobustPcdWriter::write_point_cloud(cloud, path, &PcdWriteOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(content: &[u8]) -> Result<PointCloud<CloudPoint>> {
        let (header, records) = RobustPcdReader::read_pcd_data(&mut Cursor::new(content))?;
        RobustPcdReader::pcd_to_point_cloud(&header, &records)
    }

    fn sample_cloud() -> PointCloud<CloudPoint> {
        PointCloud::try_from_points(vec![
            CloudPoint::with_color(Point3f::new(0.0, 0.5, -1.25), [255, 0, 10])
                .with_normal(Vector3f::new(0.0, 0.0, 1.0)),
            CloudPoint::with_color(Point3f::new(1.0e-3, 2.0, 3.5), [0, 0, 0])
                .with_normal(Vector3f::new(0.6, 0.8, 0.0)),
            CloudPoint::with_color(Point3f::new(-7.25, 0.125, 9.0), [1, 128, 254])
                .with_normal(Vector3f::new(-1.0, 0.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_ascii_xyz_parsing() {
        let content = b"# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z
SIZE 4 4 4
TYPE F F F
COUNT 1 1 1
WIDTH 3
HEIGHT 1
VIEWPOINT 0 0 0 1 0 0 0
POINTS 3
DATA ascii
0 0 0
1.5 2 3

-1 -2 -3
";
        let cloud = read(content).unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud[1].position, Point3f::new(1.5, 2.0, 3.0));
        assert_eq!(cloud[2].position, Point3f::new(-1.0, -2.0, -3.0));
        assert!(cloud[0].color.is_none());
        assert!(cloud[0].normal.is_none());
    }

    #[test]
    fn test_separate_color_channels_and_extra_fields() {
        let content = b"VERSION .7
FIELDS x y z intensity r g b
SIZE 4 4 4 4 1 1 1
TYPE F F F F U U U
WIDTH 2
HEIGHT 1
DATA ascii
0 0 0 0.5 10 20 30
1 1 1 0.7 255 254 253
";
        let cloud = read(content).unwrap();
        assert_eq!(cloud[0].color, Some([10, 20, 30]));
        assert_eq!(cloud[1].color, Some([255, 254, 253]));
    }

    #[test]
    fn test_packed_rgb_as_unsigned() {
        let packed = pack_rgb([12, 34, 56]);
        let content = format!(
            "VERSION 0.7
FIELDS x y z rgba
SIZE 4 4 4 4
TYPE F F F U
COUNT 1 1 1 1
WIDTH 1
HEIGHT 1
POINTS 1
DATA ascii
1 2 3 {}
",
            packed | 0xff00_0000
        );
        let cloud = read(content.as_bytes()).unwrap();
        assert_eq!(cloud[0].color, Some([12, 34, 56]));
    }

    #[test]
    fn test_binary_and_ascii_round_trip() {
        let cloud = sample_cloud();
        for options in [PcdWriteOptions::default(), PcdWriteOptions::ascii()] {
            let mut buffer = Vec::new();
            RobustPcdWriter::write_point_cloud_to_writer(&cloud, &mut buffer, &options).unwrap();
            let loaded = read(&buffer).unwrap();
            assert_eq!(loaded, cloud, "{:?}", options.data_format);
        }
    }

    #[test]
    fn test_nan_points_dropped() {
        let content = b"VERSION 0.7
FIELDS x y z
SIZE 4 4 4
TYPE F F F
COUNT 1 1 1
WIDTH 2
HEIGHT 2
DATA ascii
0 0 0
nan nan nan
1 1 1
2 2 2
";
        let cloud = read(content).unwrap();
        assert_eq!(cloud.len(), 3);
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let missing_data = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1\nHEIGHT 1\n";
        assert!(matches!(read(missing_data), Err(Error::InvalidInput(_))));

        let mismatched = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4\nTYPE F F F\nWIDTH 1\nDATA ascii\n0 0 0\n";
        assert!(matches!(read(mismatched), Err(Error::InvalidInput(_))));

        let bad_type = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 3\nTYPE F F F\nWIDTH 1\nDATA ascii\n0 0 0\n";
        assert!(matches!(read(bad_type), Err(Error::InvalidInput(_))));

        let bad_points =
            b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 2\nPOINTS 3\nDATA ascii\n";
        assert!(matches!(read(bad_points), Err(Error::InvalidInput(_))));

        let no_z = b"VERSION 0.7\nFIELDS x y\nSIZE 4 4\nTYPE F F\nWIDTH 1\nDATA ascii\n0 0\n";
        assert!(matches!(read(no_z), Err(Error::InvalidInput(_))));

        let compressed =
            b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1\nDATA binary_compressed\n";
        assert!(matches!(read(compressed), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let overflowing = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 4294967296\nHEIGHT 4294967296\nPOINTS 1\nDATA ascii\n0 0 0\n";
        assert!(matches!(read(overflowing), Err(Error::InvalidInput(_))));

        let huge_count = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 18446744073709551615\nWIDTH 1\nDATA binary\n";
        assert!(matches!(read(huge_count), Err(Error::InvalidInput(_))));

        // Declared sizes far beyond the data end as truncated input
        let huge_ascii = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 18446744073709551615\nDATA ascii\n0 0 0\n1 1 1\n";
        assert!(matches!(read(huge_ascii), Err(Error::InvalidInput(_))));

        let mut huge_binary = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 18446744073709551615\nDATA binary\n".to_vec();
        huge_binary.extend_from_slice(&[0u8; 24]);
        assert!(matches!(read(&huge_binary), Err(Error::InvalidInput(_))));

        let empty_record = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 0 0 0\nWIDTH 18446744073709551615\nDATA binary\n";
        assert!(matches!(read(empty_record), Err(Error::InvalidInput(_))));

        let wide_record = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1099511627776\nWIDTH 1\nDATA binary\n\0\0\0\0";
        assert!(matches!(read(wide_record), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_truncated_data_rejected() {
        let short_ascii = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 3\nDATA ascii\n0 0 0\n";
        assert!(matches!(read(short_ascii), Err(Error::InvalidInput(_))));

        let mut short_binary =
            b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 2\nDATA binary\n".to_vec();
        short_binary.extend_from_slice(&[0u8; 16]);
        assert!(matches!(read(&short_binary), Err(Error::InvalidInput(_))));

        let bad_value = b"VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nWIDTH 1\nDATA ascii\n0 abc 0\n";
        assert!(matches!(read(bad_value), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rgb_packing() {
        assert_eq!(pack_rgb([0x12, 0x34, 0x56]), 0x0012_3456);
        assert_eq!(unpack_rgb(0xff12_3456), [0x12, 0x34, 0x56]);
    }
}

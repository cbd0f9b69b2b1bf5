//! I/O operations for attributed point clouds
//!
//! Reads and writes PCD and PLY files. The format is chosen from the file
//! extension.

pub mod pcd;
pub mod ply;

pub use pcd::{PcdDataFormat, PcdReader, PcdWriteOptions, PcdWriter, RobustPcdReader, RobustPcdWriter};
pub use ply::{PlyFormat, PlyReader, PlyWriter};

use cloudmend_core::{CloudPoint, Error, PointCloud, Result};
use std::path::Path;
use tracing::info;

/// Trait for reading point clouds from files
pub trait PointCloudReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud<CloudPoint>>;
}

/// Trait for writing point clouds to files
pub trait PointCloudWriter {
    fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud<CloudPoint>, path: P) -> Result<()>;
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pcd,
    Ply,
}

impl FileFormat {
    /// Detect the format from a path's extension (case-insensitive)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match extension.as_deref() {
            Some("pcd") => Ok(FileFormat::Pcd),
            Some("ply") => Ok(FileFormat::Ply),
            _ => Err(Error::UnsupportedFormat(format!(
                "unsupported point cloud format: {}",
                path.display()
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Pcd => "pcd",
            FileFormat::Ply => "ply",
        }
    }
}

/// Auto-detect format and read point cloud
pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud<CloudPoint>> {
    let path = path.as_ref();
    let cloud = match FileFormat::from_path(path)? {
        FileFormat::Pcd => PcdReader::read_point_cloud(path)?,
        FileFormat::Ply => PlyReader::read_point_cloud(path)?,
    };
    info!(path = %path.display(), points = cloud.len(), "loaded point cloud");
    Ok(cloud)
}

/// Auto-detect format and write point cloud
pub fn write_point_cloud<P: AsRef<Path>>(cloud: &PointCloud<CloudPoint>, path: P) -> Result<()> {
    let path = path.as_ref();
    match FileFormat::from_path(path)? {
        FileFormat::Pcd => PcdWriter::write_point_cloud(cloud, path)?,
        FileFormat::Ply => PlyWriter::write_point_cloud(cloud, path)?,
    }
    info!(path = %path.display(), points = cloud.len(), "saved point cloud");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cloudmend_core::{Point3f, Vector3f};
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cloudmend_io_{}_{}", std::process::id(), name))
    }

    fn colored_cloud() -> PointCloud<CloudPoint> {
        (0..50)
            .map(|i| {
                let t = i as f32 * 0.1;
                CloudPoint::with_color(Point3f::new(t.cos(), t.sin(), t), [i as u8, 200, 255 - i as u8])
                    .with_normal(Vector3f::new(t.cos(), t.sin(), 0.0))
            })
            .collect()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_path("scan.pcd").unwrap(), FileFormat::Pcd);
        assert_eq!(FileFormat::from_path("dir/scan.PLY").unwrap(), FileFormat::Ply);
        assert!(matches!(
            FileFormat::from_path("scan.obj"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(FileFormat::from_path("scan").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let cloud = colored_cloud();
        for name in ["round_trip.pcd", "round_trip.ply"] {
            let path = temp_path(name);
            write_point_cloud(&cloud, &path).unwrap();
            let loaded = read_point_cloud(&path).unwrap();
            let _ = fs::remove_file(&path);

            assert_eq!(loaded.len(), cloud.len());
            for (original, loaded) in cloud.iter().zip(loaded.iter()) {
                assert_relative_eq!(original.position, loaded.position);
                assert_eq!(original.color, loaded.color);
                assert_relative_eq!(original.normal.unwrap(), loaded.normal.unwrap());
            }
        }
    }

    #[test]
    fn test_positions_only_round_trip() {
        let cloud: PointCloud<CloudPoint> = (0..10)
            .map(|i| CloudPoint::from_xyz(i as f32, -(i as f32), 0.5))
            .collect();
        for name in ["plain.pcd", "plain.ply"] {
            let path = temp_path(name);
            write_point_cloud(&cloud, &path).unwrap();
            let loaded = read_point_cloud(&path).unwrap();
            let _ = fs::remove_file(&path);
            assert_eq!(loaded, cloud);
        }
    }

    #[test]
    fn test_missing_file() {
        let result = read_point_cloud(temp_path("does_not_exist.pcd"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let cloud = colored_cloud();
        assert!(matches!(
            write_point_cloud(&cloud, temp_path("cloud.xyz")),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}

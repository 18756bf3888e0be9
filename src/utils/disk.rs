//! Disk space queries for the export preflight

use std::io;
use std::path::Path;

/// Source of available-space figures for a destination directory.
///
/// The session consults this before an export starts; tests substitute a
/// fixed-size fake to exercise the preflight gate without a real volume.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes on the volume holding `dir`.
    fn available_space(&self, dir: &Path) -> io::Result<u64>;
}

/// Queries the actual filesystem.
pub struct VolumeSpaceProbe;

impl SpaceProbe for VolumeSpaceProbe {
    fn available_space(&self, dir: &Path) -> io::Result<u64> {
        fs2::available_space(dir)
    }
}

/// Resolve the directory whose volume will hold `dest`.
///
/// A bare filename has no parent component; fall back to the current
/// directory so the query still targets the right volume.
pub fn destination_dir(dest: &Path) -> &Path {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_dir_falls_back_to_cwd() {
        assert_eq!(destination_dir(Path::new("out.mp4")), Path::new("."));
        assert_eq!(
            destination_dir(Path::new("/exports/out.mp4")),
            Path::new("/exports")
        );
    }

    #[test]
    fn volume_probe_reports_space_for_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let space = VolumeSpaceProbe.available_space(dir.path()).unwrap();
        assert!(space > 0);
    }
}

//! Output path derivation and extension handling

use std::path::{Path, PathBuf};

/// Derive a default output path for an export.
///
/// `clip.mp4` at 8x becomes `clip_x8.mp4` (or `clip_x2.5.mov` for a
/// fractional speed under the fidelity tier), placed next to the input unless
/// an output directory is configured.
pub fn default_output_path(
    input: &Path,
    speed: f64,
    extension: &str,
    output_dir: Option<&Path>,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());

    let name = format!("{}_x{}.{}", stem, format_speed(speed), extension);

    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Replace the extension of `path`, returning the old extension when it
/// differed (so callers can warn about the forced change).
pub fn force_extension(path: &Path, extension: &str) -> (PathBuf, Option<String>) {
    let current = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    let forced = path.with_extension(extension);
    match current {
        Some(ext) if ext == extension => (forced, None),
        other => (forced, other),
    }
}

/// Format a speed multiplier for filenames: integral values lose the
/// trailing `.0`.
fn format_speed(speed: f64) -> String {
    if (speed - speed.round()).abs() < f64::EPSILON {
        format!("{}", speed.round() as i64)
    } else {
        format!("{}", speed)
    }
}

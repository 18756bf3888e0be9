//! Time parsing, formatting and timestamp conversion utilities

use ffmpeg_next::Rational;

use crate::error::{LapseError, LapseResult};

/// Parse a timecode string to seconds.
///
/// Accepted formats: plain seconds (`123.45`), `MM:SS.ms` (`2:30.5`) and
/// `HH:MM:SS.ms` (`1:02:30.5`).
pub fn parse_timecode(time_str: &str) -> LapseResult<f64> {
    let trimmed = time_str.trim();

    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds < 0.0 {
            return Err(LapseError::InvalidTimeFormat {
                time: time_str.to_string(),
            });
        }
        return Ok(seconds);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    match parts.len() {
        2 => {
            let minutes = parse_component(parts[0], time_str)?;
            let seconds = parse_component(parts[1], time_str)?;
            if seconds >= 60.0 {
                return Err(LapseError::InvalidTimeFormat {
                    time: time_str.to_string(),
                });
            }
            Ok(minutes * 60.0 + seconds)
        }
        3 => {
            let hours = parse_component(parts[0], time_str)?;
            let minutes = parse_component(parts[1], time_str)?;
            let seconds = parse_component(parts[2], time_str)?;
            if minutes >= 60.0 || seconds >= 60.0 {
                return Err(LapseError::InvalidTimeFormat {
                    time: time_str.to_string(),
                });
            }
            Ok(hours * 3600.0 + minutes * 60.0 + seconds)
        }
        _ => Err(LapseError::InvalidTimeFormat {
            time: time_str.to_string(),
        }),
    }
}

fn parse_component(part: &str, original: &str) -> LapseResult<f64> {
    part.parse::<f64>()
        .ok()
        .filter(|v| *v >= 0.0)
        .ok_or_else(|| LapseError::InvalidTimeFormat {
            time: original.to_string(),
        })
}

/// Format seconds as `HH:MM:SS.ms` (hours omitted when zero).
pub fn format_hms(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    let milliseconds = ((seconds % 1.0) * 1000.0).round() as u32;

    if hours > 0 {
        format!("{}:{:02}:{:02}.{:03}", hours, minutes, secs, milliseconds)
    } else {
        format!("{}:{:02}.{:03}", minutes, secs, milliseconds)
    }
}

/// Convert a PTS in `timebase` units to seconds.
pub fn pts_to_seconds(pts: i64, timebase: Rational) -> f64 {
    if timebase.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * timebase.numerator() as f64 / timebase.denominator() as f64
}

/// Convert seconds to a PTS in `timebase` units.
pub fn seconds_to_pts(seconds: f64, timebase: Rational) -> i64 {
    if timebase.numerator() == 0 {
        return 0;
    }
    (seconds * timebase.denominator() as f64 / timebase.numerator() as f64).round() as i64
}

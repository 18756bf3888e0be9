// Unit tests for domain models

use std::path::PathBuf;

use super::*;

fn test_asset() -> SourceAsset {
    SourceAsset {
        path: PathBuf::from("/media/input.mp4"),
        duration: 120.0,
        width: 1920,
        height: 1080,
        rotation: 0.0,
        frame_rate: 30.0,
        video_codec: "h264".to_string(),
        has_audio: true,
        file_size: 100_000_000,
    }
}

#[test]
fn time_range_defaults_to_full_source() {
    let range = TimeRange::resolve(None, None, 120.0).unwrap();
    assert_eq!(range.start(), 0.0);
    assert_eq!(range.duration(), 120.0);
    assert_eq!(range.end(), 120.0);
}

#[test]
fn time_range_returns_exactly_in_and_out_minus_in() {
    let range = TimeRange::resolve(Some(10.0), Some(70.0), 120.0).unwrap();
    assert_eq!(range.start(), 10.0);
    assert_eq!(range.duration(), 60.0);
}

#[test]
fn time_range_clamps_out_point_to_source_end() {
    let range = TimeRange::resolve(Some(100.0), Some(500.0), 120.0).unwrap();
    assert_eq!(range.start(), 100.0);
    assert_eq!(range.duration(), 20.0);
}

#[test]
fn time_range_rejects_inverted_selection() {
    let err = TimeRange::resolve(Some(70.0), Some(10.0), 120.0).unwrap_err();
    assert!(matches!(err, LapseError::InvalidTimeRange { .. }));

    // out == in is empty, also rejected
    let err = TimeRange::resolve(Some(10.0), Some(10.0), 120.0).unwrap_err();
    assert!(matches!(err, LapseError::InvalidTimeRange { .. }));
}

#[test]
fn time_range_rejects_too_short_selection() {
    let err = TimeRange::resolve(Some(10.0), Some(10.05), 120.0).unwrap_err();
    assert!(matches!(err, LapseError::InvalidTimeRange { .. }));

    // exactly the floor passes
    let range = TimeRange::resolve(Some(10.0), Some(10.1), 120.0).unwrap();
    assert!((range.duration() - 0.1).abs() < 1e-9);
}

#[test]
fn time_range_rejects_negative_or_out_of_bounds_in() {
    assert!(TimeRange::resolve(Some(-1.0), None, 120.0).is_err());
    assert!(TimeRange::resolve(Some(120.0), None, 120.0).is_err());
    assert!(TimeRange::resolve(Some(500.0), None, 120.0).is_err());
}

#[test]
fn time_range_rejects_empty_source() {
    assert!(TimeRange::resolve(None, None, 0.0).is_err());
}

#[test]
fn speed_enforces_export_window() {
    assert!(Speed::new(1.0).is_err());
    assert!(Speed::new(1.99).is_err());
    assert!(Speed::new(101.0).is_err());
    assert!(Speed::new(f64::NAN).is_err());

    assert_eq!(Speed::new(2.0).unwrap().get(), 2.0);
    assert_eq!(Speed::new(100.0).unwrap().get(), 100.0);
}

#[test]
fn quality_tier_implies_container() {
    assert_eq!(QualityTier::Efficient.container_extension(), "mp4");
    assert_eq!(QualityTier::Fidelity.container_extension(), "mov");
    assert!(QualityTier::Fidelity.size_ratio() > QualityTier::Efficient.size_ratio());
}

#[test]
fn resolution_preset_boxes() {
    assert_eq!(ResolutionPreset::Source.target_box(), None);
    assert_eq!(ResolutionPreset::Hd1080.target_box(), Some((1920, 1080)));
    assert_eq!(ResolutionPreset::Uhd4k.target_box(), Some((3840, 2160)));
}

#[test]
fn job_resolves_range_and_output_duration() {
    let job = ExportJob::new(
        test_asset(),
        5.0,
        ExportSettings::default(),
        PathBuf::from("/out/tl.mp4"),
        Some(10.0),
        Some(70.0),
    )
    .unwrap();

    assert_eq!(job.range.start(), 10.0);
    assert_eq!(job.range.duration(), 60.0);
    assert!((job.output_duration() - 12.0).abs() < 1e-9);
}

#[test]
fn job_rejects_bad_speed_before_anything_else() {
    let err = ExportJob::new(
        test_asset(),
        1.5,
        ExportSettings::default(),
        PathBuf::from("/out/tl.mp4"),
        None,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, LapseError::InvalidSpeed { .. }));
}

#[test]
fn asset_fraction_of_range() {
    let asset = test_asset();
    let range = TimeRange::resolve(Some(0.0), Some(30.0), 120.0).unwrap();
    assert!((asset.fraction_of(&range) - 0.25).abs() < 1e-9);
}

//! Interval preview rendering: a classification band chart over the ride
//! timeline, written as a PNG. Compiled only with the `charts` feature.

use std::path::Path;

use plotters::prelude::*;

use crate::error::{AnalyticsError, Result};
use crate::intervals::{Classification, IntervalDetectionResult};

fn band_color(classification: Classification) -> RGBColor {
    match classification {
        Classification::Recovery => RGBColor(176, 196, 222),
        Classification::Endurance => RGBColor(92, 184, 92),
        Classification::Tempo => RGBColor(240, 173, 78),
        Classification::Threshold => RGBColor(249, 199, 79),
        Classification::Vo2max => RGBColor(249, 132, 74),
        Classification::Anaerobic => RGBColor(249, 65, 68),
        Classification::Sprint => RGBColor(156, 39, 176),
        _ => RGBColor(204, 204, 204),
    }
}

fn band_height(classification: Classification) -> f64 {
    match classification {
        Classification::Recovery => 0.25,
        Classification::Endurance => 0.4,
        Classification::Tempo => 0.55,
        Classification::Threshold => 0.7,
        Classification::Vo2max => 0.82,
        Classification::Anaerobic => 0.92,
        Classification::Sprint => 1.0,
        _ => 0.3,
    }
}

/// Render the detection result as an intensity band chart
pub fn render_interval_preview(
    result: &IntervalDetectionResult,
    output_path: &Path,
) -> Result<()> {
    if result.intervals.is_empty() {
        return Ok(());
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let x_max = result
        .intervals
        .last()
        .map(|i| i.end as f64)
        .unwrap_or(1.0)
        .max(1.0);

    let root = BitMapBackend::new(output_path, (1200, 350)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| AnalyticsError::Internal(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(30)
        .build_cartesian_2d(0.0..x_max, 0.0..1.1)
        .map_err(|e| AnalyticsError::Internal(e.to_string()))?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .x_desc("Time (s)")
        .draw()
        .map_err(|e| AnalyticsError::Internal(e.to_string()))?;

    chart
        .draw_series(result.intervals.iter().map(|interval| {
            let color = band_color(interval.classification);
            Rectangle::new(
                [
                    (interval.start as f64, 0.0),
                    (interval.end as f64, band_height(interval.classification)),
                ],
                color.filled(),
            )
        }))
        .map_err(|e| AnalyticsError::Internal(e.to_string()))?;

    root.present()
        .map_err(|e| AnalyticsError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::detect_intervals;
    use tempfile::TempDir;

    #[test]
    fn test_preview_written() {
        let power = vec![180i64; 600];
        let timestamps: Vec<i64> = (0..600).collect();
        let result = detect_intervals(&timestamps, &power, Some(250.0), None, None, None, None);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preview.png");
        render_interval_preview(&result, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_result_is_noop() {
        let result = detect_intervals(&[], &[], Some(250.0), None, None, None, None);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preview.png");
        render_interval_preview(&result, &path).unwrap();
        assert!(!path.exists());
    }
}

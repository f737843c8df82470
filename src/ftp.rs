//! FTP estimation from an athlete's historical best-power curve.
//!
//! Blends three complementary estimators: a 20-minute quick estimate, a
//! critical-power fit over a duration grid, and a long-duration anchor.
//! Weights shift toward the long anchor as curve coverage grows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Durations sampled for the critical-power fit, in seconds
const DURATION_GRID: [usize; 10] = [120, 180, 300, 480, 720, 900, 1200, 1800, 2400, 3600];

/// Long-duration anchors tried longest-first: (duration, scale factor)
const LONG_ANCHORS: [(usize, f64); 6] = [
    (3600, 1.00),
    (3000, 0.97),
    (2700, 0.965),
    (2400, 0.96),
    (2100, 0.955),
    (1800, 0.95),
];

/// Result of an FTP estimation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpEstimate {
    pub ftp: Option<f64>,
    pub components: HashMap<String, Option<f64>>,
    pub weights: HashMap<String, f64>,
    pub coverage: HashMap<String, bool>,

    /// "reliable" | "medium" | "low" | "none"
    pub confidence: String,
    pub notes: Option<String>,
}

impl FtpEstimate {
    fn unavailable(notes: &str) -> Self {
        let keys = ["FTP_A", "FTP_B", "FTP_C"];
        Self {
            ftp: None,
            components: keys.iter().map(|k| (k.to_string(), None)).collect(),
            weights: keys.iter().map(|k| (k.to_string(), 0.0)).collect(),
            coverage: [("cov20", false), ("cov40", false), ("cov60", false)]
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            confidence: "none".to_string(),
            notes: Some(notes.to_string()),
        }
    }

    /// Blended FTP rounded to whole watts
    pub fn rounded_ftp(&self) -> Option<f64> {
        self.ftp.map(|f| f.round())
    }
}

fn mmp_at(curve: &[f64], duration: usize) -> Option<f64> {
    if duration == 0 {
        return None;
    }
    curve.get(duration - 1).copied()
}

/// Least-squares fit of `work = CP * t + W'` over the curve's duration
/// grid, with one refit after discarding residuals beyond two standard
/// deviations.
fn fit_cp(durations: &[f64], powers: &[f64]) -> Option<(f64, f64)> {
    if durations.len() < 2 {
        return None;
    }
    let work: Vec<f64> = powers
        .iter()
        .zip(durations.iter())
        .map(|(p, t)| p * t)
        .collect();

    let solve = |ts: &[f64], ys: &[f64]| -> Option<(f64, f64)> {
        let n = ts.len() as f64;
        let mean_t = ts.iter().mean();
        let mean_y = ys.iter().mean();
        let var_t: f64 = ts.iter().map(|t| (t - mean_t).powi(2)).sum::<f64>() / n;
        if var_t == 0.0 {
            return None;
        }
        let cov: f64 = ts
            .iter()
            .zip(ys.iter())
            .map(|(t, y)| (t - mean_t) * (y - mean_y))
            .sum::<f64>()
            / n;
        let cp = cov / var_t;
        let w_prime = mean_y - cp * mean_t;
        Some((cp, w_prime))
    };

    let (mut cp, mut w_prime) = solve(durations, &work)?;

    let residuals: Vec<f64> = work
        .iter()
        .zip(durations.iter())
        .map(|(w, t)| w - (cp * t + w_prime))
        .collect();
    let std = residuals.iter().population_std_dev();
    if std > 0.0 {
        let kept: Vec<(f64, f64)> = durations
            .iter()
            .zip(work.iter())
            .zip(residuals.iter())
            .filter(|((_, _), r)| r.abs() <= 2.0 * std)
            .map(|((t, w), _)| (*t, *w))
            .collect();
        if kept.len() >= 2 && kept.len() != durations.len() {
            let ts: Vec<f64> = kept.iter().map(|(t, _)| *t).collect();
            let ys: Vec<f64> = kept.iter().map(|(_, w)| *w).collect();
            if let Some(refit) = solve(&ts, &ys) {
                cp = refit.0;
                w_prime = refit.1;
            }
        }
    }
    Some((cp, w_prime))
}

/// Prefer actual long-duration observations, else project the CP model to
/// 60 minutes.
fn long_duration_component(curve: &[f64], cp_fit: Option<(f64, f64)>) -> Option<f64> {
    for &(duration, factor) in &LONG_ANCHORS {
        if let Some(mmp) = mmp_at(curve, duration) {
            if mmp > 0.0 {
                return Some(mmp * factor);
            }
        }
    }
    if let Some((cp, w_prime)) = cp_fit {
        return Some((cp * 3600.0 + w_prime) / 3600.0);
    }
    None
}

fn confidence_label(curve: &[f64]) -> &'static str {
    if curve.len() >= 1800 {
        "reliable"
    } else if curve.len() >= 900 {
        "medium"
    } else {
        "low"
    }
}

/// Estimate FTP from a best-power curve (`curve[t-1]` is the t-second MMP).
/// Returns an unavailable estimate when the curve is absent or empty.
pub fn estimate_ftp(curve: Option<&[i64]>) -> FtpEstimate {
    let curve: Vec<f64> = match curve {
        Some(c) if !c.is_empty() => c.iter().map(|v| *v as f64).collect(),
        _ => return FtpEstimate::unavailable("best power curve not found"),
    };

    let cov20 = curve.len() >= 1200;
    let cov40 = curve.len() >= 2400;
    let cov60 = curve.len() >= 3600;

    let ftp_a = mmp_at(&curve, 1200).map(|p| p * 0.95);

    let mut grid_durations = Vec::new();
    let mut grid_powers = Vec::new();
    for &sec in &DURATION_GRID {
        if let Some(p) = mmp_at(&curve, sec) {
            grid_durations.push(sec as f64);
            grid_powers.push(p);
        }
    }
    let cp_fit = fit_cp(&grid_durations, &grid_powers);
    let ftp_b = cp_fit.map(|(cp, _)| cp);
    let ftp_c = long_duration_component(&curve, cp_fit);

    let raw_weights: [(&str, f64); 3] = if cov40 || cov60 {
        [("FTP_A", 0.1), ("FTP_B", 0.4), ("FTP_C", 0.5)]
    } else if cov20 {
        [("FTP_A", 0.3), ("FTP_B", 0.5), ("FTP_C", 0.2)]
    } else {
        [("FTP_A", 0.4), ("FTP_B", 0.6), ("FTP_C", 0.0)]
    };

    let components: HashMap<String, Option<f64>> = [
        ("FTP_A".to_string(), ftp_a),
        ("FTP_B".to_string(), ftp_b),
        ("FTP_C".to_string(), ftp_c),
    ]
    .into_iter()
    .collect();

    let valid: Vec<&str> = raw_weights
        .iter()
        .filter(|(k, _)| components.get(*k).copied().flatten().is_some())
        .map(|(k, _)| *k)
        .collect();

    let mut weights: HashMap<String, f64> =
        raw_weights.iter().map(|(k, _)| (k.to_string(), 0.0)).collect();
    let blended = if valid.is_empty() {
        None
    } else {
        let total: f64 = raw_weights
            .iter()
            .filter(|(k, _)| valid.contains(k))
            .map(|(_, w)| w)
            .sum();
        if total > 0.0 {
            for (k, w) in &raw_weights {
                if valid.contains(k) {
                    weights.insert(k.to_string(), w / total);
                }
            }
        } else {
            let base = 1.0 / valid.len() as f64;
            for k in &valid {
                weights.insert(k.to_string(), base);
            }
        }
        Some(
            valid
                .iter()
                .map(|k| components[*k].unwrap_or(0.0) * weights[*k])
                .sum(),
        )
    };

    let mut notes = vec![if cov60 {
        ">=60min coverage"
    } else if cov40 {
        ">=40min coverage"
    } else if cov20 {
        ">=20min coverage only"
    } else {
        "shorter than 20min curve"
    }
    .to_string()];
    if ftp_b.is_none() {
        notes.push("CP fit unavailable".to_string());
    }

    FtpEstimate {
        ftp: blended,
        components,
        weights,
        coverage: [
            ("cov20".to_string(), cov20),
            ("cov40".to_string(), cov40),
            ("cov60".to_string(), cov60),
        ]
        .into_iter()
        .collect(),
        confidence: confidence_label(&curve).to_string(),
        notes: Some(notes.join("; ")),
    }
}

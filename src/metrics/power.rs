//! Power metric section: averages, NP/IF/VI, total work, work above FTP,
//! W' balance decline.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricInputs;
use crate::power::{normalized_power, w_balance_decline, work_above_ftp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerInfo {
    pub avg_power: Option<i64>,
    pub max_power: Option<i64>,
    pub normalized_power: Option<i64>,

    /// NP / FTP, two decimals
    pub intensity_factor: Option<f64>,

    /// kJ
    pub total_work: Option<i64>,

    /// NP / average power, two decimals
    pub variability_index: Option<f64>,
    pub weighted_average_power: Option<i64>,

    /// kJ above FTP
    pub work_above_ftp: Option<i64>,

    /// Estimated FTP from this ride; reserved
    pub eftp: Option<i64>,
    pub w_balance_decline: Option<f64>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn compute_power_info(inputs: &MetricInputs<'_>) -> Option<PowerInfo> {
    let table = inputs.table;
    let valid: Vec<i64> = table.power.iter().copied().filter(|p| *p > 0).collect();
    if valid.is_empty() {
        return None;
    }
    let session = inputs.session;

    let avg_power = session
        .and_then(|s| s.avg_power)
        .unwrap_or_else(|| valid.iter().sum::<i64>() / valid.len() as i64);
    let max_power = session
        .and_then(|s| s.max_power)
        .unwrap_or_else(|| *valid.iter().max().expect("non-empty"));

    // threshold-relative metrics are meaningless without a valid FTP
    let ftp = inputs.ftp();
    let np = ftp.map(|_| normalized_power(&valid));

    Some(PowerInfo {
        avg_power: Some(avg_power),
        max_power: Some(max_power),
        normalized_power: np,
        intensity_factor: match (np, ftp) {
            (Some(np), Some(ftp)) => Some(round2(np as f64 / ftp)),
            _ => None,
        },
        total_work: Some((valid.iter().sum::<i64>() as f64 / 1000.0).round() as i64),
        variability_index: np.filter(|_| avg_power > 0).map(|np| round2(np as f64 / avg_power as f64)),
        weighted_average_power: inputs.weighted_average_watts,
        work_above_ftp: ftp.map(|f| work_above_ftp(&valid, f)),
        eftp: None,
        w_balance_decline: if table.w_balance.is_empty() {
            None
        } else {
            w_balance_decline(&table.w_balance)
        },
    })
}

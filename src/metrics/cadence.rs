//! Cadence metric section. Pedal-balance fields are reported but unfilled
//! until dual-sided sources land.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricInputs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceInfo {
    pub avg_cadence: Option<i64>,
    pub max_cadence: Option<i64>,
    pub left_right_balance: Option<f64>,
    pub left_torque_effectiveness: Option<f64>,
    pub right_torque_effectiveness: Option<f64>,
    pub left_pedal_smoothness: Option<f64>,
    pub right_pedal_smoothness: Option<f64>,

    /// Total crank revolutions, integrated from rpm
    pub total_strokes: Option<i64>,
}

pub fn compute_cadence_info(inputs: &MetricInputs<'_>) -> Option<CadenceInfo> {
    let table = inputs.table;
    if table.cadence.is_empty() {
        return None;
    }
    let session = inputs.session;
    let cadence = &table.cadence;

    let avg_cadence = session
        .and_then(|s| s.avg_cadence)
        .unwrap_or_else(|| cadence.iter().sum::<i64>() / cadence.len() as i64);
    let max_cadence = session
        .and_then(|s| s.max_cadence)
        .unwrap_or_else(|| *cadence.iter().max().expect("non-empty"));

    let total_strokes = cadence.iter().sum::<i64>() / 60;

    Some(CadenceInfo {
        avg_cadence: Some(avg_cadence),
        max_cadence: Some(max_cadence),
        left_right_balance: None,
        left_torque_effectiveness: None,
        right_torque_effectiveness: None,
        left_pedal_smoothness: None,
        right_pedal_smoothness: None,
        total_strokes: Some(total_strokes),
    })
}

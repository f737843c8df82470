//! Derived stream computation: VAM, torque, SPI, power/HR ratio, W'
//! balance, and the best-power curve.
//!
//! Each column is computed only when its inputs are available and the
//! column is still absent, so tables that already carry a derived stream
//! (e.g. decoded from the recording) keep it untouched.

use std::f64::consts::PI;

use crate::models::AthleteProfile;
use crate::power::best_power_curve;
use crate::sample_table::SampleTable;

/// Look-back window for the VAM computation, in seconds
const VAM_WINDOW_SECONDS: i64 = 50;

/// W' reconstitution time constant, in seconds
const W_PRIME_TAU: f64 = 546.0;

/// Watts per bpm where both are positive, else 0; two decimals
pub fn power_hr_ratio(power: &[i64], heartrate: &[i64]) -> Vec<f64> {
    power
        .iter()
        .zip(heartrate.iter())
        .map(|(&p, &hr)| {
            if p > 0 && hr > 0 {
                ((p as f64 / hr as f64) * 100.0).round() / 100.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Watts per revolution where both are positive, else 0; two decimals
pub fn spi(power: &[i64], cadence: &[i64]) -> Vec<f64> {
    power
        .iter()
        .zip(cadence.iter())
        .map(|(&p, &cad)| {
            if p > 0 && cad > 0 {
                ((p as f64 / cad as f64) * 100.0).round() / 100.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Crank torque in N·m: `P / (cadence * 2π/60)`, else 0
pub fn torque(power: &[i64], cadence: &[i64]) -> Vec<i64> {
    power
        .iter()
        .zip(cadence.iter())
        .map(|(&p, &cad)| {
            if p > 0 && cad > 0 {
                (p as f64 / (cad as f64 * 2.0 * PI / 60.0)).round() as i64
            } else {
                0
            }
        })
        .collect()
}

/// Vertical ascent rate in m/h over a 50-second look-back window, scaled by
/// 1.4 and clamped to [-5000, 5000] (out-of-range values report 0).
pub fn vam(time: &[i64], altitude: &[f64]) -> Vec<i64> {
    let n = time.len().min(altitude.len());
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let window_start = time[i] - VAM_WINDOW_SECONDS;
        let mut idx_start = i;
        while idx_start > 0 && time[idx_start] > window_start {
            idx_start -= 1;
        }
        if idx_start == i {
            out.push(0);
            continue;
        }
        let delta_alt = altitude[i] - altitude[idx_start];
        let delta_time = time[i] - time[idx_start];
        if delta_time <= 0 {
            out.push(0);
            continue;
        }
        let value = (delta_alt / (delta_time as f64 / 3600.0) * 1.4).round() as i64;
        out.push(if (-5000..=5000).contains(&value) {
            value
        } else {
            0
        });
    }
    out
}

/// Simplified Skiba W' balance in kJ with one decimal.
///
/// Per 1 Hz step: expend `(P - CP)` above 1.05·CP, recover
/// `(W' - balance)/τ` below 0.95·CP, clamp to [0, W']. All zeros when FTP
/// or W' is not positive.
pub fn w_balance(power: &[i64], ftp: Option<f64>, w_prime: Option<f64>) -> Vec<f64> {
    if power.is_empty() {
        return Vec::new();
    }
    let (cp, w_prime) = match (ftp, w_prime) {
        (Some(cp), Some(wp)) if cp > 0.0 && wp > 0.0 => (cp, wp),
        _ => return vec![0.0; power.len()],
    };

    let mut balance = w_prime;
    let mut out = Vec::with_capacity(power.len());
    for &p in power {
        let p = p.max(0) as f64;
        if p > cp * 1.05 {
            balance -= p - cp;
        } else if p < cp * 0.95 {
            balance += (w_prime - balance) / W_PRIME_TAU;
        }
        balance = balance.clamp(0.0, w_prime);
        out.push((balance / 1000.0 * 10.0).round() / 10.0);
    }
    out
}

/// Fill every absent derived column whose inputs are present
pub fn enrich(table: &mut SampleTable, athlete: Option<&AthleteProfile>) {
    let has_power = table.power.iter().any(|p| *p != 0);
    let has_hr = table.heart_rate.iter().any(|h| *h != 0);
    let has_cadence = table.cadence.iter().any(|c| *c != 0);
    let has_altitude = table.altitude.iter().any(|a| *a != 0.0);

    if table.power_hr_ratio.is_empty() && has_power && has_hr {
        table.power_hr_ratio = power_hr_ratio(&table.power, &table.heart_rate);
    }
    if table.spi.is_empty() && has_power && has_cadence {
        table.spi = spi(&table.power, &table.cadence);
    }
    if table.torque.is_empty() && has_power && has_cadence {
        table.torque = torque(&table.power, &table.cadence);
    }
    if table.vam.is_empty() && has_altitude && !table.time.is_empty() {
        table.vam = vam(&table.time, &table.altitude);
    }
    if table.w_balance.is_empty() && has_power {
        let (ftp, w_prime) = athlete
            .map(|a| (a.ftp, a.w_prime))
            .unwrap_or((None, None));
        table.w_balance = w_balance(&table.power, ftp, w_prime);
    }
    if table.best_power.is_empty() && has_power {
        table.best_power = best_power_curve(&table.power);
    }
}

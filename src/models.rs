use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stream resolutions a caller may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Low,
    Medium,
    High,
}

impl Resolution {
    /// Fraction of points kept at this resolution
    pub fn sample_fraction(self) -> f64 {
        match self {
            Resolution::Low => 0.05,
            Resolution::Medium => 0.25,
            Resolution::High => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Low => "low",
            Resolution::Medium => "medium",
            Resolution::High => "high",
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Resolution::Low),
            "medium" => Ok(Resolution::Medium),
            "high" => Ok(Resolution::High),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Athlete profile consumed by the analytics engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    pub id: i64,

    /// Functional threshold power in watts
    pub ftp: Option<f64>,

    /// Anaerobic work capacity W' in joules (stored as `w_balance` in the DB)
    pub w_prime: Option<f64>,

    /// Maximum heart rate in bpm
    pub max_heartrate: Option<i64>,

    /// Lactate threshold heart rate in bpm
    pub threshold_heartrate: Option<i64>,

    /// When true, heart-rate zones use LTHR instead of max HR
    pub is_threshold_active: bool,

    /// Body weight in kilograms
    pub weight: Option<f64>,

    /// Acute training load (fatigue)
    pub atl: Option<i64>,

    /// Chronic training load (fitness)
    pub ctl: Option<i64>,

    /// Training stress balance (form)
    pub tsb: Option<i64>,
}

impl AthleteProfile {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ftp: None,
            w_prime: None,
            max_heartrate: None,
            threshold_heartrate: None,
            is_threshold_active: false,
            weight: None,
            atl: None,
            ctl: None,
            tsb: None,
        }
    }

    /// FTP when present and positive
    pub fn effective_ftp(&self) -> Option<f64> {
        self.ftp.filter(|f| *f > 0.0)
    }
}

/// Activity row mutated on each successful analytics run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub external_id: Option<i64>,
    pub athlete_id: Option<i64>,

    /// Download URL of the uploaded binary recording
    pub upload_fit_url: Option<String>,

    pub tss: Option<i64>,
    pub tss_updated: bool,
    pub efficiency_factor: Option<f64>,
    pub start_date: Option<NaiveDateTime>,
}

impl ActivityRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            external_id: None,
            athlete_id: None,
            upload_fit_url: None,
            tss: None,
            tss_updated: false,
            efficiency_factor: None,
            start_date: None,
        }
    }
}

/// Pre-aggregated totals decoded from the recording's session message.
///
/// When present, metric assembly prefers these values over re-aggregating the
/// sample streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Total distance in meters
    pub total_distance: Option<f64>,

    /// Moving time in seconds (timer time excludes pauses)
    pub total_timer_time: Option<i64>,

    /// Wall-clock duration in seconds
    pub total_elapsed_time: Option<i64>,

    /// Average speed in m/s
    pub avg_speed: Option<f64>,

    /// Maximum speed in m/s
    pub max_speed: Option<f64>,

    pub total_ascent: Option<i64>,
    pub total_descent: Option<i64>,
    pub avg_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
    pub avg_power: Option<i64>,
    pub max_power: Option<i64>,
    pub avg_cadence: Option<i64>,
    pub max_cadence: Option<i64>,
    pub max_altitude: Option<i64>,
    pub total_calories: Option<i64>,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        *self == SessionSummary::default()
    }
}

/// A promotion into an athlete's top-3 for one record category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// e.g. "best_power_5s", "longest_ride", "max_elevation_gain"
    pub segment_name: String,
    pub current_value: i64,

    /// 1-based rank the new value landed at
    pub rank: u8,
    pub activity_id: i64,

    /// "power" | "distance" | "elevation"
    pub record_type: String,

    /// "W" | "m"
    pub unit: String,
    pub previous_record: Option<i64>,
    pub improvement: i64,
}

/// Athlete-wide best-power curve as returned in responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPowerCurveRecord {
    pub athlete_id: i64,
    pub length: usize,
    pub best_curve: Vec<i64>,
}

/// One row of tb_athlete_daily_state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyState {
    pub athlete_id: i64,
    pub date: NaiveDate,
    pub fitness: f64,
    pub fatigue: f64,
    pub daily_status: f64,
}

/// Stored OAuth credentials for a device paired to an athlete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OauthToken {
    pub device_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub update_time: NaiveDateTime,
}

impl OauthToken {
    /// Tokens older than six hours must be refreshed before use
    pub fn is_stale(&self, now: NaiveDateTime) -> bool {
        now - self.update_time > chrono::Duration::hours(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("high".parse::<Resolution>().unwrap(), Resolution::High);
        assert_eq!("MEDIUM".parse::<Resolution>().unwrap(), Resolution::Medium);
        assert!("ultra".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_effective_ftp() {
        let mut athlete = AthleteProfile::new(1);
        assert_eq!(athlete.effective_ftp(), None);
        athlete.ftp = Some(0.0);
        assert_eq!(athlete.effective_ftp(), None);
        athlete.ftp = Some(250.0);
        assert_eq!(athlete.effective_ftp(), Some(250.0));
    }

    #[test]
    fn test_oauth_staleness_boundary() {
        let update = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let token = OauthToken {
            device_id: 1,
            access_token: "a".into(),
            refresh_token: "r".into(),
            update_time: update,
        };
        let at_limit = update + chrono::Duration::hours(6);
        assert!(!token.is_stale(at_limit));
        assert!(token.is_stale(at_limit + chrono::Duration::seconds(1)));
    }
}

//! Athlete training-load rollup: ATL (fatigue), CTL (fitness), and TSB
//! (form) from persisted per-activity TSS.
//!
//! Windows are anchored at a reference time: the activity's start time when
//! rolling up after an analysis run, the current time (or end of a past
//! day) for daily-state updates.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::Database;
use crate::error::{DatabaseError, Result};
use crate::models::DailyState;

/// Rolled-up training load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupMetrics {
    /// Acute training load: 7-day TSS mean
    pub atl: i64,

    /// Chronic training load: 42-day TSS mean
    pub ctl: i64,

    /// Training stress balance: ctl - atl
    pub tsb: i64,
}

/// Training Stress Balance interpretation ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsbInterpretation {
    VeryFresh,    // +25 and above
    Fresh,        // +5 to +25
    Neutral,      // -10 to +5
    Fatigued,     // -30 to -10
    VeryFatigued, // below -30
}

impl TsbInterpretation {
    pub fn from_tsb(tsb: i64) -> Self {
        if tsb >= 25 {
            TsbInterpretation::VeryFresh
        } else if tsb >= 5 {
            TsbInterpretation::Fresh
        } else if tsb >= -10 {
            TsbInterpretation::Neutral
        } else if tsb >= -30 {
            TsbInterpretation::Fatigued
        } else {
            TsbInterpretation::VeryFatigued
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TsbInterpretation::VeryFresh => "Very fresh (may be losing fitness)",
            TsbInterpretation::Fresh => "Fresh and ready for hard training",
            TsbInterpretation::Neutral => "Neutral (normal training)",
            TsbInterpretation::Fatigued => "Fatigued (monitor closely)",
            TsbInterpretation::VeryFatigued => "Very fatigued (rest needed)",
        }
    }
}

/// Raw window sums for a reference time
fn window_sums(
    db: &mut Database,
    athlete_id: i64,
    reference: NaiveDateTime,
) -> std::result::Result<(f64, f64), DatabaseError> {
    let sum7 = db.sum_tss_in_window(athlete_id, reference - Duration::days(7), reference)?;
    let sum42 = db.sum_tss_in_window(athlete_id, reference - Duration::days(42), reference)?;
    Ok((sum7 as f64, sum42 as f64))
}

/// Compute the rollup for an athlete at a reference time without persisting
pub fn compute_rollup(
    db: &mut Database,
    athlete_id: i64,
    reference: NaiveDateTime,
) -> Result<RollupMetrics> {
    let (sum7, sum42) = window_sums(db, athlete_id, reference)?;
    let atl = (sum7 / 7.0).round() as i64;
    let ctl = (sum42 / 42.0).round() as i64;
    Ok(RollupMetrics {
        atl,
        ctl,
        tsb: ctl - atl,
    })
}

/// Compute and persist atl/ctl/tsb on the athlete row. Returns the TSB for
/// response surfacing.
pub fn update_athlete_status(
    db: &mut Database,
    athlete_id: i64,
    reference: NaiveDateTime,
) -> Result<RollupMetrics> {
    let rollup = compute_rollup(db, athlete_id, reference)?;
    db.update_athlete_load(athlete_id, rollup.atl, rollup.ctl, rollup.tsb)?;
    info!(
        athlete_id,
        atl = rollup.atl,
        ctl = rollup.ctl,
        tsb = rollup.tsb,
        "athlete load updated"
    );
    Ok(rollup)
}

/// Daily-state rollup for an arbitrary date, persisted to
/// tb_athlete_daily_state with float fitness/fatigue. A past date anchors
/// at its last second; today anchors at `now`.
pub fn update_daily_state(
    db: &mut Database,
    athlete_id: i64,
    target_date: NaiveDate,
    now: NaiveDateTime,
) -> Result<DailyState> {
    if db.get_athlete(athlete_id)?.is_none() {
        return Err(crate::error::AnalyticsError::NotFound(format!(
            "athlete {}",
            athlete_id
        )));
    }

    let reference = if target_date == now.date() {
        now
    } else {
        target_date
            .and_hms_opt(23, 59, 59)
            .expect("valid end-of-day time")
    };

    let (sum7, sum42) = window_sums(db, athlete_id, reference)?;
    let fatigue = sum7 / 7.0;
    let fitness = sum42 / 42.0;
    let state = DailyState {
        athlete_id,
        date: target_date,
        fitness,
        fatigue,
        daily_status: fitness - fatigue,
    };
    db.upsert_daily_state(&state)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityRecord, AthleteProfile};

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn seed_activities(db: &mut Database, entries: &[(i64, NaiveDateTime, i64)]) {
        db.upsert_athlete(&AthleteProfile::new(1)).unwrap();
        for (id, start, tss) in entries {
            db.upsert_activity(&ActivityRecord {
                athlete_id: Some(1),
                start_date: Some(*start),
                tss: Some(*tss),
                ..ActivityRecord::new(*id)
            })
            .unwrap();
        }
    }

    #[test]
    fn test_rollup_windows() {
        let mut db = Database::in_memory().unwrap();
        seed_activities(
            &mut db,
            &[
                (1, dt(2025, 3, 9), 70),   // inside 7d window
                (2, dt(2025, 3, 5), 140),  // inside 7d window
                (3, dt(2025, 2, 1), 420),  // inside 42d window only
                (4, dt(2024, 12, 1), 999), // outside both
                (5, dt(2025, 3, 11), 50),  // after the reference: excluded
            ],
        );

        let rollup = compute_rollup(&mut db, 1, dt(2025, 3, 10)).unwrap();
        // atl = round(210/7) = 30; ctl = round(630/42) = 15
        assert_eq!(rollup.atl, 30);
        assert_eq!(rollup.ctl, 15);
        assert_eq!(rollup.tsb, -15);
    }

    #[test]
    fn test_rollup_excludes_non_positive_tss() {
        let mut db = Database::in_memory().unwrap();
        seed_activities(&mut db, &[(1, dt(2025, 3, 9), 70), (2, dt(2025, 3, 8), 0)]);
        let rollup = compute_rollup(&mut db, 1, dt(2025, 3, 10)).unwrap();
        assert_eq!(rollup.atl, 10);
    }

    #[test]
    fn test_update_athlete_status_persists() {
        let mut db = Database::in_memory().unwrap();
        seed_activities(&mut db, &[(1, dt(2025, 3, 9), 140)]);
        let rollup = update_athlete_status(&mut db, 1, dt(2025, 3, 10)).unwrap();
        let athlete = db.get_athlete(1).unwrap().unwrap();
        assert_eq!(athlete.atl, Some(rollup.atl));
        assert_eq!(athlete.ctl, Some(rollup.ctl));
        assert_eq!(athlete.tsb, Some(rollup.tsb));
    }

    #[test]
    fn test_daily_state_past_date_anchors_end_of_day() {
        let mut db = Database::in_memory().unwrap();
        // activity at 09:00 on 3/10 counts for the 3/10 daily state even
        // though `now` is a later day
        seed_activities(&mut db, &[(1, dt(2025, 3, 10), 70)]);
        let state = update_daily_state(
            &mut db,
            1,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            dt(2025, 3, 20),
        )
        .unwrap();
        assert!((state.fatigue - 10.0).abs() < 1e-9);
        assert!((state.daily_status - (70.0 / 42.0 - 10.0)).abs() < 1e-9);

        let stored = db
            .get_daily_state(1, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.fitness, state.fitness);
    }

    #[test]
    fn test_daily_state_unknown_athlete() {
        let mut db = Database::in_memory().unwrap();
        let err = update_daily_state(
            &mut db,
            99,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            dt(2025, 3, 10),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_tsb_interpretation() {
        assert_eq!(TsbInterpretation::from_tsb(30), TsbInterpretation::VeryFresh);
        assert_eq!(TsbInterpretation::from_tsb(10), TsbInterpretation::Fresh);
        assert_eq!(TsbInterpretation::from_tsb(0), TsbInterpretation::Neutral);
        assert_eq!(TsbInterpretation::from_tsb(-20), TsbInterpretation::Fatigued);
        assert_eq!(
            TsbInterpretation::from_tsb(-40),
            TsbInterpretation::VeryFatigued
        );
    }
}

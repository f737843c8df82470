//! SQLite persistence: activities, athletes, personal records, the result
//! cache index, daily state, and OAuth tokens.
//!
//! Every public method is a complete repository call: it either commits its
//! effect or leaves the database untouched. The service layer serializes
//! access through a mutex, so methods take `&mut self`.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::DatabaseError;
use crate::models::{ActivityRecord, AthleteProfile, DailyState, OauthToken};
use crate::power::RECORD_WINDOWS;
use crate::records::{PowerRecordsRow, TopThree};

const RANK_SUFFIXES: [&str; 3] = ["1st", "2nd", "3rd"];

/// One row of the result-cache index
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub activity_id: i64,
    pub cache_key: String,
    pub file_path: String,
    pub file_size: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub is_active: bool,
    pub cache_metadata: Option<String>,
}

/// Database connection and repository operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<std::path::Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database, used by tests and the CLI dry-run mode
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tb_activity (
                id INTEGER PRIMARY KEY,
                external_id INTEGER,
                athlete_id INTEGER,
                upload_fit_url TEXT,
                tss INTEGER,
                tss_updated INTEGER NOT NULL DEFAULT 0,
                efficiency_factor REAL,
                start_date TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_activity_athlete
                ON tb_activity(athlete_id, start_date);
            CREATE INDEX IF NOT EXISTS idx_activity_external
                ON tb_activity(external_id);

            CREATE TABLE IF NOT EXISTS tb_athlete (
                id INTEGER PRIMARY KEY,
                ftp REAL,
                w_balance REAL,
                max_heartrate INTEGER,
                threshold_heartrate INTEGER,
                is_threshold_active INTEGER NOT NULL DEFAULT 0,
                weight REAL,
                atl INTEGER,
                ctl INTEGER,
                tsb INTEGER
            );

            CREATE TABLE IF NOT EXISTS tb_activity_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity_id INTEGER NOT NULL,
                cache_key TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                cache_metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_cache_activity
                ON tb_activity_cache(activity_id, is_active);

            CREATE TABLE IF NOT EXISTS tb_athlete_daily_state (
                athlete_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                fitness REAL NOT NULL,
                fatigue REAL NOT NULL,
                daily_status REAL NOT NULL,
                PRIMARY KEY (athlete_id, date)
            );

            CREATE TABLE IF NOT EXISTS tb_device (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tb_oauth_token (
                device_id INTEGER PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                update_time TEXT NOT NULL
            );",
        )?;
        self.conn
            .execute_batch(&power_records_schema())?;
        Ok(())
    }

    // ---- activities and athletes ----

    pub fn get_activity(&mut self, activity_id: i64) -> Result<Option<ActivityRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, external_id, athlete_id, upload_fit_url, tss, tss_updated,
                        efficiency_factor, start_date
                 FROM tb_activity WHERE id = ?1",
                params![activity_id],
                activity_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_activity_by_external_id(
        &mut self,
        external_id: i64,
    ) -> Result<Option<ActivityRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, external_id, athlete_id, upload_fit_url, tss, tss_updated,
                        efficiency_factor, start_date
                 FROM tb_activity WHERE external_id = ?1",
                params![external_id],
                activity_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_athlete(&mut self, athlete_id: i64) -> Result<Option<AthleteProfile>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, ftp, w_balance, max_heartrate, threshold_heartrate,
                        is_threshold_active, weight, atl, ctl, tsb
                 FROM tb_athlete WHERE id = ?1",
                params![athlete_id],
                athlete_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Activity plus its owning athlete, when both exist
    pub fn get_activity_athlete(
        &mut self,
        activity_id: i64,
    ) -> Result<Option<(ActivityRecord, AthleteProfile)>, DatabaseError> {
        let Some(activity) = self.get_activity(activity_id)? else {
            return Ok(None);
        };
        let Some(athlete_id) = activity.athlete_id else {
            return Ok(None);
        };
        let Some(athlete) = self.get_athlete(athlete_id)? else {
            return Ok(None);
        };
        Ok(Some((activity, athlete)))
    }

    pub fn upsert_activity(&mut self, activity: &ActivityRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tb_activity
                (id, external_id, athlete_id, upload_fit_url, tss, tss_updated,
                 efficiency_factor, start_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                external_id = excluded.external_id,
                athlete_id = excluded.athlete_id,
                upload_fit_url = excluded.upload_fit_url,
                tss = excluded.tss,
                tss_updated = excluded.tss_updated,
                efficiency_factor = excluded.efficiency_factor,
                start_date = excluded.start_date",
            params![
                activity.id,
                activity.external_id,
                activity.athlete_id,
                activity.upload_fit_url,
                activity.tss,
                activity.tss_updated as i64,
                activity.efficiency_factor,
                activity.start_date,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_athlete(&mut self, athlete: &AthleteProfile) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tb_athlete
                (id, ftp, w_balance, max_heartrate, threshold_heartrate,
                 is_threshold_active, weight, atl, ctl, tsb)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                ftp = excluded.ftp,
                w_balance = excluded.w_balance,
                max_heartrate = excluded.max_heartrate,
                threshold_heartrate = excluded.threshold_heartrate,
                is_threshold_active = excluded.is_threshold_active,
                weight = excluded.weight,
                atl = excluded.atl,
                ctl = excluded.ctl,
                tsb = excluded.tsb",
            params![
                athlete.id,
                athlete.ftp,
                athlete.w_prime,
                athlete.max_heartrate,
                athlete.threshold_heartrate,
                athlete.is_threshold_active as i64,
                athlete.weight,
                athlete.atl,
                athlete.ctl,
                athlete.tsb,
            ],
        )?;
        Ok(())
    }

    /// Write this activity's TSS and flag it as updated
    pub fn update_activity_tss(&mut self, activity_id: i64, tss: i64) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE tb_activity SET tss = ?2, tss_updated = 1 WHERE id = ?1",
            params![activity_id, tss],
        )?;
        Ok(())
    }

    pub fn update_activity_efficiency_factor(
        &mut self,
        activity_id: i64,
        value: Option<f64>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE tb_activity SET efficiency_factor = ?2 WHERE id = ?1",
            params![activity_id, value],
        )?;
        Ok(())
    }

    /// Persist the rollup state on the athlete row
    pub fn update_athlete_load(
        &mut self,
        athlete_id: i64,
        atl: i64,
        ctl: i64,
        tsb: i64,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE tb_athlete SET atl = ?2, ctl = ?3, tsb = ?4 WHERE id = ?1",
            params![athlete_id, atl, ctl, tsb],
        )?;
        Ok(())
    }

    /// Sum of positive TSS over activities with `window_start <= start_date
    /// <= window_end`
    pub fn sum_tss_in_window(
        &mut self,
        athlete_id: i64,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<i64, DatabaseError> {
        let sum: Option<i64> = self.conn.query_row(
            "SELECT SUM(tss) FROM tb_activity
             WHERE athlete_id = ?1
               AND start_date >= ?2
               AND start_date <= ?3
               AND tss IS NOT NULL
               AND tss > 0",
            params![athlete_id, window_start, window_end],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0))
    }

    pub fn upsert_daily_state(&mut self, state: &DailyState) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tb_athlete_daily_state
                (athlete_id, date, fitness, fatigue, daily_status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(athlete_id, date) DO UPDATE SET
                fitness = excluded.fitness,
                fatigue = excluded.fatigue,
                daily_status = excluded.daily_status",
            params![
                state.athlete_id,
                state.date,
                state.fitness,
                state.fatigue,
                state.daily_status,
            ],
        )?;
        Ok(())
    }

    pub fn get_daily_state(
        &mut self,
        athlete_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyState>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT athlete_id, date, fitness, fatigue, daily_status
                 FROM tb_athlete_daily_state WHERE athlete_id = ?1 AND date = ?2",
                params![athlete_id, date],
                |row| {
                    Ok(DailyState {
                        athlete_id: row.get(0)?,
                        date: row.get(1)?,
                        fitness: row.get(2)?,
                        fatigue: row.get(3)?,
                        daily_status: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ---- personal records ----

    /// Load the athlete's record row, creating an empty one on first access
    pub fn get_or_create_power_records(
        &mut self,
        athlete_id: i64,
    ) -> Result<PowerRecordsRow, DatabaseError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tb_athlete_power_records (athlete_id) VALUES (?1)",
            params![athlete_id],
        )?;

        let mut row_out = PowerRecordsRow::new(athlete_id);
        let columns = power_record_columns();
        let sql = format!(
            "SELECT {} FROM tb_athlete_power_records WHERE athlete_id = ?1",
            columns.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values: Vec<Option<i64>> = stmt.query_row(params![athlete_id], |row| {
            (0..columns.len()).map(|i| row.get(i)).collect()
        })?;

        let mut it = values.into_iter();
        let mut next_slot = |top: &mut TopThree| {
            let mut read = || {
                let value = it.next().flatten();
                let activity = it.next().flatten();
                value.map(|v| (v, activity.unwrap_or(0)))
            };
            top.first = read();
            top.second = read();
            top.third = read();
        };
        for (name, _) in RECORD_WINDOWS {
            let top = row_out.powers.get_mut(name).expect("fixed window set");
            next_slot(top);
        }
        next_slot(&mut row_out.longest_ride);
        next_slot(&mut row_out.max_elevation);
        Ok(row_out)
    }

    /// Persist a record row previously loaded with
    /// [`Self::get_or_create_power_records`]
    pub fn save_power_records(&mut self, row: &PowerRecordsRow) -> Result<(), DatabaseError> {
        let columns = power_record_columns();
        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", c, i + 2))
            .collect();
        let sql = format!(
            "UPDATE tb_athlete_power_records SET {} WHERE athlete_id = ?1",
            assignments.join(", ")
        );

        let mut values: Vec<Option<i64>> = Vec::with_capacity(columns.len());
        let mut push_slot = |top: &TopThree| {
            for slot in [top.first, top.second, top.third] {
                values.push(slot.map(|(v, _)| v));
                values.push(slot.map(|(_, a)| a));
            }
        };
        for (name, _) in RECORD_WINDOWS {
            push_slot(&row.powers[name]);
        }
        push_slot(&row.longest_ride);
        push_slot(&row.max_elevation);

        let mut params_vec: Vec<Option<i64>> = vec![Some(row.athlete_id)];
        params_vec.extend(values);
        self.conn.execute(&sql, params_from_iter(params_vec))?;
        Ok(())
    }

    // ---- result cache index ----

    pub fn get_active_cache_row(
        &mut self,
        activity_id: i64,
        cache_key: &str,
    ) -> Result<Option<CacheRow>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT activity_id, cache_key, file_path, file_size, created_at,
                        updated_at, expires_at, is_active, cache_metadata
                 FROM tb_activity_cache
                 WHERE activity_id = ?1 AND cache_key = ?2 AND is_active = 1",
                params![activity_id, cache_key],
                cache_row_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recently updated active row for the activity, key-agnostic
    pub fn latest_active_cache_row(
        &mut self,
        activity_id: i64,
    ) -> Result<Option<CacheRow>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT activity_id, cache_key, file_path, file_size, created_at,
                        updated_at, expires_at, is_active, cache_metadata
                 FROM tb_activity_cache
                 WHERE activity_id = ?1 AND is_active = 1
                 ORDER BY updated_at DESC LIMIT 1",
                params![activity_id],
                cache_row_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Upsert the single index row for an activity: a new key supersedes
    /// any previous key.
    pub fn upsert_cache_row(
        &mut self,
        activity_id: i64,
        cache_key: &str,
        file_path: &str,
        file_size: i64,
        metadata: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE tb_activity_cache
             SET cache_key = ?2, file_path = ?3, file_size = ?4, updated_at = ?5,
                 expires_at = NULL, is_active = 1, cache_metadata = ?6
             WHERE activity_id = ?1",
            params![activity_id, cache_key, file_path, file_size, now, metadata],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO tb_activity_cache
                    (activity_id, cache_key, file_path, file_size, created_at,
                     updated_at, expires_at, is_active, cache_metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL, 1, ?6)",
                params![activity_id, cache_key, file_path, file_size, now, metadata],
            )?;
        }
        Ok(())
    }

    /// Mark every row for the activity inactive and return them so callers
    /// can delete the files best-effort.
    pub fn deactivate_cache_rows(
        &mut self,
        activity_id: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<CacheRow>, DatabaseError> {
        let rows = self.collect_cache_rows(
            "SELECT activity_id, cache_key, file_path, file_size, created_at,
                    updated_at, expires_at, is_active, cache_metadata
             FROM tb_activity_cache WHERE activity_id = ?1",
            Some(activity_id),
        )?;
        self.conn.execute(
            "UPDATE tb_activity_cache SET is_active = 0, updated_at = ?2 WHERE activity_id = ?1",
            params![activity_id, now],
        )?;
        Ok(rows)
    }

    /// Invalidate the entire index
    pub fn deactivate_all_cache_rows(
        &mut self,
        now: NaiveDateTime,
    ) -> Result<Vec<CacheRow>, DatabaseError> {
        let rows = self.collect_cache_rows(
            "SELECT activity_id, cache_key, file_path, file_size, created_at,
                    updated_at, expires_at, is_active, cache_metadata
             FROM tb_activity_cache WHERE is_active = 1",
            None,
        )?;
        self.conn.execute(
            "UPDATE tb_activity_cache SET is_active = 0, updated_at = ?1 WHERE is_active = 1",
            params![now],
        )?;
        Ok(rows)
    }

    fn collect_cache_rows(
        &mut self,
        sql: &str,
        activity_id: Option<i64>,
    ) -> Result<Vec<CacheRow>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mapped = match activity_id {
            Some(id) => stmt.query_map(params![id], cache_row_from_row)?,
            None => stmt.query_map([], cache_row_from_row)?,
        };
        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row?);
        }
        Ok(rows)
    }

    // ---- oauth tokens ----

    pub fn register_device(&mut self, device_id: i64, owner_id: i64) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tb_device (id, owner_id) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id",
            params![device_id, owner_id],
        )?;
        Ok(())
    }

    pub fn upsert_oauth_token(&mut self, token: &OauthToken) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tb_oauth_token (device_id, access_token, refresh_token, update_time)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                update_time = excluded.update_time",
            params![
                token.device_id,
                token.access_token,
                token.refresh_token,
                token.update_time,
            ],
        )?;
        Ok(())
    }

    /// Token for the athlete's paired device, if any
    pub fn get_oauth_token_by_athlete(
        &mut self,
        athlete_id: i64,
    ) -> Result<Option<OauthToken>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT t.device_id, t.access_token, t.refresh_token, t.update_time
                 FROM tb_oauth_token t
                 JOIN tb_device d ON d.id = t.device_id
                 WHERE d.owner_id = ?1",
                params![athlete_id],
                |row| {
                    Ok(OauthToken {
                        device_id: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        update_time: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Record a completed token refresh
    pub fn mark_token_refreshed(
        &mut self,
        device_id: i64,
        access_token: &str,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE tb_oauth_token SET access_token = ?2, update_time = ?3 WHERE device_id = ?1",
            params![device_id, access_token, now],
        )?;
        Ok(())
    }
}

fn activity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRecord> {
    Ok(ActivityRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        athlete_id: row.get(2)?,
        upload_fit_url: row.get(3)?,
        tss: row.get(4)?,
        tss_updated: row.get::<_, i64>(5)? != 0,
        efficiency_factor: row.get(6)?,
        start_date: row.get(7)?,
    })
}

fn athlete_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AthleteProfile> {
    Ok(AthleteProfile {
        id: row.get(0)?,
        ftp: row.get(1)?,
        w_prime: row.get(2)?,
        max_heartrate: row.get(3)?,
        threshold_heartrate: row.get(4)?,
        is_threshold_active: row.get::<_, i64>(5)? != 0,
        weight: row.get(6)?,
        atl: row.get(7)?,
        ctl: row.get(8)?,
        tsb: row.get(9)?,
    })
}

fn cache_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    Ok(CacheRow {
        activity_id: row.get(0)?,
        cache_key: row.get(1)?,
        file_path: row.get(2)?,
        file_size: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        expires_at: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        cache_metadata: row.get(8)?,
    })
}

/// Wide column list of tb_athlete_power_records, in declaration order
fn power_record_columns() -> Vec<String> {
    let mut columns = Vec::new();
    for (name, _) in RECORD_WINDOWS {
        for rank in RANK_SUFFIXES {
            columns.push(format!("power_{}_{}", name, rank));
            columns.push(format!("power_{}_{}_activity_id", name, rank));
        }
    }
    for rank in RANK_SUFFIXES {
        columns.push(format!("longest_ride_{}", rank));
        columns.push(format!("longest_ride_{}_activity_id", rank));
    }
    for rank in RANK_SUFFIXES {
        columns.push(format!("max_elevation_{}", rank));
        columns.push(format!("max_elevation_{}_activity_id", rank));
    }
    columns
}

fn power_records_schema() -> String {
    let column_defs: Vec<String> = power_record_columns()
        .iter()
        .map(|c| format!("{} INTEGER", c))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS tb_athlete_power_records (
            athlete_id INTEGER PRIMARY KEY,
            {}
        );",
        column_defs.join(",\n            ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn seed(db: &mut Database) {
        db.upsert_athlete(&AthleteProfile {
            ftp: Some(250.0),
            w_prime: Some(20000.0),
            max_heartrate: Some(190),
            ..AthleteProfile::new(1)
        })
        .unwrap();
        db.upsert_activity(&ActivityRecord {
            athlete_id: Some(1),
            start_date: Some(dt(2025, 3, 10)),
            ..ActivityRecord::new(100)
        })
        .unwrap();
    }

    #[test]
    fn test_activity_athlete_roundtrip() {
        let mut db = Database::in_memory().unwrap();
        seed(&mut db);

        let (activity, athlete) = db.get_activity_athlete(100).unwrap().unwrap();
        assert_eq!(activity.id, 100);
        assert_eq!(athlete.id, 1);
        assert_eq!(athlete.ftp, Some(250.0));
        assert!(db.get_activity_athlete(999).unwrap().is_none());
    }

    #[test]
    fn test_update_tss_sets_flag() {
        let mut db = Database::in_memory().unwrap();
        seed(&mut db);
        db.update_activity_tss(100, 85).unwrap();
        let activity = db.get_activity(100).unwrap().unwrap();
        assert_eq!(activity.tss, Some(85));
        assert!(activity.tss_updated);
    }

    #[test]
    fn test_sum_tss_window_filters() {
        let mut db = Database::in_memory().unwrap();
        seed(&mut db);
        for (id, day, tss) in [(101, 1, 50), (102, 5, 70), (103, 20, 90), (104, 6, 0)] {
            db.upsert_activity(&ActivityRecord {
                athlete_id: Some(1),
                start_date: Some(dt(2025, 3, day)),
                tss: Some(tss),
                ..ActivityRecord::new(id)
            })
            .unwrap();
        }
        // window 2025-03-01 .. 2025-03-08 catches 50 + 70; zero-TSS excluded
        let sum = db
            .sum_tss_in_window(1, dt(2025, 3, 1), dt(2025, 3, 8))
            .unwrap();
        assert_eq!(sum, 120);
    }

    #[test]
    fn test_power_records_roundtrip() {
        let mut db = Database::in_memory().unwrap();
        let mut row = db.get_or_create_power_records(5).unwrap();
        assert_eq!(row.powers["5s"].first, None);

        records::update_best_powers(&mut row, &[("5s", 700), ("20m", 280)], 42);
        records::update_longest_ride(&mut row, 120_000, 42);
        db.save_power_records(&row).unwrap();

        let reloaded = db.get_or_create_power_records(5).unwrap();
        assert_eq!(reloaded.powers["5s"].first, Some((700, 42)));
        assert_eq!(reloaded.powers["20m"].first, Some((280, 42)));
        assert_eq!(reloaded.longest_ride.first, Some((120_000, 42)));
        assert_eq!(reloaded.powers["60m"].first, None);
    }

    #[test]
    fn test_cache_row_upsert_supersedes_key() {
        let mut db = Database::in_memory().unwrap();
        let now = dt(2025, 3, 10);
        db.upsert_cache_row(100, "key-a", "/tmp/a.json", 10, None, now)
            .unwrap();
        db.upsert_cache_row(100, "key-b", "/tmp/b.json", 20, None, now)
            .unwrap();

        // one active row per activity: key-a is gone
        assert!(db.get_active_cache_row(100, "key-a").unwrap().is_none());
        let row = db.get_active_cache_row(100, "key-b").unwrap().unwrap();
        assert_eq!(row.file_path, "/tmp/b.json");

        let deactivated = db.deactivate_cache_rows(100, now).unwrap();
        assert_eq!(deactivated.len(), 1);
        assert!(db.get_active_cache_row(100, "key-b").unwrap().is_none());
    }

    #[test]
    fn test_daily_state_upsert() {
        let mut db = Database::in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let state = DailyState {
            athlete_id: 1,
            date,
            fitness: 45.2,
            fatigue: 60.1,
            daily_status: -14.9,
        };
        db.upsert_daily_state(&state).unwrap();
        db.upsert_daily_state(&DailyState {
            fitness: 46.0,
            ..state.clone()
        })
        .unwrap();
        let loaded = db.get_daily_state(1, date).unwrap().unwrap();
        assert_eq!(loaded.fitness, 46.0);
    }

    #[test]
    fn test_oauth_token_lookup_by_athlete() {
        let mut db = Database::in_memory().unwrap();
        db.register_device(11, 1).unwrap();
        db.upsert_oauth_token(&OauthToken {
            device_id: 11,
            access_token: "tok".into(),
            refresh_token: "ref".into(),
            update_time: dt(2025, 3, 10),
        })
        .unwrap();

        let token = db.get_oauth_token_by_athlete(1).unwrap().unwrap();
        assert_eq!(token.access_token, "tok");
        assert!(db.get_oauth_token_by_athlete(2).unwrap().is_none());

        db.mark_token_refreshed(11, "tok2", dt(2025, 3, 11)).unwrap();
        let token = db.get_oauth_token_by_athlete(1).unwrap().unwrap();
        assert_eq!(token.access_token, "tok2");
        assert_eq!(token.update_time, dt(2025, 3, 11));
    }
}

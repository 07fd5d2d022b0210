//! Attendance session engine
//!
//! A user may hold several sessions per civil day but at most one open
//! (not checked out) session. Session numbers start at 1 and grow by one per
//! check-in. Check-in, new-session and checkout for one user are serialized
//! through a per-user async mutex; the unique indexes on the attendance table
//! back this up across processes, with a single retry on a duplicate session
//! number.

use chrono::{DateTime, FixedOffset, NaiveDate};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::clock::{
    format_date, format_instant, hours_between, parse_stored_instant, CivilTime, Clock,
};
use super::{EngineError, EngineResult};
use crate::db::{
    is_unique_violation, round2, Attendance, AttendanceStatus, AttendanceWithUser,
    AutoCheckoutResult, CreateAttendanceRequest, LocationRequest, Page, PaginationParams,
    UpdateAttendanceRequest,
};
use crate::DbPool;

const MAX_SESSION_NUMBER: i64 = 10;

pub struct AttendanceEngine {
    db: DbPool,
    clock: Arc<dyn Clock>,
    civil: CivilTime,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AttendanceEngine {
    pub fn new(db: DbPool, clock: Arc<dyn Clock>, civil: CivilTime) -> Self {
        Self {
            db,
            clock,
            civil,
            locks: DashMap::new(),
        }
    }

    pub fn civil(&self) -> CivilTime {
        self.civil
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.civil.local(self.clock.now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Open the first (or next) session of the day
    pub async fn check_in(
        &self,
        user_id: &str,
        location: LocationRequest,
    ) -> EngineResult<Attendance> {
        self.open_session(
            user_id,
            location,
            "You need to check out from your current session before checking in again",
        )
        .await
    }

    /// Same mechanics as `check_in`; named for the second and later sessions
    pub async fn start_new_session(
        &self,
        user_id: &str,
        location: LocationRequest,
    ) -> EngineResult<Attendance> {
        self.open_session(
            user_id,
            location,
            "You need to check out from your current session before starting a new one",
        )
        .await
    }

    async fn open_session(
        &self,
        user_id: &str,
        location: LocationRequest,
        conflict_message: &str,
    ) -> EngineResult<Attendance> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = self.now();
        let today = format_date(now.date_naive());

        if self.find_open_session(user_id, &today).await?.is_some() {
            return Err(EngineError::conflict(conflict_message));
        }

        self.insert_or_retry(user_id, &today, now, location, conflict_message)
            .await
    }

    /// Insert the next session, retrying once when another writer took the slot
    async fn insert_or_retry(
        &self,
        user_id: &str,
        today: &str,
        now: DateTime<FixedOffset>,
        location: LocationRequest,
        conflict_message: &str,
    ) -> EngineResult<Attendance> {
        match self.insert_session(user_id, today, now, location).await {
            Err(EngineError::Database(e)) if is_unique_violation(&e) => {
                tracing::warn!(user_id = %user_id, "Duplicate session on check-in, retrying once");
                // The open-session index also trips here when another process won the race
                if self.find_open_session(user_id, today).await?.is_some() {
                    return Err(EngineError::conflict(conflict_message));
                }
                self.insert_session(user_id, today, now, location)
                    .await
                    .map_err(|e| match e {
                        EngineError::Database(e) if is_unique_violation(&e) => {
                            EngineError::conflict("Attendance session already exists, try again")
                        }
                        other => other,
                    })
            }
            result => result,
        }
    }

    async fn find_open_session(&self, user_id: &str, date: &str) -> EngineResult<Option<Attendance>> {
        let record = sqlx::query_as::<_, Attendance>(
            r#"
            SELECT * FROM attendance
            WHERE user_id = ? AND date = ? AND is_checked_out = 0
            ORDER BY session_number DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn next_session_number(&self, user_id: &str, date: &str) -> EngineResult<i64> {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(session_number), 0) + 1 FROM attendance WHERE user_id = ? AND date = ?",
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(&self.db)
        .await?;
        Ok(next)
    }

    async fn insert_session(
        &self,
        user_id: &str,
        date: &str,
        now: DateTime<FixedOffset>,
        location: LocationRequest,
    ) -> EngineResult<Attendance> {
        let session_number = self.next_session_number(user_id, date).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let stamp = format_instant(now);

        sqlx::query(
            r#"
            INSERT INTO attendance (id, user_id, date, check_in_time, is_checked_out, status, session_number,
                                    check_in_latitude, check_in_longitude, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(date)
        .bind(&stamp)
        .bind(AttendanceStatus::Present.to_string())
        .bind(session_number)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.db)
        .await?;

        tracing::info!(user_id = %user_id, date = %date, session = session_number, "Checked in");
        self.get(&id).await
    }

    /// Close today's open session
    pub async fn check_out(
        &self,
        user_id: &str,
        location: LocationRequest,
    ) -> EngineResult<Attendance> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = self.now();
        let today = format_date(now.date_naive());

        let open = self
            .find_open_session(user_id, &today)
            .await?
            .ok_or_else(|| EngineError::not_found("No active check-in session found for today"))?;

        let check_in = parse_stored_instant(&open.check_in_time).map_err(EngineError::Validation)?;
        let total_hours = round2(hours_between(check_in, now));
        let stamp = format_instant(now);

        sqlx::query(
            r#"
            UPDATE attendance
            SET check_out_time = ?, is_checked_out = 1, total_hours = ?,
                check_out_latitude = ?, check_out_longitude = ?, updated_at = ?
            WHERE id = ? AND is_checked_out = 0
            "#,
        )
        .bind(&stamp)
        .bind(total_hours)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&stamp)
        .bind(&open.id)
        .execute(&self.db)
        .await?;

        tracing::info!(
            user_id = %user_id,
            session = open.session_number,
            total_hours = total_hours,
            "Checked out"
        );
        self.get(&open.id).await
    }

    /// Close every session of the previous civil day that is still open.
    /// Each record gets a synthetic checkout at 23:59:59.999 of that day and
    /// no checkout location. Failures are counted and skipped.
    pub async fn auto_checkout_open_sessions(&self) -> EngineResult<AutoCheckoutResult> {
        let yesterday = self
            .today()
            .pred_opt()
            .ok_or_else(|| EngineError::validation("No previous civil day"))?;
        let checkout = self.civil.end_of_day(yesterday);
        let date = format_date(yesterday);

        let open = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE date = ? AND is_checked_out = 0",
        )
        .bind(&date)
        .fetch_all(&self.db)
        .await?;

        tracing::info!(date = %date, open = open.len(), "Auto-checkout sweep started");

        let mut result = AutoCheckoutResult::default();
        for record in open {
            match self.close_at(&record, checkout).await {
                Ok(true) => result.checked_out += 1,
                Ok(false) => {}
                Err(e) => {
                    result.errors += 1;
                    tracing::warn!(
                        attendance_id = %record.id,
                        user_id = %record.user_id,
                        error = %e,
                        "Auto-checkout failed for session"
                    );
                }
            }
        }

        tracing::info!(
            date = %date,
            checked_out = result.checked_out,
            errors = result.errors,
            "Auto-checkout sweep finished"
        );
        Ok(result)
    }

    async fn close_at(
        &self,
        record: &Attendance,
        checkout: DateTime<FixedOffset>,
    ) -> EngineResult<bool> {
        let lock = self.user_lock(&record.user_id);
        let _guard = lock.lock().await;

        let check_in =
            parse_stored_instant(&record.check_in_time).map_err(EngineError::Validation)?;
        let hours = hours_between(check_in, checkout);
        if hours < 0.0 {
            return Err(EngineError::validation(format!(
                "Check-in {} is after the synthetic checkout",
                record.check_in_time
            )));
        }

        let done = sqlx::query(
            r#"
            UPDATE attendance
            SET check_out_time = ?, is_checked_out = 1, total_hours = ?, updated_at = ?
            WHERE id = ? AND is_checked_out = 0
            "#,
        )
        .bind(format_instant(checkout))
        .bind(round2(hours))
        .bind(format_instant(self.now()))
        .bind(&record.id)
        .execute(&self.db)
        .await?;

        Ok(done.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> EngineResult<Attendance> {
        sqlx::query_as::<_, Attendance>("SELECT * FROM attendance WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EngineError::not_found("Attendance record not found"))
    }

    /// Today's sessions, most recent first
    pub async fn today_attendance(&self, user_id: &str) -> EngineResult<Vec<Attendance>> {
        let today = format_date(self.today());
        self.between(user_id, &today, &today).await
    }

    pub async fn attendance_by_date(&self, user_id: &str, date: &str) -> EngineResult<Vec<Attendance>> {
        let day = self.civil.parse_date(date).map_err(EngineError::Validation)?;
        let day = format_date(day);
        self.between(user_id, &day, &day).await
    }

    pub async fn attendance_by_range(
        &self,
        user_id: &str,
        start: &str,
        end: &str,
    ) -> EngineResult<Vec<Attendance>> {
        let start = self.civil.parse_date(start).map_err(EngineError::Validation)?;
        let end = self.civil.parse_date(end).map_err(EngineError::Validation)?;
        if start > end {
            return Err(EngineError::validation("Start date cannot be after end date"));
        }
        self.between(user_id, &format_date(start), &format_date(end))
            .await
    }

    async fn between(&self, user_id: &str, start: &str, end: &str) -> EngineResult<Vec<Attendance>> {
        let records = sqlx::query_as::<_, Attendance>(
            r#"
            SELECT * FROM attendance
            WHERE user_id = ? AND date >= ? AND date <= ?
            ORDER BY date DESC, session_number DESC
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    pub async fn all_attendance(&self, user_id: &str) -> EngineResult<Vec<Attendance>> {
        let records = sqlx::query_as::<_, Attendance>(
            "SELECT * FROM attendance WHERE user_id = ? ORDER BY date DESC, session_number DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(records)
    }

    /// Every user's sessions on one day, joined with name and email
    pub async fn all_users_attendance(
        &self,
        date: &str,
        user_id: Option<&str>,
        params: PaginationParams,
    ) -> EngineResult<Page<AttendanceWithUser>> {
        let day = format_date(self.civil.parse_date(date).map_err(EngineError::Validation)?);

        let user_clause = if user_id.is_some() {
            "AND a.user_id = ?"
        } else {
            ""
        };

        let count_sql = format!(
            "SELECT COUNT(*) FROM attendance a WHERE a.date = ? {}",
            user_clause
        );
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(&day);
        if let Some(uid) = user_id {
            count_query = count_query.bind(uid);
        }
        let total = count_query.fetch_one(&self.db).await?;

        let sql = format!(
            r#"
            SELECT a.*, u.first_name, u.last_name, u.email
            FROM attendance a
            LEFT JOIN users u ON u.id = a.user_id
            WHERE a.date = ? {}
            ORDER BY a.date DESC, a.session_number DESC
            LIMIT ? OFFSET ?
            "#,
            user_clause
        );
        let mut query = sqlx::query_as::<_, AttendanceWithUser>(&sql).bind(&day);
        if let Some(uid) = user_id {
            query = query.bind(uid);
        }
        let items = query
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.db)
            .await?;

        Ok(Page {
            items,
            pagination: params.into_pagination(total),
        })
    }

    /// Direct record creation, bypassing the session state machine
    pub async fn admin_create(&self, req: &CreateAttendanceRequest) -> EngineResult<Attendance> {
        let day = self.civil.parse_date(&req.date).map_err(EngineError::Validation)?;
        let date = format_date(day);

        let fields = AdminFields {
            status: &req.status,
            session_number: req.session_number,
            check_in: Some(&req.check_in_time),
            check_out: req.check_out_time.as_deref(),
            latitudes: [req.check_in_latitude, req.check_out_latitude],
            longitudes: [req.check_in_longitude, req.check_out_longitude],
        };
        let resolved = self.resolve_admin_fields(&fields, day)?;
        let check_in = resolved
            .check_in
            .ok_or_else(|| EngineError::validation("checkInTime is required"))?;

        let session_number = match req.session_number {
            Some(n) => n,
            None => self.next_session_number(&req.user_id, &date).await?,
        };
        check_session_number(session_number)?;

        let id = uuid::Uuid::new_v4().to_string();
        let stamp = format_instant(self.now());
        sqlx::query(
            r#"
            INSERT INTO attendance (id, user_id, date, check_in_time, check_out_time, is_checked_out, total_hours,
                                    status, notes, session_number, check_in_latitude, check_in_longitude,
                                    check_out_latitude, check_out_longitude, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.user_id)
        .bind(&date)
        .bind(format_instant(check_in))
        .bind(resolved.check_out.map(format_instant))
        .bind(resolved.check_out.is_some())
        .bind(total_hours(Some(check_in), resolved.check_out))
        .bind(resolved.status.to_string())
        .bind(&req.notes)
        .bind(session_number)
        .bind(req.check_in_latitude)
        .bind(req.check_in_longitude)
        .bind(req.check_out_latitude)
        .bind(req.check_out_longitude)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.db)
        .await?;

        tracing::info!(attendance_id = %id, user_id = %req.user_id, "Attendance record created by admin");
        self.get(&id).await
    }

    /// Direct record update. Returns the record before and after the change.
    pub async fn admin_update(
        &self,
        id: &str,
        req: &UpdateAttendanceRequest,
    ) -> EngineResult<(Attendance, Attendance)> {
        let existing = self.get(id).await?;

        let day = match &req.date {
            Some(d) => self.civil.parse_date(d).map_err(EngineError::Validation)?,
            None => self
                .civil
                .parse_date(&existing.date)
                .map_err(EngineError::Validation)?,
        };
        let status = req.status.clone().unwrap_or_else(|| existing.status.clone());
        let fields = AdminFields {
            status: &status,
            session_number: req.session_number,
            check_in: req.check_in_time.as_deref(),
            check_out: req.check_out_time.as_deref(),
            latitudes: [req.check_in_latitude, req.check_out_latitude],
            longitudes: [req.check_in_longitude, req.check_out_longitude],
        };
        let resolved = self.resolve_admin_fields(&fields, day)?;

        let check_in = match resolved.check_in {
            Some(t) => t,
            None => parse_stored_instant(&existing.check_in_time).map_err(EngineError::Validation)?,
        };
        let check_out = match resolved.check_out {
            Some(t) => Some(t),
            None => existing
                .check_out_time
                .as_deref()
                .map(parse_stored_instant)
                .transpose()
                .map_err(EngineError::Validation)?,
        };
        if let Some(out) = check_out {
            if out < check_in {
                return Err(EngineError::validation(
                    "checkOutTime cannot be before checkInTime",
                ));
            }
        }

        sqlx::query(
            r#"
            UPDATE attendance
            SET user_id = ?, date = ?, check_in_time = ?, check_out_time = ?, is_checked_out = ?,
                total_hours = ?, status = ?, notes = ?, session_number = ?,
                check_in_latitude = ?, check_in_longitude = ?,
                check_out_latitude = ?, check_out_longitude = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(req.user_id.as_ref().unwrap_or(&existing.user_id))
        .bind(format_date(day))
        .bind(format_instant(check_in))
        .bind(check_out.map(format_instant))
        .bind(check_out.is_some())
        .bind(total_hours(Some(check_in), check_out))
        .bind(resolved.status.to_string())
        .bind(req.notes.as_ref().or(existing.notes.as_ref()))
        .bind(req.session_number.unwrap_or(existing.session_number))
        .bind(req.check_in_latitude.or(existing.check_in_latitude))
        .bind(req.check_in_longitude.or(existing.check_in_longitude))
        .bind(req.check_out_latitude.or(existing.check_out_latitude))
        .bind(req.check_out_longitude.or(existing.check_out_longitude))
        .bind(format_instant(self.now()))
        .bind(id)
        .execute(&self.db)
        .await?;

        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    /// Hard delete; returns the removed record
    pub async fn admin_delete(&self, id: &str) -> EngineResult<Attendance> {
        let existing = self.get(id).await?;
        sqlx::query("DELETE FROM attendance WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        tracing::info!(attendance_id = %id, "Attendance record deleted by admin");
        Ok(existing)
    }

    fn resolve_admin_fields(
        &self,
        fields: &AdminFields<'_>,
        day: NaiveDate,
    ) -> EngineResult<ResolvedAdminFields> {
        let mut errors = Vec::new();

        let status = match fields.status.parse::<AttendanceStatus>() {
            Ok(s) => Some(s),
            Err(e) => {
                errors.push(e);
                None
            }
        };
        if let Some(n) = fields.session_number {
            if let Err(EngineError::Validation(e)) = check_session_number(n) {
                errors.push(e);
            }
        }
        for lat in fields.latitudes.iter().flatten() {
            if !(-90.0..=90.0).contains(lat) {
                errors.push(format!("Latitude {} must be between -90 and 90", lat));
            }
        }
        for lng in fields.longitudes.iter().flatten() {
            if !(-180.0..=180.0).contains(lng) {
                errors.push(format!("Longitude {} must be between -180 and 180", lng));
            }
        }

        let mut parse = |value: Option<&str>| match value {
            Some(v) => match self.civil.parse_instant(v, Some(day)) {
                Ok(t) => Some(t),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };
        let check_in = parse(fields.check_in);
        let check_out = parse(fields.check_out);

        if let (Some(a), Some(b)) = (check_in, check_out) {
            if b < a {
                errors.push("checkOutTime cannot be before checkInTime".to_string());
            }
        }

        match status {
            Some(status) if errors.is_empty() => Ok(ResolvedAdminFields {
                status,
                check_in,
                check_out,
            }),
            _ => Err(EngineError::Validation(errors.join("; "))),
        }
    }
}

struct AdminFields<'a> {
    status: &'a str,
    session_number: Option<i64>,
    check_in: Option<&'a str>,
    check_out: Option<&'a str>,
    latitudes: [Option<f64>; 2],
    longitudes: [Option<f64>; 2],
}

struct ResolvedAdminFields {
    status: AttendanceStatus,
    check_in: Option<DateTime<FixedOffset>>,
    check_out: Option<DateTime<FixedOffset>>,
}

fn check_session_number(n: i64) -> EngineResult<()> {
    if (1..=MAX_SESSION_NUMBER).contains(&n) {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "sessionNumber must be between 1 and {}",
            MAX_SESSION_NUMBER
        )))
    }
}

fn total_hours(
    check_in: Option<DateTime<FixedOffset>>,
    check_out: Option<DateTime<FixedOffset>>,
) -> Option<f64> {
    match (check_in, check_out) {
        (Some(a), Some(b)) => Some(round2(hours_between(a, b))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, insert_test_user};
    use crate::engine::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        engine: AttendanceEngine,
        clock: Arc<ManualClock>,
        user: String,
    }

    /// Engine whose clock reads 2025-03-10 09:00 IST
    async fn fixture() -> Fixture {
        let pool = init_memory().await.unwrap();
        let user = insert_test_user(&pool, "a@example.com").await;
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 3, 30, 0).unwrap(),
        ));
        let civil = CivilTime::new(330).unwrap();
        Fixture {
            engine: AttendanceEngine::new(pool, clock.clone(), civil),
            clock,
            user,
        }
    }

    async fn open_count(engine: &AttendanceEngine, user: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE user_id = ? AND is_checked_out = 0")
            .bind(user)
            .fetch_one(&engine.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_in_creates_first_session() {
        let f = fixture().await;
        let rec = f
            .engine
            .check_in(
                &f.user,
                LocationRequest {
                    latitude: Some(12.9),
                    longitude: Some(77.6),
                },
            )
            .await
            .unwrap();

        assert_eq!(rec.session_number, 1);
        assert_eq!(rec.date, "2025-03-10");
        assert_eq!(rec.check_in_time, "2025-03-10T09:00:00.000+05:30");
        assert!(!rec.is_checked_out);
        assert_eq!(rec.status, "present");
        assert_eq!(rec.check_in_latitude, Some(12.9));
    }

    #[tokio::test]
    async fn test_double_check_in_conflicts() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();

        let err = f
            .engine
            .check_in(&f.user, LocationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let err = f
            .engine
            .start_new_session(&f.user, LocationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(open_count(&f.engine, &f.user).await, 1);
    }

    #[tokio::test]
    async fn test_check_out_without_session_is_not_found() {
        let f = fixture().await;
        let err = f
            .engine
            .check_out(&f.user, LocationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_eight_hour_session() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
        f.clock.advance(Duration::hours(8));
        let rec = f
            .engine
            .check_out(
                &f.user,
                LocationRequest {
                    latitude: Some(1.0),
                    longitude: Some(2.0),
                },
            )
            .await
            .unwrap();

        assert!(rec.is_checked_out);
        assert_eq!(rec.total_hours, Some(8.0));
        assert_eq!(rec.check_out_time.as_deref(), Some("2025-03-10T17:00:00.000+05:30"));
        assert_eq!(rec.check_out_longitude, Some(2.0));
    }

    #[tokio::test]
    async fn test_total_hours_rounded_to_two_decimals() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
        f.clock.advance(Duration::minutes(100));
        let rec = f
            .engine
            .check_out(&f.user, LocationRequest::default())
            .await
            .unwrap();
        assert_eq!(rec.total_hours, Some(1.67));
    }

    #[tokio::test]
    async fn test_session_numbers_are_contiguous() {
        let f = fixture().await;
        for expected in 1..=4 {
            let rec = if expected == 1 {
                f.engine.check_in(&f.user, LocationRequest::default()).await
            } else {
                f.engine
                    .start_new_session(&f.user, LocationRequest::default())
                    .await
            }
            .unwrap();
            assert_eq!(rec.session_number, expected);
            assert_eq!(open_count(&f.engine, &f.user).await, 1);

            f.clock.advance(Duration::minutes(30));
            f.engine
                .check_out(&f.user, LocationRequest::default())
                .await
                .unwrap();
            assert_eq!(open_count(&f.engine, &f.user).await, 0);
        }

        let today = f.engine.today_attendance(&f.user).await.unwrap();
        let numbers: Vec<i64> = today.iter().map(|r| r.session_number).collect();
        assert_eq!(numbers, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_leave_one_open_session() {
        let f = fixture().await;
        let engine = Arc::new(f.engine);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let user = f.user.clone();
            handles.push(tokio::spawn(async move {
                engine.check_in(&user, LocationRequest::default()).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, EngineError::Conflict(_))),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(open_count(&engine, &f.user).await, 1);
    }

    #[tokio::test]
    async fn test_check_in_race_across_engines_is_a_conflict() {
        let f = fixture().await;
        // A second engine shares the pool but not the per-user locks
        let other = AttendanceEngine::new(f.engine.db.clone(), f.clock.clone(), f.engine.civil());
        other
            .check_in(&f.user, LocationRequest::default())
            .await
            .unwrap();

        // This engine passed its open-session check before the other insert landed
        let now = f.engine.now();
        let today = format_date(now.date_naive());
        let err = f
            .engine
            .insert_or_retry(&f.user, &today, now, LocationRequest::default(), "busy")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ref msg) if msg == "busy"));
        assert_eq!(open_count(&f.engine, &f.user).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_across_engines() {
        let f = fixture().await;
        let engines: Vec<Arc<AttendanceEngine>> = (0..4)
            .map(|_| {
                Arc::new(AttendanceEngine::new(
                    f.engine.db.clone(),
                    f.clock.clone(),
                    f.engine.civil(),
                ))
            })
            .collect();

        let mut handles = Vec::new();
        for engine in &engines {
            for _ in 0..2 {
                let engine = engine.clone();
                let user = f.user.clone();
                handles.push(tokio::spawn(async move {
                    engine.check_in(&user, LocationRequest::default()).await
                }));
            }
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, EngineError::Conflict(_)), "{:?}", e),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(open_count(&f.engine, &f.user).await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_per_civil_day() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
        f.clock.advance(Duration::days(1));
        // Yesterday's session is still open, but today starts fresh
        let rec = f
            .engine
            .check_in(&f.user, LocationRequest::default())
            .await
            .unwrap();
        assert_eq!(rec.session_number, 1);
        assert_eq!(rec.date, "2025-03-11");
    }

    #[tokio::test]
    async fn test_auto_checkout_closes_previous_day() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();

        // A second user with a closed session that must not be touched
        let other = insert_test_user(&f.engine.db, "b@example.com").await;
        f.engine.check_in(&other, LocationRequest::default()).await.unwrap();
        f.clock.advance(Duration::hours(2));
        let closed = f
            .engine
            .check_out(&other, LocationRequest::default())
            .await
            .unwrap();

        // Midnight IST of the next day
        f.clock
            .set(Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap());
        let result = f.engine.auto_checkout_open_sessions().await.unwrap();
        assert_eq!(result, AutoCheckoutResult { checked_out: 1, errors: 0 });

        let rec = f.engine.all_attendance(&f.user).await.unwrap().remove(0);
        assert!(rec.is_checked_out);
        assert_eq!(
            rec.check_out_time.as_deref(),
            Some("2025-03-10T23:59:59.999+05:30")
        );
        assert_eq!(rec.total_hours, Some(15.0));
        assert_eq!(rec.check_out_latitude, None);

        let untouched = f.engine.get(&closed.id).await.unwrap();
        assert_eq!(untouched.check_out_time, closed.check_out_time);
        assert_eq!(untouched.total_hours, Some(2.0));

        // Second run finds nothing
        let again = f.engine.auto_checkout_open_sessions().await.unwrap();
        assert_eq!(again, AutoCheckoutResult::default());
    }

    #[tokio::test]
    async fn test_auto_checkout_skips_older_days() {
        let f = fixture().await;
        let stale = f
            .engine
            .check_in(&f.user, LocationRequest::default())
            .await
            .unwrap();

        // Two days later the sweep only looks at yesterday
        f.clock
            .set(Utc.with_ymd_and_hms(2025, 3, 11, 18, 30, 0).unwrap());
        let result = f.engine.auto_checkout_open_sessions().await.unwrap();
        assert_eq!(result, AutoCheckoutResult::default());
        assert!(!f.engine.get(&stale.id).await.unwrap().is_checked_out);
    }

    #[tokio::test]
    async fn test_auto_checkout_counts_bad_records_and_continues() {
        let f = fixture().await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
        let other = insert_test_user(&f.engine.db, "b@example.com").await;
        let bad = f.engine.check_in(&other, LocationRequest::default()).await.unwrap();
        sqlx::query("UPDATE attendance SET check_in_time = ? WHERE id = ?")
            .bind("2025-03-11T08:00:00.000+05:30")
            .bind(&bad.id)
            .execute(&f.engine.db)
            .await
            .unwrap();

        f.clock
            .set(Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap());
        let result = f.engine.auto_checkout_open_sessions().await.unwrap();
        assert_eq!(result, AutoCheckoutResult { checked_out: 1, errors: 1 });
        assert!(!f.engine.get(&bad.id).await.unwrap().is_checked_out);
    }

    #[tokio::test]
    async fn test_range_reads_sorted_most_recent_first() {
        let f = fixture().await;
        for _ in 0..3 {
            f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
            f.clock.advance(Duration::hours(1));
            f.engine.check_out(&f.user, LocationRequest::default()).await.unwrap();
            f.engine
                .start_new_session(&f.user, LocationRequest::default())
                .await
                .unwrap();
            f.clock.advance(Duration::hours(1));
            f.engine.check_out(&f.user, LocationRequest::default()).await.unwrap();
            f.clock.advance(Duration::hours(22));
        }

        let records = f
            .engine
            .attendance_by_range(&f.user, "2025-03-10", "2025-03-11")
            .await
            .unwrap();
        let keys: Vec<(String, i64)> = records
            .iter()
            .map(|r| (r.date.clone(), r.session_number))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2025-03-11".to_string(), 2),
                ("2025-03-11".to_string(), 1),
                ("2025-03-10".to_string(), 2),
                ("2025-03-10".to_string(), 1),
            ]
        );

        let day = f.engine.attendance_by_date(&f.user, "2025-03-12").await.unwrap();
        assert_eq!(day.len(), 2);

        assert!(matches!(
            f.engine
                .attendance_by_range(&f.user, "2025-03-12", "2025-03-10")
                .await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_all_users_attendance_paginates() {
        let f = fixture().await;
        let other = insert_test_user(&f.engine.db, "b@example.com").await;
        f.engine.check_in(&f.user, LocationRequest::default()).await.unwrap();
        f.engine.check_in(&other, LocationRequest::default()).await.unwrap();

        let page = f
            .engine
            .all_users_attendance("2025-03-10", None, PaginationParams::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.pagination.total_pages, 2);

        let page = f
            .engine
            .all_users_attendance("2025-03-10", Some(&other), PaginationParams::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].email.as_deref(), Some("b@example.com"));
    }

    fn admin_request(user: &str) -> CreateAttendanceRequest {
        CreateAttendanceRequest {
            user_id: user.to_string(),
            date: "2025-03-07".to_string(),
            check_in_time: "09:00".to_string(),
            check_out_time: Some("17:30".to_string()),
            status: "late".to_string(),
            notes: Some("manual entry".to_string()),
            session_number: None,
            check_in_latitude: None,
            check_in_longitude: None,
            check_out_latitude: None,
            check_out_longitude: None,
        }
    }

    #[tokio::test]
    async fn test_admin_create_update_delete() {
        let f = fixture().await;
        let rec = f.engine.admin_create(&admin_request(&f.user)).await.unwrap();
        assert_eq!(rec.session_number, 1);
        assert_eq!(rec.total_hours, Some(8.5));
        assert!(rec.is_checked_out);
        assert_eq!(rec.status, "late");

        let dup = f
            .engine
            .admin_create(&CreateAttendanceRequest {
                session_number: Some(1),
                ..admin_request(&f.user)
            })
            .await;
        assert!(matches!(dup, Err(EngineError::Database(ref e)) if is_unique_violation(e)));

        let (before, after) = f
            .engine
            .admin_update(
                &rec.id,
                &UpdateAttendanceRequest {
                    check_out_time: Some("18:00".to_string()),
                    status: Some("present".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(before.total_hours, Some(8.5));
        assert_eq!(after.total_hours, Some(9.0));
        assert_eq!(after.status, "present");
        assert_eq!(after.notes.as_deref(), Some("manual entry"));

        let removed = f.engine.admin_delete(&rec.id).await.unwrap();
        assert_eq!(removed.id, rec.id);
        assert!(matches!(
            f.engine.get(&rec.id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_validation() {
        let f = fixture().await;

        let mut req = admin_request(&f.user);
        req.status = "on-leave".to_string();
        assert!(matches!(
            f.engine.admin_create(&req).await,
            Err(EngineError::Validation(_))
        ));

        let mut req = admin_request(&f.user);
        req.session_number = Some(11);
        assert!(matches!(
            f.engine.admin_create(&req).await,
            Err(EngineError::Validation(_))
        ));

        let mut req = admin_request(&f.user);
        req.check_in_latitude = Some(91.0);
        req.check_out_longitude = Some(-181.0);
        match f.engine.admin_create(&req).await {
            Err(EngineError::Validation(msg)) => {
                assert!(msg.contains("Latitude"));
                assert!(msg.contains("Longitude"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|r| r.id)),
        }

        let mut req = admin_request(&f.user);
        req.check_out_time = Some("08:00".to_string());
        assert!(matches!(
            f.engine.admin_create(&req).await,
            Err(EngineError::Validation(_))
        ));
    }
}

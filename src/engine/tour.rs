//! Tour (site-visit) workflow
//!
//! Status moves follow `TourStatus::allowed_next`. Each accepted move and
//! the initial assignment append exactly one row to `tour_status_history`,
//! in the same transaction as the status write.

use std::sync::Arc;

use super::clock::{format_instant, CivilTime, Clock};
use super::{EngineError, EngineResult};
use crate::db::{
    to_json_column, CreateTourRequest, Page, PaginationParams, Tour, TourQuery, TourStatus,
    TourStatusHistory, UpdateTourRequest, UpdateTourStatusRequest, User,
};
use crate::DbPool;

const PURPOSE_LEN: (usize, usize) = (10, 500);
const LOCATION_LEN: (usize, usize) = (5, 200);

pub struct TourEngine {
    db: DbPool,
    clock: Arc<dyn Clock>,
    civil: CivilTime,
}

fn check_len(field: &str, value: &str, (min, max): (usize, usize)) -> EngineResult<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(EngineError::validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

impl TourEngine {
    pub fn new(db: DbPool, clock: Arc<dyn Clock>, civil: CivilTime) -> Self {
        Self { db, clock, civil }
    }

    fn now_stamp(&self) -> String {
        format_instant(self.civil.local(self.clock.now()))
    }

    fn parse_time(&self, value: &str) -> EngineResult<String> {
        self.civil
            .parse_instant(value, None)
            .map(format_instant)
            .map_err(EngineError::Validation)
    }

    async fn ensure_user(&self, user_id: &str) -> EngineResult<()> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        match exists {
            Some(_) => Ok(()),
            None => Err(EngineError::validation("Assigned user not found")),
        }
    }

    /// New tours start `assigned`, attributed to their creator
    pub async fn create(&self, creator: &User, req: &CreateTourRequest) -> EngineResult<Tour> {
        check_len("purpose", &req.purpose, PURPOSE_LEN)?;
        check_len("location", &req.location, LOCATION_LEN)?;
        let expected_time = self.parse_time(&req.expected_time)?;
        self.ensure_user(&req.assigned_to).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = self.now_stamp();
        let status = TourStatus::Assigned.to_string();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tours (id, assigned_to, created_by, purpose, location, expected_time, documents,
                               user_notes, admin_notes, status, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.assigned_to)
        .bind(&creator.id)
        .bind(req.purpose.trim())
        .bind(req.location.trim())
        .bind(&expected_time)
        .bind(to_json_column(&req.documents))
        .bind(&req.user_notes)
        .bind(&req.admin_notes)
        .bind(&status)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        append_history(
            &mut tx,
            &id,
            &status,
            &creator.id,
            &creator.full_name(),
            "Tour assigned to user",
            &now,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(tour_id = %id, assigned_to = %req.assigned_to, "Tour created");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> EngineResult<Tour> {
        sqlx::query_as::<_, Tour>("SELECT * FROM tours WHERE id = ? AND is_active = 1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EngineError::not_found("Tour not found"))
    }

    /// Status log in insertion order
    pub async fn history(&self, id: &str) -> EngineResult<Vec<TourStatusHistory>> {
        self.get(id).await?;
        let rows = sqlx::query_as::<_, TourStatusHistory>(
            "SELECT * FROM tour_status_history WHERE tour_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn list(&self, query: &TourQuery) -> EngineResult<Page<Tour>> {
        let params = PaginationParams {
            page: query.page,
            limit: query.limit,
        };

        let mut conditions = vec!["is_active = 1"];
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &query.status {
            conditions.push("status = ?");
            bindings.push(status.clone());
        }
        if let Some(assigned_to) = &query.assigned_to {
            conditions.push("assigned_to = ?");
            bindings.push(assigned_to.clone());
        }
        if let Some(created_by) = &query.created_by {
            conditions.push("created_by = ?");
            bindings.push(created_by.clone());
        }
        if let Some(start) = &query.start_date {
            conditions.push("expected_time >= ?");
            bindings.push(self.range_start(start)?);
        }
        if let Some(end) = &query.end_date {
            conditions.push("expected_time <= ?");
            bindings.push(self.range_end(end)?);
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM tours {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for binding in &bindings {
            count_query = count_query.bind(binding);
        }
        let total = count_query.fetch_one(&self.db).await?;

        let sql = format!(
            "SELECT * FROM tours {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query_as::<_, Tour>(&sql);
        for binding in &bindings {
            list_query = list_query.bind(binding);
        }
        let items = list_query
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.db)
            .await?;

        Ok(Page {
            items,
            pagination: params.into_pagination(total),
        })
    }

    /// Active tours assigned to `user_id`, newest first
    pub async fn for_user(&self, user_id: &str) -> EngineResult<Vec<Tour>> {
        let rows = sqlx::query_as::<_, Tour>(
            "SELECT * FROM tours WHERE assigned_to = ? AND is_active = 1 ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Active tours whose expected time falls in the range, soonest first
    pub async fn by_expected_time(&self, start: &str, end: &str) -> EngineResult<Vec<Tour>> {
        let start = self.range_start(start)?;
        let end = self.range_end(end)?;
        if start > end {
            return Err(EngineError::validation("Start date cannot be after end date"));
        }
        let rows = sqlx::query_as::<_, Tour>(
            r#"
            SELECT * FROM tours
            WHERE is_active = 1 AND expected_time >= ? AND expected_time <= ?
            ORDER BY expected_time ASC
            "#,
        )
        .bind(&start)
        .bind(&end)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    fn range_start(&self, value: &str) -> EngineResult<String> {
        let day = self.civil.parse_date(value).map_err(EngineError::Validation)?;
        Ok(format_instant(self.civil.start_of_day(day)))
    }

    fn range_end(&self, value: &str) -> EngineResult<String> {
        let day = self.civil.parse_date(value).map_err(EngineError::Validation)?;
        Ok(format_instant(self.civil.end_of_day(day)))
    }

    /// Edit non-status fields
    pub async fn update(&self, id: &str, req: &UpdateTourRequest) -> EngineResult<(Tour, Tour)> {
        let existing = self.get(id).await?;

        if let Some(purpose) = &req.purpose {
            check_len("purpose", purpose, PURPOSE_LEN)?;
        }
        if let Some(location) = &req.location {
            check_len("location", location, LOCATION_LEN)?;
        }
        let expected_time = match &req.expected_time {
            Some(t) => self.parse_time(t)?,
            None => existing.expected_time.clone(),
        };
        if let Some(assigned_to) = &req.assigned_to {
            self.ensure_user(assigned_to).await?;
        }
        let documents = match &req.documents {
            Some(docs) => to_json_column(docs),
            None => existing.documents.clone(),
        };

        sqlx::query(
            r#"
            UPDATE tours
            SET assigned_to = ?, purpose = ?, location = ?, expected_time = ?, documents = ?,
                user_notes = ?, admin_notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(req.assigned_to.as_ref().unwrap_or(&existing.assigned_to))
        .bind(req.purpose.as_deref().map(str::trim).unwrap_or(&existing.purpose))
        .bind(req.location.as_deref().map(str::trim).unwrap_or(&existing.location))
        .bind(&expected_time)
        .bind(&documents)
        .bind(req.user_notes.as_ref().or(existing.user_notes.as_ref()))
        .bind(req.admin_notes.as_ref().or(existing.admin_notes.as_ref()))
        .bind(self.now_stamp())
        .bind(id)
        .execute(&self.db)
        .await?;

        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    /// Move a tour along the transition table
    pub async fn update_status(
        &self,
        id: &str,
        actor: &User,
        req: &UpdateTourStatusRequest,
    ) -> EngineResult<(Tour, Tour)> {
        let existing = self.get(id).await?;
        let current = existing.get_status().map_err(EngineError::Validation)?;
        current
            .validate_transition(req.status)
            .map_err(EngineError::Validation)?;

        let actual_visit_time = match (&req.actual_visit_time, req.status) {
            (Some(t), TourStatus::InProgress) => Some(self.parse_time(t)?),
            _ => None,
        };
        let completion_notes = match req.status {
            TourStatus::Completed => req.completion_notes.clone(),
            _ => None,
        };

        let now = self.now_stamp();
        let next = req.status.to_string();

        let mut tx = self.db.begin().await?;
        let done = sqlx::query(
            r#"
            UPDATE tours
            SET status = ?,
                actual_visit_time = COALESCE(?, actual_visit_time),
                completion_notes = COALESCE(?, completion_notes),
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&next)
        .bind(&actual_visit_time)
        .bind(&completion_notes)
        .bind(&now)
        .bind(id)
        .bind(current.as_str())
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::conflict("Tour status was changed concurrently"));
        }

        append_history(
            &mut tx,
            id,
            &next,
            &actor.id,
            &actor.full_name(),
            req.notes.as_deref().unwrap_or(""),
            &now,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(tour_id = %id, from = %current, to = %next, actor = %actor.id, "Tour status changed");
        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    /// Soft delete; the tour disappears from reads
    pub async fn delete(&self, id: &str) -> EngineResult<Tour> {
        let existing = self.get(id).await?;
        sqlx::query("UPDATE tours SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(self.now_stamp())
            .bind(id)
            .execute(&self.db)
            .await?;
        tracing::info!(tour_id = %id, "Tour deleted");
        Ok(existing)
    }
}

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    tour_id: &str,
    status: &str,
    changed_by: &str,
    changed_by_name: &str,
    notes: &str,
    changed_at: &str,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tour_status_history (tour_id, status, changed_by, changed_by_name, notes, changed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(tour_id)
    .bind(status)
    .bind(changed_by)
    .bind(changed_by_name)
    .bind(notes)
    .bind(changed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, insert_test_user, TourDocument};
    use crate::engine::ManualClock;
    use chrono::{TimeZone, Utc};

    async fn setup() -> (TourEngine, User, String) {
        let pool = init_memory().await.unwrap();
        let admin_id = insert_test_user(&pool, "admin@example.com").await;
        let field = insert_test_user(&pool, "field@example.com").await;
        let admin: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&admin_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap(),
        ));
        (
            TourEngine::new(pool, clock, CivilTime::new(330).unwrap()),
            admin,
            field,
        )
    }

    fn create_request(assignee: &str) -> CreateTourRequest {
        CreateTourRequest {
            assigned_to: assignee.to_string(),
            purpose: "Inspect the new branch site".to_string(),
            location: "Pune, MH".to_string(),
            expected_time: "2025-03-12T10:00:00+05:30".to_string(),
            documents: vec![TourDocument {
                file_name: "plan.pdf".to_string(),
                file_url: "/uploads/plan.pdf".to_string(),
                file_type: "application/pdf".to_string(),
                file_size: 1024,
            }],
            user_notes: None,
            admin_notes: None,
        }
    }

    fn status(status: TourStatus) -> UpdateTourStatusRequest {
        UpdateTourStatusRequest {
            status,
            notes: None,
            actual_visit_time: None,
            completion_notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_starts_assigned_with_history() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        assert_eq!(tour.status, "assigned");
        assert_eq!(tour.document_list().len(), 1);
        assert_eq!(tour.expected_time, "2025-03-12T10:00:00.000+05:30");

        let history = engine.history(&tour.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "assigned");
        assert_eq!(history[0].changed_by, admin.id);
        assert_eq!(history[0].changed_by_name, "Test User");
    }

    #[tokio::test]
    async fn test_create_validates_lengths_and_assignee() {
        let (engine, admin, field) = setup().await;
        let mut req = create_request(&field);
        req.purpose = "short".to_string();
        assert!(matches!(
            engine.create(&admin, &req).await,
            Err(EngineError::Validation(_))
        ));

        let req = create_request("nobody");
        assert!(matches!(
            engine.create(&admin, &req).await,
            Err(EngineError::Validation(_))
        ));
    }

    async fn drive(engine: &TourEngine, admin: &User, id: &str, path: &[TourStatus]) {
        for next in path {
            engine.update_status(id, admin, &status(*next)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_completed_to_pending_rejected() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        drive(
            &engine,
            &admin,
            &tour.id,
            &[TourStatus::InProgress, TourStatus::Completed],
        )
        .await;
        let before = engine.history(&tour.id).await.unwrap().len();

        let err = engine
            .update_status(&tour.id, &admin, &status(TourStatus::Pending))
            .await
            .unwrap_err();
        match err {
            EngineError::Validation(msg) => {
                assert_eq!(msg, "Invalid status transition from 'completed' to 'pending'")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(engine.get(&tour.id).await.unwrap().status, "completed");
        assert_eq!(engine.history(&tour.id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_completed_to_approved_appends_one_entry() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        drive(
            &engine,
            &admin,
            &tour.id,
            &[TourStatus::InProgress, TourStatus::Completed],
        )
        .await;
        let before = engine.history(&tour.id).await.unwrap().len();

        let mut req = status(TourStatus::Approved);
        req.notes = Some("looks good".to_string());
        let (_, after) = engine.update_status(&tour.id, &admin, &req).await.unwrap();
        assert_eq!(after.status, "approved");

        let history = engine.history(&tour.id).await.unwrap();
        assert_eq!(history.len(), before + 1);
        let last = history.last().unwrap();
        assert_eq!(last.status, "approved");
        assert_eq!(last.notes, "looks good");
    }

    #[tokio::test]
    async fn test_visit_time_and_completion_notes_merge() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();

        let mut req = status(TourStatus::InProgress);
        req.actual_visit_time = Some("2025-03-12T04:45:00Z".to_string());
        req.completion_notes = Some("ignored here".to_string());
        let (_, t) = engine.update_status(&tour.id, &admin, &req).await.unwrap();
        assert_eq!(
            t.actual_visit_time.as_deref(),
            Some("2025-03-12T10:15:00.000+05:30")
        );
        assert_eq!(t.completion_notes, None);

        let mut req = status(TourStatus::Completed);
        req.completion_notes = Some("all done".to_string());
        let (_, t) = engine.update_status(&tour.id, &admin, &req).await.unwrap();
        assert_eq!(t.completion_notes.as_deref(), Some("all done"));
        assert!(t.actual_visit_time.is_some());
    }

    #[tokio::test]
    async fn test_reassignment_loop() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        drive(
            &engine,
            &admin,
            &tour.id,
            &[
                TourStatus::Rejected,
                TourStatus::Assigned,
                TourStatus::Cancelled,
                TourStatus::Assigned,
            ],
        )
        .await;
        assert_eq!(engine.history(&tour.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_tour() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        engine.create(&admin, &create_request(&field)).await.unwrap();

        engine.delete(&tour.id).await.unwrap();
        assert!(matches!(
            engine.get(&tour.id).await,
            Err(EngineError::NotFound(_))
        ));

        let page = engine.list(&TourQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(engine.for_user(&field).await.unwrap().len(), 1);

        let in_range = engine
            .by_expected_time("2025-03-12", "2025-03-12")
            .await
            .unwrap();
        assert_eq!(in_range.len(), 1);
    }

    #[tokio::test]
    async fn test_update_non_status_fields() {
        let (engine, admin, field) = setup().await;
        let tour = engine.create(&admin, &create_request(&field)).await.unwrap();
        let (before, after) = engine
            .update(
                &tour.id,
                &UpdateTourRequest {
                    location: Some("Mumbai, MH".to_string()),
                    documents: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(before.location, "Pune, MH");
        assert_eq!(after.location, "Mumbai, MH");
        assert!(after.document_list().is_empty());
        assert_eq!(after.status, "assigned");
    }
}

//! Leave request workflow
//!
//! Requests start `pending` and move once: to `approved` or `rejected` by a
//! reviewer, or to `cancelled`. Day counts are Monday-to-Friday days in the
//! inclusive range; holidays are not subtracted.

use chrono::Datelike;
use std::sync::Arc;

use super::clock::{format_date, format_instant, working_days, CivilTime, Clock};
use super::{EngineError, EngineResult};
use crate::config::LeaveConfig;
use crate::db::{
    CreateLeaveRequest, LeaveAllocation, LeaveBalance, LeaveDecision, LeaveQuery, LeaveRequest,
    LeaveStatus, LeaveType, Page, PaginationParams, UpdateLeaveRequest,
};
use crate::DbPool;

pub struct LeaveEngine {
    db: DbPool,
    clock: Arc<dyn Clock>,
    civil: CivilTime,
    allocation: LeaveConfig,
}

/// Normalized date range plus computed day count
struct LeaveSpan {
    start: String,
    end: String,
    total_days: f64,
}

impl LeaveEngine {
    pub fn new(db: DbPool, clock: Arc<dyn Clock>, civil: CivilTime, allocation: LeaveConfig) -> Self {
        Self {
            db,
            clock,
            civil,
            allocation,
        }
    }

    fn now_stamp(&self) -> String {
        format_instant(self.civil.local(self.clock.now()))
    }

    fn span(&self, start: &str, end: &str, half_day: bool) -> EngineResult<LeaveSpan> {
        let start = self.civil.parse_date(start).map_err(EngineError::Validation)?;
        let end = self.civil.parse_date(end).map_err(EngineError::Validation)?;
        if start > end {
            return Err(EngineError::validation("Start date cannot be after end date"));
        }

        let days = working_days(start, end);
        let total_days = if half_day && start == end && days == 1 {
            0.5
        } else {
            days as f64
        };

        Ok(LeaveSpan {
            start: format_date(start),
            end: format_date(end),
            total_days,
        })
    }

    pub async fn create(&self, user_id: &str, req: &CreateLeaveRequest) -> EngineResult<LeaveRequest> {
        if req.reason.trim().is_empty() {
            return Err(EngineError::validation("Reason is required"));
        }
        let is_half_day = req.is_half_day || req.leave_type == LeaveType::HalfDay;
        let span = self.span(&req.start_date, &req.end_date, is_half_day)?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = self.now_stamp();
        sqlx::query(
            r#"
            INSERT INTO leave_requests (id, user_id, leave_type, start_date, end_date, reason, status,
                                        is_half_day, half_day_type, total_days, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(req.leave_type.to_string())
        .bind(&span.start)
        .bind(&span.end)
        .bind(req.reason.trim())
        .bind(is_half_day)
        .bind(if is_half_day {
            req.half_day_type.map(|t| t.to_string())
        } else {
            None
        })
        .bind(span.total_days)
        .bind(&req.notes)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        tracing::info!(leave_id = %id, user_id = %user_id, days = span.total_days, "Leave request created");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> EngineResult<LeaveRequest> {
        sqlx::query_as::<_, LeaveRequest>("SELECT * FROM leave_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| EngineError::not_found("Leave request not found"))
    }

    /// A user's own requests, newest first
    pub async fn for_user(&self, user_id: &str) -> EngineResult<Vec<LeaveRequest>> {
        let rows = sqlx::query_as::<_, LeaveRequest>(
            "SELECT * FROM leave_requests WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// All requests, filters combined with AND
    pub async fn list(&self, query: &LeaveQuery) -> EngineResult<Page<LeaveRequest>> {
        let params = PaginationParams {
            page: query.page,
            limit: query.limit,
        };

        let mut conditions: Vec<&str> = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &query.status {
            conditions.push("status = ?");
            bindings.push(status.clone());
        }
        if let Some(leave_type) = &query.leave_type {
            conditions.push("leave_type = ?");
            bindings.push(leave_type.clone());
        }
        if let Some(user_id) = &query.user_id {
            conditions.push("user_id = ?");
            bindings.push(user_id.clone());
        }
        if let Some(approved_by) = &query.approved_by {
            conditions.push("approved_by = ?");
            bindings.push(approved_by.clone());
        }
        if let Some(start) = &query.start_date {
            let day = self.civil.parse_date(start).map_err(EngineError::Validation)?;
            conditions.push("start_date >= ?");
            bindings.push(format_date(day));
        }
        if let Some(end) = &query.end_date {
            let day = self.civil.parse_date(end).map_err(EngineError::Validation)?;
            conditions.push("end_date <= ?");
            bindings.push(format_date(day));
        }
        let half_day_clause = query.is_half_day.map(|flag| {
            if flag {
                "is_half_day = 1"
            } else {
                "is_half_day = 0"
            }
        });
        if let Some(clause) = half_day_clause {
            conditions.push(clause);
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM leave_requests {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for binding in &bindings {
            count_query = count_query.bind(binding);
        }
        let total = count_query.fetch_one(&self.db).await?;

        let sql = format!(
            "SELECT * FROM leave_requests {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query_as::<_, LeaveRequest>(&sql);
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

    /// Requests overlapping `[start, end]`
    pub async fn overlapping(&self, start: &str, end: &str) -> EngineResult<Vec<LeaveRequest>> {
        let span = self.span(start, end, false)?;
        let rows = sqlx::query_as::<_, LeaveRequest>(
            r#"
            SELECT * FROM leave_requests
            WHERE start_date <= ? AND end_date >= ?
            ORDER BY start_date ASC
            "#,
        )
        .bind(&span.end)
        .bind(&span.start)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Edit a pending request; dates are re-validated and the day count recomputed
    pub async fn update(
        &self,
        id: &str,
        req: &UpdateLeaveRequest,
    ) -> EngineResult<(LeaveRequest, LeaveRequest)> {
        let existing = self.get(id).await?;
        if existing.get_status() != LeaveStatus::Pending {
            return Err(EngineError::validation("Only pending leave requests can be updated"));
        }
        if matches!(&req.reason, Some(r) if r.trim().is_empty()) {
            return Err(EngineError::validation("Reason is required"));
        }

        let leave_type = req
            .leave_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| existing.leave_type.clone());
        let is_half_day = req.is_half_day.unwrap_or(existing.is_half_day)
            || leave_type == LeaveType::HalfDay.to_string();
        let span = self.span(
            req.start_date.as_deref().unwrap_or(&existing.start_date),
            req.end_date.as_deref().unwrap_or(&existing.end_date),
            is_half_day,
        )?;
        let half_day_type = if is_half_day {
            req.half_day_type
                .map(|t| t.to_string())
                .or_else(|| existing.half_day_type.clone())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE leave_requests
            SET leave_type = ?, start_date = ?, end_date = ?, reason = ?, is_half_day = ?,
                half_day_type = ?, total_days = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&leave_type)
        .bind(&span.start)
        .bind(&span.end)
        .bind(req.reason.as_deref().map(str::trim).unwrap_or(&existing.reason))
        .bind(is_half_day)
        .bind(half_day_type)
        .bind(span.total_days)
        .bind(req.notes.as_ref().or(existing.notes.as_ref()))
        .bind(self.now_stamp())
        .bind(id)
        .execute(&self.db)
        .await?;

        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    /// Approve or reject a pending request
    pub async fn decide(
        &self,
        id: &str,
        approver_id: &str,
        decision: &LeaveDecision,
    ) -> EngineResult<(LeaveRequest, LeaveRequest)> {
        decision.validate().map_err(EngineError::Validation)?;
        let existing = self.get(id).await?;
        let current = existing.get_status();
        let next = decision.status();
        if !current.can_transition_to(next) {
            return Err(EngineError::validation(format!(
                "Only pending leave requests can be {}; this one is {}",
                next, current
            )));
        }

        let (notes, rejection_reason) = match decision {
            LeaveDecision::Approved { notes } => (
                notes.clone().or_else(|| existing.notes.clone()),
                existing.rejection_reason.clone(),
            ),
            LeaveDecision::Rejected { rejection_reason } => {
                (existing.notes.clone(), rejection_reason.clone())
            }
        };

        let now = self.now_stamp();
        let done = sqlx::query(
            r#"
            UPDATE leave_requests
            SET status = ?, approved_by = ?, approved_at = ?, notes = ?, rejection_reason = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(next.to_string())
        .bind(approver_id)
        .bind(&now)
        .bind(notes)
        .bind(rejection_reason)
        .bind(&now)
        .bind(id)
        .execute(&self.db)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::conflict("Leave request was changed concurrently"));
        }

        tracing::info!(leave_id = %id, approver = %approver_id, status = %next, "Leave request reviewed");
        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    pub async fn cancel(&self, id: &str) -> EngineResult<(LeaveRequest, LeaveRequest)> {
        let existing = self.get(id).await?;
        if !existing
            .get_status()
            .can_transition_to(LeaveStatus::Cancelled)
        {
            return Err(EngineError::validation("Only pending leave requests can be cancelled"));
        }

        let done = sqlx::query(
            "UPDATE leave_requests SET status = 'cancelled', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(self.now_stamp())
        .bind(id)
        .execute(&self.db)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::conflict("Leave request was changed concurrently"));
        }

        let updated = self.get(id).await?;
        Ok((existing, updated))
    }

    /// Approved days in the current civil year against the configured allocation
    pub async fn balance(&self, user_id: &str) -> EngineResult<LeaveBalance> {
        let year = self.civil.day_of(self.clock.now()).year();
        let (first, last) = CivilTime::year_bounds(year)
            .ok_or_else(|| EngineError::validation("Year out of range"))?;

        let used: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_days), 0.0) FROM leave_requests
            WHERE user_id = ? AND status = 'approved' AND start_date >= ? AND end_date <= ?
            "#,
        )
        .bind(user_id)
        .bind(format_date(first))
        .bind(format_date(last))
        .fetch_one(&self.db)
        .await?;

        let total = self.allocation.total() as f64;
        Ok(LeaveBalance {
            allocation: LeaveAllocation {
                annual: self.allocation.annual,
                casual: self.allocation.casual,
                sick: self.allocation.sick,
                other: self.allocation.other,
            },
            used,
            remaining: total - used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, insert_test_user, HalfDayType};
    use crate::engine::ManualClock;
    use chrono::{TimeZone, Utc};

    async fn engine() -> (LeaveEngine, String, String) {
        let pool = init_memory().await.unwrap();
        let user = insert_test_user(&pool, "emp@example.com").await;
        let reviewer = insert_test_user(&pool, "boss@example.com").await;
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap(),
        ));
        let engine = LeaveEngine::new(
            pool,
            clock,
            CivilTime::new(330).unwrap(),
            LeaveConfig::default(),
        );
        (engine, user, reviewer)
    }

    fn request(start: &str, end: &str) -> CreateLeaveRequest {
        CreateLeaveRequest {
            leave_type: LeaveType::Casual,
            start_date: start.to_string(),
            end_date: end.to_string(),
            reason: "family".to_string(),
            is_half_day: false,
            half_day_type: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_weekend_only_leave_counts_zero() {
        let (engine, user, _) = engine().await;
        let leave = engine
            .create(&user, &request("2025-03-15", "2025-03-16"))
            .await
            .unwrap();
        assert_eq!(leave.total_days, 0.0);
        assert_eq!(leave.status, "pending");
    }

    #[tokio::test]
    async fn test_full_week_counts_five() {
        let (engine, user, _) = engine().await;
        let leave = engine
            .create(&user, &request("2025-03-10", "2025-03-14"))
            .await
            .unwrap();
        assert_eq!(leave.total_days, 5.0);
        assert_eq!(leave.start_date, "2025-03-10");
    }

    #[tokio::test]
    async fn test_half_day_counts_half() {
        let (engine, user, _) = engine().await;
        let mut req = request("2025-03-12", "2025-03-12");
        req.is_half_day = true;
        req.half_day_type = Some(HalfDayType::Afternoon);
        let leave = engine.create(&user, &req).await.unwrap();
        assert_eq!(leave.total_days, 0.5);
        assert_eq!(leave.half_day_type.as_deref(), Some("afternoon"));
    }

    #[tokio::test]
    async fn test_reversed_range_rejected() {
        let (engine, user, _) = engine().await;
        let err = engine
            .create(&user, &request("2025-03-14", "2025-03-10"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let (engine, user, reviewer) = engine().await;
        let leave = engine
            .create(&user, &request("2025-03-10", "2025-03-11"))
            .await
            .unwrap();
        engine
            .decide(&leave.id, &reviewer, &LeaveDecision::Approved { notes: None })
            .await
            .unwrap();

        let err = engine.cancel(&leave.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(engine.get(&leave.id).await.unwrap().status, "approved");

        let pending = engine
            .create(&user, &request("2025-03-17", "2025-03-17"))
            .await
            .unwrap();
        let (_, cancelled) = engine.cancel(&pending.id).await.unwrap();
        assert_eq!(cancelled.status, "cancelled");
    }

    #[tokio::test]
    async fn test_reject_requires_reason_and_is_terminal() {
        let (engine, user, reviewer) = engine().await;
        let leave = engine
            .create(&user, &request("2025-03-10", "2025-03-11"))
            .await
            .unwrap();

        let err = engine
            .decide(
                &leave.id,
                &reviewer,
                &LeaveDecision::Rejected {
                    rejection_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let (_, rejected) = engine
            .decide(
                &leave.id,
                &reviewer,
                &LeaveDecision::Rejected {
                    rejection_reason: Some("quarter close".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, "rejected");
        assert_eq!(rejected.approved_by.as_deref(), Some(reviewer.as_str()));
        assert_eq!(rejected.rejection_reason.as_deref(), Some("quarter close"));

        let err = engine
            .decide(&leave.id, &reviewer, &LeaveDecision::Approved { notes: None })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_recomputes_days_while_pending() {
        let (engine, user, reviewer) = engine().await;
        let leave = engine
            .create(&user, &request("2025-03-10", "2025-03-10"))
            .await
            .unwrap();
        let (_, updated) = engine
            .update(
                &leave.id,
                &UpdateLeaveRequest {
                    end_date: Some("2025-03-12".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.total_days, 3.0);

        engine
            .decide(&leave.id, &reviewer, &LeaveDecision::Approved { notes: None })
            .await
            .unwrap();
        assert!(engine
            .update(&leave.id, &UpdateLeaveRequest::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_balance() {
        let (engine, user, reviewer) = engine().await;
        let a = engine
            .create(&user, &request("2025-03-10", "2025-03-14"))
            .await
            .unwrap();
        engine
            .create(&user, &request("2025-04-01", "2025-04-01"))
            .await
            .unwrap();
        engine
            .decide(&a.id, &reviewer, &LeaveDecision::Approved { notes: None })
            .await
            .unwrap();

        let page = engine
            .list(&LeaveQuery {
                status: Some("approved".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].id, a.id);

        let page = engine
            .list(&LeaveQuery {
                user_id: Some(user.clone()),
                start_date: Some("2025-03-20".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        let overlapping = engine.overlapping("2025-03-12", "2025-03-20").await.unwrap();
        assert_eq!(overlapping.len(), 1);

        let balance = engine.balance(&user).await.unwrap();
        assert_eq!(balance.used, 5.0);
        assert_eq!(balance.remaining, 38.0);
    }
}

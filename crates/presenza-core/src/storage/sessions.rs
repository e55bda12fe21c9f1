//! Repository for attendance session database operations.
//!
//! Session status flips are expressed as conditional updates so the database
//! is the final arbiter of the transition table: an update that finds the row
//! in the wrong state simply affects zero rows and returns `None`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{AttendanceSession, ClassId, SessionId},
};

/// Repository for attendance session database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Persists a new draft session.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, session: &AttendanceSession) -> Result<AttendanceSession> {
        let created = sqlx::query_as::<_, AttendanceSession>(
            r#"
            INSERT INTO attendance_sessions (
                id, class_id, title, date, status, mode, starts_at, ends_at,
                require_signature, require_geolocation,
                reference_latitude, reference_longitude, allowed_radius_m,
                closes_at, total_expected, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
            )
            RETURNING id, class_id, title, date, status, mode, starts_at, ends_at,
                      require_signature, require_geolocation,
                      reference_latitude, reference_longitude, allowed_radius_m,
                      closes_at, total_expected, launched_at, closed_at,
                      created_at, updated_at
            "#,
        )
        .bind(session.id.0)
        .bind(session.class_id.0)
        .bind(&session.title)
        .bind(session.date)
        .bind(session.status.to_string())
        .bind(session.mode.to_string())
        .bind(session.starts_at)
        .bind(session.ends_at)
        .bind(session.require_signature)
        .bind(session.require_geolocation)
        .bind(session.reference_point.map(|p| p.latitude))
        .bind(session.reference_point.map(|p| p.longitude))
        .bind(session.allowed_radius_m)
        .bind(session.closes_at)
        .bind(session.total_expected)
        .bind(session.created_at)
        .bind(session.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }

    /// Finds a session by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, session_id: SessionId) -> Result<Option<AttendanceSession>> {
        let session = sqlx::query_as::<_, AttendanceSession>(
            r#"
            SELECT id, class_id, title, date, status, mode, starts_at, ends_at,
                   require_signature, require_geolocation,
                   reference_latitude, reference_longitude, allowed_radius_m,
                   closes_at, total_expected, launched_at, closed_at,
                   created_at, updated_at
            FROM attendance_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(session)
    }

    /// Finds all sessions for a class, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_class(&self, class_id: ClassId) -> Result<Vec<AttendanceSession>> {
        let sessions = sqlx::query_as::<_, AttendanceSession>(
            r#"
            SELECT id, class_id, title, date, status, mode, starts_at, ends_at,
                   require_signature, require_geolocation,
                   reference_latitude, reference_longitude, allowed_radius_m,
                   closes_at, total_expected, launched_at, closed_at,
                   created_at, updated_at
            FROM attendance_sessions
            WHERE class_id = $1
            ORDER BY date DESC, created_at DESC
            "#,
        )
        .bind(class_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(sessions)
    }

    /// Flips a draft session to active, freezing the expected roster size.
    ///
    /// Conditional on the current status: returns `None` without touching the
    /// row if the session is not in draft, which makes concurrent launches
    /// settle on exactly one winner.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_launched(
        &self,
        session_id: SessionId,
        total_expected: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        let session = sqlx::query_as::<_, AttendanceSession>(
            r#"
            UPDATE attendance_sessions
            SET status = 'active', total_expected = $2, launched_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'draft'
            RETURNING id, class_id, title, date, status, mode, starts_at, ends_at,
                      require_signature, require_geolocation,
                      reference_latitude, reference_longitude, allowed_radius_m,
                      closes_at, total_expected, launched_at, closed_at,
                      created_at, updated_at
            "#,
        )
        .bind(session_id.0)
        .bind(total_expected)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(session)
    }

    /// Flips an active session to closed.
    ///
    /// Returns `None` if the session is not active.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_closed(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        self.mark_closed_impl(&*self.pool, session_id, now).await
    }

    /// Flips an active session to closed within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_closed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        self.mark_closed_impl(&mut **tx, session_id, now).await
    }

    /// Private helper for closing sessions with generic executor.
    async fn mark_closed_impl<'e, E>(
        &self,
        executor: E,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let session = sqlx::query_as::<_, AttendanceSession>(
            r#"
            UPDATE attendance_sessions
            SET status = 'closed', closed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'active'
            RETURNING id, class_id, title, date, status, mode, starts_at, ends_at,
                      require_signature, require_geolocation,
                      reference_latitude, reference_longitude, allowed_radius_m,
                      closes_at, total_expected, launched_at, closed_at,
                      created_at, updated_at
            "#,
        )
        .bind(session_id.0)
        .bind(now)
        .fetch_optional(executor)
        .await?;

        Ok(session)
    }

    /// Flips a draft or active session to cancelled.
    ///
    /// Returns `None` if the session is already closed or cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_cancelled(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        self.mark_cancelled_impl(&*self.pool, session_id, now).await
    }

    /// Flips a draft or active session to cancelled within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_cancelled_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        self.mark_cancelled_impl(&mut **tx, session_id, now).await
    }

    /// Private helper for cancelling sessions with generic executor.
    async fn mark_cancelled_impl<'e, E>(
        &self,
        executor: E,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let session = sqlx::query_as::<_, AttendanceSession>(
            r#"
            UPDATE attendance_sessions
            SET status = 'cancelled', closed_at = $2, updated_at = $2
            WHERE id = $1 AND status IN ('draft', 'active')
            RETURNING id, class_id, title, date, status, mode, starts_at, ends_at,
                      require_signature, require_geolocation,
                      reference_latitude, reference_longitude, allowed_radius_m,
                      closes_at, total_expected, launched_at, closed_at,
                      created_at, updated_at
            "#,
        )
        .bind(session_id.0)
        .bind(now)
        .fetch_optional(executor)
        .await?;

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        // Verifies construction; actual database behavior is covered by
        // integration tests against a live Postgres.
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}

//! Repository for signing request database operations.
//!
//! Every transition out of `pending` is a conditional update. Combined with
//! the unique indexes on `token` and `(session_id, student_id)`, the database
//! guarantees each request resolves at most once no matter how many callers
//! race.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{RecordId, RequestId, SessionId, SignatureCapture, SigningRequest},
};

/// Repository for signing request database operations.
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

    /// Persists a new pending request.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` when the token or the
    /// (session, student) pair already exists.
    pub async fn create(&self, request: &SigningRequest) -> Result<SigningRequest> {
        let created = sqlx::query_as::<_, SigningRequest>(
            r#"
            INSERT INTO signing_requests (
                id, session_id, student_id, recipient_name, recipient_email,
                token, status, reminder_count, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            RETURNING id, session_id, student_id, recipient_name, recipient_email,
                      token, status, signed_at, attendance_record_id, signature_data,
                      latitude, longitude, location_accuracy, location_verified,
                      ip_address, user_agent, reminder_count, last_reminder_at,
                      created_at, updated_at
            "#,
        )
        .bind(request.id.0)
        .bind(request.session_id.0)
        .bind(request.student_id.0)
        .bind(&request.recipient_name)
        .bind(&request.recipient_email)
        .bind(&request.token)
        .bind(request.status.to_string())
        .bind(request.reminder_count)
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(created)
    }

    /// Finds a request by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, request_id: RequestId) -> Result<Option<SigningRequest>> {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            SELECT id, session_id, student_id, recipient_name, recipient_email,
                   token, status, signed_at, attendance_record_id, signature_data,
                   latitude, longitude, location_accuracy, location_verified,
                   ip_address, user_agent, reminder_count, last_reminder_at,
                   created_at, updated_at
            FROM signing_requests
            WHERE id = $1
            "#,
        )
        .bind(request_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Finds a request by its signing token.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<SigningRequest>> {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            SELECT id, session_id, student_id, recipient_name, recipient_email,
                   token, status, signed_at, attendance_record_id, signature_data,
                   latitude, longitude, location_accuracy, location_verified,
                   ip_address, user_agent, reminder_count, last_reminder_at,
                   created_at, updated_at
            FROM signing_requests
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Finds all requests for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_session(&self, session_id: SessionId) -> Result<Vec<SigningRequest>> {
        let requests = sqlx::query_as::<_, SigningRequest>(
            r#"
            SELECT id, session_id, student_id, recipient_name, recipient_email,
                   token, status, signed_at, attendance_record_id, signature_data,
                   latitude, longitude, location_accuracy, location_verified,
                   ip_address, user_agent, reminder_count, last_reminder_at,
                   created_at, updated_at
            FROM signing_requests
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(requests)
    }

    /// Flips a pending request to signed, attaching the produced record and
    /// the captured evidence.
    ///
    /// Returns `None` if the request is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_signed(
        &self,
        request_id: RequestId,
        record_id: RecordId,
        capture: &SignatureCapture,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>> {
        self.mark_signed_impl(&*self.pool, request_id, record_id, capture, now).await
    }

    /// Flips a pending request to signed within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_signed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_id: RequestId,
        record_id: RecordId,
        capture: &SignatureCapture,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>> {
        self.mark_signed_impl(&mut **tx, request_id, record_id, capture, now).await
    }

    /// Private helper for signing with generic executor.
    async fn mark_signed_impl<'e, E>(
        &self,
        executor: E,
        request_id: RequestId,
        record_id: RecordId,
        capture: &SignatureCapture,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            UPDATE signing_requests
            SET status = 'signed',
                signed_at = $2,
                attendance_record_id = $3,
                signature_data = $4,
                latitude = $5,
                longitude = $6,
                location_accuracy = $7,
                location_verified = $8,
                ip_address = $9,
                user_agent = $10,
                updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id, session_id, student_id, recipient_name, recipient_email,
                      token, status, signed_at, attendance_record_id, signature_data,
                      latitude, longitude, location_accuracy, location_verified,
                      ip_address, user_agent, reminder_count, last_reminder_at,
                      created_at, updated_at
            "#,
        )
        .bind(request_id.0)
        .bind(now)
        .bind(record_id.0)
        .bind(&capture.signature_data)
        .bind(capture.location.map(|p| p.latitude))
        .bind(capture.location.map(|p| p.longitude))
        .bind(capture.location_accuracy)
        .bind(capture.location_verified)
        .bind(&capture.ip_address)
        .bind(&capture.user_agent)
        .fetch_optional(executor)
        .await?;

        Ok(request)
    }

    /// Flips a pending request to declined.
    ///
    /// Returns `None` if the request is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_declined(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>> {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            UPDATE signing_requests
            SET status = 'declined', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id, session_id, student_id, recipient_name, recipient_email,
                      token, status, signed_at, attendance_record_id, signature_data,
                      latitude, longitude, location_accuracy, location_verified,
                      ip_address, user_agent, reminder_count, last_reminder_at,
                      created_at, updated_at
            "#,
        )
        .bind(request_id.0)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Flips a pending request to cancelled.
    ///
    /// Returns `None` if the request is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_cancelled(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>> {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            UPDATE signing_requests
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id, session_id, student_id, recipient_name, recipient_email,
                      token, status, signed_at, attendance_record_id, signature_data,
                      latitude, longitude, location_accuracy, location_verified,
                      ip_address, user_agent, reminder_count, last_reminder_at,
                      created_at, updated_at
            "#,
        )
        .bind(request_id.0)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Increments the reminder counter of a pending request.
    ///
    /// Returns `None` if the request is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn record_reminder(
        &self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<Option<SigningRequest>> {
        let request = sqlx::query_as::<_, SigningRequest>(
            r#"
            UPDATE signing_requests
            SET reminder_count = reminder_count + 1, last_reminder_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING id, session_id, student_id, recipient_name, recipient_email,
                      token, status, signed_at, attendance_record_id, signature_data,
                      latitude, longitude, location_accuracy, location_verified,
                      ip_address, user_agent, reminder_count, last_reminder_at,
                      created_at, updated_at
            "#,
        )
        .bind(request_id.0)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Expires every pending request of a session.
    ///
    /// Idempotent: a second sweep finds nothing pending and affects zero
    /// rows.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn expire_pending(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<u64> {
        self.expire_pending_impl(&*self.pool, session_id, now).await
    }

    /// Expires every pending request of a session within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn expire_pending_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.expire_pending_impl(&mut **tx, session_id, now).await
    }

    /// Private helper for bulk expiry with generic executor.
    async fn expire_pending_impl<'e, E>(
        &self,
        executor: E,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE signing_requests
            SET status = 'expired', updated_at = $2
            WHERE session_id = $1 AND status = 'pending'
            "#,
        )
        .bind(session_id.0)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancels every pending request of a session.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn cancel_pending(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<u64> {
        self.cancel_pending_impl(&*self.pool, session_id, now).await
    }

    /// Cancels every pending request of a session within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn cancel_pending_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.cancel_pending_impl(&mut **tx, session_id, now).await
    }

    /// Private helper for bulk cancellation with generic executor.
    async fn cancel_pending_impl<'e, E>(
        &self,
        executor: E,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE signing_requests
            SET status = 'cancelled', updated_at = $2
            WHERE session_id = $1 AND status = 'pending'
            "#,
        )
        .bind(session_id.0)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}

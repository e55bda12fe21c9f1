//! Database access layer implementing the repository pattern for attendance
//! persistence.
//!
//! The repository layer translates between domain models and the database
//! schema. All database operations MUST go through these repositories;
//! direct SQL queries outside this module are forbidden to keep the
//! transition rules in one place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod attendance_records;
pub mod sessions;
pub mod signing_requests;

use crate::{
    error::Result,
    models::{
        AttendanceRecord, AttendanceSession, NewAttendanceRecord, RequestId, SessionId,
        SignatureCapture, SigningRequest,
    },
};

/// Container for all repository instances providing unified database access.
///
/// Also hosts the multi-table units of work: resolving an attestation and
/// ending a session both pair a request-table write with a second write that
/// must commit or roll back together.
#[derive(Clone)]
pub struct Storage {
    /// Repository for attendance session operations.
    pub sessions: Arc<sessions::Repository>,

    /// Repository for signing request operations.
    pub signing_requests: Arc<signing_requests::Repository>,

    /// Repository for attendance record operations.
    pub attendance_records: Arc<attendance_records::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool through an `Arc`.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            sessions: Arc::new(sessions::Repository::new(pool.clone())),
            signing_requests: Arc::new(signing_requests::Repository::new(pool.clone())),
            attendance_records: Arc::new(attendance_records::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy or the
    /// query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.sessions.pool()).await?;

        Ok(())
    }

    /// Resolves a signing request: upserts the attendance record, then flips
    /// the request to signed, in one transaction.
    ///
    /// The record write comes first so a retry after any interruption finds
    /// the request still pending and simply converges on the same record.
    /// Returns `None` without writing anything if the request is no longer
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns error if either write fails; the transaction is rolled back.
    pub async fn finalize_attestation(
        &self,
        request_id: RequestId,
        record: &NewAttendanceRecord,
        capture: &SignatureCapture,
        now: DateTime<Utc>,
    ) -> Result<Option<(SigningRequest, AttendanceRecord)>> {
        let mut tx = self.sessions.pool().begin().await?;

        let stored = self.attendance_records.upsert_in_tx(&mut tx, record, now).await?;
        let Some(request) = self
            .signing_requests
            .mark_signed_in_tx(&mut tx, request_id, stored.id, capture, now)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;

        Ok(Some((request, stored)))
    }

    /// Closes an active session: expires its pending requests, then flips
    /// the session to closed, in one transaction.
    ///
    /// Returns the closed session and the number of requests expired, or
    /// `None` without writing anything if the session is not active.
    ///
    /// # Errors
    ///
    /// Returns error if either write fails; the transaction is rolled back.
    pub async fn close_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(AttendanceSession, u64)>> {
        let mut tx = self.sessions.pool().begin().await?;

        let expired = self.signing_requests.expire_pending_in_tx(&mut tx, session_id, now).await?;
        let Some(session) = self.sessions.mark_closed_in_tx(&mut tx, session_id, now).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;

        Ok(Some((session, expired)))
    }

    /// Cancels a draft or active session: cancels its pending requests, then
    /// flips the session to cancelled, in one transaction.
    ///
    /// Returns the cancelled session and the number of requests cancelled,
    /// or `None` without writing anything if the session is already closed
    /// or cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if either write fails; the transaction is rolled back.
    pub async fn cancel_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<(AttendanceSession, u64)>> {
        let mut tx = self.sessions.pool().begin().await?;

        let cancelled = self.signing_requests.cancel_pending_in_tx(&mut tx, session_id, now).await?;
        let Some(session) = self.sessions.mark_cancelled_in_tx(&mut tx, session_id, now).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        tx.commit().await?;

        Ok(Some((session, cancelled)))
    }
}

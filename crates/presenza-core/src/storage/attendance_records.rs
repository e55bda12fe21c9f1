//! Repository for attendance record database operations.
//!
//! Records are only ever written through the upsert path. The composite
//! identity (student_id, class_id, session_id, date) carries a unique index
//! with `NULLS NOT DISTINCT` so class-level records without a session_id
//! still converge on one row per student and date.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{AttendanceRecord, ClassId, NewAttendanceRecord, RecordId, StatusCounts, StudentId},
};

/// Repository for attendance record database operations.
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

    /// Upserts one attendance record with last-write-wins semantics.
    ///
    /// A conflicting row keeps its identity and creation time; status and
    /// every capture field take the incoming values.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn upsert(
        &self,
        record: &NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        self.upsert_impl(&*self.pool, record, now).await
    }

    /// Upserts one attendance record within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn upsert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord> {
        self.upsert_impl(&mut **tx, record, now).await
    }

    /// Private helper for upserting with generic executor.
    async fn upsert_impl<'e, E>(
        &self,
        executor: E,
        record: &NewAttendanceRecord,
        now: DateTime<Utc>,
    ) -> Result<AttendanceRecord>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stored = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_records (
                id, student_id, class_id, session_id, date, status, late_minutes,
                signature_url, latitude, longitude, location_accuracy,
                location_verified, marked_by, notes, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15
            )
            ON CONFLICT (student_id, class_id, session_id, date) DO UPDATE
            SET status = EXCLUDED.status,
                late_minutes = EXCLUDED.late_minutes,
                signature_url = EXCLUDED.signature_url,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                location_accuracy = EXCLUDED.location_accuracy,
                location_verified = EXCLUDED.location_verified,
                marked_by = EXCLUDED.marked_by,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            RETURNING id, student_id, class_id, session_id, date, status, late_minutes,
                      signature_url, latitude, longitude, location_accuracy,
                      location_verified, marked_by, notes, created_at, updated_at
            "#,
        )
        .bind(RecordId::new().0)
        .bind(record.student_id.0)
        .bind(record.class_id.0)
        .bind(record.session_id.map(|s| s.0))
        .bind(record.date)
        .bind(record.status.to_string())
        .bind(record.late_minutes)
        .bind(&record.signature_url)
        .bind(record.location.map(|p| p.latitude))
        .bind(record.location.map(|p| p.longitude))
        .bind(record.location_accuracy)
        .bind(record.location_verified)
        .bind(&record.marked_by)
        .bind(&record.notes)
        .bind(now)
        .fetch_one(executor)
        .await?;

        Ok(stored)
    }

    /// Upserts a batch of records atomically.
    ///
    /// All rows commit together or none do.
    ///
    /// # Errors
    ///
    /// Returns error if any write fails; nothing is persisted in that case.
    pub async fn upsert_many(
        &self,
        records: &[NewAttendanceRecord],
        now: DateTime<Utc>,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(records.len());

        for record in records {
            stored.push(self.upsert_in_tx(&mut tx, record, now).await?);
        }

        tx.commit().await?;

        Ok(stored)
    }

    /// Per-status tallies for one student, optionally narrowed to a class
    /// and an inclusive date range.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn status_counts(
        &self,
        student_id: StudentId,
        class_id: Option<ClassId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<StatusCounts> {
        let counts = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'present') AS present,
                   COUNT(*) FILTER (WHERE status = 'absent') AS absent,
                   COUNT(*) FILTER (WHERE status = 'late') AS late,
                   COUNT(*) FILTER (WHERE status = 'excused') AS excused
            FROM attendance_records
            WHERE student_id = $1
              AND ($2::uuid IS NULL OR class_id = $2)
              AND ($3::date IS NULL OR date >= $3)
              AND ($4::date IS NULL OR date <= $4)
            "#,
        )
        .bind(student_id.0)
        .bind(class_id.map(|c| c.0))
        .bind(from)
        .bind(to)
        .fetch_one(&*self.pool)
        .await?;

        Ok(counts)
    }

    /// Per-status tallies for one class on one date.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn class_status_counts(
        &self,
        class_id: ClassId,
        date: NaiveDate,
    ) -> Result<StatusCounts> {
        let counts = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'present') AS present,
                   COUNT(*) FILTER (WHERE status = 'absent') AS absent,
                   COUNT(*) FILTER (WHERE status = 'late') AS late,
                   COUNT(*) FILTER (WHERE status = 'excused') AS excused
            FROM attendance_records
            WHERE class_id = $1 AND date = $2
            "#,
        )
        .bind(class_id.0)
        .bind(date)
        .fetch_one(&*self.pool)
        .await?;

        Ok(counts)
    }
}

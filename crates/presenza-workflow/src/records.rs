//! Direct attendance bookkeeping outside the signing flow.
//!
//! Teachers mark rows by hand during in-person roll call or when correcting
//! history; the attested path writes through the signing workflow instead.
//! Reads aggregate the same table per student or per class and day.

use std::sync::Arc;

use chrono::NaiveDate;
use presenza_core::{
    models::{AttendanceRecord, AttendanceStats, ClassId, NewAttendanceRecord, StudentId},
    time::Clock,
};
use tracing::debug;

use crate::{
    error::{Result, WorkflowError},
    storage::WorkflowStorage,
};

/// Writes attendance records directly and serves aggregate statistics.
#[derive(Clone)]
pub struct AttendanceRecordStore {
    storage: Arc<dyn WorkflowStorage>,
    clock: Arc<dyn Clock>,
}

impl AttendanceRecordStore {
    /// Creates a record store over the given storage and clock.
    pub fn new(storage: Arc<dyn WorkflowStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Upserts one attendance record.
    ///
    /// Last write wins on the (student, class, session, date) key, so marking
    /// the same cell twice updates the row in place.
    pub async fn upsert(&self, record: NewAttendanceRecord) -> Result<AttendanceRecord> {
        let now = self.clock.now_utc();
        Ok(self.storage.upsert_record(record, now).await?)
    }

    /// Upserts a batch of attendance records; all rows land together or none
    /// do. An empty batch is rejected rather than silently succeeding.
    pub async fn mark_many(
        &self,
        records: Vec<NewAttendanceRecord>,
    ) -> Result<Vec<AttendanceRecord>> {
        if records.is_empty() {
            return Err(WorkflowError::validation("attendance batch is empty"));
        }
        let now = self.clock.now_utc();
        let stored = self.storage.upsert_records(records, now).await?;
        debug!(count = stored.len(), "marked attendance batch");
        Ok(stored)
    }

    /// Attendance statistics for one student, optionally narrowed to a class
    /// and an inclusive date range.
    pub async fn student_stats(
        &self,
        student_id: StudentId,
        class_id: Option<ClassId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<AttendanceStats> {
        let counts = self.storage.student_status_counts(student_id, class_id, from, to).await?;
        Ok(AttendanceStats::from(counts))
    }

    /// Attendance statistics for one class on one date.
    pub async fn class_stats(&self, class_id: ClassId, date: NaiveDate) -> Result<AttendanceStats> {
        let counts = self.storage.class_status_counts(class_id, date).await?;
        Ok(AttendanceStats::from(counts))
    }
}

//! Integration tests for the attendance record store.
//!
//! Direct marking outside the signing flow: last-write-wins upserts, the
//! empty-batch rejection, and the aggregate statistics queries.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use presenza_core::models::{AttendanceStatus, ClassId, NewAttendanceRecord, StudentId};
use presenza_testing::{base_date, TestContext};

#[tokio::test]
async fn upsert_is_last_write_wins() {
    let ctx = TestContext::new();
    let student = StudentId::new();
    let class = ClassId::new();

    let record =
        NewAttendanceRecord::unattested(student, class, base_date(), AttendanceStatus::Absent);
    let first = ctx.records.upsert(record.clone()).await.expect("first upsert");

    let mut corrected = record;
    corrected.status = AttendanceStatus::Excused;
    corrected.notes = Some("doctor's note".to_string());
    let second = ctx.records.upsert(corrected).await.expect("second upsert");

    assert_eq!(second.id, first.id);
    assert_eq!(second.status, AttendanceStatus::Excused);
    assert_eq!(second.notes.as_deref(), Some("doctor's note"));
    assert_eq!(ctx.storage.record_count().await, 1);
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let ctx = TestContext::new();
    let err = ctx.records.mark_many(Vec::new()).await.unwrap_err();
    assert_eq!(err.code(), "E2001");
    assert!(err.to_string().contains("empty"), "got {err}");
}

#[tokio::test]
async fn batch_upsert_marks_every_row() {
    let ctx = TestContext::new();
    let class = ClassId::new();
    let batch: Vec<NewAttendanceRecord> = (0..4)
        .map(|i| {
            let status = if i == 0 {
                AttendanceStatus::Absent
            } else {
                AttendanceStatus::Present
            };
            NewAttendanceRecord::unattested(StudentId::new(), class, base_date(), status)
        })
        .collect();

    let stored = ctx.records.mark_many(batch).await.expect("batch");

    assert_eq!(stored.len(), 4);
    assert_eq!(ctx.storage.record_count().await, 4);
}

#[tokio::test]
async fn student_stats_aggregate_by_class_and_range() {
    let ctx = TestContext::new();
    let student = StudentId::new();
    let class = ClassId::new();
    let other_class = ClassId::new();

    let days = [
        (0, AttendanceStatus::Present),
        (1, AttendanceStatus::Late),
        (2, AttendanceStatus::Absent),
        (3, AttendanceStatus::Present),
    ];
    for (offset, status) in days {
        ctx.records
            .upsert(NewAttendanceRecord::unattested(
                student,
                class,
                base_date() + Duration::days(offset),
                status,
            ))
            .await
            .expect("upsert");
    }
    ctx.records
        .upsert(NewAttendanceRecord::unattested(
            student,
            other_class,
            base_date(),
            AttendanceStatus::Present,
        ))
        .await
        .expect("other class");

    let stats = ctx
        .records
        .student_stats(student, Some(class), None, None)
        .await
        .expect("stats");
    assert_eq!(stats.total, 4);
    assert_eq!(stats.present, 2);
    assert_eq!(stats.late, 1);
    assert_eq!(stats.absent, 1);
    assert!((stats.attendance_rate - 0.5).abs() < f64::EPSILON);

    let narrowed = ctx
        .records
        .student_stats(
            student,
            Some(class),
            Some(base_date()),
            Some(base_date() + Duration::days(1)),
        )
        .await
        .expect("narrowed");
    assert_eq!(narrowed.total, 2, "date range is inclusive");

    let all_classes = ctx.records.student_stats(student, None, None, None).await.expect("all");
    assert_eq!(all_classes.total, 5);
}

#[tokio::test]
async fn stats_rate_is_zero_without_rows() {
    let ctx = TestContext::new();
    let stats = ctx
        .records
        .student_stats(StudentId::new(), None, None, None)
        .await
        .expect("stats");
    assert_eq!(stats.total, 0);
    assert!(stats.attendance_rate.abs() < f64::EPSILON);
}

#[tokio::test]
async fn class_stats_cover_one_day() {
    let ctx = TestContext::new();
    let class = ClassId::new();
    let statuses = [
        AttendanceStatus::Present,
        AttendanceStatus::Present,
        AttendanceStatus::Excused,
    ];
    for status in statuses {
        ctx.records
            .upsert(NewAttendanceRecord::unattested(
                StudentId::new(),
                class,
                base_date(),
                status,
            ))
            .await
            .expect("upsert");
    }

    let stats = ctx.records.class_stats(class, base_date()).await.expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.present, 2);
    assert_eq!(stats.excused, 1);
}

//! End-to-end tests for the attendance attestation flow.
//!
//! Exercises the full surface from session creation through launch,
//! geofenced resolution and close, with the mock ports standing in for
//! Postgres, SMTP and enrollment.

use anyhow::Result;
use presenza_core::{
    models::{AttendanceStatus, NewAttendanceRecord, RequestStatus, SessionStatus},
    GeoPoint,
};
use presenza_testing::{scenarios, TestContext};
use presenza_workflow::{AttestationSubmission, WorkflowError};

fn submission_at(point: GeoPoint) -> AttestationSubmission {
    AttestationSubmission {
        signature_data: Some("data:image/png;base64,QUJD".to_string()),
        location: Some(point),
        location_accuracy: Some(5.0),
        ip_address: Some("203.0.113.9".to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

/// The golden path: a geofenced session from draft to closed.
///
/// One recipient signs at the reference point, one reports a position
/// outside the fence, one never responds. Close settles the stragglers.
#[tokio::test]
async fn golden_attendance_flow_from_launch_to_close() -> Result<()> {
    let ctx = TestContext::new();
    let (class_id, roster) = ctx.seed_class(3).await;

    // Create a draft with the enrollment snapshot
    let session = ctx.manager.create(scenarios::paris_session(class_id)).await?;
    assert_eq!(session.status, SessionStatus::Draft);
    assert_eq!(session.total_expected, 3);

    // Launch issues one pending request per recipient and mails everyone
    let launch = ctx.manager.launch(session.id, true).await?;
    assert_eq!(launch.session.status, SessionStatus::Active);
    assert_eq!(launch.issued.len(), 3);
    assert!(launch.issue_failures.is_empty());
    assert_eq!(launch.notifications.succeeded, 3);
    assert_eq!(ctx.notifier.sent_count().await, 3);

    // First recipient signs at the reference point
    let resolved = ctx
        .workflow()
        .resolve(&launch.issued[0].token, submission_at(scenarios::PARIS))
        .await?;
    assert_eq!(resolved.request.status, RequestStatus::Signed);
    assert!(resolved.geofence.verified);
    assert_eq!(resolved.record.status, AttendanceStatus::Present);
    assert_eq!(resolved.record.session_id, Some(session.id));

    // Second recipient is roughly 500 m out and stays pending
    let err = ctx
        .workflow()
        .resolve(&launch.issued[1].token, submission_at(scenarios::near_paris_500m()))
        .await
        .unwrap_err();
    match err {
        WorkflowError::LocationInvalid { distance_m, allowed_radius_m } => {
            assert!((475.0..=525.0).contains(&distance_m));
            assert!((allowed_radius_m - 100.0).abs() < f64::EPSILON);
        },
        other => panic!("expected a location rejection, got {other}"),
    }
    assert_eq!(
        ctx.storage.request_status(launch.issued[1].id).await,
        Some(RequestStatus::Pending)
    );

    // Close expires the two unresolved requests and seals the session
    let close = ctx.manager.close(session.id).await?;
    assert_eq!(close.session.status, SessionStatus::Closed);
    assert!(close.session.closed_at.is_some());
    assert_eq!(close.expired_requests, 2);
    assert_eq!(
        ctx.storage.request_status(launch.issued[0].id).await,
        Some(RequestStatus::Signed)
    );

    // Closing again is an idempotent no-op
    let again = ctx.manager.close(session.id).await?;
    assert_eq!(again.expired_requests, 0);

    // The signed attestation landed in the attendance ledger
    let stats =
        ctx.records.student_stats(roster[0].student_id, Some(class_id), None, None).await?;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.present, 1);
    assert!((stats.attendance_rate - 1.0).abs() < f64::EPSILON);

    Ok(())
}

/// A crash between the record write and the status flip leaves the request
/// pending; retrying the same token converges on a single record.
#[tokio::test]
async fn interrupted_resolution_retries_to_convergence() -> Result<()> {
    let ctx = TestContext::new();
    let (class_id, _) = ctx.seed_class(1).await;
    let session = ctx.manager.create(scenarios::paris_session(class_id)).await?;
    let launch = ctx.manager.launch(session.id, false).await?;
    let request = &launch.issued[0];

    ctx.storage.inject_crash_after_record_write();

    let err = ctx
        .workflow()
        .resolve(&request.token, submission_at(scenarios::PARIS))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E2501");
    assert!(err.is_retryable());

    // The record write survived but the request never flipped
    assert_eq!(ctx.storage.record_count().await, 1);
    assert_eq!(ctx.storage.request_status(request.id).await, Some(RequestStatus::Pending));

    // The retry lands on the same record and completes the flip
    let resolved = ctx
        .workflow()
        .resolve(&request.token, submission_at(scenarios::PARIS))
        .await?;
    assert_eq!(resolved.request.status, RequestStatus::Signed);
    assert_eq!(resolved.request.attendance_record_id, Some(resolved.record.id));
    assert_eq!(ctx.storage.record_count().await, 1);

    Ok(())
}

/// Two racing resolutions of one token admit exactly one attestation.
#[tokio::test]
async fn concurrent_resolves_of_one_token_admit_exactly_one() -> Result<()> {
    let ctx = TestContext::new();
    let (class_id, _) = ctx.seed_class(1).await;
    let session = ctx.manager.create(scenarios::paris_session(class_id)).await?;
    let launch = ctx.manager.launch(session.id, false).await?;
    let token = launch.issued[0].token.clone();

    let (first, second) = futures::join!(
        ctx.workflow().resolve(&token, submission_at(scenarios::PARIS)),
        ctx.workflow().resolve(&token, submission_at(scenarios::PARIS)),
    );

    let winners = usize::from(first.is_ok()) + usize::from(second.is_ok());
    assert_eq!(winners, 1, "exactly one resolve may win the race");

    let loser = if first.is_err() { first.unwrap_err() } else { second.unwrap_err() };
    assert_eq!(loser.code(), "E2201");
    assert_eq!(ctx.storage.record_count().await, 1);

    Ok(())
}

/// Rejected invitation mail shows up in the tallies without failing the
/// launch or the reminder sweep.
#[tokio::test]
async fn notification_failures_surface_as_tallies_not_errors() -> Result<()> {
    let ctx = TestContext::new();
    let (class_id, roster) = ctx.seed_class(3).await;
    ctx.notifier.fail_for(roster[1].email.clone()).await;

    let session = ctx.manager.create(scenarios::paris_session(class_id)).await?;
    let launch = ctx.manager.launch(session.id, true).await?;

    assert_eq!(launch.issued.len(), 3);
    assert_eq!(launch.notifications.total, 3);
    assert_eq!(launch.notifications.succeeded, 2);
    assert_eq!(launch.notifications.failed, 1);
    assert_eq!(ctx.storage.session_status(session.id).await, Some(SessionStatus::Active));
    assert_eq!(ctx.notifier.sent_count().await, 2);

    // The reminder sweep tallies the same recipient failure without aborting
    let reminders = ctx.manager.remind_pending(session.id).await?;
    assert_eq!(reminders.total, 3);
    assert_eq!(reminders.succeeded, 2);
    assert_eq!(reminders.failed, 1);
    assert_eq!(ctx.notifier.sent_count().await, 4);

    Ok(())
}

/// Electronic attestations and hand-marked records land in one ledger and
/// aggregate together.
#[tokio::test]
async fn attested_and_manual_records_share_one_ledger() -> Result<()> {
    let ctx = TestContext::new();
    let (class_id, roster) = ctx.seed_class(2).await;
    let session = ctx.manager.create(scenarios::paris_session(class_id)).await?;
    let launch = ctx.manager.launch(session.id, false).await?;

    // One student attests electronically
    ctx.workflow()
        .resolve(&launch.issued[0].token, submission_at(scenarios::PARIS))
        .await?;

    // The other is excused by hand for the following day
    let next_day = session.date.succ_opt().expect("next day exists");
    let excused = NewAttendanceRecord::unattested(
        roster[1].student_id,
        class_id,
        next_day,
        AttendanceStatus::Excused,
    );
    ctx.records.upsert(excused).await?;

    let day_stats = ctx.records.class_stats(class_id, session.date).await?;
    assert_eq!(day_stats.total, 1);
    assert_eq!(day_stats.present, 1);

    let student_stats =
        ctx.records.student_stats(roster[1].student_id, Some(class_id), None, None).await?;
    assert_eq!(student_stats.total, 1);
    assert_eq!(student_stats.excused, 1);
    assert!(student_stats.attendance_rate.abs() < f64::EPSILON);

    assert_eq!(ctx.storage.record_count().await, 2);

    Ok(())
}

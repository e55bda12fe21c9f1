//! Integration tests for the signing request workflow.
//!
//! Drives issue, resolve, remind, decline and cancel against the mocked
//! ports: deadline and geofence gating, the atomic two-write resolve, and
//! the reminder counter moving only after a send is accepted.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use presenza_core::{
    models::{AttendanceSession, RequestStatus, SessionStatus, SigningRequest, StudentId},
    GeoPoint,
};
use presenza_testing::{base_time, scenarios, SessionBuilder, TestContext};
use presenza_workflow::{AttestationSubmission, WorkflowError, WorkflowStorage};

fn submission_at(point: GeoPoint) -> AttestationSubmission {
    AttestationSubmission {
        signature_data: Some("data:image/png;base64,QUJD".to_string()),
        location: Some(point),
        location_accuracy: Some(5.0),
        ip_address: Some("203.0.113.9".to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

/// Creates and launches a geofenced Paris session with three recipients,
/// returning the tokens of the issued requests.
async fn launched_paris(ctx: &TestContext) -> Vec<String> {
    let (class_id, _) = ctx.seed_class(3).await;
    let session = ctx.manager.create(scenarios::paris_session(class_id)).await.expect("create");
    let outcome = ctx.manager.launch(session.id, false).await.expect("launch");
    outcome.issued.into_iter().map(|request| request.token).collect()
}

#[tokio::test]
async fn resolve_at_reference_point_verifies_and_signs() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    let resolved = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .expect("resolve at the reference point");

    assert_eq!(resolved.request.status, RequestStatus::Signed);
    assert!(resolved.geofence.verified);
    assert!(resolved.geofence.distance_m.unwrap() < 1.0);
    assert!(resolved.record.location_verified);
    assert_eq!(resolved.request.attendance_record_id, Some(resolved.record.id));
}

#[tokio::test]
async fn resolve_unknown_token_is_not_found() {
    let ctx = TestContext::new();
    launched_paris(&ctx).await;

    let err = ctx
        .workflow()
        .resolve("att-nonexistent", submission_at(scenarios::PARIS))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E2101");
}

#[tokio::test]
async fn resolve_is_not_reentrant() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    ctx.workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .expect("first resolve");
    let err = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "E2201");
    assert!(err.to_string().contains("already signed"), "got {err}");
    assert_eq!(ctx.storage.record_count().await, 1, "exactly one attendance record");
}

#[tokio::test]
async fn resolve_after_deadline_is_expired_and_request_stays_pending() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    // Sessions close two hours after the pinned start.
    ctx.clock.advance(Duration::from_secs(3 * 3600));
    let err = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "E2301");
    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");
    assert_eq!(request.status, RequestStatus::Pending);
}

#[tokio::test]
async fn resolve_after_close_reports_already_expired() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");
    ctx.manager.close(request.session_id).await.expect("close");

    let err = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .unwrap_err();

    // Closing already expired the request, so the pending gate reports it.
    assert_eq!(err.code(), "E2201");
    assert!(err.to_string().contains("already expired"), "got {err}");
}

#[tokio::test]
async fn resolve_under_terminal_session_is_expired() {
    let ctx = TestContext::new();
    let mut session =
        AttendanceSession::draft(SessionBuilder::with_defaults().build(), 1, base_time());
    session.status = SessionStatus::Cancelled;
    ctx.storage.add_session(session.clone()).await;
    let request = SigningRequest::pending(
        session.id,
        StudentId::new(),
        "Ada Lovelace".to_string(),
        "ada@example.edu".to_string(),
        "att-orphan".to_string(),
        base_time(),
    );
    ctx.storage.add_request(request).await;

    let err = ctx
        .workflow()
        .resolve("att-orphan", submission_at(scenarios::PARIS))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "E2301");
    assert!(err.to_string().contains("cancelled"), "got {err}");
}

#[tokio::test]
async fn resolve_without_signature_is_rejected() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    let mut submission = submission_at(scenarios::PARIS);
    submission.signature_data = Some("   ".to_string());
    let err = ctx.workflow().resolve(&tokens[0], submission).await.unwrap_err();

    assert_eq!(err.code(), "E2001");
    assert!(err.to_string().contains("signature"), "got {err}");
}

#[tokio::test]
async fn resolve_without_position_is_rejected_when_geofenced() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    let mut submission = submission_at(scenarios::PARIS);
    submission.location = None;
    let err = ctx.workflow().resolve(&tokens[0], submission).await.unwrap_err();

    assert_eq!(err.code(), "E2001");
    assert!(err.to_string().contains("position"), "got {err}");
}

#[tokio::test]
async fn resolve_outside_fence_reports_distance_and_stays_pending() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    let err = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::near_paris_500m()))
        .await
        .unwrap_err();

    match err {
        WorkflowError::LocationInvalid {
            distance_m,
            allowed_radius_m,
        } => {
            assert!((475.0..=525.0).contains(&distance_m), "distance {distance_m}");
            assert_eq!(allowed_radius_m, 100.0);
        },
        other => panic!("expected LocationInvalid, got {other}"),
    }

    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(ctx.storage.record_count().await, 0);
}

#[tokio::test]
async fn crash_between_the_two_writes_leaves_request_pending() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    ctx.storage.inject_crash_after_record_write();

    let err = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E2501");
    assert!(err.is_retryable());

    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");
    assert_eq!(request.status, RequestStatus::Pending);

    // Retrying converges on a single record and the signed state.
    let resolved = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .expect("retry resolves");
    assert_eq!(resolved.request.status, RequestStatus::Signed);
    assert_eq!(ctx.storage.record_count().await, 1);
}

#[tokio::test]
async fn remind_increments_counter_after_accepted_send() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");

    let reminded = ctx.workflow().remind(request.id).await.expect("remind");

    assert_eq!(reminded.reminder_count, 1);
    assert!(reminded.last_reminder_at.is_some());
    let sent = ctx.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("Reminder:"), "got {}", sent[0].subject);
    assert!(sent[0].body.contains(&tokens[0]), "body must carry the signing code");
}

#[tokio::test]
async fn failed_reminder_send_leaves_counter_untouched() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");
    ctx.notifier.fail_for(request.recipient_email.clone()).await;

    let err = ctx.workflow().remind(request.id).await.unwrap_err();

    assert_eq!(err.code(), "E2501");
    assert!(err.is_retryable());
    let unchanged = ctx.storage.find_request(request.id).await.unwrap().expect("request exists");
    assert_eq!(unchanged.reminder_count, 0);
    assert_eq!(unchanged.last_reminder_at, None);
}

#[tokio::test]
async fn remind_after_resolution_is_a_conflict() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let resolved = ctx
        .workflow()
        .resolve(&tokens[0], submission_at(scenarios::PARIS))
        .await
        .expect("resolve");

    let err = ctx.workflow().remind(resolved.request.id).await.unwrap_err();
    assert_eq!(err.code(), "E2201");
    assert_eq!(ctx.notifier.sent_count().await, 0);
}

#[tokio::test]
async fn decline_is_terminal() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;

    let declined = ctx.workflow().decline(&tokens[1]).await.expect("decline");
    assert_eq!(declined.status, RequestStatus::Declined);

    let err = ctx.workflow().decline(&tokens[1]).await.unwrap_err();
    assert_eq!(err.code(), "E2201");
    assert!(err.to_string().contains("already declined"), "got {err}");

    let err = ctx
        .workflow()
        .resolve(&tokens[1], submission_at(scenarios::PARIS))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E2201");
}

#[tokio::test]
async fn cancel_request_is_terminal() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let request = ctx
        .storage
        .find_request_by_token(&tokens[2])
        .await
        .unwrap()
        .expect("request exists");

    let cancelled = ctx.workflow().cancel_request(request.id).await.expect("cancel");
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let err = ctx.workflow().cancel_request(request.id).await.unwrap_err();
    assert_eq!(err.code(), "E2201");
}

#[tokio::test]
async fn expire_all_is_idempotent() {
    let ctx = TestContext::new();
    let tokens = launched_paris(&ctx).await;
    let request = ctx
        .storage
        .find_request_by_token(&tokens[0])
        .await
        .unwrap()
        .expect("request exists");

    let first = ctx.workflow().expire_all(request.session_id).await.expect("expire");
    assert_eq!(first, 3);
    let second = ctx.workflow().expire_all(request.session_id).await.expect("expire again");
    assert_eq!(second, 0);
}

//! Behavior tests for the in-memory workflow storage.
//!
//! The mock mirrors the Postgres adapter: conditional status flips, the two
//! uniqueness backstops, and the transactional pairing of the finalize and
//! close paths, including the failure injection hooks tests rely on.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use presenza_core::models::{
    AttendanceSession, AttendanceStatus, NewAttendanceRecord, RequestStatus, SessionStatus,
    SignatureCapture, SigningRequest, StudentId,
};
use presenza_testing::{base_time, SessionBuilder};
use presenza_workflow::storage::{mock::MockWorkflowStorage, WorkflowStorage};

fn draft_session() -> AttendanceSession {
    AttendanceSession::draft(SessionBuilder::with_defaults().build(), 3, base_time())
}

fn active_session() -> AttendanceSession {
    let mut session = draft_session();
    session.status = SessionStatus::Active;
    session.launched_at = Some(base_time());
    session
}

fn pending_request(session: &AttendanceSession, token: &str) -> SigningRequest {
    SigningRequest::pending(
        session.id,
        StudentId::new(),
        "Ada Lovelace".to_string(),
        "ada@example.edu".to_string(),
        token.to_string(),
        base_time(),
    )
}

fn present_record(request: &SigningRequest, session: &AttendanceSession) -> NewAttendanceRecord {
    NewAttendanceRecord {
        student_id: request.student_id,
        class_id: session.class_id,
        session_id: Some(session.id),
        date: session.date,
        status: AttendanceStatus::Present,
        late_minutes: 0,
        signature_url: Some("data:image/png;base64,QUJD".to_string()),
        location: None,
        location_accuracy: None,
        location_verified: false,
        marked_by: None,
        notes: None,
    }
}

fn capture() -> SignatureCapture {
    SignatureCapture {
        signature_data: Some("data:image/png;base64,QUJD".to_string()),
        location: None,
        location_accuracy: None,
        location_verified: false,
        ip_address: Some("203.0.113.9".to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

#[tokio::test]
async fn duplicate_token_is_rejected() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;

    storage.create_request(pending_request(&session, "att-dup")).await.expect("first create");
    let err = storage.create_request(pending_request(&session, "att-dup")).await.unwrap_err();
    assert!(err.to_string().contains("unique constraint"), "got {err}");
}

#[tokio::test]
async fn duplicate_student_in_session_is_rejected() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;

    let first = pending_request(&session, "att-a");
    let mut second = pending_request(&session, "att-b");
    second.student_id = first.student_id;

    storage.create_request(first).await.expect("first create");
    let err = storage.create_request(second).await.unwrap_err();
    assert!(err.to_string().contains("unique constraint"), "got {err}");
}

#[tokio::test]
async fn upsert_preserves_identity_and_creation_time() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    let request = pending_request(&session, "att-up");
    let record = present_record(&request, &session);

    let first = storage.upsert_record(record.clone(), base_time()).await.unwrap();

    let mut updated = record;
    updated.status = AttendanceStatus::Late;
    updated.late_minutes = 10;
    let later = base_time() + Duration::minutes(30);
    let second = storage.upsert_record(updated, later).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.status, AttendanceStatus::Late);
    assert_eq!(second.late_minutes, 10);
    assert_eq!(second.updated_at, later);
    assert_eq!(storage.record_count().await, 1);
}

#[tokio::test]
async fn finalize_flips_pending_request_and_attaches_record() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;
    let request = pending_request(&session, "att-ok");
    storage.add_request(request.clone()).await;

    let (signed, stored) = storage
        .finalize_attestation(request.id, present_record(&request, &session), capture(), base_time())
        .await
        .unwrap()
        .expect("request was pending");

    assert_eq!(signed.status, RequestStatus::Signed);
    assert_eq!(signed.signed_at, Some(base_time()));
    assert_eq!(signed.attendance_record_id, Some(stored.id));
    assert_eq!(signed.ip_address.as_deref(), Some("203.0.113.9"));
    assert_eq!(stored.status, AttendanceStatus::Present);
}

#[tokio::test]
async fn finalize_of_resolved_request_rolls_back_the_record_write() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;
    let mut request = pending_request(&session, "att-done");
    request.status = RequestStatus::Declined;
    storage.add_request(request.clone()).await;

    let outcome = storage
        .finalize_attestation(request.id, present_record(&request, &session), capture(), base_time())
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(storage.record_count().await, 0, "record write must not survive");
    assert_eq!(storage.request_status(request.id).await, Some(RequestStatus::Declined));
}

#[tokio::test]
async fn injected_crash_keeps_record_but_not_the_flip() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;
    let request = pending_request(&session, "att-crash");
    storage.add_request(request.clone()).await;
    storage.inject_crash_after_record_write();

    let result = storage
        .finalize_attestation(request.id, present_record(&request, &session), capture(), base_time())
        .await;

    assert!(result.is_err());
    assert_eq!(storage.record_count().await, 1);
    assert_eq!(storage.request_status(request.id).await, Some(RequestStatus::Pending));

    // The injection is one-shot, so the retry converges on the same record.
    let retried = storage
        .finalize_attestation(request.id, present_record(&request, &session), capture(), base_time())
        .await
        .unwrap();
    assert!(retried.is_some());
    assert_eq!(storage.record_count().await, 1);
    assert_eq!(storage.request_status(request.id).await, Some(RequestStatus::Signed));
}

#[tokio::test]
async fn close_expires_only_pending_requests_of_an_active_session() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;

    let mut signed = pending_request(&session, "att-signed");
    signed.status = RequestStatus::Signed;
    storage.add_request(signed.clone()).await;
    let open = pending_request(&session, "att-open");
    storage.add_request(open.clone()).await;

    let (closed, expired) = storage
        .close_session(session.id, base_time() + Duration::hours(3))
        .await
        .unwrap()
        .expect("session was active");

    assert_eq!(closed.status, SessionStatus::Closed);
    assert_eq!(expired, 1);
    assert_eq!(storage.request_status(open.id).await, Some(RequestStatus::Expired));
    assert_eq!(storage.request_status(signed.id).await, Some(RequestStatus::Signed));
}

#[tokio::test]
async fn close_of_non_active_session_writes_nothing() {
    let storage = MockWorkflowStorage::new();
    let session = draft_session();
    storage.add_session(session.clone()).await;
    let open = pending_request(&session, "att-still");
    storage.add_request(open.clone()).await;

    let outcome = storage.close_session(session.id, base_time()).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(storage.session_status(session.id).await, Some(SessionStatus::Draft));
    assert_eq!(storage.request_status(open.id).await, Some(RequestStatus::Pending));
}

#[tokio::test]
async fn cancel_marks_pending_requests_cancelled() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;
    let open = pending_request(&session, "att-drop");
    storage.add_request(open.clone()).await;

    let (cancelled, count) = storage
        .cancel_session(session.id, base_time())
        .await
        .unwrap()
        .expect("session was active");

    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(count, 1);
    assert_eq!(storage.request_status(open.id).await, Some(RequestStatus::Cancelled));
}

#[tokio::test]
async fn launch_flip_wins_only_from_draft() {
    let storage = MockWorkflowStorage::new();
    let session = draft_session();
    storage.add_session(session.clone()).await;

    let first = storage.mark_session_launched(session.id, 5, base_time()).await.unwrap();
    let launched = first.expect("draft flips to active");
    assert_eq!(launched.status, SessionStatus::Active);
    assert_eq!(launched.total_expected, 5);

    let second = storage.mark_session_launched(session.id, 5, base_time()).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn list_requests_is_stable_within_one_instant() {
    let storage = MockWorkflowStorage::new();
    let session = active_session();
    storage.add_session(session.clone()).await;

    for token in ["att-c", "att-a", "att-b"] {
        storage.create_request(pending_request(&session, token)).await.unwrap();
    }

    let listed = storage.list_requests(session.id).await.unwrap();
    let tokens: Vec<&str> = listed.iter().map(|r| r.token.as_str()).collect();
    assert_eq!(tokens, vec!["att-a", "att-b", "att-c"]);
}

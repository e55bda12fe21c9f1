//! Signing request lifecycle: issue, resolve, remind, decline, cancel.
//!
//! A request moves from pending to exactly one terminal state. Resolution is
//! the interesting path: the submission is validated against the parent
//! session (deadline, signature, geofence) and then committed as an
//! attendance record plus a status flip in one transaction, record first, so
//! an interrupted resolve leaves the request pending and retryable.

use std::sync::Arc;

use futures::future::join_all;
use presenza_core::{
    geo::{self, GeoPoint, GeofenceCheck},
    models::{
        AttendanceRecord, AttendanceSession, AttendanceStatus, NewAttendanceRecord, RequestId,
        RequestStatus, SessionId, SessionStatus, SignatureCapture, SigningRequest,
    },
    time::Clock,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Result, WorkflowError},
    notify::{NotificationRequest, Notifier},
    roster::Recipient,
    storage::WorkflowStorage,
    token,
};

/// What a recipient submits when resolving a signing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationSubmission {
    /// Captured signature payload, when the client collected one.
    pub signature_data: Option<String>,
    /// Position reported by the device.
    pub location: Option<GeoPoint>,
    /// Reported GPS accuracy in meters.
    pub location_accuracy: Option<f64>,
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

/// One recipient the issue pass could not persist a request for.
#[derive(Debug)]
pub struct IssueFailure {
    /// The recipient whose request failed to persist.
    pub recipient: Recipient,
    /// Why persistence failed.
    pub error: WorkflowError,
}

/// Outcome of issuing requests for a roster.
///
/// Failures are collected per recipient instead of aborting the pass, so a
/// caller can distinguish all-issued from partially-issued.
#[derive(Debug, Default)]
pub struct IssueOutcome {
    /// Requests persisted as pending.
    pub issued: Vec<SigningRequest>,
    /// Recipients whose request could not be persisted.
    pub failed: Vec<IssueFailure>,
}

/// A successfully resolved signing request.
#[derive(Debug, Clone)]
pub struct ResolvedAttestation {
    /// The request in its signed state.
    pub request: SigningRequest,
    /// The attendance record the resolution produced.
    pub record: AttendanceRecord,
    /// How the submitted position was evaluated.
    pub geofence: GeofenceCheck,
}

/// Drives signing requests through their lifecycle.
#[derive(Clone)]
pub struct SigningRequestWorkflow {
    storage: Arc<dyn WorkflowStorage>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SigningRequestWorkflow {
    /// Creates a workflow over the given storage, notifier and clock.
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            notifier,
            clock,
        }
    }

    /// Issues one pending request per recipient, all creates concurrent.
    ///
    /// An empty roster produces an empty outcome. Persistence failures,
    /// including unique-index rejections from a concurrent issue pass, land
    /// in `failed` instead of aborting the rest.
    pub async fn issue(
        &self,
        session: &AttendanceSession,
        recipients: &[Recipient],
    ) -> IssueOutcome {
        if recipients.is_empty() {
            return IssueOutcome::default();
        }
        let now = self.clock.now_utc();

        let creates = recipients.iter().map(|recipient| {
            let recipient = recipient.clone();
            let request = SigningRequest::pending(
                session.id,
                recipient.student_id,
                recipient.name.clone(),
                recipient.email.clone(),
                token::generate(now),
                now,
            );
            let storage = self.storage.clone();
            async move { (recipient, storage.create_request(request).await) }
        });

        let mut outcome = IssueOutcome::default();
        for (recipient, result) in join_all(creates).await {
            match result {
                Ok(request) => outcome.issued.push(request),
                Err(error) => {
                    warn!(
                        student_id = %recipient.student_id,
                        error = %error,
                        "failed to issue signing request"
                    );
                    outcome.failed.push(IssueFailure {
                        recipient,
                        error: WorkflowError::from(error),
                    });
                }
            }
        }
        debug!(
            session_id = %session.id,
            issued = outcome.issued.len(),
            failed = outcome.failed.len(),
            "issued signing requests"
        );
        outcome
    }

    /// Resolves a pending request identified by its token.
    ///
    /// Validates in a fixed order: token exists, request pending, session
    /// deadline and status, signature, then geofence. A failed geofence
    /// leaves the request pending so the recipient can retry closer to the
    /// reference point. Only after every check passes are the record and the
    /// status flip committed together.
    pub async fn resolve(
        &self,
        token_value: &str,
        submission: AttestationSubmission,
    ) -> Result<ResolvedAttestation> {
        let now = self.clock.now_utc();

        let request = self
            .storage
            .find_request_by_token(token_value)
            .await?
            .ok_or_else(|| WorkflowError::not_found("no signing request for token"))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::already(request.status));
        }

        let session = self
            .storage
            .find_session(request.session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("session {}", request.session_id)))?;

        if now > session.closes_at {
            return Err(WorkflowError::expired(format!(
                "session deadline {} has passed",
                session.closes_at
            )));
        }
        if session.status != SessionStatus::Active {
            return Err(WorkflowError::expired(format!("session is {}", session.status)));
        }

        if session.require_signature
            && !submission
                .signature_data
                .as_deref()
                .map(str::trim)
                .is_some_and(|s| !s.is_empty())
        {
            return Err(WorkflowError::validation("session requires a signature"));
        }

        let geofence = if session.require_geolocation {
            let Some(position) = submission.location else {
                return Err(WorkflowError::validation("session requires a position"));
            };
            let check = geo::validate(position, session.reference_point, session.allowed_radius_m);
            if !check.valid {
                return Err(WorkflowError::location_invalid(
                    check.distance_m.unwrap_or(f64::INFINITY),
                    session.allowed_radius_m,
                ));
            }
            check
        } else {
            GeofenceCheck::unverified()
        };

        let record = NewAttendanceRecord {
            student_id: request.student_id,
            class_id: session.class_id,
            session_id: Some(session.id),
            date: session.date,
            status: AttendanceStatus::Present,
            late_minutes: 0,
            signature_url: submission.signature_data.clone(),
            location: submission.location,
            location_accuracy: submission.location_accuracy,
            location_verified: geofence.verified,
            marked_by: None,
            notes: None,
        };
        let capture = SignatureCapture {
            signature_data: submission.signature_data,
            location: submission.location,
            location_accuracy: submission.location_accuracy,
            location_verified: geofence.verified,
            ip_address: submission.ip_address,
            user_agent: submission.user_agent,
        };

        let Some((request, record)) = self
            .storage
            .finalize_attestation(request.id, record, capture, now)
            .await?
        else {
            // Lost the race: something flipped the request while we
            // validated. Report its current state.
            return match self.storage.find_request(request.id).await? {
                Some(current) => Err(WorkflowError::already(current.status)),
                None => Err(WorkflowError::not_found(format!("request {}", request.id))),
            };
        };

        debug!(
            request_id = %request.id,
            verified = geofence.verified,
            "resolved signing request"
        );
        Ok(ResolvedAttestation {
            request,
            record,
            geofence,
        })
    }

    /// Sends one reminder for a pending request.
    ///
    /// The counter moves only after the notifier accepted the message; a
    /// failed send surfaces as a retryable dependency error and leaves the
    /// counter untouched.
    pub async fn remind(&self, request_id: RequestId) -> Result<SigningRequest> {
        let request = self
            .storage
            .find_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("request {request_id}")))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::already(request.status));
        }
        let session = self
            .storage
            .find_session(request.session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("session {}", request.session_id)))?;

        let notification = invitation(&session, &request, true);
        self.notifier
            .send(&notification)
            .await
            .map_err(|e| WorkflowError::dependency(e.to_string()))?;

        let now = self.clock.now_utc();
        self.storage
            .record_reminder(request_id, now)
            .await?
            .ok_or_else(|| WorkflowError::conflict("request is no longer pending"))
    }

    /// Declines a pending request identified by its token.
    pub async fn decline(&self, token_value: &str) -> Result<SigningRequest> {
        let request = self
            .storage
            .find_request_by_token(token_value)
            .await?
            .ok_or_else(|| WorkflowError::not_found("no signing request for token"))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::already(request.status));
        }
        let now = self.clock.now_utc();
        self.storage
            .mark_request_declined(request.id, now)
            .await?
            .ok_or_else(|| WorkflowError::conflict("request is no longer pending"))
    }

    /// Cancels a single pending request.
    pub async fn cancel_request(&self, request_id: RequestId) -> Result<SigningRequest> {
        let request = self
            .storage
            .find_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("request {request_id}")))?;
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::already(request.status));
        }
        let now = self.clock.now_utc();
        self.storage
            .mark_request_cancelled(request.id, now)
            .await?
            .ok_or_else(|| WorkflowError::conflict("request is no longer pending"))
    }

    /// Expires every pending request of a session. Idempotent.
    pub async fn expire_all(&self, session_id: SessionId) -> Result<u64> {
        let now = self.clock.now_utc();
        let expired = self.storage.expire_pending_requests(session_id, now).await?;
        if expired > 0 {
            debug!(session_id = %session_id, expired, "expired pending requests");
        }
        Ok(expired)
    }
}

/// Builds the invitation or reminder notification for one request.
pub(crate) fn invitation(
    session: &AttendanceSession,
    request: &SigningRequest,
    reminder: bool,
) -> NotificationRequest {
    let subject = if reminder {
        format!("Reminder: attendance signature needed for {}", session.title)
    } else {
        format!("Attendance signature needed for {}", session.title)
    };
    let body = format!(
        "Hello {},\n\nPlease confirm attendance for \"{}\" on {}.\nOpen the signing link and enter code {} before {}.\n",
        request.recipient_name, session.title, session.date, request.token, session.closes_at,
    );
    NotificationRequest {
        to_name: request.recipient_name.clone(),
        to_email: request.recipient_email.clone(),
        subject,
        body,
    }
}

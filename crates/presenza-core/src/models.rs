//! Core domain models and strongly-typed identifiers.
//!
//! Defines attendance sessions, signing requests, attendance records, and
//! newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits and the state transition tables for the session and
//! request lifecycles.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed attendance session identifier.
///
/// Wraps a UUID to prevent mixing with other ID types.
///
/// # Example
///
/// ```
/// use presenza_core::models::SessionId;
/// let session_id = SessionId::new();
/// println!("launching session: {}", session_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SessionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SessionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SessionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed signing request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Creates a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RequestId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RequestId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed attendance record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Creates a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RecordId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RecordId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RecordId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed student identifier.
///
/// Students are owned by the surrounding system; this subsystem only
/// references them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub Uuid);

impl StudentId {
    /// Creates a new random student ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StudentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StudentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for StudentId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for StudentId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for StudentId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub Uuid);

impl ClassId {
    /// Creates a new random class ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClassId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ClassId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for ClassId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ClassId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for ClassId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Attendance session lifecycle status.
///
/// Transitions are monotonic, a session never returns to an earlier state:
///
/// ```text
/// Draft -> Active -> Closed
///     |          \-> Cancelled
///     \-> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet visible to recipients.
    Draft,

    /// Launched: requests issued, attestations accepted.
    Active,

    /// Finished normally. Terminal.
    Closed,

    /// Abandoned before or during its run. Terminal.
    Cancelled,
}

impl SessionStatus {
    /// The single transition table for the session lifecycle.
    pub const fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Closed)
                | (Self::Draft, Self::Cancelled)
                | (Self::Active, Self::Cancelled)
        )
    }

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl sqlx::Type<PgDb> for SessionStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SessionStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid session status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for SessionStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// How attendance is captured for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Recipients confirm through signing requests.
    Electronic,

    /// Staff mark attendance by hand, no requests are issued.
    Manual,

    /// Requests are issued and staff may also mark by hand.
    Hybrid,
}

impl SessionMode {
    /// Whether launching a session in this mode issues signing requests.
    pub const fn issues_requests(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Electronic => write!(f, "electronic"),
            Self::Manual => write!(f, "manual"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl sqlx::Type<PgDb> for SessionMode {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SessionMode {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "electronic" => Ok(Self::Electronic),
            "manual" => Ok(Self::Manual),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("invalid session mode: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for SessionMode {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Signing request lifecycle status.
///
/// A request is single-use: it leaves `Pending` exactly once and every other
/// state is terminal.
///
/// ```text
/// Pending -> Signed
///        |-> Expired    (deadline passed or parent session closed)
///        |-> Declined   (recipient refused)
///        \-> Cancelled  (withdrawn by the requester)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Issued and waiting for the recipient.
    Pending,

    /// Resolved with a valid attestation. Terminal.
    Signed,

    /// Deadline or parent closure ended it unanswered. Terminal.
    Expired,

    /// Recipient explicitly refused. Terminal.
    Declined,

    /// Withdrawn before resolution. Terminal.
    Cancelled,
}

impl RequestStatus {
    /// The single transition table for the request lifecycle.
    pub const fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Signed)
                | (Self::Pending, Self::Expired)
                | (Self::Pending, Self::Declined)
                | (Self::Pending, Self::Cancelled)
        )
    }

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Signed => write!(f, "signed"),
            Self::Expired => write!(f, "expired"),
            Self::Declined => write!(f, "declined"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl sqlx::Type<PgDb> for RequestStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "signed" => Ok(Self::Signed),
            "expired" => Ok(Self::Expired),
            "declined" => Ok(Self::Declined),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid request status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for RequestStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// How a student's presence was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Attended.
    Present,

    /// Did not attend.
    Absent,

    /// Attended after the start, see `late_minutes`.
    Late,

    /// Absence was excused.
    Excused,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
            Self::Late => write!(f, "late"),
            Self::Excused => write!(f, "excused"),
        }
    }
}

impl sqlx::Type<PgDb> for AttendanceStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttendanceStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            "excused" => Ok(Self::Excused),
            _ => Err(format!("invalid attendance status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for AttendanceStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// An attendance-taking session for one class on one date.
///
/// The session is the signable subject: launching it expands the class roster
/// into signing requests, and its deadline and geofence configuration gate
/// every resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    /// Unique identifier for this session.
    pub id: SessionId,

    /// Class the session belongs to.
    pub class_id: ClassId,

    /// Human-readable title shown in notifications.
    pub title: String,

    /// Calendar date the session covers.
    pub date: NaiveDate,

    /// Current lifecycle status.
    pub status: SessionStatus,

    /// How attendance is captured.
    pub mode: SessionMode,

    /// Optional scheduled start of the meeting itself.
    pub starts_at: Option<DateTime<Utc>>,

    /// Optional scheduled end of the meeting itself.
    pub ends_at: Option<DateTime<Utc>>,

    /// Whether resolutions must carry a signature payload.
    pub require_signature: bool,

    /// Whether resolutions must carry a position that passes the geofence.
    pub require_geolocation: bool,

    /// Reference point for the geofence.
    ///
    /// When absent, positions are accepted without distance verification.
    pub reference_point: Option<GeoPoint>,

    /// Geofence radius in meters, boundary inclusive.
    pub allowed_radius_m: f64,

    /// Deadline after which pending requests can no longer be signed.
    pub closes_at: DateTime<Utc>,

    /// Expected number of recipients.
    ///
    /// Estimated from enrollment at creation, frozen to the actual roster
    /// size at launch.
    pub total_expected: i32,

    /// When the session was launched.
    pub launched_at: Option<DateTime<Utc>>,

    /// When the session was closed.
    pub closed_at: Option<DateTime<Utc>>,

    /// When this session was created.
    pub created_at: DateTime<Utc>,

    /// When this session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AttendanceSession {
    /// Builds a draft session from validated input.
    pub fn draft(new: NewAttendanceSession, total_expected: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            class_id: new.class_id,
            title: new.title,
            date: new.date,
            status: SessionStatus::Draft,
            mode: new.mode,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            require_signature: new.require_signature,
            require_geolocation: new.require_geolocation,
            reference_point: new.reference_point,
            allowed_radius_m: new.allowed_radius_m,
            closes_at: new.closes_at,
            total_expected,
            launched_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for AttendanceSession {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let reference_latitude: Option<f64> = row.try_get("reference_latitude")?;
        let reference_longitude: Option<f64> = row.try_get("reference_longitude")?;

        Ok(Self {
            id: row.try_get("id")?,
            class_id: row.try_get("class_id")?,
            title: row.try_get("title")?,
            date: row.try_get("date")?,
            status: row.try_get("status")?,
            mode: row.try_get("mode")?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            require_signature: row.try_get("require_signature")?,
            require_geolocation: row.try_get("require_geolocation")?,
            reference_point: match (reference_latitude, reference_longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            allowed_radius_m: row.try_get("allowed_radius_m")?,
            closes_at: row.try_get("closes_at")?,
            total_expected: row.try_get("total_expected")?,
            launched_at: row.try_get("launched_at")?,
            closed_at: row.try_get("closed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Input for creating an attendance session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttendanceSession {
    /// Class the session belongs to.
    pub class_id: ClassId,

    /// Human-readable title shown in notifications.
    pub title: String,

    /// Calendar date the session covers.
    pub date: NaiveDate,

    /// How attendance is captured.
    pub mode: SessionMode,

    /// Optional scheduled start of the meeting.
    pub starts_at: Option<DateTime<Utc>>,

    /// Optional scheduled end of the meeting.
    pub ends_at: Option<DateTime<Utc>>,

    /// Whether resolutions must carry a signature payload.
    pub require_signature: bool,

    /// Whether resolutions must carry a verifiable position.
    pub require_geolocation: bool,

    /// Reference point for the geofence.
    pub reference_point: Option<GeoPoint>,

    /// Geofence radius in meters.
    pub allowed_radius_m: f64,

    /// Deadline after which pending requests can no longer be signed.
    pub closes_at: DateTime<Utc>,
}

/// A single-use signing request addressed to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Unique identifier for this request.
    pub id: RequestId,

    /// Session this request belongs to.
    pub session_id: SessionId,

    /// Student being asked to attest.
    pub student_id: StudentId,

    /// Recipient display name used in notifications.
    pub recipient_name: String,

    /// Recipient contact address.
    pub recipient_email: String,

    /// Unguessable single-use token identifying this request.
    ///
    /// Storage enforces global uniqueness with a unique index.
    pub token: String,

    /// Current lifecycle status.
    pub status: RequestStatus,

    /// When the request was resolved, for signed requests.
    pub signed_at: Option<DateTime<Utc>>,

    /// Attendance record produced by resolution.
    pub attendance_record_id: Option<RecordId>,

    /// Captured signature payload.
    pub signature_data: Option<String>,

    /// Position reported at resolution.
    pub location: Option<GeoPoint>,

    /// Reported GPS accuracy in meters.
    pub location_accuracy: Option<f64>,

    /// Whether the position passed a measured geofence check.
    pub location_verified: bool,

    /// Client IP captured at resolution.
    pub ip_address: Option<String>,

    /// Client user agent captured at resolution.
    pub user_agent: Option<String>,

    /// Number of reminder notifications sent.
    pub reminder_count: i32,

    /// When the latest reminder was sent.
    pub last_reminder_at: Option<DateTime<Utc>>,

    /// When this request was created.
    pub created_at: DateTime<Utc>,

    /// When this request was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SigningRequest {
    /// Builds a new pending request for one recipient.
    pub fn pending(
        session_id: SessionId,
        student_id: StudentId,
        recipient_name: String,
        recipient_email: String,
        token: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            session_id,
            student_id,
            recipient_name,
            recipient_email,
            token,
            status: RequestStatus::Pending,
            signed_at: None,
            attendance_record_id: None,
            signature_data: None,
            location: None,
            location_accuracy: None,
            location_verified: false,
            ip_address: None,
            user_agent: None,
            reminder_count: 0,
            last_reminder_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for SigningRequest {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let latitude: Option<f64> = row.try_get("latitude")?;
        let longitude: Option<f64> = row.try_get("longitude")?;

        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            student_id: row.try_get("student_id")?,
            recipient_name: row.try_get("recipient_name")?,
            recipient_email: row.try_get("recipient_email")?,
            token: row.try_get("token")?,
            status: row.try_get("status")?,
            signed_at: row.try_get("signed_at")?,
            attendance_record_id: row.try_get("attendance_record_id")?,
            signature_data: row.try_get("signature_data")?,
            location: match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            location_accuracy: row.try_get("location_accuracy")?,
            location_verified: row.try_get("location_verified")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            reminder_count: row.try_get("reminder_count")?,
            last_reminder_at: row.try_get("last_reminder_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One student's attendance for one session or class date.
///
/// Identified by the composite key (student, class, session, date). Writes
/// always go through the upsert path, so repeated captures converge on a
/// single row with last-write-wins semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique identifier for this record.
    pub id: RecordId,

    /// Student the record is about.
    pub student_id: StudentId,

    /// Class the record counts toward.
    pub class_id: ClassId,

    /// Session that produced the record, when attested electronically.
    pub session_id: Option<SessionId>,

    /// Calendar date the record covers.
    pub date: NaiveDate,

    /// Recorded presence status.
    pub status: AttendanceStatus,

    /// Minutes late, zero unless status is `Late`.
    pub late_minutes: i32,

    /// Reference to the captured signature blob.
    pub signature_url: Option<String>,

    /// Position reported at capture.
    pub location: Option<GeoPoint>,

    /// Reported GPS accuracy in meters.
    pub location_accuracy: Option<f64>,

    /// Whether the position passed a measured geofence check.
    pub location_verified: bool,

    /// Who marked the record, for manual captures.
    pub marked_by: Option<String>,

    /// Free-form notes.
    pub notes: Option<String>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AttendanceRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let latitude: Option<f64> = row.try_get("latitude")?;
        let longitude: Option<f64> = row.try_get("longitude")?;

        Ok(Self {
            id: row.try_get("id")?,
            student_id: row.try_get("student_id")?,
            class_id: row.try_get("class_id")?,
            session_id: row.try_get("session_id")?,
            date: row.try_get("date")?,
            status: row.try_get("status")?,
            late_minutes: row.try_get("late_minutes")?,
            signature_url: row.try_get("signature_url")?,
            location: match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            location_accuracy: row.try_get("location_accuracy")?,
            location_verified: row.try_get("location_verified")?,
            marked_by: row.try_get("marked_by")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Input for upserting an attendance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttendanceRecord {
    /// Student the record is about.
    pub student_id: StudentId,

    /// Class the record counts toward.
    pub class_id: ClassId,

    /// Session that produced the record, if any.
    pub session_id: Option<SessionId>,

    /// Calendar date the record covers.
    pub date: NaiveDate,

    /// Presence status to record.
    pub status: AttendanceStatus,

    /// Minutes late, zero unless status is `Late`.
    pub late_minutes: i32,

    /// Reference to the captured signature blob.
    pub signature_url: Option<String>,

    /// Position reported at capture.
    pub location: Option<GeoPoint>,

    /// Reported GPS accuracy in meters.
    pub location_accuracy: Option<f64>,

    /// Whether the position passed a measured geofence check.
    pub location_verified: bool,

    /// Who marked the record, for manual captures.
    pub marked_by: Option<String>,

    /// Free-form notes.
    pub notes: Option<String>,
}

impl NewAttendanceRecord {
    /// A plain record with no signature or geo capture.
    pub fn unattested(
        student_id: StudentId,
        class_id: ClassId,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Self {
        Self {
            student_id,
            class_id,
            session_id: None,
            date,
            status,
            late_minutes: 0,
            signature_url: None,
            location: None,
            location_accuracy: None,
            location_verified: false,
            marked_by: None,
            notes: None,
        }
    }
}

/// Evidence captured from the recipient when a request is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCapture {
    /// Captured signature payload.
    pub signature_data: Option<String>,

    /// Position reported by the recipient.
    pub location: Option<GeoPoint>,

    /// Reported GPS accuracy in meters.
    pub location_accuracy: Option<f64>,

    /// Whether the position passed a measured geofence check.
    pub location_verified: bool,

    /// Client IP address.
    pub ip_address: Option<String>,

    /// Client user agent.
    pub user_agent: Option<String>,
}

/// Per-status attendance tallies as returned by the aggregate queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct StatusCounts {
    /// All matching records.
    pub total: i64,

    /// Records marked present.
    pub present: i64,

    /// Records marked absent.
    pub absent: i64,

    /// Records marked late.
    pub late: i64,

    /// Records marked excused.
    pub excused: i64,
}

/// Attendance statistics with the derived presence rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttendanceStats {
    /// All matching records.
    pub total: i64,

    /// Records marked present.
    pub present: i64,

    /// Records marked absent.
    pub absent: i64,

    /// Records marked late.
    pub late: i64,

    /// Records marked excused.
    pub excused: i64,

    /// Fraction of records marked present, in `0.0..=1.0`.
    ///
    /// Zero when there are no records at all, never a division error.
    pub attendance_rate: f64,
}

impl From<StatusCounts> for AttendanceStats {
    fn from(counts: StatusCounts) -> Self {
        let attendance_rate = if counts.total == 0 {
            0.0
        } else {
            counts.present as f64 / counts.total as f64
        };
        Self {
            total: counts.total,
            present: counts.present,
            absent: counts.absent,
            late: counts.late,
            excused: counts.excused,
            attendance_rate,
        }
    }
}

//! Core domain types and Postgres storage for the attendance attestation
//! service.
//!
//! This crate holds everything the workflow layer builds on: newtype
//! identifiers, the status machines for sessions, signing requests and
//! attendance records, geodesic distance checks, the injectable clock, and
//! the repositories that persist it all.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod geo;
pub mod models;
pub mod storage;
pub mod time;

pub use error::CoreError;
pub use geo::{GeoPoint, GeofenceCheck};
pub use models::{
    AttendanceRecord, AttendanceSession, AttendanceStats, AttendanceStatus, ClassId,
    NewAttendanceRecord, NewAttendanceSession, RecordId, RequestId, RequestStatus, SessionId,
    SessionMode, SessionStatus, SignatureCapture, SigningRequest, StatusCounts, StudentId,
};
pub use storage::Storage;
pub use time::{Clock, RealClock, TestClock};

//! Test data builders and fixtures for deterministic testing.
//!
//! Provides builder patterns for sessions and roster recipients with
//! configurable properties and sensible defaults, plus ready-made scenarios
//! shared across integration tests.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use presenza_core::{
    models::{ClassId, NewAttendanceSession, SessionMode, StudentId},
    GeoPoint,
};
use presenza_workflow::{roster::Recipient, DEFAULT_ALLOWED_RADIUS_M};

/// Fixed instant fixtures anchor to: 2025-03-10 08:00:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0)
        .single()
        .expect("fixture timestamp is valid")
}

/// The calendar date of [`base_time`].
pub fn base_date() -> NaiveDate {
    base_time().date_naive()
}

/// Builder for session creation input.
pub struct SessionBuilder {
    class_id: Option<ClassId>,
    title: Option<String>,
    date: Option<NaiveDate>,
    mode: SessionMode,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    require_signature: bool,
    require_geolocation: bool,
    reference_point: Option<GeoPoint>,
    allowed_radius_m: f64,
    closes_at: Option<DateTime<Utc>>,
}

impl SessionBuilder {
    /// Creates a session builder with sensible defaults: electronic mode,
    /// signature required, no geofence, closing two hours after
    /// [`base_time`].
    pub fn with_defaults() -> Self {
        Self {
            class_id: None,
            title: Some("Morning lecture".to_string()),
            date: Some(base_date()),
            mode: SessionMode::Electronic,
            starts_at: None,
            ends_at: None,
            require_signature: true,
            require_geolocation: false,
            reference_point: None,
            allowed_radius_m: DEFAULT_ALLOWED_RADIUS_M,
            closes_at: None,
        }
    }

    /// Sets the class the session belongs to.
    #[must_use]
    pub fn class(mut self, class_id: ClassId) -> Self {
        self.class_id = Some(class_id);
        self
    }

    /// Sets the session title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the calendar date the session covers.
    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the capture mode.
    #[must_use]
    pub fn mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the scheduled meeting window.
    #[must_use]
    pub fn window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }

    /// Toggles the signature requirement.
    #[must_use]
    pub fn require_signature(mut self, required: bool) -> Self {
        self.require_signature = required;
        self
    }

    /// Requires geolocation against the given reference point.
    #[must_use]
    pub fn geofenced(mut self, reference: GeoPoint, radius_m: f64) -> Self {
        self.require_geolocation = true;
        self.reference_point = Some(reference);
        self.allowed_radius_m = radius_m;
        self
    }

    /// Sets the signing deadline.
    #[must_use]
    pub fn closes_at(mut self, closes_at: DateTime<Utc>) -> Self {
        self.closes_at = Some(closes_at);
        self
    }

    /// Builds the session creation input.
    pub fn build(self) -> NewAttendanceSession {
        NewAttendanceSession {
            class_id: self.class_id.unwrap_or_else(ClassId::new),
            title: self.title.unwrap_or_else(|| "Test session".to_string()),
            date: self.date.unwrap_or_else(base_date),
            mode: self.mode,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            require_signature: self.require_signature,
            require_geolocation: self.require_geolocation,
            reference_point: self.reference_point,
            allowed_radius_m: self.allowed_radius_m,
            closes_at: self.closes_at.unwrap_or_else(|| base_time() + Duration::hours(2)),
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Builder for roster recipients.
pub struct RecipientBuilder {
    student_id: Option<StudentId>,
    name: Option<String>,
    email: Option<String>,
}

impl RecipientBuilder {
    /// Creates a recipient builder; unset fields get generated identities.
    pub fn with_defaults() -> Self {
        Self {
            student_id: None,
            name: None,
            email: None,
        }
    }

    /// Sets the student identifier.
    #[must_use]
    pub fn student(mut self, student_id: StudentId) -> Self {
        self.student_id = Some(student_id);
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the contact address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Builds the recipient.
    pub fn build(self) -> Recipient {
        let student_id = self.student_id.unwrap_or_else(StudentId::new);
        Recipient {
            student_id,
            name: self.name.unwrap_or_else(|| format!("Student {student_id}")),
            email: self
                .email
                .unwrap_or_else(|| format!("student-{student_id}@example.edu")),
        }
    }
}

impl Default for RecipientBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Ready-made setups shared across integration tests.
pub mod scenarios {
    use super::*;

    /// Reference point used by geofenced scenarios: central Paris.
    pub const PARIS: GeoPoint = GeoPoint {
        latitude: 48.8566,
        longitude: 2.3522,
    };

    /// A point roughly 500 meters north of [`PARIS`].
    pub fn near_paris_500m() -> GeoPoint {
        GeoPoint {
            latitude: PARIS.latitude + 0.004491,
            longitude: PARIS.longitude,
        }
    }

    /// A geofenced electronic session around [`PARIS`] with a 100 meter
    /// radius, closing two hours after [`base_time`].
    pub fn paris_session(class_id: ClassId) -> NewAttendanceSession {
        SessionBuilder::with_defaults()
            .class(class_id)
            .title("Geofenced lecture")
            .geofenced(PARIS, 100.0)
            .build()
    }

    /// A roster of `n` distinct recipients with stable names and addresses.
    pub fn class_roster(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| {
                RecipientBuilder::with_defaults()
                    .name(format!("Student {i}"))
                    .email(format!("student-{i}@example.edu"))
                    .build()
            })
            .collect()
    }
}

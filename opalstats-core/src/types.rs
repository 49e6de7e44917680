//! Core domain types for opalstats
//!
//! These types mirror the two relational schemas the engine reads
//! (the modern patient/caregiver model and the legacy hospital schema)
//! and the three daily result tables it owns.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Patient** | A person whose clinical data is delivered through the portal |
//! | **Caregiver** | A portal user; may be the patient themselves (self relationship) |
//! | **Relationship** | A caregiver-to-patient access grant with a status and validity window |
//! | **Legacy ID** | A patient's serial number in the legacy hospital schema |
//! | **Activity log** | The legacy append-only table of app requests per user |
//! | **Received data** | Clinical data delivered to a patient's record, tracked separately from clicks |
//! | **Watermark** | The persisted last-aggregated date per result table |

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Modern schema enums
// ============================================

/// Status of a caregiver-to-patient relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Pending,
    Confirmed,
    Denied,
    Expired,
    Revoked,
}

impl RelationshipStatus {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Confirmed => "confirmed",
            RelationshipStatus::Denied => "denied",
            RelationshipStatus::Expired => "expired",
            RelationshipStatus::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationshipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RelationshipStatus::Pending),
            "confirmed" => Ok(RelationshipStatus::Confirmed),
            "denied" => Ok(RelationshipStatus::Denied),
            "expired" => Ok(RelationshipStatus::Expired),
            "revoked" => Ok(RelationshipStatus::Revoked),
            _ => Err(format!("unknown relationship status: {}", s)),
        }
    }
}

/// Status of a registration code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationCodeStatus {
    New,
    Registered,
    Expired,
    Blocked,
}

impl RegistrationCodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationCodeStatus::New => "new",
            RegistrationCodeStatus::Registered => "registered",
            RegistrationCodeStatus::Expired => "expired",
            RegistrationCodeStatus::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for RegistrationCodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(RegistrationCodeStatus::New),
            "registered" => Ok(RegistrationCodeStatus::Registered),
            "expired" => Ok(RegistrationCodeStatus::Expired),
            "blocked" => Ok(RegistrationCodeStatus::Blocked),
            _ => Err(format!("unknown registration code status: {}", s)),
        }
    }
}

/// Patient sex as recorded in the modern schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SexType {
    Male,
    Female,
    Other,
    Unknown,
}

impl SexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SexType::Male => "M",
            SexType::Female => "F",
            SexType::Other => "O",
            SexType::Unknown => "U",
        }
    }
}

impl std::str::FromStr for SexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(SexType::Male),
            "F" => Ok(SexType::Female),
            "O" => Ok(SexType::Other),
            "U" => Ok(SexType::Unknown),
            _ => Err(format!("unknown sex type: {}", s)),
        }
    }
}

/// Patient data access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataAccessType {
    /// Full access to all data
    All,
    /// Need-to-know subset only
    NeedToKnow,
}

impl DataAccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataAccessType::All => "ALL",
            DataAccessType::NeedToKnow => "NTK",
        }
    }
}

impl std::str::FromStr for DataAccessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(DataAccessType::All),
            "NTK" => Ok(DataAccessType::NeedToKnow),
            _ => Err(format!("unknown data access type: {}", s)),
        }
    }
}

/// Device platform, as encoded in the legacy device identifier table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Ios,
    Android,
    Browser,
}

impl DeviceType {
    /// Returns the integer code used in the legacy table (0=iOS, 1=Android, 3=browser)
    pub fn legacy_code(&self) -> i64 {
        match self {
            DeviceType::Ios => 0,
            DeviceType::Android => 1,
            DeviceType::Browser => 3,
        }
    }

    /// Parse the legacy integer code
    pub fn from_legacy_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DeviceType::Ios),
            1 => Some(DeviceType::Android),
            3 => Some(DeviceType::Browser),
            _ => None,
        }
    }
}

// ============================================
// Grouping granularity for summary queries
// ============================================

/// Time bucket granularity for grouped summary queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Day,
    Month,
    Year,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Day => "day",
            GroupBy::Month => "month",
            GroupBy::Year => "year",
        }
    }

    /// SQLite strftime pattern that truncates `action_date` to this bucket
    pub(crate) fn bucket_format(&self) -> &'static str {
        match self {
            GroupBy::Day => "%Y-%m-%d",
            GroupBy::Month => "%Y-%m-01",
            GroupBy::Year => "%Y-01-01",
        }
    }
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" | "Day" => Ok(GroupBy::Day),
            "month" | "Month" => Ok(GroupBy::Month),
            "year" | "Year" => Ok(GroupBy::Year),
            _ => Err(format!("unknown group-by component: {}", s)),
        }
    }
}

// ============================================
// Legacy activity log
// ============================================

/// One row of the legacy patient activity log (read-only source).
///
/// `parameters` is a free-form JSON string (or the sentinel `"OMITTED"`,
/// or empty); its schema depends on `request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawActivityEntry {
    /// Row id in the legacy table
    pub id: i64,
    /// Free-text request tag, e.g. `Login`, `Checkin`, `DeviceIdentifier`
    pub request: String,
    /// JSON-encoded parameter blob, `"OMITTED"`, or empty
    pub parameters: String,
    /// Legacy serial number of the patient the request targeted, if any
    pub target_patient_id: Option<i64>,
    /// Username of the caregiver who made the request
    pub username: String,
    /// When the request happened
    pub date_time: DateTime<Utc>,
    /// App version reported by the client
    pub app_version: String,
}

// ============================================
// Result rows (owned by the engine)
// ============================================

/// One row of per-user daily app activity (at most one per user per day).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyUserAppActivity {
    /// The acting user
    pub action_by_user_id: i64,
    /// Most recent login timestamp within the day, if the user logged in
    pub last_login: Option<DateTime<Utc>>,
    pub count_logins: i64,
    pub count_feedback: i64,
    pub count_update_security_answers: i64,
    pub count_update_passwords: i64,
    pub count_update_language: i64,
    pub count_device_ios: i64,
    pub count_device_android: i64,
    pub count_device_browser: i64,
    /// The day the activity happened (local date)
    pub action_date: NaiveDate,
}

/// One row of per-relationship daily patient activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUserPatientActivity {
    /// The relationship through which the user accessed the patient
    pub relationship_id: i64,
    /// The acting user
    pub action_by_user_id: i64,
    /// The accessed patient
    pub patient_id: i64,
    pub count_checkins: i64,
    pub count_documents: i64,
    pub count_educational_materials: i64,
    pub count_questionnaires_complete: i64,
    pub count_labs: i64,
    /// The day the activity happened (local date)
    pub action_date: NaiveDate,
}

/// One row of per-patient daily received clinical data.
///
/// `last_*_received` timestamps are the most recent record as of the end of
/// the aggregation window (unbounded look-back); `*_received` counts are
/// window-bounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyPatientDataReceived {
    /// The patient (modern schema id)
    pub patient_id: i64,
    /// Soonest open appointment scheduled after the window end
    pub next_appointment: Option<DateTime<Utc>>,
    pub last_appointment_received: Option<DateTime<Utc>>,
    pub appointments_received: i64,
    pub last_document_received: Option<DateTime<Utc>>,
    pub documents_received: i64,
    pub last_educational_material_received: Option<DateTime<Utc>>,
    pub educational_materials_received: i64,
    pub last_questionnaire_received: Option<DateTime<Utc>>,
    pub questionnaires_received: i64,
    pub last_lab_received: Option<DateTime<Utc>>,
    pub labs_received: i64,
    /// The day the data was received (local date, from the window)
    pub action_date: NaiveDate,
}

//! Activity log classification
//!
//! Maps free-text legacy activity log entries onto a closed set of
//! recognized activity kinds. Classification never fails: entries that
//! do not match any recognized kind, or whose JSON payload is
//! unparseable where a sub-type depends on it, are either routed to a
//! default branch or ignored.

use serde::Deserialize;

use crate::types::RawActivityEntry;

/// A recognized activity kind.
///
/// User-scoped kinds count against the acting user's daily row;
/// patient-scoped kinds additionally require a resolvable
/// caregiver-to-patient relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    // User-scoped
    Login,
    Feedback,
    SecurityAnswerUpdate,
    PasswordUpdate,
    LanguageUpdate,
    DeviceIos,
    DeviceAndroid,
    DeviceBrowser,
    // Patient-scoped
    Checkin,
    DocumentView,
    EducationalMaterialView,
    QuestionnaireComplete,
    LabView,
}

impl ActivityKind {
    /// Whether this kind counts against a patient's daily row
    pub fn is_patient_scoped(&self) -> bool {
        matches!(
            self,
            ActivityKind::Checkin
                | ActivityKind::DocumentView
                | ActivityKind::EducationalMaterialView
                | ActivityKind::QuestionnaireComplete
                | ActivityKind::LabView
        )
    }
}

/// Payload of an `AccountChange` request
#[derive(Debug, Deserialize)]
struct AccountChangePayload {
    #[serde(rename = "FieldToChange")]
    field_to_change: String,
}

/// Payload of a `DeviceIdentifier` request
#[derive(Debug, Deserialize)]
struct DevicePayload {
    #[serde(rename = "deviceType")]
    device_type: String,
}

/// Payload of a `Log` request
#[derive(Debug, Deserialize)]
struct LogPayload {
    #[serde(rename = "Activity")]
    activity: String,
}

/// Classify a raw activity log entry.
///
/// Returns `None` for request types outside the recognized set
/// (`Logout`, `QuestionnaireNumberUnread`, and anything else the app
/// logs that has no counter), and for sub-typed requests whose payload
/// names an unrecognized sub-type.
pub fn classify(entry: &RawActivityEntry) -> Option<ActivityKind> {
    match entry.request.as_str() {
        "Login" => Some(ActivityKind::Login),
        "Feedback" => Some(ActivityKind::Feedback),
        "UpdateSecurityQuestionAnswer" => Some(ActivityKind::SecurityAnswerUpdate),
        "AccountChange" => {
            // Payloads are often redacted to "OMITTED"; anything that is
            // not an explicit language change counts as a password change.
            match serde_json::from_str::<AccountChangePayload>(&entry.parameters) {
                Ok(payload) if payload.field_to_change == "Language" => {
                    Some(ActivityKind::LanguageUpdate)
                }
                _ => Some(ActivityKind::PasswordUpdate),
            }
        }
        "DeviceIdentifier" => {
            let payload = serde_json::from_str::<DevicePayload>(&entry.parameters).ok()?;
            match payload.device_type.to_lowercase().as_str() {
                "ios" => Some(ActivityKind::DeviceIos),
                "android" => Some(ActivityKind::DeviceAndroid),
                "browser" => Some(ActivityKind::DeviceBrowser),
                other => {
                    tracing::debug!(device_type = other, "ignoring unknown device type");
                    None
                }
            }
        }
        "Checkin" => Some(ActivityKind::Checkin),
        "DocumentContent" => Some(ActivityKind::DocumentView),
        "Log" => {
            let payload = serde_json::from_str::<LogPayload>(&entry.parameters).ok()?;
            if payload.activity == "EducationalMaterialSerNum" {
                Some(ActivityKind::EducationalMaterialView)
            } else {
                None
            }
        }
        "QuestionnaireUpdateStatus" => Some(ActivityKind::QuestionnaireComplete),
        "PatientTestTypeResults" | "PatientTestDateResults" => Some(ActivityKind::LabView),
        _ => None,
    }
}

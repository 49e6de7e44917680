//! Activity log reduction
//!
//! Classifies a window of activity log entries and reduces them into
//! per-user and per-relationship daily rows with explicit accumulator
//! state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::classify::{classify, ActivityKind};
use crate::relationships::{RelationshipMapping, ResolvedAccess};
use crate::types::{DailyUserAppActivity, DailyUserPatientActivity, RawActivityEntry};

use super::AggregationWindow;

/// Counter state for one user's day
#[derive(Debug, Default)]
pub struct UserActivityAccumulator {
    last_login: Option<DateTime<Utc>>,
    count_logins: i64,
    count_feedback: i64,
    count_update_security_answers: i64,
    count_update_passwords: i64,
    count_update_language: i64,
    count_device_ios: i64,
    count_device_android: i64,
    count_device_browser: i64,
}

impl UserActivityAccumulator {
    fn record(&mut self, kind: ActivityKind, at: DateTime<Utc>) {
        match kind {
            ActivityKind::Login => {
                self.count_logins += 1;
                self.last_login = Some(match self.last_login {
                    Some(existing) => existing.max(at),
                    None => at,
                });
            }
            ActivityKind::Feedback => self.count_feedback += 1,
            ActivityKind::SecurityAnswerUpdate => self.count_update_security_answers += 1,
            ActivityKind::PasswordUpdate => self.count_update_passwords += 1,
            ActivityKind::LanguageUpdate => self.count_update_language += 1,
            ActivityKind::DeviceIos => self.count_device_ios += 1,
            ActivityKind::DeviceAndroid => self.count_device_android += 1,
            ActivityKind::DeviceBrowser => self.count_device_browser += 1,
            _ => {}
        }
    }

    fn into_row(self, user_id: i64, window: &AggregationWindow) -> DailyUserAppActivity {
        DailyUserAppActivity {
            action_by_user_id: user_id,
            last_login: self.last_login,
            count_logins: self.count_logins,
            count_feedback: self.count_feedback,
            count_update_security_answers: self.count_update_security_answers,
            count_update_passwords: self.count_update_passwords,
            count_update_language: self.count_update_language,
            count_device_ios: self.count_device_ios,
            count_device_android: self.count_device_android,
            count_device_browser: self.count_device_browser,
            action_date: window.day,
        }
    }
}

/// Counter state for one relationship's day
#[derive(Debug, Default)]
pub struct PatientActivityAccumulator {
    count_checkins: i64,
    count_documents: i64,
    count_educational_materials: i64,
    count_questionnaires_complete: i64,
    count_labs: i64,
}

impl PatientActivityAccumulator {
    fn record(&mut self, kind: ActivityKind) {
        match kind {
            ActivityKind::Checkin => self.count_checkins += 1,
            ActivityKind::DocumentView => self.count_documents += 1,
            ActivityKind::EducationalMaterialView => self.count_educational_materials += 1,
            ActivityKind::QuestionnaireComplete => self.count_questionnaires_complete += 1,
            ActivityKind::LabView => self.count_labs += 1,
            _ => {}
        }
    }

    fn into_row(self, access: ResolvedAccess, window: &AggregationWindow) -> DailyUserPatientActivity {
        DailyUserPatientActivity {
            relationship_id: access.relationship_id,
            action_by_user_id: access.user_id,
            patient_id: access.patient_id,
            count_checkins: self.count_checkins,
            count_documents: self.count_documents,
            count_educational_materials: self.count_educational_materials,
            count_questionnaires_complete: self.count_questionnaires_complete,
            count_labs: self.count_labs,
            action_date: window.day,
        }
    }
}

/// The reduced rows for one window, plus skip counters
#[derive(Debug, Default)]
pub struct ActivityAggregation {
    pub user_rows: Vec<DailyUserAppActivity>,
    pub patient_rows: Vec<DailyUserPatientActivity>,
    /// Patient-scoped entries with no usable relationship (or no target)
    pub skipped_unresolved: usize,
    /// User-scoped entries whose username has no user record
    pub skipped_unknown_users: usize,
}

/// Reduce one window of activity entries into daily rows.
///
/// Unclassifiable entries are ignored. Patient-scoped entries that do
/// not resolve through the mapping, and user-scoped entries whose
/// username is unknown, are dropped and counted.
pub fn aggregate_window(
    entries: &[RawActivityEntry],
    mapping: &RelationshipMapping,
    user_ids: &HashMap<String, i64>,
    window: &AggregationWindow,
) -> ActivityAggregation {
    let mut users: BTreeMap<i64, UserActivityAccumulator> = BTreeMap::new();
    let mut patients: BTreeMap<i64, (ResolvedAccess, PatientActivityAccumulator)> =
        BTreeMap::new();
    let mut result = ActivityAggregation::default();

    for entry in entries {
        let Some(kind) = classify(entry) else {
            continue;
        };

        if kind.is_patient_scoped() {
            let Some(legacy_patient_id) = entry.target_patient_id else {
                tracing::debug!(entry = entry.id, "patient-scoped entry without a target");
                result.skipped_unresolved += 1;
                continue;
            };
            let Some(access) = mapping.resolve(legacy_patient_id, &entry.username) else {
                tracing::debug!(
                    entry = entry.id,
                    username = %entry.username,
                    legacy_patient_id,
                    "no usable relationship, dropping entry"
                );
                result.skipped_unresolved += 1;
                continue;
            };
            patients
                .entry(access.relationship_id)
                .or_insert_with(|| (access, PatientActivityAccumulator::default()))
                .1
                .record(kind);
        } else {
            let Some(&user_id) = user_ids.get(&entry.username) else {
                tracing::debug!(
                    entry = entry.id,
                    username = %entry.username,
                    "unknown username, dropping entry"
                );
                result.skipped_unknown_users += 1;
                continue;
            };
            users
                .entry(user_id)
                .or_default()
                .record(kind, entry.date_time);
        }
    }

    result.user_rows = users
        .into_iter()
        .map(|(user_id, acc)| acc.into_row(user_id, window))
        .collect();
    result.patient_rows = patients
        .into_values()
        .map(|(access, acc)| acc.into_row(access, window))
        .collect();
    result
}

//! Relationship resolution for patient-scoped activity
//!
//! A patient-scoped activity log entry names a legacy patient and a
//! username; attribution requires an active caregiver-to-patient
//! relationship between the two. The mapping is rebuilt from the
//! filtered relationship query at the start of every aggregation run
//! and never persisted.

use std::collections::HashMap;

use crate::db::repo::RelationshipRow;

/// The relationship and user an activity entry resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAccess {
    pub relationship_id: i64,
    pub user_id: i64,
    pub patient_id: i64,
}

#[derive(Debug, Default)]
struct PatientEntry {
    patient_id: i64,
    by_username: HashMap<String, (i64, i64)>, // username -> (relationship_id, user_id)
}

/// legacy patient id → patient and the users allowed to act on it
#[derive(Debug, Default)]
pub struct RelationshipMapping {
    by_legacy_id: HashMap<i64, PatientEntry>,
}

impl RelationshipMapping {
    /// Build the mapping from pre-filtered relationship rows.
    ///
    /// Later rows for the same (legacy patient, username) overwrite
    /// earlier ones.
    pub fn build(rows: &[RelationshipRow]) -> Self {
        let mut by_legacy_id: HashMap<i64, PatientEntry> = HashMap::new();
        for row in rows {
            let entry = by_legacy_id.entry(row.legacy_patient_id).or_default();
            entry.patient_id = row.patient_id;
            entry
                .by_username
                .insert(row.username.clone(), (row.relationship_id, row.user_id));
        }
        Self { by_legacy_id }
    }

    /// Resolve (legacy patient id, username) to a relationship, if the
    /// user may act on the patient
    pub fn resolve(&self, legacy_patient_id: i64, username: &str) -> Option<ResolvedAccess> {
        let entry = self.by_legacy_id.get(&legacy_patient_id)?;
        let (relationship_id, user_id) = *entry.by_username.get(username)?;
        Some(ResolvedAccess {
            relationship_id,
            user_id,
            patient_id: entry.patient_id,
        })
    }

    /// Number of legacy patients with at least one usable relationship
    pub fn patient_count(&self) -> usize {
        self.by_legacy_id.len()
    }
}

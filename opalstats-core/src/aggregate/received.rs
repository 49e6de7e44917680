//! Received-data aggregation
//!
//! One output row per legacy patient with a control record, computed
//! through per-category correlated scalar subqueries:
//! - `last_*_received` is the most recent record before the window end,
//!   with unbounded look-back (appointments by scheduled start time,
//!   every other category by `date_added`);
//! - `*_received` counts records whose `date_added` falls inside the
//!   window;
//! - `next_appointment` is the soonest open appointment scheduled after
//!   the window end.

use chrono::{DateTime, Utc};
use rusqlite::named_params;

use crate::db::Database;
use crate::error::Result;
use crate::types::DailyPatientDataReceived;

use super::AggregationWindow;

const RECEIVED_SQL: &str = r#"
SELECT
    pc.patient_ser_num,
    (SELECT MIN(a.scheduled_start_time) FROM legacy_appointments a
     WHERE a.patient_ser_num = pc.patient_ser_num
       AND a.state = 'Active' AND a.status = 'Open'
       AND a.scheduled_start_time > :end),
    (SELECT MAX(a.scheduled_start_time) FROM legacy_appointments a
     WHERE a.patient_ser_num = pc.patient_ser_num
       AND a.scheduled_start_time < :end),
    (SELECT COUNT(*) FROM legacy_appointments a
     WHERE a.patient_ser_num = pc.patient_ser_num
       AND a.date_added BETWEEN :start AND :end),
    (SELECT MAX(d.date_added) FROM legacy_documents d
     WHERE d.patient_ser_num = pc.patient_ser_num
       AND d.date_added < :end),
    (SELECT COUNT(*) FROM legacy_documents d
     WHERE d.patient_ser_num = pc.patient_ser_num
       AND d.date_added BETWEEN :start AND :end),
    (SELECT MAX(e.date_added) FROM legacy_educational_materials e
     WHERE e.patient_ser_num = pc.patient_ser_num
       AND e.date_added < :end),
    (SELECT COUNT(*) FROM legacy_educational_materials e
     WHERE e.patient_ser_num = pc.patient_ser_num
       AND e.date_added BETWEEN :start AND :end),
    (SELECT MAX(q.date_added) FROM legacy_questionnaires q
     WHERE q.patient_ser_num = pc.patient_ser_num
       AND q.date_added < :end),
    (SELECT COUNT(*) FROM legacy_questionnaires q
     WHERE q.patient_ser_num = pc.patient_ser_num
       AND q.date_added BETWEEN :start AND :end),
    (SELECT MAX(t.date_added) FROM legacy_patient_test_results t
     WHERE t.patient_ser_num = pc.patient_ser_num
       AND t.date_added < :end),
    (SELECT COUNT(*) FROM legacy_patient_test_results t
     WHERE t.patient_ser_num = pc.patient_ser_num
       AND t.date_added BETWEEN :start AND :end)
FROM legacy_patient_control pc
ORDER BY pc.patient_ser_num
"#;

struct ReceivedRow {
    patient_ser_num: i64,
    next_appointment: Option<String>,
    last_appointment_received: Option<String>,
    appointments_received: i64,
    last_document_received: Option<String>,
    documents_received: i64,
    last_educational_material_received: Option<String>,
    educational_materials_received: i64,
    last_questionnaire_received: Option<String>,
    questionnaires_received: i64,
    last_lab_received: Option<String>,
    labs_received: i64,
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compute the received-data rows for one window.
///
/// Returns the rows plus the number of control-record patients that
/// have no modern patient record and were skipped.
pub fn aggregate_received(
    db: &Database,
    window: &AggregationWindow,
) -> Result<(Vec<DailyPatientDataReceived>, usize)> {
    let patient_map = db.patients_by_legacy_id()?;

    let raw_rows = {
        let conn = db.connection();
        let mut stmt = conn.prepare(RECEIVED_SQL)?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":start": window.start.to_rfc3339(),
                    ":end": window.end.to_rfc3339(),
                },
                |row| {
                    Ok(ReceivedRow {
                        patient_ser_num: row.get(0)?,
                        next_appointment: row.get(1)?,
                        last_appointment_received: row.get(2)?,
                        appointments_received: row.get(3)?,
                        last_document_received: row.get(4)?,
                        documents_received: row.get(5)?,
                        last_educational_material_received: row.get(6)?,
                        educational_materials_received: row.get(7)?,
                        last_questionnaire_received: row.get(8)?,
                        questionnaires_received: row.get(9)?,
                        last_lab_received: row.get(10)?,
                        labs_received: row.get(11)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut result = Vec::with_capacity(raw_rows.len());
    let mut skipped = 0;
    for raw in raw_rows {
        let Some(&patient_id) = patient_map.get(&raw.patient_ser_num) else {
            tracing::warn!(
                patient_ser_num = raw.patient_ser_num,
                "legacy patient has no modern record, skipping"
            );
            skipped += 1;
            continue;
        };
        result.push(DailyPatientDataReceived {
            patient_id,
            next_appointment: raw.next_appointment.as_deref().and_then(parse_ts),
            last_appointment_received: raw.last_appointment_received.as_deref().and_then(parse_ts),
            appointments_received: raw.appointments_received,
            last_document_received: raw.last_document_received.as_deref().and_then(parse_ts),
            documents_received: raw.documents_received,
            last_educational_material_received: raw
                .last_educational_material_received
                .as_deref()
                .and_then(parse_ts),
            educational_materials_received: raw.educational_materials_received,
            last_questionnaire_received: raw
                .last_questionnaire_received
                .as_deref()
                .and_then(parse_ts),
            questionnaires_received: raw.questionnaires_received,
            last_lab_received: raw.last_lab_received.as_deref().and_then(parse_ts),
            labs_received: raw.labs_received,
            action_date: window.day,
        });
    }

    Ok((result, skipped))
}

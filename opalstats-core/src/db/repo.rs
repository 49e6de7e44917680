//! Database repository layer
//!
//! Provides insert operations for the source tables, transactional
//! stores for the daily result tables, watermark bookkeeping, and the
//! read-only summary query suite backing the report binary.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

/// Watermark key for the per-user app activity table
pub const APP_ACTIVITY_TABLE: &str = "daily_user_app_activity";
/// Watermark key for the per-relationship patient activity table
pub const PATIENT_ACTIVITY_TABLE: &str = "daily_user_patient_activity";
/// Watermark key for the received-data table
pub const DATA_RECEIVED_TABLE: &str = "daily_patient_data_received";

/// One resolvable caregiver-to-patient relationship, joined out to the
/// user and the patient's legacy id.
#[derive(Debug, Clone)]
pub struct RelationshipRow {
    pub relationship_id: i64,
    pub user_id: i64,
    pub username: String,
    pub patient_id: i64,
    pub legacy_patient_id: i64,
}

/// Registration code counts over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationSummary {
    pub uncompleted_registration: i64,
    pub completed_registration: i64,
    pub total_registration_codes: i64,
}

/// Registration code counts for one time bucket
#[derive(Debug, Clone, Serialize)]
pub struct GroupedRegistrationSummary {
    pub bucket: String,
    pub uncompleted_registration: i64,
    pub completed_registration: i64,
    pub total_registration_codes: i64,
}

/// Caregiver population counts over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaregiversSummary {
    pub caregivers_total: i64,
    pub caregivers_registered: i64,
    pub caregivers_unregistered: i64,
    pub never_logged_in_after_registration: i64,
    pub en: i64,
    pub fr: i64,
}

/// Patient population counts over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatientsSummary {
    pub total: i64,
    pub deceased: i64,
    pub male: i64,
    pub female: i64,
    pub sex_other: i64,
    pub sex_unknown: i64,
    pub access_all: i64,
    pub access_ntk: i64,
}

/// Registered device counts over a window
#[derive(Debug, Clone, Default, Serialize)]
pub struct DevicesSummary {
    pub device_total: i64,
    pub device_ios: i64,
    pub device_android: i64,
    pub device_browser: i64,
}

/// Breakdown of which clinical data categories patients received
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceivedClinicalDataSummary {
    pub no_appointments_labs_notes: i64,
    pub has_appointments_only: i64,
    pub has_labs_only: i64,
    pub has_clinical_notes_only: i64,
    pub receiving_new_data_total: i64,
}

/// Login counts for one time bucket
#[derive(Debug, Clone, Serialize)]
pub struct LoginsSummaryRow {
    pub bucket: String,
    pub total_logins: i64,
    pub unique_user_logins: i64,
    pub avg_logins_per_user: f64,
}

/// User-scoped click counts for one time bucket
#[derive(Debug, Clone, Serialize)]
pub struct UsersClicksRow {
    pub bucket: String,
    pub login_count: i64,
    pub feedback_count: i64,
    pub update_security_answers_count: i64,
    pub update_passwords_count: i64,
}

/// Patient-scoped click counts for one time bucket
#[derive(Debug, Clone, Serialize)]
pub struct UserPatientClicksRow {
    pub bucket: String,
    pub checkins_count: i64,
    pub documents_count: i64,
    pub educational_materials_count: i64,
    pub completed_questionnaires_count: i64,
    pub labs_count: i64,
}

/// Clinical data category in the received-data table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivedCategory {
    Appointments,
    Documents,
    EducationalMaterials,
    Questionnaires,
    Labs,
}

impl ReceivedCategory {
    /// Label used in report output keys, e.g. `total_received_labs`
    pub fn label(&self) -> &'static str {
        match self {
            ReceivedCategory::Appointments => "appointments",
            ReceivedCategory::Documents => "documents",
            ReceivedCategory::EducationalMaterials => "educational_materials",
            ReceivedCategory::Questionnaires => "questionnaires",
            ReceivedCategory::Labs => "labs",
        }
    }

    fn count_column(&self) -> &'static str {
        match self {
            ReceivedCategory::Appointments => "appointments_received",
            ReceivedCategory::Documents => "documents_received",
            ReceivedCategory::EducationalMaterials => "educational_materials_received",
            ReceivedCategory::Questionnaires => "questionnaires_received",
            ReceivedCategory::Labs => "labs_received",
        }
    }
}

impl std::str::FromStr for ReceivedCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "appointments" => Ok(ReceivedCategory::Appointments),
            "documents" => Ok(ReceivedCategory::Documents),
            "educational_materials" => Ok(ReceivedCategory::EducationalMaterials),
            "questionnaires" => Ok(ReceivedCategory::Questionnaires),
            "labs" => Ok(ReceivedCategory::Labs),
            _ => Err(format!("unknown received-data category: {}", s)),
        }
    }
}

/// Received-data counts for one time bucket and one category
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedSummaryRow {
    pub bucket: String,
    pub total_received: i64,
    pub total_unique_patients: i64,
    pub avg_received_per_patient: f64,
}

/// Per-patient lab delivery history
#[derive(Debug, Clone, Serialize)]
pub struct LabsPerPatientRow {
    pub patient_ser_num: i64,
    pub first_lab_received_utc: Option<DateTime<Utc>>,
    pub last_lab_received_utc: Option<DateTime<Utc>>,
    pub total_labs_received: i64,
}

/// Per-user login history
#[derive(Debug, Clone, Serialize)]
pub struct LoginsPerUserRow {
    pub user_id: i64,
    pub total_logged_in_days: i64,
    pub total_logins: i64,
    pub avg_logins_per_day: f64,
}

/// Demographics plus latest diagnosis for one legacy patient
#[derive(Debug, Clone, Serialize)]
pub struct DemographicDiagnosisRow {
    pub patient_ser_num: i64,
    pub first_name: String,
    pub last_name: String,
    pub sex: String,
    pub date_of_birth: String,
    pub email: String,
    pub language: String,
    pub registration_date_utc: Option<DateTime<Utc>>,
    pub latest_diagnosis_description: Option<String>,
    pub latest_diagnosis_date_utc: Option<DateTime<Utc>>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|t| t.to_rfc3339())
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Database handle (single connection, serialized by a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Modern schema inserts (reference data)
    // ============================================

    pub fn insert_user(
        &self,
        username: &str,
        language: &str,
        is_active: bool,
        date_joined: DateTime<Utc>,
        last_login: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (username, language, is_active, date_joined, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, language, is_active, ts(date_joined), opt_ts(last_login)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_caregiver_profile(&self, user_id: i64, legacy_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO caregiver_profiles (user_id, legacy_id) VALUES (?1, ?2)",
            params![user_id, legacy_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_patient(
        &self,
        legacy_id: Option<i64>,
        sex: SexType,
        data_access: DataAccessType,
        date_of_death: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO patients (legacy_id, sex, data_access, date_of_death, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                legacy_id,
                sex.as_str(),
                data_access.as_str(),
                opt_ts(date_of_death),
                ts(created_at)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_relationship(
        &self,
        patient_id: i64,
        caregiver_id: i64,
        status: RelationshipStatus,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO relationships (patient_id, caregiver_id, status, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                patient_id,
                caregiver_id,
                status.as_str(),
                date_str(start_date),
                end_date.map(date_str)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_registration_code(
        &self,
        code: &str,
        relationship_id: i64,
        status: RegistrationCodeStatus,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO registration_codes (code, relationship_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![code, relationship_id, status.as_str(), ts(created_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ============================================
    // Legacy schema inserts (test/operator seeding)
    // ============================================

    #[allow(clippy::too_many_arguments)]
    pub fn insert_legacy_patient(
        &self,
        patient_ser_num: i64,
        first_name: &str,
        last_name: &str,
        email: &str,
        language: &str,
        sex: &str,
        date_of_birth: NaiveDate,
        registration_date: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_patients
             (patient_ser_num, first_name, last_name, email, language, sex,
              date_of_birth, registration_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                patient_ser_num,
                first_name,
                last_name,
                email,
                language,
                sex,
                date_str(date_of_birth),
                ts(registration_date)
            ],
        )?;
        Ok(())
    }

    pub fn insert_legacy_patient_control(&self, patient_ser_num: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_patient_control (patient_ser_num) VALUES (?1)",
            params![patient_ser_num],
        )?;
        Ok(())
    }

    pub fn insert_activity_log(
        &self,
        request: &str,
        parameters: &str,
        target_patient_id: Option<i64>,
        username: &str,
        date_time: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_activity_logs
             (request, parameters, target_patient_id, username, date_time, app_version)
             VALUES (?1, ?2, ?3, ?4, ?5, '100.100.100')",
            params![request, parameters, target_patient_id, username, ts(date_time)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_legacy_appointment(
        &self,
        appointment_ser_num: i64,
        patient_ser_num: i64,
        state: &str,
        status: &str,
        scheduled_start_time: DateTime<Utc>,
        date_added: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_appointments
             (appointment_ser_num, patient_ser_num, state, status, scheduled_start_time, date_added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                appointment_ser_num,
                patient_ser_num,
                state,
                status,
                ts(scheduled_start_time),
                ts(date_added)
            ],
        )?;
        Ok(())
    }

    pub fn insert_legacy_document(
        &self,
        document_ser_num: i64,
        patient_ser_num: i64,
        date_added: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_documents (document_ser_num, patient_ser_num, date_added)
             VALUES (?1, ?2, ?3)",
            params![document_ser_num, patient_ser_num, ts(date_added)],
        )?;
        Ok(())
    }

    pub fn insert_legacy_educational_material(
        &self,
        educational_material_ser_num: i64,
        patient_ser_num: i64,
        date_added: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_educational_materials
             (educational_material_ser_num, patient_ser_num, date_added)
             VALUES (?1, ?2, ?3)",
            params![educational_material_ser_num, patient_ser_num, ts(date_added)],
        )?;
        Ok(())
    }

    pub fn insert_legacy_questionnaire(
        &self,
        questionnaire_ser_num: i64,
        patient_ser_num: i64,
        completed: bool,
        date_added: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_questionnaires
             (questionnaire_ser_num, patient_ser_num, completed_flag, date_added)
             VALUES (?1, ?2, ?3, ?4)",
            params![questionnaire_ser_num, patient_ser_num, completed, ts(date_added)],
        )?;
        Ok(())
    }

    pub fn insert_legacy_test_result(
        &self,
        patient_test_result_ser_num: i64,
        patient_ser_num: i64,
        date_added: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_patient_test_results
             (patient_test_result_ser_num, patient_ser_num, date_added)
             VALUES (?1, ?2, ?3)",
            params![patient_test_result_ser_num, patient_ser_num, ts(date_added)],
        )?;
        Ok(())
    }

    pub fn insert_legacy_device_identifier(
        &self,
        device_type: i64,
        last_updated: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_device_identifiers (device_type, last_updated) VALUES (?1, ?2)",
            params![device_type, ts(last_updated)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_legacy_diagnosis(
        &self,
        diagnosis_ser_num: i64,
        patient_ser_num: i64,
        description_en: &str,
        creation_date: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO legacy_diagnoses
             (diagnosis_ser_num, patient_ser_num, description_en, creation_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![diagnosis_ser_num, patient_ser_num, description_en, ts(creation_date)],
        )?;
        Ok(())
    }

    // ============================================
    // Aggregation support queries
    // ============================================

    /// Relationships usable for patient-scoped attribution in a window
    /// starting at `window_start_date`: confirmed, or not yet expired,
    /// and never pending/denied. Only patients with a legacy id qualify.
    pub fn list_relationship_rows(&self, window_start_date: NaiveDate) -> Result<Vec<RelationshipRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT r.id, u.id, u.username, p.id, p.legacy_id
            FROM relationships r
            JOIN caregiver_profiles c ON c.id = r.caregiver_id
            JOIN users u ON u.id = c.user_id
            JOIN patients p ON p.id = r.patient_id
            WHERE p.legacy_id IS NOT NULL
              AND (r.end_date >= :start OR r.end_date IS NULL OR r.status = 'confirmed')
              AND r.status NOT IN ('pending', 'denied')
            ORDER BY r.id
            "#,
        )?;
        let rows = stmt
            .query_map(named_params! {":start": date_str(window_start_date)}, |row| {
                Ok(RelationshipRow {
                    relationship_id: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    patient_id: row.get(3)?,
                    legacy_patient_id: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Activity log entries with `date_time` inside `[start, end]`
    pub fn list_activity_entries(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawActivityEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, request, parameters, target_patient_id, username, date_time, app_version
             FROM legacy_activity_logs
             WHERE date_time BETWEEN :start AND :end
             ORDER BY date_time",
        )?;
        let rows = stmt
            .query_map(
                named_params! {":start": ts(start), ":end": ts(end)},
                Self::row_to_activity_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_activity_entry(row: &Row) -> rusqlite::Result<RawActivityEntry> {
        let date_time_str: String = row.get(5)?;
        Ok(RawActivityEntry {
            id: row.get(0)?,
            request: row.get(1)?,
            parameters: row.get(2)?,
            target_patient_id: row.get(3)?,
            username: row.get(4)?,
            date_time: parse_ts(&date_time_str).unwrap_or_else(Utc::now),
            app_version: row.get(6)?,
        })
    }

    /// username → user id, for attributing activity log entries
    pub fn user_ids_by_username(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT username, id FROM users")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    /// legacy id → modern patient id
    pub fn patients_by_legacy_id(&self) -> Result<HashMap<i64, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT legacy_id, id FROM patients WHERE legacy_id IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    // ============================================
    // Watermarks and result-table stores
    // ============================================

    /// Last fully-aggregated date for a result table, if any
    pub fn watermark(&self, table_name: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock().unwrap();
        let date: Option<String> = conn
            .query_row(
                "SELECT last_aggregated_date FROM aggregation_watermarks WHERE table_name = ?",
                [table_name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    fn upsert_watermark(tx: &rusqlite::Transaction<'_>, table_name: &str, day: NaiveDate) -> Result<()> {
        tx.execute(
            "INSERT INTO aggregation_watermarks (table_name, last_aggregated_date, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(table_name) DO UPDATE SET
                 last_aggregated_date = excluded.last_aggregated_date,
                 updated_at = excluded.updated_at",
            params![table_name, date_str(day), ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Replace the per-user app activity rows for one day.
    ///
    /// Deletes any existing rows for `day`, inserts `rows`, and (for a
    /// closed-day run) advances the watermark, all in one transaction.
    pub fn store_daily_user_app_activity(
        &self,
        day: NaiveDate,
        rows: &[DailyUserAppActivity],
        advance_watermark: bool,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM daily_user_app_activity WHERE action_date = ?",
            [date_str(day)],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_user_app_activity
                 (action_by_user_id, last_login, count_logins, count_feedback,
                  count_update_security_answers, count_update_passwords,
                  count_update_language, count_device_ios, count_device_android,
                  count_device_browser, action_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.action_by_user_id,
                    opt_ts(row.last_login),
                    row.count_logins,
                    row.count_feedback,
                    row.count_update_security_answers,
                    row.count_update_passwords,
                    row.count_update_language,
                    row.count_device_ios,
                    row.count_device_android,
                    row.count_device_browser,
                    date_str(row.action_date),
                ])?;
            }
        }
        if advance_watermark {
            Self::upsert_watermark(&tx, APP_ACTIVITY_TABLE, day)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replace the per-relationship patient activity rows for one day
    pub fn store_daily_user_patient_activity(
        &self,
        day: NaiveDate,
        rows: &[DailyUserPatientActivity],
        advance_watermark: bool,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM daily_user_patient_activity WHERE action_date = ?",
            [date_str(day)],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_user_patient_activity
                 (relationship_id, action_by_user_id, patient_id, count_checkins,
                  count_documents, count_educational_materials,
                  count_questionnaires_complete, count_labs, action_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.relationship_id,
                    row.action_by_user_id,
                    row.patient_id,
                    row.count_checkins,
                    row.count_documents,
                    row.count_educational_materials,
                    row.count_questionnaires_complete,
                    row.count_labs,
                    date_str(row.action_date),
                ])?;
            }
        }
        if advance_watermark {
            Self::upsert_watermark(&tx, PATIENT_ACTIVITY_TABLE, day)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replace the received-data rows for one day
    pub fn store_daily_patient_data_received(
        &self,
        day: NaiveDate,
        rows: &[DailyPatientDataReceived],
        advance_watermark: bool,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM daily_patient_data_received WHERE action_date = ?",
            [date_str(day)],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_patient_data_received
                 (patient_id, next_appointment, last_appointment_received,
                  appointments_received, last_document_received, documents_received,
                  last_educational_material_received, educational_materials_received,
                  last_questionnaire_received, questionnaires_received,
                  last_lab_received, labs_received, action_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.patient_id,
                    opt_ts(row.next_appointment),
                    opt_ts(row.last_appointment_received),
                    row.appointments_received,
                    opt_ts(row.last_document_received),
                    row.documents_received,
                    opt_ts(row.last_educational_material_received),
                    row.educational_materials_received,
                    opt_ts(row.last_questionnaire_received),
                    row.questionnaires_received,
                    opt_ts(row.last_lab_received),
                    row.labs_received,
                    date_str(row.action_date),
                ])?;
            }
        }
        if advance_watermark {
            Self::upsert_watermark(&tx, DATA_RECEIVED_TABLE, day)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Delete all statistics rows and watermarks (force-delete path)
    pub fn clear_all_statistics(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM daily_user_app_activity", [])?;
        tx.execute("DELETE FROM daily_user_patient_activity", [])?;
        tx.execute("DELETE FROM daily_patient_data_received", [])?;
        tx.execute("DELETE FROM aggregation_watermarks", [])?;
        tx.commit()?;
        Ok(())
    }

    // ============================================
    // Summary queries (read-only)
    // ============================================

    /// Registration code counts over `[start, end]` (by creation date)
    pub fn fetch_registration_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RegistrationSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status != 'registered' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'registered' THEN 1 ELSE 0 END), 0),
                COUNT(*)
            FROM registration_codes
            WHERE date(created_at) BETWEEN :start AND :end
            "#,
            named_params! {":start": date_str(start), ":end": date_str(end)},
            |row| {
                Ok(RegistrationSummary {
                    uncompleted_registration: row.get(0)?,
                    completed_registration: row.get(1)?,
                    total_registration_codes: row.get(2)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Registration code counts per time bucket, newest first
    pub fn fetch_grouped_registration_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
    ) -> Result<Vec<GroupedRegistrationSummary>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', created_at) AS bucket,
                COALESCE(SUM(CASE WHEN status != 'registered' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'registered' THEN 1 ELSE 0 END), 0),
                COUNT(*)
            FROM registration_codes
            WHERE date(created_at) BETWEEN :start AND :end
            GROUP BY bucket
            ORDER BY bucket DESC
            "#,
            fmt = group_by.bucket_format()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(GroupedRegistrationSummary {
                        bucket: row.get(0)?,
                        uncompleted_registration: row.get(1)?,
                        completed_registration: row.get(2)?,
                        total_registration_codes: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Caregiver population counts over `[start, end]` (by join date)
    pub fn fetch_caregivers_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CaregiversSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_active = 1 AND last_login IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN language = 'en' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN language = 'fr' THEN 1 ELSE 0 END), 0)
            FROM users
            WHERE date(date_joined) BETWEEN :start AND :end
            "#,
            named_params! {":start": date_str(start), ":end": date_str(end)},
            |row| {
                Ok(CaregiversSummary {
                    caregivers_total: row.get(0)?,
                    caregivers_registered: row.get(1)?,
                    caregivers_unregistered: row.get(2)?,
                    never_logged_in_after_registration: row.get(3)?,
                    en: row.get(4)?,
                    fr: row.get(5)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Patient population counts over `[start, end]` (by creation date)
    pub fn fetch_patients_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PatientsSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN date_of_death IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sex = 'M' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sex = 'F' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sex = 'O' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sex = 'U' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN data_access = 'ALL' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN data_access = 'NTK' THEN 1 ELSE 0 END), 0)
            FROM patients
            WHERE date(created_at) BETWEEN :start AND :end
            "#,
            named_params! {":start": date_str(start), ":end": date_str(end)},
            |row| {
                Ok(PatientsSummary {
                    total: row.get(0)?,
                    deceased: row.get(1)?,
                    male: row.get(2)?,
                    female: row.get(3)?,
                    sex_other: row.get(4)?,
                    sex_unknown: row.get(5)?,
                    access_all: row.get(6)?,
                    access_ntk: row.get(7)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Registered device counts over `[start, end]` (by last update)
    pub fn fetch_devices_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DevicesSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN device_type = :ios THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN device_type = :android THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN device_type = :browser THEN 1 ELSE 0 END), 0)
            FROM legacy_device_identifiers
            WHERE date(last_updated) BETWEEN :start AND :end
            "#,
            named_params! {
                ":start": date_str(start),
                ":end": date_str(end),
                ":ios": DeviceType::Ios.legacy_code(),
                ":android": DeviceType::Android.legacy_code(),
                ":browser": DeviceType::Browser.legacy_code(),
            },
            |row| {
                Ok(DevicesSummary {
                    device_total: row.get(0)?,
                    device_ios: row.get(1)?,
                    device_android: row.get(2)?,
                    device_browser: row.get(3)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Breakdown of received clinical data categories over `[start, end]`
    pub fn fetch_patients_received_clinical_data_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ReceivedClinicalDataSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN last_appointment_received IS NULL
                              AND last_lab_received IS NULL
                              AND last_document_received IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN last_appointment_received IS NOT NULL
                              AND last_lab_received IS NULL
                              AND last_document_received IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN last_lab_received IS NOT NULL
                              AND last_appointment_received IS NULL
                              AND last_document_received IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN last_document_received IS NOT NULL
                              AND last_appointment_received IS NULL
                              AND last_lab_received IS NULL THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT CASE WHEN last_appointment_received IS NOT NULL
                                      OR last_lab_received IS NOT NULL
                                      OR last_document_received IS NOT NULL
                                    THEN patient_id END)
            FROM daily_patient_data_received
            WHERE action_date BETWEEN :start AND :end
            "#,
            named_params! {":start": date_str(start), ":end": date_str(end)},
            |row| {
                Ok(ReceivedClinicalDataSummary {
                    no_appointments_labs_notes: row.get(0)?,
                    has_appointments_only: row.get(1)?,
                    has_labs_only: row.get(2)?,
                    has_clinical_notes_only: row.get(3)?,
                    receiving_new_data_total: row.get(4)?,
                })
            },
        )
        .map_err(Error::from)
    }

    /// Login counts per time bucket, newest first
    pub fn fetch_logins_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
    ) -> Result<Vec<LoginsSummaryRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', action_date) AS bucket,
                COALESCE(SUM(count_logins), 0),
                COUNT(DISTINCT action_by_user_id),
                CAST(COALESCE(SUM(count_logins), 0) AS REAL)
                    / COUNT(DISTINCT action_by_user_id)
            FROM daily_user_app_activity
            WHERE action_date BETWEEN :start AND :end
            GROUP BY bucket
            ORDER BY bucket DESC
            "#,
            fmt = group_by.bucket_format()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(LoginsSummaryRow {
                        bucket: row.get(0)?,
                        total_logins: row.get(1)?,
                        unique_user_logins: row.get(2)?,
                        avg_logins_per_user: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// User-scoped click counts per time bucket, newest first
    pub fn fetch_users_clicks_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
    ) -> Result<Vec<UsersClicksRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', action_date) AS bucket,
                COALESCE(SUM(count_logins), 0),
                COALESCE(SUM(count_feedback), 0),
                COALESCE(SUM(count_update_security_answers), 0),
                COALESCE(SUM(count_update_passwords), 0)
            FROM daily_user_app_activity
            WHERE action_date BETWEEN :start AND :end
            GROUP BY bucket
            ORDER BY bucket DESC
            "#,
            fmt = group_by.bucket_format()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(UsersClicksRow {
                        bucket: row.get(0)?,
                        login_count: row.get(1)?,
                        feedback_count: row.get(2)?,
                        update_security_answers_count: row.get(3)?,
                        update_passwords_count: row.get(4)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Patient-scoped click counts per time bucket, newest first
    pub fn fetch_user_patient_clicks_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
    ) -> Result<Vec<UserPatientClicksRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', action_date) AS bucket,
                COALESCE(SUM(count_checkins), 0),
                COALESCE(SUM(count_documents), 0),
                COALESCE(SUM(count_educational_materials), 0),
                COALESCE(SUM(count_questionnaires_complete), 0),
                COALESCE(SUM(count_labs), 0)
            FROM daily_user_patient_activity
            WHERE action_date BETWEEN :start AND :end
            GROUP BY bucket
            ORDER BY bucket DESC
            "#,
            fmt = group_by.bucket_format()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(UserPatientClicksRow {
                        bucket: row.get(0)?,
                        checkins_count: row.get(1)?,
                        documents_count: row.get(2)?,
                        educational_materials_count: row.get(3)?,
                        completed_questionnaires_count: row.get(4)?,
                        labs_count: row.get(5)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Received-data counts for one category per time bucket, newest first
    pub fn fetch_received_data_summary(
        &self,
        category: ReceivedCategory,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
    ) -> Result<Vec<ReceivedSummaryRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', action_date) AS bucket,
                COALESCE(SUM({count_col}), 0),
                COUNT(DISTINCT patient_id),
                CAST(COALESCE(SUM({count_col}), 0) AS REAL)
                    / COUNT(DISTINCT patient_id)
            FROM daily_patient_data_received
            WHERE action_date BETWEEN :start AND :end
            GROUP BY bucket
            ORDER BY bucket DESC
            "#,
            fmt = group_by.bucket_format(),
            count_col = category.count_column()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(ReceivedSummaryRow {
                        bucket: row.get(0)?,
                        total_received: row.get(1)?,
                        total_unique_patients: row.get(2)?,
                        avg_received_per_patient: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Year of each user's most recent login → user count
    pub fn fetch_users_latest_login_year_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT action_by_user_id, MAX(last_login)
             FROM daily_user_app_activity
             WHERE action_date BETWEEN :start AND :end
               AND last_login IS NOT NULL
             GROUP BY action_by_user_id",
        )?;
        let latest: Vec<String> = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| row.get::<_, String>(1),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = BTreeMap::new();
        for raw in latest {
            if let Some(dt) = parse_ts(&raw) {
                // Bucket by the local calendar year, not UTC
                let year = dt.with_timezone(&Local).year();
                *counts.entry(year.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Per-patient lab delivery history over `[start, end]`, by legacy id
    pub fn fetch_labs_summary_per_patient(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LabsPerPatientRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                p.legacy_id,
                MIN(d.last_lab_received),
                MAX(d.last_lab_received),
                COALESCE(SUM(d.labs_received), 0)
            FROM daily_patient_data_received d
            JOIN patients p ON p.id = d.patient_id
            WHERE d.action_date BETWEEN :start AND :end
              AND p.legacy_id IS NOT NULL
            GROUP BY p.legacy_id
            ORDER BY p.legacy_id
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    let first: Option<String> = row.get(1)?;
                    let last: Option<String> = row.get(2)?;
                    Ok(LabsPerPatientRow {
                        patient_ser_num: row.get(0)?,
                        first_lab_received_utc: first.as_deref().and_then(parse_ts),
                        last_lab_received_utc: last.as_deref().and_then(parse_ts),
                        total_labs_received: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Per-user login history over `[start, end]`
    pub fn fetch_logins_summary_per_user(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LoginsPerUserRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                action_by_user_id,
                COUNT(*),
                COALESCE(SUM(count_logins), 0),
                CAST(COALESCE(SUM(count_logins), 0) AS REAL) / COUNT(*)
            FROM daily_user_app_activity
            WHERE action_date BETWEEN :start AND :end
            GROUP BY action_by_user_id
            ORDER BY action_by_user_id
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    Ok(LoginsPerUserRow {
                        user_id: row.get(0)?,
                        total_logged_in_days: row.get(1)?,
                        total_logins: row.get(2)?,
                        avg_logins_per_day: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Demographics and latest in-window diagnosis for each legacy
    /// patient with a control record, by serial number
    pub fn fetch_patient_demographic_diagnosis_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DemographicDiagnosisRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                lp.patient_ser_num,
                lp.first_name,
                lp.last_name,
                lp.sex,
                lp.date_of_birth,
                lp.email,
                lp.language,
                lp.registration_date,
                (SELECT d.description_en FROM legacy_diagnoses d
                 WHERE d.patient_ser_num = lp.patient_ser_num
                   AND date(d.creation_date) BETWEEN :start AND :end
                 ORDER BY d.creation_date DESC LIMIT 1),
                (SELECT d.creation_date FROM legacy_diagnoses d
                 WHERE d.patient_ser_num = lp.patient_ser_num
                   AND date(d.creation_date) BETWEEN :start AND :end
                 ORDER BY d.creation_date DESC LIMIT 1)
            FROM legacy_patients lp
            JOIN legacy_patient_control pc ON pc.patient_ser_num = lp.patient_ser_num
            ORDER BY lp.patient_ser_num
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {":start": date_str(start), ":end": date_str(end)},
                |row| {
                    let registration: String = row.get(7)?;
                    let diag_date: Option<String> = row.get(9)?;
                    Ok(DemographicDiagnosisRow {
                        patient_ser_num: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        sex: row.get(3)?,
                        date_of_birth: row.get(4)?,
                        email: row.get(5)?,
                        language: row.get(6)?,
                        registration_date_utc: parse_ts(&registration),
                        latest_diagnosis_description: row.get(8)?,
                        latest_diagnosis_date_utc: diag_date.as_deref().and_then(parse_ts),
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn day(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    #[test]
    fn test_registration_summary() {
        let db = test_db();
        let user = db
            .insert_user("homer", "en", true, utc(2024, 3, 1, 9), None)
            .unwrap();
        let caregiver = db.insert_caregiver_profile(user, Some(42)).unwrap();
        let patient = db
            .insert_patient(
                Some(42),
                SexType::Male,
                DataAccessType::All,
                None,
                utc(2024, 3, 1, 9),
            )
            .unwrap();
        let relationship = db
            .insert_relationship(
                patient,
                caregiver,
                RelationshipStatus::Confirmed,
                day(2024, 3, 1),
                None,
            )
            .unwrap();

        db.insert_registration_code(
            "code1",
            relationship,
            RegistrationCodeStatus::Registered,
            utc(2024, 3, 5, 10),
        )
        .unwrap();
        db.insert_registration_code(
            "code2",
            relationship,
            RegistrationCodeStatus::New,
            utc(2024, 3, 6, 10),
        )
        .unwrap();
        db.insert_registration_code(
            "code3",
            relationship,
            RegistrationCodeStatus::Blocked,
            utc(2024, 3, 6, 11),
        )
        .unwrap();
        // Outside the window
        db.insert_registration_code(
            "code4",
            relationship,
            RegistrationCodeStatus::Registered,
            utc(2024, 4, 1, 10),
        )
        .unwrap();

        let summary = db
            .fetch_registration_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.total_registration_codes, 3);
        assert_eq!(summary.completed_registration, 1);
        assert_eq!(summary.uncompleted_registration, 2);

        let grouped = db
            .fetch_grouped_registration_summary(day(2024, 3, 1), day(2024, 3, 31), GroupBy::Day)
            .unwrap();
        assert_eq!(grouped.len(), 2);
        // Newest bucket first
        assert_eq!(grouped[0].bucket, "2024-03-06");
        assert_eq!(grouped[0].total_registration_codes, 2);
        assert_eq!(grouped[1].bucket, "2024-03-05");
        assert_eq!(grouped[1].completed_registration, 1);
    }

    #[test]
    fn test_caregivers_summary() {
        let db = test_db();
        db.insert_user("a", "en", true, utc(2024, 3, 1, 9), Some(utc(2024, 3, 2, 9)))
            .unwrap();
        db.insert_user("b", "en", true, utc(2024, 3, 1, 9), None).unwrap();
        db.insert_user("c", "fr", false, utc(2024, 3, 2, 9), None).unwrap();
        db.insert_user("d", "fr", true, utc(2024, 3, 3, 9), Some(utc(2024, 3, 4, 9)))
            .unwrap();

        let summary = db
            .fetch_caregivers_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.caregivers_total, 4);
        assert_eq!(summary.caregivers_registered, 3);
        assert_eq!(summary.caregivers_unregistered, 1);
        assert_eq!(summary.never_logged_in_after_registration, 1);
        assert_eq!(summary.en, 2);
        assert_eq!(summary.fr, 2);
    }

    #[test]
    fn test_patients_summary() {
        let db = test_db();
        db.insert_patient(Some(1), SexType::Male, DataAccessType::All, None, utc(2024, 3, 1, 9))
            .unwrap();
        db.insert_patient(
            Some(2),
            SexType::Female,
            DataAccessType::NeedToKnow,
            Some(utc(2024, 3, 10, 9)),
            utc(2024, 3, 2, 9),
        )
        .unwrap();
        db.insert_patient(Some(3), SexType::Unknown, DataAccessType::All, None, utc(2024, 3, 3, 9))
            .unwrap();

        let summary = db
            .fetch_patients_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.deceased, 1);
        assert_eq!(summary.male, 1);
        assert_eq!(summary.female, 1);
        assert_eq!(summary.sex_other, 0);
        assert_eq!(summary.sex_unknown, 1);
        assert_eq!(summary.access_all, 2);
        assert_eq!(summary.access_ntk, 1);
    }

    #[test]
    fn test_devices_summary() {
        let db = test_db();
        db.insert_legacy_device_identifier(0, utc(2024, 3, 5, 9)).unwrap();
        db.insert_legacy_device_identifier(1, utc(2024, 3, 5, 10)).unwrap();
        db.insert_legacy_device_identifier(1, utc(2024, 3, 6, 9)).unwrap();
        db.insert_legacy_device_identifier(3, utc(2024, 3, 6, 10)).unwrap();
        // Unknown code still counts toward the total
        db.insert_legacy_device_identifier(2, utc(2024, 3, 7, 9)).unwrap();

        let summary = db
            .fetch_devices_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.device_total, 5);
        assert_eq!(summary.device_ios, 1);
        assert_eq!(summary.device_android, 2);
        assert_eq!(summary.device_browser, 1);
    }

    #[test]
    fn test_logins_summary_grouping() {
        let db = test_db();
        let u1 = db.insert_user("a", "en", true, utc(2024, 3, 1, 9), None).unwrap();
        let u2 = db.insert_user("b", "en", true, utc(2024, 3, 1, 9), None).unwrap();

        let mut row = DailyUserAppActivity {
            action_by_user_id: u1,
            count_logins: 4,
            action_date: day(2024, 3, 5),
            ..Default::default()
        };
        db.store_daily_user_app_activity(day(2024, 3, 5), std::slice::from_ref(&row), true)
            .unwrap();
        row.action_by_user_id = u2;
        row.count_logins = 2;
        row.action_date = day(2024, 3, 6);
        db.store_daily_user_app_activity(day(2024, 3, 6), &[row], true)
            .unwrap();

        let by_day = db
            .fetch_logins_summary(day(2024, 3, 1), day(2024, 3, 31), GroupBy::Day)
            .unwrap();
        assert_eq!(by_day.len(), 2);
        assert_eq!(by_day[0].bucket, "2024-03-06");
        assert_eq!(by_day[0].total_logins, 2);
        assert_eq!(by_day[1].bucket, "2024-03-05");
        assert_eq!(by_day[1].total_logins, 4);

        let by_month = db
            .fetch_logins_summary(day(2024, 3, 1), day(2024, 3, 31), GroupBy::Month)
            .unwrap();
        assert_eq!(by_month.len(), 1);
        assert_eq!(by_month[0].bucket, "2024-03-01");
        assert_eq!(by_month[0].total_logins, 6);
        assert_eq!(by_month[0].unique_user_logins, 2);
        assert!((by_month[0].avg_logins_per_user - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latest_login_year_uses_local_calendar() {
        let db = test_db();
        let u1 = db.insert_user("a", "en", true, utc(2024, 1, 1, 9), None).unwrap();
        let u2 = db.insert_user("b", "en", true, utc(2024, 1, 1, 9), None).unwrap();

        // New Year's Eve just before UTC midnight; the local year can differ
        let eve = Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap();
        let rows = [
            DailyUserAppActivity {
                action_by_user_id: u1,
                last_login: Some(eve),
                count_logins: 1,
                action_date: day(2024, 12, 31),
                ..Default::default()
            },
            DailyUserAppActivity {
                action_by_user_id: u2,
                last_login: Some(utc(2024, 6, 1, 12)),
                count_logins: 1,
                action_date: day(2024, 12, 31),
                ..Default::default()
            },
        ];
        db.store_daily_user_app_activity(day(2024, 12, 31), &rows, true)
            .unwrap();

        let counts = db
            .fetch_users_latest_login_year_summary(day(2024, 1, 1), day(2024, 12, 31))
            .unwrap();
        let eve_year = eve.with_timezone(&Local).year().to_string();
        let mid_year = utc(2024, 6, 1, 12).with_timezone(&Local).year().to_string();
        if eve_year == mid_year {
            assert_eq!(counts.get(&eve_year), Some(&2));
        } else {
            assert_eq!(counts.get(&eve_year), Some(&1));
            assert_eq!(counts.get(&mid_year), Some(&1));
        }
    }

    #[test]
    fn test_store_replaces_existing_day() {
        let db = test_db();
        let user = db.insert_user("a", "en", true, utc(2024, 3, 1, 9), None).unwrap();

        let row = DailyUserAppActivity {
            action_by_user_id: user,
            count_logins: 1,
            action_date: day(2024, 3, 5),
            ..Default::default()
        };
        db.store_daily_user_app_activity(day(2024, 3, 5), std::slice::from_ref(&row), false)
            .unwrap();
        db.store_daily_user_app_activity(day(2024, 3, 5), &[row], false)
            .unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM daily_user_app_activity", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        // Open-day store does not advance the watermark
        assert_eq!(db.watermark(APP_ACTIVITY_TABLE).unwrap(), None);
    }

    #[test]
    fn test_watermark_advances() {
        let db = test_db();
        db.store_daily_user_app_activity(day(2024, 3, 5), &[], true).unwrap();
        assert_eq!(db.watermark(APP_ACTIVITY_TABLE).unwrap(), Some(day(2024, 3, 5)));
        db.store_daily_user_app_activity(day(2024, 3, 6), &[], true).unwrap();
        assert_eq!(db.watermark(APP_ACTIVITY_TABLE).unwrap(), Some(day(2024, 3, 6)));
    }

    #[test]
    fn test_relationship_filter() {
        let db = test_db();
        let window_start = day(2024, 3, 5);

        let make = |username: &str, legacy: i64, status: RelationshipStatus, end: Option<NaiveDate>| {
            let user = db.insert_user(username, "en", true, utc(2024, 1, 1, 9), None).unwrap();
            let caregiver = db.insert_caregiver_profile(user, None).unwrap();
            let patient = db
                .insert_patient(Some(legacy), SexType::Unknown, DataAccessType::All, None, utc(2024, 1, 1, 9))
                .unwrap();
            db.insert_relationship(patient, caregiver, status, day(2024, 1, 1), end)
                .unwrap()
        };

        let confirmed = make("a", 1, RelationshipStatus::Confirmed, None);
        let open_ended = make("b", 2, RelationshipStatus::Expired, None);
        let still_valid = make("c", 3, RelationshipStatus::Revoked, Some(day(2024, 3, 10)));
        let _lapsed = make("d", 4, RelationshipStatus::Revoked, Some(day(2024, 3, 1)));
        let _pending = make("e", 5, RelationshipStatus::Pending, None);
        let _denied = make("f", 6, RelationshipStatus::Denied, None);

        let rows = db.list_relationship_rows(window_start).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.relationship_id).collect();
        assert_eq!(ids, vec![confirmed, open_ended, still_valid]);
    }

    #[test]
    fn test_labs_summary_per_patient() {
        let db = test_db();
        let p1 = db
            .insert_patient(Some(51), SexType::Male, DataAccessType::All, None, utc(2024, 1, 1, 9))
            .unwrap();

        let mut row = DailyPatientDataReceived {
            patient_id: p1,
            last_lab_received: Some(utc(2024, 3, 5, 12)),
            labs_received: 2,
            action_date: day(2024, 3, 5),
            ..Default::default()
        };
        db.store_daily_patient_data_received(day(2024, 3, 5), std::slice::from_ref(&row), true)
            .unwrap();
        row.last_lab_received = Some(utc(2024, 3, 7, 12));
        row.labs_received = 3;
        row.action_date = day(2024, 3, 7);
        db.store_daily_patient_data_received(day(2024, 3, 7), &[row], true)
            .unwrap();

        let rows = db
            .fetch_labs_summary_per_patient(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].patient_ser_num, 51);
        assert_eq!(rows[0].total_labs_received, 5);
        assert_eq!(rows[0].first_lab_received_utc, Some(utc(2024, 3, 5, 12)));
        assert_eq!(rows[0].last_lab_received_utc, Some(utc(2024, 3, 7, 12)));
    }

    #[test]
    fn test_received_clinical_data_summary_categories() {
        let db = test_db();
        let mut rows = Vec::new();
        for legacy_id in 51..55 {
            let patient = db
                .insert_patient(
                    Some(legacy_id),
                    SexType::Female,
                    DataAccessType::All,
                    None,
                    utc(2024, 1, 1, 9),
                )
                .unwrap();
            // Educational material only; no appointments, labs, or documents
            rows.push(DailyPatientDataReceived {
                patient_id: patient,
                last_educational_material_received: Some(utc(2024, 3, 5, 10)),
                educational_materials_received: 1,
                action_date: day(2024, 3, 5),
                ..Default::default()
            });
        }
        db.store_daily_patient_data_received(day(2024, 3, 5), &rows, true)
            .unwrap();

        let summary = db
            .fetch_patients_received_clinical_data_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.no_appointments_labs_notes, 4);
        assert_eq!(summary.has_appointments_only, 0);
        assert_eq!(summary.receiving_new_data_total, 0);

        // Give three of the four an appointment; only those count as receiving
        for row in rows.iter_mut().take(3) {
            row.last_appointment_received = Some(utc(2024, 3, 5, 14));
            row.appointments_received = 1;
        }
        db.store_daily_patient_data_received(day(2024, 3, 5), &rows, true)
            .unwrap();

        let summary = db
            .fetch_patients_received_clinical_data_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(summary.no_appointments_labs_notes, 1);
        assert_eq!(summary.has_appointments_only, 3);
        assert_eq!(summary.receiving_new_data_total, 3);
    }

    #[test]
    fn test_demographic_diagnosis_summary() {
        let db = test_db();
        db.insert_legacy_patient(
            51,
            "Marge",
            "Simpson",
            "marge@example.com",
            "EN",
            "Female",
            day(1956, 10, 1),
            utc(2024, 1, 15, 9),
        )
        .unwrap();
        db.insert_legacy_patient_control(51).unwrap();
        // No control record, excluded
        db.insert_legacy_patient(
            52,
            "Homer",
            "Simpson",
            "homer@example.com",
            "EN",
            "Male",
            day(1954, 5, 12),
            utc(2024, 1, 15, 9),
        )
        .unwrap();

        db.insert_legacy_diagnosis(1, 51, "Condition A", utc(2024, 3, 2, 9)).unwrap();
        db.insert_legacy_diagnosis(2, 51, "Condition B", utc(2024, 3, 8, 9)).unwrap();

        let rows = db
            .fetch_patient_demographic_diagnosis_summary(day(2024, 3, 1), day(2024, 3, 31))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].patient_ser_num, 51);
        assert_eq!(rows[0].first_name, "Marge");
        assert_eq!(
            rows[0].latest_diagnosis_description.as_deref(),
            Some("Condition B")
        );
        assert_eq!(rows[0].latest_diagnosis_date_utc, Some(utc(2024, 3, 8, 9)));
    }

    #[test]
    fn test_clear_all_statistics() {
        let db = test_db();
        let user = db.insert_user("a", "en", true, utc(2024, 3, 1, 9), None).unwrap();
        let row = DailyUserAppActivity {
            action_by_user_id: user,
            count_logins: 1,
            action_date: day(2024, 3, 5),
            ..Default::default()
        };
        db.store_daily_user_app_activity(day(2024, 3, 5), &[row], true).unwrap();

        db.clear_all_statistics().unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM daily_user_app_activity", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(db.watermark(APP_ACTIVITY_TABLE).unwrap(), None);
    }
}

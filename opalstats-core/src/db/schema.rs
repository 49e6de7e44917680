//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//! Timestamps are stored as RFC 3339 UTC strings, dates as YYYY-MM-DD
//! strings; both compare correctly as text.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- LAYER 1: Modern schema (reference data,
    -- read-only to the aggregation engine)
    -- ============================================

    CREATE TABLE IF NOT EXISTS users (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        username         TEXT NOT NULL UNIQUE,
        language         TEXT NOT NULL DEFAULT 'en',
        is_active        INTEGER NOT NULL DEFAULT 1,
        date_joined      DATETIME NOT NULL,
        last_login       DATETIME
    );

    CREATE TABLE IF NOT EXISTS caregiver_profiles (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          INTEGER NOT NULL REFERENCES users(id),
        legacy_id        INTEGER
    );

    CREATE TABLE IF NOT EXISTS patients (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        legacy_id        INTEGER UNIQUE,
        sex              TEXT NOT NULL DEFAULT 'U',
        data_access      TEXT NOT NULL DEFAULT 'ALL',
        date_of_death    DATETIME,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS relationships (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id       INTEGER NOT NULL REFERENCES patients(id),
        caregiver_id     INTEGER NOT NULL REFERENCES caregiver_profiles(id),
        status           TEXT NOT NULL,
        start_date       TEXT NOT NULL,
        end_date         TEXT
    );

    CREATE TABLE IF NOT EXISTS registration_codes (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        code             TEXT NOT NULL UNIQUE,
        relationship_id  INTEGER NOT NULL REFERENCES relationships(id),
        status           TEXT NOT NULL DEFAULT 'new',
        created_at       DATETIME NOT NULL
    );

    -- ============================================
    -- LAYER 2: Legacy hospital schema
    -- (externally populated, read-only)
    -- ============================================

    CREATE TABLE IF NOT EXISTS legacy_patients (
        patient_ser_num   INTEGER PRIMARY KEY,
        first_name        TEXT NOT NULL,
        last_name         TEXT NOT NULL,
        email             TEXT NOT NULL DEFAULT '',
        language          TEXT NOT NULL DEFAULT 'EN',
        sex               TEXT NOT NULL DEFAULT 'Unknown',
        date_of_birth     TEXT NOT NULL,
        death_date        DATETIME,
        registration_date DATETIME NOT NULL
    );

    -- Patients with a control record receive data through the portal;
    -- this table drives the received-data aggregation.
    CREATE TABLE IF NOT EXISTS legacy_patient_control (
        patient_ser_num  INTEGER PRIMARY KEY REFERENCES legacy_patients(patient_ser_num)
    );

    CREATE TABLE IF NOT EXISTS legacy_activity_logs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        request          TEXT NOT NULL,
        parameters       TEXT NOT NULL DEFAULT '',
        target_patient_id INTEGER,
        username         TEXT NOT NULL,
        date_time        DATETIME NOT NULL,
        app_version      TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS legacy_appointments (
        appointment_ser_num  INTEGER PRIMARY KEY,
        patient_ser_num      INTEGER NOT NULL,
        state                TEXT NOT NULL DEFAULT 'Active',
        status               TEXT NOT NULL DEFAULT 'Open',
        scheduled_start_time DATETIME NOT NULL,
        date_added           DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS legacy_documents (
        document_ser_num INTEGER PRIMARY KEY,
        patient_ser_num  INTEGER NOT NULL,
        date_added       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS legacy_educational_materials (
        educational_material_ser_num INTEGER PRIMARY KEY,
        patient_ser_num              INTEGER NOT NULL,
        date_added                   DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS legacy_questionnaires (
        questionnaire_ser_num INTEGER PRIMARY KEY,
        patient_ser_num       INTEGER NOT NULL,
        completed_flag        INTEGER NOT NULL DEFAULT 0,
        date_added            DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS legacy_patient_test_results (
        patient_test_result_ser_num INTEGER PRIMARY KEY,
        patient_ser_num             INTEGER NOT NULL,
        date_added                  DATETIME NOT NULL
    );

    -- device_type codes: 0 = iOS, 1 = Android, 3 = browser
    CREATE TABLE IF NOT EXISTS legacy_device_identifiers (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        device_type      INTEGER NOT NULL,
        last_updated     DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS legacy_diagnoses (
        diagnosis_ser_num INTEGER PRIMARY KEY,
        patient_ser_num   INTEGER NOT NULL,
        description_en    TEXT NOT NULL DEFAULT '',
        creation_date     DATETIME NOT NULL
    );

    -- ============================================
    -- LAYER 3: Derived result tables
    -- (owned by the aggregation engine)
    -- ============================================

    CREATE TABLE IF NOT EXISTS daily_user_app_activity (
        id                             INTEGER PRIMARY KEY AUTOINCREMENT,
        action_by_user_id              INTEGER NOT NULL REFERENCES users(id),
        last_login                     DATETIME,
        count_logins                   INTEGER NOT NULL DEFAULT 0,
        count_feedback                 INTEGER NOT NULL DEFAULT 0,
        count_update_security_answers  INTEGER NOT NULL DEFAULT 0,
        count_update_passwords         INTEGER NOT NULL DEFAULT 0,
        count_update_language          INTEGER NOT NULL DEFAULT 0,
        count_device_ios               INTEGER NOT NULL DEFAULT 0,
        count_device_android           INTEGER NOT NULL DEFAULT 0,
        count_device_browser           INTEGER NOT NULL DEFAULT 0,
        action_date                    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS daily_user_patient_activity (
        id                             INTEGER PRIMARY KEY AUTOINCREMENT,
        relationship_id                INTEGER NOT NULL REFERENCES relationships(id),
        action_by_user_id              INTEGER NOT NULL REFERENCES users(id),
        patient_id                     INTEGER NOT NULL REFERENCES patients(id),
        count_checkins                 INTEGER NOT NULL DEFAULT 0,
        count_documents                INTEGER NOT NULL DEFAULT 0,
        count_educational_materials    INTEGER NOT NULL DEFAULT 0,
        count_questionnaires_complete  INTEGER NOT NULL DEFAULT 0,
        count_labs                     INTEGER NOT NULL DEFAULT 0,
        action_date                    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS daily_patient_data_received (
        id                                  INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id                          INTEGER NOT NULL REFERENCES patients(id),
        next_appointment                    DATETIME,
        last_appointment_received           DATETIME,
        appointments_received               INTEGER NOT NULL DEFAULT 0,
        last_document_received              DATETIME,
        documents_received                  INTEGER NOT NULL DEFAULT 0,
        last_educational_material_received  DATETIME,
        educational_materials_received      INTEGER NOT NULL DEFAULT 0,
        last_questionnaire_received         DATETIME,
        questionnaires_received             INTEGER NOT NULL DEFAULT 0,
        last_lab_received                   DATETIME,
        labs_received                       INTEGER NOT NULL DEFAULT 0,
        action_date                         TEXT NOT NULL
    );

    -- One row per result table; a closed-day run for a date at or below
    -- the watermark is a no-op.
    CREATE TABLE IF NOT EXISTS aggregation_watermarks (
        table_name           TEXT PRIMARY KEY,
        last_aggregated_date TEXT NOT NULL,
        updated_at           DATETIME NOT NULL
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_activity_logs_date_time ON legacy_activity_logs(date_time);
    CREATE INDEX IF NOT EXISTS idx_activity_logs_username ON legacy_activity_logs(username);
    CREATE INDEX IF NOT EXISTS idx_relationships_patient ON relationships(patient_id);
    CREATE INDEX IF NOT EXISTS idx_appointments_patient ON legacy_appointments(patient_ser_num);
    CREATE INDEX IF NOT EXISTS idx_diagnoses_patient ON legacy_diagnoses(patient_ser_num);
    CREATE INDEX IF NOT EXISTS idx_user_app_activity_date ON daily_user_app_activity(action_date);
    CREATE INDEX IF NOT EXISTS idx_user_patient_activity_date ON daily_user_patient_activity(action_date);
    CREATE INDEX IF NOT EXISTS idx_patient_data_received_date ON daily_patient_data_received(action_date);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

//! usage_statistics_report - read-only summary reports
//!
//! Runs one of the summary queries over the daily result tables (or
//! the source tables, for population summaries), prints the result as
//! pretty JSON, and optionally exports it to CSV or XLSX.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::Parser;
use opalstats_core::export::{self, ReportRow};
use opalstats_core::{Config, Database, GroupBy, ReceivedCategory};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "usage_statistics_report")]
#[command(about = "Query the usage statistics summaries")]
#[command(version)]
struct Args {
    /// Report kind: registration, grouped-registration, caregivers,
    /// patients, devices, received-clinical-data, logins, users-clicks,
    /// user-patient-clicks, received-<category>, users-latest-login-year,
    /// labs-per-patient, logins-per-user, demographic-diagnosis
    #[arg(long)]
    report: String,

    /// Window start date (default: end minus 30 days)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Window end date, inclusive (default: today)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Bucket granularity for grouped reports
    #[arg(long, default_value = "day")]
    group_by: GroupBy,

    /// Also write the report to this .csv or .xlsx file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = opalstats_core::logging::init(&config.logging).ok();

    let db_path = config.database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let end = args.end.unwrap_or_else(|| Local::now().date_naive());
    let start = args.start.unwrap_or(end - Duration::days(30));
    let group = args.group_by;
    tracing::info!(report = %args.report, %start, %end, "Running summary report");

    let rows = build_report(&db, &args.report, start, end, group)?;

    println!("{}", serde_json::to_string_pretty(&rows)?);

    if let Some(path) = &args.export {
        export::write_report(path, &rows).context("failed to export report")?;
    }

    Ok(())
}

fn build_report(
    db: &Database,
    report: &str,
    start: NaiveDate,
    end: NaiveDate,
    group: GroupBy,
) -> Result<Vec<ReportRow>> {
    let rows = match report {
        "registration" => single_row(&db.fetch_registration_summary(start, end)?)?,
        "grouped-registration" => grouped_rows(
            &db.fetch_grouped_registration_summary(start, end, group)?,
            group,
        )?,
        "caregivers" => single_row(&db.fetch_caregivers_summary(start, end)?)?,
        "patients" => single_row(&db.fetch_patients_summary(start, end)?)?,
        "devices" => single_row(&db.fetch_devices_summary(start, end)?)?,
        "received-clinical-data" => {
            single_row(&db.fetch_patients_received_clinical_data_summary(start, end)?)?
        }
        "logins" => grouped_rows(&db.fetch_logins_summary(start, end, group)?, group)?,
        "users-clicks" => grouped_rows(&db.fetch_users_clicks_summary(start, end, group)?, group)?,
        "user-patient-clicks" => grouped_rows(
            &db.fetch_user_patient_clicks_summary(start, end, group)?,
            group,
        )?,
        "users-latest-login-year" => {
            let map = db.fetch_users_latest_login_year_summary(start, end)?;
            single_row(&map)?
        }
        "labs-per-patient" => plain_rows(&db.fetch_labs_summary_per_patient(start, end)?)?,
        "logins-per-user" => plain_rows(&db.fetch_logins_summary_per_user(start, end)?)?,
        "demographic-diagnosis" => {
            plain_rows(&db.fetch_patient_demographic_diagnosis_summary(start, end)?)?
        }
        other => {
            if let Some(category) = received_category(other) {
                received_rows(
                    &db.fetch_received_data_summary(category, start, end, group)?,
                    category,
                    group,
                )
            } else {
                anyhow::bail!("unknown report kind: {}", other);
            }
        }
    };
    Ok(rows)
}

fn received_category(report: &str) -> Option<ReceivedCategory> {
    match report {
        "received-labs" => Some(ReceivedCategory::Labs),
        "received-appointments" => Some(ReceivedCategory::Appointments),
        "received-educational-materials" => Some(ReceivedCategory::EducationalMaterials),
        "received-documents" => Some(ReceivedCategory::Documents),
        "received-questionnaires" => Some(ReceivedCategory::Questionnaires),
        _ => None,
    }
}

fn to_object<T: Serialize>(item: &T) -> Result<ReportRow> {
    match serde_json::to_value(item)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected an object row, got {}", other),
    }
}

/// A one-row report from a scalar summary struct
fn single_row<T: Serialize>(summary: &T) -> Result<Vec<ReportRow>> {
    Ok(vec![to_object(summary)?])
}

/// Rows serialized as-is
fn plain_rows<T: Serialize>(items: &[T]) -> Result<Vec<ReportRow>> {
    items.iter().map(to_object).collect()
}

/// Grouped rows, with the generic `bucket` column renamed to the
/// grouping granularity (`day`, `month`, `year`)
fn grouped_rows<T: Serialize>(items: &[T], group: GroupBy) -> Result<Vec<ReportRow>> {
    items
        .iter()
        .map(|item| {
            let obj = to_object(item)?;
            Ok(obj
                .into_iter()
                .map(|(key, value)| {
                    if key == "bucket" {
                        (group.as_str().to_string(), value)
                    } else {
                        (key, value)
                    }
                })
                .collect())
        })
        .collect()
}

/// Received-data rows with per-category column names, e.g.
/// `total_received_labs` / `avg_received_labs_per_patient`
fn received_rows(
    rows: &[opalstats_core::db::repo::ReceivedSummaryRow],
    category: ReceivedCategory,
    group: GroupBy,
) -> Vec<ReportRow> {
    rows.iter()
        .map(|row| {
            let mut obj = ReportRow::new();
            obj.insert(group.as_str().to_string(), Value::from(row.bucket.clone()));
            obj.insert(
                format!("total_received_{}", category.label()),
                Value::from(row.total_received),
            );
            obj.insert(
                "total_unique_patients".to_string(),
                Value::from(row.total_unique_patients),
            );
            obj.insert(
                format!("avg_received_{}_per_patient", category.label()),
                Value::from(row.avg_received_per_patient),
            );
            obj
        })
        .collect()
}

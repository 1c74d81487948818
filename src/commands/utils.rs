use super::fetch::{access_points, ordered_keys};
use crate::aggregator::Row;
use crate::output::read_rows;
use crate::utils::config::SCHEMA_VERSION;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Fields added by registry enrichment (not metrics)
const ENRICHMENT_FIELDS: &[&str] = &[
    "resource_institution",
    "field_of_science",
    "project_pi",
    "project_pi_institution",
    "person",
    "person_institution",
];

/// What a row file contains
#[derive(Debug, Default, PartialEq)]
pub struct RowSummary {
    pub rows: usize,
    /// Distinct `(start_date, end_date)` pairs
    pub periods: BTreeSet<(String, String)>,
    pub aggregation_units: BTreeSet<String>,
    /// Numeric fields that are neither keys nor enrichment
    pub metrics: BTreeSet<String>,
}

fn text(row: &Row, field: &str) -> String {
    match row.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Check every row carries all `key_fields` and summarize the file
pub fn summarize_rows(rows: &[Row], key_fields: &[String]) -> Result<RowSummary> {
    let mut summary = RowSummary {
        rows: rows.len(),
        ..Default::default()
    };

    for (i, row) in rows.iter().enumerate() {
        if let Some(missing) = key_fields.iter().find(|k| !row.contains_key(k.as_str())) {
            anyhow::bail!("Row {} has no '{}' field", i, missing);
        }

        summary
            .periods
            .insert((text(row, "start_date"), text(row, "end_date")));
        summary.aggregation_units.insert(text(row, "aggregation_unit"));

        for (name, value) in row {
            let is_key = key_fields.iter().any(|k| k == name);
            if !is_key && value.is_number() && !ENRICHMENT_FIELDS.contains(&name.as_str()) {
                summary.metrics.insert(name.clone());
            }
        }
    }

    Ok(summary)
}

/// Validate a row JSON file
pub fn validate_rows_file(file_path: PathBuf) -> Result<RowSummary> {
    println!("Validating rows: {}", file_path.display());

    let rows = read_rows(&file_path)?;
    let with_buckets = rows
        .first()
        .is_some_and(|row| row.contains_key("job_wall_time_bucket"));
    let key_fields = ordered_keys(with_buckets, &access_points(&[]));
    let summary = summarize_rows(&rows, &key_fields)?;

    println!("✓ Valid row JSON");
    println!("  Rows: {}", summary.rows);
    println!(
        "  Aggregation units: {}",
        summary.aggregation_units.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("  Periods: {}", summary.periods.len());
    for (start, end) in &summary.periods {
        println!("    {} .. {}", start, end);
    }
    println!(
        "  Metrics: {}",
        summary.metrics.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    if file_path.to_string_lossy().ends_with(".incomplete.json") {
        println!("  Note: run was interrupted; rows are a partial result");
    }

    Ok(summary)
}

/// Display row schema information
pub fn display_schema(show_details: bool) {
    println!("OSPool Usage Row Schema");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Row Structure:");
        println!("  start_date: string            - First day of the range (YYYY-MM-DD)");
        println!("  end_date: string              - Last day of the period (YYYY-MM-DD)");
        println!("  aggregation_unit: string      - day, month, quarter or year");
        println!("  job_wall_time_bucket: number? - Wall time bucket 0-7 (with --compute-buckets)");
        println!("  job_wait_time_bucket: number? - Wait time bucket 0-7 (with --compute-buckets)");
        println!("  gpu_count: number             - Requested GPUs");
        println!("  processor_count: number       - Requested CPUs");
        println!("  system_account: string        - Submitting account (lower case)");
        println!("  project: string               - Topology project name");
        println!("  resource: string              - Topology resource name");
        println!("  submitted_job_count: number   - Jobs queued in the range");
        println!("  started_job_count: number     - Jobs started in the range");
        println!("  ended_job_count: number       - Jobs ended in the range");
        println!("  running_job_count: number     - Jobs running during the range");
        println!("  waitduration: number          - Queue seconds inside the range");
        println!("  wallduration: number          - Wall seconds inside the range");
        println!("  resource_institution, field_of_science, project_pi,");
        println!("  project_pi_institution, person, person_institution: string");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("OSPool Usage v{}", env!("CARGO_PKG_VERSION"));
    println!("Row Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Fetches OSPool job accounting aggregates into JSON reference fixtures.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    fn keys() -> Vec<String> {
        ordered_keys(false, &access_points(&[]))
    }

    #[test]
    fn test_summarize_rows() {
        let rows = vec![
            row(json!({
                "start_date": "2024-03-01", "end_date": "2024-03-31", "aggregation_unit": "month",
                "gpu_count": 0, "processor_count": 1, "project": "P", "resource": "R",
                "system_account": "a", "person": "a", "submitted_job_count": 3
            })),
            row(json!({
                "start_date": "2024-02-01", "end_date": "2024-02-29", "aggregation_unit": "month",
                "gpu_count": 0, "processor_count": 1, "project": "P", "resource": "R",
                "system_account": "a", "wallduration": 10.5
            })),
        ];

        let summary = summarize_rows(&rows, &keys()).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.periods.len(), 2);
        assert_eq!(
            summary.metrics,
            BTreeSet::from(["submitted_job_count".to_string(), "wallduration".to_string()])
        );
    }

    #[test]
    fn test_summarize_rows_missing_grouping_key() {
        let rows = vec![row(json!({
            "start_date": "2024-03-01", "end_date": "2024-03-31", "aggregation_unit": "month",
            "gpu_count": 0, "processor_count": 1, "system_account": "a", "project": "P"
        }))];
        let err = summarize_rows(&rows, &keys()).unwrap_err();
        assert!(err.to_string().contains("resource"));
    }

    #[test]
    fn test_summarize_rows_missing_period_key() {
        let rows = vec![row(json!({"start_date": "2024-03-01", "jobs": 1}))];
        assert!(summarize_rows(&rows, &keys()).is_err());
    }
}

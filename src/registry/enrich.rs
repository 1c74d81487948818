//! Attach registry metadata to flattened rows.

use super::topology::{ProjectInfo, ProjectMap, ResourceInfo, ResourceMap, UNKNOWN_KEY};
use crate::aggregator::Row;
use log::debug;
use serde_json::Value;

fn lookup_key(row: &Row, field: &str) -> String {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_else(|| UNKNOWN_KEY.to_string())
}

fn opt(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

/// Replace raw resource and project identifiers with registry records
///
/// Lookups are case-insensitive; identifiers the registry does not know
/// resolve to its `unknown` record. System accounts are lower-cased and
/// double as the person identifier.
pub fn enrich_rows(rows: &mut [Row], resources: &ResourceMap, projects: &ProjectMap) {
    let unknown_resource = ResourceInfo::unknown();
    let unknown_project = ProjectInfo::unknown();
    let unknown_resource = resources.get(UNKNOWN_KEY).unwrap_or(&unknown_resource);
    let unknown_project = projects.get(UNKNOWN_KEY).unwrap_or(&unknown_project);

    let mut unresolved = 0usize;

    for row in rows.iter_mut() {
        let resource = resources.get(&lookup_key(row, "resource")).unwrap_or_else(|| {
            unresolved += 1;
            unknown_resource
        });
        let project = projects
            .get(&lookup_key(row, "project"))
            .unwrap_or(unknown_project);

        let account = row
            .get("system_account")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_else(|| UNKNOWN_KEY.to_string());

        row.insert("resource".to_string(), Value::String(resource.name.clone()));
        row.insert("resource_institution".to_string(), opt(&resource.institution));
        row.insert("system_account".to_string(), Value::String(account.clone()));
        row.insert("field_of_science".to_string(), opt(&project.field_of_science));
        row.insert("project".to_string(), Value::String(project.name.clone()));
        row.insert("project_pi".to_string(), opt(&project.pi));
        row.insert("project_pi_institution".to_string(), opt(&project.pi_institution));
        row.insert("person".to_string(), Value::String(account));
        row.insert("person_institution".to_string(), opt(&project.pi_institution));
    }

    debug!("Enriched {} rows ({} with unknown resource)", rows.len(), unresolved);
}

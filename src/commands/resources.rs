//! Resources command implementation.
//!
//! Exports the compute entrypoints of the Topology registry as two fixture
//! files: `resources.json` and `resource_specs.json`.

use crate::output::write_json_atomic;
use crate::utils::config::FIXTURE_INDENT;
use crate::registry::{TopologyClient, TopologyResource};
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resource fixture entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceFixture {
    pub name: String,
    pub resource: String,
    pub description: Option<String>,
    pub resource_type: &'static str,
}

/// Resource hardware fixture entry (sizes are not tracked by Topology)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSpecFixture {
    pub resource: String,
    pub nodes: u64,
    pub processors: u64,
    pub ppn: u64,
}

/// Fixture entries for every resource offering a CE
pub fn ce_fixtures(resources: &[TopologyResource]) -> (Vec<ResourceFixture>, Vec<ResourceSpecFixture>) {
    resources
        .iter()
        .filter(|r| r.is_ce())
        .map(|r| {
            (
                ResourceFixture {
                    name: r.name.clone(),
                    resource: r.name.clone(),
                    description: r.description.clone(),
                    resource_type: "HTC",
                },
                ResourceSpecFixture {
                    resource: r.name.clone(),
                    nodes: 0,
                    processors: 0,
                    ppn: 0,
                },
            )
        })
        .unzip()
}

/// Write both fixture files into `output_dir`
pub fn write_fixtures(
    resources: &[TopologyResource],
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    let (fixtures, specs) = ce_fixtures(resources);
    info!("{} of {} resources offer a CE", fixtures.len(), resources.len());

    let resources_path = output_dir.join("resources.json");
    let specs_path = output_dir.join("resource_specs.json");

    write_json_atomic(&fixtures, &resources_path, Some(FIXTURE_INDENT))
        .with_context(|| format!("Failed to write {}", resources_path.display()))?;
    write_json_atomic(&specs, &specs_path, Some(FIXTURE_INDENT))
        .with_context(|| format!("Failed to write {}", specs_path.display()))?;

    Ok((resources_path, specs_path))
}

/// Execute the resources command
///
/// **Public** - main entry point called from main.rs
pub fn execute_resources(output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let topology = TopologyClient::new(output_dir).context("Failed to create registry client")?;
    let resources = topology
        .resources()
        .context("Failed to fetch Topology resource data")?;

    let paths = write_fixtures(&resources, output_dir)?;
    info!("✓ Fixtures written to: {}", output_dir.display());
    Ok(paths)
}

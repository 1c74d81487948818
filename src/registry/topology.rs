//! Parsers for the OSG Topology XML documents.
//!
//! Two documents are used:
//! - `miscproject/xml`: `<Projects><Project>...</Project></Projects>`
//! - `rgsummary/xml`: resource groups, each with a `Facility` and a list of
//!   `Resources/Resource` entries carrying their `Services`
//!
//! Both are read with a pull parser keeping the current element path, so
//! fields are matched by position and same-named elements nested deeper
//! (contact lists, service details) are not picked up.

use crate::utils::config::{CE_SERVICE_ID, UNKNOWN};
use crate::utils::error::RegistryError;
use log::{debug, warn};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registry key of the record used for unresolved identifiers
pub const UNKNOWN_KEY: &str = "unknown";

/// Project record from the Topology registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub pi: Option<String>,
    pub pi_institution: Option<String>,
    pub field_of_science: Option<String>,
    pub id: Option<String>,
    pub pi_institution_id: Option<String>,
    pub field_of_science_id: Option<String>,
}

impl ProjectInfo {
    pub fn unknown() -> Self {
        let unknown = Some(UNKNOWN.to_string());
        Self {
            name: UNKNOWN.to_string(),
            pi: unknown.clone(),
            pi_institution: unknown.clone(),
            field_of_science: unknown.clone(),
            id: unknown.clone(),
            pi_institution_id: unknown.clone(),
            field_of_science_id: unknown,
        }
    }
}

/// Resource record from the Topology registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    pub id: Option<String>,
    pub institution: Option<String>,
    pub institution_id: Option<String>,
}

impl ResourceInfo {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            id: Some(UNKNOWN.to_string()),
            institution: Some(UNKNOWN.to_string()),
            institution_id: Some(UNKNOWN.to_string()),
        }
    }
}

/// Lower-cased project name -> project
pub type ProjectMap = BTreeMap<String, ProjectInfo>;

/// Lower-cased resource name -> resource
pub type ResourceMap = BTreeMap<String, ResourceInfo>;

/// A resource as listed in the resource group summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyResource {
    pub name: String,
    pub id: Option<String>,
    pub description: Option<String>,
    pub institution: Option<String>,
    pub institution_id: Option<String>,
    pub service_ids: Vec<u32>,
}

impl TopologyResource {
    /// True if the resource offers a compute entrypoint
    pub fn is_ce(&self) -> bool {
        self.service_ids.contains(&CE_SERVICE_ID)
    }
}

/// Walk every element, reporting its path and trimmed direct text on close
///
/// `path` ends with the element being closed.
fn walk_elements<F>(xml: &str, mut on_close: F) -> Result<(), RegistryError>
where
    F: FnMut(&[String], Option<&str>),
{
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut texts: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                texts.push(String::new());
            }
            Ok(Event::Empty(e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                on_close(&path, None);
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .decode()
                    .map_err(|err| RegistryError::Malformed(err.to_string()))?;
                if let Some(current) = texts.last_mut() {
                    current.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = e
                    .decode()
                    .map_err(|err| RegistryError::Malformed(err.to_string()))?;
                if let Some(current) = texts.last_mut() {
                    current.push_str(&text);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                let name = e
                    .decode()
                    .map_err(|err| RegistryError::Malformed(err.to_string()))?;
                let resolved = resolve_entity(&name).ok_or_else(|| {
                    RegistryError::Malformed(format!("unknown entity &{};", name))
                })?;
                if let Some(current) = texts.last_mut() {
                    current.push_str(&resolved);
                }
            }
            Ok(Event::End(_)) => {
                let text = texts.pop().unwrap_or_default();
                let trimmed = text.trim();
                on_close(&path, (!trimmed.is_empty()).then_some(trimmed));
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RegistryError::Malformed(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !path.is_empty() {
        return Err(RegistryError::Malformed(format!(
            "unclosed element <{}>",
            path.join("/")
        )));
    }

    Ok(())
}

/// Resolve a predefined or numeric character entity
fn resolve_entity(name: &str) -> Option<String> {
    let predefined = match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    };
    if let Some(s) = predefined {
        return Some(s.to_string());
    }

    let code = name.strip_prefix('#')?;
    let value = match code.strip_prefix('x') {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse::<u32>().ok()?,
    };
    char::from_u32(value).map(String::from)
}

fn relative<'p>(path: &'p [String], depth: usize) -> Vec<&'p str> {
    path.iter().skip(depth).map(String::as_str).collect()
}

/// Parse the project list into a map keyed by lower-cased name
///
/// The map always holds an `unknown` entry.
pub fn parse_projects(xml: &str) -> Result<ProjectMap, RegistryError> {
    let mut projects = ProjectMap::new();
    projects.insert(UNKNOWN_KEY.to_string(), ProjectInfo::unknown());

    let mut fields: BTreeMap<String, String> = BTreeMap::new();

    walk_elements(xml, |path, text| match relative(path, 1).as_slice() {
        ["Project", field] => {
            if let Some(text) = text {
                fields.insert(field.to_string(), text.to_string());
            }
        }
        ["Project"] => {
            let mut take = |name: &str| fields.remove(name);
            let Some(name) = take("Name") else {
                warn!("Skipping project without a name");
                fields.clear();
                return;
            };
            let project = ProjectInfo {
                pi: take("PIName"),
                pi_institution: take("Organization"),
                field_of_science: take("FieldOfScience"),
                id: take("ID"),
                pi_institution_id: take("InstitutionID"),
                field_of_science_id: take("FieldOfScienceID"),
                name,
            };
            fields.clear();
            projects.insert(project.name.to_lowercase(), project);
        }
        _ => {}
    })?;

    debug!("Parsed {} projects", projects.len() - 1);
    Ok(projects)
}

/// Parse the resource group summary into a flat resource list
pub fn parse_resource_groups(xml: &str) -> Result<Vec<TopologyResource>, RegistryError> {
    let mut resources = Vec::new();
    let mut group: Vec<TopologyResource> = Vec::new();
    let mut current = TopologyResource::default();
    let mut facility_name: Option<String> = None;
    let mut facility_id: Option<String> = None;

    walk_elements(xml, |path, text| {
        let owned = text.map(str::to_string);
        match relative(path, 1).as_slice() {
            ["ResourceGroup", "Facility", "Name"] => facility_name = owned,
            ["ResourceGroup", "Facility", "ID"] => facility_id = owned,
            ["ResourceGroup", "Resources", "Resource", "Name"] => {
                current.name = owned.unwrap_or_default()
            }
            ["ResourceGroup", "Resources", "Resource", "ID"] => current.id = owned,
            ["ResourceGroup", "Resources", "Resource", "Description"] => {
                current.description = owned
            }
            ["ResourceGroup", "Resources", "Resource", "Services", "Service", "ID"] => {
                match owned.as_deref().map(str::parse::<u32>) {
                    Some(Ok(id)) => current.service_ids.push(id),
                    _ => warn!("Ignoring service with invalid ID {:?}", owned),
                }
            }
            ["ResourceGroup", "Resources", "Resource"] => {
                let resource = std::mem::take(&mut current);
                if resource.name.is_empty() {
                    warn!("Skipping resource without a name");
                } else {
                    group.push(resource);
                }
            }
            ["ResourceGroup"] => {
                for mut resource in group.drain(..) {
                    resource.institution = facility_name.clone();
                    resource.institution_id = facility_id.clone();
                    resources.push(resource);
                }
                facility_name = None;
                facility_id = None;
            }
            _ => {}
        }
    })?;

    debug!("Parsed {} resources", resources.len());
    Ok(resources)
}

/// Build the resource map keyed by lower-cased name
///
/// The map always holds an `unknown` entry.
pub fn resource_map(resources: &[TopologyResource]) -> ResourceMap {
    let mut map = ResourceMap::new();
    map.insert(UNKNOWN_KEY.to_string(), ResourceInfo::unknown());
    for r in resources {
        map.insert(
            r.name.to_lowercase(),
            ResourceInfo {
                name: r.name.clone(),
                id: r.id.clone(),
                institution: r.institution.clone(),
                institution_id: r.institution_id.clone(),
            },
        );
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Projects>
  <Project>
    <ID>12</ID>
    <Name>OSG-Staff</Name>
    <Description>Staff &amp; friends</Description>
    <PIName>Jane Doe</PIName>
    <Organization>University of Wisconsin-Madison</Organization>
    <Department/>
    <FieldOfScience>Computer Science</FieldOfScience>
    <FieldOfScienceID>11.07</FieldOfScienceID>
    <InstitutionID>https://osg-htc.org/iid/abc</InstitutionID>
    <Sponsor><CampusGrid><Name>Ignored</Name></CampusGrid></Sponsor>
  </Project>
  <Project>
    <ID>13</ID>
    <Name>Bio&#x2D;Lab</Name>
    <PIName/>
  </Project>
</Projects>"#;

    const RESOURCES_XML: &str = r#"<ResourceSummary>
  <ResourceGroup>
    <GroupName>CHTC</GroupName>
    <Facility><ID>10</ID><Name>University of Wisconsin</Name></Facility>
    <Resources>
      <Resource>
        <ID>100</ID>
        <Name>CHTC-Spark-CE1</Name>
        <Description>Spark CE</Description>
        <Services>
          <Service><ID>1</ID><Name>CE</Name></Service>
        </Services>
        <ContactLists><ContactList><Name>Admin</Name></ContactList></ContactLists>
      </Resource>
      <Resource>
        <ID>101</ID>
        <Name>CHTC-Squid</Name>
        <Description/>
        <Services>
          <Service><ID>138</ID><Name>Squid</Name></Service>
        </Services>
      </Resource>
    </Resources>
  </ResourceGroup>
</ResourceSummary>"#;

    #[test]
    fn test_parse_projects() {
        let projects = parse_projects(PROJECTS_XML).unwrap();
        assert_eq!(projects.len(), 3);

        let staff = &projects["osg-staff"];
        assert_eq!(staff.name, "OSG-Staff");
        assert_eq!(staff.pi.as_deref(), Some("Jane Doe"));
        assert_eq!(staff.field_of_science_id.as_deref(), Some("11.07"));
        assert_eq!(staff.id.as_deref(), Some("12"));

        let bio = &projects["bio-lab"];
        assert_eq!(bio.name, "Bio-Lab");
        assert_eq!(bio.pi, None);

        assert_eq!(projects[UNKNOWN_KEY], ProjectInfo::unknown());
    }

    #[test]
    fn test_parse_resource_groups() {
        let resources = parse_resource_groups(RESOURCES_XML).unwrap();
        assert_eq!(resources.len(), 2);

        let ce = &resources[0];
        assert_eq!(ce.name, "CHTC-Spark-CE1");
        assert_eq!(ce.institution.as_deref(), Some("University of Wisconsin"));
        assert_eq!(ce.institution_id.as_deref(), Some("10"));
        assert_eq!(ce.service_ids, vec![1]);
        assert!(ce.is_ce());

        assert!(!resources[1].is_ce());
        assert_eq!(resources[1].description, None);
    }

    #[test]
    fn test_resource_map() {
        let resources = parse_resource_groups(RESOURCES_XML).unwrap();
        let map = resource_map(&resources);
        assert_eq!(map["chtc-squid"].id.as_deref(), Some("101"));
        assert_eq!(map[UNKNOWN_KEY].name, "Unknown");
    }

    #[test]
    fn test_malformed_xml() {
        assert!(parse_projects("<Projects><Project>").is_err());
        assert!(parse_projects("<Projects></Nope>").is_err());
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp").as_deref(), Some("&"));
        assert_eq!(resolve_entity("#65").as_deref(), Some("A"));
        assert_eq!(resolve_entity("#x41").as_deref(), Some("A"));
        assert_eq!(resolve_entity("nbsp"), None);
    }
}

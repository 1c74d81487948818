//! OSG Topology registry: fetching, caching, parsing and row enrichment.

pub mod enrich;
pub mod fetch;
pub mod topology;

pub use enrich::enrich_rows;
pub use fetch::{load_cache, retry_with_backoff, store_cache, RetryPolicy, TopologyClient};
pub use topology::{
    parse_projects, parse_resource_groups, resource_map, ProjectInfo, ProjectMap, ResourceInfo,
    ResourceMap, TopologyResource,
};

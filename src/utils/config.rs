//! Configuration and constants for the CLI.

use std::time::Duration;

/// Default Elasticsearch endpoint
pub const DEFAULT_ES_URL: &str = "http://localhost:9200";

/// Index pattern holding the schedd job history
pub const OSPOOL_ES_INDEX: &str = "osg-schedd-*";

/// Timeout for registry downloads
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Output rows schema version (reported by `version`)
pub const SCHEMA_VERSION: &str = "1.0.0";

// Topology registry endpoints
pub const TOPOLOGY_PROJECT_DATA_URL: &str = "https://topology.opensciencegrid.org/miscproject/xml";
pub const TOPOLOGY_RESOURCE_DATA_URL: &str = "https://topology.opensciencegrid.org/rgsummary/xml";

pub const PROJECT_CACHE_FILE: &str = "topology_project_data.json";
pub const RESOURCE_CACHE_FILE: &str = "topology_resource_data.json";

/// Registry caches older than this are refetched
pub const CACHE_MAX_AGE: Duration = Duration::from_secs(23 * 3600);

/// Registry fetch attempts; delay doubles after each failure starting at 1s
pub const FETCH_MAX_TRIES: u32 = 5;
pub const FETCH_BASE_DELAY: Duration = Duration::from_secs(1);

/// Indent of row output files
pub const ROW_INDENT: usize = 2;

/// Indent of resource fixture files
pub const FIXTURE_INDENT: usize = 4;

/// How often a waiting run checks for a stop request
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default lookback window in days
pub const DEFAULT_LOOKBACK_DAYS: i64 = 28;

/// Value written for identifiers the registry cannot resolve
pub const UNKNOWN: &str = "Unknown";

/// Topology service ID of a compute entrypoint
pub const CE_SERVICE_ID: u32 = 1;

/// Access points known to submit into the OSPool
pub const OSPOOL_APS: &[&str] = &[
    "ap20.uc.osg-htc.org",
    "ap2007.chtc.wisc.edu",
    "ap21.uc.osg-htc.org",
    "ap22.uc.osg-htc.org",
    "ap23.uc.osg-htc.org",
    "ap40.uw.osg-htc.org",
    "ap41.uw.osg-htc.org",
    "ap42.uw.osg-htc.org",
    "ap7.chtc.wisc.edu",
    "ap7.chtc.wisc.edu@ap2007.chtc.wisc.edu",
    "ce1.opensciencegrid.org",
    "comses.sol.rc.asu.edu",
    "condor.scigap.org",
    "descmp3.cosmology.illinois.edu",
    "gremlin.phys.uconn.edu",
    "htcss-dev-ap.ospool.opensciencegrid.org",
    "huxley-osgsub-001.sdmz.amnh.org",
    "lambda06.rowan.edu",
    "login-el7.xenon.ci-connect.net",
    "login-test.osgconnect.net",
    "login.ci-connect.uchicago.edu",
    "login.collab.ci-connect.net",
    "login.duke.ci-connect.net",
    "login.snowmass21.io",
    "login.veritas.ci-connect.net",
    "login04.osgconnect.net",
    "login05.osgconnect.net",
    "mendel-osgsub-001.sdmz.amnh.org",
    "nsgosg.sdsc.edu",
    "os-ce1.opensciencegrid.org",
    "os-ce1.osgdev.chtc.io",
    "osg-prp-submit.nautilus.optiputer.net",
    "osg-vo.isi.edu",
    "ospool-eht.chtc.wisc.edu",
    "xd-submit0000.chtc.wisc.edu",
    "testbed",
];

/// Central managers of the OSPool
pub const OSPOOL_COLLECTORS: &[&str] = &[
    "cm-1.ospool.osg-htc.org",
    "cm-2.ospool.osg-htc.org",
    "flock.opensciencegrid.org",
];

/// Resources that report into the index but are not part of the OSPool
pub const NON_OSPOOL_RESOURCES: &[&str] = &[
    "SURFsara",
    "NIKHEF-ELPROD",
    "INFN-T1",
    "IN2P3-CC",
    "UIUC-ICC-SPT",
    "TACC-Frontera-CE2",
];

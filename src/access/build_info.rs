//! Server version and hosting environment of a cluster

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::slices::run_command;
use super::{AccessError, ConnectionString, MongoDbDriver, QueryResult, Slice, DEFAULT_QUERY_TIMEOUT};
use crate::mql::components::{
    CommandType, HasCollectionReference, HasFieldReference, HasFilter, HasValueReference,
    IsCommand, Version,
};
use crate::mql::{BsonType, Namespace, Node, QueryContext, Value};

/// Reported when the server can't be asked.
const DEFAULT_VERSION: &str = "8.0.0";

static ATLAS_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*\.mongodb(-dev|-qa|-stage)?\.net(:\d+)?$").unwrap());
static ATLAS_STREAM_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^atlas-stream-.+").unwrap());
static LOCALHOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(localhost|127\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})|0\.0\.0\.0|\[(?:0*:)*?:?0*1\])(:\d+)?$",
    )
    .unwrap()
});
static DIGITAL_OCEAN_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*\.mongo\.ondigitalocean\.com$").unwrap());
static COSMOS_DB_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*\.cosmos\.azure\.com$").unwrap());
static DOCUMENT_DB_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*docdb(-elastic)?\.amazonaws\.com$").unwrap());
static PORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBuildInfo {
    pub version: String,
    pub git_version: Option<String>,
    pub modules: Vec<String>,
    pub is_localhost: bool,
    pub is_atlas: bool,
    pub is_atlas_stream: bool,
    /// An Atlas CLI local deployment
    pub is_local_atlas: bool,
    pub is_digital_ocean: bool,
    pub is_enterprise: bool,
    pub is_genuine: bool,
    /// `cosmosdb` or `documentdb` when the server only emulates MongoDB
    pub non_genuine_variant: Option<String>,
    pub is_data_lake: bool,
    pub server_url: ConnectionString,
}

impl ClusterBuildInfo {
    /// The server version, `Version::default()` when it can't be parsed.
    pub fn parsed_version(&self) -> Version {
        self.version.parse().unwrap_or_default()
    }

    /// First host without its port, on Atlas only.
    pub fn atlas_host(&self) -> Option<String> {
        if !self.is_atlas {
            return None;
        }
        self.server_url
            .hosts
            .first()
            .map(|host| PORT.replace(host, "").into_owned())
    }
}

/// Build info of the connected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildInfo;

impl Slice for BuildInfo {
    type Output = ClusterBuildInfo;

    fn id(&self) -> String {
        "BuildInfo".to_string()
    }

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<ClusterBuildInfo, AccessError> {
        let server_url = driver.connection_string();
        let all_hosts = |pattern: &Regex| {
            !server_url.hosts.is_empty() && server_url.hosts.iter().all(|host| pattern.is_match(host))
        };

        let is_atlas = all_hosts(&ATLAS_HOST);
        let non_genuine_variant = if all_hosts(&COSMOS_DB_HOST) {
            Some("cosmosdb".to_string())
        } else if all_hosts(&DOCUMENT_DB_HOST) {
            Some("documentdb".to_string())
        } else {
            None
        };

        let server = if driver.connected() {
            run_build_info(driver)
        } else {
            Value::Null
        };
        let version = server
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_VERSION)
            .to_string();
        let git_version = server
            .get("gitVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let modules: Vec<String> = match server.get("modules") {
            Some(Value::Array(modules)) => modules
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let is_enterprise = git_version
            .as_deref()
            .is_some_and(|git| git.contains("enterprise"))
            || modules.iter().any(|module| module == "enterprise");

        Ok(ClusterBuildInfo {
            is_localhost: all_hosts(&LOCALHOST),
            is_atlas,
            is_atlas_stream: is_atlas && all_hosts(&ATLAS_STREAM_HOST),
            is_local_atlas: driver.connected() && is_atlas_cli_deployment(driver),
            is_digital_ocean: all_hosts(&DIGITAL_OCEAN_HOST),
            is_enterprise,
            is_genuine: non_genuine_variant.is_none(),
            non_genuine_variant,
            is_data_lake: server.get("dataLake").is_some(),
            version,
            git_version,
            modules,
            server_url,
        })
    }
}

fn run_build_info(driver: &dyn MongoDbDriver) -> Value {
    match driver.run_query(
        &run_command("admin", "buildInfo", Vec::new()),
        &QueryContext::empty(),
        DEFAULT_QUERY_TIMEOUT,
        None,
    ) {
        QueryResult::Run(server) => server,
        QueryResult::NoResult | QueryResult::NotRun => {
            debug!("buildInfo was not run, using the default version");
            Value::Null
        }
    }
}

/// The Atlas CLI registers its local deployments in `admin.atlascli`.
fn is_atlas_cli_deployment(driver: &dyn MongoDbDriver) -> bool {
    let count = Node::new(
        (),
        vec![
            IsCommand::new(CommandType::CountDocuments).into(),
            HasCollectionReference::known(None, (), Namespace::new("admin", "atlascli")).into(),
            HasFilter::new(vec![Node::new(
                (),
                vec![
                    HasFieldReference::from_schema((), "managedClusterType").into(),
                    HasValueReference::constant((), "atlasCliLocalDevCluster", BsonType::String)
                        .into(),
                ],
            )])
            .into(),
        ],
    );

    match driver.run_query(&count, &QueryContext::empty(), DEFAULT_QUERY_TIMEOUT, Some(1)) {
        QueryResult::Run(count) => count.as_i64().is_some_and(|count| count > 0),
        QueryResult::NoResult | QueryResult::NotRun => false,
    }
}

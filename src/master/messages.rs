//! Request/response types for the master RPC surface
//!
//! Every response carries `error: Option<MasterError>`. A reachable master
//! always returns the response body; application failures (not leader, not
//! initialized, unknown table...) travel inside that envelope.

use crate::common::Error;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error envelope
// ============================================================================

/// Status kind carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    NotFound,
    AlreadyPresent,
    InvalidArgument,
    IllegalState,
    ServiceUnavailable,
    TimedOut,
    NetworkError,
    IoError,
    RuntimeError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub code: StatusCode,
    pub message: String,
}

impl From<&Error> for AppStatus {
    fn from(err: &Error) -> Self {
        Self {
            code: err.status_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterErrorCode {
    UnknownError,
    InvalidRequest,
    NamespaceAlreadyPresent,
    NamespaceNotFound,
    TableAlreadyPresent,
    TableNotFound,
    TabletNotFound,
    CatalogManagerNotInitialized,
    NotTheLeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterError {
    pub code: MasterErrorCode,
    pub status: AppStatus,
}

impl MasterError {
    pub fn new(code: MasterErrorCode, err: &Error) -> Self {
        Self {
            code,
            status: AppStatus::from(err),
        }
    }

    /// Rebuild a local error from an envelope received over the wire.
    pub fn to_error(&self) -> Error {
        let msg = format!("{:?}: {}", self.code, self.status.message);
        match self.code {
            MasterErrorCode::NotTheLeader => return Error::NotLeader(msg),
            MasterErrorCode::CatalogManagerNotInitialized => return Error::NotInitialized(msg),
            _ => {}
        }
        match self.status.code {
            StatusCode::NotFound => Error::NotFound(msg),
            StatusCode::AlreadyPresent => Error::AlreadyPresent(msg),
            StatusCode::InvalidArgument => Error::InvalidArgument(msg),
            StatusCode::IllegalState => Error::IllegalState(msg),
            StatusCode::ServiceUnavailable => Error::ServiceUnavailable(msg),
            StatusCode::TimedOut => Error::Timeout(msg),
            StatusCode::NetworkError => Error::Network(msg),
            StatusCode::IoError | StatusCode::RuntimeError => Error::Catalog(msg),
        }
    }
}

/// Shared behaviour of every response: access to the error envelope.
pub trait MasterResponse: Default + Send + 'static {
    fn error(&self) -> Option<&MasterError>;

    fn error_mut(&mut self) -> &mut Option<MasterError>;

    fn set_error(&mut self, code: MasterErrorCode, err: &Error) {
        *self.error_mut() = Some(MasterError::new(code, err));
    }

    /// Record `err` as UNKNOWN_ERROR unless the delegate already set a specific error.
    fn set_unknown_error_if_unset(&mut self, err: &Error) {
        if self.error().is_none() {
            self.set_error(MasterErrorCode::UnknownError, err);
        }
    }

    fn is_ok(&self) -> bool {
        self.error().is_none()
    }
}

macro_rules! impl_master_response {
    ($($resp:ty),* $(,)?) => {
        $(
            impl MasterResponse for $resp {
                fn error(&self) -> Option<&MasterError> {
                    self.error.as_ref()
                }

                fn error_mut(&mut self) -> &mut Option<MasterError> {
                    &mut self.error
                }
            }
        )*
    };
}

// ============================================================================
// Identity & registration
// ============================================================================

/// Permanent node identity plus process incarnation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInstance {
    pub permanent_uuid: String,
    /// Bumped on every process start
    pub instance_seqno: i64,
}

impl NodeInstance {
    pub fn new(permanent_uuid: impl Into<String>, instance_seqno: i64) -> Self {
        Self {
            permanent_uuid: permanent_uuid.into(),
            instance_seqno,
        }
    }
}

impl std::fmt::Display for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.permanent_uuid, self.instance_seqno)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::str::FromStr for HostPort {
    type Err = Error;

    /// Parse `host:port`, tolerating an `http://` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("missing port in address {}", s)))?;
        let port = port
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid port in address {}", s)))?;
        if host.is_empty() {
            return Err(Error::InvalidArgument(format!("missing host in address {}", s)));
        }
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for HostPort {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInfo {
    pub cloud: String,
    pub region: String,
    pub zone: String,
}

/// What a tablet server announces about itself when registering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsRegistration {
    pub rpc_addresses: Vec<HostPort>,
    pub http_addresses: Vec<HostPort>,
    pub cloud_info: Option<CloudInfo>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterRegistration {
    pub rpc_addresses: Vec<HostPort>,
    pub http_addresses: Vec<HostPort>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaftRole {
    #[default]
    Follower,
    Candidate,
    Leader,
    Learner,
    /// Removed from the consensus group (shell mode)
    NonParticipant,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
            RaftRole::Learner => write!(f, "learner"),
            RaftRole::NonParticipant => write!(f, "non-participant"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    #[default]
    Voter,
    Observer,
}

/// One member of the consensus group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftPeer {
    pub permanent_uuid: String,
    pub member_type: MemberType,
    pub last_known_addr: Option<HostPort>,
}

/// Replicated master configuration; `opid_index` is its version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    pub opid_index: i64,
    pub peers: Vec<RaftPeer>,
}

/// Per-master entry returned by ListMasters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    pub instance_id: Option<NodeInstance>,
    pub registration: Option<MasterRegistration>,
    pub role: Option<RaftRole>,
    pub error: Option<AppStatus>,
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabletState {
    #[default]
    NotStarted,
    Bootstrapping,
    Running,
    Failed,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportedTablet {
    pub tablet_id: String,
    pub state: TabletState,
    pub role: Option<RaftRole>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletReport {
    pub sequence_number: i64,
    pub is_incremental: bool,
    pub updated_tablets: Vec<ReportedTablet>,
    pub removed_tablet_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedTabletUpdate {
    pub tablet_id: String,
    pub state_msg: Option<String>,
}

/// Acknowledgement of an applied tablet report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReportUpdates {
    pub tablets: Vec<ReportedTabletUpdate>,
}

fn unseen_config_index() -> i64 {
    -1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TsHeartbeatRequest {
    pub ts_instance: NodeInstance,
    #[serde(default)]
    pub registration: Option<TsRegistration>,
    #[serde(default)]
    pub tablet_report: Option<TabletReport>,
    /// Last master config version the tablet server has seen
    #[serde(default = "unseen_config_index")]
    pub config_index: i64,
    #[serde(default)]
    pub num_live_tablets: i32,
    /// Monotonic per-process heartbeat counter; stale deliveries are not applied
    #[serde(default)]
    pub heartbeat_seqno: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsHeartbeatResponse {
    pub error: Option<MasterError>,
    pub master_instance: Option<NodeInstance>,
    pub leader_master: bool,
    pub master_config: Option<RaftConfig>,
    pub needs_reregister: bool,
    pub needs_full_tablet_report: bool,
    pub tablet_report: Option<TabletReportUpdates>,
}

// ============================================================================
// Tablet & table locations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsInfo {
    pub permanent_uuid: String,
    pub rpc_addresses: Vec<HostPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReplica {
    pub ts_info: TsInfo,
    pub role: RaftRole,
    pub state: TabletState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletLocations {
    pub tablet_id: String,
    pub table_id: String,
    pub replicas: Vec<TabletReplica>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletLocationError {
    pub tablet_id: String,
    pub status: AppStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTabletLocationsRequest {
    pub tablet_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTabletLocationsResponse {
    pub error: Option<MasterError>,
    pub tablet_locations: Vec<TabletLocations>,
    pub errors: Vec<TabletLocationError>,
}

/// Identifies a table by id, or by name within a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableIdentifier {
    pub table_id: Option<String>,
    pub table_name: Option<String>,
    pub namespace: Option<String>,
}

impl TableIdentifier {
    pub fn by_id(table_id: impl Into<String>) -> Self {
        Self {
            table_id: Some(table_id.into()),
            ..Default::default()
        }
    }

    pub fn by_name(namespace: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            table_id: None,
            table_name: Some(table_name.into()),
            namespace: Some(namespace.into()),
        }
    }
}

impl std::fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.table_id, &self.namespace, &self.table_name) {
            (Some(id), _, _) => write!(f, "id={}", id),
            (None, Some(ns), Some(name)) => write!(f, "{}.{}", ns, name),
            (None, None, Some(name)) => write!(f, "{}", name),
            _ => write!(f, "<empty>"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTableLocationsRequest {
    pub table: TableIdentifier,
    pub max_returned_locations: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTableLocationsResponse {
    pub error: Option<MasterError>,
    pub tablet_locations: Vec<TabletLocations>,
}

// ============================================================================
// Table DDL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_key: bool,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTableRequest {
    pub name: String,
    pub namespace: Option<String>,
    pub schema: Schema,
    pub num_tablets: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTableResponse {
    pub error: Option<MasterError>,
    pub table_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsCreateTableDoneRequest {
    pub table: TableIdentifier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsCreateTableDoneResponse {
    pub error: Option<MasterError>,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteTableRequest {
    pub table: TableIdentifier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteTableResponse {
    pub error: Option<MasterError>,
    pub table_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsDeleteTableDoneRequest {
    pub table_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsDeleteTableDoneResponse {
    pub error: Option<MasterError>,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlterTableStep {
    AddColumn { column: ColumnSchema },
    DropColumn { name: String },
    RenameColumn { old_name: String, new_name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlterTableRequest {
    pub table: TableIdentifier,
    pub new_table_name: Option<String>,
    pub alter_schema_steps: Vec<AlterTableStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlterTableResponse {
    pub error: Option<MasterError>,
    pub schema_version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsAlterTableDoneRequest {
    pub table: TableIdentifier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsAlterTableDoneResponse {
    pub error: Option<MasterError>,
    pub schema_version: u32,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTablesRequest {
    /// Substring match on the table name
    pub name_filter: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub id: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTablesResponse {
    pub error: Option<MasterError>,
    pub tables: Vec<TableEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTableSchemaRequest {
    pub table: TableIdentifier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTableSchemaResponse {
    pub error: Option<MasterError>,
    pub table_id: Option<String>,
    pub schema: Option<Schema>,
    pub schema_version: u32,
    pub create_table_done: bool,
}

// ============================================================================
// Namespaces
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceIdentifier {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateNamespaceRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateNamespaceResponse {
    pub error: Option<MasterError>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteNamespaceRequest {
    pub namespace: NamespaceIdentifier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteNamespaceResponse {
    pub error: Option<MasterError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListNamespacesRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListNamespacesResponse {
    pub error: Option<MasterError>,
    pub namespaces: Vec<NamespaceIdentifier>,
}

// ============================================================================
// Cluster membership & administration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTabletServersRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabletServerEntry {
    pub instance_id: NodeInstance,
    pub registration: TsRegistration,
    pub millis_since_heartbeat: u64,
    pub num_live_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTabletServersResponse {
    pub error: Option<MasterError>,
    pub servers: Vec<TabletServerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMastersRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListMastersResponse {
    pub error: Option<MasterError>,
    pub masters: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListMasterRaftPeersRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListMasterRaftPeersResponse {
    pub error: Option<MasterError>,
    pub masters: Vec<RaftPeer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMasterRegistrationRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetMasterRegistrationResponse {
    pub error: Option<MasterError>,
    pub instance_id: Option<NodeInstance>,
    pub registration: Option<MasterRegistration>,
    pub role: Option<RaftRole>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpMasterStateRequest {
    pub on_disk: bool,
    pub peers_also: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDumpError {
    pub permanent_uuid: String,
    pub status: AppStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpMasterStateResponse {
    pub error: Option<MasterError>,
    /// Peers that accepted the forwarded dump command
    pub peers_dumped: Vec<String>,
    pub peer_errors: Vec<PeerDumpError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovedMasterUpdateRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovedMasterUpdateResponse {
    pub error: Option<MasterError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_uuid: String,
    /// Bumped on every accepted change
    pub version: i64,
    pub num_replicas: u32,
    /// Tablet servers being drained
    pub blacklisted_hosts: Vec<HostPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetMasterClusterConfigRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetMasterClusterConfigResponse {
    pub error: Option<MasterError>,
    pub cluster_config: Option<ClusterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMasterClusterConfigRequest {
    /// `version` must match the current config version
    pub cluster_config: ClusterConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeMasterClusterConfigResponse {
    pub error: Option<MasterError>,
}

// ============================================================================
// Load balancer
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeLoadBalancerStateRequest {
    pub is_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeLoadBalancerStateResponse {
    pub error: Option<MasterError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetLoadMovePercentRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLoadMovePercentResponse {
    pub error: Option<MasterError>,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsLoadBalancedRequest {
    pub expected_num_servers: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsLoadBalancedResponse {
    pub error: Option<MasterError>,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsMasterLeaderReadyRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsMasterLeaderReadyResponse {
    pub error: Option<MasterError>,
}

impl_master_response!(
    TsHeartbeatResponse,
    GetTabletLocationsResponse,
    GetTableLocationsResponse,
    CreateTableResponse,
    IsCreateTableDoneResponse,
    DeleteTableResponse,
    IsDeleteTableDoneResponse,
    AlterTableResponse,
    IsAlterTableDoneResponse,
    ListTablesResponse,
    GetTableSchemaResponse,
    CreateNamespaceResponse,
    DeleteNamespaceResponse,
    ListNamespacesResponse,
    ListTabletServersResponse,
    ListMastersResponse,
    ListMasterRaftPeersResponse,
    GetMasterRegistrationResponse,
    DumpMasterStateResponse,
    RemovedMasterUpdateResponse,
    GetMasterClusterConfigResponse,
    ChangeMasterClusterConfigResponse,
    ChangeLoadBalancerStateResponse,
    GetLoadMovePercentResponse,
    IsLoadBalancedResponse,
    IsMasterLeaderReadyResponse,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_unknown_does_not_overwrite_specific_error() {
        let mut resp = CreateTableResponse::default();
        resp.set_error(
            MasterErrorCode::TableAlreadyPresent,
            &Error::AlreadyPresent("t1".into()),
        );
        resp.set_unknown_error_if_unset(&Error::Catalog("boom".into()));
        let err = resp.error.unwrap();
        assert_eq!(err.code, MasterErrorCode::TableAlreadyPresent);
        assert_eq!(err.status.code, StatusCode::AlreadyPresent);
    }

    #[test]
    fn test_set_unknown_when_unset() {
        let mut resp = ListTablesResponse::default();
        assert!(resp.is_ok());
        resp.set_unknown_error_if_unset(&Error::Catalog("boom".into()));
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::UnknownError);
    }

    #[test]
    fn test_heartbeat_request_defaults() {
        let req: TsHeartbeatRequest = serde_json::from_str(
            r#"{"ts_instance": {"permanent_uuid": "ts-1", "instance_seqno": 3}}"#,
        )
        .unwrap();
        assert_eq!(req.config_index, -1);
        assert!(req.registration.is_none());
        assert!(req.heartbeat_seqno.is_none());
        assert_eq!(req.ts_instance.to_string(), "ts-1@3");
    }

    #[test]
    fn test_host_port_parse() {
        let hp: HostPort = "http://10.0.0.1:7100/".parse().unwrap();
        assert_eq!(hp, HostPort::new("10.0.0.1", 7100));
        assert!("10.0.0.1".parse::<HostPort>().is_err());
        assert!(":7100".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_envelope_to_error() {
        let err = MasterError::new(
            MasterErrorCode::NotTheLeader,
            &Error::NotLeader("follower".into()),
        );
        assert!(matches!(err.to_error(), Error::NotLeader(_)));
        let err = MasterError::new(
            MasterErrorCode::TableNotFound,
            &Error::NotFound("t".into()),
        );
        assert!(err.to_error().is_not_found());
    }

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&MasterErrorCode::NotTheLeader).unwrap();
        assert_eq!(json, "\"NOT_THE_LEADER\"");
    }
}

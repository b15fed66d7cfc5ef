//! In-memory catalog store
//!
//! A small, non-durable [`CatalogStore`] used by the standalone master binary
//! and by tests. Tables are split into a fixed number of tablets at creation;
//! tablet replicas are learned exclusively from tablet reports.

use crate::common::utils::timestamp_now_millis;
use crate::common::{Error, Result};
use crate::master::catalog::CatalogStore;
use crate::master::messages::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_NAMESPACE: &str = "default";

struct NamespaceInfo {
    id: String,
    name: String,
}

struct TableInfo {
    id: String,
    name: String,
    namespace_id: String,
    schema: Schema,
    schema_version: u32,
    tablet_ids: Vec<String>,
    deleted: bool,
}

struct TabletInfo {
    table_id: String,
    /// Keyed by tablet server uuid
    replicas: BTreeMap<String, TabletReplica>,
}

struct CatalogState {
    namespaces: BTreeMap<String, NamespaceInfo>,
    tables: BTreeMap<String, TableInfo>,
    tablets: BTreeMap<String, TabletInfo>,
    reported_servers: BTreeSet<String>,
    cluster_config: ClusterConfig,
    /// Replicas on blacklisted servers when the blacklist was installed
    blacklist_initial_load: usize,
}

pub struct MemCatalog {
    state: Mutex<CatalogState>,
    load_balancer_enabled: AtomicBool,
    dump_dir: Option<PathBuf>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn fail<R: MasterResponse>(resp: &mut R, code: MasterErrorCode, err: Error) -> Result<()> {
    resp.set_error(code, &err);
    Err(err)
}

impl Default for MemCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemCatalog {
    /// `dump_dir` is where on-disk state dumps are written.
    pub fn new(dump_dir: Option<PathBuf>) -> Self {
        let default_ns = NamespaceInfo {
            id: new_id(),
            name: DEFAULT_NAMESPACE.to_string(),
        };
        let mut namespaces = BTreeMap::new();
        namespaces.insert(default_ns.id.clone(), default_ns);
        Self {
            state: Mutex::new(CatalogState {
                namespaces,
                tables: BTreeMap::new(),
                tablets: BTreeMap::new(),
                reported_servers: BTreeSet::new(),
                cluster_config: ClusterConfig {
                    cluster_uuid: new_id(),
                    version: 1,
                    num_replicas: 3,
                    blacklisted_hosts: Vec::new(),
                },
                blacklist_initial_load: 0,
            }),
            load_balancer_enabled: AtomicBool::new(true),
            dump_dir,
        }
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CatalogState {
    fn namespace_id(&self, name: &str) -> Option<String> {
        self.namespaces
            .values()
            .find(|ns| ns.name == name)
            .map(|ns| ns.id.clone())
    }

    fn namespace_name(&self, id: &str) -> String {
        self.namespaces
            .get(id)
            .map(|ns| ns.name.clone())
            .unwrap_or_default()
    }

    fn find_table(&self, ident: &TableIdentifier) -> Option<&TableInfo> {
        if let Some(id) = &ident.table_id {
            return self.tables.get(id).filter(|t| !t.deleted);
        }
        let name = ident.table_name.as_ref()?;
        let ns_id = self.namespace_id(ident.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE))?;
        self.tables
            .values()
            .find(|t| !t.deleted && &t.name == name && t.namespace_id == ns_id)
    }

    fn table_running(&self, table: &TableInfo) -> bool {
        table.tablet_ids.iter().all(|id| {
            self.tablets.get(id).is_some_and(|tablet| {
                tablet
                    .replicas
                    .values()
                    .any(|r| r.state == TabletState::Running)
            })
        })
    }

    fn locations(&self, tablet_id: &str) -> Option<TabletLocations> {
        let tablet = self.tablets.get(tablet_id)?;
        Some(TabletLocations {
            tablet_id: tablet_id.to_string(),
            table_id: tablet.table_id.clone(),
            replicas: tablet.replicas.values().cloned().collect(),
        })
    }

    fn blacklisted_load(&self) -> usize {
        let blacklist = &self.cluster_config.blacklisted_hosts;
        self.tablets
            .values()
            .flat_map(|t| t.replicas.values())
            .filter(|r| {
                r.ts_info
                    .rpc_addresses
                    .iter()
                    .any(|addr| blacklist.contains(addr))
            })
            .count()
    }
}

fn table_not_found<R: MasterResponse>(resp: &mut R, ident: &TableIdentifier) -> Result<()> {
    fail(
        resp,
        MasterErrorCode::TableNotFound,
        Error::NotFound(format!("table {} not found", ident)),
    )
}

impl CatalogStore for MemCatalog {
    fn create_table(&self, req: &CreateTableRequest, resp: &mut CreateTableResponse) -> Result<()> {
        if req.name.is_empty() {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::InvalidArgument("table name is empty".into()),
            );
        }
        if !req.schema.columns.iter().any(|c| c.is_key) {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::InvalidArgument(format!("table {} has no key column", req.name)),
            );
        }

        let mut state = self.state();
        let ns_name = req.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let Some(namespace_id) = state.namespace_id(ns_name) else {
            return fail(
                resp,
                MasterErrorCode::NamespaceNotFound,
                Error::NotFound(format!("namespace {} not found", ns_name)),
            );
        };
        let ident = TableIdentifier::by_name(ns_name, req.name.clone());
        if let Some(existing) = state.find_table(&ident) {
            let err = Error::AlreadyPresent(format!("table {} already exists", ident));
            resp.table_id = Some(existing.id.clone());
            return fail(resp, MasterErrorCode::TableAlreadyPresent, err);
        }

        let table_id = new_id();
        let tablet_ids: Vec<String> = (0..req.num_tablets.max(1)).map(|_| new_id()).collect();
        for tablet_id in &tablet_ids {
            state.tablets.insert(
                tablet_id.clone(),
                TabletInfo {
                    table_id: table_id.clone(),
                    replicas: BTreeMap::new(),
                },
            );
        }
        state.tables.insert(
            table_id.clone(),
            TableInfo {
                id: table_id.clone(),
                name: req.name.clone(),
                namespace_id,
                schema: req.schema.clone(),
                schema_version: 0,
                tablet_ids,
                deleted: false,
            },
        );
        tracing::info!("Created table {} ({})", ident, table_id);
        resp.table_id = Some(table_id);
        Ok(())
    }

    fn is_create_table_done(
        &self,
        req: &IsCreateTableDoneRequest,
        resp: &mut IsCreateTableDoneResponse,
    ) -> Result<()> {
        let state = self.state();
        let Some(table) = state.find_table(&req.table) else {
            return table_not_found(resp, &req.table);
        };
        resp.done = state.table_running(table);
        Ok(())
    }

    fn delete_table(&self, req: &DeleteTableRequest, resp: &mut DeleteTableResponse) -> Result<()> {
        let mut state = self.state();
        let Some(table_id) = state.find_table(&req.table).map(|t| t.id.clone()) else {
            return table_not_found(resp, &req.table);
        };
        if let Some(table) = state.tables.get_mut(&table_id) {
            table.deleted = true;
        }
        tracing::info!("Deleted table {}", table_id);
        resp.table_id = Some(table_id);
        Ok(())
    }

    fn is_delete_table_done(
        &self,
        req: &IsDeleteTableDoneRequest,
        resp: &mut IsDeleteTableDoneResponse,
    ) -> Result<()> {
        let state = self.state();
        let Some(table) = state.tables.get(&req.table_id) else {
            return table_not_found(resp, &TableIdentifier::by_id(req.table_id.clone()));
        };
        resp.done = table.deleted
            && table.tablet_ids.iter().all(|id| {
                state
                    .tablets
                    .get(id)
                    .map_or(true, |tablet| tablet.replicas.is_empty())
            });
        Ok(())
    }

    fn alter_table(&self, req: &AlterTableRequest, resp: &mut AlterTableResponse) -> Result<()> {
        let mut state = self.state();
        let Some((table_id, ns_id)) = state
            .find_table(&req.table)
            .map(|t| (t.id.clone(), t.namespace_id.clone()))
        else {
            return table_not_found(resp, &req.table);
        };

        if let Some(new_name) = &req.new_table_name {
            let clash = state
                .tables
                .values()
                .any(|t| !t.deleted && &t.name == new_name && t.namespace_id == ns_id);
            if clash {
                return fail(
                    resp,
                    MasterErrorCode::TableAlreadyPresent,
                    Error::AlreadyPresent(format!("table {} already exists", new_name)),
                );
            }
        }

        let Some(table) = state.tables.get_mut(&table_id) else {
            return table_not_found(resp, &req.table);
        };
        let mut schema = table.schema.clone();
        for step in &req.alter_schema_steps {
            let outcome = match step {
                AlterTableStep::AddColumn { column } => {
                    if schema.columns.iter().any(|c| c.name == column.name) {
                        Err(format!("column {} already exists", column.name))
                    } else {
                        schema.columns.push(column.clone());
                        Ok(())
                    }
                }
                AlterTableStep::DropColumn { name } => {
                    match schema.columns.iter().position(|c| &c.name == name) {
                        Some(idx) if schema.columns[idx].is_key => {
                            Err(format!("cannot drop key column {}", name))
                        }
                        Some(idx) => {
                            schema.columns.remove(idx);
                            Ok(())
                        }
                        None => Err(format!("column {} does not exist", name)),
                    }
                }
                AlterTableStep::RenameColumn { old_name, new_name } => {
                    if schema.columns.iter().any(|c| &c.name == new_name) {
                        Err(format!("column {} already exists", new_name))
                    } else if let Some(col) =
                        schema.columns.iter_mut().find(|c| &c.name == old_name)
                    {
                        col.name = new_name.clone();
                        Ok(())
                    } else {
                        Err(format!("column {} does not exist", old_name))
                    }
                }
            };
            if let Err(msg) = outcome {
                return fail(
                    resp,
                    MasterErrorCode::InvalidRequest,
                    Error::InvalidArgument(msg),
                );
            }
        }

        if let Some(new_name) = &req.new_table_name {
            table.name = new_name.clone();
        }
        if schema != table.schema {
            table.schema = schema;
            table.schema_version += 1;
        }
        resp.schema_version = table.schema_version;
        Ok(())
    }

    fn is_alter_table_done(
        &self,
        req: &IsAlterTableDoneRequest,
        resp: &mut IsAlterTableDoneResponse,
    ) -> Result<()> {
        let state = self.state();
        let Some(table) = state.find_table(&req.table) else {
            return table_not_found(resp, &req.table);
        };
        resp.schema_version = table.schema_version;
        resp.done = true;
        Ok(())
    }

    fn list_tables(&self, req: &ListTablesRequest, resp: &mut ListTablesResponse) -> Result<()> {
        let state = self.state();
        let ns_filter = match &req.namespace {
            Some(name) => match state.namespace_id(name) {
                Some(id) => Some(id),
                None => {
                    return fail(
                        resp,
                        MasterErrorCode::NamespaceNotFound,
                        Error::NotFound(format!("namespace {} not found", name)),
                    )
                }
            },
            None => None,
        };
        let mut tables: Vec<TableEntry> = state
            .tables
            .values()
            .filter(|t| !t.deleted)
            .filter(|t| ns_filter.as_ref().map_or(true, |ns| &t.namespace_id == ns))
            .filter(|t| {
                req.name_filter
                    .as_ref()
                    .map_or(true, |f| t.name.contains(f.as_str()))
            })
            .map(|t| TableEntry {
                id: t.id.clone(),
                name: t.name.clone(),
                namespace: state.namespace_name(&t.namespace_id),
            })
            .collect();
        tables.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        resp.tables = tables;
        Ok(())
    }

    fn get_table_locations(
        &self,
        req: &GetTableLocationsRequest,
        resp: &mut GetTableLocationsResponse,
    ) -> Result<()> {
        let state = self.state();
        let Some(table) = state.find_table(&req.table) else {
            return table_not_found(resp, &req.table);
        };
        let limit = req.max_returned_locations.map_or(usize::MAX, |n| n as usize);
        resp.tablet_locations = table
            .tablet_ids
            .iter()
            .filter_map(|id| state.locations(id))
            .take(limit)
            .collect();
        Ok(())
    }

    fn get_table_schema(
        &self,
        req: &GetTableSchemaRequest,
        resp: &mut GetTableSchemaResponse,
    ) -> Result<()> {
        let state = self.state();
        let Some(table) = state.find_table(&req.table) else {
            return table_not_found(resp, &req.table);
        };
        resp.table_id = Some(table.id.clone());
        resp.schema = Some(table.schema.clone());
        resp.schema_version = table.schema_version;
        resp.create_table_done = state.table_running(table);
        Ok(())
    }

    fn create_namespace(
        &self,
        req: &CreateNamespaceRequest,
        resp: &mut CreateNamespaceResponse,
    ) -> Result<()> {
        if req.name.is_empty() {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::InvalidArgument("namespace name is empty".into()),
            );
        }
        let mut state = self.state();
        if let Some(id) = state.namespace_id(&req.name) {
            resp.id = Some(id);
            return fail(
                resp,
                MasterErrorCode::NamespaceAlreadyPresent,
                Error::AlreadyPresent(format!("namespace {} already exists", req.name)),
            );
        }
        let id = new_id();
        state.namespaces.insert(
            id.clone(),
            NamespaceInfo {
                id: id.clone(),
                name: req.name.clone(),
            },
        );
        tracing::info!("Created namespace {} ({})", req.name, id);
        resp.id = Some(id);
        Ok(())
    }

    fn delete_namespace(
        &self,
        req: &DeleteNamespaceRequest,
        resp: &mut DeleteNamespaceResponse,
    ) -> Result<()> {
        let mut state = self.state();
        let id = match (&req.namespace.id, &req.namespace.name) {
            (Some(id), _) => state.namespaces.contains_key(id).then(|| id.clone()),
            (None, Some(name)) => state.namespace_id(name),
            (None, None) => None,
        };
        let Some(id) = id else {
            return fail(
                resp,
                MasterErrorCode::NamespaceNotFound,
                Error::NotFound("namespace not found".into()),
            );
        };
        if state
            .tables
            .values()
            .any(|t| !t.deleted && t.namespace_id == id)
        {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::InvalidArgument(format!(
                    "namespace {} is not empty",
                    state.namespace_name(&id)
                )),
            );
        }
        state.namespaces.remove(&id);
        tracing::info!("Deleted namespace {}", id);
        Ok(())
    }

    fn list_namespaces(
        &self,
        _req: &ListNamespacesRequest,
        resp: &mut ListNamespacesResponse,
    ) -> Result<()> {
        let state = self.state();
        resp.namespaces = state
            .namespaces
            .values()
            .map(|ns| NamespaceIdentifier {
                id: Some(ns.id.clone()),
                name: Some(ns.name.clone()),
            })
            .collect();
        Ok(())
    }

    fn get_tablet_locations(&self, tablet_id: &str) -> Result<TabletLocations> {
        let state = self.state();
        let live = state
            .tablets
            .get(tablet_id)
            .and_then(|t| state.tables.get(&t.table_id))
            .is_some_and(|table| !table.deleted);
        if !live {
            return Err(Error::NotFound(format!("unknown tablet {}", tablet_id)));
        }
        state
            .locations(tablet_id)
            .ok_or_else(|| Error::NotFound(format!("unknown tablet {}", tablet_id)))
    }

    fn process_tablet_report(
        &self,
        ts: &TsInfo,
        report: &TabletReport,
    ) -> Result<TabletReportUpdates> {
        let mut state = self.state();
        state.reported_servers.insert(ts.permanent_uuid.clone());

        let mut updates = TabletReportUpdates::default();
        for reported in &report.updated_tablets {
            let table_deleted = state
                .tablets
                .get(&reported.tablet_id)
                .and_then(|t| state.tables.get(&t.table_id))
                .map(|table| table.deleted);
            let state_msg = match table_deleted {
                None => Some("tablet not found in catalog".to_string()),
                Some(true) => {
                    if let Some(tablet) = state.tablets.get_mut(&reported.tablet_id) {
                        tablet.replicas.remove(&ts.permanent_uuid);
                    }
                    Some("table deleted".to_string())
                }
                Some(false) => {
                    if let Some(tablet) = state.tablets.get_mut(&reported.tablet_id) {
                        tablet.replicas.insert(
                            ts.permanent_uuid.clone(),
                            TabletReplica {
                                ts_info: ts.clone(),
                                role: reported.role.unwrap_or_default(),
                                state: reported.state,
                            },
                        );
                    }
                    None
                }
            };
            updates.tablets.push(ReportedTabletUpdate {
                tablet_id: reported.tablet_id.clone(),
                state_msg,
            });
        }

        for tablet_id in &report.removed_tablet_ids {
            if let Some(tablet) = state.tablets.get_mut(tablet_id) {
                tablet.replicas.remove(&ts.permanent_uuid);
            }
        }

        if !report.is_incremental {
            let reported: BTreeSet<&str> = report
                .updated_tablets
                .iter()
                .map(|t| t.tablet_id.as_str())
                .collect();
            for (tablet_id, tablet) in state.tablets.iter_mut() {
                if !reported.contains(tablet_id.as_str()) {
                    tablet.replicas.remove(&ts.permanent_uuid);
                }
            }
        }

        tracing::debug!(
            "Processed {} tablet report #{} from {} ({} tablets)",
            if report.is_incremental { "incremental" } else { "full" },
            report.sequence_number,
            ts.permanent_uuid,
            report.updated_tablets.len()
        );
        Ok(updates)
    }

    fn dump_state(&self, on_disk: bool) -> Result<String> {
        let mut out = String::new();
        {
            let state = self.state();
            let _ = writeln!(out, "# dumped at {}", chrono::Utc::now().to_rfc3339());
            let _ = writeln!(
                out,
                "cluster {} (config version {})",
                state.cluster_config.cluster_uuid, state.cluster_config.version
            );
            for ns in state.namespaces.values() {
                let _ = writeln!(out, "namespace {} [{}]", ns.name, ns.id);
            }
            for table in state.tables.values() {
                let _ = writeln!(
                    out,
                    "table {}.{} [{}] schema_version={} deleted={}",
                    state.namespace_name(&table.namespace_id),
                    table.name,
                    table.id,
                    table.schema_version,
                    table.deleted
                );
                for tablet_id in &table.tablet_ids {
                    let replicas: Vec<&str> = state
                        .tablets
                        .get(tablet_id)
                        .map(|t| t.replicas.keys().map(String::as_str).collect())
                        .unwrap_or_default();
                    let _ = writeln!(out, "  tablet {} replicas={:?}", tablet_id, replicas);
                }
            }
        }

        if on_disk {
            let dir = self.dump_dir.as_ref().ok_or_else(|| {
                Error::InvalidArgument("no dump directory configured for on-disk dumps".into())
            })?;
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("master-state-{}.txt", timestamp_now_millis()));
            std::fs::write(&path, &out)?;
            tracing::info!("Wrote catalog dump to {}", path.display());
        }
        Ok(out)
    }

    fn get_cluster_config(&self) -> Result<ClusterConfig> {
        Ok(self.state().cluster_config.clone())
    }

    fn set_cluster_config(
        &self,
        req: &ChangeMasterClusterConfigRequest,
        resp: &mut ChangeMasterClusterConfigResponse,
    ) -> Result<()> {
        let mut state = self.state();
        let current = state.cluster_config.version;
        if req.cluster_config.version != current {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::IllegalState(format!(
                    "config version mismatch: expected {}, got {}",
                    current, req.cluster_config.version
                )),
            );
        }
        if !req.cluster_config.cluster_uuid.is_empty()
            && req.cluster_config.cluster_uuid != state.cluster_config.cluster_uuid
        {
            return fail(
                resp,
                MasterErrorCode::InvalidRequest,
                Error::InvalidArgument("cluster uuid cannot be changed".into()),
            );
        }

        let blacklist_changed =
            req.cluster_config.blacklisted_hosts != state.cluster_config.blacklisted_hosts;
        let cluster_uuid = state.cluster_config.cluster_uuid.clone();
        state.cluster_config = ClusterConfig {
            cluster_uuid,
            version: current + 1,
            ..req.cluster_config.clone()
        };
        if blacklist_changed {
            state.blacklist_initial_load = state.blacklisted_load();
        }
        tracing::info!("Cluster config updated to version {}", current + 1);
        Ok(())
    }

    fn set_load_balancer_enabled(&self, enabled: bool) {
        self.load_balancer_enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_load_balancer_enabled(&self) -> bool {
        self.load_balancer_enabled.load(Ordering::SeqCst)
    }

    fn load_move_completion_percent(&self) -> Result<f64> {
        let state = self.state();
        let initial = state.blacklist_initial_load;
        if initial == 0 {
            return Ok(100.0);
        }
        let remaining = state.blacklisted_load().min(initial);
        Ok(100.0 * (initial - remaining) as f64 / initial as f64)
    }

    fn is_load_balanced(&self, expected_num_servers: Option<u32>) -> Result<bool> {
        let state = self.state();
        if let Some(expected) = expected_num_servers {
            if state.reported_servers.len() != expected as usize {
                return Err(Error::IllegalState(format!(
                    "expected {} tablet servers, catalog knows {}",
                    expected,
                    state.reported_servers.len()
                )));
            }
        }
        let mut load: BTreeMap<&str, usize> = state
            .reported_servers
            .iter()
            .map(|uuid| (uuid.as_str(), 0))
            .collect();
        for tablet in state.tablets.values() {
            for uuid in tablet.replicas.keys() {
                *load.entry(uuid.as_str()).or_default() += 1;
            }
        }
        let min = load.values().min().copied().unwrap_or(0);
        let max = load.values().max().copied().unwrap_or(0);
        Ok(max - min <= 1)
    }
}

//! Catalog boundary
//!
//! Table and namespace DDL, tablet placement and cluster configuration are
//! owned by an external catalog store. The master only gates calls into it
//! and normalizes its errors. Store calls are synchronous and are expected
//! to run on a blocking worker.

use crate::common::{Error, Result};
use crate::master::messages::*;
use crate::master::ts_registry::TsDescriptor;
use std::sync::Arc;

/// The external catalog store.
///
/// DDL methods fill `resp` and may set a specific error code on it; an
/// `Err` without a response error is reported as UNKNOWN_ERROR.
pub trait CatalogStore: Send + Sync {
    fn create_table(&self, req: &CreateTableRequest, resp: &mut CreateTableResponse)
        -> Result<()>;
    fn is_create_table_done(
        &self,
        req: &IsCreateTableDoneRequest,
        resp: &mut IsCreateTableDoneResponse,
    ) -> Result<()>;
    fn delete_table(&self, req: &DeleteTableRequest, resp: &mut DeleteTableResponse)
        -> Result<()>;
    fn is_delete_table_done(
        &self,
        req: &IsDeleteTableDoneRequest,
        resp: &mut IsDeleteTableDoneResponse,
    ) -> Result<()>;
    fn alter_table(&self, req: &AlterTableRequest, resp: &mut AlterTableResponse) -> Result<()>;
    fn is_alter_table_done(
        &self,
        req: &IsAlterTableDoneRequest,
        resp: &mut IsAlterTableDoneResponse,
    ) -> Result<()>;
    fn list_tables(&self, req: &ListTablesRequest, resp: &mut ListTablesResponse) -> Result<()>;
    fn get_table_locations(
        &self,
        req: &GetTableLocationsRequest,
        resp: &mut GetTableLocationsResponse,
    ) -> Result<()>;
    fn get_table_schema(
        &self,
        req: &GetTableSchemaRequest,
        resp: &mut GetTableSchemaResponse,
    ) -> Result<()>;
    fn create_namespace(
        &self,
        req: &CreateNamespaceRequest,
        resp: &mut CreateNamespaceResponse,
    ) -> Result<()>;
    fn delete_namespace(
        &self,
        req: &DeleteNamespaceRequest,
        resp: &mut DeleteNamespaceResponse,
    ) -> Result<()>;
    fn list_namespaces(
        &self,
        req: &ListNamespacesRequest,
        resp: &mut ListNamespacesResponse,
    ) -> Result<()>;

    /// Locations of one tablet; `Error::NotFound` when the tablet is unknown.
    fn get_tablet_locations(&self, tablet_id: &str) -> Result<TabletLocations>;

    /// Reconcile a tablet server's report against the catalog.
    fn process_tablet_report(
        &self,
        ts: &TsInfo,
        report: &TabletReport,
    ) -> Result<TabletReportUpdates>;

    /// Render the catalog state; with `on_disk` also persist it.
    fn dump_state(&self, on_disk: bool) -> Result<String>;

    fn get_cluster_config(&self) -> Result<ClusterConfig>;
    fn set_cluster_config(
        &self,
        req: &ChangeMasterClusterConfigRequest,
        resp: &mut ChangeMasterClusterConfigResponse,
    ) -> Result<()>;

    fn set_load_balancer_enabled(&self, enabled: bool);
    fn is_load_balancer_enabled(&self) -> bool;
    fn load_move_completion_percent(&self) -> Result<f64>;
    fn is_load_balanced(&self, expected_num_servers: Option<u32>) -> Result<bool>;
}

/// Result of a heartbeat sub-step
#[derive(Debug)]
pub enum StepOutcome<T> {
    /// Step succeeded
    Done(T),
    /// Best-effort step failed; log and continue the exchange
    Degraded(Error),
    /// Must-succeed step failed; abort the whole exchange
    Abort(Error),
}

/// Entry point for everything the master asks of the catalog store
#[derive(Clone)]
pub struct CatalogFacade {
    store: Arc<dyn CatalogStore>,
}

impl CatalogFacade {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Look up every tablet; failures become per-tablet errors, never a call failure.
    pub fn lookup_tablets(
        &self,
        tablet_ids: &[String],
    ) -> (Vec<TabletLocations>, Vec<TabletLocationError>) {
        let mut locations = Vec::with_capacity(tablet_ids.len());
        let mut errors = Vec::new();
        for tablet_id in tablet_ids {
            match self.store.get_tablet_locations(tablet_id) {
                Ok(locs) => locations.push(locs),
                Err(e) => errors.push(TabletLocationError {
                    tablet_id: tablet_id.clone(),
                    status: AppStatus::from(&e),
                }),
            }
        }
        (locations, errors)
    }

    /// Apply a tablet report. Incremental reports from a server that never
    /// sent a full report are not trusted and are skipped.
    pub fn apply_tablet_report(
        &self,
        ts_desc: &TsDescriptor,
        report: &TabletReport,
    ) -> StepOutcome<TabletReportUpdates> {
        if report.is_incremental && !ts_desc.has_tablet_report() {
            tracing::info!(
                "Ignoring incremental tablet report from {} until a full report arrives",
                ts_desc.permanent_uuid()
            );
            return StepOutcome::Done(TabletReportUpdates::default());
        }

        match self.store.process_tablet_report(&ts_desc.ts_info(), report) {
            Ok(updates) => {
                if !report.is_incremental {
                    ts_desc.set_has_tablet_report(true);
                }
                StepOutcome::Done(updates)
            }
            Err(e) => StepOutcome::Abort(e.prepend("Failed to process tablet report")),
        }
    }

    pub fn dump_state(&self, on_disk: bool) -> Result<String> {
        self.store.dump_state(on_disk)
    }

    pub fn get_cluster_config(&self) -> Result<ClusterConfig> {
        self.store.get_cluster_config()
    }

    pub fn set_load_balancer_enabled(&self, enabled: bool) {
        self.store.set_load_balancer_enabled(enabled)
    }

    pub fn is_load_balancer_enabled(&self) -> bool {
        self.store.is_load_balancer_enabled()
    }

    pub fn load_move_completion_percent(&self) -> Result<f64> {
        self.store.load_move_completion_percent()
    }

    pub fn is_load_balanced(&self, expected_num_servers: Option<u32>) -> Result<bool> {
        self.store.is_load_balanced(expected_num_servers)
    }
}

macro_rules! forward_ddl {
    ($($method:ident($req:ty, $resp:ty);)*) => {
        impl CatalogFacade {
            $(
                pub fn $method(&self, req: &$req, resp: &mut $resp) -> Result<()> {
                    self.store.$method(req, resp)
                }
            )*
        }
    };
}

forward_ddl! {
    create_table(CreateTableRequest, CreateTableResponse);
    is_create_table_done(IsCreateTableDoneRequest, IsCreateTableDoneResponse);
    delete_table(DeleteTableRequest, DeleteTableResponse);
    is_delete_table_done(IsDeleteTableDoneRequest, IsDeleteTableDoneResponse);
    alter_table(AlterTableRequest, AlterTableResponse);
    is_alter_table_done(IsAlterTableDoneRequest, IsAlterTableDoneResponse);
    list_tables(ListTablesRequest, ListTablesResponse);
    get_table_locations(GetTableLocationsRequest, GetTableLocationsResponse);
    get_table_schema(GetTableSchemaRequest, GetTableSchemaResponse);
    create_namespace(CreateNamespaceRequest, CreateNamespaceResponse);
    delete_namespace(DeleteNamespaceRequest, DeleteNamespaceResponse);
    list_namespaces(ListNamespacesRequest, ListNamespacesResponse);
    set_cluster_config(ChangeMasterClusterConfigRequest, ChangeMasterClusterConfigResponse);
}

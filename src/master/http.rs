//! HTTP transport for the master
//!
//! Every RPC is `POST /rpc/<name>` with a JSON body. A reachable master
//! answers 200 with the response, application errors included; only
//! transport-level failures get a non-2xx status and `{"error": ...}`.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Result;
use crate::master::messages::*;
use crate::master::raft_node::ConsensusGroup;
use crate::master::service::MasterService;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const MAX_REQUEST_BODY: usize = 8 * 1024 * 1024;

/// Map a service result onto the wire.
pub fn respond<R: Serialize>(result: Result<R>) -> Response {
    match result {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

macro_rules! rpc_routes {
    ($($rpc:literal => $method:ident($req:ty),)*) => {
        fn rpc_routes() -> Router<Arc<MasterService>> {
            Router::new()
            $(
                .route(
                    concat!("/rpc/", $rpc),
                    post(|State(service): State<Arc<MasterService>>, Json(req): Json<$req>| async move {
                        respond(service.$method(req).await)
                    }),
                )
            )*
        }
    };
}

rpc_routes! {
    "heartbeat" => heartbeat(TsHeartbeatRequest),
    "get_tablet_locations" => get_tablet_locations(GetTabletLocationsRequest),
    "get_table_locations" => get_table_locations(GetTableLocationsRequest),
    "create_table" => create_table(CreateTableRequest),
    "is_create_table_done" => is_create_table_done(IsCreateTableDoneRequest),
    "delete_table" => delete_table(DeleteTableRequest),
    "is_delete_table_done" => is_delete_table_done(IsDeleteTableDoneRequest),
    "alter_table" => alter_table(AlterTableRequest),
    "is_alter_table_done" => is_alter_table_done(IsAlterTableDoneRequest),
    "list_tables" => list_tables(ListTablesRequest),
    "get_table_schema" => get_table_schema(GetTableSchemaRequest),
    "create_namespace" => create_namespace(CreateNamespaceRequest),
    "delete_namespace" => delete_namespace(DeleteNamespaceRequest),
    "list_namespaces" => list_namespaces(ListNamespacesRequest),
    "list_tablet_servers" => list_tablet_servers(ListTabletServersRequest),
    "list_masters" => list_masters(ListMastersRequest),
    "list_master_raft_peers" => list_master_raft_peers(ListMasterRaftPeersRequest),
    "get_master_registration" => get_master_registration(GetMasterRegistrationRequest),
    "dump_master_state" => dump_master_state(DumpMasterStateRequest),
    "removed_master_update" => removed_master_update(RemovedMasterUpdateRequest),
    "get_master_cluster_config" => get_master_cluster_config(GetMasterClusterConfigRequest),
    "change_master_cluster_config" => change_master_cluster_config(ChangeMasterClusterConfigRequest),
    "change_load_balancer_state" => change_load_balancer_state(ChangeLoadBalancerStateRequest),
    "get_load_move_completion" => get_load_move_completion(GetLoadMovePercentRequest),
    "is_load_balanced" => is_load_balanced(IsLoadBalancedRequest),
    "is_master_leader_service_ready" => is_master_leader_service_ready(IsMasterLeaderReadyRequest),
}

/// Creates the HTTP router with the RPC, health and admin endpoints.
pub fn create_router(service: Arc<MasterService>) -> Router {
    rpc_routes()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/admin/status", get(admin_status))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Liveness probe: answering at all is enough
async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Readiness probe: 200 only on an initialized, ready leader
async fn health_ready(State(service): State<Arc<MasterService>>) -> impl IntoResponse {
    let snapshot = service.leadership().snapshot().await;
    match snapshot.leader_status() {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "is_leader": true })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "is_leader": false,
                "reason": e.to_string(),
            })),
        ),
    }
}

/// Minimal status for dashboards
async fn admin_status(State(service): State<Arc<MasterService>>) -> impl IntoResponse {
    let snapshot = service.leadership().snapshot().await;
    let consensus = service.consensus();
    Json(json!({
        "instance": service.instance().to_string(),
        "role": consensus.role().to_string(),
        "term": consensus.term(),
        "initialized": snapshot.catalog_status().is_ok(),
        "is_leader": snapshot.is_leader(),
        "leadership_version": snapshot.version(),
        "num_peers": consensus.peers().map(|p| p.len()).unwrap_or(0),
        "num_tablet_servers": service.registry().len(),
    }))
}

//! Load balancer control
//!
//! Placement itself belongs to the catalog store. The master only toggles
//! the rebalancing loop and reports the store's progress bookkeeping.

use crate::common::Result;
use crate::master::catalog::CatalogFacade;
use crate::master::gate::{Gate, GateMode};
use crate::master::messages::*;

#[derive(Clone)]
pub struct LoadBalancerControl {
    gate: Gate,
    catalog: CatalogFacade,
}

impl LoadBalancerControl {
    pub fn new(gate: Gate, catalog: CatalogFacade) -> Self {
        Self { gate, catalog }
    }

    /// Enable or disable rebalancing. Idempotent; a request without a flag is a no-op.
    pub async fn change_state(
        &self,
        req: ChangeLoadBalancerStateRequest,
    ) -> Result<ChangeLoadBalancerStateResponse> {
        let catalog = self.catalog.clone();
        self.gate
            .run(GateMode::InitializedAndLeader, move |_, _| {
                if let Some(enabled) = req.is_enabled {
                    if catalog.is_load_balancer_enabled() != enabled {
                        tracing::info!(
                            "Load balancer {}",
                            if enabled { "enabled" } else { "disabled" }
                        );
                    }
                    catalog.set_load_balancer_enabled(enabled);
                }
                Ok(())
            })
            .await
    }

    /// Percentage of blacklisted load already moved away.
    pub async fn load_move_percent(&self) -> Result<GetLoadMovePercentResponse> {
        let catalog = self.catalog.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut GetLoadMovePercentResponse| {
                    resp.percent = catalog.load_move_completion_percent()?;
                    Ok(())
                },
            )
            .await
    }

    pub async fn is_load_balanced(
        &self,
        req: IsLoadBalancedRequest,
    ) -> Result<IsLoadBalancedResponse> {
        let catalog = self.catalog.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut IsLoadBalancedResponse| {
                    resp.is_balanced = catalog.is_load_balanced(req.expected_num_servers)?;
                    Ok(())
                },
            )
            .await
    }
}

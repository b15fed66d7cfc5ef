//! Outbound RPC client for the master HTTP surface
//!
//! Used for master-to-master calls and by tablet servers and the admin CLI.
//! A non-2xx answer is a transport failure; an application error travels in
//! the decoded response's envelope and is left to the caller.

use crate::common::utils::master_url;
use crate::common::{Error, Result};
use crate::master::messages::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TransportError {
    error: String,
}

#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
}

impl MasterClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// `POST /rpc/<rpc>` on the master at `addr`.
    pub async fn call<Req, Resp>(&self, addr: &str, rpc: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/rpc/{}", master_url(addr), rpc);
        let resp = self.http.post(&url).json(req).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{} to {}", rpc, addr))
            } else {
                Error::Network(format!("{} to {} failed: {}", rpc, addr, e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<TransportError>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::Network(format!(
                "{} to {} returned {}: {}",
                rpc, addr, status, detail
            )));
        }
        Ok(resp.json().await?)
    }

    pub async fn heartbeat(&self, addr: &str, req: &TsHeartbeatRequest) -> Result<TsHeartbeatResponse> {
        self.call(addr, "heartbeat", req).await
    }

    pub async fn get_master_registration(&self, addr: &str) -> Result<GetMasterRegistrationResponse> {
        self.call(addr, "get_master_registration", &GetMasterRegistrationRequest {})
            .await
    }

    pub async fn dump_master_state(
        &self,
        addr: &str,
        req: &DumpMasterStateRequest,
    ) -> Result<DumpMasterStateResponse> {
        self.call(addr, "dump_master_state", req).await
    }
}

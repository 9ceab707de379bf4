//! HTTP client side of the two upstream payment processors.
//!
//! Each upstream host is resolved to a socket address once at startup and
//! the resolved pair is reused for every request; the configured host
//! string still travels in the `Host` header. Requests run on plain worker
//! threads with a blocking client and no deadline; a transport error is
//! treated exactly like a non-2xx reply.

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{Config, parse_host_port};
use crate::time::format_rfc3339_millis;
use crate::types::{DateTimeMillis, Gateway, PendingPayment};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {0}")]
    Status(u16),
}

/// Health reading from `GET /payments/service-health`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub failing: bool,
    pub min_response_time: i64,
}

struct Endpoint {
    /// Resolved once at startup.
    addr: SocketAddr,
    /// The configured name, kept for the `Host` header.
    host: String,
}

pub struct Upstreams {
    endpoints: [Endpoint; Gateway::SIZE],
}

impl Upstreams {
    pub fn resolve(config: &Config) -> Result<Self> {
        Ok(Self {
            endpoints: [
                resolve_endpoint(&config.processor_default_address)?,
                resolve_endpoint(&config.processor_fallback_address)?,
            ],
        })
    }

    fn endpoint(&self, gateway: Gateway) -> &Endpoint {
        &self.endpoints[gateway as usize]
    }

    /// Submit one payment; `Ok` only on a 2xx reply.
    pub fn submit_payment(
        &self,
        client: &reqwest::blocking::Client,
        gateway: Gateway,
        payment: &PendingPayment,
        requested_at: DateTimeMillis,
    ) -> Result<(), UpstreamError> {
        let endpoint = self.endpoint(gateway);
        let correlation_id = String::from_utf8_lossy(&payment.correlation_id);
        let body = format!(
            r#"{{"correlationId":"{}","amount":{:.2},"requestedAt":"{}"}}"#,
            correlation_id,
            payment.amount,
            format_rfc3339_millis(requested_at),
        );

        let response = client
            .post(format!("http://{}/payments", endpoint.addr))
            .header(reqwest::header::HOST, endpoint.host.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status(status.as_u16()))
        }
    }

    /// Probe one gateway's health endpoint. `None` on transport errors,
    /// non-200 replies or bodies that fail to parse; the chooser keeps its
    /// last known reading in that case.
    pub fn check_health(
        &self,
        client: &reqwest::blocking::Client,
        gateway: Gateway,
    ) -> Option<GatewayHealth> {
        let endpoint = self.endpoint(gateway);

        let response = client
            .get(format!("http://{}/payments/service-health", endpoint.addr))
            .header(reqwest::header::HOST, endpoint.host.as_str())
            .send()
            .map_err(|error| {
                tracing::error!(gateway = gateway.name(), %error, "Error getting gateway health");
            })
            .ok()?;

        if response.status() != reqwest::StatusCode::OK {
            return None;
        }

        let body = response.bytes().ok()?;
        serde_json::from_slice(&body).ok()
    }
}

fn resolve_endpoint(address: &str) -> Result<Endpoint> {
    let (host, port) = parse_host_port(address, 8080)?;
    let addr = (host.as_str(), port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve upstream {address}"))?
        .next()
        .with_context(|| format!("no address for upstream {address}"))?;

    Ok(Endpoint {
        addr,
        host: address.to_string(),
    })
}

/// One blocking client per worker thread; connections pool per upstream.
pub fn blocking_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .build()
        .context("building upstream http client")
}

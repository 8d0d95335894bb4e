//! Per-request scratch state shared by pipeline stages

use axum::{
    extract::{ConnectInfo, Request, connect_info::MockConnectInfo},
    http::{Method, StatusCode, header},
};
use std::net::SocketAddr;
use std::time::Instant;

use super::request_id::RequestId;
use crate::routes::{Route, RouteTable};

/// Client address when the connection carries none (e.g. in-process tests)
pub const UNKNOWN_CLIENT: &str = "unknown";

/// State for one request, owned by the task serving it
///
/// Created by the pipeline before the first stage runs and handed down by
/// `&mut`, so a stage can record what later stages or the logger need.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub client_ip: String,
    pub user_agent: String,
    pub started_at: Instant,
    pub request_id: Option<RequestId>,
    pub route: Route,
    /// Bounded route label used for metrics and logs
    pub route_label: String,
    /// Final status, once a stage or the handler has produced a response
    pub status: Option<StatusCode>,
}

impl RequestContext {
    pub fn from_request(request: &Request, routes: &RouteTable) -> Self {
        let path = request.uri().path().to_string();
        let route = routes.classify(&path);

        Self {
            method: request.method().clone(),
            client_ip: client_ip(request),
            user_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            started_at: Instant::now(),
            request_id: None,
            route,
            route_label: routes.label(route).to_string(),
            path,
            status: None,
        }
    }

    pub fn request_id_str(&self) -> &str {
        self.request_id.as_ref().map(|id| id.as_str()).unwrap_or("-")
    }
}

fn client_ip(request: &Request) -> String {
    let extensions = request.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

//! Access log sinks.
//!
//! Every request that went through a connection produces one line on each
//! sink once its slot is settled: a human-readable event and a
//! tab-separated key-value (`tskv`) event, both emitted through `tracing`
//! under dedicated targets so subscribers can split them off from the
//! regular application logs.

use crate::request::Request;
use crate::response::Response;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub(crate) fn write_access_logs(peer: SocketAddr, request: &Request, response: &Response) {
    let duration_us = request
        .finish_send_time
        .map(|finish| finish.duration_since(request.received_at).as_micros() as u64)
        .unwrap_or_default();
    let status = response.status().code();
    let outcome = if response.is_sent() {
        "sent"
    } else if response.send_failed() {
        "send-failed"
    } else {
        "dropped"
    };

    info!(
        target: "esteira::access",
        remote = %peer,
        method = %request.method,
        path = %request.path(),
        version = %request.version,
        status,
        body_bytes = response.body().len(),
        duration_us,
        outcome,
    );

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|epoch| epoch.as_secs())
        .unwrap_or_default();
    info!(
        target: "esteira::access_tskv",
        "tskv\ttimestamp={timestamp}\tremote={peer}\tmethod={method}\trequest={target}\t\
         protocol={version}\tstatus={status}\tduration_us={duration_us}\toutcome={outcome}",
        method = request.method,
        target = request.target,
        version = request.version,
    );
}

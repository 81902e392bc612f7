use crate::status_bridge::model::StatusModel;
use anyhow::Context;
use log::{error, info};
use scattercore::pipeline::PipelineController;
use scattercore::telemetry::{ReportSink, ReportSummary, StdoutSink};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
    thread,
};
use tokio::runtime::Builder;
use warp::Filter;

pub fn status_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

/// Shared view of the running receiver, optionally served over HTTP.
#[derive(Clone, Default)]
pub struct StatusBridge {
    state: Arc<RwLock<StatusModel>>,
}

impl StatusBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// `GET /status` and `GET /reports`.
    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let state_for_filter = self.state.clone();
        let state_filter = warp::any().map(move || state_for_filter.clone());

        let status_route = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and(state_filter.clone())
            .map(|state: Arc<RwLock<StatusModel>>| {
                let model = read_model(&state);
                warp::reply::json(&json!({
                    "state": model.state,
                    "decimation_ratio": model.decimation_ratio,
                    "graph": model.graph,
                    "telemetry": model.telemetry,
                }))
            });

        let reports_route = warp::path("reports")
            .and(warp::path::end())
            .and(warp::get())
            .and(state_filter)
            .map(|state: Arc<RwLock<StatusModel>>| {
                warp::reply::json(&read_model(&state).recent_reports)
            });

        status_route.or(reports_route)
    }

    /// Hosts the routes on their own thread until the process exits.
    pub fn serve(&self, address: SocketAddr) -> anyhow::Result<()> {
        let routes = self.routes();
        thread::Builder::new()
            .name("status-bridge".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("status bridge runtime failed: {}", err);
                        return;
                    }
                };
                runtime.block_on(async move {
                    match warp::serve(routes).try_bind_ephemeral(address) {
                        Ok((bound, server)) => {
                            info!("status bridge listening on http://{}", bound);
                            server.await;
                        }
                        Err(err) => error!("status bridge could not bind {}: {}", address, err),
                    }
                });
            })
            .context("spawning status bridge thread")?;
        Ok(())
    }

    pub fn record_report(&self, summary: &ReportSummary) {
        if let Ok(mut guard) = self.state.write() {
            guard.push_report(summary);
        }
    }

    /// Refreshes state and counters from the controller.
    pub fn update(&self, controller: &PipelineController) {
        if let Ok(mut guard) = self.state.write() {
            guard.state = controller.state();
            guard.decimation_ratio = controller.decimation_ratio();
            if let Some(metrics) = controller.graph_metrics() {
                guard.graph = metrics.snapshot();
            }
            if let Some(telemetry) = controller.telemetry_metrics() {
                guard.telemetry = telemetry;
            }
        }
    }

    /// Sink that prints each summary and keeps it for `/reports`.
    pub fn sink(&self) -> impl ReportSink {
        let bridge = self.clone();
        let mut stdout = StdoutSink;
        move |summary: &ReportSummary| {
            stdout.publish(summary);
            bridge.record_report(summary);
        }
    }

    pub fn publish_status(&self, message: &str) {
        println!("[status] {}", message);
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> StatusModel {
        read_model(&self.state)
    }
}

fn read_model(state: &RwLock<StatusModel>) -> StatusModel {
    state
        .read()
        .map(|guard| guard.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scattercore::pipeline::PipelineState;

    fn report(bytes: &[u8]) -> ReportSummary {
        ReportSummary::from_bytes(bytes)
    }

    #[tokio::test]
    async fn reports_route_lists_recent_summaries() {
        let bridge = StatusBridge::new();
        bridge.record_report(&report(&[0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x02, 0x00]));
        bridge.record_report(&report(&[0x01, 0x02, 0x03]));

        let response = warp::test::request()
            .method("GET")
            .path("/reports")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let reports = body.as_array().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0]["line"], "DE AD BE EF  | 5");
        assert_eq!(reports[1]["malformed"], true);
    }

    #[tokio::test]
    async fn status_route_reports_state() {
        let bridge = StatusBridge::new();
        let response = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["state"], "Constructed");
        assert!(body["decimation_ratio"].is_null());
        assert_eq!(bridge.snapshot().state, PipelineState::Constructed);
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let bridge = StatusBridge::new();
        let response = warp::test::request()
            .method("GET")
            .path("/payload")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), 404);
    }
}

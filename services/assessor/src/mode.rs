use std::sync::Arc;

use tracing::info;

use crate::backend::JobBackend;
use crate::backend_live::LiveBackend;
use crate::backend_local::LocalBackend;
use crate::config::{AppConfig, BackendMode};
use crate::error::Result;
use crate::gateway::TransportGateway;
use crate::session::SessionState;

/// Builds the one backend this process will use. Mode never changes afterwards.
pub fn select_backend(cfg: &AppConfig, session: SessionState) -> Result<Arc<dyn JobBackend>> {
    match &cfg.backend {
        BackendMode::Local => {
            info!(seed = cfg.fixture_seed, latency = ?cfg.fixture_latency, "mode: local fixtures");
            Ok(Arc::new(LocalBackend::new(cfg.fixture_latency, cfg.fixture_seed)?))
        }
        BackendMode::Live { base_url } => {
            info!(base_url = %base_url, "mode: live backend");
            let gateway = TransportGateway::new(base_url.clone(), cfg.request_timeout, session)?;
            Ok(Arc::new(LiveBackend::new(gateway)))
        }
    }
}

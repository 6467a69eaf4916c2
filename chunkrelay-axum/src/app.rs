use axum::routing::get;
use axum::Router;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::routes::upload_router;
use crate::RelayState;

#[derive(Clone)]
pub struct RelayApp {
    pub state: RelayState,
    pub router: Router<()>,
}

impl RelayApp {
    /// Liveness at `/health`, the upload API under `/upload`, with request
    /// tracing and `x-request-id` generation/propagation on every route.
    pub fn new(state: RelayState) -> Self {
        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .nest("/upload", upload_router())
            .with_state(state.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        Self { state, router }
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "chunkrelay listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

pub fn relay(state: RelayState) -> RelayApp {
    RelayApp::new(state)
}

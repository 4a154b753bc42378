//! Route table.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{commitboost, eth1, eth2, health, keymanager, rpc};
use crate::server::AppState;

/// Build the router for the configured surfaces.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/upcheck", get(health::upcheck))
        .route("/healthcheck", get(health::healthcheck))
        .route("/reload", post(eth2::reload))
        .route("/api/v1/eth2/sign/:identifier", post(eth2::sign))
        .route("/api/v1/eth2/publicKeys", get(eth2::public_keys))
        .route("/api/v1/eth1/sign/:identifier", post(eth1::sign))
        .route("/api/v1/eth1/publicKeys", get(eth1::public_keys));

    if state.key_manager_enabled {
        app = app
            .route(
                "/eth/v1/keystores",
                get(keymanager::list_keystores)
                    .post(keymanager::import_keystores)
                    .delete(keymanager::delete_keystores),
            )
            .route(
                "/eth/v1/remotekeys",
                get(keymanager::list_remote_keys)
                    .post(keymanager::import_remote_keys)
                    .delete(keymanager::delete_remote_keys),
            );
    }

    if state.commit_boost_enabled {
        app = app
            .route("/signer/v1/request_signature", post(commitboost::request_signature))
            .route("/signer/v1/generate_proxy_key", post(commitboost::generate_proxy_key));
    }

    if state.json_rpc_enabled {
        app = app.route("/", post(rpc::json_rpc));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

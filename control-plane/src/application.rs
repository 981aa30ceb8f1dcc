// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::configuration::ControlPlaneOptions;
use crate::constants::MAX_REQUEST_BODY_SIZE;
use crate::orchestrators::ControlPlane;
use crate::routes;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::serve::Serve;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub options: ControlPlaneOptions,
    pub control: ControlPlane,
}

pub struct Application {
    port: u16,
    server: Serve<TcpListener, Router, Router>,
}

impl Application {
    pub async fn build(
        options: ControlPlaneOptions,
        control: ControlPlane,
    ) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", options.host, options.port);
        let listener = TcpListener::bind(address).await?;
        let host = options.host.clone();
        let server = run(listener, options, control)?;
        let port = server.local_addr()?.port();

        tracing::info!("[control-plane] listening at http://{}:{}", host, port);

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

#[tracing::instrument(skip(listener, control))]
pub fn run(
    listener: TcpListener,
    options: ControlPlaneOptions,
    control: ControlPlane,
) -> Result<Serve<TcpListener, Router, Router>, std::io::Error> {
    let app = create_router(AppState { options, control });
    Ok(axum::serve(listener, app))
}

pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/accounts/{account}/security-groups",
            post(routes::create_security_group),
        )
        .route(
            "/accounts/{account}/security-groups/{id}",
            get(routes::describe_security_group).delete(routes::delete_security_group),
        )
        .route("/accounts/{account}/instances", post(routes::create_instance))
        .route(
            "/accounts/{account}/instances/{id}",
            patch(routes::update_instance).delete(routes::terminate_instance),
        )
        .route(
            "/accounts/{account}/managed-instances",
            get(routes::managed_instances),
        )
        .route("/accounts/{account}/volumes", post(routes::create_volume))
        .route(
            "/accounts/{account}/volumes/{id}",
            patch(routes::update_volume).delete(routes::delete_volume),
        )
        .route("/accounts/{account}/snapshots", post(routes::create_snapshot))
        .route(
            "/accounts/{account}/snapshots/{id}",
            delete(routes::delete_snapshot),
        )
        .route("/accounts/{account}/parameters", post(routes::create_parameter))
        .route(
            "/accounts/{account}/parameters/{name}",
            patch(routes::update_parameter).delete(routes::delete_parameter),
        )
        .route(
            "/accounts/{account}/associations",
            post(routes::create_association),
        )
        .route(
            "/accounts/{account}/associations/{id}",
            delete(routes::delete_association),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .with_state(state)
}

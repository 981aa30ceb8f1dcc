// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the control-plane API.
//!
//! Every resource route is scoped by the 12-digit account id in its path:
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/health` | [`health`] |
//! | POST | `/accounts/{account}/security-groups` | [`create_security_group`] |
//! | GET | `/accounts/{account}/security-groups/{id}` | [`describe_security_group`] |
//! | DELETE | `/accounts/{account}/security-groups/{id}` | [`delete_security_group`] |
//! | POST | `/accounts/{account}/instances` | [`create_instance`] |
//! | PATCH | `/accounts/{account}/instances/{id}` | [`update_instance`] |
//! | DELETE | `/accounts/{account}/instances/{id}` | [`terminate_instance`] |
//! | GET | `/accounts/{account}/managed-instances` | [`managed_instances`] |
//! | POST | `/accounts/{account}/volumes` | [`create_volume`] |
//! | PATCH | `/accounts/{account}/volumes/{id}` | [`update_volume`] |
//! | DELETE | `/accounts/{account}/volumes/{id}` | [`delete_volume`] |
//! | POST | `/accounts/{account}/snapshots` | [`create_snapshot`] |
//! | DELETE | `/accounts/{account}/snapshots/{id}` | [`delete_snapshot`] |
//! | POST | `/accounts/{account}/parameters` | [`create_parameter`] |
//! | PATCH | `/accounts/{account}/parameters/{name}` | [`update_parameter`] |
//! | DELETE | `/accounts/{account}/parameters/{name}` | [`delete_parameter`] |
//! | POST | `/accounts/{account}/associations` | [`create_association`] |
//! | DELETE | `/accounts/{account}/associations/{id}` | [`delete_association`] |
//!
//! Hierarchical parameter names travel as a single percent-encoded segment
//! (`%2Fapp%2Fdb%2Fhost`).
//!
//! Handlers only marshal. Validation, brokering and rollback happen in
//! [`ControlPlane`](crate::orchestrators::ControlPlane), under the configured
//! request timeout.

use std::sync::Arc;

use crate::application::AppState;
use crate::errors::AppError;
use crate::models::{
    AssociationResponse, CreateAssociationRequest, CreateInstanceRequest, CreateParameterRequest,
    CreateSecurityGroupRequest, CreateSnapshotRequest, CreateVolumeRequest, DeletedResponse,
    InstanceResponse, ManagedInstanceStatus, ParameterResponse, SecurityGroupResponse,
    SnapshotResponse, UpdateInstanceRequest, UpdateParameterRequest, UpdateVolumeRequest,
    VolumeResponse,
};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

type Created<T> = (StatusCode, Json<T>);

fn created<T>(value: T) -> Created<T> {
    (StatusCode::CREATED, Json(value))
}

/// Health check endpoint.
///
/// # Response
///
/// ```json
/// {"status": "ok"}
/// ```
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Creates a security group and authorizes its initial ingress rules. The
/// group is deleted again if any rule is rejected.
#[tracing::instrument(skip(state, request))]
pub async fn create_security_group(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateSecurityGroupRequest>,
) -> Result<Created<SecurityGroupResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_security_group(&account, request))
        .await?;
    Ok(created(response))
}

#[tracing::instrument(skip(state))]
pub async fn describe_security_group(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<SecurityGroupResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.describe_security_group(&account, &id))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
pub async fn delete_security_group(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.delete_security_group(&account, &id))
        .await?;
    Ok(Json(response))
}

/// Launches exactly one instance.
#[tracing::instrument(skip(state, request))]
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<Created<InstanceResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_instance(&account, request))
        .await?;
    Ok(created(response))
}

/// Replaces tags or changes the instance type. A body carrying both, or
/// neither, is rejected.
#[tracing::instrument(skip(state, request))]
pub async fn update_instance(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
    Json(request): Json<UpdateInstanceRequest>,
) -> Result<Json<InstanceResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.update_instance(&account, &id, request))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
pub async fn terminate_instance(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.terminate_instance(&account, &id))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
pub async fn managed_instances(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
) -> Result<Json<Vec<ManagedInstanceStatus>>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.managed_instances(&account))
        .await?;
    Ok(Json(response))
}

/// Creates a volume, attaching it when both `instance_id` and `device` are
/// given. The volume is deleted again if the attachment fails.
#[tracing::instrument(skip(state, request))]
pub async fn create_volume(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateVolumeRequest>,
) -> Result<Created<VolumeResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_volume(&account, request))
        .await?;
    Ok(created(response))
}

#[tracing::instrument(skip(state, request))]
pub async fn update_volume(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
    Json(request): Json<UpdateVolumeRequest>,
) -> Result<Json<VolumeResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.update_volume(&account, &id, request))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
pub async fn delete_volume(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.delete_volume(&account, &id))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state, request))]
pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<Created<SnapshotResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_snapshot(&account, request))
        .await?;
    Ok(created(response))
}

#[tracing::instrument(skip(state))]
pub async fn delete_snapshot(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.delete_snapshot(&account, &id))
        .await?;
    Ok(Json(response))
}

/// Writes a new parameter, then tags it. The parameter is deleted again if
/// tagging fails.
#[tracing::instrument(skip(state, request))]
pub async fn create_parameter(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateParameterRequest>,
) -> Result<Created<ParameterResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_parameter(&account, request))
        .await?;
    Ok(created(response))
}

#[tracing::instrument(skip(state, request))]
pub async fn update_parameter(
    State(state): State<Arc<AppState>>,
    Path((account, name)): Path<(String, String)>,
    Json(request): Json<UpdateParameterRequest>,
) -> Result<Json<ParameterResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.update_parameter(&account, &name, request))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state))]
pub async fn delete_parameter(
    State(state): State<Arc<AppState>>,
    Path((account, name)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.delete_parameter(&account, &name))
        .await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state, request))]
pub async fn create_association(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Json(request): Json<CreateAssociationRequest>,
) -> Result<Created<AssociationResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.create_association(&account, request))
        .await?;
    Ok(created(response))
}

#[tracing::instrument(skip(state))]
pub async fn delete_association(
    State(state): State<Arc<AppState>>,
    Path((account, id)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, AppError> {
    let control = &state.control;
    let response = control
        .within_deadline(control.delete_association(&account, &id))
        .await?;
    Ok(Json(response))
}

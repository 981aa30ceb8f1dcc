// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use validator::Validate;

use super::{ControlPlane, Orchestrator, missing_id, settle};
use crate::errors::AppError;
use crate::models::{CreateSnapshotRequest, DeletedResponse, SnapshotResponse, validate_resource_id};
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    pub async fn create_snapshot(
        &self,
        transaction: &mut Transaction,
        request: &CreateSnapshotRequest,
    ) -> Result<SnapshotResponse, AppError> {
        let snapshot_id = self
            .once(self.provider().create_snapshot(self.credential(), request))
            .await?
            .ok_or_else(|| missing_id("snapshot"))?;
        transaction.push(RollbackTask::DeleteSnapshot {
            snapshot_id: snapshot_id.clone(),
        });

        tracing::info!(
            "[control-plane] created snapshot {} of {}",
            snapshot_id,
            request.volume_id
        );
        Ok(SnapshotResponse {
            snapshot_id,
            volume_id: request.volume_id.clone(),
        })
    }

    pub async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.delete_snapshot(credential, snapshot_id))
            .await
    }
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request))]
    pub async fn create_snapshot(
        &self,
        account_id: &str,
        request: CreateSnapshotRequest,
    ) -> Result<SnapshotResponse, AppError> {
        request.validate()?;
        validate_resource_id("vol", &request.volume_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.create_snapshot(&scope, &request.volume_id)?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator.create_snapshot(&mut transaction, &request).await;
        settle(transaction, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_snapshot(
        &self,
        account_id: &str,
        snapshot_id: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_resource_id("snap", snapshot_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.delete_snapshot(&scope, snapshot_id)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.delete_snapshot(snapshot_id).await?;

        tracing::info!("[control-plane] deleted snapshot {}", snapshot_id);
        Ok(DeletedResponse {
            deleted: snapshot_id.to_string(),
        })
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use validator::Validate;

use super::{ControlPlane, Orchestrator, missing_id, not_ready, settle};
use crate::errors::AppError;
use crate::models::{
    Branch, CreateVolumeRequest, DeletedResponse, UpdateVolumeRequest, VolumeConfiguration,
    VolumeResponse, validate_resource_id,
};
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    /// `start -> volume-created -> available -> attached -> done`, the last
    /// two only when an instance was named.
    pub async fn create_volume(
        &self,
        transaction: &mut Transaction,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeResponse, AppError> {
        let provider = self.provider();
        let credential = self.credential();

        let volume_id = self
            .once(provider.create_volume(credential, request))
            .await?
            .ok_or_else(|| missing_id("volume"))?;
        transaction.push(RollbackTask::DeleteVolume {
            volume_id: volume_id.clone(),
        });
        tracing::info!("[control-plane] created volume {}", volume_id);

        let (Some(instance_id), Some(device)) = (&request.instance_id, &request.device) else {
            return Ok(VolumeResponse {
                volume_id,
                attached_to: None,
            });
        };

        let id = volume_id.as_str();
        self.wait_for(move || async move {
            let volume = provider.describe_volume(credential, id).await?;
            if volume.is_available() {
                Ok(())
            } else {
                Err(not_ready(&format!("volume {id}"), volume.state.as_deref()))
            }
        })
        .await?;

        self.idempotent(move || provider.attach_volume(credential, id, instance_id, device))
            .await?;
        tracing::info!("[control-plane] attached {} to {} as {}", volume_id, instance_id, device);

        Ok(VolumeResponse {
            volume_id,
            attached_to: Some(instance_id.clone()),
        })
    }

    pub async fn modify_volume(
        &self,
        volume_id: &str,
        configuration: &VolumeConfiguration,
    ) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.modify_volume(credential, volume_id, configuration))
            .await
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.delete_volume(credential, volume_id))
            .await
    }
}

fn validate_create(request: &CreateVolumeRequest) -> Result<(), AppError> {
    request.validate()?;
    match (&request.instance_id, &request.device) {
        (Some(instance_id), Some(_)) => validate_resource_id("i", instance_id),
        (None, None) => Ok(()),
        _ => Err(AppError::ValidationError(
            "instance_id and device must be given together".to_string(),
        )),
    }
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request))]
    pub async fn create_volume(
        &self,
        account_id: &str,
        request: CreateVolumeRequest,
    ) -> Result<VolumeResponse, AppError> {
        validate_create(&request)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.create_volume()?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator.create_volume(&mut transaction, &request).await;
        settle(transaction, result).await
    }

    /// Applies either the tag branch or the size/type branch.
    #[tracing::instrument(skip(self, request))]
    pub async fn update_volume(
        &self,
        account_id: &str,
        volume_id: &str,
        request: UpdateVolumeRequest,
    ) -> Result<VolumeResponse, AppError> {
        request.validate()?;
        let branch = request.branch()?;
        validate_resource_id("vol", volume_id)?;
        let scope = self.scope(account_id)?;

        match branch {
            Branch::Tags(tags) => {
                let document = self.policies.update_volume_tags(&scope, volume_id)?;
                let orchestrator = self.bind(&scope, document).await?;
                orchestrator.tag_resource(volume_id, &tags).await?;
            }
            Branch::Configuration(configuration) => {
                let document = self
                    .policies
                    .update_volume_configuration(&scope, volume_id)?;
                let orchestrator = self.bind(&scope, document).await?;
                orchestrator.modify_volume(volume_id, &configuration).await?;
            }
        }

        Ok(VolumeResponse {
            volume_id: volume_id.to_string(),
            attached_to: None,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_volume(
        &self,
        account_id: &str,
        volume_id: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_resource_id("vol", volume_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.delete_volume(&scope, volume_id)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.delete_volume(volume_id).await?;

        tracing::info!("[control-plane] deleted volume {}", volume_id);
        Ok(DeletedResponse {
            deleted: volume_id.to_string(),
        })
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use validator::Validate;

use super::{ControlPlane, Orchestrator, missing_id, settle};
use crate::constants::SSM_READ_ONLY_POLICY;
use crate::errors::AppError;
use crate::models::{
    Branch, CreateInstanceRequest, DeletedResponse, InstanceResponse, ManagedInstanceStatus,
    Tags, UpdateInstanceRequest, validate_resource_id,
};
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    /// Launches exactly one instance. Every instance the provider reports is
    /// queued for termination before the count is checked, so a surprise
    /// extra instance is cleaned up too.
    pub async fn create_instance(
        &self,
        transaction: &mut Transaction,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceResponse, AppError> {
        let instances = self
            .once(self.provider().run_instance(self.credential(), request))
            .await?;

        for instance_id in instances.iter().filter_map(|i| i.instance_id.clone()) {
            transaction.push(RollbackTask::TerminateInstance { instance_id });
        }

        if instances.len() != 1 {
            return Err(AppError::UnexpectedResult(format!(
                "expected 1 instance to be launched, got {}",
                instances.len()
            )));
        }
        let Some(instance) = instances.into_iter().next() else {
            return Err(missing_id("instance"));
        };
        let instance_id = instance.instance_id.ok_or_else(|| missing_id("instance"))?;

        tracing::info!("[control-plane] launched instance {}", instance_id);
        Ok(InstanceResponse {
            instance_id,
            state: instance.state,
        })
    }

    pub async fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.create_tags(credential, resource_id, tags))
            .await
    }

    pub async fn change_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.modify_instance_type(credential, instance_id, instance_type))
            .await
    }

    pub async fn terminate_instance(&self, instance_id: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.terminate_instance(credential, instance_id))
            .await
    }

    pub async fn managed_instances(&self) -> Result<Vec<ManagedInstanceStatus>, AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.describe_managed_instances(credential))
            .await
    }
}

fn validate_launch(request: &CreateInstanceRequest) -> Result<(), AppError> {
    request.validate()?;
    validate_resource_id("ami", &request.image_id)?;
    if let Some(subnet_id) = &request.subnet_id {
        validate_resource_id("subnet", subnet_id)?;
    }
    for group_id in &request.security_group_ids {
        validate_resource_id("sg", group_id)?;
    }
    Ok(())
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request))]
    pub async fn create_instance(
        &self,
        account_id: &str,
        request: CreateInstanceRequest,
    ) -> Result<InstanceResponse, AppError> {
        validate_launch(&request)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.create_instance()?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator.create_instance(&mut transaction, &request).await;
        settle(transaction, result).await
    }

    /// Applies either the tag branch or the instance type branch.
    #[tracing::instrument(skip(self, request))]
    pub async fn update_instance(
        &self,
        account_id: &str,
        instance_id: &str,
        request: UpdateInstanceRequest,
    ) -> Result<InstanceResponse, AppError> {
        request.validate()?;
        let branch = request.branch()?;
        validate_resource_id("i", instance_id)?;
        let scope = self.scope(account_id)?;

        match branch {
            Branch::Tags(tags) => {
                let document = self.policies.update_instance_tags(&scope, instance_id)?;
                let orchestrator = self.bind(&scope, document).await?;
                orchestrator.tag_resource(instance_id, &tags).await?;
            }
            Branch::Configuration(instance_type) => {
                let document = self
                    .policies
                    .update_instance_configuration(&scope, instance_id)?;
                let orchestrator = self.bind(&scope, document).await?;
                orchestrator
                    .change_instance_type(instance_id, &instance_type)
                    .await?;
            }
        }

        Ok(InstanceResponse {
            instance_id: instance_id.to_string(),
            state: None,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn terminate_instance(
        &self,
        account_id: &str,
        instance_id: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_resource_id("i", instance_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.terminate_instance(&scope, instance_id)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.terminate_instance(instance_id).await?;

        tracing::info!("[control-plane] terminated instance {}", instance_id);
        Ok(DeletedResponse {
            deleted: instance_id.to_string(),
        })
    }

    /// SSM agent status of the account's managed instances.
    #[tracing::instrument(skip(self))]
    pub async fn managed_instances(
        &self,
        account_id: &str,
    ) -> Result<Vec<ManagedInstanceStatus>, AppError> {
        let scope = self.scope(account_id)?;
        let orchestrator = self.bind_read_only(&scope, SSM_READ_ONLY_POLICY).await?;
        orchestrator.managed_instances().await
    }
}

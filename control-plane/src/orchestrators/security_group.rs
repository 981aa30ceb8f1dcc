// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Security group lifecycle.
//!
//! Creation runs `start -> group-created -> rules-applied -> done`. Only the
//! first transition pushes a rollback step: deleting the group also removes
//! its rules.

use validator::Validate;

use super::{ControlPlane, Orchestrator, missing_id, settle};
use crate::constants::EC2_READ_ONLY_POLICY;
use crate::errors::AppError;
use crate::models::{
    CreateSecurityGroupRequest, DeletedResponse, SecurityGroupResponse, validate_resource_id,
};
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    pub async fn create_security_group(
        &self,
        transaction: &mut Transaction,
        request: &CreateSecurityGroupRequest,
    ) -> Result<SecurityGroupResponse, AppError> {
        let provider = self.provider();
        let credential = self.credential();

        let group_id = self
            .once(provider.create_security_group(credential, request))
            .await?
            .ok_or_else(|| missing_id("security group"))?;
        transaction.push(RollbackTask::DeleteSecurityGroup {
            group_id: group_id.clone(),
        });
        tracing::info!("[control-plane] created security group {}", group_id);

        let id = group_id.as_str();
        let group = self
            .wait_for(move || provider.describe_security_group(credential, id))
            .await?;

        if !request.ingress_rules.is_empty() {
            let rules = request.ingress_rules.as_slice();
            self.idempotent(move || provider.authorize_ingress(credential, id, rules))
                .await?;
            tracing::debug!(
                "[control-plane] applied {} ingress rules to {}",
                rules.len(),
                group_id
            );
        }

        Ok(SecurityGroupResponse {
            group_id,
            group_name: group.group_name,
            vpc_id: group.vpc_id,
            ingress_rules: request.ingress_rules.len(),
        })
    }

    pub async fn describe_security_group(
        &self,
        group_id: &str,
    ) -> Result<SecurityGroupResponse, AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        let group = self
            .idempotent(move || provider.describe_security_group(credential, group_id))
            .await?;

        Ok(SecurityGroupResponse {
            group_id: group.group_id,
            group_name: group.group_name,
            vpc_id: group.vpc_id,
            ingress_rules: group.ingress_rules,
        })
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.delete_security_group(credential, group_id))
            .await
    }
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request))]
    pub async fn create_security_group(
        &self,
        account_id: &str,
        request: CreateSecurityGroupRequest,
    ) -> Result<SecurityGroupResponse, AppError> {
        request.validate()?;
        if let Some(vpc_id) = &request.vpc_id {
            validate_resource_id("vpc", vpc_id)?;
        }
        let scope = self.scope(account_id)?;

        let document = self.policies.create_security_group()?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator
            .create_security_group(&mut transaction, &request)
            .await;
        settle(transaction, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn describe_security_group(
        &self,
        account_id: &str,
        group_id: &str,
    ) -> Result<SecurityGroupResponse, AppError> {
        validate_resource_id("sg", group_id)?;
        let scope = self.scope(account_id)?;

        let orchestrator = self.bind_read_only(&scope, EC2_READ_ONLY_POLICY).await?;
        orchestrator.describe_security_group(group_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_security_group(
        &self,
        account_id: &str,
        group_id: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_resource_id("sg", group_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.delete_security_group(&scope, group_id)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.delete_security_group(group_id).await?;

        tracing::info!("[control-plane] deleted security group {}", group_id);
        Ok(DeletedResponse {
            deleted: group_id.to_string(),
        })
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use validator::Validate;

use super::{ControlPlane, Orchestrator, missing_id, settle};
use crate::errors::AppError;
use crate::models::{
    AssociationResponse, CreateAssociationRequest, DeletedResponse, validate_resource_id,
};
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    pub async fn create_association(
        &self,
        transaction: &mut Transaction,
        request: &CreateAssociationRequest,
    ) -> Result<AssociationResponse, AppError> {
        let association_id = self
            .once(self.provider().create_association(self.credential(), request))
            .await?
            .ok_or_else(|| missing_id("association"))?;
        transaction.push(RollbackTask::DeleteAssociation {
            association_id: association_id.clone(),
        });

        tracing::info!(
            "[control-plane] associated {} with {}",
            request.document_name,
            request.instance_id
        );
        Ok(AssociationResponse { association_id })
    }

    pub async fn delete_association(&self, association_id: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.delete_association(credential, association_id))
            .await
    }
}

/// Association ids are UUIDs.
fn validate_association_id(id: &str) -> Result<(), AppError> {
    let groups: Vec<&str> = id.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    let valid = groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(AppError::ValidationError(format!(
            "invalid association id: {id}"
        )));
    }
    Ok(())
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request))]
    pub async fn create_association(
        &self,
        account_id: &str,
        request: CreateAssociationRequest,
    ) -> Result<AssociationResponse, AppError> {
        request.validate()?;
        validate_resource_id("i", &request.instance_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.create_association()?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator
            .create_association(&mut transaction, &request)
            .await;
        settle(transaction, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_association(
        &self,
        account_id: &str,
        association_id: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_association_id(association_id)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.delete_association(&scope, association_id)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.delete_association(association_id).await?;

        tracing::info!("[control-plane] deleted association {}", association_id);
        Ok(DeletedResponse {
            deleted: association_id.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::orchestrators::testing::{ASSOCIATION_ID, Harness, INSTANCE_ID, ScriptedProvider};
    use crate::provider::ProviderError;

    const ACCOUNT: &str = "123456789012";

    fn request() -> CreateAssociationRequest {
        CreateAssociationRequest {
            document_name: "AWS-RunPatchBaseline".to_string(),
            instance_id: INSTANCE_ID.to_string(),
            schedule_expression: Some("rate(1 day)".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_association() {
        let harness = Harness::new(ScriptedProvider::default());

        let response = harness
            .control
            .create_association(ACCOUNT, request())
            .await
            .unwrap();

        assert_eq!(response.association_id, ASSOCIATION_ID);
        let policy = &harness.exchange.policies()[0];
        assert!(policy.contains("ssm:CreateAssociation"));
        assert!(!policy.contains("ssm:DeleteAssociation"));
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let harness = Harness::new(ScriptedProvider::failing(
            "create_association",
            ProviderError::NotFound("InvalidDocument".to_string()),
        ));

        let result = harness.control.create_association(ACCOUNT, request()).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_association_is_scoped() {
        let harness = Harness::new(ScriptedProvider::default());

        harness
            .control
            .delete_association(ACCOUNT, ASSOCIATION_ID)
            .await
            .unwrap();

        assert!(harness.exchange.policies()[0].contains(
            "arn:aws:ssm:us-east-1:123456789012:association/8dfe3659-4309-493a-8755-0123456789ab"
        ));
    }

    #[test]
    fn test_association_ids() {
        assert!(validate_association_id(ASSOCIATION_ID).is_ok());
        assert!(validate_association_id("8dfe3659-4309-493a-8755").is_err());
        assert!(validate_association_id("8dfe3659-4309-493a-8755-0123456789ag").is_err());
        assert!(validate_association_id("*").is_err());
    }
}

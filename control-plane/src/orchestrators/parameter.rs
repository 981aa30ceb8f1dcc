// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use validator::Validate;

use super::{ControlPlane, Orchestrator, settle};
use crate::errors::AppError;
use crate::models::{
    Branch, CreateParameterRequest, DeletedResponse, ParameterResponse, Tags,
    UpdateParameterRequest,
};
use crate::provider::ParameterSpec;
use crate::rollback::{RollbackTask, Transaction};

impl Orchestrator {
    /// `start -> parameter-written -> tagged -> done`.
    pub async fn create_parameter(
        &self,
        transaction: &mut Transaction,
        request: &CreateParameterRequest,
    ) -> Result<ParameterResponse, AppError> {
        let spec = ParameterSpec {
            name: &request.name,
            value: &request.value,
            parameter_type: Some(&request.parameter_type),
            description: request.description.as_deref(),
            overwrite: false,
        };
        let version = self
            .once(self.provider().put_parameter(self.credential(), &spec))
            .await?;
        transaction.push(RollbackTask::DeleteParameter {
            name: request.name.clone(),
        });
        tracing::info!("[control-plane] created parameter {}", request.name);

        if !request.tags.is_empty() {
            self.tag_parameter(&request.name, &request.tags).await?;
        }

        Ok(ParameterResponse {
            name: request.name.clone(),
            version: Some(version),
        })
    }

    pub async fn tag_parameter(&self, name: &str, tags: &Tags) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.tag_parameter(credential, name, tags))
            .await
    }

    /// Overwrites the value, keeping the existing type.
    pub async fn write_parameter(&self, name: &str, value: &str) -> Result<i64, AppError> {
        let spec = ParameterSpec {
            name,
            value,
            parameter_type: None,
            description: None,
            overwrite: true,
        };
        self.once(self.provider().put_parameter(self.credential(), &spec))
            .await
    }

    pub async fn delete_parameter(&self, name: &str) -> Result<(), AppError> {
        let (provider, credential) = (self.provider(), self.credential());
        self.idempotent(move || provider.delete_parameter(credential, name))
            .await
    }
}

/// Parameter names are hierarchical paths (`/app/db/host`) or plain names.
fn validate_parameter_name(name: &str) -> Result<(), AppError> {
    let valid = !name.is_empty()
        && !name.ends_with('/')
        && !name.contains("//")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'));
    if !valid {
        return Err(AppError::ValidationError(format!(
            "invalid parameter name: {name}"
        )));
    }
    Ok(())
}

impl ControlPlane {
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_parameter(
        &self,
        account_id: &str,
        request: CreateParameterRequest,
    ) -> Result<ParameterResponse, AppError> {
        request.validate()?;
        validate_parameter_name(&request.name)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.create_parameter(&scope, &request.name)?;
        let orchestrator = self.bind(&scope, document).await?;

        let mut transaction = self.transaction(&scope);
        let result = orchestrator.create_parameter(&mut transaction, &request).await;
        settle(transaction, result).await
    }

    /// Applies either the tag branch or the value branch.
    #[tracing::instrument(skip(self, request))]
    pub async fn update_parameter(
        &self,
        account_id: &str,
        name: &str,
        request: UpdateParameterRequest,
    ) -> Result<ParameterResponse, AppError> {
        request.validate()?;
        let branch = request.branch()?;
        validate_parameter_name(name)?;
        let scope = self.scope(account_id)?;

        let version = match branch {
            Branch::Tags(tags) => {
                let document = self.policies.update_parameter_tags(&scope, name)?;
                let orchestrator = self.bind(&scope, document).await?;
                orchestrator.tag_parameter(name, &tags).await?;
                None
            }
            Branch::Configuration(value) => {
                let document = self.policies.update_parameter_value(&scope, name)?;
                let orchestrator = self.bind(&scope, document).await?;
                Some(orchestrator.write_parameter(name, &value).await?)
            }
        };

        Ok(ParameterResponse {
            name: name.to_string(),
            version,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_parameter(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<DeletedResponse, AppError> {
        validate_parameter_name(name)?;
        let scope = self.scope(account_id)?;

        let document = self.policies.delete_parameter(&scope, name)?;
        let orchestrator = self.bind(&scope, document).await?;
        orchestrator.delete_parameter(name).await?;

        tracing::info!("[control-plane] deleted parameter {}", name);
        Ok(DeletedResponse {
            deleted: name.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::orchestrators::testing::{Harness, ScriptedProvider};
    use crate::provider::ProviderError;

    const ACCOUNT: &str = "123456789012";
    const NAME: &str = "/app/db/host";

    fn request(tags: &[(&str, &str)]) -> CreateParameterRequest {
        CreateParameterRequest {
            name: NAME.to_string(),
            value: "db.internal".to_string(),
            parameter_type: "String".to_string(),
            description: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_with_tags() {
        let harness = Harness::new(ScriptedProvider::default());

        let response = harness
            .control
            .create_parameter(ACCOUNT, request(&[("team", "infra")]))
            .await
            .unwrap();

        assert_eq!(response.version, Some(1));
        assert_eq!(
            harness.provider.calls(),
            vec!["put_parameter /app/db/host", "tag_parameter /app/db/host"]
        );
        let policy = &harness.exchange.policies()[0];
        assert!(policy.contains("arn:aws:ssm:us-east-1:123456789012:parameter/app/db/host"));
        assert!(!policy.contains("ssm:DeleteParameter"));
    }

    #[tokio::test]
    async fn test_failed_tagging_deletes_parameter() {
        let harness = Harness::new(ScriptedProvider::failing(
            "tag_parameter",
            ProviderError::Malformed("ValidationException".to_string()),
        ));

        let result = harness
            .control
            .create_parameter(ACCOUNT, request(&[("team", "infra")]))
            .await;

        assert_eq!(
            result.unwrap_err(),
            AppError::ValidationError("ValidationException".to_string())
        );
        assert_eq!(
            harness.provider.calls().last().unwrap(),
            "delete_parameter /app/db/host"
        );
    }

    #[tokio::test]
    async fn test_existing_parameter_is_conflict_without_rollback() {
        let harness = Harness::new(ScriptedProvider::failing(
            "put_parameter",
            ProviderError::Conflict("ParameterAlreadyExists".to_string()),
        ));

        let result = harness.control.create_parameter(ACCOUNT, request(&[])).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        // the existing parameter is not ours to delete
        assert_eq!(harness.provider.calls(), vec!["put_parameter /app/db/host"]);
    }

    #[tokio::test]
    async fn test_update_value_branch_returns_version() {
        let harness = Harness::new(ScriptedProvider::default());
        let request = UpdateParameterRequest {
            tags: None,
            value: Some("db2.internal".to_string()),
        };

        let response = harness
            .control
            .update_parameter(ACCOUNT, NAME, request)
            .await
            .unwrap();

        assert_eq!(response.version, Some(2));
        assert!(harness.exchange.policies()[0].contains("ssm:PutParameter"));
    }

    #[tokio::test]
    async fn test_update_with_neither_branch_never_brokers() {
        let harness = Harness::new(ScriptedProvider::default());

        let result = harness
            .control
            .update_parameter(ACCOUNT, NAME, UpdateParameterRequest::default())
            .await;

        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(harness.exchange.calls(), 0);
    }

    #[test]
    fn test_parameter_names() {
        assert!(validate_parameter_name("/app/db/host").is_ok());
        assert!(validate_parameter_name("plain_name-1.0").is_ok());
        assert!(validate_parameter_name("/app/*").is_err());
        assert!(validate_parameter_name("/app//host").is_err());
        assert!(validate_parameter_name("/app/").is_err());
        assert!(validate_parameter_name("").is_err());
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Least-privilege session policy generation.
//!
//! Every mutating request is executed with credentials scoped by an inline
//! session policy generated here. The generated [`AuthorizationDocument`]
//! follows two rules:
//!
//! - **Existing resources** (delete, update): the resource set is exactly the
//!   ARN of the one resource being touched.
//! - **New resources** (create): the resource cannot be named before it
//!   exists, so the resource set is a wildcard, but the actions are limited to
//!   the create path of that resource type. Tagging is further restricted to
//!   the creating call with an `ec2:CreateAction` condition.
//!
//! Action lists are not hard-coded per function. They come from a
//! [`PolicyTable`] keyed by [`Operation`], which can be overridden at startup
//! from a JSON file.
//!
//! # Document Format
//!
//! ```json
//! {
//!   "Version": "2012-10-17",
//!   "Statement": [{
//!     "Effect": "Allow",
//!     "Action": ["ec2:DeleteVolume"],
//!     "Resource": ["arn:aws:ec2:us-east-1:123456789012:volume/vol-0abc"]
//!   }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_INLINE_POLICY_LENGTH, POLICY_VERSION};
use crate::rollback::RollbackTask;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("unable to encode policy document: {0}")]
    Serialize(String),
    #[error("policy document is {length} characters, limit is {limit}")]
    TooLarge { length: usize, limit: usize },
    #[error("invalid resource identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("no action list configured for {0}")]
    UnknownOperation(Operation),
}

/// Mutating operations that receive a generated session policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    CreateSecurityGroup,
    DeleteSecurityGroup,
    CreateInstance,
    UpdateInstanceTags,
    UpdateInstanceConfiguration,
    TerminateInstance,
    CreateVolume,
    UpdateVolumeTags,
    UpdateVolumeConfiguration,
    DeleteVolume,
    CreateSnapshot,
    DeleteSnapshot,
    CreateParameter,
    UpdateParameterTags,
    UpdateParameterValue,
    DeleteParameter,
    CreateAssociation,
    DeleteAssociation,
}

impl Operation {
    /// The API call that creates the resource, used to restrict tagging to
    /// tag-on-create.
    fn create_action(self) -> Option<&'static str> {
        match self {
            Self::CreateSecurityGroup => Some("CreateSecurityGroup"),
            Self::CreateInstance => Some("RunInstances"),
            Self::CreateVolume => Some("CreateVolume"),
            Self::CreateSnapshot => Some("CreateSnapshot"),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Condition block: operator -> (condition key -> value).
pub type Conditions = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Action")]
    pub action: BTreeSet<String>,

    #[serde(rename = "Resource")]
    pub resource: BTreeSet<String>,

    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Conditions>,
}

/// An IAM policy document. Sets and maps are ordered, so the serialized form
/// is canonical and two equal documents always encode to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDocument {
    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Statement")]
    pub statement: Vec<Statement>,
}

impl AuthorizationDocument {
    fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    /// Encodes the document, enforcing the packed session policy size limit.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        let encoded =
            serde_json::to_string(self).map_err(|e| PolicyError::Serialize(e.to_string()))?;
        if encoded.len() > MAX_INLINE_POLICY_LENGTH {
            return Err(PolicyError::TooLarge {
                length: encoded.len(),
                limit: MAX_INLINE_POLICY_LENGTH,
            });
        }
        Ok(encoded)
    }

    pub fn actions(&self) -> BTreeSet<&str> {
        self.statement
            .iter()
            .flat_map(|s| s.action.iter().map(String::as_str))
            .collect()
    }

    pub fn resources(&self) -> BTreeSet<&str> {
        self.statement
            .iter()
            .flat_map(|s| s.resource.iter().map(String::as_str))
            .collect()
    }
}

/// Action lists per operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    actions: BTreeMap<Operation, BTreeSet<String>>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        use Operation::*;

        let entries: [(Operation, &[&str]); 18] = [
            (
                CreateSecurityGroup,
                &[
                    "ec2:CreateSecurityGroup",
                    "ec2:CreateTags",
                    "ec2:DescribeSecurityGroups",
                    "ec2:AuthorizeSecurityGroupIngress",
                ],
            ),
            (DeleteSecurityGroup, &["ec2:DeleteSecurityGroup"]),
            (
                CreateInstance,
                &["ec2:RunInstances", "ec2:CreateTags", "ec2:DescribeInstances"],
            ),
            (UpdateInstanceTags, &["ec2:CreateTags"]),
            (UpdateInstanceConfiguration, &["ec2:ModifyInstanceAttribute"]),
            (TerminateInstance, &["ec2:TerminateInstances"]),
            (
                CreateVolume,
                &[
                    "ec2:CreateVolume",
                    "ec2:CreateTags",
                    "ec2:DescribeVolumes",
                    "ec2:AttachVolume",
                ],
            ),
            (UpdateVolumeTags, &["ec2:CreateTags"]),
            (UpdateVolumeConfiguration, &["ec2:ModifyVolume"]),
            (DeleteVolume, &["ec2:DeleteVolume"]),
            (CreateSnapshot, &["ec2:CreateSnapshot", "ec2:CreateTags"]),
            (DeleteSnapshot, &["ec2:DeleteSnapshot"]),
            (CreateParameter, &["ssm:PutParameter", "ssm:AddTagsToResource"]),
            (UpdateParameterTags, &["ssm:AddTagsToResource"]),
            (UpdateParameterValue, &["ssm:PutParameter"]),
            (DeleteParameter, &["ssm:DeleteParameter"]),
            (CreateAssociation, &["ssm:CreateAssociation"]),
            (DeleteAssociation, &["ssm:DeleteAssociation"]),
        ];

        let actions = entries
            .into_iter()
            .map(|(op, actions)| (op, actions.iter().map(|a| a.to_string()).collect()))
            .collect();

        Self { actions }
    }
}

impl PolicyTable {
    /// Builds the default table with the entries of a JSON object
    /// (`{"delete-volume": ["ec2:DeleteVolume"]}`) replacing the defaults.
    pub fn with_overrides(json: &str) -> Result<Self, PolicyError> {
        let overrides: BTreeMap<Operation, BTreeSet<String>> =
            serde_json::from_str(json).map_err(|e| PolicyError::Serialize(e.to_string()))?;
        let mut table = Self::default();
        table.actions.extend(overrides);
        Ok(table)
    }

    pub fn actions(&self, operation: Operation) -> Result<&BTreeSet<String>, PolicyError> {
        self.actions
            .get(&operation)
            .filter(|actions| !actions.is_empty())
            .ok_or(PolicyError::UnknownOperation(operation))
    }
}

/// The target account and region every generated ARN is qualified with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountScope {
    pub partition: String,
    pub region: String,
    pub account_id: String,
}

impl AccountScope {
    pub fn role_arn(&self, role_name: &str) -> String {
        format!(
            "arn:{}:iam::{}:role/{}",
            self.partition, self.account_id, role_name
        )
    }

    /// ARN of an AWS managed policy in this partition.
    pub fn managed_policy_arn(&self, policy_name: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", self.partition, policy_name)
    }

    fn ec2_arn(&self, resource_type: &str, id: &str) -> String {
        format!(
            "arn:{}:ec2:{}:{}:{}/{}",
            self.partition, self.region, self.account_id, resource_type, id
        )
    }

    // snapshot ARNs carry no account id
    fn snapshot_arn(&self, id: &str) -> String {
        format!("arn:{}:ec2:{}::snapshot/{}", self.partition, self.region, id)
    }

    fn ssm_arn(&self, resource_type: &str, id: &str) -> String {
        format!(
            "arn:{}:ssm:{}:{}:{}/{}",
            self.partition, self.region, self.account_id, resource_type, id
        )
    }

    fn parameter_arn(&self, name: &str) -> String {
        self.ssm_arn("parameter", name.trim_start_matches('/'))
    }
}

/// Identifiers end up inside ARNs; anything that would widen the match is
/// rejected.
fn checked(id: &str) -> Result<&str, PolicyError> {
    if id.is_empty() || id.contains(['*', '?', '$', '{', '}', '"', '\\']) {
        return Err(PolicyError::InvalidIdentifier(id.to_string()));
    }
    Ok(id)
}

/// Renders session policies from the configured [`PolicyTable`].
#[derive(Debug, Clone, Default)]
pub struct PolicyGenerator {
    table: PolicyTable,
}

impl PolicyGenerator {
    pub fn new(table: PolicyTable) -> Self {
        Self { table }
    }

    fn allow(&self, operation: Operation, resources: Vec<String>) -> Result<Statement, PolicyError> {
        Ok(Statement {
            effect: Effect::Allow,
            action: self.table.actions(operation)?.clone(),
            resource: resources.into_iter().collect(),
            condition: None,
        })
    }

    /// Scopes an existing resource: one statement, one ARN.
    fn existing(&self, operation: Operation, arn: String) -> Result<AuthorizationDocument, PolicyError> {
        let document = AuthorizationDocument::new(vec![self.allow(operation, vec![arn])?]);
        document.to_json()?;
        Ok(document)
    }

    /// Scopes a creation path. `ec2:CreateTags` is split into its own
    /// statement conditioned on the creating call.
    fn creation(
        &self,
        operation: Operation,
        resources: Vec<String>,
    ) -> Result<AuthorizationDocument, PolicyError> {
        let mut primary = self.allow(operation, resources)?;
        let mut statement = Vec::with_capacity(2);

        if let Some(create_action) = operation.create_action()
            && primary.action.remove("ec2:CreateTags")
        {
            let condition = BTreeMap::from([(
                "StringEquals".to_string(),
                BTreeMap::from([("ec2:CreateAction".to_string(), create_action.to_string())]),
            )]);
            statement.push(Statement {
                effect: Effect::Allow,
                action: BTreeSet::from(["ec2:CreateTags".to_string()]),
                resource: BTreeSet::from(["*".to_string()]),
                condition: Some(condition),
            });
        }
        if !primary.action.is_empty() {
            statement.insert(0, primary);
        }

        let document = AuthorizationDocument::new(statement);
        document.to_json()?;
        Ok(document)
    }

    pub fn create_security_group(&self) -> Result<AuthorizationDocument, PolicyError> {
        self.creation(Operation::CreateSecurityGroup, vec!["*".to_string()])
    }

    pub fn delete_security_group(
        &self,
        scope: &AccountScope,
        group_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::DeleteSecurityGroup,
            scope.ec2_arn("security-group", checked(group_id)?),
        )
    }

    pub fn create_instance(&self) -> Result<AuthorizationDocument, PolicyError> {
        self.creation(Operation::CreateInstance, vec!["*".to_string()])
    }

    pub fn update_instance_tags(
        &self,
        scope: &AccountScope,
        instance_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateInstanceTags,
            scope.ec2_arn("instance", checked(instance_id)?),
        )
    }

    pub fn update_instance_configuration(
        &self,
        scope: &AccountScope,
        instance_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateInstanceConfiguration,
            scope.ec2_arn("instance", checked(instance_id)?),
        )
    }

    pub fn terminate_instance(
        &self,
        scope: &AccountScope,
        instance_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::TerminateInstance,
            scope.ec2_arn("instance", checked(instance_id)?),
        )
    }

    pub fn create_volume(&self) -> Result<AuthorizationDocument, PolicyError> {
        self.creation(Operation::CreateVolume, vec!["*".to_string()])
    }

    pub fn update_volume_tags(
        &self,
        scope: &AccountScope,
        volume_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateVolumeTags,
            scope.ec2_arn("volume", checked(volume_id)?),
        )
    }

    pub fn update_volume_configuration(
        &self,
        scope: &AccountScope,
        volume_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateVolumeConfiguration,
            scope.ec2_arn("volume", checked(volume_id)?),
        )
    }

    pub fn delete_volume(
        &self,
        scope: &AccountScope,
        volume_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::DeleteVolume,
            scope.ec2_arn("volume", checked(volume_id)?),
        )
    }

    /// The source volume is known, so only new snapshots are wildcarded.
    pub fn create_snapshot(
        &self,
        scope: &AccountScope,
        volume_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.creation(
            Operation::CreateSnapshot,
            vec![
                scope.ec2_arn("volume", checked(volume_id)?),
                scope.snapshot_arn("*"),
            ],
        )
    }

    pub fn delete_snapshot(
        &self,
        scope: &AccountScope,
        snapshot_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::DeleteSnapshot,
            scope.snapshot_arn(checked(snapshot_id)?),
        )
    }

    /// Parameter names are chosen by the caller, so even creation is scoped
    /// to the exact ARN.
    pub fn create_parameter(
        &self,
        scope: &AccountScope,
        name: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(Operation::CreateParameter, scope.parameter_arn(checked(name)?))
    }

    pub fn update_parameter_tags(
        &self,
        scope: &AccountScope,
        name: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateParameterTags,
            scope.parameter_arn(checked(name)?),
        )
    }

    pub fn update_parameter_value(
        &self,
        scope: &AccountScope,
        name: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::UpdateParameterValue,
            scope.parameter_arn(checked(name)?),
        )
    }

    pub fn delete_parameter(
        &self,
        scope: &AccountScope,
        name: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(Operation::DeleteParameter, scope.parameter_arn(checked(name)?))
    }

    pub fn create_association(&self) -> Result<AuthorizationDocument, PolicyError> {
        self.creation(Operation::CreateAssociation, vec!["*".to_string()])
    }

    pub fn delete_association(
        &self,
        scope: &AccountScope,
        association_id: &str,
    ) -> Result<AuthorizationDocument, PolicyError> {
        self.existing(
            Operation::DeleteAssociation,
            scope.ssm_arn("association", checked(association_id)?),
        )
    }

    /// The document a compensating action runs under: the delete policy of
    /// the one resource it removes.
    pub fn compensation(
        &self,
        scope: &AccountScope,
        task: &RollbackTask,
    ) -> Result<AuthorizationDocument, PolicyError> {
        match task {
            RollbackTask::DeleteSecurityGroup { group_id } => {
                self.delete_security_group(scope, group_id)
            }
            RollbackTask::TerminateInstance { instance_id } => {
                self.terminate_instance(scope, instance_id)
            }
            RollbackTask::DeleteVolume { volume_id } => self.delete_volume(scope, volume_id),
            RollbackTask::DeleteSnapshot { snapshot_id } => {
                self.delete_snapshot(scope, snapshot_id)
            }
            RollbackTask::DeleteParameter { name } => self.delete_parameter(scope, name),
            RollbackTask::DeleteAssociation { association_id } => {
                self.delete_association(scope, association_id)
            }
        }
    }
}

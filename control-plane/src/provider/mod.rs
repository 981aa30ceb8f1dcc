// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cloud resource provider capability.
//!
//! Orchestrators drive EC2 and SSM through [`CloudProvider`]. Every call takes
//! the brokered [`Credential`] it must run under; the provider never picks
//! credentials on its own. Provider failures are classified into
//! [`ProviderError`] so the orchestration layer can decide between retrying,
//! rolling back and surfacing a client error.

pub mod aws;

use std::fmt;

use async_trait::async_trait;
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_smithy_runtime_api::client::result::SdkError;

use crate::models::{
    CreateAssociationRequest, CreateInstanceRequest, CreateSecurityGroupRequest,
    CreateSnapshotRequest, CreateVolumeRequest, Credential, IngressRule, ManagedInstanceStatus,
    Tags, VolumeConfiguration,
};
use crate::retry::RetryError;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The session credentials themselves were refused (expired or unknown).
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Unavailable(_))
    }

    /// The session that made the call should not be handed out again.
    pub fn rejects_credential(&self) -> bool {
        matches!(self, Self::AccessDenied(_) | Self::Rejected(_))
    }

    pub fn into_retry(self) -> RetryError<Self> {
        if self.is_transient() {
            RetryError::Transient(self)
        } else {
            RetryError::Stop(self)
        }
    }

    /// Like [`into_retry`](Self::into_retry), but a resource that is not
    /// visible yet is worth waiting for.
    pub fn into_wait(self) -> RetryError<Self> {
        match self {
            Self::NotFound(_) => RetryError::Transient(self),
            _ => self.into_retry(),
        }
    }

    /// Maps an EC2/SSM error code onto the classification.
    pub fn classify(operation: &str, code: &str, message: &str) -> Self {
        let detail = format!("{operation}: {code}: {message}");
        match code {
            "RequestLimitExceeded" | "Throttling" | "ThrottlingException" | "TooManyUpdates" => {
                Self::Throttled(detail)
            }
            "ServiceUnavailable" | "Unavailable" | "InternalError" | "InternalServerError" => {
                Self::Unavailable(detail)
            }
            "UnauthorizedOperation" | "AccessDenied" | "AccessDeniedException" => {
                Self::AccessDenied(detail)
            }
            "AuthFailure" | "ExpiredToken" | "ExpiredTokenException" | "RequestExpired"
            | "InvalidClientTokenId" | "UnrecognizedClientException" => Self::Rejected(detail),
            "ParameterNotFound" | "AssociationDoesNotExist" | "InvalidDocument" => {
                Self::NotFound(detail)
            }
            "ParameterAlreadyExists" | "AssociationAlreadyExists" | "DependencyViolation"
            | "IncorrectState" | "VolumeInUse" => Self::Conflict(detail),
            "InvalidParameterValue" | "InvalidParameter" | "InvalidParameterCombination"
            | "MissingParameter" | "ValidationException" | "UnsupportedOperation" => {
                Self::Malformed(detail)
            }
            code if code.ends_with(".NotFound") => Self::NotFound(detail),
            code if code.ends_with(".Duplicate") => Self::Conflict(detail),
            code if code.ends_with(".Malformed") => Self::Malformed(detail),
            _ => Self::Other(detail),
        }
    }

    /// Classifies an SDK failure. Transport failures are always transient.
    pub(crate) fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: fmt::Debug,
    {
        match err.as_service_error() {
            Some(service) => Self::classify(
                operation,
                service.code().unwrap_or("Unknown"),
                service.message().unwrap_or(""),
            ),
            None => Self::Unavailable(format!("{operation}: {err}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupInfo {
    pub group_id: String,
    pub group_name: Option<String>,
    pub vpc_id: Option<String>,
    pub ingress_rules: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub instance_id: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    pub volume_id: String,
    pub state: Option<String>,
}

impl VolumeInfo {
    pub fn is_available(&self) -> bool {
        self.state.as_deref() == Some("available")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Left unset on overwrite to keep the existing type.
    pub parameter_type: Option<&'a str>,
    pub description: Option<&'a str>,
    pub overwrite: bool,
}

/// Create calls return what the remote API returned, including a missing id
/// or a wrong count; checking the shape is the orchestrator's job.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_security_group(
        &self,
        credential: &Credential,
        request: &CreateSecurityGroupRequest,
    ) -> Result<Option<String>, ProviderError>;

    async fn describe_security_group(
        &self,
        credential: &Credential,
        group_id: &str,
    ) -> Result<SecurityGroupInfo, ProviderError>;

    async fn authorize_ingress(
        &self,
        credential: &Credential,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), ProviderError>;

    async fn delete_security_group(
        &self,
        credential: &Credential,
        group_id: &str,
    ) -> Result<(), ProviderError>;

    async fn run_instance(
        &self,
        credential: &Credential,
        request: &CreateInstanceRequest,
    ) -> Result<Vec<InstanceInfo>, ProviderError>;

    async fn terminate_instance(
        &self,
        credential: &Credential,
        instance_id: &str,
    ) -> Result<(), ProviderError>;

    async fn modify_instance_type(
        &self,
        credential: &Credential,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError>;

    /// Tags any EC2 resource.
    async fn create_tags(
        &self,
        credential: &Credential,
        resource_id: &str,
        tags: &Tags,
    ) -> Result<(), ProviderError>;

    async fn create_volume(
        &self,
        credential: &Credential,
        request: &CreateVolumeRequest,
    ) -> Result<Option<String>, ProviderError>;

    async fn describe_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
    ) -> Result<VolumeInfo, ProviderError>;

    async fn attach_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ProviderError>;

    async fn modify_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
        configuration: &VolumeConfiguration,
    ) -> Result<(), ProviderError>;

    async fn delete_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
    ) -> Result<(), ProviderError>;

    async fn create_snapshot(
        &self,
        credential: &Credential,
        request: &CreateSnapshotRequest,
    ) -> Result<Option<String>, ProviderError>;

    async fn delete_snapshot(
        &self,
        credential: &Credential,
        snapshot_id: &str,
    ) -> Result<(), ProviderError>;

    /// Returns the new parameter version.
    async fn put_parameter(
        &self,
        credential: &Credential,
        spec: &ParameterSpec<'_>,
    ) -> Result<i64, ProviderError>;

    async fn tag_parameter(
        &self,
        credential: &Credential,
        name: &str,
        tags: &Tags,
    ) -> Result<(), ProviderError>;

    async fn delete_parameter(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn create_association(
        &self,
        credential: &Credential,
        request: &CreateAssociationRequest,
    ) -> Result<Option<String>, ProviderError>;

    async fn delete_association(
        &self,
        credential: &Credential,
        association_id: &str,
    ) -> Result<(), ProviderError>;

    async fn describe_managed_instances(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ManagedInstanceStatus>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_throttling() {
        let err = ProviderError::classify("DescribeVolumes", "RequestLimitExceeded", "slow down");
        assert!(err.is_transient());
        assert!(matches!(err, ProviderError::Throttled(_)));
    }

    #[test]
    fn test_classify_not_found_suffix() {
        assert!(matches!(
            ProviderError::classify("DeleteSecurityGroup", "InvalidGroup.NotFound", ""),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            ProviderError::classify("DeleteParameter", "ParameterNotFound", ""),
            ProviderError::NotFound(_)
        ));
    }

    #[test]
    fn test_classify_access_denied() {
        assert!(matches!(
            ProviderError::classify("RunInstances", "UnauthorizedOperation", ""),
            ProviderError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_classify_rejected_credentials() {
        for code in ["AuthFailure", "ExpiredToken", "RequestExpired", "InvalidClientTokenId"] {
            let err = ProviderError::classify("DescribeVolumes", code, "");
            assert!(matches!(err, ProviderError::Rejected(_)), "{code}");
            assert!(err.rejects_credential());
            assert!(!err.is_transient());
        }
        assert!(ProviderError::AccessDenied("no".to_string()).rejects_credential());
        assert!(!ProviderError::NotFound("sg-1".to_string()).rejects_credential());
    }

    #[test]
    fn test_classify_conflicts() {
        assert!(matches!(
            ProviderError::classify("CreateSecurityGroup", "InvalidGroup.Duplicate", ""),
            ProviderError::Conflict(_)
        ));
        assert!(matches!(
            ProviderError::classify("DeleteSecurityGroup", "DependencyViolation", ""),
            ProviderError::Conflict(_)
        ));
    }

    #[test]
    fn test_classify_malformed() {
        assert!(matches!(
            ProviderError::classify("DeleteVolume", "InvalidVolumeID.Malformed", ""),
            ProviderError::Malformed(_)
        ));
        assert!(!ProviderError::classify("PutParameter", "ValidationException", "").is_transient());
    }

    #[test]
    fn test_classify_unknown_is_other() {
        let err = ProviderError::classify("CreateVolume", "Gremlins", "unexpected");
        assert_eq!(
            err,
            ProviderError::Other("CreateVolume: Gremlins: unexpected".to_string())
        );
    }

    #[test]
    fn test_not_found_is_only_waited_on() {
        let missing = ProviderError::NotFound("sg-1".to_string());
        assert!(matches!(missing.clone().into_retry(), RetryError::Stop(_)));
        assert!(matches!(missing.into_wait(), RetryError::Transient(_)));
        assert!(matches!(
            ProviderError::AccessDenied("no".to_string()).into_wait(),
            RetryError::Stop(_)
        ));
    }

    #[test]
    fn test_volume_availability() {
        let volume = VolumeInfo {
            volume_id: "vol-1".to_string(),
            state: Some("creating".to_string()),
        };
        assert!(!volume.is_available());
        assert!(
            VolumeInfo {
                state: Some("available".to_string()),
                ..volume
            }
            .is_available()
        );
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::BTreeMap;
use std::fmt;

use aws_credential_types::Credentials;
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::ZeroizeOnDrop;

use crate::constants::{
    ACCOUNT_ID_LENGTH, MAX_DESCRIPTION_LENGTH, MAX_INGRESS_RULES_COUNT, MAX_NAME_LENGTH,
    MAX_PARAMETER_NAME_LENGTH, MAX_PARAMETER_VALUE_LENGTH, MAX_RESOURCE_ID_LENGTH,
    MAX_TAG_KEY_LENGTH, MAX_TAG_VALUE_LENGTH, MAX_TAGS_COUNT,
};
use crate::errors::AppError;

pub type Tags = BTreeMap<String, String>;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Credential {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "Token")]
    pub session_token: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .finish()
    }
}

impl From<&Credential> for Credentials {
    fn from(credential: &Credential) -> Self {
        Credentials::new(
            credential.access_key_id.clone(),
            credential.secret_access_key.clone(),
            Some(credential.session_token.clone()),
            None,
            "brokered-session",
        )
    }
}

/// Validates a 12 digit AWS account id used as the account selector.
pub fn validate_account_id(account_id: &str) -> Result<(), AppError> {
    if account_id.len() != ACCOUNT_ID_LENGTH || !account_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::ValidationError(format!(
            "invalid account id: {account_id}"
        )));
    }
    Ok(())
}

/// Validates an EC2 style identifier (e.g., "sg-0123abcd", "vol-0a1b2c").
pub fn validate_resource_id(prefix: &str, id: &str) -> Result<(), AppError> {
    let valid = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|suffix| {
            !suffix.is_empty()
                && suffix.len() as u64 <= MAX_RESOURCE_ID_LENGTH
                && suffix.chars().all(|c| c.is_ascii_alphanumeric())
        });
    if !valid {
        return Err(AppError::ValidationError(format!(
            "invalid {prefix} identifier: {id}"
        )));
    }
    Ok(())
}

fn validate_tags(tags: &Tags) -> Result<(), validator::ValidationError> {
    if tags.len() > MAX_TAGS_COUNT {
        return Err(validator::ValidationError::new("too_many_tags"));
    }
    for (key, value) in tags {
        if key.is_empty() || key.len() > MAX_TAG_KEY_LENGTH || key.starts_with("aws:") {
            return Err(validator::ValidationError::new("invalid_tag_key"));
        }
        if value.len() > MAX_TAG_VALUE_LENGTH {
            return Err(validator::ValidationError::new("invalid_tag_value"));
        }
    }
    Ok(())
}

fn validate_ingress_rules_count(rules: &[IngressRule]) -> Result<(), validator::ValidationError> {
    if rules.len() > MAX_INGRESS_RULES_COUNT {
        return Err(validator::ValidationError::new("too_many_ingress_rules"));
    }
    Ok(())
}

fn validate_protocol(protocol: &str) -> Result<(), validator::ValidationError> {
    match protocol {
        "tcp" | "udp" | "icmp" | "icmpv6" | "-1" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_protocol")),
    }
}

/// Validates IPv4 CIDR notation (e.g., "10.0.0.0/16")
fn validate_cidr(cidr: &str) -> Result<(), validator::ValidationError> {
    let invalid = || validator::ValidationError::new("invalid_cidr");
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 || address.parse::<std::net::Ipv4Addr>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

fn validate_parameter_type(parameter_type: &str) -> Result<(), validator::ValidationError> {
    match parameter_type {
        "String" | "StringList" | "SecureString" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_parameter_type")),
    }
}

/// Rejects a dual-purpose update that carries signals for both branches or
/// for neither. An empty tag map is not a signal.
fn exclusive_branch<T>(
    tags: Option<Tags>,
    configuration: Option<T>,
    resource: &str,
) -> Result<Branch<T>, AppError> {
    match (tags.filter(|tags| !tags.is_empty()), configuration) {
        (Some(tags), None) => Ok(Branch::Tags(tags)),
        (None, Some(configuration)) => Ok(Branch::Configuration(configuration)),
        (Some(_), Some(_)) => Err(AppError::ValidationError(format!(
            "{resource} update must set either tags or configuration, not both"
        ))),
        (None, None) => Err(AppError::ValidationError(format!(
            "{resource} update must set either tags or configuration"
        ))),
    }
}

/// The single branch an update request resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Branch<T> {
    Tags(Tags),
    Configuration(T),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngressRule {
    #[validate(custom(function = "validate_protocol"))]
    pub protocol: String,

    #[validate(range(min = 0, max = 65535))]
    pub from_port: i32,

    #[validate(range(min = 0, max = 65535))]
    pub to_port: i32,

    #[validate(custom(function = "validate_cidr"))]
    pub cidr: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = "MAX_DESCRIPTION_LENGTH"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSecurityGroupRequest {
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub name: String,

    #[validate(length(min = 1, max = "MAX_DESCRIPTION_LENGTH"))]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_RESOURCE_ID_LENGTH"))]
    pub vpc_id: Option<String>,

    #[serde(default)]
    #[validate(nested, custom(function = "validate_ingress_rules_count"))]
    pub ingress_rules: Vec<IngressRule>,

    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupResponse {
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    pub ingress_rules: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInstanceRequest {
    #[validate(length(min = 1, max = "MAX_RESOURCE_ID_LENGTH"))]
    pub image_id: String,

    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub instance_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_RESOURCE_ID_LENGTH"))]
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub security_group_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub key_name: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateInstanceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Option<Tags>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub instance_type: Option<String>,
}

impl UpdateInstanceRequest {
    pub fn branch(self) -> Result<Branch<String>, AppError> {
        exclusive_branch(self.tags, self.instance_type, "instance")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedInstanceStatus {
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateVolumeRequest {
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub availability_zone: String,

    #[validate(range(min = 1, max = 16384))]
    pub size_gib: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub volume_type: Option<String>,

    /// Attach to this instance once the volume is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub device: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfiguration {
    pub size_gib: Option<i32>,
    pub volume_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateVolumeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Option<Tags>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 16384))]
    pub size_gib: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub volume_type: Option<String>,
}

impl UpdateVolumeRequest {
    pub fn branch(self) -> Result<Branch<VolumeConfiguration>, AppError> {
        let configuration = match (self.size_gib, self.volume_type) {
            (None, None) => None,
            (size_gib, volume_type) => Some(VolumeConfiguration {
                size_gib,
                volume_type,
            }),
        };
        exclusive_branch(self.tags, configuration, "volume")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSnapshotRequest {
    #[validate(length(min = 1, max = "MAX_RESOURCE_ID_LENGTH"))]
    pub volume_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = "MAX_DESCRIPTION_LENGTH"))]
    pub description: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub snapshot_id: String,
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateParameterRequest {
    #[validate(length(min = 1, max = "MAX_PARAMETER_NAME_LENGTH"))]
    pub name: String,

    #[validate(length(min = 1, max = "MAX_PARAMETER_VALUE_LENGTH"))]
    pub value: String,

    #[serde(default = "default_parameter_type")]
    #[validate(custom(function = "validate_parameter_type"))]
    pub parameter_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = "MAX_DESCRIPTION_LENGTH"))]
    pub description: Option<String>,

    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Tags,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateParameterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Option<Tags>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_PARAMETER_VALUE_LENGTH"))]
    pub value: Option<String>,
}

impl UpdateParameterRequest {
    pub fn branch(self) -> Result<Branch<String>, AppError> {
        exclusive_branch(self.tags, self.value, "parameter")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterResponse {
    pub name: String,
    /// Only set when the value was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAssociationRequest {
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub document_name: String,

    #[validate(length(min = 1, max = "MAX_RESOURCE_ID_LENGTH"))]
    pub instance_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = "MAX_NAME_LENGTH"))]
    pub schedule_expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationResponse {
    pub association_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: String,
}

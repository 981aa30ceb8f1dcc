// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! [`CloudProvider`] backed by the EC2 and SSM SDKs.
//!
//! Clients are built per call from the shared [`SdkConfig`] (region, retry and
//! timeout settings) with the brokered credential as a static credentials
//! provider, so every call runs as exactly the session it was handed.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_ec2::types::{
    AttributeValue, InstanceType, IpPermission, IpRange, ResourceType, Tag, TagSpecification,
    VolumeType,
};
use aws_sdk_ssm::types::{ParameterType, ResourceTypeForTagging, Target};

use super::{CloudProvider, InstanceInfo, ParameterSpec, ProviderError, SecurityGroupInfo, VolumeInfo};
use crate::models::{
    CreateAssociationRequest, CreateInstanceRequest, CreateSecurityGroupRequest,
    CreateSnapshotRequest, CreateVolumeRequest, Credential, IngressRule, ManagedInstanceStatus,
    Tags, VolumeConfiguration,
};

#[derive(Clone)]
pub struct AwsProvider {
    config: SdkConfig,
}

impl AwsProvider {
    pub fn new(config: SdkConfig) -> Self {
        Self { config }
    }

    fn ec2(&self, credential: &Credential) -> aws_sdk_ec2::Client {
        let config = aws_sdk_ec2::config::Builder::from(&self.config)
            .credentials_provider(Credentials::from(credential))
            .build();
        aws_sdk_ec2::Client::from_conf(config)
    }

    fn ssm(&self, credential: &Credential) -> aws_sdk_ssm::Client {
        let config = aws_sdk_ssm::config::Builder::from(&self.config)
            .credentials_provider(Credentials::from(credential))
            .build();
        aws_sdk_ssm::Client::from_conf(config)
    }
}

fn ec2_tags(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

/// Tag-on-create specification, omitted when there is nothing to tag.
fn tag_specifications(resource_type: ResourceType, tags: &Tags) -> Option<Vec<TagSpecification>> {
    if tags.is_empty() {
        return None;
    }
    Some(vec![
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(ec2_tags(tags)))
            .build(),
    ])
}

fn ip_permission(rule: &IngressRule) -> IpPermission {
    IpPermission::builder()
        .ip_protocol(&rule.protocol)
        .from_port(rule.from_port)
        .to_port(rule.to_port)
        .ip_ranges(
            IpRange::builder()
                .cidr_ip(&rule.cidr)
                .set_description(rule.description.clone())
                .build(),
        )
        .build()
}

fn instance_info(instance: &aws_sdk_ec2::types::Instance) -> InstanceInfo {
    InstanceInfo {
        instance_id: instance.instance_id().map(str::to_string),
        state: instance
            .state()
            .and_then(|state| state.name())
            .map(|name| name.as_str().to_string()),
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn create_security_group(
        &self,
        credential: &Credential,
        request: &CreateSecurityGroupRequest,
    ) -> Result<Option<String>, ProviderError> {
        let output = self
            .ec2(credential)
            .create_security_group()
            .group_name(&request.name)
            .description(&request.description)
            .set_vpc_id(request.vpc_id.clone())
            .set_tag_specifications(tag_specifications(ResourceType::SecurityGroup, &request.tags))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateSecurityGroup", e))?;

        Ok(output.group_id().map(str::to_string))
    }

    async fn describe_security_group(
        &self,
        credential: &Credential,
        group_id: &str,
    ) -> Result<SecurityGroupInfo, ProviderError> {
        let output = self
            .ec2(credential)
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DescribeSecurityGroups", e))?;

        let group = output
            .security_groups()
            .iter()
            .find(|group| group.group_id() == Some(group_id))
            .ok_or_else(|| ProviderError::NotFound(format!("security group {group_id}")))?;

        Ok(SecurityGroupInfo {
            group_id: group_id.to_string(),
            group_name: group.group_name().map(str::to_string),
            vpc_id: group.vpc_id().map(str::to_string),
            ingress_rules: group.ip_permissions().len(),
        })
    }

    async fn authorize_ingress(
        &self,
        credential: &Credential,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(rules.iter().map(ip_permission).collect()))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("AuthorizeSecurityGroupIngress", e))?;
        Ok(())
    }

    async fn delete_security_group(
        &self,
        credential: &Credential,
        group_id: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteSecurityGroup", e))?;
        Ok(())
    }

    async fn run_instance(
        &self,
        credential: &Credential,
        request: &CreateInstanceRequest,
    ) -> Result<Vec<InstanceInfo>, ProviderError> {
        let security_groups =
            (!request.security_group_ids.is_empty()).then(|| request.security_group_ids.clone());

        let output = self
            .ec2(credential)
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .set_subnet_id(request.subnet_id.clone())
            .set_security_group_ids(security_groups)
            .set_key_name(request.key_name.clone())
            .set_tag_specifications(tag_specifications(ResourceType::Instance, &request.tags))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("RunInstances", e))?;

        Ok(output.instances().iter().map(instance_info).collect())
    }

    async fn terminate_instance(
        &self,
        credential: &Credential,
        instance_id: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("TerminateInstances", e))?;
        Ok(())
    }

    async fn modify_instance_type(
        &self,
        credential: &Credential,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .modify_instance_attribute()
            .instance_id(instance_id)
            .instance_type(AttributeValue::builder().value(instance_type).build())
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("ModifyInstanceAttribute", e))?;
        Ok(())
    }

    async fn create_tags(
        &self,
        credential: &Credential,
        resource_id: &str,
        tags: &Tags,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(ec2_tags(tags)))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateTags", e))?;
        Ok(())
    }

    async fn create_volume(
        &self,
        credential: &Credential,
        request: &CreateVolumeRequest,
    ) -> Result<Option<String>, ProviderError> {
        let output = self
            .ec2(credential)
            .create_volume()
            .availability_zone(&request.availability_zone)
            .size(request.size_gib)
            .set_volume_type(request.volume_type.as_deref().map(VolumeType::from))
            .set_tag_specifications(tag_specifications(ResourceType::Volume, &request.tags))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateVolume", e))?;

        Ok(output.volume_id().map(str::to_string))
    }

    async fn describe_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
    ) -> Result<VolumeInfo, ProviderError> {
        let output = self
            .ec2(credential)
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DescribeVolumes", e))?;

        let volume = output
            .volumes()
            .iter()
            .find(|volume| volume.volume_id() == Some(volume_id))
            .ok_or_else(|| ProviderError::NotFound(format!("volume {volume_id}")))?;

        Ok(VolumeInfo {
            volume_id: volume_id.to_string(),
            state: volume.state().map(|state| state.as_str().to_string()),
        })
    }

    async fn attach_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .attach_volume()
            .volume_id(volume_id)
            .instance_id(instance_id)
            .device(device)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("AttachVolume", e))?;
        Ok(())
    }

    async fn modify_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
        configuration: &VolumeConfiguration,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .modify_volume()
            .volume_id(volume_id)
            .set_size(configuration.size_gib)
            .set_volume_type(configuration.volume_type.as_deref().map(VolumeType::from))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("ModifyVolume", e))?;
        Ok(())
    }

    async fn delete_volume(
        &self,
        credential: &Credential,
        volume_id: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .delete_volume()
            .volume_id(volume_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteVolume", e))?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        credential: &Credential,
        request: &CreateSnapshotRequest,
    ) -> Result<Option<String>, ProviderError> {
        let output = self
            .ec2(credential)
            .create_snapshot()
            .volume_id(&request.volume_id)
            .set_description(request.description.clone())
            .set_tag_specifications(tag_specifications(ResourceType::Snapshot, &request.tags))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateSnapshot", e))?;

        Ok(output.snapshot_id().map(str::to_string))
    }

    async fn delete_snapshot(
        &self,
        credential: &Credential,
        snapshot_id: &str,
    ) -> Result<(), ProviderError> {
        self.ec2(credential)
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteSnapshot", e))?;
        Ok(())
    }

    async fn put_parameter(
        &self,
        credential: &Credential,
        spec: &ParameterSpec<'_>,
    ) -> Result<i64, ProviderError> {
        let output = self
            .ssm(credential)
            .put_parameter()
            .name(spec.name)
            .value(spec.value)
            .set_type(spec.parameter_type.map(ParameterType::from))
            .set_description(spec.description.map(str::to_string))
            .overwrite(spec.overwrite)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("PutParameter", e))?;

        Ok(output.version())
    }

    async fn tag_parameter(
        &self,
        credential: &Credential,
        name: &str,
        tags: &Tags,
    ) -> Result<(), ProviderError> {
        let tags = tags
            .iter()
            .map(|(key, value)| {
                aws_sdk_ssm::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(|e| ProviderError::Malformed(format!("AddTagsToResource: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ssm(credential)
            .add_tags_to_resource()
            .resource_type(ResourceTypeForTagging::Parameter)
            .resource_id(name)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("AddTagsToResource", e))?;
        Ok(())
    }

    async fn delete_parameter(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.ssm(credential)
            .delete_parameter()
            .name(name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteParameter", e))?;
        Ok(())
    }

    async fn create_association(
        &self,
        credential: &Credential,
        request: &CreateAssociationRequest,
    ) -> Result<Option<String>, ProviderError> {
        let output = self
            .ssm(credential)
            .create_association()
            .name(&request.document_name)
            .targets(
                Target::builder()
                    .key("InstanceIds")
                    .values(&request.instance_id)
                    .build(),
            )
            .set_schedule_expression(request.schedule_expression.clone())
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateAssociation", e))?;

        Ok(output
            .association_description()
            .and_then(|description| description.association_id())
            .map(str::to_string))
    }

    async fn delete_association(
        &self,
        credential: &Credential,
        association_id: &str,
    ) -> Result<(), ProviderError> {
        self.ssm(credential)
            .delete_association()
            .association_id(association_id)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteAssociation", e))?;
        Ok(())
    }

    async fn describe_managed_instances(
        &self,
        credential: &Credential,
    ) -> Result<Vec<ManagedInstanceStatus>, ProviderError> {
        let items = self
            .ssm(credential)
            .describe_instance_information()
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .map_err(|e| ProviderError::from_sdk("DescribeInstanceInformation", e))?;

        Ok(items
            .iter()
            .filter_map(|info| {
                Some(ManagedInstanceStatus {
                    instance_id: info.instance_id()?.to_string(),
                    ping_status: info.ping_status().map(|s| s.as_str().to_string()),
                    platform_name: info.platform_name().map(str::to_string),
                    agent_version: info.agent_version().map(str::to_string),
                })
            })
            .collect())
    }
}

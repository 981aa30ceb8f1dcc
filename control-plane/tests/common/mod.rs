// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Stateful in-memory stand-ins for STS, EC2 and SSM used by the HTTP tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum_test::TestServer;
use control_plane::application::{AppState, create_router};
use control_plane::broker::{BrokerError, CredentialBroker, Grant, SessionRequest, TrustExchange};
use control_plane::cache::SessionCache;
use control_plane::configuration::ControlPlaneOptions;
use control_plane::models::{
    CreateAssociationRequest, CreateInstanceRequest, CreateSecurityGroupRequest,
    CreateSnapshotRequest, CreateVolumeRequest, Credential, IngressRule, ManagedInstanceStatus,
    Tags, VolumeConfiguration,
};
use control_plane::orchestrators::{ControlPlane, Settings};
use control_plane::policy::PolicyGenerator;
use control_plane::provider::{
    CloudProvider, InstanceInfo, ParameterSpec, ProviderError, SecurityGroupInfo, VolumeInfo,
};

pub const ACCOUNT: &str = "123456789012";

/// Grants a fixed credential to every assumption, or denies all of them.
#[derive(Default)]
pub struct StaticExchange {
    calls: AtomicU32,
    pub deny: AtomicBool,
    policies: Mutex<Vec<Option<String>>>,
}

impl StaticExchange {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn policies(&self) -> Vec<Option<String>> {
        self.policies.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrustExchange for StaticExchange {
    async fn assume_role(
        &self,
        _request: &SessionRequest,
        policy: Option<&str>,
        duration: Duration,
    ) -> Result<Grant, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.policies
            .lock()
            .unwrap()
            .push(policy.map(str::to_string));
        if self.deny.load(Ordering::SeqCst) {
            return Err(BrokerError::Forbidden(
                "not authorized to perform sts:AssumeRole".to_string(),
            ));
        }
        Ok(Grant {
            credential: Credential {
                access_key_id: "ASIATESTACCESSKEY".to_string(),
                secret_access_key: "test-secret".to_string(),
                session_token: "test-token".to_string(),
            },
            expires_at: SystemTime::now() + duration,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Resource {
    SecurityGroup { name: String, rules: usize },
    Instance { instance_type: String },
    Volume { attached_to: Option<String> },
    Snapshot,
    Parameter { value: String, version: i64 },
    Association,
}

/// An account whose resources live in a map keyed by id.
#[derive(Default)]
pub struct InMemoryCloud {
    resources: Mutex<HashMap<String, Resource>>,
    sequence: AtomicU32,
    /// `authorize_ingress` rejects every rule.
    pub reject_ingress: AtomicBool,
}

impl InMemoryCloud {
    pub fn contains(&self, id: &str) -> bool {
        self.resources.lock().unwrap().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Resource> {
        self.resources.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n:08x}")
    }

    fn insert(&self, id: &str, resource: Resource) {
        self.resources.lock().unwrap().insert(id.to_string(), resource);
    }

    fn remove(&self, id: &str, code: &str) -> Result<(), ProviderError> {
        match self.resources.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("{code}: {id}"))),
        }
    }

    fn update(
        &self,
        id: &str,
        code: &str,
        apply: impl FnOnce(&mut Resource),
    ) -> Result<(), ProviderError> {
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("{code}: {id}")))?;
        apply(resource);
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for InMemoryCloud {
    async fn create_security_group(
        &self,
        _credential: &Credential,
        request: &CreateSecurityGroupRequest,
    ) -> Result<Option<String>, ProviderError> {
        let id = self.next_id("sg");
        self.insert(
            &id,
            Resource::SecurityGroup {
                name: request.name.clone(),
                rules: 0,
            },
        );
        Ok(Some(id))
    }

    async fn describe_security_group(
        &self,
        _credential: &Credential,
        group_id: &str,
    ) -> Result<SecurityGroupInfo, ProviderError> {
        match self.get(group_id) {
            Some(Resource::SecurityGroup { name, rules }) => Ok(SecurityGroupInfo {
                group_id: group_id.to_string(),
                group_name: Some(name),
                vpc_id: None,
                ingress_rules: rules,
            }),
            _ => Err(ProviderError::NotFound(format!(
                "InvalidGroup.NotFound: {group_id}"
            ))),
        }
    }

    async fn authorize_ingress(
        &self,
        _credential: &Credential,
        group_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), ProviderError> {
        if self.reject_ingress.load(Ordering::SeqCst) {
            return Err(ProviderError::Malformed(
                "InvalidParameterValue: invalid port range".to_string(),
            ));
        }
        self.update(group_id, "InvalidGroup.NotFound", |resource| {
            if let Resource::SecurityGroup { rules: count, .. } = resource {
                *count += rules.len();
            }
        })
    }

    async fn delete_security_group(
        &self,
        _credential: &Credential,
        group_id: &str,
    ) -> Result<(), ProviderError> {
        self.remove(group_id, "InvalidGroup.NotFound")
    }

    async fn run_instance(
        &self,
        _credential: &Credential,
        request: &CreateInstanceRequest,
    ) -> Result<Vec<InstanceInfo>, ProviderError> {
        let id = self.next_id("i");
        self.insert(
            &id,
            Resource::Instance {
                instance_type: request.instance_type.clone(),
            },
        );
        Ok(vec![InstanceInfo {
            instance_id: Some(id),
            state: Some("pending".to_string()),
        }])
    }

    async fn terminate_instance(
        &self,
        _credential: &Credential,
        instance_id: &str,
    ) -> Result<(), ProviderError> {
        self.remove(instance_id, "InvalidInstanceID.NotFound")
    }

    async fn modify_instance_type(
        &self,
        _credential: &Credential,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError> {
        self.update(instance_id, "InvalidInstanceID.NotFound", |resource| {
            if let Resource::Instance { instance_type: current } = resource {
                *current = instance_type.to_string();
            }
        })
    }

    async fn create_tags(
        &self,
        _credential: &Credential,
        resource_id: &str,
        _tags: &Tags,
    ) -> Result<(), ProviderError> {
        self.update(resource_id, "InvalidID.NotFound", |_| {})
    }

    async fn create_volume(
        &self,
        _credential: &Credential,
        _request: &CreateVolumeRequest,
    ) -> Result<Option<String>, ProviderError> {
        let id = self.next_id("vol");
        self.insert(&id, Resource::Volume { attached_to: None });
        Ok(Some(id))
    }

    async fn describe_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
    ) -> Result<VolumeInfo, ProviderError> {
        match self.get(volume_id) {
            Some(Resource::Volume { attached_to }) => {
                let state = match attached_to {
                    Some(_) => "in-use",
                    None => "available",
                };
                Ok(VolumeInfo {
                    volume_id: volume_id.to_string(),
                    state: Some(state.to_string()),
                })
            }
            _ => Err(ProviderError::NotFound(format!(
                "InvalidVolume.NotFound: {volume_id}"
            ))),
        }
    }

    async fn attach_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
        instance_id: &str,
        _device: &str,
    ) -> Result<(), ProviderError> {
        if !self.contains(instance_id) {
            return Err(ProviderError::NotFound(format!(
                "InvalidInstanceID.NotFound: {instance_id}"
            )));
        }
        self.update(volume_id, "InvalidVolume.NotFound", |resource| {
            if let Resource::Volume { attached_to } = resource {
                *attached_to = Some(instance_id.to_string());
            }
        })
    }

    async fn modify_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
        _configuration: &VolumeConfiguration,
    ) -> Result<(), ProviderError> {
        self.update(volume_id, "InvalidVolume.NotFound", |_| {})
    }

    async fn delete_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
    ) -> Result<(), ProviderError> {
        self.remove(volume_id, "InvalidVolume.NotFound")
    }

    async fn create_snapshot(
        &self,
        _credential: &Credential,
        request: &CreateSnapshotRequest,
    ) -> Result<Option<String>, ProviderError> {
        if !self.contains(&request.volume_id) {
            return Err(ProviderError::NotFound(format!(
                "InvalidVolume.NotFound: {}",
                request.volume_id
            )));
        }
        let id = self.next_id("snap");
        self.insert(&id, Resource::Snapshot);
        Ok(Some(id))
    }

    async fn delete_snapshot(
        &self,
        _credential: &Credential,
        snapshot_id: &str,
    ) -> Result<(), ProviderError> {
        self.remove(snapshot_id, "InvalidSnapshot.NotFound")
    }

    async fn put_parameter(
        &self,
        _credential: &Credential,
        spec: &ParameterSpec<'_>,
    ) -> Result<i64, ProviderError> {
        let mut resources = self.resources.lock().unwrap();
        match resources.get_mut(spec.name) {
            Some(Resource::Parameter { value, version }) if spec.overwrite => {
                *value = spec.value.to_string();
                *version += 1;
                Ok(*version)
            }
            Some(_) => Err(ProviderError::Conflict(format!(
                "ParameterAlreadyExists: {}",
                spec.name
            ))),
            None if spec.overwrite => Err(ProviderError::NotFound(format!(
                "ParameterNotFound: {}",
                spec.name
            ))),
            None => {
                resources.insert(
                    spec.name.to_string(),
                    Resource::Parameter {
                        value: spec.value.to_string(),
                        version: 1,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn tag_parameter(
        &self,
        _credential: &Credential,
        name: &str,
        _tags: &Tags,
    ) -> Result<(), ProviderError> {
        self.update(name, "InvalidResourceId", |_| {})
    }

    async fn delete_parameter(
        &self,
        _credential: &Credential,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.remove(name, "ParameterNotFound")
    }

    async fn create_association(
        &self,
        _credential: &Credential,
        request: &CreateAssociationRequest,
    ) -> Result<Option<String>, ProviderError> {
        if !self.contains(&request.instance_id) {
            return Err(ProviderError::Malformed(format!(
                "InvalidInstanceId: {}",
                request.instance_id
            )));
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("8dfe3659-4309-493a-8755-{n:012x}");
        self.insert(&id, Resource::Association);
        Ok(Some(id))
    }

    async fn delete_association(
        &self,
        _credential: &Credential,
        association_id: &str,
    ) -> Result<(), ProviderError> {
        self.remove(association_id, "AssociationDoesNotExist")
    }

    async fn describe_managed_instances(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<ManagedInstanceStatus>, ProviderError> {
        let resources = self.resources.lock().unwrap();
        let mut instances: Vec<ManagedInstanceStatus> = resources
            .iter()
            .filter(|(_, resource)| matches!(resource, Resource::Instance { .. }))
            .map(|(id, _)| ManagedInstanceStatus {
                instance_id: id.clone(),
                ping_status: Some("Online".to_string()),
                platform_name: Some("Amazon Linux".to_string()),
                agent_version: None,
            })
            .collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(instances)
    }
}

/// The router wired to in-memory collaborators.
pub struct TestApp {
    pub server: TestServer,
    pub cloud: Arc<InMemoryCloud>,
    pub exchange: Arc<StaticExchange>,
}

impl TestApp {
    pub fn new() -> Self {
        let cloud = Arc::new(InMemoryCloud::default());
        let exchange = Arc::new(StaticExchange::default());

        let mut settings = Settings::new("us-east-1", "ControlPlaneAccess", "ext-123");
        settings.retry_attempts = 2;
        settings.retry_delay = Duration::from_millis(1);

        let broker = Arc::new(CredentialBroker::new(
            exchange.clone(),
            Arc::new(SessionCache::new(Duration::from_secs(600))),
            Duration::from_secs(900),
            2,
            Duration::from_millis(1),
        ));
        let control = ControlPlane::new(
            broker,
            cloud.clone(),
            Arc::new(PolicyGenerator::default()),
            settings,
        );

        let app = create_router(AppState {
            options: ControlPlaneOptions::default(),
            control,
        });

        Self {
            server: TestServer::new(app).unwrap(),
            cloud,
            exchange,
        }
    }

    pub fn path(resource: &str) -> String {
        format!("/accounts/{ACCOUNT}/{resource}")
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory doubles for orchestration tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::{ControlPlane, Orchestrator, Settings};
use crate::broker::{
    BrokerError, BrokeredSession, CredentialBroker, Grant, SessionRequest, TrustExchange,
};
use crate::cache::SessionCache;
use crate::models::{
    CreateAssociationRequest, CreateInstanceRequest, CreateSecurityGroupRequest,
    CreateSnapshotRequest, CreateVolumeRequest, Credential, IngressRule, ManagedInstanceStatus,
    Tags, VolumeConfiguration,
};
use crate::errors::AppError;
use crate::policy::PolicyGenerator;
use crate::provider::{
    CloudProvider, InstanceInfo, ParameterSpec, ProviderError, SecurityGroupInfo, VolumeInfo,
};
use crate::rollback::{Compensator, RollbackCoordinator, RollbackTask, Transaction};

pub(crate) const GROUP_ID: &str = "sg-0123abcd";
pub(crate) const INSTANCE_ID: &str = "i-0123abcd";
pub(crate) const VOLUME_ID: &str = "vol-0123abcd";
pub(crate) const SNAPSHOT_ID: &str = "snap-0123abcd";
pub(crate) const ASSOCIATION_ID: &str = "8dfe3659-4309-493a-8755-0123456789ab";

/// Records every call as `"<operation> <subject>"` and fails the operations
/// it was scripted to fail.
pub(crate) struct ScriptedProvider {
    calls: Mutex<Vec<String>>,
    failures: HashMap<&'static str, ProviderError>,
    /// Instances reported by `run_instance`.
    pub instances_returned: usize,
    /// Create calls succeed without an identifier.
    pub omit_ids: bool,
    /// Describe calls that report the resource as not ready yet.
    pub pending_polls: AtomicU32,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: HashMap::new(),
            instances_returned: 1,
            omit_ids: false,
            pending_polls: AtomicU32::new(0),
        }
    }
}

impl ScriptedProvider {
    pub fn failing(operation: &'static str, error: ProviderError) -> Self {
        Self::default().with_failure(operation, error)
    }

    pub fn with_failure(mut self, operation: &'static str, error: ProviderError) -> Self {
        self.failures.insert(operation, error);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, subject: &str) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation} {subject}"));
        match self.failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn pending(&self) -> bool {
        self.pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn created(&self, id: &str) -> Option<String> {
        (!self.omit_ids).then(|| id.to_string())
    }
}

#[async_trait]
impl CloudProvider for ScriptedProvider {
    async fn create_security_group(
        &self,
        _credential: &Credential,
        request: &CreateSecurityGroupRequest,
    ) -> Result<Option<String>, ProviderError> {
        self.record("create_security_group", &request.name)?;
        Ok(self.created(GROUP_ID))
    }

    async fn describe_security_group(
        &self,
        _credential: &Credential,
        group_id: &str,
    ) -> Result<SecurityGroupInfo, ProviderError> {
        self.record("describe_security_group", group_id)?;
        if self.pending() {
            return Err(ProviderError::NotFound(format!("InvalidGroup.NotFound {group_id}")));
        }
        Ok(SecurityGroupInfo {
            group_id: group_id.to_string(),
            group_name: Some("web".to_string()),
            vpc_id: Some("vpc-0abc".to_string()),
            ingress_rules: 0,
        })
    }

    async fn authorize_ingress(
        &self,
        _credential: &Credential,
        group_id: &str,
        _rules: &[IngressRule],
    ) -> Result<(), ProviderError> {
        self.record("authorize_ingress", group_id)
    }

    async fn delete_security_group(
        &self,
        _credential: &Credential,
        group_id: &str,
    ) -> Result<(), ProviderError> {
        self.record("delete_security_group", group_id)
    }

    async fn run_instance(
        &self,
        _credential: &Credential,
        request: &CreateInstanceRequest,
    ) -> Result<Vec<InstanceInfo>, ProviderError> {
        self.record("run_instance", &request.image_id)?;
        Ok((0..self.instances_returned)
            .map(|n| {
                let id = match n {
                    0 => INSTANCE_ID.to_string(),
                    n => format!("i-0extra{n}"),
                };
                InstanceInfo {
                    instance_id: self.created(&id),
                    state: Some("pending".to_string()),
                }
            })
            .collect())
    }

    async fn terminate_instance(
        &self,
        _credential: &Credential,
        instance_id: &str,
    ) -> Result<(), ProviderError> {
        self.record("terminate_instance", instance_id)
    }

    async fn modify_instance_type(
        &self,
        _credential: &Credential,
        instance_id: &str,
        _instance_type: &str,
    ) -> Result<(), ProviderError> {
        self.record("modify_instance_type", instance_id)
    }

    async fn create_tags(
        &self,
        _credential: &Credential,
        resource_id: &str,
        _tags: &Tags,
    ) -> Result<(), ProviderError> {
        self.record("create_tags", resource_id)
    }

    async fn create_volume(
        &self,
        _credential: &Credential,
        request: &CreateVolumeRequest,
    ) -> Result<Option<String>, ProviderError> {
        self.record("create_volume", &request.availability_zone)?;
        Ok(self.created(VOLUME_ID))
    }

    async fn describe_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
    ) -> Result<VolumeInfo, ProviderError> {
        self.record("describe_volume", volume_id)?;
        let state = if self.pending() { "creating" } else { "available" };
        Ok(VolumeInfo {
            volume_id: volume_id.to_string(),
            state: Some(state.to_string()),
        })
    }

    async fn attach_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
        _instance_id: &str,
        _device: &str,
    ) -> Result<(), ProviderError> {
        self.record("attach_volume", volume_id)
    }

    async fn modify_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
        _configuration: &VolumeConfiguration,
    ) -> Result<(), ProviderError> {
        self.record("modify_volume", volume_id)
    }

    async fn delete_volume(
        &self,
        _credential: &Credential,
        volume_id: &str,
    ) -> Result<(), ProviderError> {
        self.record("delete_volume", volume_id)
    }

    async fn create_snapshot(
        &self,
        _credential: &Credential,
        request: &CreateSnapshotRequest,
    ) -> Result<Option<String>, ProviderError> {
        self.record("create_snapshot", &request.volume_id)?;
        Ok(self.created(SNAPSHOT_ID))
    }

    async fn delete_snapshot(
        &self,
        _credential: &Credential,
        snapshot_id: &str,
    ) -> Result<(), ProviderError> {
        self.record("delete_snapshot", snapshot_id)
    }

    async fn put_parameter(
        &self,
        _credential: &Credential,
        spec: &ParameterSpec<'_>,
    ) -> Result<i64, ProviderError> {
        self.record("put_parameter", spec.name)?;
        Ok(if spec.overwrite { 2 } else { 1 })
    }

    async fn tag_parameter(
        &self,
        _credential: &Credential,
        name: &str,
        _tags: &Tags,
    ) -> Result<(), ProviderError> {
        self.record("tag_parameter", name)
    }

    async fn delete_parameter(
        &self,
        _credential: &Credential,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.record("delete_parameter", name)
    }

    async fn create_association(
        &self,
        _credential: &Credential,
        request: &CreateAssociationRequest,
    ) -> Result<Option<String>, ProviderError> {
        self.record("create_association", &request.document_name)?;
        Ok(self.created(ASSOCIATION_ID))
    }

    async fn delete_association(
        &self,
        _credential: &Credential,
        association_id: &str,
    ) -> Result<(), ProviderError> {
        self.record("delete_association", association_id)
    }

    async fn describe_managed_instances(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<ManagedInstanceStatus>, ProviderError> {
        self.record("describe_managed_instances", "*")?;
        Ok(vec![ManagedInstanceStatus {
            instance_id: INSTANCE_ID.to_string(),
            ping_status: Some("Online".to_string()),
            platform_name: Some("Amazon Linux".to_string()),
            agent_version: Some("3.3.0.0".to_string()),
        }])
    }
}

/// Grants every request and records the policy it was asked for.
#[derive(Default)]
pub(crate) struct RecordingExchange {
    calls: AtomicU32,
    policies: Mutex<Vec<String>>,
    managed: Mutex<Vec<Vec<String>>>,
    /// Exchanges that fail with throttling before grants resume.
    pub throttled: AtomicU32,
}

impl RecordingExchange {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inline policies of every exchange, `"managed"` when none was sent.
    pub fn policies(&self) -> Vec<String> {
        self.policies.lock().unwrap().clone()
    }

    /// Managed policy ARNs of every exchange.
    pub fn managed_policies(&self) -> Vec<Vec<String>> {
        self.managed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrustExchange for RecordingExchange {
    async fn assume_role(
        &self,
        request: &SessionRequest,
        policy: Option<&str>,
        duration: Duration,
    ) -> Result<Grant, BrokerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.managed
            .lock()
            .unwrap()
            .push(request.managed_policy_arns.clone());
        if self
            .throttled
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::Transient("Throttling".to_string()));
        }
        self.policies
            .lock()
            .unwrap()
            .push(policy.unwrap_or("managed").to_string());
        Ok(Grant {
            credential: Credential {
                access_key_id: format!("ASIA{n}"),
                secret_access_key: "secret".to_string(),
                session_token: "token".to_string(),
            },
            expires_at: SystemTime::now() + duration,
        })
    }
}

pub(crate) struct Harness {
    pub control: ControlPlane,
    pub provider: Arc<ScriptedProvider>,
    pub exchange: Arc<RecordingExchange>,
}

fn recording_broker(exchange: Arc<RecordingExchange>) -> Arc<CredentialBroker> {
    Arc::new(CredentialBroker::new(
        exchange,
        Arc::new(SessionCache::new(Duration::from_secs(600))),
        Duration::from_secs(900),
        3,
        Duration::from_millis(1),
    ))
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::in_partition(provider, "aws")
    }

    pub fn in_partition(provider: ScriptedProvider, partition: &str) -> Self {
        let provider = Arc::new(provider);
        let exchange = Arc::new(RecordingExchange::default());
        let broker = recording_broker(exchange.clone());

        let mut settings = Settings::new("us-east-1", "ControlPlaneAccess", "ext-123");
        settings.partition = partition.to_string();
        settings.retry_attempts = 3;
        settings.retry_delay = Duration::from_millis(1);

        let control = ControlPlane::new(
            broker,
            provider.clone(),
            Arc::new(PolicyGenerator::default()),
            settings,
        );

        Self {
            control,
            provider,
            exchange,
        }
    }
}

/// Records compensations without running them.
#[derive(Default)]
pub(crate) struct RecordingCompensator {
    attempted: Mutex<Vec<RollbackTask>>,
}

impl RecordingCompensator {
    pub fn attempted(&self) -> Vec<RollbackTask> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compensator for RecordingCompensator {
    async fn compensate(&self, task: &RollbackTask) -> Result<(), AppError> {
        self.attempted.lock().unwrap().push(task.clone());
        Ok(())
    }
}

pub(crate) fn transaction(compensator: Arc<RecordingCompensator>) -> Transaction {
    Transaction::new(Arc::new(RollbackCoordinator::new(
        compensator,
        Duration::from_secs(5),
    )))
}

/// An orchestrator bound to a pre-brokered session.
pub(crate) fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
    let session = BrokeredSession {
        credential: Credential {
            access_key_id: "ASIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
        },
        expires_at: SystemTime::now() + Duration::from_secs(900),
        request_hash: "hash".to_string(),
    };
    let broker = recording_broker(Arc::new(RecordingExchange::default()));
    Orchestrator::new(provider, broker, session, 3, Duration::from_millis(1))
}

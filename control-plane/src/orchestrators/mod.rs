// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Multi-step resource lifecycle operations.
//!
//! A request enters through a [`ControlPlane`] method, which:
//!
//! 1. validates the input (no remote call happens for invalid input)
//! 2. generates the least-privilege document for the operation
//! 3. brokers a session for the target account
//! 4. binds an [`Orchestrator`] to that session and runs the steps
//!
//! Every step that creates durable state pushes a
//! [`RollbackTask`] onto the request's
//! [`Transaction`]. The transaction is committed on success and aborted on
//! failure; the caller always sees the error of the failed step.

pub mod association;
pub mod instance;
pub mod parameter;
pub mod security_group;
pub mod snapshot;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{BrokeredSession, CredentialBroker, SessionRequest};
use crate::constants::{
    DEFAULT_PARTITION, REQUEST_TIMEOUT, RETRY_INITIAL_DELAY, RETRY_MAX_ATTEMPTS, ROLLBACK_TIMEOUT,
};
use crate::errors::AppError;
use crate::models::{Credential, validate_account_id};
use crate::policy::{AccountScope, AuthorizationDocument, PolicyGenerator};
use crate::provider::{CloudProvider, ProviderError};
use crate::retry::{RetryError, retry};
use crate::rollback::{Compensator, RollbackCoordinator, RollbackTask, Transaction};

/// Deployment-wide settings of the orchestration layer.
#[derive(Clone)]
pub struct Settings {
    pub partition: String,
    pub region: String,
    /// Name of the role assumed in every target account.
    pub role_name: String,
    external_id: String,
    pub request_timeout: Duration,
    pub rollback_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Settings {
    pub fn new(
        region: impl Into<String>,
        role_name: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            region: region.into(),
            role_name: role_name.into(),
            external_id: external_id.into(),
            request_timeout: REQUEST_TIMEOUT,
            rollback_timeout: ROLLBACK_TIMEOUT,
            retry_attempts: RETRY_MAX_ATTEMPTS,
            retry_delay: RETRY_INITIAL_DELAY,
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }
}

// Custom Debug implementation so the external id never reaches the logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("partition", &self.partition)
            .field("region", &self.region)
            .field("role_name", &self.role_name)
            .field("external_id", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("rollback_timeout", &self.rollback_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Entry point of the orchestration layer, shared by all requests.
#[derive(Clone)]
pub struct ControlPlane {
    broker: Arc<CredentialBroker>,
    provider: Arc<dyn CloudProvider>,
    policies: Arc<PolicyGenerator>,
    settings: Arc<Settings>,
}

impl ControlPlane {
    pub fn new(
        broker: Arc<CredentialBroker>,
        provider: Arc<dyn CloudProvider>,
        policies: Arc<PolicyGenerator>,
        settings: Settings,
    ) -> Self {
        Self {
            broker,
            provider,
            policies,
            settings: Arc::new(settings),
        }
    }

    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolves the account selector of a request.
    pub fn scope(&self, account_id: &str) -> Result<AccountScope, AppError> {
        validate_account_id(account_id)?;
        Ok(AccountScope {
            partition: self.settings.partition.clone(),
            region: self.settings.region.clone(),
            account_id: account_id.to_string(),
        })
    }

    fn session_request(&self, scope: &AccountScope) -> SessionRequest {
        SessionRequest::new(
            scope.role_arn(&self.settings.role_name),
            self.settings.external_id(),
        )
    }

    /// Brokers a session scoped by `document` and binds an orchestrator to it.
    async fn bind(
        &self,
        scope: &AccountScope,
        document: AuthorizationDocument,
    ) -> Result<Orchestrator, AppError> {
        let request = self.session_request(scope).with_document(document);
        let session = self.broker.assume(request).await?;
        Ok(self.orchestrator(session))
    }

    /// Read-only paths are covered by pre-existing AWS managed policies.
    async fn bind_read_only(
        &self,
        scope: &AccountScope,
        managed_policy: &str,
    ) -> Result<Orchestrator, AppError> {
        let request = self
            .session_request(scope)
            .with_managed_policies([scope.managed_policy_arn(managed_policy)]);
        let session = self.broker.assume(request).await?;
        Ok(self.orchestrator(session))
    }

    /// Rollback steps are single-pass, brokering included.
    async fn bind_once(
        &self,
        scope: &AccountScope,
        document: AuthorizationDocument,
    ) -> Result<Orchestrator, AppError> {
        let request = self.session_request(scope).with_document(document);
        let session = self.broker.assume_once(request).await?;
        Ok(self.orchestrator(session))
    }

    fn orchestrator(&self, session: BrokeredSession) -> Orchestrator {
        Orchestrator::new(
            self.provider.clone(),
            self.broker.clone(),
            session,
            self.settings.retry_attempts,
            self.settings.retry_delay,
        )
    }

    /// Opens the rollback stack of one request against `scope`.
    fn transaction(&self, scope: &AccountScope) -> Transaction {
        let compensator = BrokeredCompensator {
            control: self.clone(),
            scope: scope.clone(),
        };
        let coordinator = RollbackCoordinator::new(Arc::new(compensator), self.settings.rollback_timeout);
        Transaction::new(Arc::new(coordinator))
    }

    /// Runs an orchestration under the request timeout. A transaction dropped
    /// by the timeout unwinds on its own.
    pub async fn within_deadline<T, F>(&self, operation: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.settings.request_timeout, operation)
            .await
            .map_err(|_| {
                tracing::error!(
                    "[control-plane] request exceeded {:?}",
                    self.settings.request_timeout
                );
                AppError::Timeout
            })?
    }
}

/// Commits on success, aborts on failure. The original error is returned
/// whatever the rollback outcome.
async fn settle<T>(transaction: Transaction, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            let discarded = transaction.commit();
            tracing::debug!("[control-plane] committed, {} rollback steps discarded", discarded);
            Ok(value)
        }
        Err(e) => {
            tracing::warn!("[control-plane] orchestration failed, rolling back: {}", e);
            let report = transaction.abort().await;
            if !report.is_clean() {
                tracing::error!(
                    "[control-plane] rollback incomplete, reconcile out of band: {:?}",
                    report
                );
            }
            Err(e)
        }
    }
}

/// Runs compensating deletes, each under a session scoped to the single
/// resource it removes.
struct BrokeredCompensator {
    control: ControlPlane,
    scope: AccountScope,
}

#[async_trait]
impl Compensator for BrokeredCompensator {
    async fn compensate(&self, task: &RollbackTask) -> Result<(), AppError> {
        let document = self.control.policies.compensation(&self.scope, task)?;
        let orchestrator = self.control.bind_once(&self.scope, document).await?;
        let credential = &orchestrator.session.credential;
        let provider = orchestrator.provider.as_ref();

        let result = match task {
            RollbackTask::DeleteSecurityGroup { group_id } => {
                provider.delete_security_group(credential, group_id).await
            }
            RollbackTask::TerminateInstance { instance_id } => {
                provider.terminate_instance(credential, instance_id).await
            }
            RollbackTask::DeleteVolume { volume_id } => {
                provider.delete_volume(credential, volume_id).await
            }
            RollbackTask::DeleteSnapshot { snapshot_id } => {
                provider.delete_snapshot(credential, snapshot_id).await
            }
            RollbackTask::DeleteParameter { name } => {
                provider.delete_parameter(credential, name).await
            }
            RollbackTask::DeleteAssociation { association_id } => {
                provider.delete_association(credential, association_id).await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(ProviderError::NotFound(_)) => {
                tracing::debug!("[control-plane] {} already gone", task);
                Ok(())
            }
            Err(e) => Err(orchestrator.screen(e).into()),
        }
    }
}

/// Runs the steps of one request, bound to one brokered session.
pub struct Orchestrator {
    provider: Arc<dyn CloudProvider>,
    broker: Arc<CredentialBroker>,
    session: BrokeredSession,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        broker: Arc<CredentialBroker>,
        session: BrokeredSession,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            provider,
            broker,
            session,
            retry_attempts,
            retry_delay,
        }
    }

    fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    fn credential(&self) -> &Credential {
        &self.session.credential
    }

    /// A session the provider refused is not handed out again.
    fn screen(&self, err: ProviderError) -> ProviderError {
        if err.rejects_credential() {
            self.broker.discard(&self.session);
        }
        err
    }

    fn settled(&self, err: RetryError<ProviderError>) -> AppError {
        err.map(|e| self.screen(e)).into()
    }

    /// Runs a provider call that must not be repeated.
    async fn once<T, Fut>(&self, call: Fut) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        call.await.map_err(|e| self.screen(e).into())
    }

    /// Retries an idempotent provider call on throttling and unavailability.
    async fn idempotent<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        retry(self.retry_attempts, self.retry_delay, || {
            let call = operation();
            async move { call.await.map_err(ProviderError::into_retry) }
        })
        .await
        .map_err(|e| self.settled(e))
    }

    /// Polls until `check` succeeds. Not-found counts as "not yet visible".
    async fn wait_for<T, F, Fut>(&self, mut check: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        retry(self.retry_attempts, self.retry_delay, || {
            let call = check();
            async move { call.await.map_err(ProviderError::into_wait) }
        })
        .await
        .map_err(|e| self.settled(e))
    }
}

/// A create call that reported success without an identifier.
fn missing_id(what: &str) -> AppError {
    AppError::UnexpectedResult(format!("{what} was created but no identifier was returned"))
}

/// A resource that exists but is not in the state a later step needs.
/// Transient, so waiters keep polling.
fn not_ready(what: &str, state: Option<&str>) -> ProviderError {
    ProviderError::Unavailable(format!(
        "{what} is {}",
        state.unwrap_or("in an unknown state")
    ))
}

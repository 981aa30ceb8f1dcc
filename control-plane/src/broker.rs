// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Cross-account credential brokering.
//!
//! The [`CredentialBroker`] turns a [`SessionRequest`] (target role, external
//! id, optional inline session policy, managed policy ARNs) into a
//! [`BrokeredSession`]. It consults the [`SessionCache`] first and only
//! performs a trust exchange on a miss.
//!
//! # Trust Exchange
//!
//! The exchange itself sits behind the [`TrustExchange`] trait. In production
//! it is [`StsTrustExchange`], which calls `sts:AssumeRole` with:
//!
//! - `RoleArn` - the account-qualified role of the target account
//! - `ExternalId` - shared secret required by the role's trust policy
//! - `Policy` - the generated least-privilege session policy (optional)
//! - `PolicyArns` - managed policies covering read-only paths (optional)
//!
//! # Security
//!
//! - The external id, secret key and session token are never logged
//! - Sessions expire no later than the trust boundary granted
//! - Failures are classified so callers only retry transient ones

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_sts::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sts::operation::assume_role::AssumeRoleError;
use aws_sdk_sts::types::PolicyDescriptorType;

use crate::cache::{CacheKey, SessionCache};
use crate::constants::MAX_MANAGED_POLICY_REFS;
use crate::models::Credential;
use crate::policy::{AuthorizationDocument, PolicyError};
use crate::retry::{RetryError, retry};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Trust denied or external id mismatch.
    #[error("trust exchange denied: {0}")]
    Forbidden(String),
    #[error("trust exchange temporarily failed: {0}")]
    Transient(String),
    #[error("malformed session request: {0}")]
    Malformed(String),
    #[error("trust exchange failed: {0}")]
    Internal(String),
}

impl BrokerError {
    fn into_retry(self) -> RetryError<Self> {
        match self {
            Self::Transient(_) => RetryError::Transient(self),
            _ => RetryError::Stop(self),
        }
    }
}

impl From<PolicyError> for BrokerError {
    fn from(source: PolicyError) -> Self {
        BrokerError::Malformed(source.to_string())
    }
}

/// Everything that determines the authorization of a brokered session.
#[derive(Clone)]
pub struct SessionRequest {
    pub role_arn: String,
    external_id: String,
    pub inline_document: Option<AuthorizationDocument>,
    pub managed_policy_arns: Vec<String>,
}

// Custom Debug implementation so the external id never reaches the logs
impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("role_arn", &self.role_arn)
            .field("external_id", &"[REDACTED]")
            .field("inline_document", &self.inline_document.is_some())
            .field("managed_policy_arns", &self.managed_policy_arns)
            .finish()
    }
}

impl SessionRequest {
    pub fn new(role_arn: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            external_id: external_id.into(),
            inline_document: None,
            managed_policy_arns: Vec::new(),
        }
    }

    pub fn with_document(mut self, document: AuthorizationDocument) -> Self {
        self.inline_document = Some(document);
        self
    }

    pub fn with_managed_policies<I, S>(mut self, arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.managed_policy_arns.extend(arns.into_iter().map(Into::into));
        self
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// The encoded inline policy, if any.
    pub fn policy_json(&self) -> Result<Option<String>, BrokerError> {
        Ok(self
            .inline_document
            .as_ref()
            .map(AuthorizationDocument::to_json)
            .transpose()?)
    }

    pub fn cache_key(&self) -> Result<CacheKey, BrokerError> {
        let policy = self.policy_json()?;
        Ok(CacheKey::derive(
            &self.role_arn,
            &self.external_id,
            policy.as_deref(),
            &self.managed_policy_arns,
        ))
    }

    fn validate(&self) -> Result<(), BrokerError> {
        if self.role_arn.is_empty() {
            return Err(BrokerError::Malformed("missing role arn".to_string()));
        }
        if self.external_id.is_empty() {
            return Err(BrokerError::Malformed("missing external id".to_string()));
        }
        if self.managed_policy_arns.len() > MAX_MANAGED_POLICY_REFS {
            return Err(BrokerError::Malformed(format!(
                "at most {} managed policies may be attached",
                MAX_MANAGED_POLICY_REFS
            )));
        }
        if self.inline_document.is_none() && self.managed_policy_arns.is_empty() {
            // without a session policy the role's full permissions would apply
            return Err(BrokerError::Malformed(
                "session request carries no policy".to_string(),
            ));
        }
        Ok(())
    }
}

/// Temporary credentials scoped to one [`SessionRequest`].
#[derive(Clone, Debug)]
pub struct BrokeredSession {
    pub credential: Credential,
    pub expires_at: SystemTime,
    /// Cache key of the request the session was brokered for.
    pub request_hash: String,
}

impl BrokeredSession {
    /// True if the credentials remain valid for at least `buffer`.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        SystemTime::now()
            .checked_add(buffer)
            .map(|threshold| threshold < self.expires_at)
            .unwrap_or(false)
    }
}

/// Credentials granted by one trust exchange.
pub struct Grant {
    pub credential: Credential,
    pub expires_at: SystemTime,
}

#[async_trait]
pub trait TrustExchange: Send + Sync {
    async fn assume_role(
        &self,
        request: &SessionRequest,
        policy: Option<&str>,
        duration: Duration,
    ) -> Result<Grant, BrokerError>;
}

pub struct StsTrustExchange {
    client: aws_sdk_sts::Client,
    session_name: String,
}

impl StsTrustExchange {
    pub fn new(client: aws_sdk_sts::Client, session_name: impl Into<String>) -> Self {
        Self {
            client,
            session_name: session_name.into(),
        }
    }
}

#[async_trait]
impl TrustExchange for StsTrustExchange {
    #[tracing::instrument(skip(self, request, policy), fields(role = %request.role_arn))]
    async fn assume_role(
        &self,
        request: &SessionRequest,
        policy: Option<&str>,
        duration: Duration,
    ) -> Result<Grant, BrokerError> {
        let policy_arns: Vec<PolicyDescriptorType> = request
            .managed_policy_arns
            .iter()
            .map(|arn| PolicyDescriptorType::builder().arn(arn).build())
            .collect();
        let duration_seconds = i32::try_from(duration.as_secs())
            .map_err(|_| BrokerError::Malformed("session duration out of range".to_string()))?;

        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&self.session_name)
            .external_id(request.external_id())
            .set_policy(policy.map(str::to_string))
            .set_policy_arns((!policy_arns.is_empty()).then_some(policy_arns))
            .duration_seconds(duration_seconds)
            .send()
            .await
            .map_err(classify_sts_error)?;

        let credentials = output
            .credentials()
            .ok_or_else(|| BrokerError::Internal("AssumeRole returned no credentials".to_string()))?;
        let expires_at = SystemTime::try_from(*credentials.expiration())
            .map_err(|e| BrokerError::Internal(format!("invalid expiration: {e}")))?;

        Ok(Grant {
            credential: Credential {
                access_key_id: credentials.access_key_id().to_string(),
                secret_access_key: credentials.secret_access_key().to_string(),
                session_token: credentials.session_token().to_string(),
            },
            expires_at,
        })
    }
}

fn classify_sts_error<R: fmt::Debug>(err: SdkError<AssumeRoleError, R>) -> BrokerError {
    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return BrokerError::Transient(format!("{err}"));
    }

    let code = err.as_service_error().and_then(|e| e.code()).unwrap_or("");
    let message = err
        .as_service_error()
        .and_then(|e| e.message())
        .unwrap_or("");
    classify_sts_code(code, message)
}

fn classify_sts_code(code: &str, message: &str) -> BrokerError {
    let message = message.to_string();
    match code {
        "AccessDenied" | "ExpiredTokenException" | "RegionDisabledException" => {
            BrokerError::Forbidden(message)
        }
        "MalformedPolicyDocument" | "PackedPolicyTooLarge" | "ValidationError" => {
            BrokerError::Malformed(message)
        }
        "Throttling" | "ThrottlingException" | "IDPCommunicationError" | "ServiceUnavailable" => {
            BrokerError::Transient(message)
        }
        _ => BrokerError::Internal(format!("{code}: {message}")),
    }
}

/// Brokers scoped sessions through the [`SessionCache`].
pub struct CredentialBroker {
    exchange: Arc<dyn TrustExchange>,
    cache: Arc<SessionCache>,
    duration: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl CredentialBroker {
    pub fn new(
        exchange: Arc<dyn TrustExchange>,
        cache: Arc<SessionCache>,
        duration: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            exchange,
            cache,
            duration,
            retry_attempts,
            retry_delay,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Returns a cached session or brokers a new one.
    pub async fn assume(&self, request: SessionRequest) -> Result<BrokeredSession, BrokerError> {
        self.assume_with(request, self.retry_attempts).await
    }

    /// Like [`assume`](Self::assume), but a transient trust exchange failure
    /// is not retried.
    pub async fn assume_once(&self, request: SessionRequest) -> Result<BrokeredSession, BrokerError> {
        self.assume_with(request, 1).await
    }

    #[tracing::instrument(skip(self, request), fields(role = %request.role_arn))]
    async fn assume_with(
        &self,
        request: SessionRequest,
        attempts: u32,
    ) -> Result<BrokeredSession, BrokerError> {
        request.validate()?;
        let key = request.cache_key()?;

        if let Some(session) = self.cache.get(&key) {
            tracing::debug!("[control-plane] session cache hit");
            return Ok(session);
        }

        let policy = request.policy_json()?;
        let exchange = self.exchange.as_ref();
        let request_ref = &request;
        let policy_ref = policy.as_deref();
        let duration = self.duration;

        let grant = retry(attempts, self.retry_delay, move || async move {
            exchange
                .assume_role(request_ref, policy_ref, duration)
                .await
                .map_err(BrokerError::into_retry)
        })
        .await
        .map_err(|e| {
            let e = e.into_inner();
            tracing::error!("[control-plane] trust exchange failed: {}", e);
            e
        })?;

        // never outlive what was asked for, even if the boundary granted more
        let requested = SystemTime::now() + self.duration;
        let session = BrokeredSession {
            credential: grant.credential.clone(),
            expires_at: grant.expires_at.min(requested),
            request_hash: key.to_string(),
        };

        tracing::debug!(
            "[control-plane] brokered session, expires_at: {:?}",
            session.expires_at
        );

        self.cache.put(key, session.clone(), self.cache.ttl());

        Ok(session)
    }

    /// Convenience form of [`assume`](Self::assume).
    pub async fn assume_role(
        &self,
        external_id: &str,
        role_arn: &str,
        inline_document: Option<AuthorizationDocument>,
        managed_policy_arns: &[&str],
    ) -> Result<BrokeredSession, BrokerError> {
        let mut request = SessionRequest::new(role_arn, external_id)
            .with_managed_policies(managed_policy_arns.iter().copied());
        request.inline_document = inline_document;
        self.assume(request).await
    }

    /// Drops a session whose credentials the provider refused, so the next
    /// request with the same authorization brokers a fresh one.
    pub fn discard(&self, session: &BrokeredSession) -> bool {
        let discarded = self.cache.invalidate_session(session);
        if discarded {
            tracing::warn!(
                "[control-plane] discarded rejected session {}",
                session.request_hash
            );
        }
        discarded
    }

    /// Drops the cached session for `request`.
    pub fn invalidate(&self, request: &SessionRequest) -> Result<bool, BrokerError> {
        Ok(self.cache.invalidate(&request.cache_key()?))
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::constants;
use crate::orchestrators::Settings;

#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ControlPlaneOptions {
    #[arg(long, default_value = "127.0.0.1", env("CONTROL_PLANE_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8080", env("CONTROL_PLANE_HTTP_PORT"))]
    pub port: u16,
    #[arg(long, default_value = "us-east-1", env("CONTROL_PLANE_REGION"))]
    pub region: String,
    #[arg(long, default_value = constants::DEFAULT_PARTITION, env("CONTROL_PLANE_PARTITION"))]
    pub partition: String,
    /// Role assumed in every target account.
    #[arg(long, env("CONTROL_PLANE_ROLE_NAME"))]
    pub role_name: String,
    /// Shared secret presented on every role assumption. Prefer the env var.
    #[arg(long, env("CONTROL_PLANE_EXTERNAL_ID"), hide_env_values = true)]
    pub external_id: String,
    #[arg(long, default_value = constants::DEFAULT_SESSION_NAME, env("CONTROL_PLANE_SESSION_NAME"))]
    pub session_name: String,
    #[arg(long, default_value = "600", env("CONTROL_PLANE_SESSION_TTL_SECS"))]
    pub session_ttl_secs: u64,
    #[arg(long, default_value = "60", env("CONTROL_PLANE_ROLLBACK_TIMEOUT_SECS"))]
    pub rollback_timeout_secs: u64,
    #[arg(long, default_value = "120", env("CONTROL_PLANE_REQUEST_TIMEOUT_SECS"))]
    pub request_timeout_secs: u64,
    #[arg(long, default_value = "5", env("CONTROL_PLANE_RETRY_ATTEMPTS"))]
    pub retry_attempts: u32,
    #[arg(long, default_value = "250", env("CONTROL_PLANE_RETRY_DELAY_MS"))]
    pub retry_delay_ms: u64,
    /// JSON file overriding the action list of individual operations.
    #[arg(long, env("CONTROL_PLANE_POLICY_TABLE"))]
    pub policy_table: Option<PathBuf>,
}

impl ControlPlaneOptions {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Orchestration settings derived from these options.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(&self.region, &self.role_name, &self.external_id);
        settings.partition = self.partition.clone();
        settings.request_timeout = Duration::from_secs(self.request_timeout_secs);
        settings.rollback_timeout = Duration::from_secs(self.rollback_timeout_secs);
        settings.retry_attempts = self.retry_attempts;
        settings.retry_delay = Duration::from_millis(self.retry_delay_ms);
        settings
    }
}

// Custom Debug implementation to prevent the external id leaking into the startup log
impl fmt::Debug for ControlPlaneOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("region", &self.region)
            .field("partition", &self.partition)
            .field("role_name", &self.role_name)
            .field("external_id", &"[REDACTED]")
            .field("session_name", &self.session_name)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("rollback_timeout_secs", &self.rollback_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("policy_table", &self.policy_table)
            .finish()
    }
}

impl Default for ControlPlaneOptions {
    fn default() -> Self {
        ControlPlaneOptions {
            host: "127.0.0.1".to_string(),
            port: 8080,
            region: "us-east-1".to_string(),
            partition: constants::DEFAULT_PARTITION.to_string(),
            role_name: "ControlPlaneAccess".to_string(),
            external_id: String::new(),
            session_name: constants::DEFAULT_SESSION_NAME.to_string(),
            session_ttl_secs: constants::SESSION_CACHE_TTL.as_secs(),
            rollback_timeout_secs: constants::ROLLBACK_TIMEOUT.as_secs(),
            request_timeout_secs: constants::REQUEST_TIMEOUT.as_secs(),
            retry_attempts: constants::RETRY_MAX_ATTEMPTS,
            retry_delay_ms: 250,
            policy_table: None,
        }
    }
}

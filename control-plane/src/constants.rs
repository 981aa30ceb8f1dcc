// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const DEFAULT_PARTITION: &str = "aws";
pub const DEFAULT_SESSION_NAME: &str = "control-plane";
pub const POLICY_VERSION: &str = "2012-10-17";

/// STS rejects anything shorter than 15 minutes.
pub const CREDENTIAL_DURATION: Duration = Duration::from_secs(15 * 60);
/// Cached sessions retire before the credentials they hold could be rejected.
pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const SESSION_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const CREDENTIAL_REFRESH_BUFFER: Duration = Duration::from_secs(60); // never hand out creds this close to expiry

pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(250);
pub const BROKER_RETRY_MAX_ATTEMPTS: u32 = 3;

/// https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_iam-quotas.html
/// session policies passed to AssumeRole are limited to 2,048 characters
pub const MAX_INLINE_POLICY_LENGTH: usize = 2048;
pub const MAX_MANAGED_POLICY_REFS: usize = 10;
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024; // 1 MB

// AWS managed policies, qualified with the deployment partition when used
pub const EC2_READ_ONLY_POLICY: &str = "AmazonEC2ReadOnlyAccess";
pub const SSM_READ_ONLY_POLICY: &str = "AmazonSSMReadOnlyAccess";

// Validation constants for request bodies
pub const ACCOUNT_ID_LENGTH: usize = 12;
pub const MAX_RESOURCE_ID_LENGTH: u64 = 128;
pub const MAX_NAME_LENGTH: u64 = 255;
pub const MAX_DESCRIPTION_LENGTH: u64 = 255;
pub const MAX_TAGS_COUNT: usize = 50;
pub const MAX_TAG_KEY_LENGTH: usize = 128;
pub const MAX_TAG_VALUE_LENGTH: usize = 256;
pub const MAX_INGRESS_RULES_COUNT: usize = 60;
pub const MAX_PARAMETER_NAME_LENGTH: u64 = 1011;
pub const MAX_PARAMETER_VALUE_LENGTH: u64 = 4096;

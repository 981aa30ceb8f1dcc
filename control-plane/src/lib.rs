// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Control Plane
//!
//! A multi-tenant control plane for EC2 and SSM resources spread across many
//! isolated AWS accounts.
//!
//! A single service identity assumes a role in the target account on every
//! request. The session it receives is narrowed by a generated,
//! least-privilege policy covering only the calls that one operation makes.
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> ControlPlane -> PolicyGenerator
//!                            |
//!                            +-> CredentialBroker -> SessionCache
//!                            |          |
//!                            |          +-> STS AssumeRole (target account)
//!                            |
//!                            +-> Orchestrator -> EC2 / SSM (brokered session)
//!                                     |
//!                                     +-> Transaction -> RollbackCoordinator
//! ```
//!
//! ## Modules
//!
//! - [`application`]: HTTP server setup with Axum
//! - [`broker`]: scoped role assumption through the session cache
//! - [`cache`]: TTL cache of brokered sessions keyed by request digest
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Configuration constants for the application
//! - [`errors`]: Application error types with HTTP response mapping
//! - [`models`]: Request/response types with validation
//! - [`orchestrators`]: multi-step resource lifecycles with rollback
//! - [`policy`]: least-privilege session policy generation
//! - [`provider`]: the EC2/SSM capability the orchestrators drive
//! - [`retry`]: bounded retry with exponential backoff
//! - [`rollback`]: LIFO compensation of partially applied operations
//! - [`routes`]: HTTP route handlers
//!
//! ## Usage
//!
//! ```bash
//! CONTROL_PLANE_EXTERNAL_ID=... control-plane --role-name ControlPlaneAccess --region us-east-1
//! ```
//!
//! ## Security Considerations
//!
//! - Creation policies never carry delete verbs; compensating deletes run
//!   under their own session scoped to the single resource they remove
//! - Brokered credentials are zeroized on drop and redacted from `Debug`
//! - The external id is never logged
//! - Cached sessions retire well before the credentials they hold expire

pub mod application;
pub mod broker;
pub mod cache;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod models;
pub mod orchestrators;
pub mod policy;
pub mod provider;
pub mod retry;
pub mod rollback;
pub mod routes;

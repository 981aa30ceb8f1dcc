// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use clap::Parser;
use control_plane::broker::{CredentialBroker, StsTrustExchange};
use control_plane::cache::SessionCache;
use control_plane::configuration::ControlPlaneOptions;
use control_plane::orchestrators::ControlPlane;
use control_plane::policy::{PolicyGenerator, PolicyTable};
use control_plane::provider::aws::AwsProvider;
use control_plane::{application::Application, constants};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn policy_table(options: &ControlPlaneOptions) -> anyhow::Result<PolicyTable> {
    let Some(path) = &options.policy_table else {
        return Ok(PolicyTable::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read policy table {}", path.display()))?;
    let table = PolicyTable::with_overrides(&json)
        .with_context(|| format!("invalid policy table {}", path.display()))?;
    tracing::info!("[control-plane] loaded policy table overrides from {}", path.display());
    Ok(table)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("[control-plane] init");

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from command line arguments or environment variables
    let options = ControlPlaneOptions::parse();

    tracing::info!("[control-plane] {:?}", &options);

    let policies = Arc::new(PolicyGenerator::new(policy_table(&options)?));

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(options.region.clone()))
        .load()
        .await;

    let exchange = Arc::new(StsTrustExchange::new(
        aws_sdk_sts::Client::new(&config),
        options.session_name.clone(),
    ));
    let cache = Arc::new(SessionCache::new(options.session_ttl()));
    let settings = options.settings();
    let broker = Arc::new(CredentialBroker::new(
        exchange,
        cache.clone(),
        constants::CREDENTIAL_DURATION,
        constants::BROKER_RETRY_MAX_ATTEMPTS,
        settings.retry_delay,
    ));

    tracing::info!(
        "[control-plane] purging expired sessions every {:#?}",
        constants::SESSION_CACHE_SWEEP_INTERVAL
    );
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(constants::SESSION_CACHE_SWEEP_INTERVAL).await;
            let purged = cache.purge_expired();
            tracing::debug!(
                "[control-plane] purged {} expired sessions, {} cached",
                purged,
                cache.len()
            );
        }
    });

    let provider = Arc::new(AwsProvider::new(config));
    let control = ControlPlane::new(broker, provider, policies, settings);

    let application = Application::build(options, control)
        .await
        .context("unable to start the HTTP server")?;

    application.run_until_stopped().await?;
    Ok(())
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Compensating actions for multi-step orchestrations.
//!
//! Orchestrators describe what must be undone as [`RollbackTask`] values and
//! push them onto a [`Transaction`] as each step creates durable state. The
//! description is plain data; executing it is the job of a [`Compensator`],
//! driven by the [`RollbackCoordinator`].
//!
//! # Semantics
//!
//! - Tasks run in strict reverse order of accumulation (LIFO).
//! - A failing task is logged and the unwind continues with the next one.
//! - One timeout bounds the whole unwind; tasks not started when it elapses
//!   are abandoned and reported.
//! - The unwind runs on its own spawned task, so a cancelled request does not
//!   cancel compensation that is already under way.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::AppError;

/// A single compensating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RollbackTask {
    DeleteSecurityGroup { group_id: String },
    TerminateInstance { instance_id: String },
    DeleteVolume { volume_id: String },
    DeleteSnapshot { snapshot_id: String },
    DeleteParameter { name: String },
    DeleteAssociation { association_id: String },
}

impl fmt::Display for RollbackTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteSecurityGroup { group_id } => write!(f, "delete security group {group_id}"),
            Self::TerminateInstance { instance_id } => write!(f, "terminate instance {instance_id}"),
            Self::DeleteVolume { volume_id } => write!(f, "delete volume {volume_id}"),
            Self::DeleteSnapshot { snapshot_id } => write!(f, "delete snapshot {snapshot_id}"),
            Self::DeleteParameter { name } => write!(f, "delete parameter {name}"),
            Self::DeleteAssociation { association_id } => {
                write!(f, "delete association {association_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub position: usize,
    pub task: RollbackTask,
}

/// Ordered compensating actions of one in-flight orchestration.
#[derive(Debug, Default)]
pub struct RollbackStack {
    entries: Vec<StackEntry>,
}

impl RollbackStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a task and returns its position.
    pub fn push(&mut self, task: RollbackTask) -> usize {
        let position = self.entries.len();
        self.entries.push(StackEntry { position, task });
        position
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &RollbackTask> {
        self.entries.iter().map(|e| &e.task)
    }

    fn into_lifo(self) -> impl Iterator<Item = StackEntry> {
        self.entries.into_iter().rev()
    }
}

/// Executes compensating actions.
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(&self, task: &RollbackTask) -> Result<(), AppError>;
}

/// Outcome of one unwind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Positions of the tasks that failed, in the order they were attempted.
    pub failed: Vec<usize>,
    pub abandoned: usize,
    pub timed_out: bool,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.timed_out
    }
}

pub struct RollbackCoordinator {
    compensator: Arc<dyn Compensator>,
    timeout: Duration,
}

impl RollbackCoordinator {
    pub fn new(compensator: Arc<dyn Compensator>, timeout: Duration) -> Self {
        Self {
            compensator,
            timeout,
        }
    }

    /// Drains the stack LIFO under the shared timeout.
    #[tracing::instrument(skip(self, stack), fields(tasks = stack.len()))]
    pub async fn run(&self, stack: RollbackStack) -> RollbackReport {
        let total = stack.len();
        let mut report = RollbackReport::default();

        let drained = tokio::time::timeout(self.timeout, self.drain(stack, &mut report)).await;

        if drained.is_err() {
            report.timed_out = true;
            report.abandoned = total - report.attempted;
            tracing::error!(
                "[control-plane] rollback timed out after {:?}, {} tasks abandoned",
                self.timeout,
                report.abandoned
            );
        }

        if report.is_clean() {
            tracing::info!("[control-plane] rollback completed ({} tasks)", report.succeeded);
        } else {
            tracing::warn!(
                "[control-plane] rollback left state behind: {} failed, {} abandoned",
                report.failed.len(),
                report.abandoned
            );
        }

        report
    }

    async fn drain(&self, stack: RollbackStack, report: &mut RollbackReport) {
        for entry in stack.into_lifo() {
            report.attempted += 1;
            match self.compensator.compensate(&entry.task).await {
                Ok(()) => {
                    tracing::debug!("[control-plane] rollback step {}: {}", entry.position, entry.task);
                    report.succeeded += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "[control-plane] rollback step {} failed ({}): {:?}",
                        entry.position,
                        entry.task,
                        e
                    );
                    report.failed.push(entry.position);
                }
            }
        }
    }
}

/// Owns the rollback stack of one orchestration.
///
/// Settle it with [`commit`](Transaction::commit) on success or
/// [`abort`](Transaction::abort) on failure. A transaction dropped while
/// unsettled (the request future was cancelled mid-sequence) unwinds on a
/// spawned task.
pub struct Transaction {
    stack: RollbackStack,
    coordinator: Arc<RollbackCoordinator>,
    settled: bool,
}

impl Transaction {
    pub fn new(coordinator: Arc<RollbackCoordinator>) -> Self {
        Self {
            stack: RollbackStack::new(),
            coordinator,
            settled: false,
        }
    }

    pub fn push(&mut self, task: RollbackTask) {
        let position = self.stack.push(task);
        tracing::trace!("[control-plane] pushed rollback step {}", position);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &RollbackTask> {
        self.stack.tasks()
    }

    /// Discards the stack and returns how many tasks were dropped.
    pub fn commit(mut self) -> usize {
        self.settled = true;
        let discarded = self.stack.len();
        self.stack = RollbackStack::new();
        discarded
    }

    /// Unwinds the stack on an independent task and waits for the report.
    pub async fn abort(mut self) -> RollbackReport {
        self.settled = true;
        let stack = std::mem::take(&mut self.stack);
        if stack.is_empty() {
            return RollbackReport::default();
        }

        let total = stack.len();
        let coordinator = self.coordinator.clone();
        match tokio::spawn(async move { coordinator.run(stack).await }).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("[control-plane] rollback task failed to complete: {:?}", e);
                RollbackReport {
                    abandoned: total,
                    ..RollbackReport::default()
                }
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.settled || self.stack.is_empty() {
            return;
        }

        let stack = std::mem::take(&mut self.stack);
        let coordinator = self.coordinator.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    "[control-plane] orchestration cancelled, unwinding {} steps",
                    stack.len()
                );
                handle.spawn(async move {
                    coordinator.run(stack).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    "[control-plane] no runtime to unwind {} steps, state left behind",
                    stack.len()
                );
            }
        }
    }
}

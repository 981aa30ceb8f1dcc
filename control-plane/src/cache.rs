// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Time-bounded cache of brokered sessions.
//!
//! Entries are keyed by a SHA-256 digest of everything that determines the
//! effective authorization of a session (role, external id, canonical inline
//! document, sorted managed policy ARNs). Two requests built independently
//! with the same effective authorization land on the same entry.
//!
//! Concurrent misses for the same key are not de-duplicated: each caller
//! brokers its own session and the last insert wins.

use std::fmt;
use std::mem::size_of;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use dashmap::DashMap;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::broker::BrokeredSession;
use crate::constants::CREDENTIAL_REFRESH_BUFFER;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key. Every field is length-prefixed so adjacent fields can
    /// never run into each other.
    pub fn derive(
        role_arn: &str,
        external_id: &str,
        document: Option<&str>,
        managed_policy_arns: &[String],
    ) -> Self {
        let mut managed: Vec<&str> = managed_policy_arns.iter().map(String::as_str).collect();
        managed.sort_unstable();
        managed.dedup();

        let mut hasher = Sha256::new();
        let mut update = |field: &[u8]| {
            let mut header = [0; size_of::<u64>()];
            LittleEndian::write_u64(&mut header, field.len() as u64);
            hasher.update(header);
            hasher.update(field);
        };

        update(role_arn.as_bytes());
        update(external_id.as_bytes());
        update(document.unwrap_or_default().as_bytes());
        for arn in managed {
            update(arn.as_bytes());
        }

        Self(HEXLOWER.encode(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
struct CachedSession {
    session: BrokeredSession,
    expires_at: Instant,
}

impl CachedSession {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at && self.session.is_fresh(CREDENTIAL_REFRESH_BUFFER)
    }
}

pub struct SessionCache {
    entries: DashMap<CacheKey, CachedSession>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a still-valid session. Expired entries are removed on sight.
    pub fn get(&self, key: &CacheKey) -> Option<BrokeredSession> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_valid() => return Some(entry.session.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            // another request may have replaced it with a fresh one meanwhile
            self.entries.remove_if(key, |_, entry| !entry.is_valid());
            tracing::debug!("[control-plane] evicted expired session {}", key);
        }
        None
    }

    pub fn put(&self, key: CacheKey, session: BrokeredSession, ttl: Duration) {
        self.entries.insert(
            key,
            CachedSession {
                session,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops the entry `session` was cached under, unless a newer session
    /// already replaced it.
    pub fn invalidate_session(&self, session: &BrokeredSession) -> bool {
        let key = CacheKey(session.request_hash.clone());
        self.entries
            .remove_if(&key, |_, entry| {
                entry.session.credential.access_key_id == session.credential.access_key_id
            })
            .is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

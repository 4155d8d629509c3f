//! Registration store.
//!
//! Maps a (platform, platform-user-id) pair to an affiliate identity.
//! Registrations have no freshness concept and never expire; they are
//! created on a registration command and removed only by an explicit
//! unregistration. Cache state is deliberately untouched by any operation
//! here.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::SystemTime;
use tracing::{debug, info};

use crate::error::TrackerError;
use crate::types::{Platform, Registration};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistrationKey {
    platform: Platform,
    platform_user_id: String,
}

/// Concurrent (platform, user) → affiliate mapping.
#[derive(Default)]
pub struct RegistrationStore {
    map: DashMap<RegistrationKey, Registration>,
}

impl RegistrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a platform user against an affiliate identity.
    ///
    /// Re-registering the same affiliate is a no-op success and returns
    /// the existing registration.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AlreadyRegistered`] if the pair is bound to a
    /// *different* affiliate; [`TrackerError::AffiliateNotFound`] for an
    /// empty affiliate id (an empty identity cannot exist upstream).
    pub fn register(
        &self,
        platform: Platform,
        platform_user_id: &str,
        affiliate_id: &str,
    ) -> Result<Registration, TrackerError> {
        if affiliate_id.is_empty() {
            return Err(TrackerError::AffiliateNotFound {
                affiliate_id: String::new(),
            });
        }

        let key = RegistrationKey {
            platform,
            platform_user_id: platform_user_id.to_string(),
        };
        match self.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let current = existing.get();
                if current.affiliate_id == affiliate_id {
                    debug!(
                        platform = %platform,
                        user = %platform_user_id,
                        affiliate = %affiliate_id,
                        "re-registration is a no-op"
                    );
                    Ok(current.clone())
                } else {
                    Err(TrackerError::AlreadyRegistered {
                        existing: current.affiliate_id.clone(),
                    })
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let registration = Registration {
                    platform,
                    platform_user_id: platform_user_id.to_string(),
                    affiliate_id: affiliate_id.to_string(),
                    registered_at: SystemTime::now(),
                };
                slot.insert(registration.clone());
                info!(
                    platform = %platform,
                    user = %platform_user_id,
                    affiliate = %affiliate_id,
                    "registered"
                );
                Ok(registration)
            }
        }
    }

    /// Resolve the affiliate identity for a platform user.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotRegistered`] when no registration exists.
    pub fn resolve(
        &self,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<String, TrackerError> {
        let key = RegistrationKey {
            platform,
            platform_user_id: platform_user_id.to_string(),
        };
        self.map
            .get(&key)
            .map(|registration| registration.affiliate_id.clone())
            .ok_or_else(|| TrackerError::NotRegistered {
                platform,
                platform_user_id: platform_user_id.to_string(),
            })
    }

    /// Remove a registration. Does not touch any cached snapshot.
    ///
    /// # Errors
    ///
    /// [`TrackerError::NotRegistered`] when nothing was registered.
    pub fn unregister(
        &self,
        platform: Platform,
        platform_user_id: &str,
    ) -> Result<Registration, TrackerError> {
        let key = RegistrationKey {
            platform,
            platform_user_id: platform_user_id.to_string(),
        };
        match self.map.remove(&key) {
            Some((_, registration)) => {
                info!(
                    platform = %platform,
                    user = %platform_user_id,
                    affiliate = %registration.affiliate_id,
                    "unregistered"
                );
                Ok(registration)
            }
            None => Err(TrackerError::NotRegistered {
                platform,
                platform_user_id: platform_user_id.to_string(),
            }),
        }
    }

    /// Distinct affiliate identities across all registrations, sorted.
    ///
    /// This is the scheduler's work list; several platform users sharing
    /// one affiliate produce a single entry.
    #[must_use]
    pub fn distinct_affiliates(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .map
            .iter()
            .map(|entry| entry.value().affiliate_id.clone())
            .collect();
        set.into_iter().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

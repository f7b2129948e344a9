//! Participant registry: organization metadata, eligibility and status.
//!
//! All mutations go through a single `RwLock`, so `list_active` always returns
//! a consistent snapshot even while registrations race with a round.

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FederationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyTier { Low, Medium, High }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTier { Low, Medium, High }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus { Active, Suspended, Withdrawn }

/// Registration payload as submitted by an organization. Required fields are
/// optional here so that a missing field surfaces as a `Validation` error
/// rather than a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: Option<String>,
    pub sample_count: Option<u64>,
    pub compliance_certificate: Option<String>,
    #[serde(default, alias = "hipaa_compliant")]
    pub compliance_attested: bool,
    #[serde(default)]
    pub privacy_tier: Option<PrivacyTier>,
    #[serde(default)]
    pub compute_tier: Option<ComputeTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub org_id: String,
    pub name: String,
    pub sample_count: u64,
    pub privacy_tier: PrivacyTier,
    pub compute_tier: ComputeTier,
    pub compliance_certificate: String,
    pub registered_at: DateTime<Utc>,
    pub status: ParticipantStatus,
    #[serde(skip)]
    pub latest_weights: Option<Vec<u8>>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RegistryPolicy {
    pub min_sample_count: u64,
    pub max_participants: usize,
}

impl Default for RegistryPolicy { fn default() -> Self { Self { min_sample_count: 1000, max_participants: 10 } } }

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    participants: HashMap<String, Participant>,
}

impl Inner {
    fn active_count(&self) -> usize {
        self.participants.values().filter(|p| p.status == ParticipantStatus::Active).count()
    }
}

pub struct ParticipantRegistry {
    policy: RegistryPolicy,
    inner: RwLock<Inner>,
}

impl ParticipantRegistry {
    pub fn new(policy: RegistryPolicy) -> Self { Self { policy, inner: RwLock::new(Inner::default()) } }

    pub fn policy(&self) -> &RegistryPolicy { &self.policy }

    /// Inserts or overwrites `org_id` with status `Active`. Re-registration keeps
    /// the organization's original position in iteration order.
    pub fn register(&self, org_id: &str, info: ParticipantInfo) -> Result<()> {
        if org_id.trim().is_empty() { return Err(FederationError::Validation("org_id is required".into())); }
        if org_id.trim() != org_id {
            return Err(FederationError::Validation(format!("org_id {org_id:?} has surrounding whitespace")));
        }
        let participant = match self.validate(org_id, info) {
            Ok(p) => p,
            Err(e) => { warn!(org_id, error=%e, "participant_rejected"); return Err(e); }
        };
        let mut inner = self.inner.write();
        let existing = inner.participants.contains_key(org_id);
        if !existing && inner.active_count() >= self.policy.max_participants {
            warn!(org_id, max = self.policy.max_participants, "participant_rejected_capacity");
            return Err(FederationError::Validation(format!(
                "federation is full ({} active participants)", self.policy.max_participants
            )));
        }
        if !existing { inner.order.push(org_id.to_string()); }
        inner.participants.insert(org_id.to_string(), participant);
        info!(org_id, updated = existing, "participant_registered");
        Ok(())
    }

    fn validate(&self, org_id: &str, info: ParticipantInfo) -> Result<Participant> {
        let name = info.name.filter(|n| !n.trim().is_empty())
            .ok_or_else(|| FederationError::Validation("missing required field: name".into()))?;
        let sample_count = info.sample_count
            .ok_or_else(|| FederationError::Validation("missing required field: sample_count".into()))?;
        let certificate = info.compliance_certificate.filter(|c| !c.trim().is_empty())
            .ok_or_else(|| FederationError::Validation("missing required field: compliance_certificate".into()))?;
        if sample_count < self.policy.min_sample_count {
            return Err(FederationError::Validation(format!(
                "sample_count {sample_count} below minimum {}", self.policy.min_sample_count
            )));
        }
        if !info.compliance_attested {
            return Err(FederationError::Validation("compliance attestation missing".into()));
        }
        Ok(Participant {
            org_id: org_id.to_string(),
            name,
            sample_count,
            privacy_tier: info.privacy_tier.unwrap_or(PrivacyTier::High),
            compute_tier: info.compute_tier.unwrap_or(ComputeTier::Medium),
            compliance_certificate: certificate,
            registered_at: Utc::now(),
            status: ParticipantStatus::Active,
            latest_weights: None,
            last_update: None,
        })
    }

    /// Active participants in registration order, cloned under one read lock.
    pub fn list_active(&self) -> Vec<Participant> {
        let inner = self.inner.read();
        inner.order.iter()
            .filter_map(|id| inner.participants.get(id))
            .filter(|p| p.status == ParticipantStatus::Active)
            .cloned()
            .collect()
    }

    pub fn count_active(&self) -> usize { self.inner.read().active_count() }

    pub fn len(&self) -> usize { self.inner.read().participants.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, org_id: &str) -> Option<Participant> { self.inner.read().participants.get(org_id).cloned() }

    pub fn mark_status(&self, org_id: &str, status: ParticipantStatus) -> Result<()> {
        let mut inner = self.inner.write();
        let p = inner.participants.get_mut(org_id).ok_or_else(|| FederationError::NotFound(org_id.to_string()))?;
        let from = p.status;
        p.status = status;
        info!(org_id, ?from, to = ?status, "participant_status_changed");
        Ok(())
    }

    /// Remembers the last encrypted global snapshot sent to `org_id`.
    pub fn record_distribution(&self, org_id: &str, blob: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write();
        let p = inner.participants.get_mut(org_id).ok_or_else(|| FederationError::NotFound(org_id.to_string()))?;
        p.latest_weights = Some(blob);
        p.last_update = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, samples: u64) -> ParticipantInfo {
        ParticipantInfo {
            name: Some(name.into()),
            sample_count: Some(samples),
            compliance_certificate: Some("HIPAA-2024".into()),
            compliance_attested: true,
            ..Default::default()
        }
    }

    #[test]
    fn register_applies_defaults() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        reg.register("mayo", info("Mayo Clinic", 50_000)).unwrap();
        let p = reg.get("mayo").unwrap();
        assert_eq!(p.status, ParticipantStatus::Active);
        assert_eq!(p.privacy_tier, PrivacyTier::High);
        assert_eq!(p.compute_tier, ComputeTier::Medium);
        assert!(p.latest_weights.is_none());
    }

    #[test]
    fn rejects_missing_fields_and_small_datasets() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        let mut no_cert = info("A", 5000);
        no_cert.compliance_certificate = None;
        assert!(matches!(reg.register("a", no_cert), Err(FederationError::Validation(_))));
        let mut no_name = info("A", 5000);
        no_name.name = None;
        assert!(matches!(reg.register("a", no_name), Err(FederationError::Validation(_))));
        assert!(matches!(reg.register("a", info("A", 999)), Err(FederationError::Validation(_))));
        let mut not_attested = info("A", 5000);
        not_attested.compliance_attested = false;
        assert!(matches!(reg.register("a", not_attested), Err(FederationError::Validation(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn reregistration_updates_in_place() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        reg.register("a", info("A", 5000)).unwrap();
        reg.register("b", info("B", 5000)).unwrap();
        reg.mark_status("a", ParticipantStatus::Suspended).unwrap();
        reg.register("a", info("A renamed", 8000)).unwrap();
        let ids: Vec<String> = reg.list_active().into_iter().map(|p| p.org_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(reg.get("a").unwrap().sample_count, 8000);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn padded_org_ids_are_rejected() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        assert!(matches!(reg.register(" mayo ", info("Mayo Clinic", 50_000)), Err(FederationError::Validation(_))));
        assert!(matches!(reg.register("   ", info("Mayo Clinic", 50_000)), Err(FederationError::Validation(_))));
        assert!(reg.is_empty());
        reg.register("mayo", info("Mayo Clinic", 50_000)).unwrap();
        reg.mark_status("mayo", ParticipantStatus::Suspended).unwrap();
        assert!(matches!(reg.mark_status(" mayo ", ParticipantStatus::Active), Err(FederationError::NotFound(_))));
    }

    #[test]
    fn mark_status_unknown_org() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        assert_eq!(reg.mark_status("ghost", ParticipantStatus::Withdrawn), Err(FederationError::NotFound("ghost".into())));
    }

    #[test]
    fn status_changes_affect_active_set() {
        let reg = ParticipantRegistry::new(RegistryPolicy::default());
        for id in ["a", "b", "c"] { reg.register(id, info(id, 2000)).unwrap(); }
        reg.mark_status("b", ParticipantStatus::Withdrawn).unwrap();
        assert_eq!(reg.count_active(), 2);
        assert_eq!(reg.list_active().iter().map(|p| p.org_id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn capacity_applies_to_new_orgs_only() {
        let reg = ParticipantRegistry::new(RegistryPolicy { min_sample_count: 1, max_participants: 2 });
        reg.register("a", info("A", 10)).unwrap();
        reg.register("b", info("B", 10)).unwrap();
        assert!(matches!(reg.register("c", info("C", 10)), Err(FederationError::Validation(_))));
        assert!(reg.register("a", info("A", 20)).is_ok());
    }

    #[test]
    fn accepts_legacy_compliance_flag() {
        let parsed: ParticipantInfo = serde_json::from_str(
            r#"{"name":"Kaiser","sample_count":100000,"compliance_certificate":"HIPAA-2024","hipaa_compliant":true,"privacy_tier":"medium"}"#,
        ).unwrap();
        assert!(parsed.compliance_attested);
        assert_eq!(parsed.privacy_tier, Some(PrivacyTier::Medium));
    }
}

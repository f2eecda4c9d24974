//! Service tiers and their sandbox resources

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A tenant's service level
///
/// Unknown or empty values resolve to [`Tier::Free`] instead of failing, so a
/// typo in tenant metadata never blocks a run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "enterprise" => Tier::Enterprise,
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl From<String> for Tier {
    fn from(value: String) -> Self {
        Tier::parse(&value)
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> Self {
        tier.as_str().to_string()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory request/limit pair for one sandbox
///
/// CPU is in millicores, memory in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub request_cpu_millis: u32,
    pub request_memory_mib: u32,
    pub limit_cpu_millis: u32,
    pub limit_memory_mib: u32,
}

impl ResourceLimits {
    pub const fn new(
        request_cpu_millis: u32,
        request_memory_mib: u32,
        limit_cpu_millis: u32,
        limit_memory_mib: u32,
    ) -> Self {
        Self {
            request_cpu_millis,
            request_memory_mib,
            limit_cpu_millis,
            limit_memory_mib,
        }
    }

    pub fn cpu_request_quantity(&self) -> String {
        cpu_quantity(self.request_cpu_millis)
    }

    pub fn cpu_limit_quantity(&self) -> String {
        cpu_quantity(self.limit_cpu_millis)
    }

    pub fn memory_request_quantity(&self) -> String {
        memory_quantity(self.request_memory_mib)
    }

    pub fn memory_limit_quantity(&self) -> String {
        memory_quantity(self.limit_memory_mib)
    }

    /// Strictly greater than `other` in every dimension
    pub fn exceeds(&self, other: &ResourceLimits) -> bool {
        self.request_cpu_millis > other.request_cpu_millis
            && self.request_memory_mib > other.request_memory_mib
            && self.limit_cpu_millis > other.limit_cpu_millis
            && self.limit_memory_mib > other.limit_memory_mib
    }
}

/// Renders millicores as a cluster quantity ("500m", "2")
fn cpu_quantity(millis: u32) -> String {
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{}m", millis)
    }
}

/// Renders MiB as a cluster quantity ("512Mi", "2Gi")
fn memory_quantity(mib: u32) -> String {
    if mib % 1024 == 0 {
        format!("{}Gi", mib / 1024)
    } else {
        format!("{}Mi", mib)
    }
}

/// Resource limits per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub free: ResourceLimits,
    pub pro: ResourceLimits,
    pub enterprise: ResourceLimits,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free: ResourceLimits::new(500, 1024, 1000, 2048),
            pro: ResourceLimits::new(1000, 2048, 2000, 4096),
            enterprise: ResourceLimits::new(2000, 4096, 4000, 8192),
        }
    }
}

impl TierPolicy {
    pub fn resolve(&self, tier: Tier) -> ResourceLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }

    /// Resolves a raw tier label; unknown labels get the free tier
    pub fn resolve_label(&self, label: &str) -> ResourceLimits {
        self.resolve(Tier::parse(label))
    }

    /// Checks `limit >= request` per tier and free < pro < enterprise
    pub fn validate(&self) -> Result<(), TierPolicyError> {
        for tier in [Tier::Free, Tier::Pro, Tier::Enterprise] {
            let limits = self.resolve(tier);
            if limits.limit_cpu_millis < limits.request_cpu_millis
                || limits.limit_memory_mib < limits.request_memory_mib
            {
                return Err(TierPolicyError::LimitBelowRequest(tier));
            }
        }
        if !self.pro.exceeds(&self.free) {
            return Err(TierPolicyError::NotOrdered(Tier::Pro, Tier::Free));
        }
        if !self.enterprise.exceeds(&self.pro) {
            return Err(TierPolicyError::NotOrdered(Tier::Enterprise, Tier::Pro));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierPolicyError {
    #[error("{0} tier has a limit below its request")]
    LimitBelowRequest(Tier),

    #[error("{0} tier must exceed {1} tier in every dimension")]
    NotOrdered(Tier, Tier),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tiers_resolve_to_free() {
        let policy = TierPolicy::default();
        let free = policy.resolve_label("free");
        assert_eq!(policy.resolve_label(""), free);
        assert_eq!(policy.resolve_label("unknown"), free);
        assert_eq!(policy.resolve_label("FREE"), free);
    }

    #[test]
    fn test_tiers_are_strictly_ordered() {
        let policy = TierPolicy::default();
        let free = policy.resolve(Tier::Free);
        let pro = policy.resolve(Tier::Pro);
        let enterprise = policy.resolve(Tier::Enterprise);

        assert!(pro.exceeds(&free));
        assert!(enterprise.exceeds(&pro));
        assert!(policy.validate().is_ok());
        assert!(Tier::Free < Tier::Pro && Tier::Pro < Tier::Enterprise);
    }

    #[test]
    fn test_default_policy_quantities() {
        let policy = TierPolicy::default();
        let free = policy.resolve(Tier::Free);
        assert_eq!(free.cpu_request_quantity(), "500m");
        assert_eq!(free.memory_request_quantity(), "1Gi");
        assert_eq!(free.cpu_limit_quantity(), "1");
        assert_eq!(free.memory_limit_quantity(), "2Gi");

        let enterprise = policy.resolve(Tier::Enterprise);
        assert_eq!(enterprise.cpu_limit_quantity(), "4");
        assert_eq!(enterprise.memory_limit_quantity(), "8Gi");
        assert_eq!(ResourceLimits::new(250, 512, 250, 512).memory_request_quantity(), "512Mi");
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let mut policy = TierPolicy::default();
        policy.pro.limit_memory_mib = 1024;
        assert_eq!(
            policy.validate(),
            Err(TierPolicyError::LimitBelowRequest(Tier::Pro))
        );

        let mut policy = TierPolicy::default();
        policy.enterprise = policy.pro;
        assert_eq!(
            policy.validate(),
            Err(TierPolicyError::NotOrdered(Tier::Enterprise, Tier::Pro))
        );
    }

    #[test]
    fn test_tier_serde_round_trip_is_lenient() {
        let tier: Tier = serde_json::from_str("\"Enterprise\"").unwrap();
        assert_eq!(tier, Tier::Enterprise);
        let tier: Tier = serde_json::from_str("\"gold\"").unwrap();
        assert_eq!(tier, Tier::Free);
        assert_eq!(serde_json::to_string(&Tier::Pro).unwrap(), "\"pro\"");
    }
}

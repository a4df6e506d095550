//! Plan tier entitlement policy.
//!
//! The single decision point for which sync types a tenant's plan covers.
//! Callers get a yes/no from [`Tier::allows`] instead of scattering tier
//! checks through the sync paths.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::SyncType;

/// Subscription tiers, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Parse a stored tier value. Unknown or absent tiers resolve to
    /// Starter, so a malformed subscription row fails toward fewer
    /// entitlements rather than more.
    pub fn from_plan(plan_tier: Option<&str>) -> Self {
        match plan_tier {
            Some("enterprise") => Tier::Enterprise,
            Some("pro") => Tier::Pro,
            _ => Tier::Starter,
        }
    }

    /// Whether this tier includes the given sync type.
    ///
    /// Rosters are universal; compliance data (HOS, IFTA) needs pro;
    /// live telematics (locations, faults) needs enterprise.
    pub fn allows(&self, sync_type: SyncType) -> bool {
        match sync_type {
            SyncType::Vehicles | SyncType::Drivers => true,
            SyncType::HosLogs | SyncType::IftaMileage => *self >= Tier::Pro,
            SyncType::VehicleLocations | SyncType::FaultCodes => *self >= Tier::Enterprise,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_gets_rosters_only() {
        let tier = Tier::Starter;
        assert!(tier.allows(SyncType::Vehicles));
        assert!(tier.allows(SyncType::Drivers));
        assert!(!tier.allows(SyncType::HosLogs));
        assert!(!tier.allows(SyncType::IftaMileage));
        assert!(!tier.allows(SyncType::VehicleLocations));
        assert!(!tier.allows(SyncType::FaultCodes));
    }

    #[test]
    fn test_pro_adds_compliance_data() {
        let tier = Tier::Pro;
        assert!(tier.allows(SyncType::HosLogs));
        assert!(tier.allows(SyncType::IftaMileage));
        assert!(!tier.allows(SyncType::VehicleLocations));
        assert!(!tier.allows(SyncType::FaultCodes));
    }

    #[test]
    fn test_enterprise_gets_everything() {
        for sync_type in SyncType::ALL {
            assert!(Tier::Enterprise.allows(sync_type));
        }
    }

    #[test]
    fn test_unknown_plan_falls_back_to_starter() {
        assert_eq!(Tier::from_plan(None), Tier::Starter);
        assert_eq!(Tier::from_plan(Some("free")), Tier::Starter);
        assert_eq!(Tier::from_plan(Some("pro")), Tier::Pro);
        assert_eq!(Tier::from_plan(Some("enterprise")), Tier::Enterprise);
    }
}

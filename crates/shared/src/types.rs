//! Domain types shared between the billing, assessment and API crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monthly credit allowance per subscription tier, in tier order.
pub const TIER_MONTHLY_CREDITS: [(SubscriptionTier, i64); 7] = [
    (SubscriptionTier::Free, 0),
    (SubscriptionTier::Standard, 20),
    (SubscriptionTier::Premium, 50),
    (SubscriptionTier::Family, 100),
    (SubscriptionTier::Classroom, 300),
    (SubscriptionTier::School, 1000),
    (SubscriptionTier::District, 5000),
];

/// Error returned when a tier or status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Subscription plan level, controlling the monthly credit allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Standard,
    Premium,
    Family,
    Classroom,
    School,
    District,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Standard => "standard",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Family => "family",
            SubscriptionTier::Classroom => "classroom",
            SubscriptionTier::School => "school",
            SubscriptionTier::District => "district",
        }
    }

    /// Credits granted on each subscription start and renewal
    pub fn monthly_credits(&self) -> i64 {
        TIER_MONTHLY_CREDITS
            .iter()
            .find(|(tier, _)| tier == self)
            .map(|(_, credits)| *credits)
            .unwrap_or(0)
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "standard" => Ok(SubscriptionTier::Standard),
            "premium" => Ok(SubscriptionTier::Premium),
            "family" => Ok(SubscriptionTier::Family),
            "classroom" => Ok(SubscriptionTier::Classroom),
            "school" => Ok(SubscriptionTier::School),
            "district" => Ok(SubscriptionTier::District),
            _ => Err(ParseEnumError {
                kind: "subscription tier",
                value: s.to_string(),
            }),
        }
    }
}

/// Mirror of the payment provider's subscription status.
///
/// Values are copied verbatim from the provider, so every provider status has a variant
/// even though the reconciliation flow itself only writes `active`, `past_due` and `canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// `canceled` ends the lifecycle of a subscription id
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            // Stripe spells it "canceled"; accept the British spelling from older rows
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Canceled),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Ok(SubscriptionStatus::IncompleteExpired),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "paused" => Ok(SubscriptionStatus::Paused),
            _ => Err(ParseEnumError {
                kind: "subscription status",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_credit_table() {
        assert_eq!(SubscriptionTier::Free.monthly_credits(), 0);
        assert_eq!(SubscriptionTier::Standard.monthly_credits(), 20);
        assert_eq!(SubscriptionTier::Premium.monthly_credits(), 50);
        assert_eq!(SubscriptionTier::Family.monthly_credits(), 100);
        assert_eq!(SubscriptionTier::Classroom.monthly_credits(), 300);
        assert_eq!(SubscriptionTier::School.monthly_credits(), 1000);
        assert_eq!(SubscriptionTier::District.monthly_credits(), 5000);
    }

    #[test]
    fn test_tier_parsing_is_case_insensitive() {
        assert_eq!(
            "Premium".parse::<SubscriptionTier>(),
            Ok(SubscriptionTier::Premium)
        );
        assert_eq!(
            "district".parse::<SubscriptionTier>(),
            Ok(SubscriptionTier::District)
        );
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_tier_serializes_snake_case() {
        let json = serde_json::to_string(&SubscriptionTier::Classroom).unwrap();
        assert_eq!(json, "\"classroom\"");
    }

    #[test]
    fn test_status_round_trips_provider_strings() {
        for raw in [
            "active",
            "past_due",
            "canceled",
            "trialing",
            "incomplete",
            "incomplete_expired",
            "unpaid",
            "paused",
        ] {
            let status: SubscriptionStatus = raw.parse().unwrap();
            assert_eq!(status.as_str(), raw);
        }
    }

    #[test]
    fn test_only_canceled_is_terminal() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
    }
}

//! Price id configuration and tier resolution
//!
//! Price ids are read from the environment with hard-coded fallbacks so that a
//! fresh checkout works against the Stripe test-mode catalogue.

use learnwell_shared::SubscriptionTier;
use serde::Serialize;

/// Monthly and yearly price ids for one self-serve tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPrices {
    pub monthly: String,
    pub yearly: String,
}

impl PlanPrices {
    pub fn new(monthly: impl Into<String>, yearly: impl Into<String>) -> Self {
        Self {
            monthly: monthly.into(),
            yearly: yearly.into(),
        }
    }

    pub fn contains(&self, price_id: &str) -> bool {
        self.monthly == price_id || self.yearly == price_id
    }
}

/// Recurring prices for the self-serve tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionPlans {
    pub standard: PlanPrices,
    pub premium: PlanPrices,
    pub family: PlanPrices,
}

impl Default for SubscriptionPlans {
    fn default() -> Self {
        Self {
            standard: PlanPrices::new("price_standard_monthly", "price_standard_yearly"),
            premium: PlanPrices::new("price_premium_monthly", "price_premium_yearly"),
            family: PlanPrices::new("price_family_monthly", "price_family_yearly"),
        }
    }
}

impl SubscriptionPlans {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            standard: PlanPrices::new(
                env_or("STRIPE_PRICE_STANDARD_MONTHLY", &defaults.standard.monthly),
                env_or("STRIPE_PRICE_STANDARD_YEARLY", &defaults.standard.yearly),
            ),
            premium: PlanPrices::new(
                env_or("STRIPE_PRICE_PREMIUM_MONTHLY", &defaults.premium.monthly),
                env_or("STRIPE_PRICE_PREMIUM_YEARLY", &defaults.premium.yearly),
            ),
            family: PlanPrices::new(
                env_or("STRIPE_PRICE_FAMILY_MONTHLY", &defaults.family.monthly),
                env_or("STRIPE_PRICE_FAMILY_YEARLY", &defaults.family.yearly),
            ),
        }
    }

    /// Map a recurring price id to its tier.
    ///
    /// Premium and family prices are matched explicitly; every other price id
    /// resolves to standard. An id that isn't a known standard price is still
    /// treated as standard but logged, since it usually means a price was added
    /// in the Stripe dashboard without being configured here.
    pub fn tier_for_price_id(&self, price_id: &str) -> SubscriptionTier {
        if self.premium.contains(price_id) {
            SubscriptionTier::Premium
        } else if self.family.contains(price_id) {
            SubscriptionTier::Family
        } else {
            if !self.standard.contains(price_id) {
                tracing::warn!(
                    price_id = %price_id,
                    "Unrecognized subscription price id, defaulting to standard tier"
                );
            }
            SubscriptionTier::Standard
        }
    }

    /// Tier for an optional price id (a subscription without items resolves to standard)
    pub fn tier_for_optional_price(&self, price_id: Option<&str>) -> SubscriptionTier {
        match price_id {
            Some(price_id) => self.tier_for_price_id(price_id),
            None => {
                tracing::warn!("Subscription has no price, defaulting to standard tier");
                SubscriptionTier::Standard
            }
        }
    }
}

/// A one-off credit package sold through payment-mode checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditPackage {
    pub price_id: String,
    /// Credits granted per unit purchased
    pub credits: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditPackages {
    pub packages: Vec<CreditPackage>,
}

impl Default for CreditPackages {
    fn default() -> Self {
        Self {
            packages: vec![
                CreditPackage {
                    price_id: "price_credits_10".to_string(),
                    credits: 10,
                },
                CreditPackage {
                    price_id: "price_credits_50".to_string(),
                    credits: 50,
                },
                CreditPackage {
                    price_id: "price_credits_100".to_string(),
                    credits: 100,
                },
            ],
        }
    }
}

impl CreditPackages {
    pub fn from_env() -> Self {
        let packages = Self::default()
            .packages
            .into_iter()
            .map(|package| CreditPackage {
                price_id: env_or(
                    &format!("STRIPE_PRICE_CREDITS_{}", package.credits),
                    &package.price_id,
                ),
                credits: package.credits,
            })
            .collect();
        Self { packages }
    }

    pub fn find(&self, price_id: &str) -> Option<&CreditPackage> {
        self.packages.iter().find(|p| p.price_id == price_id)
    }
}

/// All configured price ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceIds {
    pub plans: SubscriptionPlans,
    pub credit_packages: CreditPackages,
}

impl PriceIds {
    pub fn from_env() -> Self {
        Self {
            plans: SubscriptionPlans::from_env(),
            credit_packages: CreditPackages::from_env(),
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premium_prices_resolve_to_premium() {
        let plans = SubscriptionPlans::default();
        assert_eq!(
            plans.tier_for_price_id("price_premium_monthly"),
            SubscriptionTier::Premium
        );
        assert_eq!(
            plans.tier_for_price_id("price_premium_yearly"),
            SubscriptionTier::Premium
        );
    }

    #[test]
    fn test_family_prices_resolve_to_family() {
        let plans = SubscriptionPlans::default();
        assert_eq!(
            plans.tier_for_price_id("price_family_monthly"),
            SubscriptionTier::Family
        );
        assert_eq!(
            plans.tier_for_price_id("price_family_yearly"),
            SubscriptionTier::Family
        );
    }

    #[test]
    fn test_any_other_price_resolves_to_standard() {
        let plans = SubscriptionPlans::default();
        assert_eq!(
            plans.tier_for_price_id("price_standard_monthly"),
            SubscriptionTier::Standard
        );
        // Unknown ids silently become standard, including ones that look premium
        assert_eq!(
            plans.tier_for_price_id("price_premium_v2_monthly"),
            SubscriptionTier::Standard
        );
        assert_eq!(plans.tier_for_price_id(""), SubscriptionTier::Standard);
        assert_eq!(
            plans.tier_for_optional_price(None),
            SubscriptionTier::Standard
        );
    }

    #[test]
    fn test_custom_plan_ids() {
        let plans = SubscriptionPlans {
            standard: PlanPrices::new("s1", "s2"),
            premium: PlanPrices::new("p1", "p2"),
            family: PlanPrices::new("f1", "f2"),
        };
        assert_eq!(plans.tier_for_price_id("p2"), SubscriptionTier::Premium);
        assert_eq!(plans.tier_for_price_id("f1"), SubscriptionTier::Family);
        assert_eq!(
            plans.tier_for_price_id("price_premium_monthly"),
            SubscriptionTier::Standard
        );
    }

    #[test]
    fn test_credit_package_lookup() {
        let packages = CreditPackages::default();
        assert_eq!(packages.find("price_credits_50").map(|p| p.credits), Some(50));
        assert!(packages.find("price_credits_75").is_none());
    }
}

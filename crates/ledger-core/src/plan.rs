//! The static pricing-plan catalogue.
//!
//! Plans are code-defined, not database rows. Ledger entries and
//! subscriptions store only the plan's `db_value`; everything else is
//! resolved through this catalogue. Deprecated plans stay in the table
//! so that old ledger entries keep resolving.

use serde::{Deserialize, Serialize};

/// Credits granted per dollar on add-on and auto-recharge top-ups.
pub const ADDON_CREDITS_PER_DOLLAR: i64 = 100;

/// A catalogue entry describing one recurring plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDef {
    /// Stable integer stored on ledger entries and subscriptions.
    pub db_value: i32,
    /// Machine key, also used in Stripe subscription metadata.
    pub key: &'static str,
    /// Human-readable title.
    pub title: &'static str,
    /// Monthly charge in whole dollars.
    pub monthly_charge: i64,
    /// Credits granted per billing cycle.
    pub credits: i64,
    /// Hidden from new signups; still resolvable for old records.
    pub deprecated: bool,
    /// Stripe product name used on recurring line items.
    pub stripe_product_name: Option<&'static str>,
    /// PayPal billing plan id.
    pub paypal_plan_id: Option<&'static str>,
}

/// Available recurring plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingPlan {
    /// Legacy $10/month plan, hidden from new signups.
    Basic,
    /// Legacy $50/month plan, hidden from new signups.
    Premium,
    /// Free tier.
    Starter,
    /// $20/month.
    Creator,
    /// $199/month.
    Business,
    /// Custom pricing, arranged via sales.
    Enterprise,
}

const BASIC: PlanDef = PlanDef {
    db_value: 1,
    key: "basic",
    title: "Basic",
    monthly_charge: 10,
    credits: 1_500,
    deprecated: true,
    stripe_product_name: Some("Gooey.AI Basic Plan"),
    paypal_plan_id: Some("P-GOOEY-BASIC-10"),
};

const PREMIUM: PlanDef = PlanDef {
    db_value: 2,
    key: "premium",
    title: "Premium",
    monthly_charge: 50,
    credits: 10_000,
    deprecated: true,
    stripe_product_name: Some("Gooey.AI Premium Plan"),
    paypal_plan_id: Some("P-GOOEY-PREMIUM-50"),
};

const STARTER: PlanDef = PlanDef {
    db_value: 3,
    key: "starter",
    title: "Starter",
    monthly_charge: 0,
    credits: 0,
    deprecated: false,
    stripe_product_name: None,
    paypal_plan_id: None,
};

const CREATOR: PlanDef = PlanDef {
    db_value: 4,
    key: "creator",
    title: "Creator",
    monthly_charge: 20,
    credits: 2_000,
    deprecated: false,
    stripe_product_name: Some("Gooey.AI Creator Plan"),
    paypal_plan_id: Some("P-GOOEY-CREATOR-20"),
};

const BUSINESS: PlanDef = PlanDef {
    db_value: 5,
    key: "business",
    title: "Business",
    monthly_charge: 199,
    credits: 20_000,
    deprecated: false,
    stripe_product_name: Some("Gooey.AI Business Plan"),
    paypal_plan_id: Some("P-GOOEY-BUSINESS-199"),
};

const ENTERPRISE: PlanDef = PlanDef {
    db_value: 6,
    key: "enterprise",
    title: "Enterprise",
    monthly_charge: 0,
    credits: 0,
    deprecated: false,
    stripe_product_name: None,
    paypal_plan_id: None,
};

impl PricingPlan {
    /// All plans, in catalogue order.
    pub const ALL: [Self; 6] = [
        Self::Basic,
        Self::Premium,
        Self::Starter,
        Self::Creator,
        Self::Business,
        Self::Enterprise,
    ];

    /// The catalogue entry for this plan.
    #[must_use]
    pub const fn def(self) -> &'static PlanDef {
        match self {
            Self::Basic => &BASIC,
            Self::Premium => &PREMIUM,
            Self::Starter => &STARTER,
            Self::Creator => &CREATOR,
            Self::Business => &BUSINESS,
            Self::Enterprise => &ENTERPRISE,
        }
    }

    /// The stable integer stored in the database.
    #[must_use]
    pub const fn db_value(self) -> i32 {
        self.def().db_value
    }

    /// Resolve a plan by its stored integer value.
    #[must_use]
    pub fn from_db_value(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.db_value() == value)
    }

    /// Resolve a plan by the Stripe product name on its recurring price.
    #[must_use]
    pub fn get_by_stripe_product(product_name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.def().stripe_product_name == Some(product_name))
    }

    /// Resolve a plan by its PayPal billing plan id.
    #[must_use]
    pub fn get_by_paypal_plan_id(plan_id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.def().paypal_plan_id == Some(plan_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_values_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for plan in PricingPlan::ALL {
            assert!(seen.insert(plan.db_value()), "duplicate db_value for {plan:?}");
        }
    }

    #[test]
    fn from_db_value_roundtrip() {
        for plan in PricingPlan::ALL {
            assert_eq!(PricingPlan::from_db_value(plan.db_value()), Some(plan));
        }
        assert_eq!(PricingPlan::from_db_value(999), None);
    }

    #[test]
    fn deprecated_plans_still_resolve() {
        let basic = PricingPlan::from_db_value(1).unwrap();
        assert!(basic.def().deprecated);
        assert_eq!(basic.def().credits, 1_500);
    }

    #[test]
    fn lookup_by_stripe_product() {
        assert_eq!(
            PricingPlan::get_by_stripe_product("Gooey.AI Creator Plan"),
            Some(PricingPlan::Creator)
        );
        assert_eq!(PricingPlan::get_by_stripe_product("Unknown"), None);
    }

    #[test]
    fn lookup_by_paypal_plan_id() {
        assert_eq!(
            PricingPlan::get_by_paypal_plan_id("P-GOOEY-CREATOR-20"),
            Some(PricingPlan::Creator)
        );
    }

}

//! Subscription state.
//!
//! At most one subscription is attached to a workspace at a time. The
//! (provider, external id) pair identifies the provider-side
//! subscription; reconciliation treats a mismatch between the two as a
//! bug and replaces the stale one defensively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::PaymentProvider;
use crate::plan::PricingPlan;

/// Allowed values for `auto_recharge_balance_threshold` (credits).
pub const AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES: [i64; 4] = [300, 1_000, 3_000, 10_000];

/// Allowed values for `auto_recharge_topup_amount` (dollars).
pub const ADDON_AMOUNT_CHOICES: [i64; 6] = [10, 50, 100, 500, 1_000, 5_000];

/// A workspace's recurring-plan binding and auto-recharge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Database id. Zero until persisted.
    pub id: i64,

    /// `db_value` of the bound plan.
    pub plan: i32,

    /// The provider billing this subscription, if the plan is paid.
    pub payment_provider: Option<PaymentProvider>,

    /// The provider's subscription id.
    pub external_id: Option<String>,

    /// Whether low-balance top-ups are enabled.
    pub auto_recharge_enabled: bool,

    /// Trigger a top-up when balance drops below this (credits).
    pub auto_recharge_balance_threshold: Option<i64>,

    /// Top-up purchase amount, in dollars.
    pub auto_recharge_topup_amount: Option<i64>,

    /// Hard cap on auto-recharge spending per calendar month (dollars).
    pub monthly_spending_budget: Option<i64>,

    /// Notify the owner once monthly spending crosses this (dollars).
    pub monthly_spending_notification_threshold: Option<i64>,

    /// When the spending-threshold email was last sent.
    pub monthly_spending_notification_sent_at: Option<DateTime<Utc>>,

    /// When the budget-reached email was last sent.
    pub monthly_budget_email_sent_at: Option<DateTime<Utc>>,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,

    /// When the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create an unsaved subscription bound to a plan.
    #[must_use]
    pub fn new(plan: PricingPlan) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            plan: plan.db_value(),
            payment_provider: None,
            external_id: None,
            auto_recharge_enabled: false,
            auto_recharge_balance_threshold: None,
            auto_recharge_topup_amount: None,
            monthly_spending_budget: None,
            monthly_spending_notification_threshold: None,
            monthly_spending_notification_sent_at: None,
            monthly_budget_email_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The resolved plan, if the stored value is still in the catalogue.
    #[must_use]
    pub fn pricing_plan(&self) -> Option<PricingPlan> {
        PricingPlan::from_db_value(self.plan)
    }

    /// Whether this subscription matches a provider-side subscription.
    #[must_use]
    pub fn matches(&self, provider: PaymentProvider, external_id: &str) -> bool {
        self.payment_provider == Some(provider) && self.external_id.as_deref() == Some(external_id)
    }

    /// Model-level validation, run before every save.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownPlan` if the plan value does not
    /// resolve, and `LedgerError::InvalidSubscription` for impossible
    /// provider/auto-recharge states.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let plan =
            PricingPlan::from_db_value(self.plan).ok_or(LedgerError::UnknownPlan(self.plan))?;

        match (&self.payment_provider, &self.external_id) {
            (Some(_), Some(id)) if id.is_empty() => {
                return Err(LedgerError::InvalidSubscription(
                    "external_id must not be empty".into(),
                ));
            }
            (Some(_), None) => {
                return Err(LedgerError::InvalidSubscription(
                    "payment_provider set without external_id".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(LedgerError::InvalidSubscription(
                    "external_id set without payment_provider".into(),
                ));
            }
            _ => {}
        }

        if plan.def().monthly_charge > 0 && self.payment_provider.is_none() {
            return Err(LedgerError::InvalidSubscription(format!(
                "paid plan {} requires a payment provider",
                plan.def().key
            )));
        }

        if let Some(threshold) = self.auto_recharge_balance_threshold {
            if !AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES.contains(&threshold) {
                return Err(LedgerError::InvalidSubscription(format!(
                    "{threshold} not in {AUTO_RECHARGE_BALANCE_THRESHOLD_CHOICES:?}"
                )));
            }
        }
        if let Some(amount) = self.auto_recharge_topup_amount {
            if !ADDON_AMOUNT_CHOICES.contains(&amount) {
                return Err(LedgerError::InvalidSubscription(format!(
                    "{amount} not in {ADDON_AMOUNT_CHOICES:?}"
                )));
            }
        }

        Ok(())
    }

    /// Whether the spending-threshold email should go out: a threshold
    /// is configured, spending has crossed it, and no email has been
    /// sent yet this calendar month.
    #[must_use]
    pub fn should_send_monthly_spending_notification(
        &self,
        dollars_spent_this_month: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(threshold) = self.monthly_spending_notification_threshold else {
            return false;
        };
        #[allow(clippy::cast_precision_loss)]
        if dollars_spent_this_month < threshold as f64 {
            return false;
        }
        !sent_this_month(self.monthly_spending_notification_sent_at, now)
    }

    /// Whether the budget-reached email should go out this month.
    #[must_use]
    pub fn should_send_budget_email(&self, now: DateTime<Utc>) -> bool {
        !sent_this_month(self.monthly_budget_email_sent_at, now)
    }
}

fn sent_this_month(sent_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    use chrono::Datelike;
    sent_at.is_some_and(|at| at.year() == now.year() && at.month() == now.month())
}

/// How an "active subscription" event maps onto the installed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTransition {
    /// No subscription installed; create one.
    Install,
    /// Same (provider, external id); swap the plan in place.
    UpdateInPlace,
    /// A different live subscription is installed. This is the
    /// invalid-state branch: the stale one must be cancelled
    /// provider-side and replaced.
    Replace,
}

/// Decide how to apply an active-subscription event.
#[must_use]
pub fn plan_transition(
    current: Option<&Subscription>,
    provider: PaymentProvider,
    external_id: &str,
) -> SubscriptionTransition {
    match current {
        None => SubscriptionTransition::Install,
        Some(sub) if sub.matches(provider, external_id) => SubscriptionTransition::UpdateInPlace,
        Some(_) => SubscriptionTransition::Replace,
    }
}

/// How a cancellation event maps onto the installed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationTransition {
    /// The event matches the installed subscription; detach it.
    Detach,
    /// The event is for an already-replaced (or unknown) subscription;
    /// ignore it.
    IgnoreStale,
}

/// Decide how to apply a subscription-cancelled event.
#[must_use]
pub fn cancellation_transition(
    current: Option<&Subscription>,
    provider: PaymentProvider,
    external_id: &str,
) -> CancellationTransition {
    match current {
        Some(sub) if sub.matches(provider, external_id) => CancellationTransition::Detach,
        _ => CancellationTransition::IgnoreStale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn paid_sub() -> Subscription {
        let mut sub = Subscription::new(PricingPlan::Creator);
        sub.payment_provider = Some(PaymentProvider::Stripe);
        sub.external_id = Some("sub_123".into());
        sub
    }

    #[test]
    fn valid_paid_subscription_passes() {
        paid_sub().validate().unwrap();
    }

    #[test]
    fn free_plan_needs_no_provider() {
        Subscription::new(PricingPlan::Starter).validate().unwrap();
    }

    #[test]
    fn paid_plan_without_provider_is_rejected() {
        let sub = Subscription::new(PricingPlan::Creator);
        assert!(matches!(
            sub.validate(),
            Err(LedgerError::InvalidSubscription(_))
        ));
    }

    #[test]
    fn provider_without_external_id_is_rejected() {
        let mut sub = paid_sub();
        sub.external_id = None;
        assert!(sub.validate().is_err());
    }

    #[test]
    fn unknown_plan_is_rejected() {
        let mut sub = paid_sub();
        sub.plan = 999;
        assert!(matches!(sub.validate(), Err(LedgerError::UnknownPlan(999))));
    }

    #[test]
    fn threshold_must_come_from_choices() {
        let mut sub = paid_sub();
        sub.auto_recharge_balance_threshold = Some(123);
        assert!(sub.validate().is_err());
        sub.auto_recharge_balance_threshold = Some(1_000);
        sub.validate().unwrap();
    }

    #[test]
    fn matches_requires_both_fields() {
        let sub = paid_sub();
        assert!(sub.matches(PaymentProvider::Stripe, "sub_123"));
        assert!(!sub.matches(PaymentProvider::Stripe, "sub_456"));
        assert!(!sub.matches(PaymentProvider::Paypal, "sub_123"));
    }

    #[test]
    fn spending_notification_sent_once_per_month() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let mut sub = paid_sub();
        sub.monthly_spending_notification_threshold = Some(100);

        assert!(sub.should_send_monthly_spending_notification(150.0, now));
        assert!(!sub.should_send_monthly_spending_notification(50.0, now));

        sub.monthly_spending_notification_sent_at =
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(!sub.should_send_monthly_spending_notification(150.0, now));

        // new month resets the latch
        sub.monthly_spending_notification_sent_at =
            Some(Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap());
        assert!(sub.should_send_monthly_spending_notification(150.0, now));
    }

    #[test]
    fn first_active_event_installs() {
        assert_eq!(
            plan_transition(None, PaymentProvider::Stripe, "sub_123"),
            SubscriptionTransition::Install
        );
    }

    #[test]
    fn matching_event_updates_plan_in_place() {
        let sub = paid_sub();
        assert_eq!(
            plan_transition(Some(&sub), PaymentProvider::Stripe, "sub_123"),
            SubscriptionTransition::UpdateInPlace
        );
    }

    #[test]
    fn different_external_id_replaces_stale() {
        let sub = paid_sub();
        assert_eq!(
            plan_transition(Some(&sub), PaymentProvider::Stripe, "sub_456"),
            SubscriptionTransition::Replace
        );
        assert_eq!(
            plan_transition(Some(&sub), PaymentProvider::Paypal, "sub_123"),
            SubscriptionTransition::Replace
        );
    }

    #[test]
    fn matching_cancellation_detaches() {
        let sub = paid_sub();
        assert_eq!(
            cancellation_transition(Some(&sub), PaymentProvider::Stripe, "sub_123"),
            CancellationTransition::Detach
        );
    }

    #[test]
    fn stale_cancellation_is_ignored() {
        let sub = paid_sub();
        assert_eq!(
            cancellation_transition(Some(&sub), PaymentProvider::Stripe, "sub_old"),
            CancellationTransition::IgnoreStale
        );
        assert_eq!(
            cancellation_transition(None, PaymentProvider::Stripe, "sub_123"),
            CancellationTransition::IgnoreStale
        );
    }

    #[test]
    fn budget_email_sent_once_per_month() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let mut sub = paid_sub();
        assert!(sub.should_send_budget_email(now));
        sub.monthly_budget_email_sent_at = Some(now);
        assert!(!sub.should_send_budget_email(now));
    }
}

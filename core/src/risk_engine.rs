//! The risk rule engine.
//!
//! EVALUATION ORDER (fixed, documented, never reordered):
//!   1. Amount spike              (order total vs. customer average)
//!   2. Location mismatch         (checkout vs. registration location)
//!   3. New account large order
//!   4. Order velocity            (orders in the trailing window)
//!   5. Address mismatch          (shipping vs. billing, large orders)
//!   6. Unusual hour              (local time of day)
//!   7. Bulk high-value item
//!
//! RULES:
//!   - Every rule runs on every evaluation; no rule short-circuits another.
//!   - The score is a `RiskTally` folded through the rules by value.
//!   - A rule that fails to load its inputs counts as not fired and is logged.
//!   - An assessment is written exactly once, then frozen.

use crate::{
    catalog::{Cart, Customer},
    config::RiskPolicy,
    error::{ShopError, ShopResult},
    event::ShopEvent,
    risk_rules::{standard_rules, OrderHistory, RiskReason, RiskRule, RuleContext},
    store::ShopStore,
    transaction_record::TransactionSnapshot,
    types::{Timestamp, TransactionId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub transaction_id: TransactionId,
    pub is_flagged:     bool,
    pub risk_score:     u32,
    /// Fired rules in evaluation order.
    pub reasons:        Vec<RiskReason>,
    /// `None` until the engine has run.
    pub evaluated_at:   Option<Timestamp>,
}

impl RiskAssessment {
    /// The state a snapshot's assessment starts in.
    pub fn unevaluated(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            is_flagged: false,
            risk_score: 0,
            reasons: Vec::new(),
            evaluated_at: None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated_at.is_some()
    }
}

/// Running score threaded through the rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskTally {
    score:   u32,
    reasons: Vec<RiskReason>,
}

impl RiskTally {
    /// Add one fired rule. The score only ever grows.
    pub fn record(mut self, reason: RiskReason) -> Self {
        self.score = self.score.saturating_add(reason.points);
        self.reasons.push(reason);
        self
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn reasons(&self) -> &[RiskReason] {
        &self.reasons
    }
}

pub struct RiskEngine {
    policy: RiskPolicy,
    rules:  Vec<Box<dyn RiskRule>>,
}

impl RiskEngine {
    /// Engine with the production rule set registered in order.
    pub fn new(policy: RiskPolicy) -> Self {
        Self::with_rules(policy, standard_rules())
    }

    pub fn with_rules(policy: RiskPolicy, rules: Vec<Box<dyn RiskRule>>) -> Self {
        Self { policy, rules }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn is_flagged(&self, score: u32) -> bool {
        score >= self.policy.flag_threshold
    }

    /// Run every rule against `ctx` and fold the results into a tally.
    pub fn score(&self, ctx: &RuleContext<'_>) -> RiskTally {
        self.rules.iter().fold(RiskTally::default(), |tally, rule| {
            let id = rule.id();
            match rule.check(ctx) {
                Ok(Some(detail)) => {
                    let points = self.policy.points.for_rule(id);
                    log::debug!(
                        "transaction {}: rule {id} fired (+{points}): {detail}",
                        ctx.snapshot.transaction_id
                    );
                    tally.record(RiskReason { rule: id, detail, points })
                }
                Ok(None) => tally,
                Err(e) => {
                    log::warn!(
                        "transaction {}: rule {id} skipped, inputs unavailable: {e}",
                        ctx.snapshot.transaction_id
                    );
                    tally
                }
            }
        })
    }

    /// Evaluate a recorded snapshot and freeze its assessment.
    pub fn evaluate(
        &self,
        store: &ShopStore,
        snapshot: &TransactionSnapshot,
        cart: &Cart,
        user: &Customer,
        now: Timestamp,
    ) -> ShopResult<RiskAssessment> {
        self.evaluate_with_history(store, store, snapshot, cart, user, now)
    }

    /// As `evaluate`, reading order history through `history`.
    pub fn evaluate_with_history(
        &self,
        store: &ShopStore,
        history: &dyn OrderHistory,
        snapshot: &TransactionSnapshot,
        cart: &Cart,
        user: &Customer,
        now: Timestamp,
    ) -> ShopResult<RiskAssessment> {
        let transaction_id = snapshot.transaction_id;
        let existing = store
            .get_risk_assessment(transaction_id)?
            .ok_or_else(|| ShopError::not_found("risk assessment", transaction_id))?;
        if existing.is_evaluated() {
            return Err(ShopError::Validation(format!(
                "transaction {transaction_id} has already been evaluated"
            )));
        }

        let ctx = RuleContext {
            snapshot,
            cart,
            user,
            history,
            policy: &self.policy,
            now,
        };
        let tally = self.score(&ctx);
        let assessment = RiskAssessment {
            transaction_id,
            is_flagged: self.is_flagged(tally.score()),
            risk_score: tally.score(),
            reasons: tally.reasons,
            evaluated_at: Some(now),
        };

        store.atomically(|store| {
            if !store.finalize_risk_assessment(&assessment)? {
                return Err(ShopError::Validation(format!(
                    "transaction {transaction_id} has already been evaluated"
                )));
            }
            store.append_event(
                &ShopEvent::RiskEvaluated {
                    transaction_id,
                    risk_score: assessment.risk_score,
                    is_flagged: assessment.is_flagged,
                    rules_fired: assessment
                        .reasons
                        .iter()
                        .map(|r| r.rule.as_str().to_string())
                        .collect(),
                },
                now,
            )
        })?;

        if assessment.is_flagged {
            log::info!(
                "transaction {transaction_id} flagged: score={} reasons={}",
                assessment.risk_score,
                assessment.reasons.len()
            );
        } else {
            log::debug!(
                "transaction {transaction_id} passed: score={}",
                assessment.risk_score
            );
        }
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{risk_rules::RuleId, types::UserId};
    use rust_decimal::Decimal;

    struct Fires(RuleId);

    impl RiskRule for Fires {
        fn id(&self) -> RuleId {
            self.0
        }
        fn check(&self, _ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
            Ok(Some(format!("{} fired", self.0)))
        }
    }

    struct Broken;

    impl RiskRule for Broken {
        fn id(&self) -> RuleId {
            RuleId::OrderVelocity
        }
        fn check(&self, _ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
            Err(ShopError::Validation("history unavailable".into()))
        }
    }

    #[test]
    fn tally_accumulates_points_in_order() {
        let tally = RiskTally::default()
            .record(RiskReason { rule: RuleId::LocationMismatch, detail: "a".into(), points: 20 })
            .record(RiskReason { rule: RuleId::AmountSpike, detail: "b".into(), points: 25 });
        assert_eq!(tally.score(), 45);
        let rules: Vec<_> = tally.reasons().iter().map(|r| r.rule).collect();
        assert_eq!(rules, vec![RuleId::LocationMismatch, RuleId::AmountSpike]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let engine = RiskEngine::with_rules(RiskPolicy::default(), vec![]);
        assert!(!engine.is_flagged(39));
        assert!(engine.is_flagged(40));
        assert!(engine.is_flagged(41));
    }

    #[test]
    fn registered_rules_keep_their_order() {
        let engine = RiskEngine::with_rules(
            RiskPolicy::default(),
            vec![Box::new(Fires(RuleId::UnusualHour)), Box::new(Broken), Box::new(Fires(RuleId::AmountSpike))],
        );
        let ids: Vec<_> = engine.rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![RuleId::UnusualHour, RuleId::OrderVelocity, RuleId::AmountSpike]);
    }

    struct NoHistory;

    impl OrderHistory for NoHistory {
        fn count_orders_since(&self, _user_id: UserId, _since: Timestamp) -> ShopResult<i64> {
            Ok(0)
        }
    }

    #[test]
    fn failing_rule_is_skipped_and_the_rest_still_score() {
        let now: Timestamp = "2026-03-10T14:00:00Z".parse().unwrap();
        let snapshot = TransactionSnapshot {
            transaction_id: 7,
            user_id: 1,
            order_total: Decimal::from(100),
            confirmed_location: "LA".into(),
            registration_location: "LA".into(),
            shipping_address: "1 Main St".into(),
            billing_address: "1 Main St".into(),
            device_info: Default::default(),
            is_first_purchase: true,
            user_order_average: Decimal::ZERO,
            created_at: now,
        };
        let cart = Cart { cart_id: 3, user_id: 1, lines: vec![] };
        let user = Customer {
            user_id: 1,
            username: "ada".into(),
            location: "LA".into(),
            date_joined: now,
            is_staff: false,
        };
        let policy = RiskPolicy::default();
        let ctx = RuleContext { snapshot: &snapshot, cart: &cart, user: &user, history: &NoHistory, policy: &policy, now };

        let engine = RiskEngine::with_rules(
            RiskPolicy::default(),
            vec![Box::new(Fires(RuleId::UnusualHour)), Box::new(Broken), Box::new(Fires(RuleId::AmountSpike))],
        );
        let tally = engine.score(&ctx);

        assert_eq!(tally.score(), 10 + 25);
        let fired: Vec<_> = tally.reasons().iter().map(|r| (r.rule, r.points)).collect();
        assert_eq!(fired, vec![(RuleId::UnusualHour, 10), (RuleId::AmountSpike, 25)]);
        assert!(tally.reasons().iter().all(|r| r.rule != RuleId::OrderVelocity));
        assert_eq!(tally.reasons()[0].detail, "unusual_hour fired");
    }
}

//! Command structs for engine operations.
//!
//! These types group parameters for write operations, keeping call sites
//! readable and avoiding long argument lists.

use uuid::Uuid;

use crate::{Category, EngineError, MoneyCents, ResultEngine, RuleAction};

const MAX_RULE_NAME_CHARS: usize = 100;

/// Create a savings rule.
#[derive(Clone, Debug)]
pub struct NewRule {
    pub user_id: Uuid,
    pub name: String,
    pub category: Category,
    pub min_amount: Option<MoneyCents>,
    pub max_amount: Option<MoneyCents>,
    pub action: RuleAction,
    pub target_account_id: Uuid,
    pub priority: i32,
}

impl NewRule {
    #[must_use]
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        category: Category,
        action: RuleAction,
        target_account_id: Uuid,
    ) -> Self {
        Self {
            user_id,
            name: name.into(),
            category,
            min_amount: None,
            max_amount: None,
            action,
            target_account_id,
            priority: 0,
        }
    }

    #[must_use]
    pub fn min_amount(mut self, cents: i64) -> Self {
        self.min_amount = Some(MoneyCents::new(cents));
        self
    }

    #[must_use]
    pub fn max_amount(mut self, cents: i64) -> Self {
        self.max_amount = Some(MoneyCents::new(cents));
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Checks everything that does not need the database. Returns the
    /// trimmed name.
    pub(crate) fn validate(&self) -> ResultEngine<String> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_RULE_NAME_CHARS {
            return Err(EngineError::InvalidRule(format!(
                "name must be 1 to {MAX_RULE_NAME_CHARS} characters"
            )));
        }
        if self.category.is_transfer() {
            return Err(EngineError::InvalidRule(
                "transfers cannot trigger rules".to_string(),
            ));
        }
        if self.min_amount.is_some_and(|min| min < MoneyCents::ZERO)
            || self.max_amount.is_some_and(|max| max < MoneyCents::ZERO)
        {
            return Err(EngineError::InvalidAmount(
                "amount bounds must not be negative".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount)
            && min > max
        {
            return Err(EngineError::InvalidAmount(format!(
                "min amount {min} is above max amount {max}"
            )));
        }
        let value = self.action.value();
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidRule(
                "action value must be a non-negative number".to_string(),
            ));
        }
        if self.priority < 0 {
            return Err(EngineError::InvalidRule(
                "priority must not be negative".to_string(),
            ));
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> NewRule {
        NewRule::new(
            Uuid::new_v4(),
            "  Coffee round-up ",
            Category::Dining,
            RuleAction::Fixed { dollars: 1.0 },
            Uuid::new_v4(),
        )
    }

    #[test]
    fn valid_rule_returns_trimmed_name() {
        assert_eq!(
            rule().min_amount(100).max_amount(100).validate().unwrap(),
            "Coffee round-up"
        );
    }

    #[test]
    fn rejects_transfer_category() {
        let mut cmd = rule();
        cmd.category = Category::Transfer;
        assert!(matches!(cmd.validate(), Err(EngineError::InvalidRule(_))));
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(matches!(
            rule().min_amount(5000).max_amount(1000).validate(),
            Err(EngineError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rejects_negative_inputs() {
        assert!(rule().min_amount(-1).validate().is_err());
        assert!(rule().priority(-1).validate().is_err());
        let mut cmd = rule();
        cmd.action = RuleAction::Multiply { factor: -0.5 };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn rejects_blank_or_long_names() {
        let mut cmd = rule();
        cmd.name = "   ".to_string();
        assert!(cmd.validate().is_err());
        cmd.name = "x".repeat(101);
        assert!(cmd.validate().is_err());
        cmd.name = "x".repeat(100);
        assert!(cmd.validate().is_ok());
    }
}

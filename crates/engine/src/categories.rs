//! Spending categories.
//!
//! The set is closed: the classifier must answer with one of these, and the
//! keyword fallback only ever produces one of these.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Dining,
    Groceries,
    Transport,
    Shopping,
    Subscriptions,
    Entertainment,
    Bills,
    Transfer,
    Misc,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Self::Dining,
        Self::Groceries,
        Self::Transport,
        Self::Shopping,
        Self::Subscriptions,
        Self::Entertainment,
        Self::Bills,
        Self::Transfer,
        Self::Misc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dining => "Dining",
            Self::Groceries => "Groceries",
            Self::Transport => "Transport",
            Self::Shopping => "Shopping",
            Self::Subscriptions => "Subscriptions",
            Self::Entertainment => "Entertainment",
            Self::Bills => "Bills",
            Self::Transfer => "Transfer",
            Self::Misc => "Misc",
        }
    }

    /// Transfers move money between the user's own accounts; they are never
    /// spending and never trigger rules.
    pub fn is_transfer(self) -> bool {
        self == Self::Transfer
    }

    /// Keyword classifier over the aggregator's raw category hints.
    ///
    /// Only the first two hints matter: the first is the primary category,
    /// the second refines it (`["Food and Drink", "Groceries"]` is groceries,
    /// not dining).
    pub fn from_hints<S: AsRef<str>>(hints: &[S]) -> Self {
        let Some(primary) = hints.first() else {
            return Self::Misc;
        };
        let primary = primary.as_ref().to_lowercase();
        let secondary = hints
            .get(1)
            .map(|s| s.as_ref().to_lowercase())
            .unwrap_or_default();
        let p = |needle: &str| primary.contains(needle);
        let s = |needle: &str| secondary.contains(needle);

        if p("transfer") || p("payment") {
            Self::Transfer
        } else if p("food and drink") {
            if s("groceries") || s("supermarket") {
                Self::Groceries
            } else {
                Self::Dining
            }
        } else if p("restaurants") {
            Self::Dining
        } else if p("groceries") || s("supermarket") {
            Self::Groceries
        } else if p("transportation")
            || p("travel")
            || s("gas")
            || s("parking")
            || s("public transit")
            || s("ride share")
        {
            Self::Transport
        } else if p("shops") || p("retail") || s("clothing") || s("electronics") {
            Self::Shopping
        } else if s("subscription") {
            Self::Subscriptions
        } else if p("service") {
            if s("streaming") || s("music") || s("software") {
                Self::Subscriptions
            } else {
                Self::Misc
            }
        } else if p("recreation")
            || p("entertainment")
            || s("movie")
            || s("concert")
            || s("sporting")
        {
            Self::Entertainment
        } else if p("bank fees")
            || p("interest")
            || s("utilities")
            || s("internet")
            || s("phone")
            || s("insurance")
            || s("rent")
        {
            Self::Bills
        } else {
            Self::Misc
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Category {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .ok_or_else(|| EngineError::InvalidRule(format!("unknown category: {value}")))
    }
}

//! Pricing Table
//!
//! Maps a student's specialty level to the monthly amount due.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// Default currency for all amounts
pub const DEFAULT_CURRENCY: &str = "XAF";

/// Specialty level → integer amount, single currency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTable {
    currency: String,
    amounts: BTreeMap<String, i64>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY)
            .with_level("primary", 3000)
            .with_level("secondary", 5000)
            .with_level("high_school", 7500)
            .with_level("university", 10000)
    }
}

impl PricingTable {
    /// Empty table
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            amounts: BTreeMap::new(),
        }
    }

    /// Add (or overwrite) a level
    #[must_use]
    pub fn with_level(mut self, specialty: &str, amount: i64) -> Self {
        self.amounts.insert(normalize(specialty), amount);
        self
    }

    /// Parse `level=amount,level=amount`
    pub fn parse(currency: &str, entries: &str) -> Result<Self> {
        let mut table = Self::new(currency);
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (level, amount) = entry.split_once('=').ok_or_else(|| {
                PaymentError::Config(format!("pricing entry '{entry}' is not level=amount"))
            })?;
            let amount: i64 = amount.trim().parse().map_err(|_| {
                PaymentError::Config(format!("pricing amount '{amount}' is not an integer"))
            })?;
            if amount <= 0 {
                return Err(PaymentError::Config(format!(
                    "pricing amount for '{level}' must be positive"
                )));
            }
            table = table.with_level(level, amount);
        }

        if table.amounts.is_empty() {
            return Err(PaymentError::Config("pricing table is empty".into()));
        }
        Ok(table)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Amount due for a specialty
    pub fn amount_for(&self, specialty: &str) -> Option<i64> {
        self.amounts.get(&normalize(specialty)).copied()
    }

    /// Check a client-supplied amount against the table
    pub fn check(&self, specialty: &str, amount: i64) -> Result<i64> {
        let expected = self.amount_for(specialty).ok_or_else(|| {
            PaymentError::Validation(format!("No price configured for level '{specialty}'"))
        })?;

        if amount != expected {
            return Err(PaymentError::InvalidAmount {
                expected,
                got: amount,
            });
        }
        Ok(expected)
    }

    pub fn levels(&self) -> impl Iterator<Item = (&str, i64)> {
        self.amounts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn normalize(specialty: &str) -> String {
    specialty.trim().to_lowercase()
}

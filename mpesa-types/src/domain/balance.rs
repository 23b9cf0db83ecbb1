//! Account balance parsing.
//!
//! The provider reports balances as pipe-separated records:
//! `"Working Account|KES|346568.83|6186.83|340382.00|0.00"`.
//! Several accounts are joined with `&`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider account names. Unrecognized names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccountType {
    Working,
    Utility,
    ChargesPaid,
    OrganizationSettlement,
    Other(String),
}

impl AccountType {
    pub fn from_provider_name(name: &str) -> Self {
        match name.trim() {
            "Working Account" => Self::Working,
            "Utility Account" => Self::Utility,
            "Charges Paid Account" => Self::ChargesPaid,
            "Organization Settlement Account" => Self::OrganizationSettlement,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn provider_name(&self) -> &str {
        match self {
            Self::Working => "Working Account",
            Self::Utility => "Utility Account",
            Self::ChargesPaid => "Charges Paid Account",
            Self::OrganizationSettlement => "Organization Settlement Account",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for AccountType {
    fn from(name: String) -> Self {
        Self::from_provider_name(&name)
    }
}

impl From<AccountType> for String {
    fn from(kind: AccountType) -> Self {
        kind.provider_name().to_string()
    }
}

/// One account's balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_type: AccountType,
    pub currency: String,
    pub current_balance: f64,
    pub available_balance: f64,
    pub reserved_balance: f64,
    pub uncleared_balance: f64,
}

impl AccountBalance {
    /// Parses a single `|`-separated record.
    ///
    /// Returns `None` when fewer than six fields are present. Numeric fields
    /// that do not parse become `0.0`.
    pub fn parse(record: &str) -> Option<Self> {
        let parts: Vec<&str> = record.split('|').map(str::trim).collect();
        if parts.len() < 6 {
            return None;
        }
        Some(Self {
            account_type: AccountType::from_provider_name(parts[0]),
            currency: parts[1].to_string(),
            current_balance: parse_amount(parts[2]),
            available_balance: parse_amount(parts[3]),
            reserved_balance: parse_amount(parts[4]),
            uncleared_balance: parse_amount(parts[5]),
        })
    }

    /// Parses a balance string holding one or more records.
    ///
    /// A `&` anywhere in the string marks the multi-account form. Records that
    /// are not balances are skipped.
    pub fn parse_all(balances: &str) -> Vec<Self> {
        if balances.contains('&') {
            balances.split('&').filter_map(Self::parse).collect()
        } else {
            Self::parse(balances).into_iter().collect()
        }
    }
}

impl fmt::Display for AccountBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{:.2}|{:.2}|{:.2}|{:.2}",
            self.account_type.provider_name(),
            self.currency,
            self.current_balance,
            self.available_balance,
            self.reserved_balance,
            self.uncleared_balance
        )
    }
}

fn parse_amount(value: &str) -> f64 {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

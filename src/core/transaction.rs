//! Account-model transactions
//!
//! A transfer moves value between two account balances. Genesis and
//! reward transactions mint value into an account: genesis is only
//! valid while no block has been committed, rewards at any time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender address carried by reward transactions
pub const REWARD_SENDER: &str = "system";

/// Opaque identifier of a ledger participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for AccountAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    #[serde(rename = "genesis")]
    Genesis,
    #[serde(rename = "reward")]
    Reward,
    #[serde(rename = "transaction")]
    Transfer,
}

impl TxKind {
    /// Whether this kind mints value instead of moving it
    pub fn mints(&self) -> bool {
        matches!(self, TxKind::Genesis | TxKind::Reward)
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Genesis => f.write_str("genesis"),
            TxKind::Reward => f.write_str("reward"),
            TxKind::Transfer => f.write_str("transaction"),
        }
    }
}

/// A single ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sending account; ignored for minting kinds
    #[serde(rename = "From")]
    pub from: AccountAddress,
    /// Receiving account
    #[serde(rename = "To")]
    pub to: AccountAddress,
    #[serde(rename = "Amount")]
    pub amount: u64,
    /// Creation time in Unix nanoseconds
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "Type")]
    pub kind: TxKind,
    /// Per-node monotonic sequence number
    #[serde(rename = "SerialNo")]
    pub serial_no: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mints() {
        assert!(TxKind::Genesis.mints());
        assert!(TxKind::Reward.mints());
        assert!(!TxKind::Transfer.mints());
    }

    #[test]
    fn test_wire_field_names() {
        let tx = Transaction {
            from: "alice".into(),
            to: "bob".into(),
            amount: 5,
            timestamp: 42,
            kind: TxKind::Transfer,
            serial_no: 1,
        };

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["From"], "alice");
        assert_eq!(json["To"], "bob");
        assert_eq!(json["Amount"], 5);
        assert_eq!(json["Timestamp"], 42);
        assert_eq!(json["Type"], "transaction");
        assert_eq!(json["SerialNo"], 1);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TxKind::Genesis).unwrap(),
            "\"genesis\""
        );
        assert_eq!(serde_json::to_string(&TxKind::Reward).unwrap(), "\"reward\"");
        assert_eq!(
            serde_json::to_string(&TxKind::Transfer).unwrap(),
            "\"transaction\""
        );
    }
}

//! Transaction and split entries.

use super::common::{
    CommodityRef, IdEntry, Invalid, NumericEntry, Slots, TimeEntry, Validation,
};
use crate::engine::ReconciledState;
use crate::notice::{NoticeCode, Source};

/// A `<gnc:transaction>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionEntry {
    /// Document order, also the owner tag of the transaction's splits
    pub ordinal: usize,
    pub id: IdEntry,
    pub currency: CommodityRef,
    pub num: Option<String>,
    pub date_posted: TimeEntry,
    pub date_entered: TimeEntry,
    pub description: Option<String>,
    pub slots: Slots,
    /// Ids of the splits that closed inside this transaction, in order
    pub split_ids: Vec<String>,
}

impl TransactionEntry {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }

    pub fn source(&self) -> Source {
        let label = match (&self.description, self.date_posted.date()) {
            (Some(desc), Some(date)) => format!("Transaction \"{}\" on {}", desc, date),
            (Some(desc), None) => format!("Transaction \"{}\"", desc),
            (None, _) => format!("Transaction #{}", self.ordinal + 1),
        };
        Source::new(format!("transaction:{}", self.ordinal), label)
    }

    pub fn validate(&self) -> Validation {
        self.id.require_guid("trn:id", "Transaction")?;
        self.currency.check("trn:currency", "Transaction")?;
        self.date_posted.require("trn:date-posted", "Transaction")?;
        self.date_entered.check("trn:date-entered", "Transaction")?;
        Ok(())
    }

    pub fn notes(&self) -> Option<&str> {
        super::common::slot_str(&self.slots, "notes")
    }
}

/// A `<trn:split>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitEntry {
    /// Ordinal of the owning transaction
    pub owner: usize,
    pub id: IdEntry,
    pub memo: Option<String>,
    pub action: Option<String>,
    pub reconciled_state: Option<String>,
    pub reconcile_date: TimeEntry,
    /// Amount in the transaction currency
    pub value: NumericEntry,
    /// Amount in the account commodity
    pub quantity: NumericEntry,
    pub account: IdEntry,
    pub slots: Slots,
}

impl SplitEntry {
    pub fn new(owner: usize) -> Self {
        Self {
            owner,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }

    pub fn account_id(&self) -> &str {
        self.account.as_deref().unwrap_or("?")
    }

    pub fn source(&self) -> Source {
        Source::new(format!("split:{}", self.id()), format!("Split {}", self.id()))
    }

    /// Checked in order: id, reconciled state, value, quantity, account
    pub fn validate(&self) -> Validation {
        self.id.require_guid("split:id", "Split")?;
        if self.reconciled_state.is_none() {
            return Err(Invalid::new(
                NoticeCode::MissingElement,
                "SPLIT_RECONCILED_STATE_MISSING",
                "Split is missing the required element <split:reconciled-state>",
            ));
        }
        self.value.require("split:value", "Split")?;
        self.quantity.require("split:quantity", "Split")?;
        self.account.require_guid("split:account", "Split")?;
        self.reconcile_date.check("split:reconcile-date", "Split")?;
        Ok(())
    }
}

/// Map a reconciliation tag: `y`, `c` and `n` are the only supported ones
pub fn map_reconciled_state(tag: &str) -> Option<ReconciledState> {
    match tag.trim() {
        "y" => Some(ReconciledState::Reconciled),
        "c" => Some(ReconciledState::Cleared),
        "n" => Some(ReconciledState::NotReconciled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const GUID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn split() -> SplitEntry {
        SplitEntry {
            owner: 0,
            id: IdEntry::parse(GUID_A, None),
            reconciled_state: Some("n".into()),
            value: NumericEntry::parse("100/1"),
            quantity: NumericEntry::parse("100/1"),
            account: IdEntry::parse(GUID_B, None),
            ..Default::default()
        }
    }

    #[test]
    fn test_reconciled_state_table() {
        assert_eq!(map_reconciled_state("y"), Some(ReconciledState::Reconciled));
        assert_eq!(map_reconciled_state("c"), Some(ReconciledState::Cleared));
        assert_eq!(map_reconciled_state("n"), Some(ReconciledState::NotReconciled));
        assert_eq!(map_reconciled_state("v"), None);
        assert_eq!(map_reconciled_state("f"), None);
        assert_eq!(map_reconciled_state("Y"), None);
    }

    #[test]
    fn test_split_validation_order() {
        assert!(split().validate().is_ok());

        let entry = SplitEntry {
            reconciled_state: None,
            value: NumericEntry::parse("x"),
            ..split()
        };
        assert_eq!(entry.validate().unwrap_err().key, "SPLIT_RECONCILED_STATE_MISSING");

        let entry = SplitEntry {
            quantity: NumericEntry::parse("1/0"),
            account: IdEntry::default(),
            ..split()
        };
        assert_eq!(
            entry.validate().unwrap_err().key,
            "INVALID_NUMERIC:split:quantity"
        );

        let entry = SplitEntry {
            account: IdEntry::default(),
            ..split()
        };
        assert_eq!(entry.validate().unwrap_err().key, "MISSING_ELEMENT:split:account");
    }

    #[test]
    fn test_transaction_requires_date_posted() {
        let mut txn = TransactionEntry::new(3);
        txn.id = IdEntry::parse(GUID_A, None);
        let err = txn.validate().unwrap_err();
        assert_eq!(err.key, "MISSING_ELEMENT:trn:date-posted");

        txn.date_posted = TimeEntry::parse("2021-01-01 00:00:00 +0000");
        assert!(txn.validate().is_ok());
        assert_eq!(txn.source().key, "transaction:3");
    }
}

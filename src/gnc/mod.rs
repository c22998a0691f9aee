//! GnuCash XML entries.
//!
//! One type per element the importer understands. Entries are filled in
//! while their element is open, validated once when it closes and then
//! never mutated again.

pub mod account;
pub mod commodity;
pub mod common;
pub mod price;
pub mod transaction;

pub use account::{map_account_type, AccountEntry, AccountMapping, IgnoreReason, ACCOUNT_VERSION};
pub use commodity::CommodityEntry;
pub use common::{
    CommodityRef, IdEntry, IntEntry, Invalid, NumericEntry, SlotValue, Slots, TimeEntry,
    Validation,
};
pub use price::{PriceEntry, PRICEDB_VERSION};
pub use transaction::{map_reconciled_state, SplitEntry, TransactionEntry};

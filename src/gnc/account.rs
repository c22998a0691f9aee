//! Account entries and the account type table.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::common::{slot_flag, slot_str, CommodityRef, IdEntry, IntEntry, Invalid, Slots, Validation};
use crate::engine::TargetAccountType;
use crate::notice::Source;

/// Schema version every `gnc:account` element must declare
pub const ACCOUNT_VERSION: &str = "2.0.0";

/// An `<gnc:account>` element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub name: Option<String>,
    pub id: IdEntry,
    /// Source type tag (`BANK`, `STOCK`, ...)
    pub account_type: Option<String>,
    pub commodity: CommodityRef,
    pub commodity_scu: IntEntry,
    pub code: Option<String>,
    pub description: Option<String>,
    pub parent: IdEntry,
    pub slots: Slots,
}

impl AccountEntry {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn type_tag(&self) -> &str {
        self.account_type.as_deref().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.type_tag() == "ROOT"
    }

    /// Placeholder accounts only group other accounts
    pub fn is_placeholder(&self) -> bool {
        slot_flag(&self.slots, "placeholder")
    }

    pub fn is_hidden(&self) -> bool {
        slot_flag(&self.slots, "hidden")
    }

    pub fn notes(&self) -> Option<&str> {
        slot_str(&self.slots, "notes")
    }

    pub fn source(&self) -> Source {
        Source::new(
            format!("account:{}", self.id()),
            format!("Account \"{}\"", self.name.as_deref().unwrap_or(self.id())),
        )
    }

    /// Close-time validation: id, name and type are required
    pub fn validate(&self) -> Validation {
        self.id.require_guid("act:id", "Account")?;
        if self.name.is_none() {
            return Err(Invalid::missing("act:name", "Account"));
        }
        if self.account_type.is_none() {
            return Err(Invalid::missing("act:type", "Account"));
        }
        self.commodity.check("act:commodity", "Account")?;
        self.commodity_scu.check("act:commodity-scu")?;
        if self.parent.id.is_some() {
            self.parent.require_guid("act:parent", "Account")?;
        }
        Ok(())
    }
}

// =============================================================================
// Type mapping
// =============================================================================

/// Why an account is not materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IgnoreReason {
    /// `NONE`: obsolete filler, skipped without a notice
    Filler,
    /// `CURRENCY`: no target equivalent, skipped without a notice
    NoTarget,
    /// Known type without a target equivalent, warned
    Unsupported,
    /// Type tag missing from the table, warned
    Unknown,
}

/// Result of looking up a source type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountMapping {
    /// The engine's own root account
    Root,
    Create {
        account_type: TargetAccountType,
        /// Stock and mutual fund accounts carry a security
        has_securities: bool,
    },
    Ignore(IgnoreReason),
}

static ACCOUNT_TYPES: Lazy<HashMap<&'static str, AccountMapping>> = Lazy::new(|| {
    use AccountMapping::{Create, Ignore};
    use TargetAccountType as T;

    let create = |account_type| Create {
        account_type,
        has_securities: false,
    };
    let securities = |account_type| Create {
        account_type,
        has_securities: true,
    };

    HashMap::from([
        ("NONE", Ignore(IgnoreReason::Filler)),
        ("BANK", create(T::Bank)),
        ("CASH", create(T::Cash)),
        ("CREDIT", create(T::Credit)),
        ("ASSET", create(T::Asset)),
        ("LIABILITY", create(T::Liability)),
        ("STOCK", securities(T::Invest)),
        ("MUTUAL", securities(T::Mutual)),
        ("CURRENCY", Ignore(IgnoreReason::NoTarget)),
        ("INCOME", create(T::Income)),
        ("EXPENSE", create(T::Expense)),
        ("EQUITY", create(T::Equity)),
        ("RECEIVABLE", Ignore(IgnoreReason::Unsupported)),
        ("PAYABLE", Ignore(IgnoreReason::Unsupported)),
        ("ROOT", AccountMapping::Root),
        ("TRADING", Ignore(IgnoreReason::Unsupported)),
        ("CHECKING", create(T::Checking)),
        ("SAVINGS", create(T::Checking)),
        ("MONEYMRKT", create(T::MoneyMarket)),
        ("CREDITLINE", Ignore(IgnoreReason::Unsupported)),
    ])
});

/// Map a source type tag to its target category
pub fn map_account_type(tag: &str) -> AccountMapping {
    ACCOUNT_TYPES
        .get(tag)
        .copied()
        .unwrap_or(AccountMapping::Ignore(IgnoreReason::Unknown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeCode;

    fn valid_account() -> AccountEntry {
        AccountEntry {
            name: Some("Checking".into()),
            id: IdEntry::parse("0123456789abcdef0123456789abcdef", Some("guid".into())),
            account_type: Some("BANK".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_unsupported_types_are_ignored() {
        for tag in ["RECEIVABLE", "PAYABLE", "TRADING", "CREDITLINE"] {
            assert_eq!(
                map_account_type(tag),
                AccountMapping::Ignore(IgnoreReason::Unsupported),
                "{}",
                tag
            );
        }
        assert_eq!(map_account_type("NONE"), AccountMapping::Ignore(IgnoreReason::Filler));
        assert_eq!(map_account_type("CURRENCY"), AccountMapping::Ignore(IgnoreReason::NoTarget));
        assert_eq!(map_account_type("bank"), AccountMapping::Ignore(IgnoreReason::Unknown));
    }

    #[test]
    fn test_mapping_is_stable() {
        for tag in ["BANK", "SAVINGS", "STOCK", "MUTUAL", "MONEYMRKT", "ROOT"] {
            assert_eq!(map_account_type(tag), map_account_type(tag));
        }
        assert_eq!(
            map_account_type("SAVINGS"),
            AccountMapping::Create {
                account_type: TargetAccountType::Checking,
                has_securities: false
            }
        );
        assert_eq!(
            map_account_type("STOCK"),
            AccountMapping::Create {
                account_type: TargetAccountType::Invest,
                has_securities: true
            }
        );
    }

    #[test]
    fn test_validate_requires_id_name_type() {
        assert!(valid_account().validate().is_ok());

        let no_name = AccountEntry {
            name: None,
            ..valid_account()
        };
        let err = no_name.validate().unwrap_err();
        assert_eq!(err.code, NoticeCode::MissingElement);
        assert_eq!(err.key, "MISSING_ELEMENT:act:name");

        let bad_scu = AccountEntry {
            commodity_scu: IntEntry::parse("x"),
            ..valid_account()
        };
        assert_eq!(bad_scu.validate().unwrap_err().code, NoticeCode::InvalidInt);
    }
}

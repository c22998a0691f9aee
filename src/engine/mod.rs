//! Target accounting engine interface.
//!
//! The importer never talks to storage directly. Everything it materializes
//! goes through the [`Engine`] trait, so the same resolver can feed the
//! SQLite store shipped in [`sqlite`] or any other backend.

pub mod sqlite;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use sqlite::SqliteEngine;

/// Handle of an account created by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountHandle(pub i64);

/// Handle of a currency known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyHandle(pub i64);

/// Handle of a traded security known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityHandle(pub i64);

/// Handle of a stored transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle(pub i64);

/// Errors raised by an engine implementation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Could not create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: i64 },
    #[error("Rejected by engine: {0}")]
    Rejected(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Account categories of the target engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetAccountType {
    Root,
    Bank,
    Cash,
    Checking,
    MoneyMarket,
    Credit,
    Asset,
    Liability,
    Invest,
    Mutual,
    Income,
    Expense,
    Equity,
}

impl TargetAccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::Bank => "BANK",
            Self::Cash => "CASH",
            Self::Checking => "CHECKING",
            Self::MoneyMarket => "MONEY_MARKET",
            Self::Credit => "CREDIT",
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
            Self::Invest => "INVEST",
            Self::Mutual => "MUTUAL",
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Equity => "EQUITY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ROOT" => Some(Self::Root),
            "BANK" => Some(Self::Bank),
            "CASH" => Some(Self::Cash),
            "CHECKING" => Some(Self::Checking),
            "MONEY_MARKET" => Some(Self::MoneyMarket),
            "CREDIT" => Some(Self::Credit),
            "ASSET" => Some(Self::Asset),
            "LIABILITY" => Some(Self::Liability),
            "INVEST" => Some(Self::Invest),
            "MUTUAL" => Some(Self::Mutual),
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            "EQUITY" => Some(Self::Equity),
            _ => None,
        }
    }

    /// Account types that hold traded securities
    pub fn holds_securities(&self) -> bool {
        matches!(self, Self::Invest | Self::Mutual)
    }
}

/// Reconciliation state of a transaction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciledState {
    Reconciled,
    Cleared,
    NotReconciled,
}

impl ReconciledState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconciled => "RECONCILED",
            Self::Cleared => "CLEARED",
            Self::NotReconciled => "NOT_RECONCILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RECONCILED" => Some(Self::Reconciled),
            "CLEARED" => Some(Self::Cleared),
            "NOT_RECONCILED" => Some(Self::NotReconciled),
            _ => None,
        }
    }
}

/// Account to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub account_type: TargetAccountType,
    pub currency: CurrencyHandle,
    pub name: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub code: Option<i32>,
    pub visible: bool,
    pub placeholder: bool,
}

/// Security to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSecurity {
    /// Ticker or other identifier within its namespace
    pub symbol: String,
    /// Exchange or namespace the symbol belongs to
    pub namespace: String,
    pub name: Option<String>,
    /// ISIN, CUSIP or similar external code
    pub isin: Option<String>,
    /// Smallest tradable unit as a fraction denominator (100 = 0.01)
    pub fraction: Option<i64>,
    pub reported_currency: CurrencyHandle,
}

/// One point of a security's price history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub price: Decimal,
    pub volume: i64,
    pub high: Decimal,
    pub low: Decimal,
}

/// One posting of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub account: AccountHandle,
    pub security: Option<SecurityHandle>,
    /// Value in the transaction currency
    pub amount: Decimal,
    /// Quantity in the account's commodity (shares for security accounts)
    pub quantity: Decimal,
    pub reconciled: ReconciledState,
    pub reconcile_date: Option<NaiveDate>,
    pub memo: Option<String>,
    pub action: Option<String>,
}

/// Transaction to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub currency: CurrencyHandle,
    pub number: Option<String>,
    pub description: String,
    pub notes: Option<String>,
    pub entries: Vec<NewEntry>,
}

/// Capability surface the importer materializes into.
///
/// Calls are synchronous and made from a single thread, in dependency order:
/// currencies and securities, accounts (parents before children), price
/// history, then transactions.
pub trait Engine {
    /// The engine's built-in root account
    fn root_account(&self) -> AccountHandle;

    /// Currency used when a source entity names none the engine knows
    fn default_currency(&self) -> CurrencyHandle;

    fn find_or_create_currency(
        &mut self,
        code: &str,
        fraction: Option<i64>,
    ) -> EngineResult<CurrencyHandle>;

    fn create_security(&mut self, security: &NewSecurity) -> EngineResult<SecurityHandle>;

    /// Create an account below `parent`, or below the root when `None`
    fn create_account(
        &mut self,
        parent: Option<AccountHandle>,
        account: &NewAccount,
    ) -> EngineResult<AccountHandle>;

    fn attach_security(
        &mut self,
        account: AccountHandle,
        security: SecurityHandle,
    ) -> EngineResult<()>;

    /// Add a price point. `Ok(false)` means the engine rejected it.
    fn add_security_history(
        &mut self,
        security: SecurityHandle,
        point: &HistoryPoint,
    ) -> EngineResult<bool>;

    fn add_transaction(&mut self, transaction: &NewTransaction) -> EngineResult<TransactionHandle>;
}

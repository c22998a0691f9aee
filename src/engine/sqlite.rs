//! SQLite backed engine.
//!
//! A fresh store holds the root account and the default currency. Amounts
//! are stored as decimal TEXT so nothing is rounded through floating point.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use super::{
    AccountHandle, CurrencyHandle, Engine, EngineError, EngineResult, HistoryPoint, NewAccount,
    NewSecurity, NewTransaction, ReconciledState, SecurityHandle, TargetAccountType,
    TransactionHandle,
};

const SCHEMA: &str = r#"
    -- =============================================================================
    -- Reference data
    -- =============================================================================

    CREATE TABLE IF NOT EXISTS currency (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        fraction INTEGER
    );

    CREATE TABLE IF NOT EXISTS security (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        namespace TEXT NOT NULL,
        name TEXT,
        isin TEXT,
        fraction INTEGER,
        currency_id INTEGER NOT NULL,
        FOREIGN KEY (currency_id) REFERENCES currency(id)
    );

    CREATE TABLE IF NOT EXISTS security_history (
        security_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        price TEXT NOT NULL,
        high TEXT NOT NULL,
        low TEXT NOT NULL,
        volume INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (security_id, date),
        FOREIGN KEY (security_id) REFERENCES security(id) ON DELETE CASCADE
    );

    -- =============================================================================
    -- Accounts
    -- =============================================================================

    CREATE TABLE IF NOT EXISTS account (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER,
        account_type TEXT NOT NULL,
        currency_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        notes TEXT,
        code INTEGER,
        visible INTEGER NOT NULL DEFAULT 1,
        placeholder INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (parent_id) REFERENCES account(id),
        FOREIGN KEY (currency_id) REFERENCES currency(id)
    );

    CREATE INDEX IF NOT EXISTS idx_account_parent ON account(parent_id);
    CREATE INDEX IF NOT EXISTS idx_account_name ON account(name);

    CREATE TABLE IF NOT EXISTS account_security (
        account_id INTEGER NOT NULL,
        security_id INTEGER NOT NULL,
        PRIMARY KEY (account_id, security_id),
        FOREIGN KEY (account_id) REFERENCES account(id) ON DELETE CASCADE,
        FOREIGN KEY (security_id) REFERENCES security(id) ON DELETE CASCADE
    );

    -- =============================================================================
    -- Transactions
    -- =============================================================================

    CREATE TABLE IF NOT EXISTS txn (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        currency_id INTEGER NOT NULL,
        number TEXT,
        description TEXT NOT NULL,
        notes TEXT,
        FOREIGN KEY (currency_id) REFERENCES currency(id)
    );

    CREATE TABLE IF NOT EXISTS txn_entry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        txn_id INTEGER NOT NULL,
        account_id INTEGER NOT NULL,
        security_id INTEGER,
        amount TEXT NOT NULL,
        quantity TEXT NOT NULL,
        reconciled TEXT NOT NULL,
        reconcile_date TEXT,
        memo TEXT,
        action TEXT,
        FOREIGN KEY (txn_id) REFERENCES txn(id) ON DELETE CASCADE,
        FOREIGN KEY (account_id) REFERENCES account(id),
        FOREIGN KEY (security_id) REFERENCES security(id)
    );

    CREATE INDEX IF NOT EXISTS idx_txn_entry_account ON txn_entry(account_id);
"#;

/// Account row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    pub handle: AccountHandle,
    pub parent: Option<AccountHandle>,
    pub account_type: TargetAccountType,
    pub currency_code: String,
    pub name: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub code: Option<i32>,
    pub visible: bool,
    pub placeholder: bool,
}

/// Transaction entry row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub transaction: TransactionHandle,
    pub account: AccountHandle,
    pub security: Option<SecurityHandle>,
    pub amount: Decimal,
    pub quantity: Decimal,
    pub reconciled: ReconciledState,
    pub memo: Option<String>,
}

/// Security row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSecurity {
    pub handle: SecurityHandle,
    pub symbol: String,
    pub namespace: String,
    pub name: Option<String>,
}

/// Engine writing into a SQLite database
pub struct SqliteEngine {
    conn: Connection,
    root: AccountHandle,
    default_currency: CurrencyHandle,
}

impl SqliteEngine {
    /// Create a new store at `path`. An existing file is never overwritten.
    pub fn create(path: &Path, base_currency: &str) -> EngineResult<Self> {
        if path.exists() {
            return Err(EngineError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| EngineError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, base_currency)
    }

    /// Delete a store file together with its WAL and shared-memory files.
    /// Files that do not exist are skipped.
    pub fn remove_store(path: &Path) -> std::io::Result<()> {
        let mut wal = path.as_os_str().to_os_string();
        wal.push("-wal");
        let mut shm = path.as_os_str().to_os_string();
        shm.push("-shm");
        for file in [path.as_os_str().to_os_string(), wal, shm] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn open_in_memory(base_currency: &str) -> EngineResult<Self> {
        Self::init(Connection::open_in_memory()?, base_currency)
    }

    fn init(conn: Connection, base_currency: &str) -> EngineResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        conn.execute(
            "INSERT INTO currency (code, fraction) VALUES (?1, 100)",
            params![base_currency],
        )?;
        let default_currency = CurrencyHandle(conn.last_insert_rowid());

        conn.execute(
            "INSERT INTO account (parent_id, account_type, currency_id, name, visible, placeholder)
             VALUES (NULL, ?1, ?2, 'Root', 0, 1)",
            params![TargetAccountType::Root.as_str(), default_currency.0],
        )?;
        let root = AccountHandle(conn.last_insert_rowid());

        log::info!("Initialized store with base currency {}", base_currency);
        Ok(Self {
            conn,
            root,
            default_currency,
        })
    }

    // =========================================================================
    // Read accessors
    // =========================================================================

    /// Number of accounts, not counting the root
    pub fn account_count(&self) -> EngineResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM account WHERE parent_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn find_accounts_by_name(&self, name: &str) -> EngineResult<Vec<StoredAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.parent_id, a.account_type, c.code, a.name, a.description,
                    a.notes, a.code, a.visible, a.placeholder
             FROM account a JOIN currency c ON c.id = a.currency_id
             WHERE a.name = ?1 ORDER BY a.id",
        )?;
        let rows = stmt.query_map(params![name], map_account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Direct children of an account, in creation order
    pub fn children_of(&self, parent: AccountHandle) -> EngineResult<Vec<StoredAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.parent_id, a.account_type, c.code, a.name, a.description,
                    a.notes, a.code, a.visible, a.placeholder
             FROM account a JOIN currency c ON c.id = a.currency_id
             WHERE a.parent_id = ?1 ORDER BY a.id",
        )?;
        let rows = stmt.query_map(params![parent.0], map_account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn currency_code(&self, currency: CurrencyHandle) -> EngineResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT code FROM currency WHERE id = ?1",
                params![currency.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn securities_of(&self, account: AccountHandle) -> EngineResult<Vec<StoredSecurity>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.symbol, s.namespace, s.name
             FROM account_security x JOIN security s ON s.id = x.security_id
             WHERE x.account_id = ?1 ORDER BY s.id",
        )?;
        let rows = stmt.query_map(params![account.0], |row| {
            Ok(StoredSecurity {
                handle: SecurityHandle(row.get(0)?),
                symbol: row.get(1)?,
                namespace: row.get(2)?,
                name: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_security(&self, symbol: &str) -> EngineResult<Option<SecurityHandle>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM security WHERE symbol = ?1 ORDER BY id LIMIT 1",
                params![symbol],
                |row| row.get(0).map(SecurityHandle),
            )
            .optional()?)
    }

    /// Price history of a security, oldest first
    pub fn history_of(&self, security: SecurityHandle) -> EngineResult<Vec<HistoryPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, price, volume, high, low FROM security_history
             WHERE security_id = ?1 ORDER BY date",
        )?;
        let rows = stmt.query_map(params![security.0], |row| {
            Ok(HistoryPoint {
                date: row.get(0)?,
                price: decimal_column(row, 1)?,
                volume: row.get(2)?,
                high: decimal_column(row, 3)?,
                low: decimal_column(row, 4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn transaction_count(&self) -> EngineResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM txn", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Entries posted against an account
    pub fn entries_of(&self, account: AccountHandle) -> EngineResult<Vec<StoredEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT txn_id, account_id, security_id, amount, quantity, reconciled, memo
             FROM txn_entry WHERE account_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![account.0], |row| {
            let reconciled: String = row.get(5)?;
            Ok(StoredEntry {
                transaction: TransactionHandle(row.get(0)?),
                account: AccountHandle(row.get(1)?),
                security: row.get::<_, Option<i64>>(2)?.map(SecurityHandle),
                amount: decimal_column(row, 3)?,
                quantity: decimal_column(row, 4)?,
                reconciled: ReconciledState::from_str(&reconciled).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(5, "reconciled".into(), Type::Text)
                })?,
                memo: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn require(&self, table: &'static str, id: i64) -> EngineResult<()> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE id = ?1", table),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownHandle { kind: table, id }),
        }
    }
}

fn map_account_row(row: &Row) -> rusqlite::Result<StoredAccount> {
    let account_type: String = row.get(2)?;
    Ok(StoredAccount {
        handle: AccountHandle(row.get(0)?),
        parent: row.get::<_, Option<i64>>(1)?.map(AccountHandle),
        account_type: TargetAccountType::from_str(&account_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "account_type".into(), Type::Text)
        })?,
        currency_code: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        notes: row.get(6)?,
        code: row.get(7)?,
        visible: row.get::<_, i64>(8)? != 0,
        placeholder: row.get::<_, i64>(9)? != 0,
    })
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Engine for SqliteEngine {
    fn root_account(&self) -> AccountHandle {
        self.root
    }

    fn default_currency(&self) -> CurrencyHandle {
        self.default_currency
    }

    fn find_or_create_currency(
        &mut self,
        code: &str,
        fraction: Option<i64>,
    ) -> EngineResult<CurrencyHandle> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM currency WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(CurrencyHandle(id));
        }
        self.conn.execute(
            "INSERT INTO currency (code, fraction) VALUES (?1, ?2)",
            params![code, fraction],
        )?;
        Ok(CurrencyHandle(self.conn.last_insert_rowid()))
    }

    fn create_security(&mut self, security: &NewSecurity) -> EngineResult<SecurityHandle> {
        self.require("currency", security.reported_currency.0)?;
        self.conn.execute(
            "INSERT INTO security (symbol, namespace, name, isin, fraction, currency_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                security.symbol,
                security.namespace,
                security.name,
                security.isin,
                security.fraction,
                security.reported_currency.0,
            ],
        )?;
        Ok(SecurityHandle(self.conn.last_insert_rowid()))
    }

    fn create_account(
        &mut self,
        parent: Option<AccountHandle>,
        account: &NewAccount,
    ) -> EngineResult<AccountHandle> {
        if account.account_type == TargetAccountType::Root {
            return Err(EngineError::Rejected(format!(
                "account '{}' cannot be a second root",
                account.name
            )));
        }
        let parent = parent.unwrap_or(self.root);
        self.require("account", parent.0)?;
        self.require("currency", account.currency.0)?;
        self.conn.execute(
            "INSERT INTO account (parent_id, account_type, currency_id, name, description,
                                  notes, code, visible, placeholder)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                parent.0,
                account.account_type.as_str(),
                account.currency.0,
                account.name,
                account.description,
                account.notes,
                account.code,
                account.visible,
                account.placeholder,
            ],
        )?;
        Ok(AccountHandle(self.conn.last_insert_rowid()))
    }

    fn attach_security(
        &mut self,
        account: AccountHandle,
        security: SecurityHandle,
    ) -> EngineResult<()> {
        self.require("account", account.0)?;
        self.require("security", security.0)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO account_security (account_id, security_id) VALUES (?1, ?2)",
            params![account.0, security.0],
        )?;
        Ok(())
    }

    fn add_security_history(
        &mut self,
        security: SecurityHandle,
        point: &HistoryPoint,
    ) -> EngineResult<bool> {
        self.require("security", security.0)?;
        if point.price.is_sign_negative() {
            log::warn!(
                "Rejected negative price {} for security {} on {}",
                point.price,
                security.0,
                point.date
            );
            return Ok(false);
        }
        // Last quote of the day wins
        self.conn.execute(
            "INSERT OR REPLACE INTO security_history (security_id, date, price, high, low, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                security.0,
                point.date,
                point.price.to_string(),
                point.high.to_string(),
                point.low.to_string(),
                point.volume,
            ],
        )?;
        Ok(true)
    }

    fn add_transaction(&mut self, transaction: &NewTransaction) -> EngineResult<TransactionHandle> {
        if transaction.entries.is_empty() {
            return Err(EngineError::Rejected(format!(
                "transaction '{}' has no entries",
                transaction.description
            )));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO txn (date, currency_id, number, description, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                transaction.date,
                transaction.currency.0,
                transaction.number,
                transaction.description,
                transaction.notes,
            ],
        )?;
        let txn_id = tx.last_insert_rowid();
        for entry in &transaction.entries {
            tx.execute(
                "INSERT INTO txn_entry (txn_id, account_id, security_id, amount, quantity,
                                        reconciled, reconcile_date, memo, action)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    txn_id,
                    entry.account.0,
                    entry.security.map(|s| s.0),
                    entry.amount.to_string(),
                    entry.quantity.to_string(),
                    entry.reconciled.as_str(),
                    entry.reconcile_date,
                    entry.memo,
                    entry.action,
                ],
            )?;
        }
        tx.commit()?;
        Ok(TransactionHandle(txn_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewEntry;
    use chrono::NaiveDate;

    fn account(name: &str, account_type: TargetAccountType, currency: CurrencyHandle) -> NewAccount {
        NewAccount {
            account_type,
            currency,
            name: name.to_string(),
            description: None,
            notes: None,
            code: None,
            visible: true,
            placeholder: false,
        }
    }

    #[test]
    fn test_new_store_has_root_and_default_currency() {
        let engine = SqliteEngine::open_in_memory("EUR").unwrap();
        assert_eq!(engine.account_count().unwrap(), 0);
        assert_eq!(
            engine.currency_code(engine.default_currency()).unwrap().as_deref(),
            Some("EUR")
        );
    }

    #[test]
    fn test_find_or_create_currency_is_idempotent() {
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let usd = engine.find_or_create_currency("USD", Some(100)).unwrap();
        assert_eq!(usd, engine.default_currency());
        let chf = engine.find_or_create_currency("CHF", Some(100)).unwrap();
        assert_eq!(engine.find_or_create_currency("CHF", None).unwrap(), chf);
        assert_ne!(chf, usd);
    }

    #[test]
    fn test_accounts_default_to_root_parent() {
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let usd = engine.default_currency();
        let assets = engine
            .create_account(None, &account("Assets", TargetAccountType::Asset, usd))
            .unwrap();
        engine
            .create_account(Some(assets), &account("Checking", TargetAccountType::Checking, usd))
            .unwrap();

        assert_eq!(engine.account_count().unwrap(), 2);
        let found = engine.find_accounts_by_name("Checking").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].parent, Some(assets));
        assert_eq!(found[0].currency_code, "USD");
        assert_eq!(engine.children_of(engine.root_account()).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_parent_is_an_error() {
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let usd = engine.default_currency();
        let err = engine
            .create_account(Some(AccountHandle(999)), &account("X", TargetAccountType::Bank, usd))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownHandle { kind: "account", id: 999 }));
    }

    #[test]
    fn test_security_history_and_rejection() {
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let usd = engine.default_currency();
        let sec = engine
            .create_security(&NewSecurity {
                symbol: "AAPL".into(),
                namespace: "NASDAQ".into(),
                name: Some("Apple".into()),
                isin: None,
                fraction: Some(1),
                reported_currency: usd,
            })
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let point = HistoryPoint {
            date,
            price: Decimal::new(30012, 2),
            volume: 0,
            high: Decimal::new(30012, 2),
            low: Decimal::new(30012, 2),
        };
        assert!(engine.add_security_history(sec, &point).unwrap());

        let negative = HistoryPoint {
            price: Decimal::new(-1, 0),
            ..point.clone()
        };
        assert!(!engine.add_security_history(sec, &negative).unwrap());

        let history = engine.history_of(sec).unwrap();
        assert_eq!(history, vec![point]);
        assert_eq!(engine.find_security("AAPL").unwrap(), Some(sec));
    }

    #[test]
    fn test_transaction_entries_round_trip() {
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let usd = engine.default_currency();
        let a = engine
            .create_account(None, &account("A", TargetAccountType::Bank, usd))
            .unwrap();
        let b = engine
            .create_account(None, &account("B", TargetAccountType::Expense, usd))
            .unwrap();
        let entry = |account, amount| NewEntry {
            account,
            security: None,
            amount: Decimal::new(amount, 2),
            quantity: Decimal::new(amount, 2),
            reconciled: ReconciledState::Cleared,
            reconcile_date: None,
            memo: None,
            action: None,
        };
        engine
            .add_transaction(&NewTransaction {
                date: NaiveDate::from_ymd_opt(2021, 5, 1).unwrap(),
                currency: usd,
                number: Some("42".into()),
                description: "Groceries".into(),
                notes: None,
                entries: vec![entry(a, -1999), entry(b, 1999)],
            })
            .unwrap();

        assert_eq!(engine.transaction_count().unwrap(), 1);
        let entries = engine.entries_of(a).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, Decimal::new(-1999, 2));
        assert_eq!(entries[0].reconciled, ReconciledState::Cleared);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.db");
        SqliteEngine::create(&path, "USD").unwrap();
        let Err(err) = SqliteEngine::create(&path, "USD") else {
            panic!("existing store was opened");
        };
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }

    #[test]
    fn test_remove_store_deletes_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.db");
        let engine = SqliteEngine::create(&path, "USD").unwrap();
        drop(engine);
        std::fs::write(dir.path().join("book.db-wal"), b"").unwrap();

        SqliteEngine::remove_store(&path).unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("book.db-wal").exists());
        assert!(!dir.path().join("book.db-shm").exists());
        // Nothing left to remove
        SqliteEngine::remove_store(&path).unwrap();
    }
}

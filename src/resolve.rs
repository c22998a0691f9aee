//! Entity graph resolver.
//!
//! Runs after parsing finished without a fatal notice. Reads the entry
//! tables of the [`ImportContext`] and materializes them against an
//! [`Engine`] in dependency order: commodities, the account hierarchy,
//! price history, then transactions.

use std::collections::{HashMap, HashSet};

use crate::context::{EntryTable, ImportContext};
use crate::engine::{
    AccountHandle, CurrencyHandle, Engine, HistoryPoint, NewAccount, NewEntry, NewSecurity,
    NewTransaction, SecurityHandle, TargetAccountType,
};
use crate::error::ImportError;
use crate::gnc::{
    map_account_type, map_reconciled_state, AccountEntry, AccountMapping, CommodityRef,
    IgnoreReason, SplitEntry,
};
use crate::import::ImportSummary;
use crate::notice::{NoticeCode, NoticeTree, Source};
use crate::progress::{ImportStage, Reporter};

// =============================================================================
// Hierarchy assembly
// =============================================================================

/// An account with the children claimed for it
#[derive(Debug)]
pub struct AccountNode<'a> {
    pub entry: &'a AccountEntry,
    pub children: Vec<AccountNode<'a>>,
}

impl<'a> AccountNode<'a> {
    /// Number of nodes in this subtree, the node itself included
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(AccountNode::len).sum::<usize>()
    }
}

/// The account tree rooted at the declared root
#[derive(Debug)]
pub struct Hierarchy<'a> {
    pub root: AccountNode<'a>,
    /// Accounts whose parent chain never reaches the root
    pub unlinked: Vec<&'a AccountEntry>,
}

/// Link every account reachable from the first `ROOT` account.
///
/// Further `ROOT` accounts are warned about and stay in the tree, where
/// materialization skips them. Accounts never claimed stay unlinked.
pub fn assemble_hierarchy<'a>(
    accounts: &'a EntryTable<AccountEntry>,
    notices: &mut NoticeTree,
) -> Result<Hierarchy<'a>, ImportError> {
    let mut roots = accounts.iter().filter(|a| a.is_root());
    let Some(root) = roots.next() else {
        let message = "The book has no account of type ROOT";
        notices.error(
            NoticeCode::NoRootAccount,
            NoticeCode::NoRootAccount.as_str(),
            message,
            &[],
        );
        return Err(ImportError::Fatal(message.to_string()));
    };
    for extra in roots {
        notices.warn(
            NoticeCode::MultipleRootAccounts,
            format!("{}:{}", NoticeCode::MultipleRootAccounts.as_str(), extra.id()),
            format!(
                "Only the first ROOT account is used, \"{}\" is skipped",
                extra.name.as_deref().unwrap_or(extra.id())
            ),
            &[extra.source()],
        );
    }

    let mut pending: HashMap<&'a str, Vec<&'a AccountEntry>> = HashMap::new();
    let mut unlinked = Vec::new();
    for entry in accounts {
        if std::ptr::eq(entry, root) {
            continue;
        }
        match entry.parent_id() {
            Some(parent) => pending.entry(parent).or_default().push(entry),
            None => unlinked.push(entry),
        }
    }

    let root = claim(root, &mut pending);
    unlinked.extend(pending.into_values().flatten());
    if !unlinked.is_empty() {
        log::debug!("{} accounts are not reachable from the root", unlinked.len());
    }
    Ok(Hierarchy { root, unlinked })
}

fn claim<'a>(
    entry: &'a AccountEntry,
    pending: &mut HashMap<&'a str, Vec<&'a AccountEntry>>,
) -> AccountNode<'a> {
    let children = pending
        .remove(entry.id())
        .unwrap_or_default()
        .into_iter()
        .map(|child| claim(child, pending))
        .collect();
    AccountNode { entry, children }
}

// =============================================================================
// Materialization
// =============================================================================

/// Materializes one parsed book into an engine
pub struct Resolver<'a, 'e> {
    ctx: &'a ImportContext,
    engine: &'e mut dyn Engine,
    notices: &'e mut NoticeTree,
    /// By ISO code
    currencies: HashMap<String, CurrencyHandle>,
    /// By commodity id
    securities: HashMap<String, SecurityHandle>,
    accounts: HashMap<&'a str, AccountHandle>,
    ignored: HashSet<&'a str>,
    /// Stock account id to the security it holds
    stock_securities: HashMap<&'a str, SecurityHandle>,
    /// Account id to its nearest materialized ancestor
    parent_lookup: HashMap<&'a str, AccountHandle>,
    summary: ImportSummary,
}

impl<'a, 'e> Resolver<'a, 'e> {
    pub fn new(
        ctx: &'a ImportContext,
        engine: &'e mut dyn Engine,
        notices: &'e mut NoticeTree,
    ) -> Self {
        Self {
            ctx,
            engine,
            notices,
            currencies: HashMap::new(),
            securities: HashMap::new(),
            accounts: HashMap::new(),
            ignored: HashSet::new(),
            stock_securities: HashMap::new(),
            parent_lookup: HashMap::new(),
            summary: ImportSummary::default(),
        }
    }

    /// Run every phase in order and return the counts
    pub fn run(
        mut self,
        import_prices: bool,
        import_transactions: bool,
        reporter: &mut Reporter<'_>,
    ) -> Result<ImportSummary, ImportError> {
        self.materialize_commodities()?;

        let ctx = self.ctx;
        let hierarchy = assemble_hierarchy(&ctx.accounts, self.notices)?;
        self.summary.unlinked_accounts = hierarchy.unlinked.len();
        reporter.stage(
            ImportStage::Accounts,
            Some(hierarchy.root.len()),
            "Creating accounts",
        );
        self.materialize_accounts(&hierarchy.root, reporter)?;

        if import_prices {
            reporter.stage(ImportStage::Prices, Some(ctx.prices.len()), "Importing prices");
            self.materialize_prices()?;
        }
        if import_transactions {
            reporter.stage(
                ImportStage::Transactions,
                Some(ctx.transactions.len()),
                "Importing transactions",
            );
            self.materialize_transactions(reporter)?;
        }
        Ok(self.summary)
    }

    // -------------------------------------------------------------------------
    // Commodities
    // -------------------------------------------------------------------------

    /// Currencies become engine currencies, everything else a security
    pub fn materialize_commodities(&mut self) -> Result<(), ImportError> {
        let default_currency = self.engine.default_currency();
        for commodity in self.ctx.commodities.iter() {
            let (Some(space), Some(id)) = (commodity.space.as_deref(), commodity.id.as_deref())
            else {
                continue;
            };
            if commodity.is_currency() {
                let handle = self
                    .engine
                    .find_or_create_currency(id, commodity.fraction.value)?;
                self.currencies.insert(id.to_string(), handle);
                self.summary.currencies += 1;
                continue;
            }

            let security = NewSecurity {
                symbol: id.to_string(),
                namespace: space.to_string(),
                name: commodity.name.clone(),
                isin: commodity.xcode.clone().filter(|x| !x.is_empty()),
                fraction: commodity.fraction.value,
                reported_currency: default_currency,
            };
            match self.engine.create_security(&security) {
                Ok(handle) => {
                    self.securities.insert(id.to_string(), handle);
                    self.summary.securities += 1;
                }
                Err(e) => {
                    self.notices.warn(
                        NoticeCode::SecurityCreateFailed,
                        format!("{}:{}", NoticeCode::SecurityCreateFailed.as_str(), commodity.key()),
                        format!("Security {} could not be created: {}", commodity.key(), e),
                        &[commodity.source()],
                    );
                }
            }
        }
        log::info!(
            "Materialized {} currencies and {} securities",
            self.summary.currencies,
            self.summary.securities
        );
        Ok(())
    }

    /// Currency of a reference, or the default when it names no currency
    fn currency_for(&mut self, reference: &CommodityRef) -> Result<CurrencyHandle, ImportError> {
        let code = match reference.id() {
            Some(code) if reference.is_currency() => code,
            _ => return Ok(self.engine.default_currency()),
        };
        if let Some(handle) = self.currencies.get(code) {
            return Ok(*handle);
        }
        let handle = self.engine.find_or_create_currency(code, None)?;
        self.currencies.insert(code.to_string(), handle);
        Ok(handle)
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    fn materialize_accounts(
        &mut self,
        root: &AccountNode<'a>,
        reporter: &mut Reporter<'_>,
    ) -> Result<(), ImportError> {
        let root_handle = self.engine.root_account();
        self.accounts.insert(root.entry.id(), root_handle);
        reporter.step(root.entry.name.as_deref().unwrap_or("Root"));
        for child in &root.children {
            self.visit(child, Some(root_handle), reporter)?;
        }
        log::info!(
            "Created {} accounts, skipped {}",
            self.summary.accounts,
            self.summary.ignored_accounts
        );
        Ok(())
    }

    /// Depth first; an account that is not materialized hands its own
    /// parent down, so its children attach to the nearest created ancestor.
    fn visit(
        &mut self,
        node: &AccountNode<'a>,
        parent: Option<AccountHandle>,
        reporter: &mut Reporter<'_>,
    ) -> Result<(), ImportError> {
        let entry = node.entry;
        if let Some(parent) = parent {
            self.parent_lookup.insert(entry.id(), parent);
        }
        let handle = match map_account_type(entry.type_tag()) {
            AccountMapping::Root => {
                self.ignored.insert(entry.id());
                self.summary.ignored_accounts += 1;
                None
            }
            AccountMapping::Ignore(reason) => {
                self.ignore(entry, reason);
                None
            }
            AccountMapping::Create {
                account_type,
                has_securities,
            } => self.create_account(entry, account_type, has_securities, parent)?,
        };
        reporter.step(entry.name.as_deref().unwrap_or(entry.id()));

        let child_parent = handle.or(parent);
        for child in &node.children {
            self.visit(child, child_parent, reporter)?;
        }
        Ok(())
    }

    fn ignore(&mut self, entry: &'a AccountEntry, reason: IgnoreReason) {
        self.ignored.insert(entry.id());
        self.summary.ignored_accounts += 1;
        let tag = entry.type_tag();
        match reason {
            IgnoreReason::Filler | IgnoreReason::NoTarget => {
                log::debug!("Skipping {} account {}", tag, entry.id());
            }
            IgnoreReason::Unsupported => {
                self.notices.warn(
                    NoticeCode::UnsupportedAccountType,
                    format!("{}:{}", NoticeCode::UnsupportedAccountType.as_str(), tag),
                    format!(
                        "Accounts of type {} are not supported and were skipped with their splits",
                        tag
                    ),
                    &[entry.source()],
                );
            }
            IgnoreReason::Unknown => {
                self.notices.warn(
                    NoticeCode::UnknownAccountType,
                    format!("{}:{}", NoticeCode::UnknownAccountType.as_str(), tag),
                    format!("Unknown account type '{}', accounts of this type were skipped", tag),
                    &[entry.source()],
                );
            }
        }
    }

    fn create_account(
        &mut self,
        entry: &'a AccountEntry,
        account_type: TargetAccountType,
        has_securities: bool,
        parent: Option<AccountHandle>,
    ) -> Result<Option<AccountHandle>, ImportError> {
        let currency = self.currency_for(&entry.commodity)?;
        let code = match entry.code.as_deref().filter(|c| !c.is_empty()) {
            None => None,
            Some(code) => match code.parse::<i32>() {
                Ok(code) => Some(code),
                Err(_) => {
                    self.notices.warn(
                        NoticeCode::NonIntegerAccountCode,
                        format!("{}:{}", NoticeCode::NonIntegerAccountCode.as_str(), entry.id()),
                        format!("Account code '{}' is not an integer and was dropped", code),
                        &[entry.source()],
                    );
                    None
                }
            },
        };

        let account = NewAccount {
            account_type,
            currency,
            name: entry.name.clone().unwrap_or_default(),
            description: entry.description.clone().filter(|d| !d.is_empty()),
            notes: entry.notes().map(str::to_string),
            code,
            visible: !entry.is_hidden(),
            placeholder: entry.is_placeholder(),
        };
        let security = if has_securities {
            self.account_security(entry)
        } else {
            None
        };

        let handle = match self.engine.create_account(parent, &account) {
            Ok(handle) => handle,
            Err(e) => {
                self.notices.warn(
                    NoticeCode::AccountCreateFailed,
                    format!("{}:{}", NoticeCode::AccountCreateFailed.as_str(), entry.id()),
                    format!("Account \"{}\" could not be created: {}", account.name, e),
                    &[entry.source()],
                );
                return Ok(None);
            }
        };
        self.accounts.insert(entry.id(), handle);
        self.summary.accounts += 1;

        if let Some(security) = security {
            if let Err(e) = self.engine.attach_security(handle, security) {
                self.notices.warn(
                    NoticeCode::AccountCreateFailed,
                    format!("{}:attach:{}", NoticeCode::AccountCreateFailed.as_str(), entry.id()),
                    format!("Security could not be attached to \"{}\": {}", account.name, e),
                    &[entry.source()],
                );
            }
        }
        Ok(Some(handle))
    }

    /// Security held by a stock or mutual fund account. Recorded in the
    /// side table before the account itself is created.
    fn account_security(&mut self, entry: &'a AccountEntry) -> Option<SecurityHandle> {
        let commodity_id = entry.commodity.id().unwrap_or("");
        if entry.commodity.is_currency() {
            self.notices.warn(
                NoticeCode::StockAccountCommodityIsCurrency,
                format!(
                    "{}:{}",
                    NoticeCode::StockAccountCommodityIsCurrency.as_str(),
                    entry.id()
                ),
                format!(
                    "Account \"{}\" holds currency {} instead of a security",
                    entry.name.as_deref().unwrap_or(entry.id()),
                    commodity_id
                ),
                &[entry.source()],
            );
            return None;
        }
        match self.securities.get(commodity_id) {
            Some(&security) => {
                self.stock_securities.insert(entry.id(), security);
                Some(security)
            }
            None => {
                self.notices.warn(
                    NoticeCode::StockAccountSecurityNotFound,
                    format!(
                        "{}:{}",
                        NoticeCode::StockAccountSecurityNotFound.as_str(),
                        commodity_id
                    ),
                    format!("Security '{}' of a stock account was not found", commodity_id),
                    &[entry.source()],
                );
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Prices
    // -------------------------------------------------------------------------

    /// A missing security skips the quote; an engine rejection is fatal
    fn materialize_prices(&mut self) -> Result<(), ImportError> {
        for price in self.ctx.prices.iter() {
            let commodity = &price.commodity;
            let security = commodity
                .id()
                .and_then(|id| self.securities.get(id))
                .copied();
            let Some(security) = security else {
                let message = if commodity.is_currency() {
                    format!("Exchange rates of currency {} are not imported", commodity)
                } else {
                    format!("Prices of {} were skipped, it is not a known security", commodity)
                };
                self.notices.warn(
                    NoticeCode::PriceCommodityMissing,
                    format!("{}:{}", NoticeCode::PriceCommodityMissing.as_str(), commodity),
                    message,
                    &[price.source_ref()],
                );
                continue;
            };
            let (Some(value), Some(date)) = (price.value.to_decimal(), price.time.date()) else {
                self.notices.warn(
                    NoticeCode::PriceValueInvalid,
                    format!("{}:{}", NoticeCode::PriceValueInvalid.as_str(), price.id()),
                    format!("Price value {} cannot be represented as a decimal", price.value),
                    &[price.source_ref()],
                );
                continue;
            };

            let point = HistoryPoint {
                date,
                price: value,
                volume: 0,
                high: value,
                low: value,
            };
            match self.engine.add_security_history(security, &point) {
                Ok(true) => self.summary.prices += 1,
                Ok(false) => {
                    let message = format!(
                        "The engine rejected price {} of {} on {}",
                        value, commodity, date
                    );
                    self.notices.error(
                        NoticeCode::SecurityHistoryRejected,
                        NoticeCode::SecurityHistoryRejected.as_str(),
                        message.clone(),
                        &[price.source_ref()],
                    );
                    log::error!("{}", message);
                    return Err(ImportError::Fatal(message));
                }
                Err(e) => {
                    self.notices.error(
                        NoticeCode::SecurityHistoryRejected,
                        NoticeCode::SecurityHistoryRejected.as_str(),
                        format!("Price {} could not be stored: {}", price.id(), e),
                        &[price.source_ref()],
                    );
                    return Err(e.into());
                }
            }
        }
        log::info!("Imported {} prices", self.summary.prices);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    fn materialize_transactions(&mut self, reporter: &mut Reporter<'_>) -> Result<(), ImportError> {
        let ctx = self.ctx;
        for txn in ctx.transactions.iter() {
            let txn_source = txn.source();
            let mut seen = HashSet::new();
            let mut entries = Vec::new();
            for split_id in &txn.split_ids {
                if !seen.insert(split_id.as_str()) {
                    continue;
                }
                // A later duplicate in another transaction took the id over
                let Some(split) = ctx.splits.get(split_id).filter(|s| s.owner == txn.ordinal)
                else {
                    continue;
                };
                if let Some(entry) = self.resolve_split(split, &txn_source) {
                    entries.push(entry);
                }
            }
            reporter.step(txn.description.as_deref().unwrap_or(""));

            if entries.is_empty() {
                self.notices.warn(
                    NoticeCode::TransactionWithoutSplits,
                    format!("{}:{}", NoticeCode::TransactionWithoutSplits.as_str(), txn.id()),
                    "Transaction has no importable splits and was skipped",
                    &[txn_source],
                );
                continue;
            }
            let Some(date) = txn.date_posted.date() else {
                continue;
            };

            let split_count = entries.len();
            let transaction = NewTransaction {
                date,
                currency: self.currency_for(&txn.currency)?,
                number: txn.num.clone().filter(|n| !n.trim().is_empty()),
                description: txn.description.clone().unwrap_or_default(),
                notes: txn.notes().map(str::to_string),
                entries,
            };
            match self.engine.add_transaction(&transaction) {
                Ok(_) => {
                    self.summary.transactions += 1;
                    self.summary.splits += split_count;
                }
                Err(e) => {
                    self.notices.warn(
                        NoticeCode::TransactionCreateFailed,
                        format!("{}:{}", NoticeCode::TransactionCreateFailed.as_str(), txn.id()),
                        format!("Transaction could not be stored: {}", e),
                        &[txn_source],
                    );
                }
            }
        }
        log::info!(
            "Imported {} transactions with {} splits",
            self.summary.transactions,
            self.summary.splits
        );
        Ok(())
    }

    /// Resolve a split to an entry or drop it with a warning
    fn resolve_split(&mut self, split: &SplitEntry, txn_source: &Source) -> Option<NewEntry> {
        let account_id = split.account_id();
        let chain = [txn_source.clone(), split.source()];

        if self.ignored.contains(account_id) {
            self.notices.warn(
                NoticeCode::SplitAccountIgnored,
                format!("{}:{}", NoticeCode::SplitAccountIgnored.as_str(), account_id),
                format!("Splits of skipped account {} were dropped", account_id),
                &chain,
            );
            return None;
        }

        let (account, security) = match self.accounts.get(account_id) {
            Some(&handle) => (handle, self.stock_securities.get(account_id).copied()),
            None => {
                let Some(&security) = self.stock_securities.get(account_id) else {
                    self.notices.warn(
                        NoticeCode::SplitAccountMissing,
                        format!("{}:{}", NoticeCode::SplitAccountMissing.as_str(), account_id),
                        format!(
                            "Split {} references account {} which was not imported",
                            split.id(),
                            account_id
                        ),
                        &chain,
                    );
                    return None;
                };
                let Some(&parent) = self.parent_lookup.get(account_id) else {
                    self.notices.warn(
                        NoticeCode::SplitSecurityAccountParentMissing,
                        format!(
                            "{}:{}",
                            NoticeCode::SplitSecurityAccountParentMissing.as_str(),
                            account_id
                        ),
                        format!(
                            "Split {} posts to security account {} whose parent was not imported",
                            split.id(),
                            account_id
                        ),
                        &chain,
                    );
                    return None;
                };
                (parent, Some(security))
            }
        };

        let state = split.reconciled_state.as_deref().unwrap_or("");
        let Some(reconciled) = map_reconciled_state(state) else {
            self.notices.warn(
                NoticeCode::SplitReconciledStateUnsupported,
                format!("{}:{}", NoticeCode::SplitReconciledStateUnsupported.as_str(), state),
                format!("Reconciled state '{}' is not supported, split {} was dropped", state, split.id()),
                &chain,
            );
            return None;
        };

        let (Some(amount), Some(quantity)) = (split.value.to_decimal(), split.quantity.to_decimal())
        else {
            self.notices.warn(
                NoticeCode::SplitAmountInvalid,
                format!("{}:{}", NoticeCode::SplitAmountInvalid.as_str(), split.id()),
                format!(
                    "Split amounts {} / {} cannot be represented as decimals",
                    split.value, split.quantity
                ),
                &chain,
            );
            return None;
        };

        Some(NewEntry {
            account,
            security,
            amount,
            quantity,
            reconciled,
            reconcile_date: split.reconcile_date.date(),
            memo: split.memo.clone().filter(|m| !m.is_empty()),
            action: split.action.clone().filter(|a| !a.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EngineResult, SqliteEngine, TransactionHandle};
    use crate::gnc::{CommodityEntry, IdEntry, NumericEntry, PriceEntry, TimeEntry, TransactionEntry};

    fn guid(n: u32) -> String {
        format!("{:032x}", n)
    }

    fn account(n: u32, name: &str, tag: &str, parent: Option<u32>) -> AccountEntry {
        AccountEntry {
            name: Some(name.to_string()),
            id: IdEntry::parse(&guid(n), None),
            account_type: Some(tag.to_string()),
            parent: parent.map(|p| IdEntry::parse(&guid(p), None)).unwrap_or_default(),
            ..Default::default()
        }
    }

    fn table(entries: Vec<AccountEntry>) -> EntryTable<AccountEntry> {
        let mut table = EntryTable::default();
        for entry in entries {
            table.insert(entry.id().to_string(), entry);
        }
        table
    }

    fn names(node: &AccountNode<'_>) -> Vec<String> {
        let mut out = vec![node.entry.name.clone().unwrap_or_default()];
        for child in &node.children {
            out.extend(names(child));
        }
        out
    }

    #[test]
    fn test_hierarchy_claims_reachable_nodes_once() {
        let accounts = table(vec![
            account(3, "Checking", "BANK", Some(2)),
            account(1, "Root", "ROOT", None),
            account(2, "Assets", "ASSET", Some(1)),
            account(4, "Orphan", "BANK", Some(99)),
            account(5, "Orphan child", "BANK", Some(4)),
            account(6, "Expenses", "EXPENSE", Some(1)),
        ]);
        let mut notices = NoticeTree::new();
        let hierarchy = assemble_hierarchy(&accounts, &mut notices).unwrap();

        assert_eq!(names(&hierarchy.root), vec!["Root", "Assets", "Checking", "Expenses"]);
        assert_eq!(hierarchy.root.len(), 4);
        let mut unlinked: Vec<_> = hierarchy
            .unlinked
            .iter()
            .map(|a| a.name.clone().unwrap_or_default())
            .collect();
        unlinked.sort();
        assert_eq!(unlinked, vec!["Orphan", "Orphan child"]);
        assert!(notices.is_empty());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let accounts = table(vec![account(2, "Assets", "ASSET", None)]);
        let mut notices = NoticeTree::new();
        let result = assemble_hierarchy(&accounts, &mut notices);
        assert!(matches!(result, Err(ImportError::Fatal(_))));
        assert_eq!(notices.with_code(NoticeCode::NoRootAccount).len(), 1);
    }

    #[test]
    fn test_cycle_through_root_terminates() {
        let mut root = account(1, "Root", "ROOT", None);
        root.parent = IdEntry::parse(&guid(2), None);
        let accounts = table(vec![root, account(2, "Assets", "ASSET", Some(1))]);
        let mut notices = NoticeTree::new();
        let hierarchy = assemble_hierarchy(&accounts, &mut notices).unwrap();
        assert_eq!(hierarchy.root.len(), 2);
        assert!(hierarchy.unlinked.is_empty());
    }

    #[test]
    fn test_ignored_account_children_attach_to_nearest_ancestor() {
        let mut ctx = ImportContext::new();
        ctx.accounts = table(vec![
            account(1, "Root", "ROOT", None),
            account(2, "Assets", "ASSET", Some(1)),
            account(3, "Receivables", "RECEIVABLE", Some(2)),
            account(4, "Customer deposits", "BANK", Some(3)),
            account(5, "Old", "NONE", Some(1)),
        ]);
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let mut notices = NoticeTree::new();
        let summary = Resolver::new(&ctx, &mut engine, &mut notices)
            .run(true, true, &mut Reporter::silent())
            .unwrap();

        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.ignored_accounts, 2);
        let assets = &engine.find_accounts_by_name("Assets").unwrap()[0];
        let deposits = &engine.find_accounts_by_name("Customer deposits").unwrap()[0];
        assert_eq!(deposits.parent, Some(assets.handle));
        // NONE is silent, RECEIVABLE is warned
        assert_eq!(notices.warning_count(), 1);
        assert_eq!(notices.with_code(NoticeCode::UnsupportedAccountType).len(), 1);
    }

    #[test]
    fn test_creditline_splits_are_dropped_as_ignored() {
        let mut ctx = ImportContext::new();
        ctx.accounts = table(vec![
            account(1, "Root", "ROOT", None),
            account(2, "Credit line", "CREDITLINE", Some(1)),
            account(3, "Checking", "BANK", Some(1)),
        ]);
        let mut txn = TransactionEntry::new(0);
        txn.id = IdEntry::parse(&guid(100), None);
        txn.date_posted = TimeEntry::parse("2022-03-01 00:00:00 +0000");
        for (n, acct, value) in [(101, 2, "-50/1"), (102, 3, "50/1")] {
            let mut split = SplitEntry::new(0);
            split.id = IdEntry::parse(&guid(n), None);
            split.account = IdEntry::parse(&guid(acct), None);
            split.reconciled_state = Some("n".into());
            split.value = NumericEntry::parse(value);
            split.quantity = NumericEntry::parse(value);
            txn.split_ids.push(guid(n));
            ctx.splits.insert(guid(n), split);
        }
        ctx.transactions.insert(guid(100), txn);

        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let mut notices = NoticeTree::new();
        let summary = Resolver::new(&ctx, &mut engine, &mut notices)
            .run(true, true, &mut Reporter::silent())
            .unwrap();

        assert_eq!(summary.transactions, 1);
        assert_eq!(summary.splits, 1);
        assert_eq!(notices.with_code(NoticeCode::SplitAccountIgnored).len(), 1);
        assert!(notices.with_code(NoticeCode::SplitAccountMissing).is_empty());
    }

    /// Engine that delegates to SQLite but can be told to fail
    struct FaultyEngine {
        inner: SqliteEngine,
        reject_history: bool,
        fail_account: Option<&'static str>,
    }

    impl Engine for FaultyEngine {
        fn root_account(&self) -> AccountHandle {
            self.inner.root_account()
        }

        fn default_currency(&self) -> CurrencyHandle {
            self.inner.default_currency()
        }

        fn find_or_create_currency(
            &mut self,
            code: &str,
            fraction: Option<i64>,
        ) -> EngineResult<CurrencyHandle> {
            self.inner.find_or_create_currency(code, fraction)
        }

        fn create_security(&mut self, security: &NewSecurity) -> EngineResult<SecurityHandle> {
            self.inner.create_security(security)
        }

        fn create_account(
            &mut self,
            parent: Option<AccountHandle>,
            account: &NewAccount,
        ) -> EngineResult<AccountHandle> {
            if self.fail_account == Some(account.name.as_str()) {
                return Err(EngineError::Rejected(format!("refusing {}", account.name)));
            }
            self.inner.create_account(parent, account)
        }

        fn attach_security(
            &mut self,
            account: AccountHandle,
            security: SecurityHandle,
        ) -> EngineResult<()> {
            self.inner.attach_security(account, security)
        }

        fn add_security_history(
            &mut self,
            security: SecurityHandle,
            point: &HistoryPoint,
        ) -> EngineResult<bool> {
            if self.reject_history {
                return Ok(false);
            }
            self.inner.add_security_history(security, point)
        }

        fn add_transaction(
            &mut self,
            transaction: &NewTransaction,
        ) -> EngineResult<TransactionHandle> {
            self.inner.add_transaction(transaction)
        }
    }

    fn stock_book() -> ImportContext {
        let mut ctx = ImportContext::new();
        ctx.commodities.insert(
            "NASDAQ:AAPL",
            CommodityEntry {
                space: Some("NASDAQ".into()),
                id: Some("AAPL".into()),
                name: Some("Apple".into()),
                ..Default::default()
            },
        );
        let mut stock = account(3, "AAPL", "STOCK", Some(2));
        stock.commodity = CommodityRef::new("NASDAQ", "AAPL");
        ctx.accounts = table(vec![
            account(1, "Root", "ROOT", None),
            account(2, "Brokerage", "ASSET", Some(1)),
            stock,
        ]);
        ctx.prices.insert(
            guid(50),
            PriceEntry {
                id: IdEntry::parse(&guid(50), None),
                commodity: CommodityRef::new("NASDAQ", "AAPL"),
                currency: CommodityRef::new("ISO4217", "USD"),
                time: TimeEntry::parse("2020-01-02 00:00:00 +0000"),
                value: NumericEntry::parse("30012/100"),
                ..Default::default()
            },
        );
        let mut txn = TransactionEntry::new(0);
        txn.id = IdEntry::parse(&guid(100), None);
        txn.date_posted = TimeEntry::parse("2020-01-02 00:00:00 +0000");
        let mut split = SplitEntry::new(0);
        split.id = IdEntry::parse(&guid(101), None);
        split.account = IdEntry::parse(&guid(3), None);
        split.reconciled_state = Some("c".into());
        split.value = NumericEntry::parse("300120/100");
        split.quantity = NumericEntry::parse("10/1");
        txn.split_ids.push(guid(101));
        ctx.splits.insert(guid(101), split);
        ctx.transactions.insert(guid(100), txn);
        ctx
    }

    #[test]
    fn test_stock_account_gets_security_and_history() {
        let ctx = stock_book();
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let mut notices = NoticeTree::new();
        let summary = Resolver::new(&ctx, &mut engine, &mut notices)
            .run(true, true, &mut Reporter::silent())
            .unwrap();

        assert!(notices.is_empty(), "{}", notices);
        assert_eq!(summary.securities, 1);
        assert_eq!(summary.prices, 1);
        let stock = &engine.find_accounts_by_name("AAPL").unwrap()[0];
        assert_eq!(stock.account_type, TargetAccountType::Invest);
        let held = engine.securities_of(stock.handle).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(engine.history_of(held[0].handle).unwrap().len(), 1);

        let entries = engine.entries_of(stock.handle).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].security, Some(held[0].handle));
    }

    #[test]
    fn test_history_rejection_aborts_import() {
        let ctx = stock_book();
        let mut engine = FaultyEngine {
            inner: SqliteEngine::open_in_memory("USD").unwrap(),
            reject_history: true,
            fail_account: None,
        };
        let mut notices = NoticeTree::new();
        let result = Resolver::new(&ctx, &mut engine, &mut notices).run(
            true,
            true,
            &mut Reporter::silent(),
        );

        assert!(matches!(result, Err(ImportError::Fatal(_))));
        assert!(notices.has_fatal_error());
        assert_eq!(engine.inner.transaction_count().unwrap(), 0);
    }

    #[test]
    fn test_split_falls_back_to_stock_account_parent() {
        let ctx = stock_book();
        let mut engine = FaultyEngine {
            inner: SqliteEngine::open_in_memory("USD").unwrap(),
            reject_history: false,
            fail_account: Some("AAPL"),
        };
        let mut notices = NoticeTree::new();
        let summary = Resolver::new(&ctx, &mut engine, &mut notices)
            .run(true, true, &mut Reporter::silent())
            .unwrap();

        assert_eq!(notices.with_code(NoticeCode::AccountCreateFailed).len(), 1);
        assert_eq!(summary.splits, 1);
        let brokerage = &engine.inner.find_accounts_by_name("Brokerage").unwrap()[0];
        let entries = engine.inner.entries_of(brokerage.handle).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].security.is_some());
    }

    #[test]
    fn test_split_fallback_skips_ignored_ancestors() {
        let mut ctx = stock_book();
        let mut stock = account(3, "AAPL", "STOCK", Some(4));
        stock.commodity = CommodityRef::new("NASDAQ", "AAPL");
        ctx.accounts.insert(guid(3), stock);
        ctx.accounts
            .insert(guid(4), account(4, "Margin", "PAYABLE", Some(2)));
        let mut engine = FaultyEngine {
            inner: SqliteEngine::open_in_memory("USD").unwrap(),
            reject_history: false,
            fail_account: Some("AAPL"),
        };
        let mut notices = NoticeTree::new();
        let summary = Resolver::new(&ctx, &mut engine, &mut notices)
            .run(false, true, &mut Reporter::silent())
            .unwrap();

        assert!(notices
            .with_code(NoticeCode::SplitSecurityAccountParentMissing)
            .is_empty());
        assert_eq!(summary.splits, 1);
        let brokerage = &engine.inner.find_accounts_by_name("Brokerage").unwrap()[0];
        let entries = engine.inner.entries_of(brokerage.handle).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].security.is_some());
    }

    #[test]
    fn test_stock_account_holding_a_currency() {
        let mut ctx = stock_book();
        let mut stock = account(3, "AAPL", "STOCK", Some(2));
        stock.commodity = CommodityRef::new("ISO4217", "EUR");
        ctx.accounts.insert(guid(3), stock);
        let mut engine = SqliteEngine::open_in_memory("USD").unwrap();
        let mut notices = NoticeTree::new();
        Resolver::new(&ctx, &mut engine, &mut notices)
            .run(false, false, &mut Reporter::silent())
            .unwrap();

        assert_eq!(
            notices.with_code(NoticeCode::StockAccountCommodityIsCurrency).len(),
            1
        );
        assert_eq!(notices.warning_count(), 1);
        let stock = &engine.find_accounts_by_name("AAPL").unwrap()[0];
        assert!(engine.securities_of(stock.handle).unwrap().is_empty());
        assert_eq!(stock.currency_code, "EUR");
    }
}

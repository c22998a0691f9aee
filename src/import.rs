//! Import driver.
//!
//! Opens the input, runs the parsing state machine over it and, unless a
//! fatal notice was recorded, hands the parsed book to the resolver.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};

use crate::config::ImportOptions;
use crate::context::ImportContext;
use crate::engine::{Engine, SqliteEngine};
use crate::error::ImportError;
use crate::notice::{NoticeCode, NoticeTree};
use crate::progress::{ImportStage, ProgressCallback, Reporter};
use crate::resolve::Resolver;
use crate::xml::{open_input, parse_document, wrap_reader};

/// Counts of one finished import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Accounts created, the root excluded
    pub accounts: usize,
    pub ignored_accounts: usize,
    /// Accounts whose parent chain never reaches the root
    pub unlinked_accounts: usize,
    pub currencies: usize,
    pub securities: usize,
    pub prices: usize,
    pub transactions: usize,
    pub splits: usize,
    pub warnings: usize,
}

/// Imports GnuCash XML books into an [`Engine`].
///
/// The notice tree of the last run stays available through
/// [`notices`](Self::notices) until the next import starts.
pub struct GnuCashImport {
    options: ImportOptions,
    notices: NoticeTree,
}

impl GnuCashImport {
    pub fn new(options: ImportOptions) -> Result<Self, ImportError> {
        options.validate()?;
        Ok(Self {
            options,
            notices: NoticeTree::new(),
        })
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn notices(&self) -> &NoticeTree {
        &self.notices
    }

    pub fn into_notices(self) -> NoticeTree {
        self.notices
    }

    /// Import a book from a plain or gzip-compressed file
    pub fn import_file(
        &mut self,
        path: &Path,
        engine: &mut dyn Engine,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ImportSummary, ImportError> {
        self.notices.clear();
        let mut reporter = Reporter::new(progress);
        reporter.stage(
            ImportStage::Opening,
            None,
            &format!("Opening {}", path.display()),
        );
        let input = open_input(path, self.options.max_uncompressed_size)?;
        self.run(input, engine, &mut reporter)
    }

    /// Import a book into a new SQLite store at `db_path`.
    ///
    /// A failed import removes the partially written store again. An
    /// existing file at `db_path` is never touched.
    pub fn import_into_new_store(
        &mut self,
        path: &Path,
        db_path: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(SqliteEngine, ImportSummary), ImportError> {
        let mut engine = SqliteEngine::create(db_path, &self.options.base_currency)?;
        match self.import_file(path, &mut engine, progress) {
            Ok(summary) => Ok((engine, summary)),
            Err(e) => {
                drop(engine);
                log::info!("Removing incomplete store {}", db_path.display());
                if let Err(remove) = SqliteEngine::remove_store(db_path) {
                    log::warn!("Failed to remove {}: {}", db_path.display(), remove);
                }
                Err(e)
            }
        }
    }

    /// Import a book from any byte stream; `label` names it in errors
    pub fn import_reader<R: Read>(
        &mut self,
        reader: R,
        label: &str,
        engine: &mut dyn Engine,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ImportSummary, ImportError> {
        self.notices.clear();
        let mut reporter = Reporter::new(progress);
        reporter.stage(ImportStage::Opening, None, &format!("Opening {}", label));
        let input = wrap_reader(reader, self.options.max_uncompressed_size).map_err(|source| {
            ImportError::Io {
                path: PathBuf::from(label),
                source,
            }
        })?;
        self.run(input, engine, &mut reporter)
    }

    fn run<R: BufRead>(
        &mut self,
        input: R,
        engine: &mut dyn Engine,
        reporter: &mut Reporter<'_>,
    ) -> Result<ImportSummary, ImportError> {
        reporter.stage(ImportStage::Parsing, None, "Parsing document");
        let mut ctx = ImportContext::new();
        if let Err(e) = parse_document(input, &mut ctx, &mut self.notices) {
            if matches!(e, ImportError::Xml { .. } | ImportError::Malformed(_)) {
                self.notices.error(
                    NoticeCode::MalformedDocument,
                    NoticeCode::MalformedDocument.as_str(),
                    e.to_string(),
                    &[],
                );
            }
            log::error!("Parsing failed: {}", e);
            return Err(e);
        }
        log_parsed(&ctx);

        if let Some(notice) = self.notices.first_error() {
            return Err(ImportError::Fatal(notice.message.clone()));
        }

        let mut summary = Resolver::new(&ctx, engine, &mut self.notices).run(
            self.options.import_prices,
            self.options.import_transactions,
            reporter,
        )?;
        summary.warnings = self.notices.warning_count();

        reporter.stage(ImportStage::Complete, None, "Import complete");
        log::info!(
            "Import complete: {} accounts, {} transactions, {} prices, {} warnings",
            summary.accounts,
            summary.transactions,
            summary.prices,
            summary.warnings
        );
        Ok(summary)
    }
}

fn log_parsed(ctx: &ImportContext) {
    log::info!(
        "Parsed {} commodities, {} accounts, {} prices, {} transactions, {} splits",
        ctx.commodities.len(),
        ctx.accounts.len(),
        ctx.prices.len(),
        ctx.transactions.len(),
        ctx.splits.len()
    );
    for (kind, parsed) in [
        ("commodity", ctx.commodities.len()),
        ("account", ctx.accounts.len()),
        ("transaction", ctx.transactions.len()),
    ] {
        if let Some(declared) = ctx.declared_count(kind) {
            if declared != parsed as i64 {
                log::debug!("count-data declares {} {}s, parsed {}", declared, kind, parsed);
            }
        }
    }
}

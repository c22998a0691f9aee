//! Notice collector for import diagnostics.
//!
//! Warnings and errors are stored in an arena. Each notice hangs below the
//! chain of sources that caused it (e.g. transaction -> split), so the tree
//! can be printed the way a user reads it. A notice is stored at most once
//! per dedup key: one missing account referenced by a thousand splits shows
//! up as a single entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Severity of a recorded notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recoverable: the offending entity is dropped, the import continues
    Warning,
    /// Fatal: the import aborts
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Stable category of a notice, independent of its rendered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeCode {
    // Parse time
    VersionUnsupported,
    MissingElement,
    InvalidGuid,
    InvalidInt,
    InvalidNumeric,
    InvalidTime,
    InvalidCommodityRef,
    DuplicateEntry,
    NonStandardScuUnsupported,
    LotsUnsupported,
    MalformedDocument,
    // Resolution time
    NoRootAccount,
    MultipleRootAccounts,
    UnsupportedAccountType,
    UnknownAccountType,
    NonIntegerAccountCode,
    AccountCreateFailed,
    SecurityCreateFailed,
    StockAccountSecurityNotFound,
    StockAccountCommodityIsCurrency,
    PriceCommodityMissing,
    PriceValueInvalid,
    SecurityHistoryRejected,
    SplitAccountMissing,
    SplitAccountIgnored,
    SplitSecurityAccountParentMissing,
    SplitReconciledStateUnsupported,
    SplitAmountInvalid,
    TransactionWithoutSplits,
    TransactionCreateFailed,
}

impl NoticeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionUnsupported => "VERSION_UNSUPPORTED",
            Self::MissingElement => "MISSING_ELEMENT",
            Self::InvalidGuid => "INVALID_GUID",
            Self::InvalidInt => "INVALID_INT",
            Self::InvalidNumeric => "INVALID_NUMERIC",
            Self::InvalidTime => "INVALID_TIME",
            Self::InvalidCommodityRef => "INVALID_COMMODITY_REF",
            Self::DuplicateEntry => "DUPLICATE_ENTRY",
            Self::NonStandardScuUnsupported => "NON_STANDARD_SCU_UNSUPPORTED",
            Self::LotsUnsupported => "LOTS_UNSUPPORTED",
            Self::MalformedDocument => "MALFORMED_DOCUMENT",
            Self::NoRootAccount => "NO_ROOT_ACCOUNT",
            Self::MultipleRootAccounts => "MULTIPLE_ROOT_ACCOUNTS",
            Self::UnsupportedAccountType => "UNSUPPORTED_ACCOUNT_TYPE",
            Self::UnknownAccountType => "UNKNOWN_ACCOUNT_TYPE",
            Self::NonIntegerAccountCode => "NON_INTEGER_ACCOUNT_CODE",
            Self::AccountCreateFailed => "ACCOUNT_CREATE_FAILED",
            Self::SecurityCreateFailed => "SECURITY_CREATE_FAILED",
            Self::StockAccountSecurityNotFound => "STOCK_ACCOUNT_SECURITY_NOT_FOUND",
            Self::StockAccountCommodityIsCurrency => "STOCK_ACCOUNT_COMMODITY_IS_CURRENCY",
            Self::PriceCommodityMissing => "PRICE_COMMODITY_MISSING",
            Self::PriceValueInvalid => "PRICE_VALUE_INVALID",
            Self::SecurityHistoryRejected => "SECURITY_HISTORY_REJECTED",
            Self::SplitAccountMissing => "SPLIT_ACCOUNT_MISSING",
            Self::SplitAccountIgnored => "SPLIT_ACCOUNT_IGNORED",
            Self::SplitSecurityAccountParentMissing => "SPLIT_SECURITY_ACCOUNT_PARENT_MISSING",
            Self::SplitReconciledStateUnsupported => "SPLIT_RECONCILED_STATE_UNSUPPORTED",
            Self::SplitAmountInvalid => "SPLIT_AMOUNT_INVALID",
            Self::TransactionWithoutSplits => "TRANSACTION_WITHOUT_SPLITS",
            Self::TransactionCreateFailed => "TRANSACTION_CREATE_FAILED",
        }
    }
}

/// Something a notice can be attributed to (an account, a split, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Unique key of the source, e.g. `account:0f3c...`
    pub key: String,
    /// Text shown to the user, e.g. `Account "Checking"`
    pub label: String,
}

impl Source {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Index of a node in the notice arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A recorded warning or error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub severity: Severity,
    pub code: NoticeCode,
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeKind {
    Source(Source),
    Notice(Notice),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Deduplicated tree of import notices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredNoticeTree")]
pub struct NoticeTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    #[serde(skip)]
    by_key: HashMap<String, NodeId>,
    #[serde(skip)]
    sources: HashMap<String, NodeId>,
    errors: usize,
}

/// Serialized form; the lookup maps are rebuilt from the nodes
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNoticeTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    errors: usize,
}

impl From<StoredNoticeTree> for NoticeTree {
    fn from(stored: StoredNoticeTree) -> Self {
        let mut by_key = HashMap::new();
        let mut sources = HashMap::new();
        for (index, node) in stored.nodes.iter().enumerate() {
            match &node.kind {
                NodeKind::Source(source) => {
                    sources.insert(source.key.clone(), NodeId(index));
                }
                NodeKind::Notice(notice) => {
                    by_key.insert(notice.key.clone(), NodeId(index));
                }
            }
        }
        Self {
            nodes: stored.nodes,
            roots: stored.roots,
            by_key,
            sources,
            errors: stored.errors,
        }
    }
}

impl NoticeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notice below `chain` (outermost source first).
    ///
    /// Returns `false` when a notice with the same key already exists; the
    /// tree is left unchanged in that case.
    pub fn record(
        &mut self,
        severity: Severity,
        code: NoticeCode,
        key: impl Into<String>,
        message: impl Into<String>,
        chain: &[Source],
    ) -> bool {
        let key = key.into();
        if self.by_key.contains_key(&key) {
            return false;
        }
        let message = message.into();
        log::debug!("{} {} [{}]: {}", severity.as_str(), code.as_str(), key, message);

        let mut parent = None;
        for source in chain {
            parent = Some(self.source_node(source, parent));
        }
        let id = self.push(
            NodeKind::Notice(Notice {
                severity,
                code,
                key: key.clone(),
                message,
            }),
            parent,
        );
        self.by_key.insert(key, id);
        if severity == Severity::Error {
            self.errors += 1;
        }
        true
    }

    pub fn warn(
        &mut self,
        code: NoticeCode,
        key: impl Into<String>,
        message: impl Into<String>,
        chain: &[Source],
    ) -> bool {
        self.record(Severity::Warning, code, key, message, chain)
    }

    pub fn error(
        &mut self,
        code: NoticeCode,
        key: impl Into<String>,
        message: impl Into<String>,
        chain: &[Source],
    ) -> bool {
        self.record(Severity::Error, code, key, message, chain)
    }

    /// True once any error has been recorded; gates materialization.
    pub fn has_fatal_error(&self) -> bool {
        self.errors > 0
    }

    /// First recorded error, if any
    pub fn first_error(&self) -> Option<&Notice> {
        self.notices().find(|n| n.severity == Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.notices()
            .filter(|n| n.severity == Severity::Warning)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All notices in recording order
    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.nodes.iter().filter_map(|node| match &node.kind {
            NodeKind::Notice(notice) => Some(notice),
            NodeKind::Source(_) => None,
        })
    }

    /// Notices with the given code
    pub fn with_code(&self, code: NoticeCode) -> Vec<&Notice> {
        self.notices().filter(|n| n.code == code).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Notice> {
        self.by_key.get(key).and_then(|id| match &self.nodes[id.0].kind {
            NodeKind::Notice(notice) => Some(notice),
            NodeKind::Source(_) => None,
        })
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Chain of source labels above a notice, outermost first
    pub fn sources_of(&self, key: &str) -> Vec<&Source> {
        let mut chain = Vec::new();
        let mut current = self.by_key.get(key).and_then(|id| self.nodes[id.0].parent);
        while let Some(id) = current {
            if let NodeKind::Source(source) = &self.nodes[id.0].kind {
                chain.push(source);
            }
            current = self.nodes[id.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Clear all notices (used when an importer is reused)
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn source_node(&mut self, source: &Source, parent: Option<NodeId>) -> NodeId {
        if let Some(id) = self.sources.get(&source.key) {
            return *id;
        }
        let id = self.push(NodeKind::Source(source.clone()), parent);
        self.sources.insert(source.key.clone(), id);
        id
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let node = &self.nodes[id.0];
        let indent = "  ".repeat(depth);
        match &node.kind {
            NodeKind::Source(source) => writeln!(f, "{}{}", indent, source.label)?,
            NodeKind::Notice(notice) => writeln!(
                f,
                "{}[{}] {}",
                indent,
                notice.severity.as_str(),
                notice.message
            )?,
        }
        for child in &node.children {
            self.fmt_node(f, *child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for NoticeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            self.fmt_node(f, *root, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_is_stored_once() {
        let mut tree = NoticeTree::new();
        let chain = [Source::new("split:1", "Split 1")];
        assert!(tree.warn(NoticeCode::SplitAccountMissing, "missing_A", "first", &chain));
        assert!(!tree.warn(NoticeCode::SplitAccountMissing, "missing_A", "second", &chain));

        assert_eq!(tree.warning_count(), 1);
        assert_eq!(tree.get("missing_A").unwrap().message, "first");
    }

    #[test]
    fn test_deserialized_tree_keeps_lookups() {
        let mut tree = NoticeTree::new();
        let chain = [Source::new("txn:1", "Transaction 1"), Source::new("split:1", "Split 1")];
        tree.warn(NoticeCode::SplitAccountMissing, "missing_A", "first", &chain);

        let json = serde_json::to_string(&tree).unwrap();
        let mut restored: NoticeTree = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.get("missing_A").unwrap().message, "first");
        let labels: Vec<_> = restored
            .sources_of("missing_A")
            .iter()
            .map(|s| s.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Transaction 1", "Split 1"]);
        assert!(!restored.warn(NoticeCode::SplitAccountMissing, "missing_A", "again", &chain));
        restored.warn(NoticeCode::SplitAccountMissing, "missing_B", "other", &chain);
        assert_eq!(restored.roots().len(), 1);
        assert_eq!(restored.warning_count(), 2);
    }

    #[test]
    fn test_notices_nest_under_their_sources() {
        let mut tree = NoticeTree::new();
        let txn = Source::new("txn:1", "Transaction 1");
        tree.warn(
            NoticeCode::SplitAccountMissing,
            "a",
            "split a",
            &[txn.clone(), Source::new("split:a", "Split a")],
        );
        tree.warn(
            NoticeCode::SplitAccountMissing,
            "b",
            "split b",
            &[txn, Source::new("split:b", "Split b")],
        );

        assert_eq!(tree.roots().len(), 1);
        let txn_node = tree.node(tree.roots()[0]);
        assert_eq!(txn_node.children.len(), 2);

        let labels: Vec<_> = tree.sources_of("b").iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Transaction 1", "Split b"]);
    }

    #[test]
    fn test_fatal_error_detection() {
        let mut tree = NoticeTree::new();
        tree.warn(NoticeCode::DuplicateEntry, "dup", "dup", &[]);
        assert!(!tree.has_fatal_error());

        tree.error(NoticeCode::VersionUnsupported, "version", "bad version", &[]);
        assert!(tree.has_fatal_error());
        assert_eq!(tree.first_error().unwrap().code, NoticeCode::VersionUnsupported);
        assert_eq!(tree.error_count(), 1);
    }

    #[test]
    fn test_display_indents_children() {
        let mut tree = NoticeTree::new();
        tree.warn(
            NoticeCode::InvalidNumeric,
            "k",
            "bad value",
            &[Source::new("price:1", "Price 1")],
        );
        let text = tree.to_string();
        assert_eq!(text, "Price 1\n  [warning] bad value\n");
    }
}

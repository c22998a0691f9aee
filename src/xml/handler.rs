//! Element handlers.
//!
//! Every open element has one [`Handler`] on the stack. A handler answers
//! three questions: which handler understands a child element, whether it
//! wants the character data seen directly inside it, and what value it
//! produces when its element closes. Entry handlers validate their entry on
//! close and register it in the [`ImportContext`].

use crate::context::{EntryTable, ImportContext};
use crate::gnc::{
    AccountEntry, CommodityEntry, CommodityRef, IdEntry, IntEntry, Invalid, NumericEntry,
    PriceEntry, SlotValue, Slots, SplitEntry, TimeEntry, TransactionEntry, ACCOUNT_VERSION,
    PRICEDB_VERSION,
};
use crate::notice::{NoticeCode, NoticeTree, Source};

/// Attribute of an element, name and unescaped value
pub type Attribute = (String, String);

fn attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// What a closing element hands to its parent
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Text(String),
    Id(IdEntry),
    Int(IntEntry),
    Numeric(NumericEntry),
    Time(TimeEntry),
    Commodity(CommodityRef),
    Slots(Slots),
    Slot(String, SlotValue),
    SlotValue(SlotValue),
    SplitId(String),
    SplitIds(Vec<String>),
}

// =============================================================================
// Stack frame and scope
// =============================================================================

/// One open element
#[derive(Debug)]
pub struct Frame {
    pub element: String,
    /// Character data seen directly inside this element
    pub text: String,
    /// Set when the handler refused its content; descendants are skipped
    pub ignore: bool,
    pub handler: Handler,
}

impl Frame {
    pub fn new(element: impl Into<String>, handler: Handler) -> Self {
        Self {
            element: element.into(),
            text: String::new(),
            ignore: false,
            handler,
        }
    }
}

/// What a handler may touch while starting or finishing
pub struct Scope<'s> {
    pub ctx: &'s mut ImportContext,
    pub notices: &'s mut NoticeTree,
    /// Open elements above the current one, outermost first
    ancestors: &'s [Frame],
}

impl<'s> Scope<'s> {
    pub fn new(
        ctx: &'s mut ImportContext,
        notices: &'s mut NoticeTree,
        ancestors: &'s [Frame],
    ) -> Self {
        Self {
            ctx,
            notices,
            ancestors,
        }
    }

    /// Source chain of the open entries, followed by `own`
    fn chain(&self, own: Option<Source>) -> Vec<Source> {
        self.ancestors
            .iter()
            .filter_map(|frame| frame.handler.source())
            .chain(own)
            .collect()
    }

    pub fn warn(
        &mut self,
        code: NoticeCode,
        key: impl Into<String>,
        message: impl Into<String>,
        own: Option<Source>,
    ) {
        let chain = self.chain(own);
        self.notices.warn(code, key, message, &chain);
    }

    pub fn warn_invalid(&mut self, invalid: Invalid, own: Option<Source>) {
        self.warn(invalid.code, invalid.key, invalid.message, own);
    }

    pub fn fatal(&mut self, code: NoticeCode, key: impl Into<String>, message: impl Into<String>) {
        let chain = self.chain(None);
        self.notices.error(code, key, message, &chain);
    }

    /// Ordinal of the innermost open transaction
    fn owner_transaction(&self) -> Option<usize> {
        self.ancestors.iter().rev().find_map(|frame| match &frame.handler {
            Handler::Transaction(h) => Some(h.entry.ordinal),
            _ => None,
        })
    }

    /// Register a validated entry; a duplicate id replaces the earlier entry
    fn register<T>(
        &mut self,
        kind: &str,
        id: String,
        entry: T,
        source: Source,
        table: impl FnOnce(&mut ImportContext) -> &mut EntryTable<T>,
    ) {
        if table(&mut *self.ctx).insert(id.clone(), entry).is_some() {
            self.warn(
                NoticeCode::DuplicateEntry,
                format!("{}:{}:{}", NoticeCode::DuplicateEntry.as_str(), kind, id),
                format!("Duplicate {} id {}, the later entry replaces the earlier one", kind, id),
                Some(source),
            );
        }
    }

    /// Version attribute check guarding a versioned section
    fn check_version(&mut self, attrs: &[Attribute], element: &str, expected: &str) -> bool {
        match attr(attrs, "version") {
            Some(version) if version == expected => true,
            found => {
                self.fatal(
                    NoticeCode::VersionUnsupported,
                    format!("{}:{}", NoticeCode::VersionUnsupported.as_str(), element),
                    format!(
                        "<{}> declares version '{}', only version '{}' is supported",
                        element,
                        found.unwrap_or(""),
                        expected
                    ),
                );
                false
            }
        }
    }
}

// =============================================================================
// Handler protocol
// =============================================================================

/// Operations every handler variant implements
pub trait ElementHandler {
    /// Handler for a child element, `None` if the element is unknown here
    fn child(&self, _name: &str) -> Option<Handler> {
        None
    }

    /// Inspect attributes when the element opens. Returning `false` makes
    /// the machine skip the element's content.
    fn start(&mut self, _attrs: &[Attribute], _scope: &mut Scope<'_>) -> bool {
        true
    }

    fn keeps_text(&self) -> bool {
        false
    }

    /// Take the value produced by a closed child element
    fn absorb(&mut self, _element: &str, _value: Value) {}

    /// Validate and produce this element's value
    fn finish(self, text: String, scope: &mut Scope<'_>) -> Value;

    /// Notice source this element stands for, if it is an entry
    fn source(&self) -> Option<Source> {
        None
    }
}

/// Tagged handler state, one variant per element kind
#[derive(Debug)]
pub enum Handler {
    Document(DocumentHandler),
    Book(BookHandler),
    CountData(CountDataHandler),
    Commodity(CommodityHandler),
    PriceDb(PriceDbHandler),
    Price(PriceHandler),
    Account(AccountHandler),
    Transaction(TransactionHandler),
    Splits(SplitsHandler),
    Split(SplitHandler),
    Leaf(LeafHandler),
    Time(TimeHandler),
    CommodityRef(CommodityRefHandler),
    Slots(SlotsHandler),
    Slot(SlotHandler),
    SlotValue(SlotValueHandler),
    Unsupported(UnsupportedHandler),
    PassThrough(PassThroughHandler),
}

macro_rules! each_variant {
    ($value:expr, $h:ident => $body:expr) => {
        match $value {
            Handler::Document($h) => $body,
            Handler::Book($h) => $body,
            Handler::CountData($h) => $body,
            Handler::Commodity($h) => $body,
            Handler::PriceDb($h) => $body,
            Handler::Price($h) => $body,
            Handler::Account($h) => $body,
            Handler::Transaction($h) => $body,
            Handler::Splits($h) => $body,
            Handler::Split($h) => $body,
            Handler::Leaf($h) => $body,
            Handler::Time($h) => $body,
            Handler::CommodityRef($h) => $body,
            Handler::Slots($h) => $body,
            Handler::Slot($h) => $body,
            Handler::SlotValue($h) => $body,
            Handler::Unsupported($h) => $body,
            Handler::PassThrough($h) => $body,
        }
    };
}

impl ElementHandler for Handler {
    fn child(&self, name: &str) -> Option<Handler> {
        each_variant!(self, h => h.child(name))
    }

    fn start(&mut self, attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        each_variant!(self, h => h.start(attrs, scope))
    }

    fn keeps_text(&self) -> bool {
        each_variant!(self, h => h.keeps_text())
    }

    fn absorb(&mut self, element: &str, value: Value) {
        each_variant!(self, h => h.absorb(element, value))
    }

    fn finish(self, text: String, scope: &mut Scope<'_>) -> Value {
        each_variant!(self, h => h.finish(text, scope))
    }

    fn source(&self) -> Option<Source> {
        each_variant!(self, h => h.source())
    }
}

impl Handler {
    pub fn document() -> Self {
        Self::Document(DocumentHandler::default())
    }

    fn text() -> Self {
        Self::Leaf(LeafHandler::new(LeafKind::Text))
    }

    fn id() -> Self {
        Self::Leaf(LeafHandler::new(LeafKind::Id))
    }

    fn int() -> Self {
        Self::Leaf(LeafHandler::new(LeafKind::Int))
    }

    fn numeric() -> Self {
        Self::Leaf(LeafHandler::new(LeafKind::Numeric))
    }

    fn time() -> Self {
        Self::Time(TimeHandler::default())
    }

    fn commodity_ref() -> Self {
        Self::CommodityRef(CommodityRefHandler::default())
    }

    fn slots() -> Self {
        Self::Slots(SlotsHandler::default())
    }

    fn unsupported(code: NoticeCode, element: &'static str) -> Self {
        Self::Unsupported(UnsupportedHandler { code, element })
    }
}

// =============================================================================
// Document envelope
// =============================================================================

/// Virtual element above the document root
#[derive(Debug, Default)]
pub struct DocumentHandler {
    /// Set once a `gnc-v2` root element has closed
    pub seen_root: bool,
}

impl ElementHandler for DocumentHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        (name == "gnc-v2").then(|| Handler::Book(BookHandler { envelope: true }))
    }

    fn absorb(&mut self, element: &str, _value: Value) {
        if element == "gnc-v2" {
            self.seen_root = true;
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::None
    }
}

/// `gnc-v2` (envelope) or `gnc:book`; both hold the data sections
#[derive(Debug)]
pub struct BookHandler {
    envelope: bool,
}

impl ElementHandler for BookHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "gnc:book" if self.envelope => Some(Handler::Book(BookHandler { envelope: false })),
            "gnc:count-data" => Some(Handler::CountData(CountDataHandler::default())),
            "gnc:commodity" => Some(Handler::Commodity(CommodityHandler::default())),
            "gnc:pricedb" => Some(Handler::PriceDb(PriceDbHandler)),
            "gnc:account" => Some(Handler::Account(AccountHandler::default())),
            "gnc:transaction" => Some(Handler::Transaction(TransactionHandler::default())),
            _ => None,
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::None
    }
}

/// `<gnc:count-data cd:type="account">12</gnc:count-data>`
#[derive(Debug, Default)]
pub struct CountDataHandler {
    kind: Option<String>,
}

impl ElementHandler for CountDataHandler {
    fn start(&mut self, attrs: &[Attribute], _scope: &mut Scope<'_>) -> bool {
        self.kind = attr(attrs, "cd:type").map(str::to_string);
        true
    }

    fn keeps_text(&self) -> bool {
        true
    }

    fn finish(self, text: String, scope: &mut Scope<'_>) -> Value {
        let count = IntEntry::parse(&text);
        match (self.kind, count.value) {
            (Some(kind), Some(value)) => {
                scope.ctx.count_data.insert(kind, value);
            }
            _ => log::debug!("Ignoring unusable count-data '{}'", text.trim()),
        }
        Value::None
    }
}

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Default)]
pub struct CommodityHandler {
    entry: CommodityEntry,
}

impl ElementHandler for CommodityHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "cmdty:space" | "cmdty:id" | "cmdty:name" | "cmdty:xcode" | "cmdty:quote_source"
            | "cmdty:get_quotes" => Some(Handler::text()),
            "cmdty:fraction" => Some(Handler::int()),
            "cmdty:slots" => Some(Handler::slots()),
            _ => None,
        }
    }

    fn absorb(&mut self, element: &str, value: Value) {
        let entry = &mut self.entry;
        match (element, value) {
            ("cmdty:space", Value::Text(t)) => entry.space = Some(t.trim().to_string()),
            ("cmdty:id", Value::Text(t)) => entry.id = Some(t.trim().to_string()),
            ("cmdty:name", Value::Text(t)) => entry.name = Some(t),
            ("cmdty:xcode", Value::Text(t)) => entry.xcode = Some(t.trim().to_string()),
            ("cmdty:quote_source", Value::Text(t)) => entry.quote_source = Some(t),
            ("cmdty:get_quotes", _) => entry.get_quotes = true,
            ("cmdty:fraction", Value::Int(i)) => entry.fraction = i,
            ("cmdty:slots", Value::Slots(s)) => entry.slots = s,
            _ => {}
        }
    }

    fn finish(self, _text: String, scope: &mut Scope<'_>) -> Value {
        let entry = self.entry;
        if entry.is_template() {
            return Value::None;
        }
        let source = entry.source();
        match entry.validate() {
            Ok(()) => scope.register("commodity", entry.key(), entry, source, |ctx| {
                &mut ctx.commodities
            }),
            Err(invalid) => scope.warn_invalid(invalid, Some(source)),
        }
        Value::None
    }

    fn source(&self) -> Option<Source> {
        Some(self.entry.source())
    }
}

/// `gnc:pricedb`, versioned
#[derive(Debug)]
pub struct PriceDbHandler;

impl ElementHandler for PriceDbHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        (name == "price").then(|| Handler::Price(PriceHandler::default()))
    }

    fn start(&mut self, attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        scope.check_version(attrs, "gnc:pricedb", PRICEDB_VERSION)
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::None
    }
}

#[derive(Debug, Default)]
pub struct PriceHandler {
    entry: PriceEntry,
}

impl ElementHandler for PriceHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "price:id" => Some(Handler::id()),
            "price:commodity" | "price:currency" => Some(Handler::commodity_ref()),
            "price:time" => Some(Handler::time()),
            "price:source" | "price:type" => Some(Handler::text()),
            "price:value" => Some(Handler::numeric()),
            _ => None,
        }
    }

    fn absorb(&mut self, element: &str, value: Value) {
        let entry = &mut self.entry;
        match (element, value) {
            ("price:id", Value::Id(id)) => entry.id = id,
            ("price:commodity", Value::Commodity(c)) => entry.commodity = c,
            ("price:currency", Value::Commodity(c)) => entry.currency = c,
            ("price:time", Value::Time(t)) => entry.time = t,
            ("price:source", Value::Text(t)) => entry.source = Some(t),
            ("price:type", Value::Text(t)) => entry.price_type = Some(t.trim().to_string()),
            ("price:value", Value::Numeric(n)) => entry.value = n,
            _ => {}
        }
    }

    fn finish(self, _text: String, scope: &mut Scope<'_>) -> Value {
        let entry = self.entry;
        let source = entry.source_ref();
        match entry.validate() {
            Ok(()) => {
                let id = entry.id().to_string();
                scope.register("price", id, entry, source, |ctx| &mut ctx.prices)
            }
            Err(invalid) => scope.warn_invalid(invalid, Some(source)),
        }
        Value::None
    }

    fn source(&self) -> Option<Source> {
        Some(self.entry.source_ref())
    }
}

/// `gnc:account`, versioned
#[derive(Debug, Default)]
pub struct AccountHandler {
    entry: AccountEntry,
}

impl ElementHandler for AccountHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "act:name" | "act:type" | "act:code" | "act:description" => Some(Handler::text()),
            "act:id" | "act:parent" => Some(Handler::id()),
            "act:commodity" => Some(Handler::commodity_ref()),
            "act:commodity-scu" => Some(Handler::int()),
            "act:slots" => Some(Handler::slots()),
            "act:non-standard-scu" => Some(Handler::unsupported(
                NoticeCode::NonStandardScuUnsupported,
                "act:non-standard-scu",
            )),
            "act:lots" => Some(Handler::unsupported(NoticeCode::LotsUnsupported, "act:lots")),
            _ => None,
        }
    }

    fn start(&mut self, attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        scope.check_version(attrs, "gnc:account", ACCOUNT_VERSION)
    }

    fn absorb(&mut self, element: &str, value: Value) {
        let entry = &mut self.entry;
        match (element, value) {
            ("act:name", Value::Text(t)) => entry.name = Some(t),
            ("act:id", Value::Id(id)) => entry.id = id,
            ("act:type", Value::Text(t)) => entry.account_type = Some(t.trim().to_string()),
            ("act:code", Value::Text(t)) => entry.code = Some(t.trim().to_string()),
            ("act:description", Value::Text(t)) => entry.description = Some(t),
            ("act:parent", Value::Id(id)) => entry.parent = id,
            ("act:commodity", Value::Commodity(c)) => entry.commodity = c,
            ("act:commodity-scu", Value::Int(i)) => entry.commodity_scu = i,
            ("act:slots", Value::Slots(s)) => entry.slots = s,
            _ => {}
        }
    }

    fn finish(self, _text: String, scope: &mut Scope<'_>) -> Value {
        let entry = self.entry;
        let source = entry.source();
        match entry.validate() {
            Ok(()) => {
                let id = entry.id().to_string();
                scope.register("account", id, entry, source, |ctx| &mut ctx.accounts)
            }
            Err(invalid) => scope.warn_invalid(invalid, Some(source)),
        }
        Value::None
    }

    fn source(&self) -> Option<Source> {
        Some(self.entry.source())
    }
}

#[derive(Debug, Default)]
pub struct TransactionHandler {
    entry: TransactionEntry,
}

impl ElementHandler for TransactionHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "trn:id" => Some(Handler::id()),
            "trn:currency" => Some(Handler::commodity_ref()),
            "trn:num" | "trn:description" => Some(Handler::text()),
            "trn:date-posted" | "trn:date-entered" => Some(Handler::time()),
            "trn:slots" => Some(Handler::slots()),
            "trn:splits" => Some(Handler::Splits(SplitsHandler::default())),
            _ => None,
        }
    }

    fn start(&mut self, _attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        self.entry = TransactionEntry::new(scope.ctx.next_transaction_ordinal());
        true
    }

    fn absorb(&mut self, element: &str, value: Value) {
        let entry = &mut self.entry;
        match (element, value) {
            ("trn:id", Value::Id(id)) => entry.id = id,
            ("trn:currency", Value::Commodity(c)) => entry.currency = c,
            ("trn:num", Value::Text(t)) => entry.num = Some(t),
            ("trn:description", Value::Text(t)) => entry.description = Some(t),
            ("trn:date-posted", Value::Time(t)) => entry.date_posted = t,
            ("trn:date-entered", Value::Time(t)) => entry.date_entered = t,
            ("trn:slots", Value::Slots(s)) => entry.slots = s,
            ("trn:splits", Value::SplitIds(ids)) => entry.split_ids.extend(ids),
            _ => {}
        }
    }

    fn finish(self, _text: String, scope: &mut Scope<'_>) -> Value {
        let entry = self.entry;
        let source = entry.source();
        match entry.validate() {
            Ok(()) => {
                let id = entry.id().to_string();
                scope.register("transaction", id, entry, source, |ctx| {
                    &mut ctx.transactions
                })
            }
            Err(invalid) => scope.warn_invalid(invalid, Some(source)),
        }
        Value::None
    }

    fn source(&self) -> Option<Source> {
        Some(self.entry.source())
    }
}

/// `trn:splits`: collects the ids of the splits that registered
#[derive(Debug, Default)]
pub struct SplitsHandler {
    ids: Vec<String>,
}

impl ElementHandler for SplitsHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        (name == "trn:split").then(|| Handler::Split(SplitHandler::default()))
    }

    fn absorb(&mut self, _element: &str, value: Value) {
        if let Value::SplitId(id) = value {
            self.ids.push(id);
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::SplitIds(self.ids)
    }
}

#[derive(Debug, Default)]
pub struct SplitHandler {
    entry: SplitEntry,
}

impl ElementHandler for SplitHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "split:id" | "split:account" => Some(Handler::id()),
            "split:memo" | "split:action" | "split:reconciled-state" => Some(Handler::text()),
            "split:reconcile-date" => Some(Handler::time()),
            "split:value" | "split:quantity" => Some(Handler::numeric()),
            "split:slots" => Some(Handler::slots()),
            _ => None,
        }
    }

    fn start(&mut self, _attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        if let Some(owner) = scope.owner_transaction() {
            self.entry = SplitEntry::new(owner);
        }
        true
    }

    fn absorb(&mut self, element: &str, value: Value) {
        let entry = &mut self.entry;
        match (element, value) {
            ("split:id", Value::Id(id)) => entry.id = id,
            ("split:account", Value::Id(id)) => entry.account = id,
            ("split:memo", Value::Text(t)) => entry.memo = Some(t),
            ("split:action", Value::Text(t)) => entry.action = Some(t),
            ("split:reconciled-state", Value::Text(t)) => {
                entry.reconciled_state = Some(t.trim().to_string())
            }
            ("split:reconcile-date", Value::Time(t)) => entry.reconcile_date = t,
            ("split:value", Value::Numeric(n)) => entry.value = n,
            ("split:quantity", Value::Numeric(n)) => entry.quantity = n,
            ("split:slots", Value::Slots(s)) => entry.slots = s,
            _ => {}
        }
    }

    fn finish(self, _text: String, scope: &mut Scope<'_>) -> Value {
        let entry = self.entry;
        let source = entry.source();
        match entry.validate() {
            Ok(()) => {
                let id = entry.id().to_string();
                scope.register("split", id.clone(), entry, source, |ctx| &mut ctx.splits);
                Value::SplitId(id)
            }
            Err(invalid) => {
                scope.warn_invalid(invalid, Some(source));
                Value::None
            }
        }
    }

    fn source(&self) -> Option<Source> {
        Some(self.entry.source())
    }
}

// =============================================================================
// Shared sub-structures
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    Text,
    Id,
    Int,
    Numeric,
}

/// Element whose value is its own character data
#[derive(Debug)]
pub struct LeafHandler {
    kind: LeafKind,
    /// `type` attribute of identifier elements
    id_type: Option<String>,
}

impl LeafHandler {
    fn new(kind: LeafKind) -> Self {
        Self {
            kind,
            id_type: None,
        }
    }
}

impl ElementHandler for LeafHandler {
    fn start(&mut self, attrs: &[Attribute], _scope: &mut Scope<'_>) -> bool {
        if self.kind == LeafKind::Id {
            self.id_type = attr(attrs, "type").map(str::to_string);
        }
        true
    }

    fn keeps_text(&self) -> bool {
        true
    }

    fn finish(self, text: String, _scope: &mut Scope<'_>) -> Value {
        match self.kind {
            LeafKind::Text => Value::Text(text),
            LeafKind::Id => Value::Id(IdEntry::parse(&text, self.id_type)),
            LeafKind::Int => Value::Int(IntEntry::parse(&text)),
            LeafKind::Numeric => Value::Numeric(NumericEntry::parse(&text)),
        }
    }
}

/// Timestamp wrapper holding `ts:date` or `gdate`
#[derive(Debug, Default)]
pub struct TimeHandler {
    raw: Option<String>,
}

impl ElementHandler for TimeHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        matches!(name, "ts:date" | "gdate").then(Handler::text)
    }

    fn absorb(&mut self, element: &str, value: Value) {
        if let ("ts:date" | "gdate", Value::Text(t)) = (element, value) {
            self.raw = Some(t);
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::Time(self.raw.map(|raw| TimeEntry::parse(&raw)).unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct CommodityRefHandler {
    value: CommodityRef,
}

impl ElementHandler for CommodityRefHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        matches!(name, "cmdty:space" | "cmdty:id").then(Handler::text)
    }

    fn absorb(&mut self, element: &str, value: Value) {
        match (element, value) {
            ("cmdty:space", Value::Text(t)) => self.value.space = Some(t.trim().to_string()),
            ("cmdty:id", Value::Text(t)) => self.value.id = Some(t.trim().to_string()),
            _ => {}
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::Commodity(self.value)
    }
}

#[derive(Debug, Default)]
pub struct SlotsHandler {
    slots: Slots,
}

impl ElementHandler for SlotsHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        (name == "slot").then(|| Handler::Slot(SlotHandler::default()))
    }

    fn absorb(&mut self, _element: &str, value: Value) {
        if let Value::Slot(key, value) = value {
            self.slots.insert(key, value);
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::Slots(self.slots)
    }
}

#[derive(Debug, Default)]
pub struct SlotHandler {
    key: Option<String>,
    value: Option<SlotValue>,
}

impl ElementHandler for SlotHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "slot:key" => Some(Handler::text()),
            "slot:value" => Some(Handler::SlotValue(SlotValueHandler::default())),
            _ => None,
        }
    }

    fn absorb(&mut self, element: &str, value: Value) {
        match (element, value) {
            ("slot:key", Value::Text(t)) => self.key = Some(t.trim().to_string()),
            ("slot:value", Value::SlotValue(v)) => self.value = Some(v),
            _ => {}
        }
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        match (self.key, self.value) {
            (Some(key), Some(value)) => Value::Slot(key, value),
            _ => Value::None,
        }
    }
}

/// `slot:value`; frames nest further slots, everything else is text
#[derive(Debug, Default)]
pub struct SlotValueHandler {
    kind: String,
    frame: Slots,
    inner: Option<String>,
}

impl SlotValueHandler {
    fn is_frame(&self) -> bool {
        self.kind == "frame"
    }
}

impl ElementHandler for SlotValueHandler {
    fn child(&self, name: &str) -> Option<Handler> {
        match name {
            "slot" if self.is_frame() => Some(Handler::Slot(SlotHandler::default())),
            "ts:date" | "gdate" => Some(Handler::text()),
            _ => None,
        }
    }

    fn start(&mut self, attrs: &[Attribute], _scope: &mut Scope<'_>) -> bool {
        self.kind = attr(attrs, "type").unwrap_or("string").to_string();
        true
    }

    fn keeps_text(&self) -> bool {
        !self.is_frame()
    }

    fn absorb(&mut self, element: &str, value: Value) {
        match (element, value) {
            ("slot", Value::Slot(key, value)) => {
                self.frame.insert(key, value);
            }
            ("ts:date" | "gdate", Value::Text(t)) => self.inner = Some(t.trim().to_string()),
            _ => {}
        }
    }

    fn finish(self, text: String, _scope: &mut Scope<'_>) -> Value {
        if self.is_frame() {
            return Value::SlotValue(SlotValue::Frame { slots: self.frame });
        }
        Value::SlotValue(SlotValue::Scalar {
            value: self.inner.unwrap_or(text),
            kind: self.kind,
        })
    }
}

/// Known element the importer cannot express; warned once and skipped
#[derive(Debug)]
pub struct UnsupportedHandler {
    code: NoticeCode,
    element: &'static str,
}

impl ElementHandler for UnsupportedHandler {
    fn start(&mut self, _attrs: &[Attribute], scope: &mut Scope<'_>) -> bool {
        scope.warn(
            self.code,
            format!("{}:{}", self.code.as_str(), self.element),
            format!("<{}> is not supported and was dropped", self.element),
            None,
        );
        false
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::None
    }
}

/// Unknown element: it and all of its descendants are skipped unvalidated
#[derive(Debug, Default)]
pub struct PassThroughHandler;

impl ElementHandler for PassThroughHandler {
    fn start(&mut self, _attrs: &[Attribute], _scope: &mut Scope<'_>) -> bool {
        false
    }

    fn finish(self, _text: String, _scope: &mut Scope<'_>) -> Value {
        Value::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_children_have_no_handler() {
        let account = Handler::Account(AccountHandler::default());
        assert!(account.child("act:name").is_some());
        assert!(account.child("act:reconcile-info").is_none());

        let book = Handler::Book(BookHandler { envelope: false });
        assert!(book.child("gnc:book").is_none());
        assert!(book.child("gnc:schedxaction").is_none());
    }

    #[test]
    fn test_only_leaves_and_scalar_slots_keep_text() {
        assert!(Handler::text().keeps_text());
        assert!(!Handler::Account(AccountHandler::default()).keeps_text());

        let mut ctx = ImportContext::new();
        let mut notices = NoticeTree::new();
        let mut scope = Scope::new(&mut ctx, &mut notices, &[]);

        let mut frame = SlotValueHandler::default();
        frame.start(&[("type".into(), "frame".into())], &mut scope);
        assert!(!frame.keeps_text());
        assert!(frame.child("slot").is_some());

        let mut scalar = SlotValueHandler::default();
        scalar.start(&[("type".into(), "integer".into())], &mut scope);
        assert!(scalar.keeps_text());
        assert!(scalar.child("slot").is_none());
    }

    #[test]
    fn test_version_check_records_fatal_error() {
        let mut ctx = ImportContext::new();
        let mut notices = NoticeTree::new();
        let mut scope = Scope::new(&mut ctx, &mut notices, &[]);

        let mut pricedb = PriceDbHandler;
        assert!(pricedb.start(&[("version".into(), "1".into())], &mut scope));
        assert!(!pricedb.start(&[("version".into(), "2".into())], &mut scope));
        assert!(notices.has_fatal_error());
        assert_eq!(notices.with_code(NoticeCode::VersionUnsupported).len(), 1);
    }

    #[test]
    fn test_leaf_values() {
        let mut ctx = ImportContext::new();
        let mut notices = NoticeTree::new();
        let mut scope = Scope::new(&mut ctx, &mut notices, &[]);

        let mut id = LeafHandler::new(LeafKind::Id);
        id.start(&[("type".into(), "guid".into())], &mut scope);
        let value = id.finish("0123456789abcdef0123456789abcdef".into(), &mut scope);
        match value {
            Value::Id(entry) => {
                assert!(entry.is_guid());
                assert_eq!(entry.id_type.as_deref(), Some("guid"));
            }
            other => panic!("unexpected value {:?}", other),
        }

        let numeric = LeafHandler::new(LeafKind::Numeric).finish("7/2".into(), &mut scope);
        assert_eq!(numeric, Value::Numeric(NumericEntry::from_parts(7, 2)));
    }
}

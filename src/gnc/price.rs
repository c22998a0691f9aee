//! Price entries (`price` inside `gnc:pricedb`).

use super::common::{CommodityRef, IdEntry, NumericEntry, TimeEntry, Validation};
use crate::notice::Source;

/// Schema version the `gnc:pricedb` element must declare
pub const PRICEDB_VERSION: &str = "1";

/// One quote of a commodity in a currency
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceEntry {
    pub id: IdEntry,
    pub commodity: CommodityRef,
    pub currency: CommodityRef,
    pub time: TimeEntry,
    /// Where the quote came from (`user:price-editor`, `Finance::Quote`, ...)
    pub source: Option<String>,
    /// `bid`, `ask`, `last`, `nav`, `transaction` or `unknown`
    pub price_type: Option<String>,
    pub value: NumericEntry,
}

impl PriceEntry {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }

    pub fn source_ref(&self) -> Source {
        Source::new(format!("price:{}", self.id()), format!("Price {}", self.id()))
    }

    /// Checked in element order: id, commodity, currency, time, value
    pub fn validate(&self) -> Validation {
        self.id.require_guid("price:id", "Price")?;
        self.commodity.require("price:commodity", "Price")?;
        self.currency.require("price:currency", "Price")?;
        self.time.require("price:time", "Price")?;
        self.value.require("price:value", "Price")?;
        Ok(())
    }
}

//! Commodity entries (`gnc:commodity`): currencies and traded securities.

use serde::{Deserialize, Serialize};

use super::common::{CommodityRef, IntEntry, Invalid, Slots, Validation, TEMPLATE_SPACE};
use crate::notice::Source;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommodityEntry {
    pub space: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    /// ISIN, CUSIP or other exchange code
    pub xcode: Option<String>,
    pub fraction: IntEntry,
    pub quote_source: Option<String>,
    pub get_quotes: bool,
    pub slots: Slots,
}

impl CommodityEntry {
    /// Table key, unique per namespace
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.space.as_deref().unwrap_or(""),
            self.id.as_deref().unwrap_or("")
        )
    }

    pub fn reference(&self) -> CommodityRef {
        CommodityRef {
            space: self.space.clone(),
            id: self.id.clone(),
        }
    }

    pub fn is_currency(&self) -> bool {
        self.reference().is_currency()
    }

    /// Scheduled transaction templates reference a pseudo commodity
    pub fn is_template(&self) -> bool {
        self.space.as_deref() == Some(TEMPLATE_SPACE)
    }

    pub fn source(&self) -> Source {
        Source::new(
            format!("commodity:{}", self.key()),
            format!("Commodity {}", self.key()),
        )
    }

    pub fn validate(&self) -> Validation {
        if self.space.is_none() {
            return Err(Invalid::missing("cmdty:space", "Commodity"));
        }
        if self.id.is_none() {
            return Err(Invalid::missing("cmdty:id", "Commodity"));
        }
        self.fraction.check("cmdty:fraction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commodity_kinds() {
        let usd = CommodityEntry {
            space: Some("ISO4217".into()),
            id: Some("USD".into()),
            ..Default::default()
        };
        assert!(usd.is_currency());
        assert_eq!(usd.key(), "ISO4217:USD");
        assert!(usd.validate().is_ok());

        let template = CommodityEntry {
            space: Some("template".into()),
            id: Some("template".into()),
            ..Default::default()
        };
        assert!(template.is_template());
        assert!(!template.is_currency());
    }

    #[test]
    fn test_commodity_requires_space_and_id() {
        let entry = CommodityEntry {
            id: Some("AAPL".into()),
            ..Default::default()
        };
        assert_eq!(entry.validate().unwrap_err().key, "MISSING_ELEMENT:cmdty:space");
    }
}

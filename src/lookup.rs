//! Scan-to-product lookup.
//!
//! Screens that react to a scan (search-by-scan, product creation) need to
//! handle three outcomes. [`ScanLookup`] makes them explicit so none can be
//! forgotten.

use std::fmt::Display;
use tracing::{debug, warn};

use crate::dedup::DetectionResult;
use crate::symbology::Symbology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanLookup<P> {
    NotFound,
    Found(P),
    Error(String),
}

impl<P> ScanLookup<P> {
    pub fn is_found(&self) -> bool {
        matches!(self, ScanLookup::Found(_))
    }

    pub fn found(self) -> Option<P> {
        match self {
            ScanLookup::Found(p) => Some(p),
            _ => None,
        }
    }
}

/// Product store queried by barcode.
pub trait ProductCatalog {
    type Product;
    type Error: Display;

    fn find_by_barcode(&self, barcode: &str) -> Result<Option<Self::Product>, Self::Error>;
}

/// Look up the product for an accepted scan.
///
/// UPC-A scans that miss are retried in their 13-digit form (leading zero),
/// since catalogs often store UPC-A items as EAN-13.
pub fn resolve_scan<C: ProductCatalog>(
    catalog: &C,
    scan: &DetectionResult,
) -> ScanLookup<C::Product> {
    let mut keys = vec![scan.value.clone()];
    if scan.symbology == Symbology::UpcA {
        keys.push(format!("0{}", scan.value));
    }

    for key in &keys {
        match catalog.find_by_barcode(key) {
            Ok(Some(product)) => {
                debug!(barcode = %key, "Scan matched a product");
                return ScanLookup::Found(product);
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(barcode = %key, error = %e, "Product lookup failed");
                return ScanLookup::Error(e.to_string());
            }
        }
    }
    ScanLookup::NotFound
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ChannelKind;
    use std::collections::HashMap;
    use std::time::Instant;

    struct MapCatalog {
        items: HashMap<String, &'static str>,
        fail: bool,
    }

    impl ProductCatalog for MapCatalog {
        type Product = &'static str;
        type Error = String;

        fn find_by_barcode(&self, barcode: &str) -> Result<Option<&'static str>, String> {
            if self.fail {
                return Err("backend unavailable".into());
            }
            Ok(self.items.get(barcode).copied())
        }
    }

    fn scan(value: &str, symbology: Symbology) -> DetectionResult {
        DetectionResult {
            value: value.into(),
            symbology,
            channel: ChannelKind::KeyEvent,
            accepted_at: Instant::now(),
            accepted_at_utc: chrono::Utc::now(),
        }
    }

    fn catalog(fail: bool) -> MapCatalog {
        let mut items = HashMap::new();
        items.insert("4006381333931".to_string(), "USB-C cable");
        items.insert("0036000291452".to_string(), "Screen protector");
        MapCatalog { items, fail }
    }

    #[test]
    fn test_found_and_not_found() {
        let c = catalog(false);
        assert_eq!(
            resolve_scan(&c, &scan("4006381333931", Symbology::Ean13)),
            ScanLookup::Found("USB-C cable")
        );
        assert_eq!(
            resolve_scan(&c, &scan("96385074", Symbology::Ean8)),
            ScanLookup::NotFound
        );
    }

    #[test]
    fn test_upca_falls_back_to_ean13_form() {
        let c = catalog(false);
        let result = resolve_scan(&c, &scan("036000291452", Symbology::UpcA));
        assert!(result.is_found());
        assert_eq!(result.found(), Some("Screen protector"));
    }

    #[test]
    fn test_backend_error_is_tagged() {
        let c = catalog(true);
        assert_eq!(
            resolve_scan(&c, &scan("4006381333931", Symbology::Ean13)),
            ScanLookup::Error("backend unavailable".into())
        );
    }
}

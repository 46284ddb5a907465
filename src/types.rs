//! Core domain types shared across every component.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable product-sale record.
///
/// Identity is the `offer_id` alone, in `"<store>-<seq>"` form: two
/// offers are the same offer iff their ids are equal, and all quorum and
/// dedup logic compares by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub store: String,
    pub category: String,
    pub product: String,
    pub price: i32,
    pub stock: i32,
    pub timestamp: String,
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}] {} ${} x{}",
            self.offer_id, self.store, self.category, self.product, self.price, self.stock
        )
    }
}

/// Which kind of entity is asking to resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Replica,
    Consumer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Replica => write!(f, "replica"),
            EntityKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// Sentinel used on the wire and in the subscription CSV for an axis
/// that does not constrain matching.
pub const ANY_SENTINEL: &str = "null";

/// A consumer's three-axis subscription filter.
///
/// `None` on an axis means ANY/UNBOUNDED: the axis does not constrain
/// matching. The external encoding uses the `"null"` sentinel in the
/// first position of a list, and a non-positive `price_max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub categories: Option<HashSet<String>>,
    pub stores: Option<HashSet<String>>,
    pub price_max: Option<i32>,
}

impl SubscriptionFilter {
    /// A filter that matches every offer.
    pub fn any() -> Self {
        Self {
            categories: None,
            stores: None,
            price_max: None,
        }
    }

    /// Decode the wire/CSV representation.
    pub fn from_wire(categories: &[String], stores: &[String], price_max: i32) -> Self {
        Self {
            categories: decode_axis(categories),
            stores: decode_axis(stores),
            price_max: if price_max > 0 { Some(price_max) } else { None },
        }
    }
}

fn decode_axis(values: &[String]) -> Option<HashSet<String>> {
    match values.first() {
        None => None,
        Some(first) if first == ANY_SENTINEL => None,
        _ => Some(values.iter().cloned().collect()),
    }
}

impl fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = |set: &Option<HashSet<String>>| match set {
            None => "any".to_string(),
            Some(s) => {
                let mut v: Vec<_> = s.iter().map(String::as_str).collect();
                v.sort_unstable();
                v.join(";")
            }
        };
        write!(
            f,
            "categories[{}] stores[{}] price_max[{}]",
            axis(&self.categories),
            axis(&self.stores),
            self.price_max
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: &str) -> Offer {
        Offer {
            offer_id: id.to_string(),
            store: "Riploy".to_string(),
            category: "Hogar".to_string(),
            product: "Lámpara".to_string(),
            price: 90,
            stock: 4,
            timestamp: "2025-11-28 10:00:00".to_string(),
        }
    }

    #[test]
    fn test_offer_display() {
        let o = offer("Riploy-1");
        let s = format!("{}", o);
        assert!(s.contains("Riploy-1"));
        assert!(s.contains("$90"));
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(format!("{}", EntityKind::Replica), "replica");
        assert_eq!(format!("{}", EntityKind::Consumer), "consumer");
    }

    #[test]
    fn test_filter_from_wire_null_sentinel() {
        let f = SubscriptionFilter::from_wire(
            &["null".to_string()],
            &["Riploy".to_string(), "Parisio".to_string()],
            50,
        );
        assert!(f.categories.is_none());
        let stores = f.stores.unwrap();
        assert_eq!(stores.len(), 2);
        assert!(stores.contains("Parisio"));
        assert_eq!(f.price_max, Some(50));
    }

    #[test]
    fn test_filter_from_wire_unbounded_price() {
        let f = SubscriptionFilter::from_wire(&["Moda".to_string()], &["null".to_string()], -1);
        assert_eq!(f.price_max, None);
        assert!(f.stores.is_none());
        assert!(f.categories.unwrap().contains("Moda"));

        let zero = SubscriptionFilter::from_wire(&[], &[], 0);
        assert_eq!(zero.price_max, None);
    }

    #[test]
    fn test_filter_from_wire_empty_axis_is_any() {
        let f = SubscriptionFilter::from_wire(&[], &[], 10);
        assert!(f.categories.is_none());
        assert!(f.stores.is_none());
    }

    #[test]
    fn test_filter_display_is_sorted() {
        let f = SubscriptionFilter::from_wire(
            &["Moda".to_string(), "Belleza".to_string()],
            &["null".to_string()],
            -1,
        );
        let s = format!("{}", f);
        assert!(s.contains("Belleza;Moda"));
        assert!(s.contains("stores[any]"));
        assert!(s.contains("price_max[unbounded]"));
    }

    #[test]
    fn test_offer_roundtrip_bincode() {
        let o = offer("Parisio-7");
        let bytes = bincode::serialize(&o).unwrap();
        let back: Offer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(o, back);
    }
}

//! Subscription matching.
//!
//! An offer matches a consumer iff all three filter axes match. An axis
//! set to ANY/UNBOUNDED always matches. Matching is entirely the
//! broker's responsibility: consumers accept whatever they are given,
//! both at fan-out time and in resync diffs.

use crate::types::{Offer, SubscriptionFilter};

impl SubscriptionFilter {
    /// Three-axis match: category, store, and price ceiling.
    pub fn matches(&self, offer: &Offer) -> bool {
        if let Some(categories) = &self.categories {
            if !categories.contains(&offer.category) {
                return false;
            }
        }
        if let Some(stores) = &self.stores {
            if !stores.contains(&offer.store) {
                return false;
            }
        }
        if let Some(price_max) = self.price_max {
            if offer.price > price_max {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(category: &str, store: &str, price: i32) -> Offer {
        Offer {
            offer_id: format!("{}-1", store),
            store: store.to_string(),
            category: category.to_string(),
            product: "Producto".to_string(),
            price,
            stock: 1,
            timestamp: "2025-11-28 10:00:00".to_string(),
        }
    }

    fn filter(categories: &[&str], stores: &[&str], price_max: i32) -> SubscriptionFilter {
        SubscriptionFilter::from_wire(
            &categories.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &stores.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            price_max,
        )
    }

    #[test]
    fn test_all_axes_any_matches_everything() {
        let f = SubscriptionFilter::any();
        assert!(f.matches(&offer("Moda", "Riploy", 10)));
        assert!(f.matches(&offer("Hogar", "Parisio", 1_000_000)));
    }

    #[test]
    fn test_category_axis() {
        let f = filter(&["Moda"], &["null"], -1);
        assert!(f.matches(&offer("Moda", "Riploy", 40)));
        assert!(!f.matches(&offer("Hogar", "Riploy", 40)));
    }

    #[test]
    fn test_store_axis() {
        let f = filter(&["null"], &["Parisio", "Riploy"], -1);
        assert!(f.matches(&offer("Moda", "Riploy", 40)));
        assert!(f.matches(&offer("Moda", "Parisio", 40)));
        assert!(!f.matches(&offer("Moda", "Falabellox", 40)));
    }

    #[test]
    fn test_price_axis_is_inclusive() {
        let f = filter(&["null"], &["null"], 50);
        assert!(f.matches(&offer("Moda", "Riploy", 50)));
        assert!(!f.matches(&offer("Moda", "Riploy", 51)));
    }

    #[test]
    fn test_all_axes_together() {
        // The S4 shape: categories=[Moda], stores=ANY, price_max=50.
        let f = filter(&["Moda"], &["null"], 50);
        assert!(f.matches(&offer("Moda", "Riploy", 40)));
        assert!(!f.matches(&offer("Moda", "Riploy", 60)));
        assert!(!f.matches(&offer("Hogar", "Riploy", 40)));
    }
}

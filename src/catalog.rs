//! CSV file formats.
//!
//! Three small formats flow through the system:
//!
//! - **Producer catalog** `catalogs/<store>_catalog.csv`: header plus
//!   rows of `product_id,store,category,product,base_price,base_stock`.
//!   Rows with a category outside the valid enumeration are dropped at
//!   load time with a warning.
//! - **Consumer subscription table** `consumers/consumers.csv`: header
//!   plus twelve rows of `consumer_id,categories,stores,price_max`.
//!   Multi-valued fields are `;`-separated; the `"null"` sentinel marks
//!   an unconstrained axis.
//! - **Consumer output record** `consumer_<id>.csv`: written by
//!   [`crate::consumer`], one row per accepted delivery.
//!
//! The values in these files never contain commas or quotes, so rows
//! are split on plain commas; output fields are still quoted defensively
//! when they would break that assumption.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::constants::{CONSUMER_COUNT, VALID_CATEGORIES, is_valid_name};
use crate::error::{Error, Result};
use crate::types::{ANY_SENTINEL, Offer, SubscriptionFilter};

/// One row of a store's product catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub product_id: String,
    pub store: String,
    pub category: String,
    pub product: String,
    pub base_price: i32,
    pub base_stock: i32,
}

/// Load a store catalog, skipping rows with invalid categories.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogRow>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot open catalog {}: {}", path.display(), e)))?;

    let mut rows = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line_no == 0 || line.trim().is_empty() {
            continue;
        }
        let fields = split_row(line);
        if fields.len() < 6 {
            return Err(Error::Config(format!(
                "catalog {} line {}: expected 6 fields, got {}",
                path.display(),
                line_no + 1,
                fields.len()
            )));
        }

        let category = fields[2].clone();
        if !is_valid_name(&category, VALID_CATEGORIES) {
            warn!(line = line_no + 1, category = %category, "skipping catalog row with invalid category");
            continue;
        }

        let base_price = parse_int(&fields[4], path, line_no + 1, "base_price")?;
        let base_stock = parse_int(&fields[5], path, line_no + 1, "base_stock")?;

        rows.push(CatalogRow {
            product_id: fields[0].clone(),
            store: fields[1].clone(),
            category,
            product: fields[3].clone(),
            base_price,
            base_stock,
        });
    }

    Ok(rows)
}

/// One row of the consumer subscription table, in wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub consumer_id: String,
    pub categories: Vec<String>,
    pub stores: Vec<String>,
    pub price_max: i32,
}

impl ConsumerSpec {
    /// Decode into the matcher's filter representation.
    pub fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter::from_wire(&self.categories, &self.stores, self.price_max)
    }
}

/// Load the subscription row for one consumer slot (1-based).
pub fn load_consumer_spec(path: &Path, client_number: usize) -> Result<ConsumerSpec> {
    let contents = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "cannot open subscriptions {}: {}",
            path.display(),
            e
        ))
    })?;

    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < CONSUMER_COUNT + 1 {
        return Err(Error::Config(format!(
            "subscriptions {} must have a header and {} rows, found {} lines",
            path.display(),
            CONSUMER_COUNT,
            lines.len()
        )));
    }

    // Row k belongs to client k; line 0 is the header.
    let fields = split_row(lines[client_number]);
    if fields.len() < 4 {
        return Err(Error::Config(format!(
            "subscriptions {} row {}: expected 4 fields, got {}",
            path.display(),
            client_number,
            fields.len()
        )));
    }

    let multi = |raw: &str| -> Vec<String> {
        if raw == ANY_SENTINEL {
            vec![ANY_SENTINEL.to_string()]
        } else {
            raw.split(';').map(str::to_string).collect()
        }
    };

    let price_max = if fields[3] == ANY_SENTINEL {
        -1
    } else {
        parse_int(&fields[3], path, client_number + 1, "price_max")?
    };

    Ok(ConsumerSpec {
        consumer_id: fields[0].clone(),
        categories: multi(&fields[1]),
        stores: multi(&fields[2]),
        price_max,
    })
}

/// Header of the consumer output record.
pub const OUTPUT_HEADER: &str = "offer_id,store,category,product,price,stock,timestamp";

/// Render one offer as an output record row.
pub fn output_row(offer: &Offer) -> String {
    [
        quote(&offer.offer_id),
        quote(&offer.store),
        quote(&offer.category),
        quote(&offer.product),
        offer.price.to_string(),
        offer.stock.to_string(),
        quote(&offer.timestamp),
    ]
    .join(",")
}

fn quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',').map(|f| f.trim().to_string()).collect()
}

fn parse_int(raw: &str, path: &Path, line: usize, field: &str) -> Result<i32> {
    raw.parse().map_err(|_| {
        Error::Config(format!(
            "{} line {}: invalid {}: {:?}",
            path.display(),
            line,
            field,
            raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dealcast-{}-{}", std::process::id(), name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_catalog_skips_invalid_categories() {
        let path = write_temp(
            "catalog.csv",
            "product_id,store,category,product,base_price,base_stock\n\
             P1,Riploy,Electrónica,Notebook,1000,10\n\
             P2,Riploy,Videojuegos,Consola,500,5\n\
             P3,Riploy,Hogar,Sillón,300,8\n",
        );
        let rows = load_catalog(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, "P1");
        assert_eq!(rows[0].base_price, 1000);
        assert_eq!(rows[1].category, "Hogar");
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_catalog_missing_file_is_config_error() {
        let err = load_catalog(Path::new("/nonexistent/catalog.csv")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_catalog_rejects_short_rows() {
        let path = write_temp("short.csv", "header\nP1,Riploy,Hogar\n");
        assert!(load_catalog(&path).is_err());
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_catalog_rejects_bad_price() {
        let path = write_temp(
            "badprice.csv",
            "header\nP1,Riploy,Hogar,Mesa,cheap,10\n",
        );
        assert!(load_catalog(&path).is_err());
        fs::remove_file(path).ok();
    }

    fn subscriptions_fixture() -> String {
        let mut out = String::from("consumer_id,categories,stores,price_max\n");
        for k in 1..=CONSUMER_COUNT {
            out.push_str(&format!("C{},Moda;Belleza,null,{}\n", k, k * 100));
        }
        out
    }

    #[test]
    fn test_load_consumer_spec() {
        let path = write_temp("consumers.csv", &subscriptions_fixture());
        let spec = load_consumer_spec(&path, 3).unwrap();
        assert_eq!(spec.consumer_id, "C3");
        assert_eq!(spec.categories, vec!["Moda", "Belleza"]);
        assert_eq!(spec.stores, vec!["null"]);
        assert_eq!(spec.price_max, 300);

        let filter = spec.filter();
        assert!(filter.stores.is_none());
        assert_eq!(filter.price_max, Some(300));
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_consumer_spec_null_price() {
        let mut fixture = String::from("consumer_id,categories,stores,price_max\n");
        for k in 1..=CONSUMER_COUNT {
            fixture.push_str(&format!("C{},null,Riploy,null\n", k));
        }
        let path = write_temp("consumers-null.csv", &fixture);
        let spec = load_consumer_spec(&path, 1).unwrap();
        assert_eq!(spec.price_max, -1);
        assert!(spec.filter().price_max.is_none());
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_consumer_spec_requires_twelve_rows() {
        let path = write_temp(
            "consumers-few.csv",
            "consumer_id,categories,stores,price_max\nC1,null,null,null\n",
        );
        assert!(load_consumer_spec(&path, 1).is_err());
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_output_row_plain() {
        let offer = Offer {
            offer_id: "Riploy-4".to_string(),
            store: "Riploy".to_string(),
            category: "Juguetes".to_string(),
            product: "Bloques".to_string(),
            price: 20,
            stock: 50,
            timestamp: "2025-11-28 09:15:00".to_string(),
        };
        assert_eq!(
            output_row(&offer),
            "Riploy-4,Riploy,Juguetes,Bloques,20,50,2025-11-28 09:15:00"
        );
    }

    #[test]
    fn test_output_row_quotes_when_needed() {
        let offer = Offer {
            offer_id: "Riploy-5".to_string(),
            store: "Riploy".to_string(),
            category: "Hogar".to_string(),
            product: "Juego sábanas, 2 plazas".to_string(),
            price: 35,
            stock: 12,
            timestamp: "2025-11-28 09:16:00".to_string(),
        };
        let row = output_row(&offer);
        assert!(row.contains("\"Juego sábanas, 2 plazas\""));
    }
}

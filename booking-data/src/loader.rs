use std::collections::BTreeMap;
use std::io::Read;

use booking_core::{BookingRepository, ItemKind, PurchasableItem, RepositoryError, Variant};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur when loading catalog data.
#[derive(Debug, Error)]
pub enum CatalogLoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    #[error("Invalid item kind '{kind}' for item {item_id} (expected 'celebrity' or 'event')")]
    InvalidKind { item_id: i64, kind: String },

    #[error("Item {0} has rows that disagree on kind, name, price or availability")]
    InconsistentItem(i64),

    #[error("Item {item_id} lists variant '{variant_id}' more than once")]
    DuplicateVariant { item_id: i64, variant_id: String },

    #[error("Item {item_id} has a non-positive {field}")]
    NonPositive { item_id: i64, field: &'static str },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<csv::Error> for CatalogLoaderError {
    fn from(err: csv::Error) -> Self {
        CatalogLoaderError::CsvParse(err.to_string())
    }
}

/// A single row from the catalog CSV file.
///
/// Each row describes one variant of one item; an item with several
/// variants spans several rows that repeat the item columns.
///
/// - `item_id`: stable catalog id
/// - `kind`: `celebrity` or `event`
/// - `name`: display name
/// - `unit_price`: base price of one unit
/// - `available_quantity`: advisory stock level (empty when unknown)
/// - `variant_id`, `variant_name`: booking or ticket type (empty for the
///   standard variant)
/// - `price_multiplier`: scales `unit_price` for this variant (empty means 1)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogRecord {
    pub item_id: i64,
    pub kind: String,
    pub name: String,
    pub unit_price: Decimal,
    pub available_quantity: Option<u32>,
    pub variant_id: Option<String>,
    pub variant_name: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_decimal")]
    pub price_multiplier: Option<Decimal>,
}

fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

impl CatalogRecord {
    fn variant(&self) -> Result<Variant, CatalogLoaderError> {
        let multiplier = self.price_multiplier.unwrap_or(Decimal::ONE);
        if multiplier <= Decimal::ZERO {
            return Err(CatalogLoaderError::NonPositive {
                item_id: self.item_id,
                field: "price_multiplier",
            });
        }

        let Some(id) = self.variant_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            return Ok(Variant {
                price_multiplier: multiplier,
                ..Variant::standard()
            });
        };

        Ok(Variant {
            id: id.trim().to_string(),
            name: self
                .variant_name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(id)
                .trim()
                .to_string(),
            price_multiplier: multiplier,
        })
    }

    fn same_item_as(
        &self,
        other: &CatalogRecord,
    ) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.unit_price == other.unit_price
            && self.available_quantity == other.available_quantity
    }
}

/// Loader for catalog data from CSV files.
///
/// Reads CSV rows, folds them into [`PurchasableItem`]s and writes them
/// through the [`BookingRepository`] trait, so it works with any backend.
pub struct CatalogLoader;

impl CatalogLoader {
    /// Parse catalog records from a CSV reader.
    pub fn parse<R: Read>(reader: R) -> Result<Vec<CatalogRecord>, CatalogLoaderError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut records = Vec::new();

        for result in csv_reader.deserialize() {
            let record: CatalogRecord = result?;
            records.push(record);
        }

        Ok(records)
    }

    /// Fold records into items, one per `item_id`, ordered by id. Variants
    /// keep the order of their rows; the first one becomes the default.
    pub fn build_items(records: &[CatalogRecord]) -> Result<Vec<PurchasableItem>, CatalogLoaderError> {
        let mut groups: BTreeMap<i64, Vec<&CatalogRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.item_id).or_default().push(record);
        }

        let mut items = Vec::with_capacity(groups.len());
        for (item_id, rows) in groups {
            let first = rows[0];
            if rows.iter().any(|r| !r.same_item_as(first)) {
                return Err(CatalogLoaderError::InconsistentItem(item_id));
            }

            let kind = ItemKind::parse(first.kind.trim()).ok_or_else(|| {
                CatalogLoaderError::InvalidKind {
                    item_id,
                    kind: first.kind.clone(),
                }
            })?;
            if first.unit_price <= Decimal::ZERO {
                return Err(CatalogLoaderError::NonPositive {
                    item_id,
                    field: "unit_price",
                });
            }

            let mut variants: Vec<Variant> = Vec::with_capacity(rows.len());
            for row in &rows {
                let variant = row.variant()?;
                if variants.iter().any(|v| v.id == variant.id) {
                    return Err(CatalogLoaderError::DuplicateVariant {
                        item_id,
                        variant_id: variant.id,
                    });
                }
                variants.push(variant);
            }

            items.push(PurchasableItem {
                id: item_id,
                kind,
                name: first.name.trim().to_string(),
                unit_price: first.unit_price,
                available_quantity: first.available_quantity,
                variants,
            });
        }

        Ok(items)
    }

    /// Load catalog records into the database.
    ///
    /// Every item is upserted with its full variant list, so running the same
    /// load twice leaves the catalog unchanged. Items missing from the file
    /// are left alone. Returns the number of items written.
    pub async fn load<R: BookingRepository + ?Sized>(
        repo: &R,
        records: &[CatalogRecord],
    ) -> Result<usize, CatalogLoaderError> {
        let items = Self::build_items(records)?;

        for item in &items {
            repo.upsert_item(item).await?;
            debug!(item_id = item.id, variants = item.variants.len(), "catalog item loaded");
        }

        info!(items = items.len(), rows = records.len(), "catalog loaded");
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    const HEADER: &str =
        "item_id,kind,name,unit_price,available_quantity,variant_id,variant_name,price_multiplier";

    fn csv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_parse_single_row() {
        let data = csv(&["3,event,Summer Gala,150.00,250,vip,VIP,1.5"]);

        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        assert_eq!(
            records,
            vec![CatalogRecord {
                item_id: 3,
                kind: "event".to_string(),
                name: "Summer Gala".to_string(),
                unit_price: dec!(150.00),
                available_quantity: Some(250),
                variant_id: Some("vip".to_string()),
                variant_name: Some("VIP".to_string()),
                price_multiplier: Some(dec!(1.5)),
            }]
        );
    }

    #[test]
    fn test_parse_empty_optional_columns() {
        let data = csv(&["2,celebrity,Marcus Reed,12500.00,,,,"]);

        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        assert_eq!(records[0].available_quantity, None);
        assert_eq!(records[0].variant_id, None);
        assert_eq!(records[0].price_multiplier, None);
    }

    #[test]
    fn test_parse_invalid_csv_missing_column() {
        let data = "item_id,kind,name\n1,event,Gala";

        let err = CatalogLoader::parse(data.as_bytes()).expect_err("Should fail for missing column");

        let CatalogLoaderError::CsvParse(msg) = err else {
            panic!("Expected CsvParse error, got: {:?}", err);
        };
        assert!(msg.contains("missing field"), "got: {}", msg);
    }

    #[test]
    fn test_parse_invalid_multiplier() {
        let data = csv(&["3,event,Summer Gala,150.00,250,vip,VIP,lots"]);

        let result = CatalogLoader::parse(data.as_bytes());

        assert!(matches!(result, Err(CatalogLoaderError::CsvParse(_))));
    }

    #[test]
    fn test_build_groups_variants_in_row_order() {
        let data = csv(&[
            "3,event,Summer Gala,150.00,250,standard,Standard,1",
            "1,celebrity,Ava Stone,50000.00,,meet-and-greet,Meet & Greet,1",
            "3,event,Summer Gala,150.00,250,vip,VIP,1.5",
        ]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let items = CatalogLoader::build_items(&records).expect("Failed to build items");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 1);
        assert_eq!(items[0].kind, ItemKind::CelebrityBooking);
        assert_eq!(items[1].variants.len(), 2);
        assert_eq!(items[1].default_variant().map(|v| v.id.as_str()), Some("standard"));
        assert_eq!(items[1].unit_price_for(&items[1].variants[1]), Ok(dec!(225.00)));
    }

    #[test]
    fn test_build_defaults_to_standard_variant() {
        let data = csv(&["2,celebrity,Marcus Reed,12500.00,,,,"]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let items = CatalogLoader::build_items(&records).expect("Failed to build items");

        assert_eq!(items[0].variants, vec![Variant::standard()]);
    }

    #[test]
    fn test_build_variant_name_falls_back_to_id() {
        let data = csv(&["4,event,Jazz,85.00,40,balcony,,"]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let items = CatalogLoader::build_items(&records).expect("Failed to build items");

        assert_eq!(items[0].variants[0].name, "balcony");
        assert_eq!(items[0].variants[0].price_multiplier, Decimal::ONE);
    }

    #[test]
    fn test_build_rejects_unknown_kind() {
        let data = csv(&["9,concert,Gala,10,,,,"]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let result = CatalogLoader::build_items(&records);

        assert!(matches!(
            result,
            Err(CatalogLoaderError::InvalidKind { item_id: 9, .. })
        ));
    }

    #[test]
    fn test_build_rejects_inconsistent_rows() {
        let data = csv(&[
            "3,event,Summer Gala,150.00,250,standard,Standard,1",
            "3,event,Summer Gala,175.00,250,vip,VIP,1.5",
        ]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let result = CatalogLoader::build_items(&records);

        assert!(matches!(result, Err(CatalogLoaderError::InconsistentItem(3))));
    }

    #[test]
    fn test_build_rejects_duplicate_variant() {
        let data = csv(&[
            "3,event,Summer Gala,150.00,250,vip,VIP,1.5",
            "3,event,Summer Gala,150.00,250,vip,VIP Plus,2",
        ]);
        let records = CatalogLoader::parse(data.as_bytes()).expect("Failed to parse CSV");

        let result = CatalogLoader::build_items(&records);

        assert!(matches!(
            result,
            Err(CatalogLoaderError::DuplicateVariant { item_id: 3, .. })
        ));
    }

    #[test]
    fn test_build_rejects_non_positive_prices() {
        let free = csv(&["3,event,Summer Gala,0,250,,,"]);
        let negative = csv(&["3,event,Summer Gala,150,250,vip,VIP,-1"]);

        let free = CatalogLoader::parse(free.as_bytes()).expect("Failed to parse CSV");
        let negative = CatalogLoader::parse(negative.as_bytes()).expect("Failed to parse CSV");

        assert!(matches!(
            CatalogLoader::build_items(&free),
            Err(CatalogLoaderError::NonPositive { field: "unit_price", .. })
        ));
        assert!(matches!(
            CatalogLoader::build_items(&negative),
            Err(CatalogLoaderError::NonPositive { field: "price_multiplier", .. })
        ));
    }
}

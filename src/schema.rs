//! Schema context handed to the model.
//!
//! The text must match the store built by [`crate::ingest`] column for
//! column, otherwise generated SQL fails at execution time.

/// Eligibility snapshots per item.
pub const ELIGIBILITY_TABLE: &str = "product_eligibility_table";

/// Daily advertising metrics per item.
pub const AD_SALES_TABLE: &str = "product_ad_sales_metrics";

/// Daily total sales per item.
pub const TOTAL_SALES_TABLE: &str = "product_total_sales_metrics";

/// All tables the pipeline may query, in ingestion order.
pub const TABLES: [&str; 3] = [ELIGIBILITY_TABLE, AD_SALES_TABLE, TOTAL_SALES_TABLE];

pub const ECOMMERCE_SCHEMA: &str = r#"
CREATE TABLE product_eligibility_table (
  item_id INTEGER,
  eligibility_datetime_utc TEXT,
  eligibility BOOLEAN,
  message TEXT
);

CREATE TABLE product_ad_sales_metrics (
  date TEXT,
  item_id INTEGER,
  ad_sales REAL,
  impressions INTEGER,
  ad_spend REAL,
  clicks INTEGER,
  units_sold INTEGER
);

CREATE TABLE product_total_sales_metrics (
  date TEXT,
  item_id INTEGER,
  total_sales REAL,
  total_units_ordered INTEGER
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_every_table() {
        for table in TABLES {
            assert!(
                ECOMMERCE_SCHEMA.contains(&format!("CREATE TABLE {} (", table)),
                "schema is missing {}",
                table
            );
        }
    }

    #[test]
    fn test_schema_creates_only_known_tables() {
        assert_eq!(ECOMMERCE_SCHEMA.matches("CREATE TABLE").count(), TABLES.len());
    }
}

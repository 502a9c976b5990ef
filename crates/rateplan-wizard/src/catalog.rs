//! Read-only catalog of products and billable metrics
//!
//! Supplied by the surrounding application; the wizard only looks things up.

use serde::{Deserialize, Serialize};

/// Product a rate plan can be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Catalog ID
    pub id: String,
    /// Display name
    pub name: String,
}

/// Metric usage is measured by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillableMetric {
    /// Metric ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Owning product, when the metric is product-specific
    pub product_id: Option<String>,
    /// Unit of measure, e.g. "api_call"
    pub unit: Option<String>,
}

/// Selectable products and metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    products: Vec<Product>,
    metrics: Vec<BillableMetric>,
}

impl Catalog {
    /// Catalog over the given lists
    pub fn new(products: Vec<Product>, metrics: Vec<BillableMetric>) -> Self {
        Self { products, metrics }
    }

    /// All products
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// All metrics
    pub fn metrics(&self) -> &[BillableMetric] {
        &self.metrics
    }

    /// No products loaded; reference checks are skipped
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Match by ID, or by name ignoring case
    pub fn find_product(&self, reference: &str) -> Option<&Product> {
        let reference = reference.trim();
        self.products
            .iter()
            .find(|p| p.id == reference)
            .or_else(|| self.products.iter().find(|p| p.name.eq_ignore_ascii_case(reference)))
    }

    /// Match by metric ID
    pub fn find_metric(&self, id: &str) -> Option<&BillableMetric> {
        self.metrics.iter().find(|m| m.id == id.trim())
    }

    /// Metrics usable with a product: its own plus product-independent ones
    pub fn metrics_for_product(&self, reference: &str) -> Vec<&BillableMetric> {
        let product_id = self.find_product(reference).map(|p| p.id.as_str());
        self.metrics
            .iter()
            .filter(|m| m.product_id.is_none() || m.product_id.as_deref() == product_id)
            .collect()
    }
}

//! Core catalog model shared by the feed sync pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "catsync-core";

/// Fallback leaf category when a feed item carries no category tree.
pub const DEFAULT_CATEGORY: &str = "Genel";

/// Number of positional image columns on a canonical product.
pub const IMAGE_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document shape served by a feed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Nested catalog export with image lists and variation entries.
    RichCatalog,
    /// Flat RSS-style item list without variations.
    SimpleFeed,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::RichCatalog => "rich_catalog",
            Dialect::SimpleFeed => "simple_feed",
        }
    }
}

/// Registered supplier endpoint. Built once from the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub dialect: Dialect,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_category: Option<String>,
    #[serde(default)]
    pub default_brand: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// One raw variation row of a rich catalog item, after price selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationEntry {
    pub external_id: Option<String>,
    /// Axis name -> value, in feed order.
    pub attributes: Vec<(String, String)>,
    pub stock: i64,
    /// Discounted price when positive, otherwise the regular price.
    pub effective_price: f64,
    pub regular_price: f64,
    pub discounted_price: f64,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub vat_included: bool,
    pub vat_rate: i32,
    pub currency: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationOption {
    pub value: String,
    pub price_modifier: f64,
    pub stock: i64,
    pub sku: String,
    pub external_option_id: Option<String>,
    pub barcode: Option<String>,
    pub regular_price: f64,
    pub discounted_price: f64,
    pub vat_included: bool,
    pub vat_rate: i32,
    pub currency: String,
    pub currency_code: String,
}

impl VariationOption {
    pub fn from_entry(value: &str, entry: &VariationEntry) -> Self {
        Self {
            value: value.to_string(),
            price_modifier: entry.effective_price,
            stock: entry.stock,
            sku: entry.sku.clone().unwrap_or_default(),
            external_option_id: entry.external_id.clone(),
            barcode: entry.barcode.clone(),
            regular_price: entry.regular_price,
            discounted_price: entry.discounted_price,
            vat_included: entry.vat_included,
            vat_rate: entry.vat_rate,
            currency: entry.currency.clone(),
            currency_code: entry.currency_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationAxis {
    pub axis_name: String,
    pub options: Vec<VariationOption>,
}

/// Groups variation entries into axes.
///
/// Axes and option values keep first-seen order; a value seen again takes the
/// price, stock and sku of its latest entry.
pub fn derive_variation_axes(entries: &[VariationEntry]) -> Vec<VariationAxis> {
    let mut axes: Vec<VariationAxis> = Vec::new();
    for entry in entries {
        for (name, value) in &entry.attributes {
            if name.is_empty() || value.is_empty() {
                continue;
            }
            let axis = match axes.iter().position(|a| &a.axis_name == name) {
                Some(idx) => &mut axes[idx],
                None => {
                    axes.push(VariationAxis {
                        axis_name: name.clone(),
                        options: Vec::new(),
                    });
                    let last = axes.len() - 1;
                    &mut axes[last]
                }
            };
            let option = VariationOption::from_entry(value, entry);
            match axis.options.iter_mut().find(|o| &o.value == value) {
                Some(existing) => *existing = option,
                None => axis.options.push(option),
            }
        }
    }
    axes
}

/// Per-cycle mapping result for one feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProduct {
    pub external_id: String,
    pub source: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub category_tree: String,
    pub brand: String,
    pub images: Vec<String>,
    pub stock: i64,
    pub rating: f64,
    pub review_count: i32,
    pub has_variations: bool,
    pub sku: String,
    pub product_url: String,
    pub sales_unit: String,
    pub variations: Vec<VariationEntry>,
    pub variation_axes: Vec<VariationAxis>,
}

impl CandidateProduct {
    pub fn total_images(&self) -> usize {
        self.images.len()
    }

    /// Positional image column `slot` (0-based), empty when absent.
    pub fn image_slot(&self, slot: usize) -> &str {
        self.images.get(slot).map(String::as_str).unwrap_or("")
    }

    /// The `images` column value: JSON array of every image URL.
    pub fn images_json(&self) -> String {
        serialize_images(&self.images)
    }

    pub fn image_slots(&self) -> [String; IMAGE_SLOTS] {
        std::array::from_fn(|i| self.image_slot(i).to_string())
    }
}

pub fn serialize_images(images: &[String]) -> String {
    serde_json::to_string(images).unwrap_or_else(|_| "[]".to_string())
}

/// Persisted tenant-scoped product keyed by `(external_id, tenant_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub source: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub category_tree: String,
    pub brand: String,
    pub image: String,
    pub images: String,
    pub image_slots: [String; IMAGE_SLOTS],
    pub stock: i64,
    pub rating: f64,
    pub review_count: i32,
    pub has_variations: bool,
    pub sku: String,
    pub last_updated: DateTime<Utc>,
}

/// Insert payload for a product that has no stored row yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub tenant_id: TenantId,
    pub external_id: String,
    pub source: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub category_tree: String,
    pub brand: String,
    pub image: String,
    pub images: String,
    pub image_slots: [String; IMAGE_SLOTS],
    pub stock: i64,
    pub rating: f64,
    pub review_count: i32,
    pub has_variations: bool,
    pub sku: String,
    pub last_updated: DateTime<Utc>,
}

impl NewProduct {
    pub fn from_candidate(
        tenant_id: TenantId,
        candidate: &CandidateProduct,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            external_id: candidate.external_id.clone(),
            source: candidate.source.clone(),
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            price: candidate.price,
            category: candidate.category.clone(),
            category_tree: candidate.category_tree.clone(),
            brand: candidate.brand.clone(),
            image: candidate.image_slot(0).to_string(),
            images: candidate.images_json(),
            image_slots: candidate.image_slots(),
            stock: candidate.stock,
            rating: candidate.rating,
            review_count: candidate.review_count,
            has_variations: candidate.has_variations,
            sku: candidate.sku.clone(),
            last_updated: now,
        }
    }
}

/// Single changed column of a canonical product update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductChange {
    Name(String),
    Price(f64),
    Stock(i64),
    Images(String),
    /// Positional image column, 0-based.
    ImageSlot(usize, String),
    HasVariations(bool),
    Sku(String),
}

impl ProductChange {
    pub fn column(&self) -> &'static str {
        match self {
            ProductChange::Name(_) => "name",
            ProductChange::Price(_) => "price",
            ProductChange::Stock(_) => "stock",
            ProductChange::Images(_) => "images",
            ProductChange::ImageSlot(0, _) => "image1",
            ProductChange::ImageSlot(1, _) => "image2",
            ProductChange::ImageSlot(2, _) => "image3",
            ProductChange::ImageSlot(3, _) => "image4",
            ProductChange::ImageSlot(_, _) => "image5",
            ProductChange::HasVariations(_) => "has_variations",
            ProductChange::Sku(_) => "sku",
        }
    }

    pub fn apply_to(&self, product: &mut CanonicalProduct) {
        match self {
            ProductChange::Name(v) => product.name = v.clone(),
            ProductChange::Price(v) => product.price = *v,
            ProductChange::Stock(v) => product.stock = *v,
            ProductChange::Images(v) => product.images = v.clone(),
            ProductChange::ImageSlot(slot, v) => {
                if let Some(column) = product.image_slots.get_mut(*slot) {
                    *column = v.clone();
                }
                if *slot == 0 {
                    product.image = v.clone();
                }
            }
            ProductChange::HasVariations(v) => product.has_variations = *v,
            ProductChange::Sku(v) => product.sku = v.clone(),
        }
    }
}

/// Compares the reconciled column set and returns only what differs.
pub fn diff_product(existing: &CanonicalProduct, candidate: &CandidateProduct) -> Vec<ProductChange> {
    let mut changes = Vec::new();
    if existing.name != candidate.name {
        changes.push(ProductChange::Name(candidate.name.clone()));
    }
    if existing.price != candidate.price {
        changes.push(ProductChange::Price(candidate.price));
    }
    if existing.stock != candidate.stock {
        changes.push(ProductChange::Stock(candidate.stock));
    }
    let images = candidate.images_json();
    if existing.images != images {
        changes.push(ProductChange::Images(images));
    }
    for slot in 0..IMAGE_SLOTS {
        let incoming = candidate.image_slot(slot);
        if existing.image_slots[slot] != incoming {
            changes.push(ProductChange::ImageSlot(slot, incoming.to_string()));
        }
    }
    if existing.has_variations != candidate.has_variations {
        changes.push(ProductChange::HasVariations(candidate.has_variations));
    }
    if existing.sku != candidate.sku {
        changes.push(ProductChange::Sku(candidate.sku.clone()));
    }
    changes
}

/// Category row derived from a feed; unique per `(name, tenant_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub name: String,
    pub description: String,
    pub category_tree: String,
    pub external_id: String,
    pub main_category: String,
    pub sub_categories: Vec<String>,
    pub source: String,
}

/// Non-empty, trimmed segments of a `/`-separated category tree.
pub fn split_category_tree(tree: &str) -> Vec<String> {
    tree.split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Counters of one orchestrator pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunStats {
    pub total_products: u64,
    pub new_products: u64,
    pub updated_products: u64,
    pub errors: u64,
}

/// Read-only status surface for admin and health callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_run_duration_ms: Option<u64>,
    pub stats: SyncRunStats,
}

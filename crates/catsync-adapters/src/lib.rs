//! Feed document parsing + dialect mappers producing candidate products.

use catsync_core::{
    derive_variation_axes, split_category_tree, CandidateProduct, CategoryRecord, Dialect,
    FeedSource, VariationEntry, DEFAULT_CATEGORY,
};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

mod document;
mod values;

pub use document::{parse_document, DocumentTree, Element, Entries, ParseError};
pub use values::{clean_html, extract_price, extract_rating, leading_int};

pub const CRATE_NAME: &str = "catsync-adapters";

/// Per-item mapping failure; the item is skipped, the batch continues.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("field {field} holds nested elements where text was expected")]
    UnexpectedStructure { field: String },
    #[error("field {field} is out of range")]
    OutOfRange { field: String },
    #[error("{0}")]
    Message(String),
}

pub trait DialectMapper: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Item nodes of the document, in feed order. Empty when the shape does not match.
    fn item_nodes<'a>(&self, tree: &'a DocumentTree) -> Vec<&'a Element>;

    /// Maps one item. `Ok(None)` means the item was rejected (no usable name).
    fn map_item(
        &self,
        node: &Element,
        source: &FeedSource,
    ) -> Result<Option<CandidateProduct>, MapError>;
}

pub fn mapper_for_dialect(dialect: Dialect) -> Box<dyn DialectMapper> {
    match dialect {
        Dialect::RichCatalog => Box::new(RichCatalogMapper),
        Dialect::SimpleFeed => Box::new(SimpleFeedMapper),
    }
}

/// Outcome of mapping every item node of one document.
#[derive(Debug, Default)]
pub struct MappedBatch {
    pub candidates: Vec<CandidateProduct>,
    pub item_count: usize,
    pub rejected: usize,
    pub failures: Vec<(usize, MapError)>,
}

pub fn map_document(tree: &DocumentTree, source: &FeedSource) -> MappedBatch {
    let mapper = mapper_for_dialect(source.dialect);
    let items = mapper.item_nodes(tree);
    let mut batch = MappedBatch {
        item_count: items.len(),
        ..Default::default()
    };

    for (index, node) in items.into_iter().enumerate() {
        match mapper.map_item(node, source) {
            Ok(Some(candidate)) => batch.candidates.push(candidate),
            Ok(None) => {
                debug!(source = %source.name, index, "item rejected: missing name");
                batch.rejected += 1;
            }
            Err(err) => {
                warn!(source = %source.name, index, error = %err, "skipping unmappable item");
                batch.failures.push((index, err));
            }
        }
    }

    debug!(
        source = %source.name,
        dialect = source.dialect.as_str(),
        items = batch.item_count,
        mapped = batch.candidates.len(),
        "document mapped"
    );
    batch
}

/// Text of a scalar field, `None` when absent or blank.
fn scalar<'a>(node: &'a Element, field: &str) -> Result<Option<&'a str>, MapError> {
    let Some(child) = node.child(field) else {
        return Ok(None);
    };
    if child.text.is_empty() && !child.children.is_empty() {
        return Err(MapError::UnexpectedStructure {
            field: field.to_string(),
        });
    }
    Ok(Some(child.text.as_str()).filter(|t| !t.is_empty()))
}

fn first_scalar<'a>(node: &'a Element, fields: &[&str]) -> Result<Option<&'a str>, MapError> {
    for field in fields {
        if let Some(value) = scalar(node, field)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn narrow_int(field: &str, value: i64) -> Result<i32, MapError> {
    i32::try_from(value).map_err(|_| MapError::OutOfRange {
        field: field.to_string(),
    })
}

fn main_category(tree: Option<&str>) -> Option<String> {
    let tree = tree?;
    let first = tree.split('/').next().unwrap_or_default().trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Stable identifier for items that carry no supplier id.
fn derived_external_id(source: &FeedSource, name: &str) -> String {
    let key = format!("{}:{}", source.name, name);
    format!(
        "ext_{}",
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).simple()
    )
}

fn brand_for(explicit: Option<&str>, source: &FeedSource) -> String {
    explicit
        .map(ToString::to_string)
        .or_else(|| source.default_brand.clone())
        .unwrap_or_else(|| source.name.clone())
}

#[derive(Debug, Clone, Copy)]
struct RichCatalogMapper;

impl RichCatalogMapper {
    fn images(node: &Element) -> Vec<String> {
        node.child("Resimler")
            .and_then(|images| images.entries("Resim"))
            .map(Entries::into_list)
            .unwrap_or_default()
            .into_iter()
            .map(|image| image.text.clone())
            .filter(|url| !url.is_empty())
            .collect()
    }

    /// Attribute entries arrive as one `Ozellik` or many; both carry `Tanim`/`Deger`.
    fn attributes(variation: &Element) -> Vec<(String, String)> {
        let entries = variation
            .child("EkSecenekOzellik")
            .and_then(|container| container.entries("Ozellik"))
            .map(Entries::into_list)
            .unwrap_or_default();

        let mut attributes: Vec<(String, String)> = Vec::new();
        for entry in entries {
            let name = entry.text_of("Tanim").unwrap_or_default();
            let value = entry
                .text_of("Deger")
                .or(Some(entry.text.as_str()).filter(|t| !t.is_empty()))
                .unwrap_or_default();
            if name.is_empty() || value.is_empty() {
                continue;
            }
            match attributes.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
        attributes
    }

    fn variation(variation: &Element) -> Result<VariationEntry, MapError> {
        let discounted_price = scalar(variation, "IndirimliFiyat")?
            .map(extract_price)
            .unwrap_or(0.0);
        let regular_price = scalar(variation, "SatisFiyati")?
            .map(extract_price)
            .unwrap_or(0.0);
        let effective_price = if discounted_price > 0.0 {
            discounted_price
        } else {
            regular_price
        };

        Ok(VariationEntry {
            external_id: scalar(variation, "VaryasyonID")?.map(ToString::to_string),
            attributes: Self::attributes(variation),
            stock: scalar(variation, "StokAdedi")?.map(leading_int).unwrap_or(0),
            effective_price,
            regular_price,
            discounted_price,
            sku: scalar(variation, "StokKodu")?.map(ToString::to_string),
            barcode: scalar(variation, "Barkod")?.map(ToString::to_string),
            vat_included: scalar(variation, "KDVDahil")?
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            vat_rate: scalar(variation, "KdvOrani")?
                .map(|v| narrow_int("KdvOrani", leading_int(v)))
                .transpose()?
                .unwrap_or(0),
            currency: scalar(variation, "ParaBirimi")?.unwrap_or("TL").to_string(),
            currency_code: scalar(variation, "ParaBirimiKodu")?
                .unwrap_or("TRY")
                .to_string(),
        })
    }
}

impl DialectMapper for RichCatalogMapper {
    fn dialect(&self) -> Dialect {
        Dialect::RichCatalog
    }

    fn item_nodes<'a>(&self, tree: &'a DocumentTree) -> Vec<&'a Element> {
        if tree.root.name != "Root" {
            return Vec::new();
        }
        tree.root
            .child("Urunler")
            .and_then(|products| products.entries("Urun"))
            .map(Entries::into_list)
            .unwrap_or_default()
    }

    fn map_item(
        &self,
        node: &Element,
        source: &FeedSource,
    ) -> Result<Option<CandidateProduct>, MapError> {
        let Some(name) = scalar(node, "UrunAdi")? else {
            return Ok(None);
        };
        let name = name.to_string();

        let images = Self::images(node);
        let variations = node
            .child("UrunSecenek")
            .and_then(|options| options.entries("Secenek"))
            .map(Entries::into_list)
            .unwrap_or_default()
            .into_iter()
            .map(Self::variation)
            .collect::<Result<Vec<_>, _>>()?;

        let price = match variations.iter().map(|v| v.effective_price).reduce(f64::min) {
            Some(lowest) => lowest,
            None => scalar(node, "SatisFiyati")?
                .map(extract_price)
                .unwrap_or(0.0),
        };
        let stock = if variations.is_empty() {
            scalar(node, "StokAdedi")?.map(leading_int).unwrap_or(0)
        } else {
            variations
                .iter()
                .try_fold(0i64, |total, v| total.checked_add(v.stock))
                .ok_or_else(|| MapError::OutOfRange {
                    field: "StokAdedi".to_string(),
                })?
        };

        let category_tree = scalar(node, "KategoriTree")?;
        let category = main_category(category_tree.or(scalar(node, "Kategori")?))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let external_id = match scalar(node, "UrunKartiID")? {
            Some(id) => id.to_string(),
            None => derived_external_id(source, &name),
        };

        let variation_axes = derive_variation_axes(&variations);
        Ok(Some(CandidateProduct {
            external_id,
            source: source.name.clone(),
            description: scalar(node, "Aciklama")?.map(clean_html).unwrap_or_default(),
            price,
            category,
            category_tree: category_tree.unwrap_or_default().to_string(),
            brand: brand_for(scalar(node, "Marka")?, source),
            images,
            stock,
            rating: 0.0,
            review_count: 0,
            has_variations: !variations.is_empty(),
            sku: variations
                .first()
                .and_then(|v| v.sku.clone())
                .unwrap_or_default(),
            product_url: scalar(node, "UrunUrl")?.unwrap_or_default().to_string(),
            sales_unit: scalar(node, "SatisBirimi")?.unwrap_or("ADET").to_string(),
            variations,
            variation_axes,
            name,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct SimpleFeedMapper;

impl SimpleFeedMapper {
    fn image(node: &Element) -> Result<Option<String>, MapError> {
        for field in ["image", "thumbnail"] {
            let Some(image) = node.child(field) else {
                continue;
            };
            if !image.text.is_empty() {
                return Ok(Some(image.text.clone()));
            }
            if let Some(url) = image.text_of("url") {
                return Ok(Some(url.to_string()));
            }
        }
        Ok(None)
    }
}

impl DialectMapper for SimpleFeedMapper {
    fn dialect(&self) -> Dialect {
        Dialect::SimpleFeed
    }

    fn item_nodes<'a>(&self, tree: &'a DocumentTree) -> Vec<&'a Element> {
        if tree.root.name != "rss" {
            return Vec::new();
        }
        tree.root
            .child("channel")
            .and_then(|channel| channel.entries("item"))
            .map(Entries::into_list)
            .unwrap_or_default()
    }

    fn map_item(
        &self,
        node: &Element,
        source: &FeedSource,
    ) -> Result<Option<CandidateProduct>, MapError> {
        let Some(name) = first_scalar(node, &["title", "name"])? else {
            return Ok(None);
        };
        let name = name.to_string();

        let category_tree = scalar(node, "category")?;
        let category = main_category(category_tree)
            .or_else(|| source.default_category.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let external_id = match first_scalar(node, &["id", "guid"])? {
            Some(id) => id.to_string(),
            None => derived_external_id(source, &name),
        };

        let images = Self::image(node)?.into_iter().collect::<Vec<_>>();

        Ok(Some(CandidateProduct {
            external_id,
            source: source.name.clone(),
            description: first_scalar(node, &["description", "summary"])?
                .map(clean_html)
                .unwrap_or_default(),
            price: first_scalar(node, &["price", "cost"])?
                .map(extract_price)
                .unwrap_or(0.0),
            category,
            category_tree: category_tree.unwrap_or_default().to_string(),
            brand: brand_for(scalar(node, "brand")?, source),
            images,
            stock: first_scalar(node, &["stock", "availability"])?
                .map(leading_int)
                .unwrap_or(0),
            rating: scalar(node, "rating")?.map(extract_rating).unwrap_or(0.0),
            review_count: scalar(node, "reviewCount")?
                .map(|v| narrow_int("reviewCount", leading_int(v)))
                .transpose()?
                .unwrap_or(0),
            has_variations: false,
            sku: scalar(node, "sku")?.unwrap_or_default().to_string(),
            product_url: scalar(node, "link")?.unwrap_or_default().to_string(),
            sales_unit: "ADET".to_string(),
            variations: Vec::new(),
            variation_axes: Vec::new(),
            name,
        }))
    }
}

/// Derives one category per distinct leaf name; the first candidate seen wins the tree.
pub fn extract_categories(candidates: &[CandidateProduct]) -> Vec<CategoryRecord> {
    let mut categories: Vec<CategoryRecord> = Vec::new();
    for candidate in candidates {
        let name = candidate.category.as_str();
        if name.is_empty() || categories.iter().any(|c| c.name == name) {
            continue;
        }
        let mut parts = split_category_tree(&candidate.category_tree);
        let main_category = if parts.is_empty() {
            name.to_string()
        } else {
            parts.remove(0)
        };
        categories.push(CategoryRecord {
            name: name.to_string(),
            description: format!("{name} kategorisi"),
            category_tree: candidate.category_tree.clone(),
            external_id: category_external_id(name),
            main_category,
            sub_categories: parts,
            source: "XML".to_string(),
        });
    }
    categories
}

pub fn category_external_id(name: &str) -> String {
    format!(
        "cat_{}",
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::path::{Path, PathBuf};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenAxis {
        name: String,
        values: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenCandidate {
        external_id: String,
        name: String,
        description: String,
        price: f64,
        category: String,
        category_tree: String,
        brand: String,
        stock: i64,
        has_variations: bool,
        sku: String,
        total_images: usize,
        image1: String,
        axes: Vec<GoldenAxis>,
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_path(source: &str, file: &str) -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join(source)
            .join("sample")
            .join(file)
    }

    fn feed_source(name: &str, dialect: Dialect) -> FeedSource {
        FeedSource {
            name: name.to_string(),
            url: format!("https://feeds.example.test/{name}.xml"),
            dialect,
            priority: 1,
            enabled: true,
            default_category: Some("Outdoor".to_string()),
            default_brand: None,
        }
    }

    fn load_tree(source: &str) -> DocumentTree {
        let bytes = fs::read(fixture_path(source, "feed.xml")).expect("read fixture feed");
        parse_document(&bytes).expect("parse fixture feed")
    }

    fn to_golden(candidates: &[CandidateProduct]) -> Vec<GoldenCandidate> {
        candidates
            .iter()
            .map(|c| GoldenCandidate {
                external_id: c.external_id.clone(),
                name: c.name.clone(),
                description: c.description.clone(),
                price: c.price,
                category: c.category.clone(),
                category_tree: c.category_tree.clone(),
                brand: c.brand.clone(),
                stock: c.stock,
                has_variations: c.has_variations,
                sku: c.sku.clone(),
                total_images: c.total_images(),
                image1: c.image_slot(0).to_string(),
                axes: c
                    .variation_axes
                    .iter()
                    .map(|a| GoldenAxis {
                        name: a.axis_name.clone(),
                        values: a.options.iter().map(|o| o.value.clone()).collect(),
                    })
                    .collect(),
            })
            .collect()
    }

    fn read_snapshot(source: &str) -> Vec<GoldenCandidate> {
        let text = fs::read_to_string(fixture_path(source, "snapshot.json")).expect("read snapshot");
        serde_json::from_str(&text).expect("parse snapshot")
    }

    #[test]
    fn golden_snapshot_rich_catalog_fixture() {
        let source = feed_source("huglu-outdoor", Dialect::RichCatalog);
        let batch = map_document(&load_tree("huglu-outdoor"), &source);
        assert_eq!(batch.item_count, 4);
        assert_eq!(batch.rejected, 1);
        assert!(batch.failures.is_empty());
        assert_eq!(to_golden(&batch.candidates), read_snapshot("huglu-outdoor"));
    }

    #[test]
    fn golden_snapshot_simple_feed_fixture() {
        let source = feed_source("outdoor-rss", Dialect::SimpleFeed);
        let batch = map_document(&load_tree("outdoor-rss"), &source);
        assert_eq!(batch.item_count, 3);
        assert_eq!(batch.rejected, 1);
        assert_eq!(to_golden(&batch.candidates), read_snapshot("outdoor-rss"));
    }

    #[test]
    fn simple_feed_reads_rating_and_reviews() {
        let source = feed_source("outdoor-rss", Dialect::SimpleFeed);
        let batch = map_document(&load_tree("outdoor-rss"), &source);
        assert_eq!(batch.candidates[0].rating, 4.5);
        assert_eq!(batch.candidates[0].review_count, 12);
        assert_eq!(batch.candidates[0].product_url, "https://shop.example-rss.test/p/rss-1");
        assert_eq!(batch.candidates[1].rating, 5.0);
        assert_eq!(batch.candidates[1].review_count, 0);
    }

    #[test]
    fn rich_item_variation_details_are_kept() {
        let source = feed_source("huglu-outdoor", Dialect::RichCatalog);
        let batch = map_document(&load_tree("huglu-outdoor"), &source);
        let tent = &batch.candidates[0];
        assert_eq!(tent.variations.len(), 3);
        let medium = &tent.variations[1];
        assert_eq!(medium.external_id.as_deref(), Some("5002"));
        assert_eq!(medium.discounted_price, 999.9);
        assert_eq!(medium.regular_price, 1250.5);
        assert_eq!(medium.effective_price, 999.9);
        assert!(medium.vat_included);
        assert_eq!(medium.vat_rate, 20);
        assert_eq!(medium.currency, "TL");
        assert_eq!(medium.currency_code, "TRY");
        assert_eq!(medium.barcode.as_deref(), Some("8690000050022"));
        assert_eq!(
            medium.attributes,
            vec![
                ("Beden".to_string(), "M".to_string()),
                ("Renk".to_string(), "Yeşil".to_string())
            ]
        );
        assert_eq!(tent.product_url, "https://www.example-outdoor.test/kamp-cadiri-3");
        assert_eq!(tent.sales_unit, "ADET");
    }

    #[test]
    fn price_is_min_of_effective_variation_prices() {
        let xml = r#"
            <Root><Urunler><Urun>
              <UrunKartiID>77</UrunKartiID>
              <UrunAdi>Mont</UrunAdi>
              <UrunSecenek>
                <Secenek><IndirimliFiyat>0</IndirimliFiyat><SatisFiyati>100</SatisFiyati></Secenek>
                <Secenek><IndirimliFiyat>80</IndirimliFiyat><SatisFiyati>120</SatisFiyati></Secenek>
              </UrunSecenek>
            </Urun></Urunler></Root>"#;
        let tree = parse_document(xml.as_bytes()).unwrap();
        let batch = map_document(&tree, &feed_source("f", Dialect::RichCatalog));
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].price, 80.0);
        assert!(batch.candidates[0].has_variations);
    }

    #[test]
    fn single_and_list_attribute_entries_are_equivalent() {
        let single = r#"<Root><Urunler><Urun><UrunAdi>A</UrunAdi><UrunSecenek><Secenek>
            <EkSecenekOzellik><Ozellik Tanim="Beden" Deger="S">S</Ozellik></EkSecenekOzellik>
            </Secenek></UrunSecenek></Urun></Urunler></Root>"#;
        let list = r#"<Root><Urunler><Urun><UrunAdi>A</UrunAdi><UrunSecenek><Secenek>
            <EkSecenekOzellik>
              <Ozellik><Tanim>Beden</Tanim><Deger>S</Deger></Ozellik>
              <Ozellik><Tanim>Beden</Tanim></Ozellik>
            </EkSecenekOzellik>
            </Secenek></UrunSecenek></Urun></Urunler></Root>"#;
        let source = feed_source("f", Dialect::RichCatalog);
        let a = map_document(&parse_document(single.as_bytes()).unwrap(), &source);
        let b = map_document(&parse_document(list.as_bytes()).unwrap(), &source);
        assert_eq!(
            a.candidates[0].variations[0].attributes,
            b.candidates[0].variations[0].attributes
        );
    }

    #[test]
    fn attribute_value_falls_back_to_entry_text() {
        let xml = r#"<Root><Urunler><Urun><UrunAdi>A</UrunAdi><UrunSecenek><Secenek>
            <EkSecenekOzellik><Ozellik Tanim="Beden">XL</Ozellik></EkSecenekOzellik>
            </Secenek></UrunSecenek></Urun></Urunler></Root>"#;
        let batch = map_document(
            &parse_document(xml.as_bytes()).unwrap(),
            &feed_source("f", Dialect::RichCatalog),
        );
        assert_eq!(
            batch.candidates[0].variations[0].attributes,
            vec![("Beden".to_string(), "XL".to_string())]
        );
    }

    #[test]
    fn nested_name_field_fails_only_that_item() {
        let xml = r#"<Root><Urunler>
            <Urun><UrunAdi><b>bad</b></UrunAdi></Urun>
            <Urun><UrunKartiID>2</UrunKartiID><UrunAdi>Good</UrunAdi></Urun>
            </Urunler></Root>"#;
        let batch = map_document(
            &parse_document(xml.as_bytes()).unwrap(),
            &feed_source("f", Dialect::RichCatalog),
        );
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, 0);
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].name, "Good");
    }

    #[test]
    fn overflowing_variation_stock_fails_only_that_item() {
        let xml = r#"<Root><Urunler>
            <Urun><UrunKartiID>1</UrunKartiID><UrunAdi>Huge</UrunAdi><UrunSecenek>
              <Secenek><StokAdedi>9223372036854775807</StokAdedi></Secenek>
              <Secenek><StokAdedi>1</StokAdedi></Secenek>
            </UrunSecenek></Urun>
            <Urun><UrunKartiID>2</UrunKartiID><UrunAdi>Good</UrunAdi><StokAdedi>3</StokAdedi></Urun>
            </Urunler></Root>"#;
        let batch = map_document(
            &parse_document(xml.as_bytes()).unwrap(),
            &feed_source("f", Dialect::RichCatalog),
        );
        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(
            &batch.failures[0].1,
            MapError::OutOfRange { field } if field == "StokAdedi"
        ));
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].stock, 3);
    }

    #[test]
    fn out_of_range_counts_are_rejected() {
        let rich = r#"<Root><Urunler><Urun><UrunAdi>A</UrunAdi><UrunSecenek>
            <Secenek><KdvOrani>3000000000</KdvOrani></Secenek>
            </UrunSecenek></Urun></Urunler></Root>"#;
        let batch = map_document(
            &parse_document(rich.as_bytes()).unwrap(),
            &feed_source("f", Dialect::RichCatalog),
        );
        assert!(batch.candidates.is_empty());
        assert!(matches!(
            &batch.failures[0].1,
            MapError::OutOfRange { field } if field == "KdvOrani"
        ));

        let simple = r#"<rss><channel><item>
            <title>Lamba</title><reviewCount>99999999999</reviewCount>
            </item></channel></rss>"#;
        let batch = map_document(
            &parse_document(simple.as_bytes()).unwrap(),
            &feed_source("f", Dialect::SimpleFeed),
        );
        assert!(batch.candidates.is_empty());
        assert!(matches!(
            &batch.failures[0].1,
            MapError::OutOfRange { field } if field == "reviewCount"
        ));
    }

    #[test]
    fn missing_external_id_is_stable_across_runs() {
        let xml = r#"<rss><channel><item><title>Fener</title></item></channel></rss>"#;
        let source = feed_source("f", Dialect::SimpleFeed);
        let first = map_document(&parse_document(xml.as_bytes()).unwrap(), &source);
        let second = map_document(&parse_document(xml.as_bytes()).unwrap(), &source);
        assert!(first.candidates[0].external_id.starts_with("ext_"));
        assert_eq!(first.candidates[0].external_id, second.candidates[0].external_id);
    }

    #[test]
    fn dialect_mismatch_yields_no_items() {
        let xml = r#"<rss><channel><item><title>Fener</title></item></channel></rss>"#;
        let batch = map_document(
            &parse_document(xml.as_bytes()).unwrap(),
            &feed_source("f", Dialect::RichCatalog),
        );
        assert_eq!(batch.item_count, 0);
        assert!(batch.candidates.is_empty());
    }

    #[test]
    fn categories_dedup_by_name_first_tree_wins() {
        let source = feed_source("huglu-outdoor", Dialect::RichCatalog);
        let batch = map_document(&load_tree("huglu-outdoor"), &source);
        let categories = extract_categories(&batch.candidates);
        let names = categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Kamp", "Genel"]);
        let camp = &categories[0];
        assert_eq!(camp.category_tree, "Kamp/Çadırlar");
        assert_eq!(camp.description, "Kamp kategorisi");
        assert_eq!(camp.external_id, "cat_kamp");
        assert_eq!(camp.main_category, "Kamp");
        assert_eq!(camp.sub_categories, vec!["Çadırlar".to_string()]);
        assert_eq!(categories[1].main_category, "Genel");
    }

    #[test]
    fn category_external_id_normalizes_whitespace() {
        assert_eq!(category_external_id("Kamp  Mobilya"), "cat_kamp_mobilya");
        assert_eq!(category_external_id("Outdoor Giyim"), "cat_outdoor_giyim");
    }
}

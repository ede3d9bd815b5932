use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use catsync_core::{
    CanonicalProduct, CategoryRecord, NewProduct, ProductChange, ProductId, TenantId,
    VariationOption,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAxis {
    pub id: i64,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOption {
    pub id: i64,
    pub tenant_id: TenantId,
    pub axis_id: i64,
    pub option: VariationOption,
    pub display_order: i32,
    pub is_active: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tenants: Vec<(TenantId, bool)>,
    products: BTreeMap<ProductId, CanonicalProduct>,
    axes: BTreeMap<i64, StoredAxis>,
    options: BTreeMap<i64, StoredOption>,
    categories: BTreeMap<(TenantId, String), CategoryRecord>,
    next_id: i64,
    product_writes: usize,
    category_writes: usize,
    fail_external_ids: Vec<String>,
    fail_tenant_lookup: bool,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process record store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = (TenantId, bool)>) -> Self {
        let state = MemoryState {
            tenants: tenants.into_iter().collect(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            latency: None,
        }
    }

    /// Adds an artificial delay to every lookup.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every product write for `external_id` fail.
    pub async fn fail_writes_for(&self, external_id: &str) {
        self.state
            .lock()
            .await
            .fail_external_ids
            .push(external_id.to_string());
    }

    /// Makes `find_active_tenants` fail as if the pool were exhausted.
    pub async fn fail_tenant_lookup(&self) {
        self.state.lock().await.fail_tenant_lookup = true;
    }

    pub async fn products(&self, tenant_id: TenantId) -> Vec<CanonicalProduct> {
        self.state
            .lock()
            .await
            .products
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn categories(&self, tenant_id: TenantId) -> Vec<CategoryRecord> {
        self.state
            .lock()
            .await
            .categories
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Axis rows of a product with their options, in display order.
    pub async fn variation_tree(&self, product_id: ProductId) -> Vec<(StoredAxis, Vec<StoredOption>)> {
        let state = self.state.lock().await;
        let mut axes = state
            .axes
            .values()
            .filter(|a| a.product_id == product_id)
            .cloned()
            .collect::<Vec<_>>();
        axes.sort_by_key(|a| a.display_order);
        axes.into_iter()
            .map(|axis| {
                let mut options = state
                    .options
                    .values()
                    .filter(|o| o.axis_id == axis.id)
                    .cloned()
                    .collect::<Vec<_>>();
                options.sort_by_key(|o| o.display_order);
                (axis, options)
            })
            .collect()
    }

    /// Total number of option rows across all products.
    pub async fn option_count(&self) -> usize {
        self.state.lock().await.options.len()
    }

    pub async fn product_writes(&self) -> usize {
        self.state.lock().await.product_writes
    }

    pub async fn category_writes(&self) -> usize {
        self.state.lock().await.category_writes
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_active_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let state = self.state.lock().await;
        if state.fail_tenant_lookup {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state
            .tenants
            .iter()
            .filter(|(_, active)| *active)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn find_product_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<CanonicalProduct>, StoreError> {
        self.simulate_latency().await;
        Ok(self
            .state
            .lock()
            .await
            .products
            .values()
            .find(|p| p.tenant_id == tenant_id && p.external_id == external_id)
            .cloned())
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<ProductId, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_external_ids.contains(&product.external_id) {
            return Err(StoreError::Conflict(product.external_id.clone()));
        }
        if state
            .products
            .values()
            .any(|p| p.tenant_id == product.tenant_id && p.external_id == product.external_id)
        {
            return Err(StoreError::Conflict(format!(
                "{}@{}",
                product.external_id, product.tenant_id
            )));
        }
        let id = ProductId(state.allocate_id());
        state.products.insert(
            id,
            CanonicalProduct {
                id,
                tenant_id: product.tenant_id,
                external_id: product.external_id.clone(),
                source: product.source.clone(),
                name: product.name.clone(),
                description: product.description.clone(),
                price: product.price,
                category: product.category.clone(),
                category_tree: product.category_tree.clone(),
                brand: product.brand.clone(),
                image: product.image.clone(),
                images: product.images.clone(),
                image_slots: product.image_slots.clone(),
                stock: product.stock,
                rating: product.rating,
                review_count: product.review_count,
                has_variations: product.has_variations,
                sku: product.sku.clone(),
                last_updated: product.last_updated,
            },
        );
        state.product_writes += 1;
        Ok(id)
    }

    async fn update_product_fields(
        &self,
        id: ProductId,
        changes: &[ProductChange],
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let failing = state.fail_external_ids.clone();
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        if failing.contains(&product.external_id) {
            return Err(StoreError::Conflict(product.external_id.clone()));
        }
        for change in changes {
            change.apply_to(product);
        }
        product.last_updated = last_updated;
        state.product_writes += 1;
        Ok(())
    }

    async fn delete_variation_children(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let axis_ids = state
            .axes
            .values()
            .filter(|a| a.product_id == product_id && a.tenant_id == tenant_id)
            .map(|a| a.id)
            .collect::<Vec<_>>();
        state.options.retain(|_, o| !axis_ids.contains(&o.axis_id));
        state.axes.retain(|id, _| !axis_ids.contains(id));
        Ok(())
    }

    async fn insert_variation_axis(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        axis_name: &str,
        display_order: i32,
    ) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .axes
            .values()
            .any(|a| a.product_id == product_id && a.tenant_id == tenant_id && a.name == axis_name)
        {
            return Err(StoreError::Conflict(format!("axis {axis_name} on {product_id}")));
        }
        let id = state.allocate_id();
        state.axes.insert(
            id,
            StoredAxis {
                id,
                tenant_id,
                product_id,
                name: axis_name.to_string(),
                display_order,
            },
        );
        Ok(id)
    }

    async fn insert_variation_option(
        &self,
        tenant_id: TenantId,
        axis_id: i64,
        option: &VariationOption,
        display_order: i32,
    ) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        if !state.axes.contains_key(&axis_id) {
            return Err(StoreError::NotFound(format!("variation axis {axis_id}")));
        }
        if state
            .options
            .values()
            .any(|o| o.axis_id == axis_id && o.option.value == option.value)
        {
            return Err(StoreError::Conflict(format!(
                "option {} on axis {axis_id}",
                option.value
            )));
        }
        let id = state.allocate_id();
        state.options.insert(
            id,
            StoredOption {
                id,
                tenant_id,
                axis_id,
                option: option.clone(),
                display_order,
                is_active: true,
            },
        );
        Ok(id)
    }

    async fn find_category_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<CategoryRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .categories
            .get(&(tenant_id, name.to_string()))
            .cloned())
    }

    async fn insert_or_update_category(
        &self,
        tenant_id: TenantId,
        category: &CategoryRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = (tenant_id, category.name.clone());
        match state.categories.get_mut(&key) {
            Some(existing) => {
                existing.description = category.description.clone();
                existing.category_tree = category.category_tree.clone();
                existing.external_id = category.external_id.clone();
            }
            None => {
                state.categories.insert(key, category.clone());
            }
        }
        state.category_writes += 1;
        Ok(())
    }
}

use async_trait::async_trait;
use catsync_core::{
    split_category_tree, CanonicalProduct, CategoryRecord, NewProduct, ProductChange, ProductId,
    TenantId, VariationAxis, VariationOption,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;

use crate::{RecordStore, StoreError};

const PRODUCT_COLUMNS: &str = "id, tenant_id, external_id, source, name, description, price, \
     category, category_tree, brand, image, images, image1, image2, image3, image4, image5, \
     stock, rating, review_count, has_variations, sku, last_updated";

/// Postgres-backed record store.
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn product_from_row(row: &PgRow) -> Result<CanonicalProduct, sqlx::Error> {
    let image_slots = [
        row.try_get::<String, _>("image1")?,
        row.try_get::<String, _>("image2")?,
        row.try_get::<String, _>("image3")?,
        row.try_get::<String, _>("image4")?,
        row.try_get::<String, _>("image5")?,
    ];
    Ok(CanonicalProduct {
        id: ProductId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        external_id: row.try_get("external_id")?,
        source: row.try_get("source")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        category: row.try_get("category")?,
        category_tree: row.try_get("category_tree")?,
        brand: row.try_get("brand")?,
        image: row.try_get("image")?,
        images: row.try_get("images")?,
        image_slots,
        stock: row.try_get("stock")?,
        rating: row.try_get("rating")?,
        review_count: row.try_get("review_count")?,
        has_variations: row.try_get("has_variations")?,
        sku: row.try_get("sku")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn push_change(builder: &mut QueryBuilder<'_, Postgres>, change: &ProductChange) {
    builder.push(change.column()).push(" = ");
    match change {
        ProductChange::Name(v) | ProductChange::Images(v) | ProductChange::Sku(v) => {
            builder.push_bind(v.clone());
        }
        ProductChange::Price(v) => {
            builder.push_bind(*v);
        }
        ProductChange::Stock(v) => {
            builder.push_bind(*v);
        }
        ProductChange::ImageSlot(slot, v) => {
            builder.push_bind(v.clone());
            if *slot == 0 {
                builder.push(", image = ").push_bind(v.clone());
            }
        }
        ProductChange::HasVariations(v) => {
            builder.push_bind(*v);
        }
    }
}

/// `UPDATE products` touching only the changed columns plus `last_updated`.
fn update_product_query(
    id: ProductId,
    changes: &[ProductChange],
    last_updated: DateTime<Utc>,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("UPDATE products SET ");
    for change in changes {
        push_change(&mut builder, change);
        builder.push(", ");
    }
    builder
        .push("last_updated = ")
        .push_bind(last_updated)
        .push(" WHERE id = ")
        .push_bind(id.0);
    builder
}

async fn insert_option<'e, E>(
    executor: E,
    tenant_id: TenantId,
    axis_id: i64,
    option: &VariationOption,
    display_order: i32,
) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO product_variation_options
            (tenant_id, variation_id, value, price_modifier, stock, sku, barcode,
             regular_price, discounted_price, vat_included, vat_rate, currency,
             currency_code, external_id, display_order, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, TRUE)
        RETURNING id
        "#,
    )
    .bind(tenant_id.0)
    .bind(axis_id)
    .bind(&option.value)
    .bind(option.price_modifier)
    .bind(option.stock)
    .bind(&option.sku)
    .bind(&option.barcode)
    .bind(option.regular_price)
    .bind(option.discounted_price)
    .bind(option.vat_included)
    .bind(option.vat_rate)
    .bind(&option.currency)
    .bind(&option.currency_code)
    .bind(&option.external_option_id)
    .bind(display_order)
    .fetch_one(executor)
    .await?;
    row.try_get("id")
}

async fn insert_axis<'e, E>(
    executor: E,
    tenant_id: TenantId,
    product_id: ProductId,
    axis_name: &str,
    display_order: i32,
) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO product_variations (tenant_id, product_id, name, display_order)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(tenant_id.0)
    .bind(product_id.0)
    .bind(axis_name)
    .bind(display_order)
    .fetch_one(executor)
    .await?;
    row.try_get("id")
}

const DELETE_OPTIONS_SQL: &str = r#"
    DELETE FROM product_variation_options
     WHERE variation_id IN (
        SELECT id FROM product_variations WHERE product_id = $1 AND tenant_id = $2
     )
"#;

const DELETE_AXES_SQL: &str =
    "DELETE FROM product_variations WHERE product_id = $1 AND tenant_id = $2";

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_active_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM tenants WHERE is_active = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map(TenantId)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn find_product_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<CanonicalProduct>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE external_id = $1 AND tenant_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(external_id)
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(product_from_row).transpose()?)
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<ProductId, StoreError> {
        let [image1, image2, image3, image4, image5] = &product.image_slots;
        let row = sqlx::query(
            r#"
            INSERT INTO products
                (tenant_id, external_id, source, name, description, price, category,
                 category_tree, brand, image, images, image1, image2, image3, image4, image5,
                 stock, rating, review_count, has_variations, sku, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            RETURNING id
            "#,
        )
        .bind(product.tenant_id.0)
        .bind(&product.external_id)
        .bind(&product.source)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(&product.category)
        .bind(&product.category_tree)
        .bind(&product.brand)
        .bind(&product.image)
        .bind(&product.images)
        .bind(image1)
        .bind(image2)
        .bind(image3)
        .bind(image4)
        .bind(image5)
        .bind(product.stock)
        .bind(product.rating)
        .bind(product.review_count)
        .bind(product.has_variations)
        .bind(&product.sku)
        .bind(product.last_updated)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProductId(row.try_get("id")?))
    }

    async fn update_product_fields(
        &self,
        id: ProductId,
        changes: &[ProductChange],
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut builder = update_product_query(id, changes, last_updated);
        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn delete_variation_children(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<(), StoreError> {
        sqlx::query(DELETE_OPTIONS_SQL)
            .bind(product_id.0)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?;
        sqlx::query(DELETE_AXES_SQL)
            .bind(product_id.0)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_variation_axis(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        axis_name: &str,
        display_order: i32,
    ) -> Result<i64, StoreError> {
        Ok(insert_axis(&self.pool, tenant_id, product_id, axis_name, display_order).await?)
    }

    async fn insert_variation_option(
        &self,
        tenant_id: TenantId,
        axis_id: i64,
        option: &VariationOption,
        display_order: i32,
    ) -> Result<i64, StoreError> {
        Ok(insert_option(&self.pool, tenant_id, axis_id, option, display_order).await?)
    }

    async fn replace_variation_tree(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        axes: &[VariationAxis],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(DELETE_OPTIONS_SQL)
            .bind(product_id.0)
            .bind(tenant_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query(DELETE_AXES_SQL)
            .bind(product_id.0)
            .bind(tenant_id.0)
            .execute(&mut *tx)
            .await?;
        for (axis_order, axis) in axes.iter().enumerate() {
            let axis_id = insert_axis(
                &mut *tx,
                tenant_id,
                product_id,
                &axis.axis_name,
                axis_order as i32,
            )
            .await?;
            for (option_order, option) in axis.options.iter().enumerate() {
                insert_option(&mut *tx, tenant_id, axis_id, option, option_order as i32).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_category_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<CategoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT name, description, category_tree, external_id, source
              FROM categories
             WHERE name = $1 AND tenant_id = $2
            "#,
        )
        .bind(name)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let name: String = row.try_get("name")?;
        let category_tree: String = row.try_get("category_tree")?;
        let mut parts = split_category_tree(&category_tree);
        let main_category = if parts.is_empty() {
            name.clone()
        } else {
            parts.remove(0)
        };
        Ok(Some(CategoryRecord {
            description: row.try_get("description")?,
            external_id: row.try_get("external_id")?,
            source: row.try_get("source")?,
            main_category,
            sub_categories: parts,
            category_tree,
            name,
        }))
    }

    async fn insert_or_update_category(
        &self,
        tenant_id: TenantId,
        category: &CategoryRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO categories (tenant_id, name, description, category_tree, external_id, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name, tenant_id) DO UPDATE
               SET description = EXCLUDED.description,
                   category_tree = EXCLUDED.category_tree,
                   external_id = EXCLUDED.external_id,
                   updated_at = now()
            "#,
        )
        .bind(tenant_id.0)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.category_tree)
        .bind(&category.external_id)
        .bind(&category.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

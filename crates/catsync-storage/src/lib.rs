//! Feed HTTP retrieval + record store seam for the catalog sync engine.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use catsync_core::{
    CanonicalProduct, CategoryRecord, FeedSource, NewProduct, ProductChange, ProductId, TenantId,
    VariationAxis,
};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

mod memory;
mod postgres;

pub use memory::{MemoryRecordStore, StoredAxis, StoredOption};
pub use postgres::PgRecordStore;

pub const CRATE_NAME: &str = "catsync-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("catsync-feed-sync/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Raw feed body with the status it arrived under.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_name: String,
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {source_name} failed: {error}")]
    Request {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("request to {source_name} timed out after {timeout:?}")]
    Timeout {
        source_name: String,
        timeout: Duration,
    },
    #[error("http status {status} from {source_name} ({url})")]
    HttpStatus {
        source_name: String,
        status: u16,
        url: String,
    },
}

/// Retrieval seam; the orchestrator only sees this trait.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<RawDocument, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    async fn fetch_inner(&self, source: &FeedSource) -> Result<RawDocument, FetchError> {
        let request_error = |error: reqwest::Error| {
            if error.is_timeout() {
                FetchError::Timeout {
                    source_name: source.name.clone(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Request {
                    source_name: source.name.clone(),
                    error,
                }
            }
        };

        let resp = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(request_error)?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                source_name: source.name.clone(),
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await.map_err(request_error)?.to_vec();
        debug!(bytes = body.len(), "feed body received");
        Ok(RawDocument {
            source_name: source.name.clone(),
            status,
            final_url,
            body,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    /// Single timed GET; retrying is left to the next scheduled run.
    async fn fetch(&self, source: &FeedSource) -> Result<RawDocument, FetchError> {
        let span = info_span!("feed_fetch", source = %source.name, url = %source.url);
        match tokio::time::timeout(self.timeout, self.fetch_inner(source).instrument(span)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                source_name: source.name.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("duplicate key: {0}")]
    Conflict(String),
    #[error("record store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Relational storage consumed by the reconciliation engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_active_tenants(&self) -> Result<Vec<TenantId>, StoreError>;

    async fn find_product_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<CanonicalProduct>, StoreError>;

    async fn insert_product(&self, product: &NewProduct) -> Result<ProductId, StoreError>;

    /// Writes only the given columns plus `last_updated`.
    async fn update_product_fields(
        &self,
        id: ProductId,
        changes: &[ProductChange],
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn delete_variation_children(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<(), StoreError>;

    async fn insert_variation_axis(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        axis_name: &str,
        display_order: i32,
    ) -> Result<i64, StoreError>;

    async fn insert_variation_option(
        &self,
        tenant_id: TenantId,
        axis_id: i64,
        option: &catsync_core::VariationOption,
        display_order: i32,
    ) -> Result<i64, StoreError>;

    /// Drops every axis/option row of the product and inserts `axes` in order.
    async fn replace_variation_tree(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        axes: &[VariationAxis],
    ) -> Result<(), StoreError> {
        self.delete_variation_children(tenant_id, product_id).await?;
        for (axis_order, axis) in axes.iter().enumerate() {
            let axis_id = self
                .insert_variation_axis(tenant_id, product_id, &axis.axis_name, axis_order as i32)
                .await?;
            for (option_order, option) in axis.options.iter().enumerate() {
                self.insert_variation_option(tenant_id, axis_id, option, option_order as i32)
                    .await?;
            }
        }
        Ok(())
    }

    async fn find_category_by_name(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<CategoryRecord>, StoreError>;

    async fn insert_or_update_category(
        &self,
        tenant_id: TenantId,
        category: &CategoryRecord,
    ) -> Result<(), StoreError>;
}

use std::future::Future;
use std::time::Duration;

use catsync_core::{diff_product, CandidateProduct, CategoryRecord, NewProduct, ProductId, TenantId};
use catsync_storage::{RecordStore, StoreError};
use tracing::debug;

use crate::engine::SyncCounters;
use crate::schedule::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Created(ProductId),
    Updated(ProductId),
    Unchanged(ProductId),
}

impl Reconciled {
    pub fn product_id(&self) -> ProductId {
        match self {
            Reconciled::Created(id) | Reconciled::Updated(id) | Reconciled::Unchanged(id) => *id,
        }
    }
}

/// Compare-and-write of candidates against one record store.
pub struct Reconciler<'a> {
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
    timeout: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn RecordStore, clock: &'a dyn Clock, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Inserts or minimally updates the canonical row, then replaces its variation children.
    ///
    /// `total_products` counts once the lookup succeeded, whatever happens afterwards.
    pub async fn upsert(
        &self,
        tenant_id: TenantId,
        candidate: &CandidateProduct,
        counters: &SyncCounters,
    ) -> Result<Reconciled, StoreError> {
        let existing = self
            .bounded(
                self.store
                    .find_product_by_external_id(tenant_id, &candidate.external_id),
            )
            .await?;
        counters.record_total();

        let now = self.clock.now();
        let outcome = match existing {
            None => {
                let product = NewProduct::from_candidate(tenant_id, candidate, now);
                let id = self.bounded(self.store.insert_product(&product)).await?;
                counters.record_new();
                Reconciled::Created(id)
            }
            Some(existing) => {
                let changes = diff_product(&existing, candidate);
                if changes.is_empty() {
                    Reconciled::Unchanged(existing.id)
                } else {
                    debug!(
                        external_id = %candidate.external_id,
                        columns = ?changes.iter().map(|c| c.column()).collect::<Vec<_>>(),
                        "updating product"
                    );
                    self.bounded(self.store.update_product_fields(existing.id, &changes, now))
                        .await?;
                    counters.record_updated();
                    Reconciled::Updated(existing.id)
                }
            }
        };

        if candidate.has_variations {
            self.bounded(self.store.replace_variation_tree(
                tenant_id,
                outcome.product_id(),
                &candidate.variation_axes,
            ))
            .await?;
        }
        Ok(outcome)
    }

    /// Writes the category unless the stored row already matches. Returns whether it wrote.
    pub async fn upsert_category(
        &self,
        tenant_id: TenantId,
        category: &CategoryRecord,
    ) -> Result<bool, StoreError> {
        let existing = self
            .bounded(self.store.find_category_by_name(tenant_id, &category.name))
            .await?;
        let unchanged = existing.is_some_and(|e| {
            e.description == category.description
                && e.category_tree == category.category_tree
                && e.external_id == category.external_id
        });
        if unchanged {
            return Ok(false);
        }
        self.bounded(self.store.insert_or_update_category(tenant_id, category))
            .await?;
        Ok(true)
    }
}

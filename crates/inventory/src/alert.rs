use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{AlertConfigId, DomainError, DomainResult, ProductId, WarehouseId};

use crate::position::PositionKey;

/// Which positions a low-stock threshold watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AlertScope {
    /// One product in one warehouse.
    Position {
        product_id: ProductId,
        warehouse_id: WarehouseId,
    },
    /// One product across every warehouse.
    Product { product_id: ProductId },
}

impl AlertScope {
    pub fn matches(&self, key: PositionKey) -> bool {
        match self {
            AlertScope::Position {
                product_id,
                warehouse_id,
            } => *product_id == key.product_id && *warehouse_id == key.warehouse_id,
            AlertScope::Product { product_id } => *product_id == key.product_id,
        }
    }
}

/// How an alert is delivered once raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPolicy {
    pub log: bool,
    pub webhook: bool,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            log: true,
            webhook: false,
        }
    }
}

/// Administrator-managed low-stock threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlertConfig {
    pub id: AlertConfigId,
    pub scope: AlertScope,
    pub threshold: i64,
    pub is_active: bool,
    pub notify: NotifyPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LowStockAlertConfig {
    pub fn new(
        scope: AlertScope,
        threshold: i64,
        notify: NotifyPolicy,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if threshold <= 0 {
            return Err(DomainError::validation("threshold must be positive"));
        }
        Ok(Self {
            id: AlertConfigId::new(),
            scope,
            threshold,
            is_active: true,
            notify,
            created_at: at,
            updated_at: at,
        })
    }

    /// Whether the given availability breaches this threshold.
    pub fn breached_by(&self, available: i64) -> bool {
        self.is_active && available <= self.threshold
    }
}

/// Emitted alert record, handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub config_id: AlertConfigId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub available: i64,
    pub threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matching() {
        let product_id = ProductId::new();
        let warehouse_id = WarehouseId::new();
        let key = PositionKey::new(product_id, warehouse_id);

        let exact = AlertScope::Position {
            product_id,
            warehouse_id,
        };
        let product_wide = AlertScope::Product { product_id };
        let other = AlertScope::Position {
            product_id,
            warehouse_id: WarehouseId::new(),
        };

        assert!(exact.matches(key));
        assert!(product_wide.matches(key));
        assert!(!other.matches(key));
    }

    #[test]
    fn threshold_must_be_positive() {
        let scope = AlertScope::Product {
            product_id: ProductId::new(),
        };
        let err =
            LowStockAlertConfig::new(scope, 0, NotifyPolicy::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn breach_boundary_is_inclusive() {
        let scope = AlertScope::Product {
            product_id: ProductId::new(),
        };
        let config =
            LowStockAlertConfig::new(scope, 50, NotifyPolicy::default(), Utc::now()).unwrap();
        assert!(config.breached_by(50));
        assert!(config.breached_by(49));
        assert!(!config.breached_by(51));
    }

    #[test]
    fn inactive_config_never_breaches() {
        let scope = AlertScope::Product {
            product_id: ProductId::new(),
        };
        let mut config =
            LowStockAlertConfig::new(scope, 50, NotifyPolicy::default(), Utc::now()).unwrap();
        config.is_active = false;
        assert!(!config.breached_by(0));
    }
}

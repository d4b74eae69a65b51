//! Infrastructure adapters for the bridge.
//!
//! - [`config`]: TOML + environment configuration.
//! - [`postgres`]: `DocumentCatalog` over a read replica of the ERP.
//! - [`service_layer`]: `BatchTransport` speaking the Service-Layer `$batch` protocol.
//!
//! [`commit_strategy`] picks the write path from configuration so workflows
//! only ever see an `Arc<dyn CommitStrategy>`; [`Workflows::from_config`]
//! builds every workflow over it with the configured bin tracking.

pub mod config;
pub mod postgres;
pub mod service_layer;

use std::sync::Arc;

use tracing::info;

use scanbridge_commit::{
    BarcodeWorkflow, BatchStrategy, BusinessObjectSession, CommitStrategy, CountingWorkflow,
    GoodsReceiptWorkflow, IssueWorkflow, PickingWorkflow, SessionContext,
    StatefulSessionStrategy,
};
use scanbridge_documents::{CatalogError, DocumentCatalog};

pub use config::{BridgeConfig, CommitBackend, ConfigError, ServiceLayerConfig};
pub use postgres::PostgresDocumentCatalog;
pub use service_layer::ServiceLayerTransport;

/// Build the configured commit strategy.
///
/// `session` is only invoked for the session backend; it supplies the
/// business-object session the process owns (one per company database).
pub fn commit_strategy<S, F>(
    config: &BridgeConfig,
    session: F,
) -> Result<Arc<dyn CommitStrategy>, ConfigError>
where
    S: BusinessObjectSession,
    F: FnOnce() -> S,
{
    let strategy: Arc<dyn CommitStrategy> = match config.commit_backend {
        CommitBackend::Session => Arc::new(StatefulSessionStrategy::new(SessionContext::new(
            session(),
        ))),
        CommitBackend::Batch => {
            let transport = ServiceLayerTransport::new(config.service_layer.clone())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            Arc::new(BatchStrategy::new(transport))
        }
    };
    info!(backend = strategy.name(), "commit strategy selected");
    Ok(strategy)
}

/// Every warehouse workflow over one catalog and one commit strategy.
pub struct Workflows<C> {
    pub receipt: GoodsReceiptWorkflow<C>,
    pub issue: IssueWorkflow<C>,
    pub picking: PickingWorkflow<C>,
    pub counting: CountingWorkflow<C>,
    pub barcode: BarcodeWorkflow<C>,
}

impl<C> Workflows<C>
where
    C: DocumentCatalog + Clone,
{
    pub fn from_config(
        config: &BridgeConfig,
        catalog: C,
        strategy: Arc<dyn CommitStrategy>,
    ) -> Self {
        info!(
            bin_tracking = config.bin_tracking,
            backend = strategy.name(),
            "workflows configured"
        );
        Self {
            receipt: GoodsReceiptWorkflow::new(catalog.clone(), strategy.clone())
                .with_bin_tracking(config.bin_tracking),
            issue: IssueWorkflow::new(catalog.clone(), strategy.clone())
                .with_bin_tracking(config.bin_tracking),
            picking: PickingWorkflow::new(catalog.clone(), strategy.clone()),
            counting: CountingWorkflow::new(catalog.clone(), strategy.clone()),
            barcode: BarcodeWorkflow::new(catalog, strategy),
        }
    }
}

/// Connect the read-side catalog named by `database_url`.
pub async fn connect_catalog(config: &BridgeConfig) -> Result<PostgresDocumentCatalog, ConfigError> {
    let Some(url) = config.database_url.as_deref() else {
        return Err(ConfigError::Invalid("database_url is not set".into()));
    };
    PostgresDocumentCatalog::connect(url)
        .await
        .map_err(|e: CatalogError| ConfigError::Invalid(e.to_string()))
}

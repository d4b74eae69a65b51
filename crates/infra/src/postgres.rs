//! Postgres-backed document catalog.
//!
//! Reads a replica of the ERP through a set of flat views. Every filter value
//! is bound as a query parameter; no caller-supplied text reaches the SQL.
//!
//! | view | one row per |
//! |------|-------------|
//! | `scan_items` | item (`alternate_barcodes text[]`, `buy_factor`, `pack_factor`) |
//! | `scan_document_lines` | document line (quantities in base units) |
//! | `scan_documents` | document header |
//! | `scan_pick_lists` | pick list header |
//! | `scan_pick_list_lines` | pick list line (`bins jsonb` as `[{"bin", "quantity"}]`) |
//! | `scan_customers` | business partner (`pack_unit_only`) |
//!
//! ## Error Mapping
//!
//! | SQLx Error | CatalogError |
//! |------------|--------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Unavailable` |
//! | Database, decode, anything else | `Query` |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{Span, instrument};

use scanbridge_core::{
    BinEntry, CardCode, DocEntry, ItemCode, ItemUnitFactors, LineNum, PickListId, WarehouseCode,
};
use scanbridge_documents::{
    CatalogError, DocumentCatalog, DocumentHeader, DocumentLineRecord, DocumentStatus,
    DocumentType, ItemMaster, LineQuery, PickList, PickListLine, PickStatus, StatusFilter,
};

const LINE_COLUMNS: &str = "doc_type, doc_entry, line_num, item_code, warehouse, from_warehouse, \
     card_code, open_quantity, uses_base_unit, status, cancelled, insured, service, created_at";

/// Read-only catalog over the `scan_*` views.
#[derive(Debug, Clone)]
pub struct PostgresDocumentCatalog {
    pool: Arc<PgPool>,
}

impl PostgresDocumentCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DocumentCatalog for PostgresDocumentCatalog {
    #[instrument(skip(self), fields(item = %item_code), err)]
    async fn item(&self, item_code: &ItemCode) -> Result<Option<ItemMaster>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT item_code, primary_barcode, alternate_barcodes, purchasable,
                   buy_factor, pack_factor
            FROM scan_items
            WHERE item_code = $1
            "#,
        )
        .bind(item_code.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("item", e))?;

        row.map(|row| item_from_row(&row)).transpose()
    }

    #[instrument(
        skip(self, query),
        fields(doc_type = %query.doc_type, rows = tracing::field::Empty),
        err
    )]
    async fn document_lines(
        &self,
        query: &LineQuery,
    ) -> Result<Vec<DocumentLineRecord>, CatalogError> {
        let mut builder = line_query(query);
        let rows = builder
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("document_lines", e))?;

        Span::current().record("rows", rows.len());
        rows.iter().map(line_from_row).collect()
    }

    #[instrument(skip(self), fields(doc_type = %doc_type, doc_entry = %doc_entry), err)]
    async fn document_header(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
    ) -> Result<Option<DocumentHeader>, CatalogError> {
        let row = sqlx::query(
            r#"
            SELECT doc_type, doc_entry, doc_num, card_code, status, cancelled,
                   insured, service, created_at
            FROM scan_documents
            WHERE doc_type = $1 AND doc_entry = $2
            "#,
        )
        .bind(doc_type.as_str())
        .bind(doc_entry.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("document_header", e))?;

        row.map(|row| header_from_row(&row)).transpose()
    }

    #[instrument(
        skip(self),
        fields(doc_type = %doc_type, doc_entry = %doc_entry, warehouse = %warehouse),
        err
    )]
    async fn warehouse_open_quantity(
        &self,
        doc_type: DocumentType,
        doc_entry: DocEntry,
        warehouse: &WarehouseCode,
    ) -> Result<i64, CatalogError> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(GREATEST(open_quantity, 0))::BIGINT
            FROM scan_document_lines
            WHERE doc_type = $1 AND doc_entry = $2 AND warehouse = $3
              AND status = 'open' AND NOT cancelled
            "#,
        )
        .bind(doc_type.as_str())
        .bind(doc_entry.get())
        .bind(warehouse.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("warehouse_open_quantity", e))?;

        Ok(total.unwrap_or(0))
    }

    #[instrument(skip(self), fields(pick_list = %id), err)]
    async fn pick_list(&self, id: PickListId) -> Result<Option<PickList>, CatalogError> {
        let Some(header) = sqlx::query("SELECT status FROM scan_pick_lists WHERE abs_entry = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("pick_list", e))?
        else {
            return Ok(None);
        };
        let status = pick_status(&get::<String>(&header, "status")?)?;

        let rows = sqlx::query(
            r#"
            SELECT line_num, source_type, source_entry, source_line, item_code,
                   card_code, source_open_quantity, released_quantity,
                   picked_quantity, status, bins
            FROM scan_pick_list_lines
            WHERE abs_entry = $1
            ORDER BY line_num ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pick_list_lines", e))?;

        let lines = rows
            .iter()
            .map(pick_line_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(PickList { id, status, lines }))
    }

    #[instrument(skip(self), fields(card_code = %card_code), err)]
    async fn customer_requires_pack_unit(
        &self,
        card_code: &CardCode,
    ) -> Result<bool, CatalogError> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT pack_unit_only FROM scan_customers WHERE card_code = $1")
                .bind(card_code.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("customer_requires_pack_unit", e))?;
        Ok(flag.unwrap_or(false))
    }
}

/// `SELECT` over `scan_document_lines` with every set filter bound.
fn line_query(query: &LineQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {LINE_COLUMNS} FROM scan_document_lines"));

    builder.push(" WHERE doc_type = ");
    builder.push_bind(query.doc_type.as_str());

    match query.status {
        StatusFilter::Open => builder.push(" AND status = 'open' AND NOT cancelled"),
        StatusFilter::NotCancelled => builder.push(" AND NOT cancelled"),
    };

    if let Some(item) = &query.item_code {
        builder.push(" AND item_code = ");
        builder.push_bind(item.as_str().to_owned());
    }
    if let Some(warehouse) = &query.warehouse {
        builder.push(" AND warehouse = ");
        builder.push_bind(warehouse.as_str().to_owned());
    }
    if let Some(from) = &query.from_warehouse {
        builder.push(" AND from_warehouse = ");
        builder.push_bind(from.as_str().to_owned());
    }
    if let Some(card) = &query.card_code {
        builder.push(" AND card_code = ");
        builder.push_bind(card.as_str().to_owned());
    }
    match query.doc_entries.as_deref() {
        Some([]) => {
            builder.push(" AND FALSE");
        }
        Some(entries) => {
            let entries: Vec<i64> = entries.iter().map(|e| e.get()).collect();
            builder.push(" AND doc_entry = ANY(");
            builder.push_bind(entries);
            builder.push(")");
        }
        None => {}
    }
    if let Some(insured) = query.insured {
        builder.push(" AND insured = ");
        builder.push_bind(insured);
    }
    if query.service_only {
        builder.push(" AND service");
    }

    builder
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, CatalogError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| CatalogError::Query(format!("failed to decode {column}: {e}")))
}

fn item_from_row(row: &PgRow) -> Result<ItemMaster, CatalogError> {
    let factors = ItemUnitFactors::new(get(row, "buy_factor")?, get(row, "pack_factor")?)
        .map_err(|e| CatalogError::Query(e.to_string()))?;
    Ok(ItemMaster {
        item_code: ItemCode::from(get::<String>(row, "item_code")?.as_str()),
        primary_barcode: get(row, "primary_barcode")?,
        alternate_barcodes: get::<Option<Vec<String>>>(row, "alternate_barcodes")?
            .unwrap_or_default(),
        purchasable: get(row, "purchasable")?,
        factors,
    })
}

fn line_from_row(row: &PgRow) -> Result<DocumentLineRecord, CatalogError> {
    Ok(DocumentLineRecord {
        doc_type: document_type(&get::<String>(row, "doc_type")?)?,
        doc_entry: DocEntry::new(get(row, "doc_entry")?),
        line_num: LineNum::new(get(row, "line_num")?),
        item_code: ItemCode::from(get::<String>(row, "item_code")?.as_str()),
        warehouse: WarehouseCode::from(get::<String>(row, "warehouse")?.as_str()),
        from_warehouse: get::<Option<String>>(row, "from_warehouse")?
            .map(|w| WarehouseCode::from(w.as_str())),
        card_code: card_code(get(row, "card_code")?),
        open_quantity: get(row, "open_quantity")?,
        uses_base_unit: get(row, "uses_base_unit")?,
        status: document_status(&get::<String>(row, "status")?)?,
        cancelled: get(row, "cancelled")?,
        insured: get(row, "insured")?,
        service: get(row, "service")?,
        created_at: get::<DateTime<Utc>>(row, "created_at")?,
    })
}

fn header_from_row(row: &PgRow) -> Result<DocumentHeader, CatalogError> {
    Ok(DocumentHeader {
        doc_type: document_type(&get::<String>(row, "doc_type")?)?,
        doc_entry: DocEntry::new(get(row, "doc_entry")?),
        doc_num: get(row, "doc_num")?,
        card_code: card_code(get(row, "card_code")?),
        status: document_status(&get::<String>(row, "status")?)?,
        cancelled: get(row, "cancelled")?,
        insured: get(row, "insured")?,
        service: get(row, "service")?,
        created_at: get(row, "created_at")?,
    })
}

#[derive(Deserialize)]
struct BinRow {
    bin: i32,
    quantity: i64,
}

fn pick_line_from_row(row: &PgRow) -> Result<PickListLine, CatalogError> {
    let bins: Vec<BinRow> = serde_json::from_value(get::<serde_json::Value>(row, "bins")?)
        .map_err(|e| CatalogError::Query(format!("failed to decode bins: {e}")))?;
    let mut merged = BTreeMap::new();
    for BinRow { bin, quantity } in bins {
        *merged.entry(BinEntry::new(bin)).or_insert(0) += quantity;
    }

    Ok(PickListLine {
        line_num: LineNum::new(get(row, "line_num")?),
        source_type: document_type(&get::<String>(row, "source_type")?)?,
        source_entry: DocEntry::new(get(row, "source_entry")?),
        source_line: LineNum::new(get(row, "source_line")?),
        item_code: ItemCode::from(get::<String>(row, "item_code")?.as_str()),
        card_code: card_code(get(row, "card_code")?),
        source_open_quantity: get(row, "source_open_quantity")?,
        released_quantity: get(row, "released_quantity")?,
        picked_quantity: get(row, "picked_quantity")?,
        status: pick_status(&get::<String>(row, "status")?)?,
        bins: merged,
    })
}

fn card_code(value: Option<String>) -> Option<CardCode> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| CardCode::from(v.as_str()))
}

fn document_type(value: &str) -> Result<DocumentType, CatalogError> {
    const ALL: [DocumentType; 6] = [
        DocumentType::PurchaseOrder,
        DocumentType::PurchaseGoodsReceipt,
        DocumentType::ApInvoice,
        DocumentType::ReserveInvoice,
        DocumentType::SalesOrder,
        DocumentType::TransferRequest,
    ];
    ALL.into_iter()
        .find(|t| t.as_str() == value)
        .ok_or_else(|| CatalogError::Query(format!("unknown document type `{value}`")))
}

fn document_status(value: &str) -> Result<DocumentStatus, CatalogError> {
    match value {
        "open" => Ok(DocumentStatus::Open),
        "closed" => Ok(DocumentStatus::Closed),
        other => Err(CatalogError::Query(format!("unknown document status `{other}`"))),
    }
}

fn pick_status(value: &str) -> Result<PickStatus, CatalogError> {
    match value {
        "released" => Ok(PickStatus::Released),
        "partially_picked" => Ok(PickStatus::PartiallyPicked),
        "picked" => Ok(PickStatus::Picked),
        "closed" => Ok(PickStatus::Closed),
        other => Err(CatalogError::Query(format!("unknown pick status `{other}`"))),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) => CatalogError::Query(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            CatalogError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => CatalogError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => CatalogError::Unavailable(format!("tls error in {operation}: {e}")),
        other => CatalogError::Query(format!("{operation}: {other}")),
    }
}

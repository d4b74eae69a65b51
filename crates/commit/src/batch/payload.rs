//! Service-Layer resource names and JSON bodies for business objects.

use serde_json::{Map, Value, json};

use scanbridge_allocation::BinAllocations;
use scanbridge_core::UnitOfMeasure;
use scanbridge_documents::PickStatus;

use super::{BatchMethod, BatchOperation};
use crate::object::{
    BarcodeUpdate, BusinessObject, DocumentDraft, DraftLine, PickListUpdate, TargetDocumentKind,
};

pub(crate) fn operation_for(object: &BusinessObject) -> BatchOperation {
    match object {
        BusinessObject::Document(draft) => BatchOperation::new(
            BatchMethod::Post,
            document_resource(draft.kind),
            Some(document_body(draft)),
        ),
        BusinessObject::PickList(update) => BatchOperation::new(
            BatchMethod::Patch,
            format!("PickLists({})", update.pick_list),
            Some(pick_list_body(update)),
        ),
        BusinessObject::ItemBarcode(update) => BatchOperation::new(
            BatchMethod::Patch,
            format!("Items('{}')", update.item_code.as_str().replace('\'', "''")),
            Some(barcode_body(update)),
        ),
    }
}

fn document_resource(kind: TargetDocumentKind) -> &'static str {
    match kind {
        TargetDocumentKind::GoodsReceiptPo => "PurchaseDeliveryNotes",
        TargetDocumentKind::GoodsReceipt => "InventoryGenEntries",
        TargetDocumentKind::Delivery => "DeliveryNotes",
        TargetDocumentKind::StockTransfer => "StockTransfers",
        TargetDocumentKind::InventoryCounting => "InventoryCountings",
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "tYES" } else { "tNO" }
}

fn bin_body(bins: &BinAllocations, extra: Option<(&str, &str)>) -> Vec<Value> {
    bins.iter()
        .map(|(bin, qty)| {
            let mut entry = json!({ "BinAbsEntry": bin.get(), "Quantity": qty });
            if let (Some((key, value)), Some(obj)) = (extra, entry.as_object_mut()) {
                obj.insert(key.to_string(), Value::from(value));
            }
            entry
        })
        .collect()
}

fn document_line(kind: TargetDocumentKind, line: &DraftLine) -> Value {
    let mut body = Map::new();
    body.insert("ItemCode".into(), Value::from(line.item_code.as_str()));
    if let Some(warehouse) = &line.warehouse {
        body.insert("WarehouseCode".into(), Value::from(warehouse.as_str()));
    }

    if kind == TargetDocumentKind::InventoryCounting {
        body.insert("CountedQuantity".into(), Value::from(line.quantity));
        body.insert("Counted".into(), Value::from("tYES"));
        if let Some(bin) = line.bins.keys().next() {
            body.insert("BinEntry".into(), Value::from(bin.get()));
        }
        return Value::Object(body);
    }

    body.insert("Quantity".into(), Value::from(line.quantity));
    body.insert(
        "UseBaseUnits".into(),
        Value::from(yes_no(line.unit == UnitOfMeasure::Base)),
    );
    if let Some(base) = &line.base_line {
        body.insert("BaseType".into(), Value::from(base.doc_type.object_type()));
        body.insert("BaseEntry".into(), Value::from(base.doc_entry.get()));
        body.insert("BaseLine".into(), Value::from(base.line_num.get()));
    }

    let (bins_key, action) = match kind {
        TargetDocumentKind::StockTransfer => (
            "StockTransferLinesBinAllocations",
            Some(("BinActionType", "batFromWarehouse")),
        ),
        _ => ("DocumentLinesBinAllocations", None),
    };
    if !line.bins.is_empty() {
        body.insert(bins_key.into(), Value::from(bin_body(&line.bins, action)));
    }
    Value::Object(body)
}

fn document_body(draft: &DocumentDraft) -> Value {
    let lines_key = match draft.kind {
        TargetDocumentKind::StockTransfer => "StockTransferLines",
        TargetDocumentKind::InventoryCounting => "InventoryCountingLines",
        _ => "DocumentLines",
    };

    let mut body = Map::new();
    if let Some(card) = &draft.card_code {
        body.insert("CardCode".into(), Value::from(card.as_str()));
    }
    if let Some(from) = &draft.from_warehouse {
        body.insert("FromWarehouse".into(), Value::from(from.as_str()));
    }
    body.insert(
        lines_key.into(),
        Value::from(
            draft
                .lines
                .iter()
                .map(|l| document_line(draft.kind, l))
                .collect::<Vec<_>>(),
        ),
    );
    Value::Object(body)
}

fn pick_status(status: PickStatus) -> &'static str {
    match status {
        PickStatus::Released => "ps_Released",
        PickStatus::PartiallyPicked => "ps_PartiallyPicked",
        PickStatus::Picked => "ps_Picked",
        PickStatus::Closed => "ps_Closed",
    }
}

fn pick_list_body(update: &PickListUpdate) -> Value {
    let lines: Vec<Value> = update
        .lines
        .iter()
        .map(|l| {
            json!({
                "LineNumber": l.line_num.get(),
                "ReleasedQuantity": l.released_quantity,
                "PickedQuantity": l.picked_quantity,
                "PickStatus": pick_status(l.status),
                "DocumentLinesBinAllocations": bin_body(&l.bins, None),
            })
        })
        .collect();
    json!({ "Absoluteentry": update.pick_list.get(), "PickListsLines": lines })
}

fn barcode_body(update: &BarcodeUpdate) -> Value {
    json!({ "ItemBarCodeCollection": [{ "Barcode": update.barcode }] })
}

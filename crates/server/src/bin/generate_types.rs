use std::{fs, path::PathBuf};

use db::models::{
    client::{Client, CreateClient, PortalProfile, UpdateClient},
    company_settings::{CompanySettings, UpdateCompanySettings},
    growatt::{GrowattPlantCache, GrowattSyncRun},
    invoice::{
        CreateInvoice, Invoice, InvoiceItem, InvoiceItemInput, InvoiceStatus, InvoiceTotals,
        InvoiceWithItems,
    },
    maintenance::{
        CreateMaintenanceSchedule, CreateMaintenanceVisit, MaintenanceFrequency,
        MaintenanceSchedule, MaintenanceVisit, ServiceType, UpdateMaintenanceSchedule,
        VisitFilter, VisitStatus,
    },
    notification::Notification,
    order::{
        CreateOrder, Order, OrderItem, OrderItemInput, OrderStatus, OrderStatusCount,
        OrderWithItems, UpdateOrder,
    },
    product::{
        CreateProduct, Product, ProductCategory, StockAdjustment, StockMovement,
        StockMovementKind, UpdateProduct,
    },
    technician::{CreateTechnician, Technician, UpdateTechnician},
};
use server::routes::{
    invoices::ReplaceInvoiceItems,
    orders::{ChangeOrderStatus, ReplaceOrderItems},
};
use services::services::{
    dashboard::{DashboardSummary, SolarSummary},
    growatt_sync::{PlantSnapshot, SolarOverview},
    invoicing::{CancelInvoice, InvoiceFromOrder},
    maintenance::{GeneratedVisit, RescheduleVisit, UpdateVisitStatus},
    scheduling::{Booking, SlotSuggestion, TechnicianAvailability},
};
use ts_rs::TS;
use utils::response::ApiResponse;

fn generate_types_content() -> String {
    let decls = [
        Client::decl(),
        CreateClient::decl(),
        UpdateClient::decl(),
        PortalProfile::decl(),
        CompanySettings::decl(),
        UpdateCompanySettings::decl(),
        ProductCategory::decl(),
        StockMovementKind::decl(),
        Product::decl(),
        CreateProduct::decl(),
        UpdateProduct::decl(),
        StockAdjustment::decl(),
        StockMovement::decl(),
        OrderStatus::decl(),
        Order::decl(),
        OrderItem::decl(),
        OrderWithItems::decl(),
        OrderItemInput::decl(),
        CreateOrder::decl(),
        UpdateOrder::decl(),
        OrderStatusCount::decl(),
        ReplaceOrderItems::decl(),
        ChangeOrderStatus::decl(),
        InvoiceStatus::decl(),
        Invoice::decl(),
        InvoiceItem::decl(),
        InvoiceWithItems::decl(),
        InvoiceItemInput::decl(),
        CreateInvoice::decl(),
        InvoiceTotals::decl(),
        InvoiceFromOrder::decl(),
        CancelInvoice::decl(),
        ReplaceInvoiceItems::decl(),
        Technician::decl(),
        CreateTechnician::decl(),
        UpdateTechnician::decl(),
        Booking::decl(),
        SlotSuggestion::decl(),
        TechnicianAvailability::decl(),
        MaintenanceFrequency::decl(),
        ServiceType::decl(),
        VisitStatus::decl(),
        MaintenanceSchedule::decl(),
        CreateMaintenanceSchedule::decl(),
        UpdateMaintenanceSchedule::decl(),
        MaintenanceVisit::decl(),
        CreateMaintenanceVisit::decl(),
        VisitFilter::decl(),
        RescheduleVisit::decl(),
        UpdateVisitStatus::decl(),
        GeneratedVisit::decl(),
        Notification::decl(),
        GrowattPlantCache::decl(),
        GrowattSyncRun::decl(),
        PlantSnapshot::decl(),
        SolarOverview::decl(),
        DashboardSummary::decl(),
        SolarSummary::decl(),
        ApiResponse::<()>::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|d| {
            let trimmed = d.trim_start();
            if trimmed.starts_with("export") {
                trimmed.to_string()
            } else {
                format!("export {trimmed}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "// This file was generated by `cargo run --bin generate_types`. Do not edit it by hand.\n\n{body}\n"
    )
}

fn main() {
    let content = generate_types_content();
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!("Failed to create {}: {}", parent.display(), e);
                    std::process::exit(1);
                }
            }
            if let Err(e) = fs::write(&path, content) {
                eprintln!("Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
            println!("Wrote {}", path.display());
        }
        None => print!("{content}"),
    }
}

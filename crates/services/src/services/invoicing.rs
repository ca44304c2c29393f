//! CFDI invoices: drafts, stamping through the PAC and cancellation.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use db::{
    DBService,
    models::{
        client::Client,
        company_settings::CompanySettings,
        invoice::{
            CreateInvoice, Invoice, InvoiceHeader, InvoiceItem, InvoiceItemInput, InvoiceStatus,
            InvoiceWithItems,
        },
        order::{Order, OrderItem, OrderStatus},
        product::Product,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::facturalo::{CfdiPayload, Concepto, FacturaloError, Impuestos, Receptor, Traslado, pesos};

/// SAT cancellation motives
const CANCELLATION_MOTIVES: [&str; 4] = ["01", "02", "03", "04"];
/// Motive that replaces the invoice with another one
const MOTIVE_WITH_SUBSTITUTE: &str = "01";

#[derive(Debug, Error)]
pub enum InvoicingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),
    #[error("client {0} not found")]
    ClientNotFound(Uuid),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("invoice is {status}; cannot {action}")]
    InvalidStatus {
        status: InvoiceStatus,
        action: &'static str,
    },
    #[error("client has no RFC; it is required to stamp")]
    MissingRfc,
    #[error("invoice has no items")]
    NoItems,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("PAC error: {0}")]
    Pac(#[from] FacturaloError),
}

/// What the PAC hands back for a stamped CFDI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedCfdi {
    pub fiscal_uuid: String,
    pub pac_uid: String,
}

#[async_trait]
pub trait InvoiceStamper: Send + Sync {
    async fn stamp(&self, payload: &CfdiPayload) -> Result<StampedCfdi, FacturaloError>;

    async fn cancel(
        &self,
        pac_uid: &str,
        motive: &str,
        substitute_uuid: Option<&str>,
    ) -> Result<(), FacturaloError>;
}

/// Stamper used when no PAC credentials are configured
pub struct UnconfiguredStamper;

#[async_trait]
impl InvoiceStamper for UnconfiguredStamper {
    async fn stamp(&self, _payload: &CfdiPayload) -> Result<StampedCfdi, FacturaloError> {
        Err(FacturaloError::MissingCredentials)
    }

    async fn cancel(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), FacturaloError> {
        Err(FacturaloError::MissingCredentials)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CancelInvoice {
    /// SAT motive, `01` to `04`
    pub motive: String,
    /// Fiscal UUID of the replacing invoice, required for motive `01`
    pub substitute_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct InvoiceFromOrder {
    pub series: Option<String>,
    pub payment_form: Option<String>,
    pub payment_method: Option<String>,
}

fn validate_items(items: &[InvoiceItemInput]) -> Result<(), InvoicingError> {
    for item in items {
        if item.description.trim().is_empty() {
            return Err(InvoicingError::Validation(
                "item description is required".to_string(),
            ));
        }
        if item.quantity.is_nan() || item.quantity <= 0.0 {
            return Err(InvoicingError::Validation(format!(
                "quantity must be positive, got {}",
                item.quantity
            )));
        }
        if item.unit_price < 0 || item.discount.is_some_and(|d| d < 0) {
            return Err(InvoicingError::Validation(
                "prices and discounts cannot be negative".to_string(),
            ));
        }
        if item.tax_rate.is_some_and(|r| !(0.0..=1.0).contains(&r)) {
            return Err(InvoicingError::Validation(
                "tax_rate must be between 0 and 1".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_cancellation(data: &CancelInvoice) -> Result<(), InvoicingError> {
    if !CANCELLATION_MOTIVES.contains(&data.motive.as_str()) {
        return Err(InvoicingError::Validation(format!(
            "unknown cancellation motive {}",
            data.motive
        )));
    }
    let has_substitute = data
        .substitute_uuid
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if data.motive == MOTIVE_WITH_SUBSTITUTE && !has_substitute {
        return Err(InvoicingError::Validation(
            "motive 01 requires the substitute invoice UUID".to_string(),
        ));
    }
    Ok(())
}

fn with_default_rate(items: &[InvoiceItemInput], rate: f64) -> Vec<InvoiceItemInput> {
    items
        .iter()
        .cloned()
        .map(|mut item| {
            item.tax_rate.get_or_insert(rate);
            item
        })
        .collect()
}

/// Build the CFDI body the PAC expects
pub fn build_payload(
    invoice: &Invoice,
    items: &[InvoiceItem],
    client: &Client,
    settings: &CompanySettings,
) -> Result<CfdiPayload, InvoicingError> {
    let rfc = client
        .rfc
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or(InvoicingError::MissingRfc)?;
    if items.is_empty() {
        return Err(InvoicingError::NoItems);
    }

    let conceptos = items
        .iter()
        .map(|item| {
            let amount = item.amount();
            Concepto {
                clave_prod_serv: item.sat_product_code.clone(),
                clave_unidad: item.sat_unit_code.clone(),
                cantidad: item.quantity,
                descripcion: item.description.clone(),
                valor_unitario: pesos(item.unit_price),
                importe: pesos(amount + item.discount),
                descuento: pesos(item.discount),
                impuestos: Impuestos {
                    traslados: vec![Traslado::iva(amount, item.tax_rate, item.tax())],
                },
            }
        })
        .collect();

    Ok(CfdiPayload {
        receptor: Receptor {
            rfc: rfc.to_uppercase(),
            nombre: client.name.to_uppercase(),
            regimen_fiscal: client.tax_regime.clone(),
            domicilio_fiscal: client.postal_code.clone(),
            uso_cfdi: invoice.cfdi_use.clone(),
        },
        tipo_documento: "factura".to_string(),
        conceptos,
        uso_cfdi: invoice.cfdi_use.clone(),
        serie: invoice.series.clone(),
        folio: invoice.folio,
        forma_pago: invoice.payment_form.clone(),
        metodo_pago: invoice.payment_method.clone(),
        moneda: invoice.currency.clone(),
        lugar_expedicion: settings.postal_code.clone(),
        enviar_correo: false,
    })
}

/// Invoices with a PAC stamp call in flight. Dropping the claim releases it.
struct StampClaim {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    invoice_id: Uuid,
}

impl StampClaim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<Uuid>>>, invoice_id: Uuid) -> Option<Self> {
        let claimed = in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(invoice_id);
        claimed.then(|| Self {
            in_flight: in_flight.clone(),
            invoice_id,
        })
    }
}

impl Drop for StampClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.invoice_id);
    }
}

#[derive(Clone)]
pub struct InvoicingService {
    db: DBService,
    stamper: Arc<dyn InvoiceStamper>,
    stamping: Arc<Mutex<HashSet<Uuid>>>,
}

impl InvoicingService {
    pub fn new(db: DBService, stamper: Arc<dyn InvoiceStamper>) -> Self {
        Self {
            db,
            stamper,
            stamping: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    async fn current_status(&self, invoice_id: Uuid) -> Result<InvoiceStatus, InvoicingError> {
        Ok(Invoice::find_by_id(&self.db.pool, invoice_id)
            .await?
            .ok_or(InvoicingError::InvoiceNotFound(invoice_id))?
            .status)
    }

    async fn load(&self, invoice_id: Uuid) -> Result<InvoiceWithItems, InvoicingError> {
        Invoice::find_with_items(&self.db.pool, invoice_id)
            .await?
            .ok_or(InvoicingError::InvoiceNotFound(invoice_id))
    }

    pub async fn create_draft(
        &self,
        data: &CreateInvoice,
    ) -> Result<InvoiceWithItems, InvoicingError> {
        validate_items(&data.items)?;
        let client = Client::find_by_id(&self.db.pool, data.client_id)
            .await?
            .ok_or(InvoicingError::ClientNotFound(data.client_id))?;
        let settings = CompanySettings::get(&self.db.pool).await?;

        let header = InvoiceHeader {
            client_id: client.id,
            order_id: data.order_id,
            series: data.series.clone().unwrap_or(settings.invoice_series.clone()),
            payment_form: data
                .payment_form
                .clone()
                .unwrap_or(settings.default_payment_form.clone()),
            payment_method: data
                .payment_method
                .clone()
                .unwrap_or(settings.default_payment_method.clone()),
            cfdi_use: data.cfdi_use.clone().unwrap_or(client.cfdi_use.clone()),
        };
        let items = with_default_rate(&data.items, settings.default_tax_rate);
        self.insert_draft(&header, &items).await
    }

    /// Draft an invoice with one line per order item
    pub async fn create_from_order(
        &self,
        order_id: Uuid,
        options: &InvoiceFromOrder,
    ) -> Result<InvoiceWithItems, InvoicingError> {
        let order = Order::find_by_id(&self.db.pool, order_id)
            .await?
            .ok_or(InvoicingError::OrderNotFound(order_id))?;
        if order.status == OrderStatus::Cancelled {
            return Err(InvoicingError::Validation(
                "cannot invoice a cancelled order".to_string(),
            ));
        }
        let client = Client::find_by_id(&self.db.pool, order.client_id)
            .await?
            .ok_or(InvoicingError::ClientNotFound(order.client_id))?;
        let settings = CompanySettings::get(&self.db.pool).await?;

        let order_items = OrderItem::find_by_order_id(&self.db.pool, order_id).await?;
        let mut items = Vec::with_capacity(order_items.len());
        for order_item in &order_items {
            let product = Product::find_by_id(&self.db.pool, order_item.product_id)
                .await?
                .ok_or_else(|| {
                    InvoicingError::Validation(format!(
                        "product {} no longer exists",
                        order_item.product_id
                    ))
                })?;
            items.push(InvoiceItemInput {
                product_id: Some(product.id),
                sat_product_code: product.sat_product_code,
                sat_unit_code: product.sat_unit_code,
                description: product.name,
                quantity: order_item.quantity as f64,
                unit_price: order_item.unit_price,
                discount: None,
                tax_rate: Some(settings.default_tax_rate),
            });
        }

        let header = InvoiceHeader {
            client_id: client.id,
            order_id: Some(order_id),
            series: options.series.clone().unwrap_or(settings.invoice_series.clone()),
            payment_form: options
                .payment_form
                .clone()
                .unwrap_or(settings.default_payment_form.clone()),
            payment_method: options
                .payment_method
                .clone()
                .unwrap_or(settings.default_payment_method.clone()),
            cfdi_use: client.cfdi_use.clone(),
        };
        self.insert_draft(&header, &items).await
    }

    async fn insert_draft(
        &self,
        header: &InvoiceHeader,
        items: &[InvoiceItemInput],
    ) -> Result<InvoiceWithItems, InvoicingError> {
        let invoice_id = Uuid::new_v4();
        let mut tx = self.db.pool.begin().await?;
        let invoice = Invoice::create_draft(&mut tx, header, items, invoice_id).await?;
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            series = %invoice.series,
            folio = invoice.folio,
            total = invoice.total,
            "Invoice draft created"
        );
        let items = InvoiceItem::find_by_invoice_id(&self.db.pool, invoice_id).await?;
        Ok(InvoiceWithItems { invoice, items })
    }

    pub async fn replace_items(
        &self,
        invoice_id: Uuid,
        items: &[InvoiceItemInput],
    ) -> Result<InvoiceWithItems, InvoicingError> {
        validate_items(items)?;
        let existing = self.load(invoice_id).await?;
        if existing.status != InvoiceStatus::Draft {
            return Err(InvoicingError::InvalidStatus {
                status: existing.status,
                action: "edit items",
            });
        }
        let settings = CompanySettings::get(&self.db.pool).await?;
        let items = with_default_rate(items, settings.default_tax_rate);

        let mut tx = self.db.pool.begin().await?;
        let invoice = Invoice::write_items(&mut tx, invoice_id, &items).await?;
        tx.commit().await?;

        let items = InvoiceItem::find_by_invoice_id(&self.db.pool, invoice_id).await?;
        Ok(InvoiceWithItems { invoice, items })
    }

    /// Send a draft to the PAC. On any PAC failure the invoice stays a draft. Only one
    /// stamp call per invoice is in flight at a time.
    pub async fn stamp(&self, invoice_id: Uuid) -> Result<Invoice, InvoicingError> {
        let _claim = StampClaim::acquire(&self.stamping, invoice_id).ok_or(
            InvoicingError::InvalidStatus {
                status: InvoiceStatus::Draft,
                action: "stamp while another stamp is in progress",
            },
        )?;
        let InvoiceWithItems { invoice, items } = self.load(invoice_id).await?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(InvoicingError::InvalidStatus {
                status: invoice.status,
                action: "stamp",
            });
        }
        let client = Client::find_by_id(&self.db.pool, invoice.client_id)
            .await?
            .ok_or(InvoicingError::ClientNotFound(invoice.client_id))?;
        let settings = CompanySettings::get(&self.db.pool).await?;
        let payload = build_payload(&invoice, &items, &client, &settings)?;

        let stamped = match self.stamper.stamp(&payload).await {
            Ok(stamped) => stamped,
            Err(e) => {
                warn!(
                    invoice_id = %invoice_id,
                    series = %invoice.series,
                    folio = invoice.folio,
                    error = %e,
                    "Stamping failed, invoice stays draft"
                );
                return Err(e.into());
            }
        };

        let Some(invoice) = Invoice::mark_stamped(
            &self.db.pool,
            invoice_id,
            &stamped.fiscal_uuid,
            &stamped.pac_uid,
        )
        .await?
        else {
            let status = self.current_status(invoice_id).await?;
            error!(
                invoice_id = %invoice_id,
                fiscal_uuid = %stamped.fiscal_uuid,
                status = %status,
                "PAC stamped an invoice that is no longer a draft"
            );
            return Err(InvoicingError::InvalidStatus {
                status,
                action: "record the stamp",
            });
        };
        info!(
            invoice_id = %invoice_id,
            fiscal_uuid = %stamped.fiscal_uuid,
            "Invoice stamped"
        );
        Ok(invoice)
    }

    pub async fn cancel(
        &self,
        invoice_id: Uuid,
        data: &CancelInvoice,
    ) -> Result<Invoice, InvoicingError> {
        validate_cancellation(data)?;
        let invoice = Invoice::find_by_id(&self.db.pool, invoice_id)
            .await?
            .ok_or(InvoicingError::InvoiceNotFound(invoice_id))?;

        let substitute = data.substitute_uuid.as_deref().filter(|s| !s.trim().is_empty());
        let reason = match substitute {
            Some(uuid) => format!("{} (sustituye {})", data.motive, uuid),
            None => data.motive.clone(),
        };

        match invoice.status {
            InvoiceStatus::Draft => {
                // a draft on its way to the PAC cannot be cancelled underneath it
                if self
                    .stamping
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .contains(&invoice_id)
                {
                    return Err(InvoicingError::InvalidStatus {
                        status: invoice.status,
                        action: "cancel while it is being stamped",
                    });
                }
            }
            InvoiceStatus::Stamped => {
                let pac_uid = invoice.pac_uid.as_deref().ok_or_else(|| {
                    InvoicingError::Validation("stamped invoice has no PAC uid".to_string())
                })?;
                self.stamper.cancel(pac_uid, &data.motive, substitute).await?;
            }
            InvoiceStatus::Cancelled => {
                return Err(InvoicingError::InvalidStatus {
                    status: invoice.status,
                    action: "cancel",
                });
            }
        }

        let Some(cancelled) =
            Invoice::mark_cancelled(&self.db.pool, invoice_id, invoice.status, Some(&reason))
                .await?
        else {
            return Err(InvoicingError::InvalidStatus {
                status: self.current_status(invoice_id).await?,
                action: "cancel",
            });
        };
        info!(
            invoice_id = %invoice_id,
            motive = %data.motive,
            was = %invoice.status,
            "Invoice cancelled"
        );
        Ok(cancelled)
    }

    pub async fn delete(&self, invoice_id: Uuid) -> Result<(), InvoicingError> {
        let invoice = Invoice::find_by_id(&self.db.pool, invoice_id)
            .await?
            .ok_or(InvoicingError::InvoiceNotFound(invoice_id))?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(InvoicingError::InvalidStatus {
                status: invoice.status,
                action: "delete",
            });
        }
        Invoice::delete(&self.db.pool, invoice_id).await?;
        Ok(())
    }
}

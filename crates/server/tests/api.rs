use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use db::DBService;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{DeploymentImpl, app};
use services::services::{
    config::Config,
    facturalo::{CfdiPayload, FacturaloError},
    growatt::{GrowattApi, GrowattError, LoginToken, PlantOverview, PlantSummary},
    invoicing::{InvoiceStamper, StampedCfdi},
};
use tower::ServiceExt;

struct FakeStamper;

#[async_trait]
impl InvoiceStamper for FakeStamper {
    async fn stamp(&self, payload: &CfdiPayload) -> Result<StampedCfdi, FacturaloError> {
        Ok(StampedCfdi {
            fiscal_uuid: format!("UUID-{}-{}", payload.serie, payload.folio),
            pac_uid: format!("uid-{}", payload.folio),
        })
    }

    async fn cancel(&self, _: &str, _: &str, _: Option<&str>) -> Result<(), FacturaloError> {
        Ok(())
    }
}

struct FakeGrowatt;

#[async_trait]
impl GrowattApi for FakeGrowatt {
    async fn login(&self, _: &str, _: &str) -> Result<LoginToken, GrowattError> {
        Ok(LoginToken {
            token: "tok".to_string(),
            expires_in: 3600,
        })
    }

    async fn list_plants(&self, _: &str) -> Result<Vec<PlantSummary>, GrowattError> {
        Ok(vec![PlantSummary {
            plant_id: "4242".to_string(),
            name: "Rancho El Sol".to_string(),
            city: Some("Hermosillo".to_string()),
            peak_power: Some(12.5),
        }])
    }

    async fn plant_overview(&self, _: &str, _: &str) -> Result<PlantOverview, GrowattError> {
        Ok(PlantOverview {
            current_power: Some(3400.0),
            today_energy: Some(21.3),
            total_energy: Some(18000.0),
            last_update_time: Some("2026-10-16 12:00:00".to_string()),
            status: Some("1".to_string()),
        })
    }
}

async fn test_app_with(config: Config) -> Router {
    let db = DBService::new_in_memory().await.unwrap();
    let deployment =
        DeploymentImpl::with_db(db, config, Arc::new(FakeStamper), Arc::new(FakeGrowatt));
    app(deployment)
}

async fn test_app() -> Router {
    test_app_with(Config::default()).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn create_client(app: &Router, name: &str, rfc: Option<&str>) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/clients",
        Some(json!({ "name": name, "rfc": rfc })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn create_product(app: &Router, sku: &str, stock: i64) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/products",
        Some(json!({
            "sku": sku,
            "name": format!("Panel {sku}"),
            "category": "panel",
            "unit_price": 450_000,
            "stock": stock,
            "min_stock": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check() {
    let app = test_app().await;
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], "OK");
}

#[tokio::test]
async fn malformed_rfc_is_rejected() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/clients",
        Some(json!({ "name": "Ferretería", "rfc": "XYZ" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("RFC"));

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/clients/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn confirming_orders_reserves_stock() {
    let app = test_app().await;
    let client_id = create_client(&app, "Rancho", None).await;
    let product_id = create_product(&app, "PAN-550", 5).await;

    let mut order_ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/orders",
            Some(json!({
                "client_id": client_id,
                "items": [{ "product_id": product_id, "quantity": 3 }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], "quote");
        assert_eq!(body["data"]["total"], 1_350_000);
        order_ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }

    let confirm = json!({ "status": "confirmed" });
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/orders/{}/status", order_ids[0]),
        Some(confirm.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, &format!("/api/products/{product_id}"), None).await;
    assert_eq!(body["data"]["stock"], 2);

    // only two panels left
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/orders/{}/status", order_ids[1]),
        Some(confirm),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/orders/{}/status", order_ids[0]),
        Some(json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/products/{product_id}/movements"),
        None,
    )
    .await;
    let movements = body["data"].as_array().unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0]["kind"], "order_release");

    let (_, body) = send(&app, Method::GET, &format!("/api/products/{product_id}"), None).await;
    assert_eq!(body["data"]["stock"], 5);
}

#[tokio::test]
async fn invoices_are_stamped_and_cancelled() {
    let app = test_app().await;
    let client_id = create_client(&app, "Hotel Playa", Some("HPL120101AB1")).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/invoices",
        Some(json!({
            "client_id": client_id,
            "items": [{
                "sat_product_code": "81101701",
                "sat_unit_code": "E48",
                "description": "Instalación de sistema fotovoltaico",
                "quantity": 1.0,
                "unit_price": 2_500_000,
            }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "draft");
    assert_eq!(body["data"]["total"], 2_900_000);
    let invoice_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/invoices/{invoice_id}/stamp"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "stamped");
    assert_eq!(body["data"]["fiscal_uuid"], "UUID-A-1");

    // stamped invoices are immutable
    let (status, _) = send(&app, Method::DELETE, &format!("/api/invoices/{invoice_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/invoices/{invoice_id}/cancel"),
        Some(json!({ "motive": "01" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/invoices/{invoice_id}/cancel"),
        Some(json!({ "motive": "02" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "cancelled");
}

#[tokio::test]
async fn overlapping_visits_conflict() {
    let app = test_app().await;
    let client_id = create_client(&app, "Granja", None).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/technicians",
        Some(json!({ "name": "Lucía" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let technician_id = body["data"]["id"].as_str().unwrap().to_string();

    let visit = |start_hour: i32| {
        json!({
            "client_id": client_id,
            "technician_id": technician_id,
            "scheduled_date": "2026-10-19",
            "start_hour": start_hour,
            "duration_hours": 2,
            "service_type": "cleaning",
        })
    };

    let (status, body) = send(&app, Method::POST, "/api/maintenance/visits", Some(visit(9))).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // 11:00 leaves no travel time after the 9-11 visit
    let (status, _) = send(&app, Method::POST, "/api/maintenance/visits", Some(visit(11))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/technicians/{technician_id}/availability?date=2026-10-19&duration=2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["start_hours"], json!([12, 13, 14, 15, 16]));

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/maintenance/available-technicians?date=2026-10-19&start_hour=10&duration=1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/maintenance/next-slot?from=2026-10-18&duration=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["date"], "2026-10-19");
    assert_eq!(body["data"]["start_hour"], 12);
}

#[tokio::test]
async fn portal_profile_hides_internal_fields() {
    let app = test_app().await;
    let client_id = create_client(&app, "Rancho Alto", None).await;
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/clients/{client_id}"),
        Some(json!({
            "notes": "cobrar en efectivo, cliente moroso",
            "growatt_plant_id": "1356",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        Method::POST,
        &format!("/api/clients/{client_id}/portal-token"),
        None,
    )
    .await;
    let token = body["data"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/api/portal/{token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let profile = body["data"].as_object().unwrap();
    assert_eq!(profile["name"], "Rancho Alto");
    assert_eq!(profile["has_solar"], true);
    for hidden in ["id", "notes", "growatt_plant_id", "portal_token", "created_at", "updated_at"] {
        assert!(!profile.contains_key(hidden), "{hidden} leaked");
    }
}

#[tokio::test]
async fn portal_is_scoped_to_the_token() {
    let app = test_app().await;
    let client_id = create_client(&app, "Casa Verde", Some("CAVE800101AB1")).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/clients/{client_id}/portal-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/api/portal/{token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Casa Verde");
    assert_eq!(body["data"]["has_solar"], false);
    assert!(body["data"].get("portal_token").is_none());

    // drafts are not shown to the client
    send(
        &app,
        Method::POST,
        "/api/invoices",
        Some(json!({
            "client_id": client_id,
            "items": [{
                "sat_product_code": "81101701",
                "sat_unit_code": "E48",
                "description": "Limpieza",
                "quantity": 1.0,
                "unit_price": 80_000,
            }],
        })),
    )
    .await;
    let (status, body) =
        send(&app, Method::GET, &format!("/api/portal/{token}/invoices"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, Method::GET, &format!("/api/portal/{token}/solar"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/portal/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn growatt_sync_requires_it_to_be_enabled() {
    let app = test_app().await;
    let (status, _) = send(&app, Method::POST, "/api/growatt/sync", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/api/growatt/plants", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["plants"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn growatt_sync_fills_the_cache() {
    let mut config = Config::default();
    config.growatt.enabled = true;
    config.growatt.username = Some("mundosolar".to_string());
    config.growatt.password = Some("secret".to_string());
    config.growatt.batch_delay_ms = 0;
    let app = test_app_with(config).await;

    let (status, body) = send(&app, Method::POST, "/api/growatt/sync", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["plants_ok"], 1);
    assert_eq!(body["data"]["plants_failed"], 0);

    let (status, body) = send(&app, Method::GET, "/api/growatt/plants/4242", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stale"], false);
    assert_eq!(body["data"]["current_power_w"], 3400.0);

    let (status, body) = send(&app, Method::GET, "/api/dashboard", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["solar"]["plants"], 1);
    assert_eq!(body["data"]["solar"]["total_current_power_w"], 3400.0);
}

use std::str::FromStr;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use settlement_engine::adapters::{InMemoryOrderRepository, InMemorySettlementRepository};
use settlement_engine::domain::{Order, OrderLine};
use settlement_engine::services::{Calculator, SettlementCalendar, SettlementEngine};
use settlement_engine::{create_app, AppState};
use tower::ServiceExt;
use uuid::Uuid;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

async fn body_json(response: Response) -> Value {
    let mut body = response.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: axum::Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn seeded() -> (axum::Router, Order) {
    let orders = Arc::new(InMemoryOrderRepository::new());
    let settlements = Arc::new(InMemorySettlementRepository::new());
    let order = Order {
        id: Uuid::new_v4(),
        order_date: Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        status: "delivered".to_string(),
        lines: vec![OrderLine {
            id: Uuid::new_v4(),
            product_id: "sku-1".to_string(),
            product_name: "Widget".to_string(),
            quantity: 2,
            unit_price: dec("100"),
            total_price: dec("200"),
            seller_id: "seller-1".to_string(),
            seller_name: Some("Acme".to_string()),
            supplier_id: "supplier-1".to_string(),
            supplier_name: None,
            base_price_snapshot: Some(dec("70")),
            sale_price_snapshot: Some(dec("100")),
            commission_type: Some("rate".to_string()),
            commission_rate: Some(dec("20")),
            commission_amount: dec("40"),
            partner_id: None,
        }],
    };
    orders.add(order.clone()).await;

    let engine = SettlementEngine::new(
        orders,
        settlements.clone(),
        Calculator::default(),
        SettlementCalendar::utc(),
    );
    engine.run_on_order_completed(order.id).await.unwrap();

    (create_app(AppState { settlements }), order)
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let (app, _) = seeded().await;
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_list_settlements_with_filter() {
    let (app, _) = seeded().await;

    let response = get(app.clone(), "/settlements").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 3);

    let response = get(app, "/settlements?party_type=seller&status=pending").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["party_id"], "seller-1");
}

#[tokio::test]
async fn test_list_rejects_out_of_range_limit() {
    let (app, _) = seeded().await;
    let response = get(app, "/settlements?limit=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_settlement_includes_items() {
    let (app, order) = seeded().await;

    let response = get(app.clone(), "/settlements?party_type=supplier").await;
    let body = body_json(response).await;
    let id = body[0]["id"].as_str().unwrap().to_string();

    let response = get(app, &format!("/settlements/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["party_type"], "supplier");
    let items = detail["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["order_id"], order.id.to_string());
    assert_eq!(items[0]["reason_code"], "order_completed");
}

#[tokio::test]
async fn test_get_unknown_settlement_is_404() {
    let (app, _) = seeded().await;
    let response = get(app, &format!("/settlements/{}", Uuid::new_v4())).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["status"], 404);
}

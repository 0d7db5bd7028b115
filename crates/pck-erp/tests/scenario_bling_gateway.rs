//! Scenario: the Bling gateway speaks the documented wire contract and
//! classifies failures the way finalize depends on.
//!
//! Every test runs against a local `httpmock` server; no network.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use httpmock::Method::PATCH;
use pck_erp::{BlingGateway, ErpGateway, GatewayError, StaticToken};
use pck_session::{OrderNumber, ProductId, RemoteOrderId};
use serde_json::json;

fn gateway(server: &MockServer, timeout: Duration) -> BlingGateway {
    BlingGateway::new(
        server.base_url(),
        timeout,
        Arc::new(StaticToken("tok-123".into())),
    )
    .unwrap()
}

#[tokio::test]
async fn find_order_sends_number_and_bearer_token() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/pedidos/vendas")
                .query_param("numero", "500")
                .header("authorization", "Bearer tok-123");
            then.status(200)
                .json_body(json!({ "data": [{ "id": 9500, "numero": 500 }, { "id": 9501 }] }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    let found = gw.find_order(OrderNumber::new(500).unwrap()).await.unwrap();

    search.assert_async().await;
    assert_eq!(found, Some(RemoteOrderId(9500)));
}

#[tokio::test]
async fn find_order_with_empty_result_is_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pedidos/vendas");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    assert_eq!(gw.find_order(OrderNumber::new(1).unwrap()).await.unwrap(), None);
}

#[tokio::test]
async fn order_detail_is_decoded_from_data_envelope() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/pedidos/vendas/9500");
            then.status(200).json_body(json!({
                "data": {
                    "id": 9500,
                    "situacao": { "id": 6 },
                    "itens": [
                        { "codigo": "SKU-1", "descricao": "Caneta", "quantidade": 3, "produto": { "id": 11 } }
                    ]
                }
            }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    let order = gw.order(RemoteOrderId(9500)).await.unwrap();
    assert_eq!(order.situation_id(), Some(6));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].product.id, ProductId(11));

    let raw = gw.order_document(RemoteOrderId(9500)).await.unwrap();
    assert_eq!(raw["itens"][0]["descricao"], "Caneta");
}

#[tokio::test]
async fn transitions_and_stock_posting_hit_expected_paths() {
    let server = MockServer::start_async().await;
    let patch = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/pedidos/vendas/9500/situacoes/24");
            then.status(204);
        })
        .await;
    let post = server
        .mock_async(|when, then| {
            when.method(POST).path("/pedidos/vendas/9500/lancar-estoque");
            then.status(200).json_body(json!({ "data": {} }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    gw.post_stock(RemoteOrderId(9500)).await.unwrap();
    gw.set_situation(RemoteOrderId(9500), 24).await.unwrap();

    post.assert_async().await;
    patch.assert_async().await;
}

#[tokio::test]
async fn http_404_is_not_found_and_422_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/pedidos/vendas/1/situacoes/24");
            then.status(404).json_body(json!({ "error": { "type": "RESOURCE_NOT_FOUND" } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/pedidos/vendas/1/lancar-estoque");
            then.status(422).body("estoque já lançado");
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    let err = gw.set_situation(RemoteOrderId(1), 24).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    match gw.post_stock(RemoteOrderId(1)).await.unwrap_err() {
        GatewayError::Rejected { status, body, .. } => {
            assert_eq!(status, 422);
            assert!(body.contains("estoque"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_response_is_classified_as_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/pedidos/vendas/2/lancar-estoque");
            then.status(200).delay(Duration::from_millis(1500));
        })
        .await;

    let gw = gateway(&server, Duration::from_millis(200));
    let err = gw.post_stock(RemoteOrderId(2)).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

#[tokio::test]
async fn product_and_probe() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/produtos/11");
            then.status(200).json_body(json!({
                "data": { "id": 11, "nome": "Caneta", "codigoBarras": "7890000000011", "gtin": "17890000000018" }
            }));
        })
        .await;
    let probe = server
        .mock_async(|when, then| {
            when.method(GET).path("/produtos").query_param("limite", "1");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    let product = gw.product(ProductId(11)).await.unwrap();
    assert_eq!(
        product.scan_codes().collect::<Vec<_>>(),
        vec!["7890000000011", "17890000000018"]
    );

    gw.probe().await.unwrap();
    probe.assert_async().await;
}

#[tokio::test]
async fn unauthorized_status_is_classified() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/produtos");
            then.status(401).json_body(json!({ "error": { "type": "invalid_token" } }));
        })
        .await;

    let gw = gateway(&server, Duration::from_secs(5));
    assert!(matches!(
        gw.probe().await.unwrap_err(),
        GatewayError::Unauthorized(_)
    ));
}

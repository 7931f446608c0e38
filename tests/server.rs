//! HTTP contract tests.
//!
//! Each test boots the real router on an ephemeral port and drives it over
//! HTTP. Embeddings use the deterministic `hash` provider so no external
//! service is needed; the language model is a local stub speaking the
//! Ollama wire format (or an unroutable address for outage tests).

use std::net::SocketAddr;

use axum::{routing::post, Json, Router};
use tablechat::config::Config;
use tablechat::server::{build_router, AppState};

const INVENTORY_CSV: &str = "\
Supplier,Commodity,Quantity
Acme,Steel,50
Globex,Copper,75
Initech,Aluminum,20
";

const STUB_ANSWER: &str = "Acme supplies a quantity of 50.";

fn test_config(llm_url: &str) -> Config {
    let mut config = Config::default();
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = 256;
    config.llm.provider = "ollama".to_string();
    config.llm.url = Some(llm_url.to_string());
    config.llm.max_retries = 0;
    config.llm.timeout_secs = 5;
    config
}

async fn spawn_app(config: Config) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new(config));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Minimal stand-in for an Ollama `/api/generate` endpoint.
async fn spawn_stub_llm() -> SocketAddr {
    async fn generate(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "model": body["model"],
            "response": STUB_ANSWER,
            "done": true,
        }))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/generate", post(generate));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn upload(
    client: &reqwest::Client,
    addr: SocketAddr,
    filename: &str,
    bytes: &[u8],
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    client
        .post(format!("http://{addr}/upload_file"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn query(
    client: &reqwest::Client,
    addr: SocketAddr,
    room_id: &str,
    question: &str,
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/query"))
        .json(&serde_json::json!({ "room_id": room_id, "query": question }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn liveness_reports_running() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn upload_returns_a_room_id() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let response = upload(&client, addr, "inventory.csv", INVENTORY_CSV.as_bytes()).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("CSV"));
    let room_id = body["room_id"].as_str().unwrap();
    uuid::Uuid::parse_str(room_id).expect("room_id should be a UUID");
}

#[tokio::test]
async fn upload_rejects_unknown_extension() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let response = upload(&client, addr, "notes.pdf", b"%PDF-1.4").await;
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("supported"));
}

#[tokio::test]
async fn upload_rejects_oversized_payload() {
    let mut config = test_config("http://127.0.0.1:9");
    config.limits.max_upload_bytes = 1024;
    let addr = spawn_app(config).await;
    let client = reqwest::Client::new();

    let mut big = String::from("Supplier,Quantity\n");
    for i in 0..200 {
        big.push_str(&format!("Supplier {i},{i}\n"));
    }
    let response = upload(&client, addr, "big.csv", big.as_bytes()).await;
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn upload_rejects_table_without_data_rows() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let response = upload(&client, addr, "empty.csv", b"Supplier,Quantity\n").await;
    assert_eq!(response.status(), 500);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no data rows"));
}

#[tokio::test]
async fn upload_rejects_corrupt_workbook() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let response = upload(&client, addr, "sheet.xlsx", b"not a zip archive").await;
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn query_unknown_room_is_404() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let response = query(
        &client,
        addr,
        &uuid::Uuid::new_v4().to_string(),
        "anything",
    )
    .await;
    assert_eq!(response.status(), 404);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Room not found");

    // Malformed ids are indistinguishable from unknown rooms.
    let response = query(&client, addr, "not-a-uuid", "anything").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn upload_then_query_round_trip() {
    let llm = spawn_stub_llm().await;
    let addr = spawn_app(test_config(&format!("http://{llm}"))).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = upload(&client, addr, "inventory.csv", INVENTORY_CSV.as_bytes())
        .await
        .json()
        .await
        .unwrap();
    let room_id = body["room_id"].as_str().unwrap();

    let response = query(&client, addr, room_id, "What quantity does Acme supply?").await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["answer"], STUB_ANSWER);
}

#[tokio::test]
async fn llm_outage_returns_500_and_preserves_session() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = upload(&client, addr, "inventory.csv", INVENTORY_CSV.as_bytes())
        .await
        .json()
        .await
        .unwrap();
    let room_id = body["room_id"].as_str().unwrap();

    let first = query(&client, addr, room_id, "What does Acme supply?").await;
    assert_eq!(first.status(), 500);

    // The room must survive the failure: a retry reaches the model again
    // instead of reporting an unknown room.
    let second = query(&client, addr, room_id, "What does Acme supply?").await;
    assert_eq!(second.status(), 500);
}

#[tokio::test]
async fn concurrent_uploads_get_distinct_rooms() {
    let addr = spawn_app(test_config("http://127.0.0.1:9")).await;
    let client = reqwest::Client::new();

    let (a, b) = tokio::join!(
        upload(&client, addr, "first.csv", INVENTORY_CSV.as_bytes()),
        upload(&client, addr, "second.csv", INVENTORY_CSV.as_bytes()),
    );

    let a: serde_json::Value = a.json().await.unwrap();
    let b: serde_json::Value = b.json().await.unwrap();
    assert_ne!(a["room_id"], b["room_id"]);
}

//! Provider flows against an in-process GaussDB, ELB and VPC API

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, Query, State as AxumState};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use carina_core::provider::Provider;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_provider_huaweicloud::{HuaweiCloudProvider, ProviderConfig};
use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex;

const PROJECT: &str = "p1";

#[derive(Default)]
struct MockApi {
    /// Database creates rejected as busy before one is accepted
    busy_creates: AtomicUsize,
    /// Mutations rejected as busy before one is accepted
    busy_updates: AtomicUsize,
    /// Availability zone changes rejected as busy before one is accepted
    busy_zones: AtomicUsize,
    /// Load balancer reads answered with 429 first
    throttled: AtomicUsize,
    loadbalancer_reads: AtomicUsize,
    /// Provisioning status per load balancer read, the last one repeating;
    /// `None` answers 404
    lb_statuses: Mutex<VecDeque<Option<&'static str>>>,
    databases: Mutex<Vec<JsonValue>>,
    requests: Mutex<Vec<String>>,
}

type Shared = Arc<MockApi>;
type Reply = (StatusCode, Json<JsonValue>);

impl MockApi {
    async fn record(&self, line: String) {
        self.requests.lock().await.push(line);
    }

    async fn set_statuses(&self, statuses: &[Option<&'static str>]) {
        *self.lb_statuses.lock().await = statuses.iter().copied().collect();
    }

    /// Count down `counter`, answering busy with `code` while it is positive
    async fn busy(&self, counter: &AtomicUsize, what: &str, code: &str) -> Option<Reply> {
        if counter.load(Ordering::SeqCst) == 0 {
            return None;
        }
        counter.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("{} busy", what)).await;
        Some((
            StatusCode::CONFLICT,
            Json(json!({"error_code": code, "error_msg": "resource is busy"})),
        ))
    }
}

fn not_found() -> Reply {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error_code": "ELB.8904", "error_msg": "not found"})),
    )
}

async fn get_instance(Path((_, id)): Path<(String, String)>) -> Reply {
    (StatusCode::OK, Json(json!({"instance": {"id": id, "status": "ACTIVE"}})))
}

async fn get_job(
    AxumState(api): AxumState<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Reply {
    let id = query.get("id").cloned().unwrap_or_default();
    api.record(format!("GET job {}", id)).await;
    (StatusCode::OK, Json(json!({"job": {"id": id, "status": "Completed"}})))
}

async fn create_database(
    AxumState(api): AxumState<Shared>,
    Json(body): Json<JsonValue>,
) -> Reply {
    if api.busy_creates.load(Ordering::SeqCst) > 0 {
        api.busy_creates.fetch_sub(1, Ordering::SeqCst);
        api.record("POST databases busy".to_string()).await;
        return (
            StatusCode::CONFLICT,
            Json(json!({"error_code": "DBS.200047", "error_msg": "instance is busy"})),
        );
    }
    api.record("POST databases".to_string()).await;
    let mut databases = api.databases.lock().await;
    for db in body["databases"].as_array().cloned().unwrap_or_default() {
        databases.push(json!({
            "name": db["name"],
            "charset": db["character_set"],
            "comment": db["comment"],
            "users": [],
        }));
    }
    (StatusCode::ACCEPTED, Json(json!({"job_id": "job-db-1"})))
}

async fn list_databases(AxumState(api): AxumState<Shared>) -> Reply {
    let databases = api.databases.lock().await.clone();
    let total = databases.len();
    (StatusCode::OK, Json(json!({"databases": databases, "total_count": total})))
}

async fn list_proxies() -> Reply {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error_code": "DBS.201028", "error_msg": "proxy is not enabled"})),
    )
}

async fn list_configurations() -> Reply {
    (
        StatusCode::OK,
        Json(json!({"configurations": [
            {"id": "cfg-1", "name": "Default-GaussDB-for-MySQL", "datastore_name": "gaussdb-mysql", "user_defined": false},
            {"id": "cfg-2", "name": "tuned", "datastore_name": "gaussdb-mysql", "user_defined": true}
        ]})),
    )
}

async fn update_ops_window(AxumState(api): AxumState<Shared>, Json(body): Json<JsonValue>) -> Reply {
    if let Some(reply) = api.busy(&api.busy_updates, "PUT ops-window", "DBS.200019").await {
        return reply;
    }
    api.record(format!("PUT ops-window {}-{}", body["start_time"], body["end_time"])).await;
    (StatusCode::OK, Json(json!({})))
}

// =============================================================================
// ELB and VPC
// =============================================================================

async fn get_loadbalancer(
    AxumState(api): AxumState<Shared>,
    Path((_, id)): Path<(String, String)>,
) -> Reply {
    if api.throttled.load(Ordering::SeqCst) > 0 {
        api.throttled.fetch_sub(1, Ordering::SeqCst);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error_code": "APIGW.0308", "error_msg": "throttled"})),
        );
    }
    api.loadbalancer_reads.fetch_add(1, Ordering::SeqCst);

    let mut statuses = api.lb_statuses.lock().await;
    let status = if statuses.len() > 1 {
        statuses.pop_front().flatten()
    } else {
        statuses.front().copied().flatten()
    };
    match status {
        Some(status) => (
            StatusCode::OK,
            Json(json!({"loadbalancer": {
                "id": id,
                "name": "web",
                "provisioning_status": status,
                "availability_zone_list": ["cn-north-4a"]
            }})),
        ),
        None => not_found(),
    }
}

async fn create_loadbalancer(AxumState(api): AxumState<Shared>) -> Reply {
    api.record("POST loadbalancers".to_string()).await;
    (StatusCode::CREATED, Json(json!({"loadbalancer": {"id": "lb-1"}})))
}

async fn update_loadbalancer(AxumState(api): AxumState<Shared>, Json(body): Json<JsonValue>) -> Reply {
    if let Some(reply) = api.busy(&api.busy_updates, "PUT loadbalancer", "ELB.8902").await {
        return reply;
    }
    api.record(format!("PUT loadbalancer {}", body["loadbalancer"])).await;
    (StatusCode::OK, Json(json!({"loadbalancer": {"id": "lb-1"}})))
}

async fn change_zones(
    AxumState(api): AxumState<Shared>,
    Path((_, _, action)): Path<(String, String, String)>,
    Json(body): Json<JsonValue>,
) -> Reply {
    if let Some(reply) = api.busy(&api.busy_zones, &format!("POST {}", action), "ELB.8907").await {
        return reply;
    }
    api.record(format!("POST {} {}", action, body["availability_zone_list"])).await;
    (StatusCode::OK, Json(json!({})))
}

async fn delete_loadbalancer(AxumState(api): AxumState<Shared>) -> StatusCode {
    api.record("DELETE loadbalancer".to_string()).await;
    api.set_statuses(&[Some("PENDING_DELETE"), None]).await;
    StatusCode::NO_CONTENT
}

async fn list_loadbalancers(
    AxumState(api): AxumState<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Reply {
    let marker = query.get("marker").cloned();
    api.record(format!("GET loadbalancers marker={}", marker.as_deref().unwrap_or("-"))).await;
    let page = match marker.as_deref() {
        None => json!({
            "loadbalancers": [{"id": "lb-1", "name": "web-1"}, {"id": "lb-2", "name": "web-2"}],
            "page_info": {"next_marker": "lb-2", "current_count": 2}
        }),
        Some("lb-2") => json!({
            "loadbalancers": [{"id": "lb-3", "name": "web-3"}],
            "page_info": {"current_count": 1}
        }),
        Some(_) => json!({"loadbalancers": []}),
    };
    (StatusCode::OK, Json(page))
}

async fn delete_eip(
    AxumState(api): AxumState<Shared>,
    Path((_, id)): Path<(String, String)>,
) -> StatusCode {
    api.record(format!("DELETE publicip {}", id)).await;
    StatusCode::NO_CONTENT
}

async fn start(api: Shared) -> HuaweiCloudProvider {
    let app = Router::new()
        .route("/v3/{project}/instances/{id}", get(get_instance))
        .route("/v3/{project}/instances/{id}/ops-window", put(update_ops_window))
        .route("/v3/{project}/jobs", get(get_job))
        .route(
            "/v3/{project}/instances/{id}/databases",
            post(create_database).get(list_databases),
        )
        .route("/v3/{project}/instances/{id}/proxies", get(list_proxies))
        .route("/v3/{project}/configurations", get(list_configurations))
        .route(
            "/v3/{project}/elb/loadbalancers",
            post(create_loadbalancer).get(list_loadbalancers),
        )
        .route(
            "/v3/{project}/elb/loadbalancers/{id}",
            get(get_loadbalancer)
                .put(update_loadbalancer)
                .delete(delete_loadbalancer),
        )
        .route(
            "/v3/{project}/elb/loadbalancers/{id}/availability-zone/{action}",
            post(change_zones),
        )
        .route("/v1/{project}/publicips/{id}", delete(delete_eip))
        .with_state(api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ProviderConfig {
        region: "cn-north-4".to_string(),
        access_key: "AK".to_string(),
        secret_key: "SK".to_string(),
        project_id: Some(PROJECT.to_string()),
        endpoints: ["gaussdb", "elb", "vpc"]
            .into_iter()
            .map(|service| (service.to_string(), format!("http://{}", addr)))
            .collect(),
        poll_scale: 0.0,
        ..Default::default()
    };
    HuaweiCloudProvider::new(config).unwrap()
}

#[tokio::test]
async fn busy_instance_is_retried_then_job_is_followed() {
    let api = Shared::default();
    api.busy_creates.store(2, Ordering::SeqCst);
    let provider = start(api.clone()).await;

    let resource = Resource::new("gaussdb_mysql_database", "orders")
        .with_attribute("instance_id", Value::String("ins-1".to_string()))
        .with_attribute("name", Value::String("orders".to_string()))
        .with_attribute("character_set", Value::String("utf8mb4".to_string()));
    let state = provider.create(&resource).await.unwrap();

    assert!(state.exists);
    assert_eq!(state.identifier.as_deref(), Some("ins-1/orders"));
    assert_eq!(
        state.attributes.get("character_set"),
        Some(&Value::String("utf8mb4".to_string()))
    );

    let requests = api.requests.lock().await.clone();
    assert_eq!(
        requests,
        vec![
            "POST databases busy",
            "POST databases busy",
            "POST databases",
            "GET job job-db-1",
        ]
    );
}

#[tokio::test]
async fn missing_database_reads_as_not_found() {
    let provider = start(Shared::default()).await;
    let id = ResourceId::new("gaussdb_mysql_database", "orders");
    let state = provider.read(&id, Some("ins-1/orders")).await.unwrap();
    assert!(!state.exists);
}

#[tokio::test]
async fn disabled_proxy_reads_as_not_found() {
    let provider = start(Shared::default()).await;
    let id = ResourceId::new("gaussdb_mysql_proxy", "proxy");
    let state = provider.read(&id, Some("ins-1/px-1")).await.unwrap();
    assert!(!state.exists);
}

#[tokio::test]
async fn configurations_data_source_filters_by_name() {
    let provider = start(Shared::default()).await;
    let query = Resource::new("gaussdb_mysql_configurations", "tuned")
        .with_attribute("name", Value::String("tuned".to_string()))
        .with_read_only(true);
    let state = provider.read_data_source(&query).await.unwrap();

    let configurations = state
        .attributes
        .get("configurations")
        .and_then(Value::as_list)
        .unwrap();
    assert_eq!(configurations.len(), 1);
    assert_eq!(
        configurations[0].as_map().unwrap().get("id"),
        Some(&Value::String("cfg-2".to_string()))
    );
}

#[tokio::test]
async fn busy_instance_window_change_is_retried() {
    let api = Shared::default();
    api.busy_updates.store(1, Ordering::SeqCst);
    let provider = start(api.clone()).await;

    let id = ResourceId::new("gaussdb_mysql_instance", "db");
    let from = State::existing(
        id.clone(),
        HashMap::from([
            ("maintain_begin".to_string(), Value::String("02:00".to_string())),
            ("maintain_end".to_string(), Value::String("06:00".to_string())),
        ]),
    );
    let to = Resource::new("gaussdb_mysql_instance", "db")
        .with_attribute("maintain_begin", Value::String("03:00".to_string()))
        .with_attribute("maintain_end", Value::String("07:00".to_string()));
    let state = provider.update(&id, "ins-1", &from, &to).await.unwrap();
    assert!(state.exists);

    let requests = api.requests.lock().await.clone();
    assert_eq!(
        requests,
        vec!["PUT ops-window busy", "PUT ops-window \"03:00\"-\"07:00\""]
    );
}

#[tokio::test]
async fn busy_loadbalancer_changes_are_retried() {
    let api = Shared::default();
    api.busy_updates.store(2, Ordering::SeqCst);
    api.busy_zones.store(1, Ordering::SeqCst);
    api.set_statuses(&[Some("ACTIVE")]).await;
    let provider = start(api.clone()).await;

    let id = ResourceId::new("elb_loadbalancer", "web");
    let from = State::existing(
        id.clone(),
        HashMap::from([
            ("name".to_string(), Value::String("web".to_string())),
            (
                "availability_zone".to_string(),
                Value::List(vec![Value::String("cn-north-4a".to_string())]),
            ),
        ]),
    );
    let to = Resource::new("elb_loadbalancer", "web")
        .with_attribute("name", Value::String("web-2".to_string()))
        .with_attribute(
            "availability_zone",
            Value::List(vec![
                Value::String("cn-north-4a".to_string()),
                Value::String("cn-north-4b".to_string()),
            ]),
        );
    provider.update(&id, "lb-1", &from, &to).await.unwrap();

    let requests = api.requests.lock().await.clone();
    assert_eq!(
        requests,
        vec![
            "PUT loadbalancer busy",
            "PUT loadbalancer busy",
            "PUT loadbalancer {\"name\":\"web-2\"}",
            "POST batch-add busy",
            "POST batch-add [\"cn-north-4b\"]",
        ]
    );
}

#[tokio::test]
async fn loadbalancer_in_error_fails_the_create() {
    let api = Shared::default();
    api.set_statuses(&[Some("PENDING_CREATE"), Some("ERROR")]).await;
    let provider = start(api.clone()).await;

    let resource = Resource::new("elb_loadbalancer", "web")
        .with_attribute("name", Value::String("web".to_string()))
        .with_attribute(
            "availability_zone",
            Value::List(vec![Value::String("cn-north-4a".to_string())]),
        );
    let err = provider.create(&resource).await.unwrap_err();
    assert!(err.to_string().contains("ERROR"), "unexpected error: {}", err);
}

fn loadbalancer_state(with_iptype: bool) -> State {
    let mut attrs = HashMap::from([(
        "ipv4_eip_id".to_string(),
        Value::String("eip-1".to_string()),
    )]);
    if with_iptype {
        attrs.insert("iptype".to_string(), Value::String("5_bgp".to_string()));
    }
    State::existing(ResourceId::new("elb_loadbalancer", "web"), attrs).with_identifier("lb-1")
}

#[tokio::test]
async fn delete_releases_the_eip_created_with_the_loadbalancer() {
    let api = Shared::default();
    api.set_statuses(&[Some("ACTIVE")]).await;
    let provider = start(api.clone()).await;

    provider.delete(&loadbalancer_state(true)).await.unwrap();

    let requests = api.requests.lock().await.clone();
    assert_eq!(requests, vec!["DELETE loadbalancer", "DELETE publicip eip-1"]);
    // PENDING_DELETE, then gone
    assert_eq!(api.loadbalancer_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn delete_keeps_an_eip_bound_from_outside() {
    let api = Shared::default();
    api.set_statuses(&[Some("ACTIVE")]).await;
    let provider = start(api.clone()).await;

    provider.delete(&loadbalancer_state(false)).await.unwrap();

    let requests = api.requests.lock().await.clone();
    assert_eq!(requests, vec!["DELETE loadbalancer"]);
}

#[tokio::test]
async fn loadbalancers_data_source_follows_markers() {
    let api = Shared::default();
    let provider = start(api.clone()).await;

    let query = Resource::new("elb_loadbalancers", "all").with_read_only(true);
    let state = provider.read_data_source(&query).await.unwrap();

    let loadbalancers = state
        .attributes
        .get("loadbalancers")
        .and_then(Value::as_list)
        .unwrap();
    assert_eq!(loadbalancers.len(), 3);
    assert_eq!(
        loadbalancers[2].as_map().unwrap().get("id"),
        Some(&Value::String("lb-3".to_string()))
    );

    let requests = api.requests.lock().await.clone();
    assert_eq!(
        requests,
        vec!["GET loadbalancers marker=-", "GET loadbalancers marker=lb-2"]
    );
}

#[tokio::test]
async fn throttled_reads_are_retried() {
    let api = Shared::default();
    api.throttled.store(2, Ordering::SeqCst);
    api.set_statuses(&[Some("ACTIVE")]).await;
    let provider = start(api.clone()).await;

    let id = ResourceId::new("elb_loadbalancer", "web");
    let state = provider.read(&id, Some("lb-1")).await.unwrap();

    assert!(state.exists);
    assert_eq!(api.throttled.load(Ordering::SeqCst), 0);
    assert_eq!(api.loadbalancer_reads.load(Ordering::SeqCst), 1);
}

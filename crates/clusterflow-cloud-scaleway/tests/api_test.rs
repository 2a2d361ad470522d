use clusterflow_cloud::{CloudError, RetryConfig};
use clusterflow_cloud_scaleway::{ListFilter, ResourceKind, ResourceRef, ScwApi, ScwApiConfig, ScwCloud};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ScwApi {
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        multiplier: 1.0,
    };
    ScwApi::new(
        ScwApiConfig::new("secret-key", "project-1", "fr-par-1")
            .with_api_url(server.uri())
            .with_retry(retry),
    )
    .unwrap()
}

fn servers(names: std::ops::Range<u32>) -> Vec<serde_json::Value> {
    names
        .map(|i| json!({ "id": format!("srv-{}", i), "name": format!("nodes-{}", i), "tags": [] }))
        .collect()
}

#[tokio::test]
async fn test_list_follows_pages_until_total_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "50"))
        .and(header("X-Auth-Token", "secret-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "servers": servers(0..50), "total_count": 60 })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "servers": servers(50..60), "total_count": 60 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let found = client(&server)
        .list(ResourceKind::Server, &ListFilter::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 60);
    assert_eq!(found[59].id(), Some("srv-59"));
}

#[tokio::test]
async fn test_list_keeps_exact_name_matches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lb/v1/zones/fr-par-1/lbs"))
        .and(query_param("name", "api.demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lbs": [
                { "id": "lb-1", "name": "api.demo", "tags": [] },
                { "id": "lb-2", "name": "api.demo-old", "tags": [] },
            ],
            "total_count": 2,
        })))
        .mount(&server)
        .await;

    let found = client(&server)
        .list(ResourceKind::LoadBalancer, &ListFilter::new().name("api.demo"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some("lb-1"));
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers/srv-x"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "resource is not found" })))
        .mount(&server)
        .await;

    let err = client(&server)
        .get(ResourceKind::Server, &ResourceRef::new("srv-x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);
}

#[tokio::test]
async fn test_unavailable_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers/srv-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers/srv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": { "id": "srv-1", "name": "nodes-0", "state": "running" },
        })))
        .mount(&server)
        .await;

    let found = client(&server)
        .get(ResourceKind::Server, &ResourceRef::new("srv-1"))
        .await
        .unwrap();
    assert_eq!(found.str_attr("state"), Some("running"));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instance/v1/zones/fr-par-1/servers/srv-1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .get(ResourceKind::Server, &ResourceRef::new("srv-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RetriesExhausted { attempts: 3, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_forbidden_is_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/iam/v1alpha1/ssh-keys"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "insufficient permissions" })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .list(ResourceKind::SshKey, &ListFilter::new().name("kubernetes.demo"))
        .await
        .unwrap_err();
    assert!(err.is_permission_denied(), "{:?}", err);
}

#[tokio::test]
async fn test_create_injects_project() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vpc/v2/regions/fr-par/private-networks"))
        .and(body_partial_json(json!({ "name": "demo", "project_id": "project-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pn-1", "name": "demo", "region": "fr-par", "tags": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server)
        .create(ResourceKind::PrivateNetwork, json!({ "name": "demo", "tags": [] }))
        .await
        .unwrap();
    assert_eq!(created.id(), Some("pn-1"));
}

#[tokio::test]
async fn test_dns_records_go_through_zone_changes() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/domain/v2beta1/dns-zones/example.com/records"))
        .and(body_partial_json(json!({
            "changes": [{ "add": { "records": [{ "name": "api.demo", "type": "A", "data": "51.15.0.2" }] } }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "rec-1", "name": "api.demo", "type": "A", "data": "51.15.0.2", "ttl": 60 }],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/domain/v2beta1/dns-zones/example.com/records"))
        .and(body_partial_json(json!({ "changes": [{ "delete": { "id": "rec-1" } }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    let created = api
        .create(
            ResourceKind::DnsRecord,
            json!({ "dns_zone": "example.com", "name": "api.demo", "type": "A", "data": "51.15.0.2", "ttl": 60 }),
        )
        .await
        .unwrap();
    assert_eq!(created.id(), Some("rec-1"));
    assert_eq!(created.str_attr("dns_zone"), Some("example.com"));

    api.delete(ResourceKind::DnsRecord, &ResourceRef::nested("example.com", "rec-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_load_balancer_delete_releases_its_ip() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/lb/v1/zones/fr-par-1/lbs/lb-1"))
        .and(query_param("release_ip", "true"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .delete(ResourceKind::LoadBalancer, &ResourceRef::new("lb-1"))
        .await
        .unwrap();
}

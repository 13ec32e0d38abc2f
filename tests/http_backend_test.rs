#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::get, Json, Router};
    use sdr_balancer::cluster::backend::{BackendClient, Endpoint, FetchError, HttpBackend};
    use sdr_balancer::common::config::{BalancerConfig, ListenerProfile, ServerEntry};
    use sdr_balancer::server::routes::{DecideResponse, ProfileEntry};
    use sdr_balancer::{server, LoadBalancer};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn current_state() -> serde_json::Value {
        serde_json::json!({
            "latest_avg_cpu_usage": 0.25,
            "init_state_tag": "abc",
            "rtl": {
                "sdr_name": "RTL-SDR",
                "failed": false,
                "has_users": true,
                "number_of_connections": 1,
                "current_profile": {"profile_id": "2m", "center_freq": 145000000}
            }
        })
    }

    fn initial_state() -> serde_json::Value {
        serde_json::json!({
            "init_state_tag": "abc",
            "rtl": {
                "name": "RTL-SDR",
                "type": "rtl_sdr",
                "priority": 120,
                "profiles": {
                    "2m": {"center_freq": 145000000, "samp_rate": 2400000},
                    "air": {"center_freq": 124000000, "samp_rate": 2400000}
                }
            }
        })
    }

    /// Spawn `app` on an ephemeral loopback port.
    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn fake_backend() -> SocketAddr {
        serve(
            Router::new()
                .route("/curstate.json", get(|| async { Json(current_state()) }))
                .route("/initstate.json", get(|| async { Json(initial_state()) })),
        )
        .await
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint {
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    fn http_backend() -> HttpBackend {
        HttpBackend::new(Duration::from_millis(1000), Duration::from_millis(2000))
    }

    #[tokio::test]
    async fn test_fetch_both_documents() {
        let addr = fake_backend().await;
        let backend = http_backend();

        let current = backend.fetch_current_state(&endpoint(addr)).await.unwrap();
        assert_eq!(current.init_state_tag, "abc");
        assert_eq!(current.devices["rtl"].number_of_connections, 1);

        let initial = backend.fetch_initial_state(&endpoint(addr)).await.unwrap();
        assert_eq!(initial.devices["rtl"].priority, 120.0);
        assert_eq!(initial.devices["rtl"].profiles.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let addr = serve(Router::new().route(
            "/curstate.json",
            get(|| async { Json(serde_json::json!({"init_state_tag": "only"})) }),
        ))
        .await;

        let result = http_backend().fetch_current_state(&endpoint(addr)).await;
        assert!(matches!(result, Err(FetchError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let addr = serve(Router::new().route(
            "/initstate.json",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;

        let result = http_backend().fetch_initial_state(&endpoint(addr)).await;
        assert!(matches!(result, Err(FetchError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let addr = serve(Router::new().route(
            "/curstate.json",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(current_state())
            }),
        ))
        .await;

        let backend = HttpBackend::new(Duration::from_millis(100), Duration::from_millis(100));
        let result = backend.fetch_current_state(&endpoint(addr)).await;
        assert!(matches!(result, Err(FetchError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_api_end_to_end() {
        let backend_addr = fake_backend().await;

        let mut config = BalancerConfig::default();
        config.servers.insert(
            "rx1".to_string(),
            ServerEntry {
                name: "Receiver 1".to_string(),
                address: backend_addr.ip().to_string(),
                port: backend_addr.port(),
                priority: 100,
            },
        );
        config.profiles.insert(
            "2m".to_string(),
            ListenerProfile {
                name: "2m band".to_string(),
                start_freq: 144_000_000.0,
                end_freq: 146_000_000.0,
            },
        );
        config.profiles.insert(
            "air".to_string(),
            ListenerProfile {
                name: "Airband".to_string(),
                start_freq: 118_000_000.0,
                end_freq: 125_000_000.0,
            },
        );

        let balancer = Arc::new(LoadBalancer::start(&config).await);
        let api = serve(server::router(balancer.clone())).await;
        let client = reqwest::Client::new();
        let url = |path: &str| format!("http://{}{}", api, path);

        let decision: DecideResponse = client
            .get(url("/api/decide?profile=2m"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(decision.decision);
        assert_eq!(decision.server, Some(backend_addr.to_string()));
        assert_eq!(decision.device.as_deref(), Some("rtl"));
        assert_eq!(decision.profile.as_deref(), Some("2m"));

        // the device is busy on 2m, airband would need a retune
        let decision: DecideResponse = client
            .get(url("/api/decide?profile=air"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!decision.decision);

        let decision: DecideResponse = client
            .get(url("/api/decide?profile=2m&failed=rtl"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!decision.decision);

        let servers: serde_json::Value = client
            .get(url("/api/servers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(servers[0]["id"], "rx1");
        assert_eq!(servers[0]["responding"], true);
        assert_eq!(servers[0]["active_devices"], 1);
        assert_eq!(servers[0]["connections"], 1);

        let devices: serde_json::Value = client
            .get(url("/api/devices"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(devices[0]["id"], "rtl");
        assert_eq!(devices[0]["type"], "rtl_sdr");
        assert_eq!(devices[0]["server"], "Receiver 1");
        assert_eq!(devices[0]["profiles"], 2);

        let profiles: Vec<ProfileEntry> = client
            .get(url("/api/profiles"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, "2m");

        let health = client.get(url("/api/health")).send().await.unwrap();
        assert!(health.status().is_success());

        balancer.shutdown().await;
    }
}

//! Integration tests for the OPC API clients using wiremock
//!
//! These tests drive the compute and storage clients built by the client
//! factory against mocked endpoints: authentication, request shapes, name
//! qualification, retries and error mapping.

use std::sync::{Arc, Mutex};

use opc_provider::client::{
    CreateSecurityRuleInput, DeleteSecurityRuleInput, GetSecurityRuleInput, SecurityRulesApi,
    UpdateSecurityRuleInput,
};
use opc_provider::logging::{join_parts, ApiLogger};
use opc_provider::{ApiError, Config, OpcClient};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEDIA_TYPE: &str = "application/oracle-compute-v3+json";
const SESSION_COOKIE: &str = "nimbula=session-1";
const RULE_PATH: &str = "/network/v1/secrule/Compute-mydomain/user1/rule1";

fn config(server: &MockServer, extra: Value) -> Config {
    let mut value = json!({
        "user": "user1",
        "password": "secret",
        "identity_domain": "mydomain",
        "endpoint": server.uri(),
    });
    if let (Some(target), Value::Object(extra)) = (value.as_object_mut(), extra) {
        target.extend(extra);
    }
    Config::from_value_with_env(value, |_| None).expect("valid configuration")
}

fn client(server: &MockServer, extra: Value) -> OpcClient {
    config(server, extra)
        .client_with_logger(None)
        .expect("client builds")
}

async fn mount_authenticate(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/authenticate/"))
        .and(header("Content-Type", MEDIA_TYPE))
        .and(body_json(json!({
            "user": "/Compute-mydomain/user1",
            "password": "secret"
        })))
        .respond_with(
            ResponseTemplate::new(204)
                .insert_header("Set-Cookie", "nimbula=session-1; Path=/; Max-Age=1800"),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn remote_rule(server: &MockServer) -> Value {
    json!({
        "name": "/Compute-mydomain/user1/rule1",
        "flowDirection": "ingress",
        "enabledFlag": true,
        "acl": null,
        "srcVnicSet": "/Compute-mydomain/user1/web",
        "dstVnicSet": null,
        "secProtocols": ["/Compute-mydomain/user1/ssh", "/oracle/public/https"],
        "srcIpAddressPrefixSets": ["/Compute-mydomain/user1/corp"],
        "dstIpAddressPrefixSets": [],
        "tags": ["prod"],
        "description": "",
        "uri": format!("{}{}", server.uri(), RULE_PATH)
    })
}

fn create_input() -> CreateSecurityRuleInput {
    CreateSecurityRuleInput {
        name: "rule1".to_string(),
        flow_direction: "ingress".to_string(),
        enabled: true,
        ..Default::default()
    }
}

/// Test module for compute API session handling
mod session_tests {
    use super::*;

    /// The session cookie from authentication is sent on every request
    #[tokio::test]
    async fn test_session_cookie_is_reused() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .and(header("Cookie", SESSION_COOKIE))
            .and(header("Accept", MEDIA_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_rule(&server)))
            .expect(2)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let input = GetSecurityRuleInput {
            name: "rule1".to_string(),
        };
        rules.get_security_rule(&input).await.unwrap();
        rules.get_security_rule(&input).await.unwrap();
    }

    /// A rejected session is dropped and authentication runs again
    #[tokio::test]
    async fn test_401_reauthenticates_once() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 2).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_rule(&server)))
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let info = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.name, "rule1");
    }

    /// Failed authentication surfaces as an authentication error
    #[tokio::test]
    async fn test_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authenticate/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let err = rules.create_security_rule(&create_input()).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }
}

/// Test module for security rule requests
mod security_rule_tests {
    use super::*;

    /// Create posts qualified names and omits unset fields
    #[tokio::test]
    async fn test_create_request_body() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/network/v1/secrule/"))
            .and(header("Content-Type", MEDIA_TYPE))
            .and(body_json(json!({
                "name": "/Compute-mydomain/user1/rule1",
                "flowDirection": "ingress",
                "enabledFlag": true
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(remote_rule(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let info = rules.create_security_rule(&create_input()).await.unwrap();

        assert_eq!(info.name, "rule1");
        assert_eq!(info.acl, "");
        assert_eq!(info.src_vnic_set, "web");
        assert_eq!(info.sec_protocols, ["ssh", "/oracle/public/https"]);
        assert_eq!(info.src_ip_address_prefix_sets, ["corp"]);
    }

    /// Update puts to the qualified object path
    #[tokio::test]
    async fn test_update_request() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("PUT"))
            .and(path(RULE_PATH))
            .and(body_json(json!({
                "name": "/Compute-mydomain/user1/rule1",
                "flowDirection": "ingress",
                "enabledFlag": true,
                "srcIpAddressPrefixSets": ["/Compute-mydomain/user1/corp"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_rule(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let input = UpdateSecurityRuleInput {
            src_ip_address_prefix_sets: vec!["corp".to_string()],
            ..create_input()
        };
        let info = rules.update_security_rule(&input).await.unwrap();
        assert_eq!(info.src_ip_address_prefix_sets, ["corp"]);
    }

    /// Missing rules map to a not-found error
    #[tokio::test]
    async fn test_get_404_is_not_found() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_string("No such rule"))
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let err = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "404: No such rule");
    }

    /// An empty body on get means no rule
    #[tokio::test]
    async fn test_get_empty_body() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let info = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap();
        assert!(info.is_none());
    }

    /// Delete sends no body and accepts 204
    #[tokio::test]
    async fn test_delete() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("DELETE"))
            .and(path(RULE_PATH))
            .and(header("Cookie", SESSION_COOKIE))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        rules
            .delete_security_rule(&DeleteSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap();
    }
}

/// Test module for retry behaviour
mod retry_tests {
    use super::*;

    /// 5xx responses are retried up to max_retries attempts
    #[tokio::test]
    async fn test_503_retried_until_success() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_rule(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({"max_retries": 3}))
            .compute()
            .security_rules();
        let info = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap();
        assert!(info.is_some());
    }

    /// With the default of one attempt, a 5xx is returned immediately
    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let err = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 503, .. }));
    }

    /// Authentication shares the retry budget of the request that needs it
    #[tokio::test]
    async fn test_authenticate_503_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authenticate/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("GET"))
            .and(path(RULE_PATH))
            .and(header("Cookie", SESSION_COOKIE))
            .respond_with(ResponseTemplate::new(200).set_body_json(remote_rule(&server)))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({"max_retries": 3}))
            .compute()
            .security_rules();
        let info = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap();
        assert!(info.is_some());
    }

    /// A 5xx from authentication keeps its status when attempts run out
    #[tokio::test]
    async fn test_authenticate_503_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/authenticate/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({})).compute().security_rules();
        let err = rules
            .get_security_rule(&GetSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Status { status: 503, ref message } if message == "maintenance"
        ));
        assert!(err.is_retryable());
    }

    /// 4xx responses are never retried
    #[tokio::test]
    async fn test_400_not_retried() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;

        Mock::given(method("POST"))
            .and(path("/network/v1/secrule/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad flowDirection"))
            .expect(1)
            .mount(&server)
            .await;

        let rules = client(&server, json!({"max_retries": 5}))
            .compute()
            .security_rules();
        let err = rules.create_security_rule(&create_input()).await.unwrap_err();
        assert_eq!(err.to_string(), "400: bad flowDirection");
    }
}

/// Test module for the storage client
mod storage_tests {
    use super::*;

    /// The auth token is fetched once and cached
    #[tokio::test]
    async fn test_auth_token_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1.0"))
            .and(header("X-Storage-User", "Storage-mydomain:user1"))
            .and(header("X-Storage-Pass", "secret"))
            .respond_with(ResponseTemplate::new(200).insert_header("X-Auth-Token", "AUTH_tk1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, json!({"storage": true}));
        let storage = client.storage().unwrap();
        assert_eq!(storage.auth_token().await.unwrap(), "AUTH_tk1");
        assert_eq!(storage.auth_token().await.unwrap(), "AUTH_tk1");
    }

    /// A response without a token is an authentication error
    #[tokio::test]
    async fn test_missing_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1.0"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(&server, json!({"storage": true}));
        let err = client.storage().unwrap().auth_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }
}

/// Test module for the injected API logger
mod logger_tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<String>>,
    }

    impl ApiLogger for RecordingLogger {
        fn log(&self, parts: &[&str]) {
            self.lines.lock().unwrap().push(join_parts(parts));
        }
    }

    /// Requests and responses reach the injected logger
    #[tokio::test]
    async fn test_requests_are_logged() {
        let server = MockServer::start().await;
        mount_authenticate(&server, 1).await;
        Mock::given(method("DELETE"))
            .and(path(RULE_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let logger = Arc::new(RecordingLogger::default());
        let sink: Arc<dyn ApiLogger> = logger.clone();
        let client = config(&server, json!({}))
            .client_with_logger(Some(sink))
            .unwrap();
        client
            .compute()
            .security_rules()
            .delete_security_rule(&DeleteSecurityRuleInput {
                name: "rule1".to_string(),
            })
            .await
            .unwrap();

        let lines = logger.lines.lock().unwrap().clone();
        assert_eq!(lines[0], "Authenticating /Compute-mydomain/user1");
        assert_eq!(lines[1], format!("DELETE {}{}", server.uri(), RULE_PATH));
        assert!(lines[2].starts_with("Response: DELETE"));
        assert!(lines[2].ends_with("OK"));
        assert!(lines.iter().all(|line| !line.contains("secret")));
    }
}

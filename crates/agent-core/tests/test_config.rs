use agent_core::config::AgentConfig;

#[test]
fn test_parse_full_credentials_json() {
    let json = r#"{
        "forum": {
            "client_id": "test_client",
            "client_secret": "test_secret",
            "username": "agent-bot",
            "password": "test_pass",
            "user_agent": "oss-community-agent/1.0 (by u/agent-bot)",
            "api_url": "https://oauth.reddit.com"
        },
        "delivery": {
            "dry_run": false,
            "max_retries": 3,
            "base_backoff_seconds": 2.0,
            "max_backoff_seconds": 30.0
        }
    }"#;

    let config = AgentConfig::from_json_str(json).expect("Failed to parse config");

    assert_eq!(config.forum.client_id, "test_client");
    assert_eq!(config.forum.username, "agent-bot");
    assert_eq!(
        config.forum.base_url, "https://oauth.reddit.com",
        "api_url should map to base_url"
    );
    assert_eq!(
        config.forum.auth_url, "https://www.reddit.com/api/v1/access_token",
        "Auth URL should have its default"
    );

    assert!(!config.delivery.dry_run);
    assert_eq!(config.delivery.max_retries, 3);
    assert_eq!(config.delivery.base_backoff_seconds, 2.0);
    assert_eq!(config.delivery.max_backoff_seconds, 30.0);
}

#[test]
fn test_parse_minimal_config_applies_defaults() {
    let json = r#"{
        "forum": {
            "client_id": "id",
            "client_secret": "secret",
            "username": "user",
            "password": "pass"
        }
    }"#;

    let config = AgentConfig::from_json_str(json).expect("Failed to parse minimal config");

    assert!(config.delivery.dry_run, "Dry run must default to on");
    assert_eq!(config.delivery.max_retries, 5);
    assert_eq!(config.delivery.base_backoff_seconds, 1.0);
    assert_eq!(config.delivery.max_backoff_seconds, 60.0);
    assert_eq!(config.forum.base_url, "https://oauth.reddit.com");
    assert!(config.forum.user_agent.starts_with("oss-community-agent"));
}

#[test]
fn test_live_delivery_requires_credentials() {
    let json = r#"{
        "forum": {
            "client_id": "",
            "client_secret": "",
            "username": "user",
            "password": "pass"
        },
        "delivery": { "dry_run": false }
    }"#;

    let result = AgentConfig::from_json_str(json);
    assert!(result.is_err(), "Live mode with empty credentials must fail");
    assert!(result.unwrap_err().to_string().contains("required"));
}

#[test]
fn test_dry_run_tolerates_empty_credentials() {
    let json = r#"{
        "forum": {
            "client_id": "",
            "client_secret": "",
            "username": "",
            "password": ""
        },
        "delivery": { "dry_run": true }
    }"#;

    assert!(AgentConfig::from_json_str(json).is_ok());
}

#[test]
fn test_backoff_validation() {
    let json = r#"{
        "forum": {
            "client_id": "id",
            "client_secret": "secret",
            "username": "user",
            "password": "pass"
        },
        "delivery": {
            "base_backoff_seconds": 10.0,
            "max_backoff_seconds": 1.0
        }
    }"#;

    let result = AgentConfig::from_json_str(json);
    assert!(result.is_err(), "Cap below base must be rejected");
}

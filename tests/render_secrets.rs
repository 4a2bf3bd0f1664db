//! End-to-end rendering against mocked Vault and Azure Key Vault servers.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tpl::cli;
use tpl::config::{BackendOptions, RenderConfig, TemplateSource};
use tpl::secrets::{AzureConfig, SecretRegistry, SecretString, VaultConfig};
use tpl::template::Delimiters;
use tpl::World;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn vault_response(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "request_id": "5a1b2c3d",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 2764800,
        "data": data,
        "wrap_info": null,
        "warnings": null,
        "auth": null
    }))
}

fn vault_config(server: &MockServer) -> VaultConfig {
    VaultConfig {
        address: Some(server.uri()),
        token: Some(SecretString::new("root-token")),
        namespace: None,
    }
}

fn azure_version(server: &MockServer, version: &str, created: i64) -> serde_json::Value {
    json!({
        "id": format!("{}/secrets/prod-api-key/{}", server.uri(), version),
        "attributes": {
            "enabled": true,
            "created": created,
            "updated": created,
            "recoveryLevel": "Recoverable"
        }
    })
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[tokio::test]
async fn test_renders_config_file_from_vault_and_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/database"))
        .and(header("X-Vault-Token", "root-token"))
        .respond_with(vault_response(json!({"username": "admin", "password": "s3cr3t"})))
        .mount(&server)
        .await;

    let config = RenderConfig {
        template: TemplateSource::File(fixture("app.conf.tpl")),
        vault: BackendOptions {
            prefix: "prod/".to_string(),
            mapping_file: Some(fixture("vault-mapping.csv")),
        },
        data: vec![
            format!("items={}", fixture("items.yaml").display()),
            format!("settings={}", fixture("settings.json").display()),
        ],
        ..Default::default()
    };

    let output = cli::render(&config, vault_config(&server), AzureConfig::default()).await.unwrap();

    assert_eq!(
        output,
        "user=admin\npassword=s3cr3t\nitem=1\nitem=2\nitem=3\nregion=westeurope\n"
    );
}

#[tokio::test]
async fn test_missing_vault_field_fails_whole_render() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/app/db"))
        .respond_with(vault_response(json!({"value": "s3cr3t"})))
        .mount(&server)
        .await;

    let registry = SecretRegistry::new(vault_config(&server), AzureConfig::default());
    let world = World::new(Arc::new(registry));

    let output = world
        .render(r#"{{ vault "app/db" "value" }}"#, &Delimiters::default())
        .await
        .unwrap();
    assert_eq!(output, "s3cr3t");

    let source = r#"ok={{ vault "app/db" "value" }} {{ vault "app/db" "missing" }}"#;
    let err = world.render(source, &Delimiters::default()).await.unwrap_err();
    assert!(err.to_string().contains("no field named 'missing'"));
}

#[tokio::test]
async fn test_vault_without_token_is_unavailable() {
    let config = VaultConfig {
        address: Some("http://127.0.0.1:54000".to_string()),
        ..Default::default()
    };
    let world = World::new(Arc::new(SecretRegistry::new(config, AzureConfig::default())));

    let err = world
        .render(r#"Value: {{ vault "secret/path" "value" }}"#, &Delimiters::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unavailable"));
}

#[tokio::test]
async fn test_renders_latest_azure_secret_with_exchanged_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/my-tenant/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "aad-token",
                "expires_in": "3599"
            })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets/prod-api-key/versions"))
        .and(query_param("api-version", "7.0"))
        .and(header("authorization", "Bearer aad-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                azure_version(&server, "1111", 1600000000),
                azure_version(&server, "2222", 1700000000)
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets/prod-api-key/2222"))
        .and(query_param("api-version", "7.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "latest-key"})))
        .mount(&server)
        .await;

    let azure = AzureConfig::from_lookup(|key| match key {
        "AZURE_TENANT_ID" => Some("my-tenant".to_string()),
        "AZURE_CLIENT_ID" => Some("client".to_string()),
        "AZURE_CLIENT_SECRET" => Some("secret".to_string()),
        "AZURE_KEY_VAULT_URL" => Some(server.uri()),
        "AZURE_AUTHORITY_HOST" => Some(server.uri()),
        _ => None,
    });
    let mut registry = SecretRegistry::new(VaultConfig::default(), azure);
    registry.set_azure_prefix("prod/");
    registry.set_azure_sanitizer(tpl::secrets::PathSanitizer::AzureSecretName);

    let world = World::new(Arc::new(registry));
    let source = r#"{{ azure "prod/api-key" }} {{ azure "prod/api_key" | upper }}"#;
    let output = world.render(source, &Delimiters::default()).await.unwrap();

    assert_eq!(output, "latest-key LATEST-KEY");
}

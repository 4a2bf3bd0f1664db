//! Functions the world exposes to templates on top of the engine built-ins.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::secrets::SecretRegistry;
use crate::template::{
    expect_args, is_true, print_value, BoxError, FunctionRegistry, TemplateFunction,
};

/// Address used to discover the outbound interface. No packet is sent.
const ROUTE_TARGET_ADDR: &str = "8.8.8.8:53";

/// `vault PATH FIELD`
pub struct VaultFunction {
    secrets: Arc<SecretRegistry>,
}

#[async_trait]
impl TemplateFunction for VaultFunction {
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        let [path, field] = expect_args::<2>("vault", args)?;
        let path = string_arg("vault", "path", &path)?;
        let field = string_arg("vault", "field", &field)?;
        let value = self.secrets.vault_secret(path, field).await?;
        Ok(Value::String(value))
    }
}

/// `azure PATH`
pub struct AzureFunction {
    secrets: Arc<SecretRegistry>,
}

#[async_trait]
impl TemplateFunction for AzureFunction {
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        let [path] = expect_args::<1>("azure", args)?;
        let path = string_arg("azure", "path", &path)?;
        let value = self.secrets.azure_secret(path).await?;
        Ok(Value::String(value))
    }
}

/// `readFile PATH`
pub struct ReadFileFunction;

#[async_trait]
impl TemplateFunction for ReadFileFunction {
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        let [path] = expect_args::<1>("readFile", args)?;
        let path = string_arg("readFile", "path", &path)?;
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("failed to read {}: {}", path, e))?;
        Ok(Value::String(contents))
    }
}

/// Outbound address, shared by every render in the process.
static EXTERNAL_IP: OnceCell<String> = OnceCell::new();

/// `externalIP`, resolved once per process.
pub struct ExternalIpFunction;

#[async_trait]
impl TemplateFunction for ExternalIpFunction {
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        expect_args::<0>("externalIP", args)?;
        // Failures render as a marker rather than aborting, and are not cached.
        let ip = match EXTERNAL_IP.get() {
            Some(ip) => ip.clone(),
            None => match discover_external_ip().await {
                Ok(ip) => EXTERNAL_IP.get_or_init(|| ip).clone(),
                Err(e) => format!("<ERR: {}>", e),
            },
        };
        Ok(Value::String(ip))
    }
}

async fn discover_external_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(ROUTE_TARGET_ADDR).await?;
    let ip = socket.local_addr()?.ip().to_string();
    debug!(ip = %ip, "Discovered external IP");
    Ok(ip)
}

/// `jmespathValue EXPRESSION DATA`
fn jmespath_value(args: Vec<Value>) -> Result<Value, BoxError> {
    let [expression, data] = expect_args::<2>("jmespathValue", args)?;
    let expression = string_arg("jmespathValue", "expression", &expression)?;

    let compiled = jmespath::compile(expression).map_err(|e| e.to_string())?;
    let data = jmespath::Variable::from_json(&data.to_string())?;
    let found = compiled.search(data).map_err(|e| e.to_string())?;
    Ok(serde_json::to_value(&*found)?)
}

fn string_arg<'a>(function: &str, name: &str, value: &'a Value) -> Result<&'a str, BoxError> {
    value
        .as_str()
        .ok_or_else(|| format!("{}: {} must be a string, got {}", function, name, value).into())
}

fn text(value: &Value) -> String {
    print_value(value)
}

/// Adds the world's functions to `registry`.
pub fn register(registry: &mut FunctionRegistry, secrets: Arc<SecretRegistry>) {
    registry.register("vault", VaultFunction { secrets: Arc::clone(&secrets) });
    registry.register("azure", AzureFunction { secrets });
    registry.register("readFile", ReadFileFunction);
    registry.register("externalIP", ExternalIpFunction);

    registry.register_fn("default", |args| match args.as_slice() {
        [fallback] => Ok(fallback.clone()),
        [fallback, given] => Ok(if is_true(given) { given.clone() } else { fallback.clone() }),
        _ => Err(format!("default: wrong number of args: want 1 or 2 got {}", args.len()).into()),
    });
    registry.register_fn("upper", |args| {
        let [value] = expect_args::<1>("upper", args)?;
        Ok(Value::String(text(&value).to_uppercase()))
    });
    registry.register_fn("lower", |args| {
        let [value] = expect_args::<1>("lower", args)?;
        Ok(Value::String(text(&value).to_lowercase()))
    });
    registry.register_fn("trim", |args| {
        let [value] = expect_args::<1>("trim", args)?;
        Ok(Value::String(text(&value).trim().to_string()))
    });
    registry.register_fn("quote", |args| {
        let quoted: Vec<String> = args
            .iter()
            .filter(|value| !value.is_null())
            .map(|value| Value::String(text(value)).to_string())
            .collect();
        Ok(Value::String(quoted.join(" ")))
    });
    registry.register_fn("join", |args| {
        let [separator, list] = expect_args::<2>("join", args)?;
        let separator = text(&separator);
        let joined = match &list {
            Value::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(&separator),
            other => text(other),
        };
        Ok(Value::String(joined))
    });
    registry.register_fn("toJson", |args| {
        let [value] = expect_args::<1>("toJson", args)?;
        Ok(Value::String(serde_json::to_string(&value)?))
    });
    registry.register_fn("jsonToMap", |args| {
        let [value] = expect_args::<1>("jsonToMap", args)?;
        let source = string_arg("jsonToMap", "input", &value)?;
        let parsed: serde_json::Map<String, Value> = serde_json::from_str(source)?;
        Ok(Value::Object(parsed))
    });
    registry.register_fn("jmespathValue", jmespath_value);
    // Name used by earlier releases.
    registry.register_fn("jmsepathValue", jmespath_value);
    registry.register_fn("fileExists", |args| {
        let [path] = expect_args::<1>("fileExists", args)?;
        let path = string_arg("fileExists", "path", &path)?;
        Ok(Value::Bool(Path::new(path).exists()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::with_builtins();
        register(&mut registry, Arc::new(SecretRegistry::default()));
        registry
    }

    async fn call(name: &str, args: Vec<Value>) -> Result<Value, BoxError> {
        registry().get(name).unwrap().call(args).await
    }

    #[tokio::test]
    async fn test_default_prefers_truthy_value() {
        assert_eq!(call("default", vec![json!("d"), json!("")]).await.unwrap(), json!("d"));
        let given = call("default", vec![json!("d"), json!("given")]).await.unwrap();
        assert_eq!(given, json!("given"));
        assert_eq!(call("default", vec![json!("d")]).await.unwrap(), json!("d"));
    }

    #[tokio::test]
    async fn test_string_helpers() {
        assert_eq!(call("upper", vec![json!("abc")]).await.unwrap(), json!("ABC"));
        assert_eq!(call("lower", vec![json!("ABC")]).await.unwrap(), json!("abc"));
        assert_eq!(call("trim", vec![json!("  x \n")]).await.unwrap(), json!("x"));
        let quoted = call("quote", vec![json!("a\"b"), json!(1)]).await.unwrap();
        assert_eq!(quoted, json!(r#""a\"b" "1""#));
        let joined = call("join", vec![json!(", "), json!(["a", 1, true])]).await.unwrap();
        assert_eq!(joined, json!("a, 1, true"));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        assert_eq!(call("toJson", vec![json!({"a": [1]})]).await.unwrap(), json!(r#"{"a":[1]}"#));

        let source = r#"{ "test": { "key": "value", "key2": "value2" } }"#;
        let parsed = call("jsonToMap", vec![json!(source)]).await.unwrap();
        assert_eq!(parsed["test"]["key2"], json!("value2"));
        assert!(call("jsonToMap", vec![json!("[1, 2]")]).await.is_err());
    }

    #[tokio::test]
    async fn test_jmespath_value_queries_maps() {
        let data = json!({"test": {"key": "value", "list": [1, 2, 3]}});

        let found = call("jmespathValue", vec![json!("test.key"), data.clone()]).await.unwrap();
        assert_eq!(found, json!("value"));
        let found =
            call("jmsepathValue", vec![json!("test.list[-1]"), data.clone()]).await.unwrap();
        assert_eq!(found, json!(3));
        let found = call("jmespathValue", vec![json!("test.missing"), data.clone()]).await.unwrap();
        assert_eq!(found, Value::Null);

        assert!(call("jmespathValue", vec![json!("test.["), data]).await.is_err());
    }

    #[tokio::test]
    async fn test_external_ip_is_shared_across_registries() {
        let first = call("externalIP", vec![]).await.unwrap();
        let first = first.as_str().unwrap().to_string();
        assert!(first.parse::<std::net::IpAddr>().is_ok() || first.starts_with("<ERR: "));

        if EXTERNAL_IP.get().is_some() {
            assert_eq!(call("externalIP", vec![]).await.unwrap(), json!(first));
        }
        assert!(call("externalIP", vec![json!("extra")]).await.is_err());
    }

    #[tokio::test]
    async fn test_file_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("present.txt");
        std::fs::write(&file, "type World").unwrap();
        let file = file.to_string_lossy().to_string();
        let missing = dir.path().join("missing.txt").to_string_lossy().to_string();

        assert_eq!(call("fileExists", vec![json!(file.clone())]).await.unwrap(), json!(true));
        assert_eq!(call("fileExists", vec![json!(missing.clone())]).await.unwrap(), json!(false));
        assert_eq!(call("readFile", vec![json!(file)]).await.unwrap(), json!("type World"));
        assert!(call("readFile", vec![json!(missing)]).await.is_err());
    }

    #[tokio::test]
    async fn test_vault_requires_string_arguments() {
        let err = call("vault", vec![json!(1), json!("value")]).await.unwrap_err();
        assert!(err.to_string().contains("path must be a string"));
    }

    #[tokio::test]
    async fn test_unconfigured_vault_reports_unavailable() {
        let err = call("vault", vec![json!("secret/path"), json!("value")]).await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }
}

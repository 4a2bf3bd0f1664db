//! Everything a template can see.
//!
//! The render context exposes:
//! - `.Env`: the process environment, captured on first use;
//! - `.System`: `OS` and `Arch` of the host, named as Go names them
//!   (`linux`, `darwin`, `amd64`, `arm64`, ...) so existing templates keep
//!   working;
//! - `.Data`: documents loaded with `--data name=file`.
//!
//! Functions are the engine built-ins plus the ones in [`functions`].

pub mod data;
pub mod functions;

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::Result;
use crate::secrets::SecretRegistry;
use crate::template::{Delimiters, FunctionRegistry, Template};

pub use data::load_data;

/// Render context and function set for one run.
#[derive(Debug)]
pub struct World {
    secrets: Arc<SecretRegistry>,
    data: Map<String, Value>,
    env: OnceCell<Value>,
}

impl World {
    pub fn new(secrets: Arc<SecretRegistry>) -> Self {
        Self { secrets, data: Map::new(), env: OnceCell::new() }
    }

    /// Sets the documents exposed under `.Data`.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Replaces the environment snapshot instead of reading the process
    /// environment.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env: Map<String, Value> =
            vars.into_iter().map(|(k, v)| (k.into(), Value::String(v.into()))).collect();
        self.env = OnceCell::with_value(Value::Object(env));
        self
    }

    /// `.Env`
    pub fn env(&self) -> &Value {
        self.env.get_or_init(|| {
            let vars: BTreeMap<String, String> = std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect();
            debug!(count = vars.len(), "Captured environment");
            json!(vars)
        })
    }

    /// `.System`
    pub fn system() -> Value {
        json!({ "OS": go_os(std::env::consts::OS), "Arch": go_arch(std::env::consts::ARCH) })
    }

    /// The value templates are rendered against.
    pub fn context(&self) -> Value {
        json!({
            "Env": self.env(),
            "System": Self::system(),
            "Data": Value::Object(self.data.clone()),
        })
    }

    /// Built-in functions plus secret, file and network helpers.
    pub fn functions(&self) -> FunctionRegistry {
        let mut registry = FunctionRegistry::with_builtins();
        functions::register(&mut registry, Arc::clone(&self.secrets));
        registry
    }

    /// Parses and renders `source`. Nothing is returned unless the whole
    /// template rendered.
    pub async fn render(&self, source: &str, delimiters: &Delimiters) -> Result<String> {
        let template = Template::parse_with_delimiters(source, delimiters)?;
        let output = template.render(&self.context(), &self.functions()).await?;
        Ok(output)
    }
}

fn go_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::template::TemplateError;

    fn world() -> World {
        World::new(Arc::new(SecretRegistry::default())).with_env([("TEST", "hello world")])
    }

    async fn render(world: &World, source: &str) -> Result<String> {
        world.render(source, &Delimiters::default()).await
    }

    #[tokio::test]
    async fn test_env_lookup() {
        assert_eq!(render(&world(), r#"{{ index .Env "TEST" }}"#).await.unwrap(), "hello world");
        assert_eq!(render(&world(), "{{ .Env.TEST }}").await.unwrap(), "hello world");
    }

    #[test]
    fn test_with_env_replaces_previous_snapshot() {
        let world = world().with_env([("OTHER", "second")]);

        assert_eq!(world.env()["OTHER"], "second");
        assert!(world.env().get("TEST").is_none());
    }

    #[tokio::test]
    async fn test_system_names_follow_go() {
        let out = render(&world(), "{{ .System.OS }}/{{ .System.Arch }}").await.unwrap();
        assert!(!out.contains("macos") && !out.contains("x86_64"));
        assert_eq!(go_os("macos"), "darwin");
        assert_eq!(go_arch("aarch64"), "arm64");
    }

    #[tokio::test]
    async fn test_data_range() {
        let mut data = Map::new();
        data.insert("items".to_string(), json!([1, 2, 3]));
        let world = world().with_data(data);

        let out = render(&world, "{{ range .Data.items }}> {{ . }}\n{{ end }}").await.unwrap();
        assert_eq!(out, "> 1\n> 2\n> 3\n");
    }

    #[tokio::test]
    async fn test_file_exists_in_conditionals() {
        let source = r#"{{ if fileExists "Cargo.toml" }}exists{{ else }}not found{{ end }}"#;
        assert_eq!(render(&world(), source).await.unwrap(), "exists");

        let source = r#"{{ if fileExists "missing-file.rs" }}exists{{ else }}not found{{ end }}"#;
        assert_eq!(render(&world(), source).await.unwrap(), "not found");
    }

    #[tokio::test]
    async fn test_json_to_map_in_pipeline() {
        let source = r#"{{ with jsonToMap `{"db": {"host": "h"}}` }}{{ .db.host }}{{ end }}"#;
        assert_eq!(render(&world(), source).await.unwrap(), "h");
    }

    #[tokio::test]
    async fn test_unconfigured_vault_fails_render() {
        let source = r#"Value: {{ vault "secret/path" "value" }}"#;
        let err = render(&world(), source).await.unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::Function { .. })));
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_unconfigured_azure_fails_render() {
        let err = render(&world(), r#"{{ azure "secret-path" }}"#).await.unwrap_err();
        assert!(err.to_string().contains("error calling azure"));
    }
}

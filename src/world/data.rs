//! `--data name=file` loading.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{Error, Result};

/// Loads each `name=file` definition, relative to `base_dir`.
///
/// Files ending in `.json` are parsed as JSON, everything else as YAML. The
/// result maps each name to its parsed document.
pub fn load_data(definitions: &[String], base_dir: &Path) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    for definition in definitions {
        let (name, file) = definition
            .split_once('=')
            .filter(|(name, file)| !name.is_empty() && !file.is_empty())
            .ok_or_else(|| {
                Error::data(definition.as_str(), "expected a definition of the form name=file")
            })?;

        let path = base_dir.join(file);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::data(name, format!("failed to read {}: {}", path.display(), e)))?;

        let value = if is_json(&path) {
            serde_json::from_str(&contents).map_err(|e| {
                Error::data(name, format!("invalid JSON in {}: {}", path.display(), e))
            })?
        } else {
            serde_yaml::from_str(&contents).map_err(|e| {
                Error::data(name, format!("invalid YAML in {}: {}", path.display(), e))
            })?
        };

        debug!(name = %name, path = %path.display(), "Loaded data file");
        data.insert(name.to_string(), value);
    }
    Ok(data)
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("items.yaml"), "- 1\n- 2\n- 3\n").unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"port": 8080}"#).unwrap();

        let data = load_data(&defs(&["items=items.yaml", "cfg=config.json"]), dir.path()).unwrap();

        assert_eq!(data["items"], json!([1, 2, 3]));
        assert_eq!(data["cfg"]["port"], json!(8080));
    }

    #[test]
    fn test_value_may_contain_equals_sign() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a=b.yaml"), "k: v\n").unwrap();

        let data = load_data(&defs(&["odd=a=b.yaml"]), dir.path()).unwrap();
        assert_eq!(data["odd"]["k"], json!("v"));
    }

    #[test]
    fn test_malformed_definition_is_error() {
        let err = load_data(&defs(&["no-equals"]), Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("name=file"));
        assert!(load_data(&defs(&["=file.yaml"]), Path::new(".")).is_err());
    }

    #[test]
    fn test_missing_or_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        assert!(load_data(&defs(&["x=missing.yaml"]), dir.path()).is_err());
        let err = load_data(&defs(&["x=bad.json"]), dir.path()).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }
}

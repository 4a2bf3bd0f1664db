//! Function registry and the built-in comparison, logic and indexing
//! functions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BoxError;
use super::exec::{is_true, type_name};

/// A function callable from a template.
///
/// Piped values arrive as the last argument.
#[async_trait]
pub trait TemplateFunction: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError>;
}

/// Adapter for plain closures.
struct SyncFunction<F>(F);

#[async_trait]
impl<F> TemplateFunction for SyncFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        (self.0)(args)
    }
}

/// Functions available to a template, by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn TemplateFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn("index", index);
        registry.register_fn("len", len);
        registry.register_fn("not", |args| {
            let [value] = expect_args::<1>("not", args)?;
            Ok(Value::Bool(!is_true(&value)))
        });
        registry.register_fn("and", |args| {
            let last =
                args.len().checked_sub(1).ok_or("and: wrong number of args: want at least 1")?;
            let decided = args.iter().position(|v| !is_true(v)).unwrap_or(last);
            Ok(args[decided].clone())
        });
        registry.register_fn("or", |args| {
            let last =
                args.len().checked_sub(1).ok_or("or: wrong number of args: want at least 1")?;
            let decided = args.iter().position(is_true).unwrap_or(last);
            Ok(args[decided].clone())
        });
        registry.register_fn("eq", |args| {
            if args.len() < 2 {
                return Err("eq: missing argument for comparison".into());
            }
            Ok(Value::Bool(args[1..].iter().any(|other| values_equal(&args[0], other))))
        });
        registry.register_fn("ne", |args| {
            let [a, b] = expect_args::<2>("ne", args)?;
            Ok(Value::Bool(!values_equal(&a, &b)))
        });
        registry
    }

    /// Registers `function` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, function: impl TemplateFunction + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Registers a synchronous closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.register(name, SyncFunction(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Unpacks exactly `N` arguments.
pub fn expect_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], BoxError> {
    let count = args.len();
    args.try_into()
        .map_err(|_| format!("{}: wrong number of args: want {} got {}", name, N, count).into())
}

/// Equality with numbers compared by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn index(args: Vec<Value>) -> Result<Value, BoxError> {
    let mut args = args.into_iter();
    let mut current = args.next().ok_or("index: wrong number of args: want at least 1")?;

    for key in args {
        current = match (&current, &key) {
            (Value::Array(items), Value::Number(n)) => {
                let position = n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| format!("index out of range: {}", n))?;
                items[position].clone()
            }
            (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Null, _) => return Err("index of untyped nil".into()),
            (collection, key) => {
                return Err(format!(
                    "can't index item of type {} with {}",
                    type_name(collection),
                    type_name(key)
                )
                .into())
            }
        };
    }
    Ok(current)
}

fn len(args: Vec<Value>) -> Result<Value, BoxError> {
    let [value] = expect_args::<1>("len", args)?;
    let length = match &value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("len of type {}", type_name(other)).into()),
    };
    Ok(Value::from(length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn call(name: &str, args: Vec<Value>) -> Result<Value, BoxError> {
        let registry = FunctionRegistry::with_builtins();
        registry.get(name).unwrap().call(args).await
    }

    #[tokio::test]
    async fn test_index_nested() {
        let data = json!({"a": [10, {"b": "deep"}]});
        let deep = call("index", vec![data.clone(), json!("a"), json!(1), json!("b")]).await;
        assert_eq!(deep.unwrap(), json!("deep"));
        assert_eq!(call("index", vec![data.clone(), json!("missing")]).await.unwrap(), Value::Null);
        assert!(call("index", vec![data, json!("a"), json!(5)]).await.is_err());
    }

    #[tokio::test]
    async fn test_len() {
        assert_eq!(call("len", vec![json!([1, 2, 3])]).await.unwrap(), json!(3));
        assert_eq!(call("len", vec![json!("abc")]).await.unwrap(), json!(3));
        assert!(call("len", vec![json!(5)]).await.is_err());
    }

    #[tokio::test]
    async fn test_logic_returns_deciding_operand() {
        assert_eq!(call("and", vec![json!(1), json!(""), json!(2)]).await.unwrap(), json!(""));
        assert_eq!(call("and", vec![json!(1), json!(2)]).await.unwrap(), json!(2));
        assert_eq!(call("or", vec![json!(0), json!("x")]).await.unwrap(), json!("x"));
        assert_eq!(call("or", vec![json!(0), json!(false)]).await.unwrap(), json!(false));
        assert_eq!(call("not", vec![json!([])]).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_eq_compares_numbers_by_value() {
        assert_eq!(call("eq", vec![json!(1), json!(1.0)]).await.unwrap(), json!(true));
        let any_equal = call("eq", vec![json!("a"), json!("b"), json!("a")]).await.unwrap();
        assert_eq!(any_equal, json!(true));
        assert_eq!(call("ne", vec![json!("a"), json!("b")]).await.unwrap(), json!(true));
        assert!(call("ne", vec![json!("a")]).await.is_err());
    }

    #[tokio::test]
    async fn test_register_async_function() {
        struct Answer;

        #[async_trait]
        impl TemplateFunction for Answer {
            async fn call(&self, _args: Vec<Value>) -> Result<Value, BoxError> {
                Ok(json!(42))
            }
        }

        let mut registry = FunctionRegistry::new();
        registry.register("answer", Answer);
        assert!(registry.contains("answer"));
        assert!(!registry.contains("index"));
        assert_eq!(registry.get("answer").unwrap().call(vec![]).await.unwrap(), json!(42));
    }
}

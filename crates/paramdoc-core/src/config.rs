//! Main Config type for paramdoc
//!
//! The Config type is the primary interface for loading a parameter document,
//! applying overrides and reading resolved values. Resolution is lazy and
//! memoized per node; cloning a Config starts over with an empty cache.

use std::path::Path;
use std::sync::Arc;

use crate::engine::{Engine, Resolution};
use crate::error::{Error, Result};
use crate::overrides::apply_overrides;
use crate::resolver::{builtin_registry, ResolverRegistry};
use crate::tree::Tree;
use crate::value::Value;

/// Options applied when a Config is built
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// `path=value` overrides applied to the raw document, in order
    pub overrides: Vec<String>,
    /// Resolve the whole document on the rayon pool
    pub parallel: bool,
}

/// The main configuration container
pub struct Config {
    /// The raw (unresolved) document, overrides applied
    raw: Arc<Value>,
    /// Engine holding the node tree, the frozen registry and the cache
    engine: Engine,
    /// Configuration options
    options: ConfigOptions,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("engine", &self.engine)
            .field("options", &self.options)
            .finish()
    }
}

impl Config {
    /// Create a new Config from a Value with the built-in resolvers
    pub fn new(value: Value) -> Self {
        Self::with_resolvers(value, builtin_registry().clone())
    }

    /// Create a Config with a custom resolver registry
    pub fn with_resolvers(value: Value, resolvers: ResolverRegistry) -> Self {
        Self::assemble(value, Arc::new(resolvers), ConfigOptions::default())
    }

    /// Create a Config with options; overrides are applied before anything resolves
    pub fn with_options(value: Value, options: ConfigOptions) -> Result<Self> {
        Self::build(value, Arc::new(builtin_registry().clone()), options)
    }

    /// Create a Config with a custom resolver registry and options
    pub fn with_resolvers_and_options(
        value: Value,
        resolvers: ResolverRegistry,
        options: ConfigOptions,
    ) -> Result<Self> {
        Self::build(value, Arc::new(resolvers), options)
    }

    fn build(mut value: Value, resolvers: Arc<ResolverRegistry>, options: ConfigOptions) -> Result<Self> {
        apply_overrides(&mut value, &options.overrides)?;
        Ok(Self::assemble(value, resolvers, options))
    }

    fn assemble(value: Value, resolvers: Arc<ResolverRegistry>, options: ConfigOptions) -> Self {
        let tree = Arc::new(Tree::from_value(value.clone()));
        log::trace!("Built document tree with {} nodes", tree.len());
        Self {
            raw: Arc::new(value),
            engine: Engine::from_shared(tree, resolvers),
            options,
        }
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml).map_err(|e| Error::load(e.to_string()))?;
        Ok(Self::new(value))
    }

    /// Load configuration from a YAML string with options
    pub fn from_yaml_with_options(yaml: &str, options: ConfigOptions) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml).map_err(|e| Error::load(e.to_string()))?;
        Self::with_options(value, options)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| Error::load(e.to_string()))?;
        Ok(Self::new(value))
    }

    /// Load configuration from a file; `.json` files are parsed as JSON,
    /// everything else as YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_options(path, ConfigOptions::default())
    }

    /// Load configuration from a file with options
    pub fn load_with_options(path: impl AsRef<Path>, options: ConfigOptions) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("Failed to read file '{}': {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let value: Value = if is_json {
            serde_json::from_str(&content).map_err(|e| Error::load(e.to_string()))?
        } else {
            serde_yaml::from_str(&content).map_err(|e| Error::load(e.to_string()))?
        };

        log::debug!("Loaded {}", path.display());
        Self::with_options(value, options)
    }

    /// A new Config with extra overrides applied on top of this one.
    ///
    /// The resolver registry is shared; the cache starts empty.
    pub fn with_overrides<S: AsRef<str>>(&self, overrides: &[S]) -> Result<Self> {
        let mut options = self.options.clone();
        options
            .overrides
            .extend(overrides.iter().map(|s| s.as_ref().to_string()));

        let mut value = (*self.raw).clone();
        apply_overrides(&mut value, overrides)?;
        Ok(Self::assemble(value, self.engine.registry().clone(), options))
    }

    /// The options this Config was built with
    pub fn options(&self) -> &ConfigOptions {
        &self.options
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the raw (unresolved) value at a path
    pub fn get_raw(&self, path: &str) -> Result<&Value> {
        self.raw.get_path(path)
    }

    /// Get a resolved value at a path
    ///
    /// Mappings and sequences resolve every leaf below them.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.engine.get(path)
    }

    /// Get a resolved string value, with type coercion if needed
    pub fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path)?;
        match value {
            Value::String(s) => Ok(s),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok("null".to_string()),
            _ => Err(Error::type_coercion(path, "string", value.type_name())),
        }
    }

    /// Get a resolved integer value, with type coercion if needed
    pub fn get_i64(&self, path: &str) -> Result<i64> {
        let value = self.get(path)?;
        match value {
            Value::Integer(i) => Ok(i),
            Value::String(s) => s
                .parse()
                .map_err(|_| Error::type_coercion(path, "integer", format!("string (\"{}\")", s))),
            _ => Err(Error::type_coercion(path, "integer", value.type_name())),
        }
    }

    /// Get a resolved float value, with type coercion if needed
    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let value = self.get(path)?;
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            Value::String(s) => s
                .parse()
                .map_err(|_| Error::type_coercion(path, "float", format!("string (\"{}\")", s))),
            _ => Err(Error::type_coercion(path, "float", value.type_name())),
        }
    }

    /// Get a resolved boolean value; strings must be "true" or "false"
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let value = self.get(path)?;
        match value {
            Value::Bool(b) => Ok(b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(Error::type_coercion(
                    path,
                    "boolean",
                    format!("string (\"{}\") - only \"true\" or \"false\" allowed", s),
                )),
            },
            _ => Err(Error::type_coercion(path, "boolean", value.type_name())),
        }
    }

    /// Resolve every leaf, collecting all failures
    pub fn resolve(&self) -> Resolution {
        if self.options.parallel {
            self.engine.resolve_parallel()
        } else {
            self.engine.resolve()
        }
    }

    /// Resolve every leaf; on failure returns the first error of the report
    pub fn resolve_all(&self) -> Result<Value> {
        self.resolve().into_result().map_err(|report| {
            let more = report.len().saturating_sub(1);
            let mut errors = report.into_errors().into_iter();
            match errors.next() {
                Some(first) if more > 0 => {
                    let help = match &first.help {
                        Some(help) => format!("{} ({} more node(s) also failed)", help, more),
                        None => format!("{} more node(s) also failed", more),
                    };
                    first.with_help(help)
                }
                Some(first) => first,
                None => Error::load("Resolution failed without errors"),
            }
        })
    }

    /// Export the configuration as a Value
    ///
    /// # Arguments
    /// * `resolve` - If true, resolve interpolations (${...}). If false, show placeholders.
    pub fn to_value(&self, resolve: bool) -> Result<Value> {
        if resolve {
            self.resolve_all()
        } else {
            Ok((*self.raw).clone())
        }
    }

    /// Export the configuration as YAML
    pub fn to_yaml(&self, resolve: bool) -> Result<String> {
        let value = self.to_value(resolve)?;
        serde_yaml::to_string(&value).map_err(|e| Error::io(e.to_string()))
    }

    /// Export the configuration as JSON
    pub fn to_json(&self, resolve: bool) -> Result<String> {
        let value = self.to_value(resolve)?;
        serde_json::to_string_pretty(&value).map_err(|e| Error::io(e.to_string()))
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            // Fresh cache, shared tree and registry
            engine: Engine::from_shared(
                Arc::clone(self.engine.tree()),
                Arc::clone(self.engine.registry()),
            ),
            options: self.options.clone(),
        }
    }
}

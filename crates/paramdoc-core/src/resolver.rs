//! Resolver system for paramdoc
//!
//! Resolvers are named, pure functions invoked from `${name:arg,...}`
//! expressions. Arguments arrive fully resolved, left to right.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::arith;
use crate::error::{Error, Result};
use crate::value::Value;

/// Process-wide registry of the built-in resolvers
static BUILTIN_REGISTRY: OnceLock<ResolverRegistry> = OnceLock::new();

/// The built-in resolvers, initialized on first use and never mutated.
///
/// Clone it to add custom resolvers for one engine.
pub fn builtin_registry() -> &'static ResolverRegistry {
    BUILTIN_REGISTRY.get_or_init(ResolverRegistry::with_builtins)
}

/// Context passed to resolvers
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    /// Path of the node whose expression is being evaluated
    pub config_path: String,
}

impl ResolverContext {
    /// Create a new resolver context
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

/// Trait for resolver implementations
pub trait Resolver: Send + Sync {
    /// Compute a value from already-resolved positional arguments
    fn resolve(&self, args: &[Value], ctx: &ResolverContext) -> Result<Value>;

    /// Get the name of this resolver
    fn name(&self) -> &str;
}

/// A simple function-based resolver
pub struct FnResolver<F>
where
    F: Fn(&[Value], &ResolverContext) -> Result<Value> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&[Value], &ResolverContext) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based resolver
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Resolver for FnResolver<F>
where
    F: Fn(&[Value], &ResolverContext) -> Result<Value> + Send + Sync,
{
    fn resolve(&self, args: &[Value], ctx: &ResolverContext) -> Result<Value> {
        (self.func)(args, ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of available resolvers
#[derive(Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &names)
            .finish()
    }
}

impl ResolverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Create a registry with the standard built-in resolvers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin_resolvers();
        registry
    }

    /// Register the built-in resolvers
    fn register_builtin_resolvers(&mut self) {
        self.register(Arc::new(FnResolver::new("eval", eval_resolver)));
        self.register(Arc::new(FnResolver::new(
            "resolve_default",
            resolve_default_resolver,
        )));
        self.register(Arc::new(FnResolver::new("if", if_resolver)));
        self.register(Arc::new(FnResolver::new("eq", eq_resolver)));
        self.register(Arc::new(FnResolver::new("contains", contains_resolver)));

        // Robot hand lookups
        self.register(Arc::new(FnResolver::new("dexhand_dofs", dexhand_dofs_resolver)));
        self.register(Arc::new(FnResolver::new(
            "dexhand_bodies",
            dexhand_bodies_resolver,
        )));
        self.register(Arc::new(FnResolver::new("side_variant", side_variant_resolver)));
    }

    /// Register a resolver, replacing any existing one with the same name
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.insert(resolver.name().to_string(), resolver);
    }

    /// Register a resolver with optional force overwrite.
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(Error)` if force=false and a resolver with the same name exists
    pub fn register_with_force(&mut self, resolver: Arc<dyn Resolver>, force: bool) -> Result<()> {
        let name = resolver.name().to_string();
        if self.resolvers.contains_key(&name) {
            if !force {
                return Err(Error::resolver_already_registered(&name));
            }
            log::warn!("Replacing registered resolver '{}'", name);
        }
        self.resolvers.insert(name, resolver);
        Ok(())
    }

    /// Register a function as a resolver
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value], &ResolverContext) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnResolver::new(name, func)));
    }

    /// Get a resolver by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.get(name)
    }

    /// Check if a resolver is registered
    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    /// Names of every registered resolver
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.resolvers.keys().map(String::as_str)
    }

    /// Invoke the named resolver.
    ///
    /// Errors are recorded against the context path unless the resolver
    /// already attached one.
    pub fn invoke(&self, name: &str, args: &[Value], ctx: &ResolverContext) -> Result<Value> {
        let resolver = self
            .resolvers
            .get(name)
            .ok_or_else(|| Error::unknown_resolver(name).with_path(ctx.config_path.clone()))?;

        log::trace!(
            "Invoking resolver '{}' with {} argument(s) for {}",
            name,
            args.len(),
            ctx.config_path
        );
        resolver
            .resolve(args, ctx)
            .map_err(|e| e.or_path(ctx.config_path.clone()))
    }
}

/// Check the argument count, returning the arguments as a fixed-size array
fn expect_args<'a, const N: usize>(
    resolver: &str,
    expected: &str,
    args: &'a [Value],
) -> Result<&'a [Value; N]> {
    <&[Value; N]>::try_from(args).map_err(|_| Error::bad_arguments(resolver, expected))
}

/// Textual form of a scalar argument; containers are rejected
fn scalar_text(resolver: &str, expected: &str, value: &Value) -> Result<String> {
    if value.is_container() {
        return Err(Error::bad_arguments(resolver, expected));
    }
    Ok(value.to_text())
}

/// Built-in arithmetic resolver
///
/// Usage:
///   ${eval:'2+3*4'}                - 14
///   ${eval:'${..base}*2'}          - quoted argument with an embedded reference
fn eval_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    const EXPECTED: &str = "expression";
    let [expr] = expect_args("eval", EXPECTED, args)?;
    let text = scalar_text("eval", EXPECTED, expr)?;

    arith::evaluate(&text)
        .map(Value::from)
        .map_err(|e| Error::bad_expression(&text, e.to_string()))
}

/// Built-in default-fallback resolver
///
/// Usage:
///   ${resolve_default:5e-4,${..lr}}  - `lr` unless it is null or ""
fn resolve_default_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    let [default, value] = expect_args("resolve_default", "default, override", args)?;
    if value.is_unset() {
        Ok(default.clone())
    } else {
        Ok(value.clone())
    }
}

/// Built-in conditional resolver; both branches are already resolved
fn if_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    let [condition, then, otherwise] = expect_args("if", "condition, then, else", args)?;
    if condition.is_truthy() {
        Ok(then.clone())
    } else {
        Ok(otherwise.clone())
    }
}

/// Case-insensitive textual equality
fn eq_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    const EXPECTED: &str = "a, b";
    let [a, b] = expect_args("eq", EXPECTED, args)?;
    let a = scalar_text("eq", EXPECTED, a)?;
    let b = scalar_text("eq", EXPECTED, b)?;
    Ok(Value::Bool(a.to_lowercase() == b.to_lowercase()))
}

/// Case-insensitive substring test; a sequence haystack matches by element
fn contains_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    const EXPECTED: &str = "needle, haystack";
    let [needle, haystack] = expect_args("contains", EXPECTED, args)?;
    let needle = scalar_text("contains", EXPECTED, needle)?.to_lowercase();

    let found = match haystack {
        Value::Sequence(items) => items
            .iter()
            .any(|item| !item.is_container() && item.to_text().to_lowercase() == needle),
        other => scalar_text("contains", EXPECTED, other)?
            .to_lowercase()
            .contains(&needle),
    };
    Ok(Value::Bool(found))
}

/// Degrees of freedom per supported robot hand
const DEXHAND_DOFS: &[(&str, i64)] = &[
    ("inspire", 12),
    ("allegro", 16),
    ("shadow", 24),
    ("arti_mano", 22),
    ("xhand", 12),
    ("ability", 10),
    ("schunk_svh", 20),
    ("leap", 16),
];

/// Rigid bodies per supported robot hand
const DEXHAND_BODIES: &[(&str, i64)] = &[
    ("inspire", 17),
    ("allegro", 21),
    ("shadow", 26),
    ("arti_mano", 23),
    ("xhand", 13),
    ("ability", 11),
    ("schunk_svh", 21),
    ("leap", 17),
];

fn table_lookup(resolver: &str, table: &[(&str, i64)], args: &[Value]) -> Result<Value> {
    const EXPECTED: &str = "hand";
    let [hand] = expect_args(resolver, EXPECTED, args)?;
    let key = scalar_text(resolver, EXPECTED, hand)?;
    let normalized = key.trim().to_lowercase();

    table
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, count)| Value::Integer(*count))
        .ok_or_else(|| {
            let known: Vec<&str> = table.iter().map(|(name, _)| *name).collect();
            Error::unknown_key(resolver, key, &known)
        })
}

fn dexhand_dofs_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    table_lookup("dexhand_dofs", DEXHAND_DOFS, args)
}

fn dexhand_bodies_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    table_lookup("dexhand_bodies", DEXHAND_BODIES, args)
}

/// Select the per-side variant of an asset or task name
///
/// Usage:
///   ${side_variant:ResDexHand,${..side},${..bimanual}}
///   - bimanual          -> ResDexHandBiH
///   - right / rh        -> ResDexHand
///   - left / lh         -> ResDexHandLH
fn side_variant_resolver(args: &[Value], _ctx: &ResolverContext) -> Result<Value> {
    const EXPECTED: &str = "value, side, bimanual";
    let [value, side, bimanual] = expect_args("side_variant", EXPECTED, args)?;
    let value = scalar_text("side_variant", EXPECTED, value)?;

    if bimanual.is_truthy() {
        return Ok(Value::String(format!("{}BiH", value)));
    }

    let side = scalar_text("side_variant", EXPECTED, side)?;
    match side.trim().to_lowercase().as_str() {
        "right" | "rh" => Ok(Value::String(value)),
        "left" | "lh" => Ok(Value::String(format!("{}LH", value))),
        _ => Err(Error::bad_arguments("side_variant", EXPECTED)
            .with_help(format!("Side must be left, lh, right or rh, got '{}'", side))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ResolverErrorKind};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn invoke(name: &str, args: Vec<Value>) -> Result<Value> {
        builtin_registry().invoke(name, &args, &ResolverContext::new("test.path"))
    }

    fn resolver_kind(err: &Error) -> &ResolverErrorKind {
        match &err.kind {
            ErrorKind::Resolver(kind) => kind,
            other => panic!("Expected resolver error, got {:?}", other),
        }
    }

    #[test]
    fn test_eval_resolver() {
        assert_eq!(invoke("eval", vec!["2+3*4".into()]).unwrap(), Value::Integer(14));
        assert_eq!(invoke("eval", vec!["(2+3)*4".into()]).unwrap(), Value::Integer(20));
        assert_eq!(invoke("eval", vec!["10 / 4".into()]).unwrap(), Value::Float(2.5));
        assert_eq!(invoke("eval", vec![Value::Integer(7)]).unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_eval_division_by_zero() {
        let err = invoke("eval", vec!["1/0".into()]).unwrap_err();
        assert!(matches!(
            resolver_kind(&err),
            ResolverErrorKind::BadExpression { .. }
        ));
        assert_eq!(err.path.as_deref(), Some("test.path"));
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_eval_arity() {
        let err = invoke("eval", vec!["1".into(), "2".into()]).unwrap_err();
        assert_eq!(
            resolver_kind(&err),
            &ResolverErrorKind::BadArguments {
                resolver: "eval".into(),
                expected: "expression".into()
            }
        );
    }

    #[test]
    fn test_resolve_default() {
        assert_eq!(
            invoke("resolve_default", vec![Value::Float(5e-4), Value::Null]).unwrap(),
            Value::Float(5e-4)
        );
        assert_eq!(
            invoke("resolve_default", vec![Value::Float(5e-4), "".into()]).unwrap(),
            Value::Float(5e-4)
        );
        assert_eq!(
            invoke("resolve_default", vec![Value::Float(5e-4), Value::Float(1e-3)]).unwrap(),
            Value::Float(1e-3)
        );
        assert_eq!(
            invoke("resolve_default", vec![Value::Integer(8), Value::Integer(0)]).unwrap(),
            Value::Integer(0)
        );
        assert_eq!(
            invoke("resolve_default", vec![Value::Bool(true), Value::Bool(false)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_if_resolver() {
        let pick = |cond: Value| invoke("if", vec![cond, "a".into(), "b".into()]).unwrap();
        assert_eq!(pick(Value::Bool(true)), Value::from("a"));
        assert_eq!(pick(Value::Integer(3)), Value::from("a"));
        assert_eq!(pick("no".into()), Value::from("a"));
        assert_eq!(pick(Value::Bool(false)), Value::from("b"));
        assert_eq!(pick(Value::Integer(0)), Value::from("b"));
        assert_eq!(pick(Value::Float(0.0)), Value::from("b"));
        assert_eq!(pick("".into()), Value::from("b"));
        assert_eq!(pick(Value::Null), Value::from("b"));
        assert_eq!(pick(Value::Sequence(vec![])), Value::from("b"));

        assert!(invoke("if", vec![Value::Bool(true), "a".into()]).is_err());
    }

    #[test]
    fn test_eq_and_contains() {
        assert_eq!(
            invoke("eq", vec!["Allegro".into(), "allegro".into()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            invoke("eq", vec![Value::Integer(1), "1".into()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            invoke("eq", vec!["a".into(), "b".into()]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            invoke("contains", vec!["hand".into(), "ResDexHand".into()]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            invoke(
                "contains",
                vec!["RH".into(), Value::from(vec!["lh", "rh"])]
            )
            .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            invoke("contains", vec!["x".into(), "abc".into()]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_dexhand_lookups() {
        assert_eq!(
            invoke("dexhand_dofs", vec!["allegro".into()]).unwrap(),
            Value::Integer(16)
        );
        assert_eq!(
            invoke("dexhand_dofs", vec!["Inspire".into()]).unwrap(),
            invoke("dexhand_dofs", vec!["inspire".into()]).unwrap()
        );
        assert_eq!(
            invoke("dexhand_bodies", vec!["shadow".into()]).unwrap(),
            Value::Integer(26)
        );

        let err = invoke("dexhand_dofs", vec!["robotiq".into()]).unwrap_err();
        assert_eq!(
            resolver_kind(&err),
            &ResolverErrorKind::UnknownKey {
                resolver: "dexhand_dofs".into(),
                key: "robotiq".into()
            }
        );
        assert!(err.to_string().contains("Known keys: inspire, allegro"));
    }

    #[test]
    fn test_side_variant() {
        let variant = |side: &str, bimanual: bool| {
            invoke(
                "side_variant",
                vec!["ResDexHand".into(), side.into(), Value::Bool(bimanual)],
            )
        };
        assert_eq!(variant("right", false).unwrap(), Value::from("ResDexHand"));
        assert_eq!(variant("RH", false).unwrap(), Value::from("ResDexHand"));
        assert_eq!(variant("left", false).unwrap(), Value::from("ResDexHandLH"));
        assert_eq!(variant("lh", false).unwrap(), Value::from("ResDexHandLH"));
        assert_eq!(variant("left", true).unwrap(), Value::from("ResDexHandBiH"));

        let err = variant("middle", false).unwrap_err();
        assert!(matches!(
            resolver_kind(&err),
            ResolverErrorKind::BadArguments { .. }
        ));
    }

    #[test]
    fn test_unknown_resolver() {
        let err = invoke("nope", vec![]).unwrap_err();
        assert_eq!(
            resolver_kind(&err),
            &ResolverErrorKind::UnknownResolver {
                name: "nope".into()
            }
        );
        assert_eq!(err.path.as_deref(), Some("test.path"));
    }

    #[test]
    fn test_register_with_force() {
        let mut registry = ResolverRegistry::with_builtins();
        let custom = Arc::new(FnResolver::new("eval", |_: &[Value], _: &ResolverContext| {
            Ok(Value::Integer(0))
        }));

        let err = registry
            .register_with_force(custom.clone(), false)
            .unwrap_err();
        assert_eq!(
            resolver_kind(&err),
            &ResolverErrorKind::AlreadyRegistered {
                name: "eval".into()
            }
        );

        registry.register_with_force(custom, true).unwrap();
        let ctx = ResolverContext::new("x");
        assert_eq!(
            registry.invoke("eval", &["1+1".into()], &ctx).unwrap(),
            Value::Integer(0)
        );
        // The shared built-ins are untouched
        assert_eq!(
            builtin_registry().invoke("eval", &["1+1".into()], &ctx).unwrap(),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_register_fn_counts_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = ResolverRegistry::new();
        registry.register_fn("count", move |args, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Integer(args.len() as i64))
        });

        assert!(registry.contains("count"));
        assert!(!registry.contains("eval"));
        let result = registry
            .invoke("count", &[Value::Null, Value::Null], &ResolverContext::new("x"))
            .unwrap();
        assert_eq!(result, Value::Integer(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_error_keeps_its_path() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("fail", |_, _| {
            Err(Error::resolver_custom("fail", "boom").with_path("elsewhere"))
        });
        let err = registry
            .invoke("fail", &[], &ResolverContext::new("x"))
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("elsewhere"));
    }
}

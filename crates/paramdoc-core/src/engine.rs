//! Evaluation engine
//!
//! Resolves interpolation expressions node by node. Every node is evaluated
//! at most once per engine; concurrent requests for a node in progress wait
//! for its owner. Whole-document resolution never stops at the first
//! failure: each failed leaf is recorded in an [`ErrorReport`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use rayon::prelude::*;

use crate::cache::{Claim, Flight, NodeState, ResolutionCache};
use crate::error::{Error, ErrorKind, ErrorReport, Result};
use crate::interpolation::{self, Argument, Interpolation, PathReference};
use crate::path::resolve_path;
use crate::resolver::{ResolverContext, ResolverRegistry};
use crate::stack::ensure_sufficient_stack;
use crate::tree::{NodeId, NodeKind, Tree};
use crate::value::Value;

/// Result of resolving a whole document
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The resolved document; failed leaves keep their raw text
    pub value: Value,
    /// Every failed leaf, in document order
    pub report: ErrorReport,
}

impl Resolution {
    /// True when every leaf resolved
    pub fn is_ok(&self) -> bool {
        self.report.is_empty()
    }

    /// The resolved value, or the report if any leaf failed
    pub fn into_result(self) -> std::result::Result<Value, ErrorReport> {
        if self.report.is_empty() {
            Ok(self.value)
        } else {
            Err(self.report)
        }
    }
}

/// Resolve every leaf of `tree` with `registry`
pub fn resolve(tree: Tree, registry: ResolverRegistry) -> Resolution {
    Engine::new(tree, registry).resolve()
}

/// Resolves the nodes of one tree against one registry
pub struct Engine {
    tree: Arc<Tree>,
    registry: Arc<ResolverRegistry>,
    cache: ResolutionCache,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("nodes", &self.tree.len())
            .field("registry", &self.registry)
            .field("completed", &self.cache.completed())
            .finish()
    }
}

impl Engine {
    /// Create an engine; the registry is frozen from here on
    pub fn new(tree: Tree, registry: ResolverRegistry) -> Self {
        Self::from_shared(Arc::new(tree), Arc::new(registry))
    }

    /// Create an engine over an already shared tree and registry, with an empty cache
    pub fn from_shared(tree: Arc<Tree>, registry: Arc<ResolverRegistry>) -> Self {
        Self {
            tree,
            registry,
            cache: ResolutionCache::new(),
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn registry(&self) -> &Arc<ResolverRegistry> {
        &self.registry
    }

    /// Cached state of a node
    pub fn state(&self, node: NodeId) -> NodeState {
        self.cache.state(node)
    }

    /// Resolve one node. Containers resolve to a Mapping/Sequence of their
    /// resolved leaves; the first failing leaf is returned.
    pub fn resolve_node(&self, node: NodeId) -> Result<Value> {
        self.resolve_id(node, &mut Flight::new())
    }

    /// Resolve the node at an absolute dotted path
    pub fn get(&self, path: &str) -> Result<Value> {
        let node = self.tree.lookup(path)?;
        self.resolve_node(node)
    }

    /// Resolve every leaf in document order
    pub fn resolve(&self) -> Resolution {
        let results = self
            .tree
            .leaves()
            .into_iter()
            .map(|leaf| (leaf, self.resolve_leaf(leaf, &mut Flight::new())))
            .collect();
        self.assemble(results)
    }

    /// Resolve every leaf, distributing leaves over the rayon pool
    pub fn resolve_parallel(&self) -> Resolution {
        let results = self
            .tree
            .leaves()
            .into_par_iter()
            .map(|leaf| (leaf, self.resolve_leaf(leaf, &mut Flight::new())))
            .collect();
        self.assemble(results)
    }

    fn assemble(&self, results: Vec<(NodeId, Result<Value>)>) -> Resolution {
        let mut report = ErrorReport::new();
        let mut resolved = HashMap::with_capacity(results.len());
        for (leaf, result) in results {
            match result {
                Ok(value) => {
                    resolved.insert(leaf, value);
                }
                Err(err) => report.push(err.or_path(self.tree.path_of(leaf))),
            }
        }

        log::debug!(
            "Resolved {} leaves, {} failed",
            resolved.len(),
            report.len()
        );

        let mut leaf = |id: NodeId, raw: &Value| {
            Ok::<_, Infallible>(resolved.remove(&id).unwrap_or_else(|| raw.clone()))
        };
        let value = match self.tree.rebuild(self.tree.root(), &mut leaf) {
            Ok(value) => value,
            Err(never) => match never {},
        };
        Resolution { value, report }
    }

    fn resolve_id(&self, node: NodeId, flight: &mut Flight) -> Result<Value> {
        match self.tree.node(node).kind {
            NodeKind::Scalar(_) => self.resolve_leaf(node, flight),
            _ => self
                .tree
                .rebuild(node, &mut |leaf, _| self.resolve_leaf(leaf, flight)),
        }
    }

    fn resolve_leaf(&self, node: NodeId, flight: &mut Flight) -> Result<Value> {
        let raw = match self.tree.node(node).scalar() {
            Some(Value::String(s)) if interpolation::needs_processing(s) => s,
            Some(value) => return Ok(value.clone()),
            None => return self.resolve_id(node, flight),
        };

        match self.cache.claim(node, flight) {
            Claim::Ready(result) => result,
            Claim::Cycle(nodes) => {
                let chain: Vec<String> = nodes.iter().map(|n| self.tree.path_of(*n)).collect();
                log::debug!("Circular reference detected: {}", chain.join(" -> "));
                Err(Error::circular_reference(self.tree.path_of(node), chain))
            }
            Claim::Owned => {
                flight.push(node);
                let result = ensure_sufficient_stack(|| self.evaluate(node, raw, flight));
                flight.pop();
                self.cache.complete(node, &result);
                result
            }
        }
    }

    fn evaluate(&self, node: NodeId, raw: &str, flight: &mut Flight) -> Result<Value> {
        let path = self.tree.path_of(node);
        log::trace!("Evaluating {}: {}", path, raw);

        let expr = interpolation::parse(raw).map_err(|e| e.with_path(path.clone()))?;
        let origin = Origin { node, path: &path };
        self.eval_expr(&expr, &origin, flight)
    }

    fn eval_expr(&self, expr: &Interpolation, origin: &Origin, flight: &mut Flight) -> Result<Value> {
        match expr {
            Interpolation::Literal(s) => Ok(Value::String(s.clone())),
            Interpolation::Reference(reference) => self.eval_reference(reference, origin, flight),
            Interpolation::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(ensure_sufficient_stack(|| {
                        self.eval_argument(arg, origin, flight)
                    })?);
                }
                self.registry
                    .invoke(name, &values, &ResolverContext::new(origin.path))
            }
            Interpolation::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval_expr(part, origin, flight)?.to_text());
                }
                Ok(Value::String(out))
            }
        }
    }

    fn eval_argument(&self, arg: &Argument, origin: &Origin, flight: &mut Flight) -> Result<Value> {
        match arg {
            Argument::Literal(token) => Ok(Value::from_scalar(token)),
            Argument::Quoted(expr) => self
                .eval_expr(expr, origin, flight)
                .map(|value| Value::String(value.to_text())),
            Argument::Nested(expr) => self.eval_expr(expr, origin, flight),
        }
    }

    fn eval_reference(
        &self,
        reference: &PathReference,
        origin: &Origin,
        flight: &mut Flight,
    ) -> Result<Value> {
        let target = resolve_path(&self.tree, reference, origin.node)
            .map_err(|e| e.with_path(origin.path))?;

        self.resolve_id(target, flight)
            .map_err(|err| self.dependency_error(err, origin, target))
    }

    /// The error a node gets when a node it references failed
    fn dependency_error(&self, err: Error, origin: &Origin, target: NodeId) -> Error {
        if let ErrorKind::CircularReference { chain } = &err.kind {
            if chain.iter().any(|p| p == origin.path) {
                return err.with_path(origin.path);
            }
        }
        let failed_at = err
            .path
            .clone()
            .unwrap_or_else(|| self.tree.path_of(target));
        Error::dependency(origin.path, failed_at, &err)
    }
}

/// The node whose expression is being evaluated
struct Origin<'a> {
    node: NodeId,
    path: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PathErrorKind, ResolverErrorKind};
    use crate::resolver::builtin_registry;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine(yaml: &str) -> Engine {
        engine_with(yaml, builtin_registry().clone())
    }

    fn engine_with(yaml: &str, registry: ResolverRegistry) -> Engine {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        Engine::new(Tree::from_value(value), registry)
    }

    fn counting_registry() -> (ResolverRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = builtin_registry().clone();
        registry.register_fn("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(Value::Integer(42))
        });
        (registry, calls)
    }

    fn chain_of(err: &Error) -> Vec<String> {
        match &err.kind {
            ErrorKind::CircularReference { chain } => chain.clone(),
            ErrorKind::Dependency { chain, .. } => chain.clone(),
            other => panic!("Expected a chained error, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_values_pass_through() {
        let e = engine("{a: 1, b: true, c: text, d: null}");
        let resolution = e.resolve();
        assert!(resolution.is_ok());
        assert_eq!(
            resolution.value,
            serde_yaml::from_str::<Value>("{a: 1, b: true, c: text, d: null}").unwrap()
        );
    }

    #[test]
    fn test_scaled_from_top_level() {
        let e = engine("base: 10\nscaled: \"${eval:'${..base}*2'}\"");
        assert_eq!(e.get("scaled").unwrap(), Value::Integer(20));
    }

    #[test]
    fn test_single_reference_keeps_type() {
        let e = engine(
            r#"
train:
  lr: 0.0003
  epochs: 8
  copy_lr: ${.lr}
  label: "lr=${.lr}, epochs=${.epochs}"
  flags: {fast: true}
  flags_copy: ${.flags}
"#,
        );
        assert_eq!(e.get("train.copy_lr").unwrap(), Value::Float(0.0003));
        assert_eq!(
            e.get("train.label").unwrap(),
            Value::from("lr=0.0003, epochs=8")
        );
        assert_eq!(
            e.get("train.flags_copy").unwrap(),
            serde_yaml::from_str::<Value>("{fast: true}").unwrap()
        );
    }

    #[test]
    fn test_escaped_interpolation_is_literal() {
        let e = engine(r#"a: '\${not.a.ref}'"#);
        assert_eq!(e.get("a").unwrap(), Value::from("${not.a.ref}"));
    }

    #[test]
    fn test_container_reference_resolves_leaves() {
        let e = engine(
            r#"
defaults:
  lr: ${eval:'1/4'}
  sizes: [64, "${eval:'64*2'}"]
run: ${defaults}
"#,
        );
        assert_eq!(
            e.get("run").unwrap(),
            serde_yaml::from_str::<Value>("{lr: 0.25, sizes: [64, 128]}").unwrap()
        );
    }

    #[test]
    fn test_resolver_arguments_are_typed() {
        let e = engine(
            r#"
lr: null
actual: ${resolve_default:5e-4,${.lr}}
override: 0.001
picked: ${resolve_default:5e-4,${.override}}
hand: allegro
dofs: ${dexhand_dofs:${.hand}}
bodies_times_two: "${eval:'${dexhand_bodies:${.hand}} * 2'}"
"#,
        );
        assert_eq!(e.get("actual").unwrap(), Value::Float(5e-4));
        assert_eq!(e.get("picked").unwrap(), Value::Float(0.001));
        assert_eq!(e.get("dofs").unwrap(), Value::Integer(16));
        assert_eq!(e.get("bodies_times_two").unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_conditional_and_side_variant() {
        let e = engine(
            r#"
task:
  side: left
  bimanual: false
  name: ${side_variant:ResDexHand,${.side},${.bimanual}}
  is_left: ${eq:${.side},LEFT}
  episode_length: ${if:${.is_left},150,300}
"#,
        );
        assert_eq!(e.get("task.name").unwrap(), Value::from("ResDexHandLH"));
        assert_eq!(e.get("task.is_left").unwrap(), Value::Bool(true));
        assert_eq!(e.get("task.episode_length").unwrap(), Value::Integer(150));
    }

    #[test]
    fn test_single_flight_counts_once() {
        let (registry, calls) = counting_registry();
        let e = engine_with(
            r#"
shared: ${count:}
a: ${.shared}
b: ${.shared}
c: "${.shared}-${.shared}"
"#,
            registry,
        );
        let resolution = e.resolve();
        assert!(resolution.is_ok(), "{}", resolution.report);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(e.get("c").unwrap(), Value::from("42-42"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_flight_counts_once_in_parallel() {
        let (registry, calls) = counting_registry();
        let refs: String = (0..64).map(|i| format!("r{}: ${{shared}}\n", i)).collect();
        let e = engine_with(&format!("shared: ${{count:}}\n{}", refs), registry);

        let resolution = e.resolve_parallel();
        assert!(resolution.is_ok(), "{}", resolution.report);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.value.get_path("r63").unwrap(), &Value::Integer(42));
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        for order in ["a: ${b}\nb: ${a}", "b: ${a}\na: ${b}"] {
            let e = engine(order);
            let resolution = e.resolve();
            assert_eq!(resolution.report.len(), 2);

            for path in ["a", "b"] {
                let err = resolution.report.get(path).unwrap();
                assert!(err.is_cycle(), "{}", err);
                let chain = chain_of(err);
                assert!(chain.contains(&"a".to_string()));
                assert!(chain.contains(&"b".to_string()));
                assert_eq!(chain.first(), chain.last());
            }
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let e = engine("a: x${a}");
        let err = e.get("a").unwrap_err();
        assert_eq!(chain_of(&err), vec!["a".to_string(), "a".into()]);
    }

    #[test]
    fn test_cycle_in_parallel_terminates() {
        let e = engine("a: ${b}\nb: ${c}\nc: ${a}\nd: ${a}");
        let resolution = e.resolve_parallel();
        assert_eq!(resolution.report.len(), 4);
        for path in ["a", "b", "c"] {
            assert!(resolution.report.get(path).unwrap().is_cycle());
        }
        let d = resolution.report.get("d").unwrap();
        match &d.kind {
            ErrorKind::Dependency { chain, root } => {
                assert_eq!(chain[0], "d");
                assert!(matches!(**root, ErrorKind::CircularReference { .. }));
            }
            other => panic!("Expected Dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_dependency_chain() {
        let e = engine("a: ${b}\nb: ${c}\nc: ${missing}");
        let resolution = e.resolve();
        assert_eq!(resolution.report.len(), 3);

        let c = resolution.report.get("c").unwrap();
        assert!(matches!(
            c.kind,
            ErrorKind::Path(PathErrorKind::NotFound { .. })
        ));

        let a = resolution.report.get("a").unwrap();
        assert_eq!(chain_of(a), vec!["a".to_string(), "b".into(), "c".into()]);
        match &a.kind {
            ErrorKind::Dependency { root, .. } => assert!(matches!(
                **root,
                ErrorKind::Path(PathErrorKind::NotFound { .. })
            )),
            other => panic!("Expected Dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_report_aggregates_and_keeps_raw_text() {
        let e = engine(
            r#"
ok: ${eval:'1+1'}
broken: ${nope:1}
parse: ${eval:'1+
deep:
  x: 1
  y: ${....x}
"#,
        );
        let resolution = e.resolve();
        assert_eq!(resolution.report.len(), 3);

        let paths: Vec<&str> = resolution
            .report
            .iter()
            .filter_map(|err| err.path.as_deref())
            .collect();
        assert_eq!(paths, vec!["broken", "parse", "deep.y"]);

        assert!(matches!(
            resolution.report.get("broken").unwrap().kind,
            ErrorKind::Resolver(ResolverErrorKind::UnknownResolver { .. })
        ));
        assert!(matches!(
            resolution.report.get("parse").unwrap().kind,
            ErrorKind::Parse { .. }
        ));
        assert!(matches!(
            resolution.report.get("deep.y").unwrap().kind,
            ErrorKind::Path(PathErrorKind::OutOfBounds { .. })
        ));

        assert_eq!(resolution.value.get_path("ok").unwrap(), &Value::Integer(2));
        assert_eq!(
            resolution.value.get_path("broken").unwrap(),
            &Value::from("${nope:1}")
        );
        assert!(resolution.into_result().is_err());
    }

    #[test]
    fn test_floats_stay_floats_when_spliced() {
        let e = engine(
            r#"
big: 1.0e+20
huge_product: "${eval:'${.big}*2'}"
near_limit: 5.0e+18
scaled: "${eval:'${.near_limit}*4'}"
whole: 2.0
tripled: "${eval:'${.whole}*3'}"
label: v${.whole}
"#,
        );
        assert_eq!(e.get("huge_product").unwrap(), Value::Float(2e20));
        assert_eq!(e.get("scaled").unwrap(), Value::Float(2e19));
        assert_eq!(e.get("tripled").unwrap(), Value::Float(6.0));
        assert_eq!(e.get("label").unwrap(), Value::from("v2.0"));
    }

    #[test]
    fn test_long_reference_chain() {
        let depth = 3000;
        let mut yaml: String = (0..depth)
            .map(|i| format!("k{}: ${{k{}}}\n", i, i + 1))
            .collect();
        yaml.push_str(&format!("k{}: 1\n", depth));

        let e = engine(&yaml);
        assert_eq!(e.get("k0").unwrap(), Value::Integer(1));
        let resolution = e.resolve();
        assert!(resolution.is_ok(), "{}", resolution.report);

        let e = engine(&yaml);
        let resolution = e.resolve_parallel();
        assert!(resolution.is_ok(), "{}", resolution.report);
        assert_eq!(resolution.value.get_path("k0").unwrap(), &Value::Integer(1));
    }

    #[test]
    fn test_unselected_branch_still_fails() {
        let e = engine(
            r#"
x: ${if:true,1,${missing}}
broken: ${nope:1}
z: ${if:false,${.broken},3}
y: 2
"#,
        );
        let resolution = e.resolve();
        assert_eq!(resolution.report.len(), 3);

        let x = resolution.report.get("x").unwrap();
        assert_eq!(
            x.kind,
            ErrorKind::Path(PathErrorKind::NotFound {
                segment: "missing".into()
            })
        );

        let z = resolution.report.get("z").unwrap();
        match &z.kind {
            ErrorKind::Dependency { chain, root } => {
                assert_eq!(chain, &vec!["z".to_string(), "broken".into()]);
                assert!(matches!(
                    **root,
                    ErrorKind::Resolver(ResolverErrorKind::UnknownResolver { .. })
                ));
            }
            other => panic!("Expected Dependency, got {:?}", other),
        }
        assert_eq!(resolution.value.get_path("y").unwrap(), &Value::Integer(2));
    }

    #[test]
    fn test_node_states() {
        let e = engine("a: ${eval:'2*3'}\nb: plain");
        let a = e.tree().lookup("a").unwrap();
        assert_eq!(e.state(a), NodeState::Unresolved);
        e.resolve_node(a).unwrap();
        assert_eq!(e.state(a), NodeState::Resolved(Value::Integer(6)));
    }

    #[test]
    fn test_free_resolve() {
        let tree = Tree::from_value(serde_yaml::from_str("{x: 2, y: '${eval:\"${.x}*3\"}'}").unwrap());
        let value = resolve(tree, builtin_registry().clone())
            .into_result()
            .unwrap();
        assert_eq!(value.get_path("y").unwrap(), &Value::Integer(6));
    }
}

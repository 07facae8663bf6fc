//! Dependency resolution, split into a cheap readiness test re-run on every
//! notification and a build step run once readiness is confirmed.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::tracker::{Continuation, Waiter};
use crate::types::{Dependency, DependencyKind, Value};

/// A dependency value gathered by [`build`], tagged with how it is used.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub kind: DependencyKind,
    pub value: Value,
}

/// Waiter over the bare names of `dependencies` (property paths ignored,
/// duplicates collapsed) that runs `continuation` once all are ready.
pub(crate) fn ready(owner: &str, dependencies: &[Dependency], continuation: Continuation) -> Waiter {
    let mut remaining: Vec<String> = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        if !remaining.contains(&dependency.name) {
            remaining.push(dependency.name.clone());
        }
    }
    Waiter::new(owner.to_string(), remaining, continuation)
}

/// Look up every dependency of `owner`, in declaration order.
pub(crate) fn build(
    registry: &Registry,
    owner: &str,
    dependencies: &[Dependency],
) -> Result<Vec<Resolved>> {
    dependencies
        .iter()
        .map(|dependency| {
            let value = registry.get(&dependency.name).ok_or_else(|| {
                Error::MissingDependency {
                    module: owner.to_string(),
                    dependency: dependency.name.clone(),
                }
            })?;
            let value = match &dependency.property {
                Some(path) => property(&dependency.name, value, path)?,
                None => value.clone(),
            };
            Ok(Resolved {
                kind: dependency.kind,
                value,
            })
        })
        .collect()
}

/// Resolve a dotted property path inside a data module. Array elements are
/// addressed by index; null counts as absent.
pub fn property(module: &str, value: &Value, path: &str) -> Result<Value> {
    let mut current = match value {
        Value::Data(data) => data,
        Value::Function(_) => {
            return Err(Error::InvalidPropertyAccess {
                module: module.to_string(),
                property: path.to_string(),
            });
        }
    };
    for segment in path.split('.') {
        let next = match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        current = next
            .filter(|value| !value.is_null())
            .ok_or_else(|| Error::PropertyNotFound {
                module: module.to_string(),
                property: path.to_string(),
            })?;
    }
    Ok(Value::Data(current.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::types::Function;
    use serde_json::json;

    #[test]
    fn readiness_ignores_property_paths_and_duplicates() {
        let dependencies = ["a.B#x", "a.B", "is:c.D"].map(Dependency::parse);
        let waiter = ready("owner", &dependencies, Box::new(|_: &Namespace| {}));
        assert_eq!(waiter.remaining(), ["a.B", "c.D"]);
    }

    #[test]
    fn build_tags_values_in_declaration_order() {
        let mut registry = Registry::new();
        registry.put("a.B", Value::from(json!({"x": [1, 2]}))).unwrap();
        registry.put("c.D", Value::from(json!({"d": true}))).unwrap();

        let dependencies = ["is:c.D", "a.B#x.0"].map(Dependency::parse);
        let resolved = build(&registry, "owner", &dependencies).unwrap();
        assert_eq!(resolved[0].kind, DependencyKind::Is);
        assert_eq!(resolved[0].value, Value::from(json!({"d": true})));
        assert_eq!(resolved[1].kind, DependencyKind::Use);
        assert_eq!(resolved[1].value, Value::from(json!(1)));

        let missing = [Dependency::parse("e.F")];
        assert!(matches!(
            build(&registry, "owner", &missing),
            Err(Error::MissingDependency { dependency, .. }) if dependency == "e.F"
        ));
    }

    #[test]
    fn property_lookup_errors() {
        let data = Value::from(json!({"a": {"b": null}, "list": [1]}));
        assert!(matches!(property("m", &data, "a.b"), Err(Error::PropertyNotFound { .. })));
        assert!(matches!(property("m", &data, "list.3"), Err(Error::PropertyNotFound { .. })));
        assert!(matches!(property("m", &data, "list.x"), Err(Error::PropertyNotFound { .. })));

        let function = Value::from(Function::new(|_| Ok(Value::from(json!({})))));
        assert!(matches!(
            property("f", &function, "name"),
            Err(Error::InvalidPropertyAccess { .. })
        ));
    }
}

//! Deep merge of capability objects.

use crate::error::{Error, Result};
use crate::types::{Object, Value};

/// Merge `source` into `target`. Nested objects present on both sides are
/// merged recursively; any other value in `source` overwrites.
pub fn extend(target: &mut Object, source: &Object) {
    for (key, value) in source {
        if let (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) =
            (target.get_mut(key), value)
        {
            extend(existing, incoming);
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Merge `sources` left to right into `target`.
pub fn extend_all<'a, I>(mut target: Object, sources: I) -> Object
where
    I: IntoIterator<Item = &'a Object>,
{
    for source in sources {
        extend(&mut target, source);
    }
    target
}

/// Compose `mixins` onto a freshly constructed module value.
///
/// A function receives the mixins on its prototype. An object is rebuilt
/// from the mixins with its own members layered on top. A function used as
/// a mixin contributes its prototype; scalar mixins are skipped.
pub fn compose(module: &str, base: Value, mixins: &[Value]) -> Result<Value> {
    if mixins.is_empty() {
        return Ok(base);
    }
    let sources: Vec<&Object> = mixins
        .iter()
        .filter_map(|mixin| match mixin {
            Value::Data(serde_json::Value::Object(object)) => Some(object),
            Value::Function(function) => Some(function.prototype()),
            Value::Data(other) => {
                tracing::warn!("Ignoring non-object mixin for '{}': {}", module, other);
                None
            }
        })
        .collect();

    match base {
        Value::Function(function) => {
            let prototype = extend_all(function.prototype().clone(), sources);
            Ok(Value::Function(function.with_prototype(prototype)))
        }
        Value::Data(serde_json::Value::Object(own)) => {
            let mut composed = extend_all(Object::new(), sources);
            extend(&mut composed, &own);
            Ok(Value::from(composed))
        }
        Value::Data(_) => Err(Error::InvalidFactoryType {
            name: module.to_string(),
            reason: "mixins can only be composed onto an object or a function".to_string(),
        }),
    }
}

//! Core type definitions shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::namespace::Completion;

/// Plain JSON object, the shape of data modules and function prototypes.
pub type Object = serde_json::Map<String, serde_json::Value>;

/// A constructed module value.
#[derive(Clone)]
pub enum Value {
    /// Plain already-built data.
    Data(serde_json::Value),
    /// A callable module carrying a prototype.
    Function(Function),
}

impl Value {
    pub fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Data(data) => Some(data),
            Value::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            Value::Data(_) => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Objects, arrays and functions may be bound as modules.
    pub(crate) fn is_composite(&self) -> bool {
        match self {
            Value::Function(_) => true,
            Value::Data(data) => data.is_object() || data.is_array(),
        }
    }

    /// JSON rendering, with functions shown as their prototype.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Data(data) => data.clone(),
            Value::Function(function) => serde_json::json!({
                "function": serde_json::Value::Object(function.prototype().clone())
            }),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(data: serde_json::Value) -> Self {
        Value::Data(data)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Data(serde_json::Value::Object(object))
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => {
                a.ptr_eq(b) && a.prototype() == b.prototype()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(data) => fmt::Debug::fmt(data, f),
            Value::Function(function) => fmt::Debug::fmt(function, f),
        }
    }
}

type Callable = dyn Fn(&[Value]) -> anyhow::Result<Value>;

/// Callable module value.
///
/// Clones share the callable but own their prototype, so composing mixins
/// onto a function yields a new value instead of mutating a shared one.
#[derive(Clone)]
pub struct Function {
    call: Rc<Callable>,
    prototype: Object,
}

impl Function {
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + 'static,
    {
        Self {
            call: Rc::new(call),
            prototype: Object::new(),
        }
    }

    pub fn with_prototype(mut self, prototype: Object) -> Self {
        self.prototype = prototype;
        self
    }

    pub fn prototype(&self) -> &Object {
        &self.prototype
    }

    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        (self.call)(args)
    }

    /// Call the function and layer an object result over the prototype, so
    /// prototype members act as defaults for the instance.
    pub fn construct(&self, args: &[Value]) -> anyhow::Result<Value> {
        match self.call(args)? {
            Value::Data(serde_json::Value::Object(own)) => {
                let mut instance = self.prototype.clone();
                crate::mixin::extend(&mut instance, &own);
                Ok(Value::Data(serde_json::Value::Object(instance)))
            }
            other => Ok(other),
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("prototype", &self.prototype)
            .finish_non_exhaustive()
    }
}

/// How a dependency contributes to the module that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Passed to the constructor as a positional argument.
    Use,
    /// Merged into the constructed value as a mixin.
    Is,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Use => f.write_str("use"),
            DependencyKind::Is => f.write_str("is"),
        }
    }
}

/// Reference to another module, optionally selecting a nested property.
///
/// The string form is `[use:|is:]a.b.C[#property.path]`; a bare name is a
/// `use` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub name: String,
    pub property: Option<String>,
}

impl Dependency {
    pub fn parse(reference: &str) -> Self {
        let (kind, rest) = match reference.split_once(':') {
            Some(("use", rest)) => (DependencyKind::Use, rest),
            Some(("is", rest)) => (DependencyKind::Is, rest),
            _ => (DependencyKind::Use, reference),
        };
        let (name, property) = match rest.split_once('#') {
            Some((name, property)) => (name, Some(property.to_string())),
            None => (rest, None),
        };
        Self {
            kind,
            name: name.to_string(),
            property,
        }
    }

    /// A `use` reference, whatever prefix `reference` carries.
    pub fn uses(reference: impl AsRef<str>) -> Self {
        Self {
            kind: DependencyKind::Use,
            ..Self::parse(reference.as_ref())
        }
    }

    /// An `is` (mixin) reference, whatever prefix `reference` carries.
    pub fn is(reference: impl AsRef<str>) -> Self {
        Self {
            kind: DependencyKind::Is,
            ..Self::parse(reference.as_ref())
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if let Some(property) = &self.property
            && property.split('.').any(str::is_empty)
        {
            return Err(Error::Argument(format!(
                "invalid property path '{property}' in reference to '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)?;
        if let Some(property) = &self.property {
            write!(f, "#{property}")?;
        }
        Ok(())
    }
}

impl From<&str> for Dependency {
    fn from(reference: &str) -> Self {
        Dependency::parse(reference)
    }
}

impl From<String> for Dependency {
    fn from(reference: String) -> Self {
        Dependency::parse(&reference)
    }
}

impl From<&String> for Dependency {
    fn from(reference: &String) -> Self {
        Dependency::parse(reference)
    }
}

/// Tag each name as a `use` dependency.
pub fn uses<I, S>(names: I) -> Vec<Dependency>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(Dependency::uses).collect()
}

/// Tag each name as an `is` (mixin) dependency.
pub fn is<I, S>(names: I) -> Vec<Dependency>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().map(Dependency::is).collect()
}

type ConstructorFn = dyn FnOnce(Vec<Value>) -> anyhow::Result<Value>;
type DeferredFn = dyn FnOnce(Vec<Value>, Completion) -> anyhow::Result<()>;

/// How a declared module gets its value.
pub enum Factory {
    /// Invoked once with the resolved `use` dependencies, in order.
    Constructor(Box<ConstructorFn>),
    /// An already-built value, bound as-is.
    Static(Value),
    /// Invoked once with the resolved `use` dependencies; the module is bound
    /// whenever the [`Completion`] handle is completed.
    Deferred(Box<DeferredFn>),
}

impl Factory {
    pub fn constructor<F>(constructor: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> anyhow::Result<Value> + 'static,
    {
        Factory::Constructor(Box::new(constructor))
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Factory::Static(value.into())
    }

    pub fn deferred<F>(start: F) -> Self
    where
        F: FnOnce(Vec<Value>, Completion) -> anyhow::Result<()> + 'static,
    {
        Factory::Deferred(Box::new(start))
    }

    fn kind(&self) -> &'static str {
        match self {
            Factory::Constructor(_) => "constructor",
            Factory::Static(_) => "static",
            Factory::Deferred(_) => "deferred",
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factory::Static(value) => f.debug_tuple("Static").field(value).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Split `a.b.C:Alias` into the module name and its optional global alias.
pub(crate) fn split_alias(declared: &str) -> Result<(&str, Option<&str>)> {
    let (name, alias) = match declared.split_once(':') {
        Some((name, alias)) if alias.is_empty() => (name, None),
        Some((name, alias)) => (name, Some(alias)),
        None => (declared, None),
    };
    if let Some(alias) = alias
        && !is_segment(alias)
    {
        return Err(Error::Argument(format!("invalid global alias '{alias}'")));
    }
    Ok((name, alias))
}

/// Names are non-empty dotted paths of identifier segments.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Argument("module name must not be empty".to_string()));
    }
    if !name.split('.').all(is_segment) {
        return Err(Error::Argument(format!("invalid module name '{name}'")));
    }
    Ok(())
}

fn is_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

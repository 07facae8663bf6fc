//! The namespace container.
//!
//! A [`Namespace`] collects module declarations, buffers them until the
//! [`ready`](Namespace::ready) signal, then constructs each module as soon
//! as everything it depends on has been bound. The whole graph runs on one
//! thread; construction is driven entirely by callbacks.
//!
//! State lives behind a `RefCell`. No borrow is held while user code runs
//! (constructors, loaders, request callbacks, ready callbacks), so any of
//! them may call back into the namespace.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::diagnostics::{Diagnosis, Reason, UnresolvedDependency};
use crate::error::{Error, Result};
use crate::loader::{AutoloadMap, LoadFailurePolicy, LoadRequest, Loader};
use crate::registry::Registry;
use crate::resolver::{self, Resolved};
use crate::scheduler::{Priority, StartupScheduler};
use crate::tracker::{Binding, ReadinessTracker, Waiter};
use crate::types::{Dependency, DependencyKind, Factory, Value, split_alias, validate_name};
use crate::{graph, mixin};

type Start = Box<dyn FnOnce(&Namespace)>;
type ReadyCallback = Box<dyn FnOnce(&Namespace)>;

/// A failure isolated to one module or request.
#[derive(Debug)]
pub struct Failure {
    /// Module name, or request label such as `<require #2>`.
    pub owner: String,
    pub error: Error,
}

/// A started declaration or request still waiting on dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub owner: String,
    pub waiting_on: Vec<String>,
}

struct DefinitionRecord {
    name: String,
    alias: Option<String>,
    dependencies: Vec<Dependency>,
    factory: Factory,
}

#[derive(Default)]
struct State {
    registry: Registry,
    tracker: ReadinessTracker,
    scheduler: StartupScheduler<Start>,
    autoload: AutoloadMap,
    attempted: HashSet<String>,
    /// Names failed by an aborted load, directly or transitively.
    unavailable: HashSet<String>,
    globals: HashMap<String, Value>,
    app_alias: Option<String>,
    failures: Vec<Failure>,
    on_ready: Vec<ReadyCallback>,
    requests: usize,
}

struct Inner {
    state: RefCell<State>,
    loader: Option<Box<dyn Loader>>,
    load_failure: LoadFailurePolicy,
}

/// Shared handle to a module namespace. Clones refer to the same namespace.
#[derive(Clone)]
pub struct Namespace {
    inner: Rc<Inner>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Namespace {
    /// A namespace without a loader.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> NamespaceBuilder {
        NamespaceBuilder::default()
    }

    fn state(&self) -> Ref<'_, State> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    /// Declare module `name` (optionally `name:Alias`) built by `factory`
    /// from `dependencies`.
    ///
    /// The declaration is buffered until [`ready`](Self::ready) fires and
    /// starts immediately afterwards. Argument errors and duplicate names
    /// are reported here; construction errors are isolated and surface
    /// through [`take_failures`](Self::take_failures).
    pub fn declare<D>(&self, name: &str, dependencies: D, factory: Factory) -> Result<()>
    where
        D: IntoIterator,
        D::Item: Into<Dependency>,
    {
        let (name, alias) = split_alias(name)?;
        validate_name(name)?;
        let dependencies = collect_dependencies(Some(name), dependencies)?;
        check_factory(name, &dependencies, &factory)?;

        {
            let mut state = self.state_mut();
            if let Some(alias) = alias
                && state.globals.contains_key(alias)
            {
                return Err(Error::DuplicateAlias(alias.to_string()));
            }
            if !state.tracker.mark_defined(name) {
                return Err(Error::DuplicateDefinition(name.to_string()));
            }
        }
        tracing::debug!(
            "Declared '{}' with {} dependencies",
            name,
            dependencies.len()
        );

        let priority = Priority::definition(dependencies.len());
        let record = DefinitionRecord {
            name: name.to_string(),
            alias: alias.map(str::to_string),
            dependencies,
            factory,
        };
        self.schedule(
            record.name.clone(),
            priority,
            Box::new(move |namespace: &Namespace| namespace.start_definition(record)),
        );
        Ok(())
    }

    /// Start a fluent declaration of `name`.
    pub fn define(&self, name: &str) -> Result<Definition<'_>> {
        let (bare, _) = split_alias(name)?;
        validate_name(bare)?;
        Ok(Definition {
            namespace: self,
            name: name.to_string(),
            dependencies: Vec::new(),
        })
    }

    /// Run `callback` with the resolved `use` dependencies once they are all
    /// bound. Requests start after every buffered declaration.
    pub fn require<D, F>(&self, dependencies: D, callback: F) -> Result<()>
    where
        D: IntoIterator,
        D::Item: Into<Dependency>,
        F: FnOnce(Vec<Value>) -> anyhow::Result<()> + 'static,
    {
        let dependencies = collect_dependencies(None, dependencies)?;
        let owner = {
            let mut state = self.state_mut();
            state.requests += 1;
            format!("<require #{}>", state.requests)
        };
        let priority = Priority::request(dependencies.len());
        let label = owner.clone();
        self.schedule(
            owner,
            priority,
            Box::new(move |namespace: &Namespace| {
                namespace.start_request(label, dependencies, callback)
            }),
        );
        Ok(())
    }

    /// Bind an already-built value under `name` right away, without waiting
    /// for the ready signal.
    pub fn provide(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let (name, alias) = split_alias(name)?;
        validate_name(name)?;
        if self.state().tracker.is_defined(name) {
            return Err(Error::DuplicateDefinition(name.to_string()));
        }
        self.bind_value(name, alias, value.into())
    }

    /// Merge `map` into the autoload configuration; later prefixes win.
    pub fn autoload(&self, map: AutoloadMap) {
        for (prefix, base) in map.iter() {
            tracing::debug!("Autoload '{}' -> {}", prefix, base.display());
        }
        self.state_mut().autoload.extend(map);
    }

    pub fn autoload_location(&self, prefix: &str) -> Option<PathBuf> {
        self.state().autoload.get(prefix).map(PathBuf::from)
    }

    /// Name under which [`get`](Self::get) also accepts application modules,
    /// e.g. `App.Config` for a module bound as `Config`.
    pub fn set_app_alias(&self, alias: &str) -> Result<()> {
        if alias.contains('.') {
            return Err(Error::Argument(format!(
                "application alias '{alias}' must be a single segment"
            )));
        }
        validate_name(alias)?;
        self.state_mut().app_alias = Some(alias.to_string());
        Ok(())
    }

    pub fn app_alias(&self) -> Option<String> {
        self.state().app_alias.clone()
    }

    /// Module bound under global alias `alias`.
    pub fn global(&self, alias: &str) -> Option<Value> {
        self.state().globals.get(alias).cloned()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.try_get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn try_get(&self, name: &str) -> Option<Value> {
        let state = self.state();
        if let Some(value) = state.registry.get(name) {
            return Some(value.clone());
        }
        let alias = state.app_alias.as_deref()?;
        let rest = name.strip_prefix(alias)?.strip_prefix('.')?;
        state.registry.get(rest).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.try_get(name).is_some()
    }

    /// Every bound module name, sorted.
    pub fn names(&self) -> Vec<String> {
        self.state().registry.names()
    }

    /// Run `callback` once the ready signal has fired and the buffered
    /// declarations have started. Runs immediately when already ready.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(&Namespace) + 'static,
    {
        if self.is_ready() {
            callback(self);
            return;
        }
        self.state_mut().on_ready.push(Box::new(callback));
    }

    /// Fire the ready signal: start buffered declarations and requests in
    /// priority order, then run [`on_ready`](Self::on_ready) callbacks.
    ///
    /// Anything declared from here on starts immediately. Firing twice is a
    /// no-op.
    pub fn ready(&self) {
        let fired = self.state_mut().scheduler.fire();
        let Some(starts) = fired else {
            tracing::warn!("Ready signal already fired");
            return;
        };
        tracing::info!("Namespace ready, starting {} buffered entries", starts.len());
        for (owner, start) in starts {
            tracing::debug!("Starting '{}'", owner);
            start(self);
        }
        let callbacks = std::mem::take(&mut self.state_mut().on_ready);
        for callback in callbacks {
            callback(self);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state().scheduler.is_fired()
    }

    /// Buffered entries in the order [`ready`](Self::ready) will start them.
    pub fn startup_order(&self) -> Vec<(String, Priority)> {
        self.state().scheduler.queued()
    }

    /// Started entries still waiting, in binding order.
    pub fn pending(&self) -> Vec<Pending> {
        self.state()
            .tracker
            .waiters()
            .iter()
            .map(|waiter| Pending {
                owner: waiter.owner().to_string(),
                waiting_on: waiter.remaining().to_vec(),
            })
            .collect()
    }

    /// Drain the failures recorded so far.
    pub fn take_failures(&self) -> Vec<Failure> {
        std::mem::take(&mut self.state_mut().failures)
    }

    /// Explain why pending entries cannot progress: dependencies nobody will
    /// provide, failed dependencies and declared modules waiting on each
    /// other. Entries waiting on a module that is still being built are not
    /// reported.
    pub fn diagnose(&self) -> Diagnosis {
        let state = self.state();
        let mut unresolved = Vec::new();
        let mut edges = Vec::new();
        for waiter in state.tracker.waiters() {
            for dependency in waiter.remaining() {
                let reason = if let Some(message) = state.tracker.failure(dependency) {
                    Reason::Failed(message.to_string())
                } else if state.tracker.is_defined(dependency) {
                    edges.push((waiter.owner().to_string(), dependency.clone()));
                    continue;
                } else if self.inner.loader.is_some() && state.attempted.contains(dependency) {
                    Reason::NotProvidedByLoader
                } else {
                    Reason::Undeclared
                };
                unresolved.push(UnresolvedDependency {
                    module: waiter.owner().to_string(),
                    dependency: dependency.clone(),
                    reason,
                });
            }
        }
        Diagnosis {
            unresolved,
            cycles: graph::find_cycles(&edges),
        }
    }

    /// [`diagnose`](Self::diagnose) as an error.
    pub fn check(&self) -> Result<()> {
        let diagnosis = self.diagnose();
        if diagnosis.is_clean() {
            Ok(())
        } else {
            Err(Error::Unresolvable(diagnosis.to_string()))
        }
    }

    fn schedule(&self, owner: String, priority: Priority, start: Start) {
        let immediate = self.state_mut().scheduler.schedule(owner, priority, start);
        if let Some(start) = immediate {
            start(self);
        }
    }

    fn start_definition(&self, record: DefinitionRecord) {
        let owner = record.name.clone();
        let dependencies = record.dependencies.clone();
        let waiter = resolver::ready(
            &owner,
            &dependencies,
            Box::new(move |namespace: &Namespace| namespace.construct(record)),
        );
        self.bind(waiter);
    }

    fn start_request<F>(&self, owner: String, dependencies: Vec<Dependency>, callback: F)
    where
        F: FnOnce(Vec<Value>) -> anyhow::Result<()> + 'static,
    {
        let label = owner.clone();
        let names = dependencies.clone();
        let waiter = resolver::ready(
            &owner,
            &names,
            Box::new(move |namespace: &Namespace| {
                let resolved = resolver::build(&namespace.state().registry, &label, &dependencies);
                let result = resolved.and_then(|resolved| {
                    let args = resolved
                        .into_iter()
                        .filter(|r| r.kind == DependencyKind::Use)
                        .map(|r| r.value)
                        .collect();
                    callback(args).map_err(|source| Error::Construction {
                        name: label.clone(),
                        source,
                    })
                });
                if let Err(error) = result {
                    namespace.fail(&label, error);
                }
            }),
        );
        self.bind(waiter);
    }

    fn bind(&self, waiter: Waiter) {
        tracing::debug!(
            "Binding '{}' on {} dependencies",
            waiter.owner(),
            waiter.remaining().len()
        );
        let binding = self.state_mut().tracker.bind(waiter);
        match binding {
            Binding::Satisfied(waiter) => waiter.run(self),
            Binding::Waiting(missing) => {
                for name in &missing {
                    self.autoload_dependency(name);
                }
                self.abort_if_unavailable(&missing);
            }
        }
    }

    /// Under [`LoadFailurePolicy::Abort`], a waiter parked on a name whose
    /// load was already aborted fails at once instead of waiting forever.
    fn abort_if_unavailable(&self, missing: &[String]) {
        if self.inner.load_failure != LoadFailurePolicy::Abort {
            return;
        }
        let unavailable = {
            let state = self.state();
            let found = missing
                .iter()
                .filter(|name| state.unavailable.contains(*name))
                .find_map(|name| Some((name.clone(), state.tracker.failure(name)?.to_string())));
            found
        };
        if let Some((name, reason)) = unavailable {
            self.abort_dependents(&name, &reason);
        }
    }

    fn autoload_dependency(&self, name: &str) {
        let location = {
            let mut state = self.state_mut();
            if state.tracker.is_ready(name)
                || state.tracker.is_defined(name)
                || state.tracker.failure(name).is_some()
                || !state.attempted.insert(name.to_string())
            {
                return;
            }
            state.autoload.resolve(name)
        };
        let Some(loader) = self.inner.loader.as_deref() else {
            tracing::debug!("'{}' is not declared and no loader is configured", name);
            return;
        };
        let request = LoadRequest {
            name: name.to_string(),
            location,
        };
        match loader.load(self, &request) {
            Ok(()) => tracing::debug!("Loader finished for '{}'", name),
            Err(source) => self.load_failed(name, source),
        }
    }

    fn load_failed(&self, name: &str, source: anyhow::Error) {
        let error = Error::LoadFailure {
            name: name.to_string(),
            source,
        };
        let reason = error.to_string();
        match self.inner.load_failure {
            LoadFailurePolicy::Warn => tracing::warn!("{}", reason),
            LoadFailurePolicy::Abort => tracing::error!("{}", reason),
        }
        {
            let mut state = self.state_mut();
            state.tracker.mark_failed(name, reason.clone());
            state.failures.push(Failure {
                owner: name.to_string(),
                error,
            });
        }
        if self.inner.load_failure == LoadFailurePolicy::Abort {
            self.state_mut().unavailable.insert(name.to_string());
            self.abort_dependents(name, &reason);
        }
    }

    /// Fail every waiter that needs `name`, then everything waiting on those.
    fn abort_dependents(&self, name: &str, reason: &str) {
        let mut queue = vec![name.to_string()];
        while let Some(failed) = queue.pop() {
            let abandoned = self.state_mut().tracker.abandon(&failed);
            for waiter in abandoned {
                let owner = waiter.owner().to_string();
                tracing::error!("Aborting '{}': dependency '{}' is unavailable", owner, failed);
                let error = Error::LoadFailure {
                    name: owner.clone(),
                    source: anyhow::anyhow!("dependency '{failed}' is unavailable: {reason}"),
                };
                {
                    let mut state = self.state_mut();
                    state.tracker.mark_failed(&owner, error.to_string());
                    state.unavailable.insert(owner.clone());
                    state.failures.push(Failure {
                        owner: owner.clone(),
                        error,
                    });
                }
                drop(waiter);
                queue.push(owner);
            }
        }
    }

    fn construct(&self, record: DefinitionRecord) {
        let name = record.name.clone();
        if let Err(error) = self.try_construct(record) {
            self.fail(&name, error);
        }
    }

    fn try_construct(&self, record: DefinitionRecord) -> Result<()> {
        let DefinitionRecord {
            name,
            alias,
            dependencies,
            factory,
        } = record;
        let resolved = resolver::build(&self.state().registry, &name, &dependencies)?;
        let (uses, mixins): (Vec<Resolved>, Vec<Resolved>) = resolved
            .into_iter()
            .partition(|r| r.kind == DependencyKind::Use);
        let uses: Vec<Value> = uses.into_iter().map(|r| r.value).collect();
        let mixins: Vec<Value> = mixins.into_iter().map(|r| r.value).collect();

        let value = match factory {
            Factory::Constructor(constructor) => {
                constructor(uses).map_err(|source| Error::Construction {
                    name: name.clone(),
                    source,
                })?
            }
            Factory::Static(value) => value,
            Factory::Deferred(start) => {
                let completion = Completion {
                    namespace: self.clone(),
                    name: name.clone(),
                    alias,
                    mixins,
                    settled: false,
                };
                return start(uses, completion)
                    .map_err(|source| Error::Construction { name, source });
            }
        };
        let value = mixin::compose(&name, value, &mixins)?;
        self.bind_value(&name, alias.as_deref(), value)
    }

    /// Record an isolated failure. Only the first failure of an owner is kept.
    fn fail(&self, owner: &str, error: Error) {
        tracing::error!("{}", error);
        let mut state = self.state_mut();
        if state.tracker.failure(owner).is_some() {
            return;
        }
        state.tracker.mark_failed(owner, error.to_string());
        state.failures.push(Failure {
            owner: owner.to_string(),
            error,
        });
    }

    fn bind_value(&self, name: &str, alias: Option<&str>, value: Value) -> Result<()> {
        if !value.is_composite() {
            return Err(Error::InvalidFactoryType {
                name: name.to_string(),
                reason: "a module must be an object, an array or a function".to_string(),
            });
        }
        let completed = {
            let mut state = self.state_mut();
            if let Some(alias) = alias
                && state.globals.contains_key(alias)
            {
                return Err(Error::DuplicateAlias(alias.to_string()));
            }
            match alias {
                Some(alias) => {
                    state.registry.put(name, value.clone())?;
                    state.globals.insert(alias.to_string(), value);
                }
                None => state.registry.put(name, value)?,
            }
            state.tracker.mark_ready(name);
            state.unavailable.remove(name);
            state.tracker.notify(name)
        };
        tracing::debug!("Bound '{}', {} waiters completed", name, completed.len());
        for waiter in completed {
            waiter.run(self);
        }
        Ok(())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(state) = self.inner.state.try_borrow() else {
            return f.debug_struct("Namespace").finish_non_exhaustive();
        };
        f.debug_struct("Namespace")
            .field("modules", &state.registry.names())
            .field("pending", &state.tracker.waiters().len())
            .field("ready", &state.scheduler.is_fired())
            .finish_non_exhaustive()
    }
}

fn collect_dependencies<D>(owner: Option<&str>, dependencies: D) -> Result<Vec<Dependency>>
where
    D: IntoIterator,
    D::Item: Into<Dependency>,
{
    let dependencies: Vec<Dependency> = dependencies.into_iter().map(Into::into).collect();
    for dependency in &dependencies {
        if owner == Some(dependency.name.as_str()) {
            return Err(Error::SelfDependency(dependency.name.clone()));
        }
        dependency.validate()?;
    }
    Ok(dependencies)
}

fn check_factory(name: &str, dependencies: &[Dependency], factory: &Factory) -> Result<()> {
    let Factory::Static(value) = factory else {
        return Ok(());
    };
    let reason = if !value.is_composite() {
        "an already-built value must be an object, an array or a function"
    } else if dependencies.iter().any(|d| d.kind == DependencyKind::Use) {
        "an already-built value cannot receive use dependencies"
    } else {
        return Ok(());
    };
    Err(Error::InvalidFactoryType {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Builder for configuring and creating a [`Namespace`]
#[derive(Default)]
pub struct NamespaceBuilder {
    loader: Option<Box<dyn Loader>>,
    autoload: AutoloadMap,
    load_failure: LoadFailurePolicy,
}

impl NamespaceBuilder {
    /// Loader invoked for dependencies nobody has declared.
    pub fn with_loader<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn with_autoload(mut self, prefix: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        self.autoload.insert(prefix, base);
        self
    }

    pub fn with_autoload_map(mut self, map: AutoloadMap) -> Self {
        self.autoload.extend(map);
        self
    }

    pub fn with_load_failure(mut self, policy: LoadFailurePolicy) -> Self {
        self.load_failure = policy;
        self
    }

    pub fn build(self) -> Namespace {
        let state = State {
            autoload: self.autoload,
            ..State::default()
        };
        Namespace {
            inner: Rc::new(Inner {
                state: RefCell::new(state),
                loader: self.loader,
                load_failure: self.load_failure,
            }),
        }
    }
}

/// Fluent declaration started by [`Namespace::define`].
#[must_use = "a definition does nothing until `define` is called"]
pub struct Definition<'a> {
    namespace: &'a Namespace,
    name: String,
    dependencies: Vec<Dependency>,
}

impl Definition<'_> {
    pub fn uses(mut self, reference: impl AsRef<str>) -> Self {
        self.dependencies.push(Dependency::uses(reference));
        self
    }

    pub fn is(mut self, reference: impl AsRef<str>) -> Self {
        self.dependencies.push(Dependency::is(reference));
        self
    }

    pub fn define(self, factory: Factory) -> Result<()> {
        self.namespace
            .declare(&self.name, self.dependencies, factory)
    }
}

/// Handle that binds a deferred module.
///
/// Dropping it without calling [`complete`](Self::complete) or
/// [`fail`](Self::fail) records the module as failed.
pub struct Completion {
    namespace: Namespace,
    name: String,
    alias: Option<String>,
    mixins: Vec<Value>,
    settled: bool,
}

impl Completion {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the module's mixins to `value` and bind it.
    ///
    /// A value that cannot be bound fails the module like any other
    /// construction error; the returned error carries the same message.
    pub fn complete(mut self, value: impl Into<Value>) -> Result<()> {
        self.settled = true;
        let result = mixin::compose(&self.name, value.into(), &self.mixins).and_then(|value| {
            self.namespace
                .bind_value(&self.name, self.alias.as_deref(), value)
        });
        result.map_err(|error| {
            let message = error.to_string();
            self.namespace.fail(&self.name, error);
            Error::Construction {
                name: self.name.clone(),
                source: anyhow::anyhow!(message),
            }
        })
    }

    pub fn fail(mut self, source: anyhow::Error) {
        self.settled = true;
        let error = Error::Construction {
            name: self.name.clone(),
            source,
        };
        self.namespace.fail(&self.name, error);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.settled || std::thread::panicking() {
            return;
        }
        let error = Error::Construction {
            name: self.name.clone(),
            source: anyhow::anyhow!("completion dropped before the module was bound"),
        };
        self.namespace.fail(&self.name, error);
    }
}

#![allow(dead_code)]

use composable_namespace::{Factory, Namespace, Object, Value};
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;
use tempfile::{Builder, NamedTempFile, TempDir};

pub struct TestFile(NamedTempFile);

impl Deref for TestFile {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

pub fn create_toml_test_file(content: &str) -> TestFile {
    create_test_file(content, ".toml")
}

pub fn create_json_test_file(content: &str) -> TestFile {
    create_test_file(content, ".json")
}

fn create_test_file(content: &str, suffix: &str) -> TestFile {
    let mut temp_file = Builder::new().suffix(suffix).tempfile().unwrap();
    write!(temp_file, "{}", content).unwrap();
    TestFile(temp_file)
}

/// Write `content` to `relative` under `dir`, creating parent directories.
pub fn write_module_file(dir: &TempDir, relative: &str, content: &str) {
    let path = dir.path().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn object(value: serde_json::Value) -> Object {
    match value {
        serde_json::Value::Object(object) => object,
        other => panic!("expected an object, got {}", other),
    }
}

/// Static factory for a JSON object.
pub fn value(data: serde_json::Value) -> Factory {
    Factory::value(object(data))
}

/// Constructor that ignores its arguments and returns `data`.
pub fn constant(data: serde_json::Value) -> Factory {
    Factory::constructor(move |_| Ok(Value::from(data)))
}

pub fn json(namespace: &Namespace, name: &str) -> serde_json::Value {
    namespace
        .get(name)
        .unwrap_or_else(|e| panic!("{}", e))
        .to_json()
}

/// Shared log of events recorded by factories and callbacks.
#[derive(Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Static-looking factory that records `event` when it runs.
    pub fn recording(&self, event: &str, data: serde_json::Value) -> Factory {
        let log = self.clone();
        let event = event.to_string();
        Factory::constructor(move |_| {
            log.push(event);
            Ok(Value::from(data))
        })
    }
}

pub fn failure_owners(namespace: &Namespace) -> Vec<String> {
    namespace
        .take_failures()
        .into_iter()
        .map(|failure| failure.owner)
        .collect()
}

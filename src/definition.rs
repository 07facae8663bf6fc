//! Declarative module definitions read from TOML or JSON files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::loader::AutoloadMap;
use crate::namespace::Namespace;
use crate::types::{Dependency, Factory, Object, Value};

/// Contents of one definition file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    #[serde(default)]
    pub autoload: AutoloadMap,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleDefinition>,
}

/// One module declared by a definition file.
///
/// Without `uses` the module is `value` itself (default `{}`). With `uses`,
/// each key receives the resolved value of its reference, layered over
/// `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub uses: BTreeMap<String, String>,
    #[serde(default)]
    pub is: Vec<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl DefinitionFile {
    /// Read a `.toml` or `.json` definition file.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        let parsed = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            Some("json") => Self::parse_json(&content),
            _ => return Err(anyhow::anyhow!("Unsupported file type: {}", path.display())),
        };
        parsed.map_err(|e| anyhow::anyhow!("Invalid definition file {}: {e}", path.display()))
    }

    pub fn parse_toml(content: &str) -> anyhow::Result<Self> {
        let document: toml::Value = toml::from_str(content)?;
        let json = convert_toml_value_to_json(&document);
        Ok(serde_json::from_value(json)?)
    }

    pub fn parse_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Merge the autoload table into `namespace` and declare every module.
    pub fn apply(&self, namespace: &Namespace) -> Result<()> {
        if !self.autoload.is_empty() {
            namespace.autoload(self.autoload.clone());
        }
        for module in &self.modules {
            module.declare(namespace)?;
        }
        Ok(())
    }
}

impl ModuleDefinition {
    /// `use` references in key order, then `is` references.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.uses
            .values()
            .map(Dependency::uses)
            .chain(self.is.iter().map(Dependency::is))
            .collect()
    }

    fn declaration_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}:{alias}", self.name),
            None => self.name.clone(),
        }
    }

    fn factory(&self) -> Factory {
        let value = self
            .value
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Object::new()));
        if self.uses.is_empty() {
            return Factory::value(value);
        }

        let name = self.name.clone();
        let keys: Vec<String> = self.uses.keys().cloned().collect();
        Factory::constructor(move |args| {
            let serde_json::Value::Object(mut record) = value else {
                anyhow::bail!("Module '{name}' declares uses, so its value must be a table");
            };
            for (key, arg) in keys.into_iter().zip(args) {
                let data = match arg {
                    Value::Data(data) => data,
                    Value::Function(_) => anyhow::bail!(
                        "Module '{name}' cannot embed function dependency under '{key}'"
                    ),
                };
                record.insert(key, data);
            }
            Ok(Value::from(record))
        })
    }

    pub fn declare(&self, namespace: &Namespace) -> Result<()> {
        namespace.declare(&self.declaration_name(), self.dependencies(), self.factory())
    }
}

fn convert_toml_table_to_json_map(table: &toml::map::Map<String, toml::Value>) -> Object {
    table
        .iter()
        .map(|(key, value)| (key.clone(), convert_toml_value_to_json(value)))
        .collect()
}

fn convert_toml_value_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::Number((*i).into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(convert_toml_value_to_json).collect())
        }
        toml::Value::Table(table) => {
            serde_json::Value::Object(convert_toml_table_to_json_map(table))
        }
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    data::{
        document::{self, extension, parse_by_extension},
        item::check_choice,
        schema::{MetaType, NodeKind, SchemaModel, SchemaNode},
    },
    loader::{default_schema_by_init, load_schema},
    resolve::{self, Rejection, Resolution, Stage, Violation, validator},
};

pub(crate) const DEFAULT_CONFIG_PATH: &str = ".config.toml";

/// One navigable entry of a menu.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuEntry {
    /// Property key under the current menu.
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub meta_type: MetaType,
    /// Knob name, for leaves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knob: Option<String>,
    /// Current document value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// State behind the interactive menu.
///
/// The menu only navigates and edits; every check goes through
/// [`resolve`](crate::resolve::resolve) before anything is written.
#[derive(Debug, Clone)]
pub struct AppData {
    /// Merged schema.
    pub schema: SchemaModel,
    /// Compiled schema tree used for navigation.
    pub root: SchemaNode,
    /// Configuration being edited.
    pub config: Value,
    /// Path to the configuration file.
    pub config_path: PathBuf,
    /// Current menu path as a list of keys.
    pub current_key: Vec<String>,
    /// Whether configuration has pending changes.
    pub needs_save: bool,
    /// Violations from the last failed save, shown inline.
    pub messages: Vec<Violation>,
}

impl AppData {
    /// Build `AppData` from optional config and schema paths.
    ///
    /// When schema is not provided, it is auto-derived from the config path.
    pub async fn new(
        config: Option<impl AsRef<Path>>,
        schema: Option<impl AsRef<Path>>,
    ) -> anyhow::Result<Self> {
        let config_path = Self::init_value_path(config);

        let schema_path = if let Some(sch) = schema {
            sch.as_ref().to_path_buf()
        } else {
            default_schema_by_init(&config_path)
        };

        if !schema_path.exists() {
            bail!("Schema file does not exist: {}", schema_path.display());
        }

        let schema = load_schema(&schema_path).await?;
        Self::new_with_schema(Some(config_path), schema)
    }

    fn init_value_path(config: Option<impl AsRef<Path>>) -> PathBuf {
        config
            .map(|cfg| cfg.as_ref().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Build `AppData` from a schema and an optional config path.
    ///
    /// If the config file exists, it is loaded to initialize values.
    pub fn new_with_schema(
        config: Option<impl AsRef<Path>>,
        schema: SchemaModel,
    ) -> anyhow::Result<Self> {
        let config_path = Self::init_value_path(config);
        let init = if config_path.exists() {
            fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?
        } else {
            String::new()
        };
        Self::new_with_init_and_schema(&init, &config_path, schema)
    }

    /// Build `AppData` from already loaded config content.
    pub fn new_with_init_and_schema(
        init: &str,
        config_path: &Path,
        schema: SchemaModel,
    ) -> anyhow::Result<Self> {
        let compiled = resolve::compile(&schema)
            .map_err(|violations| Rejection::new(Stage::Compiling, violations))?;

        let mut config = parse_by_extension(init, extension(config_path))
            .with_context(|| format!("Failed to parse config {}", config_path.display()))?;
        if !config.is_object() {
            warn!("{} is not a table, starting empty", config_path.display());
            config = Value::Object(Map::new());
        }
        validator::apply_defaults(&compiled.root, &mut config);

        Ok(AppData {
            schema,
            root: compiled.root,
            config,
            config_path: config_path.into(),
            current_key: Vec::new(),
            needs_save: false,
            messages: Vec::new(),
        })
    }

    /// Enter a submenu path (dot-separated).
    pub fn enter(&mut self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.current_key = key.split('.').map(|s| s.to_string()).collect();
    }

    /// Push a field name onto the current path.
    pub fn push_field(&mut self, f: &str) {
        self.current_key.push(f.to_string());
    }

    /// Navigate back to the parent path.
    pub fn navigate_back(&mut self) {
        self.current_key.pop();
    }

    /// Return the current path as a dot-separated string.
    pub fn key_string(&self) -> String {
        self.current_key.join(".")
    }

    /// Get the schema node at the current path.
    pub fn current(&self) -> Option<&SchemaNode> {
        self.root.find(&self.key_string())
    }

    /// Titled children of the current menu. Untitled nodes are hidden.
    pub fn menu_entries(&self) -> Vec<MenuEntry> {
        let Some(node) = self.current() else {
            return Vec::new();
        };
        let values = document::get_value(&self.config, &node.path);

        node.children()
            .iter()
            .filter_map(|child| {
                let title = child.title.clone()?;
                Some(MenuEntry {
                    key: child.key.clone(),
                    title,
                    description: child.description.clone(),
                    meta_type: child.meta_type(),
                    knob: child.knob().map(str::to_string),
                    value: values
                        .and_then(|v| v.get(&child.key))
                        .filter(|_| !child.kind.is_container())
                        .cloned(),
                })
            })
            .collect()
    }

    /// Change the value of a leaf or choice under the current menu.
    ///
    /// Only the value's type is checked here; selects and dependencies are
    /// checked on save.
    pub fn set_value(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let path = match self.key_string() {
            base if base.is_empty() => key.to_string(),
            base => format!("{base}.{key}"),
        };
        let Some(node) = self.root.find(&path) else {
            bail!("No such entry: {path}");
        };

        let checked = match &node.kind {
            NodeKind::BoolChoice(choice) => check_choice(choice.keys(), &value),
            kind => match kind.leaf() {
                Some((_, ty)) => ty.check(&value),
                None => bail!("`{path}` is a menu, not a value"),
            },
        };
        checked.with_context(|| format!("Invalid value for `{}`", node.label()))?;

        debug!("set `{path}` = {value}");
        document::set_value(&mut self.config, &path, value)?;
        self.needs_save = true;
        self.messages.clear();
        Ok(())
    }

    /// Resolve the configuration as it stands, without saving.
    pub fn dry_run(&self) -> Result<Resolution, Rejection> {
        resolve::resolve(&self.schema, self.config.clone())
    }

    /// Persist changes and create a timestamped backup when needed.
    ///
    /// Nothing is written while the configuration does not resolve; the
    /// violations are kept in [`AppData::messages`] instead. Returns whether
    /// the file was written.
    pub fn on_exit(&mut self) -> anyhow::Result<bool> {
        if !self.needs_save {
            return Ok(false);
        }

        let resolution = match self.dry_run() {
            Ok(resolution) => resolution,
            Err(rejection) => {
                warn!("not saving: {rejection}");
                self.messages = rejection.violations;
                return Ok(false);
            }
        };

        if self.config_path.exists() {
            let ext = extension(&self.config_path);
            let bk = format!(
                "bk-{:?}.{ext}",
                SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)?
                    .as_secs()
            );

            let backup_path = self.config_path.with_extension(bk);
            fs::copy(&self.config_path, &backup_path).with_context(|| {
                format!("Failed to back up {}", self.config_path.display())
            })?;
        }
        document::save_config(&self.config_path, &resolution.config)?;

        self.config = resolution.config;
        self.needs_save = false;
        self.messages.clear();
        Ok(true)
    }
}

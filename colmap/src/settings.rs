use crate::codec::InsertStrategy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NullStrategy {
    #[default]
    AllFields,
    NotNullFields,
}

impl FromStr for NullStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "allfields" | "all" => Ok(NullStrategy::AllFields),
            "notnullfields" | "notnull" => Ok(NullStrategy::NotNullFields),
            _ => Err(format!("Invalid value for insert strategy: {}", s)),
        }
    }
}

impl<'de> serde::Deserialize<'de> for NullStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NullStrategy::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<NullStrategy> for InsertStrategy {
    fn from(strategy: NullStrategy) -> Self {
        match strategy {
            NullStrategy::AllFields => InsertStrategy::AllFields,
            NullStrategy::NotNullFields => InsertStrategy::NotNullFields,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MapperSettings {
    pub schema: SchemaSettings,
    pub entities: EntitySettings,
    pub executor: ExecutorSettings,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SchemaSettings {
    /// Creates structured types and tables of entities in `create` mode.
    pub force_generation: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EntitySettings {
    /// Allow-list of entity type names, empty means every discovered entity.
    pub managed: Vec<String>,
    pub discover_registered: bool,
    pub insert_strategy: NullStrategy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorSettings {
    pub name: String,
    pub worker_threads: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorSettings { name: "colmap".to_string(), worker_threads: 2 }
    }
}

impl MapperSettings {
    /// Layers an optional settings file under `COLMAP__*` environment variables.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::with_name(path).required(false)).add_source(
            Environment::with_prefix("COLMAP")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("entities.managed"),
        );
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_and_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[schema]
force_generation = true

[entities]
managed = ["Shape", "Point"]
insert_strategy = "not_null_fields"

[executor]
worker_threads = 4
"#
        )
        .unwrap();
        let settings = MapperSettings::new(file.path().to_str().unwrap()).unwrap();
        assert!(settings.schema.force_generation);
        assert_eq!(settings.entities.managed, vec!["Shape", "Point"]);
        assert_eq!(settings.entities.insert_strategy, NullStrategy::NotNullFields);
        assert!(!settings.entities.discover_registered);
        assert_eq!(settings.executor.worker_threads, 4);
        assert_eq!(settings.executor.name, "colmap");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = MapperSettings::new("/nonexistent/colmap-settings").unwrap();
        assert!(!settings.schema.force_generation);
        assert!(settings.entities.managed.is_empty());
        assert_eq!(InsertStrategy::from(settings.entities.insert_strategy), InsertStrategy::AllFields);
    }

    #[test]
    fn strategies_parse_leniently() {
        assert_eq!("NotNull".parse::<NullStrategy>(), Ok(NullStrategy::NotNullFields));
        assert_eq!("all-fields".parse::<NullStrategy>(), Ok(NullStrategy::AllFields));
        assert!("sometimes".parse::<NullStrategy>().is_err());
    }
}

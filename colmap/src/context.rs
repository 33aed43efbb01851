use crate::codec::InsertStrategy;
use crate::entity::EntityClass;
use crate::session::Executor;
use crate::settings::{ExecutorSettings, MapperSettings};
use std::sync::Arc;

/// Bootstrap inputs. Read-only once the manager factory exists.
pub struct ConfigurationContext {
    managed_names: Vec<String>,
    managed_classes: Vec<EntityClass>,
    pub force_schema_generation: bool,
    pub discover_registered: bool,
    pub insert_strategy: InsertStrategy,
    pub executor_settings: ExecutorSettings,
    pub(crate) owns_session: bool,
    pub(crate) owns_executor: bool,
    pub(crate) executor: Option<Arc<Executor>>,
}

impl Default for ConfigurationContext {
    fn default() -> Self {
        Self::from_settings(&MapperSettings::default())
    }
}

impl ConfigurationContext {
    pub fn from_settings(settings: &MapperSettings) -> Self {
        ConfigurationContext {
            managed_names: settings.entities.managed.clone(),
            managed_classes: Vec::new(),
            force_schema_generation: settings.schema.force_generation,
            discover_registered: settings.entities.discover_registered,
            insert_strategy: settings.entities.insert_strategy.into(),
            executor_settings: settings.executor.clone(),
            owns_session: false,
            owns_executor: false,
            executor: None,
        }
    }

    pub fn manage(&mut self, class: EntityClass) {
        if !self.managed_classes.contains(&class) {
            self.managed_classes.push(class);
        }
    }

    pub fn manage_name(&mut self, name: &str) {
        self.managed_names.push(name.to_string());
    }

    pub fn has_allow_list(&self) -> bool {
        !self.managed_names.is_empty() || !self.managed_classes.is_empty()
    }

    /// Everything is managed when no allow-list was configured.
    pub fn is_managed(&self, class: EntityClass) -> bool {
        !self.has_allow_list()
            || self.managed_classes.contains(&class)
            || self.managed_names.iter().any(|name| class.matches_name(name))
    }

    /// Allow-list entries that select none of `discovered`.
    pub fn unmatched(&self, discovered: &[EntityClass]) -> Vec<String> {
        let names = self
            .managed_names
            .iter()
            .filter(|name| !discovered.iter().any(|c| c.matches_name(name)))
            .cloned();
        let classes = self.managed_classes.iter().filter(|c| !discovered.contains(c)).map(|c| c.name.to_string());
        names.chain(classes).collect()
    }

    pub fn owns_session(&self) -> bool {
        self.owns_session
    }

    pub fn owns_executor(&self) -> bool {
        self.owns_executor
    }

    pub fn executor(&self) -> Option<&Arc<Executor>> {
        self.executor.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn empty_allow_list_manages_everything() {
        let context = ConfigurationContext::default();
        assert!(context.is_managed(EntityClass::of::<Alpha>()));
        assert!(context.unmatched(&[]).is_empty());
    }

    #[test]
    fn allow_list_by_class_and_name() {
        let mut context = ConfigurationContext::default();
        context.manage(EntityClass::of::<Alpha>());
        assert!(context.is_managed(EntityClass::of::<Alpha>()));
        assert!(!context.is_managed(EntityClass::of::<Beta>()));

        let mut settings = MapperSettings::default();
        settings.entities.managed = vec!["beta".into(), "Gamma".into()];
        let context = ConfigurationContext::from_settings(&settings);
        assert!(context.is_managed(EntityClass::of::<Beta>()));
        assert!(!context.is_managed(EntityClass::of::<Alpha>()));
        assert_eq!(context.unmatched(&[EntityClass::of::<Alpha>(), EntityClass::of::<Beta>()]), vec!["Gamma"]);
    }
}

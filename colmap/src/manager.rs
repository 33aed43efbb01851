//! Bootstrap orchestration and the request-time entity managers.

use crate::carrier::{SettableData, Slot};
use crate::codec::InsertStrategy;
use crate::context::ConfigurationContext;
use crate::entity::{EntityClass, EntityMeta, EntityProperty, EntityRegistration, SchemaSync};
use crate::error::MappingError;
use crate::factory::{BeanFactory, DefaultBeanFactory, Dependencies, ObjectMapper};
use crate::registry::register_native_codecs;
use crate::schema::{self, SchemaStatement, UdtRegistry};
use crate::session::{Executor, Session};
use crate::settings::MapperSettings;
use crate::statement::{OperationKind, PreparedStatement, Statement, StatementCache};
use crate::wire::WireValue;
use crate::{debug, error, info, warn};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Connector = Box<dyn FnOnce() -> Result<Arc<dyn Session>, MappingError> + Send>;

pub struct ManagerFactoryBuilder {
    context: ConfigurationContext,
    session: Option<Arc<dyn Session>>,
    connector: Option<Connector>,
    entities: Vec<Arc<dyn EntityMeta>>,
    object_mapper: Arc<ObjectMapper>,
    bean_factory: Arc<dyn BeanFactory>,
}

impl Default for ManagerFactoryBuilder {
    fn default() -> Self {
        Self::with_context(ConfigurationContext::default())
    }
}

impl ManagerFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &MapperSettings) -> Self {
        Self::with_context(ConfigurationContext::from_settings(settings))
    }

    pub fn with_context(context: ConfigurationContext) -> Self {
        ManagerFactoryBuilder {
            context,
            session: None,
            connector: None,
            entities: Vec::new(),
            object_mapper: Arc::new(ObjectMapper::default()),
            bean_factory: Arc::new(DefaultBeanFactory),
        }
    }

    /// A supplied session is never closed by the factory.
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self.connector = None;
        self
    }

    /// The session opened by `connect` belongs to the factory and is closed on shutdown or failed bootstrap.
    pub fn connect_with<F>(mut self, connect: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Session>, MappingError> + Send + 'static,
    {
        self.connector = Some(Box::new(connect));
        self.session = None;
        self
    }

    /// A supplied executor is never shut down by the factory.
    pub fn executor(mut self, executor: Arc<Executor>) -> Self {
        self.context.executor = Some(executor);
        self
    }

    pub fn entity(mut self, entity: Arc<dyn EntityMeta>) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn manage<E: 'static>(mut self) -> Self {
        self.context.manage(EntityClass::of::<E>());
        self
    }

    pub fn manage_name(mut self, name: &str) -> Self {
        self.context.manage_name(name);
        self
    }

    pub fn force_schema_generation(mut self, force: bool) -> Self {
        self.context.force_schema_generation = force;
        self
    }

    pub fn discover_registered(mut self, discover: bool) -> Self {
        self.context.discover_registered = discover;
        self
    }

    pub fn insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.context.insert_strategy = strategy;
        self
    }

    pub fn object_mapper(mut self, mapper: ObjectMapper) -> Self {
        self.object_mapper = Arc::new(mapper);
        self
    }

    pub fn bean_factory(mut self, factory: Arc<dyn BeanFactory>) -> Self {
        self.bean_factory = factory;
        self
    }

    /// Runs the bootstrap; the factory only exists once every step succeeded.
    pub async fn build(self) -> Result<ManagerFactory, MappingError> {
        let ManagerFactoryBuilder { mut context, session, connector, entities, object_mapper, bean_factory } = self;

        let session = match (session, connector) {
            (Some(session), _) => session,
            (None, Some(connect)) => {
                context.owns_session = true;
                connect()?
            }
            (None, None) => return Err(MappingError::Session("no session or connector configured".to_string())),
        };
        let executor = match context.executor.clone() {
            Some(executor) => executor,
            None => {
                let settings = &context.executor_settings;
                let executor = match Executor::new(&settings.name, settings.worker_threads) {
                    Ok(executor) => Arc::new(executor),
                    Err(err) => {
                        release(&context, &session, None).await;
                        return Err(err);
                    }
                };
                context.owns_executor = true;
                context.executor = Some(Arc::clone(&executor));
                executor
            }
        };

        let discovered = match discover(&context, entities) {
            Ok(discovered) => discovered,
            Err(err) => {
                release(&context, &session, Some(&executor)).await;
                return Err(err);
            }
        };
        let dependencies = Dependencies::new(session.protocol_version(), session.codec_registry(), object_mapper, bean_factory);
        match bootstrap(&context, &session, &executor, &dependencies, discovered).await {
            Ok((managed, udt_registry, statements)) => {
                info!("Manager factory ready: {} managed entities, {} prepared statements", managed.len(), statements.len());
                Ok(ManagerFactory {
                    context,
                    session,
                    entities: managed,
                    udt_registry,
                    statements,
                    dependencies,
                    shut_down: AtomicBool::new(false),
                })
            }
            Err(err) => {
                error!("Bootstrap failed: {}", err);
                release(&context, &session, Some(&executor)).await;
                Err(err)
            }
        }
    }
}

/// Closes what bootstrap opened itself.
async fn release(context: &ConfigurationContext, session: &Arc<dyn Session>, executor: Option<&Arc<Executor>>) {
    if context.owns_session {
        if let Err(err) = session.close().await {
            warn!("Closing session failed: {}", err);
        }
    }
    if context.owns_executor {
        if let Some(executor) = executor {
            executor.shutdown();
        }
    }
}

/// Builder entities followed by link-time registrations, first occurrence of a class wins.
fn discover(context: &ConfigurationContext, entities: Vec<Arc<dyn EntityMeta>>) -> Result<Vec<Arc<dyn EntityMeta>>, MappingError> {
    let mut discovered: Vec<Arc<dyn EntityMeta>> = Vec::new();
    let mut add = |entity: Arc<dyn EntityMeta>| {
        if discovered.iter().all(|e| e.class() != entity.class()) {
            discovered.push(entity);
        }
    };
    for entity in entities {
        add(entity);
    }
    if context.discover_registered {
        for registration in inventory::iter::<EntityRegistration> {
            debug!("Discovered registered entity {}", registration.name);
            add((registration.build)()?);
        }
    }
    Ok(discovered)
}

type Bootstrapped = (Vec<Arc<dyn EntityMeta>>, UdtRegistry, Arc<StatementCache>);

async fn bootstrap(
    context: &ConfigurationContext,
    session: &Arc<dyn Session>,
    executor: &Arc<Executor>,
    dependencies: &Dependencies,
    discovered: Vec<Arc<dyn EntityMeta>>,
) -> Result<Bootstrapped, MappingError> {
    let classes: Vec<EntityClass> = discovered.iter().map(|e| e.class()).collect();
    for name in context.unmatched(&classes) {
        warn!("Managed entity {} was not discovered, ignoring it", name);
    }
    let mut udt_registry = UdtRegistry::new();
    let mut managed = Vec::new();
    for entity in discovered {
        let is_managed = context.is_managed(entity.class());
        udt_registry.register_entity(&entity.composites(), is_managed);
        if is_managed {
            managed.push(entity);
        } else {
            debug!("Entity {} is not managed", entity.class());
        }
    }

    info!("Registering native codecs");
    register_native_codecs(&session.codec_registry(), session.protocol_version())?;

    info!("Injecting dependencies into {} entities", managed.len());
    for entity in &managed {
        dependencies.inject_into(entity.as_ref())?;
    }

    if context.force_schema_generation {
        create_schema(session, &managed, &udt_registry).await?;
    }

    info!("Validating schema");
    for entity in managed.iter().filter(|e| e.sync() == SchemaSync::Validate) {
        validate_entity(session, entity.as_ref()).await?;
    }

    info!("Preparing static statements");
    let statements = prepare_statements(session, executor, &managed).await?;
    Ok((managed, udt_registry, statements))
}

async fn create_schema(session: &Arc<dyn Session>, managed: &[Arc<dyn EntityMeta>], udt_registry: &UdtRegistry) -> Result<(), MappingError> {
    for entry in udt_registry.referenced() {
        let user_type = schema::declared_user_type(entry.meta.as_ref())?;
        info!("Creating type {} used by {} entities", user_type.qualified_name(), entry.usage);
        session.execute(Statement::Schema(SchemaStatement::create_type(user_type))).await?;
    }
    for entity in managed.iter().filter(|e| e.sync() == SchemaSync::Create) {
        info!("Creating table {}", entity.qualified_table_name());
        session.execute(Statement::Schema(SchemaStatement::create_table(entity.table_metadata()))).await?;
    }
    Ok(())
}

async fn validate_entity(session: &Arc<dyn Session>, entity: &dyn EntityMeta) -> Result<(), MappingError> {
    if !entity.is_bound() {
        return Err(MappingError::unbound(format!("entity {}", entity.class())));
    }
    let declared = entity.table_metadata();
    let remote = session
        .describe_table(entity.keyspace(), entity.table())
        .await?
        .ok_or_else(|| MappingError::schema(entity.qualified_table_name(), "table does not exist"))?;
    schema::validate_table(&declared, &remote)?;

    for meta in schema::collect_structured_types(&entity.composites()) {
        let declared = schema::declared_user_type(meta.as_ref())?;
        let keyspace = declared.keyspace.as_deref().or(entity.keyspace());
        match session.describe_type(keyspace, &declared.name).await? {
            Some(remote) => schema::validate_type(&declared, &remote)?,
            None => warn!("Type {} cannot be described, skipping its validation", declared.qualified_name()),
        }
    }
    debug!("Table {} matches its mapping", entity.qualified_table_name());
    Ok(())
}

async fn prepare_statements(
    session: &Arc<dyn Session>,
    executor: &Executor,
    managed: &[Arc<dyn EntityMeta>],
) -> Result<Arc<StatementCache>, MappingError> {
    let mut tasks = Vec::new();
    for template in managed.iter().flat_map(|e| e.static_templates()) {
        let session = Arc::clone(session);
        tasks.push(executor.spawn(async move { session.prepare(template).await })?);
    }
    let mut cache = StatementCache::builder();
    for joined in join_all(tasks).await {
        let prepared = joined.map_err(|e| MappingError::Session(format!("preparing statement: {}", e)))??;
        debug!("Prepared {} for {}: {}", prepared.template().kind, prepared.template().entity, prepared.template().cql);
        cache.insert(prepared);
    }
    Ok(cache.freeze())
}

/// Bootstrapped mapping runtime: immutable property trees, the structured type registry and the statement cache.
pub struct ManagerFactory {
    context: ConfigurationContext,
    session: Arc<dyn Session>,
    entities: Vec<Arc<dyn EntityMeta>>,
    udt_registry: UdtRegistry,
    statements: Arc<StatementCache>,
    dependencies: Dependencies,
    shut_down: AtomicBool,
}

impl ManagerFactory {
    pub fn builder() -> ManagerFactoryBuilder {
        ManagerFactoryBuilder::new()
    }

    /// `keyspace.table` or bare `table`; `None` for unmanaged entities.
    pub fn table_name_for(&self, class: EntityClass) -> Option<String> {
        self.entity_meta(class).map(|e| e.qualified_table_name())
    }

    pub fn table_name_of<E: 'static>(&self) -> Option<String> {
        self.table_name_for(EntityClass::of::<E>())
    }

    pub fn is_managed(&self, class: EntityClass) -> bool {
        self.entity_meta(class).is_some()
    }

    pub fn managed_entities(&self) -> Vec<EntityClass> {
        self.entities.iter().map(|e| e.class()).collect()
    }

    fn entity_meta(&self, class: EntityClass) -> Option<&Arc<dyn EntityMeta>> {
        self.entities.iter().find(|e| e.class() == class)
    }

    pub fn manager<E: Send + Sync + 'static>(&self) -> Option<EntityManager<E>> {
        let meta = Arc::clone(self.entity_meta(EntityClass::of::<E>())?);
        let entity = meta.as_any().downcast::<EntityProperty<E>>().ok()?;
        Some(EntityManager {
            entity,
            session: Arc::clone(&self.session),
            statements: Arc::clone(&self.statements),
            default_strategy: self.context.insert_strategy,
        })
    }

    pub fn statement_cache(&self) -> &Arc<StatementCache> {
        &self.statements
    }

    pub fn udt_registry(&self) -> &UdtRegistry {
        &self.udt_registry
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn context(&self) -> &ConfigurationContext {
        &self.context
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Releases the session and executor if the factory created them. Supplied ones stay open.
    pub async fn shut_down(&self) -> Result<(), MappingError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.context.owns_session {
            info!("Closing session");
            self.session.close().await?;
        }
        if self.context.owns_executor {
            if let Some(executor) = &self.context.executor {
                executor.shutdown();
            }
        }
        Ok(())
    }
}

/// Request-time operations for one managed entity type, all through cached prepared statements.
pub struct EntityManager<E> {
    entity: Arc<EntityProperty<E>>,
    session: Arc<dyn Session>,
    statements: Arc<StatementCache>,
    default_strategy: InsertStrategy,
}

impl<E: Send + Sync + 'static> EntityManager<E> {
    pub fn entity_property(&self) -> &EntityProperty<E> {
        &self.entity
    }

    pub fn default_strategy(&self) -> InsertStrategy {
        self.default_strategy
    }

    fn prepared(&self, kind: OperationKind) -> Result<&PreparedStatement, MappingError> {
        self.statements
            .get(self.entity.class(), kind)
            .ok_or_else(|| MappingError::Custom(format!("no {} statement prepared for {}", kind, self.entity.class())))
    }

    pub async fn insert(&self, entity: &E, strategy: InsertStrategy) -> Result<(), MappingError> {
        let mut bound = self.prepared(OperationKind::InsertAll)?.bind();
        self.entity.encode_to(entity, &mut bound, strategy)?;
        self.session.execute(Statement::Bound(bound)).await?;
        Ok(())
    }

    /// Returns whether the row was written.
    pub async fn insert_if_not_exists(&self, entity: &E, strategy: InsertStrategy) -> Result<bool, MappingError> {
        let mut bound = self.prepared(OperationKind::InsertIfNotExists)?.bind();
        self.entity.encode_to(entity, &mut bound, strategy)?;
        Ok(self.session.execute(Statement::Bound(bound)).await?.applied)
    }

    /// `key` holds the partition key values followed by the clustering values.
    pub async fn find_by_key(&self, key: &[WireValue]) -> Result<Option<E>, MappingError> {
        let bound = self.bind_key(OperationKind::SelectByKey, key)?;
        let result = self.session.execute(Statement::Bound(bound)).await?;
        result.first().map(|row| self.entity.decode_entity(row)).transpose()
    }

    pub async fn delete_by_key(&self, key: &[WireValue]) -> Result<(), MappingError> {
        let bound = self.bind_key(OperationKind::DeleteByKey, key)?;
        self.session.execute(Statement::Bound(bound)).await?;
        Ok(())
    }

    pub async fn delete(&self, entity: &E) -> Result<(), MappingError> {
        let key: Vec<WireValue> = self.entity.extract_primary_key(entity)?.into_iter().map(|(_, v)| v).collect();
        self.delete_by_key(&key).await
    }

    fn bind_key(&self, kind: OperationKind, key: &[WireValue]) -> Result<crate::statement::BoundStatement, MappingError> {
        let mut bound = self.prepared(kind)?.bind();
        let expected = bound.template().variables.len();
        if key.len() != expected {
            return Err(MappingError::Custom(format!(
                "{} of {} takes {} key values, got {}",
                kind,
                self.entity.class(),
                expected,
                key.len()
            )));
        }
        for (i, value) in key.iter().enumerate() {
            if value.is_null() {
                return Err(MappingError::MissingMandatory(bound.template().variables[i].clone()));
            }
            bound.set_value(Slot::Positional(i), value.clone())?;
        }
        Ok(bound)
    }
}

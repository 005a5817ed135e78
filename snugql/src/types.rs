use std::{fmt, sync::Arc};

use serde::Serialize;
use serde_json::Value;

use crate::{
    context::ExecutionContext,
    errors::{CallbackError, EntityRef},
    id::{FakeIdPredicate, IdKind, default_fake_predicate, id_key},
    record::Record,
};

pub use futures::future::BoxFuture;

/// Wraps an already computed callback result for hooks and loaders that do no I/O.
pub fn ready<'a, T>(result: Result<T, CallbackError>) -> BoxFuture<'a, Result<T, CallbackError>>
where
    T: Send + 'a,
{
    Box::pin(futures::future::ready(result))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Callback signatures
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs against a freshly created or freshly loaded entity before its fields are assigned.
pub type EntityHook = Arc<dyn Fn(&ExecutionContext, &mut Record) -> Result<(), CallbackError> + Send + Sync>;

/// Decides whether the caller may save the entity; the flag is `true` for inserts.
pub type CanSaveHook =
    Arc<dyn for<'a> Fn(&'a ExecutionContext, &'a Record, bool) -> BoxFuture<'a, Result<bool, CallbackError>> + Send + Sync>;

/// Receives every saved entity of its type and may report further side-effected entities.
pub type AfterSaveHook = Arc<
    dyn for<'a> Fn(&'a ExecutionContext, &'a [Record]) -> BoxFuture<'a, Result<Vec<AffectedEntity>, CallbackError>>
        + Send
        + Sync,
>;

/// Row-level filter composed into every lookup of the entity type.
pub type SecurityFilter = Arc<dyn Fn(&ExecutionContext, &Record) -> bool + Send + Sync>;

/// Computes a value for a field that was left out of a create payload.
pub type DefaultProvider = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Writes a supplied value into the entity instead of a plain field assignment.
pub type SaveHook = Arc<
    dyn for<'a> Fn(&'a ExecutionContext, &'a mut Record, Value) -> BoxFuture<'a, Result<(), CallbackError>> + Send + Sync,
>;

/// Loads one value per entity in a single call. The result is positional.
pub type BatchLoader = Arc<
    dyn for<'a> Fn(&'a ExecutionContext, &'a [Record]) -> BoxFuture<'a, Result<Vec<Value>, CallbackError>> + Send + Sync,
>;

pub type EditPredicate = Arc<dyn Fn(&FieldChange<'_>) -> bool + Send + Sync>;
pub type EditMessage = Arc<dyn Fn(&FieldChange<'_>) -> String + Send + Sync>;
pub type ValueGetter = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
pub type EntityFactory = Arc<dyn Fn() -> Record + Send + Sync>;

/// A proposed change to one field of an existing entity, as seen by editability rules.
pub struct FieldChange<'a> {
    pub context: &'a ExecutionContext,
    pub entity: &'a Record,
    pub field: &'a str,
    pub previous: &'a Value,
    pub next: &'a Value,
    /// Value produced for this entity by the field's batched editability loader.
    pub batch: Option<&'a Value>,
}

/// Entity reported by an after-save hook as changed by the submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffectedEntity {
    pub collection: String,
    pub record: Record,
}

impl AffectedEntity {
    pub fn new(collection: impl Into<String>, record: Record) -> Self {
        Self {
            collection: collection.into(),
            record,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Field descriptors
// ═══════════════════════════════════════════════════════════════════════════════

/// Rule governing whether an existing entity's field may change.
#[derive(Clone)]
pub enum EditableMode {
    Never,
    Always,
    Predicate {
        check: EditPredicate,
        message: EditMessage,
    },
    /// The loader runs once for every entity of a submission that changes the
    /// field; its per-entity value is handed to `check` as [`FieldChange::batch`].
    Batched {
        loader: BatchLoader,
        check: EditPredicate,
        message: EditMessage,
    },
}

impl fmt::Debug for EditableMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Always => f.write_str("Always"),
            Self::Predicate { .. } => f.write_str("Predicate"),
            Self::Batched { .. } => f.write_str("Batched"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[derive(Default)]
pub enum RelationKind {
    /// Independent reference; an unreachable target is silently left unassigned.
    #[default]
    Association,
    /// Ownership; the referencing entity cannot be saved without an authorized target.
    Aggregation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    /// Collection of the referenced entity type.
    pub target: String,
    pub relation: RelationKind,
}

#[derive(Clone)]
pub enum FieldKind {
    Scalar,
    /// Derived value; only writable through a save hook.
    Calculated {
        loader: Option<BatchLoader>,
        getter: Option<ValueGetter>,
    },
    /// Foreign key holding the identity of another entity.
    Reference(ReferenceDescriptor),
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("Scalar"),
            Self::Calculated { loader, .. } => f
                .debug_struct("Calculated")
                .field("batched", &loader.is_some())
                .finish(),
            Self::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
        }
    }
}

/// Declarative value check applied to every value written to a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
    Regex { pattern: String },
    Enum { allowed: Vec<String>, case_insensitive: bool },
    Email,
    Url,
    Uuid,
}

#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub is_identity: bool,
    pub mandatory_on_create: bool,
    pub mandatory_on_update: bool,
    pub editable: EditableMode,
    pub default_value: Option<DefaultProvider>,
    pub save: Option<SaveHook>,
    pub validations: Vec<ValidationRule>,
}

impl FieldDescriptor {
    fn with_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_identity: false,
            mandatory_on_create: false,
            mandatory_on_update: false,
            editable: EditableMode::Always,
            default_value: None,
            save: None,
            validations: Vec::new(),
        }
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Scalar)
    }

    pub fn identity(name: impl Into<String>) -> Self {
        let mut field = Self::with_kind(name, FieldKind::Scalar);
        field.is_identity = true;
        field.editable = EditableMode::Never;
        field
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>, relation: RelationKind) -> Self {
        Self::with_kind(
            name,
            FieldKind::Reference(ReferenceDescriptor {
                target: target.into(),
                relation,
            }),
        )
    }

    /// A derived field whose current value is computed from the entity itself.
    pub fn computed<G>(name: impl Into<String>, getter: G) -> Self
    where
        G: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self::with_kind(
            name,
            FieldKind::Calculated {
                loader: None,
                getter: Some(Arc::new(getter)),
            },
        )
    }

    /// A derived field whose current values come from one batched lookup per submission.
    pub fn from_batch<L>(name: impl Into<String>, loader: L) -> Self
    where
        L: for<'a> Fn(&'a ExecutionContext, &'a [Record]) -> BoxFuture<'a, Result<Vec<Value>, CallbackError>>
            + Send
            + Sync
            + 'static,
    {
        Self::with_kind(
            name,
            FieldKind::Calculated {
                loader: Some(Arc::new(loader)),
                getter: None,
            },
        )
    }

    pub fn mandatory_on_create(mut self) -> Self {
        self.mandatory_on_create = true;
        self
    }

    pub fn mandatory_on_update(mut self) -> Self {
        self.mandatory_on_update = true;
        self
    }

    /// Mandatory for both create and update.
    pub fn mandatory(self) -> Self {
        self.mandatory_on_create().mandatory_on_update()
    }

    pub fn read_only(mut self) -> Self {
        self.editable = EditableMode::Never;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = EditableMode::Always;
        self
    }

    pub fn editable_if<P, M>(mut self, check: P, message: M) -> Self
    where
        P: Fn(&FieldChange<'_>) -> bool + Send + Sync + 'static,
        M: Fn(&FieldChange<'_>) -> String + Send + Sync + 'static,
    {
        self.editable = EditableMode::Predicate {
            check: Arc::new(check),
            message: Arc::new(message),
        };
        self
    }

    pub fn batched_editable_if<L, P, M>(mut self, loader: L, check: P, message: M) -> Self
    where
        L: for<'a> Fn(&'a ExecutionContext, &'a [Record]) -> BoxFuture<'a, Result<Vec<Value>, CallbackError>>
            + Send
            + Sync
            + 'static,
        P: Fn(&FieldChange<'_>) -> bool + Send + Sync + 'static,
        M: Fn(&FieldChange<'_>) -> String + Send + Sync + 'static,
    {
        self.editable = EditableMode::Batched {
            loader: Arc::new(loader),
            check: Arc::new(check),
            message: Arc::new(message),
        };
        self
    }

    pub fn default_value<D>(mut self, provider: D) -> Self
    where
        D: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.default_value = Some(Arc::new(provider));
        self
    }

    pub fn save<S>(mut self, hook: S) -> Self
    where
        S: for<'a> Fn(&'a ExecutionContext, &'a mut Record, Value) -> BoxFuture<'a, Result<(), CallbackError>>
            + Send
            + Sync
            + 'static,
    {
        self.save = Some(Arc::new(hook));
        self
    }

    pub fn validate(mut self, rule: ValidationRule) -> Self {
        self.validations.push(rule);
        self
    }

    pub fn reference_target(&self) -> Option<&ReferenceDescriptor> {
        match &self.kind {
            FieldKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.kind, FieldKind::Calculated { .. })
    }

    /// Whether a payload may supply this field at all.
    pub fn is_writable(&self) -> bool {
        !self.is_identity && (!self.is_calculated() || self.save.is_some())
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_identity", &self.is_identity)
            .field("mandatory_on_create", &self.mandatory_on_create)
            .field("mandatory_on_update", &self.mandatory_on_update)
            .field("editable", &self.editable)
            .field("has_default", &self.default_value.is_some())
            .field("has_save_hook", &self.save.is_some())
            .field("validations", &self.validations)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entity descriptors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct EntityHooks {
    pub before_create: Option<EntityHook>,
    pub before_update: Option<EntityHook>,
    pub can_save: Option<CanSaveHook>,
    pub after_save: Option<AfterSaveHook>,
}

/// Everything the engine knows about one entity type.
#[derive(Clone)]
pub struct EntityDescriptor {
    /// Type name used in error messages (`Person`).
    pub name: String,
    /// Collection name used in payloads and storage (`people`).
    pub collection: String,
    pub id_field: String,
    pub id_kind: IdKind,
    pub is_fake_id: FakeIdPredicate,
    /// Identity field first, then the declared fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
    pub security_filter: Option<SecurityFilter>,
    pub hooks: EntityHooks,
    pub factory: Option<EntityFactory>,
}

impl EntityDescriptor {
    /// Starts a descriptor with an integer `id` identity.
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            id_field: "id".to_string(),
            id_kind: IdKind::Int,
            is_fake_id: default_fake_predicate(IdKind::Int),
            fields: vec![FieldDescriptor::identity("id")],
            security_filter: None,
            hooks: EntityHooks::default(),
            factory: None,
        }
    }

    /// Replaces the identity field and resets the placeholder test to the kind's default.
    pub fn identity(mut self, field: impl Into<String>, kind: IdKind) -> Self {
        let field = field.into();
        self.fields.retain(|candidate| !candidate.is_identity);
        self.fields.insert(0, FieldDescriptor::identity(field.clone()));
        self.id_field = field;
        self.id_kind = kind;
        self.is_fake_id = default_fake_predicate(kind);
        self
    }

    pub fn fake_ids<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.is_fake_id = Arc::new(predicate);
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn security_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ExecutionContext, &Record) -> bool + Send + Sync + 'static,
    {
        self.security_filter = Some(Arc::new(filter));
        self
    }

    pub fn before_create<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ExecutionContext, &mut Record) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.before_create = Some(Arc::new(hook));
        self
    }

    pub fn before_update<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ExecutionContext, &mut Record) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.hooks.before_update = Some(Arc::new(hook));
        self
    }

    pub fn can_save<H>(mut self, hook: H) -> Self
    where
        H: for<'a> Fn(&'a ExecutionContext, &'a Record, bool) -> BoxFuture<'a, Result<bool, CallbackError>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.can_save = Some(Arc::new(hook));
        self
    }

    pub fn after_save<H>(mut self, hook: H) -> Self
    where
        H: for<'a> Fn(&'a ExecutionContext, &'a [Record]) -> BoxFuture<'a, Result<Vec<AffectedEntity>, CallbackError>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.after_save = Some(Arc::new(hook));
        self
    }

    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Record + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_fake_id(&self, id: &Value) -> bool {
        (self.is_fake_id)(id)
    }

    pub fn entity_ref(&self, id: &Value) -> EntityRef {
        EntityRef::new(self.name.clone(), id_key(id))
    }

    /// Blank instance for an insert.
    pub fn instantiate(&self) -> Record {
        self.factory.as_ref().map(|factory| factory()).unwrap_or_default()
    }

    /// Whether `ctx` may see `record` through this type's security filter.
    pub fn permits(&self, ctx: &ExecutionContext, record: &Record) -> bool {
        self.security_filter.as_ref().is_none_or(|filter| filter(ctx, record))
    }

    pub fn references(&self) -> impl Iterator<Item = (&FieldDescriptor, &ReferenceDescriptor)> {
        self.fields
            .iter()
            .filter_map(|field| field.reference_target().map(|reference| (field, reference)))
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("id_field", &self.id_field)
            .field("id_kind", &self.id_kind)
            .field("fields", &self.fields)
            .field("has_security_filter", &self.security_filter.is_some())
            .finish()
    }
}

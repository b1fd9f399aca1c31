//! Type oracle and the project-wide class index it consults.
//!
//! Rules ask the oracle "what is this node's type" and "is it an instance of
//! X" instead of deriving types themselves. The oracle is a pure function of
//! the tree plus the injected [`ClassIndex`]; it never mutates the tree.
//!
//! An unresolvable type is the regular [`ResolvedType::Unknown`] value, and
//! every instance-of predicate answers `false` for it: a missed rewrite is
//! acceptable, a wrong one is not.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::attributes::{AttributeKey, AttributeValue};
use super::node::{NodeId, NodeKind, Syntax, Tree, normalize_class_name};

/// Assignment chains are followed at most this deep.
const MAX_RESOLUTION_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Object,
    Scalar,
}

/// Nominal type with nullability and generic arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub name: Arc<str>,
    pub category: TypeCategory,
    pub nullable: bool,
    pub generics: Vec<Arc<TypeDescriptor>>,
}

impl TypeDescriptor {
    pub fn object(name: &str) -> Self {
        TypeDescriptor {
            name: Arc::from(normalize_class_name(name)),
            category: TypeCategory::Object,
            nullable: false,
            generics: Vec::new(),
        }
    }

    pub fn scalar(name: &str) -> Self {
        TypeDescriptor {
            name: Arc::from(name),
            category: TypeCategory::Scalar,
            nullable: false,
            generics: Vec::new(),
        }
    }

    /// Parses a declared type such as `?Foo\Bar` or `string`.
    pub fn parse(declared: &str) -> Self {
        let (nullable, name) = match declared.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, declared),
        };
        let mut ty = match name.to_ascii_lowercase().as_str() {
            "string" | "int" | "float" | "bool" | "array" | "null" | "void" | "mixed"
            | "callable" | "iterable" => TypeDescriptor::scalar(&name.to_ascii_lowercase()),
            _ => TypeDescriptor::object(name),
        };
        ty.nullable = nullable;
        ty
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_generics(mut self, generics: Vec<Arc<TypeDescriptor>>) -> Self {
        self.generics = generics;
        self
    }

    pub fn is_object(&self) -> bool {
        self.category == TypeCategory::Object
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "?")?;
        }
        write!(f, "{}", self.name)?;
        if !self.generics.is_empty() {
            let args: Vec<String> = self.generics.iter().map(|g| g.to_string()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

/// Result of a type query.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedType {
    Unknown,
    Known(Arc<TypeDescriptor>),
}

impl ResolvedType {
    pub fn known(ty: TypeDescriptor) -> Self {
        ResolvedType::Known(Arc::new(ty))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ResolvedType::Unknown)
    }

    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            ResolvedType::Known(ty) => Some(ty),
            ResolvedType::Unknown => None,
        }
    }

    /// Class name when the type is an object type.
    pub fn object_name(&self) -> Option<&str> {
        self.descriptor()
            .filter(|ty| ty.is_object())
            .map(|ty| &*ty.name)
    }

    pub fn is_scalar(&self, name: &str) -> bool {
        self.descriptor()
            .is_some_and(|ty| ty.category == TypeCategory::Scalar && &*ty.name == name)
    }
}

/// Declaration data for one class or interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Method name to declared return type.
    #[serde(default)]
    pub methods: BTreeMap<String, String>,
}

impl ClassEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.parents.push(normalize_class_name(parent).to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(normalize_class_name(interface).to_string());
        self
    }

    pub fn method(mut self, name: &str, return_type: &str) -> Self {
        self.methods.insert(name.to_string(), return_type.to_string());
        self
    }
}

/// Read-only project-wide class hierarchy.
///
/// Shared by every worker of a batch. Subtype answers are memoised in a
/// concurrent map, which is the only interior mutability.
#[derive(Debug, Default)]
pub struct ClassIndex {
    classes: HashMap<String, ClassEntry>,
    subtype_cache: DashMap<(String, String), bool>,
}

impl ClassIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, name: &str, entry: ClassEntry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn insert(&mut self, name: &str, entry: ClassEntry) {
        self.classes.insert(normalize_class_name(name).to_string(), entry);
        self.subtype_cache.clear();
    }

    /// Loads an index from a JSON object mapping class names to entries.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let raw: HashMap<String, ClassEntry> = serde_json::from_str(json)?;
        let mut index = ClassIndex::new();
        for (name, entry) in raw {
            index.insert(&name, entry);
        }
        Ok(index)
    }

    pub fn get(&self, name: &str) -> Option<&ClassEntry> {
        self.classes.get(normalize_class_name(name))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// True iff `class` is `candidate` or inherits from / implements it transitively.
    pub fn is_subtype(&self, class: &str, candidate: &str) -> bool {
        let class = normalize_class_name(class);
        let candidate = normalize_class_name(candidate);
        if class == candidate {
            return true;
        }
        let key = (class.to_string(), candidate.to_string());
        if let Some(cached) = self.subtype_cache.get(&key) {
            return *cached;
        }
        let answer = self.supertypes(class).any(|s| s == candidate);
        trace!("is_subtype({}, {}) = {}", class, candidate, answer);
        self.subtype_cache.insert(key, answer);
        answer
    }

    /// Declared return type of `method`, searching the class then its supertypes.
    pub fn method_return_type(&self, class: &str, method: &str) -> Option<&str> {
        std::iter::once(normalize_class_name(class).to_string())
            .chain(self.supertypes(class))
            .find_map(|name| {
                self.get(&name)
                    .and_then(|entry| entry.methods.get(method))
                    .map(String::as_str)
            })
    }

    /// Breadth-first walk over every known supertype of `class`.
    fn supertypes(&self, class: &str) -> impl Iterator<Item = String> + '_ {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(normalize_class_name(class).to_string());
        while let Some(current) = queue.pop_front() {
            if let Some(entry) = self.get(&current) {
                for parent in entry.parents.iter().chain(entry.interfaces.iter()) {
                    let parent = normalize_class_name(parent).to_string();
                    if seen.insert(parent.clone()) {
                        out.push(parent.clone());
                        queue.push_back(parent);
                    }
                }
            }
        }
        out.into_iter()
    }
}

/// Semantic type queries used by rules and predicates.
pub trait TypeOracle: Send + Sync {
    /// Resolved type of an expression node, or `Unknown`.
    fn resolved_type_of(&self, tree: &Tree, node: NodeId) -> ResolvedType;

    /// Nominal subtype check between two class names.
    fn is_subtype(&self, class: &str, candidate: &str) -> bool;

    /// True iff the node's resolved type is `candidate` or one of its subtypes.
    /// Unknown types never match.
    fn is_instance_of(&self, tree: &Tree, node: NodeId, candidate: &str) -> bool {
        match self.resolved_type_of(tree, node).object_name() {
            Some(class) => self.is_subtype(class, candidate),
            None => false,
        }
    }
}

/// Oracle used when no class index is available: everything is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownTypeOracle;

impl TypeOracle for UnknownTypeOracle {
    fn resolved_type_of(&self, _tree: &Tree, _node: NodeId) -> ResolvedType {
        ResolvedType::Unknown
    }

    fn is_subtype(&self, _class: &str, _candidate: &str) -> bool {
        false
    }
}

/// Oracle backed by a [`ClassIndex`].
#[derive(Debug, Clone)]
pub struct IndexedTypeOracle {
    index: Arc<ClassIndex>,
}

impl IndexedTypeOracle {
    pub fn new(index: Arc<ClassIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<ClassIndex> {
        &self.index
    }

    fn resolve(&self, tree: &Tree, node: NodeId, depth: usize) -> ResolvedType {
        if depth > MAX_RESOLUTION_DEPTH || !tree.is_live(node) {
            return ResolvedType::Unknown;
        }
        if let Some(ty) = tree.attr(node, AttributeKey::ResolvedType).and_then(AttributeValue::as_type) {
            return ResolvedType::Known(Arc::clone(ty));
        }
        match tree.syntax(node) {
            Syntax::New { class } => ResolvedType::known(TypeDescriptor::object(class)),
            Syntax::Class { .. } => tree
                .qualified_class_name(node)
                .map(|name| ResolvedType::known(TypeDescriptor::object(&name)))
                .unwrap_or(ResolvedType::Unknown),
            Syntax::Variable { name } => self.resolve_variable(tree, node, name, depth),
            Syntax::Assign => match tree.child(node, 1) {
                Some(value) => self.resolve(tree, value, depth + 1),
                None => ResolvedType::Unknown,
            },
            Syntax::MethodCall { name } => {
                let Some(receiver) = tree.child(node, 0) else {
                    return ResolvedType::Unknown;
                };
                match self.resolve(tree, receiver, depth + 1).object_name() {
                    Some(class) => self.declared_return(tree, class, name),
                    None => ResolvedType::Unknown,
                }
            }
            Syntax::StaticCall { class, name } => self.declared_return(tree, class, name),
            Syntax::ClassConstFetch { constant, .. } if constant == "class" => {
                ResolvedType::known(TypeDescriptor::scalar("string"))
            }
            Syntax::String { .. } => ResolvedType::known(TypeDescriptor::scalar("string")),
            Syntax::Int { .. } => ResolvedType::known(TypeDescriptor::scalar("int")),
            Syntax::Bool { .. } => ResolvedType::known(TypeDescriptor::scalar("bool")),
            Syntax::Null => ResolvedType::known(TypeDescriptor::scalar("null")),
            Syntax::Array => ResolvedType::known(TypeDescriptor::scalar("array")),
            _ => ResolvedType::Unknown,
        }
    }

    /// Declared return type from the index. A class the index does not know
    /// inherits the declarations of the supertypes the tree declares for it.
    fn declared_return(&self, tree: &Tree, class: &str, method: &str) -> ResolvedType {
        let declared = self.index.method_return_type(class, method).or_else(|| {
            if self.index.get(normalize_class_name(class)).is_some() {
                return None;
            }
            local_supertypes(tree, class)
                .iter()
                .find_map(|parent| self.index.method_return_type(parent, method))
        });
        match declared {
            Some(declared) => ResolvedType::known(TypeDescriptor::parse(declared)),
            None => ResolvedType::Unknown,
        }
    }

    fn resolve_variable(&self, tree: &Tree, node: NodeId, name: &str, depth: usize) -> ResolvedType {
        if name == "this" {
            return match tree.enclosing(node, NodeKind::Class) {
                Some(class) => self.resolve(tree, class, depth + 1),
                None => ResolvedType::Unknown,
            };
        }

        // Assignment target: the variable takes the assigned value's type.
        if let Some(parent) = tree.parent(node) {
            if tree.kind(parent) == NodeKind::Assign && tree.child(parent, 0) == Some(node) {
                return match tree.child(parent, 1) {
                    Some(value) => self.resolve(tree, value, depth + 1),
                    None => ResolvedType::Unknown,
                };
            }
        }

        // Otherwise: the nearest preceding assignment in the same body.
        let Some((body, statement)) = statement_of(tree, node) else {
            return ResolvedType::Unknown;
        };
        let Some(position) = tree.children(body).iter().position(|s| *s == statement) else {
            return ResolvedType::Unknown;
        };
        for &previous in tree.children(body)[..position].iter().rev() {
            if let Some(value) = assigned_value(tree, previous, name) {
                return self.resolve(tree, value, depth + 1);
            }
        }
        ResolvedType::Unknown
    }
}

impl TypeOracle for IndexedTypeOracle {
    fn resolved_type_of(&self, tree: &Tree, node: NodeId) -> ResolvedType {
        self.resolve(tree, node, 0)
    }

    fn is_subtype(&self, class: &str, candidate: &str) -> bool {
        self.index.is_subtype(class, candidate)
    }

    /// Classes declared in the tree but missing from the index contribute
    /// their declared `extends` and `implements` clauses.
    fn is_instance_of(&self, tree: &Tree, node: NodeId, candidate: &str) -> bool {
        let resolved = self.resolved_type_of(tree, node);
        let Some(class) = resolved.object_name() else {
            return false;
        };
        if self.index.is_subtype(class, candidate) {
            return true;
        }
        if self.index.get(class).is_some() {
            return false;
        }
        local_supertypes(tree, class)
            .iter()
            .any(|parent| self.index.is_subtype(parent, candidate))
    }
}

/// Supertypes the tree declares for `class`, following `extends` and
/// `implements` transitively through every class the tree declares.
fn local_supertypes(tree: &Tree, class: &str) -> Vec<String> {
    let declared: HashMap<String, Vec<String>> = tree
        .descendants(tree.root())
        .into_iter()
        .filter_map(|id| match tree.syntax(id) {
            Syntax::Class {
                extends, implements, ..
            } => {
                let parents = extends
                    .iter()
                    .chain(implements.iter())
                    .map(|p| normalize_class_name(p).to_string())
                    .collect();
                tree.qualified_class_name(id).map(|name| (name, parents))
            }
            _ => None,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([normalize_class_name(class).to_string()]);
    let mut out = Vec::new();
    while let Some(current) = queue.pop_front() {
        for parent in declared.get(&current).into_iter().flatten() {
            if seen.insert(parent.clone()) {
                out.push(parent.clone());
                queue.push_back(parent.clone());
            }
        }
    }
    out
}

fn is_body(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::ClassMethod | NodeKind::Function | NodeKind::File | NodeKind::Namespace
    )
}

/// Finds the statement containing `node` and the body that lists it.
fn statement_of(tree: &Tree, node: NodeId) -> Option<(NodeId, NodeId)> {
    let mut current = node;
    for parent in tree.ancestors(node) {
        if is_body(tree.kind(parent)) {
            return Some((parent, current));
        }
        current = parent;
    }
    None
}

/// If `statement` is `$name = <value>;`, returns the value node.
fn assigned_value(tree: &Tree, statement: NodeId, name: &str) -> Option<NodeId> {
    if tree.kind(statement) != NodeKind::Expression {
        return None;
    }
    let assign = tree.child(statement, 0)?;
    if tree.kind(assign) != NodeKind::Assign {
        return None;
    }
    let target = tree.child(assign, 0)?;
    match tree.syntax(target) {
        Syntax::Variable { name: target_name } if target_name == name => tree.child(assign, 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = "Nette\\Application\\UI\\Form";

    fn index() -> ClassIndex {
        ClassIndex::new()
            .with_class(FORM, ClassEntry::new().extends("Nette\\Forms\\Form"))
            .with_class(
                "Nette\\Forms\\Form",
                ClassEntry::new()
                    .extends("Nette\\Forms\\Container")
                    .method("addText", "Nette\\Forms\\Controls\\TextInput"),
            )
            .with_class("Nette\\Forms\\Container", ClassEntry::new().implements("ArrayAccess"))
    }

    #[test]
    fn test_subtype_is_transitive_and_memoised() {
        let index = index();
        assert!(index.is_subtype(FORM, "Nette\\Forms\\Container"));
        assert!(index.is_subtype(FORM, "\\ArrayAccess"));
        assert!(index.is_subtype(FORM, FORM));
        assert!(!index.is_subtype("Nette\\Forms\\Container", FORM));
        assert!(!index.is_subtype("Unknown\\Thing", FORM));
        assert!(index.subtype_cache.contains_key(&(FORM.to_string(), "ArrayAccess".to_string())));
    }

    #[test]
    fn test_cyclic_hierarchy_terminates() {
        let index = ClassIndex::new()
            .with_class("A", ClassEntry::new().extends("B"))
            .with_class("B", ClassEntry::new().extends("A"));
        assert!(index.is_subtype("A", "B"));
        assert!(!index.is_subtype("A", "C"));
    }

    #[test]
    fn test_method_return_type_is_inherited() {
        let index = index();
        assert_eq!(
            index.method_return_type(FORM, "addText"),
            Some("Nette\\Forms\\Controls\\TextInput")
        );
        assert_eq!(index.method_return_type(FORM, "missing"), None);
    }

    #[test]
    fn test_index_from_json() {
        let index = ClassIndex::from_json(
            r#"{"\\App\\HomePresenter": {"parents": ["Nette\\Application\\UI\\Presenter"]}}"#,
        )
        .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.is_subtype("App\\HomePresenter", "Nette\\Application\\UI\\Presenter"));
    }

    #[test]
    fn test_parse_declared_types() {
        assert_eq!(TypeDescriptor::parse("string"), TypeDescriptor::scalar("string"));
        let nullable = TypeDescriptor::parse("?\\Foo\\Bar");
        assert!(nullable.nullable && nullable.is_object());
        assert_eq!(nullable.to_string(), "?Foo\\Bar");
    }

    #[test]
    fn test_variable_resolves_through_preceding_assignment() {
        let mut tree = Tree::new(Syntax::File);
        let target = tree.add(Syntax::variable("form"));
        let new = tree.add(Syntax::New { class: FORM.to_string() });
        let assign = tree.add_with_children(Syntax::Assign, vec![target, new]).unwrap();
        let first = tree.add_with_children(Syntax::Expression, vec![assign]).unwrap();
        let receiver = tree.add(Syntax::variable("form"));
        let call = tree.add_with_children(Syntax::method_call("addText"), vec![receiver]).unwrap();
        let second = tree.add_with_children(Syntax::Expression, vec![call]).unwrap();
        let root = tree.root();
        tree.push_child(root, first).unwrap();
        tree.push_child(root, second).unwrap();

        let oracle = IndexedTypeOracle::new(Arc::new(index()));
        assert_eq!(oracle.resolved_type_of(&tree, receiver).object_name(), Some(FORM));
        assert_eq!(oracle.resolved_type_of(&tree, target).object_name(), Some(FORM));
        assert!(oracle.is_instance_of(&tree, receiver, "Nette\\Forms\\Container"));
        assert_eq!(
            oracle.resolved_type_of(&tree, call).object_name(),
            Some("Nette\\Forms\\Controls\\TextInput")
        );
    }

    #[test]
    fn test_declared_class_outside_index() {
        let mut tree = Tree::new(Syntax::File);
        let class = tree.add(Syntax::Class {
            name: "LocalForm".into(),
            extends: Some(FORM.into()),
            implements: vec![],
        });
        let root = tree.root();
        tree.push_child(root, class).unwrap();

        let oracle = IndexedTypeOracle::new(Arc::new(index()));
        assert!(oracle.is_instance_of(&tree, class, "Nette\\Forms\\Container"));
        assert!(!oracle.is_instance_of(&tree, class, "Some\\Other"));
    }

    #[test]
    fn test_unknown_never_matches() {
        let mut tree = Tree::new(Syntax::File);
        let var = tree.add(Syntax::variable("undefined"));
        let stmt = tree.add_with_children(Syntax::Expression, vec![var]).unwrap();
        let root = tree.root();
        tree.push_child(root, stmt).unwrap();

        let oracle = IndexedTypeOracle::new(Arc::new(index()));
        assert!(oracle.resolved_type_of(&tree, var).is_unknown());
        assert!(!oracle.is_instance_of(&tree, var, FORM));

        let new = tree.add(Syntax::New { class: FORM.to_string() });
        assert!(!UnknownTypeOracle.is_instance_of(&tree, new, FORM));
    }

    #[test]
    fn test_declared_chain_outside_index() {
        let mut tree = Tree::new(Syntax::File);
        let base = tree.add(Syntax::Class {
            name: "BaseForm".into(),
            extends: Some(FORM.into()),
            implements: vec![],
        });
        let leaf = tree.add(Syntax::Class {
            name: "SignUpForm".into(),
            extends: Some("\\BaseForm".into()),
            implements: vec![],
        });
        let cyclic = tree.add(Syntax::Class {
            name: "Loop".into(),
            extends: Some("Loop".into()),
            implements: vec![],
        });
        let root = tree.root();
        for class in [base, leaf, cyclic] {
            tree.push_child(root, class).unwrap();
        }

        let oracle = IndexedTypeOracle::new(Arc::new(index()));
        assert!(oracle.is_instance_of(&tree, leaf, "Nette\\Forms\\Container"));
        assert!(!oracle.is_instance_of(&tree, cyclic, FORM));
        assert_eq!(
            oracle.declared_return(&tree, "SignUpForm", "addText").object_name(),
            Some("Nette\\Forms\\Controls\\TextInput")
        );
    }
}


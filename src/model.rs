//! Class and package graph.
//!
//! The model is an arena: classes and packages live in vectors and are
//! addressed by [`ClassId`] / [`PackageId`]. Names are dotted binary names
//! (`com.a.Outer$Inner`). Every referenced name gets an entry on first
//! mention; only classes whose bytes were imported are `defined`.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Package name used for classes declared without a package.
pub const UNNAMED_PACKAGE: &str = "<Unnamed Package>";

const PACKAGE_INFO: &str = "package-info";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(usize);

#[derive(Clone, Debug)]
pub struct JavaClass {
    name: String,
    package: PackageId,
    size: usize,
    code_size: u64,
    defined: bool,
    outer: Option<String>,
    annotations: BTreeSet<ClassId>,
    uses: BTreeSet<ClassId>,
}

impl JavaClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> PackageId {
        self.package
    }

    /// Name without the package prefix, including any `$` nesting.
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.name)
    }

    /// Length of the imported class file, zero for referenced-only classes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total bytecode length over all methods.
    pub fn code_size(&self) -> u64 {
        self.code_size
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn is_package_info(&self) -> bool {
        self.simple_name() == PACKAGE_INFO
    }

    /// Enclosing class recorded by the `InnerClasses` attribute.
    pub fn outer_name(&self) -> Option<&str> {
        self.outer.as_deref()
    }

    pub fn annotations(&self) -> &BTreeSet<ClassId> {
        &self.annotations
    }

    pub fn uses(&self) -> &BTreeSet<ClassId> {
        &self.uses
    }
}

#[derive(Clone, Debug)]
pub struct JavaPackage {
    name: String,
    classes: BTreeSet<ClassId>,
    annotations: BTreeSet<ClassId>,
}

impl JavaPackage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unnamed(&self) -> bool {
        self.name == UNNAMED_PACKAGE
    }

    pub fn classes(&self) -> &BTreeSet<ClassId> {
        &self.classes
    }

    /// Annotations declared on the package through `package-info`.
    pub fn annotations(&self) -> &BTreeSet<ClassId> {
        &self.annotations
    }
}

/// Everything one imported class file contributes to the model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassDefinition {
    pub name: String,
    pub size: usize,
    pub code_size: u64,
    pub outer: Option<String>,
    pub annotations: BTreeSet<String>,
    pub uses: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    packages: Vec<JavaPackage>,
    classes: Vec<JavaClass>,
    package_index: BTreeMap<String, PackageId>,
    class_index: BTreeMap<String, ClassId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_package(&mut self, name: &str) -> PackageId {
        if let Some(id) = self.package_index.get(name) {
            return *id;
        }
        let id = PackageId(self.packages.len());
        self.packages.push(JavaPackage {
            name: name.to_string(),
            classes: BTreeSet::new(),
            annotations: BTreeSet::new(),
        });
        self.package_index.insert(name.to_string(), id);
        id
    }

    pub fn get_or_create_class(&mut self, name: &str) -> ClassId {
        if let Some(id) = self.class_index.get(name) {
            return *id;
        }
        let package = self.get_or_create_package(package_of(name));
        let id = ClassId(self.classes.len());
        self.classes.push(JavaClass {
            name: name.to_string(),
            package,
            size: 0,
            code_size: 0,
            defined: false,
            outer: None,
            annotations: BTreeSet::new(),
            uses: BTreeSet::new(),
        });
        self.class_index.insert(name.to_string(), id);
        self.packages[package.0].classes.insert(id);
        id
    }

    /// Record that `from` uses the class `to`. Self-references are dropped.
    pub fn add_use(&mut self, from: ClassId, to: &str) {
        if self.classes[from.0].name == to {
            return;
        }
        let target = self.get_or_create_class(to);
        self.classes[from.0].uses.insert(target);
    }

    pub fn add_annotation(&mut self, class: ClassId, annotation: &str) {
        let annotation = self.get_or_create_class(annotation);
        self.classes[class.0].annotations.insert(annotation);
    }

    /// Insert an imported class. Importing the same definition twice is a
    /// no-op; a different definition under an already defined name fails.
    pub fn define_class(&mut self, definition: &ClassDefinition) -> Result<ClassId> {
        let id = self.get_or_create_class(&definition.name);
        if self.classes[id.0].defined {
            if self.definition_of(id) == *definition {
                return Ok(id);
            }
            return Err(Error::ConflictingClass(definition.name.clone()));
        }

        {
            let class = &mut self.classes[id.0];
            class.defined = true;
            class.size = definition.size;
            class.code_size = definition.code_size;
            class.outer = definition.outer.clone();
        }
        for target in &definition.uses {
            self.add_use(id, target);
        }
        for annotation in &definition.annotations {
            self.add_annotation(id, annotation);
        }
        if self.classes[id.0].is_package_info() {
            let package = self.classes[id.0].package;
            let annotations = self.classes[id.0].annotations.clone();
            self.packages[package.0].annotations.extend(annotations);
        }
        Ok(id)
    }

    /// Reconstruct the definition a defined class was imported from.
    pub fn definition_of(&self, id: ClassId) -> ClassDefinition {
        let class = &self.classes[id.0];
        ClassDefinition {
            name: class.name.clone(),
            size: class.size,
            code_size: class.code_size,
            outer: class.outer.clone(),
            annotations: class
                .annotations
                .iter()
                .map(|annotation| self.classes[annotation.0].name.clone())
                .collect(),
            uses: class
                .uses
                .iter()
                .map(|target| self.classes[target.0].name.clone())
                .collect(),
        }
    }

    /// Union `other` into this model, keyed by name.
    pub fn merge(&mut self, other: Model) -> Result<()> {
        for package in &other.packages {
            self.get_or_create_package(&package.name);
        }
        for (index, class) in other.classes.iter().enumerate() {
            if class.defined {
                self.define_class(&other.definition_of(ClassId(index)))?;
            } else {
                self.get_or_create_class(&class.name);
            }
        }
        Ok(())
    }

    pub fn class(&self, id: ClassId) -> &JavaClass {
        &self.classes[id.0]
    }

    pub fn package(&self, id: PackageId) -> &JavaPackage {
        &self.packages[id.0]
    }

    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    pub fn package_named(&self, name: &str) -> Option<PackageId> {
        self.package_index.get(name).copied()
    }

    /// Classes in name order.
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &JavaClass)> {
        self.class_index
            .values()
            .map(|id| (*id, &self.classes[id.0]))
    }

    /// Packages in name order.
    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &JavaPackage)> {
        self.package_index
            .values()
            .map(|id| (*id, &self.packages[id.0]))
    }

    pub fn defined_classes(&self) -> impl Iterator<Item = (ClassId, &JavaClass)> {
        self.classes().filter(|(_, class)| class.defined)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Packages used by some class of `package`, excluding itself.
    pub fn package_uses(&self, package: PackageId) -> BTreeSet<PackageId> {
        self.packages[package.0]
            .classes
            .iter()
            .flat_map(|class| self.classes[class.0].uses.iter())
            .map(|target| self.classes[target.0].package)
            .filter(|target| *target != package)
            .collect()
    }
}

/// Package part of a dotted class name.
pub fn package_of(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map(|(package, _)| package)
        .unwrap_or(UNNAMED_PACKAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, uses: &[&str]) -> ClassDefinition {
        ClassDefinition {
            name: name.to_string(),
            size: 100,
            code_size: 10,
            uses: uses.iter().map(|name| name.to_string()).collect(),
            ..ClassDefinition::default()
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut model = Model::new();
        let first = model.get_or_create_class("com.a.Foo");
        let second = model.get_or_create_class("com.a.Foo");

        assert_eq!(first, second);
        assert_eq!(model.class_count(), 1);
        let package = model.package_named("com.a").expect("package");
        assert_eq!(model.class(first).package(), package);
        assert!(model.package(package).classes().contains(&first));
    }

    #[test]
    fn class_without_package_lands_in_unnamed_package() {
        let mut model = Model::new();
        let id = model.get_or_create_class("Foo");
        let package = model.package(model.class(id).package());
        assert!(package.is_unnamed());
        assert_eq!(package.name(), UNNAMED_PACKAGE);
    }

    #[test]
    fn use_targets_are_created_undefined() {
        let mut model = Model::new();
        let id = model
            .define_class(&definition("com.a.Foo", &["java.util.List"]))
            .expect("define");
        let target = model.class_named("java.util.List").expect("target");

        assert!(model.class(id).is_defined());
        assert!(!model.class(target).is_defined());
        assert_eq!(model.class(target).size(), 0);
        assert!(model.class(target).uses().is_empty());
        assert_eq!(model.defined_classes().count(), 1);
    }

    #[test]
    fn self_references_are_dropped() {
        let mut model = Model::new();
        let id = model.get_or_create_class("com.a.Foo");
        model.add_use(id, "com.a.Foo");
        assert!(model.class(id).uses().is_empty());
    }

    #[test]
    fn defining_same_content_twice_keeps_edge_set() {
        let mut model = Model::new();
        let class = definition("com.a.Foo", &["com.b.Bar", "com.c.Baz"]);
        let first = model.define_class(&class).expect("define");
        let second = model.define_class(&class).expect("define again");

        assert_eq!(first, second);
        assert_eq!(model.class(first).uses().len(), 2);
        assert_eq!(model.class_count(), 3);
    }

    #[test]
    fn conflicting_definition_is_rejected() {
        let mut model = Model::new();
        model
            .define_class(&definition("com.a.Foo", &["com.b.Bar"]))
            .expect("define");
        let result = model.define_class(&definition("com.a.Foo", &["com.c.Baz"]));
        assert!(matches!(result, Err(Error::ConflictingClass(name)) if name == "com.a.Foo"));
    }

    #[test]
    fn package_uses_are_derived_and_exclude_self() {
        let mut model = Model::new();
        model
            .define_class(&definition("com.a.Foo", &["com.a.Other", "com.b.Bar"]))
            .expect("define");
        let a = model.package_named("com.a").expect("a");
        let b = model.package_named("com.b").expect("b");
        assert_eq!(model.package_uses(a), BTreeSet::from([b]));
        assert!(model.package_uses(b).is_empty());
    }

    #[test]
    fn package_info_annotations_are_copied_to_package() {
        let mut model = Model::new();
        let mut info = definition("com.a.package-info", &[]);
        info.annotations.insert("com.x.Layer".to_string());
        let id = model.define_class(&info).expect("define");

        assert!(model.class(id).is_package_info());
        let package = model.package_named("com.a").expect("package");
        let layer = model.class_named("com.x.Layer").expect("annotation");
        assert!(model.package(package).annotations().contains(&layer));
    }

    #[test]
    fn merge_is_order_independent() {
        let mut left = Model::new();
        left.define_class(&definition("com.a.Foo", &["com.b.Bar"]))
            .expect("define");
        let mut right = Model::new();
        right
            .define_class(&definition("com.b.Bar", &["com.a.Foo"]))
            .expect("define");

        let mut forward = left.clone();
        forward.merge(right.clone()).expect("merge");
        let mut backward = right;
        backward.merge(left).expect("merge");

        for model in [&forward, &backward] {
            assert_eq!(model.defined_classes().count(), 2);
            let foo = model.class_named("com.a.Foo").expect("foo");
            let bar = model.class_named("com.b.Bar").expect("bar");
            assert!(model.class(foo).uses().contains(&bar));
            assert!(model.class(bar).uses().contains(&foo));
        }
    }

    #[test]
    fn merge_rejects_conflicting_definitions() {
        let mut left = Model::new();
        left.define_class(&definition("com.a.Foo", &["com.b.Bar"]))
            .expect("define");
        let mut right = Model::new();
        right
            .define_class(&definition("com.a.Foo", &[]))
            .expect("define");
        assert!(matches!(
            left.merge(right),
            Err(Error::ConflictingClass(_))
        ));
    }
}

//! The annotation data model: classes, instances, and the owning
//! per-recording [`AnnotationSet`].

use crate::error::LunaError;
use crate::interval_tree::IntervalTree;
use crate::tick::{Interval, Tick};
use crate::value::{Value, ValueType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// The composite key used for indexing and uniqueness:
/// `(interval, class name, channel, id)`, lexicographically ordered in that
/// sequence.
pub type InstanceKey = (Interval, String, String, String);

/// One scored or derived event: `(interval, id, channel, meta)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub interval: Interval,
    /// May be `"."` to mean "no id".
    pub id: String,
    /// May be `"."` to mean "indiv-level, no channel".
    pub channel: String,
    pub meta: HashMap<String, Value>,
}

impl Instance {
    #[must_use]
    pub fn key(&self, class_name: &str) -> InstanceKey {
        (
            self.interval,
            class_name.to_string(),
            self.channel.clone(),
            self.id.clone(),
        )
    }
}

/// A named collection of [`Instance`]s sharing a declared variable schema.
pub struct AnnotationClass {
    name: String,
    description: String,
    types: HashMap<String, ValueType>,
    file: String,
    instances: Vec<Instance>,
    /// Index from composite key to position in `instances`, for `add`'s
    /// idempotence and `remove`'s lookup.
    key_index: HashMap<InstanceKey, usize>,
    tree: Option<IntervalTree>,
}

impl AnnotationClass {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            types: HashMap::new(),
            file: String::new(),
            instances: Vec::new(),
            key_index: HashMap::new(),
            tree: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, d: impl Into<String>) {
        self.description = d.into();
    }

    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn set_file(&mut self, f: impl Into<String>) {
        self.file = f.into();
    }

    #[must_use]
    pub fn types(&self) -> &HashMap<String, ValueType> {
        &self.types
    }

    pub fn declare_variable(&mut self, name: impl Into<String>, ty: ValueType) {
        self.types.insert(name.into(), ty);
    }

    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn sealed(&self) -> bool {
        self.tree.is_some()
    }

    /// Idempotent add on the composite key: returns the existing instance's
    /// index if the key already exists, otherwise appends and returns the
    /// new index.
    ///
    /// # Errors
    /// Returns [`LunaError::StateError`] if the class has already been
    /// sealed by a prior query, and [`LunaError::ConstraintViolation`] if
    /// `interval.stop < interval.start` (should not occur given
    /// [`Interval`]'s constructor invariant, checked defensively here).
    pub fn add(
        &mut self,
        id: String,
        interval: Interval,
        channel: String,
        meta: HashMap<String, Value>,
    ) -> Result<usize, LunaError> {
        if self.sealed() {
            return Err(LunaError::StateError(format!(
                "class '{}' mutated after its interval tree was built",
                self.name
            )));
        }
        if interval.stop < interval.start {
            return Err(LunaError::ConstraintViolation(
                "interval stop precedes start".into(),
            ));
        }

        let key: InstanceKey = (interval, self.name.clone(), channel.clone(), id.clone());
        if let Some(&idx) = self.key_index.get(&key) {
            return Ok(idx);
        }

        let idx = self.instances.len();
        self.instances.push(Instance {
            interval,
            id,
            channel,
            meta,
        });
        self.key_index.insert(key, idx);
        Ok(idx)
    }

    /// No-op if no instance matches the composite key.
    ///
    /// # Errors
    /// Returns [`LunaError::StateError`] if the class has already been
    /// sealed by a prior query.
    pub fn remove(
        &mut self,
        id: &str,
        interval: Interval,
        channel: &str,
    ) -> Result<(), LunaError> {
        if self.sealed() {
            return Err(LunaError::StateError(format!(
                "class '{}' mutated after its interval tree was built",
                self.name
            )));
        }
        let key: InstanceKey = (interval, self.name.clone(), channel.to_string(), id.to_string());
        if let Some(idx) = self.key_index.remove(&key) {
            self.instances.remove(idx);
            // Reindex positions shifted down by the removal.
            for v in self.key_index.values_mut() {
                if *v > idx {
                    *v -= 1;
                }
            }
        }
        Ok(())
    }

    /// Build (if needed) the lazy interval index and return instances
    /// overlapping `window` under half-open semantics.
    pub fn extract(&mut self, window: Interval) -> Vec<&Instance> {
        self.ensure_tree();
        self.tree
            .as_ref()
            .expect("just built")
            .query_overlaps(window)
            .into_iter()
            .map(|i| &self.instances[i])
            .collect()
    }

    /// As [`Self::extract`], but only instances `window` fully spans.
    pub fn extract_fully_contained(&mut self, window: Interval) -> Vec<&Instance> {
        self.ensure_tree();
        self.tree
            .as_ref()
            .expect("just built")
            .query_contained(window)
            .into_iter()
            .map(|i| &self.instances[i])
            .collect()
    }

    fn ensure_tree(&mut self) {
        if self.tree.is_none() {
            let entries = self
                .instances
                .iter()
                .enumerate()
                .map(|(i, inst)| (inst.interval, i))
                .collect();
            self.tree = Some(IntervalTree::build(entries));
            debug_assert_eq!(self.tree.as_ref().unwrap().len(), self.instances.len());
        }
    }
}

impl Default for AnnotationClass {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// Per-recording collection of [`AnnotationClass`]es plus clock metadata.
pub struct AnnotationSet {
    names: Vec<String>,
    classes: HashMap<String, AnnotationClass>,
    /// canonical -> original, case-insensitive on the original
    aliasing: HashMap<String, String>,
    pub start_clock: Option<NaiveDateTime>,
    pub end_clock: Option<NaiveDateTime>,
    pub duration_seconds: f64,
    pub epoch_seconds: f64,
    pub offset_ticks: Tick,
    pub offset_direction: i8,
    /// If set, a null/empty/self-named id on `add` is replaced by the clock
    /// time of the interval's start, rendered `HH:MM:SS.fff`.
    pub clock_ids: bool,
}

impl Default for AnnotationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            classes: HashMap::new(),
            aliasing: HashMap::new(),
            start_clock: None,
            end_clock: None,
            duration_seconds: 0.0,
            epoch_seconds: 30.0,
            offset_ticks: 0,
            offset_direction: 1,
            clock_ids: false,
        }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&AnnotationClass> {
        self.classes.get(name)
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut AnnotationClass> {
        self.classes.get_mut(name)
    }

    /// Fetch or create the named class, registering it in `names` in
    /// first-seen order.
    pub fn class_or_create(&mut self, name: &str) -> &mut AnnotationClass {
        if !self.classes.contains_key(name) {
            self.names.push(name.to_string());
            self.classes
                .insert(name.to_string(), AnnotationClass::new(name));
        }
        self.classes.get_mut(name).expect("just inserted")
    }

    /// Add an instance to `class`, creating the class if needed.
    ///
    /// When [`AnnotationSet::clock_ids`] is set, a null/empty id (or an id
    /// equal to the class name) is replaced by the clock time of
    /// `interval.start`, rendered `HH:MM:SS.fff`.
    pub fn add(
        &mut self,
        class: &str,
        mut id: String,
        interval: Interval,
        channel: String,
        meta: HashMap<String, Value>,
    ) -> Result<InstanceKey, LunaError> {
        if self.clock_ids && (id.is_empty() || id == "." || id == class) {
            id = self.render_clock(interval.start);
        }
        let class_ref = self.class_or_create(class);
        let idx = class_ref.add(id.clone(), interval, channel.clone(), meta)?;
        Ok(class_ref.instances()[idx].key(class))
    }

    fn render_clock(&self, start: Tick) -> String {
        let secs = crate::tick::ticks_to_seconds(start);
        let Some(base) = self.start_clock else {
            return format!("{secs:.3}");
        };
        let stamped = base + chrono::Duration::milliseconds((secs * 1000.0).round() as i64);
        stamped.format("%H:%M:%S%.3f").to_string()
    }

    /// Remove an instance from `class` if present; no-op otherwise.
    pub fn remove(
        &mut self,
        class: &str,
        id: &str,
        interval: Interval,
        channel: &str,
    ) -> Result<(), LunaError> {
        if let Some(c) = self.classes.get_mut(class) {
            c.remove(id, interval, channel)?;
        }
        Ok(())
    }

    /// Overlapping instances across every class, keyed by composite key.
    pub fn extract(&mut self, window: Interval) -> BTreeMap<InstanceKey, Instance> {
        let mut out = BTreeMap::new();
        let names = self.names.clone();
        for name in names {
            let class = self.classes.get_mut(&name).expect("known name");
            for inst in class.extract(window) {
                out.insert(inst.key(&name), inst.clone());
            }
        }
        out
    }

    /// As [`Self::extract`], but only instances `window` fully contains.
    pub fn extract_fully_contained(&mut self, window: Interval) -> BTreeMap<InstanceKey, Instance> {
        let mut out = BTreeMap::new();
        let names = self.names.clone();
        for name in names {
            let class = self.classes.get_mut(&name).expect("known name");
            for inst in class.extract_fully_contained(window) {
                out.insert(inst.key(&name), inst.clone());
            }
        }
        out
    }

    /// Drop all instances of `name`, keeping the (now empty) class.
    pub fn clear_class(&mut self, name: &str) {
        if let Some(c) = self.classes.get_mut(name) {
            *c = AnnotationClass::new(name);
        }
    }

    /// Drop every class.
    pub fn clear(&mut self) {
        self.names.clear();
        self.classes.clear();
    }

    /// Drop classes with no instances.
    pub fn clean(&mut self) {
        self.names.retain(|n| {
            self.classes
                .get(n)
                .map(|c| !c.is_empty())
                .unwrap_or(false)
        });
        self.classes.retain(|_, c| !c.is_empty());
    }

    /// Register a canonical<-original alias.
    ///
    /// # Errors
    /// Rejects an alias that is itself a canonical name, a duplicate
    /// mapping from two distinct originals onto the same canonical (when
    /// both exist in the input), or a circular chain.
    pub fn add_alias(
        &mut self,
        canonical: &str,
        original: &str,
        present_originals: &[String],
    ) -> Result<(), LunaError> {
        let original_ci = original.to_ascii_lowercase();
        if self.aliasing.contains_key(&original_ci) && self.aliasing[&original_ci] != canonical {
            // original already aliases to a different canonical: a cycle or
            // conflicting remap.
            return Err(LunaError::ConstraintViolation(format!(
                "'{original}' already aliases to a different canonical name"
            )));
        }
        if self.aliasing.values().any(|c| c == original) {
            return Err(LunaError::ConstraintViolation(format!(
                "alias target '{original}' is itself used as a canonical name"
            )));
        }
        // two distinct originals mapping to same canonical, both present
        let dup = self
            .aliasing
            .iter()
            .find(|(orig, canon)| canon.as_str() == canonical && orig.as_str() != &original_ci);
        if let Some((other_orig, _)) = dup {
            if present_originals
                .iter()
                .any(|p| p.eq_ignore_ascii_case(other_orig))
                && present_originals.iter().any(|p| p == original)
            {
                return Err(LunaError::ConstraintViolation(format!(
                    "both '{other_orig}' and '{original}' map to canonical '{canonical}'"
                )));
            }
        }
        self.aliasing.insert(original_ci, canonical.to_string());
        Ok(())
    }

    /// Resolve a label through the alias table (case-insensitive on the
    /// original); returns the label unchanged if no alias applies.
    #[must_use]
    pub fn resolve_alias<'a>(&'a self, label: &'a str) -> &'a str {
        self.aliasing
            .get(&label.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(label)
    }
}

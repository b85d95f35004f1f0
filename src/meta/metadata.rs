use super::{FromValue, MetadataError, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// One immutable mapping on the stack.
struct Layer {
    items: BTreeMap<String, Value>,
    parent: Option<Arc<Layer>>,
}

/// Immutable stack of metadata layers.
///
/// Cloning the handle is a pointer copy. [`with_overrides`](Self::with_overrides)
/// returns a new instance that shares every existing layer and adds one on top.
#[derive(Clone, Default)]
pub struct Metadata {
    top: Option<Arc<Layer>>,
    depth: usize,
}

impl Metadata {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-layer metadata built from `items`. Later duplicates win.
    pub fn new<K, V, I>(items: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::empty().with_overrides(items)
    }

    /// Push a new layer holding `items` onto a copy of this stack.
    ///
    /// `self` is untouched. An empty `items` still pushes a (empty) layer so
    /// that every stage is visible in [`layer_count`](Self::layer_count).
    pub fn with_overrides<K, V, I>(&self, items: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let items: BTreeMap<String, Value> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            top: Some(Arc::new(Layer {
                items,
                parent: self.top.clone(),
            })),
            depth: self.depth + 1,
        }
    }

    /// Number of layers on the stack (not the number of keys).
    pub fn layer_count(&self) -> usize {
        self.depth
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(self.top.as_deref(), |layer| layer.parent.as_deref())
    }

    /// The raw stored value for `key`, most recent layer first.
    fn find_raw(&self, key: &str) -> Option<&Value> {
        self.layers().find_map(|layer| layer.items.get(key))
    }

    fn resolve(&self, key: &str, raw: &Value) -> Value {
        match raw {
            Value::Deferred(d) => d.resolve(key, self),
            other => other.clone(),
        }
    }

    fn check_key(key: &str) -> Result<(), MetadataError> {
        if key.is_empty() {
            return Err(MetadataError::InvalidArgument(
                "metadata key must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Look up `key`, resolving deferred values.
    pub fn get(&self, key: &str) -> Result<Option<Value>, MetadataError> {
        Self::check_key(key)?;
        Ok(self.find_raw(key).map(|raw| self.resolve(key, raw)))
    }

    /// Look up `key`, substituting `default` when it is absent.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value, MetadataError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Look up `key`, failing with [`MetadataError::KeyNotFound`] when absent.
    pub fn require(&self, key: &str) -> Result<Value, MetadataError> {
        self.get(key)?
            .ok_or_else(|| MetadataError::KeyNotFound(key.to_string()))
    }

    /// Look up `key` and convert it to `T`.
    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<Option<T>, MetadataError> {
        self.get(key)?.map(|v| T::from_value(&v)).transpose()
    }

    pub fn get_as_or<T: FromValue>(&self, key: &str, default: T) -> Result<T, MetadataError> {
        Ok(self.get_as(key)?.unwrap_or(default))
    }

    /// String value of `key`, or `None` when absent, empty-keyed or not convertible.
    pub fn string(&self, key: &str) -> Option<String> {
        self.get_as::<String>(key).ok().flatten()
    }

    /// Whether any layer holds `key`. Deferred values are not resolved.
    pub fn contains_key(&self, key: &str) -> bool {
        self.find_raw(key).is_some()
    }

    /// Visible keys: most recent layer first, sorted within a layer,
    /// shadowed duplicates removed.
    pub fn keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for layer in self.layers() {
            for key in layer.items.keys() {
                if seen.insert(key.as_str()) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// Every visible `(key, resolved value)` pair in [`keys`](Self::keys) order.
    pub fn iter(&self) -> Vec<(String, Value)> {
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for layer in self.layers() {
            for (key, raw) in &layer.items {
                if seen.insert(key.as_str()) {
                    pairs.push((key.clone(), self.resolve(key, raw)));
                }
            }
        }
        pairs
    }

    /// Number of distinct visible keys.
    pub fn len(&self) -> usize {
        let mut seen = HashSet::new();
        self.layers()
            .flat_map(|layer| layer.items.keys())
            .filter(|key| seen.insert(key.as_str()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.layers().all(|layer| layer.items.is_empty())
    }

    /// Whether both handles point at the same layer stack.
    pub fn ptr_eq(a: &Metadata, b: &Metadata) -> bool {
        match (&a.top, &b.top) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Visible entries only, unresolved so Debug never runs deferred values.
        let mut seen = HashSet::new();
        let mut map = f.debug_map();
        for layer in self.layers() {
            for (k, v) in &layer.items {
                if seen.insert(k.as_str()) {
                    map.entry(k, v);
                }
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // =========================================================================
    // Lookup and shadowing
    // =========================================================================

    #[test]
    fn most_recent_layer_wins() {
        let base = Metadata::new([("k", 1), ("other", 5)]);
        let top = base.with_overrides([("k", 2)]);
        assert_eq!(top.get("k").unwrap(), Some(Value::Int(2)));
        assert_eq!(top.get("other").unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn with_overrides_leaves_original_untouched() {
        let m = Metadata::new([("k", "v1")]);
        let m2 = m.with_overrides([("k", "v2")]);
        assert_eq!(m2.get("k").unwrap(), Some(Value::from("v2")));
        assert_eq!(m.get("k").unwrap(), Some(Value::from("v1")));
        assert_eq!(m.layer_count(), 1);
        assert_eq!(m2.layer_count(), 2);
    }

    #[test]
    fn siblings_share_parent_layers_but_not_each_other() {
        let base = Metadata::new([("shared", true)]);
        let a = base.with_overrides([("a", 1)]);
        let b = base.with_overrides([("b", 2)]);
        assert!(a.contains_key("shared") && b.contains_key("shared"));
        assert!(!a.contains_key("b"));
        assert!(!b.contains_key("a"));
    }

    #[test]
    fn missing_key_is_none() {
        let m = Metadata::new([("a", 1)]);
        assert_eq!(m.get("b").unwrap(), None);
        assert!(!m.contains_key("b"));
    }

    #[test]
    fn empty_key_is_invalid_argument() {
        let m = Metadata::new([("a", 1)]);
        assert!(matches!(m.get(""), Err(MetadataError::InvalidArgument(_))));
        assert!(matches!(m.require(""), Err(MetadataError::InvalidArgument(_))));
    }

    #[test]
    fn require_missing_key_is_key_not_found() {
        let m = Metadata::empty();
        let err = m.require("Title").unwrap_err();
        assert_eq!(err, MetadataError::KeyNotFound("Title".into()));
        assert!(err.to_string().contains("get_or"));
    }

    #[test]
    fn get_or_substitutes_default() {
        let m = Metadata::empty();
        assert_eq!(m.get_or("x", "fallback").unwrap(), Value::from("fallback"));
    }

    // =========================================================================
    // Typed access
    // =========================================================================

    #[test]
    fn get_as_converts() {
        let m = Metadata::new([("n", Value::from("12"))]);
        assert_eq!(m.get_as::<u32>("n").unwrap(), Some(12));
        assert_eq!(m.get_as::<u32>("missing").unwrap(), None);
        assert_eq!(m.get_as_or::<u32>("missing", 3).unwrap(), 3);
    }

    #[test]
    fn get_as_reports_conversion_error() {
        let m = Metadata::new([("n", "twelve")]);
        assert!(matches!(
            m.get_as::<u32>("n"),
            Err(MetadataError::Conversion { .. })
        ));
        assert_eq!(m.string("n").as_deref(), Some("twelve"));
    }

    // =========================================================================
    // Deferred values
    // =========================================================================

    #[test]
    fn deferred_value_recomputed_on_every_read() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let m = Metadata::new([(
            "count",
            Value::deferred(move |_, _| Value::from(c.fetch_add(1, Ordering::SeqCst) + 1)),
        )]);

        assert_eq!(m.get("count").unwrap(), Some(Value::Int(1)));
        assert_eq!(m.get("count").unwrap(), Some(Value::Int(2)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn contains_key_does_not_resolve_deferred() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let m = Metadata::new([(
            "lazy",
            Value::deferred(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                Value::Null
            }),
        )]);
        assert!(m.contains_key("lazy"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deferred_sees_the_reading_metadata() {
        let base = Metadata::new([
            ("name", Value::from("base")),
            (
                "greeting",
                Value::deferred(|_, meta| {
                    Value::from(format!("hello {}", meta.string("name").unwrap_or_default()))
                }),
            ),
        ]);
        let child = base.with_overrides([("name", "child")]);
        assert_eq!(base.string("greeting").unwrap(), "hello base");
        assert_eq!(child.string("greeting").unwrap(), "hello child");
    }

    #[test]
    fn deferred_receives_its_key() {
        let m = Metadata::new([("Echo", Value::deferred(|key, _| Value::from(key)))]);
        assert_eq!(m.string("Echo").as_deref(), Some("Echo"));
    }

    // =========================================================================
    // Enumeration and count
    // =========================================================================

    #[test]
    fn count_deduplicates_shadowed_keys() {
        let m = Metadata::new([("a", 1), ("b", 2)]).with_overrides([("a", 3), ("c", 4)]);
        assert_eq!(m.len(), 3);
        assert_eq!(m.layer_count(), 2);
    }

    #[test]
    fn enumeration_is_most_recent_layer_first() {
        let m = Metadata::new([("a", 1), ("b", 2)]).with_overrides([("c", 3), ("a", 9)]);
        let pairs = m.iter();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), Value::Int(9)),
                ("c".to_string(), Value::Int(3)),
                ("b".to_string(), Value::Int(2)),
            ]
        );
        assert_eq!(m.keys(), vec!["a", "c", "b"]);
    }

    #[test]
    fn enumeration_resolves_deferred() {
        let m = Metadata::new([("x", Value::deferred(|_, _| Value::Int(10)))]);
        assert_eq!(m.iter(), vec![("x".to_string(), Value::Int(10))]);
    }

    #[test]
    fn debug_shows_each_key_once() {
        let m = Metadata::new([("k", 1), ("other", 1)]).with_overrides([("k", 2)]);
        assert_eq!(format!("{m:?}"), r#"{"k": Int(2), "other": Int(1)}"#);
    }

    #[test]
    fn empty_layers_are_empty() {
        let m = Metadata::empty().with_overrides(Vec::<(String, Value)>::new());
        assert!(m.is_empty());
        assert_eq!(m.len(), 0);
        assert_eq!(m.layer_count(), 1);
    }

    #[test]
    fn cloned_handle_shares_stack() {
        let m = Metadata::new([("a", 1)]);
        let same = m.clone();
        let pushed = m.with_overrides([("b", 2)]);
        assert!(Metadata::ptr_eq(&m, &same));
        assert!(!Metadata::ptr_eq(&m, &pushed));
    }
}

//! Deterministic cache-key derivation.
//!
//! Arguments are rendered through [`serde_json::Value`], which plays the
//! role of the "renderable value" sum type: one variant per primitive plus
//! ordered and keyed composites. Scalars render in their canonical textual
//! form; composites render as compact JSON with mapping keys in sorted
//! order, so semantically equal composites always produce identical keys.
//!
//! The characters `%`, `:`, `=` and `@` are percent-escaped inside every
//! rendering, so the key grammar
//! `<prefix><proc-id>[:<name>=<value>]*@g<v>[@u<uid>:<v>]` can never
//! collide between a parameterized and a non-parameterized form.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// Caller-supplied key function: replaces the argument portion of the key
/// entirely.
pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// A derived key before version counters are inlined, plus the user id
/// extracted from the arguments (when configured).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: String,
    pub user_id: Option<String>,
}

/// Derives a stable string key from a procedure identity and its call
/// arguments.
///
/// Tie-breaks follow the wrapper contract: a caller key function wins over
/// a selector list; with neither, every argument participates. A selector
/// list that matches no argument falls back to rendering all of them.
pub struct KeyBuilder<A> {
    proc_id: String,
    key_fn: Option<KeyFn<A>>,
    key_params: Option<Vec<String>>,
    user_id_param: Option<String>,
    _marker: PhantomData<fn(&A)>,
}

impl<A> KeyBuilder<A> {
    pub fn new(proc_id: impl Into<String>) -> Self {
        Self {
            proc_id: proc_id.into(),
            key_fn: None,
            key_params: None,
            user_id_param: None,
            _marker: PhantomData,
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn<A>) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    pub fn with_key_params(mut self, params: Vec<String>) -> Self {
        self.key_params = Some(params);
        self
    }

    pub fn with_user_id_param(mut self, param: impl Into<String>) -> Self {
        self.user_id_param = Some(param.into());
        self
    }

    pub fn proc_id(&self) -> &str {
        &self.proc_id
    }
}

impl<A: Serialize> KeyBuilder<A> {
    /// Renders the arguments into a key fragment and extracts the user id.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::KeyDerivation`] when an argument cannot be
    /// rendered; the invocation wrapper then bypasses the cache for that
    /// call.
    pub fn derive(&self, args: &A) -> CacheResult<DerivedKey> {
        let rendered = serde_json::to_value(args)
            .map_err(|e| CacheError::KeyDerivation(e.to_string()))?;

        let user_id = match (&self.user_id_param, &rendered) {
            (Some(param), Value::Object(map)) => map.get(param).map(render_user_id),
            _ => None,
        };

        if let Some(key_fn) = &self.key_fn {
            return Ok(DerivedKey {
                key: key_fn(args),
                user_id,
            });
        }

        let mut key = escape(&self.proc_id);
        match &rendered {
            Value::Object(map) => {
                let selected: Vec<(&String, &Value)> = match &self.key_params {
                    Some(params) => {
                        let picked: Vec<_> = params
                            .iter()
                            .filter_map(|p| map.get(p).map(|value| (p, value)))
                            .collect();
                        if picked.is_empty() {
                            map.iter().collect()
                        } else {
                            picked
                        }
                    }
                    None => map.iter().collect(),
                };
                for (name, value) in selected {
                    key.push(':');
                    key.push_str(&escape(name));
                    key.push('=');
                    key.push_str(&render(value)?);
                }
            }
            Value::Array(items) => {
                for (index, value) in items.iter().enumerate() {
                    key.push_str(&format!(":{}={}", index, render(value)?));
                }
            }
            Value::Null => {}
            scalar => {
                key.push_str(&format!(":0={}", render(scalar)?));
            }
        }

        Ok(DerivedKey { key, user_id })
    }
}

/// Renders one argument value into its key fragment.
fn render(value: &Value) -> CacheResult<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(escape(s)),
        composite => {
            let json = serde_json::to_string(composite)
                .map_err(|e| CacheError::KeyDerivation(e.to_string()))?;
            Ok(escape(&json))
        }
    }
}

fn render_user_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-escapes the key grammar's separator characters.
pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            '@' => out.push_str("%40"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize, Clone)]
    struct Args {
        user_id: u64,
        region: String,
    }

    #[test]
    fn test_named_args_render_as_name_value_pairs() {
        let builder: KeyBuilder<Args> = KeyBuilder::new("app.get_user");
        let derived = builder
            .derive(&Args {
                user_id: 42,
                region: "eu".to_string(),
            })
            .unwrap();
        assert_eq!(derived.key, "app.get_user:region=eu:user_id=42");
        assert_eq!(derived.user_id, None);
    }

    #[test]
    fn test_positional_args_render_by_index() {
        let builder: KeyBuilder<(u32, &str)> = KeyBuilder::new("sum");
        let derived = builder.derive(&(7, "abc")).unwrap();
        assert_eq!(derived.key, "sum:0=7:1=abc");
    }

    #[test]
    fn test_single_scalar_arg() {
        let builder: KeyBuilder<u32> = KeyBuilder::new("square");
        assert_eq!(builder.derive(&5).unwrap().key, "square:0=5");
    }

    #[test]
    fn test_unit_args() {
        let builder: KeyBuilder<()> = KeyBuilder::new("constant");
        assert_eq!(builder.derive(&()).unwrap().key, "constant");
    }

    #[test]
    fn test_selector_list_restricts_participation() {
        let builder: KeyBuilder<Args> =
            KeyBuilder::new("app.get_user").with_key_params(vec!["user_id".to_string()]);
        let derived = builder
            .derive(&Args {
                user_id: 42,
                region: "eu".to_string(),
            })
            .unwrap();
        assert_eq!(derived.key, "app.get_user:user_id=42");
    }

    #[test]
    fn test_selector_miss_falls_back_to_all_args() {
        let builder: KeyBuilder<Args> =
            KeyBuilder::new("app.get_user").with_key_params(vec!["missing".to_string()]);
        let derived = builder
            .derive(&Args {
                user_id: 1,
                region: "us".to_string(),
            })
            .unwrap();
        assert_eq!(derived.key, "app.get_user:region=us:user_id=1");
    }

    #[test]
    fn test_key_fn_wins_over_selector() {
        let builder: KeyBuilder<Args> = KeyBuilder::new("app.get_user")
            .with_key_params(vec!["region".to_string()])
            .with_key_fn(Arc::new(|args: &Args| format!("custom:{}", args.user_id)));
        let derived = builder
            .derive(&Args {
                user_id: 9,
                region: "eu".to_string(),
            })
            .unwrap();
        assert_eq!(derived.key, "custom:9");
    }

    #[test]
    fn test_user_id_extraction() {
        let builder: KeyBuilder<Args> =
            KeyBuilder::new("app.get_user").with_user_id_param("user_id");
        let derived = builder
            .derive(&Args {
                user_id: 42,
                region: "eu".to_string(),
            })
            .unwrap();
        assert_eq!(derived.user_id, Some("42".to_string()));
    }

    #[test]
    fn test_composite_args_render_deterministically() {
        // Two maps built in different insertion orders render identically.
        let mut first = BTreeMap::new();
        first.insert("b", 2);
        first.insert("a", 1);
        let mut second = BTreeMap::new();
        second.insert("a", 1);
        second.insert("b", 2);

        let builder: KeyBuilder<(BTreeMap<&str, i32>,)> = KeyBuilder::new("walk");
        let left = builder.derive(&(first,)).unwrap();
        let right = builder.derive(&(second,)).unwrap();
        assert_eq!(left.key, right.key);
        assert!(left.key.contains("%3A")); // JSON colons are escaped
    }

    #[test]
    fn test_separator_characters_are_escaped() {
        let builder: KeyBuilder<(String,)> = KeyBuilder::new("echo");
        let derived = builder.derive(&("a:b=c@d%e".to_string(),)).unwrap();
        assert_eq!(derived.key, "echo:0=a%3Ab%3Dc%40d%25e");
    }

    #[test]
    fn test_equal_strings_never_collide_with_structure() {
        // A string that looks like a rendered pair must not produce the key
        // of an actual pair.
        let trick: KeyBuilder<(String,)> = KeyBuilder::new("f");
        let plain: KeyBuilder<(u32, u32)> = KeyBuilder::new("f");
        let tricked = trick.derive(&("0=1:1=2".to_string(),)).unwrap();
        let legit = plain.derive(&(1, 2)).unwrap();
        assert_ne!(tricked.key, legit.key);
    }
}

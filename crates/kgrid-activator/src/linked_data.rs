//! Linked-data expansion of service-graph implementation nodes.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use url::Url;

use crate::error::{ActivatorError, ActivatorResult};

/// Expands a linked-data node against a context.
///
/// The activator only reads the expanded node's `@id` and `@type`, so an
/// implementation may cover a subset of JSON-LD expansion. It must reject a
/// context it cannot interpret rather than expand it partially.
///
/// [`IriExpander`] supports:
///
/// - `@base`, resolving relative `@id`s
/// - `@vocab`, applied to `@type` values and property names
/// - terms whose definition is an IRI string or an object with `@id`
/// - compact IRIs `prefix:suffix` whose prefix is a term
///
/// In term definitions, `@type`, `@container` and `@prefix` are accepted and
/// ignored, as are `@version`, `@language`, `@direction` and `@protected` at
/// the top level. Any other keyword (`@import`, `@propagate`, `@reverse`,
/// scoped `@context`, `@nest`, ...) and unresolved context references are
/// errors.
pub trait LinkedDataExpander: Send + Sync {
    /// Expand `document` under `context`, returning the expanded node list.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::ContextResolution`] if the context is
    /// unusable or uses features the expander does not support.
    fn expand(&self, document: &Value, context: &Value) -> ActivatorResult<Vec<Value>>;
}

/// Built-in expander for `@base`, `@vocab`, terms, and compact IRIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IriExpander;

impl LinkedDataExpander for IriExpander {
    fn expand(&self, document: &Value, context: &Value) -> ActivatorResult<Vec<Value>> {
        let mut active = ActiveContext::default();
        active.merge(context)?;
        if let Some(embedded) = document.get("@context") {
            active.merge(embedded)?;
        }

        match document {
            Value::Object(node) => Ok(vec![active.expand_node(node)]),
            Value::Array(nodes) => Ok(nodes
                .iter()
                .filter_map(Value::as_object)
                .map(|node| active.expand_node(node))
                .collect()),
            _ => Err(ActivatorError::ContextResolution {
                context: context.to_string(),
                message: "only objects and arrays of objects can be expanded".into(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct ActiveContext {
    base: Option<Url>,
    vocab: Option<String>,
    terms: HashMap<String, String>,
}

/// Top-level context keywords that do not affect `@id` or `@type`.
const IGNORED_CONTEXT_KEYWORDS: &[&str] = &["@version", "@language", "@direction", "@protected"];

/// Term-definition keywords that do not affect `@id` or `@type`.
const IGNORED_TERM_KEYWORDS: &[&str] = &["@id", "@type", "@container", "@prefix", "@protected"];

fn unsupported(context: &str, message: String) -> ActivatorError {
    ActivatorError::ContextResolution {
        context: context.to_owned(),
        message,
    }
}

impl ActiveContext {
    fn merge(&mut self, context: &Value) -> ActivatorResult<()> {
        match context {
            Value::Null => Ok(()),
            Value::Array(items) => items.iter().try_for_each(|item| self.merge(item)),
            Value::Object(map) => {
                if let Some(keyword) = map.keys().find(|k| {
                    k.starts_with('@')
                        && *k != "@base"
                        && *k != "@vocab"
                        && !IGNORED_CONTEXT_KEYWORDS.contains(&k.as_str())
                }) {
                    return Err(unsupported(
                        keyword,
                        format!("context keyword {keyword} is not supported"),
                    ));
                }
                if let Some(base) = map.get("@base").and_then(Value::as_str) {
                    let parsed = match &self.base {
                        Some(current) => current.join(base),
                        None => Url::parse(base),
                    };
                    self.base = Some(parsed.map_err(|e| ActivatorError::ContextResolution {
                        context: base.to_owned(),
                        message: format!("invalid @base: {e}"),
                    })?);
                }
                if let Some(vocab) = map.get("@vocab").and_then(Value::as_str) {
                    self.vocab = Some(vocab.to_owned());
                }
                for (term, definition) in map {
                    if term.starts_with('@') {
                        continue;
                    }
                    let iri = match definition {
                        Value::String(s) => Some(s.as_str()),
                        Value::Object(def) => {
                            if let Some(keyword) =
                                def.keys().find(|k| !IGNORED_TERM_KEYWORDS.contains(&k.as_str()))
                            {
                                return Err(unsupported(
                                    term,
                                    format!("{keyword} in the definition of {term} is not supported"),
                                ));
                            }
                            def.get("@id").and_then(Value::as_str)
                        },
                        _ => None,
                    };
                    if let Some(iri) = iri {
                        let expanded = self.expand_compact(iri).unwrap_or_else(|| iri.to_owned());
                        self.terms.insert(term.clone(), expanded);
                    }
                }
                Ok(())
            },
            Value::String(reference) => Err(unsupported(
                reference,
                "context references must be resolved before expansion".into(),
            )),
            other => Err(ActivatorError::ContextResolution {
                context: other.to_string(),
                message: "context must be an object, array, or reference".into(),
            }),
        }
    }

    /// `prefix:suffix` with a known prefix, or an absolute IRI.
    fn expand_compact(&self, value: &str) -> Option<String> {
        let (prefix, suffix) = value.split_once(':')?;
        if suffix.starts_with("//") {
            return Some(value.to_owned());
        }
        match self.terms.get(prefix) {
            Some(iri) => Some(format!("{iri}{suffix}")),
            None => Some(value.to_owned()),
        }
    }

    fn expand_vocab(&self, value: &str) -> Option<String> {
        if value.starts_with('@') {
            return Some(value.to_owned());
        }
        if let Some(iri) = self.terms.get(value) {
            return Some(iri.clone());
        }
        if let Some(expanded) = self.expand_compact(value) {
            return Some(expanded);
        }
        self.vocab.as_ref().map(|vocab| format!("{vocab}{value}"))
    }

    fn expand_id(&self, value: &str) -> String {
        if let Some((prefix, _)) = value.split_once(':')
            && (self.terms.contains_key(prefix) || Url::parse(value).is_ok())
        {
            return self.expand_compact(value).unwrap_or_else(|| value.to_owned());
        }
        match &self.base {
            Some(base) => base
                .join(value)
                .map_or_else(|_| value.to_owned(), |u| u.to_string()),
            None => value.to_owned(),
        }
    }

    fn expand_node(&self, node: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        for (key, value) in node {
            match key.as_str() {
                "@context" => {},
                "@id" => {
                    if let Some(id) = value.as_str() {
                        out.insert("@id".into(), Value::String(self.expand_id(id)));
                    }
                },
                "@type" => {
                    let types: Vec<Value> = one_or_many(value)
                        .filter_map(Value::as_str)
                        .map(|t| Value::String(self.expand_vocab(t).unwrap_or_else(|| t.to_owned())))
                        .collect();
                    out.insert("@type".into(), Value::Array(types));
                },
                property => {
                    // Properties that do not expand to an IRI are dropped.
                    let Some(iri) = self.expand_vocab(property) else {
                        continue;
                    };
                    if !iri.contains(':') {
                        continue;
                    }
                    let values: Vec<Value> =
                        one_or_many(value).map(|v| self.expand_value(v)).collect();
                    out.insert(iri, Value::Array(values));
                },
            }
        }
        Value::Object(out)
    }

    fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(node) => self.expand_node(node),
            other => json!({ "@value": other }),
        }
    }
}

fn one_or_many(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        single => Box::new(std::iter::once(single)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn relative_id_resolves_against_base() {
        let context = json!({"@base": "file:///cache/ko2/"});
        let doc = json!({"@id": "js/simple", "@type": ["javascript"]});
        let expanded = IriExpander.expand(&doc, &context).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0]["@id"], "file:///cache/ko2/js/simple");
    }

    #[test]
    fn compact_iris_and_vocab() {
        let context = json!({
            "@vocab": "https://kgrid.org/koio#",
            "koio": "https://kgrid.org/koio#",
            "kgrid": "https://kgrid.org/specs/",
            "ActivationSpec": "kgrid:activationSpec.html#object",
        });
        let doc = json!({
            "@id": "koio:impl",
            "@type": ["ActivationSpec", "javascript"],
            "dependsOn": "x",
        });
        let node = &IriExpander.expand(&doc, &context).unwrap()[0];
        assert_eq!(node["@id"], "https://kgrid.org/koio#impl");
        assert_eq!(
            node["@type"],
            json!([
                "https://kgrid.org/specs/activationSpec.html#object",
                "https://kgrid.org/koio#javascript"
            ])
        );
        assert_eq!(node["https://kgrid.org/koio#dependsOn"], json!([{"@value": "x"}]));
    }

    #[test]
    fn absolute_ids_are_untouched() {
        let context = json!({"@base": "file:///cache/ko/"});
        let doc = json!({"@id": "https://example.org/impl"});
        let node = &IriExpander.expand(&doc, &context).unwrap()[0];
        assert_eq!(node["@id"], "https://example.org/impl");
    }

    #[test]
    fn unmapped_properties_are_dropped() {
        let node = &IriExpander
            .expand(&json!({"@id": "a", "title": "x"}), &json!({}))
            .unwrap()[0];
        assert!(node.get("title").is_none());
        assert_eq!(node["@id"], "a");
    }

    #[test]
    fn ignorable_keywords_are_accepted() {
        let context = json!({
            "@version": 1.1,
            "@language": "en",
            "koio": "https://kgrid.org/koio#",
            "hasService": {"@id": "koio:hasService", "@type": "@id", "@container": "@set"},
        });
        let node = &IriExpander
            .expand(&json!({"@id": "koio:x", "hasService": "s"}), &context)
            .unwrap()[0];
        assert_eq!(node["@id"], "https://kgrid.org/koio#x");
        assert!(node.get("https://kgrid.org/koio#hasService").is_some());
    }

    #[test]
    fn unsupported_features_fail_loudly() {
        let doc = json!({"@id": "a"});
        for context in [
            json!({"@import": "https://example.org/ctx.jsonld"}),
            json!({"@propagate": false}),
            json!({"parent": {"@reverse": "https://example.org/child"}}),
            json!({"impl": {"@id": "https://example.org/impl", "@context": {}}}),
            json!("https://example.org/unresolved.jsonld"),
        ] {
            let err = IriExpander.expand(&doc, &context).unwrap_err();
            assert!(
                matches!(err, ActivatorError::ContextResolution { .. }),
                "{context}: {err}"
            );
        }
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(IriExpander.expand(&json!("nope"), &json!({})).is_err());
    }
}

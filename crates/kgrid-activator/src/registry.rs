//! The endpoint registry and the activation result shared with request
//! handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::deployment::RouteSpec;
use crate::error::{ActivatorError, ActivatorResult, RequestError};
use crate::loader::KoFunction;
use crate::record::KoRecord;

/// A route bound to its callable.
#[derive(Clone)]
pub struct RouteBinding {
    /// The route.
    pub spec: RouteSpec,
    callable: Arc<dyn KoFunction>,
}

impl std::fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBinding")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Accumulates bindings during activation.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    bindings: Vec<RouteBinding>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `spec` to `callable`.
    ///
    /// An existing binding of the same KO with the same id is replaced in
    /// place; returns whether that happened.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::EndpointConflict`] if the id is bound by a
    /// different KO. The existing binding is kept.
    pub fn insert(&mut self, spec: RouteSpec, callable: Arc<dyn KoFunction>) -> ActivatorResult<bool> {
        if let Some(&slot) = self.index.get(&spec.id)
            && let Some(existing) = self.bindings.get_mut(slot)
        {
            if existing.spec.ko != spec.ko {
                return Err(ActivatorError::EndpointConflict {
                    endpoint: spec.id,
                    owner: existing.spec.ko.clone(),
                });
            }
            *existing = RouteBinding { spec, callable };
            return Ok(true);
        }
        self.index.insert(spec.id.clone(), self.bindings.len());
        self.bindings.push(RouteBinding { spec, callable });
        Ok(false)
    }

    /// The KO owning endpoint `id`, if bound.
    #[must_use]
    pub fn owner(&self, id: &str) -> Option<&str> {
        self.index
            .get(id)
            .and_then(|&slot| self.bindings.get(slot))
            .map(|b| b.spec.ko.as_str())
    }

    /// Whether an endpoint id is bound.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of bound endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Freeze the registry together with the final KO records.
    #[must_use]
    pub fn build(self, kos: Vec<KoRecord>) -> ActivationContext {
        ActivationContext {
            inner: Arc::new(Inner {
                kos,
                bindings: self.bindings,
                index: self.index,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    kos: Vec<KoRecord>,
    bindings: Vec<RouteBinding>,
    index: HashMap<String, usize>,
}

/// Everything activation produced: the KO records with their final status
/// and the bound endpoints. Immutable and cheap to clone.
#[derive(Debug, Clone)]
pub struct ActivationContext {
    inner: Arc<Inner>,
}

/// An endpoint as listed by [`ActivationContext::list_endpoints`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointView<'a> {
    /// Endpoint id.
    #[serde(skip)]
    pub id: &'a str,
    /// The route, serialized in place (it carries `@id`).
    #[serde(flatten)]
    pub spec: &'a RouteSpec,
}

/// Information returned alongside an invocation result.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationInfo {
    /// The endpoint that ran.
    pub endpoint: RouteSpec,
    /// The request body.
    pub inputs: Value,
}

/// The outcome of a successful invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    /// The function's return value.
    pub result: Value,
    /// Request echo.
    pub info: InvocationInfo,
}

impl ActivationContext {
    /// A context with no KOs and no endpoints.
    #[must_use]
    pub fn empty() -> Self {
        RegistryBuilder::new().build(Vec::new())
    }

    /// All KO records in manifest order.
    #[must_use]
    pub fn list_kos(&self) -> &[KoRecord] {
        &self.inner.kos
    }

    /// Look up one KO.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::KoNotFound`] for unknown ids.
    pub fn get_ko(&self, id: &str) -> Result<&KoRecord, RequestError> {
        self.inner
            .kos
            .iter()
            .find(|r| r.id.as_str() == id)
            .ok_or_else(|| RequestError::KoNotFound(id.to_owned()))
    }

    /// Bound endpoints in binding order.
    #[must_use]
    pub fn list_endpoints(&self) -> Vec<EndpointView<'_>> {
        self.inner
            .bindings
            .iter()
            .map(|b| EndpointView {
                id: &b.spec.id,
                spec: &b.spec,
            })
            .collect()
    }

    /// Look up one endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::EndpointNotFound`] for unknown ids.
    pub fn get_endpoint(&self, id: &str) -> Result<&RouteSpec, RequestError> {
        self.binding(id).map(|b| &b.spec)
    }

    /// Run the endpoint `id` on `input`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::EndpointNotFound`] for unknown ids and
    /// [`RequestError::InvalidInputParameter`] with the function's message
    /// when it fails.
    pub async fn invoke(&self, id: &str, input: Value) -> Result<Invocation, RequestError> {
        let binding = self.binding(id)?;
        let result = binding
            .callable
            .call(&input)
            .await
            .map_err(RequestError::InvalidInputParameter)?;
        Ok(Invocation {
            result,
            info: InvocationInfo {
                endpoint: binding.spec.clone(),
                inputs: input,
            },
        })
    }

    /// Number of bound endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.inner.bindings.len()
    }

    fn binding(&self, id: &str) -> Result<&RouteBinding, RequestError> {
        self.inner
            .index
            .get(id)
            .and_then(|&slot| self.inner.bindings.get(slot))
            .ok_or_else(|| RequestError::EndpointNotFound(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::deployment::EngineSpec;
    use crate::record::KoId;

    fn route(ko: &str, path: &str, function: &str) -> RouteSpec {
        RouteSpec {
            id: format!("{ko}{path}"),
            ko: ko.into(),
            method: "post".into(),
            engine: EngineSpec {
                name: "org.kgrid.javascript-activator".into(),
                artifact: "src/index.js".into(),
                function: function.into(),
            },
        }
    }

    fn spec(id: &str, function: &str) -> RouteSpec {
        let path = id.strip_prefix("ko1").unwrap_or(id);
        route("ko1", path, function)
    }

    fn echo() -> Arc<dyn KoFunction> {
        Arc::new(|input: &Value| -> Result<Value, String> { Ok(input.clone()) })
    }

    #[test]
    fn bindings_keep_order_and_replace_in_place() {
        let mut builder = RegistryBuilder::new();
        assert!(!builder.insert(spec("ko1/a", "a"), echo()).unwrap());
        assert!(!builder.insert(spec("ko1/b", "b"), echo()).unwrap());
        assert!(builder.insert(spec("ko1/a", "a2"), echo()).unwrap());

        let ctx = builder.build(Vec::new());
        let ids: Vec<_> = ctx.list_endpoints().iter().map(|e| e.id).collect();
        assert_eq!(ids, ["ko1/a", "ko1/b"]);
        assert_eq!(ctx.get_endpoint("ko1/a").unwrap().engine.function, "a2");
    }

    #[test]
    fn other_ko_cannot_take_over_an_endpoint() {
        let mut builder = RegistryBuilder::new();
        builder.insert(route("ko1", "/run", "first"), echo()).unwrap();

        // "ko" + "1/run" collides with "ko1" + "/run".
        let err = builder
            .insert(route("ko", "1/run", "second"), echo())
            .unwrap_err();
        assert!(matches!(
            err,
            ActivatorError::EndpointConflict { ref endpoint, ref owner }
                if endpoint == "ko1/run" && owner == "ko1"
        ));
        assert_eq!(builder.owner("ko1/run"), Some("ko1"));
        assert_eq!(builder.len(), 1);

        let ctx = builder.build(Vec::new());
        assert_eq!(ctx.get_endpoint("ko1/run").unwrap().engine.function, "first");
    }

    #[tokio::test]
    async fn invoke_wraps_result() {
        let mut builder = RegistryBuilder::new();
        builder.insert(spec("ko1/run", "run"), echo()).unwrap();
        let ctx = builder.build(Vec::new());

        let out = ctx.invoke("ko1/run", json!({"x": 1})).await.unwrap();
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["result"], json!({"x": 1}));
        assert_eq!(v["info"]["inputs"], json!({"x": 1}));
        assert_eq!(v["info"]["endpoint"]["@id"], "ko1/run");
    }

    #[tokio::test]
    async fn invoke_errors() {
        let mut builder = RegistryBuilder::new();
        builder
            .insert(
                spec("ko1/fail", "fail"),
                Arc::new(|_: &Value| -> Result<Value, String> {
                    Err("name is required".to_string())
                }),
            )
            .unwrap();
        let ctx = builder.build(Vec::new());

        assert_eq!(
            ctx.invoke("ko1/missing", json!({})).await.unwrap_err(),
            RequestError::EndpointNotFound("ko1/missing".into())
        );
        assert_eq!(
            ctx.invoke("ko1/fail", json!({})).await.unwrap_err(),
            RequestError::InvalidInputParameter("name is required".into())
        );
    }

    #[test]
    fn ko_lookup() {
        let ctx = RegistryBuilder::new().build(vec![KoRecord::new(
            KoId::new("ko1").unwrap(),
            "ko1.zip",
        )]);
        assert_eq!(ctx.list_kos().len(), 1);
        assert!(ctx.get_ko("ko1").is_ok());
        assert_eq!(
            ctx.get_ko("ko2").unwrap_err(),
            RequestError::KoNotFound("ko2".into())
        );
    }

    #[test]
    fn endpoint_view_serializes_as_route() {
        let mut builder = RegistryBuilder::new();
        builder.insert(spec("ko1/run", "run"), echo()).unwrap();
        let ctx = builder.build(Vec::new());
        let v = serde_json::to_value(ctx.list_endpoints()).unwrap();
        assert_eq!(v[0]["@id"], "ko1/run");
        assert_eq!(v[0]["engine"]["function"], "run");
    }

    #[test]
    fn empty_context() {
        let ctx = ActivationContext::empty();
        assert!(ctx.list_kos().is_empty());
        assert_eq!(ctx.endpoint_count(), 0);
    }
}

//! Introspection API served on the explore port.
//!
//! Responses are JSON. Errors use the `{"success": false, "error": {...}}`
//! envelope rather than the plain-text bodies of the application port.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relish_core::{CollectionKind, TypeRegistry};
use relish_runtime::ThreadInfo;
use serde::{Deserialize, Serialize};

use crate::error::WebError;
use crate::state::AppState;

/// Machine-readable error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// A [`WebError`] rendered as a JSON envelope.
#[derive(Debug)]
pub struct ExploreError(pub WebError);

impl From<WebError> for ExploreError {
    fn from(e: WebError) -> Self {
        ExploreError(e)
    }
}

impl From<relish_runtime::RuntimeError> for ExploreError {
    fn from(e: relish_runtime::RuntimeError) -> Self {
        ExploreError(WebError::Runtime(e))
    }
}

impl IntoResponse for ExploreError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let code = match status {
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::BAD_REQUEST => "BAD_REQUEST",
            StatusCode::FORBIDDEN => "FORBIDDEN",
            _ => "INTERNAL_ERROR",
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "explore request failed");
        }
        let body = serde_json::json!({
            "success": false,
            "error": ErrorDetail { code: code.to_string(), message: self.0.to_string() },
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct AttributeView {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionKind>,
}

#[derive(Debug, Serialize)]
pub struct TypeView {
    pub id: u32,
    pub name: String,
    pub supertypes: Vec<String>,
    pub attributes: Vec<AttributeView>,
    pub primitive: bool,
    pub collection: bool,
}

#[derive(Debug, Serialize)]
pub struct ParamView {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Serialize)]
pub struct MethodView {
    pub package: String,
    pub name: String,
    pub params: Vec<ParamView>,
    pub returns: Vec<String>,
    pub variadic: bool,
}

#[derive(Debug, Serialize)]
pub struct NameView {
    pub name: String,
    pub dbid: i64,
}

#[derive(Debug, Deserialize)]
pub struct NamesQuery {
    #[serde(default)]
    pub prefix: String,
}

fn type_names(types: &TypeRegistry, ids: impl IntoIterator<Item = relish_core::TypeId>) -> Vec<String> {
    ids.into_iter().map(|id| types.name(id).to_string()).collect()
}

/// `GET /types`
pub async fn list_types(State(state): State<AppState>) -> Json<Vec<TypeView>> {
    let types = state.runtime.types();
    let views = types
        .iter()
        .map(|def| TypeView {
            id: def.id.0,
            name: def.name.clone(),
            supertypes: type_names(&types, def.supertypes.iter().copied()),
            attributes: def
                .attributes
                .iter()
                .map(|a| AttributeView {
                    name: a.name.clone(),
                    type_name: types.name(a.type_id).to_string(),
                    collection: a.collection,
                })
                .collect(),
            primitive: def.flags.is_primitive,
            collection: def.flags.is_collection,
        })
        .collect();
    Json(views)
}

/// `GET /methods`
pub async fn list_methods(State(state): State<AppState>) -> Json<Vec<MethodView>> {
    let types = state.runtime.types();
    let views = state
        .runtime
        .methods()
        .methods()
        .map(|m| MethodView {
            package: m.package.clone(),
            name: m.name.clone(),
            params: m
                .params
                .iter()
                .map(|p| ParamView {
                    name: p.name.clone(),
                    type_name: types.name(p.type_id).to_string(),
                })
                .collect(),
            returns: type_names(&types, m.returns.iter().copied()),
            variadic: m.variadic,
        })
        .collect();
    Json(views)
}

/// `GET /names?prefix=`
pub async fn list_names(
    State(state): State<AppState>,
    Query(query): Query<NamesQuery>,
) -> Result<Json<Vec<NameView>>, ExploreError> {
    let runtime = state.runtime.clone();
    let names = tokio::task::spawn_blocking(move || {
        let thread = runtime.new_thread("", "explore names");
        runtime.persistence().list_names(thread.session(), &query.prefix)
    })
    .await
    .map_err(|e| WebError::Directive(format!("names lookup task failed: {e}")))??;
    Ok(Json(
        names
            .into_iter()
            .map(|(name, dbid)| NameView { name, dbid: dbid.0 })
            .collect(),
    ))
}

/// `GET /threads`
pub async fn list_threads(State(state): State<AppState>) -> Json<Vec<ThreadInfo>> {
    Json(state.runtime.threads())
}

//! REST API exposure
//!
//! Mounts one set of routes per interface of an [`Api`]:
//!
//! - `GET /{plural}` list, `POST /{plural}` create
//! - `GET /{plural}/{id}`, `PATCH` (update), `PUT` (replace), `DELETE`
//! - `GET /{plural}/{id}/{link}` link traversal
//!
//! Query parameters map onto [`RawOptions`]: `embed` and `fields` are comma
//! lists, `sort` a comma list of signed keys, `filter` a JSON object, plus
//! `limit`, `offset`, `count` and `show_hidden`. Errors are rendered by
//! [`CellarError`]'s `IntoResponse`.

use crate::core::context::Context;
use crate::core::entity::Item;
use crate::core::error::{CellarError, Result};
use crate::core::options::RawOptions;
use crate::core::query::{Filter, SortKey};
use crate::interface::{Api, Interface, Listing};
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Authenticated principal of a request
///
/// Installed as a request extension by the application's authentication
/// middleware; requests without it are anonymous.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity(pub Value);

/// Query-string options
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub embed: Option<String>,
    pub fields: Option<String>,
    pub sort: Option<String>,
    pub filter: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub count: Option<bool>,
    pub show_hidden: Option<bool>,
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl QueryParams {
    /// Convert into caller options for the given identity
    pub fn into_raw(self, identity: Option<Identity>) -> Result<RawOptions> {
        let context = match identity {
            Some(Identity(value)) => Context::with_identity(value),
            None => Context::new(),
        };

        let sort = match &self.sort {
            Some(sort) => Some(
                comma_list(sort)
                    .iter()
                    .map(|key| key.parse::<SortKey>())
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let filter = match &self.filter {
            Some(filter) => Some(
                serde_json::from_str::<Filter>(filter)
                    .map_err(|e| CellarError::bad_request(format!("invalid filter: {}", e)))?,
            ),
            None => None,
        };

        Ok(RawOptions {
            embed: self.embed.as_deref().map(comma_list),
            fields: self.fields.as_deref().map(comma_list),
            show_hidden: self.show_hidden.unwrap_or(false),
            context,
            filter,
            sort,
            offset: self.offset,
            limit: self.limit,
            count: self.count.unwrap_or(false),
            ..RawOptions::default()
        })
    }
}

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router for every interface of `api`
    pub fn build_router(api: Arc<Api>, custom_routes: Vec<Router>) -> Router {
        let mut app = Self::health_routes();

        for interface in api.interfaces() {
            app = app.merge(Self::interface_routes(Arc::clone(interface)));
        }

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        app.layer(TraceLayer::new_for_http())
    }

    fn interface_routes(interface: Arc<Interface>) -> Router {
        let collection = format!("/{}", interface.plural());
        let member = format!("/{}/{{id}}", interface.plural());
        let link = format!("/{}/{{id}}/{{link}}", interface.plural());

        Router::new()
            .route(&collection, get(list_items).post(create_item))
            .route(
                &member,
                get(get_item)
                    .patch(update_item)
                    .put(replace_item)
                    .delete(delete_item),
            )
            .route(&link, get(get_link))
            .with_state(interface)
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "cellar"
        }))
    }
}

fn identity(extension: Option<Extension<Identity>>) -> Option<Identity> {
    extension.map(|Extension(identity)| identity)
}

async fn list_items(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Query(params): Query<QueryParams>,
) -> Result<Response> {
    let raw = params.into_raw(identity(extension))?;
    let response = match interface.list(raw).await? {
        Listing::Items(items) => Json(items).into_response(),
        Listing::Count(count) => Json(json!({ "count": count })).into_response(),
    };
    Ok(response)
}

async fn get_item(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Item>> {
    let raw = params.into_raw(identity(extension))?;
    Ok(Json(interface.get(&id, raw).await?))
}

async fn create_item(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Query(params): Query<QueryParams>,
    Json(payload): Json<Item>,
) -> Result<Response> {
    let raw = params.into_raw(identity(extension))?;
    let created = interface.create(payload, raw).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn update_item(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
    Json(payload): Json<Item>,
) -> Result<Json<Item>> {
    let raw = params.into_raw(identity(extension))?;
    Ok(Json(interface.update(&id, payload, raw).await?))
}

async fn replace_item(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
    Json(payload): Json<Item>,
) -> Result<Json<Item>> {
    let raw = params.into_raw(identity(extension))?;
    Ok(Json(interface.replace(&id, payload, raw).await?))
}

async fn delete_item(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let raw = QueryParams::default().into_raw(identity(extension))?;
    interface.delete(&id, raw).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_link(
    State(interface): State<Arc<Interface>>,
    extension: Option<Extension<Identity>>,
    Path((id, link)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Value>> {
    let raw = params.into_raw(identity(extension))?;
    let linked = interface.link(&id, &link, raw).await?;
    Ok(Json(linked.map_or(Value::Null, |l| l.into_value())))
}

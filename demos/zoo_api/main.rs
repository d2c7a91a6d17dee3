//! Zoo API: polymorphic animals, keepers, embedding and ownership rules
//!
//! Run with `RUST_LOG=cellar=debug cargo run --example zoo_api`, then:
//!
//! ```text
//! curl localhost:3000/animals?embed=keeper
//! curl -H 'x-user: {"id":"k1","role":"keeper"}' localhost:3000/animals?show_hidden=true
//! ```

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use cellar::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
entities:
  - name: Keeper
    fields:
      - { name: name, kind: text, required: true }
    links:
      - { name: animals, entity: Animal, kind: inverse, field: keeper, on_delete: nullify, embeddable: true }
  - name: Animal
    fields:
      - { name: name, kind: text, required: true }
      - { name: age, kind: integer }
      - { name: vet_notes, kind: text, hidden: true }
    links:
      - { name: keeper, entity: Keeper, kind: reference, embeddable: true, embedded_fields: [name] }
  - name: Dog
    parent: Animal
    fields:
      - { name: breed, kind: text }

interfaces:
  - name: Keepers
    entity: Keeper
    rules:
      - methods: [list, get, link]
      - methods: [create, update, replace, delete]
        rule:
          compare: { op: eq, left: { path: identity.role }, right: { value: admin } }
  - name: Animals
    entity: Animal
    enabled_filters: [name, age, keeper, _type]
    enabled_sort: [name, age]
    default_sort: [name]
    default_limit: 20
    max_limit: 100
    hidden_field_authorization:
      compare: { op: eq, left: { path: identity.role }, right: { value: keeper } }
    rules:
      - methods: [list, get, link]
      - methods: [create, delete]
        rule:
          compare: { op: eq, left: { path: identity.role }, right: { value: admin } }
      - methods: [update, replace]
        rule:
          or:
            - compare: { op: eq, left: { path: identity.role }, right: { value: admin } }
            - compare: { op: eq, left: { path: item.keeper }, right: { path: identity.id } }
"#;

/// Demo authentication: the `x-user` header carries the identity as JSON
async fn identity_from_header(mut request: Request, next: Next) -> Response {
    let identity = request
        .headers()
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str::<Value>(v).ok());
    if let Some(identity) = identity {
        request.extensions_mut().insert(Identity(identity));
    }
    next.run(request).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ApiConfig::from_yaml_str(CONFIG)?;
    let api = config.build(Arc::new(InMemoryStorage::new()))?;

    // Seed through trusted calls
    let keepers = api.interface("Keepers").ok_or_else(|| anyhow::anyhow!("no Keepers"))?;
    let animals = api.interface("Animals").ok_or_else(|| anyhow::anyhow!("no Animals"))?;

    let item = |value: Value| -> anyhow::Result<Item> { Ok(serde_json::from_value(value)?) };
    let ann = keepers.create(item(json!({ "name": "Ann" }))?, RawOptions::new().bypass()).await?;
    let ann_id = ann.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();

    animals
        .create(
            item(json!({ "name": "Rex", "age": 4, "breed": "collie", "_type": "Dog", "keeper": ann_id, "vet_notes": "allergic" }))?,
            RawOptions::new().bypass(),
        )
        .await?;
    animals
        .create(
            item(json!({ "name": "Tom", "age": 2, "keeper": ann_id }))?,
            RawOptions::new().bypass(),
        )
        .await?;

    let listing = animals.list(RawOptions::new().with_embed(["keeper"])).await?;
    println!("{}", serde_json::to_string_pretty(&listing)?);

    let router: Router = ServerBuilder::new()
        .with_api(api)
        .build()?
        .layer(middleware::from_fn(identity_from_header));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("Zoo API listening on 127.0.0.1:3000");
    axum::serve(listener, router).await?;
    Ok(())
}

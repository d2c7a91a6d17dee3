//! Field visibility and link embedding
//!
//! Runs on every item leaving an interface: hidden and unselected fields are
//! stripped, then the links of the item's embed plan are resolved through
//! the interfaces of their target entities. Nested resolution always runs
//! with embedding disabled, so embedding never goes deeper than one level.

use crate::core::entity::{Entity, Item, is_internal};
use crate::core::error::Result;
use crate::core::options::{EmbedPlan, Options, RawOptions};
use crate::interface::registry::Api;
use serde_json::Value;
use tracing::debug;

/// Drop hidden fields (unless revealed) and every field outside `fields`
///
/// Internal `_` fields always survive. Idempotent.
pub fn remove_hidden_fields(entity: &Entity, mut item: Item, options: &Options) -> Item {
    if !options.reveals_hidden() {
        item.retain(|name, _| !entity.hidden_fields().contains(name));
    }
    if let Some(fields) = &options.fields {
        item.retain(|name, _| is_internal(name) || fields.contains(name));
    }
    item
}

/// Resolve every link of `plan` for `item`
///
/// Returns `(link name, value)` pairs; links that resolve to nothing are
/// left out.
pub(crate) async fn resolve_embedded(
    api: &Api,
    plan: &EmbedPlan,
    item: &Item,
    options: &Options,
) -> Result<Vec<(String, Value)>> {
    let mut resolved = Vec::new();

    let links = plan
        .entity
        .links()
        .values()
        .filter(|link| plan.embed.contains(&link.name));
    for link in links {
        let target = api.get_interface_for_entity(&link.entity)?;
        let raw = RawOptions {
            fields: link.embedded_fields.clone(),
            show_hidden: options.reveals_hidden(),
            context: options.context.clone(),
            bypass_authorization: true,
            allow_embedding: false,
            ..RawOptions::default()
        };
        let nested = target.create_options(raw, link.is_multiple())?;

        match target.fetch_link(link, item, &nested).await? {
            Some(linked) => resolved.push((link.name.clone(), linked.into_value())),
            None => debug!(link = %link.name, "embedded link resolved to nothing"),
        }
    }

    Ok(resolved)
}

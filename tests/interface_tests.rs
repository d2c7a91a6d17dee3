//! Integration tests for interfaces over the in-memory storage
//!
//! Exercises the full request path: options, rules, storage, hidden-field
//! stripping, embedding, link traversal and delete policies.

use cellar::prelude::*;

// ============================================================================
// Fixtures
// ============================================================================

fn record(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

fn as_user(id: &str, role: &str) -> RawOptions {
    RawOptions::new().with_context(Context::with_identity(json!({ "id": id, "role": role })))
}

fn blog_model() -> Model {
    Model::builder()
        .entity(
            EntityDef::new("Author")
                .field(FieldDef::new("name", FieldKind::Text).required())
                .field(FieldDef::new("email", FieldKind::Text).hidden())
                .link(LinkDef::inverse("posts", "Post", "author").on_delete(OnDelete::Cascade)),
        )
        .entity(
            EntityDef::new("Tag")
                .field(FieldDef::new("label", FieldKind::Text).required())
                .link(LinkDef::inverse("posts", "Post", "tags").on_delete(OnDelete::Nullify)),
        )
        .entity(
            EntityDef::new("Post")
                .field(FieldDef::new("title", FieldKind::Text).required())
                .field(FieldDef::new("owner", FieldKind::Text))
                .field(FieldDef::new("notes", FieldKind::Text).hidden())
                .link(
                    LinkDef::reference("author", "Author")
                        .embed_by_default()
                        .embedded_fields(["name"]),
                )
                .link(LinkDef::reference("tags", "Tag").multiple().embeddable()),
        )
        .freeze()
        .unwrap()
}

fn admin_only() -> Expr {
    identity().field("role").equals("admin")
}

fn blog_api() -> Arc<Api> {
    let posts = RuleSet::builder()
        .allow([Method::List, Method::Get, Method::Create, Method::Link])
        .require(
            [Method::Update, Method::Replace],
            item().field("owner").equals(identity().field("id")),
        )
        .require(Method::Delete, admin_only())
        .build();

    Api::builder(blog_model(), Arc::new(InMemoryStorage::new()))
        .interface(
            InterfaceDef::new("Authors", "Author").rules(RuleSet::builder().allow(Method::ALL).build()),
        )
        .interface(
            InterfaceDef::new("Tags", "Tag").rules(
                RuleSet::builder()
                    .allow([Method::List, Method::Get, Method::Create, Method::Delete, Method::Link])
                    .build(),
            ),
        )
        .interface(
            InterfaceDef::new("Posts", "Post")
                .rules(posts)
                .default_sort([SortKey::asc("title")])
                .max_limit(20)
                .hidden_field_authorization(admin_only()),
        )
        .build()
        .unwrap()
}

struct Blog {
    api: Arc<Api>,
    author: String,
    tags: Vec<String>,
    posts: Vec<String>,
}

impl Blog {
    fn interface(&self, name: &str) -> Arc<Interface> {
        self.api.interface(name).unwrap()
    }
}

fn id_of(item: &Item) -> String {
    item["_id"].as_str().unwrap().to_string()
}

/// One author, two tags and three posts owned by u1, u1 and u2
async fn seeded_blog() -> Blog {
    let api = blog_api();
    let authors = api.interface("Authors").unwrap();
    let tags = api.interface("Tags").unwrap();
    let posts = api.interface("Posts").unwrap();

    let author = authors
        .create(record(json!({ "name": "ada", "email": "ada@example.com" })), RawOptions::new())
        .await
        .unwrap();
    let author = id_of(&author);

    let mut tag_ids = Vec::new();
    for label in ["rust", "db"] {
        let tag = tags
            .create(record(json!({ "label": label })), RawOptions::new())
            .await
            .unwrap();
        tag_ids.push(id_of(&tag));
    }

    let mut post_ids = Vec::new();
    for (title, owner) in [("alpha", "u1"), ("beta", "u1"), ("gamma", "u2")] {
        let post = posts
            .create(
                record(json!({
                    "title": title,
                    "owner": owner,
                    "notes": format!("{} notes", title),
                    "author": author,
                    "tags": tag_ids,
                })),
                RawOptions::new(),
            )
            .await
            .unwrap();
        post_ids.push(id_of(&post));
    }

    Blog {
        api,
        author,
        tags: tag_ids,
        posts: post_ids,
    }
}

fn titles(items: &[Item]) -> Vec<&str> {
    items.iter().filter_map(|i| i["title"].as_str()).collect()
}

// ============================================================================
// Authorization
// ============================================================================

mod authorization_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_rule_by_role() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let id = &blog.posts[0];

        let err = posts.delete(id, RawOptions::new()).await.unwrap_err();
        assert!(matches!(err, CellarError::NotAuthenticated));

        let err = posts.delete(id, as_user("u1", "user")).await.unwrap_err();
        assert!(matches!(err, CellarError::NotAuthorized { method: Method::Delete }));

        posts.delete(id, as_user("root", "admin")).await.unwrap();
        let err = posts.get(id, RawOptions::new()).await.unwrap_err();
        assert!(matches!(err, CellarError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_item_rule_on_list_aborts_on_foreign_item() {
        let model = Model::builder()
            .entity(
                EntityDef::new("Note")
                    .field(FieldDef::new("title", FieldKind::Text))
                    .field(FieldDef::new("owner", FieldKind::Text)),
            )
            .freeze()
            .unwrap();
        let rules = RuleSet::builder()
            .allow(Method::Create)
            .require(Method::List, item().field("owner").equals(identity().field("id")))
            .build();
        let api = Api::builder(model, Arc::new(InMemoryStorage::new()))
            .interface(InterfaceDef::new("Notes", "Note").rules(rules))
            .build()
            .unwrap();
        let notes = api.interface("Notes").unwrap();

        for owner in ["u1", "u1", "u2"] {
            notes
                .create(record(json!({ "owner": owner })), RawOptions::new())
                .await
                .unwrap();
        }

        let err = notes.list(as_user("u1", "user")).await.unwrap_err();
        assert!(matches!(err, CellarError::NotAuthorized { method: Method::List }));

        // Narrowing the listing to the caller's own items satisfies the rule
        let own = notes
            .list(as_user("u1", "user").with_filter(Filter::equals("owner", "$identity.id")))
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(own.len(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_ownership() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let id = &blog.posts[0];

        let err = posts
            .update(id, record(json!({ "title": "hijacked" })), as_user("u2", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::NotAuthorized { method: Method::Update }));

        let updated = posts
            .update(id, record(json!({ "title": "alpha v2" })), as_user("u1", "user"))
            .await
            .unwrap();
        assert_eq!(updated["title"], json!("alpha v2"));
        assert_eq!(updated["owner"], json!("u1"));
    }

    #[tokio::test]
    async fn test_bypass_skips_rules() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        posts
            .delete(&blog.posts[2], RawOptions::new().bypass())
            .await
            .unwrap();
        let remaining = posts.list(RawOptions::new()).await.unwrap().items().unwrap();
        assert_eq!(titles(&remaining), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_disabled_method() {
        let blog = seeded_blog().await;
        let tags = blog.interface("Tags");

        let err = tags
            .update(&blog.tags[0], record(json!({ "label": "x" })), RawOptions::new().bypass())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CellarError::DisabledMethod { method: Method::Update, .. }
        ));
    }
}

// ============================================================================
// Listing
// ============================================================================

mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_default_sort_and_count() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let items = posts.list(RawOptions::new()).await.unwrap().items().unwrap();
        assert_eq!(titles(&items), vec!["alpha", "beta", "gamma"]);

        let listing = posts
            .list(RawOptions::new().with_filter(Filter::equals("owner", "u1")).count())
            .await
            .unwrap();
        assert_eq!(listing.count(), Some(2));
    }

    #[tokio::test]
    async fn test_sort_offset_and_limit() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let items = posts
            .list(
                RawOptions::new()
                    .with_sort([SortKey::desc("title")])
                    .with_offset(1)
                    .with_limit(1),
            )
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(titles(&items), vec!["beta"]);
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let api = blog_api();
        let tags = api.interface("Tags").unwrap();
        let posts = api.interface("Posts").unwrap();
        let tag = tags
            .create(record(json!({ "label": "bulk" })), RawOptions::new())
            .await
            .unwrap();

        for i in 0..25 {
            api.storage()
                .create(
                    posts.entity(),
                    record(json!({ "title": format!("post {:02}", i), "tags": [id_of(&tag)] })),
                )
                .await
                .unwrap();
        }

        let items = posts
            .list(RawOptions::new().with_limit(9999))
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(items.len(), 20);

        let items = posts
            .list(RawOptions::new().with_limit(9999).bypass())
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(items.len(), 25);

        // The inverse link is read through the Posts interface and clamped too
        let linked = tags
            .link(&id_of(&tag), "posts", RawOptions::new())
            .await
            .unwrap();
        match linked {
            Some(Linked::Many(items)) => assert_eq!(items.len(), 20),
            other => panic!("expected many posts, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hidden_filter_needs_right() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let filter = Filter::equals("notes", "alpha notes");

        let err = posts
            .list(as_user("u1", "user").with_filter(filter.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::DisabledField { ref field } if field == "notes"));

        let items = posts
            .list(as_user("root", "admin").with_filter(filter))
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(titles(&items), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_malformed_filter_is_rejected() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let filter = Filter::from(record(json!({ "title": { "$regex": "a.*" } })));

        let err = posts
            .list(RawOptions::new().with_filter(filter))
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::BadRequest { .. }));
    }
}

// ============================================================================
// Visibility and embedding
// ============================================================================

mod embedding_tests {
    use super::*;

    #[tokio::test]
    async fn test_hidden_fields_are_stripped() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let id = &blog.posts[0];

        let anonymous = posts.get(id, RawOptions::new().show_hidden()).await.unwrap();
        assert!(anonymous.get("notes").is_none());

        let user = posts.get(id, as_user("u1", "user").show_hidden()).await.unwrap();
        assert!(user.get("notes").is_none());

        // The right alone does not reveal; the caller has to ask
        let admin = posts.get(id, as_user("root", "admin")).await.unwrap();
        assert!(admin.get("notes").is_none());

        let admin = posts
            .get(id, as_user("root", "admin").show_hidden())
            .await
            .unwrap();
        assert_eq!(admin["notes"], json!("alpha notes"));
    }

    #[tokio::test]
    async fn test_default_embed() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let post = posts.get(&blog.posts[0], RawOptions::new()).await.unwrap();

        let author = post["author"].as_object().expect("author is embedded");
        assert_eq!(author["name"], json!("ada"));
        assert_eq!(author["_id"], json!(blog.author));
        assert!(author.get("email").is_none());

        // Not embedded by default
        assert_eq!(post["tags"], json!(blog.tags));
    }

    #[tokio::test]
    async fn test_explicit_embed_replaces_defaults() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let items = posts
            .list(RawOptions::new().with_embed(["tags", "title"]))
            .await
            .unwrap()
            .items()
            .unwrap();

        let first = &items[0];
        assert_eq!(first["author"], json!(blog.author));
        let tags = first["tags"].as_array().expect("tags are embedded");
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t["label"].is_string()));
    }

    #[tokio::test]
    async fn test_field_selection() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let post = posts
            .get(&blog.posts[0], RawOptions::new().with_fields(["title", "tags"]))
            .await
            .unwrap();

        let mut keys: Vec<&str> = post.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["_id", "_type", "author", "tags", "title"]);
        // Selecting an embeddable link embeds it
        assert!(post["tags"].as_array().unwrap()[0].is_object());
    }

    fn tree_api() -> Arc<Api> {
        let model = Model::builder()
            .entity(
                EntityDef::new("Node")
                    .field(FieldDef::new("name", FieldKind::Text).required())
                    .link(LinkDef::reference("parent", "Node").embed_by_default()),
            )
            .freeze()
            .unwrap();
        Api::builder(model, Arc::new(InMemoryStorage::new()))
            .interface(InterfaceDef::new("Nodes", "Node").rules(RuleSet::builder().allow(Method::ALL).build()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_embedding_stops_after_one_level() {
        let api = tree_api();
        let nodes = api.interface("Nodes").unwrap();

        let a = nodes
            .create(record(json!({ "name": "a" })), RawOptions::new())
            .await
            .unwrap();
        let b = nodes
            .create(record(json!({ "name": "b", "parent": id_of(&a) })), RawOptions::new())
            .await
            .unwrap();
        let c = nodes
            .create(record(json!({ "name": "c", "parent": id_of(&b) })), RawOptions::new())
            .await
            .unwrap();

        let fetched = nodes.get(&id_of(&c), RawOptions::new()).await.unwrap();
        let parent = fetched["parent"].as_object().expect("parent is embedded");
        assert_eq!(parent["name"], json!("b"));
        assert_eq!(parent["parent"], json!(id_of(&a)));
    }

    #[tokio::test]
    async fn test_embedding_a_cycle_terminates() {
        let api = tree_api();
        let nodes = api.interface("Nodes").unwrap();

        let a = nodes
            .create(record(json!({ "name": "a" })), RawOptions::new())
            .await
            .unwrap();
        let b = nodes
            .create(record(json!({ "name": "b", "parent": id_of(&a) })), RawOptions::new())
            .await
            .unwrap();
        let a = nodes
            .update(&id_of(&a), record(json!({ "parent": id_of(&b) })), RawOptions::new())
            .await
            .unwrap();
        assert_eq!(a["parent"]["name"], json!("b"));
        assert_eq!(a["parent"]["parent"], json!(id_of(&a)));

        // A node that is its own parent
        let own = nodes
            .create(record(json!({ "name": "own" })), RawOptions::new())
            .await
            .unwrap();
        let own = nodes
            .update(&id_of(&own), record(json!({ "parent": id_of(&own) })), RawOptions::new())
            .await
            .unwrap();
        assert_eq!(own["parent"]["name"], json!("own"));
        assert_eq!(own["parent"]["parent"], json!(id_of(&own)));

        let all = nodes.list(RawOptions::new()).await.unwrap().items().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|n| n["parent"].is_object()));
    }

    #[tokio::test]
    async fn test_embedding_requires_target_interface() {
        let api = Api::builder(blog_model(), Arc::new(InMemoryStorage::new()))
            .interface(
                InterfaceDef::new("Posts", "Post").rules(RuleSet::builder().allow(Method::ALL).build()),
            )
            .build()
            .unwrap();
        let posts = api.interface("Posts").unwrap();
        api.storage()
            .create(posts.entity(), record(json!({ "title": "orphan" })))
            .await
            .unwrap();

        let err = posts.list(RawOptions::new()).await.unwrap_err();
        assert!(matches!(err, CellarError::Config { .. }));

        // Nothing to embed, nothing to resolve
        let items = posts
            .list(RawOptions::new().with_embed(Vec::<String>::new()))
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(items.len(), 1);
    }
}

// ============================================================================
// Links and delete policies
// ============================================================================

mod link_tests {
    use super::*;

    #[tokio::test]
    async fn test_follow_reference_and_inverse_links() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let authors = blog.interface("Authors");

        let author = posts
            .link(&blog.posts[0], "author", RawOptions::new())
            .await
            .unwrap();
        match author {
            Some(Linked::One(author)) => {
                assert_eq!(author["name"], json!("ada"));
                assert!(author.get("email").is_none());
            }
            other => panic!("expected one author, got {:?}", other),
        }

        let written = authors
            .link(
                &blog.author,
                "posts",
                RawOptions::new().with_filter(Filter::equals("owner", "u1")),
            )
            .await
            .unwrap();
        match written {
            Some(Linked::Many(items)) => assert_eq!(titles(&items), vec!["alpha", "beta"]),
            other => panic!("expected many posts, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_reference_link() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let lonely = posts
            .create(record(json!({ "title": "lonely" })), RawOptions::new())
            .await
            .unwrap();

        let author = posts
            .link(&id_of(&lonely), "author", RawOptions::new())
            .await
            .unwrap();
        assert!(author.is_none());
    }

    #[tokio::test]
    async fn test_single_link_rejects_list_options() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let id = &blog.posts[0];

        for raw in [
            RawOptions::new().with_filter(Filter::equals("name", "ada")),
            RawOptions::new().with_sort([SortKey::asc("name")]),
            RawOptions::new().with_limit(1),
            RawOptions::new().count(),
        ] {
            let err = posts.link(id, "author", raw).await.unwrap_err();
            assert!(matches!(err, CellarError::BadRequest { .. }));
        }

        // Multiple links still take them
        let tags = posts
            .link(id, "tags", RawOptions::new().with_limit(1))
            .await
            .unwrap();
        match tags {
            Some(Linked::Many(items)) => assert_eq!(items.len(), 1),
            other => panic!("expected many tags, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_link() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let err = posts
            .link(&blog.posts[0], "editor", RawOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_dependents() {
        let blog = seeded_blog().await;
        let authors = blog.interface("Authors");
        let posts = blog.interface("Posts");

        authors.delete(&blog.author, RawOptions::new()).await.unwrap();

        let remaining = posts.list(RawOptions::new().count()).await.unwrap();
        assert_eq!(remaining.count(), Some(0));
    }

    #[tokio::test]
    async fn test_delete_nullifies_references() {
        let blog = seeded_blog().await;
        let tags = blog.interface("Tags");
        let posts = blog.interface("Posts");

        tags.delete(&blog.tags[0], RawOptions::new()).await.unwrap();

        let post = posts
            .get(&blog.posts[0], RawOptions::new().with_embed(Vec::<String>::new()))
            .await
            .unwrap();
        assert_eq!(post["tags"], json!([blog.tags[1]]));
    }
}

// ============================================================================
// Writes and validation
// ============================================================================

mod write_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_validates_payload() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let err = posts
            .create(record(json!({ "owner": 42, "colour": "red" })), RawOptions::new())
            .await
            .unwrap_err();
        let errors = match err {
            CellarError::Validation(errors) => errors,
            other => panic!("expected a validation error, got {:?}", other),
        };
        assert_eq!(errors.get("title"), Some("required"));
        assert_eq!(errors.get("colour"), Some("unknown field"));
        assert!(errors.get("owner").is_some());
    }

    #[tokio::test]
    async fn test_internal_fields_are_not_writable() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        let created = posts
            .create(record(json!({ "title": "t", "_id": "mine" })), RawOptions::new())
            .await
            .unwrap();
        assert_ne!(created["_id"], json!("mine"));
        assert_eq!(created["_type"], json!("Post"));
    }

    #[tokio::test]
    async fn test_unknown_type_tag_is_rejected() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");

        for tag in [json!("Bogus"), json!("Author"), json!(7)] {
            let err = posts
                .create(record(json!({ "title": "t", "_type": tag })), RawOptions::new())
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
            match err {
                CellarError::Validation(errors) => assert!(errors.get("_type").is_some()),
                other => panic!("expected a validation error, got {:?}", other),
            }
        }

        let count = posts.list(RawOptions::new().count()).await.unwrap().count();
        assert_eq!(count, Some(3));

        let created = posts
            .create(record(json!({ "title": "t", "_type": "Post" })), RawOptions::new())
            .await
            .unwrap();
        assert_eq!(created["_type"], json!("Post"));
    }

    #[tokio::test]
    async fn test_replace_drops_missing_fields() {
        let blog = seeded_blog().await;
        let posts = blog.interface("Posts");
        let id = &blog.posts[0];

        let err = posts
            .replace(id, record(json!({ "owner": "u1" })), as_user("u1", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::Validation(_)));

        let replaced = posts
            .replace(id, record(json!({ "title": "fresh", "owner": "u1" })), as_user("u1", "user"))
            .await
            .unwrap();
        assert_eq!(replaced["title"], json!("fresh"));
        assert!(replaced.get("author").is_none());
        assert!(replaced.get("tags").is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let blog = seeded_blog().await;
        let authors = blog.interface("Authors");

        let err = authors
            .update("missing", record(json!({ "name": "x" })), RawOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::NotFound { .. }));
    }
}

// ============================================================================
// Polymorphism
// ============================================================================

mod polymorphism_tests {
    use super::*;

    fn zoo_api() -> Arc<Api> {
        let model = Model::builder()
            .entity(EntityDef::new("Keeper").field(FieldDef::new("name", FieldKind::Text)))
            .entity(EntityDef::new("Animal").field(FieldDef::new("name", FieldKind::Text).required()))
            .entity(
                EntityDef::new("Dog")
                    .extends("Animal")
                    .field(FieldDef::new("breed", FieldKind::Text))
                    .link(LinkDef::reference("keeper", "Keeper").embed_by_default()),
            )
            .freeze()
            .unwrap();

        let everything = || RuleSet::builder().allow(Method::ALL).build();
        Api::builder(model, Arc::new(InMemoryStorage::new()))
            .interface(InterfaceDef::new("Keepers", "Keeper").rules(everything()))
            .interface(InterfaceDef::new("Animals", "Animal").rules(everything()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_subtype_read_through_base_interface() {
        let api = zoo_api();
        let keepers = api.interface("Keepers").unwrap();
        let animals = api.interface("Animals").unwrap();

        let keeper = keepers
            .create(record(json!({ "name": "sam" })), RawOptions::new())
            .await
            .unwrap();
        let dog = animals
            .create(
                record(json!({
                    "_type": "Dog",
                    "name": "rex",
                    "breed": "collie",
                    "keeper": id_of(&keeper),
                })),
                RawOptions::new(),
            )
            .await
            .unwrap();
        animals
            .create(record(json!({ "name": "tom" })), RawOptions::new())
            .await
            .unwrap();

        let fetched = animals.get(&id_of(&dog), RawOptions::new()).await.unwrap();
        assert_eq!(fetched["_type"], json!("Animal.Dog"));
        assert_eq!(fetched["breed"], json!("collie"));
        assert_eq!(fetched["keeper"]["name"], json!("sam"));

        let all = animals
            .list(RawOptions::new().with_sort([SortKey::asc("name")]))
            .await
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].get("keeper").is_none());
    }

    #[tokio::test]
    async fn test_embed_plan_per_subtype() {
        let api = zoo_api();
        let animals = api.interface("Animals").unwrap();
        let options = animals.create_options(RawOptions::new(), true).unwrap();

        let dog = options
            .get_embed_for_type(api.model(), animals.entity(), "Animal.Dog")
            .unwrap();
        assert_eq!(dog.entity.name(), "Dog");
        assert!(dog.embed.contains("keeper"));

        let animal = options
            .get_embed_for_type(api.model(), animals.entity(), "Animal")
            .unwrap();
        assert!(animal.embed.is_empty());
    }

    #[tokio::test]
    async fn test_subtype_only_fields_are_validated_per_type() {
        let api = zoo_api();
        let animals = api.interface("Animals").unwrap();

        let err = animals
            .create(record(json!({ "name": "tom", "breed": "tabby" })), RawOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::Validation(_)));

        let err = animals
            .create(record(json!({ "_type": "Keeper", "name": "x" })), RawOptions::new())
            .await
            .unwrap_err();
        match err {
            CellarError::Validation(errors) => assert!(errors.get("_type").is_some()),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_subtype_uses_base_interface() {
        let api = zoo_api();
        let interface = api.get_interface_for_entity("Dog").unwrap();
        assert_eq!(interface.name(), "Animals");
    }
}

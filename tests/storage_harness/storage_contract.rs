//! Macro-generated test suite for the `Storage` contract
//!
//! The `storage_contract_tests!` macro generates a test module that validates
//! any `Storage` implementation: id and type stamping, polymorphic reads,
//! filtering, sorting and paging, partial and full updates, unique fields and
//! concurrent access.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[macro_use]
//! mod storage_harness;
//!
//! use storage_harness::*;
//! use cellar::storage::InMemoryStorage;
//!
//! storage_contract_tests!(InMemoryStorage::new());
//! ```

/// Generate a full `Storage` conformance test suite.
///
/// `$factory` must evaluate to a fresh, empty `Storage` implementation. It is
/// re-evaluated for each test to ensure isolation.
#[macro_export]
macro_rules! storage_contract_tests {
    ($factory:expr) => {
        mod storage_contract_tests {
            use super::*;
            use cellar::core::entity::{ID_FIELD, TYPE_FIELD};
            use cellar::core::error::CellarError;
            use cellar::core::query::{Filter, SortKey};
            use cellar::core::service::{Storage, StorageQuery};
            use serde_json::json;
            use std::sync::Arc;

            fn storage() -> Arc<dyn Storage> {
                Arc::new($factory)
            }

            async fn seed(storage: &Arc<dyn Storage>) {
                let model = test_model();
                let animal = model.entity("Animal").unwrap();
                let dog = model.entity("Dog").unwrap();
                for (name, age) in [("tom", 7), ("kit", 2)] {
                    storage
                        .create(&animal, item(json!({ "name": name, "age": age })))
                        .await
                        .unwrap();
                }
                for (name, age) in [("rex", 4), ("max", 9), ("fido", 1)] {
                    storage
                        .create(&dog, item(json!({ "name": name, "age": age, "tags": ["good"] })))
                        .await
                        .unwrap();
                }
            }

            // ==================================================================
            // Create & Get
            // ==================================================================

            #[tokio::test]
            async fn test_create_stamps_id_and_type() {
                let storage = storage();
                let model = test_model();
                let dog = model.entity("Dog").unwrap();

                let id = storage
                    .create(&dog, item(json!({ "name": "rex" })))
                    .await
                    .unwrap();
                let stored = storage.get_by_id(&dog, &id).await.unwrap().unwrap();

                assert_eq!(stored[ID_FIELD], json!(id));
                assert_eq!(stored[TYPE_FIELD], json!("Animal.Dog"));
                assert_eq!(stored["name"], json!("rex"));
            }

            #[tokio::test]
            async fn test_get_unknown_id() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                assert!(storage.get_by_id(&animal, "nope").await.unwrap().is_none());
            }

            #[tokio::test]
            async fn test_list_empty() {
                let storage = storage();
                let model = test_model();
                let keeper = model.entity("Keeper").unwrap();

                let items = storage.get(&keeper, &StorageQuery::default()).await.unwrap();
                assert!(items.is_empty());
                assert_eq!(storage.count(&keeper, None).await.unwrap(), 0);
            }

            // ==================================================================
            // Polymorphism
            // ==================================================================

            #[tokio::test]
            async fn test_base_listing_includes_subtypes() {
                let storage = storage();
                seed(&storage).await;
                let model = test_model();

                let animal = model.entity("Animal").unwrap();
                let dog = model.entity("Dog").unwrap();
                assert_eq!(storage.count(&animal, None).await.unwrap(), 5);
                assert_eq!(storage.count(&dog, None).await.unwrap(), 3);
            }

            #[tokio::test]
            async fn test_subtype_get_excludes_base_items() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();
                let dog = model.entity("Dog").unwrap();

                let id = storage
                    .create(&animal, item(json!({ "name": "tom" })))
                    .await
                    .unwrap();
                assert!(storage.get_by_id(&dog, &id).await.unwrap().is_none());
                assert!(storage.get_by_id(&animal, &id).await.unwrap().is_some());
            }

            // ==================================================================
            // Filter, sort, paging
            // ==================================================================

            #[tokio::test]
            async fn test_filter_operators() {
                let storage = storage();
                seed(&storage).await;
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                let query = StorageQuery {
                    filter: Some(Filter::from(item(json!({ "age": { "$gte": 4 } })))),
                    sort: vec![SortKey::asc("age")],
                    ..Default::default()
                };
                let items = storage.get(&animal, &query).await.unwrap();
                assert_eq!(names(&items), vec!["rex", "tom", "max"]);

                let query = StorageQuery::filtered(Filter::from(item(
                    json!({ "name": { "$in": ["kit", "fido"] } }),
                )));
                assert_eq!(storage.get(&animal, &query).await.unwrap().len(), 2);

                let tagged = Filter::equals("tags", "good");
                assert_eq!(storage.count(&animal, Some(&tagged)).await.unwrap(), 3);
            }

            #[tokio::test]
            async fn test_sort_offset_limit() {
                let storage = storage();
                seed(&storage).await;
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                let query = StorageQuery {
                    sort: vec![SortKey::desc("age")],
                    offset: 1,
                    limit: Some(2),
                    ..Default::default()
                };
                let items = storage.get(&animal, &query).await.unwrap();
                assert_eq!(names(&items), vec!["tom", "rex"]);
            }

            #[tokio::test]
            async fn test_get_by_ids_applies_query() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                let mut ids = Vec::new();
                for (name, age) in [("a", 1), ("b", 5), ("c", 9)] {
                    ids.push(
                        storage
                            .create(&animal, item(json!({ "name": name, "age": age })))
                            .await
                            .unwrap(),
                    );
                }

                let query = StorageQuery {
                    filter: Some(Filter::from(item(json!({ "age": { "$gt": 1 } })))),
                    sort: vec![SortKey::desc("name")],
                    ..Default::default()
                };
                let items = storage.get_by_ids(&animal, &ids, &query).await.unwrap();
                assert_eq!(names(&items), vec!["c", "b"]);
            }

            // ==================================================================
            // Update & Delete
            // ==================================================================

            #[tokio::test]
            async fn test_update_merges_fields() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();
                let id = storage
                    .create(&animal, item(json!({ "name": "tom", "age": 2 })))
                    .await
                    .unwrap();

                let updated = storage
                    .update(&animal, &id, item(json!({ "age": 3 })), false)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(updated["name"], json!("tom"));
                assert_eq!(updated["age"], json!(3));
            }

            #[tokio::test]
            async fn test_replace_keeps_internal_fields_only() {
                let storage = storage();
                let model = test_model();
                let dog = model.entity("Dog").unwrap();
                let id = storage
                    .create(&dog, item(json!({ "name": "rex", "breed": "collie" })))
                    .await
                    .unwrap();

                let replaced = storage
                    .update(&dog, &id, item(json!({ "name": "rex" })), true)
                    .await
                    .unwrap()
                    .unwrap();
                assert!(replaced.get("breed").is_none());
                assert_eq!(replaced[TYPE_FIELD], json!("Animal.Dog"));
            }

            #[tokio::test]
            async fn test_update_unknown_id() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                let result = storage
                    .update(&animal, "nope", item(json!({ "age": 1 })), false)
                    .await
                    .unwrap();
                assert!(result.is_none());
            }

            #[tokio::test]
            async fn test_delete_existing() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();
                let id = storage
                    .create(&animal, item(json!({ "name": "tom" })))
                    .await
                    .unwrap();

                storage.delete(&animal, &id).await.unwrap();
                assert!(storage.get_by_id(&animal, &id).await.unwrap().is_none());
            }

            // ==================================================================
            // Edge cases
            // ==================================================================

            #[tokio::test]
            async fn test_unique_field_across_family() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();
                let dog = model.entity("Dog").unwrap();

                storage
                    .create(&animal, item(json!({ "name": "rex" })))
                    .await
                    .unwrap();
                let err = storage
                    .create(&dog, item(json!({ "name": "rex" })))
                    .await
                    .expect_err("name is unique in the Animal family");
                assert!(matches!(err, CellarError::Duplicate { .. }));
            }

            #[tokio::test]
            async fn test_unique_update_to_taken_value() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                storage
                    .create(&animal, item(json!({ "name": "a" })))
                    .await
                    .unwrap();
                let b = storage
                    .create(&animal, item(json!({ "name": "b" })))
                    .await
                    .unwrap();

                let err = storage
                    .update(&animal, &b, item(json!({ "name": "a" })), false)
                    .await
                    .expect_err("a is taken");
                assert!(matches!(err, CellarError::Duplicate { .. }));

                // Re-saving the same value is not a conflict
                assert!(
                    storage
                        .update(&animal, &b, item(json!({ "name": "b" })), false)
                        .await
                        .is_ok()
                );
            }

            #[tokio::test]
            async fn test_concurrent_access() {
                let storage = storage();
                let model = test_model();
                let animal = model.entity("Animal").unwrap();

                let mut handles = Vec::new();
                for i in 0..10 {
                    let storage = Arc::clone(&storage);
                    let animal = Arc::clone(&animal);
                    handles.push(tokio::spawn(async move {
                        storage
                            .create(&animal, item(json!({ "name": format!("animal-{}", i) })))
                            .await
                    }));
                }
                for handle in handles {
                    handle.await.unwrap().unwrap();
                }

                assert_eq!(storage.count(&animal, None).await.unwrap(), 10);
            }
        }
    };
}

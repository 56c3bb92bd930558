use super::*;
use crate::types::{BuildDefinition, PushDefinition, RegistryPush};
use tempfile::TempDir;

struct TestContext {
    store: SqliteBuildStore,
    _dir: TempDir,
}

async fn create_test_context() -> TestContext {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test_builds.db");
    let store = SqliteBuildStore::from_path(&path).await.unwrap();
    TestContext { store, _dir: dir }
}

fn sample_request() -> BuildRequest {
    BuildRequest {
        build: BuildDefinition {
            source_repo: "acme/api".to_string(),
            git_ref: "main".to_string(),
            tags: vec!["v1".to_string()],
            ..Default::default()
        },
        push: PushDefinition {
            registry: RegistryPush {
                repo: "quay.io/acme/api".to_string(),
            },
            ..Default::default()
        },
    }
}

async fn check_create_and_get(store: &dyn BuildStore) {
    let request = sample_request();
    let id = store.create_build(&request).await.unwrap();

    let record = store.get_build(id).await.unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.request, request);
    assert_eq!(record.state, BuildState::Created);
    assert!(!record.failed);
    assert!(!record.finished);
    assert!(record.completed_at.is_none());
}

async fn check_full_lifecycle(store: &dyn BuildStore) {
    let id = store.create_build(&sample_request()).await.unwrap();

    store.set_build_state(id, BuildState::Building).await.unwrap();
    store.set_build_state(id, BuildState::Pushing).await.unwrap();
    store.set_build_state(id, BuildState::Success).await.unwrap();
    store
        .set_build_flags(id, BuildFlags::finished(false))
        .await
        .unwrap();
    store.set_completed_timestamp(id).await.unwrap();

    let record = store.get_build(id).await.unwrap();
    assert_eq!(record.state, BuildState::Success);
    assert!(record.finished);
    assert!(!record.failed);
    assert!(record.completed_at.is_some());
    assert!(record.duration().is_some());
}

async fn check_rejects_backward_transition(store: &dyn BuildStore) {
    let id = store.create_build(&sample_request()).await.unwrap();
    store.set_build_state(id, BuildState::Building).await.unwrap();
    store
        .set_build_state(id, BuildState::BuildFailure)
        .await
        .unwrap();

    let result = store.set_build_state(id, BuildState::Pushing).await;
    assert!(matches!(
        result,
        Err(StoreError::InvalidTransition {
            from: BuildState::BuildFailure,
            to: BuildState::Pushing,
            ..
        })
    ));

    let result = store.set_build_state(id, BuildState::Created).await;
    assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));

    let record = store.get_build(id).await.unwrap();
    assert_eq!(record.state, BuildState::BuildFailure);
}

async fn check_delete(store: &dyn BuildStore) {
    let id = store.create_build(&sample_request()).await.unwrap();
    store.delete_build(id).await.unwrap();

    assert!(matches!(
        store.get_build(id).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.delete_build(id).await,
        Err(StoreError::NotFound(_))
    ));
}

async fn check_unknown_id(store: &dyn BuildStore) {
    let id = BuildId::new();
    assert!(matches!(
        store.set_build_state(id, BuildState::Building).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.set_build_flags(id, BuildFlags::finished(true)).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.set_completed_timestamp(id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sqlite_create_and_get() {
    let ctx = create_test_context().await;
    check_create_and_get(&ctx.store).await;
}

#[tokio::test]
async fn test_sqlite_full_lifecycle() {
    let ctx = create_test_context().await;
    check_full_lifecycle(&ctx.store).await;
}

#[tokio::test]
async fn test_sqlite_rejects_backward_transition() {
    let ctx = create_test_context().await;
    check_rejects_backward_transition(&ctx.store).await;
}

#[tokio::test]
async fn test_sqlite_delete() {
    let ctx = create_test_context().await;
    check_delete(&ctx.store).await;
}

#[tokio::test]
async fn test_sqlite_unknown_id() {
    let ctx = create_test_context().await;
    check_unknown_id(&ctx.store).await;
}

#[tokio::test]
async fn test_sqlite_in_memory() {
    let store = SqliteBuildStore::in_memory().await.unwrap();
    check_full_lifecycle(&store).await;
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryBuildStore::new();
    check_create_and_get(&store).await;
    check_full_lifecycle(&store).await;
    check_rejects_backward_transition(&store).await;
    check_delete(&store).await;
    check_unknown_id(&store).await;
    assert_eq!(store.len(), 3);
}

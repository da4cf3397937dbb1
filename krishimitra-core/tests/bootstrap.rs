//! Exercises `Engine::bootstrap` end to end against a real, file-backed
//! `SqliteVectorStore` rather than the in-memory double the other
//! integration tests use. Never touches the network: only `rebuild_index`
//! is called, which stays entirely within the vector store and embedder.

use krishimitra_core::config::Config;
use krishimitra_core::engine::Engine;
use krishimitra_ragstore::COLLECTION_NAMES;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn bootstrap_against_a_real_sqlite_store_rebuilds_every_collection() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("krishimitra.db");

    let config = Config {
        vector_store_path: db_path.to_string_lossy().into_owned(),
        ..Config::default()
    };

    let engine = Engine::bootstrap(config).await.expect("bootstrap against sqlite");
    let rebuilt = engine
        .rebuild_index(None, &CancellationToken::new())
        .await
        .expect("rebuild every known collection");

    assert_eq!(rebuilt.len(), COLLECTION_NAMES.len());
    for name in COLLECTION_NAMES {
        assert!(rebuilt.contains(&name.to_string()));
    }
}

//! The controller driving both levels from store notifications.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::{config_map, eventually, repo, Env, URI};
use slipway::resource::OpType;
use slipway::store::ObjectStore;
use slipway::{Controller, ControllerSettings, Operation};

const WAIT: Duration = Duration::from_secs(5);

fn controller(env: &Env) -> Arc<Controller> {
    Arc::new(Controller::new(
        env.store.clone(),
        env.repos.clone(),
        env.pipeline.clone(),
        ControllerSettings {
            resync_interval: Duration::from_millis(200),
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_millis(200),
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_converges_declared_repo() {
    let env = Env::new();
    env.lister.set(URI, &[("refs/heads/main", "aaa111")]);
    env.builder.set("./deploy", &config_map("settings"));

    let controller = controller(&env);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    env.store
        .apply_repo(&repo(
            "podinfo",
            vec![Operation::new("deploy", OpType::Branch, "main", "./deploy")],
        ))
        .await
        .unwrap();

    let store = env.store.clone();
    assert!(eventually(WAIT, || store.object_count() == 1).await);

    // A moved branch is picked up by the fallback resync.
    env.lister.set(URI, &[("refs/heads/main", "bbb222")]);
    let mut moved = false;
    for _ in 0..250 {
        if env.store.get_hash("aaa111").await.unwrap().is_none()
            && env.store.get_hash("bbb222").await.unwrap().is_some()
            && store.object_count() == 1
        {
            moved = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(moved);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("controller did not stop")
        .unwrap();
    assert!(controller.passes() >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_repairs_deleted_object() {
    let env = Env::new();
    env.lister.set(URI, &[("refs/heads/main", "aaa111")]);
    env.builder.set("./deploy", &config_map("settings"));
    env.store
        .apply_repo(&repo(
            "podinfo",
            vec![Operation::new("deploy", OpType::Branch, "main", "./deploy")],
        ))
        .await
        .unwrap();

    let controller = controller(&env);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    let store = env.store.clone();
    assert!(eventually(WAIT, || store.object_count() == 1).await);

    let reference = store.object_references().remove(0);
    env.store.delete_object(&reference).await.unwrap();
    assert!(eventually(WAIT, || store.object_count() == 1).await);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("controller did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_controller_retries_failed_listing() {
    let env = Env::new();
    env.builder.set("./deploy", &config_map("settings"));
    env.store
        .apply_repo(&repo(
            "podinfo",
            vec![Operation::new("deploy", OpType::Branch, "main", "./deploy")],
        ))
        .await
        .unwrap();

    // Unknown remote: the fake lister fails with a retryable network error.
    let controller = controller(&env);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    let c = Arc::clone(&controller);
    assert!(eventually(WAIT, || c.passes() >= 1).await);
    assert_eq!(env.store.object_count(), 0);

    env.lister.set(URI, &[("refs/heads/main", "aaa111")]);
    let store = env.store.clone();
    assert!(eventually(WAIT, || store.object_count() == 1).await);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("controller did not stop")
        .unwrap();
}

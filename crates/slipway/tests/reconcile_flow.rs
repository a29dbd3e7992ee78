//! End-to-end runs of both reconciliation levels over in-memory backends.

mod common;

use common::{config_map, deployment, repo, Env, URI};
use slipway::resource::{ObjectReference, OpType, Transformer, TransformerType};
use slipway::store::ObjectStore;
use slipway::Operation;

fn object(kind: &str, namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_branch_to_objects() {
    let env = Env::new();
    env.lister.set(
        URI,
        &[
            ("HEAD", "aaa111"),
            ("refs/heads/main", "aaa111"),
            ("refs/heads/dev", "ddd444"),
            ("refs/tags/v1.0.0", "bbb222"),
        ],
    );
    env.builder.set("./deploy", &config_map("settings"));
    env.store
        .apply_repo(&repo(
            "podinfo",
            vec![Operation::new("deploy", OpType::Branch, "main", "./deploy")],
        ))
        .await
        .unwrap();

    let report = env.repos.reconcile("podinfo").await.unwrap();
    assert_eq!(report.created, vec!["aaa111".to_string()]);

    let stored = env.store.get_repo("podinfo").await.unwrap().unwrap();
    assert_eq!(stored.status.hashes.len(), 1);
    assert_eq!(stored.status.hashes[0].name, "aaa111");
    assert!(stored.status.last_sync.is_some());

    let hash = env.store.get_hash("aaa111").await.unwrap().unwrap();
    assert_eq!(hash.spec.gitrepo, "podinfo");
    assert_eq!(hash.spec.operations[0].reference_title, "main");

    let report = env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert!(report.warnings.is_empty());

    let doc = env
        .store
        .get_object(&object("ConfigMap", "default", "settings"))
        .await
        .unwrap()
        .expect("config map applied");
    assert_eq!(doc.controller().unwrap().name, "aaa111");

    let hash = env.store.get_hash("aaa111").await.unwrap().unwrap();
    assert_eq!(hash.status.objects.len(), 1);
    assert!(!hash.status.objects[0].uid.is_empty());

    let messages: Vec<String> = env
        .recorder
        .with_reason("created")
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert!(messages.contains(&"Repo podinfo hash aaa111".to_string()));
    assert!(messages
        .iter()
        .any(|m| m == "Created Kind:ConfigMap Named:settings in Namespace:default"));
}

#[tokio::test]
async fn test_branch_move_replaces_build_unit() {
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

    env.repos.reconcile("podinfo").await.unwrap();
    env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(env.store.object_count(), 1);

    env.lister.set(URI, &[("refs/heads/main", "ccc333")]);
    let report = env.repos.reconcile("podinfo").await.unwrap();
    assert_eq!(report.created, vec!["ccc333".to_string()]);
    assert_eq!(report.deleted, vec!["aaa111".to_string()]);

    // Deleting the old unit takes its objects with it.
    assert!(env.store.get_hash("aaa111").await.unwrap().is_none());
    assert_eq!(env.store.object_count(), 0);

    env.pipeline.reconcile("ccc333").await.unwrap();
    let doc = env
        .store
        .get_object(&object("ConfigMap", "default", "settings"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.controller().unwrap().name, "ccc333");
}

#[tokio::test]
async fn test_highest_tag_with_namespace_and_image_transforms() {
    let env = Env::new();
    env.lister.set(
        URI,
        &[
            ("refs/tags/v1.1.0", "aaa111"),
            ("refs/tags/v1.1.10", "bbb222"),
            ("refs/tags/v1.1.9", "ccc333"),
            ("refs/tags/v1.2.0", "ddd444"),
        ],
    );
    env.builder
        .set("./app", &deployment("podinfo", "ghcr.io/example/podinfo:latest"));

    let op = Operation::new("release", OpType::HighestTag, r"v1\.1\.[0-9]+", "./app")
        .with_hash_path()
        .with_transformer(Transformer::new(TransformerType::Namespace, "tag"))
        .with_transformer(
            Transformer::new(TransformerType::Images, "tag").with_key("ghcr.io/example/podinfo"),
        )
        .with_transformer(
            Transformer::new(TransformerType::Labels, "hash").with_key("slipway/commit"),
        );
    env.store.apply_repo(&repo("podinfo", vec![op])).await.unwrap();

    let report = env.repos.reconcile("podinfo").await.unwrap();
    assert_eq!(report.created, vec!["bbb222".to_string()]);

    let report = env.pipeline.reconcile("bbb222").await.unwrap();
    assert_eq!(env.builder.calls(), vec!["./app?ref=bbb222".to_string()]);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.applied[0].kind, "Namespace");
    assert_eq!(report.applied[0].name, "v1.1.10");

    let doc = env
        .store
        .get_object(&object("Deployment", "v1.1.10", "podinfo"))
        .await
        .unwrap()
        .expect("deployment applied in the tag namespace");
    let value = doc.value();
    assert_eq!(
        value["spec"]["template"]["spec"]["containers"][0]["image"],
        "ghcr.io/example/podinfo:v1.1.10"
    );
    assert_eq!(value["metadata"]["labels"]["slipway/commit"], "bbb222");
    assert_eq!(
        value["spec"]["template"]["metadata"]["labels"]["slipway/commit"],
        "bbb222"
    );

    assert!(env
        .store
        .get_object(&object("Namespace", "", "v1.1.10"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_weighted_operations_share_a_commit() {
    let env = Env::new();
    env.lister.set(
        URI,
        &[("refs/heads/main", "aaa111"), ("refs/tags/v2.0.0", "aaa111")],
    );
    env.builder.set("./crds", &config_map("crds"));
    env.builder.set("./app", &config_map("app"));

    let ops = vec![
        Operation::new("app", OpType::Tag, "v.*", "./app").with_weight(10),
        Operation::new("crds", OpType::Branch, "main", "./crds").with_weight(-5),
    ];
    env.store.apply_repo(&repo("podinfo", ops)).await.unwrap();

    env.repos.reconcile("podinfo").await.unwrap();
    let hash = env.store.get_hash("aaa111").await.unwrap().unwrap();
    assert_eq!(hash.spec.operations.len(), 2);

    env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(
        env.builder.calls(),
        vec!["./crds".to_string(), "./app".to_string()]
    );
}

#[tokio::test]
async fn test_rendered_manifests_are_archived() {
    let env = Env::new();
    env.lister.set(URI, &[("refs/pull/12/merge", "eee555")]);
    env.builder.set("./preview", &config_map("preview"));

    let op = Operation::new("preview", OpType::Pull, "", "./preview")
        .with_transformer(Transformer::new(TransformerType::Prefix, "pull"));
    env.store.apply_repo(&repo("podinfo", vec![op])).await.unwrap();

    env.repos.reconcile("podinfo").await.unwrap();
    env.pipeline.reconcile("eee555").await.unwrap();
    assert!(env
        .store
        .get_object(&object("ConfigMap", "default", "pull-12-preview"))
        .await
        .unwrap()
        .is_some());

    env.archive.close();
    let saved = env.sinks.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].bucket, "builds");
    assert_eq!(saved[0].hash, "eee555");
    assert_eq!(saved[0].operation, "preview");
    let payload = String::from_utf8(saved[0].payload.clone()).unwrap();
    assert!(payload.contains("pull-12-preview"));
    // Archived as built and transformed, without store-side ownership or defaults.
    assert!(!payload.contains("ownerReferences"));
    assert!(!payload.contains("namespace"));
    assert_eq!(env.archive.stats().saved, 1);
}

#[tokio::test]
async fn test_removed_document_is_reaped() {
    let env = Env::new();
    env.lister.set(URI, &[("refs/heads/main", "aaa111")]);
    env.builder.set(
        "./deploy",
        &format!("{}---\n{}", config_map("one"), config_map("two")),
    );
    env.store
        .apply_repo(&repo(
            "podinfo",
            vec![Operation::new("deploy", OpType::Branch, "main", "./deploy")],
        ))
        .await
        .unwrap();

    env.repos.reconcile("podinfo").await.unwrap();
    env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(env.store.object_count(), 2);

    env.builder.set("./deploy", &config_map("one"));
    let report = env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(report.reaped.len(), 1);
    assert_eq!(report.reaped[0].name, "two");
    assert_eq!(env.store.object_count(), 1);

    let deleted = env.recorder.with_reason("deleted");
    assert_eq!(
        deleted[0].message,
        "Deleted Kind:ConfigMap Named:two in Namespace:default"
    );
}

#[tokio::test]
async fn test_full_queue_does_not_fail_the_run() {
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
    env.repos.reconcile("podinfo").await.unwrap();

    // A closed queue rejects like a full one would.
    env.archive.close();
    let report = env.pipeline.reconcile("aaa111").await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(env.sinks.saved().is_empty());
}

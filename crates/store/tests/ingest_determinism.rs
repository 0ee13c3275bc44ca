#![forbid(unsafe_code)]

use pipedash_core::CollectionKey;
use pipedash_store::{forward, spawn_ingest, Collection, LiveCollection};

fn event(op: &str, uid: &str, name: &str, ns: &str, rv: u64) -> String {
    serde_json::json!({
        "operation": op,
        "resource": {
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": { "name": name, "namespace": ns, "uid": uid, "resourceVersion": rv.to_string() }
        }
    })
    .to_string()
}

async fn run_sequence(seq: &[String]) -> Vec<(String, String, String)> {
    let live = LiveCollection::new(Collection::new(CollectionKey::new("tekton.dev", "v1", "PipelineRun")));
    let (tx, task) = spawn_ingest(&live, 128);
    let sent = forward(futures::stream::iter(seq.to_vec()), &tx).await;
    assert_eq!(sent, seq.len());
    drop(tx);
    // closing the channel drains and stops the loop
    task.await.unwrap();
    let snap = live.current();
    let mut canon: Vec<(String, String, String)> = snap
        .items
        .iter()
        .map(|o| (o.namespace().unwrap_or("").to_string(), o.name().to_string(), o.uid().unwrap_or("").to_string()))
        .collect();
    canon.sort_unstable();
    canon
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deterministic_across_runs() {
    let seq = vec![
        // initial creates across namespaces
        event("created", "u1", "a", "ns1", 1),
        event("created", "u2", "b", "ns2", 2),
        event("created", "u3", "c", "ns3", 3),
        // update, then a stale duplicate
        event("updated", "u2", "bb", "ns2", 5),
        event("updated", "u2", "b-old", "ns2", 4),
        // garbage and unknown operations are dropped
        "{oops".to_string(),
        event("patched", "u1", "zz", "ns1", 9),
        // delete one
        event("deleted", "u3", "c", "ns3", 6),
        event("created", "u4", "d", "prod", 7),
    ];

    let c1 = run_sequence(&seq).await;
    let c2 = run_sequence(&seq).await;
    assert_eq!(c1, c2, "canonical collection view must be deterministic across runs");
    assert_eq!(
        c1,
        vec![
            ("ns1".to_string(), "a".to_string(), "u1".to_string()),
            ("ns2".to_string(), "bb".to_string(), "u2".to_string()),
            ("prod".to_string(), "d".to_string(), "u4".to_string()),
        ]
    );
}

#[tokio::test]
async fn epoch_watch_sees_ingested_batches() {
    let live = LiveCollection::new(Collection::new(CollectionKey::new("tekton.dev", "v1", "TaskRun")));
    let mut rx = live.subscribe_epoch();
    let (tx, task) = spawn_ingest(&live, 16);
    tx.send(event("created", "u1", "a", "ns", 1)).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
    assert!(*rx.borrow() >= 1);
    drop(tx);
    task.await.unwrap();
    assert_eq!(live.current().items.len(), 1);
    assert_eq!(live.current().metadata.resource_version.as_deref(), Some("1"));
}

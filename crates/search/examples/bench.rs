use pipedash_core::{ObjectMeta, Resource};
use pipedash_search::filter_resources;
use std::collections::BTreeMap;
use std::time::Instant;

fn gen_run(i: usize) -> Resource {
    let env = match i % 3 {
        0 => "prod",
        1 => "staging",
        _ => "dev",
    };
    let labels: BTreeMap<String, String> = [
        ("env".to_string(), env.to_string()),
        (format!("team{}", i % 20), "1".to_string()),
        ("tekton.dev/pipeline".to_string(), format!("pipeline-{}", i % 50)),
    ]
    .into_iter()
    .collect();
    Resource {
        api_version: "tekton.dev/v1".into(),
        kind: "PipelineRun".into(),
        metadata: ObjectMeta {
            name: Some(format!("build-{}-pr-{i:06}", i % 7)),
            namespace: Some(format!("ns{}", i % 10)),
            uid: Some(format!("uid-{i}")),
            labels: Some(labels),
            ..Default::default()
        },
        spec: serde_json::json!({
            "pipelineRef": { "name": format!("pipeline-{}", i % 50) },
            "params": [ { "name": "revision", "value": format!("rev-{}", i % 1000) } ]
        }),
        status: serde_json::json!({
            "conditions": [ { "reason": if i % 5 == 0 { "Failed" } else { "Succeeded" }, "message": "done" } ]
        }),
    }
}

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn main() {
    let n: usize = std::env::var("PIPEDASH_BENCH_DOCS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(20_000);

    eprintln!("building collection: {} runs", n);
    let t0 = Instant::now();
    let items: Vec<Resource> = (0..n).map(gen_run).collect();
    let build_ms = t0.elapsed().as_secs_f64() * 1_000.0;

    let name_hits: Vec<String> = (0..20).map(|i| format!("pr-{:06}", i * 7)).collect();
    let field_hits: Vec<String> = (0..20).map(|i| format!("rev-{}", i)).collect();
    let negated: Vec<String> = (0..7).map(|i| format!("build -build-{}", i)).collect();
    let labels: Vec<String> = ["env=prod", "env:staging", "team3", "failed"].iter().map(|s| s.to_string()).collect();

    let run = |label: &str, qs: &[String]| {
        let mut times: Vec<u128> = Vec::with_capacity(qs.len());
        let mut matched = 0usize;
        for q in qs {
            let t = Instant::now();
            matched += filter_resources(&items, q).len();
            times.push(t.elapsed().as_micros());
        }
        let p50 = percentile_us(&mut times.clone(), 0.50) as f64 / 1000.0;
        let p99 = percentile_us(&mut times, 0.99) as f64 / 1000.0;
        println!("{}: p50={:.3}ms p99={:.3}ms ({} queries, {} matched)", label, p50, p99, qs.len(), matched);
    };

    println!("collection_build: {:.1}ms docs={}", build_ms, n);
    run("name", &name_hits);
    run("fields", &field_hits);
    run("negated", &negated);
    run("labels", &labels);
}

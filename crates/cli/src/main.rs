#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use metrics::histogram;
use pipedash_core::{CollectionKey, ListMeta, Resource};
use pipedash_search::{classify, name_index, FilterPolicy, QueryKind};
use pipedash_store::{forward, spawn_ingest, Collection, LiveCollection};
use pipedash_view::{CollectionView, FilePageState, FilteredList, QueryChannel, Settings};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pipedashctl", version, about = "Filter pipeline resource lists the way the dashboard does")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Filter a saved list (JSON or YAML) with a free-text query
    Filter {
        /// List file: `{items: [...]}` or a bare array
        file: PathBuf,
        /// Query; when omitted the last published query is reused
        query: Option<String>,
        /// Collection key, e.g. "tekton.dev/v1/PipelineRun" (default: from the first item)
        #[arg(long = "gvk")]
        gvk: Option<String>,
    },
    /// Tell whether input is a label selector or free text
    Classify { input: String },
    /// Show how a resource name is decomposed for matching
    Tokens { name: String },
    /// Replay a JSONL file of update events over a list and print the filtered result
    Replay {
        file: PathBuf,
        events: PathBuf,
        #[arg(long = "query")]
        query: Option<String>,
        #[arg(long = "gvk")]
        gvk: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("PIPEDASH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PIPEDASH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PIPEDASH_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListDoc {
    List {
        items: Vec<Resource>,
        #[serde(default)]
        metadata: ListMeta,
    },
    Bare(Vec<Resource>),
}

fn load_list(path: &Path) -> Result<(Vec<Resource>, ListMeta)> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc: ListDoc = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(json_err) => {
            debug!(error = %json_err, "not JSON; trying YAML");
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {} as a JSON or YAML list", path.display()))?
        }
    };
    Ok(match doc {
        ListDoc::List { items, metadata } => (items, metadata),
        ListDoc::Bare(items) => (items, ListMeta::default()),
    })
}

fn collection_key(gvk: Option<&str>, items: &[Resource]) -> Result<CollectionKey> {
    match gvk {
        Some(k) => CollectionKey::parse(k).with_context(|| format!("invalid --gvk {k:?}")),
        None => Ok(items.iter().find_map(CollectionKey::for_resource).unwrap_or_default()),
    }
}

fn page_channel(settings: &Settings) -> QueryChannel {
    QueryChannel::new(Arc::new(FilePageState::new(settings.state_path.clone())))
}

fn render_age(r: &Resource) -> String {
    let Some(created) = r.metadata.creation_timestamp.as_ref() else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now() - created.0).num_seconds().max(0);
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

fn print_list(output: Output, list: &FilteredList) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<20} {:<48} AGE", "NAMESPACE", "NAME");
            for r in list.items.iter() {
                println!("{:<20} {:<48} {}", r.namespace().unwrap_or("-"), r.name(), render_age(r));
            }
        }
        Output::Json => {
            let doc = serde_json::json!({ "metadata": list.metadata, "items": list.items });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

fn open_view(live: &LiveCollection, channel: &QueryChannel, query: Option<String>) -> CollectionView {
    if let Some(q) = query {
        channel.publish(q.trim().to_string());
    }
    CollectionView::open(live.clone(), channel, &FilterPolicy::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Filter { file, query, gvk } => {
            let t0 = Instant::now();
            let (items, metadata) = load_list(&file)?;
            let key = collection_key(gvk.as_deref(), &items)?;
            info!(key = %key, items = items.len(), "filter invoked");
            let live = LiveCollection::new(Collection::from_list(key, items, metadata));
            let channel = page_channel(&settings);
            let view = open_view(&live, &channel, query);
            if !view.is_filterable() {
                info!(key = %view.key(), "collection is not text-filtered; showing everything");
            }
            let list = view.list();
            view.close();
            histogram!("cli_filter_ms", t0.elapsed().as_secs_f64() * 1000.0);
            print_list(cli.output, &list)?;
        }
        Commands::Classify { input } => {
            let kind = classify(&input);
            match cli.output {
                Output::Human => match &kind {
                    QueryKind::Empty => println!("empty"),
                    QueryKind::FreeText(q) => println!("free text: {}", q),
                    QueryKind::LabelSelector(pairs) => {
                        let shown: Vec<String> = pairs.iter().map(ToString::to_string).collect();
                        println!("label selector: {}", shown.join(","));
                    }
                },
                Output::Json => {
                    let doc = match &kind {
                        QueryKind::Empty => serde_json::json!({ "kind": "empty" }),
                        QueryKind::FreeText(q) => serde_json::json!({ "kind": "freeText", "query": q }),
                        QueryKind::LabelSelector(pairs) => {
                            let pairs: Vec<serde_json::Value> = pairs
                                .iter()
                                .map(|p| serde_json::json!({ "key": p.key, "value": p.value }))
                                .collect();
                            serde_json::json!({ "kind": "labelSelector", "pairs": pairs })
                        }
                    };
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
        }
        Commands::Tokens { name } => {
            let idx = name_index(Some(&name));
            match cli.output {
                Output::Human => {
                    println!("raw:    {}", idx.raw);
                    println!("parts:  {}", idx.parts.join(" "));
                    println!("joined: {}", idx.joined);
                }
                Output::Json => {
                    let doc = serde_json::json!({ "raw": idx.raw, "parts": idx.parts.to_vec(), "joined": idx.joined });
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
            }
        }
        Commands::Replay { file, events, query, gvk } => {
            let t0 = Instant::now();
            let (items, metadata) = load_list(&file)?;
            let key = collection_key(gvk.as_deref(), &items)?;
            let raw = std::fs::read_to_string(&events).with_context(|| format!("reading {}", events.display()))?;
            let lines: Vec<String> =
                raw.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
            info!(key = %key, items = items.len(), events = lines.len(), "replay invoked");

            let live = LiveCollection::new(Collection::from_list(key, items, metadata));
            let channel = QueryChannel::detached();
            let view = open_view(&live, &channel, query);
            let (tx, ingest) = spawn_ingest(&live, settings.queue_cap);
            let sent = forward(futures::stream::iter(lines), &tx).await;
            drop(tx);
            ingest.await.context("ingest task failed")?;

            info!(sent, epoch = live.epoch(), passes = view.passes(), took_ms = %t0.elapsed().as_millis(), "replay done");
            let list = view.list();
            view.close();
            print_list(cli.output, &list)?;
        }
    }
    Ok(())
}

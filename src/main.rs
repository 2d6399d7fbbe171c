// Minimal maintenance CLI over a single index file: build from a JSONL
// record dump, rebuild in place, inspect its structural metrics, or
// verify its on-disk invariants. Everything beyond this (the primary
// record store, a query planner, a network-facing API) is out of
// scope for this crate; this binary exists only so the engine has some
// operable surface at all.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use branchindex::io::{BinaryReader, BinaryWriter, ReadSource, WriteSink};
use branchindex::{
    pipeline, ChildNode, IndexEngineConfig, IndexHeader, IndexSpec, IndexType, PrimaryStore,
    TypedValue,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs::OpenOptions;

#[derive(Parser)]
#[command(name = "branchindex", about = "Maintenance CLI for a BranchIndex secondary index file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliIndexType {
    Normal,
    Array,
    Fulltext,
    Geo,
}

impl From<CliIndexType> for IndexType {
    fn from(t: CliIndexType) -> Self {
        match t {
            CliIndexType::Normal => IndexType::Normal,
            CliIndexType::Array => IndexType::Array,
            CliIndexType::Fulltext => IndexType::FullText,
            CliIndexType::Geo => IndexType::Geo,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build a fresh index file from a JSONL record dump.
    Build {
        /// Path to the JSONL file of `{"path": "...", "value": ...}` records.
        #[arg(long)]
        data: PathBuf,
        /// Output index file.
        #[arg(long)]
        out: PathBuf,
        /// Index path pattern, e.g. "songs" or "users/*/posts".
        #[arg(long)]
        path: String,
        /// Field name to index, or "{key}" to index the child's own name.
        #[arg(long)]
        key: String,
        #[arg(long, value_enum, default_value = "normal")]
        index_type: CliIndexType,
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        #[arg(long, default_value_t = false)]
        case_insensitive: bool,
    },
    /// Rebuild an existing index file in place, reclaiming fragmented space.
    Rebuild {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print the header and tree structure metrics for an index file.
    Inspect {
        #[arg(long)]
        file: PathBuf,
    },
    /// Check an index file's on-disk invariants (ordering, header/tree
    /// consistency).
    Verify {
        #[arg(long)]
        file: PathBuf,
    },
}

/// A flat, in-memory `PrimaryStore` populated from a JSONL dump of
/// `{"path": "a/b/c", "value": <json>}` lines, used only so `build` has
/// something to enumerate against — not a stand-in for a real primary
/// store.
struct JsonlStore {
    children: HashMap<String, Vec<ChildNode>>,
    values: HashMap<String, TypedValue>,
}

fn json_to_typed(value: &serde_json::Value) -> TypedValue {
    match value {
        serde_json::Value::Null => TypedValue::Undefined,
        serde_json::Value::Bool(b) => TypedValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                TypedValue::Int(i)
            } else {
                TypedValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => TypedValue::String(s.clone()),
        serde_json::Value::Array(items) => TypedValue::Array(items.iter().map(json_to_typed).collect()),
        serde_json::Value::Object(_) => TypedValue::Undefined,
    }
}

impl JsonlStore {
    fn load(path: &PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut children: HashMap<String, Vec<ChildNode>> = HashMap::new();
        let mut values: HashMap<String, TypedValue> = HashMap::new();
        let mut seen_children: HashMap<String, std::collections::HashSet<String>> = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: serde_json::Value = serde_json::from_str(line).context("parsing JSONL line")?;
            let path = record.get("path").and_then(|v| v.as_str()).context("record missing \"path\"")?.to_string();
            let value = record.get("value").cloned().unwrap_or(serde_json::Value::Null);
            let typed = json_to_typed(&value);

            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let mut prefix = String::new();
            for seg in &segments {
                let child_set = seen_children.entry(prefix.clone()).or_default();
                if child_set.insert((*seg).to_string()) {
                    children.entry(prefix.clone()).or_default().push(ChildNode {
                        key: (*seg).to_string(),
                        value: TypedValue::Undefined,
                    });
                }
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(seg);
            }
            values.insert(path, typed);
        }

        Ok(Self { children, values })
    }
}

#[async_trait]
impl PrimaryStore for JsonlStore {
    async fn get_children(&self, path: &str, key_filter: Option<&str>) -> branchindex::Result<Vec<ChildNode>> {
        let all = self.children.get(path).cloned().unwrap_or_default();
        Ok(match key_filter {
            Some(k) => all.into_iter().filter(|c| c.key == k).collect(),
            None => all,
        })
    }

    async fn get_value(&self, path: &str) -> branchindex::Result<TypedValue> {
        Ok(self.values.get(path).cloned().unwrap_or(TypedValue::Undefined))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    branchindex::init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Build { data, out, path, key, index_type, include, case_insensitive } => {
            run_build(data, out, path, key, index_type, include, case_insensitive).await
        }
        Command::Rebuild { file } => run_rebuild(file).await,
        Command::Inspect { file } => run_inspect(file).await,
        Command::Verify { file } => run_verify(file).await,
    }
}

async fn run_build(
    data: PathBuf,
    out: PathBuf,
    path: String,
    key: String,
    index_type: CliIndexType,
    include: Vec<String>,
    case_insensitive: bool,
) -> Result<()> {
    let store = JsonlStore::load(&data)?;
    let spec = IndexSpec {
        path,
        key,
        include_keys: include,
        case_sensitive: !case_insensitive,
        locale: "en".into(),
        index_type: index_type.into(),
    };
    let cfg = IndexEngineConfig::default();
    let metadata_count = spec.metadata_keys().len();
    let tree = pipeline::run_build(&store, &spec, &cfg, metadata_count).await?;

    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&out).await?;
    let mut sink = BinaryWriter::create(file).await?;
    let header = IndexHeader {
        index_info: vec![
            ("path".into(), TypedValue::String(spec.path.clone())),
            ("key".into(), TypedValue::String(spec.key.clone())),
        ],
        trees: vec![branchindex::TreeDescriptor {
            tree_name: "default".into(),
            file_index: 0,
            byte_length: 0,
            tree_info: vec![("root_offset".into(), TypedValue::Int(tree.root_offset() as i64))],
        }],
    };
    header.write_to(&mut sink).await?;
    let region = tree.region();
    let region_len = region.len() as u32;
    sink.append(region).await?;
    branchindex::envelope::patch_tree_byte_length(&mut sink, header, "default", region_len).await?;

    println!("built {} entries into {}", tree.entry_count(), out.display());
    Ok(())
}

async fn load_tree(file: &PathBuf) -> Result<(IndexHeader, branchindex::BPlusTree)> {
    let f = OpenOptions::new().read(true).open(file).await.with_context(|| format!("opening {}", file.display()))?;
    let mut src = BinaryReader::new(f);
    let (header, header_length) = IndexHeader::read_from(&mut src).await?;
    let Some(descriptor) = header.trees.first() else {
        bail!("index file has no tree descriptors");
    };

    let f2 = OpenOptions::new().read(true).open(file).await?;
    let mut raw = BinaryReader::new(f2);
    raw.go(0).await.ok();
    let whole = raw.get(header_length as usize + descriptor.byte_length as usize).await?;
    let region = whole[header_length as usize..].to_vec();
    let root_offset = descriptor
        .tree_info
        .iter()
        .find(|(k, _)| k == "root_offset")
        .and_then(|(_, v)| match v {
            TypedValue::Int(n) => Some(*n as u64),
            _ => None,
        })
        .unwrap_or(0);

    let tree = branchindex::BPlusTree::load(region, root_offset, IndexEngineConfig::default(), 0, true);
    Ok((header, tree))
}

async fn run_rebuild(file: PathBuf) -> Result<()> {
    let (mut header, mut tree) = load_tree(&file).await?;
    tree.rebuild();

    let f = OpenOptions::new().write(true).truncate(true).open(&file).await?;
    let mut sink = BinaryWriter::create(f).await?;
    let header_length = header.write_to(&mut sink).await?;
    let region = tree.region();
    sink.append(region).await?;
    if let Some(t) = header.trees.first_mut() {
        t.byte_length = region.len() as u32;
        if let Some(entry) = t.tree_info.iter_mut().find(|(k, _)| k == "root_offset") {
            entry.1 = TypedValue::Int(tree.root_offset() as i64);
        } else {
            t.tree_info.push(("root_offset".into(), TypedValue::Int(tree.root_offset() as i64)));
        }
    }
    let bytes = header.encode();
    sink.write_at(&bytes, 0).await?;

    println!("rebuilt {} ({} entries, header {} bytes)", file.display(), tree.entry_count(), header_length);
    Ok(())
}

async fn run_inspect(file: PathBuf) -> Result<()> {
    let (header, tree) = load_tree(&file).await?;
    let metrics = branchindex::metrics::tree_metrics::analyze(&tree);
    println!("index_info: {:?}", header.index_info);
    println!("trees: {:?}", header.trees);
    println!("{metrics:#?}");
    Ok(())
}

async fn run_verify(file: PathBuf) -> Result<()> {
    let (header, tree) = load_tree(&file).await?;
    let matches = tree.all_matches(true)?;
    for w in matches.windows(2) {
        if branchindex::types::compare_keys(&w[0].key, &w[1].key, true) == std::cmp::Ordering::Greater {
            bail!("leaf chain is not in ascending order");
        }
    }
    if header.trees.is_empty() {
        bail!("header declares no trees");
    }
    println!("ok: {} entries, {} leaves, depth {}", matches.len(), tree.leaf_count(), tree.depth());
    Ok(())
}

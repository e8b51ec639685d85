use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vptree_core::config;
use vptree_core::{Database, DistanceMetric, FeatureVector, IndexConfig, SimilarityIndex};

#[derive(Parser)]
#[command(name = "vptree", about = "Persistent vantage-point tree index")]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialise a new database at the specified path and write the root node
    Init {
        /// Database directory (must not exist or be empty)
        path: PathBuf,

        /// Number of components per feature vector
        #[arg(short, long, default_value_t = config::DEFAULT_DIMENSION)]
        dimension: usize,

        /// Bucket holding the tree
        #[arg(short, long, default_value = config::DEFAULT_BUCKET)]
        bucket: String,

        /// Distance metric, fixed for the lifetime of the index
        #[arg(short, long, default_value = "complexity-corrected")]
        metric: DistanceMetric,
    },
    /// Insert feature vectors and print the assigned ids
    Insert {
        /// Database directory
        path: PathBuf,

        /// Comma-separated vectors, e.g. 0.1,0.2,0.7
        vectors: Vec<String>,

        /// Read one comma-separated vector per line from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Bucket holding the tree
        #[arg(short, long, default_value = config::DEFAULT_BUCKET)]
        bucket: String,
    },
    /// Print a node as JSON
    Get {
        /// Database directory
        path: PathBuf,

        /// Node id (0 = root)
        id: u64,

        /// Bucket holding the tree
        #[arg(short, long, default_value = config::DEFAULT_BUCKET)]
        bucket: String,
    },
    /// Validate the tree structure and print its shape
    Check {
        /// Database directory
        path: PathBuf,

        /// Bucket holding the tree
        #[arg(short, long, default_value = config::DEFAULT_BUCKET)]
        bucket: String,
    },
    /// Write a snapshot and truncate the write-ahead log
    Checkpoint {
        /// Database directory
        path: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.json);

    if let Err(e) = run(args.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vptree_core=info,vptree=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init {
            path,
            dimension,
            bucket,
            metric,
        } => {
            let config = IndexConfig {
                dimension,
                bucket,
                metric,
            };
            config.validate()?;
            let db = Database::create(&path)?;
            let index = SimilarityIndex::bootstrap(db, config)?;
            tracing::info!("Initialised {}", path.display());
            index.close()?;
        }
        Command::Insert {
            path,
            vectors,
            file,
            bucket,
        } => {
            let mut inputs = Vec::new();
            for (n, raw) in vectors.iter().enumerate() {
                inputs.push(parse_vector(raw).map_err(|e| format!("argument {}: {}", n + 1, e))?);
            }
            if let Some(file) = file {
                inputs.extend(read_vectors(&file)?);
            }
            if inputs.is_empty() {
                return Err("no vectors given".into());
            }

            let index = open_index(&path, &bucket)?;
            for vector in inputs {
                let id = index.insert(vector)?;
                println!("{}", id);
            }
            index.close()?;
        }
        Command::Get { path, id, bucket } => {
            let index = open_index(&path, &bucket)?;
            let node = index.get(id)?;
            println!("{}", serde_json::to_string_pretty(&node)?);
            index.close()?;
        }
        Command::Check { path, bucket } => {
            let index = open_index(&path, &bucket)?;
            let stats = index.validate()?;
            println!(
                "ok: {} nodes, {} leaves, max depth {}",
                stats.nodes, stats.leaves, stats.max_depth
            );
            index.close()?;
        }
        Command::Checkpoint { path } => {
            let db = open_database(&path)?;
            db.checkpoint()?;
            db.close()?;
        }
    }
    Ok(())
}

fn open_database(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    if !Database::exists(path) {
        return Err(format!("no database at '{}' (run `vptree init` first)", path.display()).into());
    }
    Ok(Database::open(path)?)
}

fn open_index(path: &Path, bucket: &str) -> Result<SimilarityIndex, Box<dyn std::error::Error>> {
    let db = open_database(path)?;
    Ok(SimilarityIndex::open(db, bucket)?)
}

/// Parse `0.1,0.2,0.7` (whitespace around components is ignored).
fn parse_vector(raw: &str) -> Result<FeatureVector, String> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<f64>()
                .map_err(|e| format!("invalid component '{}': {}", part, e))
        })
        .collect()
}

/// Read one vector per non-empty line; lines starting with `#` are skipped.
fn read_vectors(path: &Path) -> Result<Vec<FeatureVector>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let mut vectors = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let vector =
            parse_vector(line).map_err(|e| format!("{}:{}: {}", path.display(), n + 1, e))?;
        vectors.push(vector);
    }
    Ok(vectors)
}

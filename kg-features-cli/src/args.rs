//! Command-line arguments

use clap::{Args, Parser, Subcommand, ValueEnum};
use kg_features::Split;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kg-features")]
#[command(about = "Query a knowledge-graph dataset and its trained embeddings")]
#[command(version)]
pub struct Cli {
    /// Dataset directory (falls back to KG_FEATURES_DATA, then ./data)
    #[arg(long, short, global = true)]
    pub data: Option<PathBuf>,

    /// Debug mode: at most 1000 examples per query
    #[arg(long, global = true)]
    pub debug: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the scoring-space shape: entities, relations (with inverses), entities
    Shape,

    /// Print the triples of a split, one tab-separated row per line
    Examples {
        /// train, valid or test
        split: Split,

        /// Keep only rows with this relation id
        #[arg(long)]
        relation: Option<i64>,

        /// Print at most this many rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Resolve an entity URI to its id, or an id to its URI
    Entity(Lookup),

    /// Resolve a relation URI to its id, or an id to its URI
    Relation(Lookup),

    /// Print an embedding vector as JSON
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Which embedding to read
        #[arg(long, value_enum, default_value_t = EmbeddingKind::Lhs)]
        kind: EmbeddingKind,

        /// Entity or relation URI (without brackets or prefix)
        uri: String,
    },

    /// Print the trilinear score of a triple
    Similarity {
        #[command(flatten)]
        model: ModelArgs,

        head: String,
        relation: String,
        tail: String,
    },
}

/// Exactly one of `--name` / `--id`
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Lookup {
    /// Bracketed URI as stored in the id map, e.g. `<http://ex.org/a>`
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub id: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// JSON export of the trained embedding tables
    #[arg(long, short)]
    pub model: PathBuf,

    /// Namespace prepended to every URI
    #[arg(long, default_value = "")]
    pub prefix: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    /// Entity in subject position
    Lhs,
    /// Entity in object position
    Rhs,
    /// Relation
    Relation,
    /// Role-independent entity embedding
    Global,
}

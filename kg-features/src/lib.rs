//! Knowledge-graph features
//!
//! Loads a pre-processed knowledge-graph dataset (integer triples plus URI id
//! maps) and exposes the embeddings of a trained KGE model by URI.
//!
//! ## Features
//!
//! - **Dataset loading** - train/valid/test triples, `to_skip` filters, entity and relation id maps
//! - **Reciprocal training edges** - train examples are mirrored onto inverse relations
//! - **Embedding queries** - bias-scaled entity vectors, relation vectors, trilinear similarity
//!
//! ## Example
//!
//! ```ignore
//! use kg_features::{EmbeddingExtractor, EmbeddingTable, KgDataset, Split};
//!
//! let dataset = KgDataset::open("data/wn18rr", false)?;
//! let train = dataset.get_examples(Split::Train, None)?;
//!
//! let model = EmbeddingTable::from_json_file(Path::new("model.json"))?;
//! let extractor = EmbeddingExtractor::with_prefix(&dataset, &model, "http://ex.org/");
//! let score = extractor.similarity("alice", "knows", "bob")?;
//! ```

pub mod array_pickle;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod id_map;
pub mod model;
pub mod split;

// Re-exports for convenience
pub use config::{find_data_path, DatasetConfig, DATA_PATH_ENV, DEBUG_EXAMPLE_LIMIT};
pub use dataset::{DatasetShape, KgDataset};
pub use error::{FeatureError, Result};
pub use extractor::EmbeddingExtractor;
pub use id_map::IdMap;
pub use model::{BiasSide, EmbeddingTable, KgeModel};
pub use split::Split;

//! Embedding queries by URI
//!
//! Resolves URIs through the dataset's id maps and reads vectors from a
//! trained model. Entity ids in the maps are bracketed (`<http://...>`), so
//! every lookup goes through [`EmbeddingExtractor::namespaced_uri`].

use crate::dataset::KgDataset;
use crate::error::{FeatureError, Result};
use crate::model::{BiasSide, KgeModel};
use ndarray::Array1;

/// Stateless embedding facade over a dataset and a model
pub struct EmbeddingExtractor<'a, M: KgeModel> {
    dataset: &'a KgDataset,
    model: &'a M,
    prefix: String,
}

impl<'a, M: KgeModel> EmbeddingExtractor<'a, M> {
    /// Create an extractor with no namespace prefix
    pub fn new(dataset: &'a KgDataset, model: &'a M) -> Self {
        Self::with_prefix(dataset, model, "")
    }

    /// Create an extractor that prepends `prefix` to every URI
    pub fn with_prefix(dataset: &'a KgDataset, model: &'a M, prefix: impl Into<String>) -> Self {
        Self {
            dataset,
            model,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `uri` as it appears in the id maps: `<prefix + uri>`
    pub fn namespaced_uri(&self, uri: &str) -> String {
        format!("<{}{}>", self.prefix, uri)
    }

    /// Single embedding per entity, independent of its role
    ///
    /// Left and right embeddings carry different biases and no rule for
    /// merging them (concatenation, averaging, ...) has been chosen, so this
    /// always fails with [`FeatureError::Unsupported`].
    pub fn global_entity_embedding(&self, uri: &str) -> Result<Array1<f32>> {
        Err(FeatureError::unsupported(format!(
            "global embedding for {}: no rule for combining left and right embeddings",
            self.namespaced_uri(uri)
        )))
    }

    fn entity_embedding(&self, uri: &str, side: BiasSide) -> Result<Array1<f32>> {
        let id = self.dataset.get_node_id_from_name(&self.namespaced_uri(uri))?;
        let (embedding, bias) = self.model.get_entity_embedding(id, side)?;
        log::debug!("{} embedding for {} (id {}, bias {})", side, uri, id, bias);
        Ok(embedding * bias)
    }

    /// Entity embedding scaled by its subject-position bias
    pub fn left_hand_side_entity_embedding(&self, uri: &str) -> Result<Array1<f32>> {
        self.entity_embedding(uri, BiasSide::Left)
    }

    /// Entity embedding scaled by its object-position bias
    pub fn right_hand_side_entity_embedding(&self, uri: &str) -> Result<Array1<f32>> {
        self.entity_embedding(uri, BiasSide::Right)
    }

    pub fn relation_embedding(&self, uri: &str) -> Result<Array1<f32>> {
        let id = self.dataset.get_rel_id_from_name(&self.namespaced_uri(uri))?;
        self.model.get_relation_embedding(id)
    }

    /// Trilinear score `sum(lhs * rel * rhs)` of a triple
    pub fn similarity(&self, uri_head: &str, uri_relation: &str, uri_tail: &str) -> Result<f32> {
        let lhs = self.left_hand_side_entity_embedding(uri_head)?;
        let rhs = self.right_hand_side_entity_embedding(uri_tail)?;
        let rel = self.relation_embedding(uri_relation)?;

        if lhs.len() != rel.len() || rhs.len() != rel.len() {
            return Err(FeatureError::shape(format!(
                "embedding widths differ: head {}, relation {}, tail {}",
                lhs.len(),
                rel.len(),
                rhs.len()
            )));
        }

        Ok((lhs * rel * rhs).sum())
    }
}

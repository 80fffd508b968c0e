//! Trained embedding model seam
//!
//! The facade only needs two capabilities from a model: an entity vector with
//! its side-specific bias, and a relation vector. Anything that stores trained
//! weights can implement [`KgeModel`]; [`EmbeddingTable`] is the in-memory
//! implementation used by the command line and tests.

use crate::error::{FeatureError, Result};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which bias accompanies an entity vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BiasSide {
    /// Entity in subject (head) position
    Left,
    /// Entity in object (tail) position
    Right,
}

impl BiasSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasSide::Left => "left",
            BiasSide::Right => "right",
        }
    }
}

impl fmt::Display for BiasSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BiasSide {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(BiasSide::Left),
            "right" => Ok(BiasSide::Right),
            other => Err(FeatureError::invalid_argument(format!(
                "unknown bias side {:?}, expected left or right",
                other
            ))),
        }
    }
}

/// Embedding lookups offered by a trained KGE model
pub trait KgeModel {
    /// Entity vector and the scalar bias for `side`
    fn get_entity_embedding(&self, id: usize, side: BiasSide) -> Result<(Array1<f32>, f32)>;

    /// Relation vector
    fn get_relation_embedding(&self, id: usize) -> Result<Array1<f32>>;
}

/// JSON export of trained weights
#[derive(Debug, Deserialize)]
struct TableExport {
    entity: Vec<Vec<f32>>,
    bias_left: Vec<f32>,
    bias_right: Vec<f32>,
    relation: Vec<Vec<f32>>,
}

/// Trained weights held in memory
///
/// Row `i` of `entity` / `relation` is the vector of id `i`.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    entity: Array2<f32>,
    bias_left: Array1<f32>,
    bias_right: Array1<f32>,
    relation: Array2<f32>,
}

impl EmbeddingTable {
    /// Build a table, checking that biases cover every entity and that
    /// entity and relation vectors share a width
    pub fn new(
        entity: Array2<f32>,
        bias_left: Array1<f32>,
        bias_right: Array1<f32>,
        relation: Array2<f32>,
    ) -> Result<Self> {
        let n_entities = entity.nrows();
        if bias_left.len() != n_entities || bias_right.len() != n_entities {
            return Err(FeatureError::shape(format!(
                "bias lengths ({}, {}) do not match {} entities",
                bias_left.len(),
                bias_right.len(),
                n_entities
            )));
        }
        if entity.ncols() != relation.ncols() {
            return Err(FeatureError::shape(format!(
                "entity width {} does not match relation width {}",
                entity.ncols(),
                relation.ncols()
            )));
        }

        Ok(Self {
            entity,
            bias_left,
            bias_right,
            relation,
        })
    }

    /// Load a table from a JSON export:
    /// `{"entity": [[..]], "bias_left": [..], "bias_right": [..], "relation": [[..]]}`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let table = Self::from_json_slice(&bytes)?;
        log::info!(
            "Loaded embedding table from {} ({} entities, {} relations, {}d)",
            path.display(),
            table.n_entities(),
            table.n_relations(),
            table.dimension()
        );
        Ok(table)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let export: TableExport = serde_json::from_slice(bytes)?;
        Self::new(
            matrix("entity", export.entity)?,
            Array1::from(export.bias_left),
            Array1::from(export.bias_right),
            matrix("relation", export.relation)?,
        )
    }

    pub fn dimension(&self) -> usize {
        self.entity.ncols()
    }

    pub fn n_entities(&self) -> usize {
        self.entity.nrows()
    }

    pub fn n_relations(&self) -> usize {
        self.relation.nrows()
    }
}

fn matrix(name: &str, rows: Vec<Vec<f32>>) -> Result<Array2<f32>> {
    let width = rows.first().map_or(0, Vec::len);
    if let Some(idx) = rows.iter().position(|row| row.len() != width) {
        return Err(FeatureError::shape(format!(
            "{} row {} has width {}, expected {}",
            name,
            idx,
            rows[idx].len(),
            width
        )));
    }
    let n_rows = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, width), flat).map_err(|e| FeatureError::shape(e.to_string()))
}

impl KgeModel for EmbeddingTable {
    fn get_entity_embedding(&self, id: usize, side: BiasSide) -> Result<(Array1<f32>, f32)> {
        if id >= self.n_entities() {
            return Err(FeatureError::not_found(format!("entity embedding {}", id)));
        }
        let bias = match side {
            BiasSide::Left => self.bias_left[id],
            BiasSide::Right => self.bias_right[id],
        };
        Ok((self.entity.row(id).to_owned(), bias))
    }

    fn get_relation_embedding(&self, id: usize) -> Result<Array1<f32>> {
        if id >= self.n_relations() {
            return Err(FeatureError::not_found(format!("relation embedding {}", id)));
        }
        Ok(self.relation.row(id).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> EmbeddingTable {
        EmbeddingTable::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            array![0.5, 2.0],
            array![-1.0, 1.0],
            array![[1.0, 1.0], [0.0, 2.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_entity_embedding_by_side() {
        let t = table();
        let (vec, bias) = t.get_entity_embedding(1, BiasSide::Left).unwrap();
        assert_eq!(vec, array![3.0, 4.0]);
        assert_eq!(bias, 2.0);

        let (_, bias) = t.get_entity_embedding(0, BiasSide::Right).unwrap();
        assert_eq!(bias, -1.0);
    }

    #[test]
    fn test_out_of_range_ids() {
        let t = table();
        assert!(matches!(
            t.get_entity_embedding(2, BiasSide::Left),
            Err(FeatureError::NotFound(_))
        ));
        assert!(matches!(t.get_relation_embedding(5), Err(FeatureError::NotFound(_))));
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let err = EmbeddingTable::new(
            array![[1.0, 2.0]],
            array![0.5, 2.0],
            array![1.0],
            array![[1.0, 1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, FeatureError::Shape(_)));

        let err = EmbeddingTable::new(
            array![[1.0, 2.0]],
            array![1.0],
            array![1.0],
            array![[1.0, 1.0, 1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, FeatureError::Shape(_)));
    }

    #[test]
    fn test_from_json() {
        let json = br#"{
            "entity": [[1.0, 0.0, 2.0]],
            "bias_left": [0.5],
            "bias_right": [1.5],
            "relation": [[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]
        }"#;
        let t = EmbeddingTable::from_json_slice(json).unwrap();
        assert_eq!(t.dimension(), 3);
        assert_eq!(t.n_relations(), 2);
        assert_eq!(t.get_relation_embedding(1).unwrap(), array![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_from_json_ragged() {
        let json = br#"{"entity": [[1.0], [1.0, 2.0]], "bias_left": [0, 0], "bias_right": [0, 0], "relation": [[1.0]]}"#;
        assert!(matches!(
            EmbeddingTable::from_json_slice(json),
            Err(FeatureError::Shape(_))
        ));
    }

    #[test]
    fn test_bias_side_names() {
        assert_eq!("left".parse::<BiasSide>().unwrap(), BiasSide::Left);
        assert_eq!(BiasSide::Right.to_string(), "right");
        assert!(matches!(
            "up".parse::<BiasSide>(),
            Err(FeatureError::InvalidArgument(_))
        ));
    }
}

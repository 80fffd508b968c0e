//! Knowledge-graph dataset
//!
//! Loads the train/valid/test triple arrays, the `to_skip` filters and the
//! entity/relation id maps of a pre-processed dataset directory. Everything
//! is read once at construction; accessors only read in-memory state.

use crate::config::{DatasetConfig, DEBUG_EXAMPLE_LIMIT};
use crate::error::{FeatureError, Result};
use crate::id_map::IdMap;
use crate::split::{self, Split, FILTERS_FILE, HEAD, RELATION, TAIL, TRIPLE_WIDTH};
use ndarray::{Array2, ArrayView1};
use serde_pickle::Value;
use std::path::{Path, PathBuf};

/// Entity id map file name
pub const ENTITY_IDS_FILE: &str = "ent_id";
/// Relation id map file name
pub const RELATION_IDS_FILE: &str = "rel_id";

/// Size of the scoring space derived from the train split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetShape {
    /// 1 + largest head or tail id in train
    pub entities: usize,
    /// 2 * (1 + largest relation id in train); upper half holds inverses
    pub relations: usize,
}

impl DatasetShape {
    /// Derive the shape from the train triples
    pub fn from_train(train: &Array2<i64>) -> Result<Self> {
        if train.nrows() == 0 {
            return Err(FeatureError::shape(
                "train split is empty; entity and relation counts are undefined",
            ));
        }

        let max_of = |col: ArrayView1<i64>| col.iter().copied().max().unwrap_or(0);
        let max_entity = max_of(train.column(HEAD)).max(max_of(train.column(TAIL)));
        let max_relation = max_of(train.column(RELATION));

        let entities = usize::try_from(max_entity)
            .ok()
            .and_then(|e| e.checked_add(1))
            .ok_or_else(|| FeatureError::shape(format!("entity id {} is too large to index", max_entity)))?;

        // the largest inverse id, 2 * max_relation + 1, must still be an i64
        let relations = max_relation
            .checked_mul(2)
            .and_then(|r| r.checked_add(1))
            .and_then(|max_inverse| usize::try_from(max_inverse).ok())
            .and_then(|max_inverse| max_inverse.checked_add(1))
            .ok_or_else(|| {
                FeatureError::shape(format!(
                    "relation id {} leaves no room for its inverse",
                    max_relation
                ))
            })?;

        Ok(Self {
            entities,
            relations,
        })
    }

    /// Rows referencing an entity or relation id beyond this shape
    pub fn count_out_of_range(&self, triples: &Array2<i64>) -> usize {
        let beyond = |value: i64, bound: usize| usize::try_from(value).map_or(true, |v| v >= bound);
        triples
            .rows()
            .into_iter()
            .filter(|row| {
                beyond(row[HEAD], self.entities)
                    || beyond(row[TAIL], self.entities)
                    || beyond(row[RELATION], self.inverse_offset())
            })
            .count()
    }

    /// Offset added to a relation id to obtain its inverse
    pub fn inverse_offset(&self) -> usize {
        self.relations / 2
    }

    /// `(entities, relations, entities)`
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.entities, self.relations, self.entities)
    }
}

/// In-memory knowledge-graph dataset
#[derive(Debug)]
pub struct KgDataset {
    data_path: PathBuf,
    debug: bool,
    train: Array2<i64>,
    valid: Array2<i64>,
    test: Array2<i64>,
    to_skip: Value,
    shape: DatasetShape,
    entities: IdMap,
    relations: IdMap,
}

impl KgDataset {
    /// Load the dataset stored in `data_path`
    ///
    /// # Arguments
    /// * `data_path` - Directory with `{train,valid,test}.pickle`, `to_skip.pickle`, `ent_id`, `rel_id`
    /// * `debug` - Limit `get_examples` to the first 1000 rows
    pub fn open(data_path: impl AsRef<Path>, debug: bool) -> Result<Self> {
        let data_path = data_path.as_ref();
        log::info!("Loading KG dataset from: {}", data_path.display());

        let load = |which: Split| split::load_triples(&data_path.join(which.file_name()));
        let train = load(Split::Train)?;
        let test = load(Split::Test)?;
        let valid = load(Split::Valid)?;

        let to_skip = split::load_filters(&data_path.join(FILTERS_FILE))?;
        let shape = DatasetShape::from_train(&train)?;

        for (which, triples) in [(Split::Valid, &valid), (Split::Test, &test)] {
            let outside = shape.count_out_of_range(triples);
            if outside > 0 {
                log::warn!(
                    "{}: {} of {} triples lie outside the train shape {:?}, returned as stored",
                    which,
                    outside,
                    triples.nrows(),
                    shape.as_tuple()
                );
            }
        }

        let entities = IdMap::load(&data_path.join(ENTITY_IDS_FILE))?;
        let relations = IdMap::load(&data_path.join(RELATION_IDS_FILE))?;

        log::info!(
            "Loaded KG dataset: {} entities, {} relations (with inverses), {}/{}/{} train/valid/test triples",
            shape.entities,
            shape.relations,
            train.nrows(),
            valid.nrows(),
            test.nrows()
        );
        if debug {
            log::warn!(
                "Debug mode: examples truncated to {} rows",
                DEBUG_EXAMPLE_LIMIT
            );
        }

        Ok(Self {
            data_path: data_path.to_path_buf(),
            debug,
            train,
            valid,
            test,
            to_skip,
            shape,
            entities,
            relations,
        })
    }

    /// Load the dataset described by `config`
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        Self::open(&config.data_path, config.debug)
    }

    fn split(&self, split: Split) -> &Array2<i64> {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }

    /// Triples of a split, ready for model consumption
    ///
    /// The train split gets every `(h, r, t)` mirrored as `(t, r + R/2, h)`
    /// appended after the originals. `relation_filter` keeps only rows with
    /// that relation (after mirroring), and debug mode keeps the first 1000
    /// rows (after filtering).
    pub fn get_examples(&self, split: Split, relation_filter: Option<i64>) -> Result<Array2<i64>> {
        let base = self.split(split);
        // from_train guarantees every train relation plus this offset fits in i64
        let offset = i64::try_from(self.shape.inverse_offset())
            .map_err(|_| FeatureError::shape("inverse relation offset exceeds i64"))?;

        let mirrored = (split == Split::Train).then(move || {
            base.rows().into_iter().map(move |row| {
                [row[TAIL], row[RELATION] + offset, row[HEAD]]
            })
        });

        let rows = base
            .rows()
            .into_iter()
            .map(|row| [row[HEAD], row[RELATION], row[TAIL]])
            .chain(mirrored.into_iter().flatten())
            .filter(|row| relation_filter.map_or(true, |rel| row[RELATION] == rel));

        let limit = if self.debug { DEBUG_EXAMPLE_LIMIT } else { usize::MAX };
        let flat: Vec<i64> = rows.take(limit).flatten().collect();
        let n_rows = flat.len() / TRIPLE_WIDTH;

        Array2::from_shape_vec((n_rows, TRIPLE_WIDTH), flat)
            .map_err(|e| FeatureError::shape(e.to_string()))
    }

    /// Filters for ranking in the filtered setting, as loaded
    pub fn get_filters(&self) -> &Value {
        &self.to_skip
    }

    /// `(entities, relations, entities)`
    pub fn get_shape(&self) -> (usize, usize, usize) {
        self.shape.as_tuple()
    }

    pub fn get_node_id_from_name(&self, name: &str) -> Result<usize> {
        self.entities.id(name)
    }

    pub fn get_node_name_from_id(&self, id: usize) -> Result<&str> {
        self.entities.name(id)
    }

    pub fn get_rel_id_from_name(&self, name: &str) -> Result<usize> {
        self.relations.id(name)
    }

    pub fn get_rel_name_from_id(&self, id: usize) -> Result<&str> {
        self.relations.name(id)
    }

    pub fn shape(&self) -> DatasetShape {
        self.shape
    }

    pub fn n_entities(&self) -> usize {
        self.shape.entities
    }

    pub fn n_relations(&self) -> usize {
        self.shape.relations
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Number of rows stored on disk for a split (before mirroring)
    pub fn split_len(&self, split: Split) -> usize {
        self.split(split).nrows()
    }

    pub fn entity_index(&self) -> &IdMap {
        &self.entities
    }

    pub fn relation_index(&self) -> &IdMap {
        &self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_pickle::{HashableValue, SerOptions};
    use std::collections::BTreeMap;
    use std::fs::File;
    use tempfile::TempDir;

    fn write_pickle<T: serde::Serialize>(path: &Path, value: &T) {
        let mut file = File::create(path).unwrap();
        serde_pickle::to_writer(&mut file, value, SerOptions::new()).unwrap();
    }

    fn write_dataset(train: &[[i64; 3]], valid: &[[i64; 3]], test: &[[i64; 3]]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let to_rows = |t: &[[i64; 3]]| t.iter().map(|r| r.to_vec()).collect::<Vec<_>>();
        write_pickle(&dir.path().join("train.pickle"), &to_rows(train));
        write_pickle(&dir.path().join("valid.pickle"), &to_rows(valid));
        write_pickle(&dir.path().join("test.pickle"), &to_rows(test));

        let mut lhs = BTreeMap::new();
        lhs.insert(
            HashableValue::Tuple(vec![HashableValue::I64(1), HashableValue::I64(0)]),
            Value::List(vec![Value::I64(0)]),
        );
        let mut filters = BTreeMap::new();
        filters.insert(HashableValue::String("lhs".into()), Value::Dict(lhs));
        let mut file = File::create(dir.path().join("to_skip.pickle")).unwrap();
        serde_pickle::value_to_writer(&mut file, &Value::Dict(filters), SerOptions::new()).unwrap();

        std::fs::write(
            dir.path().join("ent_id"),
            "<http://ex.org/a>\t0\n<http://ex.org/b>\t1\n<http://ex.org/c>\t2\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("rel_id"),
            "<http://ex.org/r>\t0\n<http://ex.org/s>\t1\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_shape_from_train() {
        let dir = write_dataset(&[[0, 0, 1], [2, 1, 0]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(ds.get_shape(), (3, 4, 3));
        assert_eq!(ds.shape().inverse_offset(), 2);
    }

    #[test]
    fn test_shape_uses_tail_column() {
        let shape = DatasetShape::from_train(&array![[0, 0, 9]]).unwrap();
        assert_eq!(shape.entities, 10);
        assert_eq!(shape.relations, 2);
    }

    #[test]
    fn test_empty_train_rejected() {
        let dir = write_dataset(&[], &[[0, 0, 1]], &[]);
        let err = KgDataset::open(dir.path(), false).unwrap_err();
        assert!(matches!(err, FeatureError::Shape(_)));
    }

    #[test]
    fn test_relation_without_room_for_inverse_rejected() {
        let dir = write_dataset(&[[0, i64::MAX, 1]], &[], &[]);
        let err = KgDataset::open(dir.path(), false).unwrap_err();
        assert!(matches!(err, FeatureError::Shape(_)));

        // 2^62 + (2^62 + 1) overflows i64
        let dir = write_dataset(&[[0, 1 << 62, 1]], &[], &[]);
        let err = KgDataset::open(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("no room for its inverse"));
    }

    #[test]
    fn test_largest_representable_relation() {
        let max_relation = (1i64 << 62) - 1;
        let dir = write_dataset(&[[0, max_relation, 1]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        let examples = ds.get_examples(Split::Train, None).unwrap();
        assert_eq!(examples, array![[0, max_relation, 1], [1, i64::MAX, 0]]);
    }

    #[test]
    fn test_out_of_range_rows_counted() {
        let shape = DatasetShape::from_train(&array![[0, 0, 1]]).unwrap();
        let rows = array![[5, 0, 0], [0, 1, 1], [1, 0, 0], [0, 0, 2]];
        assert_eq!(shape.count_out_of_range(&rows), 3);
    }

    #[test]
    fn test_out_of_range_valid_rows_returned_as_stored() {
        let dir = write_dataset(&[[0, 0, 1]], &[[7, 0, 0], [1, 0, 0]], &[[0, 5, 1]]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(ds.get_shape(), (2, 2, 2));
        assert_eq!(
            ds.get_examples(Split::Valid, None).unwrap(),
            array![[7, 0, 0], [1, 0, 0]]
        );
        assert_eq!(ds.get_examples(Split::Test, None).unwrap(), array![[0, 5, 1]]);
    }

    #[test]
    fn test_numpy_train_split() {
        let dir = write_dataset(&[], &[], &[]);
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/train_i8_p2.pickle");
        std::fs::copy(fixture, dir.path().join("train.pickle")).unwrap();

        let ds = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(ds.get_shape(), (3, 4, 3));
        assert_eq!(
            ds.get_examples(Split::Train, Some(3)).unwrap(),
            array![[0, 3, 2]]
        );
    }

    #[test]
    fn test_train_examples_are_mirrored() {
        let dir = write_dataset(&[[0, 0, 1], [2, 1, 0]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        let examples = ds.get_examples(Split::Train, None).unwrap();
        assert_eq!(
            examples,
            array![[0, 0, 1], [2, 1, 0], [1, 2, 0], [0, 3, 2]]
        );
    }

    #[test]
    fn test_non_train_examples_unmodified() {
        let dir = write_dataset(&[[0, 0, 1]], &[[1, 0, 0]], &[[0, 0, 1], [1, 0, 0]]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(ds.get_examples(Split::Valid, None).unwrap(), array![[1, 0, 0]]);
        assert_eq!(
            ds.get_examples(Split::Test, None).unwrap(),
            array![[0, 0, 1], [1, 0, 0]]
        );
    }

    #[test]
    fn test_relation_filter_after_mirroring() {
        let dir = write_dataset(&[[0, 0, 1], [2, 1, 0]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();

        // relation 3 only exists as the inverse of relation 1
        let inverse = ds.get_examples(Split::Train, Some(3)).unwrap();
        assert_eq!(inverse, array![[0, 3, 2]]);

        let none = ds.get_examples(Split::Train, Some(42)).unwrap();
        assert_eq!(none.dim(), (0, 3));
    }

    #[test]
    fn test_debug_truncates() {
        let train: Vec<[i64; 3]> = (0..700).map(|i| [i, 0, i + 1]).collect();
        let dir = write_dataset(&train, &[], &[]);

        let ds = KgDataset::open(dir.path(), true).unwrap();
        let examples = ds.get_examples(Split::Train, None).unwrap();
        assert_eq!(examples.nrows(), DEBUG_EXAMPLE_LIMIT);
        assert_eq!(examples.row(0).to_vec(), vec![0, 0, 1]);

        let full = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(full.get_examples(Split::Train, None).unwrap().nrows(), 1400);
    }

    #[test]
    fn test_filters_passed_through() {
        let dir = write_dataset(&[[0, 0, 1]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        match ds.get_filters() {
            Value::Dict(map) => {
                assert!(map.contains_key(&HashableValue::String("lhs".into())))
            }
            other => panic!("unexpected filters: {:?}", other),
        }
    }

    #[test]
    fn test_name_lookups() {
        let dir = write_dataset(&[[0, 0, 1]], &[], &[]);
        let ds = KgDataset::open(dir.path(), false).unwrap();
        assert_eq!(ds.get_node_id_from_name("<http://ex.org/b>").unwrap(), 1);
        assert_eq!(ds.get_node_name_from_id(2).unwrap(), "<http://ex.org/c>");
        assert_eq!(ds.get_rel_id_from_name("<http://ex.org/s>").unwrap(), 1);
        assert_eq!(ds.get_rel_name_from_id(0).unwrap(), "<http://ex.org/r>");
        assert!(matches!(
            ds.get_node_id_from_name("http://ex.org/a"),
            Err(FeatureError::NotFound(_))
        ));
        assert!(matches!(ds.get_rel_name_from_id(9), Err(FeatureError::NotFound(_))));
    }

    #[test]
    fn test_missing_files() {
        let dir = write_dataset(&[[0, 0, 1]], &[], &[]);
        std::fs::remove_file(dir.path().join("rel_id")).unwrap();
        assert!(matches!(
            KgDataset::open(dir.path(), false),
            Err(FeatureError::DataLoad(_))
        ));

        let dir = write_dataset(&[[0, 0, 1]], &[], &[]);
        std::fs::remove_file(dir.path().join("to_skip.pickle")).unwrap();
        assert!(matches!(
            KgDataset::open(dir.path(), false),
            Err(FeatureError::DataLoad(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = write_dataset(&[[0, 0, 1]], &[], &[]);
        let config = DatasetConfig::new(dir.path(), true);
        let ds = KgDataset::from_config(&config).unwrap();
        assert!(ds.is_debug());
        assert_eq!(ds.data_path(), dir.path());
        assert_eq!(ds.split_len(Split::Train), 1);
    }
}

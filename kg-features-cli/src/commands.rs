//! Command execution

use crate::args::{Cli, Command, EmbeddingKind, Lookup, ModelArgs};
use anyhow::{Context, Result};
use kg_features::{
    find_data_path, DatasetConfig, EmbeddingExtractor, EmbeddingTable, IdMap, KgDataset, Split,
};
use std::io::Write;

/// Run a parsed command, writing results to `out`
pub fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let data_path = find_data_path(cli.data.as_deref())?;
    let config = DatasetConfig::new(data_path, cli.debug);
    let dataset = KgDataset::from_config(&config)
        .with_context(|| format!("Failed to load dataset from {}", config.data_path.display()))?;

    match cli.command {
        Command::Shape => shape(&dataset, out),
        Command::Examples {
            split,
            relation,
            limit,
        } => examples(&dataset, split, relation, limit, out),
        Command::Entity(lookup) => resolve(dataset.entity_index(), &lookup, out),
        Command::Relation(lookup) => resolve(dataset.relation_index(), &lookup, out),
        Command::Embed { model, kind, uri } => embed(&dataset, &model, kind, &uri, out),
        Command::Similarity {
            model,
            head,
            relation,
            tail,
        } => similarity(&dataset, &model, &head, &relation, &tail, out),
    }
}

fn shape(dataset: &KgDataset, out: &mut impl Write) -> Result<()> {
    for split in Split::ALL {
        tracing::info!("{}: {} triples", split, dataset.split_len(split));
    }
    let (entities, relations, _) = dataset.get_shape();
    writeln!(out, "{}\t{}\t{}", entities, relations, entities)?;
    Ok(())
}

fn examples(
    dataset: &KgDataset,
    split: Split,
    relation: Option<i64>,
    limit: Option<usize>,
    out: &mut impl Write,
) -> Result<()> {
    let triples = dataset.get_examples(split, relation)?;
    tracing::debug!("{} examples in {}", triples.nrows(), split);

    for row in triples.rows().into_iter().take(limit.unwrap_or(usize::MAX)) {
        writeln!(out, "{}\t{}\t{}", row[0], row[1], row[2])?;
    }
    Ok(())
}

fn resolve(index: &IdMap, lookup: &Lookup, out: &mut impl Write) -> Result<()> {
    match (&lookup.name, lookup.id) {
        (Some(name), _) => writeln!(out, "{}", index.id(name)?)?,
        (None, Some(id)) => writeln!(out, "{}", index.name(id)?)?,
        (None, None) => anyhow::bail!("either --name or --id is required"),
    }
    Ok(())
}

fn load_model(args: &ModelArgs) -> Result<EmbeddingTable> {
    EmbeddingTable::from_json_file(&args.model)
        .with_context(|| format!("Failed to load model from {}", args.model.display()))
}

fn embed(
    dataset: &KgDataset,
    args: &ModelArgs,
    kind: EmbeddingKind,
    uri: &str,
    out: &mut impl Write,
) -> Result<()> {
    let model = load_model(args)?;
    let extractor = EmbeddingExtractor::with_prefix(dataset, &model, args.prefix.as_str());

    let vector = match kind {
        EmbeddingKind::Lhs => extractor.left_hand_side_entity_embedding(uri)?,
        EmbeddingKind::Rhs => extractor.right_hand_side_entity_embedding(uri)?,
        EmbeddingKind::Relation => extractor.relation_embedding(uri)?,
        EmbeddingKind::Global => extractor.global_entity_embedding(uri)?,
    };

    writeln!(out, "{}", serde_json::to_string(&vector.to_vec())?)?;
    Ok(())
}

fn similarity(
    dataset: &KgDataset,
    args: &ModelArgs,
    head: &str,
    relation: &str,
    tail: &str,
    out: &mut impl Write,
) -> Result<()> {
    let model = load_model(args)?;
    let extractor = EmbeddingExtractor::with_prefix(dataset, &model, args.prefix.as_str());
    let score = extractor.similarity(head, relation, tail)?;
    writeln!(out, "{}", score)?;
    Ok(())
}

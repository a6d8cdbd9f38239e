use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::ParseFailure;

/// A generated program waiting to be judged against the problem named `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSolution {
    pub id: String,
    pub generated: String,
    pub origin: Origin,
    pub evaluated: bool,
    pub passed: bool,
}

/// Where in the input batch a candidate came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Top-level key of a keyed batch
    Batch(String),
    /// Generation index of an indexed batch
    Index(u64),
}

/// The two accepted batch layouts
#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateBatch {
    /// `{"<key>": [{"id": .., "model_completions": [..]}, ..]}`
    Keyed(BTreeMap<String, Vec<KeyedGeneration>>),
    /// `[{"index": .., "name": .., "completion": ..}, ..]`
    Indexed(Vec<IndexedGeneration>),
}

#[derive(Deserialize)]
struct KeyedGeneration {
    id: String,
    model_completions: Vec<String>,
}

#[derive(Deserialize)]
struct IndexedGeneration {
    index: u64,
    name: String,
    completion: String,
}

impl CandidateSolution {
    fn new(id: String, generated: String, origin: Origin) -> Self {
        Self {
            id,
            generated,
            origin,
            evaluated: false,
            passed: false,
        }
    }

    /// Generation index, for candidates loaded from an indexed batch
    pub fn index(&self) -> Option<u64> {
        match self.origin {
            Origin::Index(index) => Some(index),
            Origin::Batch(_) => None,
        }
    }
}

/// Loads a candidate batch from a JSON file
pub fn load_candidates(path: impl AsRef<Path>) -> Result<Vec<CandidateSolution>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open candidate batch {}", path.display()))?;
    parse_candidates(BufReader::new(file))
        .with_context(|| format!("Invalid candidate batch {}", path.display()))
}

/// Parses either batch layout into a flat candidate list
///
/// Keyed batches are flattened in key order, then entry order, then
/// completion order.
pub fn parse_candidates(reader: impl Read) -> Result<Vec<CandidateSolution>> {
    let batch: CandidateBatch = serde_json::from_reader(reader).map_err(|e| {
        ParseFailure(format!(
            "expected a map of generation lists or a list of indexed generations: {e}"
        ))
    })?;

    let candidates = match batch {
        CandidateBatch::Keyed(groups) => groups
            .into_iter()
            .flat_map(|(key, generations)| {
                generations.into_iter().flat_map(move |generation| {
                    let key = key.clone();
                    generation
                        .model_completions
                        .into_iter()
                        .map(move |completion| {
                            CandidateSolution::new(
                                generation.id.clone(),
                                completion,
                                Origin::Batch(key.clone()),
                            )
                        })
                })
            })
            .collect(),
        CandidateBatch::Indexed(generations) => generations
            .into_iter()
            .map(|g| CandidateSolution::new(g.name, g.completion, Origin::Index(g.index)))
            .collect(),
    };

    Ok(candidates)
}

/// Positions of candidates in the batch, grouped by the problem they target
#[derive(Debug, Default)]
pub struct CandidateIndex {
    by_id: HashMap<String, Vec<usize>>,
}

impl CandidateIndex {
    pub fn build(candidates: &[CandidateSolution]) -> Self {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, candidate) in candidates.iter().enumerate() {
            by_id
                .entry(candidate.id.clone())
                .or_default()
                .push(position);
        }
        Self { by_id }
    }

    /// Every candidate targeting `name`, in batch order
    pub fn matching(&self, name: &str) -> &[usize] {
        self.by_id.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

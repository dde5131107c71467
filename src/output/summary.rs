use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::result::CollectionResult;
use crate::collect::options::EntityKind;

/// What the caller gets back: where the result is and how complete it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    /// Ready-to-run `jq` command over the output file.
    pub query_hint: Option<String>,
    pub repositories_total: usize,
    pub repositories_collected: usize,
    pub entity_errors: usize,
    pub items_collected: BTreeMap<EntityKind, usize>,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn completed(result: &CollectionResult, output_path: PathBuf, compressed: bool) -> Self {
        let meta = &result.metadata;
        Self {
            success: true,
            query_hint: Some(query_hint(&output_path, compressed)),
            output_path: Some(output_path),
            repositories_total: meta.repositories_total,
            repositories_collected: meta.repositories_processed.len(),
            entity_errors: meta.errors_encountered,
            items_collected: meta.items_collected.clone(),
            timed_out: meta.timed_out,
            error: None,
        }
    }

    pub fn failed(error: &dyn Display) -> Self {
        Self {
            success: false,
            output_path: None,
            query_hint: None,
            repositories_total: 0,
            repositories_collected: 0,
            entity_errors: 0,
            items_collected: BTreeMap::new(),
            timed_out: false,
            error: Some(error.to_string()),
        }
    }
}

fn query_hint(path: &Path, compressed: bool) -> String {
    let quoted = shell_escape::escape(Cow::Owned(path.display().to_string()));
    if compressed {
        format!("xz -dc {quoted} | jq '.metrics.summary'")
    } else {
        format!("jq '.metrics.summary' {quoted}")
    }
}

//! `replay` and `transform` subcommands

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use coedit_core::{
    transform, Applied, ConflictInfo, ContentEntity, DocumentId, DocumentManager, Error, Operation,
    TransformOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A document and the proposals to submit to it, in order
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    pub document: DocumentId,
    pub entity: ContentEntity,
    #[serde(default)]
    pub proposals: Vec<Operation>,
}

/// One output line per proposal
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplayLine {
    Committed {
        proposal: String,
        version: u64,
        operations: Vec<Operation>,
        changes: Vec<Applied>,
    },
    Conflict {
        proposal: String,
        conflict: ConflictInfo,
    },
    Rejected {
        proposal: String,
        error: String,
    },
}

/// Totals printed at the end of a replay
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub committed: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub version: u64,
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Submit every proposal of `script`, writing one JSON line per proposal
/// followed by the final entity. Conflicts and rejected proposals are
/// reported, not fatal.
pub async fn run_replay(
    manager: &DocumentManager,
    script: ReplayScript,
    out: &mut impl Write,
) -> Result<(ReplaySummary, ContentEntity)> {
    let id = script.document;
    match manager.create(id.clone(), script.entity).await {
        Ok(_) => {}
        Err(Error::DocumentExists(_)) => {
            debug!(document = %id, "Replaying onto existing document");
            manager.open(&id).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let mut summary = ReplaySummary::default();
    for proposal in script.proposals {
        let proposal_id = proposal.id.clone();
        let line = match manager.submit(&id, proposal).await {
            Ok(commit) => {
                summary.committed += 1;
                ReplayLine::Committed {
                    proposal: proposal_id,
                    version: commit.version,
                    operations: commit.operations,
                    changes: commit.changes,
                }
            }
            Err(Error::Conflict(conflict)) => {
                summary.conflicts += 1;
                ReplayLine::Conflict {
                    proposal: proposal_id,
                    conflict: *conflict,
                }
            }
            Err(e @ (Error::Persistence(_) | Error::DocumentNotFound(_))) => return Err(e.into()),
            Err(e) => {
                summary.rejected += 1;
                ReplayLine::Rejected {
                    proposal: proposal_id,
                    error: e.to_string(),
                }
            }
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }

    let entity = manager.snapshot(&id).await?;
    summary.version = manager.get(&id)?.version();
    writeln!(out, "{}", serde_json::to_string(&entity)?)?;

    info!(
        document = %id,
        committed = summary.committed,
        conflicts = summary.conflicts,
        rejected = summary.rejected,
        version = summary.version,
        "Replay finished"
    );
    Ok((summary, entity))
}

/// Transform `base` against a single concurrent operation
pub fn run_transform(base: &Operation, concurrent: &Operation, out: &mut impl Write) -> Result<TransformOutcome> {
    base.validate()?;
    concurrent.validate()?;

    let outcome = transform(base, Some(concurrent));
    writeln!(out, "{}", serde_json::to_string_pretty(&outcome)?)?;
    Ok(outcome)
}

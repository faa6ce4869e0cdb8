//! Build the work list for a run
//!
//! Walks a local or remote tree, keeps regular files whose base name matches the pattern and pairs
//! each with its counterpart under the destination base, preserving the relative structure.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use common::filter::NamePattern;
use remote::RemoteSession;
use tracing::instrument;

use crate::task::TransferTask;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// the root does not exist; the run has nothing to do
    #[error("{0:?} does not exist")]
    NotFound(PathBuf),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn single_file_task(root: &Path, pattern: &NamePattern, dst_base: &Path) -> Vec<TransferTask> {
    if !pattern.matches(root) {
        tracing::debug!("{:?} does not match {}", root, pattern);
        return vec![];
    }
    match root.file_name() {
        Some(name) => vec![TransferTask::new(root, dst_base.join(name))],
        None => vec![],
    }
}

#[async_recursion]
async fn walk_local(
    root: &Path,
    dir: &Path,
    pattern: &NamePattern,
    dst_base: &Path,
    tasks: &mut Vec<TransferTask>,
) -> anyhow::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::warn!("skipping unreadable directory {:?}: {}", dir, error);
            return Ok(());
        }
        Err(error) => {
            return Err(error).with_context(|| format!("cannot open directory {dir:?} for reading"));
        }
    };
    let mut paths = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("failed reading file type of {:?}", entry.path()))?;
        paths.push((entry.path(), file_type));
    }
    paths.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (path, file_type) in paths {
        if file_type.is_dir() {
            walk_local(root, &path, pattern, dst_base, tasks).await?;
        } else if file_type.is_file() {
            if !pattern.matches(&path) {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{path:?} is not under {root:?}"))?;
            tasks.push(TransferTask::new(&path, dst_base.join(relative)));
        } else {
            tracing::debug!("ignoring {:?}, not a regular file", path);
        }
    }
    Ok(())
}

/// Enumerate a local tree for pushing
#[instrument(skip(pattern))]
pub async fn local(
    root: &Path,
    pattern: &NamePattern,
    dst_base: &Path,
) -> Result<Vec<TransferTask>, Error> {
    let metadata = match tokio::fs::metadata(root).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(root.to_path_buf()));
        }
        Err(error) => {
            return Err(anyhow::Error::from(error)
                .context(format!("failed reading metadata from {root:?}"))
                .into());
        }
    };
    if !metadata.is_dir() {
        return Ok(single_file_task(root, pattern, dst_base));
    }
    let mut tasks = vec![];
    walk_local(root, root, pattern, dst_base, &mut tasks).await?;
    tracing::debug!("found {} matching files under {:?}", tasks.len(), root);
    Ok(tasks)
}

/// Enumerate a remote tree for pulling
#[instrument(skip(session, pattern))]
pub async fn remote<S: RemoteSession>(
    session: &S,
    root: &Path,
    pattern: &NamePattern,
    dst_base: &Path,
) -> Result<Vec<TransferTask>, Error> {
    if !session.exists(root).await? {
        return Err(Error::NotFound(root.to_path_buf()));
    }
    let escaped = remote::escape_path(root)?;
    let probe = session
        .run_command(&format!("test -f {escaped} && echo file"))
        .await
        .with_context(|| format!("failed probing remote {root:?}"))?;
    if probe.stdout.trim() == "file" {
        return Ok(single_file_task(root, pattern, dst_base));
    }
    let listing = session
        .run_command(&format!("find {escaped} -type f"))
        .await
        .with_context(|| format!("failed listing remote {root:?}"))?;
    if !listing.success {
        if listing.stdout.trim().is_empty() {
            return Err(anyhow!(
                "failed listing remote {:?}: {}",
                root,
                listing.stderr.trim()
            )
            .into());
        }
        // find still prints what it could reach
        tracing::warn!(
            "listing remote {:?} was incomplete: {}",
            root,
            listing.stderr.trim()
        );
    }
    let mut tasks = vec![];
    for line in listing.stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let path = Path::new(line);
        if !pattern.matches(path) {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("remote {path:?} is not under {root:?}"))?;
        tasks.push(TransferTask::new(path, dst_base.join(relative)));
    }
    tracing::debug!("found {} matching files under remote {:?}", tasks.len(), root);
    Ok(tasks)
}

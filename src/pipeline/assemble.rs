//! Archive assembly: the renumbered page directory → the final container.
//!
//! All the real packing work happens in external tools
//! ([`crate::tools::pack_archive`] / [`crate::tools::build_document`]); this
//! stage owns output naming, the original-mode store-level override (already
//! folded into [`ConvertConfig::effective_level`]), artifact verification,
//! and the one container kind with no packing step at all — the flat folder.

use crate::config::{ContainerKind, ConvertConfig};
use crate::error::BinderyError;
use crate::tools;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A successfully assembled output artifact.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// Artifact name, extension included (equal to the task name for the
    /// folder kind).
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Output artifact name for a task under the given container kind.
pub fn output_name(task_name: &str, kind: ContainerKind) -> String {
    match kind.extension() {
        Some(ext) => format!("{task_name}.{ext}"),
        None => task_name.to_string(),
    }
}

/// Package the renumbered pages into the configured container inside
/// `output_area`.
///
/// `pages` is the final sequence in order; `pages_dir` is the directory
/// holding exactly those files. A pre-existing artifact of the same name is
/// replaced, never updated in place.
///
/// # Errors
/// [`BinderyError::MissingArtifact`] when the packer reports success but
/// the expected output does not exist; tool errors pass through.
pub async fn assemble(
    task_name: &str,
    pages_dir: &Path,
    pages: &[PathBuf],
    config: &ConvertConfig,
    output_area: &Path,
) -> Result<Assembled, BinderyError> {
    let kind = config.container;
    let name = output_name(task_name, kind);
    let dest = output_area.join(&name);

    match kind {
        ContainerKind::Folder => return assemble_folder(task_name, pages, &dest).await,
        ContainerKind::Pdf => {
            remove_stale_file(&dest).await?;
            tools::build_document(pages, &dest, config.tool_timeout).await?;
        }
        _ => {
            // A leftover artifact from a previous run must not be appended
            // to.
            remove_stale_file(&dest).await?;
            tools::pack_archive(
                kind,
                pages_dir,
                &dest,
                config.effective_level(),
                config.tool_timeout,
            )
            .await?;
        }
    }

    let meta = tokio::fs::metadata(&dest)
        .await
        .map_err(|_| BinderyError::MissingArtifact { path: dest.clone() })?;
    info!("Assembled '{}' ({} bytes)", name, meta.len());
    Ok(Assembled {
        name,
        path: dest,
        bytes: meta.len(),
    })
}

/// The folder kind: pages copied verbatim into a persistent directory named
/// after the task; a pre-existing directory of the same name is replaced.
async fn assemble_folder(
    task_name: &str,
    pages: &[PathBuf],
    dest: &Path,
) -> Result<Assembled, BinderyError> {
    if tokio::fs::metadata(dest).await.is_ok() {
        debug!("Replacing existing output folder '{}'", dest.display());
        tokio::fs::remove_dir_all(dest)
            .await
            .map_err(|e| BinderyError::io(dest, e))?;
    }
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| BinderyError::io(dest, e))?;

    let mut bytes = 0u64;
    for page in pages {
        let file_name = page
            .file_name()
            .ok_or_else(|| BinderyError::Internal(format!("page without a file name: {page:?}")))?;
        let target = dest.join(file_name);
        bytes += tokio::fs::copy(page, &target)
            .await
            .map_err(|e| BinderyError::io(page, e))?;
    }

    info!("Assembled folder '{}' ({} bytes)", task_name, bytes);
    Ok(Assembled {
        name: task_name.to_string(),
        path: dest.to_path_buf(),
        bytes,
    })
}

async fn remove_stale_file(dest: &Path) -> Result<(), BinderyError> {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BinderyError::io(dest, e)),
    }
}

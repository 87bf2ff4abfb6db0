//! Cross-device safe file moves.

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const CROSS_DEVICE_ERROR: i32 = 18;

/// Move `src` to `dst`, surviving a filesystem boundary.
///
/// Scratch space and the final output directory are often on different
/// mounts, where a plain rename fails with EXDEV. The fallback copies to
/// a sibling temp file and renames, so `dst` appears atomically.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
            debug!(
                "cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Copy via a temp file next to `dst`, rename into place, drop `src`.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");

    fs::copy(src, &staging).await?;

    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(MediaError::from(e));
    }

    // Source removal is best effort; the move already succeeded.
    if let Err(e) = fs::remove_file(src).await {
        warn!("could not remove {} after move: {}", src.display(), e);
    }

    Ok(())
}

use std::path::{Path, PathBuf};

use crate::{Provider, ProviderError, Result};

/// Suffix inserted before the extension when deriving a differencing store
/// path: `disk.vhd` -> `disk-overlay.vhd`.
pub const OVERLAY_SUFFIX: &str = "-overlay";

/// Byte-addressable view of a parsed container image, produced by a
/// [`ContainerFormat`]. Mirrors the provider I/O contract: short transfers
/// only at end of extent.
pub trait ContainerStore: Send {
    fn length(&self) -> u64;

    fn sector_size(&self) -> u32;

    fn is_writable(&self) -> bool;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()>;
}

/// External virtual-disk codec capability (VHD, VMDK, ...).
///
/// The core never parses container formats itself; implementations of this
/// trait are supplied by the embedding application and registered with the
/// resolver.
pub trait ContainerFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this codec claims the given image path (typically by
    /// extension).
    fn recognizes(&self, path: &Path) -> bool;

    /// Whether the format can capture writes in a differencing store.
    fn supports_differencing(&self) -> bool;

    fn open(&self, path: &Path, writable: bool) -> Result<Box<dyn ContainerStore>>;

    /// Create a new differencing store at `overlay` on top of `base`.
    fn create_differencing(&self, base: &Path, overlay: &Path) -> Result<()>;

    /// Open `base` with writes redirected to the existing store at `overlay`.
    fn open_differencing(&self, base: &Path, overlay: &Path) -> Result<Box<dyn ContainerStore>>;
}

/// Decision taken when a differencing store already exists at the derived
/// path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OverlayAction {
    Reuse,
    Recreate,
    Abort,
}

/// Caller-supplied policy for differencing-store conflicts and creation
/// failures. Replaces interactive prompts: the decision is made up front by
/// whoever resolves the provider.
pub trait OverlayPolicy {
    /// A differencing store already exists at `overlay`.
    fn existing_overlay(&self, overlay: &Path) -> OverlayAction;

    /// Creating the store at `overlay` failed. Return a replacement path to
    /// retry with, or `None` to abort with the original error.
    fn creation_failed(&self, overlay: &Path, error: &ProviderError) -> Option<PathBuf>;
}

/// Reuses an existing overlay and aborts on creation failure.
pub struct DefaultOverlayPolicy;

impl OverlayPolicy for DefaultOverlayPolicy {
    fn existing_overlay(&self, _overlay: &Path) -> OverlayAction {
        OverlayAction::Reuse
    }

    fn creation_failed(&self, _overlay: &Path, _error: &ProviderError) -> Option<PathBuf> {
        None
    }
}

/// Derive the differencing store path for `image`:
/// original stem + [`OVERLAY_SUFFIX`] + original extension.
pub fn overlay_path_for(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let name = match image.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{OVERLAY_SUFFIX}.{ext}"),
        None => format!("{stem}{OVERLAY_SUFFIX}"),
    };
    image.with_file_name(name)
}

/// Open `image` for overlay access: writes land in a differencing store next
/// to the original, created (or reused) according to `policy`.
pub fn open_with_overlay(
    format: &dyn ContainerFormat,
    image: &Path,
    policy: &dyn OverlayPolicy,
) -> Result<Box<dyn ContainerStore>> {
    let mut overlay = overlay_path_for(image);

    loop {
        if overlay.exists() {
            match policy.existing_overlay(&overlay) {
                OverlayAction::Reuse => {
                    tracing::debug!(overlay = %overlay.display(), "reusing differencing store");
                    return format.open_differencing(image, &overlay);
                }
                OverlayAction::Recreate => {
                    std::fs::remove_file(&overlay).map_err(ProviderError::from)?;
                }
                OverlayAction::Abort => {
                    return Err(ProviderError::Aborted(format!(
                        "differencing store already exists: {}",
                        overlay.display()
                    )));
                }
            }
        }

        match format.create_differencing(image, &overlay) {
            Ok(()) => return format.open_differencing(image, &overlay),
            Err(err) => match policy.creation_failed(&overlay, &err) {
                Some(replacement) => {
                    tracing::warn!(
                        failed = %overlay.display(),
                        replacement = %replacement.display(),
                        "differencing store creation failed, retrying at replacement path"
                    );
                    overlay = replacement;
                }
                None => return Err(err),
            },
        }
    }
}

/// Provider over a parsed container image.
pub struct ContainerProvider {
    store: Box<dyn ContainerStore>,
    length: u64,
    sector_size: u32,
}

impl ContainerProvider {
    pub fn new(store: Box<dyn ContainerStore>) -> Self {
        let length = store.length();
        let sector_size = store.sector_size();
        Self {
            store,
            length,
            sector_size,
        }
    }
}

impl Provider for ContainerProvider {
    fn length(&self) -> u64 {
        self.length
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn is_writable(&self) -> bool {
        self.store.is_writable()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = crate::util::clamped_len(offset, buf.len(), self.length)?;
        self.store.read_at(offset, &mut buf[..want])
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if !self.store.is_writable() {
            return Err(ProviderError::ReadOnly);
        }
        crate::util::checked_range(offset, buf.len(), self.length)?;
        self.store.write_at(offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

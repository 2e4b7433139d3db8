use std::path::{Path, PathBuf};

use crate::container::{
    open_with_overlay, ContainerFormat, ContainerProvider, OverlayPolicy,
};
use crate::multi::MultiSegmentProvider;
use crate::raw::RawProvider;
use crate::store::FileStore;
use crate::{Provider, ProviderError, Result, SECTOR_SIZE};

/// How the image bytes are interpreted before being exposed as a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProxyKind {
    /// Plain raw image, no interpretation.
    None,
    /// Numbered raw segment files concatenated in name order.
    MultiPartRaw,
    /// Parsed virtual-disk container via a registered codec.
    ContainerFormat,
}

impl ProxyKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "raw",
            Self::MultiPartRaw => "multi-part-raw",
            Self::ContainerFormat => "container",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    ReadWriteOriginal,
    ReadWriteOverlay,
    ReadOnlyFileSystem,
    ReadWriteFileSystem,
}

impl AccessMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadWriteOriginal => "read-write-original",
            Self::ReadWriteOverlay => "read-write-overlay",
            Self::ReadOnlyFileSystem => "read-only-filesystem",
            Self::ReadWriteFileSystem => "read-write-filesystem",
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::ReadWriteOriginal | Self::ReadWriteOverlay | Self::ReadWriteFileSystem
        )
    }
}

/// Access modes each proxy kind advertises. Violations resolve to
/// [`ProviderError::UnsupportedAccessMode`] before anything is opened.
pub fn supported_access_modes(kind: ProxyKind) -> &'static [AccessMode] {
    match kind {
        ProxyKind::None => &[AccessMode::ReadOnly, AccessMode::ReadWriteOriginal],
        ProxyKind::MultiPartRaw => &[AccessMode::ReadOnly, AccessMode::ReadWriteOriginal],
        ProxyKind::ContainerFormat => &[
            AccessMode::ReadOnly,
            AccessMode::ReadWriteOriginal,
            AccessMode::ReadWriteOverlay,
            AccessMode::ReadOnlyFileSystem,
            AccessMode::ReadWriteFileSystem,
        ],
    }
}

/// Extensions treated as optical-disc media.
pub const CD_EXTENSIONS: &[&str] = &["iso", "nrg", "bin"];

/// Container extensions known not to support differencing; overlay access is
/// refused for these regardless of the codec.
pub const NO_DIFFERENCING_EXTENSIONS: &[&str] = &["iso", "nrg", "bin"];

/// Extensions the driver can mount natively without a service loop, when the
/// requested access is plain read/write against the original.
const NATIVE_PASSTHROUGH_EXTENSIONS: &[&str] = &["vhd", "avhd"];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MediaKind {
    HardDisk,
    OpticalDisc,
}

/// Parsed image locator: either a path-based image or a reference to a raw
/// physical device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceSpec {
    Image(PathBuf),
    /// Numeric (hex) physical drive id.
    PhysicalDrive(u32),
    /// Native device path (`\\.\X:` style or `/dev/<node>`), no further
    /// path components.
    DevicePath(String),
}

impl DeviceSpec {
    pub fn parse(locator: &str) -> Self {
        if !locator.is_empty() && locator.len() <= 8 {
            if let Ok(n) = u32::from_str_radix(locator.trim_start_matches("0x"), 16) {
                return Self::PhysicalDrive(n);
            }
        }

        if let Some(rest) = locator.strip_prefix(r"\\.\") {
            if !rest.is_empty() && !rest.contains(['\\', '/']) {
                return Self::DevicePath(locator.to_string());
            }
        }
        if let Some(rest) = locator.strip_prefix("/dev/") {
            if !rest.is_empty() && !rest.contains('/') {
                return Self::DevicePath(locator.to_string());
            }
        }

        Self::Image(PathBuf::from(locator))
    }
}

/// Result of resolution: either an opened provider to serve through the
/// proxy protocol, or an image the driver mounts natively without one.
pub enum Resolution {
    Provider {
        provider: Box<dyn Provider>,
        media: MediaKind,
    },
    NativePassthrough {
        path: PathBuf,
        media: MediaKind,
    },
}

/// Maps a device spec + proxy kind + access mode to a concrete provider.
///
/// The container codec registry is ordinary owned state supplied at
/// construction; nothing is registered globally.
pub struct Resolver {
    formats: Vec<Box<dyn ContainerFormat>>,
    sector_size: u32,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
            sector_size: SECTOR_SIZE,
        }
    }

    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn register_format(mut self, format: Box<dyn ContainerFormat>) -> Self {
        self.formats.push(format);
        self
    }

    pub fn resolve(
        &self,
        spec: &DeviceSpec,
        kind: ProxyKind,
        mode: AccessMode,
        policy: &dyn OverlayPolicy,
    ) -> Result<Resolution> {
        match spec {
            // Raw device references bypass the proxy kind entirely.
            DeviceSpec::PhysicalDrive(n) => {
                self.open_device_path(&physical_drive_path(*n), mode)
            }
            DeviceSpec::DevicePath(path) => self.open_device_path(Path::new(path), mode),
            DeviceSpec::Image(path) => self.resolve_image(path, kind, mode, policy),
        }
    }

    fn open_device_path(&self, path: &Path, mode: AccessMode) -> Result<Resolution> {
        let store = if mode.is_writable() {
            FileStore::open_read_write(path)?
        } else {
            FileStore::open_read_only(path)?
        };
        let provider = RawProvider::with_sector_size(store, self.sector_size)?;
        Ok(Resolution::Provider {
            provider: Box::new(provider),
            media: MediaKind::HardDisk,
        })
    }

    fn resolve_image(
        &self,
        path: &Path,
        kind: ProxyKind,
        mode: AccessMode,
        policy: &dyn OverlayPolicy,
    ) -> Result<Resolution> {
        if !supported_access_modes(kind).contains(&mode) {
            return Err(ProviderError::UnsupportedAccessMode {
                kind: kind.label(),
                mode: mode.label(),
            });
        }

        let ext = extension_lowercase(path);
        let overlay = matches!(
            mode,
            AccessMode::ReadWriteOverlay | AccessMode::ReadWriteFileSystem
        );
        if overlay && NO_DIFFERENCING_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ProviderError::UnsupportedAccessMode {
                kind: kind.label(),
                mode: mode.label(),
            });
        }
        let media = if CD_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::OpticalDisc
        } else {
            MediaKind::HardDisk
        };

        if kind == ProxyKind::ContainerFormat
            && mode == AccessMode::ReadWriteOriginal
            && NATIVE_PASSTHROUGH_EXTENSIONS.contains(&ext.as_str())
        {
            tracing::debug!(path = %path.display(), "native passthrough, skipping proxy loop");
            return Ok(Resolution::NativePassthrough {
                path: path.to_path_buf(),
                media,
            });
        }

        let provider: Box<dyn Provider> = match kind {
            ProxyKind::None => Box::new(RawProvider::with_sector_size(
                if mode.is_writable() {
                    FileStore::open_read_write(path)?
                } else {
                    FileStore::open_read_only(path)?
                },
                self.sector_size,
            )?),
            ProxyKind::MultiPartRaw => {
                Box::new(MultiSegmentProvider::open(path, mode.is_writable())?)
            }
            ProxyKind::ContainerFormat => self.open_container(path, mode, policy)?,
        };

        Ok(Resolution::Provider { provider, media })
    }

    fn open_container(
        &self,
        path: &Path,
        mode: AccessMode,
        policy: &dyn OverlayPolicy,
    ) -> Result<Box<dyn Provider>> {
        let format = self
            .formats
            .iter()
            .find(|f| f.recognizes(path))
            .ok_or_else(|| ProviderError::UnsupportedFormat(path.display().to_string()))?;

        let overlay = matches!(
            mode,
            AccessMode::ReadWriteOverlay | AccessMode::ReadWriteFileSystem
        );
        if overlay {
            if !format.supports_differencing() {
                return Err(ProviderError::UnsupportedAccessMode {
                    kind: ProxyKind::ContainerFormat.label(),
                    mode: mode.label(),
                });
            }
            let store = open_with_overlay(format.as_ref(), path, policy)?;
            return Ok(Box::new(ContainerProvider::new(store)));
        }

        let store = format.open(path, mode == AccessMode::ReadWriteOriginal)?;
        Ok(Box::new(ContainerProvider::new(store)))
    }
}

fn extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(windows)]
fn physical_drive_path(n: u32) -> PathBuf {
    PathBuf::from(format!(r"\\.\PhysicalDrive{n}"))
}

#[cfg(not(windows))]
fn physical_drive_path(n: u32) -> PathBuf {
    PathBuf::from(format!("/dev/disk{n}"))
}

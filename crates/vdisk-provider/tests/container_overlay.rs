use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use vdisk_provider::{
    open_with_overlay, overlay_path_for, ContainerFormat, ContainerStore, FileStore,
    OverlayAction, OverlayPolicy, Provider, ProviderError, Resolution, Resolver,
    AccessMode, ByteStore, DeviceSpec, ProxyKind,
};

/// Test codec: the "container" is the file itself; a differencing store is a
/// full copy of the base taken at creation time.
struct CopyFormat {
    differencing: bool,
}

struct FileContainerStore {
    store: FileStore,
    length: u64,
}

impl ContainerStore for FileContainerStore {
    fn length(&self) -> u64 {
        self.length
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn is_writable(&self) -> bool {
        !self.store.is_read_only()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> vdisk_provider::Result<usize> {
        self.store.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> vdisk_provider::Result<usize> {
        self.store.write_at(offset, buf)
    }

    fn flush(&mut self) -> vdisk_provider::Result<()> {
        self.store.flush()
    }
}

impl CopyFormat {
    fn open_file(path: &Path, writable: bool) -> vdisk_provider::Result<Box<dyn ContainerStore>> {
        let mut store = if writable {
            FileStore::open_read_write(path)?
        } else {
            FileStore::open_read_only(path)?
        };
        let length = store.len()?;
        Ok(Box::new(FileContainerStore { store, length }))
    }
}

impl ContainerFormat for CopyFormat {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn recognizes(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("cimg")
    }

    fn supports_differencing(&self) -> bool {
        self.differencing
    }

    fn open(&self, path: &Path, writable: bool) -> vdisk_provider::Result<Box<dyn ContainerStore>> {
        Self::open_file(path, writable)
    }

    fn create_differencing(&self, base: &Path, overlay: &Path) -> vdisk_provider::Result<()> {
        if overlay.parent().map(|p| !p.exists()).unwrap_or(false) {
            return Err(ProviderError::Io("overlay directory missing".into()));
        }
        fs::copy(base, overlay).map_err(ProviderError::from)?;
        Ok(())
    }

    fn open_differencing(
        &self,
        _base: &Path,
        overlay: &Path,
    ) -> vdisk_provider::Result<Box<dyn ContainerStore>> {
        Self::open_file(overlay, true)
    }
}

struct RecordingPolicy {
    on_existing: OverlayAction,
    replacement: Option<PathBuf>,
    existing_seen: Cell<bool>,
}

impl OverlayPolicy for RecordingPolicy {
    fn existing_overlay(&self, _overlay: &Path) -> OverlayAction {
        self.existing_seen.set(true);
        self.on_existing
    }

    fn creation_failed(&self, _overlay: &Path, _error: &ProviderError) -> Option<PathBuf> {
        self.replacement.clone()
    }
}

fn base_image(dir: &Path) -> PathBuf {
    let path = dir.join("base.cimg");
    fs::write(&path, vec![0xAB; 4096]).unwrap();
    path
}

#[test]
fn overlay_is_created_next_to_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_image(dir.path());
    let format = CopyFormat { differencing: true };

    let mut store = open_with_overlay(
        &format,
        &base,
        &vdisk_provider::DefaultOverlayPolicy,
    )
    .unwrap();

    assert!(overlay_path_for(&base).exists());
    let mut buf = [0u8; 4];
    store.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0xAB; 4]);
}

#[test]
fn existing_overlay_consults_the_policy() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_image(dir.path());
    let overlay = overlay_path_for(&base);
    fs::write(&overlay, vec![0xCD; 4096]).unwrap();
    let format = CopyFormat { differencing: true };

    // Reuse keeps the existing bytes.
    let policy = RecordingPolicy {
        on_existing: OverlayAction::Reuse,
        replacement: None,
        existing_seen: Cell::new(false),
    };
    let mut store = open_with_overlay(&format, &base, &policy).unwrap();
    assert!(policy.existing_seen.get());
    let mut buf = [0u8; 4];
    store.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0xCD; 4]);

    // Recreate replaces them with a fresh copy of the base.
    let policy = RecordingPolicy {
        on_existing: OverlayAction::Recreate,
        replacement: None,
        existing_seen: Cell::new(false),
    };
    let mut store = open_with_overlay(&format, &base, &policy).unwrap();
    store.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, [0xAB; 4]);

    // Abort refuses to touch anything.
    fs::write(&overlay, vec![0xCD; 4096]).unwrap();
    let policy = RecordingPolicy {
        on_existing: OverlayAction::Abort,
        replacement: None,
        existing_seen: Cell::new(false),
    };
    let Err(err) = open_with_overlay(&format, &base, &policy) else {
        panic!("expected abort");
    };
    assert!(matches!(err, ProviderError::Aborted(_)));
}

#[test]
fn creation_failure_retries_at_replacement_path() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("missing-dir").join("base.cimg");
    fs::create_dir_all(base.parent().unwrap()).unwrap();
    fs::write(&base, vec![0xAB; 1024]).unwrap();

    // Force the first creation to fail by pointing the derived overlay into
    // a directory that does not exist.
    struct HostileFormat(CopyFormat);
    impl ContainerFormat for HostileFormat {
        fn name(&self) -> &'static str {
            "hostile"
        }
        fn recognizes(&self, path: &Path) -> bool {
            self.0.recognizes(path)
        }
        fn supports_differencing(&self) -> bool {
            true
        }
        fn open(
            &self,
            path: &Path,
            writable: bool,
        ) -> vdisk_provider::Result<Box<dyn ContainerStore>> {
            self.0.open(path, writable)
        }
        fn create_differencing(&self, base: &Path, overlay: &Path) -> vdisk_provider::Result<()> {
            if overlay.file_name().and_then(|n| n.to_str()) == Some("base-overlay.cimg") {
                return Err(ProviderError::Io("simulated creation failure".into()));
            }
            self.0.create_differencing(base, overlay)
        }
        fn open_differencing(
            &self,
            base: &Path,
            overlay: &Path,
        ) -> vdisk_provider::Result<Box<dyn ContainerStore>> {
            self.0.open_differencing(base, overlay)
        }
    }

    let replacement = base.with_file_name("recovered.cimg");
    let policy = RecordingPolicy {
        on_existing: OverlayAction::Reuse,
        replacement: Some(replacement.clone()),
        existing_seen: Cell::new(false),
    };

    let format = HostileFormat(CopyFormat { differencing: true });
    let store = open_with_overlay(&format, &base, &policy).unwrap();
    assert!(replacement.exists());
    assert_eq!(store.length(), 1024);
}

#[test]
fn resolver_opens_registered_container_formats() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_image(dir.path());

    let resolver =
        Resolver::new().register_format(Box::new(CopyFormat { differencing: false }));

    let resolution = resolver
        .resolve(
            &DeviceSpec::Image(base.clone()),
            ProxyKind::ContainerFormat,
            AccessMode::ReadOnly,
            &vdisk_provider::DefaultOverlayPolicy,
        )
        .unwrap();
    let Resolution::Provider { mut provider, .. } = resolution else {
        panic!("expected a provider resolution");
    };
    assert_eq!(provider.length(), 4096);
    assert!(!provider.is_writable());
    let mut buf = [0u8; 8];
    assert_eq!(provider.read_at(0, &mut buf).unwrap(), 8);

    // Overlay on a non-differencing codec is refused.
    let Err(err) = resolver.resolve(
        &DeviceSpec::Image(base),
        ProxyKind::ContainerFormat,
        AccessMode::ReadWriteOverlay,
        &vdisk_provider::DefaultOverlayPolicy,
    ) else {
        panic!("expected rejection");
    };
    assert!(matches!(err, ProviderError::UnsupportedAccessMode { .. }));
}

//! Storage provider abstraction for the vdisk block-device proxy.
//!
//! A [`Provider`] is a byte-addressable random-access store with a fixed
//! length and sector size. This crate provides:
//!
//! - [`RawProvider`]: a plain image file or raw physical device
//! - [`MultiSegmentProvider`]: numbered raw segment files joined in name order
//! - [`ContainerProvider`]: a parsed virtual-disk container behind the
//!   external [`ContainerFormat`] codec capability
//! - [`FakeMbrProvider`]: synthesizes a boot sector over a store whose own
//!   sector 0 is not a valid MBR
//! - [`CompareProvider`]: cross-checks reads against a second copy (debug aid)
//! - [`SharedAccessProvider`]: SCSI-style persistent reservation state
//! - [`Resolver`]: maps an image locator + proxy kind + access mode to a
//!   concrete provider
//!
//! The transport server and conversion pipeline live in sibling crates.

mod compare;
mod container;
mod error;
mod mbr;
mod multi;
mod provider;
mod raw;
mod resolve;
mod shared;
mod store;
pub(crate) mod util;

pub use compare::CompareProvider;
pub use container::{
    open_with_overlay, overlay_path_for, ContainerFormat, ContainerProvider, ContainerStore,
    DefaultOverlayPolicy, OverlayAction, OverlayPolicy, OVERLAY_SUFFIX,
};
pub use error::{ProviderError, Result};
pub use mbr::FakeMbrProvider;
pub use multi::{discover_segments, MultiSegmentProvider};
pub use provider::{Provider, SECTOR_SIZE};
pub use raw::RawProvider;
pub use resolve::{
    supported_access_modes, AccessMode, DeviceSpec, MediaKind, ProxyKind, Resolution, Resolver,
    CD_EXTENSIONS, NO_DIFFERENCING_EXTENSIONS,
};
pub use shared::{SharedAccessProvider, SharedOp, SharedRequest, SharedResponse};
pub use store::{ByteStore, FileStore, MemStore};

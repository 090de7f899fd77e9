//! X11 client connection core.
//!
//! A [`Connection`] encodes typed requests, tracks every request until its reply or error has
//! been consumed, and merges replies and events read from the server back into the order the
//! server produced them. Responses are consumed either by blocking on a [`Future`] or by a
//! callback that runs from [`Connection::dispatch`].

use crate::{error::Error, utils::impl_resource_id};

pub mod atoms;
pub mod connection;
pub mod dispatcher;
pub mod error;
mod event_queue;
pub mod events;
pub mod extensions;
pub mod future;
pub mod replies;
pub mod requests;
pub mod sequence;
pub mod setup;
pub mod transport;
mod utils;
pub mod wire;
pub mod xauth;
pub mod xerror;

pub use crate::{
    connection::{Connection, ConnectionOptions, RequestWriter},
    dispatcher::{Delegate, EventSource, ScopedEventDispatcher, XEventDispatcher},
    events::{Event, SomeEvent},
    future::Future,
    sequence::SequenceNumber,
    xerror::XError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ResourceId {
    pub(crate) value: u32,
}

impl ResourceId {
    pub fn value(self) -> u32 {
        self.value
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        Self { value }
    }
}

impl_resource_id!(WindowId);
impl_resource_id!(PixmapId);
impl_resource_id!(DrawableId);
impl_resource_id!(VisualId);
impl_resource_id!(ColormapId);

impl From<WindowId> for DrawableId {
    fn from(window: WindowId) -> Self {
        Self(window.id())
    }
}

impl From<PixmapId> for DrawableId {
    fn from(pixmap: PixmapId) -> Self {
        Self(pixmap.id())
    }
}

/// Hands out client side resource ids from the range the server assigned in the setup
#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    id_base: u32,
    id_mask: u32,
    next_id: u32,
}

impl IdAllocator {
    pub fn new(id_base: u32, id_mask: u32) -> Self {
        Self {
            id_base,
            id_mask,
            next_id: 1,
        }
    }

    pub fn allocate_id(&mut self) -> Result<ResourceId, Error> {
        let shift = self.id_mask.trailing_zeros();
        let new_part = self
            .next_id
            .checked_shl(shift)
            .map(|shifted| shifted & self.id_mask)
            .filter(|&part| part != 0 && part >> shift == self.next_id)
            .ok_or(Error::ResourceIdsExhausted)?;
        self.next_id += 1;

        Ok(ResourceId {
            value: self.id_base | new_part,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_stay_inside_the_mask() {
        let mut allocator = IdAllocator::new(0x0040_0000, 0x001f_ffff);
        assert_eq!(allocator.allocate_id().unwrap().value(), 0x0040_0001);
        assert_eq!(allocator.allocate_id().unwrap().value(), 0x0040_0002);

        // Mask not starting at bit 0
        let mut allocator = IdAllocator::new(0x0400_0000, 0x0000_0ff0);
        assert_eq!(allocator.allocate_id().unwrap().value(), 0x0400_0010);
        assert_eq!(allocator.allocate_id().unwrap().value(), 0x0400_0020);
    }

    #[test]
    fn running_out_of_ids_is_an_error() {
        let mut allocator = IdAllocator::new(0x0100_0000, 0b11);
        assert!(allocator.allocate_id().is_ok());
        assert!(allocator.allocate_id().is_ok());
        assert!(allocator.allocate_id().is_ok());
        assert!(matches!(
            allocator.allocate_id(),
            Err(Error::ResourceIdsExhausted)
        ));
    }

    #[test]
    fn windows_are_drawables() {
        let window = WindowId::from(0x0060_0001);
        assert_eq!(DrawableId::from(window).value(), 0x0060_0001);
        assert_eq!(u32::from(WindowId::NONE), 0);
    }
}

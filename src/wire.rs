//! Little endian encoding of X11 protocol structures.
//!
//! The protocol lays out every fixed-size field at an offset that is a multiple of its size, so
//! both [`WriteBuffer`] and [`ReadBuffer`] check natural alignment of scalar accesses in debug
//! builds. Variable length data is followed by zero padding up to the next 4 byte boundary.

use crate::{error::Error, utils::pad};

/// Fixed-size value that can be copied to and from the wire as is
pub trait WireScalar: Copy {
    const SIZE: usize;

    fn put(self, out: &mut Vec<u8>);

    /// `raw` is exactly [`Self::SIZE`] bytes long
    fn get(raw: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($ty:ident),* $(,)?) => {
        $(
            #[automatically_derived]
            impl WireScalar for $ty {
                const SIZE: usize = ::std::mem::size_of::<$ty>();

                #[inline]
                fn put(self, out: &mut Vec<u8>) {
                    out.extend(self.to_le_bytes());
                }

                #[inline]
                fn get(raw: &[u8]) -> Self {
                    let mut bytes = [0u8; ::std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(raw);
                    $ty::from_le_bytes(bytes)
                }
            }

            #[automatically_derived]
            impl ToLeBytes for $ty {
                #[inline]
                fn to_le_bytes(&self, w: &mut WriteBuffer) {
                    w.write(*self);
                }
            }

            #[automatically_derived]
            impl FromLeBytes for $ty {
                #[inline]
                fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
                    r.read()
                }
            }
        )*
    };
}

impl_wire_scalar!(u8, i8, u16, i16, u32, i32, u64, i64);

impl WireScalar for bool {
    const SIZE: usize = 1;

    #[inline]
    fn put(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    #[inline]
    fn get(raw: &[u8]) -> Self {
        raw[0] != 0
    }
}

impl ToLeBytes for bool {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(*self);
    }
}

impl FromLeBytes for bool {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.read()
    }
}

pub trait ToLeBytes {
    fn to_le_bytes(&self, w: &mut WriteBuffer);
}

pub trait FromLeBytes: Sized {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error>;
}

/// Growable buffer that requests and test fixtures are serialized into
#[derive(Debug, Default)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn write<T: WireScalar>(&mut self, value: T) {
        debug_assert_eq!(
            self.bytes.len() % T::SIZE,
            0,
            "Unaligned write of {} byte value at offset {}",
            T::SIZE,
            self.bytes.len()
        );
        value.put(&mut self.bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Write `len` zero bytes
    pub fn pad(&mut self, len: usize) {
        self.bytes.resize(self.bytes.len() + len, 0);
    }

    /// Write zero bytes until the offset is a multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        debug_assert!(alignment.is_power_of_two());
        let rem = self.bytes.len() % alignment;
        if rem != 0 {
            self.pad(alignment - rem);
        }
    }

    /// Write bytes followed by padding to 4 bytes
    pub fn write_padded(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.pad(pad(bytes.len()));
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over bytes received from the server
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    #[inline]
    pub fn read<T: WireScalar>(&mut self) -> Result<T, Error> {
        debug_assert_eq!(
            self.offset % T::SIZE,
            0,
            "Unaligned read of {} byte value at offset {}",
            T::SIZE,
            self.offset
        );
        let raw = self.read_bytes(T::SIZE)?;
        Ok(T::get(raw))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.offset.checked_add(len).ok_or(Error::UnexpectedEof)?;
        let raw = self.data.get(self.offset..end).ok_or(Error::UnexpectedEof)?;
        self.offset = end;
        Ok(raw)
    }

    /// Read bytes and skip padding to 4 bytes after them
    pub fn read_padded(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let raw = self.read_bytes(len)?;
        self.skip(pad(len))?;
        Ok(raw)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.read_bytes(len).map(drop)
    }

    pub fn align(&mut self, alignment: usize) -> Result<(), Error> {
        debug_assert!(alignment.is_power_of_two());
        let rem = self.offset % alignment;
        if rem != 0 {
            self.skip(alignment - rem)?;
        }
        Ok(())
    }

    pub fn read_many<T: FromLeBytes>(&mut self, len: usize) -> Result<Vec<T>, Error> {
        (0..len).map(|_| T::from_le_bytes(self)).collect()
    }
}

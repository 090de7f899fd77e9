pub(crate) mod bin_parse {
    #[inline]
    pub fn u16_be(raw: &[u8]) -> Option<(u16, &[u8])> {
        let bytes = raw.get(0..2)?;
        let res = u16::from_be_bytes(bytes.try_into().ok()?);

        Some((res, &raw[2..]))
    }

    /// Vector with size as u16 big endian before elements
    #[inline]
    pub fn sized_u16_be_vec(raw: &[u8]) -> Option<(Vec<u8>, &[u8])> {
        let (len, raw) = u16_be(raw)?;
        let elements = raw.get(0..(len as usize))?.to_vec();
        Some((elements, &raw[(len as usize)..]))
    }
}

/// Number of bytes needed to pad `e` to a multiple of 4
pub(crate) fn pad(e: usize) -> usize {
    (4 - (e % 4)) % 4
}

pub(crate) fn display_maybe_utf8(buf: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(buf) {
        utf8.to_string()
    } else {
        format!("{:?}", buf)
    }
}

macro_rules! bitmask {
    (#[repr($inner:ident)] bitmask $ty:ident { $($key:ident = $value:literal,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $ty {
            value: $inner,
        }

        #[automatically_derived]
        impl $ty {
            $(pub const $key: Self = Self { value: $value };)*

            #[inline]
            pub fn empty() -> Self {
                Self { value: 0 }
            }

            #[inline]
            pub fn from_raw(value: $inner) -> Self {
                Self { value }
            }

            #[inline]
            pub fn raw(self) -> $inner {
                self.value
            }

            #[inline]
            pub fn contains(self, other: Self) -> bool {
                self.value & other.value == other.value
            }

            #[inline]
            pub fn intersects(self, other: Self) -> bool {
                self.value & other.value != 0
            }
        }

        #[automatically_derived]
        impl ::std::ops::BitOr for $ty {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self::Output {
                Self {
                    value: self.value | rhs.value,
                }
            }
        }

        #[automatically_derived]
        impl ::std::ops::BitOrAssign for $ty {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.value |= rhs.value
            }
        }

        #[automatically_derived]
        impl ::std::convert::From<$ty> for $inner {
            #[inline]
            fn from(val: $ty) -> Self {
                val.value
            }
        }
    };
}
pub(crate) use bitmask;

/// Create an enum with basic implementations like going from underlying representation to the enum
macro_rules! impl_enum {
    (#[repr($inner:ident)] enum $name:ident { $($key:ident = $value:literal,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr($inner)]
        pub enum $name {
            $($key = $value,)*
        }

        #[automatically_derived]
        impl ::std::convert::TryFrom<$inner> for $name {
            type Error = $inner;

            #[inline]
            fn try_from(value: $inner) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$key),)*
                    _ => Err(value),
                }
            }
        }

        #[automatically_derived]
        impl ::std::convert::From<$name> for $inner {
            #[inline]
            fn from(value: $name) -> Self {
                value as $inner
            }
        }

        #[automatically_derived]
        impl $crate::wire::FromLeBytes for $name {
            fn from_le_bytes(r: &mut $crate::wire::ReadBuffer<'_>) -> Result<Self, $crate::error::Error> {
                let raw: $inner = r.read()?;
                Self::try_from(raw).map_err(|_| $crate::error::Error::InvalidEnum(stringify!($name), raw as u64))
            }
        }
    };
}
pub(crate) use impl_enum;

macro_rules! impl_resource_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub(crate) $crate::ResourceId);

        #[automatically_derived]
        impl $name {
            pub const NONE: Self = Self($crate::ResourceId { value: 0 });

            #[inline]
            pub fn id(self) -> $crate::ResourceId {
                self.0
            }

            #[inline]
            pub fn value(self) -> u32 {
                self.0.value()
            }
        }

        #[automatically_derived]
        impl ::std::convert::From<u32> for $name {
            #[inline]
            fn from(value: u32) -> Self {
                Self($crate::ResourceId { value })
            }
        }

        #[automatically_derived]
        impl ::std::convert::From<$crate::ResourceId> for $name {
            #[inline]
            fn from(value: $crate::ResourceId) -> Self {
                Self(value)
            }
        }

        #[automatically_derived]
        impl ::std::convert::From<$name> for u32 {
            #[inline]
            fn from(value: $name) -> Self {
                value.0.value()
            }
        }

        #[automatically_derived]
        impl $crate::wire::ToLeBytes for $name {
            #[inline]
            fn to_le_bytes(&self, w: &mut $crate::wire::WriteBuffer) {
                w.write(self.value());
            }
        }

        #[automatically_derived]
        impl $crate::wire::FromLeBytes for $name {
            #[inline]
            fn from_le_bytes(r: &mut $crate::wire::ReadBuffer<'_>) -> Result<Self, $crate::error::Error> {
                Ok(Self::from(r.read::<u32>()?))
            }
        }
    };
}
pub(crate) use impl_resource_id;

#[test]
fn pad_to_four_bytes() {
    assert_eq!(pad(0), 0);
    assert_eq!(pad(1), 3);
    assert_eq!(pad(2), 2);
    assert_eq!(pad(3), 1);
    assert_eq!(pad(4), 0);
    assert_eq!(pad(13), 3);
}

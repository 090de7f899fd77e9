use crate::{utils::impl_resource_id, ResourceId};

impl_resource_id!(AtomId);

macro_rules! predefined_atoms {
    ($($name:ident = $value:expr,)*) => {
        impl AtomId {
            $(pub const $name: Self = Self(ResourceId { value: $value });)*

            /// Name of a predefined atom, other atoms need a `GetAtomName` round trip
            pub fn predefined_name(self) -> Option<&'static str> {
                match self.0.value {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

predefined_atoms! {
    PRIMARY = 1,
    SECONDARY = 2,
    ATOM = 4,
    CARDINAL = 6,
    DRAWABLE = 17,
    INTEGER = 19,
    RESOURCE_MANAGER = 23,
    STRING = 31,
    VISUALID = 32,
    WINDOW = 33,
    WM_COMMAND = 34,
    WM_HINTS = 35,
    WM_CLIENT_MACHINE = 36,
    WM_ICON_NAME = 37,
    WM_NAME = 39,
    WM_NORMAL_HINTS = 40,
    WM_CLASS = 67,
    WM_TRANSIENT_FOR = 68,
}

impl AtomId {
    /// Atoms up to this one are defined by the core protocol and never need interning
    pub const LAST_PREDEFINED: Self = Self::WM_TRANSIENT_FOR;

    pub fn is_predefined(self) -> bool {
        self != Self::NONE && self.0.value <= Self::LAST_PREDEFINED.0.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_lookup() {
        assert_eq!(AtomId::WM_NAME.predefined_name(), Some("WM_NAME"));
        assert_eq!(AtomId::from(0x1e0).predefined_name(), None);
        assert!(AtomId::CARDINAL.is_predefined());
        assert!(!AtomId::NONE.is_predefined());
        assert!(!AtomId::from(69).is_predefined());
    }
}

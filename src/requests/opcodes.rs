pub const MAP_WINDOW: u8 = 8;
pub const CONFIGURE_WINDOW: u8 = 12;
pub const GET_GEOMETRY: u8 = 14;
pub const INTERN_ATOM: u8 = 16;
pub const GET_ATOM_NAME: u8 = 17;
pub const CHANGE_PROPERTY: u8 = 18;
pub const GET_PROPERTY: u8 = 20;
pub const GET_INPUT_FOCUS: u8 = 43;
pub const QUERY_EXTENSION: u8 = 98;
pub const NO_OPERATION: u8 = 127;

use crate::{error::Error, utils::bin_parse};
use std::{fmt::Display, fs, io::Read};

/// `FamilyLocal` in Xauthority files
pub const FAMILY_LOCAL: u16 = 256;
/// `FamilyWild` in Xauthority files
pub const FAMILY_WILD: u16 = 65535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XAuth {
    pub family: u16,
    pub address: Vec<u8>,
    /// Display number as decimal string
    pub display: Vec<u8>,
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

impl XAuth {
    pub fn from_bytes(mut raw_input: &[u8]) -> Option<Vec<Self>> {
        let mut entries = Vec::new();
        while !raw_input.is_empty() {
            let (family, raw) = bin_parse::u16_be(raw_input)?;
            let (address, raw) = bin_parse::sized_u16_be_vec(raw)?;
            let (display, raw) = bin_parse::sized_u16_be_vec(raw)?;
            let (name, raw) = bin_parse::sized_u16_be_vec(raw)?;
            let (data, raw) = bin_parse::sized_u16_be_vec(raw)?;
            raw_input = raw;
            entries.push(Self {
                family,
                address,
                display,
                name,
                data,
            });
        }

        Some(entries)
    }

    pub fn from_file<P>(path: P) -> Result<Vec<Self>, Error>
    where
        P: AsRef<std::path::Path> + Display + Clone,
    {
        let mut auth_file = fs::File::open(path.clone())
            .map_err(|err| Error::CouldNotReadXAuthFile(path.to_string(), err))?;
        let mut auth_raw = Vec::new();
        auth_file.read_to_end(&mut auth_raw)?;
        XAuth::from_bytes(&auth_raw).ok_or(Error::InvalidXAuthFile(path.to_string()))
    }

    fn home_path() -> Option<String> {
        let var = "HOME";
        let home = std::env::var(var).ok()?;
        Some(format!("{}/.Xauthority", home))
    }

    pub fn from_env() -> Result<Vec<Self>, Error> {
        let var = "XAUTHORITY";
        let file_path = std::env::var(var).map_err(|_| Error::NoEnv(var));
        match file_path {
            Ok(file_path) => Self::from_file(file_path),
            Err(_) => {
                let file_path = Self::home_path().ok_or(Error::NoEnv(var))?;
                Self::from_file(file_path)
            }
        }
    }

    /// Pick the entry for a local display. Entries without a display number match any display.
    pub fn for_display(entries: Vec<Self>, display_sequence: u32) -> Option<Self> {
        let display = display_sequence.to_string();
        entries.into_iter().find(|entry| {
            matches!(entry.family, FAMILY_LOCAL | FAMILY_WILD)
                && (entry.display.is_empty() || entry.display == display.as_bytes())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(family: u16, address: &[u8], display: &[u8], data: &[u8]) -> Vec<u8> {
        let mut raw = family.to_be_bytes().to_vec();
        for field in [address, display, b"MIT-MAGIC-COOKIE-1".as_slice(), data] {
            raw.extend((field.len() as u16).to_be_bytes());
            raw.extend(field);
        }
        raw
    }

    #[test]
    fn parse_multiple_entries() {
        let mut raw = entry_bytes(FAMILY_LOCAL, b"host", b"0", &[1; 16]);
        raw.extend(entry_bytes(FAMILY_LOCAL, b"host", b"1", &[2; 16]));

        let entries = XAuth::from_bytes(&raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].display, b"1");
        assert_eq!(entries[1].name, b"MIT-MAGIC-COOKIE-1");

        let picked = XAuth::for_display(entries, 1).unwrap();
        assert_eq!(picked.data, vec![2; 16]);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let raw = entry_bytes(FAMILY_LOCAL, b"host", b"0", &[1; 16]);
        assert_eq!(XAuth::from_bytes(&raw[..raw.len() - 1]), None);
    }
}

//! **HeaderValues / HashValues** — ordered `(key, value)` maps serialized
//! per the format's textual header schema (spec §3/§4.4).
//!
//! Generalizes the teacher's `EwfHeaderSection`, which zlib-inflated the
//! payload into an opaque `Vec<u8>` (or, in the richer `ewf.rs` variant, a
//! `HashMap<String,String>`) without ever writing one back out. This module
//! keeps the teacher's zlib-wrapped-payload idiom but parses/serializes the
//! documented tab-separated schema (grounded in
//! `original_source/ewftools/imaging_handle.c`) and preserves key order,
//! since libewf's header dialects are positional, not a bag of keys.

use crate::codec::{deflate_compress, deflate_decompress, CompressionLevel};
use crate::error::{EwfError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDialect {
    Header,
    Header2,
    XHeader,
}

/// Ordered key/value pairs. Order matters: it is the column order of the
/// tab-separated schema on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderValues(pub Vec<(String, String)>);

impl HeaderValues {
    pub fn new() -> Self {
        HeaderValues(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.into();
        } else {
            self.0.push((key.to_string(), value.into()));
        }
    }

    /// Serializes to the `header`/`header2` textual schema:
    /// ```text
    /// 1
    /// main
    /// col1\tcol2\t...
    /// val1\tval2\t...
    ///
    /// ```
    pub fn to_header_text(&self, dialect: HeaderDialect) -> String {
        let category = match dialect {
            HeaderDialect::XHeader => "xheader",
            _ => "main",
        };
        let columns: Vec<&str> = self.0.iter().map(|(k, _)| k.as_str()).collect();
        let values: Vec<&str> = self.0.iter().map(|(_, v)| v.as_str()).collect();
        format!(
            "1\n{}\n{}\n{}\n\n",
            category,
            columns.join("\t"),
            values.join("\t")
        )
    }

    pub fn from_header_text(text: &str) -> Result<HeaderValues> {
        let mut lines = text.lines();
        let _version = lines.next();
        let _category = lines.next();
        let columns = lines
            .next()
            .ok_or_else(|| EwfError::InvalidData("header section missing columns line".into()))?;
        let values = lines.next().unwrap_or("");
        let columns: Vec<&str> = columns.split('\t').collect();
        let values: Vec<&str> = values.split('\t').collect();
        let mut out = HeaderValues::new();
        for (i, col) in columns.iter().enumerate() {
            let value = values.get(i).copied().unwrap_or("");
            out.0.push((col.to_string(), value.to_string()));
        }
        Ok(out)
    }

    /// Packs the textual schema into the zlib-compressed payload the
    /// `header`/`header2`/`xheader` sections store on disk.
    pub fn pack(&self, dialect: HeaderDialect) -> Result<Vec<u8>> {
        let text = self.to_header_text(dialect);
        deflate_compress(text.as_bytes(), CompressionLevel::Default)
    }

    pub fn unpack(compressed: &[u8]) -> Result<HeaderValues> {
        let text = deflate_decompress(compressed)?;
        let text = String::from_utf8_lossy(&text).to_string();
        HeaderValues::from_header_text(&text)
    }
}

/// Hash values (`hash`/`digest` sections) are a flat, fixed schema rather
/// than the positional header columns; kept as their own small ordered map
/// for clarity at call sites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashValues(pub Vec<(String, String)>);

impl HashValues {
    pub fn new() -> Self {
        HashValues(Vec::new())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.into();
        } else {
            self.0.push((key.to_string(), value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values_roundtrip_through_text() {
        let mut values = HeaderValues::new();
        values.set("case_number", "C2026-001");
        values.set("examiner_name", "k1nd0ne");
        values.set("compression_type", "f");

        let text = values.to_header_text(HeaderDialect::Header);
        let decoded = HeaderValues::from_header_text(&text).unwrap();
        assert_eq!(decoded.get("case_number"), Some("C2026-001"));
        assert_eq!(decoded.get("examiner_name"), Some("k1nd0ne"));
        assert_eq!(decoded.get("compression_type"), Some("f"));
    }

    #[test]
    fn header_values_pack_unpack_roundtrip() {
        let mut values = HeaderValues::new();
        values.set("notes", "acquired for a teaching exercise");
        let packed = values.pack(HeaderDialect::Header).unwrap();
        let unpacked = HeaderValues::unpack(&packed).unwrap();
        assert_eq!(unpacked.get("notes"), Some("acquired for a teaching exercise"));
    }

    #[test]
    fn set_overwrites_existing_key_in_place() {
        let mut values = HeaderValues::new();
        values.set("a", "1");
        values.set("b", "2");
        values.set("a", "3");
        assert_eq!(values.0, vec![("a".into(), "3".into()), ("b".into(), "2".into())]);
    }
}

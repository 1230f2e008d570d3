//! B2 API types
//!
//! Response shapes for the Backblaze B2 calls the object store backend uses.

use serde::{Deserialize, Deserializer};

use crate::cache::Metadata;

/// Deserialize a number that might be encoded as a string or null.
/// B2 API sometimes returns numeric fields as strings (e.g. "1536964279000")
/// and may return null for folder/hide entries.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Null-tolerant map: folder entries may carry `"fileInfo": null`
fn deserialize_file_info<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

/// B2 file/folder information from API responses
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Full file path within the bucket
    pub file_name: String,
    /// File size in bytes (0 for folders)
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub content_length: u64,
    /// Action type: "upload", "folder", "hide", "start"
    pub action: String,
    /// Custom metadata uploaded with the file (`X-Bz-Info-*` headers)
    #[serde(default, deserialize_with = "deserialize_file_info")]
    pub file_info: Metadata,
}

/// Response from b2_list_file_names API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    /// List of files in the response
    pub files: Vec<FileInfo>,
    /// Next file name for pagination (None if no more files)
    pub next_file_name: Option<String>,
}

impl FileInfo {
    /// Check if this entry represents a directory
    pub fn is_directory(&self) -> bool {
        self.action == "folder" || self.file_name.ends_with('/')
    }

    /// Check if this entry is a hide marker rather than live content
    pub fn is_hidden(&self) -> bool {
        self.action == "hide"
    }
}

//! Chunk metadata sent with every chunked-upload request

use serde::{Deserialize, Serialize};

use lfs_common::validators::{self, Md5Error};

use crate::transfers::TransferError;

/// Describes one chunk of a chunked upload
///
/// `md5` is the expected checksum of the whole merged file. Only the
/// declared last chunk must carry it, since that chunk triggers the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub file_name: String,
    pub total_size: u64,
    pub chunk_index: u32,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    pub md5: Option<String>,
}

impl ChunkDescriptor {
    /// Whether this is the declared last chunk
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.total_chunks > 0 && self.chunk_index == self.total_chunks - 1
    }

    /// Check the descriptor before any bytes are stored
    pub fn validate(&self) -> Result<(), TransferError> {
        validators::validate_file_name(&self.file_name)
            .map_err(|reason| TransferError::invalid_name(&self.file_name, reason))?;

        if self.total_chunks == 0 {
            return Err(TransferError::InvalidChunk(
                "total chunk count must be positive".into(),
            ));
        }
        if self.chunk_index >= self.total_chunks {
            return Err(TransferError::InvalidChunk(format!(
                "chunk index {} out of range for {} chunks",
                self.chunk_index, self.total_chunks
            )));
        }

        if self.is_last() {
            let md5 = self.md5.as_deref().unwrap_or_default();
            validators::validate_md5(md5).map_err(|e| {
                TransferError::InvalidChunk(match e {
                    Md5Error::InvalidLength => "last chunk must carry a 32-digit MD5".into(),
                    Md5Error::InvalidCharacters => "MD5 must be hexadecimal".into(),
                })
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(chunk_index: u32, total_chunks: u32, md5: Option<&str>) -> ChunkDescriptor {
        ChunkDescriptor {
            file_name: "video.mp4".into(),
            total_size: 3000,
            chunk_index,
            chunk_size: 1024,
            total_chunks,
            md5: md5.map(str::to_string),
        }
    }

    #[test]
    fn test_is_last() {
        assert!(descriptor(2, 3, None).is_last());
        assert!(!descriptor(1, 3, None).is_last());
        assert!(!descriptor(0, 0, None).is_last());
    }

    #[test]
    fn test_middle_chunk_needs_no_md5() {
        assert!(descriptor(0, 3, None).validate().is_ok());
    }

    #[test]
    fn test_last_chunk_needs_md5() {
        assert!(matches!(
            descriptor(2, 3, None).validate(),
            Err(TransferError::InvalidChunk(_))
        ));
        assert!(matches!(
            descriptor(2, 3, Some("not-a-hash")).validate(),
            Err(TransferError::InvalidChunk(_))
        ));
        assert!(
            descriptor(2, 3, Some("D41D8CD98F00B204E9800998ECF8427E"))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_index_bounds() {
        assert!(descriptor(3, 3, None).validate().is_err());
        assert!(descriptor(0, 0, None).validate().is_err());
    }

    #[test]
    fn test_bad_name() {
        let mut d = descriptor(0, 1, Some("d41d8cd98f00b204e9800998ecf8427e"));
        d.file_name = "../escape".into();
        assert!(matches!(
            d.validate(),
            Err(TransferError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_deserialize_form_fields() {
        let json = r#"{
            "fileName": "a.bin",
            "totalSize": 10,
            "chunkIndex": 0,
            "chunkSize": 10,
            "totalChunks": 1,
            "md5": "d41d8cd98f00b204e9800998ecf8427e"
        }"#;
        let d: ChunkDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.is_last());
        assert!(d.validate().is_ok());
    }
}

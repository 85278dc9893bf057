// src/protocol/framing.rs
//! Binary frame headers for direct-channel file transfer.
//!
//! File frames carry an ASCII header prefix on an otherwise binary frame:
//!
//! ```text
//! FILESTART:<transferId>|FILENAME:<name>|SIZE:<bytes>|CHUNKS:<n>|END|[payload]
//! CHUNK:<transferId>|<index>|<total>|<payload>
//! ```
//!
//! A `FILESTART` frame with `CHUNKS:1` carries the whole file inline after
//! the header; larger transfers send a bare metadata frame followed by
//! indexed `CHUNK` frames.

use crate::protocol::types::ProtocolError;

pub const FILE_START_PREFIX: &[u8] = b"FILESTART:";
pub const CHUNK_PREFIX: &[u8] = b"CHUNK:";
const HEADER_END: &[u8] = b"|END|";

/// Parsed `FILESTART` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStart {
    pub transfer_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
}

/// Parsed `CHUNK` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub transfer_id: String,
    pub index: u32,
    pub total: u32,
}

/// Build a `FILESTART` frame; `payload` is empty for multi-chunk transfers.
///
/// Pipe characters in the file name would corrupt the header, so they are
/// replaced before encoding.
pub fn encode_file_start(meta: &FileStart, payload: &[u8]) -> Vec<u8> {
    let safe_name = meta.file_name.replace('|', "_");
    let header = format!(
        "FILESTART:{}|FILENAME:{}|SIZE:{}|CHUNKS:{}|END|",
        meta.transfer_id, safe_name, meta.total_size, meta.total_chunks
    );

    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Build a `CHUNK` frame around one chunk of file data
pub fn encode_chunk(header: &ChunkHeader, payload: &[u8]) -> Vec<u8> {
    let prefix = format!(
        "CHUNK:{}|{}|{}|",
        header.transfer_id, header.index, header.total
    );

    let mut frame = Vec::with_capacity(prefix.len() + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Does this frame start a file transfer?
pub fn is_file_start(frame: &[u8]) -> bool {
    frame.starts_with(FILE_START_PREFIX)
}

/// Is this frame a file chunk?
pub fn is_chunk(frame: &[u8]) -> bool {
    frame.starts_with(CHUNK_PREFIX)
}

/// Parse a `FILESTART` frame into its header and inline payload
pub fn parse_file_start(frame: &[u8]) -> Result<(FileStart, &[u8]), ProtocolError> {
    let body = frame
        .strip_prefix(FILE_START_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidFormat("Missing FILESTART prefix".into()))?;

    let end = find_subslice(body, HEADER_END)
        .ok_or_else(|| ProtocolError::InvalidFormat("FILESTART header missing END marker".into()))?;
    let header = std::str::from_utf8(&body[..end])
        .map_err(|_| ProtocolError::InvalidFormat("FILESTART header is not UTF-8".into()))?;
    let payload = &body[end + HEADER_END.len()..];

    let mut parts = header.split('|');
    let transfer_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProtocolError::MissingField("transferId".into()))?
        .to_string();
    let file_name = field(parts.next(), "FILENAME:")?.to_string();
    let total_size = field(parts.next(), "SIZE:")?
        .parse::<u64>()
        .map_err(|e| ProtocolError::InvalidValue(format!("SIZE: {}", e)))?;
    let total_chunks = field(parts.next(), "CHUNKS:")?
        .parse::<u32>()
        .map_err(|e| ProtocolError::InvalidValue(format!("CHUNKS: {}", e)))?;

    if total_chunks == 0 {
        return Err(ProtocolError::InvalidValue("CHUNKS must be positive".into()));
    }

    Ok((
        FileStart {
            transfer_id,
            file_name,
            total_size,
            total_chunks,
        },
        payload,
    ))
}

/// Parse a `CHUNK` frame into its header and chunk payload
pub fn parse_chunk(frame: &[u8]) -> Result<(ChunkHeader, &[u8]), ProtocolError> {
    let body = frame
        .strip_prefix(CHUNK_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidFormat("Missing CHUNK prefix".into()))?;

    // Header is the first three pipe-terminated ASCII fields
    let mut cursor = 0usize;
    let mut bounds = [0usize; 3];
    for slot in bounds.iter_mut() {
        let rel = find_subslice(&body[cursor..], b"|")
            .ok_or_else(|| ProtocolError::InvalidFormat("CHUNK header truncated".into()))?;
        *slot = cursor + rel;
        cursor += rel + 1;
    }

    let transfer_id = std::str::from_utf8(&body[..bounds[0]])
        .map_err(|_| ProtocolError::InvalidFormat("CHUNK transfer id is not UTF-8".into()))?
        .to_string();
    if transfer_id.is_empty() {
        return Err(ProtocolError::MissingField("transferId".into()));
    }
    let index = parse_u32(&body[bounds[0] + 1..bounds[1]], "index")?;
    let total = parse_u32(&body[bounds[1] + 1..bounds[2]], "total")?;

    Ok((
        ChunkHeader {
            transfer_id,
            index,
            total,
        },
        &body[cursor..],
    ))
}

fn field<'a>(part: Option<&'a str>, prefix: &str) -> Result<&'a str, ProtocolError> {
    part.and_then(|s| s.strip_prefix(prefix))
        .ok_or_else(|| ProtocolError::MissingField(prefix.trim_end_matches(':').into()))
}

fn parse_u32(bytes: &[u8], name: &str) -> Result<u32, ProtocolError> {
    std::str::from_utf8(bytes)
        .map_err(|_| ProtocolError::InvalidValue(format!("{} is not UTF-8", name)))?
        .parse::<u32>()
        .map_err(|e| ProtocolError::InvalidValue(format!("{}: {}", name, e)))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_start_round_trip() {
        let meta = FileStart {
            transfer_id: "Ab3dEf90".into(),
            file_name: "photo.jpg".into(),
            total_size: 10_240,
            total_chunks: 1,
        };
        let frame = encode_file_start(&meta, b"\x00\x01binary payload\xff");

        assert!(is_file_start(&frame));
        let (parsed, payload) = parse_file_start(&frame).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(payload, b"\x00\x01binary payload\xff");
    }

    #[test]
    fn test_file_start_metadata_only() {
        let meta = FileStart {
            transfer_id: "Zz9yXw12".into(),
            file_name: "big.bin".into(),
            total_size: 1_048_576,
            total_chunks: 16,
        };
        let frame = encode_file_start(&meta, &[]);
        let (parsed, payload) = parse_file_start(&frame).unwrap();
        assert_eq!(parsed.total_chunks, 16);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_file_name_pipe_is_sanitized() {
        let meta = FileStart {
            transfer_id: "idididid".into(),
            file_name: "weird|name.txt".into(),
            total_size: 1,
            total_chunks: 1,
        };
        let frame = encode_file_start(&meta, b"x");
        let (parsed, _) = parse_file_start(&frame).unwrap();
        assert_eq!(parsed.file_name, "weird_name.txt");
    }

    #[test]
    fn test_chunk_round_trip() {
        let header = ChunkHeader {
            transfer_id: "Ab3dEf90".into(),
            index: 7,
            total: 16,
        };
        let frame = encode_chunk(&header, &[0u8, 255, 42]);

        assert!(is_chunk(&frame));
        assert!(!is_file_start(&frame));
        let (parsed, payload) = parse_chunk(&frame).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload, &[0u8, 255, 42]);
    }

    #[test]
    fn test_malformed_headers() {
        assert!(parse_file_start(b"FILESTART:abc|no-end-marker").is_err());
        assert!(parse_file_start(b"FILESTART:abc|FILENAME:f|SIZE:x|CHUNKS:1|END|").is_err());
        assert!(parse_file_start(b"FILESTART:abc|FILENAME:f|SIZE:1|CHUNKS:0|END|").is_err());
        assert!(parse_chunk(b"CHUNK:only|two").is_err());
        assert!(parse_chunk(b"CHUNK:id|notanumber|3|payload").is_err());
    }
}

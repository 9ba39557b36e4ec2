use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use sha2::{Digest, Sha256};

/// Bytes read from the start of a file to recognize its container. Ogg
/// needs the codec id that follows the first page header (offset 28..36).
pub const HEADER_LEN: u64 = 64;

/// Tags extracted from audio file metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<i32>,
    pub genre: Option<String>,
}

/// Everything the sync core needs to know about audio containers.
pub trait TagReader: Sync {
    /// Whether the first [`HEADER_LEN`] bytes (plus the lowercased file
    /// extension as a hint) belong to a container we can sync.
    fn is_supported(&self, header: &[u8], extension: &str) -> bool;

    fn read_tags(&self, path: &Path) -> Result<TagInfo, String>;

    /// Deterministic hash of the audio content, independent of tags.
    fn content_hash(&self, path: &Path) -> io::Result<String>;
}

/// [`TagReader`] backed by lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn is_supported(&self, header: &[u8], extension: &str) -> bool {
        // lofty can't see past an ID3v2 tag from a fixed buffer; those files
        // are MPEG (or the odd FLAC/AAC with a stray ID3 block), so trust the
        // extension for them.
        if header.starts_with(b"ID3") {
            return FileType::from_ext(extension).is_none_or(is_syncable);
        }
        match FileType::from_buffer(header) {
            Some(file_type) => is_syncable(file_type),
            // Ogg page with an unrecognized or truncated first packet
            None if header.starts_with(b"OggS") => {
                FileType::from_ext(extension).is_some_and(is_syncable)
            }
            None => false,
        }
    }

    fn read_tags(&self, path: &Path) -> Result<TagInfo, String> {
        let tagged_file = lofty::read_from_path(path).map_err(|e| e.to_string())?;

        // Try primary tag, then fall back
        let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        else {
            return Ok(TagInfo::default());
        };

        Ok(TagInfo {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            album_artist: tag.get_string(&ItemKey::AlbumArtist).map(|s| s.to_string()),
            track_number: tag.track(),
            disc_number: tag.disk(),
            year: tag.year().map(|y| y as i32),
            genre: tag.genre().map(|s| s.to_string()),
        })
    }

    fn content_hash(&self, path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(audio_hash(&bytes))
    }
}

fn is_syncable(file_type: FileType) -> bool {
    matches!(
        file_type,
        FileType::Mpeg
            | FileType::Flac
            | FileType::Opus
            | FileType::Vorbis
            | FileType::Wav
            | FileType::Mp4
            | FileType::Aiff
    )
}

/// Read the container header of a file.
pub fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    File::open(path)?.take(HEADER_LEN).read_to_end(&mut header)?;
    Ok(header)
}

/// SHA-256 of the bytes between a leading ID3v2 tag and a trailing ID3v1
/// tag, hex encoded. Retagging an MP3 leaves the hash unchanged.
pub fn audio_hash(bytes: &[u8]) -> String {
    let start = id3v2_len(bytes).min(bytes.len());
    let mut end = bytes.len();
    if end - start >= 128 && &bytes[end - 128..end - 125] == b"TAG" {
        end -= 128;
    }

    let digest = Sha256::digest(&bytes[start..end]);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Total size of an ID3v2 tag at the start of `bytes`, 0 if there is none.
fn id3v2_len(bytes: &[u8]) -> usize {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return 0;
    }
    // Size is a 28-bit syncsafe integer, footer flag adds another 10 bytes
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b as usize & 0x7f));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id3(payload_len: u8) -> Vec<u8> {
        let mut v = b"ID3\x03\x00\x00\x00\x00\x00".to_vec();
        v.push(payload_len);
        v.extend(std::iter::repeat_n(0u8, payload_len as usize));
        v
    }

    #[test]
    fn recognizes_common_headers() {
        let reader = LoftyTagReader;
        assert!(reader.is_supported(b"fLaC\x00\x00\x00\x22", "flac"));
        assert!(reader.is_supported(b"RIFF\x24\x00\x00\x00WAVEfmt ", "wav"));
        assert!(reader.is_supported(b"ID3\x03\x00\x00\x00\x00\x00\x00", "mp3"));
    }

    /// First Ogg page carrying the start of an identification packet.
    fn ogg_page(packet: &[u8]) -> Vec<u8> {
        let mut page = b"OggS\x00\x02".to_vec();
        page.extend_from_slice(&[0; 8]); // granule position
        page.extend_from_slice(&[1, 0, 0, 0]); // serial
        page.extend_from_slice(&[0; 4]); // sequence
        page.extend_from_slice(&[0; 4]); // crc
        page.push(1);
        page.push(packet.len() as u8);
        page.extend_from_slice(packet);
        page.resize(HEADER_LEN as usize, 0);
        page
    }

    #[test]
    fn recognizes_ogg_codecs_after_page_header() {
        let reader = LoftyTagReader;
        let vorbis = ogg_page(b"\x01vorbis\x00\x00\x00\x00\x02\x44\xac\x00\x00");
        let opus = ogg_page(b"OpusHead\x01\x02\x38\x01\x80\xbb\x00\x00");
        assert!(reader.is_supported(&vorbis, "ogg"));
        assert!(reader.is_supported(&opus, "opus"));
        // the container is identified from content, not the extension
        assert!(reader.is_supported(&opus, "bin"));
    }

    #[test]
    fn truncated_ogg_falls_back_to_extension() {
        let reader = LoftyTagReader;
        let short = b"OggS\x00\x02\x00\x00\x00\x00\x00\x00\x00\x00";
        assert!(reader.is_supported(short, "opus"));
        assert!(!reader.is_supported(short, "txt"));
    }

    #[test]
    fn scanned_ogg_file_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.ogg");
        let mut bytes = ogg_page(b"\x01vorbis\x00\x00\x00\x00\x02\x44\xac\x00\x00");
        bytes.extend_from_slice(b"more pages");
        std::fs::write(&path, bytes).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.len(), HEADER_LEN as usize);
        assert!(LoftyTagReader.is_supported(&header, "ogg"));
    }

    #[test]
    fn rejects_non_audio() {
        let reader = LoftyTagReader;
        assert!(!reader.is_supported(b"%PDF-1.7\n", "pdf"));
        assert!(!reader.is_supported(b"hello world", "mp3"));
        assert!(!reader.is_supported(b"", "mp3"));
    }

    #[test]
    fn id3_header_trusts_audio_extension_only() {
        let reader = LoftyTagReader;
        assert!(reader.is_supported(b"ID3\x04\x00\x00\x00\x00\x00\x00", "unknownext"));
        assert!(!reader.is_supported(b"ID3\x04\x00\x00\x00\x00\x00\x00", "ape"));
    }

    #[test]
    fn hash_ignores_id3_tags() {
        let audio = b"\xff\xfb\x90\x00some mpeg frames";

        let mut bare = audio.to_vec();
        let mut tagged = id3(20);
        tagged.extend_from_slice(audio);
        let mut v1 = b"TAG".to_vec();
        v1.extend(std::iter::repeat_n(b' ', 125));
        tagged.extend_from_slice(&v1);

        assert_eq!(audio_hash(&bare), audio_hash(&tagged));

        bare.push(0);
        assert_ne!(audio_hash(&bare), audio_hash(&tagged));
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            audio_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn truncated_id3_does_not_panic() {
        let mut bytes = b"ID3\x03\x00\x00\x00\x00\x7f\x7f".to_vec();
        bytes.extend_from_slice(b"short");
        assert_eq!(audio_hash(&bytes), audio_hash(b""));
    }
}

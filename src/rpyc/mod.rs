//! Compiled Ren'Py script reading (`.rpyc` / `.rpymc`).
//!
//! Compiled scripts are pickle streams wrapped in a framed container: the
//! `RENPY RPC2` magic followed by a slot table of `(slot, start, length)`
//! u32 triples, with slot 1 holding the zlib-compressed pickle. Older files
//! and screen caches skip the slot table, so a zlib-magic scan is the
//! fallback. Deserialization goes through the restricted unpickler in
//! [`pickle`]; no code from the game is ever executed.

pub mod pickle;
pub mod walker;

use anyhow::{Context, Result, bail};
use flate2::read::ZlibDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;

use pickle::{Unpickler, Value};
use walker::{AstWalker, HarvestedText};

const RPC2_MAGIC: &[u8] = b"RENPY RPC2";
const MAX_DECOMPRESSED_BYTES: u64 = 256 * 1024 * 1024;

/// Extract the pickle payload from a compiled script container.
pub fn read_payload(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.starts_with(RPC2_MAGIC) {
        let mut pos = RPC2_MAGIC.len();
        while pos + 12 <= raw.len() {
            let slot = u32::from_le_bytes(raw[pos..pos + 4].try_into().unwrap());
            let start = u32::from_le_bytes(raw[pos + 4..pos + 8].try_into().unwrap()) as usize;
            let length = u32::from_le_bytes(raw[pos + 8..pos + 12].try_into().unwrap()) as usize;
            pos += 12;
            if slot == 0 {
                break;
            }
            if slot == 1 {
                let end = start
                    .checked_add(length)
                    .filter(|&e| e <= raw.len())
                    .context("RPC2 slot points outside the file")?;
                return decompress(&raw[start..end]);
            }
        }
        bail!("RPC2 container has no data slot");
    }

    // Legacy layout / .rpymc: the zlib stream follows the RENPY header at an
    // unfixed offset; scan for the zlib magic.
    if raw.starts_with(b"RENPY") {
        for magic in [[0x78, 0x9c], [0x78, 0x01], [0x78, 0xda]] {
            if let Some(idx) = find_subslice(raw, &magic) {
                return decompress(&raw[idx..]);
            }
        }
        bail!("No zlib stream found after RENPY header");
    }

    // Bare zlib stream.
    if raw.first() == Some(&0x78) {
        return decompress(raw);
    }

    bail!("Not a compiled Ren'Py script")
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(MAX_DECOMPRESSED_BYTES + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("Failed to decompress script payload")?;
    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        bail!("Decompressed script exceeds the {MAX_DECOMPRESSED_BYTES} byte guard");
    }
    Ok(out)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Unpickle a compiled script file into the fake-object tree.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Value> {
    let raw = fs::read(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let payload = read_payload(&raw)
        .with_context(|| format!("Failed to unwrap {}", path.as_ref().display()))?;
    Unpickler::new(&payload)
        .load()
        .with_context(|| format!("Failed to deserialize {}", path.as_ref().display()))
}

/// Harvest translatable strings from a `.rpyc`/`.rpymc` file.
///
/// The root of an `.rpyc` pickle is a `(data, statements)` tuple; the
/// walker handles either shape. Errors are the caller's cue to skip the
/// file and record a diagnostic, never to abort the run.
pub fn extract_file<P: AsRef<Path>>(path: P) -> Result<Vec<HarvestedText>> {
    let root = load_file(path)?;
    let mut walker = AstWalker::new();
    walker.walk(&root);
    Ok(walker.entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    // A minimal pickle of a renpy.ast.Say node; see pickle.rs tests for the
    // opcode layout.
    fn say_pickle() -> Vec<u8> {
        let mut p: Vec<u8> = vec![0x80, 2];
        p.extend(b"crenpy.ast\nSay\n");
        p.push(b')');
        p.push(0x81);
        p.push(b'}');
        p.push(b'(');
        p.extend([0x8c, 4]);
        p.extend(b"what");
        p.extend([0x8c, 5]);
        p.extend(b"Hello");
        p.push(b'u');
        p.push(b'b');
        p.push(b'.');
        p
    }

    #[test]
    fn reads_rpc2_container() {
        let compressed = zlib(&say_pickle());
        let mut file = Vec::new();
        file.extend_from_slice(RPC2_MAGIC);
        let start = (RPC2_MAGIC.len() + 24) as u32;
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&start.to_le_bytes());
        file.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        file.extend_from_slice(&[0u8; 12]); // terminator slot
        file.extend_from_slice(&compressed);

        let payload = read_payload(&file).unwrap();
        assert_eq!(payload, say_pickle());
    }

    #[test]
    fn reads_legacy_zlib_scan() {
        let mut file = b"RENPY screen cache".to_vec();
        file.extend_from_slice(&zlib(&say_pickle()));
        let payload = read_payload(&file).unwrap();
        assert_eq!(payload, say_pickle());
    }

    #[test]
    fn end_to_end_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.rpyc");

        let compressed = zlib(&say_pickle());
        let mut file = Vec::new();
        file.extend_from_slice(RPC2_MAGIC);
        let start = (RPC2_MAGIC.len() + 24) as u32;
        file.extend_from_slice(&1u32.to_le_bytes());
        file.extend_from_slice(&start.to_le_bytes());
        file.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        file.extend_from_slice(&[0u8; 12]);
        file.extend_from_slice(&compressed);
        fs::write(&path, &file).unwrap();

        let entries = extract_file(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Hello");
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.rpyc");
        fs::write(&path, b"RENPY RPC2 garbage").unwrap();
        assert!(extract_file(&path).is_err());
    }
}

//! RPA-3.0 archive reading and writing.
//!
//! Layout: an ASCII header line `RPA-3.0 <offset> <key>\n`, raw file
//! payloads, then at `offset` a zlib-compressed pickled dictionary mapping
//! archive path to `[(offset ^ key, length ^ key, prefix_bytes)]`.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rand::RngCore;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_pickle::{HashableValue, Value as PickleValue};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

// Guards against hostile archives.
const MAX_INDEX_ENTRIES: usize = 100_000;
const MAX_INDEX_BYTES: usize = 64 * 1024 * 1024;
const MAX_ENTRY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RpaEntry {
    pub offset: u64,
    pub length: u64,
    pub prefix: Vec<u8>,
}

#[derive(Debug)]
pub struct RpaArchive {
    path: PathBuf,
    pub index: HashMap<String, RpaEntry>,
}

impl RpaArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).context("Failed to open RPA file")?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut first_line = Vec::new();
        reader
            .read_until(b'\n', &mut first_line)
            .context("Failed to read RPA header")?;

        let (index_offset, key) = Self::parse_header(&first_line)?;
        if index_offset >= file_len {
            anyhow::bail!("RPA index offset {index_offset:#x} lies past end of file");
        }

        reader
            .seek(SeekFrom::Start(index_offset))
            .context("Failed to seek to index")?;
        let mut compressed = Vec::new();
        reader
            .read_to_end(&mut compressed)
            .context("Failed to read index data")?;

        let index = Self::parse_index(&compressed, key, file_len)?;

        Ok(Self { path, index })
    }

    fn parse_header(header: &[u8]) -> Result<(u64, u64)> {
        let header_str = String::from_utf8_lossy(header);
        let header_str = header_str.trim();

        if !header_str.starts_with("RPA-3.0") {
            anyhow::bail!("Unsupported or invalid RPA format: {}", header_str);
        }

        let parts: Vec<&str> = header_str.split_whitespace().collect();
        if parts.len() < 3 {
            anyhow::bail!("Invalid RPA-3.0 header format");
        }
        let offset =
            u64::from_str_radix(parts[1], 16).context("Invalid index offset in header")?;
        let key = u64::from_str_radix(parts[2], 16).context("Invalid key in header")?;
        Ok((offset, key))
    }

    fn parse_index(compressed: &[u8], key: u64, file_len: u64) -> Result<HashMap<String, RpaEntry>> {
        let mut decoder = ZlibDecoder::new(compressed).take(MAX_INDEX_BYTES as u64 + 1);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress index")?;
        if decompressed.len() > MAX_INDEX_BYTES {
            anyhow::bail!("RPA index exceeds the {MAX_INDEX_BYTES} byte guard");
        }

        let pickle_value: PickleValue = serde_pickle::from_slice(&decompressed, Default::default())
            .context("Failed to parse pickle index")?;

        let dict = match pickle_value {
            PickleValue::Dict(d) => d,
            _ => anyhow::bail!("Index is not a dictionary"),
        };
        if dict.len() > MAX_INDEX_ENTRIES {
            anyhow::bail!("RPA index exceeds the {MAX_INDEX_ENTRIES} entry guard");
        }

        let mut index = HashMap::with_capacity(dict.len());
        for (k, v) in dict {
            let path = Self::extract_string_from_hashable(&k)?;
            let entry = Self::extract_entry(&v, key)?;
            if entry.length > MAX_ENTRY_BYTES
                || entry.offset.checked_add(entry.length).map(|end| end > file_len).unwrap_or(true)
            {
                anyhow::bail!("RPA entry '{}' points outside the archive", path);
            }
            index.insert(path, entry);
        }

        Ok(index)
    }

    fn extract_string_from_hashable(value: &HashableValue) -> Result<String> {
        match value {
            HashableValue::String(s) => Ok(s.clone()),
            HashableValue::Bytes(b) => {
                String::from_utf8(b.clone()).or_else(|_| Ok(String::from_utf8_lossy(b).to_string()))
            }
            _ => anyhow::bail!("Expected string key, got {:?}", value),
        }
    }

    fn extract_entry(value: &PickleValue, key: u64) -> Result<RpaEntry> {
        let list = match value {
            PickleValue::List(l) => l,
            _ => anyhow::bail!("Entry is not a list"),
        };
        let first = list.first().context("Empty entry list")?;

        // serde-pickle may deserialize Python tuples as either Tuple or List
        let tuple = match first {
            PickleValue::Tuple(t) => t.clone(),
            PickleValue::List(l) => l.clone(),
            _ => anyhow::bail!("Entry item is not a tuple or list: {:?}", first),
        };
        if tuple.len() < 2 {
            anyhow::bail!("Entry tuple too short");
        }

        let offset = Self::extract_int(&tuple[0])?;
        let length = Self::extract_int(&tuple[1])?;
        let prefix = tuple.get(2).map(Self::extract_bytes).unwrap_or_default();

        Ok(RpaEntry {
            offset: (offset as u64) ^ key,
            length: (length as u64) ^ key,
            prefix,
        })
    }

    fn extract_int(value: &PickleValue) -> Result<i64> {
        match value {
            PickleValue::I64(i) => Ok(*i),
            PickleValue::Int(i) => i
                .try_into()
                .map_err(|_| anyhow::anyhow!("Integer too large")),
            _ => anyhow::bail!("Expected integer, got {:?}", value),
        }
    }

    fn extract_bytes(value: &PickleValue) -> Vec<u8> {
        match value {
            PickleValue::Bytes(b) => b.clone(),
            PickleValue::String(s) => s.as_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .index
            .get(name)
            .with_context(|| format!("File '{}' not found in archive", name))?;

        let mut archive = File::open(&self.path).context("Failed to open archive")?;
        archive
            .seek(SeekFrom::Start(entry.offset))
            .context("Failed to seek to file data")?;

        let mut data = vec![0u8; entry.length as usize];
        archive
            .read_exact(&mut data)
            .context("Failed to read file data")?;

        if entry.prefix.is_empty() {
            Ok(data)
        } else {
            let mut full = Vec::with_capacity(entry.prefix.len() + data.len());
            full.extend_from_slice(&entry.prefix);
            full.extend_from_slice(&data);
            Ok(full)
        }
    }

    pub fn extract_file<P: AsRef<Path>>(&self, name: &str, output_dir: P) -> Result<PathBuf> {
        // Hostile archives can carry traversal paths; keep output inside.
        if name.contains("..") || name.starts_with('/') {
            anyhow::bail!("Refusing archive path '{}'", name);
        }
        let output_path = output_dir.as_ref().join(name);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }

        let data = self.read_file(name)?;
        fs::write(&output_path, data).context("Failed to write output file")?;
        Ok(output_path)
    }

    pub fn extract_all<P: AsRef<Path>>(
        &self,
        output_dir: P,
        progress: Option<&indicatif::ProgressBar>,
    ) -> Result<Vec<PathBuf>> {
        let mut names: Vec<&String> = self.index.keys().collect();
        names.sort();
        let mut extracted = Vec::with_capacity(names.len());

        for name in names {
            let path = self.extract_file(name, output_dir.as_ref())?;
            extracted.push(path);
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        Ok(extracted)
    }

    pub fn file_count(&self) -> usize {
        self.index.len()
    }
}

struct WriterEntry {
    offset: u64,
    length: u64,
    archive_path: String,
}

/// Streams files into an RPA-3.0 archive. The header is written as a
/// placeholder first and rewritten with the real index offset at the end.
pub struct RpaWriter {
    file: BufWriter<File>,
    key: u64,
    header_len: usize,
    entries: Vec<WriterEntry>,
}

impl RpaWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
        let file = File::create(path.as_ref()).context("Failed to create RPA file")?;
        let mut writer = BufWriter::new(file);

        let key = rand::rngs::OsRng.next_u32() as u64;

        // "RPA-3.0 " + 16 hex + " " + 8 hex + "\n"
        let header_len = format!("RPA-3.0 {:016x} {:08x}\n", 0u64, key).len();
        writer.write_all(&vec![b' '; header_len])?;

        Ok(Self {
            file: writer,
            key,
            header_len,
            entries: Vec::new(),
        })
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, local_path: P, archive_path: &str) -> Result<()> {
        let mut file = File::open(local_path.as_ref())
            .with_context(|| format!("Failed to open {}", local_path.as_ref().display()))?;

        let offset = self.file.stream_position()?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let length = buffer.len() as u64;
        self.file.write_all(&buffer)?;

        self.entries.push(WriterEntry {
            offset,
            length,
            archive_path: archive_path.replace('\\', "/"),
        });

        Ok(())
    }

    pub fn add_bytes(&mut self, data: &[u8], archive_path: &str) -> Result<()> {
        let offset = self.file.stream_position()?;
        self.file.write_all(data)?;
        self.entries.push(WriterEntry {
            offset,
            length: data.len() as u64,
            archive_path: archive_path.replace('\\', "/"),
        });
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.file.stream_position()?;

        let mut entries = BTreeMap::new();
        for entry in &self.entries {
            entries.insert(
                entry.archive_path.clone(),
                vec![(
                    (entry.offset ^ self.key) as i64,
                    (entry.length ^ self.key) as i64,
                    Vec::<u8>::new(),
                )],
            );
        }
        let index = RpaIndex { entries };

        let pickled = serde_pickle::to_vec(&index, Default::default())
            .context("Failed to serialize index")?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&pickled)?;
        let compressed = encoder.finish()?;
        self.file.write_all(&compressed)?;

        self.file.seek(SeekFrom::Start(0))?;
        let header = format!("RPA-3.0 {:016x} {:08x}\n", index_offset, self.key);
        debug_assert_eq!(header.len(), self.header_len);
        self.file.write_all(header.as_bytes())?;
        self.file.flush()?;

        Ok(())
    }
}

/// Pack a mapping of archive path → local path. The writer half of the
/// round-trip contract: unpacking the result yields byte-identical files.
pub fn pack_files<P: AsRef<Path>>(files: &BTreeMap<String, PathBuf>, output: P) -> Result<()> {
    let mut writer = RpaWriter::new(output)?;
    for (archive_path, local_path) in files {
        writer.add_file(local_path, archive_path)?;
    }
    writer.finish()
}

/// Pack all matching files under a directory, keeping relative paths.
pub fn pack_directory<P: AsRef<Path>, Q: AsRef<Path>>(
    dir: P,
    output: Q,
    extensions: &[&str],
) -> Result<usize> {
    let root = dir.as_ref();
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !extensions.is_empty() && !extensions.contains(&ext) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.insert(rel, entry.path().to_path_buf());
    }
    if files.is_empty() {
        anyhow::bail!("No matching files found in {}", root.display());
    }
    let count = files.len();
    pack_files(&files, output)?;
    Ok(count)
}

struct RpaIndex {
    entries: BTreeMap<String, Vec<(i64, i64, Vec<u8>)>>,
}

impl Serialize for RpaIndex {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            // String keys - serde_pickle serializes &[u8] as an int list,
            // and Ren'Py accepts either str or bytes keys.
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_preserves_bytes_and_paths() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("tl/turkish")).unwrap();
        fs::write(src.join("tl/turkish/script.rpy"), b"translate turkish strings:\n").unwrap();
        fs::write(src.join("binary.dat"), [0u8, 1, 2, 255, 254]).unwrap();

        let rpa = dir.path().join("out.rpa");
        let count = pack_directory(&src, &rpa, &[]).unwrap();
        assert_eq!(count, 2);

        let archive = RpaArchive::open(&rpa).unwrap();
        assert_eq!(archive.file_count(), 2);
        assert_eq!(
            archive.read_file("tl/turkish/script.rpy").unwrap(),
            b"translate turkish strings:\n"
        );
        assert_eq!(archive.read_file("binary.dat").unwrap(), vec![0u8, 1, 2, 255, 254]);
    }

    #[test]
    fn header_is_rpa3() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let rpa = dir.path().join("out.rpa");
        pack_directory(dir.path(), &rpa, &["txt"]).unwrap();

        let content = fs::read(&rpa).unwrap();
        assert!(content.starts_with(b"RPA-3.0 "));
        assert_eq!(content[..34].iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn rejects_traversal_paths() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let rpa = dir.path().join("out.rpa");
        let mut writer = RpaWriter::new(&rpa).unwrap();
        writer.add_bytes(b"evil", "../escape.txt").unwrap();
        writer.finish().unwrap();

        let archive = RpaArchive::open(&rpa).unwrap();
        let out = dir.path().join("out");
        assert!(archive.extract_file("../escape.txt", &out).is_err());
    }

    #[test]
    fn rejects_truncated_archive() {
        let dir = TempDir::new().unwrap();
        let rpa = dir.path().join("bad.rpa");
        fs::write(&rpa, "RPA-3.0 00000000ffffffff 00000000\n").unwrap();
        assert!(RpaArchive::open(&rpa).is_err());
    }
}

use rekord_types::ObjectId;

use crate::error::{RekordError, Result};

/// Object type tags as stored in the envelope header and mixed into the
/// object ID derivation. The two-generation split (Directory1/2,
/// Snapshot1/2) is the format-evolution mechanism: readers accept both,
/// writers emit the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Chunk = 0,
    File = 1,
    Directory1 = 2,
    Snapshot1 = 3,
    Link = 4,
    Directory2 = 5,
    Snapshot2 = 6,
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Chunk),
            1 => Ok(Self::File),
            2 => Ok(Self::Directory1),
            3 => Ok(Self::Snapshot1),
            4 => Ok(Self::Link),
            5 => Ok(Self::Directory2),
            6 => Ok(Self::Snapshot2),
            _ => Err(RekordError::UnknownObjectType(v)),
        }
    }
}

/// Maximum bytes a file object may carry inline instead of referencing
/// chunks (min chunk size / 4).
pub const MAX_INLINE_LEN: u64 = 128 * 1024;

/// Entry kind inside a directory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    Directory = 1,
    File = 2,
    Link = 3,
}

impl EntryKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Directory),
            2 => Ok(Self::File),
            3 => Ok(Self::Link),
            _ => Err(RekordError::Corrupt(format!("unknown entry kind {v}"))),
        }
    }
}

/// Kind of object a snapshot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RootKind {
    Directory = 1,
    File = 2,
}

impl RootKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Directory),
            2 => Ok(Self::File),
            _ => Err(RekordError::Corrupt(format!("unknown root kind {v}"))),
        }
    }
}

/// File content: an ordered chunk list, or the raw bytes inline for tiny
/// files. Decoders accept both; the put pipeline always emits chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Chunks(Vec<FileChunkRef>),
    Inline(Vec<u8>),
}

/// One `(offset, chunk-ID)` entry of a file object. Offsets are cumulative
/// and the final chunk must end exactly at the file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChunkRef {
    pub offset: u64,
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileObject {
    pub len: u64,
    pub content: FileContent,
}

/// One named entry of a directory object. `mtime` is Unix microseconds;
/// `size` is the entry's logical size (subtree total for directories).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub id: ObjectId,
    pub mode: u32,
    pub mtime: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryObject {
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotObject {
    /// Creation time, Unix microseconds.
    pub time: i64,
    /// User-assigned name; empty means unnamed.
    pub name: String,
    pub root: ObjectId,
    pub root_kind: RootKind,
    pub logical_size: i64,
    pub stored_size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkObject {
    pub target: String,
}

/// A decoded repository object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Chunk(Vec<u8>),
    File(FileObject),
    Directory(DirectoryObject),
    Snapshot(SnapshotObject),
    Link(LinkObject),
}

impl Object {
    /// The type tag written for this object (always the latest generation).
    pub fn emit_type(&self) -> ObjectType {
        match self {
            Object::Chunk(_) => ObjectType::Chunk,
            Object::File(_) => ObjectType::File,
            Object::Directory(_) => ObjectType::Directory2,
            Object::Snapshot(_) => ObjectType::Snapshot2,
            Object::Link(_) => ObjectType::Link,
        }
    }
}

const FILE_FLAG_INLINE: u8 = 0x01;

// ---------------------------------------------------------------------------
// Encoding. All integers little-endian; strings are length-prefixed UTF-8
// with no terminator. The encoding must be byte-stable: the object ID is
// derived from it.
// ---------------------------------------------------------------------------

/// Encode an object into its canonical byte stream.
///
/// Directory entries are sorted by byte-wise ascending name here, so the
/// encoding (and therefore the ID) is independent of arrival order.
pub fn encode(object: &Object) -> Vec<u8> {
    match object {
        Object::Chunk(data) => data.clone(),
        Object::File(file) => encode_file(file),
        Object::Directory(dir) => encode_directory(dir),
        Object::Snapshot(snapshot) => encode_snapshot(snapshot),
        Object::Link(link) => encode_link(link),
    }
}

fn encode_file(file: &FileObject) -> Vec<u8> {
    match &file.content {
        FileContent::Chunks(chunks) => {
            let mut out = Vec::with_capacity(1 + 8 + 4 + chunks.len() * 40);
            out.push(0u8);
            out.extend_from_slice(&file.len.to_le_bytes());
            out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
            for chunk in chunks {
                out.extend_from_slice(&chunk.offset.to_le_bytes());
                out.extend_from_slice(&chunk.id.0);
            }
            out
        }
        FileContent::Inline(data) => {
            let mut out = Vec::with_capacity(1 + 8 + data.len());
            out.push(FILE_FLAG_INLINE);
            out.extend_from_slice(&file.len.to_le_bytes());
            out.extend_from_slice(data);
            out
        }
    }
}

fn encode_directory(dir: &DirectoryObject) -> Vec<u8> {
    let mut entries: Vec<&DirEntry> = dir.entries.iter().collect();
    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(entry.kind as u8);
        out.extend_from_slice(&entry.id.0);
        out.extend_from_slice(&entry.mode.to_le_bytes());
        out.extend_from_slice(&entry.mtime.to_le_bytes());
        out.extend_from_slice(&entry.size.to_le_bytes());
    }
    out
}

fn encode_snapshot(snapshot: &SnapshotObject) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 2 + snapshot.name.len() + 32 + 1 + 16);
    out.extend_from_slice(&snapshot.time.to_le_bytes());
    out.extend_from_slice(&(snapshot.name.len() as u16).to_le_bytes());
    out.extend_from_slice(snapshot.name.as_bytes());
    out.extend_from_slice(&snapshot.root.0);
    out.push(snapshot.root_kind as u8);
    out.extend_from_slice(&snapshot.logical_size.to_le_bytes());
    out.extend_from_slice(&snapshot.stored_size.to_le_bytes());
    out
}

fn encode_link(link: &LinkObject) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + link.target.len());
    out.extend_from_slice(&(link.target.len() as u32).to_le_bytes());
    out.extend_from_slice(link.target.as_bytes());
    out
}

// ---------------------------------------------------------------------------
// Decoding. Strict inverses: trailing bytes, bad UTF-8, unsorted directory
// entries, and non-monotonic file offsets are all `Corrupt`.
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| RekordError::Corrupt("object encoding truncated".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn id(&mut self) -> Result<ObjectId> {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(self.take(32)?);
        Ok(ObjectId(arr))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| RekordError::Corrupt("non-UTF-8 string in object".into()))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(RekordError::Corrupt(
                "trailing bytes after object encoding".into(),
            ));
        }
        Ok(())
    }
}

/// Decode an object from its type tag and canonical byte stream.
pub fn decode(object_type: ObjectType, data: &[u8]) -> Result<Object> {
    match object_type {
        ObjectType::Chunk => Ok(Object::Chunk(data.to_vec())),
        ObjectType::File => decode_file(data),
        ObjectType::Directory1 => decode_directory(data, false),
        ObjectType::Directory2 => decode_directory(data, true),
        ObjectType::Snapshot1 => decode_snapshot(data, false),
        ObjectType::Snapshot2 => decode_snapshot(data, true),
        ObjectType::Link => decode_link(data),
    }
}

fn decode_file(data: &[u8]) -> Result<Object> {
    let mut cursor = Cursor::new(data);
    let flags = cursor.u8()?;
    let len = cursor.u64()?;

    if flags & FILE_FLAG_INLINE != 0 {
        if len > MAX_INLINE_LEN {
            return Err(RekordError::Corrupt("inline file exceeds limit".into()));
        }
        let bytes = cursor.take(len as usize)?.to_vec();
        cursor.finish()?;
        return Ok(Object::File(FileObject {
            len,
            content: FileContent::Inline(bytes),
        }));
    }

    let count = cursor.u32()? as usize;
    let mut chunks = Vec::with_capacity(count.min(1 << 16));
    let mut prev_offset: Option<u64> = None;
    for _ in 0..count {
        let offset = cursor.u64()?;
        let id = cursor.id()?;
        match prev_offset {
            None if offset != 0 => {
                return Err(RekordError::Corrupt("first chunk offset not zero".into()));
            }
            Some(prev) if offset <= prev => {
                return Err(RekordError::Corrupt("chunk offsets not increasing".into()));
            }
            _ => {}
        }
        if offset >= len && !(offset == 0 && len == 0) {
            return Err(RekordError::Corrupt("chunk offset beyond file length".into()));
        }
        prev_offset = Some(offset);
        chunks.push(FileChunkRef { offset, id });
    }
    cursor.finish()?;
    Ok(Object::File(FileObject {
        len,
        content: FileContent::Chunks(chunks),
    }))
}

fn decode_directory(data: &[u8], with_size: bool) -> Result<Object> {
    let mut cursor = Cursor::new(data);
    let count = cursor.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    let mut prev_name: Option<String> = None;
    for _ in 0..count {
        let name_len = cursor.u16()? as usize;
        let name = cursor.string(name_len)?;
        let kind = EntryKind::from_u8(cursor.u8()?)?;
        let id = cursor.id()?;
        let mode = cursor.u32()?;
        let mtime = cursor.i64()?;
        let size = if with_size { cursor.i64()? } else { 0 };

        if let Some(prev) = &prev_name {
            if name.as_bytes() <= prev.as_bytes() {
                return Err(RekordError::Corrupt("directory entries not sorted".into()));
            }
        }
        prev_name = Some(name.clone());
        entries.push(DirEntry {
            name,
            kind,
            id,
            mode,
            mtime,
            size,
        });
    }
    cursor.finish()?;
    Ok(Object::Directory(DirectoryObject { entries }))
}

fn decode_snapshot(data: &[u8], with_stored: bool) -> Result<Object> {
    let mut cursor = Cursor::new(data);
    let time = cursor.i64()?;
    let name_len = cursor.u16()? as usize;
    let name = cursor.string(name_len)?;
    let root = cursor.id()?;
    let root_kind = RootKind::from_u8(cursor.u8()?)?;
    let logical_size = cursor.i64()?;
    let stored_size = if with_stored { cursor.i64()? } else { 0 };
    cursor.finish()?;
    Ok(Object::Snapshot(SnapshotObject {
        time,
        name,
        root,
        root_kind,
        logical_size,
        stored_size,
    }))
}

fn decode_link(data: &[u8]) -> Result<Object> {
    let mut cursor = Cursor::new(data);
    let len = cursor.u32()? as usize;
    let target = cursor.string(len)?;
    cursor.finish()?;
    Ok(Object::Link(LinkObject { target }))
}

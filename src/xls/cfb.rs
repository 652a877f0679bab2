//! OLE Compound File Binary container used by legacy Excel workbooks.
//! Reads version 3 and 4 files and writes deterministic version 3 files that
//! keep every directory entry as it was, apart from stream locations.

use std::collections::HashSet;

use encoding_rs::UTF_16LE;

use crate::error::TemplateError;
use crate::xls::bytes::{put_u16, put_u32, u16_at, u32_at, u32_iter};

const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const HEADER_SIZE: usize = 512;
const SECTOR_SIZE: usize = 512;
const MINI_SECTOR_SIZE: usize = 64;
const MINI_STREAM_CUTOFF: usize = 4096;
const DIRECTORY_ENTRY_SIZE: usize = 128;
const HEADER_DIFAT_ENTRIES: usize = 109;
const IDS_PER_SECTOR: usize = SECTOR_SIZE / 4;

const MAX_REG_SECT: u32 = 0xFFFF_FFFA;
const DIF_SECT: u32 = 0xFFFF_FFFC;
const FAT_SECT: u32 = 0xFFFF_FFFD;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FREE_SECT: u32 = 0xFFFF_FFFF;
const NO_STREAM: u32 = 0xFFFF_FFFF;

const STREAM: u8 = 2;
const ROOT: u8 = 5;
const BLACK: u8 = 1;

fn container(reason: impl Into<String>) -> TemplateError {
    TemplateError::Container(reason.into())
}

#[allow(clippy::cast_possible_truncation)]
fn sector_id(index: usize) -> u32 {
    index as u32
}

/// One 128-byte directory entry plus the stream it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirectoryEntry {
    raw: [u8; DIRECTORY_ENTRY_SIZE],
    data: Vec<u8>,
}

impl DirectoryEntry {
    fn unused() -> Self {
        let mut raw = [0u8; DIRECTORY_ENTRY_SIZE];
        put_u32(&mut raw, 68, NO_STREAM);
        put_u32(&mut raw, 72, NO_STREAM);
        put_u32(&mut raw, 76, NO_STREAM);
        Self {
            raw,
            data: Vec::new(),
        }
    }

    fn named(name: &str, kind: u8) -> Self {
        let mut entry = Self::unused();
        let units = name.encode_utf16().take(31).collect::<Vec<_>>();
        for (index, unit) in units.iter().enumerate() {
            put_u16(&mut entry.raw, index * 2, *unit);
        }
        #[allow(clippy::cast_possible_truncation)]
        put_u16(&mut entry.raw, 64, ((units.len() + 1) * 2) as u16);
        entry.raw[66] = kind;
        entry.raw[67] = BLACK;
        put_u32(&mut entry.raw, 116, END_OF_CHAIN);
        entry
    }

    fn kind(&self) -> u8 {
        self.raw[66]
    }

    fn name(&self) -> String {
        let length = usize::from(u16_at(&self.raw, 64).unwrap_or(0)).min(64);
        let (name, _, _) = UTF_16LE.decode(&self.raw[..length]);
        name.trim_end_matches('\0').to_string()
    }

    fn left(&self) -> u32 {
        u32_at(&self.raw, 68).unwrap_or(NO_STREAM)
    }

    fn right(&self) -> u32 {
        u32_at(&self.raw, 72).unwrap_or(NO_STREAM)
    }

    fn child(&self) -> u32 {
        u32_at(&self.raw, 76).unwrap_or(NO_STREAM)
    }

    fn start(&self) -> u32 {
        u32_at(&self.raw, 116).unwrap_or(END_OF_CHAIN)
    }

    /// Stream size; only the low half is meaningful in version 3 files.
    fn size(&self) -> usize {
        u32_at(&self.raw, 120).map_or(0, |size| size as usize)
    }

    fn set_location(&mut self, start: u32, size: usize) {
        put_u32(&mut self.raw, 116, start);
        put_u32(&mut self.raw, 120, sector_id(size));
        put_u32(&mut self.raw, 124, 0);
    }
}

/// Sector view over the raw file, skipping the header sector.
struct Sectors<'a> {
    data: &'a [u8],
    size: usize,
}

impl Sectors<'_> {
    fn get(&self, id: u32) -> Result<&[u8], TemplateError> {
        let start = (id as usize + 1) * self.size;
        if start >= self.data.len() {
            return Err(container(format!("sector {id} lies past the end of the file")));
        }
        let end = self.data.len().min(start + self.size);
        Ok(&self.data[start..end])
    }

    fn read_chain(
        &self,
        table: &[u32],
        start: u32,
        size: Option<usize>,
    ) -> Result<Vec<u8>, TemplateError> {
        let mut content = Vec::new();
        for id in follow(table, start)? {
            content.extend_from_slice(self.get(id)?);
        }
        truncate_to(content, size)
    }
}

fn truncate_to(mut content: Vec<u8>, size: Option<usize>) -> Result<Vec<u8>, TemplateError> {
    if let Some(size) = size {
        if content.len() < size {
            return Err(container(format!(
                "stream holds {} bytes but its directory entry claims {size}",
                content.len()
            )));
        }
        content.truncate(size);
    }
    Ok(content)
}

/// Follows an allocation chain, rejecting out-of-range links and cycles.
fn follow(table: &[u32], start: u32) -> Result<Vec<u32>, TemplateError> {
    let mut chain = Vec::new();
    let mut id = start;
    while id != END_OF_CHAIN {
        if id > MAX_REG_SECT || id as usize >= table.len() || chain.len() >= table.len() {
            return Err(container(format!("broken sector chain starting at {start}")));
        }
        chain.push(id);
        id = table[id as usize];
    }
    Ok(chain)
}

fn header_u32(data: &[u8], offset: usize) -> Result<u32, TemplateError> {
    u32_at(data, offset).ok_or_else(|| container("truncated header"))
}

/// Sectors handed out in order while writing, with their allocation table.
#[derive(Default)]
struct SectorLayout {
    fat: Vec<u32>,
    body: Vec<u8>,
}

impl SectorLayout {
    fn allocate(&mut self, data: &[u8]) -> u32 {
        if data.is_empty() {
            return END_OF_CHAIN;
        }
        let start = self.fat.len();
        let count = data.len().div_ceil(SECTOR_SIZE);
        for offset in 0..count {
            self.fat.push(if offset + 1 < count {
                sector_id(start + offset + 1)
            } else {
                END_OF_CHAIN
            });
        }
        self.body.extend_from_slice(data);
        self.body.resize((start + count) * SECTOR_SIZE, 0);
        sector_id(start)
    }
}

/// Number of FAT and DIFAT sectors needed to describe `data_sectors` plus
/// the table sectors themselves.
fn table_dimensions(data_sectors: usize) -> (usize, usize) {
    let mut fat: usize = 0;
    loop {
        let difat = fat
            .saturating_sub(HEADER_DIFAT_ENTRIES)
            .div_ceil(IDS_PER_SECTOR - 1);
        let needed = (data_sectors + fat + difat).div_ceil(IDS_PER_SECTOR);
        if needed <= fat {
            return (fat, difat);
        }
        fat = needed;
    }
}

fn ids_to_bytes(ids: &[u32]) -> Vec<u8> {
    ids.iter().flat_map(|id| id.to_le_bytes()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundFile {
    entries: Vec<DirectoryEntry>,
}

impl Default for CompoundFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CompoundFile {
    /// An empty container holding only the root storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![DirectoryEntry::named("Root Entry", ROOT)],
        }
    }

    /// Parses a compound file held in memory.
    ///
    /// # Errors
    /// [`TemplateError::Container`] on a bad signature, an unsupported sector
    /// size, or any allocation chain pointing outside the file.
    pub fn parse(bytes: &[u8]) -> Result<Self, TemplateError> {
        if bytes.len() < HEADER_SIZE || bytes[..8] != SIGNATURE {
            return Err(container("missing compound file signature"));
        }

        let major = u16_at(bytes, 26).unwrap_or_default();
        let shift = u16_at(bytes, 30).unwrap_or_default();
        let size = match (major, shift) {
            (3, 9) => 512,
            (4, 12) => 4096,
            _ => {
                return Err(container(format!(
                    "sector size 2^{shift} is invalid for major version {major}"
                )));
            }
        };
        let sectors = Sectors { data: bytes, size };

        let fat = Self::load_file_allocation_table(&sectors, bytes)?;
        let directory = sectors.read_chain(&fat, header_u32(bytes, 48)?, None)?;
        let mut entries = directory
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .map(|chunk| {
                let mut raw = [0u8; DIRECTORY_ENTRY_SIZE];
                raw.copy_from_slice(chunk);
                DirectoryEntry {
                    raw,
                    data: Vec::new(),
                }
            })
            .collect::<Vec<_>>();
        let root = entries
            .first()
            .filter(|entry| entry.kind() == ROOT)
            .ok_or_else(|| container("first directory entry is not the root storage"))?;

        let mini_stream = if root.size() > 0 {
            sectors.read_chain(&fat, root.start(), Some(root.size()))?
        } else {
            Vec::new()
        };
        let mini_fat = if header_u32(bytes, 64)? > 0 {
            let table = sectors.read_chain(&fat, header_u32(bytes, 60)?, None)?;
            u32_iter(&table).collect::<Vec<_>>()
        } else {
            Vec::new()
        };
        let cutoff = header_u32(bytes, 56)? as usize;

        for entry in entries.iter_mut().filter(|entry| entry.kind() == STREAM) {
            let size = entry.size();
            entry.data = if size == 0 {
                Vec::new()
            } else if size < cutoff {
                Self::read_mini_chain(&mini_fat, &mini_stream, entry.start(), size)?
            } else {
                sectors.read_chain(&fat, entry.start(), Some(size))?
            };
        }

        Ok(Self { entries })
    }

    fn load_file_allocation_table(
        sectors: &Sectors<'_>,
        bytes: &[u8],
    ) -> Result<Vec<u32>, TemplateError> {
        let fat_count = header_u32(bytes, 44)? as usize;
        let difat_count = header_u32(bytes, 72)? as usize;
        let sector_limit = bytes.len() / sectors.size;
        if fat_count > sector_limit || difat_count > sector_limit {
            return Err(container(format!(
                "header claims {fat_count} allocation and {difat_count} DIFAT sectors in a {sector_limit}-sector file"
            )));
        }

        let mut ids = u32_iter(&bytes[76..HEADER_SIZE]).collect::<Vec<_>>();
        let mut next = header_u32(bytes, 68)?;
        let mut visited = HashSet::new();
        while next <= MAX_REG_SECT && visited.len() < difat_count {
            if !visited.insert(next) {
                return Err(container(format!("DIFAT chain loops back to sector {next}")));
            }
            let values = u32_iter(sectors.get(next)?).collect::<Vec<_>>();
            let (link, body) = values
                .split_last()
                .ok_or_else(|| container("empty DIFAT sector"))?;
            ids.extend_from_slice(body);
            next = *link;
        }
        if visited.len() != difat_count {
            return Err(container(format!(
                "expected {difat_count} DIFAT sectors, found {}",
                visited.len()
            )));
        }

        let fat_ids = ids
            .into_iter()
            .filter(|id| *id <= MAX_REG_SECT)
            .take(fat_count)
            .collect::<Vec<_>>();
        if fat_ids.len() != fat_count {
            return Err(container(format!(
                "expected {fat_count} allocation table sectors, found {}",
                fat_ids.len()
            )));
        }

        let mut fat = Vec::with_capacity(fat_count * sectors.size / 4);
        for id in fat_ids {
            fat.extend(u32_iter(sectors.get(id)?));
        }
        Ok(fat)
    }

    fn read_mini_chain(
        mini_fat: &[u32],
        mini_stream: &[u8],
        start: u32,
        size: usize,
    ) -> Result<Vec<u8>, TemplateError> {
        let mut content = Vec::with_capacity(size);
        for id in follow(mini_fat, start)? {
            let offset = id as usize * MINI_SECTOR_SIZE;
            let sector = mini_stream
                .get(offset..offset + MINI_SECTOR_SIZE)
                .or_else(|| mini_stream.get(offset..))
                .filter(|sector| !sector.is_empty())
                .ok_or_else(|| container(format!("mini sector {id} lies past the mini stream")))?;
            content.extend_from_slice(sector);
        }
        truncate_to(content, Some(size))
    }

    /// Indices of the entries directly under the root storage.
    fn root_children(&self) -> Vec<usize> {
        let mut children = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![self.entries[0].child()];
        while let Some(id) = pending.pop() {
            let index = id as usize;
            if id == NO_STREAM || index >= self.entries.len() || !seen.insert(index) {
                continue;
            }
            let entry = &self.entries[index];
            pending.push(entry.right());
            pending.push(entry.left());
            children.push(index);
        }
        children
    }

    fn find_stream(&self, name: &str) -> Option<usize> {
        let wanted = name.to_uppercase();
        self.root_children().into_iter().find(|index| {
            let entry = &self.entries[*index];
            entry.kind() == STREAM && entry.name().to_uppercase() == wanted
        })
    }

    /// Contents of a stream stored directly under the root storage.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&[u8]> {
        self.find_stream(name)
            .map(|index| self.entries[index].data.as_slice())
    }

    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let mut names = self
            .root_children()
            .into_iter()
            .filter(|index| self.entries[*index].kind() == STREAM)
            .map(|index| self.entries[index].name())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Replaces a root-level stream, or adds it when absent.
    ///
    /// Adding a stream rebuilds the root's sibling links as a sorted chain;
    /// replacing one leaves the directory tree untouched.
    pub fn set_stream(&mut self, name: &str, data: Vec<u8>) {
        if let Some(index) = self.find_stream(name) {
            self.entries[index].data = data;
            return;
        }

        let mut entry = DirectoryEntry::named(name, STREAM);
        entry.data = data;
        self.entries.push(entry);

        let mut children = self.root_children();
        children.push(self.entries.len() - 1);
        children.sort_by_cached_key(|index| {
            let name = self.entries[*index].name();
            (name.encode_utf16().count(), name.to_uppercase())
        });
        for (position, index) in children.iter().enumerate() {
            let right = children
                .get(position + 1)
                .map_or(NO_STREAM, |next| sector_id(*next));
            let raw = &mut self.entries[*index].raw;
            put_u32(raw, 68, NO_STREAM);
            put_u32(raw, 72, right);
            raw[67] = BLACK;
        }
        let first = children.first().map_or(NO_STREAM, |index| sector_id(*index));
        put_u32(&mut self.entries[0].raw, 76, first);
    }

    /// Serializes the container as a version 3 compound file.
    ///
    /// Streams are laid out in directory order, so equal inputs give equal
    /// bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut entries = self.entries.clone();
        let mut mini_stream = Vec::new();
        let mut mini_fat = Vec::new();
        let mut large = Vec::new();

        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.kind() != STREAM {
                continue;
            }
            let length = entry.data.len();
            if length == 0 {
                entry.set_location(END_OF_CHAIN, 0);
            } else if length < MINI_STREAM_CUTOFF {
                let start = mini_fat.len();
                let count = length.div_ceil(MINI_SECTOR_SIZE);
                for offset in 0..count {
                    mini_fat.push(if offset + 1 < count {
                        sector_id(start + offset + 1)
                    } else {
                        END_OF_CHAIN
                    });
                }
                mini_stream.extend_from_slice(&entry.data);
                mini_stream.resize((start + count) * MINI_SECTOR_SIZE, 0);
                entry.set_location(sector_id(start), length);
            } else {
                large.push(index);
            }
        }

        let mut layout = SectorLayout::default();
        for index in large {
            let start = layout.allocate(&entries[index].data);
            let length = entries[index].data.len();
            entries[index].set_location(start, length);
        }

        let root_start = layout.allocate(&mini_stream);
        entries[0].set_location(root_start, mini_stream.len());

        mini_fat.resize(mini_fat.len().next_multiple_of(IDS_PER_SECTOR), FREE_SECT);
        let mini_fat_start = layout.allocate(&ids_to_bytes(&mini_fat));
        let mini_fat_sectors = mini_fat.len() / IDS_PER_SECTOR;

        let per_sector = SECTOR_SIZE / DIRECTORY_ENTRY_SIZE;
        entries.resize(entries.len().next_multiple_of(per_sector), DirectoryEntry::unused());
        let directory = entries
            .iter()
            .flat_map(|entry| entry.raw)
            .collect::<Vec<_>>();
        let directory_start = layout.allocate(&directory);

        let data_sectors = layout.fat.len();
        let (fat_count, difat_count) = table_dimensions(data_sectors);
        let fat_ids = (data_sectors..data_sectors + fat_count)
            .map(sector_id)
            .collect::<Vec<_>>();
        let difat_start = data_sectors + fat_count;

        let mut fat = layout.fat;
        fat.extend(std::iter::repeat_n(FAT_SECT, fat_count));
        fat.extend(std::iter::repeat_n(DIF_SECT, difat_count));
        fat.resize(fat_count * IDS_PER_SECTOR, FREE_SECT);

        let mut header = vec![0u8; HEADER_SIZE];
        header[..8].copy_from_slice(&SIGNATURE);
        put_u16(&mut header, 24, 0x003E);
        put_u16(&mut header, 26, 3);
        put_u16(&mut header, 28, 0xFFFE);
        put_u16(&mut header, 30, 9);
        put_u16(&mut header, 32, 6);
        put_u32(&mut header, 44, sector_id(fat_count));
        put_u32(&mut header, 48, directory_start);
        put_u32(&mut header, 56, sector_id(MINI_STREAM_CUTOFF));
        if mini_fat_sectors == 0 {
            put_u32(&mut header, 60, END_OF_CHAIN);
        } else {
            put_u32(&mut header, 60, mini_fat_start);
        }
        put_u32(&mut header, 64, sector_id(mini_fat_sectors));
        put_u32(
            &mut header,
            68,
            if difat_count == 0 {
                END_OF_CHAIN
            } else {
                sector_id(difat_start)
            },
        );
        put_u32(&mut header, 72, sector_id(difat_count));
        for slot in 0..HEADER_DIFAT_ENTRIES {
            let id = fat_ids.get(slot).copied().unwrap_or(FREE_SECT);
            put_u32(&mut header, 76 + slot * 4, id);
        }

        let mut out = header;
        out.extend_from_slice(&layout.body);
        out.extend_from_slice(&ids_to_bytes(&fat));

        let overflow = fat_ids.get(HEADER_DIFAT_ENTRIES..).unwrap_or_default();
        for (position, chunk) in overflow.chunks(IDS_PER_SECTOR - 1).enumerate() {
            let mut ids = chunk.to_vec();
            ids.resize(IDS_PER_SECTOR - 1, FREE_SECT);
            ids.push(if position + 1 < difat_count {
                sector_id(difat_start + position + 1)
            } else {
                END_OF_CHAIN
            });
            out.extend_from_slice(&ids_to_bytes(&ids));
        }

        out
    }
}

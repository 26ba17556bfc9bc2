//! Binary profile format
//!
//! ```text
//! magic "pro\0" | version "010\0"
//! u8  number_of_files
//! u32 uncompressed_body_size
//! u32 compressed_body_size
//! zlib stream of compressed_body_size bytes, inflating to:
//!   number_of_files line headers:
//!     u16 key_len, key, u32 checksum, u32 num_method_ids,
//!     u16 class_set_size, u32 method_region_size
//!   per line, in header order:
//!     class region:  class_set_size x u16 type index delta
//!     method region: u32 hot_method_count
//!                    per hot method: u16 method index delta, u16 site_count,
//!                      per site: u16 dex_pc, u8 marker,
//!                        marker x (u8 profile_index, u16 type_index)
//!                    startup/post-startup bitmap
//! ```
//!
//! All integers are little-endian. Every read goes through [`SafeBuffer`],
//! so truncated or oversized fields surface as [`ProfileError::BadData`].

use crate::error::{ProfileError, Result};
use crate::file_data::{bitmap_storage_size, FileProfileData, MAX_METHOD_IDS};
use crate::inline_cache::{InlineCacheMap, SiteData, SiteState};
use crate::profile::ProfileInfo;
use crate::types::{ClassRef, DexFileKey, DexPc, MethodIndex, ProfileIndex, TypeIndex};
use bitvec::prelude::*;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Leading bytes of every profile file
pub const PROFILE_MAGIC: [u8; 4] = *b"pro\0";

/// Format version; any other value is rejected
pub const PROFILE_VERSION: [u8; 4] = *b"010\0";

/// magic + version + u8 file count + two u32 sizes
pub const FILE_HEADER_SIZE: usize = 4 + 4 + 1 + 4 + 4;

/// Site marker for a megamorphic call site
const MEGAMORPHIC_ENCODING: u8 = 0xFF;

/// Site marker for a call site with missing types
const MISSING_TYPES_ENCODING: u8 = 0xFE;

/// Unsigned integers the cursor can decode
pub trait Uint: Sized {
    const SIZE: usize;
    fn from_le_slice(bytes: &[u8]) -> Self;
}

impl Uint for u8 {
    const SIZE: usize = 1;
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Uint for u16 {
    const SIZE: usize = 2;
    fn from_le_slice(bytes: &[u8]) -> Self {
        LittleEndian::read_u16(bytes)
    }
}

impl Uint for u32 {
    const SIZE: usize = 4;
    fn from_le_slice(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }
}

/// Bounds-checked read cursor over a fixed buffer
#[derive(Debug, Clone)]
pub struct SafeBuffer {
    storage: Vec<u8>,
    pos: usize,
}

impl From<Vec<u8>> for SafeBuffer {
    fn from(storage: Vec<u8>) -> Self {
        Self { storage, pos: 0 }
    }
}

impl SafeBuffer {
    /// Read up to `size` bytes from `reader`. The buffer is shorter than
    /// `size` only if the input ended first.
    pub fn fill<R: Read + ?Sized>(reader: &mut R, size: usize) -> Result<Self> {
        let mut storage = Vec::with_capacity(size.min(1 << 20));
        reader.take(size as u64).read_to_end(&mut storage)?;
        Ok(Self::from(storage))
    }

    /// Like [`SafeBuffer::fill`] but a short read is bad data
    pub fn fill_exact<R: Read + ?Sized>(reader: &mut R, size: usize, what: &str) -> Result<Self> {
        let buffer = Self::fill(reader, size)?;
        if buffer.count_unread_bytes() != size {
            return Err(ProfileError::bad_data(format!(
                "unexpected end of input reading {}: wanted {} bytes, got {}",
                what,
                size,
                buffer.count_unread_bytes()
            )));
        }
        Ok(buffer)
    }

    pub fn count_unread_bytes(&self) -> usize {
        self.storage.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Borrow the next `n` bytes and step over them
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.count_unread_bytes() {
            return Err(ProfileError::bad_data(format!(
                "read of {} bytes at offset {} overruns buffer of {}",
                n,
                self.pos,
                self.storage.len()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.storage[start..self.pos])
    }

    pub fn read_uint_and_advance<T: Uint>(&mut self) -> Result<T> {
        self.read_bytes(T::SIZE).map(T::from_le_slice)
    }

    /// Step over `expected` if the buffer continues with it
    pub fn compare_and_advance(&mut self, expected: &[u8]) -> bool {
        if self.storage[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Split the next `n` bytes into their own cursor
    pub fn split_off(&mut self, n: usize) -> Result<SafeBuffer> {
        self.read_bytes(n).map(|bytes| SafeBuffer::from(bytes.to_vec()))
    }

    fn expect_consumed(&self, what: &str) -> Result<()> {
        if self.count_unread_bytes() != 0 {
            return Err(ProfileError::bad_data(format!(
                "{} unread bytes left in {}",
                self.count_unread_bytes(),
                what
            )));
        }
        Ok(())
    }
}

/// Decoded fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub number_of_files: u8,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

/// Parse and check the fixed header at the start of `data`
pub fn verify_header(data: &[u8]) -> Result<FileHeader> {
    let mut buffer = SafeBuffer::from(data.get(..FILE_HEADER_SIZE).unwrap_or(data).to_vec());
    read_file_header(&mut buffer)
}

fn read_file_header(buffer: &mut SafeBuffer) -> Result<FileHeader> {
    if !buffer.compare_and_advance(&PROFILE_MAGIC) {
        return Err(ProfileError::VersionMismatch(
            "profile magic does not match".to_string(),
        ));
    }
    if !buffer.compare_and_advance(&PROFILE_VERSION) {
        return Err(ProfileError::VersionMismatch(format!(
            "unsupported profile version, expected {:?}",
            String::from_utf8_lossy(&PROFILE_VERSION[..3])
        )));
    }
    Ok(FileHeader {
        number_of_files: buffer.read_uint_and_advance()?,
        uncompressed_size: buffer.read_uint_and_advance()?,
        compressed_size: buffer.read_uint_and_advance()?,
    })
}

/// Per-file header inside the inflated body
#[derive(Debug, Clone, PartialEq, Eq)]
struct LineHeader {
    profile_key: String,
    checksum: u32,
    num_method_ids: u32,
    class_set_size: u16,
    method_region_size: u32,
}

fn read_line_header(buffer: &mut SafeBuffer) -> Result<LineHeader> {
    let key_len: u16 = buffer.read_uint_and_advance()?;
    if key_len == 0 {
        return Err(ProfileError::bad_data("empty profile key"));
    }
    let profile_key = std::str::from_utf8(buffer.read_bytes(key_len as usize)?)
        .map_err(|e| ProfileError::bad_data(format!("profile key is not UTF-8: {}", e)))?
        .to_string();
    let header = LineHeader {
        profile_key,
        checksum: buffer.read_uint_and_advance()?,
        num_method_ids: buffer.read_uint_and_advance()?,
        class_set_size: buffer.read_uint_and_advance()?,
        method_region_size: buffer.read_uint_and_advance()?,
    };
    if header.num_method_ids > MAX_METHOD_IDS {
        return Err(ProfileError::bad_data(format!(
            "{} declares {} method ids",
            header.profile_key, header.num_method_ids
        )));
    }
    Ok(header)
}

/// A hot method as decoded from a method region, still in file numbering
struct DecodedMethod {
    method_index: MethodIndex,
    inline_caches: BTreeMap<DexPc, DecodedSite>,
}

enum DecodedSite {
    Classes(Vec<ClassRef>),
    Megamorphic,
    MissingTypes,
}

struct DecodedMethodRegion {
    methods: Vec<DecodedMethod>,
    bitmap: Vec<u8>,
}

fn read_method_region(
    region: &mut SafeBuffer,
    header: &LineHeader,
    number_of_files: u8,
) -> Result<DecodedMethodRegion> {
    let bitmap_size = bitmap_storage_size(header.num_method_ids);
    if region.count_unread_bytes() < bitmap_size {
        return Err(ProfileError::bad_data(format!(
            "method region of {} is smaller than its bitmap",
            header.profile_key
        )));
    }

    let hot_count: u32 = region.read_uint_and_advance()?;
    let mut methods = Vec::new();
    let mut last: u32 = 0;
    for _ in 0..hot_count {
        // The count alone could claim more methods than the region holds
        if region.count_unread_bytes() < bitmap_size {
            return Err(ProfileError::bad_data(format!(
                "hot methods of {} overrun the bitmap",
                header.profile_key
            )));
        }
        let diff: u16 = region.read_uint_and_advance()?;
        let method_index = last + u32::from(diff);
        if method_index >= header.num_method_ids {
            return Err(ProfileError::bad_data(format!(
                "method index {} out of range for {} ({} methods)",
                method_index, header.profile_key, header.num_method_ids
            )));
        }
        last = method_index;
        let inline_caches = read_inline_caches(region, number_of_files)?;
        methods.push(DecodedMethod {
            method_index: method_index as MethodIndex,
            inline_caches,
        });
    }

    if region.count_unread_bytes() != bitmap_size {
        return Err(ProfileError::bad_data(format!(
            "method region of {} has {} bytes after hot methods, expected a {} byte bitmap",
            header.profile_key,
            region.count_unread_bytes(),
            bitmap_size
        )));
    }
    let bitmap = region.read_bytes(bitmap_size)?.to_vec();
    let used_bits = 2 * header.num_method_ids as usize;
    if BitSlice::<u8, Lsb0>::from_slice(&bitmap)[used_bits..].any() {
        return Err(ProfileError::bad_data(format!(
            "bitmap of {} has bits set past its methods",
            header.profile_key
        )));
    }
    Ok(DecodedMethodRegion { methods, bitmap })
}

fn read_inline_caches(
    region: &mut SafeBuffer,
    number_of_files: u8,
) -> Result<BTreeMap<DexPc, DecodedSite>> {
    let site_count: u16 = region.read_uint_and_advance()?;
    let mut sites = BTreeMap::new();
    for _ in 0..site_count {
        let dex_pc: DexPc = region.read_uint_and_advance()?;
        let marker: u8 = region.read_uint_and_advance()?;
        let site = match marker {
            MEGAMORPHIC_ENCODING => DecodedSite::Megamorphic,
            MISSING_TYPES_ENCODING => DecodedSite::MissingTypes,
            count => {
                let mut classes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let dex_profile_index: ProfileIndex = region.read_uint_and_advance()?;
                    let type_index: TypeIndex = region.read_uint_and_advance()?;
                    if dex_profile_index >= number_of_files {
                        return Err(ProfileError::bad_data(format!(
                            "inline cache references profile index {} of {} files",
                            dex_profile_index, number_of_files
                        )));
                    }
                    classes.push(ClassRef::new(dex_profile_index, type_index));
                }
                DecodedSite::Classes(classes)
            }
        };
        if sites.insert(dex_pc, site).is_some() {
            return Err(ProfileError::bad_data(format!(
                "duplicate inline cache for dex pc {:#x}",
                dex_pc
            )));
        }
    }
    Ok(sites)
}

fn read_class_region(buffer: &mut SafeBuffer, header: &LineHeader) -> Result<Vec<TypeIndex>> {
    let mut classes = Vec::with_capacity(header.class_set_size as usize);
    let mut last: u32 = 0;
    for _ in 0..header.class_set_size {
        let diff: u16 = buffer.read_uint_and_advance()?;
        let type_index = last + u32::from(diff);
        if type_index > u32::from(TypeIndex::MAX) {
            return Err(ProfileError::bad_data(format!(
                "type index {} overflows in {}",
                type_index, header.profile_key
            )));
        }
        last = type_index;
        classes.push(type_index as TypeIndex);
    }
    Ok(classes)
}

impl ProfileInfo {
    /// Load a profile keeping every file it contains
    pub fn load<R: Read + ?Sized>(&mut self, reader: &mut R, merge_classes: bool) -> Result<()> {
        self.load_with_filter(reader, merge_classes, |_, _| true)
    }

    pub fn load_from_bytes(&mut self, data: &[u8], merge_classes: bool) -> Result<()> {
        self.load(&mut &data[..], merge_classes)
    }

    /// Load a profile into this (empty) container.
    ///
    /// `filter(profile_key, checksum)` decides which files are kept; inline
    /// cache entries pointing at a dropped file become missing-types sites.
    /// With `merge_classes == false` class regions are parsed but discarded.
    /// An empty input is a valid empty profile. On error the container is
    /// left untouched.
    pub fn load_with_filter<R, F>(
        &mut self,
        reader: &mut R,
        merge_classes: bool,
        filter: F,
    ) -> Result<()>
    where
        R: Read + ?Sized,
        F: Fn(&str, u32) -> bool,
    {
        if !self.is_empty() {
            return Err(ProfileError::WouldOverwrite);
        }

        let mut header_buffer = SafeBuffer::fill(reader, FILE_HEADER_SIZE)?;
        match header_buffer.count_unread_bytes() {
            0 => return Ok(()),
            n if n < FILE_HEADER_SIZE => {
                if !header_buffer.compare_and_advance(&PROFILE_MAGIC[..n.min(4)]) {
                    return Err(ProfileError::VersionMismatch(
                        "profile magic does not match".to_string(),
                    ));
                }
                return Err(ProfileError::bad_data("truncated profile header"));
            }
            _ => {}
        }
        let header = read_file_header(&mut header_buffer)?;
        self.check_size(header.uncompressed_size as usize);

        let compressed = SafeBuffer::fill_exact(
            reader,
            header.compressed_size as usize,
            "compressed profile body",
        )?;
        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(ProfileError::bad_data(
                "unexpected data after the compressed body",
            ));
        }
        let mut body = SafeBuffer::from(inflate(
            &compressed.storage,
            header.uncompressed_size as usize,
        )?);

        let mut loaded = ProfileInfo::with_config(self.config().clone())?;
        let mut line_headers = Vec::with_capacity(header.number_of_files as usize);
        for _ in 0..header.number_of_files {
            line_headers.push(read_line_header(&mut body)?);
        }

        let mut remap: Vec<Option<ProfileIndex>> = Vec::with_capacity(line_headers.len());
        for line in &line_headers {
            if !filter(&line.profile_key, line.checksum) {
                tracing::debug!("Filtered out {} while loading", line.profile_key);
                remap.push(None);
                continue;
            }
            let key = DexFileKey::new(line.profile_key.clone(), line.checksum, line.num_method_ids);
            remap.push(Some(loaded.get_or_add_file_data(&key)?));
        }

        let limit = loaded.config().inline_cache_limit;
        for (line, target) in line_headers.iter().zip(remap.iter().copied()) {
            let classes = read_class_region(&mut body, line)?;
            let mut region = body.split_off(line.method_region_size as usize)?;
            let decoded = read_method_region(&mut region, line, header.number_of_files)?;

            let Some(target) = target else {
                continue;
            };
            let data = loaded
                .file_data_mut(target)
                .ok_or_else(|| ProfileError::bad_data("remapped profile index out of range"))?;
            if merge_classes {
                data.classes_mut().extend(classes);
            }
            data.or_bitmap_bytes(&decoded.bitmap);
            for method in decoded.methods {
                let caches = data.hot_methods_mut().entry(method.method_index).or_default();
                for (dex_pc, site) in method.inline_caches {
                    apply_decoded_site(caches.entry(dex_pc).or_default(), site, &remap, limit);
                }
            }
        }
        body.expect_consumed("profile body")?;

        tracing::debug!(
            "Loaded profile with {} files, {} hot methods",
            loaded.number_of_dex_files(),
            loaded.number_of_methods()
        );
        *self = loaded;
        Ok(())
    }

    /// Serialize the container
    pub fn save<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut headers = Vec::new();
        let mut regions = Vec::new();
        for data in self.files() {
            let method_region = encode_method_region(data)?;
            write_line_header(&mut headers, data, method_region.len())?;
            encode_class_region(&mut regions, data)?;
            regions.extend_from_slice(&method_region);
        }
        let mut body = headers;
        body.extend_from_slice(&regions);
        self.check_size(body.len());

        let uncompressed_size = u32::try_from(body.len())
            .map_err(|_| ProfileError::bad_data("profile body exceeds 4 GiB"))?;
        let mut encoder =
            ZlibEncoder::new(Vec::new(), Compression::new(self.config().compression_level));
        encoder.write_all(&body)?;
        let compressed = encoder.finish()?;
        let compressed_size = u32::try_from(compressed.len())
            .map_err(|_| ProfileError::bad_data("compressed profile exceeds 4 GiB"))?;

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE + compressed.len());
        out.extend_from_slice(&PROFILE_MAGIC);
        out.extend_from_slice(&PROFILE_VERSION);
        out.write_u8(self.number_of_dex_files() as u8)?;
        out.write_u32::<LittleEndian>(uncompressed_size)?;
        out.write_u32::<LittleEndian>(compressed_size)?;
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn check_size(&self, uncompressed_size: usize) {
        let config = self.config();
        if uncompressed_size > config.size_error_threshold {
            tracing::error!(
                "Profile body is {} bytes, above the {} byte error threshold",
                uncompressed_size,
                config.size_error_threshold
            );
        } else if uncompressed_size > config.size_warning_threshold {
            tracing::warn!(
                "Profile body is {} bytes, above the {} byte warning threshold",
                uncompressed_size,
                config.size_warning_threshold
            );
        }
    }
}

fn apply_decoded_site(
    site: &mut SiteData,
    decoded: DecodedSite,
    remap: &[Option<ProfileIndex>],
    limit: usize,
) {
    match decoded {
        DecodedSite::MissingTypes => site.set_is_missing_types(),
        DecodedSite::Megamorphic => site.set_is_megamorphic(),
        DecodedSite::Classes(classes) => {
            for class in classes {
                match remap[class.dex_profile_index as usize] {
                    Some(index) => {
                        site.add_class(ClassRef::new(index, class.type_index), limit);
                    }
                    None => {
                        site.set_is_missing_types();
                        return;
                    }
                }
            }
        }
    }
}

fn inflate(compressed: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::with_capacity(uncompressed_size.min(1 << 20));
    (&mut decoder)
        .take(uncompressed_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ProfileError::bad_data(format!("inflate failed: {}", e)))?;
    if out.len() != uncompressed_size {
        return Err(ProfileError::bad_data(format!(
            "inflated body is {} bytes, header says {}",
            out.len(),
            uncompressed_size
        )));
    }
    if decoder.total_in() != compressed.len() as u64 {
        return Err(ProfileError::bad_data(
            "trailing bytes after the compressed stream",
        ));
    }
    Ok(out)
}

fn write_line_header(out: &mut Vec<u8>, data: &FileProfileData, method_region: usize) -> Result<()> {
    let key = data.profile_key().as_bytes();
    let key_len = u16::try_from(key.len())
        .map_err(|_| ProfileError::bad_data(format!("profile key too long: {}", key.len())))?;
    let class_set_size = u16::try_from(data.classes().len()).map_err(|_| {
        ProfileError::bad_data(format!(
            "{} has too many classes to encode",
            data.profile_key()
        ))
    })?;
    let method_region = u32::try_from(method_region)
        .map_err(|_| ProfileError::bad_data("method region exceeds 4 GiB"))?;
    out.write_u16::<LittleEndian>(key_len)?;
    out.extend_from_slice(key);
    out.write_u32::<LittleEndian>(data.checksum())?;
    out.write_u32::<LittleEndian>(data.num_method_ids())?;
    out.write_u16::<LittleEndian>(class_set_size)?;
    out.write_u32::<LittleEndian>(method_region)?;
    Ok(())
}

fn encode_class_region(out: &mut Vec<u8>, data: &FileProfileData) -> Result<()> {
    let mut last = 0;
    for &type_index in data.classes() {
        out.write_u16::<LittleEndian>(type_index - last)?;
        last = type_index;
    }
    Ok(())
}

fn encode_method_region(data: &FileProfileData) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(data.hot_methods().len() as u32)?;
    let mut last = 0;
    for (&method_index, caches) in data.hot_methods() {
        out.write_u16::<LittleEndian>(method_index - last)?;
        last = method_index;
        encode_inline_caches(&mut out, caches)?;
    }
    out.extend_from_slice(&data.bitmap_bytes());
    Ok(out)
}

fn encode_inline_caches(out: &mut Vec<u8>, caches: &InlineCacheMap) -> Result<()> {
    let site_count = u16::try_from(caches.len())
        .map_err(|_| ProfileError::bad_data("too many inline cache sites in one method"))?;
    out.write_u16::<LittleEndian>(site_count)?;
    for (&dex_pc, site) in caches {
        out.write_u16::<LittleEndian>(dex_pc)?;
        match site.state() {
            SiteState::Megamorphic => out.write_u8(MEGAMORPHIC_ENCODING)?,
            SiteState::MissingTypes => out.write_u8(MISSING_TYPES_ENCODING)?,
            SiteState::Classes(classes) => {
                let count = u8::try_from(classes.len())
                    .ok()
                    .filter(|&count| count < MISSING_TYPES_ENCODING)
                    .ok_or_else(|| {
                        ProfileError::bad_data(format!(
                            "{} classes at dex pc {:#x} exceed the encodable cap",
                            classes.len(),
                            dex_pc
                        ))
                    })?;
                out.write_u8(count)?;
                for class in classes {
                    out.write_u8(class.dex_profile_index)?;
                    out.write_u16::<LittleEndian>(class.type_index)?;
                }
            }
        }
    }
    Ok(())
}

// src/archive/zip.rs

//! Minimal writer for uncompressed (stored) zip archives
//!
//! Enough for wheels and zip sdists made of a few small metadata files.
//! Every entry is stored without compression and stamped 1980-01-01.

use std::io::{self, Write};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const VERSION: u16 = 20;
const METHOD_STORED: u16 = 0;
/// MS-DOS date for 1980-01-01
const DOS_DATE: u16 = (1 << 5) | 1;
const DOS_TIME: u16 = 0;

struct CentralEntry {
    name: String,
    crc: u32,
    size: u32,
    offset: u32,
}

/// Writes a stored zip archive into an in-memory buffer
pub struct ZipWriter {
    buf: Vec<u8>,
    entries: Vec<CentralEntry>,
}

impl ZipWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Append a regular file
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let size = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "zip entry too large"))?;
        let offset = u32::try_from(self.buf.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "zip archive too large"))?;
        let name_len = u16::try_from(name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "zip entry name too long"))?;
        let crc = crc32fast::hash(data);

        let w = &mut self.buf;
        put_u32(w, LOCAL_HEADER_SIG)?;
        put_u16(w, VERSION)?;
        put_u16(w, 0)?; // flags
        put_u16(w, METHOD_STORED)?;
        put_u16(w, DOS_TIME)?;
        put_u16(w, DOS_DATE)?;
        put_u32(w, crc)?;
        put_u32(w, size)?; // compressed
        put_u32(w, size)?; // uncompressed
        put_u16(w, name_len)?;
        put_u16(w, 0)?; // extra field length
        w.write_all(name.as_bytes())?;
        w.write_all(data)?;

        self.entries.push(CentralEntry {
            name: name.to_string(),
            crc,
            size,
            offset,
        });
        Ok(())
    }

    /// Write the central directory and return the archive bytes
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        let cd_offset = self.buf.len() as u32;
        for entry in &self.entries {
            let w = &mut self.buf;
            put_u32(w, CENTRAL_HEADER_SIG)?;
            put_u16(w, VERSION)?; // made by
            put_u16(w, VERSION)?; // needed
            put_u16(w, 0)?;
            put_u16(w, METHOD_STORED)?;
            put_u16(w, DOS_TIME)?;
            put_u16(w, DOS_DATE)?;
            put_u32(w, entry.crc)?;
            put_u32(w, entry.size)?;
            put_u32(w, entry.size)?;
            put_u16(w, entry.name.len() as u16)?;
            put_u16(w, 0)?; // extra
            put_u16(w, 0)?; // comment
            put_u16(w, 0)?; // disk number
            put_u16(w, 0)?; // internal attributes
            put_u32(w, 0o100644 << 16)?; // external attributes: regular file, rw-r--r--
            put_u32(w, entry.offset)?;
            w.write_all(entry.name.as_bytes())?;
        }
        let cd_size = self.buf.len() as u32 - cd_offset;
        let count = self.entries.len() as u16;

        let w = &mut self.buf;
        put_u32(w, END_OF_CENTRAL_DIR_SIG)?;
        put_u16(w, 0)?;
        put_u16(w, 0)?;
        put_u16(w, count)?;
        put_u16(w, count)?;
        put_u32(w, cd_size)?;
        put_u32(w, cd_offset)?;
        put_u16(w, 0)?;

        Ok(self.buf)
    }
}

impl Default for ZipWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn put_u16(w: &mut impl Write, value: u16) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn put_u32(w: &mut impl Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Read back `(name, data)` pairs of a stored zip via its central directory
#[cfg(test)]
pub(crate) fn read_stored_entries(data: &[u8]) -> io::Result<Vec<(String, Vec<u8>)>> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    let u16_at = |pos: usize| -> io::Result<u16> {
        data.get(pos..pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or_else(|| invalid("truncated"))
    };
    let u32_at = |pos: usize| -> io::Result<u32> {
        data.get(pos..pos + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| invalid("truncated"))
    };

    let eocd = data.len().checked_sub(22).ok_or_else(|| invalid("too short"))?;
    if u32_at(eocd)? != END_OF_CENTRAL_DIR_SIG {
        return Err(invalid("missing end of central directory"));
    }
    let count = u16_at(eocd + 10)? as usize;
    let mut pos = u32_at(eocd + 16)? as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if u32_at(pos)? != CENTRAL_HEADER_SIG {
            return Err(invalid("bad central header"));
        }
        let crc = u32_at(pos + 16)?;
        let size = u32_at(pos + 24)? as usize;
        let name_len = u16_at(pos + 28)? as usize;
        let offset = u32_at(pos + 42)? as usize;
        let name = String::from_utf8_lossy(&data[pos + 46..pos + 46 + name_len]).to_string();

        if u32_at(offset)? != LOCAL_HEADER_SIG {
            return Err(invalid("bad local header"));
        }
        let local_name_len = u16_at(offset + 26)? as usize;
        let start = offset + 30 + local_name_len;
        let body = data
            .get(start..start + size)
            .ok_or_else(|| invalid("truncated entry"))?
            .to_vec();
        if crc32fast::hash(&body) != crc {
            return Err(invalid("crc mismatch"));
        }
        entries.push((name, body));
        pos += 46 + name_len;
    }
    Ok(entries)
}

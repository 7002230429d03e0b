//! HMAP: dependency-light heightmap tile format.
//!
//! - A regular grid of f32 elevations (metres), row-major, NaN = no data.
//! - Optional GEOT chunk: CRS:84 bbox (deg, Q7: 1e-7 deg ticks).
//! - Optional MASK chunks: named 8-bit coverage grids the size of the tile,
//!   RLE encoded.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"HMAP"
//!   04  : u32     version = 1
//!   08  : u32     flags (bitfield)
//!                 bit 0 => GEOT chunk present
//!                 bit 1 => MASK chunks present
//!   0C  : u32     width
//!   10  : u32     height
//!   14  : f32     cell_size (metres)
//!   18  : f32[width * height] samples
//!   ..  : GEOT chunk                  (if bit0)
//!   ..  : u32 mask_count, MASK chunks (if bit1)
//!
//! GEOT chunk:
//!   "GEOT" [i32 lon_min_q7, lon_max_q7, lat_min_q7, lat_max_q7]
//!
//! MASK chunk:
//!   "MASK" u16 name_len [name_len bytes UTF-8 name]
//!          u32 payload_size [payload_size bytes RLE]
//!
//! RLE format: repeated [u16 run_len][u8 value] (little-endian)

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

pub const HMAP_MAGIC: [u8; 4] = *b"HMAP";
pub const HMAP_VERSION: u32 = 1;

const HEADER_LEN: usize = 24;

/// Geographic bounding box in Q7 fixed point (1e-7 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoExtentQ7 {
    pub lon_min_q7: i32,
    pub lon_max_q7: i32,
    pub lat_min_q7: i32,
    pub lat_max_q7: i32,
}

impl GeoExtentQ7 {
    #[inline]
    pub fn from_deg(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min_q7: (lon_min * 1e7).round() as i32,
            lon_max_q7: (lon_max * 1e7).round() as i32,
            lat_min_q7: (lat_min * 1e7).round() as i32,
            lat_max_q7: (lat_max * 1e7).round() as i32,
        }
    }

    /// `(lon_min, lon_max, lat_min, lat_max)` in degrees.
    #[inline]
    pub fn to_deg(self) -> (f64, f64, f64, f64) {
        (
            self.lon_min_q7 as f64 * 1e-7,
            self.lon_max_q7 as f64 * 1e-7,
            self.lat_min_q7 as f64 * 1e-7,
            self.lat_max_q7 as f64 * 1e-7,
        )
    }
}

/// A named coverage grid; `rle` holds the encoded payload as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskChunk {
    pub name: String,
    pub rle: Vec<u8>,
}

impl MaskChunk {
    pub fn from_raw(name: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            name: name.into(),
            rle: mask_encode_rle(raw),
        }
    }

    pub fn decode(&self) -> io::Result<Vec<u8>> {
        mask_decode_rle(&self.rle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HmapTile {
    pub width: u32,
    pub height: u32,
    pub cell_size: f32,
    pub samples: Vec<f32>,
    pub geot: Option<GeoExtentQ7>,
    pub masks: Vec<MaskChunk>,
}

impl HmapTile {
    pub fn new(width: u32, height: u32, cell_size: f32, samples: Vec<f32>) -> Self {
        Self {
            width,
            height,
            cell_size,
            samples,
            geot: None,
            masks: Vec::new(),
        }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn mask(&self, name: &str) -> Option<&MaskChunk> {
        self.masks.iter().find(|m| m.name == name)
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated HMAP"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_i32(buf: &mut &[u8]) -> io::Result<i32> {
    let b = take(buf, 4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f32(buf: &mut &[u8]) -> io::Result<f32> {
    let b = take(buf, 4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

fn decode_samples(raw: &[u8]) -> Vec<f32> {
    // Fast path: the sample block is tightly packed 4N bytes. A heap buffer
    // from fs::read is not guaranteed to be 4-aligned, so fall back to a
    // portable decode when the cast is refused.
    #[cfg(target_endian = "little")]
    {
        if let Ok(as_f32) = bytemuck::try_cast_slice::<u8, f32>(raw) {
            return as_f32.to_vec();
        }
    }

    raw.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Parse HMAP from a contiguous byte slice. This is the single source of truth for parsing.
pub fn parse_hmap_bytes(mut p: &[u8]) -> io::Result<HmapTile> {
    // Header
    need(p, HEADER_LEN)?;
    if take(&mut p, 4)? != b"HMAP" {
        return Err(bad("bad HMAP magic"));
    }

    let version = le_u32(&mut p)?;
    if version != HMAP_VERSION {
        return Err(bad("unsupported HMAP version"));
    }

    let flags = le_u32(&mut p)?;
    let has_geot  = (flags & (1 << 0)) != 0;
    let has_masks = (flags & (1 << 1)) != 0;

    let width = le_u32(&mut p)?;
    let height = le_u32(&mut p)?;
    let cell_size = le_f32(&mut p)?;
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(bad("cell_size must be > 0"));
    }

    // Samples
    let count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| bad("grid size overflow"))?;
    let sample_bytes = count.checked_mul(4).ok_or_else(|| bad("grid size overflow"))?;
    let samples = decode_samples(take(&mut p, sample_bytes)?);

    // GEOT
    let geot = if has_geot {
        if take(&mut p, 4)? != b"GEOT" {
            return Err(bad("expected GEOT tag"));
        }

        Some(GeoExtentQ7 {
            lon_min_q7: le_i32(&mut p)?,
            lon_max_q7: le_i32(&mut p)?,
            lat_min_q7: le_i32(&mut p)?,
            lat_max_q7: le_i32(&mut p)?,
        })
    } else {
        None
    };

    // MASK
    let mut masks = Vec::new();
    if has_masks {
        let mask_count = le_u32(&mut p)? as usize;
        masks.reserve(mask_count.min(256));

        for _ in 0..mask_count {
            if take(&mut p, 4)? != b"MASK" {
                return Err(bad("expected MASK tag"));
            }

            let name_len = le_u16(&mut p)? as usize;
            let name = std::str::from_utf8(take(&mut p, name_len)?)
                .map_err(|_| bad("mask name is not UTF-8"))?
                .to_owned();

            let payload_size = le_u32(&mut p)? as usize;
            let rle = take(&mut p, payload_size)?.to_vec();

            masks.push(MaskChunk { name, rle });
        }
    }

    Ok(HmapTile {
        width,
        height,
        cell_size,
        samples,
        geot,
        masks,
    })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<HmapTile> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_hmap_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<HmapTile> {
    let bytes = std::fs::read(path)?;
    parse_hmap_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, tile: &HmapTile) -> io::Result<()> {
    if tile.samples.len() != tile.cell_count() {
        return Err(bad("samples length != width * height"));
    }

    let mut flags = 0u32;

    if tile.geot.is_some() {
        flags |= 1 << 0;
    }

    if !tile.masks.is_empty() {
        flags |= 1 << 1;
    }

    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(&HMAP_MAGIC)?;

    write_u32(&mut file, HMAP_VERSION)?;
    write_u32(&mut file, flags)?;

    write_u32(&mut file, tile.width)?;
    write_u32(&mut file, tile.height)?;
    file.write_all(&tile.cell_size.to_le_bytes())?;

    #[cfg(target_endian = "little")]
    {
        file.write_all(bytemuck::cast_slice(&tile.samples))?;
    }

    #[cfg(not(target_endian = "little"))]
    {
        for v in &tile.samples {
            file.write_all(&v.to_le_bytes())?;
        }
    }

    if let Some(geot) = tile.geot.as_ref() {
        file.write_all(b"GEOT")?;

        write_i32(&mut file, geot.lon_min_q7)?;
        write_i32(&mut file, geot.lon_max_q7)?;
        write_i32(&mut file, geot.lat_min_q7)?;
        write_i32(&mut file, geot.lat_max_q7)?;
    }

    if !tile.masks.is_empty() {
        write_u32(&mut file, tile.masks.len() as u32)?;

        for mask in &tile.masks {
            let name = mask.name.as_bytes();
            if name.len() > u16::MAX as usize {
                return Err(bad("mask name too long"));
            }

            file.write_all(b"MASK")?;
            write_u16(&mut file, name.len() as u16)?;
            file.write_all(name)?;

            write_u32(&mut file, mask.rle.len() as u32)?;
            file.write_all(&mask.rle)?;
        }
    }

    file.flush()?;

    Ok(())
}

pub fn mask_encode_rle(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(raw.len() / 2);
    if raw.is_empty() {
        return out;
    }

    let mut i = 0usize;
    while i < raw.len() {
        let value = raw[i];
        let mut run_length = 1usize;

        while i + run_length < raw.len()
            && raw[i + run_length] == value
            && run_length < u16::MAX as usize
        {
            run_length += 1;
        }

        out.extend_from_slice(&(run_length as u16).to_le_bytes());
        out.push(value);
        i += run_length;
    }

    out
}

pub fn mask_decode_rle(rle: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::<u8>::new();
    let mut i = 0usize;

    while i + 3 <= rle.len() {
        let run = u16::from_le_bytes([rle[i], rle[i + 1]]) as usize;
        let v = rle[i + 2];
        out.resize(out.len() + run, v);
        i += 3;
    }

    if i != rle.len() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "RLE payload truncated",
        ));
    }

    Ok(out)
}

#[inline]
fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tile() -> HmapTile {
        let samples: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let mut tile = HmapTile::new(4, 3, 2.0, samples);
        tile.samples[5] = f32::NAN;
        tile.geot = Some(GeoExtentQ7::from_deg(8.5, 8.6, 47.3, 47.4));

        let mut road = vec![0u8; 12];
        road[4..8].fill(255);
        tile.masks.push(MaskChunk::from_raw("asphalt", &road));
        tile
    }

    #[test]
    fn file_survives_write_and_read() {
        let path = std::env::temp_dir().join(format!("hmap-test-{}.hmap", std::process::id()));
        let tile = sample_tile();
        write_file(&path, &tile).unwrap();
        let back = read_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((back.width, back.height, back.cell_size), (4, 3, 2.0));
        assert!(back.samples[5].is_nan());
        assert_eq!(back.samples[11], 5.5);
        assert_eq!(back.geot, tile.geot);

        let mask = back.mask("asphalt").unwrap().decode().unwrap();
        assert_eq!(mask.len(), 12);
        assert_eq!(&mask[3..9], &[0, 255, 255, 255, 255, 0]);
        assert!(back.mask("gravel").is_none());
    }

    #[test]
    fn rle_collapses_runs() {
        let raw = [7u8, 7, 7, 0, 0, 9];
        let rle = mask_encode_rle(&raw);
        assert_eq!(rle, vec![3, 0, 7, 2, 0, 0, 1, 0, 9]);
        assert_eq!(mask_decode_rle(&rle).unwrap(), raw);
        assert!(mask_decode_rle(&rle[..4]).is_err());
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let mut foreign = b"TIFF".to_vec();
        foreign.resize(HEADER_LEN, 0);
        let err = parse_hmap_bytes(&foreign).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&HMAP_MAGIC);
        bytes.extend_from_slice(&HMAP_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        assert_eq!(bytes.len(), HEADER_LEN + 12);

        let err = parse_hmap_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}

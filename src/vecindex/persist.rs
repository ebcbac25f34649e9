//! On-disk form of the vector index: a binary index file plus JSON
//! sidecars for the id maps and statistics. Writes go to a temp file
//! and rename into place.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use super::{IndexKind, Repr};
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"PXVI";
const FORMAT_VERSION: u32 = 1;

/// Sidecar with everything the binary payload does not carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub dimension: usize,
    pub saved_at: String,
    /// photo id -> live position. Tombstoned positions are absent.
    pub id_to_pos: HashMap<i64, usize>,
}

/// Public statistics snapshot, also persisted as stats.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub live_vectors: usize,
    pub deleted_vectors: usize,
    pub dimension: usize,
    pub kind: IndexKind,
    pub nlist: Option<usize>,
    pub nprobe: Option<usize>,
    pub unsaved_additions: usize,
    pub last_optimization: Option<String>,
}

pub fn write_index(path: &Path, repr: &Repr) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    put_u32(&mut buf, FORMAT_VERSION);

    match repr {
        Repr::Flat(flat) => {
            buf.push(0u8);
            put_u32(&mut buf, flat.dim() as u32);
            put_u64(&mut buf, flat.ntotal() as u64);
            for value in flat.raw_data() {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        Repr::IvfFlat(ivf) => {
            buf.push(1u8);
            put_u32(&mut buf, ivf.dim() as u32);
            put_u32(&mut buf, ivf.nprobe() as u32);
            put_u32(&mut buf, ivf.nlist() as u32);
            put_matrix(&mut buf, ivf.centroids());
            for list in ivf.lists() {
                put_u64(&mut buf, list.len() as u64);
                for (position, vector) in list {
                    put_u64(&mut buf, *position as u64);
                    for value in vector {
                        buf.extend_from_slice(&value.to_le_bytes());
                    }
                }
            }
        }
        Repr::IvfPq(pq) => {
            buf.push(2u8);
            put_u32(&mut buf, pq.dim() as u32);
            put_u32(&mut buf, pq.nprobe() as u32);
            put_u32(&mut buf, pq.subquantizers() as u32);
            put_u32(&mut buf, pq.nlist() as u32);
            put_matrix(&mut buf, pq.centroids());
            for codebook in pq.codebooks() {
                put_matrix(&mut buf, codebook);
            }
            for list in pq.lists() {
                put_u64(&mut buf, list.len() as u64);
                for (position, code) in list {
                    put_u64(&mut buf, *position as u64);
                    buf.extend_from_slice(code);
                }
            }
        }
    }

    write_atomic(path, &buf)
}

pub fn read_index(path: &Path) -> Result<Repr> {
    let bytes = std::fs::read(path)?;
    let mut cursor = std::io::Cursor::new(bytes.as_slice());

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Invalid("index file has wrong magic".to_string()));
    }
    let version = get_u32(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(Error::Invalid(format!(
            "unsupported index format version {version}"
        )));
    }

    let mut kind = [0u8; 1];
    cursor.read_exact(&mut kind)?;

    match kind[0] {
        0 => {
            let dim = get_u32(&mut cursor)? as usize;
            let count = get_u64(&mut cursor)? as usize;
            let mut data = vec![0f32; count * dim];
            read_f32s(&mut cursor, &mut data)?;
            Ok(Repr::Flat(super::flat::FlatIndex::from_raw(dim, data)))
        }
        1 => {
            let dim = get_u32(&mut cursor)? as usize;
            let nprobe = get_u32(&mut cursor)? as usize;
            let nlist = get_u32(&mut cursor)? as usize;
            let centroids = get_matrix(&mut cursor, nlist, dim)?;
            let mut lists = Vec::with_capacity(nlist);
            for _ in 0..nlist {
                let len = get_u64(&mut cursor)? as usize;
                let mut list = Vec::with_capacity(len);
                for _ in 0..len {
                    let position = get_u64(&mut cursor)? as usize;
                    let mut vector = vec![0f32; dim];
                    read_f32s(&mut cursor, &mut vector)?;
                    list.push((position, vector));
                }
                lists.push(list);
            }
            Ok(Repr::IvfFlat(super::ivf::IvfFlatIndex::from_parts(
                nprobe, centroids, lists,
            )))
        }
        2 => {
            let dim = get_u32(&mut cursor)? as usize;
            let nprobe = get_u32(&mut cursor)? as usize;
            let m = get_u32(&mut cursor)? as usize;
            let nlist = get_u32(&mut cursor)? as usize;
            let centroids = get_matrix(&mut cursor, nlist, dim)?;
            let dsub = dim / m;
            let mut codebooks = Vec::with_capacity(m);
            for _ in 0..m {
                let rows = get_u32(&mut cursor)? as usize;
                codebooks.push(get_matrix_body(&mut cursor, rows, dsub)?);
            }
            let mut lists = Vec::with_capacity(nlist);
            for _ in 0..nlist {
                let len = get_u64(&mut cursor)? as usize;
                let mut list = Vec::with_capacity(len);
                for _ in 0..len {
                    let position = get_u64(&mut cursor)? as usize;
                    let mut code = vec![0u8; m];
                    cursor.read_exact(&mut code)?;
                    list.push((position, code));
                }
                lists.push(list);
            }
            Ok(Repr::IvfPq(super::pq::IvfPqIndex::from_parts(
                dim, nprobe, m, centroids, codebooks, lists,
            )))
        }
        other => Err(Error::Invalid(format!("unknown index kind byte {other}"))),
    }
}

pub fn write_metadata(path: &Path, metadata: &IndexMetadata) -> Result<()> {
    let json = serde_json::to_vec_pretty(metadata).map_err(anyhow::Error::from)?;
    write_atomic(path, &json)
}

pub fn read_metadata(path: &Path) -> Result<IndexMetadata> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?)
}

pub fn write_stats(path: &Path, stats: &IndexStats) -> Result<()> {
    let json = serde_json::to_vec_pretty(stats).map_err(anyhow::Error::from)?;
    write_atomic(path, &json)
}

/// Write to `<path>.tmp` then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_matrix(buf: &mut Vec<u8>, matrix: &Array2<f32>) {
    put_u32(buf, matrix.nrows() as u32);
    for value in matrix.iter() {
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

fn get_u32(cursor: &mut std::io::Cursor<&[u8]>) -> Result<u32> {
    let mut bytes = [0u8; 4];
    cursor.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn get_u64(cursor: &mut std::io::Cursor<&[u8]>) -> Result<u64> {
    let mut bytes = [0u8; 8];
    cursor.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_f32s(cursor: &mut std::io::Cursor<&[u8]>, out: &mut [f32]) -> Result<()> {
    for slot in out.iter_mut() {
        let mut bytes = [0u8; 4];
        cursor.read_exact(&mut bytes)?;
        *slot = f32::from_le_bytes(bytes);
    }
    Ok(())
}

fn get_matrix(cursor: &mut std::io::Cursor<&[u8]>, expect_rows: usize, cols: usize) -> Result<Array2<f32>> {
    let rows = get_u32(cursor)? as usize;
    if rows != expect_rows {
        return Err(Error::Invalid(format!(
            "index file row count {rows} does not match header {expect_rows}"
        )));
    }
    get_matrix_body(cursor, rows, cols)
}

fn get_matrix_body(cursor: &mut std::io::Cursor<&[u8]>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    let mut data = vec![0f32; rows * cols];
    read_f32s(cursor, &mut data)?;
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Invalid(format!("bad matrix shape in index file: {e}")))
}

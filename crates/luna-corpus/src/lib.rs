//! Append-only, block-structured binary training corpus (§4.9).
//!
//! Each block is self-delimiting: `nEpochs`, `nFeatures`, the feature
//! names, then `nEpochs` rows of `(epochIndex, stage, f_1..f_n)`.
//! Concatenating two well-formed files yields a well-formed file whose
//! blocks the reader loads as the union of both — `cat`-safe by
//! construction, since nothing but block boundaries is shared state.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use luna_core::error::LunaError;
use std::io::{self, Read, Write};

/// Append one individual's feature block to `writer`.
///
/// `features` is row-major: `features[epoch][feature]`, every row the same
/// length as `names`.
///
/// # Errors
/// Propagates the underlying `io::Error`, and returns
/// [`LunaError::ConstraintViolation`] wrapped in an `io::Error` if row
/// widths are inconsistent with `names.len()`.
pub fn write_block<W: Write>(
    writer: &mut W,
    epoch_index: &[i32],
    stage: &[i32],
    features: &[Vec<f64>],
    names: &[String],
) -> io::Result<()> {
    let n_epochs = features.len();
    if epoch_index.len() != n_epochs || stage.len() != n_epochs {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "epoch_index/stage length mismatch with features",
        ));
    }
    for row in features {
        if row.len() != names.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "feature row width does not match declared feature count",
            ));
        }
    }

    writer.write_i32::<LittleEndian>(n_epochs as i32)?;
    writer.write_i32::<LittleEndian>(names.len() as i32)?;
    for name in names {
        write_string(writer, name)?;
    }
    for i in 0..n_epochs {
        writer.write_i32::<LittleEndian>(epoch_index[i])?;
        writer.write_i32::<LittleEndian>(stage[i])?;
        for &v in &features[i] {
            writer.write_f64::<LittleEndian>(v)?;
        }
    }
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u8::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "feature name exceeds 255 bytes",
        ));
    }
    writer.write_u8(bytes.len() as u8)?;
    writer.write_all(bytes)
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// One loaded block's span within the reader's concatenated row range.
#[derive(Clone, Copy, Debug)]
pub struct BlockSpan {
    pub start: usize,
    pub end: usize,
}

/// The result of loading one or more concatenated blocks: a dense
/// `epochs × nFeatures` row-major matrix plus per-row epoch index and
/// stage, and each source block's `[start, end)` span.
pub struct Corpus {
    pub feature_names: Vec<String>,
    pub epoch_index: Vec<i32>,
    pub stage: Vec<i32>,
    pub features: Vec<Vec<f64>>,
    pub blocks: Vec<BlockSpan>,
}

/// Load every block from `reader` until EOF.
///
/// First pass counts total epochs across blocks and checks `nFeatures`
/// consistency; second pass loads data and records per-block spans, so
/// per-individual operations (SVD centering, smoothing) can respect block
/// boundaries.
///
/// # Errors
/// An `io::Error` on truncated/malformed input, or if blocks disagree on
/// `nFeatures` (surfaced as [`LunaError::ConstraintViolation`] via
/// `io::Error`'s `InvalidData` kind).
pub fn load_corpus<R: Read>(reader: &mut R) -> io::Result<Corpus> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;

    let mut feature_names: Option<Vec<String>> = None;
    let mut epoch_index = Vec::new();
    let mut stage = Vec::new();
    let mut features = Vec::new();
    let mut blocks = Vec::new();

    let mut cursor = io::Cursor::new(&raw);
    while (cursor.position() as usize) < raw.len() {
        let n_epochs = cursor.read_i32::<LittleEndian>()? as usize;
        let n_features = cursor.read_i32::<LittleEndian>()? as usize;
        let mut names = Vec::with_capacity(n_features);
        for _ in 0..n_features {
            names.push(read_string(&mut cursor)?);
        }
        match &feature_names {
            None => feature_names = Some(names),
            Some(expected) => {
                if expected.len() != names.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        LunaError::ConstraintViolation(format!(
                            "block declares {} features, corpus expects {}",
                            names.len(),
                            expected.len()
                        )),
                    ));
                }
            }
        }

        let start = features.len();
        for _ in 0..n_epochs {
            let e = cursor.read_i32::<LittleEndian>()?;
            let s = cursor.read_i32::<LittleEndian>()?;
            let mut row = Vec::with_capacity(n_features);
            for _ in 0..n_features {
                row.push(cursor.read_f64::<LittleEndian>()?);
            }
            epoch_index.push(e);
            stage.push(s);
            features.push(row);
        }
        blocks.push(BlockSpan {
            start,
            end: features.len(),
        });
    }

    Ok(Corpus {
        feature_names: feature_names.unwrap_or_default(),
        epoch_index,
        stage,
        features,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Vec<u8> {
        let mut buf = Vec::new();
        write_block(
            &mut buf,
            &[0, 1, 2],
            &[0, 0, 1],
            &[vec![1.0, 2.0], vec![1.1, 2.1], vec![1.2, 2.2]],
            &["f1".to_string(), "f2".to_string()],
        )
        .unwrap();
        buf
    }

    #[test]
    fn round_trips_one_block() {
        let buf = sample_block();
        let corpus = load_corpus(&mut io::Cursor::new(buf)).unwrap();
        assert_eq!(corpus.feature_names, vec!["f1", "f2"]);
        assert_eq!(corpus.features.len(), 3);
        assert_eq!(corpus.blocks.len(), 1);
        assert_eq!(corpus.blocks[0].start, 0);
        assert_eq!(corpus.blocks[0].end, 3);
    }

    #[test]
    fn concatenation_is_union_of_blocks() {
        let mut a = Vec::new();
        write_block(
            &mut a,
            &[0, 1, 2, 3, 4],
            &[0, 0, 0, 0, 0],
            &vec![vec![0.0; 12]; 5],
            &(0..12).map(|i| format!("f{i}")).collect::<Vec<_>>(),
        )
        .unwrap();
        let mut b = Vec::new();
        write_block(
            &mut b,
            &(0..7).collect::<Vec<_>>(),
            &vec![1; 7],
            &vec![vec![1.0; 12]; 7],
            &(0..12).map(|i| format!("f{i}")).collect::<Vec<_>>(),
        )
        .unwrap();

        let mut concatenated = a.clone();
        concatenated.extend_from_slice(&b);
        let corpus = load_corpus(&mut io::Cursor::new(concatenated)).unwrap();

        assert_eq!(corpus.features.len(), 12);
        assert_eq!(corpus.blocks.len(), 2);
        assert_eq!(corpus.blocks[0].start, 0);
        assert_eq!(corpus.blocks[0].end, 5);
        assert_eq!(corpus.blocks[1].start, 5);
        assert_eq!(corpus.blocks[1].end, 12);
    }

    #[test]
    fn mismatched_feature_count_is_rejected() {
        let mut a = Vec::new();
        write_block(
            &mut a,
            &[0],
            &[0],
            &[vec![1.0, 2.0]],
            &["f1".to_string(), "f2".to_string()],
        )
        .unwrap();
        let mut b = Vec::new();
        write_block(&mut b, &[0], &[0], &[vec![1.0]], &["f1".to_string()]).unwrap();
        let mut concatenated = a;
        concatenated.extend_from_slice(&b);
        assert!(load_corpus(&mut io::Cursor::new(concatenated)).is_err());
    }
}

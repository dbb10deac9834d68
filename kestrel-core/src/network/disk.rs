//! Checkpoint serialization.
//!
//! A checkpoint is a single opaque binary file: a magic tag, the model kind,
//! the generation, the tensor dimensions and a raw little-endian f32 payload.
//! The generation is stored so promotion survives a restart.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::network::linear::LinearModel;
use crate::network::uniform::UniformModel;
use crate::network::{BoxedModel, ModelError, ModelKind};

const MAGIC: &[u8; 8] = b"KESTRLV1";

const KIND_UNIFORM: u8 = 0;
const KIND_LINEAR: u8 = 1;

fn kind_tag(kind: ModelKind) -> u8 {
    match kind {
        ModelKind::Uniform => KIND_UNIFORM,
        ModelKind::Linear => KIND_LINEAR,
    }
}

pub fn write_checkpoint(
    path: &Path,
    kind: ModelKind,
    generation: u64,
    obs_len: usize,
    policy_len: usize,
    payload: &[f32],
) -> Result<(), ModelError> {
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(MAGIC)?;
    writer.write_all(&[kind_tag(kind)])?;
    writer.write_all(&generation.to_le_bytes())?;
    writer.write_all(&(obs_len as u64).to_le_bytes())?;
    writer.write_all(&(policy_len as u64).to_le_bytes())?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    for &v in payload {
        writer.write_all(&v.to_le_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

struct Checkpoint {
    kind: u8,
    generation: u64,
    obs_len: usize,
    policy_len: usize,
    payload: Vec<f32>,
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, ModelError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ModelError::BadMagic);
    }

    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let kind = byte[0];

    let mut word = [0u8; 8];
    reader.read_exact(&mut word)?;
    let generation = u64::from_le_bytes(word);
    reader.read_exact(&mut word)?;
    let obs_len = u64::from_le_bytes(word) as usize;
    reader.read_exact(&mut word)?;
    let policy_len = u64::from_le_bytes(word) as usize;
    reader.read_exact(&mut word)?;
    let payload_len = u64::from_le_bytes(word) as usize;

    let mut payload = vec![0.0f32; payload_len];
    let mut bytes = [0u8; 4];
    for v in &mut payload {
        reader.read_exact(&mut bytes)?;
        *v = f32::from_le_bytes(bytes);
    }

    Ok(Checkpoint {
        kind,
        generation,
        obs_len,
        policy_len,
        payload,
    })
}

/// Load a checkpoint and reconstruct the model it was written from.
pub fn load_model(path: &Path) -> Result<BoxedModel, ModelError> {
    let ckpt = read_checkpoint(path)?;

    match ckpt.kind {
        KIND_UNIFORM => {
            if !ckpt.payload.is_empty() {
                return Err(ModelError::PayloadLen {
                    expected: 0,
                    found: ckpt.payload.len(),
                });
            }
            Ok(Box::new(UniformModel::with_generation(
                ckpt.obs_len,
                ckpt.policy_len,
                ckpt.generation,
            )))
        }
        KIND_LINEAR => {
            let model =
                LinearModel::from_payload(ckpt.obs_len, ckpt.policy_len, ckpt.generation, ckpt.payload)?;
            Ok(Box::new(model))
        }
        other => Err(ModelError::UnknownKind(other)),
    }
}

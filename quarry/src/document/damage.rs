use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// One byte range copy of an in-place update: `size` bytes from the damage
/// source at `source_offset` overwrite the record at `target_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageEvent {
    pub source_offset: usize,
    pub target_offset: usize,
    pub size: usize,
}

impl DamageEvent {
    pub fn new(source_offset: usize, target_offset: usize, size: usize) -> Self {
        DamageEvent {
            source_offset,
            target_offset,
            size,
        }
    }
}

pub type DamageVector = Vec<DamageEvent>;

/// Applies `damages` to a copy of `target` and returns the patched bytes.
pub fn apply_damages(target: &[u8], source: &[u8], damages: &[DamageEvent]) -> QuarryResult<Vec<u8>> {
    let mut patched = target.to_vec();
    for damage in damages {
        let source_end = damage.source_offset.checked_add(damage.size);
        let target_end = damage.target_offset.checked_add(damage.size);
        match (source_end, target_end) {
            (Some(source_end), Some(target_end))
                if source_end <= source.len() && target_end <= patched.len() =>
            {
                patched[damage.target_offset..target_end]
                    .copy_from_slice(&source[damage.source_offset..source_end]);
            }
            _ => {
                log::error!("Damage {:?} is out of bounds", damage);
                return Err(QuarryError::new(
                    &format!("Damage {:?} is out of bounds", damage),
                    ErrorKind::InvalidOperation,
                ));
            }
        }
    }
    Ok(patched)
}

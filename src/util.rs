use crate::error::SessionError;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Removes and recreates `dir`, leaving it empty.
pub fn reset_dir(dir: &Path) -> Result<(), SessionError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|source| SessionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(dir).map_err(|source| SessionError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Whether `dir` exists and holds at least one entry.
pub fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn debug_tensor<B: Backend, const D: usize>(name: &str, t: &Tensor<B, D>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let Ok(v) = t.clone().into_data().convert::<f32>().to_vec::<f32>() else {
        debug!("{name} shape={:?} (unreadable)", t.dims());
        return;
    };
    let min = v.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    debug!("{} shape={:?}, min={:.3}, max={:.3}", name, t.dims(), min, max);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_dir_empties_existing_content() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("training-data");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("sample.png"), b"x").unwrap();
        assert!(has_entries(&dir));

        reset_dir(&dir).unwrap();
        assert!(dir.exists());
        assert!(!has_entries(&dir));
    }

    #[test]
    fn missing_dir_has_no_entries() {
        let root = tempfile::tempdir().unwrap();
        assert!(!has_entries(&root.path().join("nope")));
    }
}

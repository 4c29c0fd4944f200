//! Assembler: byte-level concatenation of ordered chunk files.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::error::DivienError;

/// Chunk file paths for ids `0..chunks`, in id order.
pub fn chunk_paths(config: &PipelineConfig, chunks: u64) -> Vec<PathBuf> {
    (0..chunks).map(|id| config.chunk_path(id)).collect()
}

/// Concatenate `inputs` byte for byte, in the given order, into `output`.
///
/// The output is truncated first, so assembling the same inputs twice gives
/// identical bytes. Returns the number of bytes written.
///
/// # Errors
///
/// - [`DivienError::MissingFile`] if an input does not exist. Nothing is
///   written in that case.
/// - [`DivienError::Io`] for any other read or write failure.
pub fn concat_files<P: AsRef<Path>>(inputs: &[PathBuf], output: P) -> Result<u64, DivienError> {
    let output = output.as_ref();
    if let Some(missing) = inputs.iter().find(|path| !path.is_file()) {
        return Err(DivienError::MissingFile {
            path: missing.clone(),
        });
    }

    let mut writer = BufWriter::new(File::create(output)?);
    let mut total = 0;
    for input in inputs {
        let mut reader = BufReader::new(File::open(input)?);
        total += io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;

    log::info!(
        "Assembled {} files into {} ({total} bytes)",
        inputs.len(),
        output.display(),
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn chunk_paths_follow_ids() {
        let config = PipelineConfig::new().with_output_directory("out");
        let paths = chunk_paths(&config, 3);
        assert_eq!(paths[0], Path::new("out").join("file 0.mp4"));
        assert_eq!(paths[2], Path::new("out").join("file 2.mp4"));
    }

    #[test]
    fn missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.mp4");
        let result = concat_files(&[dir.path().join("nope")], &output);
        assert!(matches!(result, Err(DivienError::MissingFile { .. })));
        assert!(!output.exists());
    }

    #[test]
    fn inputs_are_joined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"abc").unwrap();
        fs::write(&b, b"de").unwrap();

        let output = dir.path().join("out");
        assert_eq!(concat_files(&[b.clone(), a.clone()], &output).unwrap(), 5);
        assert_eq!(fs::read(&output).unwrap(), b"deabc");
    }
}

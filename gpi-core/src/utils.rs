use bincode::{Decode, Encode};
use candle_core::{Error, Result, bail};
use std::path::Path;

/// Serializes `value` with bincode and writes it to `path`.
pub fn dump_to_file<E: Encode>(path: &Path, value: &E) -> Result<()> {
    let bytes = bincode::encode_to_vec(value, bincode::config::standard()).map_err(Error::wrap)?;
    std::fs::write(path, bytes).map_err(Error::wrap)?;
    Ok(())
}

/// Reads `path` back into a value. The `component` name shows up in the error
/// when no saved data exists at the path.
pub fn load_from_file<D: Decode<()>>(path: &Path, component: &str) -> Result<D> {
    if !path.exists() {
        bail!(
            "The saved data of \"{component}\" is not found on [ {} ]",
            path.display()
        );
    }
    let bytes = std::fs::read(path).map_err(Error::wrap)?;
    let (value, _) =
        bincode::decode_from_slice(&bytes, bincode::config::standard()).map_err(Error::wrap)?;
    Ok(value)
}

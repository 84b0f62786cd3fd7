//! In-memory tar packaging of generated code.

use crate::error::{Error, Result};

/// Packs `code` as a single archive entry named `name`.
pub fn pack_script(name: &str, code: &str) -> Result<Vec<u8>> {
    let data = code.as_bytes();

    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, name, data)
        .map_err(|e| Error::SandboxExecution(format!("failed to package code: {}", e)))?;
    builder
        .into_inner()
        .map_err(|e| Error::SandboxExecution(format!("failed to finish archive: {}", e)))
}

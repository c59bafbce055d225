//! Reading and writing config.kdl.

use kdl::KdlDocument;
use std::fs;
use std::io;
use std::path::Path;

use super::schema::ServerConfig;
use crate::{Error, Result};

/// Load the main configuration from `path`.
///
/// A missing file yields the built-in defaults. A file that fails to parse or
/// validate is an error: the server must not start on a config it cannot read.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ServerConfig::default()),
        Err(e) => return Err(e.into()),
    };

    let doc: KdlDocument = text.parse()?;
    let config = ServerConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|msg| Error::InvalidConfig(format!("{}: {}", path.display(), msg)))?;

    Ok(config)
}

/// Save `config` to `path`, preserving the user's formatting.
///
/// The existing document is patched in place so comments, ordering and unknown
/// nodes survive. It is only re-formatted when nodes had to be added. The file
/// is written to a temporary sibling and renamed over the original.
pub fn save_config(path: &Path, config: &ServerConfig) -> Result<()> {
    let mut doc = match fs::read_to_string(path) {
        Ok(text) => text.parse::<KdlDocument>()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => KdlDocument::new(),
        Err(e) => return Err(e.into()),
    };

    if config.apply_to_kdl(&mut doc) {
        doc.autoformat();
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, doc.to_string())?;
    fs::rename(&tmp_path, path)?;

    Ok(())
}

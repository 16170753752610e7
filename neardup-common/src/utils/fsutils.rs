use std::{fs, io, path::Path};

/// Escape a path into a flat filename Emacs style
pub fn path_as_filename(p: impl AsRef<Path>) -> String {
    p.as_ref().to_string_lossy().to_owned().replace('/', "!")
}

/// Try to read the file, return None if it doesn't exist
pub fn read_optional_file(path: impl AsRef<Path>) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
        Ok(s) => Ok(Some(s)),
    }
}

/// Creates a backup with the extension ".backup", if the file exists. The path must refer
/// to something that has a filename.
pub fn backup_file(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    let mut new_file_name = path
        .file_name()
        .ok_or(io::ErrorKind::InvalidInput)?
        .to_owned();
    new_file_name.push(".backup");
    let copy_to = path.with_file_name(new_file_name);

    match fs::copy(path, copy_to) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(_) => Ok(()),
    }
}

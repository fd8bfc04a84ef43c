//! Image storage
//!
//! Images are looked up by a plain file name. [DirStore] serves them from a
//! directory on the host, typically a mounted SD card.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::StorageError;

/// A readable image of known length
pub trait ImageStream: Read {
    /// Total length in bytes
    fn size(&self) -> u64;
}

/// A stored image, as reported by [ImageStore::list]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    pub size: u64,
}

/// Somewhere images can be read from
pub trait ImageStore {
    /// Open the image called `name` for reading
    fn open(&self, name: &str) -> Result<Box<dyn ImageStream>, StorageError>;

    /// All images available, sorted by name
    fn list(&self) -> Result<Vec<ImageEntry>, StorageError>;
}

impl<S: ImageStore + ?Sized> ImageStore for Box<S> {
    fn open(&self, name: &str) -> Result<Box<dyn ImageStream>, StorageError> {
        (**self).open(name)
    }

    fn list(&self) -> Result<Vec<ImageEntry>, StorageError> {
        (**self).list()
    }
}

/// Images stored as `.bin` files in a directory
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unavailable(&self) -> StorageError {
        StorageError::Unavailable(self.root.display().to_string())
    }
}

/// Check that `name` refers to a file directly inside the store
///
/// A single leading `/` is accepted, so `/app.bin` and `app.bin` name the
/// same image.
pub fn validate_name(name: &str) -> Result<&str, StorageError> {
    let bare = name.strip_prefix('/').unwrap_or(name);

    if bare.is_empty()
        || bare == "."
        || bare == ".."
        || bare.contains(['/', '\\'])
        || bare.contains('\0')
    {
        return Err(StorageError::InvalidName(name.to_owned()));
    }

    Ok(bare)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"))
}

struct FileStream {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl ImageStream for FileStream {
    fn size(&self) -> u64 {
        self.size
    }
}

impl ImageStore for DirStore {
    fn open(&self, name: &str) -> Result<Box<dyn ImageStream>, StorageError> {
        let bare = validate_name(name)?;
        if !self.root.is_dir() {
            return Err(self.unavailable());
        }

        let path = self.root.join(bare);
        let io_error = |source| StorageError::Io {
            name: name.to_owned(),
            source,
        };

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_owned()))
            }
            Err(e) => return Err(io_error(e)),
        };
        let metadata = file.metadata().map_err(io_error)?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(name.to_owned()));
        }

        debug!("Opened {} ({} bytes)", path.display(), metadata.len());

        Ok(Box::new(FileStream {
            reader: BufReader::new(file),
            size: metadata.len(),
        }))
    }

    fn list(&self) -> Result<Vec<ImageEntry>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|_| self.unavailable())?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                name: self.root.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !is_image(&path) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            images.push(ImageEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }

        images.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn lists_only_bin_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.bin"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("BOOT.BIN"), [0u8; 3]).unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("nested.bin")).unwrap();

        let store = DirStore::new(dir.path());
        assert_eq!(
            store.list().unwrap(),
            vec![
                ImageEntry {
                    name: "BOOT.BIN".into(),
                    size: 3,
                },
                ImageEntry {
                    name: "app.bin".into(),
                    size: 10,
                },
            ]
        );
    }

    #[test]
    fn opens_images_with_or_without_leading_slash() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.bin"), b"firmware").unwrap();
        let store = DirStore::new(dir.path());

        for name in ["app.bin", "/app.bin"] {
            let mut stream = store.open(name).unwrap();
            assert_eq!(stream.size(), 8);

            let mut contents = Vec::new();
            stream.read_to_end(&mut contents).unwrap();
            assert_eq!(contents, b"firmware");
        }
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        assert!(matches!(
            store.open("part.bin"),
            Err(StorageError::NotFound(name)) if name == "part.bin"
        ));
    }

    #[test]
    fn rejects_names_escaping_the_root() {
        for name in ["", "/", "..", "../app.bin", "a/b.bin", "//app.bin", "a\\b.bin"] {
            assert!(
                matches!(validate_name(name), Err(StorageError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn missing_root_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path().join("sdcard"));

        assert!(matches!(store.list(), Err(StorageError::Unavailable(_))));
        assert!(matches!(
            store.open("app.bin"),
            Err(StorageError::Unavailable(_))
        ));
    }
}

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::TransferError;
use crate::identity::{IdentityHasher, Sha256Identity};
use crate::types::{Identity, Slice};

/// Splits a source file into fixed-size slices.
///
/// The reader itself holds no file handle; each traversal opens the file in
/// a [`SliceStream`] that closes it when dropped.
pub struct SliceReader {
    path: PathBuf,
    slice_size: u64,
    hasher: Arc<dyn IdentityHasher>,
}

impl SliceReader {
    /// Creates a reader for `path` using [`Sha256Identity`].
    pub fn new(path: impl Into<PathBuf>, slice_size: u64) -> Self {
        Self {
            path: path.into(),
            slice_size,
            hasher: Arc::new(Sha256Identity),
        }
    }

    /// Replaces the identity hasher.
    pub fn with_hasher(mut self, hasher: Arc<dyn IdentityHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Opens the source and starts a traversal.
    ///
    /// Fails before touching the filesystem if the slice size is zero, and
    /// with [`TransferError::EmptySource`] if the file has no content.
    pub fn open(&self) -> Result<SliceStream, TransferError> {
        if self.slice_size == 0 {
            return Err(TransferError::InvalidSliceSize);
        }

        let file = File::open(&self.path)?;
        let total = file.metadata()?.len();
        if total == 0 {
            return Err(TransferError::EmptySource(self.path.clone()));
        }

        let canonical =
            std::fs::canonicalize(&self.path).map_err(|source| TransferError::UnresolvedPath {
                path: self.path.clone(),
                source,
            })?;
        let identity = self.hasher.identify(&canonical.to_string_lossy());

        debug!(
            path = %canonical.display(),
            %identity,
            total,
            slice_size = self.slice_size,
            "opened source for slicing"
        );

        Ok(SliceStream {
            file: Some(file),
            identity,
            total,
            slice_size: self.slice_size,
            offset: 0,
        })
    }

    /// Pushes every slice into `on_slice`, in increasing offset order.
    ///
    /// Stops at the first error from either the source or the callback.
    pub fn read<F>(&self, mut on_slice: F) -> Result<(), TransferError>
    where
        F: FnMut(Slice) -> Result<(), TransferError>,
    {
        let mut stream = self.open()?;
        while let Some(slice) = stream.next_slice()? {
            on_slice(slice)?;
        }
        Ok(())
    }
}

/// One traversal of a source file.
///
/// Yields slices lazily. After the last slice, or after any error, the file
/// handle is released and the stream yields nothing more.
pub struct SliceStream {
    file: Option<File>,
    identity: Identity,
    total: u64,
    slice_size: u64,
    offset: u64,
}

impl SliceStream {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Total source size in bytes.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Offset of the next slice.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes not yet produced.
    pub fn remaining(&self) -> u64 {
        self.total - self.offset
    }

    /// Reads the next slice. Returns `None` once `[0, total)` has been produced.
    ///
    /// A source that ends early is an error ([`TransferError::ShortRead`]),
    /// never a silent end of stream.
    pub fn next_slice(&mut self) -> Result<Option<Slice>, TransferError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let size = self.slice_size.min(self.total - self.offset);
        if size == 0 {
            self.file = None;
            return Ok(None);
        }

        let mut content = vec![0u8; size as usize];
        if let Err(e) = file.read_exact(&mut content) {
            self.file = None;
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(TransferError::ShortRead {
                    offset: self.offset,
                    expected: size,
                });
            }
            return Err(e.into());
        }

        let slice = Slice {
            identity: self.identity.clone(),
            total: self.total,
            size,
            offset: self.offset,
            content,
        };
        self.offset += size;
        if self.offset == self.total {
            self.file = None;
        }
        Ok(Some(slice))
    }

    /// Returns `true` while the source handle is still open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Iterator for SliceStream {
    type Item = Result<Slice, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_slice().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn reads_all_slices() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"AABBCCDDEE");

        let mut stream = SliceReader::new(&path, 4).open().unwrap();
        assert_eq!(stream.total(), 10);
        assert_eq!(stream.remaining(), 10);

        let s1 = stream.next_slice().unwrap().unwrap();
        assert_eq!((s1.offset, s1.size, s1.total), (0, 4, 10));
        assert_eq!(&s1.content, b"AABB");

        let s2 = stream.next_slice().unwrap().unwrap();
        assert_eq!((s2.offset, s2.size), (4, 4));
        assert_eq!(&s2.content, b"CCDD");

        let s3 = stream.next_slice().unwrap().unwrap();
        assert_eq!((s3.offset, s3.size), (8, 2));
        assert_eq!(&s3.content, b"EE");
        assert!(!stream.is_open());

        assert!(stream.next_slice().unwrap().is_none());
    }

    #[test]
    fn slices_tile_the_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let path = create_test_file(dir.path(), "src.bin", &data);

        for slice_size in [1u64, 7, 100, 999, 1000, 4096] {
            let slices: Vec<Slice> = SliceReader::new(&path, slice_size)
                .open()
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();

            let mut expected_offset = 0;
            for s in &slices {
                assert_eq!(s.offset, expected_offset);
                assert!(s.size > 0 && s.size <= slice_size);
                expected_offset += s.size;
            }
            assert_eq!(expected_offset, 1000);

            let last = slices.last().unwrap();
            let tail = 1000 % slice_size;
            assert_eq!(last.size, if tail == 0 { slice_size.min(1000) } else { tail });

            let joined: Vec<u8> = slices.into_iter().flat_map(|s| s.content).collect();
            assert_eq!(joined, data);
        }
    }

    #[test]
    fn exact_multiple_ends_with_full_slice() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", &[1u8; 12]);
        let sizes: Vec<u64> = SliceReader::new(&path, 4)
            .open()
            .unwrap()
            .map(|s| s.unwrap().size)
            .collect();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[test]
    fn zero_slice_size_rejected_before_open() {
        let dir = TempDir::new().unwrap();
        // File does not exist: the slice size check must come first.
        let reader = SliceReader::new(dir.path().join("missing"), 0);
        assert!(matches!(reader.open(), Err(TransferError::InvalidSliceSize)));
    }

    #[test]
    fn empty_source_never_calls_back() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");

        let mut calls = 0;
        let result = SliceReader::new(&path, 4).read(|_| {
            calls += 1;
            Ok(())
        });
        assert!(matches!(result, Err(TransferError::EmptySource(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = SliceReader::new(dir.path().join("missing"), 4).open();
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn identity_is_stable_across_traversals() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"stable");

        let a = SliceReader::new(&path, 2).open().unwrap();
        let b = SliceReader::new(&path, 3).open().unwrap();
        assert_eq!(a.identity(), b.identity());

        // A relative spelling of the same file resolves to the same identity.
        let dotted = dir.path().join(".").join("src.bin");
        let c = SliceReader::new(&dotted, 2).open().unwrap();
        assert_eq!(a.identity(), c.identity());
    }

    #[test]
    fn custom_hasher_is_used() {
        struct Fixed;
        impl IdentityHasher for Fixed {
            fn identify(&self, _: &str) -> Identity {
                Identity::new("fixed")
            }
        }

        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"x");
        let stream = SliceReader::new(&path, 1)
            .with_hasher(Arc::new(Fixed))
            .open()
            .unwrap();
        assert_eq!(stream.identity().as_str(), "fixed");
    }

    #[test]
    fn callback_error_stops_traversal() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"0123456789");

        let mut seen = Vec::new();
        let result = SliceReader::new(&path, 2).read(|slice| {
            seen.push(slice.offset);
            if slice.offset == 4 {
                return Err(TransferError::InvalidSlice("stop".into()));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, vec![0, 2, 4]);
    }

    #[test]
    fn truncated_source_is_short_read() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.bin", b"0123456789");

        let mut stream = SliceReader::new(&path, 4).open().unwrap();
        stream.next_slice().unwrap().unwrap();

        // Shrink the file underneath the open stream.
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(6)
            .unwrap();

        let err = stream.next_slice().unwrap_err();
        assert!(matches!(
            err,
            TransferError::ShortRead {
                offset: 4,
                expected: 4
            }
        ));
        assert!(!stream.is_open());
        assert!(stream.next_slice().unwrap().is_none());
    }
}

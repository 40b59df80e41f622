use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// Where a firmware image is read from.
pub enum FirmwareSource<'a> {
    Path(PathBuf),
    Bytes(Cow<'a, [u8]>),
    Reader(Box<dyn Read + 'a>),
}

impl<'a> FirmwareSource<'a> {
    pub fn reader(reader: impl Read + 'a) -> Self {
        FirmwareSource::Reader(Box::new(reader))
    }

    pub(crate) fn open(self) -> std::io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            FirmwareSource::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            FirmwareSource::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            FirmwareSource::Reader(reader) => reader,
        })
    }
}

impl From<PathBuf> for FirmwareSource<'_> {
    fn from(path: PathBuf) -> Self {
        FirmwareSource::Path(path)
    }
}

impl From<&Path> for FirmwareSource<'_> {
    fn from(path: &Path) -> Self {
        FirmwareSource::Path(path.to_path_buf())
    }
}

impl<'a> From<&'a [u8]> for FirmwareSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        FirmwareSource::Bytes(Cow::Borrowed(bytes))
    }
}

impl From<Vec<u8>> for FirmwareSource<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        FirmwareSource::Bytes(Cow::Owned(bytes))
    }
}

/// Fills `block` with up to `size` bytes, fewer only at the end of the stream.
pub(crate) fn read_block(
    reader: &mut Box<dyn Read + '_>,
    block: &mut Vec<u8>,
    size: usize,
) -> std::io::Result<()> {
    block.clear();
    reader.by_ref().take(size as u64).read_to_end(block)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hands out at most three bytes per read, like a pipe would.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let length = self.0.len().min(buf.len()).min(3);
            buf[..length].copy_from_slice(&self.0[..length]);
            self.0 = &self.0[length..];
            Ok(length)
        }
    }

    #[test]
    fn blocks_are_filled_from_short_reads() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = FirmwareSource::reader(Trickle(&data)).open().unwrap();
        let mut block = vec![];

        read_block(&mut reader, &mut block, 8).unwrap();
        assert_eq!(block, (0..8).collect::<Vec<u8>>());
        read_block(&mut reader, &mut block, 8).unwrap();
        assert_eq!(block, vec![8, 9]);
        read_block(&mut reader, &mut block, 8).unwrap();
        assert!(block.is_empty());
    }

    #[test]
    fn missing_file() {
        let source = FirmwareSource::from(PathBuf::from("/nonexistent/respeaker.bin"));
        assert!(source.open().is_err());
    }
}

// Licensed under the Apache-2.0 license

//! SD card file system access.

use boot_image::SdCard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The file system could not be started.
    Mount,
    /// The card volume could not be selected.
    Volume,
    Directory,
    NotFound,
    /// No file is open on the session.
    NotOpen,
    Read,
    Write,
    Seek,
}

impl core::fmt::Display for FsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            FsError::Mount => "file system start failed",
            FsError::Volume => "volume selection failed",
            FsError::Directory => "directory change failed",
            FsError::NotFound => "file not found",
            FsError::NotOpen => "no open file",
            FsError::Read => "read failed",
            FsError::Write => "write failed",
            FsError::Seek => "seek failed",
        };
        f.write_str(text)
    }
}

/// Read access to the FAT file systems of the two SD cards.
pub trait FileSystem {
    type File;

    fn open_filesystem(&mut self) -> Result<(), FsError>;

    fn select_volume(&mut self, volume: SdCard) -> Result<(), FsError>;

    /// Releases the file system opened by `open_filesystem`.
    fn close_filesystem(&mut self, volume: SdCard);

    fn change_directory(&mut self, path: &str) -> Result<(), FsError>;

    fn open(&mut self, name: &str) -> Result<Self::File, FsError>;

    fn file_length(&mut self, file: &Self::File) -> Result<u32, FsError>;

    fn seek(&mut self, file: &mut Self::File, position: u32) -> Result<(), FsError>;

    /// Reads up to `buf.len()` bytes, returning the number read.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, FsError>;

    fn close(&mut self, file: Self::File);
}

pub trait WritableFileSystem: FileSystem {
    /// Creates `name`, truncating an existing file.
    fn create(&mut self, name: &str) -> Result<Self::File, FsError>;

    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, FsError>;
}

/// Scoped session on one SD card.
///
/// Opening the session starts the file system and selects the volume; dropping
/// it closes the open file and the file system, on every exit path.
pub struct SdCardAccess<'a, F: FileSystem> {
    fs: &'a mut F,
    volume: SdCard,
    file: Option<F::File>,
    armed: bool,
}

impl<'a, F: FileSystem> SdCardAccess<'a, F> {
    pub fn open(fs: &'a mut F, volume: SdCard) -> Result<Self, FsError> {
        fs.open_filesystem()?;
        let access = SdCardAccess {
            fs,
            volume,
            file: None,
            armed: true,
        };
        access.fs.select_volume(volume)?;
        Ok(access)
    }

    pub fn volume(&self) -> SdCard {
        self.volume
    }

    pub fn change_directory(&mut self, path: &str) -> Result<(), FsError> {
        self.fs.change_directory(path)
    }

    /// Opens `name`, closing a previously opened file.
    pub fn open_file(&mut self, name: &str) -> Result<(), FsError> {
        self.close_file();
        self.file = Some(self.fs.open(name)?);
        Ok(())
    }

    pub fn close_file(&mut self) {
        if let Some(file) = self.file.take() {
            self.fs.close(file);
        }
    }

    pub fn file_length(&mut self) -> Result<u32, FsError> {
        let file = self.file.as_ref().ok_or(FsError::NotOpen)?;
        self.fs.file_length(file)
    }

    pub fn seek(&mut self, position: u32) -> Result<(), FsError> {
        let file = self.file.as_mut().ok_or(FsError::NotOpen)?;
        self.fs.seek(file, position)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let file = self.file.as_mut().ok_or(FsError::NotOpen)?;
        self.fs.read(file, buf)
    }

    /// Hands the open file over to the caller, who becomes responsible for
    /// closing the file and the file system. Without an open file the session
    /// is closed and `None` returned.
    pub fn into_open_file(mut self) -> Option<(SdCard, F::File)> {
        let file = self.file.take()?;
        self.armed = false;
        Some((self.volume, file))
    }
}

impl<F: WritableFileSystem> SdCardAccess<'_, F> {
    pub fn create_file(&mut self, name: &str) -> Result<(), FsError> {
        self.close_file();
        self.file = Some(self.fs.create(name)?);
        Ok(())
    }

    /// Opens `name` positioned at its end.
    pub fn append_file(&mut self, name: &str) -> Result<(), FsError> {
        self.open_file(name)?;
        let length = self.file_length()?;
        self.seek(length)
    }

    /// Writes all of `data` to the open file.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), FsError> {
        let file = self.file.as_mut().ok_or(FsError::NotOpen)?;
        let mut written = 0;
        while written < data.len() {
            match self.fs.write(file, &data[written..])? {
                0 => return Err(FsError::Write),
                n => written += n,
            }
        }
        Ok(())
    }
}

impl<F: FileSystem> Drop for SdCardAccess<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.close_file();
            self.fs.close_filesystem(self.volume);
        }
    }
}

// Licensed under the Apache-2.0 license

use boot_image::SdCard;
use obc_bootloader::fs::{FileSystem, FsError, WritableFileSystem};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct MemFile {
    volume: SdCard,
    path: String,
    position: u32,
}

#[derive(Default)]
struct Volume {
    files: BTreeMap<String, Vec<u8>>,
    directories: BTreeSet<String>,
    unavailable: bool,
}

/// FAT file systems of both SD cards held in memory. Keeps count of mounts and
/// open files so tests can check that every session was closed.
#[derive(Default)]
pub struct MemFileSystem {
    volumes: [Volume; 2],
    started: bool,
    selected: Option<SdCard>,
    directory: String,
    failing_reads: u32,
    pub mounts: usize,
    pub unmounts: usize,
    pub opened_files: usize,
    pub closed_files: usize,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` at `path`, a path relative to the card root.
    pub fn add_file(&mut self, volume: SdCard, path: &str, data: &[u8]) {
        self.volume_mut(volume)
            .files
            .insert(path.to_string(), data.to_vec());
    }

    /// Creates an empty directory, so files can be created in it.
    pub fn add_directory(&mut self, volume: SdCard, path: &str) {
        self.volume_mut(volume).directories.insert(path.to_string());
    }

    pub fn file(&self, volume: SdCard, path: &str) -> Option<&[u8]> {
        self.volume(volume).files.get(path).map(Vec::as_slice)
    }

    pub fn file_mut(&mut self, volume: SdCard, path: &str) -> Option<&mut Vec<u8>> {
        self.volume_mut(volume).files.get_mut(path)
    }

    pub fn remove_file(&mut self, volume: SdCard, path: &str) {
        self.volume_mut(volume).files.remove(path);
    }

    /// Makes selecting the card fail, like a card that does not respond.
    pub fn set_available(&mut self, volume: SdCard, available: bool) {
        self.volume_mut(volume).unavailable = !available;
    }

    /// Fails the next `count` file reads.
    pub fn fail_reads(&mut self, count: u32) {
        self.failing_reads = count;
    }

    /// True when every mount was undone and every file closed.
    pub fn is_balanced(&self) -> bool {
        self.mounts == self.unmounts && self.opened_files == self.closed_files && !self.started
    }

    fn volume(&self, volume: SdCard) -> &Volume {
        &self.volumes[u8::from(volume) as usize]
    }

    fn volume_mut(&mut self, volume: SdCard) -> &mut Volume {
        &mut self.volumes[u8::from(volume) as usize]
    }

    fn path_of(&self, name: &str) -> String {
        if self.directory.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.directory, name)
        }
    }

    fn mounted(&self) -> Result<SdCard, FsError> {
        match (self.started, self.selected) {
            (true, Some(volume)) => Ok(volume),
            (false, _) => Err(FsError::Mount),
            (true, None) => Err(FsError::Volume),
        }
    }

    fn contents(&mut self, file: &MemFile) -> Result<&mut Vec<u8>, FsError> {
        self.volume_mut(file.volume)
            .files
            .get_mut(&file.path)
            .ok_or(FsError::NotFound)
    }
}

impl FileSystem for MemFileSystem {
    type File = MemFile;

    fn open_filesystem(&mut self) -> Result<(), FsError> {
        if self.started {
            return Err(FsError::Mount);
        }
        self.started = true;
        self.mounts += 1;
        Ok(())
    }

    fn select_volume(&mut self, volume: SdCard) -> Result<(), FsError> {
        if self.volume(volume).unavailable {
            return Err(FsError::Volume);
        }
        self.selected = Some(volume);
        self.directory.clear();
        Ok(())
    }

    fn close_filesystem(&mut self, _volume: SdCard) {
        if self.started {
            self.started = false;
            self.selected = None;
            self.unmounts += 1;
        }
    }

    fn change_directory(&mut self, path: &str) -> Result<(), FsError> {
        let volume = self.mounted()?;
        let prefix = format!("{}/", path);
        let volume = self.volume(volume);
        if !volume.directories.contains(path)
            && !volume.files.keys().any(|name| name.starts_with(&prefix))
        {
            return Err(FsError::Directory);
        }
        self.directory = path.to_string();
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<MemFile, FsError> {
        let volume = self.mounted()?;
        let path = self.path_of(name);
        if !self.volume(volume).files.contains_key(&path) {
            return Err(FsError::NotFound);
        }
        self.opened_files += 1;
        Ok(MemFile {
            volume,
            path,
            position: 0,
        })
    }

    fn file_length(&mut self, file: &MemFile) -> Result<u32, FsError> {
        Ok(self.contents(file)?.len() as u32)
    }

    fn seek(&mut self, file: &mut MemFile, position: u32) -> Result<(), FsError> {
        if position as usize > self.contents(file)?.len() {
            return Err(FsError::Seek);
        }
        file.position = position;
        Ok(())
    }

    fn read(&mut self, file: &mut MemFile, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(FsError::Read);
        }
        let position = file.position as usize;
        let data = self.contents(file)?;
        let len = buf.len().min(data.len().saturating_sub(position));
        buf[..len].copy_from_slice(&data[position..position + len]);
        file.position += len as u32;
        Ok(len)
    }

    fn close(&mut self, _file: MemFile) {
        self.closed_files += 1;
    }
}

impl WritableFileSystem for MemFileSystem {
    fn create(&mut self, name: &str) -> Result<MemFile, FsError> {
        let volume = self.mounted()?;
        let path = self.path_of(name);
        self.volume_mut(volume).files.insert(path.clone(), Vec::new());
        self.opened_files += 1;
        Ok(MemFile {
            volume,
            path,
            position: 0,
        })
    }

    fn write(&mut self, file: &mut MemFile, data: &[u8]) -> Result<usize, FsError> {
        let position = file.position as usize;
        let contents = self.contents(file)?;
        if contents.len() < position + data.len() {
            contents.resize(position + data.len(), 0);
        }
        contents[position..position + data.len()].copy_from_slice(data);
        file.position += data.len() as u32;
        Ok(data.len())
    }
}

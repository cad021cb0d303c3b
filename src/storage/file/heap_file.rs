use crate::common::{Error, Result};
use crate::config;
use crate::storage::file::PagedFile;
use crate::storage::page::{Page, PageId};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Names of files that currently have a live `HeapFile` handle somewhere in
/// this process. Consulted by [`PagedFile::is_open`].
static OPEN_FILES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// A single OS file addressed as a sequence of fixed-size pages. Page number
/// 0 is never written to — it is reserved as the invalid sentinel, so the
/// byte range `[0, page_size)` of the underlying file sits unused. The first
/// page ever allocated is always page 1.
#[derive(Debug)]
pub struct HeapFile {
    name: String,
    current_page_no: AtomicU32,
    writer: BufWriter<File>,
    reader: BufReader<File>,
}

impl HeapFile {
    fn path_for(name: &str) -> PathBuf {
        Path::new(&config::settings().data_dir).join(name)
    }

    fn offset_of(page_no: PageId) -> u64 {
        page_no as u64 * config::settings().page_size_bytes as u64
    }

    fn open_handles(name: &str, file: File) -> Result<Self> {
        let writer_handle = file.try_clone().map_err(Error::Io)?;
        OPEN_FILES.lock().unwrap().insert(name.to_string());
        Ok(HeapFile {
            name: name.to_string(),
            current_page_no: AtomicU32::new(0),
            writer: BufWriter::new(writer_handle),
            reader: BufReader::new(file),
        })
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        use tempfile::NamedTempFile;
        std::fs::create_dir_all(&config::settings().data_dir).ok();
        let temp_file = NamedTempFile::new_in(&config::settings().data_dir)
            .expect("unable to create temp file");
        let name = temp_file.path().file_name().unwrap().to_string_lossy().to_string();
        let writer = temp_file.reopen().expect("unable to reopen temp file");
        OPEN_FILES.lock().unwrap().insert(name.clone());
        HeapFile {
            name,
            current_page_no: AtomicU32::new(0),
            writer: BufWriter::new(writer),
            reader: BufReader::new(temp_file.into_file()),
        }
    }
}

impl PagedFile for HeapFile {
    fn exists(name: &str) -> bool {
        Self::path_for(name).exists()
    }

    fn create(name: &str) -> Result<Self> {
        let path = Self::path_for(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(Error::Io)?;
        Self::open_handles(name, file)
    }

    fn open(name: &str) -> Result<Self> {
        let path = Self::path_for(name);
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .open(&path)
            .map_err(Error::Io)?;
        Self::open_handles(name, file)
    }

    fn is_open(name: &str) -> bool {
        OPEN_FILES.lock().unwrap().contains(name)
    }

    fn allocate_page(&mut self) -> Result<(PageId, Page)> {
        let page_no = 1 + self.current_page_no.fetch_add(1, Ordering::SeqCst);
        let page = Page::new(page_no);
        self.write_page(&page)?;
        Ok((page_no, page))
    }

    fn read_page(&mut self, page_no: PageId) -> Result<Page> {
        let offset = Self::offset_of(page_no);
        self.reader.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;

        let mut buffer = vec![0u8; config::settings().page_size_bytes];
        self.reader.read_exact(&mut buffer).map_err(Error::Io)?;
        Ok(Page::from_bytes(page_no, buffer))
    }

    fn write_page(&mut self, page: &Page) -> Result<()> {
        let offset = Self::offset_of(page.page_id());
        self.writer.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        self.writer.write_all(page.data()).map_err(Error::Io)?;
        self.writer.flush().map_err(Error::Io)
    }

    /// Page reclamation is out of scope: the supported operation set never
    /// frees a page once allocated. Kept as a no-op, matching the file this
    /// module was grounded on.
    fn delete_page(&mut self, _page_no: PageId) -> Result<()> {
        Ok(())
    }

    fn first_page_no(&self) -> PageId {
        1
    }

    fn filename(&self) -> &str {
        &self.name
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        OPEN_FILES.lock().unwrap().remove(&self.name);
    }
}

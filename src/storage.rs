//! Paged single-file storage for leafdb.
//!
//! One backing file holds fixed-size pages. Page 0 is the table catalog,
//! page 1 the page directory, and every later page holds packed row data
//! for whichever table the directory assigns it to. All integers on disk
//! are big-endian; strings carry an i16 length prefix.
//!
//! # Examples
//! ```no_run
//! use leafdb::storage::Storage;
//!
//! let storage = Storage::open("data").unwrap();
//! let pages = storage.pages_for("users").unwrap();
//! assert!(pages.is_empty());
//! ```

use crate::ast::{ColumnDefinition, ColumnType};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Fixed size of every page in the backing file.
pub const PAGE_SIZE: usize = 16 * 1024;
/// Page holding the table definitions.
pub const CATALOG_PAGE_INDEX: usize = 0;
/// Page mapping table names to their data pages.
pub const DIRECTORY_PAGE_INDEX: usize = 1;

const PAGE_HEADER_SIZE: usize = 4;
const MAX_STRING_LEN: usize = i16::MAX as usize;

/// Written in place of an absent integer value.
pub const INT_NULL_SENTINEL: i32 = i32::MAX;
/// Written as the length prefix of an absent text value; no body follows.
pub const TEXT_NULL_SENTINEL: i16 = 0x7f;

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("page {page} cannot fit {requested} more bytes ({available} available)")]
    StorageFull {
        page: usize,
        requested: usize,
        available: usize,
    },
    #[error("string of {0} bytes exceeds the i16 length prefix")]
    StringTooLarge(usize),
    #[error("definition for table {0} not found")]
    UnknownTable(String),
    #[error("table {0} already exists")]
    DuplicateTable(String),
    #[error("type mismatch for column {column}: expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },
}

/// Value stored in a table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
}

/// Positional cursor over an owned byte vector. Writes append at the end;
/// reads decode at the cursor and advance it.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), StorageError> {
        if value.len() > MAX_STRING_LEN {
            return Err(StorageError::StringTooLarge(value.len()));
        }
        self.write_i16(value.len() as i16);
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn read_i16(&mut self) -> Result<i16, StorageError> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, StorageError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<String, StorageError> {
        let length = self.read_i16()?;
        self.read_text(length)
    }

    /// Read `length` UTF-8 bytes as a string.
    pub fn read_text(&mut self, length: i16) -> Result<String, StorageError> {
        if length < 0 {
            return Err(StorageError::Decode(format!(
                "negative string length {}",
                length
            )));
        }
        let bytes = self.take(length as usize)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|_| StorageError::Decode("invalid utf-8 in string".to_string()))
    }

    fn take(&mut self, count: usize) -> Result<&[u8], StorageError> {
        if self.cursor + count > self.data.len() {
            return Err(StorageError::Decode(format!(
                "read of {} bytes at offset {} past end of {}-byte buffer",
                count,
                self.cursor,
                self.data.len()
            )));
        }
        let slice = &self.data[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) {
        self.cursor += count;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn concat(&mut self, other: ByteBuffer) {
        self.data.extend_from_slice(other.bytes());
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }
}

/// Table metadata stored in the catalog.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Column definitions in on-disk field order.
    pub columns: Vec<ColumnDefinition>,
    /// Column name to position lookup.
    pub column_indexes: HashMap<String, usize>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        let column_indexes = columns
            .iter()
            .enumerate()
            .map(|(index, column)| (column.name.clone(), index))
            .collect();
        Self {
            name: name.into(),
            columns,
            column_indexes,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_indexes.get(name).copied()
    }
}

/// Handle on the backing file. File descriptors are opened per operation
/// and released before the call returns; the struct itself only carries
/// the path.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    /// Open the backing file, creating and initializing it on first use.
    ///
    /// A fresh file starts with two pages: the table catalog and the page
    /// directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage = Self {
            path: path.as_ref().to_path_buf(),
        };
        if !storage.path.exists() {
            File::create(&storage.path)?;
            storage.create_page("table_definitions", false)?;
            storage.create_page("page_directory", false)?;
            debug!(path = %storage.path.display(), "initialized backing file");
        }
        Ok(storage)
    }

    /// Read page `page_index` into an owned buffer of exactly `PAGE_SIZE`
    /// bytes, zero-filled past the end of the file. The cursor is at 0.
    pub fn read_page(&self, page_index: usize) -> Result<ByteBuffer, StorageError> {
        let mut file = File::open(&self.path)?;
        let mut data = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start((page_index * PAGE_SIZE) as u64))?;
        read_full(&mut file, &mut data)?;
        Ok(ByteBuffer::from_bytes(data))
    }

    /// Append `bytes` to the used region of page `page_index`, advancing
    /// the page's used counter. An uninitialized header (0) counts as the
    /// bare header size.
    pub fn append_to_page(&self, bytes: &[u8], page_index: usize) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        let offset = (page_index * PAGE_SIZE) as u64;
        let mut used = read_header(&mut file, offset)?;
        if used == 0 {
            used = PAGE_HEADER_SIZE;
        }
        if used + bytes.len() > PAGE_SIZE {
            return Err(StorageError::StorageFull {
                page: page_index,
                requested: bytes.len(),
                available: PAGE_SIZE - used,
            });
        }
        let mut header = ByteBuffer::new();
        header.write_i32((used + bytes.len()) as i32);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(header.bytes())?;
        file.seek(SeekFrom::Start(offset + used as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Allocate a fresh page at the end of the file and initialize its
    /// used counter. With `register` set, the page is recorded in the page
    /// directory under `table_name`. Returned indices are monotonically
    /// increasing.
    pub fn create_page(&self, table_name: &str, register: bool) -> Result<usize, StorageError> {
        let page_index = {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&self.path)?;
            let size = file.metadata()?.len() as usize;
            let page_index = (size + PAGE_SIZE - 1) / PAGE_SIZE;
            let mut header = ByteBuffer::new();
            header.write_i32(PAGE_HEADER_SIZE as i32);
            file.seek(SeekFrom::Start((page_index * PAGE_SIZE) as u64))?;
            file.write_all(header.bytes())?;
            page_index
        };
        debug!(page_index, table = table_name, "allocated page");
        if register {
            let mut entry = ByteBuffer::new();
            entry.write_string(table_name)?;
            entry.write_i16(page_index as i16);
            self.append_to_page(entry.bytes(), DIRECTORY_PAGE_INDEX)?;
        }
        Ok(page_index)
    }

    /// Register a table's schema in the catalog.
    pub fn create_table(
        &self,
        table_name: &str,
        columns: &[ColumnDefinition],
    ) -> Result<(), StorageError> {
        match self.table_definition(table_name) {
            Ok(_) => return Err(StorageError::DuplicateTable(table_name.to_string())),
            Err(StorageError::UnknownTable(_)) => {}
            Err(err) => return Err(err),
        }
        let mut definition = ByteBuffer::new();
        for column in columns {
            definition.write_string(&column.name)?;
            definition.write_i16(column.column_type.tag());
        }
        let mut entry = ByteBuffer::new();
        entry.write_string(table_name)?;
        entry.write_i32(definition.len() as i32);
        entry.concat(definition);
        self.append_to_page(entry.bytes(), CATALOG_PAGE_INDEX)?;
        debug!(table = table_name, columns = columns.len(), "created table");
        Ok(())
    }

    /// Look up a table's schema. Linear scan of the catalog page; the
    /// first entry with a matching name wins.
    pub fn table_definition(&self, table_name: &str) -> Result<TableDefinition, StorageError> {
        let mut page = self.read_page(CATALOG_PAGE_INDEX)?;
        let used = page_used(&mut page)?;
        while page.cursor() < used {
            let name = page.read_string()?;
            let definition_len = page.read_i32()?;
            if definition_len < 0 {
                return Err(StorageError::Decode(format!(
                    "negative definition length for table {}",
                    name
                )));
            }
            if name != table_name {
                page.skip(definition_len as usize);
                continue;
            }
            let end = page.cursor() + definition_len as usize;
            let mut columns = Vec::new();
            while page.cursor() < end {
                let column = page.read_string()?;
                let tag = page.read_i16()?;
                columns.push(ColumnDefinition {
                    name: column,
                    column_type: ColumnType::from_tag(tag),
                });
            }
            return Ok(TableDefinition::new(name, columns));
        }
        Err(StorageError::UnknownTable(table_name.to_string()))
    }

    /// Names of all cataloged tables, in registration order.
    pub fn list_tables(&self) -> Result<Vec<String>, StorageError> {
        let mut page = self.read_page(CATALOG_PAGE_INDEX)?;
        let used = page_used(&mut page)?;
        let mut tables = Vec::new();
        while page.cursor() < used {
            let name = page.read_string()?;
            let definition_len = page.read_i32()?;
            if definition_len < 0 {
                return Err(StorageError::Decode(format!(
                    "negative definition length for table {}",
                    name
                )));
            }
            page.skip(definition_len as usize);
            tables.push(name);
        }
        Ok(tables)
    }

    /// Data pages assigned to `table_name`, in insertion order.
    pub fn pages_for(&self, table_name: &str) -> Result<Vec<usize>, StorageError> {
        let mut page = self.read_page(DIRECTORY_PAGE_INDEX)?;
        let used = page_used(&mut page)?;
        let mut pages = Vec::new();
        while page.cursor() < used {
            let name = page.read_string()?;
            let page_index = page.read_i16()?;
            if name == table_name {
                pages.push(page_index as usize);
            }
        }
        Ok(pages)
    }

    /// Lazy scan over all rows of `table_name`, spanning its data pages in
    /// directory order. Rows are decoded one at a time; dropping the
    /// iterator releases the current page buffer.
    pub fn scan(&self, table_name: &str) -> Result<RowScan<'_>, StorageError> {
        let table = self.table_definition(table_name)?;
        let pages = self.pages_for(table_name)?;
        Ok(RowScan {
            storage: self,
            table,
            pages,
            next_page: 0,
            current: None,
            next_row_index: 0,
            done: false,
        })
    }
}

/// Encode a row for `table` from a map of supplied values. Fields are
/// packed in schema order; absent values become the NULL sentinels.
pub fn encode_row(
    table: &TableDefinition,
    values: &HashMap<String, Value>,
) -> Result<Vec<u8>, StorageError> {
    let mut buf = ByteBuffer::new();
    for column in &table.columns {
        match (column.column_type, values.get(&column.name)) {
            (ColumnType::Integer, Some(Value::Int(value))) => {
                let value = i32::try_from(*value).map_err(|_| StorageError::TypeMismatch {
                    column: column.name.clone(),
                    expected: "integer in 32-bit range",
                })?;
                buf.write_i32(value);
            }
            (ColumnType::Integer, None) => buf.write_i32(INT_NULL_SENTINEL),
            (ColumnType::Text, Some(Value::Text(value))) => buf.write_string(value)?,
            (ColumnType::Text, None) => buf.write_i16(TEXT_NULL_SENTINEL),
            (ColumnType::Integer, Some(_)) => {
                return Err(StorageError::TypeMismatch {
                    column: column.name.clone(),
                    expected: "integer",
                })
            }
            (ColumnType::Text, Some(_)) => {
                return Err(StorageError::TypeMismatch {
                    column: column.name.clone(),
                    expected: "text",
                })
            }
            (ColumnType::Unknown, _) => {
                return Err(StorageError::TypeMismatch {
                    column: column.name.clone(),
                    expected: "a known column type",
                })
            }
        }
    }
    Ok(buf.into_bytes())
}

/// Decode one row at the buffer's cursor, using the schema for field
/// order and types. A text length prefix equal to the NULL sentinel
/// decodes as the empty string and consumes no body.
pub fn decode_row(
    page: &mut ByteBuffer,
    table: &TableDefinition,
) -> Result<Vec<Value>, StorageError> {
    let mut values = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let value = match column.column_type {
            ColumnType::Integer => Value::Int(page.read_i32()? as i64),
            ColumnType::Text => {
                let length = page.read_i16()?;
                if length == TEXT_NULL_SENTINEL {
                    Value::Text(String::new())
                } else {
                    Value::Text(page.read_text(length)?)
                }
            }
            ColumnType::Unknown => {
                return Err(StorageError::Decode(format!(
                    "column {} has unknown type",
                    column.name
                )))
            }
        };
        values.push(value);
    }
    Ok(values)
}

struct CurrentPage {
    buffer: ByteBuffer,
    used: usize,
}

/// Lazy, finite, non-restartable sequence of `(row index, row)` pairs for
/// one table. The row index increases monotonically across pages. A
/// decode failure yields one `Err` and ends the iteration.
pub struct RowScan<'a> {
    storage: &'a Storage,
    table: TableDefinition,
    pages: Vec<usize>,
    next_page: usize,
    current: Option<CurrentPage>,
    next_row_index: usize,
    done: bool,
}

impl RowScan<'_> {
    /// Schema of the scanned table, resolved once at scan creation.
    pub fn table(&self) -> &TableDefinition {
        &self.table
    }
}

impl Iterator for RowScan<'_> {
    type Item = Result<(usize, Vec<Value>), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.current.take() {
                Some(mut page) => {
                    if page.buffer.cursor() >= page.used {
                        continue;
                    }
                    match decode_row(&mut page.buffer, &self.table) {
                        Ok(values) => {
                            let index = self.next_row_index;
                            self.next_row_index += 1;
                            self.current = Some(page);
                            return Some(Ok((index, values)));
                        }
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                None => {
                    if self.next_page >= self.pages.len() {
                        self.done = true;
                        return None;
                    }
                    let page_index = self.pages[self.next_page];
                    self.next_page += 1;
                    let mut buffer = match self.storage.read_page(page_index) {
                        Ok(buffer) => buffer,
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    };
                    let used = match page_used(&mut buffer) {
                        Ok(used) => used,
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    };
                    self.current = Some(CurrentPage { buffer, used });
                }
            }
        }
    }
}

/// Read a page's used counter from the buffer cursor and validate its
/// range.
pub(crate) fn page_used(page: &mut ByteBuffer) -> Result<usize, StorageError> {
    let used = page.read_i32()?;
    if used < 0 || used as usize > PAGE_SIZE {
        return Err(StorageError::Decode(format!(
            "page used counter {} out of range",
            used
        )));
    }
    Ok(used as usize)
}

fn read_header(file: &mut File, offset: u64) -> Result<usize, StorageError> {
    let mut header = [0u8; PAGE_HEADER_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    read_full(file, &mut header)?;
    let used = i32::from_be_bytes(header);
    if used < 0 || used as usize > PAGE_SIZE {
        return Err(StorageError::Decode(format!(
            "page used counter {} out of range",
            used
        )));
    }
    Ok(used as usize)
}

/// Fill `buf` from the file's current position, leaving any region past
/// EOF zeroed.
fn read_full(file: &mut File, buf: &mut [u8]) -> Result<(), StorageError> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = file.read(&mut buf[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(())
}

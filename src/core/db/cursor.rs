/// Row Cursor Module
///
/// Wraps a forward-only native reader. Rows are produced lazily, one native
/// row per produced `Row`, and the reader is closed exactly once: when the
/// rows run out, when the consumer stops iterating, when a read fails, or
/// when the cursor is dropped.

use super::codec::TextCodec;
use super::value::{marshal, Row};
use crate::core::{raise_error, ErrorStage, Result};
use crate::native::NativeReader;
use once_cell::unsync::OnceCell;
use std::iter::FusedIterator;
use tracing::debug;

pub struct RowCursor<'r> {
    reader: &'r mut dyn NativeReader,
    codec: TextCodec,
    columns: OnceCell<Vec<String>>,
    closed: bool,
    rows_read: usize,
}

impl<'r> RowCursor<'r> {
    pub fn new(reader: &'r mut dyn NativeReader, codec: TextCodec) -> Self {
        RowCursor {
            reader,
            codec,
            columns: OnceCell::new(),
            closed: false,
            rows_read: 0,
        }
    }

    pub fn codec(&self) -> TextCodec {
        self.codec
    }

    /// Switches the codec used for column names and text values.
    pub fn set_codec(&mut self, codec: TextCodec) {
        if self.codec != codec {
            self.codec = codec;
            self.columns = OnceCell::new();
        }
    }

    /// Column names, decoded once on first access.
    ///
    /// Empty when the result has no columns at all.
    pub fn columns(&self) -> Result<&[String]> {
        self.columns
            .get_or_try_init(|| self.read_columns())
            .map(Vec::as_slice)
    }

    fn read_columns(&self) -> Result<Vec<String>> {
        (0..self.reader.field_count())
            .map(|index| {
                let name = self
                    .reader
                    .get_name(index)
                    .map_err(|e| raise_error(ErrorStage::Command, e))?;
                self.codec.decode(name)
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once the native reader is closed or exhausted.
    pub fn is_end_of_data(&self) -> bool {
        self.closed || self.reader.is_closed()
    }

    /// Number of rows produced so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Lazy, single-pass row sequence. Dropping it closes the cursor.
    pub fn rows(&mut self) -> Rows<'_, 'r> {
        Rows { cursor: self }
    }

    /// Drains the remaining rows into memory.
    pub fn materialize(&mut self) -> Result<Vec<Row>> {
        self.rows().collect()
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        if self.is_end_of_data() {
            return None;
        }
        match self.reader.read() {
            Ok(true) => {
                let row = self.current_row();
                match row {
                    Ok(_) => self.rows_read += 1,
                    Err(_) => self.close(),
                }
                Some(row)
            }
            Ok(false) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(raise_error(ErrorStage::Command, e)))
            }
        }
    }

    fn current_row(&self) -> Result<Row> {
        (0..self.reader.field_count())
            .map(|index| {
                let value = self
                    .reader
                    .get_value(index)
                    .map_err(|e| raise_error(ErrorStage::Command, e))?;
                marshal(value, self.codec)
            })
            .collect()
    }

    /// Closes the native reader. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader.close();
        debug!(rows = self.rows_read, "cursor closed");
    }
}

impl Drop for RowCursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator returned by [`RowCursor::rows`].
pub struct Rows<'c, 'r> {
    cursor: &'c mut RowCursor<'r>,
}

impl Iterator for Rows<'_, '_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_row()
    }
}

impl FusedIterator for Rows<'_, '_> {}

impl Drop for Rows<'_, '_> {
    fn drop(&mut self) {
        self.cursor.close();
    }
}

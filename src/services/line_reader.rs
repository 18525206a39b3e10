//! Lazy line iteration over a staged object, gunzipping when needed.

use async_compression::tokio::bufread::GzipDecoder;
use futures::{Stream, stream};
use regex::Regex;
use std::{io, path::Path, pin::Pin};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
};

/// Single-pass reader over the lines of a local file.
///
/// Yields each line without its trailing `\n` / `\r\n`. Invalid UTF-8 is
/// replaced rather than rejected; a corrupt gzip stream yields an `Err` and
/// the reader is finished after that.
pub struct LineReader {
    inner: Pin<Box<dyn AsyncBufRead + Send>>,
    buf: Vec<u8>,
    done: bool,
}

impl LineReader {
    /// Open `path`, decoding it as a single-member gzip stream when its
    /// file name matches `gzip_pattern`.
    pub async fn open(path: &Path, gzip_pattern: &Regex) -> io::Result<Self> {
        let file = File::open(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        let inner: Pin<Box<dyn AsyncBufRead + Send>> = if gzip_pattern.is_match(&name) {
            Box::pin(BufReader::new(GzipDecoder::new(BufReader::new(file))))
        } else {
            Box::pin(BufReader::new(file))
        };
        Ok(Self {
            inner,
            buf: Vec::new(),
            done: false,
        })
    }

    /// Pull the next line, or `None` at end of input.
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.inner.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    /// The remaining lines as a stream; dropping it stops reading.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<String>> + Send {
        stream::unfold(self, |mut reader| async move {
            let line = reader.next_line().await?;
            Some((line, reader))
        })
    }
}

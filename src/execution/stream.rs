//! Response body buffering.
//!
//! Bodies are copied into fixed-size blocks instead of one growing contiguous
//! buffer. The copy observes the call's cancellation token and a stall timer:
//! if no bytes arrive within the grace period the response is dropped, which
//! closes the underlying connection.

use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io::{BufRead, Read};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::defaults::execution::BUFFER_BLOCK_SIZE;

/// In-memory body made of bounded blocks.
#[derive(Debug, Clone)]
pub struct MultiBufferStream {
    blocks: Vec<Bytes>,
    tail: BytesMut,
    block_size: usize,
    len: usize,
}

impl Default for MultiBufferStream {
    fn default() -> Self {
        Self::with_block_size(BUFFER_BLOCK_SIZE)
    }
}

impl MultiBufferStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            blocks: Vec::new(),
            tail: BytesMut::with_capacity(block_size),
            block_size,
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut stream = Self::new();
        stream.write(data);
        stream
    }

    pub fn write(&mut self, mut data: &[u8]) {
        self.len += data.len();
        while !data.is_empty() {
            let room = self.block_size - self.tail.len();
            let take = room.min(data.len());
            self.tail.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.tail.len() == self.block_size {
                let full = std::mem::replace(&mut self.tail, BytesMut::with_capacity(self.block_size));
                self.blocks.push(full.freeze());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated blocks, including a partially filled tail.
    pub fn block_count(&self) -> usize {
        self.blocks.len() + usize::from(!self.tail.is_empty())
    }

    fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.blocks
            .iter()
            .map(|b| b.as_ref())
            .chain(std::iter::once(self.tail.as_ref()))
            .filter(|s| !s.is_empty())
    }

    /// Sequential reader over the blocks.
    pub fn reader(&self) -> MultiBufferReader<'_> {
        MultiBufferReader {
            segments: self.segments().collect(),
            index: 0,
            offset: 0,
        }
    }

    /// Contiguous copy of the body.
    pub fn to_bytes(&self) -> Bytes {
        if self.blocks.len() == 1 && self.tail.is_empty() {
            return self.blocks[0].clone();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out.freeze()
    }

    /// Body as UTF-8 text; invalid sequences are replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }
}

/// `Read`/`BufRead` view over a [`MultiBufferStream`].
pub struct MultiBufferReader<'a> {
    segments: Vec<&'a [u8]>,
    index: usize,
    offset: usize,
}

impl Read for MultiBufferReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for MultiBufferReader<'_> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        while let Some(segment) = self.segments.get(self.index) {
            if self.offset < segment.len() {
                return Ok(&segment[self.offset..]);
            }
            self.index += 1;
            self.offset = 0;
        }
        Ok(&[])
    }

    fn consume(&mut self, amt: usize) {
        self.offset += amt;
    }
}

/// Why a guarded copy or post-processing step did not complete.
#[derive(Debug)]
pub enum CopyInterrupt {
    Cancelled,
    /// No progress within the stall grace period.
    Stalled,
    Transport(reqwest::Error),
}

/// Cancellation and stall settings shared by body copy and post-processing.
#[derive(Debug, Clone)]
pub struct CopyGuard {
    pub cancel: CancellationToken,
    pub stall_grace: Duration,
}

impl CopyGuard {
    pub fn new(cancel: CancellationToken, stall_grace: Duration) -> Self {
        Self {
            cancel,
            stall_grace,
        }
    }

    /// Run `fut` unless the token fires or it stalls past the grace period.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CopyInterrupt>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CopyInterrupt::Cancelled),
            res = tokio::time::timeout(self.stall_grace, fut) => res.map_err(|_| CopyInterrupt::Stalled),
        }
    }
}

/// Drain `response` into `sink`, chunk by chunk.
///
/// Each chunk must arrive within the stall grace period; the response is
/// dropped on any interruption so the connection is not left half-read.
pub async fn copy_response_body(
    mut response: reqwest::Response,
    sink: &mut MultiBufferStream,
    guard: &CopyGuard,
) -> Result<(), CopyInterrupt> {
    loop {
        match guard.run(response.chunk()).await? {
            Ok(Some(chunk)) => sink.write(&chunk),
            Ok(None) => return Ok(()),
            Err(e) => return Err(CopyInterrupt::Transport(e)),
        }
    }
}

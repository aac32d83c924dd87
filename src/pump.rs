//! Drains a per-entry byte source while maintaining a running CRC-32 and
//! byte count, with an optional part-size shaping contract.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;

use crate::crc::crc32;
use crate::entry::ByteSource;
use crate::error::ZipError;

/// Reshapes the pump's output chunking to align with caller-declared
/// boundaries, instead of re-emitting the source's natural chunk sizes.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartShaping {
    pub first_part_size: Option<u64>,
    pub last_part_size: Option<u64>,
}

/// Wraps a `ByteSource`, yielding reshaped chunks while tracking CRC and
/// total size. Once the source is exhausted, `crc()`/`bytes_drained()`
/// report the finalized values, and not before.
pub struct FileDataPump {
    source: ByteSource,
    shaping: PartShaping,
    buffer: BytesMut,
    crc_seed: u32,
    total: u64,
    source_done: bool,
    finished: bool,
}

impl FileDataPump {
    pub fn new(source: ByteSource, shaping: PartShaping) -> Self {
        FileDataPump {
            source,
            shaping,
            buffer: BytesMut::new(),
            crc_seed: 0,
            total: 0,
            source_done: false,
            finished: false,
        }
    }

    /// The running CRC-32 after all bytes observed so far.
    pub fn crc(&self) -> u32 {
        self.crc_seed
    }

    /// Total bytes observed so far.
    pub fn bytes_drained(&self) -> u64 {
        self.total
    }

    fn observe(&mut self, chunk: &[u8]) {
        self.crc_seed = crc32(chunk, self.crc_seed);
        self.total += chunk.len() as u64;
    }

    fn shaping_active(&self) -> bool {
        self.shaping.first_part_size.is_some()
    }

    fn validate_final_remainder(&self) -> Result<(), ZipError> {
        if let Some(last) = self.shaping.last_part_size {
            let remainder = self.buffer.len() as u64;
            if remainder != last {
                return Err(ZipError::MalformedInput("Invalid lastPartSize".into()));
            }
        }
        Ok(())
    }
}

impl Stream for FileDataPump {
    type Item = Result<Bytes, ZipError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        if !this.shaping_active() {
            if this.source_done {
                this.finished = true;
                return Poll::Ready(None);
            }
            return match Pin::new(&mut this.source).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.observe(&chunk);
                    Poll::Ready(Some(Ok(chunk)))
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    Poll::Ready(Some(Err(ZipError::SourceFailure(e))))
                }
                Poll::Ready(None) => {
                    this.source_done = true;
                    this.finished = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let first_part_size = this.shaping.first_part_size.unwrap() as usize;

        loop {
            if this.buffer.len() >= first_part_size {
                let chunk = this.buffer.split_to(first_part_size).freeze();
                this.observe(&chunk);
                return Poll::Ready(Some(Ok(chunk)));
            }

            if this.source_done {
                if let Err(e) = this.validate_final_remainder() {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                this.finished = true;
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let chunk = this.buffer.split_to(this.buffer.len()).freeze();
                this.observe(&chunk);
                return Poll::Ready(Some(Ok(chunk)));
            }

            match Pin::new(&mut this.source).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ZipError::SourceFailure(e))));
                }
                Poll::Ready(None) => {
                    this.source_done = true;
                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::StreamExt;

    fn source_of(chunks: Vec<&'static [u8]>) -> ByteSource {
        Box::pin(futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))))
    }

    #[tokio::test]
    async fn unshaped_pass_through_preserves_chunks_and_crc() {
        let mut pump = FileDataPump::new(source_of(vec![b"hello ", b"world!"]), PartShaping::default());
        let mut collected = Vec::new();
        while let Some(chunk) = pump.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world!");
        assert_eq!(pump.bytes_drained(), 12);
        assert_eq!(pump.crc(), crc32(b"hello world!", 0));
    }

    #[tokio::test]
    async fn first_part_size_regroups_into_fixed_chunks() {
        let shaping = PartShaping { first_part_size: Some(4), last_part_size: None };
        let mut pump = FileDataPump::new(source_of(vec![b"ab", b"cdefg", b"hi"]), shaping);
        let mut chunks = Vec::new();
        while let Some(chunk) = pump.next().await {
            chunks.push(chunk.unwrap().to_vec());
        }
        assert_eq!(chunks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"i".to_vec()]);
        assert_eq!(pump.bytes_drained(), 9);
    }

    #[tokio::test]
    async fn last_part_size_matching_remainder_succeeds() {
        let shaping = PartShaping { first_part_size: Some(4), last_part_size: Some(1) };
        let mut pump = FileDataPump::new(source_of(vec![b"abcdefghi"]), shaping);
        let mut ok = true;
        while let Some(chunk) = pump.next().await {
            if chunk.is_err() {
                ok = false;
            }
        }
        assert!(ok);
    }

    #[tokio::test]
    async fn last_part_size_mismatch_fails_with_malformed_input() {
        let shaping = PartShaping { first_part_size: Some(4), last_part_size: Some(2) };
        let mut pump = FileDataPump::new(source_of(vec![b"abcdefghi"]), shaping);
        let mut last_err = None;
        while let Some(chunk) = pump.next().await {
            if let Err(e) = chunk {
                last_err = Some(e);
            }
        }
        assert!(matches!(last_err, Some(ZipError::MalformedInput(_))));
    }
}

//! Source over any async byte reader (pipes, sockets, incoming voice)

use super::source::{cancellable, AudioSource, Lifecycle, SourceState};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

pub struct StreamSource<R> {
    reader: Option<R>,
    lifecycle: Lifecycle,
}

impl<R: AsyncRead + Unpin + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            lifecycle: Lifecycle::new(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AudioSource for StreamSource<R> {
    fn state(&self) -> SourceState {
        self.lifecycle.state()
    }

    async fn prepare(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.lifecycle.begin_prepare("StreamSource")? {
            self.lifecycle.finish_prepare(&Ok(()));
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        self.lifecycle.ensure_readable("StreamSource")?;
        match self.reader.as_mut() {
            Some(reader) => Ok(cancellable(cancel, reader.read(buf)).await??),
            None => Ok(0),
        }
    }

    async fn dispose(&mut self) {
        if self.lifecycle.begin_dispose() {
            self.reader = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reads_from_pipe() {
        let cancel = CancellationToken::new();
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut source = StreamSource::new(rx);
        source.prepare(&cancel).await.unwrap();

        tx.write_all(&[1, 2, 3]).await.unwrap();
        drop(tx);

        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 3);
        assert_eq!(source.read(&mut buf, &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_read_is_cancellable() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = tokio::io::duplex(64);
        let mut source = StreamSource::new(rx);
        source.prepare(&cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut buf = [0u8; 8];
        let result = source.read(&mut buf, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}

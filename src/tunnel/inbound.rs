//! Inbound response body being drained by `read`

use crate::transport::BodyStream;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use std::fmt;
use std::io;

/// The response body of the most recent exchange that carried data
pub struct InboundBody {
    stream: BodyStream,
    pending: Bytes,
}

impl InboundBody {
    pub fn new(stream: BodyStream) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
        }
    }

    /// Copy the next bytes into `buf`; `Ok(0)` means the body has ended
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.stream.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl fmt::Debug for InboundBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundBody")
            .field("pending", &self.pending.len())
            .finish()
    }
}

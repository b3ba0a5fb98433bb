//! Client library for the store service RPC protocol
//!
//! One `Client` owns one connection and runs one call at a time.

use crate::error::{KvError, Result};
use crate::protocol::{
    read_reply, validate_key, DeleteRequest, DeleteResponse, Reply, Request, RetrieveRequest,
    RetrieveResponse, StoreRequest, StoreResponse, DEFAULT_MAX_VALUE_LEN,
};
use std::io;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    max_value_len: usize,
}

impl Client {
    /// Connect to a store service
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        })
    }

    /// Send one request and wait for its reply
    ///
    /// Fails with [`KvError::ConnectionClosed`] when the server had already
    /// closed the connection before it could see the request.
    pub async fn call(&mut self, request: &Request) -> Result<Reply> {
        validate_key(request.key())?;

        self.send(&request.to_bytes()).await?;
        read_reply(&mut self.reader, self.max_value_len).await
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let written = match self.writer.write_all(frame).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected => KvError::ConnectionClosed,
            _ => KvError::Io(e),
        })
    }

    /// Whether an idle connection can carry another call
    ///
    /// Never blocks. A connection is unusable once the server closed it or if
    /// it holds bytes nobody asked for.
    pub fn is_reusable(&self) -> bool {
        if !self.reader.buffer().is_empty() {
            return false;
        }
        let mut scratch = [0u8; 1];
        match self.reader.get_ref().try_read(&mut scratch) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }

    pub async fn store(&mut self, key: &str, value: &str) -> Result<StoreResponse> {
        let request = Request::Store(StoreRequest {
            key: key.to_string(),
            value: value.to_string(),
        });
        match self.call(&request).await? {
            Reply::Success(success) => Ok(StoreResponse { success }),
            other => Err(unexpected("STORE", other)),
        }
    }

    pub async fn retrieve(&mut self, key: &str) -> Result<RetrieveResponse> {
        let request = Request::Retrieve(RetrieveRequest {
            key: key.to_string(),
        });
        match self.call(&request).await? {
            Reply::Retrieved(response) => Ok(response),
            other => Err(unexpected("RETRIEVE", other)),
        }
    }

    pub async fn delete(&mut self, key: &str) -> Result<DeleteResponse> {
        let request = Request::Delete(DeleteRequest {
            key: key.to_string(),
        });
        match self.call(&request).await? {
            Reply::Success(success) => Ok(DeleteResponse { success }),
            other => Err(unexpected("DELETE", other)),
        }
    }

    /// Delete that fails with [`KvError::NotFound`] when the key is absent
    pub async fn delete_strict(&mut self, key: &str) -> Result<DeleteResponse> {
        let request = Request::DeleteStrict(DeleteRequest {
            key: key.to_string(),
        });
        match self.call(&request).await? {
            Reply::Success(success) => Ok(DeleteResponse { success }),
            other => Err(unexpected("DELETE_STRICT", other)),
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Error replies carry their own status; anything else is a protocol violation
fn unexpected(op: &str, reply: Reply) -> KvError {
    match reply {
        Reply::Error(status) => status.into(),
        other => KvError::Protocol(format!("Unexpected response for {}: {:?}", op, other)),
    }
}

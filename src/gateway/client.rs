use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, ProtocolError, Result};
use crate::locality::BlockBitmap;
use crate::protocol::codec::{self, ResponseHeader, RESPONSE_HEADER_SIZE};
use crate::protocol::{Opcode, Response, Stat};

/// Extended attribute under which a gateway publishes its cached-block bitmap.
pub const CACHED_BLOCKS_XATTR: &str = "user.gateway.cached_blocks";

/// Open file on a gateway, issued by `get_file_handle` or `create_new_file`.
///
/// Retired by [`GatewayClient::close_file_handle`], which takes it by value.
#[derive(Debug, PartialEq, Eq)]
pub struct FileHandle {
    path: String,
    id: u64,
}

impl FileHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Client for one gateway host, owning a single connection.
///
/// Requests are strictly serialized: the connection lock is held for the
/// whole round trip and responses are matched to requests by order alone.
/// Once a transport or framing error occurs, or a call is cancelled
/// halfway through, the client is marked closed and every later call
/// fails; callers drop it and connect again.
pub struct GatewayClient {
    addr: String,
    conn: Mutex<Connection>,
    closed: AtomicBool,
}

impl GatewayClient {
    /// Connects to `addr` (`host:port`). Fails right away if the host is unreachable.
    pub async fn connect(addr: &str, config: &GatewayConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| GatewayError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| GatewayError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        info!(addr, "connected to gateway");

        let (read_half, write_half) = stream.into_split();
        Ok(GatewayClient {
            addr: addr.to_string(),
            conn: Mutex::new(Connection {
                reader: BufReader::with_capacity(config.input_buffer_size.max(1), read_half),
                writer: BufWriter::with_capacity(config.output_buffer_size.max(1), write_half),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts the connection down. Waits for any in-flight request to finish.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = conn.writer.shutdown().await {
            debug!(addr = %self.addr, "error shutting down connection: {}", err);
        }
    }

    pub async fn get_stat(&self, path: &str) -> Result<Stat> {
        let response = self
            .call(Opcode::GetStat, path, &[codec::string_field(path)])
            .await?;
        let field = self.check(path, response.into_single_field())?;
        self.check(path, Stat::decode(&field))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.call(Opcode::Delete, path, &[codec::string_field(path)])
            .await?;
        Ok(())
    }

    pub async fn remove_directory(&self, path: &str) -> Result<()> {
        self.call(Opcode::RemoveDirectory, path, &[codec::string_field(path)])
            .await?;
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.call(
            Opcode::Rename,
            from,
            &[codec::string_field(from), codec::string_field(to)],
        )
        .await?;
        Ok(())
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.call(
            Opcode::Mkdir,
            path,
            &[codec::string_field(path), codec::length_field(mode).to_vec()],
        )
        .await?;
        Ok(())
    }

    /// Lists a directory, leaving out `.` and `..`.
    pub async fn read_directory_entries(&self, path: &str) -> Result<Vec<String>> {
        let response = self
            .call(
                Opcode::ReadDirectoryEntries,
                path,
                &[codec::string_field(path)],
            )
            .await?;
        let names = self.check(path, response.into_strings())?;
        Ok(names
            .into_iter()
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    /// Opens an existing file.
    pub async fn get_file_handle(&self, path: &str, flags: u32) -> Result<FileHandle> {
        let response = self
            .call(
                Opcode::GetFileHandle,
                path,
                &[codec::string_field(path), codec::length_field(flags).to_vec()],
            )
            .await?;
        self.handle_from(path, response)
    }

    pub async fn create_new_file(&self, path: &str, mode: u32) -> Result<FileHandle> {
        let response = self
            .call(
                Opcode::CreateNewFile,
                path,
                &[codec::string_field(path), codec::length_field(mode).to_vec()],
            )
            .await?;
        self.handle_from(path, response)
    }

    /// Reads up to `length` bytes at `offset`. A short result means end of file.
    pub async fn read_file_data(
        &self,
        handle: &FileHandle,
        offset: u64,
        length: u32,
    ) -> Result<Vec<u8>> {
        if length as usize > codec::MAX_FIELD_SIZE {
            return Err(GatewayError::InvalidArgument(format!(
                "read of {} bytes exceeds limit of {}",
                length,
                codec::MAX_FIELD_SIZE
            )));
        }
        let fields = [
            codec::string_field(&handle.path),
            codec::handle_field(handle.id).to_vec(),
            codec::offset_field(to_offset(offset)?).to_vec(),
            codec::length_field(length).to_vec(),
        ];
        let response = self
            .call(Opcode::ReadFileData, &handle.path, &fields)
            .await?;
        let data = self.check(&handle.path, response.into_single_field())?;
        if data.len() > length as usize {
            return Err(self.protocol_error(
                &handle.path,
                ProtocolError::InvalidField(format!(
                    "asked for {} bytes, gateway sent {}",
                    length,
                    data.len()
                )),
            ));
        }
        Ok(data)
    }

    /// Writes `data` at `offset`, returning the number of bytes the gateway accepted.
    pub async fn write_file_data(
        &self,
        handle: &FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        let fields = [
            codec::string_field(&handle.path),
            codec::handle_field(handle.id).to_vec(),
            codec::offset_field(to_offset(offset)?).to_vec(),
            data.to_vec(),
        ];
        let response = self
            .call(Opcode::WriteFileData, &handle.path, &fields)
            .await?;
        // the return code is non-negative here
        Ok(response.return_code as usize)
    }

    pub async fn flush(&self, handle: &FileHandle) -> Result<()> {
        self.call(
            Opcode::Flush,
            &handle.path,
            &[
                codec::string_field(&handle.path),
                codec::handle_field(handle.id).to_vec(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn close_file_handle(&self, handle: FileHandle) -> Result<()> {
        self.call(
            Opcode::CloseFileHandle,
            &handle.path,
            &[
                codec::string_field(&handle.path),
                codec::handle_field(handle.id).to_vec(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn truncate_file(&self, path: &str, length: u64) -> Result<()> {
        self.call(
            Opcode::TruncateFile,
            path,
            &[
                codec::string_field(path),
                codec::offset_field(to_offset(length)?).to_vec(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn list_extended_attr(&self, path: &str) -> Result<Vec<String>> {
        let response = self
            .call(Opcode::ListExtendedAttr, path, &[codec::string_field(path)])
            .await?;
        self.check(path, response.into_strings())
    }

    /// Fetches one extended attribute; `None` if the gateway reports it missing.
    pub async fn get_extended_attr(&self, path: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .call(
                Opcode::GetExtendedAttr,
                path,
                &[codec::string_field(path), codec::string_field(name)],
            )
            .await?;
        if response.fields.is_empty() {
            return Ok(None);
        }
        self.check(path, response.into_single_field()).map(Some)
    }

    /// Bitmap of the file's blocks held in this gateway's local cache.
    pub async fn get_cached_block_bitmap(&self, path: &str) -> Result<Option<BlockBitmap>> {
        let value = self.get_extended_attr(path, CACHED_BLOCKS_XATTR).await?;
        Ok(value.map(BlockBitmap::new))
    }

    /// Sends one request and reads its response while holding the connection lock.
    ///
    /// If the returned future is dropped mid-exchange the client is marked
    /// closed, since the stream may still hold that request's response.
    async fn call<F: AsRef<[u8]>>(&self, op: Opcode, path: &str, fields: &[F]) -> Result<Response> {
        let mut conn = self.conn.lock().await;
        if self.is_closed() {
            return Err(GatewayError::Closed {
                addr: self.addr.clone(),
            });
        }

        let request = self.check(path, codec::encode(op, fields))?;
        debug!(addr = %self.addr, %op, path, bytes = request.len(), "sending request");

        let mut in_flight = InFlight {
            client: self,
            op,
            done: false,
        };
        let result = self.round_trip(&mut conn, op, path, &request).await;
        in_flight.done = true;

        if let Err(err) = &result {
            if err.is_connection_fatal() {
                warn!(addr = %self.addr, %op, path, "dropping gateway connection: {}", err);
                self.closed.store(true, Ordering::Release);
            } else {
                debug!(addr = %self.addr, %op, path, "request failed: {}", err);
            }
        }
        result
    }

    async fn round_trip(
        &self,
        conn: &mut Connection,
        op: Opcode,
        path: &str,
        request: &[u8],
    ) -> Result<Response> {
        conn.writer
            .write_all(request)
            .await
            .map_err(|source| self.io_error(source))?;
        conn.writer
            .flush()
            .await
            .map_err(|source| self.io_error(source))?;

        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        conn.reader
            .read_exact(&mut header)
            .await
            .map_err(|source| self.io_error(source))?;
        let header = self.check(path, ResponseHeader::parse(&header, op))?;

        let mut payload = vec![0u8; header.payload_size];
        conn.reader
            .read_exact(&mut payload)
            .await
            .map_err(|source| self.io_error(source))?;

        let response = self.check(path, codec::decode_payload(&header, &payload))?;
        debug!(
            addr = %self.addr,
            %op,
            code = response.return_code,
            fields = response.fields.len(),
            "received response"
        );
        Ok(response)
    }

    fn handle_from(&self, path: &str, response: Response) -> Result<FileHandle> {
        let field = self.check(path, response.into_single_field())?;
        let id = self.check(path, codec::handle_from_field(&field))?;
        Ok(FileHandle {
            path: path.to_string(),
            id,
        })
    }

    fn check<T>(&self, path: &str, result: std::result::Result<T, ProtocolError>) -> Result<T> {
        result.map_err(|source| self.protocol_error(path, source))
    }

    fn protocol_error(&self, path: &str, source: ProtocolError) -> GatewayError {
        GatewayError::Protocol {
            addr: self.addr.clone(),
            path: Some(path.to_string()),
            source,
        }
    }

    fn io_error(&self, source: std::io::Error) -> GatewayError {
        GatewayError::Io {
            addr: self.addr.clone(),
            source,
        }
    }
}

// Declared after the connection guard in `call`, so it runs before the lock is released.
struct InFlight<'a> {
    client: &'a GatewayClient,
    op: Opcode,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(addr = %self.client.addr, op = %self.op, "request abandoned, dropping gateway connection");
            self.client.closed.store(true, Ordering::Release);
        }
    }
}

fn to_offset(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| GatewayError::InvalidArgument(format!("offset {} out of range", value)))
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// stepflow/src/cluster/socket.rs

//! The socket writer and reader steps the cluster splitter inserts at every
//! node boundary.
//!
//! The writer listens on its port and accepts exactly one reader; the reader
//! connects to the writer's host, retrying until the socket timeout. Both
//! sides treat any transport failure as fatal for their own pipeline only.

use super::schema::DEFAULT_SOCKET_BUFFER_SIZE;
use super::wire::{read_frame, write_frame, WireMessage};
use crate::core::context::StepContext;
use crate::core::control::{StepControl, StopHandle};
use crate::core::step::{InputRow, RowEmitter, StepLogic};
use crate::error::{StepflowError, StepflowResult};
use crate::registry::StepRegistry;
use crate::row::{RowShape, ShapeSnapshot};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{event, Level};

pub const SOCKET_WRITER: &str = "socket_writer";
pub const SOCKET_READER: &str = "socket_reader";

pub const SETTING_PORT: &str = "port";
/// Writer: advertised host. Reader: host of the writer to connect to.
pub const SETTING_HOSTNAME: &str = "hostname";
pub const SETTING_BIND_ADDRESS: &str = "bind_address";
pub const SETTING_BUFFER_SIZE: &str = "buffer_size";

const ACCEPT_POLL: Duration = Duration::from_millis(10);

pub(crate) fn register_socket_steps(registry: &StepRegistry) {
  registry.register(SOCKET_WRITER, |ctx| {
    Ok(Box::new(SocketWriterStep::from_context(ctx)?) as Box<dyn StepLogic>)
  });
  registry.register(SOCKET_READER, |ctx| {
    Ok(Box::new(SocketReaderStep::from_context(ctx)?) as Box<dyn StepLogic>)
  });
}

fn socket_error(endpoint: &str, message: impl Into<String>) -> StepflowError {
  StepflowError::Socket {
    endpoint: endpoint.to_string(),
    message: message.into(),
  }
}

/// Master or slave side sending rows to another node.
pub struct SocketWriterStep {
  endpoint: String,
  bind_address: String,
  port: u16,
  buffer_size: usize,
  timeout: Duration,
  flush_rows: usize,
  stop: StopHandle,
  listener: Option<TcpListener>,
  stream: Option<BufWriter<TcpStream>>,
  sent_shape: Option<Arc<ShapeSnapshot>>,
  unflushed: usize,
  rows_sent: u64,
}

impl SocketWriterStep {
  pub fn from_context(ctx: &StepContext) -> StepflowResult<Self> {
    let port: u16 = ctx.required_setting(SETTING_PORT)?;
    let bind_address = ctx.setting(SETTING_BIND_ADDRESS).unwrap_or("0.0.0.0").to_string();
    Ok(Self {
      endpoint: format!("{bind_address}:{port}"),
      bind_address,
      port,
      buffer_size: ctx.parsed_setting(SETTING_BUFFER_SIZE)?.unwrap_or(DEFAULT_SOCKET_BUFFER_SIZE),
      timeout: ctx.config.socket_timeout(),
      flush_rows: ctx.config.socket_flush_rows.max(1),
      stop: ctx.stop.clone(),
      listener: None,
      stream: None,
      sent_shape: None,
      unflushed: 0,
      rows_sent: 0,
    })
  }

  pub fn rows_sent(&self) -> u64 {
    self.rows_sent
  }

  /// Waits for the reader. `Ok(false)` when the pipeline stopped meanwhile.
  fn ensure_connected(&mut self) -> StepflowResult<bool> {
    if self.stream.is_some() {
      return Ok(true);
    }
    let listener = self
      .listener
      .as_ref()
      .ok_or_else(|| socket_error(&self.endpoint, "writer is not listening"))?;
    let deadline = Instant::now() + self.timeout;
    let stream = loop {
      match listener.accept() {
        Ok((stream, peer)) => {
          event!(Level::DEBUG, endpoint = %self.endpoint, peer = %peer, "Socket reader connected.");
          break stream;
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
          if self.stop.is_stopped() {
            return Ok(false);
          }
          if Instant::now() >= deadline {
            return Err(socket_error(
              &self.endpoint,
              format!("no reader connected within {} ms", self.timeout.as_millis()),
            ));
          }
          thread::sleep(ACCEPT_POLL);
        }
        Err(e) => return Err(socket_error(&self.endpoint, format!("accept failed: {e}"))),
      }
    };
    let configure = |s: &TcpStream| -> std::io::Result<()> {
      s.set_nonblocking(false)?;
      s.set_write_timeout(Some(self.timeout))?;
      s.set_nodelay(true)
    };
    configure(&stream).map_err(|e| socket_error(&self.endpoint, e.to_string()))?;
    self.stream = Some(BufWriter::with_capacity(self.buffer_size, stream));
    // Exactly one reader per writer.
    self.listener = None;
    Ok(true)
  }

  fn send(&mut self, message: &WireMessage) -> StepflowResult<()> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| socket_error(&self.endpoint, "no reader connected"))?;
    write_frame(stream, message).map_err(|e| socket_error(&self.endpoint, format!("write failed: {e}")))
  }

  fn flush(&mut self) -> StepflowResult<()> {
    if let Some(stream) = self.stream.as_mut() {
      stream
        .flush()
        .map_err(|e| socket_error(&self.endpoint, format!("flush failed: {e}")))?;
    }
    self.unflushed = 0;
    Ok(())
  }
}

impl StepLogic for SocketWriterStep {
  fn init(&mut self, _ctx: &StepContext) -> anyhow::Result<()> {
    let listener = TcpListener::bind((self.bind_address.as_str(), self.port))
      .map_err(|e| socket_error(&self.endpoint, format!("cannot listen: {e}")))?;
    listener
      .set_nonblocking(true)
      .map_err(|e| socket_error(&self.endpoint, e.to_string()))?;
    event!(Level::DEBUG, endpoint = %self.endpoint, "Socket writer listening.");
    self.listener = Some(listener);
    Ok(())
  }

  fn process(&mut self, input: Option<&InputRow>, _out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    if !self.ensure_connected()? {
      return Ok(StepControl::Continue);
    }

    let snapshot = input.shape.snapshot();
    let shape_changed = match &self.sent_shape {
      Some(sent) => !Arc::ptr_eq(sent, &snapshot) && sent.descriptors() != snapshot.descriptors(),
      None => true,
    };
    if shape_changed {
      self.send(&WireMessage::Shape(input.shape.clone()))?;
    }
    self.sent_shape = Some(snapshot);

    self.send(&WireMessage::Row(input.row.clone()))?;
    self.rows_sent += 1;
    self.unflushed += 1;
    if self.unflushed >= self.flush_rows {
      self.flush()?;
    }
    Ok(StepControl::Continue)
  }

  fn finish(&mut self, _out: &mut RowEmitter) -> anyhow::Result<()> {
    if !self.ensure_connected()? {
      return Ok(());
    }
    self.send(&WireMessage::End)?;
    self.flush()?;
    event!(Level::DEBUG, endpoint = %self.endpoint, rows = self.rows_sent, "Socket writer sent end of stream.");
    Ok(())
  }

  fn dispose(&mut self) {
    if let Some(stream) = self.stream.take() {
      // Unflushed data is only left behind on failure, where it no longer matters.
      if let Ok(stream) = stream.into_inner() {
        let _ = stream.shutdown(std::net::Shutdown::Both);
      }
    }
    self.listener = None;
  }
}

/// Side receiving rows from another node; a source step in its graph.
pub struct SocketReaderStep {
  endpoint: String,
  hostname: String,
  port: u16,
  buffer_size: usize,
  timeout: Duration,
  retry: Duration,
  poll: Duration,
  stop: StopHandle,
  stream: Option<BufReader<TcpStream>>,
  shape: Option<RowShape>,
  rows_received: u64,
}

impl SocketReaderStep {
  pub fn from_context(ctx: &StepContext) -> StepflowResult<Self> {
    let port: u16 = ctx.required_setting(SETTING_PORT)?;
    let hostname = ctx.setting(SETTING_HOSTNAME).unwrap_or("localhost").to_string();
    Ok(Self {
      endpoint: format!("{hostname}:{port}"),
      hostname,
      port,
      buffer_size: ctx.parsed_setting(SETTING_BUFFER_SIZE)?.unwrap_or(DEFAULT_SOCKET_BUFFER_SIZE),
      timeout: ctx.config.socket_timeout(),
      retry: ctx.config.socket_connect_retry().max(Duration::from_millis(1)),
      poll: ctx.config.queue_timeout(),
      stop: ctx.stop.clone(),
      stream: None,
      shape: None,
      rows_received: 0,
    })
  }

  pub fn rows_received(&self) -> u64 {
    self.rows_received
  }

  fn resolve(&self) -> std::io::Result<SocketAddr> {
    (self.hostname.as_str(), self.port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "host resolved to no address"))
  }

  /// Connects to the writer, retrying until the socket timeout.
  /// `Ok(false)` when the pipeline stopped meanwhile.
  fn ensure_connected(&mut self) -> StepflowResult<bool> {
    if self.stream.is_some() {
      return Ok(true);
    }
    let deadline = Instant::now() + self.timeout;
    loop {
      if self.stop.is_stopped() {
        return Ok(false);
      }
      let attempt = self.resolve().and_then(|addr| TcpStream::connect_timeout(&addr, self.retry));
      match attempt {
        Ok(stream) => {
          stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| socket_error(&self.endpoint, e.to_string()))?;
          event!(Level::DEBUG, endpoint = %self.endpoint, "Socket reader connected to writer.");
          self.stream = Some(BufReader::with_capacity(self.buffer_size, stream));
          return Ok(true);
        }
        Err(e) => {
          if Instant::now() >= deadline {
            return Err(socket_error(
              &self.endpoint,
              format!("could not connect within {} ms: {e}", self.timeout.as_millis()),
            ));
          }
          event!(Level::TRACE, endpoint = %self.endpoint, error = %e, "Writer not reachable yet, retrying.");
          thread::sleep(self.retry);
        }
      }
    }
  }

  /// Waits until the next frame can be read, polling so that a stop
  /// request is noticed. `Ok(false)` when the pipeline stopped meanwhile.
  fn wait_readable(&mut self) -> StepflowResult<bool> {
    let endpoint = &self.endpoint;
    let reader = self
      .stream
      .as_ref()
      .ok_or_else(|| socket_error(endpoint, "not connected"))?;
    if !reader.buffer().is_empty() {
      return Ok(true);
    }
    let stream = reader.get_ref();
    stream
      .set_read_timeout(Some(self.poll))
      .map_err(|e| socket_error(endpoint, e.to_string()))?;
    let deadline = Instant::now() + self.timeout;
    let mut probe = [0u8; 1];
    let outcome = loop {
      match stream.peek(&mut probe) {
        // Zero bytes is end of stream; the frame read reports it.
        Ok(_) => break Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
          if self.stop.is_stopped() {
            break Ok(false);
          }
          if Instant::now() >= deadline {
            break Err(socket_error(
              endpoint,
              format!("no data from writer within {} ms", self.timeout.as_millis()),
            ));
          }
        }
        Err(e) => break Err(socket_error(endpoint, format!("read failed: {e}"))),
      }
    };
    stream
      .set_read_timeout(Some(self.timeout))
      .map_err(|e| socket_error(endpoint, e.to_string()))?;
    outcome
  }
}

impl StepLogic for SocketReaderStep {
  fn process(&mut self, _input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    if !self.ensure_connected()? {
      return Ok(StepControl::Continue);
    }
    loop {
      if !self.wait_readable()? {
        return Ok(StepControl::Continue);
      }
      let endpoint = self.endpoint.clone();
      let reader = self
        .stream
        .as_mut()
        .ok_or_else(|| socket_error(&endpoint, "not connected"))?;
      let frame = read_frame(reader).map_err(|e| socket_error(&endpoint, format!("read failed: {e}")))?;
      match frame {
        Some(WireMessage::Shape(shape)) => {
          self.shape = Some(shape);
        }
        Some(WireMessage::Row(row)) => {
          let shape = self
            .shape
            .as_ref()
            .ok_or_else(|| StepflowError::Wire("row received before any shape".to_string()))?;
          row.check_against(shape)?;
          out.emit(row, shape);
          self.rows_received += 1;
          return Ok(StepControl::Continue);
        }
        Some(WireMessage::End) => {
          event!(Level::DEBUG, endpoint = %endpoint, rows = self.rows_received, "Socket reader reached end of stream.");
          return Ok(StepControl::Done);
        }
        None => {
          return Err(socket_error(&endpoint, "connection closed before the end of the stream").into());
        }
      }
    }
  }

  fn dispose(&mut self) {
    if let Some(reader) = self.stream.take() {
      let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
    }
  }
}

// stepflow/src/cluster/wire.rs

//! Frame codec of the row stream between a socket writer and its reader.
//!
//! A frame is a 4-byte big-endian payload length followed by the JSON
//! encoding of one [`WireMessage`]. A stream is `Shape`, then rows, with a
//! new `Shape` whenever the shape changes, terminated by `End`.

use crate::error::{StepflowError, StepflowResult};
use crate::row::{Row, RowShape};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Upper bound on a single frame, guarding against garbage length prefixes.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
  Shape(RowShape),
  Row(Row),
  End,
}

pub fn write_frame<W: Write>(writer: &mut W, message: &WireMessage) -> StepflowResult<()> {
  let payload = serde_json::to_vec(message)?;
  let len = u32::try_from(payload.len())
    .ok()
    .filter(|len| *len as usize <= MAX_FRAME_LEN)
    .ok_or_else(|| StepflowError::Wire(format!("frame of {} bytes exceeds the maximum", payload.len())))?;
  writer.write_all(&len.to_be_bytes())?;
  writer.write_all(&payload)?;
  Ok(())
}

/// Reads one frame. `Ok(None)` means the stream ended cleanly on a frame
/// boundary; a stream cut inside a frame is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> StepflowResult<Option<WireMessage>> {
  let mut len_bytes = [0u8; 4];
  let mut filled = 0;
  while filled < len_bytes.len() {
    match reader.read(&mut len_bytes[filled..]) {
      Ok(0) if filled == 0 => return Ok(None),
      Ok(0) => return Err(StepflowError::Wire("stream ended inside a frame header".to_string())),
      Ok(n) => filled += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => {}
      Err(e) => return Err(StepflowError::Io(e)),
    }
  }
  let len = u32::from_be_bytes(len_bytes) as usize;
  if len > MAX_FRAME_LEN {
    return Err(StepflowError::Wire(format!("frame length {len} exceeds the maximum")));
  }
  let mut payload = vec![0u8; len];
  reader.read_exact(&mut payload).map_err(|e| match e.kind() {
    ErrorKind::UnexpectedEof => StepflowError::Wire("stream ended inside a frame".to_string()),
    _ => StepflowError::Io(e),
  })?;
  Ok(Some(serde_json::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::row::{Value, ValueDescriptor};
  use std::io::Cursor;

  #[test]
  fn shape_row_end_stream() {
    let shape = RowShape::new();
    shape.add_value(ValueDescriptor::integer("id"));
    shape.add_value(ValueDescriptor::string("name"));

    let mut buf = Vec::new();
    write_frame(&mut buf, &WireMessage::Shape(shape.clone())).unwrap();
    write_frame(&mut buf, &WireMessage::Row(Row::from(vec![Value::Integer(7), Value::from("x")]))).unwrap();
    write_frame(&mut buf, &WireMessage::End).unwrap();

    let mut cursor = Cursor::new(buf);
    match read_frame(&mut cursor).unwrap() {
      Some(WireMessage::Shape(s)) => assert_eq!(s.names(), vec!["id".to_string(), "name".to_string()]),
      other => panic!("expected shape, got {other:?}"),
    }
    assert!(matches!(read_frame(&mut cursor).unwrap(), Some(WireMessage::Row(_))));
    assert_eq!(read_frame(&mut cursor).unwrap(), Some(WireMessage::End));
    assert_eq!(read_frame(&mut cursor).unwrap(), None);
  }

  #[test]
  fn truncated_frame_is_an_error() {
    let mut buf = Vec::new();
    write_frame(&mut buf, &WireMessage::End).unwrap();
    buf.truncate(buf.len() - 1);
    assert!(matches!(read_frame(&mut Cursor::new(buf)), Err(StepflowError::Wire(_))));
  }

  #[test]
  fn oversized_length_is_rejected() {
    let buf = u32::MAX.to_be_bytes().to_vec();
    assert!(matches!(read_frame(&mut Cursor::new(buf)), Err(StepflowError::Wire(_))));
  }
}

//! Versionless binary path codec.
//!
//! # Layout
//!
//! Commands are written back to back with no overall header:
//!
//! ```text
//! ┌──────────┬────────────┬──────────────────────────────┐
//! │ tag: i32 │ count: i32 │ count × (x: f32, y: f32)     │
//! └──────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! All fields are little-endian. `count` repeats the arity implied by the tag;
//! the decoder refuses a command whose count disagrees.
//!
//! | Command        | Tag | Points (in order)            | Bytes |
//! |----------------|-----|------------------------------|-------|
//! | `MoveTo`       | 0   | point                        | 16    |
//! | `LineTo`       | 1   | point                        | 16    |
//! | `QuadCurveTo`  | 2   | control, point               | 24    |
//! | `CubicCurveTo` | 3   | control1, control2, point    | 32    |
//! | `ClosePath`    | 4   | none                         | 8     |

use crate::{CommandKind, Path, PathCommand, Point};

const FIELD_LEN: usize = 4;
const POINT_LEN: usize = 2 * FIELD_LEN;

/// Errors produced while decoding path bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated path data at offset {offset}: need {needed} bytes, {remaining} remain")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("unknown path command tag {tag} at offset {offset}")]
    UnknownTag { offset: usize, tag: i32 },

    #[error("malformed {kind:?} command at offset {offset}: point count {found}, expected {expected}")]
    MalformedCommand {
        offset: usize,
        kind: CommandKind,
        expected: usize,
        found: i32,
    },
}

/// Size in bytes of one encoded command of the given kind.
pub const fn encoded_command_len(kind: CommandKind) -> usize {
    POINT_LEN * (kind.arity() + 1)
}

/// Size in bytes of the encoding of `path`.
pub fn encoded_len(path: &Path) -> usize {
    path.commands()
        .iter()
        .map(|c| encoded_command_len(c.kind()))
        .sum()
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a path. Infallible for every path value.
pub fn encode(path: &Path) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(path));
    for command in path {
        encode_command(command, &mut out);
    }
    out
}

/// Append the encoding of a single command to `out`.
pub fn encode_command(command: &PathCommand, out: &mut Vec<u8>) {
    let kind = command.kind();
    out.extend_from_slice(&kind.tag().to_le_bytes());
    out.extend_from_slice(&(kind.arity() as i32).to_le_bytes());
    match *command {
        PathCommand::MoveTo(point) | PathCommand::LineTo(point) => {
            write_point(out, point);
        }
        PathCommand::QuadCurveTo { point, control } => {
            write_point(out, control);
            write_point(out, point);
        }
        PathCommand::CubicCurveTo {
            point,
            control1,
            control2,
        } => {
            write_point(out, control1);
            write_point(out, control2);
            write_point(out, point);
        }
        PathCommand::ClosePath => {}
    }
}

fn write_point(out: &mut Vec<u8>, point: Point) {
    out.extend_from_slice(&point.x.to_le_bytes());
    out.extend_from_slice(&point.y.to_le_bytes());
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a complete path. Any error rejects the whole buffer.
pub fn decode(bytes: &[u8]) -> Result<Path, DecodeError> {
    commands(bytes).collect()
}

/// Iterate over the commands in `bytes`, stopping after the first error.
pub fn commands(bytes: &[u8]) -> Commands<'_> {
    Commands {
        reader: Reader { bytes, offset: 0 },
        failed: false,
    }
}

/// Streaming command decoder returned by [`commands`].
pub struct Commands<'a> {
    reader: Reader<'a>,
    failed: bool,
}

impl Iterator for Commands<'_> {
    type Item = Result<PathCommand, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_at_end() {
            return None;
        }
        let result = self.reader.read_command();
        self.failed = result.is_err();
        Some(result)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let remaining = self.bytes.len().saturating_sub(self.offset);
        if remaining < N {
            return Err(DecodeError::TruncatedInput {
                offset: self.offset,
                needed: N,
                remaining,
            });
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        Ok(buf)
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.take::<FIELD_LEN>().map(i32::from_le_bytes)
    }

    fn read_point(&mut self) -> Result<Point, DecodeError> {
        let x = f32::from_le_bytes(self.take::<FIELD_LEN>()?);
        let y = f32::from_le_bytes(self.take::<FIELD_LEN>()?);
        Ok(Point::new(x, y))
    }

    fn read_command(&mut self) -> Result<PathCommand, DecodeError> {
        let start = self.offset;
        let tag = self.read_i32()?;
        let kind =
            CommandKind::from_tag(tag).ok_or(DecodeError::UnknownTag { offset: start, tag })?;

        let count = self.read_i32()?;
        if usize::try_from(count).ok() != Some(kind.arity()) {
            return Err(DecodeError::MalformedCommand {
                offset: start,
                kind,
                expected: kind.arity(),
                found: count,
            });
        }

        // Check the whole point block up front so a short buffer reports the
        // command's full requirement rather than the first missing float.
        let needed = kind.arity() * POINT_LEN;
        let remaining = self.bytes.len() - self.offset;
        if remaining < needed {
            return Err(DecodeError::TruncatedInput {
                offset: self.offset,
                needed,
                remaining,
            });
        }

        Ok(match kind {
            CommandKind::MoveTo => PathCommand::MoveTo(self.read_point()?),
            CommandKind::LineTo => PathCommand::LineTo(self.read_point()?),
            CommandKind::QuadCurveTo => {
                let control = self.read_point()?;
                let point = self.read_point()?;
                PathCommand::QuadCurveTo { point, control }
            }
            CommandKind::CubicCurveTo => {
                let control1 = self.read_point()?;
                let control2 = self.read_point()?;
                let point = self.read_point()?;
                PathCommand::CubicCurveTo {
                    point,
                    control1,
                    control2,
                }
            }
            CommandKind::ClosePath => PathCommand::ClosePath,
        })
    }
}

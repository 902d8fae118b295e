//! Message envelope and payload codecs.
//!
//! A record carries a type tag, a status, the source-id string, and a
//! body whose shape depends on both. Points travel with their concrete
//! values (resolved through the search space); the engine's internal
//! index vectors never cross the channel.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use attune_core::{CoreError, Dimension, Point, Space, Value};

use crate::codec;
use crate::error::WireError;

/// Request/response type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Session = 1,
    Join = 2,
    GetCfg = 3,
    SetCfg = 4,
    Best = 5,
    Fetch = 6,
    Report = 7,
    Restart = 8,
}

impl MessageKind {
    fn from_u8(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            1 => Self::Session,
            2 => Self::Join,
            3 => Self::GetCfg,
            4 => Self::SetCfg,
            5 => Self::Best,
            6 => Self::Fetch,
            7 => Self::Report,
            8 => Self::Restart,
            other => return Err(WireError::malformed(format!("unknown message type {other}"))),
        })
    }
}

/// Record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Request = 1,
    Ok = 2,
    Fail = 3,
    Busy = 4,
}

impl Status {
    fn from_u8(raw: u8) -> Result<Self, WireError> {
        Ok(match raw {
            1 => Self::Request,
            2 => Self::Ok,
            3 => Self::Fail,
            4 => Self::Busy,
            other => return Err(WireError::malformed(format!("unknown status {other}"))),
        })
    }
}

/// A point as it appears on the channel: id, step, and concrete values.
#[derive(Debug, Clone, PartialEq)]
pub struct WirePoint {
    pub id: i32,
    pub step: i32,
    pub values: Vec<Value>,
}

impl WirePoint {
    /// The "no point" marker (id -1, no values).
    pub fn invalid() -> Self {
        Self {
            id: Point::NO_ID,
            step: 0,
            values: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id >= 0
    }

    /// Resolve an engine point's indices through the space. An invalid
    /// point resolves to the invalid marker.
    pub fn resolve(point: &Point, space: &Space) -> Result<Self, CoreError> {
        if !point.is_valid() {
            return Ok(Self::invalid());
        }
        let values = point
            .coords
            .iter()
            .enumerate()
            .map(|(i, &index)| space.value_at(i, index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: point.id,
            step: point.step,
            values,
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_i32(self.id);
        buf.put_i32(self.step);
        buf.put_i32(self.values.len() as i32);
        for value in &self.values {
            match value {
                Value::Int(v) => {
                    buf.put_u8(0);
                    buf.put_i64(*v);
                }
                Value::Real(v) => {
                    buf.put_u8(1);
                    codec::put_f64(buf, *v);
                }
                Value::Str(v) => {
                    buf.put_u8(2);
                    codec::put_str(buf, v)?;
                }
            }
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let id = codec::get_i32(buf)?;
        let step = codec::get_i32(buf)?;
        let count = codec::get_i32(buf)?;
        if count < 0 {
            return Err(WireError::malformed("negative point value count"));
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(match codec::get_u8(buf)? {
                0 => Value::Int(codec::get_i64(buf)?),
                1 => Value::Real(codec::get_f64(buf)?),
                2 => Value::Str(codec::get_str(buf)?),
                tag => return Err(WireError::malformed(format!("unknown value tag {tag}"))),
            });
        }
        Ok(Self { id, step, values })
    }
}

fn encode_space(space: &Space, buf: &mut BytesMut) -> Result<(), WireError> {
    codec::put_str(buf, space.name())?;
    buf.put_u16(space.len() as u16);
    for dim in space.dims() {
        match dim {
            Dimension::Int { name, min, max, step } => {
                buf.put_u8(0);
                codec::put_str(buf, name)?;
                buf.put_i64(*min);
                buf.put_i64(*max);
                buf.put_i64(*step);
            }
            Dimension::Real { name, min, max, step } => {
                buf.put_u8(1);
                codec::put_str(buf, name)?;
                codec::put_f64(buf, *min);
                codec::put_f64(buf, *max);
                codec::put_f64(buf, *step);
            }
            Dimension::Enum { name, values } => {
                buf.put_u8(2);
                codec::put_str(buf, name)?;
                buf.put_u16(values.len() as u16);
                for value in values {
                    codec::put_str(buf, value)?;
                }
            }
        }
    }
    Ok(())
}

fn decode_space(buf: &mut Bytes) -> Result<Space, WireError> {
    let name = codec::get_str(buf)?;
    let count = codec::get_u16(buf)?;
    let mut space = Space::new(name);
    for _ in 0..count {
        let tag = codec::get_u8(buf)?;
        let dim_name = codec::get_str(buf)?;
        let dim = match tag {
            0 => Dimension::Int {
                name: dim_name,
                min: codec::get_i64(buf)?,
                max: codec::get_i64(buf)?,
                step: codec::get_i64(buf)?,
            },
            1 => Dimension::Real {
                name: dim_name,
                min: codec::get_f64(buf)?,
                max: codec::get_f64(buf)?,
                step: codec::get_f64(buf)?,
            },
            2 => {
                let n = codec::get_u16(buf)?;
                let mut values = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    values.push(codec::get_str(buf)?);
                }
                Dimension::Enum {
                    name: dim_name,
                    values,
                }
            }
            other => {
                return Err(WireError::malformed(format!(
                    "unknown dimension tag {other}"
                )))
            }
        };
        space
            .add(dim)
            .map_err(|e| WireError::malformed(e.to_string()))?;
    }
    Ok(space)
}

/// Type-and-status-dependent message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    /// SESSION request: the search space plus the initial config map.
    Session {
        space: Space,
        config: Vec<(String, String)>,
    },
    /// JOIN request and its OK echo.
    Space(Space),
    /// GETCFG/SETCFG request and reply strings, and every FAIL message.
    Text(String),
    /// BEST reply and FETCH BUSY reply.
    Point(WirePoint),
    /// FETCH request: the client's last-known best point id.
    FetchReq { best_id: i32 },
    /// FETCH OK reply: a candidate plus a newer best, when one exists.
    FetchOk {
        cand: WirePoint,
        best: Option<WirePoint>,
    },
    /// REPORT request: candidate id plus the measured performance.
    Report { id: i32, perf: Vec<f64> },
}

/// One record on the session channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub status: Status,
    pub src_id: String,
    pub body: Body,
}

impl Message {
    pub fn request(kind: MessageKind, src_id: impl Into<String>, body: Body) -> Self {
        Self {
            kind,
            status: Status::Request,
            src_id: src_id.into(),
            body,
        }
    }

    /// Build the FAIL response for a request, carrying the error text.
    pub fn fail(kind: MessageKind, src_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: Status::Fail,
            src_id: src_id.into(),
            body: Body::Text(error.into()),
        }
    }

    /// Serialize the payload (everything after the frame header).
    pub fn encode(&self) -> Result<BytesMut, WireError> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.status as u8);
        codec::put_str(&mut buf, &self.src_id)?;
        match &self.body {
            Body::Empty => {}
            Body::Session { space, config } => {
                encode_space(space, &mut buf)?;
                buf.put_u16(config.len() as u16);
                for (key, value) in config {
                    codec::put_str(&mut buf, key)?;
                    codec::put_str(&mut buf, value)?;
                }
            }
            Body::Space(space) => encode_space(space, &mut buf)?,
            Body::Text(text) => codec::put_str(&mut buf, text)?,
            Body::Point(point) => point.encode(&mut buf)?,
            Body::FetchReq { best_id } => buf.put_i32(*best_id),
            Body::FetchOk { cand, best } => {
                cand.encode(&mut buf)?;
                match best {
                    Some(best) => {
                        buf.put_u8(1);
                        best.encode(&mut buf)?;
                    }
                    None => buf.put_u8(0),
                }
            }
            Body::Report { id, perf } => {
                buf.put_i32(*id);
                buf.put_u16(perf.len() as u16);
                for value in perf {
                    codec::put_f64(&mut buf, *value);
                }
            }
        }
        Ok(buf)
    }

    /// Parse a payload. The body shape is selected by the type/status
    /// pair; trailing bytes are a protocol error.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        let kind = MessageKind::from_u8(codec::get_u8(&mut buf)?)?;
        let status = Status::from_u8(codec::get_u8(&mut buf)?)?;
        let src_id = codec::get_str(&mut buf)?;

        use MessageKind as K;
        use Status as S;
        let body = match (kind, status) {
            (_, S::Fail) => Body::Text(codec::get_str(&mut buf)?),
            (K::Session, S::Request) => {
                let space = decode_space(&mut buf)?;
                let count = codec::get_u16(&mut buf)?;
                let mut config = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = codec::get_str(&mut buf)?;
                    let value = codec::get_str(&mut buf)?;
                    config.push((key, value));
                }
                Body::Session { space, config }
            }
            (K::Session, S::Ok) => Body::Empty,
            (K::Join, S::Request | S::Ok) => Body::Space(decode_space(&mut buf)?),
            (K::GetCfg, S::Request) | (K::SetCfg, S::Request) => {
                Body::Text(codec::get_str(&mut buf)?)
            }
            (K::GetCfg, S::Ok) | (K::SetCfg, S::Ok) => Body::Text(codec::get_str(&mut buf)?),
            (K::Best, S::Request) => Body::Empty,
            (K::Best, S::Ok) => Body::Point(WirePoint::decode(&mut buf)?),
            (K::Fetch, S::Request) => Body::FetchReq {
                best_id: codec::get_i32(&mut buf)?,
            },
            (K::Fetch, S::Ok) => {
                let cand = WirePoint::decode(&mut buf)?;
                let best = match codec::get_u8(&mut buf)? {
                    0 => None,
                    1 => Some(WirePoint::decode(&mut buf)?),
                    tag => {
                        return Err(WireError::malformed(format!(
                            "unknown best-point marker {tag}"
                        )))
                    }
                };
                Body::FetchOk { cand, best }
            }
            (K::Fetch, S::Busy) => Body::Point(WirePoint::decode(&mut buf)?),
            (K::Report, S::Request) => {
                let id = codec::get_i32(&mut buf)?;
                let count = codec::get_u16(&mut buf)?;
                let mut perf = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    perf.push(codec::get_f64(&mut buf)?);
                }
                Body::Report { id, perf }
            }
            (K::Report, S::Ok) | (K::Restart, S::Request | S::Ok) => Body::Empty,
            (kind, status) => {
                return Err(WireError::malformed(format!(
                    "invalid type/status combination {kind:?}/{status:?}"
                )))
            }
        };

        if buf.has_remaining() {
            return Err(WireError::malformed(format!(
                "{} trailing payload bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            kind,
            status,
            src_id,
            body,
        })
    }
}

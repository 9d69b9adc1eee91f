//! Motor-controller (VESC) UART protocol, short-frame subset.
//!
//! Frame: `[0x02] [len] [payload...] [crc16 hi] [crc16 lo] [0x03]`
//! Payload: `[command id] [data...]`, all integers big-endian.

use heapless::Vec;

pub const PACKET_START: u8 = 0x02;
pub const PACKET_END: u8 = 0x03;

pub const COMM_GET_VALUES: u8 = 4;
pub const COMM_SET_CURRENT: u8 = 6;

/// Largest payload accepted in a short frame
pub const MAX_PAYLOAD: usize = 128;
/// start + len + payload + crc(2) + end
pub const MAX_FRAME: usize = MAX_PAYLOAD + 5;

pub type Payload = Vec<u8, MAX_PAYLOAD>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// No complete reply inside the query window
    Timeout,
    /// UART reported an error
    Io,
    Crc,
    /// Missing start/end byte or bad length
    Framing,
    /// Reply shorter than its command requires
    Truncated,
    /// Valid frame, wrong command id
    UnexpectedReply,
}

/// Decoded `COMM_GET_VALUES` reply.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorValues {
    pub temp_mosfet_c: f32,
    pub temp_motor_c: f32,
    pub avg_motor_current_a: f32,
    pub avg_input_current_a: f32,
    pub avg_id_a: f32,
    pub avg_iq_a: f32,
    /// Fraction, -1.0..=1.0
    pub duty_cycle: f32,
    pub erpm: f32,
    pub input_voltage: f32,
    pub amp_hours: f32,
    pub amp_hours_charged: f32,
    pub watt_hours: f32,
    pub watt_hours_charged: f32,
    pub tachometer: i32,
    pub tachometer_abs: i32,
    pub fault_code: u8,
}

/// Request/response contract with the motor controller. Both calls may
/// block or fail; callers bound them with a timeout.
#[allow(async_fn_in_trait)]
pub trait MotorLink {
    async fn query_values(&mut self) -> Result<MotorValues, LinkError>;
    async fn send_current(&mut self, amps: f32) -> Result<(), LinkError>;
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// CRC-16/XMODEM (poly 0x1021, init 0).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Wrap `payload` into a frame. Returns the frame length, or 0 if `out`
/// is too small or the payload does not fit a short frame.
pub fn encode_packet(payload: &[u8], out: &mut [u8]) -> usize {
    let len = payload.len();
    if len == 0 || len > MAX_PAYLOAD || out.len() < len + 5 {
        return 0;
    }
    out[0] = PACKET_START;
    out[1] = len as u8;
    out[2..2 + len].copy_from_slice(payload);
    let crc = crc16(payload);
    out[2 + len] = (crc >> 8) as u8;
    out[3 + len] = (crc & 0xFF) as u8;
    out[4 + len] = PACKET_END;
    len + 5
}

pub fn get_values_request(out: &mut [u8]) -> usize {
    encode_packet(&[COMM_GET_VALUES], out)
}

/// Current command in amps, sent as milliamps.
pub fn set_current_request(amps: f32, out: &mut [u8]) -> usize {
    let ma = (amps * 1000.0) as i32;
    let mut payload = [0u8; 5];
    payload[0] = COMM_SET_CURRENT;
    payload[1..].copy_from_slice(&ma.to_be_bytes());
    encode_packet(&payload, out)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], LinkError> {
        let end = self.pos + N;
        let bytes = self.buf.get(self.pos..end).ok_or(LinkError::Truncated)?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, LinkError> {
        Ok(self.take::<1>()?[0])
    }

    fn i32(&mut self) -> Result<i32, LinkError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn f16(&mut self, scale: f32) -> Result<f32, LinkError> {
        Ok(i16::from_be_bytes(self.take()?) as f32 / scale)
    }

    fn f32(&mut self, scale: f32) -> Result<f32, LinkError> {
        Ok(self.i32()? as f32 / scale)
    }
}

/// Parse a `COMM_GET_VALUES` reply payload (command id included).
/// Trailing fields sent by newer controller firmware are ignored.
pub fn parse_values(payload: &[u8]) -> Result<MotorValues, LinkError> {
    let mut r = Reader::new(payload);
    if r.u8()? != COMM_GET_VALUES {
        return Err(LinkError::UnexpectedReply);
    }
    Ok(MotorValues {
        temp_mosfet_c: r.f16(10.0)?,
        temp_motor_c: r.f16(10.0)?,
        avg_motor_current_a: r.f32(100.0)?,
        avg_input_current_a: r.f32(100.0)?,
        avg_id_a: r.f32(100.0)?,
        avg_iq_a: r.f32(100.0)?,
        duty_cycle: r.f16(1000.0)?,
        erpm: r.i32()? as f32,
        input_voltage: r.f16(10.0)?,
        amp_hours: r.f32(10_000.0)?,
        amp_hours_charged: r.f32(10_000.0)?,
        watt_hours: r.f32(10_000.0)?,
        watt_hours_charged: r.f32(10_000.0)?,
        tachometer: r.i32()?,
        tachometer_abs: r.i32()?,
        fault_code: r.u8()?,
    })
}

/// Byte-wise frame assembler for the receive side.
pub struct PacketParser {
    buffer: Vec<u8, MAX_FRAME>,
}

impl PacketParser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// `Ok(Some(payload))` once a frame completes with a valid CRC.
    pub fn push_byte(&mut self, b: u8) -> Result<Option<Payload>, LinkError> {
        if self.buffer.is_empty() {
            if b == PACKET_START {
                let _ = self.buffer.push(b);
            }
            return Ok(None);
        }

        if self.buffer.len() == 1 {
            if b == 0 || b as usize > MAX_PAYLOAD {
                self.buffer.clear();
                return Err(LinkError::Framing);
            }
            let _ = self.buffer.push(b);
            return Ok(None);
        }

        let len = self.buffer[1] as usize;
        let total = len + 5;
        let _ = self.buffer.push(b);
        if self.buffer.len() < total {
            return Ok(None);
        }

        let frame = &self.buffer[..total];
        let result = if frame[total - 1] != PACKET_END {
            Err(LinkError::Framing)
        } else {
            let payload = &frame[2..2 + len];
            let crc = u16::from_be_bytes([frame[2 + len], frame[3 + len]]);
            if crc16(payload) == crc {
                Vec::from_slice(payload).map(Some).map_err(|_| LinkError::Framing)
            } else {
                Err(LinkError::Crc)
            }
        };
        self.buffer.clear();
        result
    }

    /// Feed a chunk; returns the first complete payload. Bytes after it are
    /// dropped, the controller sends one reply per request.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<Option<Payload>, LinkError> {
        for &b in data {
            if let Some(p) = self.push_byte(b)? {
                self.buffer.clear();
                return Ok(Some(p));
            }
        }
        Ok(None)
    }
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new()
    }
}

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// ECHONET Lite message header, fixed to 0x1081:
/// EHD1 = 0x10 (ECHONET Lite), EHD2 = 0x81 (format 1).
pub const ECHONET_LITE_EHD: [u8; 2] = [0x10, 0x81];

// ObjectCode {{{
/// Three-byte (class group, class, instance) object code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectCode(pub [u8; 3]);

/// This program: management/controller class, instance 1.
pub const HOME_CONTROLLER: ObjectCode = ObjectCode([0x05, 0xFF, 0x01]);
/// Low-voltage smart electric energy meter class, instance 1.
pub const SMART_ELECTRIC_ENERGY_METER: ObjectCode = ObjectCode([0x02, 0x88, 0x01]);
/// Node profile class; sent by the meter right after the PANA join.
pub const NODE_PROFILE_CLASS: ObjectCode = ObjectCode([0x0E, 0xF0, 0x01]);

impl std::fmt::Display for ObjectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl std::fmt::Debug for ObjectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
} // }}}

/// ECHONET Lite service codes (ESV).
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Esv {
    SetI = 0x60,
    SetC = 0x61,
    Get = 0x62,
    InfReq = 0x63,
    SetGet = 0x6E,
    SetRes = 0x71,
    GetRes = 0x72,
    Inf = 0x73,
    Infc = 0x74,
    InfcRes = 0x7A,
    SetGetRes = 0x7E,
    SetISna = 0x50,
    SetCSna = 0x51,
    GetSna = 0x52,
    InfSna = 0x53,
    SetGetSna = 0x5E,
}

/// One property record: code, declared data length, data.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EchonetLiteProp {
    pub epc: u8,
    pub pdc: u8,
    pub edt: Vec<u8>,
}

impl EchonetLiteProp {
    /// A Get-request entry: property code only, no data.
    pub fn request(epc: u8) -> Self {
        Self {
            epc,
            pdc: 0,
            edt: Vec::new(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EchonetLiteFrame {
    pub tid: u16,
    pub seoj: ObjectCode,
    pub deoj: ObjectCode,
    pub esv: Esv,
    pub opc: u8,
    pub props: Vec<EchonetLiteProp>,
}

impl EchonetLiteFrame {
    /// Build a Get request from the controller to the meter.
    pub fn get_request(tid: u16, epcs: &[u8]) -> Self {
        Self {
            tid,
            seoj: HOME_CONTROLLER,
            deoj: SMART_ELECTRIC_ENERGY_METER,
            esv: Esv::Get,
            opc: epcs.len() as u8,
            props: epcs.iter().copied().map(EchonetLiteProp::request).collect(),
        }
    }
}

impl std::fmt::Display for EchonetLiteFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TID:{:04X},SEOJ:{},DEOJ:{},ESV:{:02X},OPC:{:02X}",
            self.tid,
            self.seoj,
            self.deoj,
            u8::from(self.esv),
            self.opc
        )?;
        for prop in &self.props {
            write!(f, ",EPC:{:02X},PDC:{:02X}", prop.epc, prop.pdc)?;
            if !prop.edt.is_empty() {
                write!(f, ",EDT:{}", hex::encode_upper(&prop.edt))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializeError {
    #[error("size mismatch in {field}: declared {declared}, actual {actual}")]
    SizeMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("unknown EHD: {:02X}{:02X}", .0[0], .0[1])]
    UnknownHeader([u8; 2]),
    #[error("unknown ESV: {0:02X}")]
    UnknownEsv(u8),
    #[error("insufficient input, this is {0} bytes")]
    InsufficientInput(usize),
}

/// Linearize a frame. The declared counts must agree with the actual
/// contents; a frame with inconsistent OPC or PDC is never sent.
pub fn serialize(frame: &EchonetLiteFrame) -> Result<Bytes, SerializeError> {
    if usize::from(frame.opc) != frame.props.len() {
        return Err(SerializeError::SizeMismatch {
            field: "opc",
            declared: usize::from(frame.opc),
            actual: frame.props.len(),
        });
    }
    for prop in &frame.props {
        if usize::from(prop.pdc) != prop.edt.len() {
            return Err(SerializeError::SizeMismatch {
                field: "pdc",
                declared: usize::from(prop.pdc),
                actual: prop.edt.len(),
            });
        }
    }

    let mut buf = BytesMut::with_capacity(12 + frame.props.iter().map(|p| 2 + p.edt.len()).sum::<usize>());
    buf.put_slice(&ECHONET_LITE_EHD);
    buf.put_u16(frame.tid);
    buf.put_slice(&frame.seoj.0);
    buf.put_slice(&frame.deoj.0);
    buf.put_u8(frame.esv.into());
    buf.put_u8(frame.opc);
    for prop in &frame.props {
        buf.put_u8(prop.epc);
        buf.put_u8(prop.pdc);
        buf.put_slice(&prop.edt);
    }
    Ok(buf.freeze())
}

/// Parse a frame out of a received UDP payload. Never returns a partial
/// frame: any truncation fails the whole datagram.
pub fn deserialize(data: &[u8]) -> Result<EchonetLiteFrame, DeserializeError> {
    if data.len() < 12 {
        return Err(DeserializeError::InsufficientInput(data.len()));
    }
    if data[0..2] != ECHONET_LITE_EHD {
        return Err(DeserializeError::UnknownHeader([data[0], data[1]]));
    }
    let tid = u16::from_be_bytes([data[2], data[3]]);
    let seoj = ObjectCode([data[4], data[5], data[6]]);
    let deoj = ObjectCode([data[7], data[8], data[9]]);
    let esv = Esv::try_from(data[10]).map_err(|_| DeserializeError::UnknownEsv(data[10]))?;
    let opc = data[11];

    let mut props = Vec::with_capacity(usize::from(opc));
    let mut at = 12;
    for _ in 0..opc {
        if data.len() < at + 2 {
            return Err(DeserializeError::InsufficientInput(data.len()));
        }
        let epc = data[at];
        let pdc = data[at + 1];
        at += 2;
        if data.len() < at + usize::from(pdc) {
            return Err(DeserializeError::InsufficientInput(data.len()));
        }
        let edt = data[at..at + usize::from(pdc)].to_vec();
        at += usize::from(pdc);
        props.push(EchonetLiteProp { epc, pdc, edt });
    }

    Ok(EchonetLiteFrame {
        tid,
        seoj,
        deoj,
        esv,
        opc,
        props,
    })
}

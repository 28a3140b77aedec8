use crate::prelude::*;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::hexed::{HexedU16, HexedU64, HexedU8};
use crate::skstack::ipv6::IPv6Addr;
use crate::skstack::response::{ResEpandesc, ResErxudp, ResEvent, Response};

/// Upper bound on one accumulated token. The longest legitimate line the
/// modem prints (an ERXUDP header) is well under this.
const TOKEN_BOUND: usize = 512;

/// How a `read_token` call ended.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Token {
    /// A separator byte (the requested one, or CR/CRLF/LF) was seen.
    Delimited { text: String, separator: u8 },
    /// The deadline passed first; carries whatever accumulated.
    TimedOut(String),
    /// The stream reached EOF; carries whatever accumulated.
    StreamEnded(String),
    /// The internal bound was hit before any separator.
    Overflowed(String),
}

enum ByteRead {
    Byte(u8),
    Ended,
    TimedOut,
}

/// Line-protocol driver for the BP35A1 SKSTACK command set, generic over
/// the byte stream so tests can drive it with an in-memory duplex pipe.
///
/// All reads take a wall-clock deadline; nothing here blocks forever. The
/// transport is half duplex, so the owner must consume each command's
/// OK/FAIL before writing the next command.
pub struct SkModem<S> {
    stream: S,
    pushback: Option<u8>,
}

impl<S> SkModem<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pushback: None,
        }
    }

    async fn read_byte(&mut self, deadline: Instant) -> Result<ByteRead> {
        if let Some(byte) = self.pushback.take() {
            return Ok(ByteRead::Byte(byte));
        }
        let mut buf = [0u8; 1];
        match tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => Ok(ByteRead::Ended),
            Ok(Ok(_)) => Ok(ByteRead::Byte(buf[0])),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(ByteRead::TimedOut),
        }
    }

    /// Accumulate bytes until `separator`, CR, CRLF, or LF. CR followed by
    /// LF is consumed as one separator; CR followed by anything else pushes
    /// that byte back for the next read. Line endings report as `b'\n'`.
    pub async fn read_token(&mut self, separator: u8, deadline: Instant) -> Result<Token> {
        let mut text = String::new();
        loop {
            match self.read_byte(deadline).await? {
                ByteRead::TimedOut => return Ok(Token::TimedOut(text)),
                ByteRead::Ended => return Ok(Token::StreamEnded(text)),
                ByteRead::Byte(b'\r') => {
                    match self.read_byte(deadline).await? {
                        ByteRead::Byte(b'\n') => {}
                        ByteRead::Byte(other) => self.pushback = Some(other),
                        ByteRead::Ended | ByteRead::TimedOut => {}
                    }
                    return Ok(Token::Delimited {
                        text,
                        separator: b'\n',
                    });
                }
                ByteRead::Byte(b'\n') => {
                    return Ok(Token::Delimited {
                        text,
                        separator: b'\n',
                    })
                }
                ByteRead::Byte(byte) if byte == separator => {
                    return Ok(Token::Delimited {
                        text,
                        separator,
                    })
                }
                ByteRead::Byte(byte) => {
                    text.push(char::from(byte));
                    if text.len() >= TOKEN_BOUND {
                        return Ok(Token::Overflowed(text));
                    }
                }
            }
        }
    }

    /// Write one command line, CRLF terminated, and flush.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("modem TX: {}", line);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// `SKSENDTO` is the one command with a binary tail: the header ends in
    /// a space and the raw payload follows with no trailing CRLF.
    pub async fn write_datagram(
        &mut self,
        handle: u8,
        dest: &IPv6Addr,
        port: HexedU16,
        secured: u8,
        payload: &[u8],
    ) -> Result<()> {
        let header = format!(
            "SKSENDTO {} {} {} {} {:04X} ",
            handle,
            dest,
            port,
            secured,
            payload.len()
        );
        debug!("modem TX: {}[{}]", header, hex::encode_upper(payload));
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read lines until one starts with OK (true) or FAIL (false), or the
    /// deadline passes (false). Other lines are logged and skipped.
    pub async fn await_ok(&mut self, deadline: Instant) -> Result<bool> {
        loop {
            match self.read_token(b'\n', deadline).await? {
                Token::Delimited { text, .. } => {
                    let line = text.trim();
                    if line.starts_with("OK") {
                        return Ok(true);
                    }
                    if line.starts_with("FAIL") {
                        warn!("modem answered {}", line);
                        return Ok(false);
                    }
                    if !line.is_empty() {
                        debug!("modem: skipping {:?} while waiting for OK", line);
                    }
                }
                Token::Overflowed(_) => {
                    debug!("modem: skipping overlong line while waiting for OK");
                }
                Token::TimedOut(_) => {
                    warn!("modem: timed out waiting for OK");
                    return Ok(false);
                }
                Token::StreamEnded(_) => bail!("stream ended while waiting for OK"),
            }
        }
    }

    /// Drain whatever the modem already printed. Bounds each read with a
    /// short deadline so an idle line returns promptly.
    pub async fn clear_read_buffer(&mut self) -> Result<()> {
        self.pushback = None;
        loop {
            let deadline = Instant::now() + std::time::Duration::from_millis(10);
            match self.read_byte(deadline).await? {
                ByteRead::Byte(_) => continue,
                ByteRead::Ended | ByteRead::TimedOut => return Ok(()),
            }
        }
    }

    /// Ask the modem to fold a 64-bit MAC into its link-local IPv6 form
    /// (SKLL64). Echoes and blank lines are skipped until a line parses as
    /// an address or the deadline passes.
    pub async fn resolve_ipv6(
        &mut self,
        mac_address: HexedU64,
        deadline: Instant,
    ) -> Result<Option<IPv6Addr>> {
        self.clear_read_buffer().await?;
        self.write_line(&format!("SKLL64 {}", mac_address)).await?;
        loop {
            match self.read_token(b'\n', deadline).await? {
                Token::Delimited { text, .. } => {
                    if let Ok(addr) = text.trim().parse::<IPv6Addr>() {
                        return Ok(Some(addr));
                    }
                }
                Token::Overflowed(_) => continue,
                Token::TimedOut(_) => return Ok(None),
                Token::StreamEnded(_) => bail!("stream ended while resolving IPv6 address"),
            }
        }
    }

    // a space-delimited word plus whether it ended its line
    async fn read_word(&mut self, deadline: Instant) -> Result<Option<(String, bool)>> {
        match self.read_token(b' ', deadline).await? {
            Token::Delimited { text, separator } => Ok(Some((text, separator == b'\n'))),
            Token::Overflowed(text) => Ok(Some((text, false))),
            Token::TimedOut(_) => Ok(None),
            Token::StreamEnded(_) => bail!("stream ended inside a notification"),
        }
    }

    async fn read_exact_bytes(&mut self, len: usize, deadline: Instant) -> Result<Option<Vec<u8>>> {
        let mut payload = Vec::with_capacity(len);
        while payload.len() < len {
            match self.read_byte(deadline).await? {
                ByteRead::Byte(byte) => payload.push(byte),
                ByteRead::TimedOut => return Ok(None),
                ByteRead::Ended => bail!("stream ended inside a datagram payload"),
            }
        }
        Ok(Some(payload))
    }

    /// Read one asynchronous notification. Returns `None` on timeout, on an
    /// unrecognized line (logged and discarded), or on a malformed
    /// notification body.
    pub async fn receive_response(&mut self, deadline: Instant) -> Result<Option<Response>> {
        let head = loop {
            match self.read_word(deadline).await? {
                Some((word, _)) if word.trim().is_empty() => continue,
                Some((word, _)) => break word,
                None => return Ok(None),
            }
        };

        match head.trim() {
            "EVENT" => self.receive_event(deadline).await,
            "EPANDESC" => self.receive_epandesc(deadline).await,
            "ERXUDP" => self.receive_erxudp(deadline).await,
            other => {
                let rest = match self.read_token(b'\n', deadline).await? {
                    Token::Delimited { text, .. } | Token::Overflowed(text) | Token::TimedOut(text) => text,
                    Token::StreamEnded(text) => text,
                };
                info!("modem: discarding {:?} {:?}", other, rest.trim());
                Ok(None)
            }
        }
    }

    async fn receive_event(&mut self, deadline: Instant) -> Result<Option<Response>> {
        let (num_text, line_ended) = match self.read_word(deadline).await? {
            Some(word) => word,
            None => return Ok(None),
        };
        let num: HexedU8 = match num_text.trim().parse() {
            Ok(num) => num,
            Err(e) => {
                warn!("EVENT: bad event number {:?}: {}", num_text, e);
                return Ok(None);
            }
        };
        if line_ended {
            warn!("EVENT {:02X}: missing sender address", num.0);
            return Ok(None);
        }

        let (sender_text, line_ended) = match self.read_word(deadline).await? {
            Some(word) => word,
            None => return Ok(None),
        };
        let sender: IPv6Addr = match sender_text.trim().parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("EVENT {:02X}: bad sender {:?}: {}", num.0, sender_text, e);
                return Ok(None);
            }
        };

        let param = if line_ended {
            None
        } else {
            match self.read_word(deadline).await? {
                Some((param_text, _)) => param_text.trim().parse::<HexedU8>().ok(),
                None => return Ok(None),
            }
        };

        Ok(Some(Response::Event(ResEvent { num, sender, param })))
    }

    async fn receive_epandesc(&mut self, deadline: Instant) -> Result<Option<Response>> {
        let mut channel: Option<HexedU8> = None;
        let mut channel_page: Option<HexedU8> = None;
        let mut pan_id: Option<HexedU16> = None;
        let mut addr: Option<HexedU64> = None;
        let mut lqi: Option<HexedU8> = None;
        let mut pair_id: Option<String> = None;

        for _ in 0..6 {
            let label = match self.read_token(b':', deadline).await? {
                Token::Delimited { text, separator } if separator == b':' => text,
                Token::Delimited { text, .. } => {
                    warn!("EPANDESC: line {:?} has no label", text.trim());
                    return Ok(None);
                }
                Token::TimedOut(_) => return Ok(None),
                Token::Overflowed(_) => return Ok(None),
                Token::StreamEnded(_) => bail!("stream ended inside EPANDESC"),
            };
            let value = match self.read_token(b'\n', deadline).await? {
                Token::Delimited { text, .. } => text.trim().to_string(),
                Token::TimedOut(_) => return Ok(None),
                Token::Overflowed(_) => return Ok(None),
                Token::StreamEnded(_) => bail!("stream ended inside EPANDESC"),
            };

            match label.trim() {
                "Channel" => channel = value.parse().ok(),
                "Channel Page" => channel_page = value.parse().ok(),
                "Pan ID" => pan_id = value.parse().ok(),
                "Addr" => addr = value.parse().ok(),
                "LQI" => lqi = value.parse().ok(),
                "PairID" => pair_id = Some(value),
                unknown => {
                    warn!("EPANDESC: unrecognized label {:?}", unknown);
                    return Ok(None);
                }
            }
        }

        match (channel, channel_page, pan_id, addr, lqi, pair_id) {
            (Some(channel), Some(channel_page), Some(pan_id), Some(addr), Some(lqi), Some(pair_id)) => {
                Ok(Some(Response::Epandesc(ResEpandesc {
                    channel,
                    channel_page,
                    pan_id,
                    addr,
                    lqi,
                    pair_id,
                })))
            }
            _ => {
                warn!("EPANDESC: descriptor is missing fields");
                Ok(None)
            }
        }
    }

    async fn receive_erxudp(&mut self, deadline: Instant) -> Result<Option<Response>> {
        let mut words = Vec::with_capacity(7);
        for _ in 0..7 {
            match self.read_word(deadline).await? {
                Some((word, _)) => words.push(word),
                None => return Ok(None),
            }
        }

        let header = (|| -> Result<(IPv6Addr, IPv6Addr, HexedU16, HexedU16, HexedU64, HexedU8, HexedU16)> {
            Ok((
                words[0].trim().parse()?,
                words[1].trim().parse()?,
                words[2].trim().parse()?,
                words[3].trim().parse()?,
                words[4].trim().parse()?,
                words[5].trim().parse()?,
                words[6].trim().parse()?,
            ))
        })();
        let (sender, dest, rport, lport, sender_lla, secured, datalen) = match header {
            Ok(fields) => fields,
            Err(e) => {
                warn!("ERXUDP: bad header: {}", e);
                return Ok(None);
            }
        };

        // The payload is binary: exactly DATALEN raw bytes, embedded
        // space/CR/LF included.
        let payload = match self.read_exact_bytes(usize::from(datalen.0), deadline).await? {
            Some(payload) => payload,
            None => {
                warn!("ERXUDP: timed out inside the payload");
                return Ok(None);
            }
        };

        // Only the line terminator may follow the payload. Anything else is
        // a framing error and poisons the whole datagram.
        match self.read_token(b'\n', deadline).await? {
            Token::Delimited { text, .. } if text.is_empty() => {}
            Token::Delimited { text, .. } => {
                warn!(
                    "ERXUDP: {} unexpected bytes after the declared payload",
                    text.len()
                );
                return Ok(None);
            }
            Token::TimedOut(text) if text.is_empty() => {}
            Token::TimedOut(text) => {
                warn!(
                    "ERXUDP: {} unexpected bytes after the declared payload",
                    text.len()
                );
                return Ok(None);
            }
            Token::Overflowed(_) => {
                warn!("ERXUDP: runaway bytes after the declared payload");
                return Ok(None);
            }
            Token::StreamEnded(_) => {}
        }

        Ok(Some(Response::Erxudp(ResErxudp {
            sender,
            dest,
            rport,
            lport,
            sender_lla,
            secured,
            datalen,
            payload,
        })))
    }
}

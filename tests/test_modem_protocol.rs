use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use routeb_bridge::hexed::HexedU64;
use routeb_bridge::skstack::ipv6::IPv6Addr;
use routeb_bridge::skstack::modem::{SkModem, Token};
use routeb_bridge::skstack::response::Response;

const SENDER: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

fn deadline_ms(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

#[tokio::test]
async fn read_token_splits_on_the_requested_separator() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"EVENT 22\r\n").await?;

    assert_eq!(
        modem.read_token(b' ', deadline_ms(200)).await?,
        Token::Delimited {
            text: "EVENT".to_string(),
            separator: b' ',
        }
    );
    assert_eq!(
        modem.read_token(b' ', deadline_ms(200)).await?,
        Token::Delimited {
            text: "22".to_string(),
            separator: b'\n',
        }
    );
    Ok(())
}

#[tokio::test]
async fn read_token_reports_a_timeout_with_the_partial_text() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"OK").await?;

    assert_eq!(
        modem.read_token(b'\n', deadline_ms(100)).await?,
        Token::TimedOut("OK".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn read_token_reports_stream_end() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"OK").await?;
    drop(far);

    assert_eq!(
        modem.read_token(b'\n', deadline_ms(200)).await?,
        Token::StreamEnded("OK".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn await_ok_accepts_ok_and_rejects_fail() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"\r\nOK\r\n").await?;
    assert!(modem.await_ok(deadline_ms(200)).await?);

    far.write_all(b"FAIL ER04\r\n").await?;
    assert!(!modem.await_ok(deadline_ms(200)).await?);
    Ok(())
}

#[tokio::test]
async fn await_ok_skips_unrelated_lines() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"EVENT 21 ").await?;
    far.write_all(SENDER.as_bytes()).await?;
    far.write_all(b" 00\r\nOK\r\n").await?;

    assert!(modem.await_ok(deadline_ms(200)).await?);
    Ok(())
}

#[tokio::test]
async fn await_ok_times_out_as_failure() -> Result<()> {
    let (pipe, _far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    assert!(!modem.await_ok(deadline_ms(100)).await?);
    Ok(())
}

#[tokio::test]
async fn write_line_appends_crlf() -> Result<()> {
    let (pipe, far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);
    let mut far_modem = SkModem::new(far);

    modem.write_line("SKSREG SFE 0").await?;

    assert_eq!(
        far_modem.read_token(b'\n', deadline_ms(200)).await?,
        Token::Delimited {
            text: "SKSREG SFE 0".to_string(),
            separator: b'\n',
        }
    );
    Ok(())
}

#[tokio::test]
async fn event_with_a_parameter_parses() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(format!("EVENT 21 {} 00\r\n", SENDER).as_bytes())
        .await?;

    match modem.receive_response(deadline_ms(200)).await? {
        Some(Response::Event(ev)) => {
            assert_eq!(ev.num.0, 0x21);
            assert_eq!(ev.sender.to_string(), SENDER);
            assert_eq!(ev.param.map(|p| p.0), Some(0));
        }
        other => panic!("unexpected response: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn event_without_a_parameter_parses() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(format!("EVENT 25 {}\r\n", SENDER).as_bytes())
        .await?;

    match modem.receive_response(deadline_ms(200)).await? {
        Some(Response::Event(ev)) => {
            assert_eq!(ev.num.0, 0x25);
            assert_eq!(ev.param, None);
        }
        other => panic!("unexpected response: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn event_without_a_sender_is_discarded() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(b"EVENT 22\r\n").await?;

    assert!(modem.receive_response(deadline_ms(200)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn epandesc_with_all_six_labels_parses() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    far.write_all(
        b"EPANDESC\r\n  Channel:39\r\n  Channel Page:09\r\n  Pan ID:8888\r\n  Addr:001D129012345678\r\n  LQI:E1\r\n  PairID:01234567\r\n",
    )
    .await?;

    match modem.receive_response(deadline_ms(200)).await? {
        Some(Response::Epandesc(desc)) => {
            assert_eq!(desc.channel.0, 0x39);
            assert_eq!(desc.channel_page.0, 0x09);
            assert_eq!(desc.pan_id.0, 0x8888);
            assert_eq!(desc.addr.0, 0x001D129012345678);
            assert_eq!(desc.lqi.0, 0xE1);
            assert_eq!(desc.pair_id, "01234567");
        }
        other => panic!("unexpected response: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn epandesc_with_an_unrecognized_label_fails() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    // five recognized labels, one stranger
    far.write_all(
        b"EPANDESC\r\n  Channel:39\r\n  Channel Page:09\r\n  Pan ID:8888\r\n  Addr:001D129012345678\r\n  Side:00\r\n  PairID:01234567\r\n",
    )
    .await?;

    assert!(modem.receive_response(deadline_ms(200)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn erxudp_reads_exactly_the_declared_payload_length() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    // 14 bytes of payload with an embedded space, CR, and LF
    let payload: &[u8] = &[
        0x10, 0x81, 0x12, 0x34, 0x05, 0x20, 0xFF, 0x0D, 0x0A, 0x02, 0x88, 0x01, 0x62, 0x01,
    ];
    let header = format!(
        "ERXUDP {} {} 0E1A 0E1A 001D129012345678 1 000E ",
        SENDER, "FF02:0000:0000:0000:0000:0000:0000:0001"
    );
    far.write_all(header.as_bytes()).await?;
    far.write_all(payload).await?;
    far.write_all(b"\r\n").await?;

    match modem.receive_response(deadline_ms(200)).await? {
        Some(Response::Erxudp(udp)) => {
            assert_eq!(udp.rport.0, 0x0E1A);
            assert_eq!(udp.lport.0, 0x0E1A);
            assert_eq!(udp.sender_lla.0, 0x001D129012345678);
            assert_eq!(udp.secured.0, 1);
            assert_eq!(udp.datalen.0, 14);
            assert_eq!(udp.payload, payload);
        }
        other => panic!("unexpected response: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn erxudp_with_trailing_bytes_past_the_payload_is_rejected() -> Result<()> {
    let (pipe, mut far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    let header = format!(
        "ERXUDP {} {} 0E1A 0E1A 001D129012345678 1 0004 ",
        SENDER, "FF02:0000:0000:0000:0000:0000:0000:0001"
    );
    far.write_all(header.as_bytes()).await?;
    far.write_all(b"\x10\x81\x00\x01EXTRA\r\n").await?;

    assert!(modem.receive_response(deadline_ms(200)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn resolve_ipv6_parses_the_reply_line() -> Result<()> {
    let (pipe, far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);
    let mut far_modem = SkModem::new(far);

    let mac = HexedU64(0x001D129012345678);

    let responder = async move {
        // consume the SKLL64 line, then answer with the address
        let _ = far_modem.read_token(b'\n', deadline_ms(500)).await?;
        far_modem.write_line(SENDER).await?;
        Ok::<_, anyhow::Error>(())
    };

    let (resolved, _) = tokio::try_join!(modem.resolve_ipv6(mac, deadline_ms(500)), responder)?;
    assert_eq!(resolved.map(|a| a.to_string()), Some(SENDER.to_string()));
    Ok(())
}

#[tokio::test]
async fn resolve_ipv6_times_out_to_none() -> Result<()> {
    let (pipe, _far) = tokio::io::duplex(1024);
    let mut modem = SkModem::new(pipe);

    let mac = HexedU64(0x001D129012345678);
    assert_eq!(modem.resolve_ipv6(mac, deadline_ms(100)).await?, None);
    Ok(())
}

#[test]
fn ipv6_parse_is_all_or_nothing() {
    assert!(SENDER.parse::<IPv6Addr>().is_ok());
    assert!("FE80:0000:0000:0000:021D:1290:1234".parse::<IPv6Addr>().is_err());
    assert!("FE80:0000:0000:0000:021D:1290:1234:56".parse::<IPv6Addr>().is_err());
    assert!("FE80::1234:5678".parse::<IPv6Addr>().is_err());
    assert!("GGGG:0000:0000:0000:021D:1290:1234:5678".parse::<IPv6Addr>().is_err());
}

#[test]
fn ipv6_displays_without_zero_compression() {
    let addr: IPv6Addr = SENDER.parse().unwrap();
    assert_eq!(addr.to_string(), SENDER);
}

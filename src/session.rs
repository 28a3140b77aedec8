use crate::prelude::*;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::echonet::frame::{self, EchonetLiteFrame, Esv, NODE_PROFILE_CLASS, SMART_ELECTRIC_ENERGY_METER};
use crate::echonet::properties::{pick_meter_data, Epc, MeterValue, Pickup};
use crate::echonet::ECHONET_LITE_UDP_PORT;
use crate::repository::TelemetryRepository;
use crate::skstack::modem::SkModem;
use crate::skstack::response::{event, ResEpandesc, ResErxudp, ResEvent, Response, SmartMeterIdentifier};
use crate::telemetry;

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Shutdown,
}

// SessionStats {{{
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub commands_sent: u64,
    pub command_failures: u64,
    pub requests_sent: u64,
    pub frames_received: u64,
    pub events_received: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
}

impl SessionStats {
    pub fn print_summary(&self) {
        info!("Session Statistics:");
        info!("  Modem commands sent: {}", self.commands_sent);
        info!("  Modem command failures: {}", self.command_failures);
        info!("  Meter requests sent: {}", self.requests_sent);
        info!("  Frames received: {}", self.frames_received);
        info!("  Events received: {}", self.events_received);
        info!("  Decode errors: {}", self.decode_errors);
        info!("  Reconnects: {}", self.reconnects);
        info!("  MQTT:");
        info!("    Messages sent: {}", self.mqtt_messages_sent);
        info!("    Errors: {}", self.mqtt_errors);
    }
} // }}}

/// Scan window codes tried in order. Each code d scans 28 channels
/// (33 through 60) for 10 * 2^d + 1 ms apiece.
const SCAN_DURATIONS: [u32; 4] = [5, 6, 7, 8];
const SCAN_CHANNEL_COUNT: u32 = 28;

/// First request after a (re)connect: device identity plus the scaling
/// properties every later reading depends on.
const FIRST_REQUEST_EPCS: [u8; 8] = [
    Epc::OperationStatus as u8,
    Epc::InstallationLocation as u8,
    Epc::FaultStatus as u8,
    Epc::ManufacturerCode as u8,
    Epc::Coefficient as u8,
    Epc::UnitForCumulativeAmounts as u8,
    Epc::EffectiveDigits as u8,
    Epc::CumulativeAtFixedTime as u8,
];

/// The meter refreshes the fixed-time cumulative register every 30
/// minutes; ask again once the cached reading is this stale.
const CUMULATIVE_REFRESH_MINUTES: i64 = 36;

/// At most this many buffered notifications are processed per tick.
const RESPONSES_PER_TICK: usize = 25;
const RESPONSE_QUEUE_BOUND: usize = 100;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_SECS: u64 = 5;

/// Drives one meter over one modem: discovery, PANA join, periodic
/// requests, and dispatch of everything the modem sends back. Owns the
/// stream exclusively; modem commands are never pipelined.
pub struct MeterSession<S> {
    modem: SkModem<S>,
    config: ConfigWrapper,
    channels: Channels,
    repository: TelemetryRepository,
    shared_stats: Arc<Mutex<SessionStats>>,
    meter: Option<SmartMeterIdentifier>,
    connected: bool,
    first_request_pending: bool,
    tid: u16,
    queue: VecDeque<Response>,
    last_request_minute: Option<u32>,
}

impl<S> MeterSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        config: ConfigWrapper,
        channels: Channels,
        repository: TelemetryRepository,
        shared_stats: Arc<Mutex<SessionStats>>,
    ) -> Self {
        Self {
            modem: SkModem::new(stream),
            config,
            channels,
            repository,
            shared_stats,
            meter: None,
            connected: false,
            first_request_pending: false,
            tid: 0,
            queue: VecDeque::new(),
            last_request_minute: None,
        }
    }

    pub fn meter(&self) -> Option<SmartMeterIdentifier> {
        self.meter
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn command_deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.session().command_timeout_secs())
    }

    fn next_tid(&mut self) -> u16 {
        self.tid = self.tid.wrapping_add(1);
        self.tid
    }

    fn count_command(&self, ok: bool) {
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.commands_sent += 1;
            if !ok {
                stats.command_failures += 1;
            }
        }
    }

    async fn command(&mut self, line: &str) -> Result<bool> {
        self.modem.write_line(line).await?;
        let ok = self.modem.await_ok(self.command_deadline()).await?;
        self.count_command(ok);
        Ok(ok)
    }

    /// Tear down any stale session, set credentials, and run the active
    /// scan ladder. The last descriptor of the first duration that finds
    /// anything wins; its MAC is then resolved to the link-local address.
    pub async fn startup_and_find_meter(&mut self) -> Result<Option<SmartMeterIdentifier>> {
        // a leftover PANA session answers SKTERM with OK, a fresh boot
        // with FAIL ER10. either way, carry on.
        self.modem.write_line("SKTERM").await?;
        let _ = self.modem.await_ok(self.command_deadline()).await?;
        self.modem.clear_read_buffer().await?;

        if !self.command("SKSREG SFE 0").await? {
            warn!("could not disable command echo");
            return Ok(None);
        }

        let route_b = self.config.route_b();
        if !self
            .command(&format!("SKSETPWD C {}", route_b.password()))
            .await?
        {
            warn!("modem rejected the Route-B password");
            return Ok(None);
        }
        if !self.command(&format!("SKSETRBID {}", route_b.id())).await? {
            warn!("modem rejected the Route-B id");
            return Ok(None);
        }

        for duration in SCAN_DURATIONS {
            info!("active scan with duration {}", duration);
            if !self
                .command(&format!("SKSCAN 2 FFFFFFFF {}", duration))
                .await?
            {
                warn!("scan command refused");
                return Ok(None);
            }

            let per_channel_ms = 10u64 * (1u64 << duration) + 1;
            let budget = Duration::from_millis(per_channel_ms * u64::from(SCAN_CHANNEL_COUNT));
            let deadline = Instant::now() + budget;

            let mut found: Option<ResEpandesc> = None;
            loop {
                match self.modem.receive_response(deadline).await? {
                    Some(Response::Epandesc(desc)) => {
                        info!(
                            "discovered PAN {} on channel {} (LQI {})",
                            desc.pan_id, desc.channel, desc.lqi
                        );
                        found = Some(desc);
                    }
                    Some(Response::Event(ev)) if ev.num.0 == event::ACTIVE_SCAN_COMPLETED => break,
                    Some(_) => continue,
                    None => {
                        if Instant::now() >= deadline {
                            break;
                        }
                    }
                }
            }

            let desc = match found {
                Some(desc) => desc,
                None => continue,
            };

            let addr = match self
                .modem
                .resolve_ipv6(desc.addr, self.command_deadline())
                .await?
            {
                Some(addr) => addr,
                None => {
                    warn!("could not resolve {} to an IPv6 address", desc.addr);
                    return Ok(None);
                }
            };

            return Ok(Some(SmartMeterIdentifier {
                ipv6_address: addr,
                channel: desc.channel,
                pan_id: desc.pan_id,
            }));
        }

        warn!("active scan exhausted all durations without finding a meter");
        Ok(None)
    }

    /// Tune to the meter's channel and PAN, then run the PANA join and
    /// wait for its verdict event.
    pub async fn connect(&mut self, meter: SmartMeterIdentifier) -> Result<bool> {
        if !self
            .command(&format!("SKSREG S2 {}", meter.channel))
            .await?
        {
            return Ok(false);
        }
        if !self.command(&format!("SKSREG S3 {}", meter.pan_id)).await? {
            return Ok(false);
        }

        self.modem.clear_read_buffer().await?;
        if !self
            .command(&format!("SKJOIN {}", meter.ipv6_address))
            .await?
        {
            return Ok(false);
        }

        let deadline =
            Instant::now() + Duration::from_secs(self.config.session().connect_timeout_secs());
        loop {
            match self.modem.receive_response(deadline).await? {
                Some(Response::Event(ev)) if ev.num.0 == event::PANA_CONNECT_ERROR => {
                    warn!("PANA authentication failed");
                    return Ok(false);
                }
                Some(Response::Event(ev)) if ev.num.0 == event::PANA_CONNECT_COMPLETED => {
                    info!("PANA session established with {}", meter);
                    return Ok(true);
                }
                Some(_) => continue,
                None => {
                    if Instant::now() >= deadline {
                        warn!("timed out waiting for the PANA verdict");
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Build and send one Get request for the given property codes.
    pub async fn send_request(
        &mut self,
        meter: SmartMeterIdentifier,
        epcs: &[u8],
    ) -> Result<bool> {
        let tid = self.next_tid();
        let request = EchonetLiteFrame::get_request(tid, epcs);
        let payload = frame::serialize(&request)?;
        debug!("request: {}", request);

        self.modem
            .write_datagram(1, &meter.ipv6_address, ECHONET_LITE_UDP_PORT, 1, &payload)
            .await?;
        let ok = self.modem.await_ok(self.command_deadline()).await?;
        self.count_command(ok);
        if ok {
            if let Ok(mut stats) = self.shared_stats.lock() {
                stats.requests_sent += 1;
            }
        } else {
            warn!("request was not accepted by the modem");
        }
        Ok(ok)
    }

    /// Main loop, spawned as a task. Reconnects while down; while up,
    /// sends minute-aligned requests and drains buffered notifications.
    /// Returns an error once the reconnect budget is spent, which ends
    /// the process so the host supervisor can restart it.
    pub async fn start(&mut self) -> Result<()> {
        let mut shutdown_rx = self.channels.to_session.subscribe();
        let mut failed_attempts: u32 = 0;
        let max_attempts = self.config.session().max_reconnect_attempts();

        loop {
            match shutdown_rx.try_recv() {
                Ok(ChannelData::Shutdown) => {
                    info!("session received shutdown signal");
                    self.modem.write_line("SKTERM").await?;
                    let _ = self.modem.await_ok(self.command_deadline()).await?;
                    break;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => {
                    info!("session channel closed, stopping");
                    break;
                }
            }

            if !self.connected {
                if failed_attempts > 0 {
                    info!(
                        "reconnecting in {}s (attempt {}/{})",
                        RECONNECT_DELAY_SECS, failed_attempts, max_attempts
                    );
                    tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                }
                if self.reconnect().await? {
                    failed_attempts = 0;
                } else {
                    failed_attempts += 1;
                    if failed_attempts >= max_attempts {
                        bail!(
                            "giving up after {} failed reconnect attempts",
                            failed_attempts
                        );
                    }
                }
                continue;
            }

            self.tick().await?;
            tokio::time::sleep(TICK_INTERVAL).await;
        }

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<bool> {
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.reconnects += 1;
        }

        if self.meter.is_none() {
            self.meter = self.startup_and_find_meter().await?;
        }
        let meter = match self.meter {
            Some(meter) => meter,
            None => return Ok(false),
        };

        if self.connect(meter).await? {
            self.connected = true;
            self.first_request_pending = true;
            self.last_request_minute = None;
            Ok(true)
        } else {
            // force a fresh scan next time; the PAN may have moved
            self.meter = None;
            Ok(false)
        }
    }

    /// One connected-state tick: request if due, then pump the stream
    /// into the queue and process a bounded batch.
    async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let meter = self
            .meter
            .ok_or_else(|| anyhow!("connected without a meter identifier"))?;

        if self.first_request_pending {
            self.first_request_pending = false;
            self.last_request_minute = Some(now.minute());
            self.send_request(meter, &FIRST_REQUEST_EPCS).await?;
        } else if self.last_request_minute != Some(now.minute()) {
            self.last_request_minute = Some(now.minute());
            let mut epcs = vec![
                Epc::InstantaneousPower as u8,
                Epc::InstantaneousCurrents as u8,
            ];
            let stale = match self.repository.cumulative_age_minutes(now) {
                Some(age) => age >= CUMULATIVE_REFRESH_MINUTES,
                None => true,
            };
            if stale {
                epcs.push(Epc::CumulativeAtFixedTime as u8);
            }
            self.send_request(meter, &epcs).await?;
        }

        self.pump_incoming().await?;

        for _ in 0..RESPONSES_PER_TICK {
            match self.queue.pop_front() {
                Some(response) => self.dispatch(response)?,
                None => break,
            }
        }

        Ok(())
    }

    /// Move whatever the modem has already printed into the bounded
    /// queue. A short deadline keeps an idle tick cheap.
    async fn pump_incoming(&mut self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(200);
        loop {
            match self.modem.receive_response(deadline).await? {
                Some(response) => {
                    if self.queue.len() >= RESPONSE_QUEUE_BOUND {
                        warn!("response queue full, dropping a notification");
                        continue;
                    }
                    self.queue.push_back(response);
                }
                None => {
                    if Instant::now() >= deadline {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, response: Response) -> Result<()> {
        match response {
            Response::Event(ev) => self.dispatch_event(ev),
            Response::Erxudp(udp) => self.dispatch_datagram(udp),
            Response::Epandesc(desc) => {
                debug!("ignoring stray scan descriptor for PAN {}", desc.pan_id);
                Ok(())
            }
        }
    }

    fn dispatch_event(&mut self, ev: ResEvent) -> Result<()> {
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.events_received += 1;
        }

        match ev.num.0 {
            event::PANA_CONNECT_COMPLETED => {
                info!("event 25: PANA session established");
                self.connected = true;
                self.first_request_pending = true;
            }
            event::PANA_CONNECT_ERROR => {
                warn!("event 24: PANA authentication failed");
                self.disconnect();
            }
            event::SESSION_CLOSE_REQUEST_RECEIVED => {
                warn!("event 26: meter asked to close the session");
                self.disconnect();
            }
            event::PANA_SESSION_CLOSED => {
                warn!("event 27: PANA session closed");
                self.disconnect();
            }
            event::PANA_SESSION_CLOSE_TIMEOUT => {
                warn!("event 28: PANA session close timed out");
                self.disconnect();
            }
            event::PANA_SESSION_EXPIRED => {
                warn!("event 29: PANA session lifetime expired");
                self.disconnect();
            }
            event::UDP_SEND_COMPLETED => match ev.param.map(|p| p.0) {
                Some(0) => debug!("event 21: UDP send succeeded"),
                Some(1) => warn!("event 21: UDP send failed"),
                Some(2) => debug!("event 21: UDP send suppressed by neighbor discovery"),
                other => debug!("event 21: UDP send completed, param {:?}", other),
            },
            event::NS_RECEIVED => debug!("event 01: neighbor solicitation from {}", ev.sender),
            event::NA_RECEIVED => debug!("event 02: neighbor advertisement from {}", ev.sender),
            event::ECHO_REQUEST_RECEIVED => debug!("event 05: echo request from {}", ev.sender),
            event::ED_SCAN_COMPLETED => debug!("event 1F: ED scan completed"),
            event::BEACON_REQUEST_RECEIVED => debug!("event 20: beacon request from {}", ev.sender),
            event::ARIB108_SEND_PAUSED => warn!("event 32: transmit paused (ARIB 108 duty limit)"),
            event::ARIB108_SEND_RESUMED => info!("event 33: transmit resumed"),
            event::ACTIVE_SCAN_COMPLETED => debug!("event 22: active scan completed"),
            other => info!("event {:02X} from {} (param {:?})", other, ev.sender, ev.param),
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.meter = None;
        self.repository.clear_instant_readings();
    }

    fn dispatch_datagram(&mut self, udp: ResErxudp) -> Result<()> {
        if udp.lport != ECHONET_LITE_UDP_PORT {
            debug!("ignoring datagram on port {}", udp.lport);
            return Ok(());
        }

        let decoded = match frame::deserialize(&udp.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "undecodable frame from {}: {} [{}]",
                    udp.sender,
                    e,
                    hex::encode_upper(&udp.payload)
                );
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.decode_errors += 1;
                }
                return Ok(());
            }
        };
        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.frames_received += 1;
        }
        debug!("frame: {}", decoded);

        if decoded.seoj == NODE_PROFILE_CLASS {
            self.handle_node_profile(&decoded);
            return Ok(());
        }
        if decoded.seoj != SMART_ELECTRIC_ENERGY_METER {
            info!("frame from unexpected object {}", decoded.seoj);
            return Ok(());
        }

        match decoded.esv {
            Esv::GetRes | Esv::Inf => {
                for prop in &decoded.props {
                    self.handle_meter_property(prop)?;
                }
            }
            Esv::GetSna => {
                warn!("meter could not answer every property: {}", decoded);
                for prop in decoded.props.iter().filter(|p| !p.edt.is_empty()) {
                    self.handle_meter_property(prop)?;
                }
            }
            other => info!("unhandled service {:?}: {}", other, decoded),
        }
        Ok(())
    }

    // the meter announces its instance list right after the join
    fn handle_node_profile(&self, decoded: &EchonetLiteFrame) {
        for prop in &decoded.props {
            if prop.epc == 0xD5 {
                info!(
                    "node profile instance list: [{}]",
                    hex::encode_upper(&prop.edt)
                );
            } else {
                debug!("node profile property {:02X}", prop.epc);
            }
        }
    }

    fn handle_meter_property(&mut self, prop: &crate::echonet::frame::EchonetLiteProp) -> Result<()> {
        match pick_meter_data(prop) {
            Pickup::Value(value) => self.store_value(value)?,
            Pickup::Ignored(message) => info!("{}", message),
            Pickup::Error(reason) => {
                warn!("{}", reason);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.decode_errors += 1;
                }
            }
        }
        Ok(())
    }

    fn store_value(&mut self, value: MeterValue) -> Result<()> {
        let mqtt = self.config.mqtt();
        let now = Utc::now();

        match value {
            MeterValue::Coefficient(coefficient) => {
                info!("coefficient: {}", coefficient.0);
                self.repository.set_coefficient(coefficient);
            }
            MeterValue::EffectiveDigits(digits) => {
                info!("effective digits: {}", digits.0);
                self.repository.set_effective_digits(digits);
            }
            MeterValue::Unit(unit) => {
                info!(
                    "cumulative unit: {}",
                    unit.description().unwrap_or("unknown")
                );
                self.repository.set_unit(unit);
            }
            MeterValue::InstantWatt(watt) => {
                info!("instantaneous power: {}", watt);
                self.repository.set_instant_watt(now, watt);
                let message = telemetry::Message::for_instant_watt(&mqtt, now, watt)?;
                let _ = self
                    .channels
                    .to_telemetry
                    .send(telemetry::ChannelData::Message(message));
            }
            MeterValue::InstantAmpere(ampere) => {
                info!("instantaneous current: {}", ampere);
                self.repository.set_instant_ampere(now, ampere);
                let message = telemetry::Message::for_instant_ampere(&mqtt, now, ampere)?;
                let _ = self
                    .channels
                    .to_telemetry
                    .send(telemetry::ChannelData::Message(message));
            }
            MeterValue::CumulativeWattHour(cwh) => {
                if !cwh.valid() {
                    warn!("cumulative reading with invalid timestamp: {}", cwh);
                    return Ok(());
                }
                info!("cumulative energy: {}", cwh);
                self.repository.set_cumulative_watt_hour(cwh);

                let snapshot = self.repository.snapshot();
                match snapshot.unit {
                    Some(unit) => {
                        let message = telemetry::Message::for_cumulative(
                            &mqtt,
                            &cwh,
                            snapshot.coefficient,
                            unit,
                        )?;
                        let _ = self
                            .channels
                            .to_telemetry
                            .send(telemetry::ChannelData::Message(message));
                    }
                    None => warn!("holding cumulative reading until the unit arrives"),
                }
            }
        }
        Ok(())
    }
}

//! Public session API — drives the full connect sequence and exposes
//! the steady-state session.
//!
//! ```text
//! X.224 negotiate ─► TLS (+ CredSSP) ─► MCS connect/join ─► client
//! info ─► licensing ─► capability exchange ─► finalization ─► ready
//! ```
//!
//! After `connect` returns, a spawned read task drives the inbound
//! frame stream and delivers [`SessionEvent`]s through a bounded queue;
//! a writer task serializes every outbound frame onto the transport.

use std::io;

use bytes::{Buf, Bytes};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::channels::Channels;
use crate::error::RdxError;
use crate::gcc::{ClientCoreData, ClientNetworkData, ClientSecurityData};
use crate::keymap::Key;
use crate::mcs::{GLOBAL_CHANNEL_NAME, McsConnector, McsSession, McsStep, USER_CHANNEL_NAME};
use crate::nla::{self, Ntlm};
use crate::pdu::caps::{self, ServerCapabilities};
use crate::pdu::input::{self, InputEvent, KeyboardFlags, PointerFlags};
use crate::pdu::update::{self, BitmapData, PointerShape, UpdateEvent};
use crate::pdu;
use crate::rle;
use crate::sec::{self, ClientInfo};
use crate::tpkt::{TpktCodec, TpktFrame, TpktMessage};
use crate::transport::TransportStream;
use crate::x224::{self, Protocols};

/// Decoded events are delivered through a queue of this depth. The
/// read task awaits queue space when the consumer lags: backpressure
/// blocks the producer, no update is ever dropped.
const EVENT_QUEUE_DEPTH: usize = 32;

const OUTBOUND_QUEUE_DEPTH: usize = 100;

const CLIENT_DIR: &str = "C:\\Windows\\System32\\mstscax.dll";

/// Connection parameters for [`RdpClient::connect`].
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub domain: String,
    pub username: String,
    pub password: String,
    pub width: u16,
    pub height: u16,
    pub keyboard_layout: u32,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    /// Security protocols to advertise in the X.224 negotiation.
    pub security: Protocols,
}

impl ConnectConfig {
    /// Defaults: 1280x800 desktop, US keyboard, TLS + CredSSP.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            domain: String::new(),
            username: String::new(),
            password: String::new(),
            width: 1280,
            height: 800,
            keyboard_layout: 0x409,
            keyboard_type: 4, // IBM enhanced 101/102-key
            keyboard_subtype: 0,
            security: Protocols::SSL | Protocols::HYBRID,
        }
    }
}

/// One decoded rectangle of a bitmap update, expanded to RGBA8.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub dest_left: u16,
    pub dest_top: u16,
    pub dest_right: u16,
    pub dest_bottom: u16,
    pub width: u16,
    pub height: u16,
    /// `width * height * 4` bytes, row-major, top-down.
    pub data: Vec<u8>,
}

/// Everything the session reports to its caller.
#[derive(Debug)]
pub enum SessionEvent {
    /// Capability negotiation finished; the desktop is live. Emitted
    /// exactly once.
    Ready,
    /// A batch of decoded bitmap rectangles to composite.
    Bitmap(Vec<Bitmap>),
    PointerHide,
    PointerDefault,
    PointerPosition { x: u16, y: u16 },
    PointerCached(u16),
    PointerUpdate(PointerShape),
    /// An unrecoverable session error, or a server-reported error code.
    Error(RdxError),
    /// The transport is gone. Emitted exactly once, always last.
    Close,
}

/// Receiving half of the session event queue.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event, or `None` once the session has fully shut down.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

pub(crate) enum Outbound {
    Frame(TpktMessage),
    Shutdown,
}

/// A connected RDP session. Input methods may be called from any task;
/// writes are serialized by the writer task owning the sink half.
#[derive(Debug)]
pub struct RdpClient {
    out_tx: mpsc::Sender<Outbound>,
    mcs: McsSession,
    share_id: u32,
    server_caps: ServerCapabilities,
}

impl RdpClient {
    /// Connect without any channel plugins.
    pub async fn connect(config: ConnectConfig) -> Result<(Self, SessionEvents), RdxError> {
        Self::connect_with_channels(config, Channels::new()).await
    }

    /// Run the full connect sequence. Returns once the session is
    /// ready; the first queued event is always [`SessionEvent::Ready`].
    pub async fn connect_with_channels(
        config: ConnectConfig,
        mut channels: Channels,
    ) -> Result<(Self, SessionEvents), RdxError> {
        info!(host = %config.host, port = config.port, user = %config.username, "connecting");
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;
        let client_address = tcp
            .local_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_owned());

        // X.224 negotiation on the plain stream.
        let mut framed = Framed::new(TransportStream::Plain(tcp), TpktCodec);
        framed
            .send(TpktMessage::Data(x224::connection_request(config.security)))
            .await?;
        let selected = x224::parse_connection_confirm(next_data(&mut framed).await?)?;
        if !config.security.contains(selected) {
            return Err(RdxError::Protocol("server selected a protocol we did not request"));
        }
        debug!(?selected, "security negotiation complete");

        // TLS upgrade, then CredSSP when the server picked it.
        let framed = if selected.intersects(Protocols::SSL | Protocols::HYBRID | Protocols::HYBRID_EX)
        {
            let parts = framed.into_parts();
            if !parts.read_buf.is_empty() {
                return Err(RdxError::Protocol("peer sent data before the security upgrade"));
            }
            let TransportStream::Plain(tcp) = parts.io else {
                return Err(RdxError::Protocol("transport already upgraded"));
            };
            let mut stream = TransportStream::upgrade_tls(tcp, &config.host).await?;
            if selected.intersects(Protocols::HYBRID | Protocols::HYBRID_EX) {
                let ntlm = Ntlm::new(&config.domain, &config.username, &config.password);
                let public_key = stream.peer_public_key()?;
                nla::authenticate(&mut stream, &ntlm, &public_key).await?;
            }
            Framed::new(stream, TpktCodec)
        } else {
            framed
        };
        let mut hs = Handshake {
            framed,
            pending: Vec::new(),
        };

        // MCS connect, domain setup, channel joins.
        let mut core = ClientCoreData::new(
            config.keyboard_layout,
            config.keyboard_type,
            config.keyboard_subtype,
        );
        core.desktop_width = config.width;
        core.desktop_height = config.height;
        core.server_selected_protocol = selected.bits();
        let mut network = ClientNetworkData::default();
        channels.advertise(&mut network);

        let mut connector = McsConnector::new(core, network, ClientSecurityData);
        hs.send_mcs(&connector.connect_initial()).await?;
        let domain = loop {
            let payload = hs.next_x224().await?;
            match connector.step(payload)? {
                McsStep::Send(frames) => {
                    for frame in frames {
                        hs.send_mcs(&frame).await?;
                    }
                }
                McsStep::Connected(domain) => break domain,
            }
        };
        info!(
            user_id = domain.user_id,
            channels = domain.channels.len(),
            "multiplexer connected"
        );
        let mcs = McsSession::new(domain.user_id, domain.channels);
        let global = mcs.channel_id(GLOBAL_CHANNEL_NAME);

        // Client info, then licensing until a terminal state.
        let info = ClientInfo {
            domain: config.domain.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client_address,
            client_dir: CLIENT_DIR.to_owned(),
        };
        hs.send_mcs(&mcs.pack(global, &info.encode())).await?;

        let mut carried = None;
        loop {
            let payload = hs.next_global(&mcs).await?;
            match sec::process_licensing(payload)? {
                sec::SecPayload::LicenseComplete => break,
                // Some servers skip licensing; this is already
                // presentation data.
                sec::SecPayload::Data(data) => {
                    carried = Some(data);
                    break;
                }
            }
        }

        // Capability exchange.
        let demand = loop {
            let payload = match carried.take() {
                Some(payload) => payload,
                None => hs.next_global(&mcs).await?,
            };
            let control = pdu::parse_control(payload)?;
            match control.pdu_type {
                pdu::PDUTYPE_DEMANDACTIVE => {
                    break pdu::parse_demand_active(control.body, control.pdu_source)?;
                }
                pdu::PDUTYPE_DATA => {
                    let data = pdu::parse_data(control.body)?;
                    if data.pdu_type2 == pdu::PDUTYPE2_SET_ERROR_INFO {
                        fail_on_error_info(data.body)?;
                    }
                }
                other => debug!(pdu_type = other, "ignoring PDU before demand active"),
            }
        };
        let server_caps = caps::server_capabilities(&demand.capabilities);
        debug!(
            share_id = demand.share_id,
            fastpath = server_caps.fastpath_output,
            bpp = server_caps.preferred_bits_per_pixel,
            "demand active"
        );

        let client_caps = caps::client_capabilities(
            config.width,
            config.height,
            config.keyboard_layout,
            config.keyboard_type,
            config.keyboard_subtype,
        );
        hs.send_mcs(&mcs.pack(
            global,
            &pdu::encode_confirm_active(demand.share_id, mcs.user_id, &client_caps),
        ))
        .await?;
        for frame in pdu::finalization_pdus(demand.share_id, mcs.user_id, demand.pdu_source) {
            hs.send_mcs(&mcs.pack(global, &frame)).await?;
        }

        // Finalization completes with the server's font map.
        loop {
            let payload = hs.next_global(&mcs).await?;
            let control = pdu::parse_control(payload)?;
            match control.pdu_type {
                pdu::PDUTYPE_DATA => {
                    let data = pdu::parse_data(control.body)?;
                    match data.pdu_type2 {
                        pdu::PDUTYPE2_FONTMAP => break,
                        pdu::PDUTYPE2_SET_ERROR_INFO => fail_on_error_info(data.body)?,
                        pdu::PDUTYPE2_SYNCHRONIZE | pdu::PDUTYPE2_CONTROL => {}
                        other => debug!(pdu_type2 = other, "ignoring data PDU during finalization"),
                    }
                }
                pdu::PDUTYPE_DEACTIVATEALL => warn!("deactivate all during finalization"),
                other => debug!(pdu_type = other, "ignoring PDU during finalization"),
            }
        }
        info!("session ready");

        // Steady state: split the transport between the two tasks.
        let Handshake { framed, pending } = hs;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        channels.attach_senders(&mcs, &out_tx);

        let (sink, stream) = framed.split();
        tokio::spawn(write_loop(sink, out_rx));
        tokio::spawn(read_loop(stream, mcs.clone(), channels, event_tx.clone()));

        event_tx.send(SessionEvent::Ready).await?;
        for event in pending {
            event_tx.send(event).await?;
        }

        let client = RdpClient {
            out_tx,
            mcs,
            share_id: demand.share_id,
            server_caps,
        };
        Ok((client, SessionEvents { rx: event_rx }))
    }

    pub fn user_id(&self) -> u16 {
        self.mcs.user_id
    }

    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server_caps
    }

    /// Serialize one or more input events into a single input PDU.
    pub async fn send_input(&self, events: &[InputEvent]) -> Result<(), RdxError> {
        let body = input::encode_input_events(events);
        let frame = pdu::encode_data_pdu(
            self.share_id,
            self.mcs.user_id,
            pdu::PDUTYPE2_INPUT,
            &body,
        );
        let packed = self.mcs.pack(self.mcs.channel_id(GLOBAL_CHANNEL_NAME), &frame);
        self.out_tx
            .send(Outbound::Frame(TpktMessage::Data(x224::wrap_data(&packed))))
            .await?;
        Ok(())
    }

    pub async fn key_down(&self, key: Key) -> Result<(), RdxError> {
        self.send_input(&[InputEvent::Scancode {
            flags: KeyboardFlags::empty(),
            code: key.scancode(),
        }])
        .await
    }

    pub async fn key_up(&self, key: Key) -> Result<(), RdxError> {
        self.send_input(&[InputEvent::Scancode {
            flags: KeyboardFlags::RELEASE,
            code: key.scancode(),
        }])
        .await
    }

    pub async fn mouse_move(&self, x: u16, y: u16) -> Result<(), RdxError> {
        self.send_input(&[InputEvent::Pointer {
            flags: PointerFlags::MOVE,
            x,
            y,
        }])
        .await
    }

    pub async fn mouse_down(&self, button: u8, x: u16, y: u16) -> Result<(), RdxError> {
        self.send_input(&[InputEvent::Pointer {
            flags: PointerFlags::DOWN | button_flag(button),
            x,
            y,
        }])
        .await
    }

    pub async fn mouse_up(&self, button: u8, x: u16, y: u16) -> Result<(), RdxError> {
        self.send_input(&[InputEvent::Pointer {
            flags: button_flag(button),
            x,
            y,
        }])
        .await
    }

    /// Vertical wheel; negative `delta` scrolls towards the user.
    pub async fn mouse_wheel(&self, delta: i16, x: u16, y: u16) -> Result<(), RdxError> {
        let mut flags = PointerFlags::WHEEL;
        if delta < 0 {
            flags |= PointerFlags::WHEEL_NEGATIVE;
        }
        let rotation = delta.unsigned_abs() & input::WHEEL_ROTATION_MASK;
        let flags = PointerFlags::from_bits_retain(flags.bits() | rotation);
        self.send_input(&[InputEvent::Pointer { flags, x, y }]).await
    }

    /// Tear the transport down. The read task observes the shutdown
    /// and emits [`SessionEvent::Close`] exactly once. The session is
    /// dead afterwards; reconnecting means a fresh [`connect`].
    ///
    /// [`connect`]: RdpClient::connect
    pub async fn close(&self) {
        let _ = self.out_tx.send(Outbound::Shutdown).await;
    }
}

fn button_flag(button: u8) -> PointerFlags {
    match button {
        0 => PointerFlags::BUTTON1,
        1 => PointerFlags::BUTTON3,
        2 => PointerFlags::BUTTON2,
        _ => PointerFlags::MOVE,
    }
}

fn closed() -> RdxError {
    RdxError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed",
    ))
}

fn fail_on_error_info(mut body: Bytes) -> Result<(), RdxError> {
    if body.remaining() < 4 {
        return Err(RdxError::Decode("error info data PDU too short"));
    }
    let code = body.get_u32_le();
    if code != 0 {
        return Err(RdxError::ErrorInfo(code));
    }
    Ok(())
}

async fn next_data(framed: &mut Framed<TransportStream, TpktCodec>) -> Result<Bytes, RdxError> {
    match framed.next().await {
        None => Err(closed()),
        Some(Err(e)) => Err(e),
        Some(Ok(TpktFrame::Data(frame))) => Ok(frame),
        Some(Ok(TpktFrame::FastPath { .. })) => {
            Err(RdxError::Protocol("fast-path before negotiation"))
        }
    }
}

// ── Handshake driver ─────────────────────────────────────────────

/// Sequential request/response helper for the connect sequence.
/// Fast-path updates racing ahead of the ready event are decoded and
/// queued for delivery after it.
struct Handshake {
    framed: Framed<TransportStream, TpktCodec>,
    pending: Vec<SessionEvent>,
}

impl Handshake {
    async fn send_mcs(&mut self, payload: &[u8]) -> Result<(), RdxError> {
        self.framed
            .send(TpktMessage::Data(x224::wrap_data(payload)))
            .await
    }

    async fn next_x224(&mut self) -> Result<Bytes, RdxError> {
        loop {
            match self.framed.next().await {
                None => return Err(closed()),
                Some(Err(e)) => return Err(e),
                Some(Ok(TpktFrame::Data(frame))) => return x224::unwrap_data(frame),
                Some(Ok(TpktFrame::FastPath { payload, .. })) => {
                    self.pending
                        .extend(updates_to_events(update::parse_fastpath(payload)?));
                }
            }
        }
    }

    async fn next_global(&mut self, mcs: &McsSession) -> Result<Bytes, RdxError> {
        loop {
            let payload = self.next_x224().await?;
            if let Some((channel, data)) = mcs.decode_data(payload)? {
                if channel == GLOBAL_CHANNEL_NAME || channel == USER_CHANNEL_NAME {
                    return Ok(data);
                }
                debug!(channel, "dropping channel payload during handshake");
            }
        }
    }
}

// ── Steady-state tasks ───────────────────────────────────────────

async fn write_loop(
    mut sink: SplitSink<Framed<TransportStream, TpktCodec>, TpktMessage>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "transport write failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<Framed<TransportStream, TpktCodec>>,
    mcs: McsSession,
    mut channels: Channels,
    events: mpsc::Sender<SessionEvent>,
) {
    'outer: loop {
        let frame = match stream.next().await {
            None => break,
            Some(Err(e)) => {
                let _ = events.send(SessionEvent::Error(e)).await;
                break;
            }
            Some(Ok(frame)) => frame,
        };
        let batch = match process_frame(frame, &mcs, &mut channels) {
            Ok(batch) => batch,
            Err(e) => {
                let _ = events.send(SessionEvent::Error(e)).await;
                break;
            }
        };
        for event in batch {
            if events.send(event).await.is_err() {
                break 'outer;
            }
        }
    }
    let _ = events.send(SessionEvent::Close).await;
}

fn process_frame(
    frame: TpktFrame,
    mcs: &McsSession,
    channels: &mut Channels,
) -> Result<Vec<SessionEvent>, RdxError> {
    match frame {
        TpktFrame::FastPath { payload, .. } => {
            Ok(updates_to_events(update::parse_fastpath(payload)?))
        }
        TpktFrame::Data(frame) => {
            let payload = x224::unwrap_data(frame)?;
            let Some((channel, payload)) = mcs.decode_data(payload)? else {
                return Ok(Vec::new());
            };
            if channel != GLOBAL_CHANNEL_NAME && channel != USER_CHANNEL_NAME {
                channels.dispatch(&channel, payload)?;
                return Ok(Vec::new());
            }

            let control = pdu::parse_control(payload)?;
            match control.pdu_type {
                pdu::PDUTYPE_DATA => {
                    let data = pdu::parse_data(control.body)?;
                    match data.pdu_type2 {
                        pdu::PDUTYPE2_UPDATE => Ok(update::parse_slowpath_update(data.body)?
                            .and_then(update_to_event)
                            .into_iter()
                            .collect()),
                        pdu::PDUTYPE2_SET_ERROR_INFO => {
                            // Surfaced to the caller; the server closes
                            // the transport on fatal codes.
                            match fail_on_error_info(data.body) {
                                Ok(()) => Ok(Vec::new()),
                                Err(e) => Ok(vec![SessionEvent::Error(e)]),
                            }
                        }
                        other => {
                            debug!(pdu_type2 = other, "ignoring data PDU");
                            Ok(Vec::new())
                        }
                    }
                }
                pdu::PDUTYPE_DEACTIVATEALL => {
                    warn!("server deactivated the session; re-activation unsupported");
                    Ok(Vec::new())
                }
                other => {
                    debug!(pdu_type = other, "ignoring control PDU");
                    Ok(Vec::new())
                }
            }
        }
    }
}

fn updates_to_events(updates: Vec<UpdateEvent>) -> Vec<SessionEvent> {
    updates.into_iter().filter_map(update_to_event).collect()
}

fn update_to_event(update: UpdateEvent) -> Option<SessionEvent> {
    match update {
        UpdateEvent::Bitmap(rects) => {
            let mut bitmaps = Vec::with_capacity(rects.len());
            for rect in &rects {
                match decode_bitmap(rect) {
                    Ok(bitmap) => bitmaps.push(bitmap),
                    // Recoverable: only this rectangle is lost.
                    Err(e) => warn!(error = %e, "dropping malformed bitmap rectangle"),
                }
            }
            (!bitmaps.is_empty()).then_some(SessionEvent::Bitmap(bitmaps))
        }
        UpdateEvent::PointerHide => Some(SessionEvent::PointerHide),
        UpdateEvent::PointerDefault => Some(SessionEvent::PointerDefault),
        UpdateEvent::PointerPosition { x, y } => Some(SessionEvent::PointerPosition { x, y }),
        UpdateEvent::PointerCached(index) => Some(SessionEvent::PointerCached(index)),
        UpdateEvent::PointerShape(shape) => Some(SessionEvent::PointerUpdate(shape)),
    }
}

fn decode_bitmap(rect: &BitmapData) -> Result<Bitmap, RdxError> {
    let width = rect.width as usize;
    let height = rect.height as usize;
    let raw = if rect.is_compressed() {
        rle::decompress(&rect.data, width, height, rect.bits_per_pixel)?
    } else {
        flip_raw_rows(&rect.data, width, height, rect.bits_per_pixel)?
    };
    let data = rle::to_rgba(&raw, width, height, rect.bits_per_pixel)?;
    Ok(Bitmap {
        dest_left: rect.dest_left,
        dest_top: rect.dest_top,
        dest_right: rect.dest_right,
        dest_bottom: rect.dest_bottom,
        width: rect.width,
        height: rect.height,
        data,
    })
}

/// Uncompressed rectangles arrive bottom-up with rows padded to the
/// transport stride; reorder into a tight top-down buffer.
fn flip_raw_rows(data: &[u8], width: usize, height: usize, bpp: u16) -> Result<Vec<u8>, RdxError> {
    let bytes_pp = rle::bytes_per_pixel(bpp)?;
    if width == 0 || height == 0 {
        return Err(RdxError::BitmapDecode("zero bitmap dimension"));
    }
    let row_len = width * bytes_pp;
    let stride = data.len() / height;
    if stride * height != data.len() || stride < row_len {
        return Err(RdxError::BitmapDecode("raw bitmap size mismatch"));
    }
    let mut out = Vec::with_capacity(row_len * height);
    for row in (0..height).rev() {
        let start = row * stride;
        out.extend_from_slice(&data[start..start + row_len]);
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(flags: u16, bpp: u16, width: u16, height: u16, data: &[u8]) -> BitmapData {
        BitmapData {
            dest_left: 0,
            dest_top: 0,
            dest_right: width - 1,
            dest_bottom: height - 1,
            width,
            height,
            bits_per_pixel: bpp,
            flags,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn raw_bitmap_flips_bottom_up_rows() {
        // 2x2 at 16bpp: wire carries the bottom row first.
        let data = [0x01, 0x02, 0x03, 0x04, 0x11, 0x12, 0x13, 0x14];
        let bitmap = decode_bitmap(&rect(0, 16, 2, 2, &data)).unwrap();
        assert_eq!(bitmap.data.len(), 16);
        // First output pixel comes from the second wire row (0x1211).
        let p = u16::from_le_bytes([0x11, 0x12]);
        assert_eq!(
            &bitmap.data[..4],
            &[
                ((p >> 11) & 0x1f) as u8 * 8,
                ((p >> 5) & 0x3f) as u8 * 4,
                (p & 0x1f) as u8 * 8,
                0xff
            ]
        );
    }

    #[test]
    fn raw_bitmap_skips_row_padding() {
        // 1x2 at 24bpp, rows padded to 4 bytes.
        let data = [0xAA, 0xBB, 0xCC, 0x00, 0x10, 0x20, 0x30, 0x00];
        let bitmap = decode_bitmap(&rect(0, 24, 1, 2, &data)).unwrap();
        assert_eq!(bitmap.data, vec![0x30, 0x20, 0x10, 0xff, 0xCC, 0xBB, 0xAA, 0xff]);
    }

    #[test]
    fn compressed_bitmap_goes_through_rle() {
        // Colour run of 4 with colour 0xCDAB over a 2x2 surface.
        let stream = [0x64, 0xAB, 0xCD];
        let bitmap = decode_bitmap(&rect(0x0001, 16, 2, 2, &stream)).unwrap();
        assert_eq!(bitmap.data.len(), 16);
    }

    #[test]
    fn malformed_rectangle_is_dropped_not_fatal() {
        let bad = rect(0x0001, 16, 4, 4, &[0x88, 0x01]); // truncated RLE
        let good = rect(0, 16, 1, 1, &[0xFF, 0xFF]);
        let event = update_to_event(UpdateEvent::Bitmap(vec![bad, good])).unwrap();
        match event {
            SessionEvent::Bitmap(bitmaps) => assert_eq!(bitmaps.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn all_rectangles_malformed_yields_no_event() {
        let bad = rect(0x0001, 16, 4, 4, &[0x88]);
        assert!(update_to_event(UpdateEvent::Bitmap(vec![bad])).is_none());
    }

    #[test]
    fn button_indices_follow_ptr_flags() {
        assert_eq!(button_flag(0), PointerFlags::BUTTON1);
        assert_eq!(button_flag(1), PointerFlags::BUTTON3);
        assert_eq!(button_flag(2), PointerFlags::BUTTON2);
        assert_eq!(button_flag(9), PointerFlags::MOVE);
    }

    #[test]
    fn error_info_code_maps_to_typed_error() {
        let body = Bytes::from_static(&[0x05, 0x00, 0x00, 0x00]);
        assert!(matches!(
            fail_on_error_info(body),
            Err(RdxError::ErrorInfo(5))
        ));
        let none = Bytes::from_static(&[0x00, 0x00, 0x00, 0x00]);
        assert!(fail_on_error_info(none).is_ok());
    }
}

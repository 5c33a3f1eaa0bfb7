//! MCS (T.125) — channel multiplexing over one transport connection.
//!
//! The connect sequence is an explicit state machine:
//!
//! ```text
//! AwaitConnectResponse ──► AwaitAttachUserConfirm ──► AwaitJoinConfirm ──► Connected
//!        │                          │                        │ (one join per
//!        ▼                          ▼                        ▼  confirm)
//!   connect initial           erect + attach          user channel first,
//!                                                     then each static
//! ```
//!
//! Afterwards [`McsSession`] demultiplexes send-data indications by
//! channel id and packs outbound payloads into send-data requests.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::asn1::{ber, per, take, take_u8};
use crate::error::RdxError;
use crate::gcc::{
    self, ClientCoreData, ClientNetworkData, ClientSecurityData, ServerSettings,
};

pub const GLOBAL_CHANNEL_ID: u16 = 1003;
pub const USER_CHANNEL_BASE: u16 = 1001;
pub const GLOBAL_CHANNEL_NAME: &str = "global";
pub const USER_CHANNEL_NAME: &str = "user";

const MCS_TYPE_CONNECT_INITIAL: u8 = 0x65;
const MCS_TYPE_CONNECT_RESPONSE: u8 = 0x66;

/// MCS domain PDU opcodes, carried as `(opcode << 2) | options`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainPdu {
    ErectDomainRequest = 1,
    DisconnectProviderUltimatum = 8,
    AttachUserRequest = 10,
    AttachUserConfirm = 11,
    ChannelJoinRequest = 14,
    ChannelJoinConfirm = 15,
    SendDataRequest = 25,
    SendDataIndication = 26,
}

fn write_domain_header(buf: &mut BytesMut, pdu: DomainPdu, options: u8) {
    buf.put_u8(((pdu as u8) << 2) | options);
}

fn domain_opcode(byte: u8) -> u8 {
    byte >> 2
}

// ── Channel table ────────────────────────────────────────────────

/// One entry of the session channel table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u16,
    pub name: String,
}

// ── Domain parameters ────────────────────────────────────────────

/// The eight T.125 domain parameter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainParameters {
    pub max_channel_ids: u32,
    pub max_user_ids: u32,
    pub max_token_ids: u32,
    pub num_priorities: u32,
    pub min_throughput: u32,
    pub max_height: u32,
    pub max_mcs_pdu_size: u32,
    pub protocol_version: u32,
}

impl DomainParameters {
    pub fn target() -> Self {
        Self::new(34, 2, 0, 0xffff)
    }

    pub fn minimum() -> Self {
        Self::new(1, 1, 1, 0x420)
    }

    pub fn maximum() -> Self {
        Self::new(0xffff, 0xfc17, 0xffff, 0xffff)
    }

    fn new(max_channel_ids: u32, max_user_ids: u32, max_token_ids: u32, pdu_size: u32) -> Self {
        Self {
            max_channel_ids,
            max_user_ids,
            max_token_ids,
            num_priorities: 1,
            min_throughput: 0,
            max_height: 1,
            max_mcs_pdu_size: pdu_size,
            protocol_version: 2,
        }
    }

    pub fn ber_encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        for value in [
            self.max_channel_ids,
            self.max_user_ids,
            self.max_token_ids,
            self.num_priorities,
            self.min_throughput,
            self.max_height,
            self.max_mcs_pdu_size,
            self.protocol_version,
        ] {
            ber::write_integer(&mut body, value);
        }
        ber::write_sequence_header(buf, body.len());
        buf.extend_from_slice(&body);
    }

    pub fn ber_decode(r: &mut Bytes) -> Result<Self, RdxError> {
        ber::expect_universal_tag(r, ber::TAG_SEQUENCE, true)?;
        Ok(Self {
            max_channel_ids: ber::read_integer(r)?,
            max_user_ids: ber::read_integer(r)?,
            max_token_ids: ber::read_integer(r)?,
            num_priorities: ber::read_integer(r)?,
            min_throughput: ber::read_integer(r)?,
            max_height: ber::read_integer(r)?,
            max_mcs_pdu_size: ber::read_integer(r)?,
            protocol_version: ber::read_integer(r)?,
        })
    }
}

// ── Connect PDUs ─────────────────────────────────────────────────

fn encode_connect_initial(user_data: &[u8]) -> Bytes {
    let mut body = BytesMut::new();
    ber::write_octet_string(&mut body, &[0x01]); // calling domain selector
    ber::write_octet_string(&mut body, &[0x01]); // called domain selector
    ber::write_boolean(&mut body, true); // upward flag
    DomainParameters::target().ber_encode(&mut body);
    DomainParameters::minimum().ber_encode(&mut body);
    DomainParameters::maximum().ber_encode(&mut body);
    ber::write_octet_string(&mut body, user_data);

    let mut buf = BytesMut::with_capacity(body.len() + 5);
    ber::write_application_tag(&mut buf, MCS_TYPE_CONNECT_INITIAL, body.len());
    buf.extend_from_slice(&body);
    buf.freeze()
}

#[derive(Debug)]
struct ConnectResponse {
    result: u8,
    user_data: Bytes,
}

fn parse_connect_response(mut frame: Bytes) -> Result<ConnectResponse, RdxError> {
    ber::expect_application_tag(&mut frame, MCS_TYPE_CONNECT_RESPONSE)?;
    let result = ber::read_enumerated(&mut frame)?;
    let _connect_id = ber::read_integer(&mut frame)?;
    let _params = DomainParameters::ber_decode(&mut frame)?;
    let user_data = ber::read_octet_string(&mut frame)?;
    Ok(ConnectResponse { result, user_data })
}

// ── Connect state machine ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum McsPhase {
    AwaitConnectResponse,
    AwaitAttachUserConfirm,
    AwaitJoinConfirm,
    Connected,
}

/// Result of feeding one inbound MCS payload to the connector.
#[derive(Debug)]
pub enum McsStep {
    /// Write these MCS payloads (caller wraps them in X.224/TPKT),
    /// then feed the next inbound payload.
    Send(Vec<Bytes>),
    /// The domain is up: channel table is final, steady state begins.
    Connected(Box<ConnectedDomain>),
}

/// Everything the upper layers need once the multiplexer is ready.
#[derive(Debug)]
pub struct ConnectedDomain {
    pub user_id: u16,
    pub channels: Vec<ChannelInfo>,
    pub server: ServerSettings,
}

/// Drives the MCS connect sequence. Pure protocol logic — no I/O.
pub struct McsConnector {
    core: ClientCoreData,
    network: ClientNetworkData,
    security: ClientSecurityData,
    phase: McsPhase,
    user_id: u16,
    channels: Vec<ChannelInfo>,
    server: Option<ServerSettings>,
    join_queue: VecDeque<u16>,
}

impl McsConnector {
    pub fn new(
        core: ClientCoreData,
        network: ClientNetworkData,
        security: ClientSecurityData,
    ) -> Self {
        Self {
            core,
            network,
            security,
            phase: McsPhase::AwaitConnectResponse,
            user_id: USER_CHANNEL_BASE,
            channels: vec![ChannelInfo {
                id: GLOBAL_CHANNEL_ID,
                name: GLOBAL_CHANNEL_NAME.to_owned(),
            }],
            server: None,
            join_queue: VecDeque::new(),
        }
    }

    /// The connect-initial payload that opens the sequence.
    pub fn connect_initial(&self) -> Bytes {
        let mut user_data = BytesMut::new();
        user_data.extend_from_slice(&self.core.pack());
        user_data.extend_from_slice(&self.network.pack());
        user_data.extend_from_slice(&self.security.pack());
        let wrapped = gcc::conference_create_request(&user_data);
        encode_connect_initial(&wrapped)
    }

    /// Feed one inbound MCS payload and advance the sequence.
    pub fn step(&mut self, frame: Bytes) -> Result<McsStep, RdxError> {
        match self.phase {
            McsPhase::AwaitConnectResponse => self.on_connect_response(frame),
            McsPhase::AwaitAttachUserConfirm => self.on_attach_user_confirm(frame),
            McsPhase::AwaitJoinConfirm => self.on_channel_join_confirm(frame),
            McsPhase::Connected => Err(RdxError::Protocol("MCS connector already finished")),
        }
    }

    fn on_connect_response(&mut self, frame: Bytes) -> Result<McsStep, RdxError> {
        let response = parse_connect_response(frame)?;
        if response.result != 0 {
            return Err(RdxError::Protocol("server rejected MCS connection"));
        }
        let server = gcc::read_conference_create_response(response.user_data)?;
        debug!(
            io_channel = server.network.io_channel,
            static_channels = server.network.channel_ids.len(),
            "MCS connect response"
        );
        self.server = Some(server);
        self.phase = McsPhase::AwaitAttachUserConfirm;

        let mut erect = BytesMut::new();
        write_domain_header(&mut erect, DomainPdu::ErectDomainRequest, 0);
        per::write_integer(&mut erect, 0); // sub-height
        per::write_integer(&mut erect, 0); // sub-interval

        let mut attach = BytesMut::new();
        write_domain_header(&mut attach, DomainPdu::AttachUserRequest, 0);

        Ok(McsStep::Send(vec![erect.freeze(), attach.freeze()]))
    }

    fn on_attach_user_confirm(&mut self, mut frame: Bytes) -> Result<McsStep, RdxError> {
        let opcode = self.read_opcode(&mut frame)?;
        if opcode != DomainPdu::AttachUserConfirm as u8 {
            return Err(RdxError::Decode("expected attach user confirm"));
        }
        let result = per::read_enumerates(&mut frame)?;
        if result != 0 {
            return Err(RdxError::RejectedUser);
        }
        let initiator = per::read_integer16(&mut frame)?;
        self.user_id = initiator + USER_CHANNEL_BASE;
        self.channels.push(ChannelInfo {
            id: self.user_id,
            name: USER_CHANNEL_NAME.to_owned(),
        });

        // User channel first, then the server-advertised statics in order.
        self.join_queue.push_back(self.user_id);
        if let Some(server) = &self.server {
            self.join_queue.extend(server.network.channel_ids.iter());
        }
        self.phase = McsPhase::AwaitJoinConfirm;

        let first = self.join_queue[0];
        Ok(McsStep::Send(vec![self.join_request(first)]))
    }

    fn on_channel_join_confirm(&mut self, mut frame: Bytes) -> Result<McsStep, RdxError> {
        let opcode = self.read_opcode(&mut frame)?;
        if opcode != DomainPdu::ChannelJoinConfirm as u8 {
            return Err(RdxError::Decode("expected channel join confirm"));
        }
        let confirm = per::read_enumerates(&mut frame)?;
        let initiator = per::read_integer16(&mut frame)? + USER_CHANNEL_BASE;
        if initiator != self.user_id {
            return Err(RdxError::InvalidUserId);
        }
        let channel_id = per::read_integer16(&mut frame)?;

        if confirm != 0 {
            if channel_id == GLOBAL_CHANNEL_ID || channel_id == self.user_id {
                return Err(RdxError::Protocol(
                    "server refused a mandatory channel join",
                ));
            }
            debug!(channel_id, "server refused static channel join");
        } else if let Some(name) = self.static_channel_name(channel_id) {
            self.channels.push(ChannelInfo {
                id: channel_id,
                name,
            });
        }

        self.join_queue.pop_front();
        match self.join_queue.front() {
            Some(&next) => Ok(McsStep::Send(vec![self.join_request(next)])),
            None => {
                self.phase = McsPhase::Connected;
                let server = self
                    .server
                    .take()
                    .ok_or(RdxError::Protocol("missing server settings"))?;
                Ok(McsStep::Connected(Box::new(ConnectedDomain {
                    user_id: self.user_id,
                    channels: std::mem::take(&mut self.channels),
                    server,
                })))
            }
        }
    }

    fn read_opcode(&self, frame: &mut Bytes) -> Result<u8, RdxError> {
        let byte = take_u8(frame, "MCS domain header")?;
        let opcode = domain_opcode(byte);
        if opcode == DomainPdu::DisconnectProviderUltimatum as u8 {
            return Err(RdxError::DisconnectUltimatum);
        }
        Ok(opcode)
    }

    /// Client-advertised name for a server-confirmed static channel id.
    fn static_channel_name(&self, channel_id: u16) -> Option<String> {
        let server = self.server.as_ref()?;
        let index = server
            .network
            .channel_ids
            .iter()
            .position(|&id| id == channel_id)?;
        self.network
            .channels
            .get(index)
            .map(|def| def.name.clone())
    }

    fn join_request(&self, channel_id: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        write_domain_header(&mut buf, DomainPdu::ChannelJoinRequest, 0);
        per::write_integer16(&mut buf, self.user_id - USER_CHANNEL_BASE);
        per::write_integer16(&mut buf, channel_id);
        buf.freeze()
    }
}

// ── Steady state ─────────────────────────────────────────────────

/// Steady-state multiplexer: demux inbound indications by channel id,
/// pack outbound payloads into send-data requests.
#[derive(Debug, Clone)]
pub struct McsSession {
    pub user_id: u16,
    channels: Vec<ChannelInfo>,
}

impl McsSession {
    pub fn new(user_id: u16, channels: Vec<ChannelInfo>) -> Self {
        Self { user_id, channels }
    }

    /// Channel id for `name`; falls back to the global channel.
    pub fn channel_id(&self, name: &str) -> u16 {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .or(self.channels.first())
            .map(|c| c.id)
            .unwrap_or(GLOBAL_CHANNEL_ID)
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Decode an inbound send-data indication. `Ok(None)` means the PDU
    /// referenced an unknown channel and was dropped (logged, non-fatal).
    pub fn decode_data(&self, mut frame: Bytes) -> Result<Option<(String, Bytes)>, RdxError> {
        let byte = take_u8(&mut frame, "MCS domain header")?;
        let opcode = domain_opcode(byte);
        if opcode == DomainPdu::DisconnectProviderUltimatum as u8 {
            return Err(RdxError::DisconnectUltimatum);
        }
        if opcode != DomainPdu::SendDataIndication as u8 {
            return Err(RdxError::UnknownVariant {
                type_name: "DomainPdu",
                value: opcode as u64,
            });
        }
        let _initiator = per::read_integer16(&mut frame)? + USER_CHANNEL_BASE;
        let channel_id = per::read_integer16(&mut frame)?;
        let _segmentation = per::read_enumerates(&mut frame)?;
        let length = per::read_length(&mut frame)?;
        let payload = take(&mut frame, length, "MCS data payload")?;

        match self.channels.iter().find(|c| c.id == channel_id) {
            Some(channel) => Ok(Some((channel.name.clone(), payload))),
            None => {
                warn!(channel_id, "dropping data for unknown channel");
                Ok(None)
            }
        }
    }

    /// Pack `data` into a send-data request on `channel_id`.
    pub fn pack(&self, channel_id: u16, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(data.len() + 8);
        write_domain_header(&mut buf, DomainPdu::SendDataRequest, 0);
        per::write_integer16(&mut buf, self.user_id - USER_CHANNEL_BASE);
        per::write_integer16(&mut buf, channel_id);
        buf.put_u8(0x70); // data priority + segmentation
        per::write_length(&mut buf, data.len());
        buf.put_slice(data);
        buf.freeze()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_parameters_ber_roundtrip() {
        for params in [
            DomainParameters::target(),
            DomainParameters::minimum(),
            DomainParameters::maximum(),
        ] {
            let mut buf = BytesMut::new();
            params.ber_encode(&mut buf);
            let mut r = buf.freeze();
            let decoded = DomainParameters::ber_decode(&mut r).unwrap();
            assert_eq!(decoded, params);
            // Constant fields are fixed by construction.
            assert_eq!(decoded.num_priorities, 1);
            assert_eq!(decoded.min_throughput, 0);
            assert_eq!(decoded.max_height, 1);
            assert_eq!(decoded.protocol_version, 2);
        }
    }

    #[test]
    fn connect_initial_structure() {
        let mut frame = encode_connect_initial(b"user data");
        let len = ber::expect_application_tag(&mut frame, MCS_TYPE_CONNECT_INITIAL).unwrap();
        assert_eq!(len, frame.len());
        assert_eq!(&ber::read_octet_string(&mut frame).unwrap()[..], &[0x01]);
        assert_eq!(&ber::read_octet_string(&mut frame).unwrap()[..], &[0x01]);
        // Boolean upward flag.
        let tag_len = ber::expect_universal_tag(&mut frame, ber::TAG_BOOLEAN, false).unwrap();
        assert_eq!(tag_len, 1);
        let _ = crate::asn1::take_u8(&mut frame, "bool").unwrap();
        for _ in 0..3 {
            DomainParameters::ber_decode(&mut frame).unwrap();
        }
        assert_eq!(&ber::read_octet_string(&mut frame).unwrap()[..], b"user data");
        assert!(frame.is_empty());
    }

    #[test]
    fn invalid_connect_response_tag_is_decode_error() {
        // Application tag 101 (connect initial) instead of 102.
        let mut buf = BytesMut::new();
        ber::write_application_tag(&mut buf, MCS_TYPE_CONNECT_INITIAL, 0);
        let err = parse_connect_response(buf.freeze()).unwrap_err();
        assert!(matches!(err, RdxError::Decode(_)));
    }

    #[test]
    fn pack_layout() {
        let session = McsSession::new(
            1004,
            vec![ChannelInfo {
                id: GLOBAL_CHANNEL_ID,
                name: GLOBAL_CHANNEL_NAME.to_owned(),
            }],
        );
        let packed = session.pack(GLOBAL_CHANNEL_ID, &[0xaa; 5]);
        assert_eq!(packed[0], (DomainPdu::SendDataRequest as u8) << 2);
        assert_eq!(&packed[1..3], &[0x00, 0x03]); // initiator 1004 - 1001
        assert_eq!(&packed[3..5], &[0x03, 0xeb]); // channel 1003
        assert_eq!(packed[5], 0x70);
        assert_eq!(packed[6], 5);
        assert_eq!(&packed[7..], &[0xaa; 5]);
    }

    #[test]
    fn decode_data_roundtrip_and_unknown_channel() {
        let session = McsSession::new(
            1004,
            vec![ChannelInfo {
                id: GLOBAL_CHANNEL_ID,
                name: GLOBAL_CHANNEL_NAME.to_owned(),
            }],
        );

        let mut buf = BytesMut::new();
        write_domain_header(&mut buf, DomainPdu::SendDataIndication, 0);
        per::write_integer16(&mut buf, 1002 - USER_CHANNEL_BASE);
        per::write_integer16(&mut buf, GLOBAL_CHANNEL_ID);
        buf.put_u8(0x70);
        per::write_length(&mut buf, 3);
        buf.put_slice(b"pdu");
        let (name, payload) = session.decode_data(buf.freeze()).unwrap().unwrap();
        assert_eq!(name, GLOBAL_CHANNEL_NAME);
        assert_eq!(&payload[..], b"pdu");

        let mut buf = BytesMut::new();
        write_domain_header(&mut buf, DomainPdu::SendDataIndication, 0);
        per::write_integer16(&mut buf, 1);
        per::write_integer16(&mut buf, 1099); // never joined
        buf.put_u8(0x70);
        per::write_length(&mut buf, 1);
        buf.put_u8(0);
        assert!(session.decode_data(buf.freeze()).unwrap().is_none());
    }

    #[test]
    fn disconnect_ultimatum_is_terminal() {
        let session = McsSession::new(1004, vec![]);
        let mut buf = BytesMut::new();
        write_domain_header(&mut buf, DomainPdu::DisconnectProviderUltimatum, 1);
        buf.put_u8(0x80);
        assert!(matches!(
            session.decode_data(buf.freeze()),
            Err(RdxError::DisconnectUltimatum)
        ));
    }
}

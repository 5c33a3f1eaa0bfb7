//! Static virtual channel plugin registry.
//!
//! Plugins register before the connect handshake so their channels can
//! be advertised in the client network data, and receive a
//! [`ChannelSender`] capability once the multiplexer is up. Payload
//! semantics are the plugin's business; the core only routes bytes.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::Outbound;
use crate::error::RdxError;
use crate::gcc::ClientNetworkData;
use crate::mcs::McsSession;
use crate::tpkt::TpktMessage;
use crate::x224;

/// A feature module backing one static virtual channel.
pub trait ChannelPlugin: Send {
    /// Channel name advertised to the server (at most 7 bytes).
    fn name(&self) -> &str;

    /// Channel option flags for the client network data block.
    fn options(&self) -> u32;

    /// Called once the channel is joined; the plugin keeps the sender
    /// to emit on its own channel.
    fn attach_sender(&mut self, sender: ChannelSender);

    /// Inbound payload addressed to this plugin's channel.
    fn on_data(&mut self, data: Bytes) -> Result<(), RdxError>;
}

/// Send capability handed to a plugin after the join handshake.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    channel_id: u16,
    mcs: McsSession,
    tx: mpsc::Sender<Outbound>,
}

impl ChannelSender {
    /// Pack `data` onto this plugin's channel and queue it for the
    /// writer task.
    pub async fn send(&self, data: &[u8]) -> Result<(), RdxError> {
        let packed = self.mcs.pack(self.channel_id, data);
        self.tx
            .send(Outbound::Frame(TpktMessage::Data(x224::wrap_data(&packed))))
            .await?;
        Ok(())
    }
}

/// The per-session plugin registry.
#[derive(Default)]
pub struct Channels {
    plugins: Vec<Box<dyn ChannelPlugin>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Must happen before the connect handshake;
    /// channels cannot be added to a live session.
    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        debug!(name = plugin.name(), "registered channel plugin");
        self.plugins.push(plugin);
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Advertise every registered channel in the client network data.
    pub(crate) fn advertise(&self, network: &mut ClientNetworkData) {
        for plugin in &self.plugins {
            network.add_channel(plugin.name(), plugin.options());
        }
    }

    /// Wire each plugin whose channel the server confirmed with a send
    /// capability.
    pub(crate) fn attach_senders(&mut self, mcs: &McsSession, tx: &mpsc::Sender<Outbound>) {
        for plugin in &mut self.plugins {
            match mcs.channels().iter().find(|c| c.name == plugin.name()) {
                Some(channel) => plugin.attach_sender(ChannelSender {
                    channel_id: channel.id,
                    mcs: mcs.clone(),
                    tx: tx.clone(),
                }),
                None => warn!(name = plugin.name(), "channel was not joined; plugin inert"),
            }
        }
    }

    /// Route an inbound payload to the plugin owning `name`.
    pub(crate) fn dispatch(&mut self, name: &str, data: Bytes) -> Result<(), RdxError> {
        match self.plugins.iter_mut().find(|p| p.name() == name) {
            Some(plugin) => plugin.on_data(data),
            None => {
                debug!(name, "no plugin for channel payload");
                Ok(())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcs::ChannelInfo;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        sender: Option<ChannelSender>,
        received: Arc<Mutex<Vec<Bytes>>>,
    }

    impl ChannelPlugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn options(&self) -> u32 {
            0x8000_0000
        }

        fn attach_sender(&mut self, sender: ChannelSender) {
            self.sender = Some(sender);
        }

        fn on_data(&mut self, data: Bytes) -> Result<(), RdxError> {
            self.received.lock().unwrap().push(data);
            Ok(())
        }
    }

    fn session() -> McsSession {
        McsSession::new(
            1004,
            vec![
                ChannelInfo {
                    id: 1003,
                    name: "global".to_owned(),
                },
                ChannelInfo {
                    id: 1005,
                    name: "cliprdr".to_owned(),
                },
            ],
        )
    }

    #[test]
    fn advertises_registered_channels() {
        let mut channels = Channels::new();
        channels.register(Box::new(Recorder {
            name: "cliprdr",
            sender: None,
            received: Arc::default(),
        }));

        let mut network = ClientNetworkData::default();
        channels.advertise(&mut network);
        assert_eq!(network.channels.len(), 1);
        assert_eq!(network.channels[0].name, "cliprdr");
    }

    #[test]
    fn dispatch_routes_by_name() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut channels = Channels::new();
        channels.register(Box::new(Recorder {
            name: "cliprdr",
            sender: None,
            received: received.clone(),
        }));

        channels
            .dispatch("cliprdr", Bytes::from_static(b"payload"))
            .unwrap();
        channels
            .dispatch("rdpsnd", Bytes::from_static(b"elsewhere"))
            .unwrap();
        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0][..], b"payload");
    }

    #[tokio::test]
    async fn sender_packs_onto_own_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = ChannelSender {
            channel_id: 1005,
            mcs: session(),
            tx,
        };
        sender.send(b"clip").await.unwrap();

        let Some(Outbound::Frame(TpktMessage::Data(frame))) = rx.recv().await else {
            panic!("expected a data frame");
        };
        // X.224 data header, then the MCS send-data request.
        assert_eq!(&frame[..3], &[0x02, 0xF0, 0x80]);
        assert_eq!(frame[3], 25 << 2); // send-data-request
        assert_eq!(&frame[6..8], &[0x03, 0xed]); // channel 1005
    }
}

// src/output/mod.rs - Device output: transports and the output channel
pub mod channel;
pub mod transport;

pub use channel::{
    ChannelState, OutputChannel, OutputError, OutputHandle, OutputSettings, OutputStats, park_command,
};
pub use transport::{
    Connector, LoopbackConnector, LoopbackDevice, SerialConnector, Transport, TransportError, list_ports,
};

//! # SerialKit Communication
//!
//! Transports and the streaming pipeline for SerialKit.
//! Supports native serial ports, USB CDC devices, Bluetooth LE UART
//! peripherals, TCP sockets and a simulated IMU, behind one device
//! lifecycle. Includes the device registry, the paced send queue and the
//! quick-send presets.

pub mod communication;
pub mod pipeline;
pub mod quick_send;
pub mod registry;
pub mod session;

pub use communication::{
    list_ports, BluetoothDeviceInfo, BluetoothTransport, ByteReader, ByteWriter, ConnectionParams,
    Device, DeviceHandle, DeviceKind, DeviceSelector, FirstDeviceSelector, NetworkTransport,
    SerialParity, SerialPortInfo, SerialTransport, Selection, SimulatedTransport, StreamPair,
    Transport, UsbDeviceInfo, UsbTransport,
};
pub use pipeline::{DataInterceptor, InterceptorSlot, QueueItem, SendPipeline, SendPipelineConfig};
pub use quick_send::{QuickSendGroup, QuickSendItem, QuickSendKind, QuickSendStore, QuickSender};
pub use registry::ConnectionRegistry;
pub use session::Session;

//! 外部签名设备支持
//!
//! 设备通过 USB 串口链路交换单行 JSON 命令/响应。

pub mod protocol;
pub mod serial;

pub use protocol::{DeviceCommand, DeviceResponse};
pub use serial::PicoSerial;

//! 串口设备传输层
//!
//! 在任意字节流上实现单行 JSON 命令/响应协议。连接序列、
//! 超时语义和缓冲区管理都在这里收口；同一时刻最多一条命令
//! 在途（由 &mut self 保证），不做流水线。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use crate::hardware::protocol::{DeviceCommand, DeviceResponse};

#[derive(Debug)]
pub struct PicoSerial<S: AsyncRead + AsyncWrite + Send + 'static> {
    writer: Option<WriteHalf<S>>,
    reader_task: Option<JoinHandle<()>>,
    /// 后台读循环累积的响应缓冲区；只有本结构的方法会清空它
    buffer: Arc<Mutex<String>>,
    connected: bool,
    config: DeviceConfig,
}

impl PicoSerial<SerialStream> {
    /// 打开真实串口并完成连接序列
    pub async fn connect(port: &str, config: DeviceConfig) -> Result<Self, DeviceError> {
        tracing::info!(port, baud = config.baud_rate, "connecting to signing device");
        let stream = tokio_serial::new(port, config.baud_rate)
            .open_native_async()
            .map_err(|e| DeviceError::Port(e.to_string()))?;
        Self::open(stream, config).await
    }
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> PicoSerial<S> {
    /// 在已建立的字节流上完成连接序列
    ///
    /// 启动后台读循环 → 等待链路稳定 → ping 并要求 pong。
    /// 任何一步失败都会把对象拆回完全断开状态，不会半开。
    pub async fn open(stream: S, config: DeviceConfig) -> Result<Self, DeviceError> {
        let mut serial = Self::attach(stream, config);

        match serial.handshake().await {
            Ok(()) => Ok(serial),
            Err(e) => {
                serial.disconnect().await;
                Err(e)
            }
        }
    }

    fn attach(stream: S, config: DeviceConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let buffer = Arc::new(Mutex::new(String::new()));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&buffer)));

        Self {
            writer: Some(writer),
            reader_task: Some(reader_task),
            buffer,
            connected: true,
            config,
        }
    }

    async fn handshake(&mut self) -> Result<(), DeviceError> {
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        let response = self.send_command(DeviceCommand::ping()).await?;
        if response.pong == Some(true) {
            tracing::debug!("device handshake complete");
            Ok(())
        } else {
            Err(DeviceError::Handshake(
                "device did not answer ping".to_string(),
            ))
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.writer.is_some()
    }

    /// 发送一条命令并等待响应
    ///
    /// 先清空缓冲区再写出命令，之后每 poll_interval 扫描一次缓冲区，
    /// 逐行尝试解析 JSON；超时窗口内没有可解析的行即返回 Timeout，
    /// 不会编造默认响应。
    pub async fn send_command(
        &mut self,
        command: DeviceCommand,
    ) -> Result<DeviceResponse, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(DeviceError::NotConnected)?;

        self.buffer.lock().expect("buffer lock poisoned").clear();

        let frame = format!("{}\r\n", serde_json::to_string(&command)?);
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.command_timeout_ms);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let parsed = {
                let buffer = self.buffer.lock().expect("buffer lock poisoned");
                parse_response_line(&buffer)
            };
            if let Some(response) = parsed {
                self.buffer.lock().expect("buffer lock poisoned").clear();
                return Ok(response);
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(action = %command.action, "device command timed out");
                return Err(DeviceError::Timeout);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// 断开连接：取消读循环 → 关闭写端 → 释放流
    ///
    /// 每一步都容忍对应资源已经不存在，重复调用是安全的。
    pub async fn disconnect(&mut self) {
        self.connected = false;

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    // ============ 设备操作（与固件动作一一对应的薄封装） ============

    pub async fn status(&mut self) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::status()).await
    }

    pub async fn setup(&mut self, pin: &str, seed: &str) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::setup(pin, seed)).await
    }

    pub async fn unlock(&mut self, pin: &str) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::unlock(pin)).await
    }

    pub async fn lock(&mut self) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::lock()).await
    }

    pub async fn sign(&mut self, message: &str, pin: &str) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::sign(message, pin)).await
    }

    pub async fn get_seed(&mut self, pin: &str) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::get_seed(pin)).await
    }

    pub async fn reset(&mut self, pin: &str) -> Result<DeviceResponse, DeviceError> {
        self.send_command(DeviceCommand::reset(pin)).await
    }
}

/// 后台读循环：把所有到达的字节追加到共享缓冲区
async fn read_loop<S: AsyncRead + AsyncWrite>(mut reader: ReadHalf<S>, buffer: Arc<Mutex<String>>) {
    let mut chunk = [0u8; 256];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                buffer
                    .lock()
                    .expect("buffer lock poisoned")
                    .push_str(&text);
            }
            Err(_) => break,
        }
    }
}

/// 按换行切分缓冲区，返回第一条能解析成响应的行
fn parse_response_line(buffer: &str) -> Option<DeviceResponse> {
    for line in buffer.split('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(response) = serde_json::from_str::<DeviceResponse>(trimmed) {
                return Some(response);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_picks_first_valid_json_line() {
        let buffer = "garbage\r\n{\"pong\": true}\r\n";
        let response = parse_response_line(buffer).unwrap();
        assert_eq!(response.pong, Some(true));
    }

    #[test]
    fn test_parse_skips_partial_lines() {
        // 尾部还没收完整的行不应被解析
        assert!(parse_response_line("{\"pong\": tr").is_none());
        assert!(parse_response_line("").is_none());
        assert!(parse_response_line("not json at all\r\n").is_none());
    }

    #[test]
    fn test_parse_tolerates_noise_between_frames() {
        let buffer = "\x00\x00boot log line\n{\"success\": true, \"unlocked\": true}\n";
        let response = parse_response_line(buffer).unwrap();
        assert_eq!(response.unlocked, Some(true));
    }
}

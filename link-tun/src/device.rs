//! Virtual interface adapter
//!
//! [`TunDevice`] wraps exactly one of the two tunnel backends and exposes a
//! uniform `read`/`write`/`close` contract over it.
//!
//! The generic backend is opened without `IFF_NO_PI`, so the kernel delivers
//! and expects a 4-byte packet-information prefix on every frame. The adapter
//! strips that prefix on read and prepends four zero bytes on write. The
//! accelerated backend passes frames through unchanged.
//!
//! ```rust,ignore
//! let config = TunConfig::builder().backend(Backend::Generic).build()?;
//! let device = TunDevice::create(config).await?;
//!
//! let mut buf = vec![0u8; 1500 + PACKET_INFO_LEN];
//! let n = device.read(&mut buf).await?;
//! device.write(&buf[..n]).await?;
//! ```

use std::io;

use async_trait::async_trait;

use crate::config::{Backend, TunConfig};
use crate::error::{Error, Result};
use crate::PACKET_INFO_LEN;

/// Information about a TUN device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Interface name
    pub name: String,
    /// MTU
    pub mtu: u16,
}

/// Raw frame I/O over an underlying tunnel handle
///
/// One call moves exactly one frame. Implementations must be usable from
/// concurrent reader and writer tasks.
#[async_trait]
pub trait FrameIo: Send + Sync {
    /// Receive one frame into `buf`
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one frame
    async fn send_frame(&self, buf: &[u8]) -> io::Result<usize>;

    /// Release the underlying handle
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FrameIo for tun_rs::AsyncDevice {
    async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).await
    }

    async fn send_frame(&self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).await
    }
}

/// Handle of the generic backend; frames carry a packet-information prefix
pub struct GenericTun {
    io: Box<dyn FrameIo>,
    info: DeviceInfo,
}

/// Handle of the accelerated backend; frames are passed through
pub struct AcceleratedTun {
    io: Box<dyn FrameIo>,
    info: DeviceInfo,
}

/// Virtual interface adapter over exactly one tunnel backend
pub enum TunDevice {
    Generic(GenericTun),
    Accelerated(AcceleratedTun),
}

impl TunDevice {
    /// Create a new TUN device with the backend selected by `config`
    ///
    /// # Platform Requirements
    ///
    /// - **Linux**: Requires root or `CAP_NET_ADMIN` capability
    /// - **macOS**: Requires root privileges; generic backend unavailable
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        match config.backend {
            Backend::Generic => Self::create_generic(&config),
            Backend::Accelerated => Self::create_accelerated(&config),
        }
    }

    #[cfg(target_os = "linux")]
    fn create_generic(config: &TunConfig) -> Result<Self> {
        let (io, name) = crate::linux::open_packet_info_tun(config.name.as_deref())?;

        log::info!("Created generic TUN device: {} (MTU: {})", name, config.mtu);

        Ok(Self::generic(
            Box::new(io),
            DeviceInfo {
                name,
                mtu: config.mtu,
            },
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn create_generic(_config: &TunConfig) -> Result<Self> {
        Err(Error::NotSupported(
            "generic TUN backend is only available on Linux".into(),
        ))
    }

    fn create_accelerated(config: &TunConfig) -> Result<Self> {
        let mut builder = tun_rs::DeviceBuilder::new();

        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }

        builder = builder.mtu(config.mtu);

        let device = builder
            .build_async()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        let name = device
            .name()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        log::info!("Created accelerated TUN device: {} (MTU: {})", name, config.mtu);

        Ok(Self::accelerated(
            Box::new(device),
            DeviceInfo {
                name,
                mtu: config.mtu,
            },
        ))
    }

    /// Wrap a handle whose frames carry the packet-information prefix
    pub fn generic(io: Box<dyn FrameIo>, info: DeviceInfo) -> Self {
        TunDevice::Generic(GenericTun { io, info })
    }

    /// Wrap a handle whose frames are raw packets
    pub fn accelerated(io: Box<dyn FrameIo>, info: DeviceInfo) -> Self {
        TunDevice::Accelerated(AcceleratedTun { io, info })
    }

    /// Which backend this adapter wraps
    pub fn backend(&self) -> Backend {
        match self {
            TunDevice::Generic(_) => Backend::Generic,
            TunDevice::Accelerated(_) => Backend::Accelerated,
        }
    }

    /// Get device information
    pub fn info(&self) -> &DeviceInfo {
        match self {
            TunDevice::Generic(dev) => &dev.info,
            TunDevice::Accelerated(dev) => &dev.info,
        }
    }

    /// Get the device name
    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// Get the MTU
    pub fn mtu(&self) -> u16 {
        self.info().mtu
    }

    /// Read one packet into `buf`
    ///
    /// For the generic backend `buf` must have room for the
    /// [`PACKET_INFO_LEN`]-byte prefix in addition to the packet. A frame
    /// shorter than the prefix yields [`Error::ShortFrame`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            TunDevice::Generic(dev) => {
                let n = dev.io.recv_frame(buf).await?;
                if n < PACKET_INFO_LEN {
                    return Err(Error::ShortFrame(n));
                }
                buf.copy_within(PACKET_INFO_LEN..n, 0);
                Ok(n - PACKET_INFO_LEN)
            }
            TunDevice::Accelerated(dev) => Ok(dev.io.recv_frame(buf).await?),
        }
    }

    /// Write one packet, returning the number of payload bytes written
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            TunDevice::Generic(dev) => {
                let mut frame = Vec::with_capacity(PACKET_INFO_LEN + buf.len());
                frame.extend_from_slice(&[0u8; PACKET_INFO_LEN]);
                frame.extend_from_slice(buf);
                let n = dev.io.send_frame(&frame).await?;
                Ok(n.saturating_sub(PACKET_INFO_LEN))
            }
            TunDevice::Accelerated(dev) => Ok(dev.io.send_frame(buf).await?),
        }
    }

    /// Close whichever handle backs the adapter
    pub fn close(self) -> Result<()> {
        let (io, info) = match self {
            TunDevice::Generic(dev) => (dev.io, dev.info),
            TunDevice::Accelerated(dev) => (dev.io, dev.info),
        };
        io.close()?;
        log::debug!("Closed TUN device: {}", info.name);
        Ok(())
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice")
            .field("backend", &self.backend())
            .field("info", self.info())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Frame device that records sent frames and replays queued ones
    #[derive(Default)]
    struct QueueFrames {
        inbound: Mutex<VecDeque<Vec<u8>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl FrameIo for QueueFrames {
        async fn recv_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
            let frame = self
                .inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }

        async fn send_frame(&self, buf: &[u8]) -> io::Result<usize> {
            self.sent.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }
    }

    fn info() -> DeviceInfo {
        DeviceInfo {
            name: "tun7".into(),
            mtu: 1420,
        }
    }

    #[tokio::test]
    async fn test_generic_read_strips_prefix() {
        let frames = QueueFrames::default();
        frames
            .inbound
            .lock()
            .unwrap()
            .push_back(vec![0, 0, 8, 0, 0x45, 1, 2, 3]);
        let device = TunDevice::generic(Box::new(frames), info());

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x45, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_generic_write_prepends_zero_prefix() {
        let frames = QueueFrames::default();
        let sent = frames.sent.clone();
        let device = TunDevice::generic(Box::new(frames), info());

        let n = device.write(&[0x45, 9, 9]).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(sent.lock().unwrap()[0], vec![0, 0, 0, 0, 0x45, 9, 9]);
    }

    #[tokio::test]
    async fn test_generic_short_frame_is_eof() {
        let frames = QueueFrames::default();
        frames.inbound.lock().unwrap().push_back(vec![0, 0, 8]);
        let device = TunDevice::generic(Box::new(frames), info());

        let mut buf = [0u8; 64];
        let err = device.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::ShortFrame(3)));
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_accelerated_is_pass_through() {
        let frames = QueueFrames::default();
        frames.inbound.lock().unwrap().push_back(vec![0x60, 0, 0, 0, 7]);
        let sent = frames.sent.clone();
        let device = TunDevice::accelerated(Box::new(frames), info());

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x60, 0, 0, 0, 7]);

        device.write(&[1, 2]).await.unwrap();
        assert_eq!(sent.lock().unwrap()[0], vec![1, 2]);
    }

    #[test]
    fn test_backend_tag_and_close() {
        let device = TunDevice::accelerated(Box::new(QueueFrames::default()), info());
        assert_eq!(device.backend(), Backend::Accelerated);
        assert_eq!(device.name(), "tun7");
        device.close().unwrap();

        let device = TunDevice::generic(Box::new(QueueFrames::default()), info());
        assert_eq!(device.backend(), Backend::Generic);
        device.close().unwrap();
    }
}

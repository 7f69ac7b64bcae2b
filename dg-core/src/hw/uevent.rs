//! Kernel uevent notification source
//!
//! Listens on a `NETLINK_KOBJECT_UEVENT` socket from a dedicated reader
//! thread. Each uevent for one of the watched interest classes is turned into
//! a [`DeviceEvent`] and enqueued; no policy work happens on this thread.

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use kobject_uevent::{ActionType, UEvent};
use nix::errno::Errno;
use nix::poll::{self, PollFd, PollFlags, PollTimeout};
use nix::sys::socket;
use tracing::{debug, error, trace, warn};

use super::sysfs::{interest_class, SysfsHost};
use super::{DeviceTree, NotificationSource, PropertyKey, PropertyStore};
use crate::constants::{limits, timing};
use crate::data::{DeviceAction, DeviceEvent, Guid};
use crate::error::{DevgateError, Result};
use crate::pipeline::EventSender;

const READER_THREAD_NAME: &str = "devgate-uevent";

/// Multicast group of uevents sent by the kernel itself (not udev)
const KERNEL_UEVENT_GROUP: u32 = 1;

const DEVTYPE_KEY: &str = "DEVTYPE";

fn netlink_error(context: &str, e: Errno) -> DevgateError {
    DevgateError::Netlink(format!("{}: {}", context, e))
}

struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    fn open() -> Result<Self> {
        let fd = socket::socket(
            socket::AddressFamily::Netlink,
            socket::SockType::Datagram,
            socket::SockFlag::SOCK_NONBLOCK | socket::SockFlag::SOCK_CLOEXEC,
            socket::SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(|e| netlink_error("socket", e))?;
        socket::setsockopt(&fd, socket::sockopt::RcvBuf, &limits::UEVENT_BUF_SIZE)
            .map_err(|e| netlink_error("SO_RCVBUF", e))?;
        socket::setsockopt(&fd, socket::sockopt::PassCred, &true).map_err(|e| netlink_error("SO_PASSCRED", e))?;

        let addr = socket::NetlinkAddr::new(0, KERNEL_UEVENT_GROUP);
        socket::bind(fd.as_raw_fd(), &addr).map_err(|e| netlink_error("bind", e))?;
        Ok(Self { fd })
    }

    /// Wait up to the poll interval; `Ok(false)` on timeout or interruption
    fn wait_readable(&self) -> Result<bool> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll::poll(&mut fds, PollTimeout::from(timing::UEVENT_POLL_INTERVAL_MS)) {
            Ok(0) | Err(Errno::EINTR) => Ok(false),
            Ok(_) => Ok(fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN))),
            Err(e) => Err(netlink_error("poll", e)),
        }
    }

    fn recv(&self, buffer: &mut [u8]) -> std::result::Result<usize, Errno> {
        socket::recv(self.fd.as_raw_fd(), buffer, socket::MsgFlags::empty())
    }
}

/// Kernel action to pipeline action
pub(crate) fn map_action(action: &ActionType) -> DeviceAction {
    match action {
        ActionType::Add => DeviceAction::Arrival,
        ActionType::Remove => DeviceAction::Removal,
        ActionType::Change | ActionType::Move | ActionType::Bind | ActionType::Unbind => DeviceAction::NodeChange,
        _ => DeviceAction::Unknown,
    }
}

/// Interface path and class remembered for a present devpath
struct KnownInterface {
    path: String,
    class: Guid,
}

/// Turns uevents into device events with stable interface paths
///
/// The interface path is computed from sysfs while the device exists and
/// remembered per devpath, so the removal event carries the same path as the
/// arrival even though the sysfs directory is already gone.
struct Translator {
    host: Arc<SysfsHost>,
    classes: Vec<Guid>,
    known: HashMap<String, KnownInterface>,
}

impl Translator {
    fn new(host: Arc<SysfsHost>, classes: &[Guid]) -> Self {
        Self {
            host,
            classes: classes.to_vec(),
            known: HashMap::new(),
        }
    }

    /// Remember paths of devices that were present before we started listening
    fn prime(&mut self) {
        for class in &self.classes {
            let nodes = match self.host.interfaces(class) {
                Ok(nodes) => nodes,
                Err(e) => {
                    debug!(class = %class, "Cannot list present interfaces: {}", e);
                    continue;
                }
            };
            for node in nodes {
                if let Some(path) = self.host.property(node, PropertyKey::InterfacePath).and_then(|v| v.into_string()) {
                    self.known.insert(self.host.node_name(node), KnownInterface { path, class: *class });
                }
            }
        }
        debug!(count = self.known.len(), "Primed uevent path cache");
    }

    fn translate(
        &mut self,
        action: DeviceAction,
        subsystem: &str,
        devtype: Option<&str>,
        devpath: &str,
    ) -> Option<DeviceEvent> {
        let class = interest_class(subsystem, devtype, devpath)?;
        if !self.classes.contains(&class) {
            return None;
        }

        let path = match action {
            DeviceAction::Removal => {
                self.host.forget_devpath(devpath);
                self.known.remove(devpath).map(|known| known.path)
            }
            DeviceAction::Arrival => self.refresh(devpath, class),
            DeviceAction::NodeChange => self.cached(devpath).or_else(|| self.refresh(devpath, class)),
            DeviceAction::Unknown => self.cached(devpath),
        };

        match path {
            Some(path) => Some(DeviceEvent::new(action, path, class)),
            None => {
                trace!(devpath, %action, "No interface path for uevent");
                None
            }
        }
    }

    fn cached(&self, devpath: &str) -> Option<String> {
        self.known.get(devpath).map(|known| known.path.clone())
    }

    fn refresh(&mut self, devpath: &str, class: Guid) -> Option<String> {
        let path = self.host.interface_path_for_devpath(devpath)?;
        self.known.insert(
            devpath.to_string(),
            KnownInterface {
                path: path.clone(),
                class,
            },
        );
        Some(path)
    }

    /// Catch up after the kernel dropped events (ENOBUFS)
    ///
    /// Every remembered device whose directory is gone gets a removal event,
    /// and its cached path and node tokens are dropped.
    fn resync(&mut self) -> Vec<DeviceEvent> {
        let vanished: Vec<String> = self
            .known
            .keys()
            .filter(|devpath| !self.host.is_present(devpath))
            .cloned()
            .collect();

        let removals: Vec<DeviceEvent> = vanished
            .iter()
            .filter_map(|devpath| self.known.remove(devpath))
            .map(|known| DeviceEvent::new(DeviceAction::Removal, known.path, known.class))
            .collect();
        let forgotten = self.host.forget_missing();
        debug!(removals = removals.len(), forgotten, "Resynced after dropped uevents");
        removals
    }
}

fn reader_loop(socket: UeventSocket, mut translator: Translator, sink: EventSender, shutdown: Arc<AtomicBool>) {
    let mut buffer = vec![0u8; limits::UEVENT_BUF_SIZE];
    debug!("uevent reader started");

    while !shutdown.load(Ordering::Acquire) {
        match socket.wait_readable() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                error!("uevent reader stopping: {}", e);
                break;
            }
        }

        let count = match socket.recv(&mut buffer) {
            Ok(0) | Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
            Ok(count) => count,
            Err(Errno::ENOBUFS) => {
                warn!("uevent receive buffer overflowed, events were dropped");
                for event in translator.resync() {
                    sink.enqueue(event);
                }
                continue;
            }
            Err(e) => {
                warn!("uevent recv failed: {}", e);
                continue;
            }
        };

        let uevent = match UEvent::from_netlink_packet(&buffer[..count]) {
            Ok(uevent) => uevent,
            Err(e) => {
                trace!("Skipping unparsable netlink packet: {}", e);
                continue;
            }
        };

        let devpath = uevent.devpath.to_string_lossy();
        let devtype = uevent.env.get(DEVTYPE_KEY).map(String::as_str);
        if let Some(event) = translator.translate(map_action(&uevent.action), &uevent.subsystem, devtype, &devpath) {
            sink.enqueue(event);
        }
    }
    debug!("uevent reader stopped");
}

/// Netlink-based [`NotificationSource`]
pub struct UeventMonitor {
    host: Arc<SysfsHost>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UeventMonitor {
    pub fn new(host: Arc<SysfsHost>) -> Self {
        Self {
            host,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl NotificationSource for UeventMonitor {
    fn start(&mut self, classes: &[Guid], sink: EventSender) -> Result<()> {
        if self.thread.is_some() {
            return Err(DevgateError::generic("uevent monitor already running"));
        }

        let socket = UeventSocket::open()?;
        let mut translator = Translator::new(Arc::clone(&self.host), classes);
        translator.prime();

        self.shutdown.store(false, Ordering::Release);
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || reader_loop(socket, translator, sink, shutdown))
            .map_err(|e| DevgateError::startup(format!("cannot spawn uevent reader: {}", e)))?;

        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("uevent reader panicked");
            }
        }
    }
}

impl Drop for UeventMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

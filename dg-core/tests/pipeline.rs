//! End-to-end pipeline tests over an in-memory host

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dg_core::constants::{events, interface};
use dg_core::{
    AuditLevel, AuditSink, DevNode, DeviceAction, DeviceEvent, DeviceIdentity, DeviceTree,
    DevgateError, EventQueue, Guid, PolicyAction, PolicyEngine, PolicyEntry, PolicySnapshot, PropertyKey,
    PropertyStore, PropertyValue, Result, Worker,
};

struct FakeNode {
    class: Guid,
    path: String,
    container: Guid,
    parent: Option<u64>,
    class_name: &'static str,
    name: String,
}

#[derive(Default)]
struct FakeHost {
    nodes: Mutex<HashMap<u64, FakeNode>>,
    disabled: Mutex<Vec<DevNode>>,
    refuse_disable: bool,
}

impl FakeHost {
    fn add(&self, id: u64, node: FakeNode) {
        self.nodes.lock().unwrap().insert(id, node);
    }

    fn disabled(&self) -> Vec<DevNode> {
        self.disabled.lock().unwrap().clone()
    }
}

impl PropertyStore for FakeHost {
    fn interfaces(&self, class: &Guid) -> Result<Vec<DevNode>> {
        let nodes = self.nodes.lock().unwrap();
        let mut ids: Vec<u64> = nodes.iter().filter(|(_, n)| n.class == *class).map(|(id, _)| *id).collect();
        ids.sort();
        Ok(ids.into_iter().map(DevNode::from_raw).collect())
    }

    fn property(&self, node: DevNode, key: PropertyKey) -> Option<PropertyValue> {
        let nodes = self.nodes.lock().unwrap();
        let n = nodes.get(&node.raw())?;
        match key {
            PropertyKey::InterfacePath => Some(PropertyValue::String(n.path.clone())),
            PropertyKey::ContainerId => Some(PropertyValue::Guid(n.container)),
            PropertyKey::FriendlyName => Some(PropertyValue::String(n.name.clone())),
            PropertyKey::Class => Some(PropertyValue::String(n.class_name.to_string())),
            PropertyKey::Manufacturer | PropertyKey::DeviceDescription => None,
        }
    }
}

impl DeviceTree for FakeHost {
    fn parent(&self, node: DevNode) -> Option<DevNode> {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(&node.raw())?.parent.map(DevNode::from_raw)
    }

    fn disable(&self, node: DevNode, _persist: bool) -> Result<()> {
        if self.refuse_disable {
            return Err(DevgateError::NotDisableable(node.to_string()));
        }
        self.disabled.lock().unwrap().push(node);
        Ok(())
    }

    fn enable(&self, _node: DevNode) -> Result<()> {
        Ok(())
    }

    fn reenumerate(&self, _node: DevNode) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAudit {
    records: Mutex<Vec<(AuditLevel, u32, String)>>,
}

impl RecordingAudit {
    fn ids(&self) -> Vec<u32> {
        self.records.lock().unwrap().iter().map(|(_, id, _)| *id).collect()
    }

    fn messages(&self, event_id: u32) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, id, _)| *id == event_id)
            .map(|(_, _, m)| m.clone())
            .collect()
    }

    fn wait_for(&self, event_id: u32, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.messages(event_id).len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, level: AuditLevel, event_id: u32, message: &str) {
        self.records.lock().unwrap().push((level, event_id, message.to_string()));
    }
}

const STICK: Guid = Guid::from_u128(0x5A4D_0001);
const STICK_USB: &str = "USB#VID_0781&PID_5567#4C530001230612116424#/devices/usb1/1-2";
const STICK_DISK: &str = "USBSTOR#VID_0781&PID_5567#4C530001230612116424#/devices/usb1/1-2/1-2:1.0/block/sda";
const STICK_HID: &str = "HID#MI_01#7&1b2c&0#/devices/usb1/1-2/1-2:1.1/hidraw/hidraw0";

/// SanDisk stick exposing a USB device (10), a disk (11) and a HID function (12)
fn composite_host(refuse_disable: bool) -> Arc<FakeHost> {
    let host = FakeHost {
        refuse_disable,
        ..Default::default()
    };
    host.add(
        1,
        FakeNode {
            class: Guid::NIL,
            path: String::new(),
            container: Guid::from_u128(0xB0B),
            parent: None,
            class_name: "USB",
            name: "Root hub".to_string(),
        },
    );
    host.add(
        10,
        FakeNode {
            class: interface::USB_DEVICE,
            path: STICK_USB.to_string(),
            container: STICK,
            parent: Some(1),
            class_name: "USB",
            name: "Cruzer Blade".to_string(),
        },
    );
    host.add(
        11,
        FakeNode {
            class: interface::DISK,
            path: STICK_DISK.to_string(),
            container: STICK,
            parent: Some(10),
            class_name: "DiskDrive",
            name: "SanDisk Cruzer Blade".to_string(),
        },
    );
    host.add(
        12,
        FakeNode {
            class: interface::HID,
            path: STICK_HID.to_string(),
            container: STICK,
            parent: Some(10),
            class_name: "HIDClass",
            name: "Cruzer Blade HID".to_string(),
        },
    );
    Arc::new(host)
}

fn worker(host: &Arc<FakeHost>, engine: &Arc<PolicyEngine>, audit: &Arc<RecordingAudit>) -> (EventQueue, Worker) {
    let queue = EventQueue::new();
    let platform: Arc<FakeHost> = Arc::clone(host);
    let sink: Arc<RecordingAudit> = Arc::clone(audit);
    let worker = Worker::new(queue.clone(), platform, Arc::clone(engine), sink, false);
    (queue, worker)
}

#[test]
fn test_blacklisted_stick_is_blocked_at_container_root() {
    let host = composite_host(false);
    let engine = Arc::new(PolicyEngine::new());
    engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Block, PolicyAction::Block);
    let audit = Arc::new(RecordingAudit::default());
    let (_queue, worker) = worker(&host, &engine, &audit);

    worker.handle(&DeviceEvent::new(DeviceAction::Arrival, STICK_DISK, interface::DISK));
    assert_eq!(host.disabled(), vec![DevNode::from_raw(10)]);
    assert_eq!(engine.snapshot().blocked, vec![STICK]);
    assert_eq!(engine.rule_scan_count(), 1);

    // The HID path carries no vendor id; only the sticky decision can block it
    worker.handle(&DeviceEvent::new(DeviceAction::NodeChange, STICK_HID, interface::HID));
    assert_eq!(engine.rule_scan_count(), 1);
    assert_eq!(host.disabled().len(), 2);
    assert_eq!(engine.snapshot().ref_counts.get(&STICK), Some(&2));
    assert_eq!(audit.messages(events::DEVICE_BLOCKED).len(), 2);
}

#[test]
fn test_whitelisted_serial_stays_enabled() {
    let host = composite_host(false);
    let engine = Arc::new(PolicyEngine::new());
    engine.load(vec![PolicyEntry::serial("4c530001230612116424")], vec![], PolicyAction::Block, PolicyAction::Block);
    let audit = Arc::new(RecordingAudit::default());
    let (_queue, worker) = worker(&host, &engine, &audit);

    worker.handle(&DeviceEvent::new(DeviceAction::Arrival, STICK_USB, interface::USB_DEVICE));
    assert!(host.disabled().is_empty());
    assert_eq!(engine.snapshot().allowed, vec![STICK]);
    assert_eq!(audit.ids(), vec![events::DEVICE_CONNECTED, events::DEVICE_ALLOWED]);
}

#[test]
fn test_unknown_removal_changes_nothing() {
    let host = composite_host(false);
    let engine = Arc::new(PolicyEngine::new());
    let audit = Arc::new(RecordingAudit::default());
    let (_queue, worker) = worker(&host, &engine, &audit);

    worker.handle(&DeviceEvent::new(DeviceAction::Removal, "USB#never#seen#/devices/x", interface::USB_DEVICE));
    assert_eq!(engine.snapshot(), PolicySnapshot::default());
    assert!(audit.ids().is_empty());
}

#[test]
fn test_removal_of_every_interface_forgets_container() {
    let host = composite_host(false);
    let engine = Arc::new(PolicyEngine::new());
    engine.load(vec![PolicyEntry::vendor("0781")], vec![], PolicyAction::Block, PolicyAction::Block);
    let audit = Arc::new(RecordingAudit::default());
    let (_queue, worker) = worker(&host, &engine, &audit);

    for (path, class) in [(STICK_USB, interface::USB_DEVICE), (STICK_DISK, interface::DISK), (STICK_HID, interface::HID)] {
        worker.handle(&DeviceEvent::new(DeviceAction::Arrival, path, class));
    }
    assert_eq!(engine.snapshot().ref_counts.get(&STICK), Some(&3));

    for (path, class) in [(STICK_HID, interface::HID), (STICK_DISK, interface::DISK), (STICK_USB, interface::USB_DEVICE)] {
        worker.handle(&DeviceEvent::new(DeviceAction::Removal, path, class));
    }
    assert!(engine.snapshot().is_forgotten(&STICK));
    assert_eq!(audit.messages(events::DEVICE_DISCONNECTED).len(), 3);
}

#[test]
fn test_refused_disable_does_not_stop_processing() {
    let host = composite_host(true);
    let engine = Arc::new(PolicyEngine::new());
    engine.load(vec![], vec![PolicyEntry::vendor("0781")], PolicyAction::Audit, PolicyAction::Block);
    let audit = Arc::new(RecordingAudit::default());
    let (queue, worker) = worker(&host, &engine, &audit);
    let handle = worker.spawn().unwrap();

    let sender = queue.sender();
    sender.enqueue(DeviceEvent::new(DeviceAction::Arrival, STICK_DISK, interface::DISK));
    sender.enqueue(DeviceEvent::new(DeviceAction::Arrival, "HID#VID_046D&PID_C52B#x#/devices/usb3/3-1", interface::HID));

    assert!(audit.wait_for(events::DEVICE_AUDITED, 1));
    handle.stop_and_join();

    let blocked = audit.messages(events::DEVICE_BLOCKED);
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].contains("disable failed"));
}

#[test]
fn test_burst_is_processed_in_order() {
    let host = Arc::new(FakeHost::default());
    for n in 0..25u64 {
        host.add(
            100 + n,
            FakeNode {
                class: interface::HID,
                path: format!("HID#VID_1A2B&PID_{:04X}#inst{}#/devices/usb2/2-{}", n, n, n),
                container: Guid::from_u128(1000 + n as u128),
                parent: None,
                class_name: "HIDClass",
                name: format!("device-{:02}", n),
            },
        );
    }
    let engine = Arc::new(PolicyEngine::new());
    engine.load(vec![], vec![], PolicyAction::Audit, PolicyAction::Block);
    let audit = Arc::new(RecordingAudit::default());
    let (queue, worker) = worker(&host, &engine, &audit);

    let sender = queue.sender();
    for n in 0..25u64 {
        let path = format!("HID#VID_1A2B&PID_{:04X}#inst{}#/devices/usb2/2-{}", n, n, n);
        sender.enqueue(DeviceEvent::new(DeviceAction::Arrival, path, interface::HID));
    }

    let handle = worker.spawn().unwrap();
    assert!(audit.wait_for(events::DEVICE_AUDITED, 25));
    handle.stop_and_join();

    let audited = audit.messages(events::DEVICE_AUDITED);
    for (n, message) in audited.iter().enumerate() {
        assert!(message.contains(&format!("device-{:02}", n)), "out of order at {}: {}", n, message);
    }
}

#[test]
fn test_stop_takes_priority_over_queued_events() {
    let host = composite_host(false);
    let engine = Arc::new(PolicyEngine::new());
    let audit = Arc::new(RecordingAudit::default());
    let (queue, worker) = worker(&host, &engine, &audit);

    queue.sender().enqueue(DeviceEvent::new(DeviceAction::Arrival, STICK_DISK, interface::DISK));
    queue.stop_handle().stop();

    let handle = worker.spawn().unwrap();
    handle.stop_and_join();

    assert!(audit.ids().is_empty());
    assert!(host.disabled().is_empty());
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_evaluate_never_sees_half_loaded_rules() {
    let engine = Arc::new(PolicyEngine::new());
    let identity = DeviceIdentity {
        device_path: "HID#VID_1111&PID_2222#x#/devices/usb1/1-9".to_string(),
        vid: "1111".to_string(),
        pid: "2222".to_string(),
        ..Default::default()
    };

    // Set A allows the device, set B audits it. Any other outcome means a
    // lookup mixed the rule lists of one set with the actions of the other.
    let load_a = |engine: &PolicyEngine| {
        engine.load(
            vec![PolicyEntry::vendor("1111")],
            vec![PolicyEntry::new("1111", "9999", "")],
            PolicyAction::Block,
            PolicyAction::Block,
        );
    };
    let load_b = |engine: &PolicyEngine| {
        engine.load(vec![], vec![PolicyEntry::new("1111", "2222", "")], PolicyAction::Block, PolicyAction::Audit);
    };
    load_a(&engine);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let identity = identity.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    let action = engine.evaluate(&identity);
                    assert!(
                        matches!(action, PolicyAction::Allow | PolicyAction::Audit),
                        "mixed rule set produced {:?}",
                        action
                    );
                }
            })
        })
        .collect();

    for round in 0..500 {
        if round % 2 == 0 {
            load_b(&engine);
        } else {
            load_a(&engine);
        }
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.snapshot(), PolicySnapshot::default());
}

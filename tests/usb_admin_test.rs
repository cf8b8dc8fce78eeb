#![cfg(test)]

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use cascade::{
    cascade_core::{AdminStatus, FeatureId, Opcode, TransportCmd},
    cascade_if::{Device, Topology},
    cascade_ref::Transport,
    cascade_usb::{
        Reply, ScriptedHost, UrbRequest, UrbResult, UsbDevice, UsbTimeouts, MEMX_FW_IN_EP,
        MEMX_FW_OUT_EP, MEMX_IN_EP, MEMX_OUT_EP,
    },
};
use serial_test::serial;

/// Admin and data traffic through the usb transport, with the host controller scripted.
fn board(
    timeouts: UsbTimeouts,
    handler: impl Fn(&UrbRequest) -> Reply + Send + Sync + 'static,
) -> (Arc<Device>, Arc<ScriptedHost>) {
    let host = Arc::new(ScriptedHost::new(handler));
    let usb = UsbDevice::new(0, host.clone(), timeouts);
    let device = Device::new(0, Box::new(Transport::Usb(usb)), Topology::new(Default::default(), 2));
    (Arc::new(device), host)
}

fn u32_at(bytes: &[u8], index: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    u32::from_le_bytes(word)
}

#[test]
#[serial]
fn silent_firmware_times_out_and_kills_the_transfer() {
    let timeouts = UsbTimeouts {
        admin: Duration::from_millis(100),
        ..Default::default()
    };
    let (device, host) = board(timeouts, |request| {
        if request.endpoint == MEMX_FW_IN_EP {
            return Reply::Hang;
        }
        Reply::sent(request)
    });

    let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Frequency);
    let start = Instant::now();
    assert!(device.admin_command(&mut cmd).is_err());
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(host.killed(), vec![MEMX_FW_IN_EP]);
}

#[test]
#[serial]
fn i2c_reply_is_read_back_from_chip0() {
    let last = Mutex::new(Vec::new());
    let (device, host) = board(UsbTimeouts::default(), move |request| {
        match request.endpoint {
            MEMX_FW_OUT_EP => {
                if request.data.len() == 132 {
                    *last.lock().unwrap() = request.data.clone();
                }
                Reply::sent(request)
            }
            // the debug read of the i2c reply asks for exactly one record
            MEMX_FW_IN_EP if request.length == 132 => {
                let mut reply = TransportCmd::feature(Opcode::SetFeature, FeatureId::I2cTransceive)
                    .with_params(&[0x50, 0x2, 0x10, 0x99]);
                reply.cq.data[0] = 0xab;
                Reply::received(reply.as_bytes().to_vec())
            }
            _ => Reply::received(last.lock().unwrap().clone()),
        }
    });

    let mut cmd = TransportCmd::feature(Opcode::DevIoCtrl, FeatureId::I2cTransceive)
        .with_params(&[0x50, 0x2, 0x10, 0x20]);
    device.admin_command(&mut cmd).unwrap();

    assert_eq!(cmd.status(), AdminStatus::NO_ERROR);
    assert_eq!(cmd.cq.data[0], 0xab);
    // the parameters come from the record the firmware left, not from the request
    assert_eq!(&cmd.cq.data[3..7], &[0x50, 0x2, 0x10, 0x99]);

    // the command itself went out as a set feature
    let requests = host.requests();
    let body = requests
        .iter()
        .find(|r| r.endpoint == MEMX_FW_OUT_EP && r.data.len() == 132)
        .unwrap();
    assert_eq!(u32_at(&body.data, 0) & 0xffff, Opcode::SetFeature as u32);
}

#[test]
#[serial]
fn dfp_fan_out_is_not_offered_over_usb() {
    let (device, host) = board(UsbTimeouts::default(), |request| Reply::sent(request));

    let mut cmd = TransportCmd::new(Opcode::DownloadDfp, 0);
    assert!(device.admin_command(&mut cmd).is_err());
    assert!(host.requests().is_empty());
}

#[test]
#[serial]
fn abort_releases_a_blocked_reader() {
    let (device, host) = board(UsbTimeouts::default(), |request| {
        if request.endpoint == MEMX_IN_EP {
            return Reply::Hang;
        }
        Reply::sent(request)
    });

    let reader = {
        let device = device.clone();
        std::thread::spawn(move || device.read().map_err(|err| err.to_string()))
    };
    std::thread::sleep(Duration::from_millis(50));
    device.abort_read();

    assert!(reader.join().unwrap().is_err());
    assert!(host.unlinked().contains(&MEMX_IN_EP));
}

#[test]
#[serial]
fn data_transfers_start_while_an_admin_command_is_in_flight() {
    let (device, host) = board(UsbTimeouts::default(), |request| match request.endpoint {
        MEMX_FW_IN_EP => Reply::Delay(
            Duration::from_millis(300),
            UrbResult::Received(
                TransportCmd::feature(Opcode::GetFeature, FeatureId::Frequency)
                    .as_bytes()
                    .to_vec(),
            ),
        ),
        MEMX_IN_EP => Reply::received(vec![7u8; 1024]),
        _ => Reply::sent(request),
    });

    let admin = {
        let device = device.clone();
        std::thread::spawn(move || {
            let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Frequency);
            device
                .admin_command(&mut cmd)
                .map(|_| cmd.status())
                .map_err(|err| err.to_string())
        })
    };
    std::thread::sleep(Duration::from_millis(50));

    let writer = {
        let device = device.clone();
        std::thread::spawn(move || device.write(&[1u8; 4096]).map_err(|err| err.to_string()))
    };
    std::thread::sleep(Duration::from_millis(50));

    // the bulk transfer went out before the admin reply arrived
    assert!(!admin.is_finished());
    assert!(host.requests().iter().any(|r| r.endpoint == MEMX_OUT_EP));

    assert_eq!(admin.join().unwrap().unwrap(), AdminStatus::NO_ERROR);
    assert_eq!(writer.join().unwrap().unwrap(), 4096);
    assert_eq!(device.read().unwrap().len(), 1024);

    let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Throughput);
    device.admin_command(&mut cmd).unwrap();
    assert_eq!(cmd.cq.data[1], 4);
    assert_eq!(cmd.cq.data[3], 1);
}

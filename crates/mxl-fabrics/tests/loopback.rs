//! Loopback round-trip: initiator and target on 127.0.0.1, target info
//! carried as a copy/pasteable string, reader contract preserved end to end.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use mxl_core::{DataFormat, Error, Rational};
use mxl_fabrics::{
    EndpointAddress, Initiator, InitiatorConfig, Provider, Target, TargetConfig, TargetInfo,
};
use mxl_shm::{AccessMode, FlowManager, FlowReader, FlowWriter};
use uuid::Uuid;

const DESCRIPTOR: &str = r#"{"format":"video","label":"fabric loopback"}"#;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const GRAIN_COUNT: u64 = 5;
const GRAIN_SIZE: usize = 1024;

fn make_flow(manager: &FlowManager, id: Uuid) -> mxl_shm::DiscreteFlowData {
    manager
        .create_discrete_flow(
            id,
            DESCRIPTOR,
            DataFormat::Video,
            GRAIN_COUNT,
            Rational::new(50, 1),
            GRAIN_SIZE,
        )
        .unwrap()
}

fn loopback_endpoint() -> EndpointAddress {
    EndpointAddress::new("127.0.0.1", "0")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grain_round_trip_over_loopback() {
    let id = Uuid::new_v4();

    // "Host A": the source flow and its local writer.
    let domain_a = tempfile::tempdir().unwrap();
    let manager_a = FlowManager::new(domain_a.path()).unwrap();
    let source_flow = make_flow(&manager_a, id);

    // "Host B": the mirrored flow behind a fabric target.
    let domain_b = tempfile::tempdir().unwrap();
    let manager_b = FlowManager::new(domain_b.path()).unwrap();
    let mirror_flow = make_flow(&manager_b, id);

    let target = Target::setup(
        mirror_flow,
        TargetConfig {
            endpoint: loopback_endpoint(),
            provider: Provider::Tcp,
        },
    )
    .await
    .unwrap();

    // The target info travels as text and parses back identically.
    let info_text = target.info().to_string();
    let parsed: TargetInfo = info_text.parse().unwrap();
    assert_eq!(&parsed, target.info());
    assert_eq!(parsed.flow_id, id);
    assert_eq!(parsed.region.grain_count, GRAIN_COUNT);

    let initiator = Initiator::setup(InitiatorConfig {
        endpoint: loopback_endpoint(),
        provider: Provider::Auto, // resolves to tcp, matching the target
    })
    .await
    .unwrap();

    let (ack_tx, ack_rx) = mpsc::channel();
    initiator.set_completion_callback(move |index| {
        let _ = ack_tx.send(index);
    });
    initiator.add_target(&parsed).await.unwrap();
    assert_eq!(initiator.target_count(), 1);

    let (commit_tx, commit_rx) = mpsc::channel();
    target.set_completion_callback(move |index| {
        let _ = commit_tx.send(index);
    });

    // A blocked reader downstream of the target, on its own thread.
    let mirror_reader = target.reader();
    let (grain_tx, grain_rx) = mpsc::channel();
    thread::spawn(move || {
        let result = mirror_reader
            .wait_for_new_grain(Some(TEST_TIMEOUT))
            .map(|view| (view.info, view.payload.to_vec()));
        let _ = grain_tx.send(result);
    });
    thread::sleep(Duration::from_millis(50)); // let the reader block

    // Write grain 3 into the source flow, read it back, transfer it.
    let mut writer = FlowWriter::new(source_flow).unwrap();
    let mut pending = writer.open_grain(3).unwrap();
    for (i, byte) in pending.payload_mut().iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    pending.commit();

    let source_reader =
        FlowReader::new(manager_a.open_flow(id, AccessMode::OpenReadOnly).unwrap());
    let source_view = source_reader.get_grain(3).unwrap();
    initiator
        .transfer_grain(&source_view.info, source_view.payload)
        .await
        .unwrap();

    // The mirrored reader observes the identical grain.
    let (mirror_info, mirror_payload) = grain_rx
        .recv_timeout(TEST_TIMEOUT)
        .expect("mirror reader timed out")
        .expect("mirror reader failed");
    assert_eq!(mirror_info.index, 3);
    assert_eq!(mirror_info.grain_size, GRAIN_SIZE as u64);
    assert_eq!(mirror_info.committed_size, mirror_info.grain_size);
    assert_eq!(mirror_info.timestamp, source_view.info.timestamp);
    assert_eq!(mirror_payload, source_view.payload);

    // Both completion callbacks fired with the absolute index.
    assert_eq!(ack_rx.recv_timeout(TEST_TIMEOUT).unwrap(), 3);
    assert_eq!(commit_rx.recv_timeout(TEST_TIMEOUT).unwrap(), 3);

    // Later grains keep flowing through the same registration.
    let mut pending = writer.open_grain(4).unwrap();
    pending.payload_mut().fill(0x77);
    pending.commit();
    let view = source_reader.get_grain(4).unwrap();
    initiator.transfer_grain(&view.info, view.payload).await.unwrap();
    assert_eq!(ack_rx.recv_timeout(TEST_TIMEOUT).unwrap(), 4);

    let mirrored = target.get_grain_blocking(4, Some(TEST_TIMEOUT)).unwrap();
    assert!(mirrored.payload.iter().all(|&b| b == 0x77));

    // Removing the target stops the fan-out.
    initiator.remove_target(&parsed).unwrap();
    assert_eq!(initiator.target_count(), 0);
    assert!(matches!(
        initiator.remove_target(&parsed),
        Err(Error::NotFound)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transfer_with_no_targets_is_a_no_op() {
    let initiator = Initiator::setup(InitiatorConfig {
        endpoint: loopback_endpoint(),
        provider: Provider::Tcp,
    })
    .await
    .unwrap();

    let grain = mxl_core::GrainSnapshot {
        grain_size: 16,
        committed_size: 16,
        index: 0,
        ..Default::default()
    };
    initiator.transfer_grain(&grain, &[0u8; 16]).await.unwrap();

    // Short payloads are rejected before any fan-out.
    assert!(matches!(
        initiator.transfer_grain(&grain, &[0u8; 8]).await,
        Err(Error::InvalidArg(_))
    ));
}

#[tokio::test]
async fn unavailable_providers_are_rejected() {
    for provider in [Provider::Verbs, Provider::Efa] {
        let result = Initiator::setup(InitiatorConfig {
            endpoint: loopback_endpoint(),
            provider,
        })
        .await;
        assert!(matches!(result, Err(Error::Fabric(_))));
    }

    // A target with a mismatched provider is refused at registration.
    let initiator = Initiator::setup(InitiatorConfig {
        endpoint: loopback_endpoint(),
        provider: Provider::Tcp,
    })
    .await
    .unwrap();
    let info = TargetInfo {
        provider: Provider::Verbs,
        endpoint: EndpointAddress::new("127.0.0.1", "1"),
        region: mxl_fabrics::RegionDescriptor {
            base: 0,
            length: 0,
            key: 1,
            grain_count: 1,
            slot_size: 4096,
        },
        flow_id: Uuid::new_v4(),
    };
    assert!(matches!(
        initiator.add_target(&info).await,
        Err(Error::Fabric(_))
    ));
}

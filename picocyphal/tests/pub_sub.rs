use std::cell::{Cell, RefCell};
use std::rc::Rc;

use picocyphal::core::{NodeId, Priority, SubjectId};
use picocyphal::data_types::{ByteArray, Health, Heartbeat, Mode};
use picocyphal::endpoint::TransferMeta;
use picocyphal::{
    CanDriver, CanId, Clock, Config, Data, DataSpecifier, Duration, Error, Frame, Header, Instant,
    Mtu, Node, RxQueue, Subscription,
};

type TestNode<'a, const RX: usize = 64> = Node<'a, SimClock, BusCapture, RX>;

const SUBJECT: SubjectId = SubjectId::new(100).unwrap();
const PEER: NodeId = NodeId::new(7).unwrap();
const TX_TIMEOUT: Duration = Duration::from_micros(1_000_000);
const RX_TIMEOUT: Duration = Duration::from_micros(1_000_000);

#[derive(Clone)]
struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    fn new() -> Self {
        Self(Rc::new(Cell::new(0)))
    }

    fn advance(&self, micros: u64) {
        self.0.set(self.0.get() + micros);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.get())
    }
}

#[derive(Clone)]
struct BusCapture(Rc<RefCell<Vec<Frame>>>);

impl BusCapture {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    fn take(&self) -> Vec<Frame> {
        self.0.borrow_mut().drain(..).collect()
    }
}

impl CanDriver for BusCapture {
    fn transmit(&mut self, frame: &Frame) -> bool {
        self.0.borrow_mut().push(*frame);
        true
    }
}

fn message_frame(subject: SubjectId, source: NodeId, transfer_id: u8, payload: &[u8]) -> Frame {
    let header = Header {
        priority: Priority::Nominal,
        data_spec: DataSpecifier::Message(subject),
        source: Some(source),
        destination: None,
    };
    let mut data = payload.to_vec();
    data.push(0b1110_0000 | transfer_id);
    Frame {
        id: CanId::from(&header),
        data: Data::new(&data).unwrap(),
    }
}

#[test]
fn test_publish_enqueues_single_frame() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];
    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus.clone(), clock);

    let mut publisher = node.create_publisher::<ByteArray>(SUBJECT, TX_TIMEOUT);
    let value = ByteArray::from_slice(&[0x01, 0x02, 0x03, 0x04]).unwrap();
    node.publish(&mut publisher, &value, Priority::Nominal).unwrap();
    assert_eq!(node.statistics().frames_queued, 1);

    node.spin_some();
    let frames = bus.take();
    assert_eq!(frames.len(), 1);
    let header = frames[0].id.to_header().unwrap();
    assert_eq!(header.data_spec, DataSpecifier::Message(SUBJECT));
    assert_eq!(header.source, Some(node.node_id()));
    // Length prefix, payload, tail byte of a single-frame transfer.
    assert_eq!(&frames[0].data[..], &[4, 0, 1, 2, 3, 4, 0b1110_0000]);
    assert_eq!(node.statistics().arena.allocated, 0);
}

#[test]
fn test_subscription_receives_single_frame_transfer() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let seen: Rc<RefCell<Vec<(Vec<u8>, TransferMeta)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut subscription = Subscription::new(move |value: ByteArray, meta: &TransferMeta| {
        sink.borrow_mut().push((value.bytes.to_vec(), *meta));
    });

    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus, clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut subscription)
        .unwrap();

    let frame = message_frame(SUBJECT, PEER, 0, &[4, 0, 0x01, 0x02, 0x03, 0x04]);
    node.on_frame_received(&frame);
    node.spin_some();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, [0x01, 0x02, 0x03, 0x04]);
    assert_eq!(seen[0].1.source, Some(PEER));
    assert_eq!(node.statistics().transfers_received, 1);
    assert_eq!(node.statistics().arena.allocated, 0);
}

#[test]
fn test_full_ring_drops_newest_frame() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<4>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let seen: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut subscription = Subscription::new(move |value: ByteArray, _meta: &TransferMeta| {
        sink.borrow_mut().push(value.bytes[0]);
    });

    let mut node: TestNode<4> = Node::new(Config::default(), &mut memory, &rx, bus, clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut subscription)
        .unwrap();

    for index in 0..5u8 {
        let frame = message_frame(SUBJECT, PEER, index, &[1, 0, index]);
        node.on_frame_received(&frame);
    }
    node.spin_some();

    // The fifth push was rejected; the first four survive in order.
    assert_eq!(*seen.borrow(), [0, 1, 2, 3]);
    assert_eq!(node.statistics().frames_dropped, 1);
}

#[test]
fn test_multi_frame_round_trip_via_loopback() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let seen: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut subscription = Subscription::new(move |value: ByteArray, _meta: &TransferMeta| {
        sink.borrow_mut().push(value.bytes.to_vec());
    });

    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus.clone(), clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut subscription)
        .unwrap();

    let payload: Vec<u8> = (0..30).collect();
    let value = ByteArray::from_slice(&payload).unwrap();
    let mut publisher = node.create_publisher::<ByteArray>(SUBJECT, TX_TIMEOUT);
    node.publish(&mut publisher, &value, Priority::Nominal).unwrap();
    // 32 payload bytes plus CRC across 7-byte fragments.
    assert_eq!(node.statistics().frames_queued, 5);

    node.spin_some();
    for frame in bus.take() {
        node.on_frame_received(&frame);
    }
    node.spin_some();

    assert_eq!(*seen.borrow(), [payload]);
    assert_eq!(node.statistics().arena.allocated, 0);
}

#[test]
fn test_duplicate_subscription_rejected() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let first_count = Rc::new(Cell::new(0u32));
    let sink = first_count.clone();
    let mut first = Subscription::new(move |_value: ByteArray, _meta: &TransferMeta| {
        sink.set(sink.get() + 1);
    });
    let mut second = Subscription::new(|_value: ByteArray, _meta: &TransferMeta| {});

    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus, clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut first).unwrap();
    assert_eq!(
        node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut second),
        Err(Error::DuplicateSubscription)
    );

    // The original registration keeps receiving.
    node.on_frame_received(&message_frame(SUBJECT, PEER, 0, &[1, 0, 9]));
    node.spin_some();
    assert_eq!(first_count.get(), 1);
}

#[test]
fn test_unsubscribed_port_discards_silently() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let count = Rc::new(Cell::new(0u32));
    let sink = count.clone();
    let mut subscription = Subscription::new(move |_value: ByteArray, _meta: &TransferMeta| {
        sink.set(sink.get() + 1);
    });

    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus, clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut subscription)
        .unwrap();
    node.on_frame_received(&message_frame(SUBJECT, PEER, 0, &[1, 0, 9]));
    node.spin_some();
    assert_eq!(count.get(), 1);

    assert!(node.unsubscribe(DataSpecifier::Message(SUBJECT)));
    node.on_frame_received(&message_frame(SUBJECT, PEER, 1, &[1, 0, 9]));
    node.spin_some();
    assert_eq!(count.get(), 1);
    assert_eq!(node.statistics().transfers_received, 1);
}

#[test]
fn test_anonymous_transfers_are_single_frame_only() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];

    let seen: Rc<RefCell<Vec<Option<NodeId>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut subscription = Subscription::new(move |_value: ByteArray, meta: &TransferMeta| {
        sink.borrow_mut().push(meta.source);
    });

    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus, clock);
    node.create_subscription(SUBJECT, 258, RX_TIMEOUT, &mut subscription)
        .unwrap();

    let header = Header {
        priority: Priority::Nominal,
        data_spec: DataSpecifier::Message(SUBJECT),
        source: None,
        destination: None,
    };
    let single = Frame {
        id: CanId::from(&header),
        data: Data::new(&[1, 0, 0xcc, 0b1110_0000]).unwrap(),
    };
    node.on_frame_received(&single);
    node.spin_some();
    assert_eq!(*seen.borrow(), [None]);

    // A multi-frame start from an anonymous sender never begins reassembly.
    let start = Frame {
        id: CanId::from(&header),
        data: Data::new(&[7, 0, 1, 2, 3, 4, 5, 0b1010_0001]).unwrap(),
    };
    node.on_frame_received(&start);
    node.spin_some();
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(node.statistics().arena.allocated, 0);
}

#[test]
fn test_expired_tx_frames_never_reach_driver() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];
    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus.clone(), clock.clone());

    let mut publisher = node.create_publisher::<ByteArray>(SUBJECT, Duration::from_micros(500_000));
    let value = ByteArray::from_slice(&[1, 2, 3]).unwrap();
    node.publish(&mut publisher, &value, Priority::Nominal).unwrap();

    clock.advance(600_000);
    node.spin_some();

    assert!(bus.take().is_empty());
    assert_eq!(node.statistics().frames_expired, 1);
    assert_eq!(node.statistics().frames_sent, 0);
    assert_eq!(node.statistics().arena.allocated, 0);
}

#[test]
fn test_heartbeat_publishes_in_one_classic_frame() {
    let clock = SimClock::new();
    let bus = BusCapture::new();
    let rx = RxQueue::<64>::new(Mtu::Classic);
    let mut memory = [0u8; 16384];
    let mut node: TestNode = Node::new(Config::default(), &mut memory, &rx, bus.clone(), clock);

    let mut publisher = node.create_publisher::<Heartbeat>(Heartbeat::SUBJECT, TX_TIMEOUT);
    let beat = Heartbeat {
        uptime: 17,
        health: Health::Nominal,
        mode: Mode::Operational,
        vendor_specific_status_code: 0,
    };
    node.publish(&mut publisher, &beat, Priority::Nominal).unwrap();
    node.spin_some();

    let frames = bus.take();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].data.len(), 8);
    let header = frames[0].id.to_header().unwrap();
    assert_eq!(header.data_spec, DataSpecifier::Message(Heartbeat::SUBJECT));
}

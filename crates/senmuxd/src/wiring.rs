use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use senmux_config::{ChecksumSpec, CommonOptions, DirectionSpec, InterfaceSpec};
use senmux_core::{
    ChecksumPolicy, Direction, EventManager, Filter, InterfaceHandle, IoLists, Loopback, Registry, Supervisor,
};
use senmux_network::{DiscoveryListener, FramingSettings, TcpClient, TcpServer, UdpKind, UdpTransport};
use senmux_transports::{FileTransport, PtyTransport, SeatalkTransport, SerialTransport};
use senmux_utils::InterfaceId;

fn to_direction(spec: Option<DirectionSpec>, default: Direction) -> Direction {
    match spec {
        Some(DirectionSpec::In) => Direction::In,
        Some(DirectionSpec::Out) => Direction::Out,
        Some(DirectionSpec::Both) => Direction::Both,
        None => default,
    }
}

fn to_checksum(spec: ChecksumSpec) -> ChecksumPolicy {
    match spec {
        ChecksumSpec::No => ChecksumPolicy::No,
        ChecksumSpec::Strict => ChecksumPolicy::Strict,
        ChecksumSpec::Loose => ChecksumPolicy::Loose,
        ChecksumSpec::Add => ChecksumPolicy::Add,
        ChecksumSpec::AddOnly => ChecksumPolicy::AddOnly,
    }
}

fn build_filter(common: &CommonOptions) -> WireResult<Option<Filter>> {
    match &common.filter {
        None => Ok(None),
        Some(spec) => Ok(Some(Filter::rules(senmux_config::parse_filter_spec(spec)?))),
    }
}

/// Spawns every configured interface, registers outputs with `lists`, wires
/// input-direction interfaces to push into `engine_input`, and schedules
/// each interface's heartbeat (if configured) on `events`.
pub fn spawn_all(
    specs: &[InterfaceSpec],
    registry: &Registry,
    lists: &Arc<IoLists>,
    engine_input: &Arc<senmux_core::BoundedQueue>,
    events: &Arc<EventManager>,
    supervisor: &Supervisor,
) -> WireResult<()> {
    for spec in specs {
        let id = registry
            .id_of(spec.name())
            .unwrap_or_else(|| InterfaceId::major(0));
        spawn_one(spec, id, lists, engine_input, events, supervisor)?;
    }
    Ok(())
}

fn spawn_one(
    spec: &InterfaceSpec,
    id: InterfaceId,
    lists: &Arc<IoLists>,
    engine_input: &Arc<senmux_core::BoundedQueue>,
    events: &Arc<EventManager>,
    supervisor: &Supervisor,
) -> WireResult<()> {
    match spec {
        InterfaceSpec::TcpClient {
            name,
            addr,
            persist,
            retry_interval,
            preamble,
            common,
        } => {
            let direction = to_direction(common.direction, Direction::Both);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let client = TcpClient {
                addr: addr.parse()?,
                persist: *persist,
                retry_interval: *retry_interval,
                preamble: preamble.as_deref().map(senmux_network::decode_preamble).unwrap_or_default(),
                direction,
                framing: FramingSettings {
                    strict: common.strict,
                    nocr: common.nocr,
                    checksum: to_checksum(common.checksum),
                },
                ifilter,
                engine_input: Arc::clone(engine_input),
            };
            schedule_heartbeat(events, common, &handle);
            supervisor.spawn(handle, client);
        }
        InterfaceSpec::TcpServer { name, bind, common } => {
            let direction = to_direction(common.direction, Direction::In);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let server = TcpServer {
                bind_addr: bind.parse()?,
                direction,
                framing: FramingSettings {
                    strict: common.strict,
                    nocr: common.nocr,
                    checksum: to_checksum(common.checksum),
                },
                ifilter,
                engine_input: Arc::clone(engine_input),
                io_lists: Arc::clone(lists),
                queue_capacity: common.queue_size,
            };
            schedule_heartbeat(events, common, &handle);
            supervisor.spawn(handle, server);
        }
        InterfaceSpec::Udp {
            name,
            bind,
            send_to,
            broadcast,
            multicast_group,
            common,
        } => {
            let direction = to_direction(common.direction, Direction::Both);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let bind_addr: SocketAddrV4 = bind.parse()?;
            let kind = if let Some(group) = multicast_group {
                UdpKind::Multicast(group.parse::<Ipv4Addr>()?)
            } else if *broadcast {
                UdpKind::Broadcast
            } else {
                UdpKind::Unicast
            };
            let send_addr: SocketAddr = send_to
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(SocketAddr::V4(bind_addr));
            let transport = UdpTransport {
                bind_addr,
                send_addr,
                kind,
                direction,
                strict: common.strict,
                nocr: common.nocr,
                checksum: to_checksum(common.checksum),
                ifilter,
                engine_input: Arc::clone(engine_input),
            };
            schedule_heartbeat(events, common, &handle);
            supervisor.spawn(handle, transport);
        }
        InterfaceSpec::File { name, path, persist, common } => {
            let direction = to_direction(common.direction, Direction::In);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let transport = FileTransport {
                path: path.clone(),
                direction,
                persist: *persist,
                nocr: common.nocr,
                strict: common.strict,
                checksum: to_checksum(common.checksum),
                ifilter,
                engine_input: Arc::clone(engine_input),
            };
            schedule_heartbeat(events, common, &handle);
            supervisor.spawn(handle, transport);
        }
        InterfaceSpec::Serial { name, path, baud, common } => {
            let direction = to_direction(common.direction, Direction::Both);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let transport = SerialTransport {
                path: path.clone(),
                baud: *baud,
                direction,
                strict: common.strict,
                nocr: common.nocr,
                checksum: to_checksum(common.checksum),
                ifilter,
                engine_input: Arc::clone(engine_input),
            };
            schedule_heartbeat(events, common, &handle);
            supervisor.spawn(handle, transport);
        }
        InterfaceSpec::Pty { name, symlink, common } => {
            let direction = to_direction(common.direction, Direction::Both);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let transport = PtyTransport {
                symlink: symlink.clone(),
                direction,
                strict: common.strict,
                nocr: common.nocr,
                checksum: to_checksum(common.checksum),
                ifilter,
                engine_input: Arc::clone(engine_input),
            };
            supervisor.spawn(handle, transport);
        }
        InterfaceSpec::Seatalk { name, path } => {
            let handle = Arc::new(InterfaceHandle::new(id, name.clone(), Direction::In, Loopback(false)));
            let transport = SeatalkTransport {
                path: path.clone(),
                engine_input: Arc::clone(engine_input),
            };
            supervisor.spawn(handle, transport);
        }
        InterfaceSpec::Discovery { name, common } => {
            let direction = to_direction(common.direction, Direction::In);
            let ifilter = build_filter(common)?;
            let handle = make_handle(id, name, direction, common, lists);
            let listener = DiscoveryListener {
                direction,
                ifilter,
                engine_input: Arc::clone(engine_input),
                io_lists: Arc::clone(lists),
                queue_capacity: common.queue_size,
            };
            supervisor.spawn(handle, listener);
        }
    }
    Ok(())
}

fn make_handle(id: InterfaceId, name: &str, direction: Direction, common: &CommonOptions, lists: &Arc<IoLists>) -> Arc<InterfaceHandle> {
    let mut handle = InterfaceHandle::new(id, name, direction, Loopback(common.loopback));
    if direction.writes() {
        handle = handle.with_queue(Arc::new(senmux_core::BoundedQueue::new(common.queue_size)));
    }
    let handle = Arc::new(handle);
    if direction.writes() {
        lists.add_output(Arc::clone(&handle));
    }
    handle
}

fn schedule_heartbeat(events: &Arc<EventManager>, common: &CommonOptions, handle: &Arc<InterfaceHandle>) {
    if let Some(period) = common.heartbeat {
        if let Some(queue) = &handle.queue {
            events.schedule_heartbeat(Arc::clone(queue), handle.id, period);
        } else {
            events.schedule_heartbeat(Arc::clone(&dummy_heartbeat_target()), handle.id, period);
        }
    }
}

/// An inert queue used only so a heartbeat can still be *scheduled* against
/// a read-only interface without a writable queue of its own; nothing ever
/// drains it, matching the original's "heartbeats are fire-and-forget"
/// behavior for interfaces with no output side.
fn dummy_heartbeat_target() -> Arc<senmux_core::BoundedQueue> {
    Arc::new(senmux_core::BoundedQueue::new(1))
}

/// Boxed-error `Result` covering the handful of error types a wiring pass
/// can hit (address parsing, rule grammar, interface init).
pub type WireResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

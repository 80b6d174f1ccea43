use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::checksum::calcsum;
use crate::filter::Filter;
use crate::interface::{InterfaceHandle, IoLists};
use crate::senblk::{Senblk, SENMAX};

/// Version string reported in reply to a `$PKPXQV` query, mirroring the
/// original's build-version proprietary sentence.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

enum PropResult {
    Forward,
    Drop,
}

/// Interprets (and possibly rewrites in place) a `$PKPX...` proprietary
/// control sentence. Returns whether the engine should still forward it to
/// outputs afterward.
fn process_prop(senblk: &mut Senblk) -> PropResult {
    let body = senblk.as_bytes();
    if body.len() < 8 || body[6] != b',' {
        return PropResult::Drop;
    }
    match body[5] {
        b'Q' if body[7] == b'V' => {
            let reply = format!("$PKPXR,{VERSION}");
            let mut len = reply.len().min(SENMAX);
            senblk.data[..len].copy_from_slice(&reply.as_bytes()[..len]);
            let sum = calcsum(&senblk.data[1..len]);
            let tail = format!("*{sum:02X}\r\n");
            senblk.data[len..len + tail.len()].copy_from_slice(tail.as_bytes());
            len += tail.len();
            senblk.len = len;
            senblk.src = senmux_utils::InterfaceId(0);
            PropResult::Forward
        }
        // `I` marks an internally generated sentence (the heartbeat):
        // processed in place by whoever reads it, never fanned out further.
        _ => PropResult::Drop,
    }
}

/// Runs one engine's fan-out loop: read from `input`, evaluate the output
/// failover filter if any, then push to every registered output queue
/// except the one the sentence arrived on (unless that output has loopback
/// enabled).
///
/// A `None` read (the input queue shutting down) is propagated by shutting
/// down every output queue in turn, so downstream interfaces unwind too.
pub fn run_engine(input: Arc<crate::queue::BoundedQueue>, lists: Arc<IoLists>, ofilter: Option<Filter>) {
    loop {
        let Some(mut senblk) = input.next() else {
            // Shut down each output's queue so its writer drains whatever
            // backlog remains and then exits on its own; don't cancel the
            // interface itself here, since that's the supervisor's call to
            // make once its grace period for draining outputs has passed.
            // An output with no queue has no other way to learn about
            // shutdown, so it's cancelled directly.
            for output in lists.snapshot_outputs() {
                if let Some(q) = &output.queue {
                    q.shutdown();
                } else {
                    output.cancel.store(true, Ordering::SeqCst);
                }
            }
            return;
        };

        if senblk.is_proprietary() {
            if let PropResult::Drop = process_prop(&mut senblk) {
                continue;
            }
        }

        if let Some(filter) = &ofilter {
            if !filter.passes(&senblk) {
                continue;
            }
        }

        for output in lists.snapshot_outputs() {
            let Some(queue) = &output.queue else {
                continue;
            };
            let same_source = output.id == senblk.src;
            if !same_source || output.loopback.0 {
                queue.push(senblk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Direction, Loopback};
    use crate::queue::BoundedQueue;
    use senmux_utils::InterfaceId;
    use std::thread;

    fn output(id: u32, loopback: bool) -> Arc<InterfaceHandle> {
        Arc::new(
            InterfaceHandle::new(InterfaceId::major(id), format!("out{id}"), Direction::Out, Loopback(loopback))
                .with_queue(Arc::new(BoundedQueue::new(8))),
        )
    }

    #[test]
    fn fans_out_to_all_but_source() {
        let input = Arc::new(BoundedQueue::new(8));
        let lists = Arc::new(IoLists::new());
        let a = output(1, false);
        let b = output(2, false);
        lists.add_output(Arc::clone(&a));
        lists.add_output(Arc::clone(&b));

        input.push(Senblk::from_bytes(b"$GPGGA,1*2F\r\n", InterfaceId::major(1)));
        input.shutdown();

        run_engine(input, lists, None);

        assert!(a.queue.as_ref().unwrap().next().is_none());
        assert_eq!(b.queue.as_ref().unwrap().next().unwrap().src, InterfaceId::major(1));
    }

    #[test]
    fn loopback_output_receives_its_own_sentence() {
        let input = Arc::new(BoundedQueue::new(8));
        let lists = Arc::new(IoLists::new());
        let a = output(1, true);
        lists.add_output(Arc::clone(&a));

        input.push(Senblk::from_bytes(b"$GPGGA,1*2F\r\n", InterfaceId::major(1)));
        input.shutdown();

        run_engine(input, lists, None);

        assert!(a.queue.as_ref().unwrap().next().is_some());
    }

    #[test]
    fn version_query_rewritten_and_forwarded() {
        let input = Arc::new(BoundedQueue::new(8));
        let lists = Arc::new(IoLists::new());
        let a = output(1, true);
        lists.add_output(Arc::clone(&a));

        input.push(Senblk::from_bytes(b"$PKPXQV*00\r\n", InterfaceId::major(5)));
        input.shutdown();

        run_engine(input, lists, None);

        let got = a.queue.as_ref().unwrap().next().unwrap();
        assert!(got.as_str().unwrap().starts_with("$PKPXR,"));
        assert_eq!(got.src, InterfaceId(0));
    }

    #[test]
    fn heartbeat_is_dropped_not_forwarded() {
        let input = Arc::new(BoundedQueue::new(8));
        let lists = Arc::new(IoLists::new());
        let a = output(1, true);
        lists.add_output(Arc::clone(&a));

        input.push(Senblk::from_bytes(b"$PKPXI,HB*7C\r\n", InterfaceId(0)));
        input.shutdown();

        run_engine(input, lists, None);

        assert!(a.queue.as_ref().unwrap().next().is_none());
    }

    #[test]
    fn shutdown_of_input_propagates_to_outputs() {
        let input = Arc::new(BoundedQueue::new(8));
        let lists = Arc::new(IoLists::new());
        let a = output(1, false);
        lists.add_output(Arc::clone(&a));
        input.shutdown();

        let handle = thread::spawn(move || run_engine(input, lists, None));
        handle.join().unwrap();

        assert!(a.queue.as_ref().unwrap().next().is_none());
        assert!(!a.queue.as_ref().unwrap().is_active());
    }
}

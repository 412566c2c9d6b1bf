use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use super::{BoundedChannel, ChannelError, DEFAULT_CAPACITY, FrameChannel, Timeout};
use crate::frame::{BufferLedger, FrameUnit};

const WAKE_BOUND: Duration = Duration::from_millis(100);

fn channel<T>(capacity: usize) -> BoundedChannel<T> {
    BoundedChannel::new(capacity).unwrap()
}

#[test]
fn test_timeout_from_millis() {
    assert_eq!(Timeout::from_millis(-1), Timeout::Forever);
    assert_eq!(Timeout::from_millis(0), Timeout::NoWait);
    assert_eq!(
        Timeout::from_millis(25),
        Timeout::After(Duration::from_millis(25))
    );
    assert_eq!(Timeout::from(Duration::ZERO), Timeout::NoWait);
}

#[test]
fn test_zero_capacity_uses_default() {
    let ch = channel::<u32>(0);
    assert_eq!(ch.capacity(), DEFAULT_CAPACITY);
}

#[test]
fn test_count_stays_within_capacity_and_fifo_holds() {
    let ch = channel::<u64>(5);
    let mut expected = std::collections::VecDeque::new();
    let mut next = 0u64;
    // deterministic LCG so the push/pop mix is irregular but reproducible
    let mut seed = 0x2545_f491u64;

    for _ in 0..2000 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        if (seed >> 33) % 3 != 0 {
            match ch.try_push(next) {
                Ok(()) => {
                    expected.push_back(next);
                    next += 1;
                }
                Err(e) => {
                    assert_eq!(e.error(), ChannelError::WouldBlock);
                    assert_eq!(ch.len(), 5);
                }
            }
        } else {
            match ch.try_pop() {
                Ok(v) => assert_eq!(Some(v), expected.pop_front()),
                Err(e) => {
                    assert_eq!(e, ChannelError::WouldBlock);
                    assert!(expected.is_empty());
                }
            }
        }
        assert!(ch.len() <= ch.capacity());
        assert_eq!(ch.len(), expected.len());
    }
}

#[test]
fn test_push_full_no_wait_returns_immediately() {
    let ch = channel::<u32>(1);
    ch.try_push(1).unwrap();

    let start = Instant::now();
    let err = ch.push(2, Timeout::NoWait).unwrap_err();
    assert_eq!(err.error(), ChannelError::WouldBlock);
    assert_eq!(err.into_inner(), 2);
    assert!(start.elapsed() < Duration::from_millis(10));
}

#[test]
fn test_pop_empty_no_wait_returns_immediately() {
    let ch = channel::<u32>(4);
    let start = Instant::now();
    assert_eq!(ch.pop(Timeout::NoWait), Err(ChannelError::WouldBlock));
    assert!(start.elapsed() < Duration::from_millis(10));
}

#[test]
fn test_close_unblocks_blocked_push() {
    let ch = Arc::new(channel::<u32>(1));
    ch.try_push(1).unwrap();

    let ch_clone = Arc::clone(&ch);
    let handle = thread::spawn(move || {
        let result = ch_clone.push(2, Timeout::Forever);
        (result.map_err(|e| e.error()), Instant::now())
    });

    thread::sleep(Duration::from_millis(30));
    let closed_at = Instant::now();
    ch.close();

    let (result, returned_at) = handle.join().unwrap();
    assert_eq!(result, Err(ChannelError::Closed));
    assert!(returned_at.saturating_duration_since(closed_at) < WAKE_BOUND);
}

#[test]
fn test_close_unblocks_blocked_pop() {
    let ch = Arc::new(channel::<u32>(2));

    let ch_clone = Arc::clone(&ch);
    let handle = thread::spawn(move || {
        let start = Instant::now();
        (ch_clone.pop(Timeout::After(Duration::from_secs(5))), start.elapsed())
    });

    thread::sleep(Duration::from_millis(30));
    ch.close();

    let (result, waited) = handle.join().unwrap();
    assert_eq!(result, Err(ChannelError::Closed));
    assert!(waited < Duration::from_secs(1));
}

#[test]
fn test_pop_drains_after_close_then_reports_closed() {
    let ch = channel::<&str>(4);
    ch.try_push("a").unwrap();
    ch.try_push("b").unwrap();
    ch.try_push("c").unwrap();
    ch.close();
    ch.close();

    assert!(ch.is_closed());
    assert_eq!(ch.pop(Timeout::Forever), Ok("a"));
    assert_eq!(ch.pop(Timeout::NoWait), Ok("b"));
    assert_eq!(ch.try_pop(), Ok("c"));
    for _ in 0..3 {
        assert_eq!(ch.pop(Timeout::Forever), Err(ChannelError::Closed));
        assert_eq!(ch.try_pop(), Err(ChannelError::Closed));
    }
}

#[test]
fn test_closed_rejects_push_even_with_space() {
    let ch = channel::<u32>(4);
    ch.close();
    let err = ch.push(7, Timeout::After(Duration::from_millis(50))).unwrap_err();
    assert_eq!(err.error(), ChannelError::Closed);
    assert_eq!(ch.try_push(8).unwrap_err().error(), ChannelError::Closed);
    assert!(ch.is_empty());
}

#[test]
fn test_frame_units_round_trip_in_order() {
    let ledger = BufferLedger::new();
    let ch = FrameChannel::new(16).unwrap();

    for i in 0..16u8 {
        let payload = ledger.copy_from_slice(&vec![i; i as usize + 1]).unwrap();
        ch.push(
            FrameUnit::encoded(payload, 1000 + i as i64 * 40, i % 4 == 0),
            Timeout::NoWait,
        )
        .unwrap();
    }
    assert_eq!(ledger.live(), 16);

    for i in 0..16u8 {
        let unit = ch.pop(Timeout::NoWait).unwrap();
        assert_eq!(unit.pts(), 1000 + i as i64 * 40);
        assert_eq!(unit.size(), i as usize + 1);
        assert_eq!(unit.is_keyframe(), i % 4 == 0);
        assert_eq!(unit.data().unwrap(), vec![i; i as usize + 1].as_slice());
    }
    assert_eq!(ledger.live(), 0);
}

#[test]
fn test_timed_push_scenario() {
    let ch = channel::<char>(2);
    ch.push('A', Timeout::NoWait).unwrap();
    ch.push('B', Timeout::NoWait).unwrap();

    let start = Instant::now();
    let err = ch
        .push('C', Timeout::After(Duration::from_millis(50)))
        .unwrap_err();
    let waited = start.elapsed();
    assert_eq!(err.error(), ChannelError::TimedOut);
    assert!(waited >= Duration::from_millis(45), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(500), "waited {:?}", waited);

    assert_eq!(ch.pop(Timeout::NoWait), Ok('A'));

    let start = Instant::now();
    ch.push('C', Timeout::After(Duration::from_millis(50))).unwrap();
    assert!(start.elapsed() < Duration::from_millis(10));

    assert_eq!(ch.try_pop(), Ok('B'));
    assert_eq!(ch.try_pop(), Ok('C'));
}

#[test]
fn test_pop_wakes_blocked_push() {
    let ch = Arc::new(channel::<u32>(1));
    ch.try_push(1).unwrap();

    let ch_clone = Arc::clone(&ch);
    let handle = thread::spawn(move || ch_clone.push(2, Timeout::Forever).is_ok());

    thread::sleep(Duration::from_millis(20));
    assert_eq!(ch.pop(Timeout::NoWait), Ok(1));
    assert!(handle.join().unwrap());
    assert_eq!(ch.pop(Timeout::After(Duration::from_millis(100))), Ok(2));
}

#[test]
fn test_drain_empties_channel() {
    let ch = channel::<u32>(4);
    for i in 0..3 {
        ch.try_push(i).unwrap();
    }
    assert_eq!(ch.drain(), vec![0, 1, 2]);
    assert!(ch.is_empty());
    assert!(ch.drain().is_empty());
}

#[test]
fn test_many_producers_many_consumers() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let ch = Arc::new(channel::<(u64, u64)>(8));
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let ch = Arc::clone(&ch);
        producers.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                ch.push((p, seq), Timeout::Forever).unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let ch = Arc::clone(&ch);
        consumers.push(thread::spawn(move || {
            let mut got = Vec::new();
            while let Ok(item) = ch.pop(Timeout::Forever) {
                got.push(item);
            }
            got
        }));
    }

    for p in producers {
        p.join().unwrap();
    }
    ch.close();

    let mut per_producer = vec![Vec::new(); PRODUCERS as usize];
    let mut total = 0;
    for c in consumers {
        let got = c.join().unwrap();
        // each consumer sees every producer's items in increasing order
        let mut last = vec![None; PRODUCERS as usize];
        for (p, seq) in got {
            if let Some(prev) = last[p as usize] {
                assert!(seq > prev);
            }
            last[p as usize] = Some(seq);
            per_producer[p as usize].push(seq);
            total += 1;
        }
    }

    assert_eq!(total, PRODUCERS * PER_PRODUCER);
    for mut seqs in per_producer {
        seqs.sort_unstable();
        assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

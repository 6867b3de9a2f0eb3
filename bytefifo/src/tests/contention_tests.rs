//! Multi-thread contention scenarios: the wake-up discipline under asymmetric
//! batching, FIFO integrity under wrap pressure, and the timeout windows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::OwnedQueue;
use crate::errors::QueueError;
use crate::reader::frames;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn many_producers_one_batched_consumer() {
    let queue = Arc::new(OwnedQueue::new(256).expect("queue creation failed"));
    let producers = 4usize;
    let frames_per_producer = 200usize;

    // 4 * 200 * (8 + 16) bytes vastly exceed the 256-byte ring, so producers
    // spend most of the run blocked and depend on the chain-signal to make
    // progress together.
    let mut handles = Vec::new();
    for producer in 0..producers {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for seq in 0..frames_per_producer {
                let mut msg = [0u8; 16];
                msg[0] = producer as u8;
                msg[1..9].copy_from_slice(&(seq as u64).to_le_bytes());
                queue
                    .put(&[&msg[..]], true, WAIT)
                    .expect("producer put timed out");
            }
        }));
    }

    let mut next_seq = vec![0u64; producers];
    let mut received = 0usize;
    let mut out = vec![0u8; 512];
    while received < producers * frames_per_producer {
        let drained = match queue.get(&mut out, usize::MAX, usize::MAX, true, WAIT) {
            Ok(drained) => drained,
            Err(err) => panic!("consumer get failed: {err}"),
        };
        for payload in frames(&out[..drained.bytes_read]) {
            let producer = payload[0] as usize;
            let seq = u64::from_le_bytes(payload[1..9].try_into().unwrap());
            assert_eq!(
                seq, next_seq[producer],
                "frames of producer {producer} arrived out of order"
            );
            next_seq[producer] += 1;
            received += 1;
        }
    }

    for handle in handles {
        handle.join().expect("producer thread panicked");
    }
    assert!(queue.is_empty());
}

#[test]
fn many_consumers_one_batched_producer() {
    let queue = Arc::new(OwnedQueue::new(1024).expect("queue creation failed"));
    let consumers = 4usize;
    let total = 400usize;
    let received = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..consumers {
        let queue = Arc::clone(&queue);
        let received = Arc::clone(&received);
        handles.push(thread::spawn(move || {
            let mut out = vec![0u8; 64];
            while received.load(Ordering::Relaxed) < total {
                match queue.get(&mut out, 1, usize::MAX, true, Duration::from_millis(100)) {
                    Ok(drained) => {
                        received.fetch_add(drained.messages_read, Ordering::Relaxed);
                    }
                    Err(QueueError::Empty) => {}
                    Err(err) => panic!("consumer get failed: {err}"),
                }
            }
        }));
    }

    // One producer enqueues in batches of eight; its single not_empty signal
    // relies on consumers chain-signalling each other.
    let batch_size = 8usize;
    for batch in 0..(total / batch_size) {
        let messages: Vec<Vec<u8>> = (0..batch_size)
            .map(|i| vec![(batch * batch_size + i) as u8; 24])
            .collect();
        let refs: Vec<&[u8]> = messages.iter().map(|m| m.as_slice()).collect();
        queue.put(&refs, true, WAIT).expect("producer put timed out");
    }

    for handle in handles {
        handle.join().expect("consumer thread panicked");
    }
    assert_eq!(received.load(Ordering::Relaxed), total);
    assert!(queue.is_empty());
}

#[test]
fn fifo_integrity_across_wraps() {
    let queue = Arc::new(OwnedQueue::new(96).expect("queue creation failed"));
    let total_frames = 500usize;

    let producer_queue = Arc::clone(&queue);
    let producer = thread::spawn(move || {
        for seq in 0..total_frames {
            let len = 1 + (seq * 7) % 40;
            let msg = vec![(seq % 251) as u8; len];
            producer_queue
                .put(&[&msg[..]], true, WAIT)
                .expect("producer put timed out");
        }
    });

    let mut out = vec![0u8; 144];
    let mut received = 0usize;
    while received < total_frames {
        let drained = match queue.get(&mut out, usize::MAX, usize::MAX, true, WAIT) {
            Ok(drained) => drained,
            Err(err) => panic!("consumer get failed: {err}"),
        };
        for payload in frames(&out[..drained.bytes_read]) {
            let expected_len = 1 + (received * 7) % 40;
            let expected_byte = (received % 251) as u8;
            assert_eq!(payload.len(), expected_len, "frame {received} length");
            assert!(
                payload.iter().all(|&b| b == expected_byte),
                "frame {received} payload corrupted"
            );
            received += 1;
        }
    }
    producer.join().expect("producer thread panicked");
    assert!(queue.is_empty());
}

#[test]
fn blocked_consumer_wakes_on_put() {
    let queue = Arc::new(OwnedQueue::new(64).expect("queue creation failed"));

    let consumer_queue = Arc::clone(&queue);
    let consumer = thread::spawn(move || {
        let mut out = [0u8; 64];
        let drained = consumer_queue
            .get(&mut out, 1, 64, true, WAIT)
            .expect("wake-up lost on not_empty");
        assert_eq!(drained.messages_read, 1);
        assert_eq!(&out[8..drained.bytes_read], &[42]);
    });

    // Let the consumer park on not_empty first.
    thread::sleep(Duration::from_millis(100));
    queue
        .put(&[&[42u8][..]], false, Duration::ZERO)
        .expect("put into empty queue failed");
    consumer.join().expect("consumer thread panicked");
}

#[test]
fn blocked_producer_wakes_on_get() {
    let queue = Arc::new(OwnedQueue::new(32).expect("queue creation failed"));
    queue
        .put(&[&[1u8; 24][..]], false, Duration::ZERO)
        .expect("initial fill failed");
    assert!(queue.is_full());

    let producer_queue = Arc::clone(&queue);
    let producer = thread::spawn(move || {
        producer_queue
            .put(&[&[2u8; 10][..]], true, WAIT)
            .expect("wake-up lost on not_full");
    });

    // Let the producer park on not_full, then free the whole ring.
    thread::sleep(Duration::from_millis(100));
    let mut out = [0u8; 32];
    let drained = queue
        .get(&mut out, 1, 32, true, WAIT)
        .expect("drain of the full queue failed");
    assert_eq!(drained.messages_read, 1);

    producer.join().expect("producer thread panicked");
    assert_eq!(queue.len(), 1);
}

#[test]
fn timeout_windows_hold_for_put_and_get() {
    let timeout = Duration::from_millis(200);
    let slack = Duration::from_millis(500);

    let full = OwnedQueue::new(32).expect("queue creation failed");
    full.put(&[&[1u8; 24][..]], false, Duration::ZERO)
        .expect("initial fill failed");

    let started = Instant::now();
    assert!(matches!(
        full.put(&[&[2u8][..]], true, timeout),
        Err(QueueError::Full)
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "put returned early: {elapsed:?}");
    assert!(elapsed < timeout + slack, "put overshot: {elapsed:?}");

    let empty = OwnedQueue::new(32).expect("queue creation failed");
    let mut out = [0u8; 32];
    let started = Instant::now();
    assert!(matches!(
        empty.get(&mut out, 1, 32, true, timeout),
        Err(QueueError::Empty)
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "get returned early: {elapsed:?}");
    assert!(elapsed < timeout + slack, "get overshot: {elapsed:?}");
}

use std::error::Error;
use std::time::{Duration, Instant};

use clap::Parser;
use log::warn;
use serde_derive::{Deserialize, Serialize};

use bytefifo::{frames, QueueConfig, QueueError, SharedQueue};

#[derive(Parser)]
#[command(about = "Drain a shared bytefifo queue and verify sequence stamps")]
struct Opts {
    #[arg(short = 'c', long = "config", default_value = "bytefifo-consumer.toml")]
    config: String,
    /// Messages to drain before exiting.
    #[arg(long, default_value_t = 1_000_000)]
    messages: usize,
    /// Seconds to wait for data before treating the stream as finished.
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ConsumerConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ConsumerConfig = confy::load_path(&opts.config)?;
    let queue = SharedQueue::open(&cfg.queue)?;
    run(&queue, &opts)
}

fn run(queue: &SharedQueue, opts: &Opts) -> Result<(), Box<dyn Error>> {
    let timeout = Duration::from_secs_f64(opts.timeout.max(0.0));
    // One drain can hand back at most a full ring.
    let mut out = vec![0u8; queue.capacity() + 64];
    let start = Instant::now();

    let mut received = 0usize;
    let mut next_seq = 0u64;
    while received < opts.messages {
        match queue.get(&mut out, usize::MAX, usize::MAX, true, timeout) {
            Ok(drained) => {
                for payload in frames(&out[..drained.bytes_read]) {
                    if payload.len() >= 8 {
                        let seq = u64::from_le_bytes(payload[..8].try_into()?);
                        if seq != next_seq {
                            warn!(
                                "expected sequence {}, got {} (multiple producers?)",
                                next_seq, seq
                            );
                        }
                        next_seq = seq + 1;
                    }
                    received += 1;
                }
                if received % 1_000_000 == 0 {
                    eprint!("\r{} messages drained", received);
                }
            }
            Err(QueueError::Empty) => {
                warn!(
                    "queue stayed empty for {:?}, stopping after {} messages",
                    timeout, received
                );
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let duration = start.elapsed();
    let iops = (received as f64 / duration.as_millis().max(1) as f64) * 1_000f64;
    println!(
        "\n{} messages drained ({}K messages/s). Total time: {:?}",
        received,
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}

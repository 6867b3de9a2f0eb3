use std::error::Error;
use std::time::{Duration, Instant};

use clap::Parser;
use log::info;
use serde_derive::{Deserialize, Serialize};

use bytefifo::{QueueConfig, SharedQueue};

#[derive(Parser)]
#[command(about = "Stream sequence-stamped messages into a shared bytefifo queue")]
struct Opts {
    #[arg(short = 'c', long = "config", default_value = "bytefifo-producer.toml")]
    config: String,
    /// Messages to enqueue before exiting.
    #[arg(long, default_value_t = 1_000_000)]
    messages: usize,
    /// Payload bytes per message (at least 8, for the sequence stamp).
    #[arg(long, default_value_t = 64)]
    payload: usize,
    /// Messages per put batch.
    #[arg(long, default_value_t = 16)]
    batch: usize,
    /// Seconds to wait for free ring space before giving up.
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ProducerConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ProducerConfig = confy::load_path(&opts.config)?;
    let queue = SharedQueue::create(&cfg.queue)?;
    info!(
        "queue ready at {}/{} ({} ring bytes)",
        cfg.queue.data_dir,
        cfg.queue.flink_name,
        queue.capacity()
    );
    run(&queue, &opts)
}

fn run(queue: &SharedQueue, opts: &Opts) -> Result<(), Box<dyn Error>> {
    let timeout = Duration::from_secs_f64(opts.timeout.max(0.0));
    let payload = opts.payload.max(8);
    let batch_size = opts.batch.max(1);
    let start = Instant::now();

    let mut sent = 0usize;
    while sent < opts.messages {
        let batch_len = batch_size.min(opts.messages - sent);
        let batch: Vec<Vec<u8>> = (0..batch_len)
            .map(|i| {
                let mut msg = vec![0u8; payload];
                msg[..8].copy_from_slice(&((sent + i) as u64).to_le_bytes());
                msg
            })
            .collect();
        let refs: Vec<&[u8]> = batch.iter().map(|m| m.as_slice()).collect();
        queue.put(&refs, true, timeout)?;
        sent += batch_len;
        if sent % 1_000_000 == 0 {
            eprint!("\r{} messages enqueued", sent);
        }
    }

    let duration = start.elapsed();
    let iops = (sent as f64 / duration.as_millis().max(1) as f64) * 1_000f64;
    println!(
        "\n{}K messages enqueued/s. Total time: {:?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}

use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use eventring_config::EventRingConfig;
use eventring_core::{EventDescriptor, Iterator as RingIterator, PollOutcome, Protection, RingHandle};
use eventring_mmap::open_ro_file;
use eventring_registry::{demo_event_type, DemoTick};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config/reader-demo.toml".into());
    let config = EventRingConfig::load(&config_path).unwrap_or_else(|err| {
        eprintln!("READER-DEMO: no usable config at '{config_path}' ({err}), using defaults");
        EventRingConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    info!(path = %config.ring_file_path, "READER-DEMO: waiting for ring");
    let file = loop {
        match open_ro_file(&config.ring_file_path) {
            Ok(f) => break f,
            Err(_) => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    let handle = loop {
        match unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadOnly, None) } {
            Ok(h) => break h,
            Err(_) => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    info!("READER-DEMO: attached, reading...");
    let mut reader = RingIterator::new(&handle);

    let mut last_report = Instant::now();
    let mut count: u64 = 0;
    let mut overruns: u64 = 0;
    let mut last_tick: Option<DemoTick> = None;

    loop {
        match reader.poll() {
            PollOutcome::Event(desc) => {
                if let Some(tick) = read_tick(&reader, &desc) {
                    last_tick = Some(tick);
                }
                count += 1;
            }
            PollOutcome::Gap { lost, .. } => overruns += lost,
            PollOutcome::NotAvailable => std::thread::sleep(Duration::from_millis(1)),
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            match last_tick {
                Some(tick) => info!(
                    rate_per_sec = count,
                    overruns,
                    symbol_id = { tick.symbol_id },
                    price_ticks = { tick.price_ticks },
                    "READER-DEMO: read rate"
                ),
                None => info!(rate_per_sec = count, overruns, "READER-DEMO: read rate"),
            }
            if overruns > 0 {
                warn!(overruns, "READER-DEMO: reader is falling behind the writer");
            }
            count = 0;
            last_report = Instant::now();
        }
    }
}

fn read_tick(reader: &RingIterator<'_>, desc: &EventDescriptor) -> Option<DemoTick> {
    if desc.event_type != demo_event_type::TICK {
        return None;
    }
    let mut bytes = [0u8; std::mem::size_of::<DemoTick>()];
    reader.payload_memcpy(desc, &mut bytes)?;
    Some(DemoTick::from_bytes(bytes))
}

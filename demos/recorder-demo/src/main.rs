use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use eventring_config::EventRingConfig;
use eventring_core::{init_file, init_size, Recorder};
use eventring_mmap::{create_sized_file, Protection};
use eventring_registry::{demo_event_type, demo_schema_hash, DemoTick};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config/recorder-demo.toml".into());
    let config = EventRingConfig::load(&config_path).unwrap_or_else(|err| {
        eprintln!("RECORDER-DEMO: no usable config at '{config_path}' ({err}), using defaults");
        EventRingConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    let schema_hash = demo_schema_hash();
    let size = init_size(config.descriptor_shift, config.payload_shift, config.context_large_pages)?;
    let total = eventring_core::calc_storage(&size);
    let file = create_sized_file(&config.ring_file_path, total)?;

    unsafe {
        init_file(&size, config.content_type, schema_hash, file.as_raw_fd(), 0)?;
    }
    let handle = unsafe { eventring_core::RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, Some(schema_hash))? };
    let mut recorder = Recorder::new(&handle)?;

    info!(
        path = %config.ring_file_path,
        descriptor_capacity = size.descriptor_capacity,
        payload_buf_size = size.payload_buf_size,
        "RECORDER-DEMO: ring created, publishing DemoTick events"
    );

    let mut symbol_id: u16 = 0;
    let mut price_ticks: i64 = 100_000;
    let mut last_report = Instant::now();
    let mut count: u64 = 0;

    loop {
        let tick = DemoTick {
            symbol_id,
            price_ticks,
            qty_lots: 10,
        };
        recorder.record(demo_event_type::TICK, &tick.as_bytes(), [0; 4]);

        count += 1;
        symbol_id = symbol_id.wrapping_add(1) % 64;
        price_ticks += if count % 2 == 0 { 1 } else { -1 };

        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(rate_per_sec = count, "RECORDER-DEMO: publishing");
            count = 0;
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_micros(100));
    }
}

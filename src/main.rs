use std::path::Path;
use std::time::{Duration, Instant};

use gears::bridge::results::ResultTable;
use gears::bridge::worker::WorkerHealth;
use gears::bridge::{Bridge, TextureRequest};
use gears::WorkerOptions;

const TIMEOUT: Duration = Duration::from_secs(10);

/// (id, host format code, edge length, mip count)
const PROBES: &[(u32, i32, u32, u32)] = &[
    (1, 4, 64, 7),  // RGBA32 with a full mip chain
    (2, 10, 30, 1), // DXT1, not a block multiple
    (3, 25, 16, 5), // BC7
    (4, 999, 8, 1), // unknown code, RGBA8 fallback
];

fn load_options() -> WorkerOptions {
    match std::env::args().nth(1) {
        Some(path) => match WorkerOptions::load(Path::new(&path)) {
            Ok(options) => options,
            Err(e) => {
                log::error!("{e}");
                std::process::exit(1);
            }
        },
        None => WorkerOptions::from_env(),
    }
}

fn checkerboard(format_code: i32, edge: u32) -> Vec<u8> {
    let size = gears::format::lookup(format_code).upload_size(edge, edge);
    (0..size).map(|i| if (i / 16) % 2 == 0 { 0xff } else { 0x20 }).collect()
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let bridge = Bridge::new(load_options());
    let _ = bridge.register_results(ResultTable::new(PROBES.len()));
    if let Err(e) = bridge.start() {
        log::error!("{e}");
        std::process::exit(1);
    }

    for &(unique_id, format_code, edge, mip_count) in PROBES {
        let pixels = checkerboard(format_code, edge);
        let _ = bridge.create_texture(&TextureRequest {
            unique_id,
            format_code,
            width: edge,
            height: edge,
            mip_count,
            pixels: &pixels,
        });
    }

    let started = Instant::now();
    loop {
        let health = bridge.health();
        if bridge.stats().executed >= PROBES.len() as u64 || !health.is_alive()
        {
            break;
        }
        if started.elapsed() > TIMEOUT {
            log::error!("timed out waiting for results ({health:?})");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let published = bridge
        .queue()
        .with_results(|table| {
            for slot in table.slots() {
                log::info!(
                    "slot id {} -> texture {}",
                    slot.id,
                    slot.texture_handle
                );
            }
            table.occupied()
        })
        .unwrap_or(0);
    log::info!("{:?} {:?}", bridge.health(), bridge.stats());
    bridge.stop();

    // Formats the device cannot sample are logged and skipped.
    if published == 0 || bridge.health() != WorkerHealth::Stopped {
        std::process::exit(1);
    }
}

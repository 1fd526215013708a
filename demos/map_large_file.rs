//! Stepwise fill of a multi-gigabyte backing file.
//!
//! Creates a 4 GiB backing file, reserves the full 20 GiB target up front so
//! the reservation never has to move, then maps and fills the file in 4 GiB
//! increments and msyncs the result. Every increment should report
//! `mapping_was_moved = false`.
//!
//! Run with: `cargo run --release --example map_large_file -- --file /tmp/big.bin`

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use growmap::{CHUNK_SIZE, CreateOptions, MapNextOptions, MmapManager, format_memory_size};
use tracing::info;
use tracing_subscriber::EnvFilter;

const GB: u64 = 1 << 30;

const INITIAL_FILE_SIZE: u64 = 4 * GB;
const TARGET_SIZE: u64 = 20 * GB;
const MAP_INCREMENT_SIZE: u64 = 4 * GB;

#[derive(Parser)]
#[command(name = "map_large_file", about = "Map a 20 GiB file in 4 GiB increments")]
struct Flags {
  /// Path to the backing file; created and grown to the 20 GiB target.
  #[arg(short, long, default_value = "test_backing_file")]
  file: PathBuf,

  /// Wait for ENTER before mapping starts (inspect with pmap/htop first).
  #[arg(long, default_value_t = false)]
  pause: bool,
}

fn must_create_file(
  path: &Path,
  initial_size: u64,
) -> Result<()> {
  let file = std::fs::OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .open(path)
    .with_context(|| format!("failed to create backing file {}", path.display()))?;

  file
    .set_len(initial_size)
    .with_context(|| format!("failed to size backing file {}", path.display()))
}

fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let flags = Flags::parse();

  must_create_file(&flags.file, INITIAL_FILE_SIZE)?;

  // Reserving the full foreseeable file size means the reserved address
  // range only ever gets extended in place, never moved.
  let mut man = MmapManager::create(&CreateOptions {
    backing_file: flags.file.clone(),
    initial_reserved_size: TARGET_SIZE,
    reserve_existing_file_size: false,
  })
  .context("failed to create mapping manager")?;

  info!(
    pid = std::process::id(),
    initial_file = %format_memory_size(INITIAL_FILE_SIZE),
    reserved = %format_memory_size(man.reserved_size()),
    "created manager"
  );

  let chunks_per_increment = MAP_INCREMENT_SIZE / CHUNK_SIZE;
  let target_chunks = TARGET_SIZE / CHUNK_SIZE;
  let mut remaining = target_chunks.saturating_sub(u64::from(man.num_chunks_mapped()));

  info!(
    remaining,
    increments = remaining.div_ceil(chunks_per_increment),
    chunks_per_increment,
    "will map chunks"
  );

  if flags.pause {
    block_until_enter_pressed();
  }

  while remaining > 0 {
    let step = remaining.min(chunks_per_increment);
    let res = man
      .map_next(MapNextOptions {
        dont_grow_if_fully_mapped: false,
        extra_chunks_to_reserve_on_grow: 0,
        chunks_to_map_next: step,
      })
      .context("failed to map next increment")?;
    remaining -= step;

    // Fault the fresh increment in with a visible bit pattern.
    let tail = (step * man.chunk_size()) as usize;
    let mapped = man.mapped_mut();
    let start = mapped.len() - tail;
    mapped[start..].fill(0b1010_1010);

    info!(
      remaining,
      mapping_was_moved = res.mapping_was_moved,
      mapped = %format_memory_size(man.mapped_size()),
      "mapped increment"
    );
  }

  info!(mapped = %format_memory_size(man.mapped_size()), "fully mapped target size, syncing");
  man.sync().context("failed to msync mapped prefix")?;

  info!(
    chunks = man.num_chunks_mapped(),
    bytes = man.mapped_size(),
    "mapped and synced all chunks"
  );

  man.close().context("failed to delete manager")?;
  Ok(())
}
